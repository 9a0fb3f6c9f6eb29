// ==========================================
// 铁路容量分配系统 - 冲突组重置
// ==========================================
// 职责: 撤销冲突组的全部解决结果, 删除成员记录与冲突组
// 槽位层冲突 → 槽位层状态回到暂定, 容量池层结论保留
// 容量池层冲突 → 容量池层状态回到暂定 (无槽位层冲突时槽位层一并回到暂定)
// 下一次扫描会按相同指纹重建冲突组
// ==========================================

use crate::domain::action_log::ActionType;
use crate::domain::conflict::ConflictRecord;
use crate::domain::request::Request;
use crate::domain::types::AssignmentStatus;
use crate::engine::audit::record_action;
use crate::engine::conflict_level::{apply_to_request, transition, ConflictLevel};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::repositories::AllocationRepositories;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;
use tracing::instrument;

/// 重置结果
#[derive(Debug, Clone, Serialize)]
pub struct GroupResetSummary {
    pub group_id: String,
    pub fingerprint: String,
    pub deleted_conflict_ids: Vec<String>,
    pub affected_request_ids: Vec<String>,
}

pub struct GroupResetService {
    repos: AllocationRepositories,
}

impl GroupResetService {
    pub fn new(repos: AllocationRepositories) -> Self {
        Self { repos }
    }

    #[instrument(skip(self))]
    pub fn reset_group(&self, group_id: &str, actor: &str) -> EngineResult<GroupResetSummary> {
        let group = self
            .repos
            .group_repo
            .find_by_id(group_id)?
            .ok_or_else(|| EngineError::not_found("ConflictGroup", group_id))?;
        let records = self.repos.conflict_repo.find_by_ids(&group.conflict_ids)?;

        let mut affected: BTreeSet<String> = BTreeSet::new();
        for record in &records {
            for request_id in &record.involved_request_ids {
                if apply_to_request(&self.repos.request_repo, request_id, |r| revert(r, record))? {
                    affected.insert(request_id.clone());
                }
            }
            self.repos.conflict_repo.delete(&record.conflict_id)?;
        }
        self.repos.group_repo.delete(group_id)?;

        let summary = GroupResetSummary {
            group_id: group.group_id.clone(),
            fingerprint: group.fingerprint.clone(),
            deleted_conflict_ids: records.iter().map(|r| r.conflict_id.clone()).collect(),
            affected_request_ids: affected.into_iter().collect(),
        };
        record_action(
            &self.repos.action_log_repo,
            ActionType::GroupReset,
            actor,
            group_id,
            json!({
                "fingerprint": summary.fingerprint,
                "conflict_ids": summary.deleted_conflict_ids,
                "request_ids": summary.affected_request_ids,
            }),
            None,
        )?;
        tracing::info!(
            group_id = %group_id,
            records = summary.deleted_conflict_ids.len(),
            requests = summary.affected_request_ids.len(),
            "冲突组已重置"
        );
        Ok(summary)
    }
}

/// 撤销一条记录对申请分配的影响
fn revert(request: &mut Request, record: &ConflictRecord) -> EngineResult<bool> {
    let level = ConflictLevel::of(record.conflict_type);
    let mut changed = false;
    for a in request.assignments.iter_mut() {
        if !level.in_scope(a, &record.trigger_id) || level.back_ref(a) != Some(record.conflict_id.as_str()) {
            continue;
        }
        transition(level, a, AssignmentStatus::Initial)?;
        level.set_back_ref(a, None);
        if level == ConflictLevel::Pot && a.slot_conflict_id.is_none() {
            transition(ConflictLevel::Slot, a, AssignmentStatus::Initial)?;
        }
        changed = true;
    }
    Ok(changed)
}
