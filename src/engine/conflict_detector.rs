// ==========================================
// 铁路容量分配系统 - 冲突检测引擎
// ==========================================
// 职责: 扫描全部容量池与槽位, 维护冲突记录, 重算冲突组
// 顺序: 容量池层 → 槽位层 → 失效记录清理 → 冲突组合并
// 红线: 对未变化的数据重复扫描不产生任何写入 (幂等)
// ==========================================

use crate::domain::action_log::ActionType;
use crate::domain::conflict::{ConflictGroup, ConflictRecord};
use crate::domain::request::Request;
use crate::domain::types::{AssignmentStatus, ConflictStatus, ConflictType};
use crate::engine::audit::record_action;
use crate::engine::conflict_level::{apply_to_request, ConflictLevel};
use crate::engine::error::EngineResult;
use crate::engine::repositories::AllocationRepositories;
use crate::repository::conflict_repo::ConflictFilter;
use crate::repository::error::RepositoryResult;
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::instrument;

/// 默认分页大小
pub const DEFAULT_SWEEP_PAGE_SIZE: usize = 500;

/// 单个实体的检测结论
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityOutcome {
    New,
    Updated,
    Reopened,
    Unchanged,
    AutoResolved,
    NoConflict,
}

/// 一个层级的扫描计数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepCounters {
    pub scanned: usize,
    pub new: usize,
    pub updated: usize,
    pub reopened: usize,
    pub unchanged: usize,
    pub auto_resolved: usize,
    pub no_conflict: usize,
}

impl SweepCounters {
    fn record(&mut self, outcome: EntityOutcome) {
        self.scanned += 1;
        match outcome {
            EntityOutcome::New => self.new += 1,
            EntityOutcome::Updated => self.updated += 1,
            EntityOutcome::Reopened => self.reopened += 1,
            EntityOutcome::Unchanged => self.unchanged += 1,
            EntityOutcome::AutoResolved => self.auto_resolved += 1,
            EntityOutcome::NoConflict => self.no_conflict += 1,
        }
    }

    /// 产生记录变化的实体数
    pub fn changes(&self) -> usize {
        self.new + self.updated + self.reopened + self.auto_resolved
    }
}

/// 一次完整扫描的报告
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub pot: SweepCounters,
    pub slot: SweepCounters,
    /// 触发实体已不存在而清理的记录
    pub stale_resolved: usize,
    /// 分配状态被改写的申请次数
    pub requests_touched: usize,
    pub groups: usize,
    pub groups_created: usize,
    pub groups_removed: usize,
}

impl SweepReport {
    pub fn has_changes(&self) -> bool {
        self.pot.changes() > 0
            || self.slot.changes() > 0
            || self.stale_resolved > 0
            || self.requests_touched > 0
            || self.groups_created > 0
            || self.groups_removed > 0
    }
}

// ==========================================
// ConflictDetector - 冲突检测
// ==========================================
pub struct ConflictDetector {
    repos: AllocationRepositories,
    page_size: usize,
}

impl ConflictDetector {
    pub fn new(repos: AllocationRepositories) -> Self {
        Self::with_page_size(repos, DEFAULT_SWEEP_PAGE_SIZE)
    }

    pub fn with_page_size(repos: AllocationRepositories, page_size: usize) -> Self {
        Self {
            repos,
            page_size: page_size.max(1),
        }
    }

    /// 完整扫描
    #[instrument(skip(self), fields(page_size = self.page_size))]
    pub fn sweep(&self, actor: &str) -> EngineResult<SweepReport> {
        let mut report = SweepReport::default();
        let mut seen: HashSet<(ConflictType, String)> = HashSet::new();

        // ===== 容量池层 =====
        let pot_repo = self.repos.pot_repo.clone();
        self.for_each_page(
            |offset, limit| pot_repo.list_page(offset, limit),
            |pot| {
                seen.insert((ConflictType::Kapazitaetstopf, pot.pot_id.clone()));
                let outcome = self.check_entity(
                    ConflictLevel::Pot,
                    &pot.pot_id,
                    pot.max_kapazitaet(),
                    &pot.request_ids,
                    &mut report.requests_touched,
                )?;
                report.pot.record(outcome);
                Ok(())
            },
        )?;

        // ===== 槽位层 (含备选槽位), 上限恒为 1 =====
        let slot_repo = self.repos.slot_repo.clone();
        self.for_each_page(
            |offset, limit| slot_repo.list_page(offset, limit),
            |slot| {
                seen.insert((ConflictType::Slot, slot.slot_id.clone()));
                let outcome = self.check_entity(
                    ConflictLevel::Slot,
                    &slot.slot_id,
                    1,
                    &slot.request_ids,
                    &mut report.requests_touched,
                )?;
                report.slot.record(outcome);
                Ok(())
            },
        )?;

        // ===== 触发实体已消失的未解决记录 =====
        let unresolved = self.repos.conflict_repo.find_by_filter(&ConflictFilter {
            unresolved_only: true,
            ..Default::default()
        })?;
        for record in unresolved {
            if seen.contains(&(record.conflict_type, record.trigger_id.clone())) {
                continue;
            }
            let level = ConflictLevel::of(record.conflict_type);
            report.requests_touched += self.auto_resolve(level, &record)?;
            report.stale_resolved += 1;
        }

        self.regroup(&mut report)?;

        if report.has_changes() {
            record_action(
                &self.repos.action_log_repo,
                ActionType::ConflictSweep,
                actor,
                "conflict_sweep",
                serde_json::to_value(&report).unwrap_or_default(),
                None,
            )?;
        }
        tracing::info!(
            pot_new = report.pot.new,
            pot_updated = report.pot.updated + report.pot.reopened,
            pot_auto_resolved = report.pot.auto_resolved,
            slot_new = report.slot.new,
            slot_updated = report.slot.updated + report.slot.reopened,
            slot_auto_resolved = report.slot.auto_resolved,
            stale = report.stale_resolved,
            groups = report.groups,
            "冲突扫描完成"
        );
        Ok(report)
    }

    fn for_each_page<T, L, F>(&self, mut load: L, mut f: F) -> EngineResult<()>
    where
        L: FnMut(usize, usize) -> RepositoryResult<Vec<T>>,
        F: FnMut(&T) -> EngineResult<()>,
    {
        let mut offset = 0;
        loop {
            let items = load(offset, self.page_size)?;
            for item in &items {
                f(item)?;
            }
            if items.len() < self.page_size {
                return Ok(());
            }
            offset += items.len();
        }
    }

    /// 检测单个容量池/槽位
    fn check_entity(
        &self,
        level: ConflictLevel,
        trigger_id: &str,
        capacity: usize,
        member_request_ids: &[String],
        touched: &mut usize,
    ) -> EngineResult<EntityOutcome> {
        let requests = self.repos.request_repo.find_by_ids(member_request_ids)?;
        let mut active: Vec<String> = requests
            .iter()
            .filter(|r| level.claims(r, trigger_id))
            .map(|r| r.request_id.clone())
            .collect();
        active.sort();

        let existing = self
            .repos
            .conflict_repo
            .find_by_trigger(level.conflict_type(), trigger_id)?;
        let now = Utc::now().naive_utc();

        if active.len() <= capacity {
            let outcome = match existing {
                Some(record) if !record.is_resolved() => {
                    *touched += self.auto_resolve(level, &record)?;
                    EntityOutcome::AutoResolved
                }
                _ => EntityOutcome::NoConflict,
            };
            *touched += self.confirm_uncontested(level, trigger_id, &active)?;
            return Ok(outcome);
        }

        let outcome = match existing {
            None => {
                let record = ConflictRecord::new(
                    uuid::Uuid::new_v4().to_string(),
                    level.conflict_type(),
                    trigger_id,
                    capacity,
                    &active,
                    now,
                );
                self.repos.conflict_repo.insert(&record)?;
                *touched += self.enter_conflict(level, trigger_id, &record.conflict_id, &active, false)?;
                tracing::info!(
                    conflict_id = %record.conflict_id,
                    conflict_type = %record.conflict_type,
                    trigger_id = %trigger_id,
                    capacity,
                    claimants = active.len(),
                    "新冲突"
                );
                EntityOutcome::New
            }
            Some(mut record) if !record.is_resolved() => {
                if record.capacity == capacity && current_claimants(&record) == active {
                    return Ok(EntityOutcome::Unchanged);
                }
                // 竞价/排序阶段中成员变化: 从放弃阶段重新开始
                let restart = record.status != ConflictStatus::Open;
                if restart {
                    record.reopen(capacity, &active, now);
                } else {
                    record.update_membership(capacity, &active, now);
                }
                self.repos.conflict_repo.save(&record)?;
                *touched += self.enter_conflict(level, trigger_id, &record.conflict_id, &active, restart)?;
                tracing::info!(conflict_id = %record.conflict_id, restart, "冲突成员变化");
                EntityOutcome::Updated
            }
            Some(mut record) => {
                record.reopen(capacity, &active, now);
                self.repos.conflict_repo.save(&record)?;
                *touched += self.enter_conflict(level, trigger_id, &record.conflict_id, &active, true)?;
                tracing::info!(conflict_id = %record.conflict_id, "已解决冲突重新打开");
                EntityOutcome::Reopened
            }
        };
        Ok(outcome)
    }

    /// 进入冲突: 暂定/普通确认 → 等待, 写回指
    ///
    /// restart 时所有仍在竞争的分配 (含各类确认、竞价中) 都回到等待
    fn enter_conflict(
        &self,
        level: ConflictLevel,
        trigger_id: &str,
        conflict_id: &str,
        request_ids: &[String],
        restart: bool,
    ) -> EngineResult<usize> {
        let mut touched = 0;
        for request_id in request_ids {
            let changed = apply_to_request(&self.repos.request_repo, request_id, |r: &mut Request| {
                let mut changed = false;
                for a in r.assignments.iter_mut() {
                    if !level.in_scope(a, trigger_id) || !level.is_claiming(a) {
                        continue;
                    }
                    let status = level.status(a);
                    let eligible = restart
                        || matches!(
                            status,
                            AssignmentStatus::Initial | AssignmentStatus::Confirmed | AssignmentStatus::Waiting
                        );
                    if !eligible {
                        continue;
                    }
                    if status != AssignmentStatus::Waiting && status.can_transition_to(AssignmentStatus::Waiting) {
                        level.set_status(a, AssignmentStatus::Waiting);
                        changed = true;
                    }
                    // 容量池层不再确认: 无槽位冲突的槽位层结果一并撤回
                    if level == ConflictLevel::Pot
                        && a.slot_conflict_id.is_none()
                        && a.slot_status != AssignmentStatus::Initial
                    {
                        a.slot_status = AssignmentStatus::Initial;
                        changed = true;
                    }
                    if level.back_ref(a) != Some(conflict_id) {
                        level.set_back_ref(a, Some(conflict_id.to_string()));
                        changed = true;
                    }
                }
                Ok(changed)
            })?;
            touched += usize::from(changed);
        }
        Ok(touched)
    }

    /// 冲突消失: 删除记录, 未决分配确认, 清除回指
    fn auto_resolve(&self, level: ConflictLevel, record: &ConflictRecord) -> EngineResult<usize> {
        self.repos.conflict_repo.delete(&record.conflict_id)?;
        let mut touched = 0;
        for request_id in &record.involved_request_ids {
            let changed = apply_to_request(&self.repos.request_repo, request_id, |r: &mut Request| {
                let mut changed = false;
                for a in r.assignments.iter_mut() {
                    if level.back_ref(a) != Some(record.conflict_id.as_str()) {
                        continue;
                    }
                    if level.status(a).is_open() {
                        let next = match level {
                            ConflictLevel::Pot => AssignmentStatus::Confirmed,
                            ConflictLevel::Slot if a.pot_status.is_confirmed() => AssignmentStatus::Confirmed,
                            ConflictLevel::Slot => AssignmentStatus::Initial,
                        };
                        level.set_status(a, next);
                    }
                    level.set_back_ref(a, None);
                    changed = true;
                }
                Ok(changed)
            })?;
            touched += usize::from(changed);
        }
        tracing::info!(
            conflict_id = %record.conflict_id,
            trigger_id = %record.trigger_id,
            "冲突已自动解决"
        );
        Ok(touched)
    }

    /// 不在任何冲突中的暂定分配直接确认
    fn confirm_uncontested(
        &self,
        level: ConflictLevel,
        trigger_id: &str,
        request_ids: &[String],
    ) -> EngineResult<usize> {
        let mut touched = 0;
        for request_id in request_ids {
            let changed = apply_to_request(&self.repos.request_repo, request_id, |r: &mut Request| {
                let mut changed = false;
                for a in r.assignments.iter_mut() {
                    if level.in_scope(a, trigger_id)
                        && level.is_claiming(a)
                        && level.status(a) == AssignmentStatus::Initial
                        && level.back_ref(a).is_none()
                    {
                        level.set_status(a, AssignmentStatus::Confirmed);
                        changed = true;
                    }
                }
                Ok(changed)
            })?;
            touched += usize::from(changed);
        }
        Ok(touched)
    }

    /// 按指纹重算冲突组
    fn regroup(&self, report: &mut SweepReport) -> EngineResult<()> {
        let records = self.repos.conflict_repo.find_by_filter(&ConflictFilter::default())?;
        let mut buckets: BTreeMap<String, Vec<ConflictRecord>> = BTreeMap::new();
        for record in records {
            buckets.entry(record.fingerprint()).or_default().push(record);
        }

        let now = Utc::now().naive_utc();
        let mut live: HashSet<String> = HashSet::new();
        for (fingerprint, members) in &buckets {
            let mut conflict_ids: Vec<String> = members.iter().map(|r| r.conflict_id.clone()).collect();
            conflict_ids.sort();

            let group = match self.repos.group_repo.find_by_fingerprint(fingerprint)? {
                Some(mut group) => {
                    if group.conflict_ids != conflict_ids {
                        group.conflict_ids = conflict_ids;
                        group.updated_at = now;
                        self.repos.group_repo.save(&group)?;
                    }
                    group
                }
                None => {
                    let mut group = ConflictGroup::new(uuid::Uuid::new_v4().to_string(), &members[0], now);
                    group.conflict_ids = conflict_ids;
                    self.repos.group_repo.insert(&group)?;
                    report.groups_created += 1;
                    group
                }
            };

            for member in members {
                if member.group_id.as_deref() == Some(group.group_id.as_str()) {
                    continue;
                }
                let group_id = group.group_id.clone();
                self.repos.conflict_repo.modify(&member.conflict_id, |r| {
                    r.group_id = Some(group_id);
                    Ok(())
                })?;
            }
            live.insert(group.group_id);
        }

        for group in self.repos.group_repo.list_all()? {
            if !live.contains(&group.group_id) {
                self.repos.group_repo.delete(&group.group_id)?;
                report.groups_removed += 1;
            }
        }
        report.groups = live.len();
        Ok(())
    }
}

/// 记录中仍在竞争的申请 (未放弃、未被拒绝)
fn current_claimants(record: &ConflictRecord) -> Vec<String> {
    record
        .involved_request_ids
        .iter()
        .filter(|id| !record.waived_request_ids.contains(id) && !record.rejected.contains_key(*id))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::OverallStatus;
    use crate::engine::test_support::fixture;

    #[test]
    fn test_uncontested_requests_are_confirmed_on_both_levels() {
        let f = fixture();
        for m in [0, 10, 20, 30] {
            f.slot(m);
        }
        f.submit("R1", 0);
        f.submit("R2", 10);

        let report = f.detector.sweep("system").unwrap();
        assert_eq!(report.pot.new, 0);
        assert_eq!(report.slot.scanned, 4);
        assert_eq!(f.request("R1").status, OverallStatus::FinalConfirmed);
        assert_eq!(f.request("R2").status, OverallStatus::FinalConfirmed);
    }

    #[test]
    fn test_pot_conflict_and_idempotent_resweep() {
        let f = fixture();
        f.slot(0);
        f.slot(30);
        // 2 个槽位 → 上限 1
        f.submit("R1", 0);
        f.submit("R2", 0);
        f.submit("R3", 30);

        let first = f.detector.sweep("system").unwrap();
        assert_eq!(first.pot.new, 1);
        assert_eq!(first.groups, 1);
        for id in ["R1", "R2", "R3"] {
            let r = f.request(id);
            assert_eq!(r.status, OverallStatus::InPotConflict);
            assert!(r.assignments[0].pot_conflict_id.is_some());
        }

        let records_before = f.repos.conflict_repo.find_by_filter(&ConflictFilter::default()).unwrap();
        let second = f.detector.sweep("system").unwrap();
        assert!(!second.has_changes());
        assert_eq!(second.pot.unchanged, 1);
        let records_after = f.repos.conflict_repo.find_by_filter(&ConflictFilter::default()).unwrap();
        assert_eq!(records_before.len(), records_after.len());
        assert_eq!(records_before[0].fingerprint(), records_after[0].fingerprint());
        assert_eq!(records_before[0].group_id, records_after[0].group_id);
    }

    #[test]
    fn test_slot_conflict_and_auto_resolve_after_withdrawal() {
        let f = fixture();
        for m in [0, 10, 20, 30] {
            f.slot(m);
        }
        // 上限 2, 两个申请同一槽位
        f.submit("R1", 0);
        f.submit("R2", 0);

        let report = f.detector.sweep("system").unwrap();
        assert_eq!(report.pot.new, 0);
        assert_eq!(report.slot.new, 1);
        assert_eq!(f.request("R1").status, OverallStatus::InSlotConflict);

        f.requests.withdraw("R2", "op").unwrap();
        let report = f.detector.sweep("system").unwrap();
        assert_eq!(report.slot.auto_resolved, 1);
        assert_eq!(report.groups_removed, 1);

        let r1 = f.request("R1");
        assert_eq!(r1.status, OverallStatus::FinalConfirmed);
        assert!(r1.assignments[0].slot_conflict_id.is_none());
        assert!(f
            .repos
            .conflict_repo
            .find_by_filter(&ConflictFilter::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_reopened_pot_conflict_withdraws_slot_confirmation() {
        let f = fixture();
        f.slot(0);
        f.slot(30);
        f.submit("R1", 0);
        f.submit("R2", 30);
        f.set_fee("R1", 1000);
        f.set_fee("R2", 900);
        f.detector.sweep("system").unwrap();

        let cid = f.request("R1").assignments[0].pot_conflict_id.clone().unwrap();
        f.resolver.resolve_waiver(&cid, &[], "op").unwrap();
        f.resolver.resolve_fee(&cid, "op").unwrap();
        f.detector.sweep("system").unwrap();
        let r1 = f.request("R1");
        assert_eq!(r1.assignments[0].pot_status, AssignmentStatus::ConfirmedFee);
        assert_eq!(r1.assignments[0].slot_status, AssignmentStatus::Confirmed);
        assert_eq!(r1.status, OverallStatus::FinalConfirmed);

        // 新申请加入 → 已解决记录重开, 槽位层确认一并撤回
        f.submit("R3", 0);
        f.set_fee("R3", 2000);
        let report = f.detector.sweep("system").unwrap();
        assert_eq!(report.pot.reopened, 1);
        let r1 = f.request("R1");
        assert_eq!(r1.assignments[0].pot_status, AssignmentStatus::Waiting);
        assert_eq!(r1.assignments[0].slot_status, AssignmentStatus::Initial);

        f.resolver.resolve_waiver(&cid, &[], "op").unwrap();
        f.resolver.resolve_fee(&cid, "op").unwrap();
        let r1 = f.request("R1");
        assert_eq!(r1.assignments[0].pot_status, AssignmentStatus::RejectedFee);
        assert_eq!(r1.assignments[0].slot_status, AssignmentStatus::Initial);
        assert_eq!(r1.status, OverallStatus::FinalRejected);
        assert_eq!(f.request("R3").assignments[0].pot_status, AssignmentStatus::ConfirmedFee);
    }
}
