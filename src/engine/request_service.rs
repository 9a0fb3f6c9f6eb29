// ==========================================
// 铁路容量分配系统 - 申请服务
// ==========================================
// 职责: 申请提交 (匹配 → 计费 → 落库 → 登记成员), 撤回, 失效, 查询
// 红线: 匹配失败时不写入任何数据
// 红线: 撤回/失效为外部状态, 派生不可覆盖
// ==========================================

use crate::domain::action_log::ActionType;
use crate::domain::request::{DesiredLeg, Request};
use crate::domain::types::{OverallStatus, TrafficDayGroup};
use crate::engine::audit::record_action;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::fee::FeeCalculator;
use crate::engine::pot_assignment::PotAssignmentService;
use crate::engine::repositories::AllocationRepositories;
use crate::engine::request_matcher::RequestMatcher;
use crate::engine::status_derivation::refresh_status;
use crate::repository::page::{Page, PageRequest};
use crate::repository::request_repo::RequestFilter;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;

/// 申请提交内容
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestDraft {
    /// 为空时生成 UUID
    #[serde(default)]
    pub request_id: Option<String>,
    pub operator: String,
    pub traffic_type: String,
    pub traffic_day_group: TrafficDayGroup,
    pub valid_from: NaiveDate,
    pub valid_to: NaiveDate,
    pub legs: Vec<DesiredLeg>,
}

impl RequestDraft {
    fn validate(&self) -> EngineResult<()> {
        if self.operator.trim().is_empty() {
            return Err(EngineError::Validation("运营商不能为空".to_string()));
        }
        if self.traffic_type.trim().is_empty() {
            return Err(EngineError::Validation("交通类型不能为空".to_string()));
        }
        if self.legs.is_empty() {
            return Err(EngineError::Validation("申请至少包含一个区段".to_string()));
        }
        if self.valid_to < self.valid_from {
            return Err(EngineError::Validation(format!(
                "有效期结束 {} 早于开始 {}",
                self.valid_to, self.valid_from
            )));
        }
        for (i, leg) in self.legs.iter().enumerate() {
            if leg.from.trim().is_empty() || leg.to.trim().is_empty() {
                return Err(EngineError::Validation(format!("区段 {} 起点/终点为空", i)));
            }
        }
        Ok(())
    }
}

// ==========================================
// RequestService - 申请服务
// ==========================================
pub struct RequestService {
    repos: AllocationRepositories,
    matcher: RequestMatcher,
    pots: PotAssignmentService,
}

impl RequestService {
    pub fn new(repos: AllocationRepositories) -> Self {
        let matcher = RequestMatcher::new(repos.slot_repo.clone());
        let pots = PotAssignmentService::new(repos.pot_repo.clone());
        Self { repos, matcher, pots }
    }

    /// 提交申请
    #[instrument(skip(self, draft), fields(operator = %draft.operator))]
    pub fn submit(&self, draft: RequestDraft, actor: &str) -> EngineResult<Request> {
        draft.validate()?;

        let request_id = draft
            .request_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if self.repos.request_repo.find_by_id(&request_id)?.is_some() {
            return Err(EngineError::StateConflict(format!("申请 {} 已存在", request_id)));
        }

        let now = Utc::now().naive_utc();
        let mut request = Request {
            request_id,
            operator: draft.operator.trim().to_string(),
            traffic_type: draft.traffic_type.trim().to_string(),
            traffic_day_group: draft.traffic_day_group,
            valid_from: draft.valid_from,
            valid_to: draft.valid_to,
            legs: draft.legs,
            total_fee: 0,
            assignments: Vec::new(),
            status: OverallStatus::InConflictCheck,
            created_at: now,
            updated_at: now,
        };

        let outcome = self.matcher.match_request(&request)?;
        request.total_fee = FeeCalculator::calculate(
            request.valid_from,
            request.valid_to,
            request.traffic_day_group,
            &outcome.leg_base_fees,
        )?;
        request.assignments = outcome.assignments;
        refresh_status(&mut request);

        self.repos.request_repo.insert(&request)?;
        for slot_id in request.distinct_slot_ids() {
            let request_id = request.request_id.clone();
            self.repos.slot_repo.modify(&slot_id, |slot| {
                slot.add_request(&request_id);
                Ok(())
            })?;
        }
        for pot_id in request.distinct_pot_ids() {
            self.pots.add_request(&pot_id, &request.request_id)?;
        }

        record_action(
            &self.repos.action_log_repo,
            ActionType::RequestSubmit,
            actor,
            &request.request_id,
            json!({
                "total_fee": request.total_fee,
                "slot_ids": request.distinct_slot_ids(),
            }),
            None,
        )?;
        tracing::info!(
            request_id = %request.request_id,
            assignments = request.assignments.len(),
            total_fee = request.total_fee,
            "申请已提交"
        );
        Ok(request)
    }

    /// 撤回: 从槽位与容量池成员中移除, 状态置为撤回
    #[instrument(skip(self))]
    pub fn withdraw(&self, request_id: &str, actor: &str) -> EngineResult<Request> {
        let request = self.get_request(request_id)?;
        if request.status.is_external() {
            return Err(EngineError::StateConflict(format!(
                "申请 {} 当前状态 {} 不可撤回",
                request_id, request.status
            )));
        }

        for slot_id in request.distinct_slot_ids() {
            if self.repos.slot_repo.find_by_id(&slot_id)?.is_none() {
                continue;
            }
            self.repos.slot_repo.modify(&slot_id, |slot| {
                slot.remove_request(request_id);
                Ok(())
            })?;
        }
        for pot_id in request.distinct_pot_ids() {
            if self.repos.pot_repo.find_by_id(&pot_id)?.is_none() {
                continue;
            }
            self.pots.remove_request(&pot_id, request_id)?;
        }

        let updated = self.repos.request_repo.modify(request_id, |r| {
            r.status = OverallStatus::Withdrawn;
            Ok(r.clone())
        })?;

        record_action(
            &self.repos.action_log_repo,
            ActionType::RequestWithdraw,
            actor,
            request_id,
            json!({ "previous_status": request.status.to_db_str() }),
            None,
        )?;
        tracing::info!(request_id = %request_id, "申请已撤回");
        Ok(updated)
    }

    /// 失效: 只改状态, 成员关系保留
    #[instrument(skip(self))]
    pub fn invalidate(&self, request_id: &str, reason: Option<String>, actor: &str) -> EngineResult<Request> {
        let request = self.get_request(request_id)?;
        if request.status.is_external() {
            return Err(EngineError::StateConflict(format!(
                "申请 {} 当前状态 {} 不可置为失效",
                request_id, request.status
            )));
        }

        let updated = self.repos.request_repo.modify(request_id, |r| {
            r.status = OverallStatus::Invalidated;
            Ok(r.clone())
        })?;

        record_action(
            &self.repos.action_log_repo,
            ActionType::RequestInvalidate,
            actor,
            request_id,
            json!({ "previous_status": request.status.to_db_str() }),
            reason,
        )?;
        tracing::info!(request_id = %request_id, "申请已失效");
        Ok(updated)
    }

    pub fn get_request(&self, request_id: &str) -> EngineResult<Request> {
        self.repos
            .request_repo
            .find_by_id(request_id)?
            .ok_or_else(|| EngineError::not_found("Request", request_id))
    }

    pub fn list_requests(&self, filter: &RequestFilter, page: PageRequest) -> EngineResult<Page<Request>> {
        Ok(self.repos.request_repo.query(filter, page)?)
    }
}
