// ==========================================
// 铁路容量分配系统 - 申请 API
// ==========================================
// 职责: 申请提交/撤回/作废, 申请与操作历史查询
// ==========================================

use serde::{Deserialize, Serialize};

use crate::api::error::{require_non_empty, ApiResult};
use crate::api::slot_api::page_of;
use crate::domain::action_log::ActionLog;
use crate::domain::request::Request;
use crate::domain::types::{OverallStatus, TrafficDayGroup};
use crate::engine::{AllocationRepositories, RequestDraft, RequestService};
use crate::repository::page::Page;
use crate::repository::request_repo::RequestFilter;

/// 作废申请
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvalidateRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// 申请查询条件 + 分页
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestQuery {
    pub operator: Option<String>,
    pub status: Option<OverallStatus>,
    pub traffic_day_group: Option<TrafficDayGroup>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

// ==========================================
// RequestApi - 申请 API
// ==========================================
pub struct RequestApi {
    repos: AllocationRepositories,
    service: RequestService,
}

impl RequestApi {
    pub fn new(repos: AllocationRepositories) -> Self {
        Self {
            service: RequestService::new(repos.clone()),
            repos,
        }
    }

    /// 提交申请: 匹配全部槽位后一次性持久化; 任一区段无法匹配则整体失败
    pub fn submit(&self, draft: RequestDraft, actor: &str) -> ApiResult<Request> {
        require_non_empty("操作人", actor)?;
        let request = self.service.submit(draft, actor)?;
        tracing::debug!(
            request_id = %request.request_id,
            assignments = request.assignments.len(),
            "申请已通过 API 提交"
        );
        Ok(request)
    }

    pub fn withdraw(&self, request_id: &str, actor: &str) -> ApiResult<Request> {
        require_non_empty("申请ID", request_id)?;
        require_non_empty("操作人", actor)?;
        Ok(self.service.withdraw(request_id, actor)?)
    }

    pub fn invalidate(&self, request_id: &str, req: InvalidateRequest, actor: &str) -> ApiResult<Request> {
        require_non_empty("申请ID", request_id)?;
        require_non_empty("操作人", actor)?;
        Ok(self.service.invalidate(request_id, req.reason, actor)?)
    }

    pub fn get_request(&self, request_id: &str) -> ApiResult<Request> {
        require_non_empty("申请ID", request_id)?;
        Ok(self.service.get_request(request_id)?)
    }

    pub fn list_requests(&self, query: RequestQuery) -> ApiResult<Page<Request>> {
        let page = page_of(query.offset, query.limit);
        let filter = RequestFilter {
            operator: query.operator,
            status: query.status,
            traffic_day_group: query.traffic_day_group,
        };
        Ok(self.service.list_requests(&filter, page)?)
    }

    /// 申请的操作历史
    pub fn get_history(&self, request_id: &str) -> ApiResult<Vec<ActionLog>> {
        require_non_empty("申请ID", request_id)?;
        Ok(self.repos.action_log_repo.find_by_target(request_id)?)
    }
}
