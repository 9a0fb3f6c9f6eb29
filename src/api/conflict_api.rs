// ==========================================
// 铁路容量分配系统 - 冲突 API
// ==========================================
// 职责: 冲突扫描、冲突记录/冲突组查询、三阶段解决、冲突组重置
// ==========================================

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::api::error::{require_non_empty, ApiError, ApiResult};
use crate::api::slot_api::page_of;
use crate::domain::conflict::{ConflictGroup, ConflictRecord};
use crate::domain::types::{ConflictStatus, ConflictType};
use crate::engine::{
    AllocationRepositories, ConflictDetector, ConflictResolver, GroupResetService, GroupResetSummary,
    SweepReport,
};
use crate::repository::conflict_repo::ConflictFilter;
use crate::repository::page::Page;

// ==========================================
// DTO
// ==========================================

/// 放弃阶段: 主动放弃的申请
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WaiverRequest {
    #[serde(default)]
    pub withdrawn_request_ids: Vec<String>,
}

/// 最高价阶段: 申请ID → 出价 (null 表示未出价)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuctionRequest {
    #[serde(default)]
    pub bids: BTreeMap<String, Option<i64>>,
}

/// 冲突记录查询条件 + 分页
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictQuery {
    pub conflict_type: Option<ConflictType>,
    pub status: Option<ConflictStatus>,
    pub group_id: Option<String>,
    pub unresolved_only: bool,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

/// 冲突组及其成员记录
#[derive(Debug, Clone, Serialize)]
pub struct ConflictGroupView {
    pub group: ConflictGroup,
    pub records: Vec<ConflictRecord>,
}

// ==========================================
// ConflictApi - 冲突 API
// ==========================================
pub struct ConflictApi {
    repos: AllocationRepositories,
    detector: ConflictDetector,
    resolver: ConflictResolver,
    reset: GroupResetService,
}

impl ConflictApi {
    pub fn new(repos: AllocationRepositories) -> Self {
        Self::with_sweep_page_size(repos, crate::config::defaults::SWEEP_PAGE_SIZE)
    }

    /// 指定扫描分页大小 (来自配置 sweep_page_size)
    pub fn with_sweep_page_size(repos: AllocationRepositories, page_size: usize) -> Self {
        Self {
            detector: ConflictDetector::with_page_size(repos.clone(), page_size),
            resolver: ConflictResolver::new(repos.clone()),
            reset: GroupResetService::new(repos.clone()),
            repos,
        }
    }

    // ==========================================
    // 扫描
    // ==========================================

    pub fn sweep(&self, actor: &str) -> ApiResult<SweepReport> {
        require_non_empty("操作人", actor)?;
        Ok(self.detector.sweep(actor)?)
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn get_conflict(&self, conflict_id: &str) -> ApiResult<ConflictRecord> {
        require_non_empty("冲突ID", conflict_id)?;
        self.repos
            .conflict_repo
            .find_by_id(conflict_id)?
            .ok_or_else(|| ApiError::NotFound(format!("ConflictRecord(id={})不存在", conflict_id)))
    }

    pub fn list_conflicts(&self, query: ConflictQuery) -> ApiResult<Page<ConflictRecord>> {
        let page = page_of(query.offset, query.limit);
        let filter = ConflictFilter {
            conflict_type: query.conflict_type,
            status: query.status,
            group_id: query.group_id,
            unresolved_only: query.unresolved_only,
        };
        Ok(self.repos.conflict_repo.query(&filter, page)?)
    }

    pub fn get_group(&self, group_id: &str) -> ApiResult<ConflictGroupView> {
        require_non_empty("冲突组ID", group_id)?;
        let group = self
            .repos
            .group_repo
            .find_by_id(group_id)?
            .ok_or_else(|| ApiError::NotFound(format!("ConflictGroup(id={})不存在", group_id)))?;
        let records = self.repos.conflict_repo.find_by_ids(&group.conflict_ids)?;
        Ok(ConflictGroupView { group, records })
    }

    pub fn list_groups(&self) -> ApiResult<Vec<ConflictGroup>> {
        Ok(self.repos.group_repo.list_all()?)
    }

    // ==========================================
    // 解决: 单条记录
    // ==========================================

    pub fn resolve_waiver(&self, conflict_id: &str, req: WaiverRequest, actor: &str) -> ApiResult<ConflictRecord> {
        require_non_empty("冲突ID", conflict_id)?;
        require_non_empty("操作人", actor)?;
        Ok(self
            .resolver
            .resolve_waiver(conflict_id, &req.withdrawn_request_ids, actor)?)
    }

    pub fn resolve_fee(&self, conflict_id: &str, actor: &str) -> ApiResult<ConflictRecord> {
        require_non_empty("冲突ID", conflict_id)?;
        require_non_empty("操作人", actor)?;
        Ok(self.resolver.resolve_fee(conflict_id, actor)?)
    }

    pub fn resolve_auction(&self, conflict_id: &str, req: AuctionRequest, actor: &str) -> ApiResult<ConflictRecord> {
        require_non_empty("冲突ID", conflict_id)?;
        require_non_empty("操作人", actor)?;
        Ok(self.resolver.resolve_auction(conflict_id, &req.bids, actor)?)
    }

    // ==========================================
    // 解决: 冲突组
    // ==========================================

    pub fn resolve_group_waiver(
        &self,
        group_id: &str,
        req: WaiverRequest,
        actor: &str,
    ) -> ApiResult<Vec<ConflictRecord>> {
        require_non_empty("冲突组ID", group_id)?;
        require_non_empty("操作人", actor)?;
        Ok(self
            .resolver
            .resolve_group_waiver(group_id, &req.withdrawn_request_ids, actor)?)
    }

    pub fn resolve_group_fee(&self, group_id: &str, actor: &str) -> ApiResult<Vec<ConflictRecord>> {
        require_non_empty("冲突组ID", group_id)?;
        require_non_empty("操作人", actor)?;
        Ok(self.resolver.resolve_group_fee(group_id, actor)?)
    }

    pub fn resolve_group_auction(
        &self,
        group_id: &str,
        req: AuctionRequest,
        actor: &str,
    ) -> ApiResult<Vec<ConflictRecord>> {
        require_non_empty("冲突组ID", group_id)?;
        require_non_empty("操作人", actor)?;
        Ok(self.resolver.resolve_group_auction(group_id, &req.bids, actor)?)
    }

    /// 重置冲突组: 撤销全部决定并删除记录, 下次扫描重建
    pub fn reset_group(&self, group_id: &str, actor: &str) -> ApiResult<GroupResetSummary> {
        require_non_empty("冲突组ID", group_id)?;
        require_non_empty("操作人", actor)?;
        Ok(self.reset.reset_group(group_id, actor)?)
    }
}
