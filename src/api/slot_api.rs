// ==========================================
// 铁路容量分配系统 - 槽位与容量池 API
// ==========================================
// 职责: 槽位目录维护、槽位/容量池查询
// 入参: serde 属性包 (DTO), 出参: 领域实体或 ApiError
// ==========================================

use serde::{Deserialize, Serialize};

use crate::api::error::{require_non_empty, ApiError, ApiResult};
use crate::domain::capacity::CapacityPot;
use crate::domain::slot::{SlotKind, SlotPattern};
use crate::domain::types::{TimeWindow, TrafficDayGroup};
use crate::engine::{AllocationRepositories, SlotCatalog, SlotDefinition, SlotPatch};
use crate::repository::page::{Page, PageRequest};
use crate::repository::pot_repo::PotFilter;
use crate::repository::slot_repo::SlotFilter;

// ==========================================
// DTO
// ==========================================

/// 新建备选槽位
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAlternativeRequest {
    pub parent_slot_id: String,
    pub kind: SlotKind,
    /// 缺省沿用父槽位基础费用
    #[serde(default)]
    pub base_fee: Option<i64>,
}

/// 槽位查询条件 + 分页
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotQuery {
    pub from: Option<String>,
    pub to: Option<String>,
    pub section: Option<String>,
    pub week: Option<u32>,
    pub traffic_day_group: Option<TrafficDayGroup>,
    pub traffic_type: Option<String>,
    pub time_window: Option<TimeWindow>,
    pub pot_id: Option<String>,
    pub parents_only: bool,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl SlotQuery {
    fn split(self) -> (SlotFilter, PageRequest) {
        let page = page_of(self.offset, self.limit);
        let filter = SlotFilter {
            from: self.from,
            to: self.to,
            section: self.section,
            week: self.week,
            traffic_day_group: self.traffic_day_group,
            traffic_type: self.traffic_type,
            time_window: self.time_window,
            pot_id: self.pot_id,
            parents_only: self.parents_only,
        };
        (filter, page)
    }
}

/// 容量池查询条件 + 分页
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PotQuery {
    pub section: Option<String>,
    pub traffic_type: Option<String>,
    pub week: Option<u32>,
    pub traffic_day_group: Option<TrafficDayGroup>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

/// 容量池视图 (附带派生的最大容量)
#[derive(Debug, Clone, Serialize)]
pub struct PotView {
    #[serde(flatten)]
    pub pot: CapacityPot,
    pub max_kapazitaet: usize,
}

impl From<CapacityPot> for PotView {
    fn from(pot: CapacityPot) -> Self {
        let max_kapazitaet = pot.max_kapazitaet();
        Self { pot, max_kapazitaet }
    }
}

pub(crate) fn page_of(offset: Option<usize>, limit: Option<usize>) -> PageRequest {
    let default = PageRequest::default();
    PageRequest::new(offset.unwrap_or(default.offset), limit.unwrap_or(default.limit))
}

// ==========================================
// SlotApi - 槽位与容量池 API
// ==========================================
pub struct SlotApi {
    repos: AllocationRepositories,
    catalog: SlotCatalog,
}

impl SlotApi {
    pub fn new(repos: AllocationRepositories) -> Self {
        Self {
            catalog: SlotCatalog::new(repos.clone()),
            repos,
        }
    }

    /// 新建父槽位 (日间或夜间), 同时归入容量池
    pub fn create_slot(&self, definition: SlotDefinition, actor: &str) -> ApiResult<SlotPattern> {
        require_non_empty("操作人", actor)?;
        require_non_empty("起点", &definition.from)?;
        require_non_empty("终点", &definition.to)?;
        require_non_empty("区段", &definition.section)?;
        Ok(self.catalog.create_slot(definition, actor)?)
    }

    /// 新建备选槽位
    pub fn create_alternative(&self, req: CreateAlternativeRequest, actor: &str) -> ApiResult<SlotPattern> {
        require_non_empty("操作人", actor)?;
        require_non_empty("父槽位ID", &req.parent_slot_id)?;
        Ok(self
            .catalog
            .create_alternative(&req.parent_slot_id, req.kind, req.base_fee, actor)?)
    }

    /// 修改槽位 (仅在无申请匹配时允许)
    pub fn update_slot(&self, slot_id: &str, patch: SlotPatch, actor: &str) -> ApiResult<SlotPattern> {
        require_non_empty("槽位ID", slot_id)?;
        require_non_empty("操作人", actor)?;
        if patch.kind.is_none() && patch.section.is_none() && patch.base_fee.is_none() {
            return Err(ApiError::ValidationError("修改内容为空".to_string()));
        }
        Ok(self.catalog.update_slot(slot_id, patch, actor)?)
    }

    pub fn delete_slot(&self, slot_id: &str, actor: &str) -> ApiResult<()> {
        require_non_empty("槽位ID", slot_id)?;
        require_non_empty("操作人", actor)?;
        Ok(self.catalog.delete_slot(slot_id, actor)?)
    }

    pub fn get_slot(&self, slot_id: &str) -> ApiResult<SlotPattern> {
        require_non_empty("槽位ID", slot_id)?;
        Ok(self.catalog.get_slot(slot_id)?)
    }

    pub fn list_slots(&self, query: SlotQuery) -> ApiResult<Page<SlotPattern>> {
        let (filter, page) = query.split();
        Ok(self.catalog.list_slots(&filter, page)?)
    }

    // ==========================================
    // 容量池 (只读)
    // ==========================================

    pub fn get_pot(&self, pot_id: &str) -> ApiResult<PotView> {
        require_non_empty("容量池ID", pot_id)?;
        self.repos
            .pot_repo
            .find_by_id(pot_id)?
            .map(PotView::from)
            .ok_or_else(|| ApiError::NotFound(format!("CapacityPot(id={})不存在", pot_id)))
    }

    pub fn list_pots(&self, query: PotQuery) -> ApiResult<Page<PotView>> {
        let page = page_of(query.offset, query.limit);
        let filter = PotFilter {
            section: query.section,
            traffic_type: query.traffic_type,
            week: query.week,
            traffic_day_group: query.traffic_day_group,
        };
        let result = self.repos.pot_repo.query(&filter, page)?;
        Ok(Page {
            items: result.items.into_iter().map(PotView::from).collect(),
            total: result.total,
            offset: result.offset,
            limit: result.limit,
        })
    }
}
