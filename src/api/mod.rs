// ==========================================
// 铁路容量分配系统 - API 层
// ==========================================
// 职责: 对外业务接口, 入参为 serde 属性包, 错误统一为 ApiError
// ==========================================

pub mod conflict_api;
pub mod error;
pub mod request_api;
pub mod slot_api;

// 重导出核心类型
pub use conflict_api::{AuctionRequest, ConflictApi, ConflictGroupView, ConflictQuery, WaiverRequest};
pub use error::{ApiError, ApiResult};
pub use request_api::{InvalidateRequest, RequestApi, RequestQuery};
pub use slot_api::{CreateAlternativeRequest, PotQuery, PotView, SlotApi, SlotQuery};

use crate::engine::AllocationRepositories;
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

/// 共享同一连接的全部 API
pub struct AllocationApi {
    pub slots: SlotApi,
    pub requests: RequestApi,
    pub conflicts: ConflictApi,
}

impl AllocationApi {
    pub fn from_connection(conn: Arc<Mutex<Connection>>, sweep_page_size: usize) -> Self {
        let repos = AllocationRepositories::from_connection(conn);
        Self {
            slots: SlotApi::new(repos.clone()),
            requests: RequestApi::new(repos.clone()),
            conflicts: ConflictApi::with_sweep_page_size(repos, sweep_page_size),
        }
    }
}
