// ==========================================
// 铁路容量分配系统 - 引擎层仓储聚合
// ==========================================
// 职责: 聚合分配引擎所需的所有 Repository
// 约束: 所有仓储共享同一个连接
// ==========================================

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::repository::{
    ActionLogRepository, CapacityPotRepository, ConflictGroupRepository, ConflictRecordRepository,
    RequestRepository, SlotPatternRepository,
};

/// 分配引擎仓储集合
#[derive(Clone)]
pub struct AllocationRepositories {
    /// 容量池仓储
    pub pot_repo: Arc<CapacityPotRepository>,
    /// 槽位模板仓储
    pub slot_repo: Arc<SlotPatternRepository>,
    /// 申请仓储
    pub request_repo: Arc<RequestRepository>,
    /// 冲突记录仓储
    pub conflict_repo: Arc<ConflictRecordRepository>,
    /// 冲突组仓储
    pub group_repo: Arc<ConflictGroupRepository>,
    /// 操作日志仓储
    pub action_log_repo: Arc<ActionLogRepository>,
}

impl AllocationRepositories {
    /// 基于共享连接创建全部仓储
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            pot_repo: Arc::new(CapacityPotRepository::new(conn.clone())),
            slot_repo: Arc::new(SlotPatternRepository::new(conn.clone())),
            request_repo: Arc::new(RequestRepository::new(conn.clone())),
            conflict_repo: Arc::new(ConflictRecordRepository::new(conn.clone())),
            group_repo: Arc::new(ConflictGroupRepository::new(conn.clone())),
            action_log_repo: Arc::new(ActionLogRepository::new(conn)),
        }
    }
}
