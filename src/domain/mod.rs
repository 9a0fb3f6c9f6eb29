// ==========================================
// 铁路容量分配系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、派生规则
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod action_log;
pub mod capacity;
pub mod conflict;
pub mod request;
pub mod slot;
pub mod types;

// 重导出核心类型
pub use action_log::{ActionLog, ActionType};
pub use capacity::{derive_max_capacity, sanitize_section, CapacityPot, PotKey};
pub use conflict::{compute_fingerprint, ConflictGroup, ConflictRecord};
pub use request::{DesiredLeg, Request, SlotAssignment};
pub use slot::{build_slot_id, SlotKind, SlotPattern};
pub use types::{
    AssignmentStatus, ConflictStatus, ConflictType, LegKind, OverallStatus, TimeWindow,
    TrafficDayGroup, TIME_WINDOWS, TRAFFIC_TYPE_ALL,
};
