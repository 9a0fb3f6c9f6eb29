// ==========================================
// 铁路容量分配系统 - 核心库
// ==========================================
// 技术栈: Rust + SQLite
// 系统定位: 线路槽位容量池分配与冲突解决
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 分配规则
pub mod engine;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    AssignmentStatus, ConflictStatus, ConflictType, LegKind, OverallStatus, TimeWindow,
    TrafficDayGroup,
};

// 领域实体
pub use domain::{
    ActionLog, ActionType, CapacityPot, ConflictGroup, ConflictRecord, DesiredLeg, Request,
    SlotAssignment, SlotKind, SlotPattern,
};

// 引擎
pub use engine::{
    AllocationRepositories, ConflictDetector, ConflictResolver, GroupResetService, RequestMatcher,
    RequestService, SlotCatalog, SweepReport,
};

// API
pub use api::{AllocationApi, ApiError, ApiResult, ConflictApi, RequestApi, SlotApi};

// 配置
pub use config::ConfigManager;

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "铁路容量分配系统";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
