// ==========================================
// 铁路容量分配系统 - 引擎层
// ==========================================
// 职责: 实现分配规则 (容量池归属/申请匹配/冲突检测与解决), 不拼 SQL
// 红线: Engine 不拼 SQL, 所有数据访问经由 Repository
// 红线: 申请总体状态只由 status_derivation 派生
// ==========================================

pub mod audit;
pub mod calendar;
pub mod conflict_detector;
pub(crate) mod conflict_level;
pub mod conflict_resolver;
pub mod error;
pub mod fee;
pub mod group_reset;
pub mod pot_assignment;
pub mod repositories;
pub mod request_matcher;
pub mod request_service;
pub mod slot_catalog;
pub mod status_derivation;

#[cfg(test)]
pub(crate) mod test_support;

// 重导出核心引擎
pub use conflict_detector::{ConflictDetector, EntityOutcome, SweepCounters, SweepReport};
pub use conflict_resolver::ConflictResolver;
pub use error::{EngineError, EngineResult};
pub use fee::FeeCalculator;
pub use group_reset::{GroupResetService, GroupResetSummary};
pub use pot_assignment::PotAssignmentService;
pub use repositories::AllocationRepositories;
pub use request_matcher::{MatchOutcome, RequestMatcher};
pub use request_service::{RequestDraft, RequestService};
pub use slot_catalog::{SlotCatalog, SlotDefinition, SlotPatch};
pub use status_derivation::{derive_overall_status, refresh_status};
