// ==========================================
// 铁路容量分配系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// 约束: 所有仓储共享同一个 Arc<Mutex<Connection>>, modify 闭包内不可调用其他仓储
// ==========================================

pub mod action_log_repo;
pub mod codec;
pub mod conflict_group_repo;
pub mod conflict_repo;
pub mod error;
pub mod page;
pub mod pot_repo;
pub mod request_repo;
pub mod slot_repo;

// 重导出核心仓储
pub use action_log_repo::ActionLogRepository;
pub use conflict_group_repo::ConflictGroupRepository;
pub use conflict_repo::{ConflictFilter, ConflictRecordRepository};
pub use error::{RepositoryError, RepositoryResult};
pub use page::{Page, PageRequest};
pub use pot_repo::{CapacityPotRepository, PotFilter};
pub use request_repo::{RequestFilter, RequestRepository};
pub use slot_repo::{SlotFilter, SlotPatternRepository};
