// ==========================================
// 铁路容量分配系统 - 操作日志数据仓储
// ==========================================
// 红线: 冲突解决的每个决定都必须记录
// ==========================================

mod core;
mod queries;

#[cfg(test)]
mod tests;

pub use core::ActionLogRepository;
