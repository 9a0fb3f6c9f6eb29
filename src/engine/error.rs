// ==========================================
// 铁路容量分配系统 - 引擎层错误类型
// ==========================================
// 工具: thiserror 派生宏
// ==========================================

use crate::repository::error::RepositoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("数据验证失败: {0}")]
    Validation(String),

    #[error("记录未找到: {entity} with id={id}")]
    NotFound { entity: String, id: String },

    #[error("状态冲突: {0}")]
    StateConflict(String),

    #[error("无效的状态转换: from={from} to={to}")]
    InvalidTransition { from: String, to: String },

    /// 申请中某个必需的 (区段, 周, 交通日分组) 无匹配槽位
    #[error("assignment failed: {0}")]
    AssignmentFailed(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl EngineError {
    pub fn not_found(entity: &str, id: &str) -> Self {
        EngineError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
