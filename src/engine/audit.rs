// ==========================================
// 铁路容量分配系统 - 审计写入
// ==========================================

use crate::domain::action_log::{ActionLog, ActionType};
use crate::engine::error::EngineResult;
use crate::repository::ActionLogRepository;
use chrono::Utc;
use serde_json::Value as JsonValue;

/// 写入一条操作日志
pub fn record_action(
    repo: &ActionLogRepository,
    action_type: ActionType,
    actor: &str,
    target_id: &str,
    payload: JsonValue,
    detail: Option<String>,
) -> EngineResult<()> {
    let log = ActionLog::new(
        action_type,
        actor,
        Some(target_id),
        Some(payload),
        detail,
        Utc::now().naive_utc(),
    );
    repo.insert(&log)?;
    Ok(())
}
