use crate::domain::action_log::ActionLog;
use crate::repository::codec::format_ts;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

// ==========================================
// ActionLogRepository - 操作日志仓储
// ==========================================
// 红线: Repository 不做业务逻辑,只做数据映射
pub struct ActionLogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ActionLogRepository {
    /// 创建新的操作日志仓储
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    pub(super) fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 写入操作
    // ==========================================

    /// 插入操作日志
    ///
    /// # 返回
    /// - `Ok(action_id)`: 成功插入,返回action_id
    pub fn insert(&self, log: &ActionLog) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        insert_row(&conn, log)?;
        Ok(log.action_id.clone())
    }

    /// 批量插入操作日志 (单事务)
    pub fn batch_insert(&self, logs: Vec<ActionLog>) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let mut count = 0;
        for log in &logs {
            insert_row(&tx, log)?;
            count += 1;
        }

        tx.commit()?;
        Ok(count)
    }
}

fn insert_row(conn: &Connection, log: &ActionLog) -> rusqlite::Result<()> {
    conn.execute(
        r#"
        INSERT INTO action_log (
            action_id, action_type, action_ts, actor, target_id, payload_json, detail
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            log.action_id,
            log.action_type,
            format_ts(&log.action_ts),
            log.actor,
            log.target_id,
            log.payload_json.as_ref().map(|v| v.to_string()),
            log.detail,
        ],
    )?;
    Ok(())
}
