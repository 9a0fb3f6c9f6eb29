// ==========================================
// 铁路容量分配系统 - SQLite 连接初始化 / 建表
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout，减少并发写入时的偶发 busy 错误
// - init_schema 幂等, 可在每次启动时执行
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：foreign_keys 与 busy_timeout 都需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 打开连接、建表, 返回仓储共享的连接句柄
pub fn open_shared_connection(db_path: &str) -> rusqlite::Result<Arc<Mutex<Connection>>> {
    let conn = open_sqlite_connection(db_path)?;
    init_schema(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// 建表 (幂等)
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );

        CREATE TABLE IF NOT EXISTS capacity_pot (
            pot_id TEXT PRIMARY KEY,
            section TEXT NOT NULL,
            traffic_type TEXT NOT NULL,
            week INTEGER NOT NULL,
            traffic_day_group TEXT NOT NULL,
            time_window TEXT NOT NULL,
            slot_ids_json TEXT NOT NULL DEFAULT '[]',
            request_ids_json TEXT NOT NULL DEFAULT '[]',
            max_kapazitaet INTEGER NOT NULL DEFAULT 0,
            predecessor_id TEXT,
            successor_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_capacity_pot_chain
            ON capacity_pot (section, traffic_type, traffic_day_group, week);

        CREATE TABLE IF NOT EXISTS slot_pattern (
            slot_id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            kind_json TEXT NOT NULL,
            section TEXT NOT NULL,
            from_location TEXT NOT NULL,
            to_location TEXT NOT NULL,
            week INTEGER NOT NULL,
            traffic_day_group TEXT NOT NULL,
            traffic_type TEXT NOT NULL,
            time_window TEXT NOT NULL,
            pot_id TEXT,
            base_fee INTEGER NOT NULL DEFAULT 0,
            parent_slot_id TEXT,
            alternative_ids_json TEXT NOT NULL DEFAULT '[]',
            request_ids_json TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_slot_pattern_lookup
            ON slot_pattern (from_location, to_location, week, traffic_day_group);
        CREATE INDEX IF NOT EXISTS idx_slot_pattern_pot ON slot_pattern (pot_id);

        CREATE TABLE IF NOT EXISTS request (
            request_id TEXT PRIMARY KEY,
            operator TEXT NOT NULL,
            traffic_type TEXT NOT NULL,
            traffic_day_group TEXT NOT NULL,
            valid_from TEXT NOT NULL,
            valid_to TEXT NOT NULL,
            legs_json TEXT NOT NULL,
            total_fee INTEGER NOT NULL DEFAULT 0,
            assignments_json TEXT NOT NULL DEFAULT '[]',
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_request_status ON request (status);

        CREATE TABLE IF NOT EXISTS conflict_record (
            conflict_id TEXT PRIMARY KEY,
            conflict_type TEXT NOT NULL,
            trigger_id TEXT NOT NULL,
            capacity INTEGER NOT NULL,
            involved_json TEXT NOT NULL,
            status TEXT NOT NULL,
            waived_json TEXT NOT NULL DEFAULT '[]',
            confirmed_json TEXT NOT NULL DEFAULT '[]',
            rejected_json TEXT NOT NULL DEFAULT '{}',
            auction_json TEXT NOT NULL DEFAULT '[]',
            auction_capacity INTEGER NOT NULL DEFAULT 0,
            bids_json TEXT NOT NULL DEFAULT '{}',
            group_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            resolved_at TEXT,
            UNIQUE (conflict_type, trigger_id)
        );
        CREATE INDEX IF NOT EXISTS idx_conflict_record_group ON conflict_record (group_id);

        CREATE TABLE IF NOT EXISTS conflict_group (
            group_id TEXT PRIMARY KEY,
            fingerprint TEXT NOT NULL UNIQUE,
            conflict_type TEXT NOT NULL,
            capacity INTEGER NOT NULL,
            conflict_ids_json TEXT NOT NULL DEFAULT '[]',
            involved_json TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS action_log (
            action_id TEXT PRIMARY KEY,
            action_type TEXT NOT NULL,
            action_ts TEXT NOT NULL,
            actor TEXT NOT NULL,
            target_id TEXT,
            payload_json TEXT,
            detail TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_action_log_target ON action_log (target_id);
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), None);

        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), Some(CURRENT_SCHEMA_VERSION));
    }
}
