// ==========================================
// 铁路容量分配系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写
// 存储: config_kv 表 (key-value + scope, 当前只使用 global)
// 约束: 值以文本保存, 读取时解析; 解析失败回退默认值并告警
// ==========================================

use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

const GLOBAL_SCOPE: &str = "global";

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 从已有连接创建 ConfigManager
    ///
    /// 说明: 为保证连接行为一致, 会对传入连接再次应用统一 PRAGMA (幂等)
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> RepositoryResult<Self> {
        {
            let guard = conn
                .lock()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;
            crate::db::configure_sqlite_connection(&guard)?;
        }
        Ok(Self { conn })
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 读取 global scope 的配置值
    pub fn get_global_config_value(&self, key: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = ?1 AND key = ?2",
                params![GLOBAL_SCOPE, key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入 global scope 的配置值 (UPSERT)
    pub fn set_global_config_value(&self, key: &str, value: &str) -> RepositoryResult<()> {
        if key.trim().is_empty() {
            return Err(RepositoryError::FieldValueError {
                field: "key".to_string(),
                message: "配置键不能为空".to_string(),
            });
        }
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value, updated_at) VALUES (?1, ?2, ?3, datetime('now'))
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?3, updated_at = datetime('now')",
            params![GLOBAL_SCOPE, key, value],
        )?;
        tracing::info!(key = %key, value = %value, "配置已更新");
        Ok(())
    }

    fn get_parsed_or_default<T>(&self, key: &str, default: T) -> RepositoryResult<T>
    where
        T: FromStr + Copy + std::fmt::Display,
    {
        let Some(raw) = self.get_global_config_value(key)? else {
            return Ok(default);
        };
        match raw.trim().parse::<T>() {
            Ok(v) => Ok(v),
            Err(_) => {
                tracing::warn!(config_key = %key, raw = %raw, default = %default, "配置值无法解析, 使用默认值");
                Ok(default)
            }
        }
    }

    /// 获取所有 global 配置的快照 (JSON)
    pub fn get_config_snapshot(&self) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = ?1 ORDER BY key")?;
        let rows = stmt
            .query_map(params![GLOBAL_SCOPE], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<BTreeMap<String, String>>>()?;
        Ok(json!(rows).to_string())
    }

    // ===== 冲突扫描 =====

    /// 后台扫描间隔 (秒), 最小 1
    pub fn get_sweep_interval_secs(&self) -> RepositoryResult<u64> {
        Ok(self
            .get_parsed_or_default(config_keys::SWEEP_INTERVAL_SECS, defaults::SWEEP_INTERVAL_SECS)?
            .max(1))
    }

    /// 扫描分页大小, 最小 1
    pub fn get_sweep_page_size(&self) -> RepositoryResult<usize> {
        Ok(self
            .get_parsed_or_default(config_keys::SWEEP_PAGE_SIZE, defaults::SWEEP_PAGE_SIZE)?
            .max(1))
    }

    // ===== 审计 =====

    /// 系统操作写入操作日志时使用的操作人
    pub fn get_default_actor(&self) -> RepositoryResult<String> {
        Ok(self
            .get_global_config_value(config_keys::DEFAULT_ACTOR)?
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| defaults::DEFAULT_ACTOR.to_string()))
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 冲突扫描
    pub const SWEEP_INTERVAL_SECS: &str = "sweep_interval_secs";
    pub const SWEEP_PAGE_SIZE: &str = "sweep_page_size";

    // 审计
    pub const DEFAULT_ACTOR: &str = "default_actor";
}

/// 默认值
pub mod defaults {
    pub const SWEEP_INTERVAL_SECS: u64 = 300;
    pub const SWEEP_PAGE_SIZE: usize = 500;
    pub const DEFAULT_ACTOR: &str = "system";
}
