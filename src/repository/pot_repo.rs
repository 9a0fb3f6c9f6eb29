// ==========================================
// 铁路容量分配系统 - 容量池数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 红线: 链表指针的两端在同一事务中写入
// 红线: max_kapazitaet 列只由 CapacityPot::max_kapazitaet() 写入
// ==========================================

use crate::domain::capacity::CapacityPot;
use crate::domain::types::{TimeWindow, TrafficDayGroup};
use crate::repository::codec::{build_in_clause, format_ts, from_json, parse_enum, parse_ts, to_json};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::page::{Page, PageRequest};
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

const POT_COLUMNS: &str = "pot_id, section, traffic_type, week, traffic_day_group, time_window, \
     slot_ids_json, request_ids_json, predecessor_id, successor_id, created_at, updated_at";

/// 容量池查询条件
#[derive(Debug, Clone, Default)]
pub struct PotFilter {
    pub section: Option<String>,
    pub traffic_type: Option<String>,
    pub week: Option<u32>,
    pub traffic_day_group: Option<TrafficDayGroup>,
}

impl PotFilter {
    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut conditions = Vec::new();
        let mut values = Vec::new();
        if let Some(section) = &self.section {
            conditions.push("section = ?");
            values.push(Value::Text(section.clone()));
        }
        if let Some(tt) = &self.traffic_type {
            conditions.push("traffic_type = ?");
            values.push(Value::Text(tt.clone()));
        }
        if let Some(week) = self.week {
            conditions.push("week = ?");
            values.push(Value::Integer(week as i64));
        }
        if let Some(tdg) = self.traffic_day_group {
            conditions.push("traffic_day_group = ?");
            values.push(Value::Text(tdg.to_db_str().to_string()));
        }
        if conditions.is_empty() {
            ("1 = 1".to_string(), values)
        } else {
            (conditions.join(" AND "), values)
        }
    }
}

// ==========================================
// CapacityPotRepository - 容量池仓储
// ==========================================
pub struct CapacityPotRepository {
    conn: Arc<Mutex<Connection>>,
}

impl CapacityPotRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 查询操作
    // ==========================================

    pub fn find_by_id(&self, pot_id: &str) -> RepositoryResult<Option<CapacityPot>> {
        let conn = self.get_conn()?;
        Ok(select_pot(&conn, pot_id)?)
    }

    pub fn find_by_ids(&self, pot_ids: &[String]) -> RepositoryResult<Vec<CapacityPot>> {
        if pot_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM capacity_pot WHERE {} ORDER BY pot_id",
            POT_COLUMNS,
            build_in_clause("pot_id", pot_ids)
        );
        let mut stmt = conn.prepare(&sql)?;
        let pots = stmt
            .query_map(params_from_iter(pot_ids.iter()), map_pot_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(pots)
    }

    /// 按条件分页查询
    pub fn query(&self, filter: &PotFilter, page: PageRequest) -> RepositoryResult<Page<CapacityPot>> {
        let conn = self.get_conn()?;
        let (clause, mut values) = filter.where_clause();

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM capacity_pot WHERE {}", clause),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        values.push(Value::Integer(page.limit as i64));
        values.push(Value::Integer(page.offset as i64));
        let sql = format!(
            "SELECT {} FROM capacity_pot WHERE {} ORDER BY pot_id LIMIT ? OFFSET ?",
            POT_COLUMNS, clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(params_from_iter(values.iter()), map_pot_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Page {
            items,
            total: total as usize,
            offset: page.offset,
            limit: page.limit,
        })
    }

    /// 按 pot_id 顺序分页 (冲突扫描使用)
    pub fn list_page(&self, offset: usize, limit: usize) -> RepositoryResult<Vec<CapacityPot>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM capacity_pot ORDER BY pot_id LIMIT ?1 OFFSET ?2",
            POT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let pots = stmt
            .query_map(params![limit as i64, offset as i64], map_pot_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(pots)
    }

    // ==========================================
    // 写入操作
    // ==========================================

    /// 插入新容量池并接入时间链
    ///
    /// pot.predecessor_id / successor_id 已指向链上相邻的容量池;
    /// 同一事务中把前驱的后继、后继的前驱改为新容量池
    pub fn insert_and_link(&self, pot: &CapacityPot) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let now = format_ts(&Utc::now().naive_utc());

        insert_pot(&tx, pot)?;

        if let Some(pred_id) = &pot.predecessor_id {
            let rows = tx.execute(
                "UPDATE capacity_pot SET successor_id = ?1, updated_at = ?2 WHERE pot_id = ?3",
                params![pot.pot_id, now, pred_id],
            )?;
            if rows == 0 {
                return Err(RepositoryError::not_found("CapacityPot", pred_id));
            }
        }
        if let Some(succ_id) = &pot.successor_id {
            let rows = tx.execute(
                "UPDATE capacity_pot SET predecessor_id = ?1, updated_at = ?2 WHERE pot_id = ?3",
                params![pot.pot_id, now, succ_id],
            )?;
            if rows == 0 {
                return Err(RepositoryError::not_found("CapacityPot", succ_id));
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// 删除空容量池, 并把前驱/后继直接相连
    pub fn delete_and_unlink(&self, pot_id: &str) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let pot = select_pot(&tx, pot_id)?
            .ok_or_else(|| RepositoryError::not_found("CapacityPot", pot_id))?;
        if !pot.is_empty() {
            return Err(RepositoryError::BusinessRuleViolation(format!(
                "容量池 {} 仍有 {} 个槽位 / {} 个申请, 不能删除",
                pot_id,
                pot.slot_ids.len(),
                pot.request_ids.len()
            )));
        }

        let now = format_ts(&Utc::now().naive_utc());
        if let Some(pred_id) = &pot.predecessor_id {
            tx.execute(
                "UPDATE capacity_pot SET successor_id = ?1, updated_at = ?2 WHERE pot_id = ?3",
                params![pot.successor_id, now, pred_id],
            )?;
        }
        if let Some(succ_id) = &pot.successor_id {
            tx.execute(
                "UPDATE capacity_pot SET predecessor_id = ?1, updated_at = ?2 WHERE pot_id = ?3",
                params![pot.predecessor_id, now, succ_id],
            )?;
        }
        tx.execute("DELETE FROM capacity_pot WHERE pot_id = ?1", params![pot_id])?;

        tx.commit()?;
        Ok(())
    }

    /// 原子读-改-写
    ///
    /// 闭包在事务内拿到最新数据; 闭包内不得调用其他仓储 (共享连接不可重入)
    pub fn modify<R, F>(&self, pot_id: &str, f: F) -> RepositoryResult<R>
    where
        F: FnOnce(&mut CapacityPot) -> RepositoryResult<R>,
    {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let mut pot = select_pot(&tx, pot_id)?
            .ok_or_else(|| RepositoryError::not_found("CapacityPot", pot_id))?;
        let result = f(&mut pot)?;
        pot.updated_at = Utc::now().naive_utc();
        update_pot(&tx, &pot)?;

        tx.commit()?;
        Ok(result)
    }
}

// ==========================================
// 行映射 / SQL 辅助
// ==========================================

fn select_pot(conn: &Connection, pot_id: &str) -> rusqlite::Result<Option<CapacityPot>> {
    let sql = format!("SELECT {} FROM capacity_pot WHERE pot_id = ?1", POT_COLUMNS);
    conn.query_row(&sql, params![pot_id], map_pot_row).optional()
}

fn insert_pot(conn: &Connection, pot: &CapacityPot) -> rusqlite::Result<()> {
    conn.execute(
        r#"
        INSERT INTO capacity_pot (
            pot_id, section, traffic_type, week, traffic_day_group, time_window,
            slot_ids_json, request_ids_json, max_kapazitaet,
            predecessor_id, successor_id, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        "#,
        params![
            pot.pot_id,
            pot.section,
            pot.traffic_type,
            pot.week,
            pot.traffic_day_group.to_db_str(),
            pot.time_window.label(),
            to_json(&pot.slot_ids)?,
            to_json(&pot.request_ids)?,
            pot.max_kapazitaet() as i64,
            pot.predecessor_id,
            pot.successor_id,
            format_ts(&pot.created_at),
            format_ts(&pot.updated_at),
        ],
    )?;
    Ok(())
}

fn update_pot(conn: &Connection, pot: &CapacityPot) -> rusqlite::Result<()> {
    conn.execute(
        r#"
        UPDATE capacity_pot SET
            slot_ids_json = ?2,
            request_ids_json = ?3,
            max_kapazitaet = ?4,
            predecessor_id = ?5,
            successor_id = ?6,
            updated_at = ?7
        WHERE pot_id = ?1
        "#,
        params![
            pot.pot_id,
            to_json(&pot.slot_ids)?,
            to_json(&pot.request_ids)?,
            pot.max_kapazitaet() as i64,
            pot.predecessor_id,
            pot.successor_id,
            format_ts(&pot.updated_at),
        ],
    )?;
    Ok(())
}

fn map_pot_row(row: &Row) -> rusqlite::Result<CapacityPot> {
    let tdg_raw: String = row.get(4)?;
    let window_raw: String = row.get(5)?;
    let slots_raw: String = row.get(6)?;
    let requests_raw: String = row.get(7)?;
    let created_raw: String = row.get(10)?;
    let updated_raw: String = row.get(11)?;

    Ok(CapacityPot {
        pot_id: row.get(0)?,
        section: row.get(1)?,
        traffic_type: row.get(2)?,
        week: row.get(3)?,
        traffic_day_group: parse_enum(4, &tdg_raw, TrafficDayGroup::from_db_str)?,
        time_window: parse_enum(5, &window_raw, TimeWindow::from_label)?,
        slot_ids: from_json(6, &slots_raw)?,
        request_ids: from_json(7, &requests_raw)?,
        predecessor_id: row.get(8)?,
        successor_id: row.get(9)?,
        created_at: parse_ts(10, &created_raw)?,
        updated_at: parse_ts(11, &updated_raw)?,
    })
}
