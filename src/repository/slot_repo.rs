// ==========================================
// 铁路容量分配系统 - 槽位模板数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================

use crate::domain::slot::{SlotKind, SlotPattern};
use crate::domain::types::{TimeWindow, TrafficDayGroup};
use crate::repository::codec::{build_in_clause, format_ts, from_json, parse_enum, parse_ts, to_json};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::page::{Page, PageRequest};
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

const SLOT_COLUMNS: &str = "slot_id, kind_json, section, from_location, to_location, week, \
     traffic_day_group, traffic_type, pot_id, base_fee, parent_slot_id, \
     alternative_ids_json, request_ids_json, created_at, updated_at";

/// 槽位查询条件
#[derive(Debug, Clone, Default)]
pub struct SlotFilter {
    pub from: Option<String>,
    pub to: Option<String>,
    pub section: Option<String>,
    pub week: Option<u32>,
    pub traffic_day_group: Option<TrafficDayGroup>,
    pub traffic_type: Option<String>,
    pub time_window: Option<TimeWindow>,
    pub pot_id: Option<String>,
    /// 只返回父槽位 (不含备选)
    pub parents_only: bool,
}

impl SlotFilter {
    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut conditions: Vec<&str> = Vec::new();
        let mut values = Vec::new();
        let text = |v: &str| Value::Text(v.to_string());

        if let Some(from) = &self.from {
            conditions.push("from_location = ?");
            values.push(text(from));
        }
        if let Some(to) = &self.to {
            conditions.push("to_location = ?");
            values.push(text(to));
        }
        if let Some(section) = &self.section {
            conditions.push("section = ?");
            values.push(text(section));
        }
        if let Some(week) = self.week {
            conditions.push("week = ?");
            values.push(Value::Integer(week as i64));
        }
        if let Some(tdg) = self.traffic_day_group {
            conditions.push("traffic_day_group = ?");
            values.push(text(tdg.to_db_str()));
        }
        if let Some(tt) = &self.traffic_type {
            conditions.push("traffic_type = ?");
            values.push(text(tt));
        }
        if let Some(window) = self.time_window {
            conditions.push("time_window = ?");
            values.push(text(window.label()));
        }
        if let Some(pot_id) = &self.pot_id {
            conditions.push("pot_id = ?");
            values.push(text(pot_id));
        }
        if self.parents_only {
            conditions.push("parent_slot_id IS NULL");
        }

        if conditions.is_empty() {
            ("1 = 1".to_string(), values)
        } else {
            (conditions.join(" AND "), values)
        }
    }
}

// ==========================================
// SlotPatternRepository - 槽位模板仓储
// ==========================================
pub struct SlotPatternRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SlotPatternRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn insert(&self, slot: &SlotPattern) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO slot_pattern (
                slot_id, kind, kind_json, section, from_location, to_location, week,
                traffic_day_group, traffic_type, time_window, pot_id, base_fee,
                parent_slot_id, alternative_ids_json, request_ids_json, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            "#,
            params![
                slot.slot_id,
                kind_str(&slot.kind),
                to_json(&slot.kind)?,
                slot.section,
                slot.from,
                slot.to,
                slot.week,
                slot.traffic_day_group.to_db_str(),
                slot.traffic_type,
                slot.time_window().label(),
                slot.pot_id,
                slot.base_fee,
                slot.parent_slot_id,
                to_json(&slot.alternative_ids)?,
                to_json(&slot.request_ids)?,
                format_ts(&slot.created_at),
                format_ts(&slot.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn find_by_id(&self, slot_id: &str) -> RepositoryResult<Option<SlotPattern>> {
        let conn = self.get_conn()?;
        Ok(select_slot(&conn, slot_id)?)
    }

    pub fn find_by_ids(&self, slot_ids: &[String]) -> RepositoryResult<Vec<SlotPattern>> {
        if slot_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM slot_pattern WHERE {} ORDER BY slot_id",
            SLOT_COLUMNS,
            build_in_clause("slot_id", slot_ids)
        );
        let mut stmt = conn.prepare(&sql)?;
        let slots = stmt
            .query_map(params_from_iter(slot_ids.iter()), map_slot_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(slots)
    }

    /// 按条件查询全部匹配行 (匹配引擎使用)
    pub fn find_by_filter(&self, filter: &SlotFilter) -> RepositoryResult<Vec<SlotPattern>> {
        let conn = self.get_conn()?;
        let (clause, values) = filter.where_clause();
        let sql = format!(
            "SELECT {} FROM slot_pattern WHERE {} ORDER BY slot_id",
            SLOT_COLUMNS, clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let slots = stmt
            .query_map(params_from_iter(values.iter()), map_slot_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(slots)
    }

    pub fn query(&self, filter: &SlotFilter, page: PageRequest) -> RepositoryResult<Page<SlotPattern>> {
        let conn = self.get_conn()?;
        let (clause, mut values) = filter.where_clause();

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM slot_pattern WHERE {}", clause),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        values.push(Value::Integer(page.limit as i64));
        values.push(Value::Integer(page.offset as i64));
        let sql = format!(
            "SELECT {} FROM slot_pattern WHERE {} ORDER BY slot_id LIMIT ? OFFSET ?",
            SLOT_COLUMNS, clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(params_from_iter(values.iter()), map_slot_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Page {
            items,
            total: total as usize,
            offset: page.offset,
            limit: page.limit,
        })
    }

    /// 按 slot_id 顺序分页 (冲突扫描使用, 含备选槽位)
    pub fn list_page(&self, offset: usize, limit: usize) -> RepositoryResult<Vec<SlotPattern>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM slot_pattern ORDER BY slot_id LIMIT ?1 OFFSET ?2",
            SLOT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let slots = stmt
            .query_map(params![limit as i64, offset as i64], map_slot_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(slots)
    }

    /// 原子读-改-写; 闭包内不得调用其他仓储
    pub fn modify<R, F>(&self, slot_id: &str, f: F) -> RepositoryResult<R>
    where
        F: FnOnce(&mut SlotPattern) -> RepositoryResult<R>,
    {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let mut slot = select_slot(&tx, slot_id)?
            .ok_or_else(|| RepositoryError::not_found("SlotPattern", slot_id))?;
        let result = f(&mut slot)?;
        slot.updated_at = Utc::now().naive_utc();

        tx.execute(
            r#"
            UPDATE slot_pattern SET
                kind = ?2, kind_json = ?3, section = ?4, time_window = ?5, pot_id = ?6,
                base_fee = ?7, alternative_ids_json = ?8, request_ids_json = ?9, updated_at = ?10
            WHERE slot_id = ?1
            "#,
            params![
                slot.slot_id,
                kind_str(&slot.kind),
                to_json(&slot.kind)?,
                slot.section,
                slot.time_window().label(),
                slot.pot_id,
                slot.base_fee,
                to_json(&slot.alternative_ids)?,
                to_json(&slot.request_ids)?,
                format_ts(&slot.updated_at),
            ],
        )?;

        tx.commit()?;
        Ok(result)
    }

    pub fn delete(&self, slot_id: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let rows = conn.execute("DELETE FROM slot_pattern WHERE slot_id = ?1", params![slot_id])?;
        if rows == 0 {
            return Err(RepositoryError::not_found("SlotPattern", slot_id));
        }
        Ok(())
    }
}

fn kind_str(kind: &SlotKind) -> &'static str {
    match kind {
        SlotKind::Tag { .. } => "TAG",
        SlotKind::Nacht { .. } => "NACHT",
    }
}

fn select_slot(conn: &Connection, slot_id: &str) -> rusqlite::Result<Option<SlotPattern>> {
    let sql = format!("SELECT {} FROM slot_pattern WHERE slot_id = ?1", SLOT_COLUMNS);
    conn.query_row(&sql, params![slot_id], map_slot_row).optional()
}

fn map_slot_row(row: &Row) -> rusqlite::Result<SlotPattern> {
    let kind_raw: String = row.get(1)?;
    let tdg_raw: String = row.get(6)?;
    let alternatives_raw: String = row.get(11)?;
    let requests_raw: String = row.get(12)?;
    let created_raw: String = row.get(13)?;
    let updated_raw: String = row.get(14)?;

    Ok(SlotPattern {
        slot_id: row.get(0)?,
        kind: from_json(1, &kind_raw)?,
        section: row.get(2)?,
        from: row.get(3)?,
        to: row.get(4)?,
        week: row.get(5)?,
        traffic_day_group: parse_enum(6, &tdg_raw, TrafficDayGroup::from_db_str)?,
        traffic_type: row.get(7)?,
        pot_id: row.get(8)?,
        base_fee: row.get(9)?,
        parent_slot_id: row.get(10)?,
        alternative_ids: from_json(11, &alternatives_raw)?,
        request_ids: from_json(12, &requests_raw)?,
        created_at: parse_ts(13, &created_raw)?,
        updated_at: parse_ts(14, &updated_raw)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn setup() -> SlotPatternRepository {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        SlotPatternRepository::new(Arc::new(Mutex::new(conn)))
    }

    fn night_slot(week: u32) -> SlotPattern {
        let now = Utc::now().naive_utc();
        let mut slot = SlotPattern {
            slot_id: String::new(),
            kind: SlotKind::Nacht {
                time_window: TimeWindow::from_hour(23),
                min_travel_minutes: 60,
                max_travel_minutes: 180,
            },
            section: "MA-FF".to_string(),
            from: "Mannheim".to_string(),
            to: "Frankfurt".to_string(),
            week,
            traffic_day_group: TrafficDayGroup::MoFr,
            traffic_type: "ALL".to_string(),
            pot_id: None,
            base_fee: 80,
            parent_slot_id: None,
            alternative_ids: Vec::new(),
            request_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        slot.slot_id = slot.derived_id();
        slot
    }

    #[test]
    fn test_insert_and_find_roundtrips_kind() {
        let repo = setup();
        let slot = night_slot(5);
        repo.insert(&slot).unwrap();

        let found = repo.find_by_id(&slot.slot_id).unwrap().unwrap();
        assert_eq!(found.kind, slot.kind);
        assert_eq!(found.slot_id, "SLOT_Mannheim_Frankfurt_KW5_Mo-Fr_2300_ALL");
        assert!(repo.find_by_id("missing").unwrap().is_none());
    }

    #[test]
    fn test_filter_by_window_and_parents() {
        let repo = setup();
        let parent = night_slot(5);
        repo.insert(&parent).unwrap();

        let mut alt = night_slot(5);
        alt.slot_id = SlotPattern::alternative_id(&parent.slot_id, 1);
        alt.parent_slot_id = Some(parent.slot_id.clone());
        alt.kind = SlotKind::Tag {
            departure: NaiveTime::from_hms_opt(23, 30, 0).unwrap(),
            arrival: NaiveTime::from_hms_opt(0, 45, 0).unwrap(),
        };
        repo.insert(&alt).unwrap();

        let all = repo
            .find_by_filter(&SlotFilter {
                week: Some(5),
                time_window: Some(TimeWindow::from_hour(0)),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(all.len(), 2);

        let parents = repo
            .find_by_filter(&SlotFilter {
                week: Some(5),
                parents_only: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(parents.len(), 1);
        assert_eq!(repo.list_page(0, 10).unwrap().len(), 2);
    }

    #[test]
    fn test_modify_and_delete() {
        let repo = setup();
        let slot = night_slot(6);
        repo.insert(&slot).unwrap();

        repo.modify(&slot.slot_id, |s| {
            s.add_request("R1");
            Ok(())
        })
        .unwrap();
        let found = repo.find_by_id(&slot.slot_id).unwrap().unwrap();
        assert_eq!(found.request_ids, vec!["R1".to_string()]);

        repo.delete(&slot.slot_id).unwrap();
        assert!(matches!(
            repo.delete(&slot.slot_id),
            Err(RepositoryError::NotFound { .. })
        ));
    }
}
