// ==========================================
// 铁路容量分配系统 - 冲突记录数据仓储
// ==========================================
// 红线: (conflict_type, trigger_id) 唯一
// 存储: 解决结果字段以 JSON 文本保存
// ==========================================

use crate::domain::conflict::ConflictRecord;
use crate::domain::types::{ConflictStatus, ConflictType};
use crate::repository::codec::{build_in_clause, format_ts, from_json, parse_enum, parse_ts, to_json};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::page::{Page, PageRequest};
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

const CONFLICT_COLUMNS: &str = "conflict_id, conflict_type, trigger_id, capacity, involved_json, \
     status, waived_json, confirmed_json, rejected_json, auction_json, auction_capacity, \
     bids_json, group_id, created_at, updated_at, resolved_at";

/// 冲突记录查询条件
#[derive(Debug, Clone, Default)]
pub struct ConflictFilter {
    pub conflict_type: Option<ConflictType>,
    pub status: Option<ConflictStatus>,
    pub group_id: Option<String>,
    /// true: 仅未解决
    pub unresolved_only: bool,
}

impl ConflictFilter {
    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut conditions = Vec::new();
        let mut values = Vec::new();
        if let Some(t) = self.conflict_type {
            conditions.push("conflict_type = ?");
            values.push(Value::Text(t.to_db_str().to_string()));
        }
        if let Some(status) = self.status {
            conditions.push("status = ?");
            values.push(Value::Text(status.to_db_str().to_string()));
        }
        if let Some(group_id) = &self.group_id {
            conditions.push("group_id = ?");
            values.push(Value::Text(group_id.clone()));
        }
        if self.unresolved_only {
            conditions.push("status <> ?");
            values.push(Value::Text(ConflictStatus::Resolved.to_db_str().to_string()));
        }
        if conditions.is_empty() {
            ("1 = 1".to_string(), values)
        } else {
            (conditions.join(" AND "), values)
        }
    }
}

// ==========================================
// ConflictRecordRepository - 冲突记录仓储
// ==========================================
pub struct ConflictRecordRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ConflictRecordRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn insert(&self, record: &ConflictRecord) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO conflict_record (
                conflict_id, conflict_type, trigger_id, capacity, involved_json, status,
                waived_json, confirmed_json, rejected_json, auction_json, auction_capacity,
                bids_json, group_id, created_at, updated_at, resolved_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
            params![
                record.conflict_id,
                record.conflict_type.to_db_str(),
                record.trigger_id,
                record.capacity as i64,
                to_json(&record.involved_request_ids)?,
                record.status.to_db_str(),
                to_json(&record.waived_request_ids)?,
                to_json(&record.confirmed_request_ids)?,
                to_json(&record.rejected)?,
                to_json(&record.auction_request_ids)?,
                record.auction_capacity as i64,
                to_json(&record.bids)?,
                record.group_id,
                format_ts(&record.created_at),
                format_ts(&record.updated_at),
                record.resolved_at.as_ref().map(format_ts),
            ],
        )?;
        Ok(())
    }

    pub fn find_by_id(&self, conflict_id: &str) -> RepositoryResult<Option<ConflictRecord>> {
        let conn = self.get_conn()?;
        Ok(select_record(&conn, conflict_id)?)
    }

    pub fn find_by_trigger(
        &self,
        conflict_type: ConflictType,
        trigger_id: &str,
    ) -> RepositoryResult<Option<ConflictRecord>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM conflict_record WHERE conflict_type = ?1 AND trigger_id = ?2",
            CONFLICT_COLUMNS
        );
        let record = conn
            .query_row(&sql, params![conflict_type.to_db_str(), trigger_id], map_record_row)
            .optional()?;
        Ok(record)
    }

    pub fn find_by_ids(&self, conflict_ids: &[String]) -> RepositoryResult<Vec<ConflictRecord>> {
        if conflict_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM conflict_record WHERE {} ORDER BY trigger_id",
            CONFLICT_COLUMNS,
            build_in_clause("conflict_id", conflict_ids)
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(conflict_ids.iter()), map_record_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// 按条件查询全部 (按 trigger_id 排序)
    pub fn find_by_filter(&self, filter: &ConflictFilter) -> RepositoryResult<Vec<ConflictRecord>> {
        let conn = self.get_conn()?;
        let (clause, values) = filter.where_clause();
        let sql = format!(
            "SELECT {} FROM conflict_record WHERE {} ORDER BY conflict_type, trigger_id",
            CONFLICT_COLUMNS, clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(values.iter()), map_record_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    pub fn query(
        &self,
        filter: &ConflictFilter,
        page: PageRequest,
    ) -> RepositoryResult<Page<ConflictRecord>> {
        let conn = self.get_conn()?;
        let (clause, mut values) = filter.where_clause();

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM conflict_record WHERE {}", clause),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        values.push(Value::Integer(page.limit as i64));
        values.push(Value::Integer(page.offset as i64));
        let sql = format!(
            "SELECT {} FROM conflict_record WHERE {} ORDER BY conflict_type, trigger_id LIMIT ? OFFSET ?",
            CONFLICT_COLUMNS, clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(params_from_iter(values.iter()), map_record_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Page {
            items,
            total: total as usize,
            offset: page.offset,
            limit: page.limit,
        })
    }

    /// 整行覆盖写
    pub fn save(&self, record: &ConflictRecord) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let rows = update_record(&conn, record)?;
        if rows == 0 {
            return Err(RepositoryError::not_found("ConflictRecord", &record.conflict_id));
        }
        Ok(())
    }

    /// 原子读-改-写; 闭包内不得调用其他仓储
    pub fn modify<R, F>(&self, conflict_id: &str, f: F) -> RepositoryResult<R>
    where
        F: FnOnce(&mut ConflictRecord) -> RepositoryResult<R>,
    {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let mut record = select_record(&tx, conflict_id)?
            .ok_or_else(|| RepositoryError::not_found("ConflictRecord", conflict_id))?;
        let result = f(&mut record)?;
        record.updated_at = Utc::now().naive_utc();
        update_record(&tx, &record)?;

        tx.commit()?;
        Ok(result)
    }

    pub fn delete(&self, conflict_id: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "DELETE FROM conflict_record WHERE conflict_id = ?1",
            params![conflict_id],
        )?;
        Ok(())
    }
}

fn select_record(conn: &Connection, conflict_id: &str) -> rusqlite::Result<Option<ConflictRecord>> {
    let sql = format!(
        "SELECT {} FROM conflict_record WHERE conflict_id = ?1",
        CONFLICT_COLUMNS
    );
    conn.query_row(&sql, params![conflict_id], map_record_row).optional()
}

fn update_record(conn: &Connection, record: &ConflictRecord) -> rusqlite::Result<usize> {
    conn.execute(
        r#"
        UPDATE conflict_record SET
            capacity = ?2, involved_json = ?3, status = ?4, waived_json = ?5,
            confirmed_json = ?6, rejected_json = ?7, auction_json = ?8,
            auction_capacity = ?9, bids_json = ?10, group_id = ?11,
            updated_at = ?12, resolved_at = ?13
        WHERE conflict_id = ?1
        "#,
        params![
            record.conflict_id,
            record.capacity as i64,
            to_json(&record.involved_request_ids)?,
            record.status.to_db_str(),
            to_json(&record.waived_request_ids)?,
            to_json(&record.confirmed_request_ids)?,
            to_json(&record.rejected)?,
            to_json(&record.auction_request_ids)?,
            record.auction_capacity as i64,
            to_json(&record.bids)?,
            record.group_id,
            format_ts(&record.updated_at),
            record.resolved_at.as_ref().map(format_ts),
        ],
    )
}

fn map_record_row(row: &Row) -> rusqlite::Result<ConflictRecord> {
    let type_raw: String = row.get(1)?;
    let capacity: i64 = row.get(3)?;
    let involved_raw: String = row.get(4)?;
    let status_raw: String = row.get(5)?;
    let waived_raw: String = row.get(6)?;
    let confirmed_raw: String = row.get(7)?;
    let rejected_raw: String = row.get(8)?;
    let auction_raw: String = row.get(9)?;
    let auction_capacity: i64 = row.get(10)?;
    let bids_raw: String = row.get(11)?;
    let created_raw: String = row.get(13)?;
    let updated_raw: String = row.get(14)?;
    let resolved_raw: Option<String> = row.get(15)?;

    Ok(ConflictRecord {
        conflict_id: row.get(0)?,
        conflict_type: parse_enum(1, &type_raw, ConflictType::from_db_str)?,
        trigger_id: row.get(2)?,
        capacity: capacity.max(0) as usize,
        involved_request_ids: from_json(4, &involved_raw)?,
        status: parse_enum(5, &status_raw, ConflictStatus::from_db_str)?,
        waived_request_ids: from_json(6, &waived_raw)?,
        confirmed_request_ids: from_json(7, &confirmed_raw)?,
        rejected: from_json(8, &rejected_raw)?,
        auction_request_ids: from_json(9, &auction_raw)?,
        auction_capacity: auction_capacity.max(0) as usize,
        bids: from_json(11, &bids_raw)?,
        group_id: row.get(12)?,
        created_at: parse_ts(13, &created_raw)?,
        updated_at: parse_ts(14, &updated_raw)?,
        resolved_at: resolved_raw.map(|raw| parse_ts(15, &raw)).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::AssignmentStatus;

    fn setup() -> ConflictRecordRepository {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        ConflictRecordRepository::new(Arc::new(Mutex::new(conn)))
    }

    fn record(id: &str, trigger: &str) -> ConflictRecord {
        ConflictRecord::new(
            id.to_string(),
            ConflictType::Kapazitaetstopf,
            trigger,
            1,
            &["R2".to_string(), "R1".to_string()],
            Utc::now().naive_utc(),
        )
    }

    #[test]
    fn test_insert_and_find_by_trigger() {
        let repo = setup();
        repo.insert(&record("C1", "KT-A")).unwrap();

        let found = repo
            .find_by_trigger(ConflictType::Kapazitaetstopf, "KT-A")
            .unwrap()
            .unwrap();
        assert_eq!(found.conflict_id, "C1");
        assert_eq!(found.involved_request_ids, vec!["R1".to_string(), "R2".to_string()]);
        assert!(repo.find_by_trigger(ConflictType::Slot, "KT-A").unwrap().is_none());

        let dup = repo.insert(&record("C2", "KT-A")).unwrap_err();
        assert!(matches!(dup, RepositoryError::UniqueConstraintViolation(_)));
    }

    #[test]
    fn test_modify_persists_resolution_fields() {
        let repo = setup();
        repo.insert(&record("C1", "KT-A")).unwrap();

        repo.modify("C1", |r| {
            r.rejected.insert("R2".to_string(), AssignmentStatus::RejectedFee);
            r.confirmed_request_ids.push("R1".to_string());
            r.bids.insert("R1".to_string(), 1200);
            r.close(Utc::now().naive_utc());
            Ok(())
        })
        .unwrap();

        let found = repo.find_by_id("C1").unwrap().unwrap();
        assert!(found.is_resolved());
        assert!(found.resolved_at.is_some());
        assert_eq!(found.rejected.get("R2"), Some(&AssignmentStatus::RejectedFee));
        assert_eq!(found.bids.get("R1"), Some(&1200));

        let open = repo
            .find_by_filter(&ConflictFilter {
                unresolved_only: true,
                ..Default::default()
            })
            .unwrap();
        assert!(open.is_empty());
    }
}
