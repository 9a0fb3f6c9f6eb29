// ==========================================
// 铁路容量分配系统 - 冲突组数据仓储
// ==========================================
// 红线: fingerprint 唯一
// ==========================================

use crate::domain::conflict::ConflictGroup;
use crate::domain::types::ConflictType;
use crate::repository::codec::{format_ts, from_json, parse_enum, parse_ts, to_json};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

const GROUP_COLUMNS: &str = "group_id, fingerprint, conflict_type, capacity, conflict_ids_json, \
     involved_json, created_at, updated_at";

// ==========================================
// ConflictGroupRepository - 冲突组仓储
// ==========================================
pub struct ConflictGroupRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ConflictGroupRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn insert(&self, group: &ConflictGroup) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO conflict_group (
                group_id, fingerprint, conflict_type, capacity,
                conflict_ids_json, involved_json, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                group.group_id,
                group.fingerprint,
                group.conflict_type.to_db_str(),
                group.capacity as i64,
                to_json(&group.conflict_ids)?,
                to_json(&group.involved_request_ids)?,
                format_ts(&group.created_at),
                format_ts(&group.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn find_by_id(&self, group_id: &str) -> RepositoryResult<Option<ConflictGroup>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM conflict_group WHERE group_id = ?1", GROUP_COLUMNS);
        Ok(conn.query_row(&sql, params![group_id], map_group_row).optional()?)
    }

    pub fn find_by_fingerprint(&self, fingerprint: &str) -> RepositoryResult<Option<ConflictGroup>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM conflict_group WHERE fingerprint = ?1",
            GROUP_COLUMNS
        );
        Ok(conn.query_row(&sql, params![fingerprint], map_group_row).optional()?)
    }

    pub fn list_all(&self) -> RepositoryResult<Vec<ConflictGroup>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM conflict_group ORDER BY conflict_type, fingerprint",
            GROUP_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let groups = stmt
            .query_map([], map_group_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(groups)
    }

    pub fn save(&self, group: &ConflictGroup) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            r#"
            UPDATE conflict_group SET
                capacity = ?2, conflict_ids_json = ?3, involved_json = ?4, updated_at = ?5
            WHERE group_id = ?1
            "#,
            params![
                group.group_id,
                group.capacity as i64,
                to_json(&group.conflict_ids)?,
                to_json(&group.involved_request_ids)?,
                format_ts(&group.updated_at),
            ],
        )?;
        if rows == 0 {
            return Err(RepositoryError::not_found("ConflictGroup", &group.group_id));
        }
        Ok(())
    }

    pub fn delete(&self, group_id: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute("DELETE FROM conflict_group WHERE group_id = ?1", params![group_id])?;
        Ok(())
    }
}

fn map_group_row(row: &Row) -> rusqlite::Result<ConflictGroup> {
    let type_raw: String = row.get(2)?;
    let capacity: i64 = row.get(3)?;
    let conflicts_raw: String = row.get(4)?;
    let involved_raw: String = row.get(5)?;
    let created_raw: String = row.get(6)?;
    let updated_raw: String = row.get(7)?;

    Ok(ConflictGroup {
        group_id: row.get(0)?,
        fingerprint: row.get(1)?,
        conflict_type: parse_enum(2, &type_raw, ConflictType::from_db_str)?,
        capacity: capacity.max(0) as usize,
        conflict_ids: from_json(4, &conflicts_raw)?,
        involved_request_ids: from_json(5, &involved_raw)?,
        created_at: parse_ts(6, &created_raw)?,
        updated_at: parse_ts(7, &updated_raw)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::conflict::ConflictRecord;
    use chrono::Utc;

    #[test]
    fn test_group_lookup_by_fingerprint() {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        let repo = ConflictGroupRepository::new(Arc::new(Mutex::new(conn)));

        let now = Utc::now().naive_utc();
        let record = ConflictRecord::new(
            "C1".to_string(),
            ConflictType::Slot,
            "SLOT_X",
            1,
            &["R1".to_string(), "R2".to_string()],
            now,
        );
        let mut group = ConflictGroup::new("G1".to_string(), &record, now);
        group.conflict_ids.push("C1".to_string());
        repo.insert(&group).unwrap();

        let found = repo.find_by_fingerprint("SLOT|1|R1,R2").unwrap().unwrap();
        assert_eq!(found.group_id, "G1");
        assert_eq!(found.conflict_ids, vec!["C1".to_string()]);

        repo.delete("G1").unwrap();
        assert!(repo.list_all().unwrap().is_empty());
    }
}
