// ==========================================
// 铁路容量分配系统 - 申请数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 存储: 期望区段与分配列表以 JSON 文本保存
// ==========================================

use crate::domain::request::Request;
use crate::domain::types::{OverallStatus, TrafficDayGroup};
use crate::repository::codec::{
    build_in_clause, format_date, format_ts, from_json, parse_date, parse_enum, parse_ts, to_json,
};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::page::{Page, PageRequest};
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

const REQUEST_COLUMNS: &str = "request_id, operator, traffic_type, traffic_day_group, valid_from, \
     valid_to, legs_json, total_fee, assignments_json, status, created_at, updated_at";

/// 申请查询条件
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub operator: Option<String>,
    pub status: Option<OverallStatus>,
    pub traffic_day_group: Option<TrafficDayGroup>,
}

impl RequestFilter {
    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut conditions = Vec::new();
        let mut values = Vec::new();
        if let Some(operator) = &self.operator {
            conditions.push("operator = ?");
            values.push(Value::Text(operator.clone()));
        }
        if let Some(status) = self.status {
            conditions.push("status = ?");
            values.push(Value::Text(status.to_db_str().to_string()));
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
// RequestRepository - 申请仓储
// ==========================================
pub struct RequestRepository {
    conn: Arc<Mutex<Connection>>,
}

impl RequestRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn insert(&self, request: &Request) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO request (
                request_id, operator, traffic_type, traffic_day_group, valid_from, valid_to,
                legs_json, total_fee, assignments_json, status, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                request.request_id,
                request.operator,
                request.traffic_type,
                request.traffic_day_group.to_db_str(),
                format_date(&request.valid_from),
                format_date(&request.valid_to),
                to_json(&request.legs)?,
                request.total_fee,
                to_json(&request.assignments)?,
                request.status.to_db_str(),
                format_ts(&request.created_at),
                format_ts(&request.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn find_by_id(&self, request_id: &str) -> RepositoryResult<Option<Request>> {
        let conn = self.get_conn()?;
        Ok(select_request(&conn, request_id)?)
    }

    pub fn find_by_ids(&self, request_ids: &[String]) -> RepositoryResult<Vec<Request>> {
        if request_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM request WHERE {} ORDER BY request_id",
            REQUEST_COLUMNS,
            build_in_clause("request_id", request_ids)
        );
        let mut stmt = conn.prepare(&sql)?;
        let requests = stmt
            .query_map(params_from_iter(request_ids.iter()), map_request_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(requests)
    }

    pub fn query(&self, filter: &RequestFilter, page: PageRequest) -> RepositoryResult<Page<Request>> {
        let conn = self.get_conn()?;
        let (clause, mut values) = filter.where_clause();

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM request WHERE {}", clause),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        values.push(Value::Integer(page.limit as i64));
        values.push(Value::Integer(page.offset as i64));
        let sql = format!(
            "SELECT {} FROM request WHERE {} ORDER BY request_id LIMIT ? OFFSET ?",
            REQUEST_COLUMNS, clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(params_from_iter(values.iter()), map_request_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Page {
            items,
            total: total as usize,
            offset: page.offset,
            limit: page.limit,
        })
    }

    /// 原子读-改-写; 闭包内不得调用其他仓储
    pub fn modify<R, F>(&self, request_id: &str, f: F) -> RepositoryResult<R>
    where
        F: FnOnce(&mut Request) -> RepositoryResult<R>,
    {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let mut request = select_request(&tx, request_id)?
            .ok_or_else(|| RepositoryError::not_found("Request", request_id))?;
        let result = f(&mut request)?;
        request.updated_at = Utc::now().naive_utc();

        tx.execute(
            r#"
            UPDATE request SET
                total_fee = ?2, assignments_json = ?3, status = ?4, updated_at = ?5
            WHERE request_id = ?1
            "#,
            params![
                request.request_id,
                request.total_fee,
                to_json(&request.assignments)?,
                request.status.to_db_str(),
                format_ts(&request.updated_at),
            ],
        )?;

        tx.commit()?;
        Ok(result)
    }
}

fn select_request(conn: &Connection, request_id: &str) -> rusqlite::Result<Option<Request>> {
    let sql = format!("SELECT {} FROM request WHERE request_id = ?1", REQUEST_COLUMNS);
    conn.query_row(&sql, params![request_id], map_request_row).optional()
}

fn map_request_row(row: &Row) -> rusqlite::Result<Request> {
    let tdg_raw: String = row.get(3)?;
    let from_raw: String = row.get(4)?;
    let to_raw: String = row.get(5)?;
    let legs_raw: String = row.get(6)?;
    let assignments_raw: String = row.get(8)?;
    let status_raw: String = row.get(9)?;
    let created_raw: String = row.get(10)?;
    let updated_raw: String = row.get(11)?;

    Ok(Request {
        request_id: row.get(0)?,
        operator: row.get(1)?,
        traffic_type: row.get(2)?,
        traffic_day_group: parse_enum(3, &tdg_raw, TrafficDayGroup::from_db_str)?,
        valid_from: parse_date(4, &from_raw)?,
        valid_to: parse_date(5, &to_raw)?,
        legs: from_json(6, &legs_raw)?,
        total_fee: row.get(7)?,
        assignments: from_json(8, &assignments_raw)?,
        status: parse_enum(9, &status_raw, OverallStatus::from_db_str)?,
        created_at: parse_ts(10, &created_raw)?,
        updated_at: parse_ts(11, &updated_raw)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::request::{DesiredLeg, SlotAssignment};
    use crate::domain::types::{AssignmentStatus, LegKind};
    use chrono::{NaiveDate, NaiveTime};

    fn setup() -> RequestRepository {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        RequestRepository::new(Arc::new(Mutex::new(conn)))
    }

    fn request(id: &str, operator: &str) -> Request {
        let now = Utc::now().naive_utc();
        Request {
            request_id: id.to_string(),
            operator: operator.to_string(),
            traffic_type: "SGV".to_string(),
            traffic_day_group: TrafficDayGroup::Daily,
            valid_from: NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(),
            valid_to: NaiveDate::from_ymd_opt(2025, 1, 19).unwrap(),
            legs: vec![DesiredLeg {
                from: "A".to_string(),
                to: "B".to_string(),
                section: "A-B".to_string(),
                departure: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
                arrival: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                kind: LegKind::Tag,
            }],
            total_fee: 2100,
            assignments: vec![SlotAssignment::new(
                "SLOT_A_B_KW2_Mo-Fr_0800_SGV".to_string(),
                "KT-A-B-KW2-SGV-Mo-Fr-ZF0709".to_string(),
                0,
                2,
                TrafficDayGroup::MoFr,
            )],
            status: OverallStatus::InConflictCheck,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_insert_find_and_modify() {
        let repo = setup();
        repo.insert(&request("R1", "DB Cargo")).unwrap();

        let found = repo.find_by_id("R1").unwrap().unwrap();
        assert_eq!(found.legs.len(), 1);
        assert_eq!(found.assignments[0].pot_status, AssignmentStatus::Initial);
        assert_eq!(found.valid_from, NaiveDate::from_ymd_opt(2025, 1, 6).unwrap());

        repo.modify("R1", |r| {
            r.assignments[0].pot_status = AssignmentStatus::Confirmed;
            r.status = OverallStatus::PotConfirmed;
            Ok(())
        })
        .unwrap();
        let found = repo.find_by_id("R1").unwrap().unwrap();
        assert_eq!(found.status, OverallStatus::PotConfirmed);
        assert_eq!(found.assignments[0].pot_status, AssignmentStatus::Confirmed);
    }

    #[test]
    fn test_query_by_operator() {
        let repo = setup();
        repo.insert(&request("R1", "DB Cargo")).unwrap();
        repo.insert(&request("R2", "RheinCargo")).unwrap();
        repo.insert(&request("R3", "DB Cargo")).unwrap();

        let page = repo
            .query(
                &RequestFilter {
                    operator: Some("DB Cargo".to_string()),
                    ..Default::default()
                },
                PageRequest::default(),
            )
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0].request_id, "R1");
        assert_eq!(repo.find_by_ids(&["R2".to_string(), "R3".to_string()]).unwrap().len(), 2);
    }
}
