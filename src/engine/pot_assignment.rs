// ==========================================
// 铁路容量分配系统 - 容量池归属引擎
// ==========================================
// 职责: 为槽位查找/创建容量池, 新容量池接入时间链
// 查找顺序: 槽位交通类型 → ALL → 新建 (槽位交通类型)
// 红线: 新容量池与两侧邻居的指针在同一事务中写入
// ==========================================

use crate::domain::capacity::{sanitize_section, CapacityPot, PotKey};
use crate::domain::types::{TimeWindow, TrafficDayGroup, TRAFFIC_TYPE_ALL};
use crate::engine::error::{EngineError, EngineResult};
use crate::repository::error::RepositoryError;
use crate::repository::page::PageRequest;
use crate::repository::pot_repo::{CapacityPotRepository, PotFilter};
use chrono::Utc;
use std::sync::Arc;
use tracing::instrument;

/// 每个方向最多检查的时间窗数 (一周)
const NEIGHBOUR_SCAN_STEPS: usize = 12;

/// 容量池在时间轴上的序号
fn ordinal(key: &PotKey) -> i64 {
    key.week as i64 * TimeWindow::COUNT as i64 + key.time_window.index() as i64
}

// ==========================================
// PotAssignmentService - 容量池归属
// ==========================================
pub struct PotAssignmentService {
    pot_repo: Arc<CapacityPotRepository>,
}

impl PotAssignmentService {
    pub fn new(pot_repo: Arc<CapacityPotRepository>) -> Self {
        Self { pot_repo }
    }

    /// 查找或创建槽位所属的容量池
    #[instrument(skip(self))]
    pub fn find_or_create(
        &self,
        section: &str,
        traffic_type: &str,
        week: u32,
        traffic_day_group: TrafficDayGroup,
        time_window: TimeWindow,
    ) -> EngineResult<CapacityPot> {
        if traffic_day_group == TrafficDayGroup::Daily {
            return Err(EngineError::Validation(
                "容量池只接受 Mo-Fr 或 Sa+So 分组".to_string(),
            ));
        }
        let key = PotKey {
            section: sanitize_section(section),
            traffic_type: traffic_type.to_string(),
            week,
            traffic_day_group,
            time_window,
        };
        if key.section.is_empty() {
            return Err(EngineError::Validation("区段不能为空".to_string()));
        }

        if let Some(pot) = self.pot_repo.find_by_id(&key.pot_id())? {
            return Ok(pot);
        }
        if traffic_type != TRAFFIC_TYPE_ALL {
            let all_key = key.with_traffic_type(TRAFFIC_TYPE_ALL);
            if let Some(pot) = self.pot_repo.find_by_id(&all_key.pot_id())? {
                return Ok(pot);
            }
        }

        self.create(&key)
    }

    fn create(&self, key: &PotKey) -> EngineResult<CapacityPot> {
        let mut pot = CapacityPot::new(key, Utc::now().naive_utc());
        let (predecessor, successor) = self.nearest_neighbours(key)?;
        pot.predecessor_id = predecessor;
        pot.successor_id = successor;

        match self.pot_repo.insert_and_link(&pot) {
            Ok(()) => {
                tracing::info!(
                    pot_id = %pot.pot_id,
                    predecessor = ?pot.predecessor_id,
                    successor = ?pot.successor_id,
                    "新建容量池"
                );
                Ok(pot)
            }
            Err(RepositoryError::UniqueConstraintViolation(_)) => {
                // 并发创建: 以已存在的为准
                tracing::debug!(pot_id = %pot.pot_id, "容量池已存在, 重新读取");
                self.pot_repo
                    .find_by_id(&pot.pot_id)?
                    .ok_or_else(|| EngineError::not_found("CapacityPot", &pot.pot_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// 查找链上最近的前驱与后继
    ///
    /// 先沿时间窗序列双向各走一周; 只找到一侧时借用该侧的指针补全另一侧;
    /// 都找不到时在同链全部容量池中按时间序号定位
    fn nearest_neighbours(&self, key: &PotKey) -> EngineResult<(Option<String>, Option<String>)> {
        let mut predecessor: Option<CapacityPot> = None;
        let mut cursor = key.predecessor();
        for _ in 0..NEIGHBOUR_SCAN_STEPS {
            let Some(k) = cursor else { break };
            if let Some(pot) = self.pot_repo.find_by_id(&k.pot_id())? {
                predecessor = Some(pot);
                break;
            }
            cursor = k.predecessor();
        }

        let mut successor: Option<CapacityPot> = None;
        let mut k = key.successor();
        for _ in 0..NEIGHBOUR_SCAN_STEPS {
            if let Some(pot) = self.pot_repo.find_by_id(&k.pot_id())? {
                successor = Some(pot);
                break;
            }
            k = k.successor();
        }

        match (predecessor, successor) {
            (Some(p), Some(s)) => Ok((Some(p.pot_id), Some(s.pot_id))),
            (Some(p), None) => {
                let succ = p.successor_id.clone();
                Ok((Some(p.pot_id), succ))
            }
            (None, Some(s)) => {
                let pred = s.predecessor_id.clone();
                Ok((pred, Some(s.pot_id)))
            }
            (None, None) => self.scan_chain(key),
        }
    }

    fn scan_chain(&self, key: &PotKey) -> EngineResult<(Option<String>, Option<String>)> {
        let filter = PotFilter {
            section: Some(key.section.clone()),
            traffic_type: Some(key.traffic_type.clone()),
            traffic_day_group: Some(key.traffic_day_group),
            ..Default::default()
        };
        let target = ordinal(key);
        let mut best_pred: Option<(i64, String)> = None;
        let mut best_succ: Option<(i64, String)> = None;

        let mut offset = 0;
        loop {
            let page = self.pot_repo.query(&filter, PageRequest::new(offset, 500))?;
            for pot in &page.items {
                let ord = ordinal(&pot.key());
                if ord < target && best_pred.as_ref().map_or(true, |(o, _)| ord > *o) {
                    best_pred = Some((ord, pot.pot_id.clone()));
                }
                if ord > target && best_succ.as_ref().map_or(true, |(o, _)| ord < *o) {
                    best_succ = Some((ord, pot.pot_id.clone()));
                }
            }
            if !page.has_more() {
                break;
            }
            offset += page.items.len();
        }

        Ok((best_pred.map(|(_, id)| id), best_succ.map(|(_, id)| id)))
    }

    // ==========================================
    // 成员维护
    // ==========================================

    pub fn add_slot(&self, pot_id: &str, slot_id: &str) -> EngineResult<CapacityPot> {
        Ok(self.pot_repo.modify(pot_id, |pot| {
            pot.add_slot(slot_id);
            Ok(pot.clone())
        })?)
    }

    pub fn add_request(&self, pot_id: &str, request_id: &str) -> EngineResult<CapacityPot> {
        Ok(self.pot_repo.modify(pot_id, |pot| {
            pot.add_request(request_id);
            Ok(pot.clone())
        })?)
    }

    /// 移除槽位; 容量池变空时删除并解链
    pub fn remove_slot(&self, pot_id: &str, slot_id: &str) -> EngineResult<()> {
        let empty = self.pot_repo.modify(pot_id, |pot| {
            pot.remove_slot(slot_id);
            Ok(pot.is_empty())
        })?;
        if empty {
            self.pot_repo.delete_and_unlink(pot_id)?;
            tracing::info!(pot_id = %pot_id, "容量池已空, 删除");
        }
        Ok(())
    }

    /// 移除申请; 容量池变空时删除并解链
    pub fn remove_request(&self, pot_id: &str, request_id: &str) -> EngineResult<()> {
        let empty = self.pot_repo.modify(pot_id, |pot| {
            pot.remove_request(request_id);
            Ok(pot.is_empty())
        })?;
        if empty {
            self.pot_repo.delete_and_unlink(pot_id)?;
            tracing::info!(pot_id = %pot_id, "容量池已空, 删除");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use std::sync::Mutex;

    fn service() -> (PotAssignmentService, Arc<CapacityPotRepository>) {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        let repo = Arc::new(CapacityPotRepository::new(Arc::new(Mutex::new(conn))));
        (PotAssignmentService::new(repo.clone()), repo)
    }

    fn w(hour: u32) -> TimeWindow {
        TimeWindow::from_hour(hour)
    }

    #[test]
    fn test_find_or_create_prefers_exact_then_all() {
        let (svc, _) = service();
        let all = svc
            .find_or_create("A-B", TRAFFIC_TYPE_ALL, 2, TrafficDayGroup::MoFr, w(8))
            .unwrap();
        let sgv = svc
            .find_or_create("A-B", "SGV", 2, TrafficDayGroup::MoFr, w(8))
            .unwrap();
        assert_eq!(sgv.pot_id, all.pot_id);

        let other = svc
            .find_or_create("A-B", "SGV", 2, TrafficDayGroup::MoFr, w(10))
            .unwrap();
        assert_eq!(other.traffic_type, "SGV");
    }

    #[test]
    fn test_chain_links_across_week_boundary() {
        let (svc, repo) = service();
        let late = svc
            .find_or_create("A-B", "SGV", 2, TrafficDayGroup::MoFr, w(23))
            .unwrap();
        let early = svc
            .find_or_create("A-B", "SGV", 3, TrafficDayGroup::MoFr, w(1))
            .unwrap();

        let late = repo.find_by_id(&late.pot_id).unwrap().unwrap();
        assert_eq!(late.successor_id.as_deref(), Some(early.pot_id.as_str()));
        assert_eq!(early.predecessor_id.as_deref(), Some(late.pot_id.as_str()));
    }

    #[test]
    fn test_insert_in_middle_keeps_links_reciprocal() {
        let (svc, repo) = service();
        let a = svc.find_or_create("A-B", "SGV", 2, TrafficDayGroup::MoFr, w(1)).unwrap();
        // 相隔两周以上: 需要整链扫描
        let c = svc.find_or_create("A-B", "SGV", 5, TrafficDayGroup::MoFr, w(1)).unwrap();
        let b = svc.find_or_create("A-B", "SGV", 3, TrafficDayGroup::MoFr, w(9)).unwrap();

        let a = repo.find_by_id(&a.pot_id).unwrap().unwrap();
        let b = repo.find_by_id(&b.pot_id).unwrap().unwrap();
        let c = repo.find_by_id(&c.pot_id).unwrap().unwrap();
        assert_eq!(a.successor_id.as_deref(), Some(b.pot_id.as_str()));
        assert_eq!(b.predecessor_id.as_deref(), Some(a.pot_id.as_str()));
        assert_eq!(b.successor_id.as_deref(), Some(c.pot_id.as_str()));
        assert_eq!(c.predecessor_id.as_deref(), Some(b.pot_id.as_str()));

        // 其他分组不在同一条链上
        let weekend = svc.find_or_create("A-B", "SGV", 3, TrafficDayGroup::SaSo, w(9)).unwrap();
        assert!(weekend.predecessor_id.is_none());
        assert!(weekend.successor_id.is_none());
    }

    #[test]
    fn test_remove_last_slot_deletes_and_unlinks() {
        let (svc, repo) = service();
        let a = svc.find_or_create("A-B", "SGV", 2, TrafficDayGroup::MoFr, w(1)).unwrap();
        let b = svc.find_or_create("A-B", "SGV", 2, TrafficDayGroup::MoFr, w(3)).unwrap();
        let c = svc.find_or_create("A-B", "SGV", 2, TrafficDayGroup::MoFr, w(5)).unwrap();
        svc.add_slot(&b.pot_id, "S1").unwrap();
        assert_eq!(repo.find_by_id(&b.pot_id).unwrap().unwrap().slot_ids.len(), 1);

        svc.remove_slot(&b.pot_id, "S1").unwrap();
        assert!(repo.find_by_id(&b.pot_id).unwrap().is_none());
        let a = repo.find_by_id(&a.pot_id).unwrap().unwrap();
        let c = repo.find_by_id(&c.pot_id).unwrap().unwrap();
        assert_eq!(a.successor_id.as_deref(), Some(c.pot_id.as_str()));
        assert_eq!(c.predecessor_id.as_deref(), Some(a.pot_id.as_str()));
    }
}
