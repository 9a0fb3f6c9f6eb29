// ==========================================
// 引擎层单元测试夹具 (内存数据库)
// ==========================================

use crate::domain::request::{DesiredLeg, Request};
use crate::domain::slot::SlotKind;
use crate::domain::types::{LegKind, TrafficDayGroup};
use crate::engine::conflict_detector::ConflictDetector;
use crate::engine::conflict_resolver::ConflictResolver;
use crate::engine::group_reset::GroupResetService;
use crate::engine::repositories::AllocationRepositories;
use crate::engine::request_service::{RequestDraft, RequestService};
use crate::engine::slot_catalog::{SlotCatalog, SlotDefinition};
use chrono::{NaiveDate, NaiveTime};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

pub(crate) struct Fixture {
    pub repos: AllocationRepositories,
    pub catalog: SlotCatalog,
    pub requests: RequestService,
    pub detector: ConflictDetector,
    pub resolver: ConflictResolver,
    pub reset: GroupResetService,
}

pub(crate) fn fixture() -> Fixture {
    let conn = Connection::open_in_memory().unwrap();
    crate::db::init_schema(&conn).unwrap();
    let repos = AllocationRepositories::from_connection(Arc::new(Mutex::new(conn)));
    Fixture {
        catalog: SlotCatalog::new(repos.clone()),
        requests: RequestService::new(repos.clone()),
        detector: ConflictDetector::with_page_size(repos.clone(), 2),
        resolver: ConflictResolver::new(repos.clone()),
        reset: GroupResetService::new(repos.clone()),
        repos,
    }
}

pub(crate) fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

impl Fixture {
    /// A → B, KW2 Mo-Fr, 08:mm 出发
    pub fn slot(&self, minute: u32) -> String {
        self.catalog
            .create_slot(
                SlotDefinition {
                    from: "A".to_string(),
                    to: "B".to_string(),
                    section: "A-B".to_string(),
                    week: 2,
                    traffic_day_group: TrafficDayGroup::MoFr,
                    traffic_type: Some("SPFV".to_string()),
                    kind: SlotKind::Tag {
                        departure: t(8, minute),
                        arrival: t(9, minute),
                    },
                    base_fee: 100,
                },
                "planner",
            )
            .unwrap()
            .slot_id
    }

    /// 2025-01-06 .. 2025-01-10 (KW2 Mo-Fr) 的单区段申请
    pub fn submit(&self, id: &str, minute: u32) -> Request {
        self.requests
            .submit(
                RequestDraft {
                    request_id: Some(id.to_string()),
                    operator: format!("EVU-{}", id),
                    traffic_type: "SPFV".to_string(),
                    traffic_day_group: TrafficDayGroup::MoFr,
                    valid_from: NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(),
                    valid_to: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
                    legs: vec![DesiredLeg {
                        from: "A".to_string(),
                        to: "B".to_string(),
                        section: "A-B".to_string(),
                        departure: t(8, minute),
                        arrival: t(9, minute),
                        kind: LegKind::Tag,
                    }],
                },
                "op",
            )
            .unwrap()
    }

    pub fn set_fee(&self, id: &str, fee: i64) {
        self.repos
            .request_repo
            .modify(id, |r| {
                r.total_fee = fee;
                Ok(())
            })
            .unwrap();
    }

    pub fn request(&self, id: &str) -> Request {
        self.repos.request_repo.find_by_id(id).unwrap().unwrap()
    }
}
