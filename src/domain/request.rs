// ==========================================
// 铁路容量分配系统 - 申请领域模型 (Anfrage)
// ==========================================
// 红线: status 由分配状态派生, 不直接赋值 (外部状态除外)
// ==========================================

use crate::domain::types::{AssignmentStatus, LegKind, OverallStatus, TrafficDayGroup};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

// ==========================================
// DesiredLeg - 期望区段
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredLeg {
    pub from: String,
    pub to: String,
    pub section: String,
    pub departure: NaiveTime,
    pub arrival: NaiveTime,
    pub kind: LegKind,
}

// ==========================================
// SlotAssignment - 单个槽位上的分配
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotAssignment {
    pub slot_id: String,
    pub pot_id: String,
    pub leg_index: usize,
    pub week: u32,
    pub traffic_day_group: TrafficDayGroup,

    // ===== 两层独立状态 =====
    pub pot_status: AssignmentStatus,
    pub slot_status: AssignmentStatus,

    // ===== 冲突回指 =====
    pub pot_conflict_id: Option<String>,
    pub slot_conflict_id: Option<String>,
}

impl SlotAssignment {
    pub fn new(
        slot_id: String,
        pot_id: String,
        leg_index: usize,
        week: u32,
        traffic_day_group: TrafficDayGroup,
    ) -> Self {
        Self {
            slot_id,
            pot_id,
            leg_index,
            week,
            traffic_day_group,
            pot_status: AssignmentStatus::Initial,
            slot_status: AssignmentStatus::Initial,
            pot_conflict_id: None,
            slot_conflict_id: None,
        }
    }

    /// 槽位层是否已有结论 (容量池层已拒绝视为槽位层终结)
    pub fn slot_settled(&self) -> bool {
        self.slot_status.is_decided() || self.pot_status.is_rejected()
    }

    /// 最终是否获得该槽位
    pub fn finally_confirmed(&self) -> bool {
        self.pot_status.is_confirmed() && self.slot_status.is_confirmed()
    }
}

// ==========================================
// Request - 运营商申请
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub request_id: String,
    pub operator: String,
    pub traffic_type: String,
    pub traffic_day_group: TrafficDayGroup,
    pub valid_from: NaiveDate,
    pub valid_to: NaiveDate,
    pub legs: Vec<DesiredLeg>,
    pub total_fee: i64,

    pub assignments: Vec<SlotAssignment>,
    pub status: OverallStatus,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Request {
    pub fn assignments_in_pot<'a>(
        &'a self,
        pot_id: &'a str,
    ) -> impl Iterator<Item = &'a SlotAssignment> + 'a {
        self.assignments.iter().filter(move |a| a.pot_id == pot_id)
    }

    pub fn assignments_on_slot<'a>(
        &'a self,
        slot_id: &'a str,
    ) -> impl Iterator<Item = &'a SlotAssignment> + 'a {
        self.assignments.iter().filter(move |a| a.slot_id == slot_id)
    }

    /// 申请是否仍参与分配
    pub fn is_active(&self) -> bool {
        !self.status.is_external()
    }

    pub fn distinct_slot_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.assignments.iter().map(|a| a.slot_id.clone()).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn distinct_pot_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.assignments.iter().map(|a| a.pot_id.clone()).collect();
        ids.sort();
        ids.dedup();
        ids
    }
}
