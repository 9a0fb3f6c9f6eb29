// ==========================================
// 铁路容量分配系统 - 容量池领域模型 (Kapazitätstopf)
// ==========================================
// 红线: max_kapazitaet 永远由槽位数派生, 不单独赋值
// 红线: 前驱/后继指针始终互相对应
// ==========================================

use crate::domain::types::{TimeWindow, TrafficDayGroup};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// 容量比例 (70%), 以整数运算避免浮点误差
const CAPACITY_RATIO_NUMERATOR: usize = 7;
const CAPACITY_RATIO_DENOMINATOR: usize = 10;

/// floor(0.7 × 槽位数)
pub fn derive_max_capacity(slot_count: usize) -> usize {
    slot_count * CAPACITY_RATIO_NUMERATOR / CAPACITY_RATIO_DENOMINATOR
}

/// 区段名规范化: 大写, 空白 → "-", 去掉 [A-Za-z0-9_-] 之外的字符
pub fn sanitize_section(section: &str) -> String {
    section
        .trim()
        .to_uppercase()
        .chars()
        .map(|c| if c.is_whitespace() { '-' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

// ==========================================
// PotKey - 容量池复合键
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PotKey {
    pub section: String,
    pub traffic_type: String,
    pub week: u32,
    pub traffic_day_group: TrafficDayGroup,
    pub time_window: TimeWindow,
}

impl PotKey {
    /// KT-<SECTION>-KW<week>-<trafficType>-<tdg>-ZF<window>
    pub fn pot_id(&self) -> String {
        format!(
            "KT-{}-KW{}-{}-{}-ZF{}",
            sanitize_section(&self.section),
            self.week,
            self.traffic_type,
            self.traffic_day_group.id_fragment(),
            self.time_window.id_fragment()
        )
    }

    pub fn with_traffic_type(&self, traffic_type: &str) -> PotKey {
        PotKey {
            traffic_type: traffic_type.to_string(),
            ..self.clone()
        }
    }

    /// 时间窗序列中的后继键 (跨周)
    pub fn successor(&self) -> PotKey {
        let (window, week_delta) = self.time_window.next();
        PotKey {
            week: (self.week as i64 + week_delta) as u32,
            time_window: window,
            ..self.clone()
        }
    }

    /// 前驱键; 第 1 周之前不存在, 返回 None
    pub fn predecessor(&self) -> Option<PotKey> {
        let (window, week_delta) = self.time_window.prev();
        let week = self.week as i64 + week_delta;
        if week < 1 {
            return None;
        }
        Some(PotKey {
            week: week as u32,
            time_window: window,
            ..self.clone()
        })
    }
}

// ==========================================
// CapacityPot - 容量池
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityPot {
    pub pot_id: String,
    pub section: String,
    pub traffic_type: String,
    pub week: u32,
    pub traffic_day_group: TrafficDayGroup,
    pub time_window: TimeWindow,

    // ===== 成员 =====
    pub slot_ids: Vec<String>,
    pub request_ids: Vec<String>,

    // ===== 时间链 =====
    pub predecessor_id: Option<String>,
    pub successor_id: Option<String>,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl CapacityPot {
    pub fn new(key: &PotKey, now: NaiveDateTime) -> Self {
        Self {
            pot_id: key.pot_id(),
            section: key.section.clone(),
            traffic_type: key.traffic_type.clone(),
            week: key.week,
            traffic_day_group: key.traffic_day_group,
            time_window: key.time_window,
            slot_ids: Vec::new(),
            request_ids: Vec::new(),
            predecessor_id: None,
            successor_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> PotKey {
        PotKey {
            section: self.section.clone(),
            traffic_type: self.traffic_type.clone(),
            week: self.week,
            traffic_day_group: self.traffic_day_group,
            time_window: self.time_window,
        }
    }

    /// maxKapazitaet = floor(0.7 × |slots|)
    pub fn max_kapazitaet(&self) -> usize {
        derive_max_capacity(self.slot_ids.len())
    }

    pub fn add_slot(&mut self, slot_id: &str) -> bool {
        push_unique(&mut self.slot_ids, slot_id)
    }

    pub fn remove_slot(&mut self, slot_id: &str) -> bool {
        remove_value(&mut self.slot_ids, slot_id)
    }

    pub fn add_request(&mut self, request_id: &str) -> bool {
        push_unique(&mut self.request_ids, request_id)
    }

    pub fn remove_request(&mut self, request_id: &str) -> bool {
        remove_value(&mut self.request_ids, request_id)
    }

    /// 无槽位、无申请, 可删除
    pub fn is_empty(&self) -> bool {
        self.slot_ids.is_empty() && self.request_ids.is_empty()
    }
}

pub(crate) fn push_unique(list: &mut Vec<String>, value: &str) -> bool {
    if list.iter().any(|v| v == value) {
        return false;
    }
    list.push(value.to_string());
    true
}

pub(crate) fn remove_value(list: &mut Vec<String>, value: &str) -> bool {
    let before = list.len();
    list.retain(|v| v != value);
    before != list.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn key() -> PotKey {
        PotKey {
            section: "Mannheim Frankfurt!".to_string(),
            traffic_type: "SPFV".to_string(),
            week: 3,
            traffic_day_group: TrafficDayGroup::SaSo,
            time_window: TimeWindow::from_hour(23),
        }
    }

    #[test]
    fn test_pot_id_format() {
        assert_eq!(key().pot_id(), "KT-MANNHEIM-FRANKFURT-KW3-SPFV-SauSo-ZF2301");
    }

    #[test]
    fn test_max_capacity_follows_membership() {
        let mut pot = CapacityPot::new(&key(), Utc::now().naive_utc());
        assert_eq!(pot.max_kapazitaet(), 0);
        for i in 0..10 {
            pot.add_slot(&format!("S{}", i));
            assert_eq!(pot.max_kapazitaet(), (i + 1) * 7 / 10);
        }
        assert_eq!(pot.max_kapazitaet(), 7);
        assert!(!pot.add_slot("S0"));
        pot.remove_slot("S0");
        assert_eq!(pot.max_kapazitaet(), 6);
    }

    #[test]
    fn test_key_neighbours_cross_week() {
        let k = key();
        let succ = k.successor();
        assert_eq!(succ.week, 4);
        assert_eq!(succ.time_window.label(), "01-03");
        assert_eq!(succ.predecessor().unwrap(), k);

        let first_week = PotKey {
            week: 1,
            time_window: TimeWindow::from_hour(1),
            ..k
        };
        assert!(first_week.predecessor().is_none());
    }
}
