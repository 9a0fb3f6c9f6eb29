// ==========================================
// 铁路容量分配系统 - 槽位模板领域模型 (Slot)
// ==========================================
// 日间槽位: 精确发到时刻, 明确交通类型
// 夜间槽位: 时间窗 + 允许运行时间范围, 交通类型默认 ALL
// 父槽位可带备选 (子) 槽位; 只有父槽位计入容量池
// ==========================================

use crate::domain::capacity::{push_unique, remove_value, sanitize_section};
use crate::domain::types::{TimeWindow, TrafficDayGroup};
use chrono::{NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

// ==========================================
// SlotKind - 槽位种类
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotKind {
    Tag {
        departure: NaiveTime,
        arrival: NaiveTime,
    },
    Nacht {
        time_window: TimeWindow,
        min_travel_minutes: u32,
        max_travel_minutes: u32,
    },
}

impl SlotKind {
    /// 所属时间窗
    pub fn time_window(&self) -> TimeWindow {
        match self {
            SlotKind::Tag { departure, .. } => TimeWindow::from_hour(departure.hour()),
            SlotKind::Nacht { time_window, .. } => *time_window,
        }
    }

    /// 槽位ID中的 HHMM (夜间槽位取窗口起点)
    pub fn hhmm(&self) -> String {
        match self {
            SlotKind::Tag { departure, .. } => departure.format("%H%M").to_string(),
            SlotKind::Nacht { time_window, .. } => format!("{:02}00", time_window.start_hour()),
        }
    }

    pub fn is_night(&self) -> bool {
        matches!(self, SlotKind::Nacht { .. })
    }
}

/// 槽位ID中的站点片段: 空白 → "-", 去掉非法字符 (不改大小写)
fn sanitize_location(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|c| if c.is_whitespace() { '-' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// SLOT_<from>_<to>_KW<week>_<tdg>_<HHMM>_<trafficType>
pub fn build_slot_id(
    from: &str,
    to: &str,
    week: u32,
    traffic_day_group: TrafficDayGroup,
    hhmm: &str,
    traffic_type: &str,
) -> String {
    format!(
        "SLOT_{}_{}_KW{}_{}_{}_{}",
        sanitize_location(from),
        sanitize_location(to),
        week,
        traffic_day_group.to_db_str(),
        hhmm,
        traffic_type
    )
}

// ==========================================
// SlotPattern - 槽位模板
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotPattern {
    pub slot_id: String,
    pub kind: SlotKind,
    pub section: String,
    pub from: String,
    pub to: String,
    pub week: u32,
    pub traffic_day_group: TrafficDayGroup,
    pub traffic_type: String,

    pub pot_id: Option<String>,
    pub base_fee: i64,

    // ===== 父/备选 =====
    pub parent_slot_id: Option<String>,
    pub alternative_ids: Vec<String>,

    pub request_ids: Vec<String>,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl SlotPattern {
    /// 由定义属性推导的ID (父槽位)
    pub fn derived_id(&self) -> String {
        build_slot_id(
            &self.from,
            &self.to,
            self.week,
            self.traffic_day_group,
            &self.kind.hhmm(),
            &self.traffic_type,
        )
    }

    pub fn alternative_id(parent_id: &str, index: usize) -> String {
        format!("{}_ALT{}", parent_id, index)
    }

    pub fn time_window(&self) -> TimeWindow {
        self.kind.time_window()
    }

    pub fn is_alternative(&self) -> bool {
        self.parent_slot_id.is_some()
    }

    /// 区段的规范化形式 (与容量池键一致)
    pub fn normalized_section(&self) -> String {
        sanitize_section(&self.section)
    }

    /// 夜间槽位: 运行时间是否在允许范围内; 日间槽位恒为 true
    pub fn admits_travel_minutes(&self, minutes: u32) -> bool {
        match &self.kind {
            SlotKind::Tag { .. } => true,
            SlotKind::Nacht {
                min_travel_minutes,
                max_travel_minutes,
                ..
            } => minutes >= *min_travel_minutes && minutes <= *max_travel_minutes,
        }
    }

    pub fn add_request(&mut self, request_id: &str) -> bool {
        push_unique(&mut self.request_ids, request_id)
    }

    pub fn remove_request(&mut self, request_id: &str) -> bool {
        remove_value(&mut self.request_ids, request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_id_format() {
        let id = build_slot_id("Mannheim Hbf", "Frankfurt", 12, TrafficDayGroup::SaSo, "0815", "SPFV");
        assert_eq!(id, "SLOT_Mannheim-Hbf_Frankfurt_KW12_Sa+So_0815_SPFV");
    }

    #[test]
    fn test_night_hhmm_uses_window_start() {
        let kind = SlotKind::Nacht {
            time_window: TimeWindow::from_hour(0),
            min_travel_minutes: 60,
            max_travel_minutes: 120,
        };
        assert_eq!(kind.hhmm(), "2300");
        assert_eq!(kind.time_window().label(), "23-01");
    }

    #[test]
    fn test_day_kind_window_from_departure() {
        let kind = SlotKind::Tag {
            departure: NaiveTime::from_hms_opt(14, 5, 0).unwrap(),
            arrival: NaiveTime::from_hms_opt(15, 0, 0).unwrap(),
        };
        assert_eq!(kind.time_window().label(), "13-15");
        assert_eq!(kind.hhmm(), "1405");
    }
}
