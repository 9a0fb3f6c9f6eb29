// ==========================================
// 铁路容量分配系统 - 领域类型定义
// ==========================================
// 职责: 交通日分组、时间窗、细粒度/粗粒度状态、冲突状态
// 序列化格式: 与数据库存储值一致 (德语业务值)
// ==========================================

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 交通类型通配值: 不区分交通类型的容量池/夜间槽位
pub const TRAFFIC_TYPE_ALL: &str = "ALL";

// ==========================================
// 交通日分组 (Verkehrstage)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TrafficDayGroup {
    #[serde(rename = "Mo-Fr")]
    MoFr, // 工作日
    #[serde(rename = "Sa+So")]
    SaSo, // 周末
    #[serde(rename = "taeglich")]
    Daily, // 每日 (仅申请使用, 展开为 Mo-Fr + Sa+So)
}

impl fmt::Display for TrafficDayGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl TrafficDayGroup {
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.trim() {
            "Mo-Fr" => Some(TrafficDayGroup::MoFr),
            "Sa+So" => Some(TrafficDayGroup::SaSo),
            "taeglich" | "täglich" => Some(TrafficDayGroup::Daily),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            TrafficDayGroup::MoFr => "Mo-Fr",
            TrafficDayGroup::SaSo => "Sa+So",
            TrafficDayGroup::Daily => "taeglich",
        }
    }

    /// 容量池ID中的片段 ("+" → "u")
    pub fn id_fragment(&self) -> String {
        self.to_db_str().replace('+', "u")
    }

    /// 日期是否属于该分组
    pub fn matches(&self, date: NaiveDate) -> bool {
        let weekend = matches!(date.weekday(), Weekday::Sat | Weekday::Sun);
        match self {
            TrafficDayGroup::MoFr => !weekend,
            TrafficDayGroup::SaSo => weekend,
            TrafficDayGroup::Daily => true,
        }
    }

    /// 展开为槽位层面的具体分组
    pub fn expand(&self) -> Vec<TrafficDayGroup> {
        match self {
            TrafficDayGroup::Daily => vec![TrafficDayGroup::MoFr, TrafficDayGroup::SaSo],
            other => vec![*other],
        }
    }

    /// 相邻分组 (跨零点时使用)
    pub fn other(&self) -> Option<TrafficDayGroup> {
        match self {
            TrafficDayGroup::MoFr => Some(TrafficDayGroup::SaSo),
            TrafficDayGroup::SaSo => Some(TrafficDayGroup::MoFr),
            TrafficDayGroup::Daily => None,
        }
    }
}

// ==========================================
// 时间窗 (Zeitfenster)
// ==========================================
// 12 个固定的两小时窗口, 顺序从 "01-03" 到 "23-01"
// 该表编码在容量池ID中, 修改需要数据迁移
pub const TIME_WINDOWS: [&str; 12] = [
    "01-03", "03-05", "05-07", "07-09", "09-11", "11-13", "13-15", "15-17", "17-19", "19-21",
    "21-23", "23-01",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeWindow(usize);

impl TimeWindow {
    pub const COUNT: usize = TIME_WINDOWS.len();

    /// 小时 → 时间窗 (23 点与 0 点都落在 "23-01")
    pub fn from_hour(hour: u32) -> Self {
        match hour % 24 {
            23 | 0 => TimeWindow(11),
            h => TimeWindow(((h - 1) / 2) as usize),
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        TIME_WINDOWS
            .iter()
            .position(|w| *w == label.trim())
            .map(TimeWindow)
    }

    pub fn index(&self) -> usize {
        self.0
    }

    pub fn label(&self) -> &'static str {
        TIME_WINDOWS[self.0]
    }

    /// 去掉连字符的ID片段, 例如 "2301"
    pub fn id_fragment(&self) -> String {
        self.label().replace('-', "")
    }

    /// 窗口起始小时
    pub fn start_hour(&self) -> u32 {
        (self.0 as u32 * 2 + 1) % 24
    }

    /// 后继窗口及周偏移 ("23-01" → 下周 "01-03")
    pub fn next(&self) -> (TimeWindow, i64) {
        if self.0 + 1 == Self::COUNT {
            (TimeWindow(0), 1)
        } else {
            (TimeWindow(self.0 + 1), 0)
        }
    }

    /// 前驱窗口及周偏移 ("01-03" → 上周 "23-01")
    pub fn prev(&self) -> (TimeWindow, i64) {
        if self.0 == 0 {
            (TimeWindow(Self::COUNT - 1), -1)
        } else {
            (TimeWindow(self.0 - 1), 0)
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl Serialize for TimeWindow {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for TimeWindow {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        TimeWindow::from_label(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown time window: {}", raw)))
    }
}

// ==========================================
// 线路段类型 (Tag / Nacht)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LegKind {
    Tag,   // 日间: 精确时刻
    Nacht, // 夜间: 时间窗 + 运行时间范围
}

impl LegKind {
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "TAG" => Some(LegKind::Tag),
            "NACHT" => Some(LegKind::Nacht),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            LegKind::Tag => "TAG",
            LegKind::Nacht => "NACHT",
        }
    }
}

// ==========================================
// 分配状态 (细粒度, 每个匹配槽位一份, 容量池层/槽位层各一个)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssignmentStatus {
    #[serde(rename = "vorlaeufig")]
    Initial,
    #[serde(rename = "wartet_konflikt")]
    Waiting,
    #[serde(rename = "in_hoechstpreisverfahren")]
    InAuction,
    #[serde(rename = "bestaetigt")]
    Confirmed,
    #[serde(rename = "bestaetigt_verzicht")]
    ConfirmedWaiver,
    #[serde(rename = "bestaetigt_entgelt")]
    ConfirmedFee,
    #[serde(rename = "bestaetigt_hoechstpreis")]
    ConfirmedAuction,
    #[serde(rename = "abgelehnt_verzicht")]
    RejectedWaiver,
    #[serde(rename = "abgelehnt_entgelt")]
    RejectedFee,
    #[serde(rename = "abgelehnt_hoechstpreis")]
    RejectedAuction,
    #[serde(rename = "abgelehnt_ungueltiges_gebot")]
    RejectedInvalidBid,
    #[serde(rename = "abgelehnt_kein_gebot")]
    RejectedNoBid,
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl AssignmentStatus {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Initial => "vorlaeufig",
            AssignmentStatus::Waiting => "wartet_konflikt",
            AssignmentStatus::InAuction => "in_hoechstpreisverfahren",
            AssignmentStatus::Confirmed => "bestaetigt",
            AssignmentStatus::ConfirmedWaiver => "bestaetigt_verzicht",
            AssignmentStatus::ConfirmedFee => "bestaetigt_entgelt",
            AssignmentStatus::ConfirmedAuction => "bestaetigt_hoechstpreis",
            AssignmentStatus::RejectedWaiver => "abgelehnt_verzicht",
            AssignmentStatus::RejectedFee => "abgelehnt_entgelt",
            AssignmentStatus::RejectedAuction => "abgelehnt_hoechstpreis",
            AssignmentStatus::RejectedInvalidBid => "abgelehnt_ungueltiges_gebot",
            AssignmentStatus::RejectedNoBid => "abgelehnt_kein_gebot",
        }
    }

    /// 冲突中尚未决定
    pub fn is_open(&self) -> bool {
        matches!(self, AssignmentStatus::Waiting | AssignmentStatus::InAuction)
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(
            self,
            AssignmentStatus::Confirmed
                | AssignmentStatus::ConfirmedWaiver
                | AssignmentStatus::ConfirmedFee
                | AssignmentStatus::ConfirmedAuction
        )
    }

    pub fn is_rejected(&self) -> bool {
        matches!(
            self,
            AssignmentStatus::RejectedWaiver
                | AssignmentStatus::RejectedFee
                | AssignmentStatus::RejectedAuction
                | AssignmentStatus::RejectedInvalidBid
                | AssignmentStatus::RejectedNoBid
        )
    }

    pub fn is_decided(&self) -> bool {
        self.is_confirmed() || self.is_rejected()
    }

    /// 状态迁移表
    ///
    /// - 任意状态可回退到 Initial (组重置)
    /// - 已确认可重新进入冲突 (冲突重开/新申请加入)
    /// - 最高价阶段中成员变化时回到等待, 冲突消失时直接确认
    /// - 已拒绝为终态
    pub fn can_transition_to(&self, next: AssignmentStatus) -> bool {
        use AssignmentStatus::*;
        if next == Initial {
            return true;
        }
        match self {
            Initial => matches!(next, Waiting | Confirmed),
            Waiting => matches!(
                next,
                Waiting
                    | InAuction
                    | Confirmed
                    | ConfirmedWaiver
                    | ConfirmedFee
                    | RejectedWaiver
                    | RejectedFee
            ),
            InAuction => matches!(
                next,
                Waiting
                    | InAuction
                    | Confirmed
                    | ConfirmedAuction
                    | RejectedAuction
                    | RejectedInvalidBid
                    | RejectedNoBid
            ),
            Confirmed | ConfirmedWaiver | ConfirmedFee | ConfirmedAuction => {
                matches!(next, Waiting) || next == *self
            }
            RejectedWaiver | RejectedFee | RejectedAuction | RejectedInvalidBid | RejectedNoBid => {
                next == *self
            }
        }
    }
}

// ==========================================
// 申请总体状态 (粗粒度, 由细粒度状态派生)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OverallStatus {
    #[serde(rename = "in_konfliktpruefung")]
    InConflictCheck,
    #[serde(rename = "in_konflikt_topf")]
    InPotConflict,
    #[serde(rename = "in_konflikt_slot")]
    InSlotConflict,
    #[serde(rename = "topf_bestaetigt")]
    PotConfirmed,
    #[serde(rename = "topf_teilweise_bestaetigt")]
    PotPartiallyConfirmed,
    #[serde(rename = "topf_abgelehnt")]
    PotRejected,
    #[serde(rename = "final_bestaetigt")]
    FinalConfirmed,
    #[serde(rename = "final_teilweise_bestaetigt")]
    FinalPartiallyConfirmed,
    #[serde(rename = "final_abgelehnt")]
    FinalRejected,
    #[serde(rename = "zurueckgezogen")]
    Withdrawn,
    #[serde(rename = "ungueltig")]
    Invalidated,
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl OverallStatus {
    pub fn from_db_str(s: &str) -> Option<Self> {
        let all = [
            OverallStatus::InConflictCheck,
            OverallStatus::InPotConflict,
            OverallStatus::InSlotConflict,
            OverallStatus::PotConfirmed,
            OverallStatus::PotPartiallyConfirmed,
            OverallStatus::PotRejected,
            OverallStatus::FinalConfirmed,
            OverallStatus::FinalPartiallyConfirmed,
            OverallStatus::FinalRejected,
            OverallStatus::Withdrawn,
            OverallStatus::Invalidated,
        ];
        all.into_iter().find(|st| st.to_db_str() == s.trim())
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            OverallStatus::InConflictCheck => "in_konfliktpruefung",
            OverallStatus::InPotConflict => "in_konflikt_topf",
            OverallStatus::InSlotConflict => "in_konflikt_slot",
            OverallStatus::PotConfirmed => "topf_bestaetigt",
            OverallStatus::PotPartiallyConfirmed => "topf_teilweise_bestaetigt",
            OverallStatus::PotRejected => "topf_abgelehnt",
            OverallStatus::FinalConfirmed => "final_bestaetigt",
            OverallStatus::FinalPartiallyConfirmed => "final_teilweise_bestaetigt",
            OverallStatus::FinalRejected => "final_abgelehnt",
            OverallStatus::Withdrawn => "zurueckgezogen",
            OverallStatus::Invalidated => "ungueltig",
        }
    }

    /// 外部设置的状态, 派生时不可覆盖
    pub fn is_external(&self) -> bool {
        matches!(self, OverallStatus::Withdrawn | OverallStatus::Invalidated)
    }
}

// ==========================================
// 冲突记录状态
// ==========================================
// 顺序: offen → in_bearbeitung_entgelt → in_bearbeitung_hoechstpreis → geloest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictStatus {
    #[serde(rename = "offen")]
    Open,
    #[serde(rename = "in_bearbeitung_entgelt")]
    FeePhase,
    #[serde(rename = "in_bearbeitung_hoechstpreis")]
    AuctionPhase,
    #[serde(rename = "geloest")]
    Resolved,
}

impl fmt::Display for ConflictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl ConflictStatus {
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.trim() {
            "offen" => Some(ConflictStatus::Open),
            "in_bearbeitung_entgelt" => Some(ConflictStatus::FeePhase),
            "in_bearbeitung_hoechstpreis" => Some(ConflictStatus::AuctionPhase),
            "geloest" => Some(ConflictStatus::Resolved),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            ConflictStatus::Open => "offen",
            ConflictStatus::FeePhase => "in_bearbeitung_entgelt",
            ConflictStatus::AuctionPhase => "in_bearbeitung_hoechstpreis",
            ConflictStatus::Resolved => "geloest",
        }
    }
}

// ==========================================
// 冲突类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictType {
    Kapazitaetstopf, // 容量池层
    Slot,            // 槽位层
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl ConflictType {
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "KAPAZITAETSTOPF" => Some(ConflictType::Kapazitaetstopf),
            "SLOT" => Some(ConflictType::Slot),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            ConflictType::Kapazitaetstopf => "KAPAZITAETSTOPF",
            ConflictType::Slot => "SLOT",
        }
    }
}
