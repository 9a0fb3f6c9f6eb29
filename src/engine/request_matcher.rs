// ==========================================
// 铁路容量分配系统 - 申请匹配引擎
// ==========================================
// 职责: 为申请的每个 (区段, 周, 交通日分组) 找到槽位
// 跨零点: 到达早于出发, 或后一段出发早于前一段到达, 之后的区段整体 +24h
// 跨零点后落在 0-4 点的区段, 额外占用另一交通日分组的同型槽位
// 红线: 任一必需组合无匹配 → 整个申请失败, 不落库
// ==========================================

use crate::domain::request::{DesiredLeg, Request, SlotAssignment};
use crate::domain::slot::{SlotKind, SlotPattern};
use crate::domain::types::{LegKind, TimeWindow, TrafficDayGroup, TRAFFIC_TYPE_ALL};
use crate::engine::calendar::{operating_days_in_week, weeks_touched};
use crate::engine::error::{EngineError, EngineResult};
use crate::repository::slot_repo::{SlotFilter, SlotPatternRepository};
use chrono::Timelike;
use std::collections::HashSet;
use std::sync::Arc;

const MINUTES_PER_DAY: u32 = 24 * 60;
/// 跨零点后触发同型槽位占用的最晚小时 (含)
const WRAP_COMPANION_LAST_HOUR: u32 = 4;

/// 匹配结果
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub assignments: Vec<SlotAssignment>,
    /// 每个区段首个匹配槽位的基础费用 (按区段顺序)
    pub leg_base_fees: Vec<i64>,
}

/// 区段在时间轴上的位置 (分钟, 自首段出发日零点起)
#[derive(Debug, Clone, Copy)]
struct LegTiming {
    departure_abs: u32,
    arrival_abs: u32,
    travel_minutes: u32,
}

impl LegTiming {
    /// 跨零点后的时刻 (出发已跨 → 出发; 否则到达已跨 → 到达)
    fn wrapped_hour(&self) -> Option<u32> {
        if self.departure_abs >= MINUTES_PER_DAY {
            Some((self.departure_abs % MINUTES_PER_DAY) / 60)
        } else if self.arrival_abs >= MINUTES_PER_DAY {
            Some((self.arrival_abs % MINUTES_PER_DAY) / 60)
        } else {
            None
        }
    }

    fn needs_companion(&self) -> bool {
        self.wrapped_hour()
            .map_or(false, |hour| hour <= WRAP_COMPANION_LAST_HOUR)
    }
}

fn minutes_of_day(time: chrono::NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

/// 计算各区段的绝对时刻
fn leg_timings(legs: &[DesiredLeg]) -> Vec<LegTiming> {
    let mut timings = Vec::with_capacity(legs.len());
    let mut day_offset = 0u32;
    let mut previous_arrival: Option<u32> = None;

    for leg in legs {
        let departure = minutes_of_day(leg.departure);
        let arrival = minutes_of_day(leg.arrival);

        let mut departure_abs = departure + day_offset;
        if let Some(prev) = previous_arrival {
            if departure_abs < prev {
                day_offset += MINUTES_PER_DAY;
                departure_abs += MINUTES_PER_DAY;
            }
        }
        let travel_minutes = if arrival < departure {
            arrival + MINUTES_PER_DAY - departure
        } else {
            arrival - departure
        };
        let arrival_abs = departure_abs + travel_minutes;
        if arrival < departure {
            day_offset += MINUTES_PER_DAY;
        }
        previous_arrival = Some(arrival_abs);

        timings.push(LegTiming {
            departure_abs,
            arrival_abs,
            travel_minutes,
        });
    }
    timings
}

/// 跨零点时占用的另一分组及周号
fn companion_of(group: TrafficDayGroup, week: u32) -> Option<(TrafficDayGroup, u32)> {
    match group {
        TrafficDayGroup::MoFr => Some((TrafficDayGroup::SaSo, week)),
        TrafficDayGroup::SaSo => Some((TrafficDayGroup::MoFr, week + 1)),
        TrafficDayGroup::Daily => None,
    }
}

// ==========================================
// RequestMatcher - 申请匹配
// ==========================================
pub struct RequestMatcher {
    slot_repo: Arc<SlotPatternRepository>,
}

impl RequestMatcher {
    pub fn new(slot_repo: Arc<SlotPatternRepository>) -> Self {
        Self { slot_repo }
    }

    /// 为申请匹配全部槽位; 不写入任何数据
    pub fn match_request(&self, request: &Request) -> EngineResult<MatchOutcome> {
        let weeks = weeks_touched(request.valid_from, request.valid_to)?;
        let timings = leg_timings(&request.legs);

        let mut outcome = MatchOutcome {
            assignments: Vec::new(),
            leg_base_fees: vec![0; request.legs.len()],
        };
        let mut seen_slots: HashSet<String> = HashSet::new();
        let mut fee_recorded = vec![false; request.legs.len()];

        for (leg_index, (leg, timing)) in request.legs.iter().zip(timings.iter()).enumerate() {
            for &week in &weeks {
                for group in request.traffic_day_group.expand() {
                    if operating_days_in_week(request.valid_from, request.valid_to, week, group) == 0 {
                        continue;
                    }

                    let slot = self
                        .find_match(leg, timing, &request.traffic_type, week, group)?
                        .ok_or_else(|| {
                            EngineError::AssignmentFailed(format!(
                                "区段 {} ({} → {} {}) 在 KW{} {} 无匹配槽位",
                                leg_index,
                                leg.from,
                                leg.to,
                                leg.departure.format("%H:%M"),
                                week,
                                group
                            ))
                        })?;

                    if !fee_recorded[leg_index] {
                        outcome.leg_base_fees[leg_index] = slot.base_fee;
                        fee_recorded[leg_index] = true;
                    }
                    push_assignment(&mut outcome, &mut seen_slots, &slot, leg_index, week, group)?;

                    if !timing.needs_companion() {
                        continue;
                    }
                    let Some((companion_group, companion_week)) = companion_of(group, week) else {
                        continue;
                    };
                    match self.find_match(leg, timing, &request.traffic_type, companion_week, companion_group)? {
                        Some(companion) => {
                            push_assignment(
                                &mut outcome,
                                &mut seen_slots,
                                &companion,
                                leg_index,
                                companion_week,
                                companion_group,
                            )?;
                        }
                        None => {
                            tracing::warn!(
                                request_id = %request.request_id,
                                leg_index,
                                week = companion_week,
                                group = %companion_group,
                                "跨零点同型槽位不存在, 跳过"
                            );
                        }
                    }
                }
            }
        }

        tracing::debug!(
            request_id = %request.request_id,
            assignments = outcome.assignments.len(),
            "申请匹配完成"
        );
        Ok(outcome)
    }

    fn find_match(
        &self,
        leg: &DesiredLeg,
        timing: &LegTiming,
        traffic_type: &str,
        week: u32,
        group: TrafficDayGroup,
    ) -> EngineResult<Option<SlotPattern>> {
        let window = TimeWindow::from_hour(leg.departure.hour());
        let filter = SlotFilter {
            from: Some(leg.from.trim().to_string()),
            to: Some(leg.to.trim().to_string()),
            week: Some(week),
            traffic_day_group: Some(group),
            time_window: Some(window),
            ..Default::default()
        };
        let candidates: Vec<SlotPattern> = self
            .slot_repo
            .find_by_filter(&filter)?
            .into_iter()
            .filter(|s| s.pot_id.is_some())
            .filter(|s| s.traffic_type == traffic_type || s.traffic_type == TRAFFIC_TYPE_ALL)
            .collect();

        let found = match leg.kind {
            LegKind::Tag => pick_day_slot(&candidates, leg, traffic_type),
            LegKind::Nacht => pick_night_slot(&candidates, window, timing.travel_minutes, traffic_type),
        };
        Ok(found.cloned())
    }
}

/// 精确发到时刻; 优先同交通类型, 其次父槽位
fn pick_day_slot<'a>(
    candidates: &'a [SlotPattern],
    leg: &DesiredLeg,
    traffic_type: &str,
) -> Option<&'a SlotPattern> {
    candidates
        .iter()
        .filter(|s| match &s.kind {
            SlotKind::Tag { departure, arrival } => *departure == leg.departure && *arrival == leg.arrival,
            SlotKind::Nacht { .. } => false,
        })
        .min_by_key(|s| (s.traffic_type != traffic_type, s.is_alternative(), s.slot_id.clone()))
}

/// 同时间窗, 运行时间在范围内; 按父槽位逐个检查 (父 → 备选)
fn pick_night_slot<'a>(
    candidates: &'a [SlotPattern],
    window: TimeWindow,
    travel_minutes: u32,
    traffic_type: &str,
) -> Option<&'a SlotPattern> {
    let mut parents: Vec<&SlotPattern> = candidates
        .iter()
        .filter(|s| !s.is_alternative() && s.kind.is_night() && s.time_window() == window)
        .collect();
    parents.sort_by_key(|s| (s.traffic_type != traffic_type, s.slot_id.clone()));

    for parent in parents {
        if parent.admits_travel_minutes(travel_minutes) {
            return Some(parent);
        }
        for alt_id in &parent.alternative_ids {
            let alternative = candidates
                .iter()
                .find(|s| &s.slot_id == alt_id && s.kind.is_night());
            if let Some(alt) = alternative {
                if alt.admits_travel_minutes(travel_minutes) {
                    return Some(alt);
                }
            }
        }
    }
    None
}

fn push_assignment(
    outcome: &mut MatchOutcome,
    seen: &mut HashSet<String>,
    slot: &SlotPattern,
    leg_index: usize,
    week: u32,
    group: TrafficDayGroup,
) -> EngineResult<()> {
    if !seen.insert(slot.slot_id.clone()) {
        return Ok(());
    }
    let pot_id = slot
        .pot_id
        .clone()
        .ok_or_else(|| EngineError::StateConflict(format!("槽位 {} 未归属容量池", slot.slot_id)))?;
    outcome
        .assignments
        .push(SlotAssignment::new(slot.slot_id.clone(), pot_id, leg_index, week, group));
    Ok(())
}
