// ==========================================
// 铁路容量分配系统 - 日历映射
// ==========================================
// 全局周: 自固定纪元周一 2024-12-30 起算, 从 1 开始
// 纪元之前的日期视为数据错误
// ==========================================

use crate::domain::types::TrafficDayGroup;
use crate::engine::error::{EngineError, EngineResult};
use chrono::{Duration, NaiveDate};

/// 纪元 (周一)
pub fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 12, 30).unwrap_or_default()
}

/// 日期 → 全局周号 (1-based)
pub fn global_week(date: NaiveDate) -> EngineResult<u32> {
    let days = (date - epoch()).num_days();
    if days < 0 {
        return Err(EngineError::Validation(format!(
            "日期 {} 早于日历纪元 {}",
            date,
            epoch()
        )));
    }
    Ok((days / 7) as u32 + 1)
}

/// 全局周的周一
pub fn week_start(week: u32) -> NaiveDate {
    epoch() + Duration::days((week.max(1) as i64 - 1) * 7)
}

/// 区间 [from, to] 覆盖的全部周
pub fn weeks_touched(from: NaiveDate, to: NaiveDate) -> EngineResult<Vec<u32>> {
    if to < from {
        return Err(EngineError::Validation(format!(
            "有效期结束 {} 早于开始 {}",
            to, from
        )));
    }
    let first = global_week(from)?;
    let last = global_week(to)?;
    Ok((first..=last).collect())
}

/// 区间内属于该交通日分组的天数 (闭区间)
pub fn operating_days(from: NaiveDate, to: NaiveDate, group: TrafficDayGroup) -> usize {
    if to < from {
        return 0;
    }
    from.iter_days()
        .take_while(|d| *d <= to)
        .filter(|d| group.matches(*d))
        .count()
}

/// 区间与指定周的交集内属于该分组的天数
pub fn operating_days_in_week(
    from: NaiveDate,
    to: NaiveDate,
    week: u32,
    group: TrafficDayGroup,
) -> usize {
    let start = week_start(week);
    let end = start + Duration::days(6);
    operating_days(from.max(start), to.min(end), group)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_global_week() {
        assert_eq!(global_week(d(2024, 12, 30)).unwrap(), 1);
        assert_eq!(global_week(d(2025, 1, 5)).unwrap(), 1);
        assert_eq!(global_week(d(2025, 1, 6)).unwrap(), 2);
        assert!(matches!(
            global_week(d(2024, 12, 29)),
            Err(EngineError::Validation(_))
        ));
        assert_eq!(week_start(2), d(2025, 1, 6));
    }

    #[test]
    fn test_operating_days() {
        // 2025-01-06 (周一) .. 2025-01-19 (周日): 两整周
        let from = d(2025, 1, 6);
        let to = d(2025, 1, 19);
        assert_eq!(operating_days(from, to, TrafficDayGroup::Daily), 14);
        assert_eq!(operating_days(from, to, TrafficDayGroup::MoFr), 10);
        assert_eq!(operating_days(from, to, TrafficDayGroup::SaSo), 4);
        assert_eq!(weeks_touched(from, to).unwrap(), vec![2, 3]);
    }

    #[test]
    fn test_operating_days_in_partial_week() {
        // 周六开始: 第 2 周只有周末
        let from = d(2025, 1, 11);
        let to = d(2025, 1, 14);
        assert_eq!(operating_days_in_week(from, to, 2, TrafficDayGroup::MoFr), 0);
        assert_eq!(operating_days_in_week(from, to, 2, TrafficDayGroup::SaSo), 2);
        assert_eq!(operating_days_in_week(from, to, 3, TrafficDayGroup::MoFr), 2);
    }
}
