// ==========================================
// 铁路容量分配系统 - 费用计算
// ==========================================
// 费用 = 运行天数 × Σ 每个区段首个匹配槽位的基础费用
// ==========================================

use crate::domain::types::TrafficDayGroup;
use crate::engine::calendar::operating_days;
use crate::engine::error::{EngineError, EngineResult};
use chrono::NaiveDate;

pub struct FeeCalculator;

impl FeeCalculator {
    pub fn calculate(
        valid_from: NaiveDate,
        valid_to: NaiveDate,
        traffic_day_group: TrafficDayGroup,
        leg_base_fees: &[i64],
    ) -> EngineResult<i64> {
        let days = operating_days(valid_from, valid_to, traffic_day_group);
        if days == 0 {
            return Err(EngineError::Validation(format!(
                "有效期 {} .. {} 内没有 {} 运行日",
                valid_from, valid_to, traffic_day_group
            )));
        }
        let overflow = || EngineError::Validation(format!("费用超出范围: {} 天 × {:?}", days, leg_base_fees));
        let per_day = leg_base_fees
            .iter()
            .try_fold(0i64, |acc, fee| acc.checked_add(*fee))
            .ok_or_else(overflow)?;
        i64::try_from(days)
            .ok()
            .and_then(|d| d.checked_mul(per_day))
            .ok_or_else(overflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_fee_for_two_daily_weeks() {
        let fee = FeeCalculator::calculate(d(2025, 1, 6), d(2025, 1, 19), TrafficDayGroup::Daily, &[100, 50])
            .unwrap();
        assert_eq!(fee, 14 * 150);
        assert_eq!(fee, 2100);
    }

    #[test]
    fn test_zero_operating_days_is_validation_error() {
        // 周六到周日, 只有周末
        let err = FeeCalculator::calculate(d(2025, 1, 11), d(2025, 1, 12), TrafficDayGroup::MoFr, &[100])
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_fee_overflow_is_validation_error() {
        let huge = i64::MAX / 2;
        // 5 个运行日 × 超大基础费用
        let err = FeeCalculator::calculate(d(2025, 1, 6), d(2025, 1, 10), TrafficDayGroup::MoFr, &[huge])
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        // 区段求和溢出
        let err = FeeCalculator::calculate(d(2025, 1, 6), d(2025, 1, 6), TrafficDayGroup::MoFr, &[huge, huge, huge])
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
