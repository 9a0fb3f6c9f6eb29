// ==========================================
// 铁路容量分配系统 - 申请总体状态派生
// ==========================================
// 纯函数: 由每个分配的两层状态归约出总体状态
// 外部状态 (撤回/失效) 保持不变
// ==========================================

use crate::domain::request::{Request, SlotAssignment};
use crate::domain::types::OverallStatus;

/// 派生总体状态
///
/// 优先级: 槽位层冲突 > 容量池层冲突 > 最终结论 > 容量池层结论 > 冲突检查中
pub fn derive_overall_status(current: OverallStatus, assignments: &[SlotAssignment]) -> OverallStatus {
    if current.is_external() {
        return current;
    }
    if assignments.is_empty() {
        return OverallStatus::InConflictCheck;
    }

    if assignments.iter().any(|a| a.slot_status.is_open()) {
        return OverallStatus::InSlotConflict;
    }
    if assignments.iter().any(|a| a.pot_status.is_open()) {
        return OverallStatus::InPotConflict;
    }
    if !assignments.iter().all(|a| a.pot_status.is_decided()) {
        return OverallStatus::InConflictCheck;
    }

    let total = assignments.len();
    if assignments.iter().all(SlotAssignment::slot_settled) {
        let confirmed = assignments.iter().filter(|a| a.finally_confirmed()).count();
        return match confirmed {
            0 => OverallStatus::FinalRejected,
            n if n == total => OverallStatus::FinalConfirmed,
            _ => OverallStatus::FinalPartiallyConfirmed,
        };
    }

    let confirmed = assignments.iter().filter(|a| a.pot_status.is_confirmed()).count();
    match confirmed {
        0 => OverallStatus::PotRejected,
        n if n == total => OverallStatus::PotConfirmed,
        _ => OverallStatus::PotPartiallyConfirmed,
    }
}

/// 重算并写回申请的总体状态
pub fn refresh_status(request: &mut Request) {
    request.status = derive_overall_status(request.status, &request.assignments);
}
