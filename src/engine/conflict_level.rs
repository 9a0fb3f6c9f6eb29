// ==========================================
// 铁路容量分配系统 - 冲突层级访问
// ==========================================
// 容量池层与槽位层共用检测/解决流程, 区别只在读写分配的哪一组字段
// ==========================================

use crate::domain::request::{Request, SlotAssignment};
use crate::domain::types::{AssignmentStatus, ConflictType};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::status_derivation::refresh_status;
use crate::repository::error::RepositoryError;
use crate::repository::request_repo::RequestRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConflictLevel {
    Pot,
    Slot,
}

impl ConflictLevel {
    pub(crate) fn of(conflict_type: ConflictType) -> Self {
        match conflict_type {
            ConflictType::Kapazitaetstopf => ConflictLevel::Pot,
            ConflictType::Slot => ConflictLevel::Slot,
        }
    }

    pub(crate) fn conflict_type(self) -> ConflictType {
        match self {
            ConflictLevel::Pot => ConflictType::Kapazitaetstopf,
            ConflictLevel::Slot => ConflictType::Slot,
        }
    }

    /// 分配是否落在触发实体上
    pub(crate) fn in_scope(self, a: &SlotAssignment, trigger_id: &str) -> bool {
        match self {
            ConflictLevel::Pot => a.pot_id == trigger_id,
            ConflictLevel::Slot => a.slot_id == trigger_id,
        }
    }

    pub(crate) fn status(self, a: &SlotAssignment) -> AssignmentStatus {
        match self {
            ConflictLevel::Pot => a.pot_status,
            ConflictLevel::Slot => a.slot_status,
        }
    }

    pub(crate) fn back_ref(self, a: &SlotAssignment) -> Option<&str> {
        match self {
            ConflictLevel::Pot => a.pot_conflict_id.as_deref(),
            ConflictLevel::Slot => a.slot_conflict_id.as_deref(),
        }
    }

    pub(crate) fn set_status(self, a: &mut SlotAssignment, status: AssignmentStatus) {
        match self {
            ConflictLevel::Pot => a.pot_status = status,
            ConflictLevel::Slot => a.slot_status = status,
        }
    }

    pub(crate) fn set_back_ref(self, a: &mut SlotAssignment, conflict_id: Option<String>) {
        match self {
            ConflictLevel::Pot => a.pot_conflict_id = conflict_id,
            ConflictLevel::Slot => a.slot_conflict_id = conflict_id,
        }
    }

    /// 单个分配是否仍在竞争
    ///
    /// 容量池层: 未被拒绝; 槽位层: 容量池层已确认且槽位层未被拒绝
    pub(crate) fn is_claiming(self, a: &SlotAssignment) -> bool {
        match self {
            ConflictLevel::Pot => !a.pot_status.is_rejected(),
            ConflictLevel::Slot => a.pot_status.is_confirmed() && !a.slot_status.is_rejected(),
        }
    }

    /// 申请是否以该层级参与触发实体的竞争
    pub(crate) fn claims(self, request: &Request, trigger_id: &str) -> bool {
        request.is_active()
            && request
                .assignments
                .iter()
                .any(|a| self.in_scope(a, trigger_id) && self.is_claiming(a))
    }
}

/// 按迁移表修改分配状态; 不允许的迁移返回错误
pub(crate) fn transition(
    level: ConflictLevel,
    a: &mut SlotAssignment,
    next: AssignmentStatus,
) -> EngineResult<()> {
    let current = level.status(a);
    if !current.can_transition_to(next) {
        return Err(EngineError::InvalidTransition {
            from: current.to_db_str().to_string(),
            to: next.to_db_str().to_string(),
        });
    }
    level.set_status(a, next);
    Ok(())
}

/// 修改申请的分配并重算总体状态
///
/// 先在副本上试算, 无变化时不写库; 有变化时在事务内对最新数据重放同一修改
pub(crate) fn apply_to_request<F>(repo: &RequestRepository, request_id: &str, f: F) -> EngineResult<bool>
where
    F: Fn(&mut Request) -> EngineResult<bool>,
{
    let Some(mut probe) = repo.find_by_id(request_id)? else {
        tracing::warn!(request_id = %request_id, "申请不存在, 跳过");
        return Ok(false);
    };
    if !f(&mut probe)? {
        return Ok(false);
    }
    repo.modify(request_id, |r| {
        f(r).map_err(|e| RepositoryError::BusinessRuleViolation(e.to_string()))?;
        refresh_status(r);
        Ok(())
    })?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::TrafficDayGroup;

    #[test]
    fn test_level_accessors_touch_own_fields() {
        let mut a = SlotAssignment::new("S1".into(), "P1".into(), 0, 2, TrafficDayGroup::MoFr);
        ConflictLevel::Slot.set_status(&mut a, AssignmentStatus::Waiting);
        ConflictLevel::Slot.set_back_ref(&mut a, Some("C1".into()));
        assert_eq!(a.pot_status, AssignmentStatus::Initial);
        assert_eq!(a.slot_status, AssignmentStatus::Waiting);
        assert_eq!(ConflictLevel::Slot.back_ref(&a), Some("C1"));
        assert!(ConflictLevel::Pot.back_ref(&a).is_none());
        assert!(ConflictLevel::Pot.in_scope(&a, "P1"));
        assert!(!ConflictLevel::Slot.in_scope(&a, "P1"));
    }

    #[test]
    fn test_transition_rejects_disallowed_step() {
        let mut a = SlotAssignment::new("S1".into(), "P1".into(), 0, 2, TrafficDayGroup::MoFr);
        let err = transition(ConflictLevel::Pot, &mut a, AssignmentStatus::ConfirmedFee).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
        transition(ConflictLevel::Pot, &mut a, AssignmentStatus::Waiting).unwrap();
        assert_eq!(a.pot_status, AssignmentStatus::Waiting);
    }
}
