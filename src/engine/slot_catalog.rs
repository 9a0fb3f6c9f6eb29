// ==========================================
// 铁路容量分配系统 - 槽位目录
// ==========================================
// 职责: 槽位模板的新建/备选/修改/删除/查询, 并维护容量池成员
// 红线: 已被申请匹配的槽位不可修改或删除
// 红线: 槽位ID由定义属性推导, 修改不得改变ID
// ==========================================

use crate::domain::action_log::ActionType;
use crate::domain::slot::{SlotKind, SlotPattern};
use crate::domain::types::{TrafficDayGroup, TRAFFIC_TYPE_ALL};
use crate::engine::audit::record_action;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::pot_assignment::PotAssignmentService;
use crate::engine::repositories::AllocationRepositories;
use crate::repository::page::{Page, PageRequest};
use crate::repository::slot_repo::SlotFilter;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;

/// 新建槽位的定义属性
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotDefinition {
    pub from: String,
    pub to: String,
    pub section: String,
    pub week: u32,
    pub traffic_day_group: TrafficDayGroup,
    /// 日间槽位必填; 夜间槽位缺省为 ALL
    pub traffic_type: Option<String>,
    pub kind: SlotKind,
    pub base_fee: i64,
}

/// 槽位修改 (只含允许修改的属性)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlotPatch {
    pub kind: Option<SlotKind>,
    pub section: Option<String>,
    pub base_fee: Option<i64>,
}

fn validate_kind(kind: &SlotKind) -> EngineResult<()> {
    match kind {
        SlotKind::Tag { departure, arrival } => {
            if departure == arrival {
                return Err(EngineError::Validation("出发与到达时刻相同".to_string()));
            }
        }
        SlotKind::Nacht {
            min_travel_minutes,
            max_travel_minutes,
            ..
        } => {
            if min_travel_minutes > max_travel_minutes || *max_travel_minutes == 0 {
                return Err(EngineError::Validation(format!(
                    "运行时间范围无效: {}..{} 分钟",
                    min_travel_minutes, max_travel_minutes
                )));
            }
        }
    }
    Ok(())
}

// ==========================================
// SlotCatalog - 槽位目录
// ==========================================
pub struct SlotCatalog {
    repos: AllocationRepositories,
    pots: PotAssignmentService,
}

impl SlotCatalog {
    pub fn new(repos: AllocationRepositories) -> Self {
        let pots = PotAssignmentService::new(repos.pot_repo.clone());
        Self { repos, pots }
    }

    /// 新建槽位 (日间/夜间), 归入容量池
    #[instrument(skip(self, definition), fields(from = %definition.from, to = %definition.to, week = definition.week))]
    pub fn create_slot(&self, definition: SlotDefinition, actor: &str) -> EngineResult<SlotPattern> {
        if definition.from.trim().is_empty() || definition.to.trim().is_empty() {
            return Err(EngineError::Validation("起点/终点不能为空".to_string()));
        }
        if definition.week == 0 {
            return Err(EngineError::Validation("周号从 1 开始".to_string()));
        }
        if definition.traffic_day_group == TrafficDayGroup::Daily {
            return Err(EngineError::Validation(
                "槽位只能属于 Mo-Fr 或 Sa+So".to_string(),
            ));
        }
        if definition.base_fee < 0 {
            return Err(EngineError::Validation("基础费用不能为负".to_string()));
        }
        validate_kind(&definition.kind)?;

        let traffic_type = match (&definition.kind, definition.traffic_type.as_deref()) {
            (_, Some(tt)) if !tt.trim().is_empty() => tt.trim().to_string(),
            (SlotKind::Nacht { .. }, _) => TRAFFIC_TYPE_ALL.to_string(),
            (SlotKind::Tag { .. }, _) => {
                return Err(EngineError::Validation("日间槽位必须指定交通类型".to_string()))
            }
        };

        let now = Utc::now().naive_utc();
        let mut slot = SlotPattern {
            slot_id: String::new(),
            kind: definition.kind,
            section: definition.section,
            from: definition.from.trim().to_string(),
            to: definition.to.trim().to_string(),
            week: definition.week,
            traffic_day_group: definition.traffic_day_group,
            traffic_type,
            pot_id: None,
            base_fee: definition.base_fee,
            parent_slot_id: None,
            alternative_ids: Vec::new(),
            request_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        slot.slot_id = slot.derived_id();

        if self.repos.slot_repo.find_by_id(&slot.slot_id)?.is_some() {
            return Err(EngineError::StateConflict(format!("槽位 {} 已存在", slot.slot_id)));
        }

        let pot = self.pots.find_or_create(
            &slot.section,
            &slot.traffic_type,
            slot.week,
            slot.traffic_day_group,
            slot.time_window(),
        )?;
        slot.pot_id = Some(pot.pot_id.clone());
        self.repos.slot_repo.insert(&slot)?;
        let pot = self.pots.add_slot(&pot.pot_id, &slot.slot_id)?;

        record_action(
            &self.repos.action_log_repo,
            ActionType::SlotCreate,
            actor,
            &slot.slot_id,
            json!({ "pot_id": pot.pot_id, "max_kapazitaet": pot.max_kapazitaet() }),
            None,
        )?;
        tracing::info!(slot_id = %slot.slot_id, pot_id = %pot.pot_id, max_kapazitaet = pot.max_kapazitaet(), "槽位已创建");
        Ok(slot)
    }

    /// 为父槽位新建备选槽位; 备选不计入容量池
    #[instrument(skip(self, kind))]
    pub fn create_alternative(
        &self,
        parent_id: &str,
        kind: SlotKind,
        base_fee: Option<i64>,
        actor: &str,
    ) -> EngineResult<SlotPattern> {
        validate_kind(&kind)?;
        let parent = self
            .repos
            .slot_repo
            .find_by_id(parent_id)?
            .ok_or_else(|| EngineError::not_found("SlotPattern", parent_id))?;
        if parent.is_alternative() {
            return Err(EngineError::Validation(format!(
                "{} 本身是备选槽位, 不能再挂备选",
                parent_id
            )));
        }
        if kind.is_night() != parent.kind.is_night() {
            return Err(EngineError::Validation("备选槽位必须与父槽位同为日间或夜间".to_string()));
        }
        let fee = base_fee.unwrap_or(parent.base_fee);
        if fee < 0 {
            return Err(EngineError::Validation("基础费用不能为负".to_string()));
        }

        let mut index = parent.alternative_ids.len() + 1;
        let mut alt_id = SlotPattern::alternative_id(&parent.slot_id, index);
        while self.repos.slot_repo.find_by_id(&alt_id)?.is_some() {
            index += 1;
            alt_id = SlotPattern::alternative_id(&parent.slot_id, index);
        }

        let now = Utc::now().naive_utc();
        let alternative = SlotPattern {
            slot_id: alt_id,
            kind,
            section: parent.section.clone(),
            from: parent.from.clone(),
            to: parent.to.clone(),
            week: parent.week,
            traffic_day_group: parent.traffic_day_group,
            traffic_type: parent.traffic_type.clone(),
            pot_id: parent.pot_id.clone(),
            base_fee: fee,
            parent_slot_id: Some(parent.slot_id.clone()),
            alternative_ids: Vec::new(),
            request_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.repos.slot_repo.insert(&alternative)?;

        let alt_id = alternative.slot_id.clone();
        self.repos.slot_repo.modify(&parent.slot_id, |p| {
            if !p.alternative_ids.contains(&alt_id) {
                p.alternative_ids.push(alt_id.clone());
            }
            Ok(())
        })?;

        record_action(
            &self.repos.action_log_repo,
            ActionType::SlotCreate,
            actor,
            &alternative.slot_id,
            json!({ "parent_slot_id": parent.slot_id }),
            None,
        )?;
        Ok(alternative)
    }

    /// 修改槽位
    ///
    /// 出发时刻/夜间时间窗参与ID推导, 不可修改 (需删除重建);
    /// 区段变化时父槽位迁移到新容量池
    #[instrument(skip(self, patch))]
    pub fn update_slot(&self, slot_id: &str, patch: SlotPatch, actor: &str) -> EngineResult<SlotPattern> {
        let slot = self
            .repos
            .slot_repo
            .find_by_id(slot_id)?
            .ok_or_else(|| EngineError::not_found("SlotPattern", slot_id))?;
        if !slot.request_ids.is_empty() {
            return Err(EngineError::StateConflict(format!(
                "槽位 {} 已匹配 {} 个申请, 不能修改",
                slot_id,
                slot.request_ids.len()
            )));
        }

        if let Some(kind) = &patch.kind {
            validate_kind(kind)?;
            if kind.is_night() != slot.kind.is_night() {
                return Err(EngineError::Validation("不能在日间/夜间之间切换".to_string()));
            }
            if !slot.is_alternative() && kind.hhmm() != slot.kind.hhmm() {
                return Err(EngineError::Validation(format!(
                    "出发时刻/时间窗决定槽位ID ({}), 请删除后重建",
                    slot_id
                )));
            }
        }
        if let Some(fee) = patch.base_fee {
            if fee < 0 {
                return Err(EngineError::Validation("基础费用不能为负".to_string()));
            }
        }
        if patch.section.is_some() && slot.is_alternative() {
            return Err(EngineError::Validation("备选槽位的区段随父槽位".to_string()));
        }

        // 区段变化 → 新容量池
        let new_pot = match &patch.section {
            Some(section) if section != &slot.section => Some(self.pots.find_or_create(
                section,
                &slot.traffic_type,
                slot.week,
                slot.traffic_day_group,
                slot.time_window(),
            )?),
            _ => None,
        };
        let old_pot_id = slot.pot_id.clone();

        let updated = self.repos.slot_repo.modify(slot_id, |s| {
            if let Some(kind) = patch.kind.clone() {
                s.kind = kind;
            }
            if let Some(fee) = patch.base_fee {
                s.base_fee = fee;
            }
            if let Some(section) = &patch.section {
                s.section = section.clone();
            }
            if let Some(pot) = &new_pot {
                s.pot_id = Some(pot.pot_id.clone());
            }
            Ok(s.clone())
        })?;

        if let Some(pot) = &new_pot {
            if old_pot_id.as_deref() != Some(pot.pot_id.as_str()) {
                self.pots.add_slot(&pot.pot_id, slot_id)?;
                if let Some(old) = &old_pot_id {
                    self.pots.remove_slot(old, slot_id)?;
                }
                for alt_id in &updated.alternative_ids {
                    let section = updated.section.clone();
                    self.repos.slot_repo.modify(alt_id, |alt| {
                        alt.pot_id = Some(pot.pot_id.clone());
                        alt.section = section;
                        Ok(())
                    })?;
                }
                tracing::info!(slot_id = %slot_id, from = ?old_pot_id, to = %pot.pot_id, "槽位迁移容量池");
            }
        }

        record_action(
            &self.repos.action_log_repo,
            ActionType::SlotUpdate,
            actor,
            slot_id,
            serde_json::to_value(&patch).unwrap_or_default(),
            None,
        )?;
        Ok(updated)
    }

    /// 删除槽位; 容量池变空时一并删除并解链
    #[instrument(skip(self))]
    pub fn delete_slot(&self, slot_id: &str, actor: &str) -> EngineResult<()> {
        let slot = self
            .repos
            .slot_repo
            .find_by_id(slot_id)?
            .ok_or_else(|| EngineError::not_found("SlotPattern", slot_id))?;
        if !slot.request_ids.is_empty() {
            return Err(EngineError::StateConflict(format!(
                "槽位 {} 已匹配申请, 不能删除",
                slot_id
            )));
        }
        if !slot.alternative_ids.is_empty() {
            return Err(EngineError::StateConflict(format!(
                "槽位 {} 仍有 {} 个备选槽位",
                slot_id,
                slot.alternative_ids.len()
            )));
        }

        self.repos.slot_repo.delete(slot_id)?;

        match &slot.parent_slot_id {
            Some(parent_id) => {
                self.repos.slot_repo.modify(parent_id, |p| {
                    p.alternative_ids.retain(|id| id != slot_id);
                    Ok(())
                })?;
            }
            None => {
                if let Some(pot_id) = &slot.pot_id {
                    self.pots.remove_slot(pot_id, slot_id)?;
                }
            }
        }

        record_action(
            &self.repos.action_log_repo,
            ActionType::SlotDelete,
            actor,
            slot_id,
            json!({ "pot_id": slot.pot_id, "parent_slot_id": slot.parent_slot_id }),
            None,
        )?;
        Ok(())
    }

    pub fn get_slot(&self, slot_id: &str) -> EngineResult<SlotPattern> {
        self.repos
            .slot_repo
            .find_by_id(slot_id)?
            .ok_or_else(|| EngineError::not_found("SlotPattern", slot_id))
    }

    pub fn list_slots(&self, filter: &SlotFilter, page: PageRequest) -> EngineResult<Page<SlotPattern>> {
        Ok(self.repos.slot_repo.query(filter, page)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use rusqlite::Connection;
    use std::sync::{Arc, Mutex};

    fn catalog() -> (SlotCatalog, AllocationRepositories) {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        let repos = AllocationRepositories::from_connection(Arc::new(Mutex::new(conn)));
        (SlotCatalog::new(repos.clone()), repos)
    }

    fn day(hh: u32, mm: u32) -> SlotDefinition {
        SlotDefinition {
            from: "Mannheim".to_string(),
            to: "Frankfurt".to_string(),
            section: "MA-FF".to_string(),
            week: 2,
            traffic_day_group: TrafficDayGroup::MoFr,
            traffic_type: Some("SPFV".to_string()),
            kind: SlotKind::Tag {
                departure: NaiveTime::from_hms_opt(hh, mm, 0).unwrap(),
                arrival: NaiveTime::from_hms_opt(hh + 1, mm, 0).unwrap(),
            },
            base_fee: 100,
        }
    }

    #[test]
    fn test_pot_limit_follows_slot_count() {
        let (catalog, repos) = catalog();
        let mut pot_id = String::new();
        for (i, mm) in [0, 10, 20, 30].iter().enumerate() {
            let slot = catalog.create_slot(day(8, *mm), "planner").unwrap();
            pot_id = slot.pot_id.clone().unwrap();
            let pot = repos.pot_repo.find_by_id(&pot_id).unwrap().unwrap();
            assert_eq!(pot.max_kapazitaet(), (i + 1) * 7 / 10);
        }
        assert_eq!(pot_id, "KT-MA-FF-KW2-SPFV-Mo-Fr-ZF0709");
        let pot = repos.pot_repo.find_by_id(&pot_id).unwrap().unwrap();
        assert_eq!(pot.slot_ids.len(), 4);
        assert_eq!(pot.max_kapazitaet(), 2);
    }

    #[test]
    fn test_duplicate_slot_is_state_conflict() {
        let (catalog, _) = catalog();
        catalog.create_slot(day(8, 0), "planner").unwrap();
        let err = catalog.create_slot(day(8, 0), "planner").unwrap_err();
        assert!(matches!(err, EngineError::StateConflict(_)));
    }

    #[test]
    fn test_night_slot_defaults_to_all() {
        let (catalog, _) = catalog();
        let mut def = day(0, 0);
        def.traffic_type = None;
        def.kind = SlotKind::Nacht {
            time_window: crate::domain::types::TimeWindow::from_hour(23),
            min_travel_minutes: 60,
            max_travel_minutes: 120,
        };
        let slot = catalog.create_slot(def, "planner").unwrap();
        assert_eq!(slot.traffic_type, TRAFFIC_TYPE_ALL);
        assert_eq!(slot.slot_id, "SLOT_Mannheim_Frankfurt_KW2_Mo-Fr_2300_ALL");
    }

    #[test]
    fn test_alternative_is_not_pot_member() {
        let (catalog, repos) = catalog();
        let parent = catalog.create_slot(day(8, 0), "planner").unwrap();
        let alt = catalog
            .create_alternative(
                &parent.slot_id,
                SlotKind::Tag {
                    departure: NaiveTime::from_hms_opt(8, 15, 0).unwrap(),
                    arrival: NaiveTime::from_hms_opt(9, 15, 0).unwrap(),
                },
                None,
                "planner",
            )
            .unwrap();
        assert_eq!(alt.slot_id, format!("{}_ALT1", parent.slot_id));
        assert_eq!(alt.pot_id, parent.pot_id);

        let pot = repos.pot_repo.find_by_id(parent.pot_id.as_deref().unwrap()).unwrap().unwrap();
        assert_eq!(pot.slot_ids, vec![parent.slot_id.clone()]);

        // 有备选时父槽位不可删除
        assert!(matches!(
            catalog.delete_slot(&parent.slot_id, "planner"),
            Err(EngineError::StateConflict(_))
        ));
        catalog.delete_slot(&alt.slot_id, "planner").unwrap();
        catalog.delete_slot(&parent.slot_id, "planner").unwrap();
        assert!(repos.pot_repo.find_by_id(parent.pot_id.as_deref().unwrap()).unwrap().is_none());
    }

    #[test]
    fn test_section_change_moves_pot_membership() {
        let (catalog, repos) = catalog();
        let slot = catalog.create_slot(day(8, 0), "planner").unwrap();
        let old_pot = slot.pot_id.clone().unwrap();

        let updated = catalog
            .update_slot(
                &slot.slot_id,
                SlotPatch {
                    section: Some("MA-DA".to_string()),
                    ..Default::default()
                },
                "planner",
            )
            .unwrap();
        let new_pot = updated.pot_id.clone().unwrap();
        assert_ne!(old_pot, new_pot);
        assert!(repos.pot_repo.find_by_id(&old_pot).unwrap().is_none());
        assert_eq!(
            repos.pot_repo.find_by_id(&new_pot).unwrap().unwrap().slot_ids,
            vec![slot.slot_id.clone()]
        );

        // 改出发时刻会改变ID
        let err = catalog
            .update_slot(
                &slot.slot_id,
                SlotPatch {
                    kind: Some(day(9, 0).kind),
                    ..Default::default()
                },
                "planner",
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
