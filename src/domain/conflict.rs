// ==========================================
// 铁路容量分配系统 - 冲突记录/冲突组领域模型
// ==========================================
// 冲突记录: 一次超额占用 (容量池层或槽位层)
// 冲突组: 涉及申请指纹相同的冲突记录, 一起解决
// ==========================================

use crate::domain::types::{AssignmentStatus, ConflictStatus, ConflictType};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 冲突指纹: 类型 + 容量上限 + 排序后的申请ID
pub fn compute_fingerprint(conflict_type: ConflictType, capacity: usize, request_ids: &[String]) -> String {
    let mut ids = request_ids.to_vec();
    ids.sort();
    ids.dedup();
    format!("{}|{}|{}", conflict_type.to_db_str(), capacity, ids.join(","))
}

fn sorted_unique(ids: &[String]) -> Vec<String> {
    let mut ids = ids.to_vec();
    ids.sort();
    ids.dedup();
    ids
}

// ==========================================
// ConflictRecord - 冲突记录
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub conflict_id: String,
    pub conflict_type: ConflictType,
    /// 触发实体: 容量池ID 或 槽位ID
    pub trigger_id: String,
    pub capacity: usize,
    pub involved_request_ids: Vec<String>,
    pub status: ConflictStatus,

    // ===== 解决结果 =====
    pub waived_request_ids: Vec<String>,
    pub confirmed_request_ids: Vec<String>,
    pub rejected: BTreeMap<String, AssignmentStatus>,
    pub auction_request_ids: Vec<String>,
    pub auction_capacity: usize,
    pub bids: BTreeMap<String, i64>,

    pub group_id: Option<String>,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub resolved_at: Option<NaiveDateTime>,
}

impl ConflictRecord {
    pub fn new(
        conflict_id: String,
        conflict_type: ConflictType,
        trigger_id: &str,
        capacity: usize,
        involved_request_ids: &[String],
        now: NaiveDateTime,
    ) -> Self {
        Self {
            conflict_id,
            conflict_type,
            trigger_id: trigger_id.to_string(),
            capacity,
            involved_request_ids: sorted_unique(involved_request_ids),
            status: ConflictStatus::Open,
            waived_request_ids: Vec::new(),
            confirmed_request_ids: Vec::new(),
            rejected: BTreeMap::new(),
            auction_request_ids: Vec::new(),
            auction_capacity: 0,
            bids: BTreeMap::new(),
            group_id: None,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        }
    }

    pub fn fingerprint(&self) -> String {
        compute_fingerprint(self.conflict_type, self.capacity, &self.involved_request_ids)
    }

    pub fn is_resolved(&self) -> bool {
        self.status == ConflictStatus::Resolved
    }

    /// 是否与当前成员一致
    pub fn matches_membership(&self, capacity: usize, request_ids: &[String]) -> bool {
        self.capacity == capacity && self.involved_request_ids == sorted_unique(request_ids)
    }

    /// 更新涉及申请 (不改变阶段)
    pub fn update_membership(&mut self, capacity: usize, request_ids: &[String], now: NaiveDateTime) {
        self.capacity = capacity;
        self.involved_request_ids = sorted_unique(request_ids);
        self.updated_at = now;
    }

    /// 重开: 清空解决字段, 按当前成员重新确定涉及申请
    pub fn reopen(&mut self, capacity: usize, request_ids: &[String], now: NaiveDateTime) {
        self.status = ConflictStatus::Open;
        self.waived_request_ids.clear();
        self.confirmed_request_ids.clear();
        self.rejected.clear();
        self.auction_request_ids.clear();
        self.auction_capacity = 0;
        self.bids.clear();
        self.resolved_at = None;
        self.update_membership(capacity, request_ids, now);
    }

    /// 尚未决定的申请
    pub fn pending_request_ids(&self) -> Vec<String> {
        self.involved_request_ids
            .iter()
            .filter(|id| {
                !self.waived_request_ids.contains(id)
                    && !self.confirmed_request_ids.contains(id)
                    && !self.rejected.contains_key(*id)
            })
            .cloned()
            .collect()
    }

    pub fn close(&mut self, now: NaiveDateTime) {
        self.status = ConflictStatus::Resolved;
        self.auction_request_ids.clear();
        self.auction_capacity = 0;
        self.resolved_at = Some(now);
        self.updated_at = now;
    }
}

// ==========================================
// ConflictGroup - 冲突组
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictGroup {
    pub group_id: String,
    pub fingerprint: String,
    pub conflict_type: ConflictType,
    pub capacity: usize,
    pub conflict_ids: Vec<String>,
    pub involved_request_ids: Vec<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl ConflictGroup {
    pub fn new(group_id: String, template: &ConflictRecord, now: NaiveDateTime) -> Self {
        Self {
            group_id,
            fingerprint: template.fingerprint(),
            conflict_type: template.conflict_type,
            capacity: template.capacity,
            conflict_ids: Vec::new(),
            involved_request_ids: template.involved_request_ids.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}
