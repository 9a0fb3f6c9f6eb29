// ==========================================
// 铁路容量分配系统 - 操作日志领域模型
// ==========================================
// 红线: 冲突解决的每个决定都必须记录
// 用途: 审计追踪
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ==========================================
// ActionLog - 操作日志
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLog {
    pub action_id: String,
    pub action_type: String,
    pub action_ts: NaiveDateTime,
    pub actor: String,
    pub target_id: Option<String>, // 冲突记录/冲突组/槽位/申请ID
    pub payload_json: Option<JsonValue>,
    pub detail: Option<String>,
}

impl ActionLog {
    pub fn new(
        action_type: ActionType,
        actor: &str,
        target_id: Option<&str>,
        payload_json: Option<JsonValue>,
        detail: Option<String>,
        now: NaiveDateTime,
    ) -> Self {
        Self {
            action_id: uuid::Uuid::new_v4().to_string(),
            action_type: action_type.as_str().to_string(),
            action_ts: now,
            actor: actor.to_string(),
            target_id: target_id.map(|s| s.to_string()),
            payload_json,
            detail,
        }
    }
}

// ==========================================
// ActionType - 操作类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    SlotCreate,     // 新建槽位
    SlotUpdate,     // 修改槽位
    SlotDelete,     // 删除槽位
    RequestSubmit,  // 提交申请
    RequestWithdraw, // 撤回申请
    RequestInvalidate, // 申请失效
    ConflictSweep,  // 冲突扫描
    WaiverDecision, // 放弃阶段
    FeeDecision,    // 费用排序阶段
    AuctionDecision, // 最高价阶段
    GroupReset,     // 冲突组重置
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::SlotCreate => "SlotCreate",
            ActionType::SlotUpdate => "SlotUpdate",
            ActionType::SlotDelete => "SlotDelete",
            ActionType::RequestSubmit => "RequestSubmit",
            ActionType::RequestWithdraw => "RequestWithdraw",
            ActionType::RequestInvalidate => "RequestInvalidate",
            ActionType::ConflictSweep => "ConflictSweep",
            ActionType::WaiverDecision => "WaiverDecision",
            ActionType::FeeDecision => "FeeDecision",
            ActionType::AuctionDecision => "AuctionDecision",
            ActionType::GroupReset => "GroupReset",
        }
    }
}
