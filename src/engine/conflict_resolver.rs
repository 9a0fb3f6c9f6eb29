// ==========================================
// 铁路容量分配系统 - 冲突解决引擎
// ==========================================
// 三阶段: 放弃 (offen) → 费用排序 (in_bearbeitung_entgelt) → 最高价 (in_bearbeitung_hoechstpreis)
// 可按单条记录或按冲突组执行; 冲突组对处于同一阶段的成员记录执行相同决定
// 红线: 所有状态迁移先整体校验再写入 (冲突组: 全部成员一起校验)
// 红线: 每个决定写一条操作日志
// ==========================================

use crate::domain::action_log::ActionType;
use crate::domain::conflict::ConflictRecord;
use crate::domain::request::Request;
use crate::domain::types::{AssignmentStatus, ConflictStatus};
use crate::engine::audit::record_action;
use crate::engine::conflict_level::{apply_to_request, transition, ConflictLevel};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::repositories::AllocationRepositories;
use chrono::Utc;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use tracing::instrument;

/// 申请ID → 目标状态
type Decisions = Vec<(String, AssignmentStatus)>;

/// 按金额切分的结果
#[derive(Debug, Default, PartialEq, Eq)]
struct Ranking {
    winners: Vec<String>,
    losers: Vec<String>,
    /// 边界并列, 需下一轮
    tied: Vec<String>,
    /// 并列者可分得的名额
    tied_capacity: usize,
}

/// 按金额降序 (同额按ID升序) 分配 capacity 个名额
///
/// 第 capacity 名与第 capacity+1 名金额相同时, 高于边界者胜出,
/// 低于边界者落选, 等于边界者并列
fn rank_by_amount(amounts: &[(String, i64)], capacity: usize) -> Ranking {
    let mut sorted = amounts.to_vec();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let ids = |items: &[(String, i64)]| items.iter().map(|(id, _)| id.clone()).collect::<Vec<_>>();

    if sorted.len() <= capacity {
        return Ranking {
            winners: ids(&sorted),
            ..Default::default()
        };
    }
    if capacity == 0 {
        return Ranking {
            losers: ids(&sorted),
            ..Default::default()
        };
    }

    let boundary = sorted[capacity - 1].1;
    if sorted[capacity].1 != boundary {
        return Ranking {
            winners: ids(&sorted[..capacity]),
            losers: ids(&sorted[capacity..]),
            ..Default::default()
        };
    }

    let mut ranking = Ranking::default();
    for (id, amount) in &sorted {
        if *amount > boundary {
            ranking.winners.push(id.clone());
        } else if *amount < boundary {
            ranking.losers.push(id.clone());
        } else {
            ranking.tied.push(id.clone());
        }
    }
    ranking.tied_capacity = capacity - ranking.winners.len();
    ranking
}

/// 一条记录的决定: 更新后的记录 + 各申请的目标状态, 尚未写入
#[derive(Debug)]
struct Resolution {
    action_type: ActionType,
    record: ConflictRecord,
    decisions: Decisions,
}

/// 将本记录范围内的分配迁移到 next
fn decide(record: &ConflictRecord, request: &mut Request, next: AssignmentStatus) -> EngineResult<bool> {
    let level = ConflictLevel::of(record.conflict_type);
    let mut changed = false;
    for a in request.assignments.iter_mut() {
        if !level.in_scope(a, &record.trigger_id) || level.back_ref(a) != Some(record.conflict_id.as_str()) {
            continue;
        }
        transition(level, a, next)?;
        changed = true;
    }
    Ok(changed)
}

// ==========================================
// ConflictResolver - 冲突解决
// ==========================================
pub struct ConflictResolver {
    repos: AllocationRepositories,
}

impl ConflictResolver {
    pub fn new(repos: AllocationRepositories) -> Self {
        Self { repos }
    }

    // ==========================================
    // 单条记录
    // ==========================================

    /// 放弃阶段: withdrawals 中的申请放弃竞争
    ///
    /// 剩余申请数不超过名额 → 全部确认并关闭; 否则进入费用排序阶段
    #[instrument(skip(self, withdrawals), fields(withdrawals = withdrawals.len()))]
    pub fn resolve_waiver(
        &self,
        conflict_id: &str,
        withdrawals: &[String],
        actor: &str,
    ) -> EngineResult<ConflictRecord> {
        let resolution = self.plan_waiver(conflict_id, withdrawals)?;
        self.commit_one(resolution, actor)
    }

    /// 费用排序阶段: 按申请总费用排序分配剩余名额
    #[instrument(skip(self))]
    pub fn resolve_fee(&self, conflict_id: &str, actor: &str) -> EngineResult<ConflictRecord> {
        let resolution = self.plan_fee(conflict_id)?;
        self.commit_one(resolution, actor)
    }

    /// 最高价阶段: 出价必须高于申请总费用; 边界仍并列时留待下一轮
    #[instrument(skip(self, bids), fields(bids = bids.len()))]
    pub fn resolve_auction(
        &self,
        conflict_id: &str,
        bids: &BTreeMap<String, Option<i64>>,
        actor: &str,
    ) -> EngineResult<ConflictRecord> {
        let resolution = self.plan_auction(conflict_id, bids)?;
        self.commit_one(resolution, actor)
    }

    // ==========================================
    // 冲突组
    // ==========================================

    pub fn resolve_group_waiver(
        &self,
        group_id: &str,
        withdrawals: &[String],
        actor: &str,
    ) -> EngineResult<Vec<ConflictRecord>> {
        self.for_group(group_id, ConflictStatus::Open, actor, |id| self.plan_waiver(id, withdrawals))
    }

    pub fn resolve_group_fee(&self, group_id: &str, actor: &str) -> EngineResult<Vec<ConflictRecord>> {
        self.for_group(group_id, ConflictStatus::FeePhase, actor, |id| self.plan_fee(id))
    }

    pub fn resolve_group_auction(
        &self,
        group_id: &str,
        bids: &BTreeMap<String, Option<i64>>,
        actor: &str,
    ) -> EngineResult<Vec<ConflictRecord>> {
        self.for_group(group_id, ConflictStatus::AuctionPhase, actor, |id| {
            self.plan_auction(id, bids)
        })
    }

    /// 先为全部成员记录生成决定并整体试算, 任一失败则不写入
    #[instrument(skip(self, plan))]
    fn for_group<F>(
        &self,
        group_id: &str,
        phase: ConflictStatus,
        actor: &str,
        plan: F,
    ) -> EngineResult<Vec<ConflictRecord>>
    where
        F: Fn(&str) -> EngineResult<Resolution>,
    {
        let group = self
            .repos
            .group_repo
            .find_by_id(group_id)?
            .ok_or_else(|| EngineError::not_found("ConflictGroup", group_id))?;
        let members: Vec<ConflictRecord> = self
            .repos
            .conflict_repo
            .find_by_ids(&group.conflict_ids)?
            .into_iter()
            .filter(|r| r.status == phase)
            .collect();
        if members.is_empty() {
            return Err(EngineError::StateConflict(format!(
                "冲突组 {} 没有处于 {} 阶段的记录",
                group_id, phase
            )));
        }

        let resolutions = members
            .iter()
            .map(|member| plan(&member.conflict_id))
            .collect::<EngineResult<Vec<_>>>()?;
        let results = self.commit(resolutions, actor)?;
        tracing::info!(group_id = %group_id, phase = %phase, records = results.len(), "冲突组决定完成");
        Ok(results)
    }

    // ==========================================
    // 决定生成 (只读)
    // ==========================================

    fn plan_waiver(&self, conflict_id: &str, withdrawals: &[String]) -> EngineResult<Resolution> {
        let mut record = self.load_in_phase(conflict_id, ConflictStatus::Open)?;
        let pending = record.pending_request_ids();
        if let Some(unknown) = withdrawals.iter().find(|id| !pending.contains(id)) {
            return Err(EngineError::Validation(format!(
                "申请 {} 不在冲突 {} 的待决列表中",
                unknown, conflict_id
            )));
        }

        let mut decisions: Decisions = Vec::new();
        for id in &pending {
            if withdrawals.contains(id) {
                decisions.push((id.clone(), AssignmentStatus::RejectedWaiver));
            }
        }
        let remaining: Vec<String> = pending
            .iter()
            .filter(|id| !withdrawals.contains(id))
            .cloned()
            .collect();
        let capacity = record.capacity.saturating_sub(record.confirmed_request_ids.len());
        let sufficient = remaining.len() <= capacity;
        if sufficient {
            for id in &remaining {
                decisions.push((id.clone(), AssignmentStatus::ConfirmedWaiver));
            }
        }

        let now = Utc::now().naive_utc();
        for (id, status) in &decisions {
            if status.is_rejected() {
                if !record.waived_request_ids.contains(id) {
                    record.waived_request_ids.push(id.clone());
                }
                record.rejected.insert(id.clone(), *status);
            } else {
                record.confirmed_request_ids.push(id.clone());
            }
        }
        if sufficient {
            record.close(now);
        } else {
            record.status = ConflictStatus::FeePhase;
            record.updated_at = now;
        }
        Ok(Resolution {
            action_type: ActionType::WaiverDecision,
            record,
            decisions,
        })
    }

    fn plan_fee(&self, conflict_id: &str) -> EngineResult<Resolution> {
        let mut record = self.load_in_phase(conflict_id, ConflictStatus::FeePhase)?;
        let pending = record.pending_request_ids();
        let fees = self.total_fees(&pending)?;
        let amounts: Vec<(String, i64)> = pending
            .iter()
            .map(|id| (id.clone(), fees.get(id).copied().unwrap_or(0)))
            .collect();
        let capacity = record.capacity.saturating_sub(record.confirmed_request_ids.len());
        let ranking = rank_by_amount(&amounts, capacity);

        let mut decisions: Decisions = Vec::new();
        decisions.extend(ranking.winners.iter().map(|id| (id.clone(), AssignmentStatus::ConfirmedFee)));
        decisions.extend(ranking.losers.iter().map(|id| (id.clone(), AssignmentStatus::RejectedFee)));
        decisions.extend(ranking.tied.iter().map(|id| (id.clone(), AssignmentStatus::InAuction)));

        let now = Utc::now().naive_utc();
        record.confirmed_request_ids.extend(ranking.winners.iter().cloned());
        for id in &ranking.losers {
            record.rejected.insert(id.clone(), AssignmentStatus::RejectedFee);
        }
        if ranking.tied.is_empty() {
            record.close(now);
        } else {
            record.auction_request_ids = ranking.tied.clone();
            record.auction_capacity = ranking.tied_capacity;
            record.status = ConflictStatus::AuctionPhase;
            record.updated_at = now;
        }
        tracing::debug!(
            conflict_id = %conflict_id,
            confirmed = ranking.winners.len(),
            rejected = ranking.losers.len(),
            auction = ranking.tied.len(),
            "费用排序结果"
        );
        Ok(Resolution {
            action_type: ActionType::FeeDecision,
            record,
            decisions,
        })
    }

    fn plan_auction(&self, conflict_id: &str, bids: &BTreeMap<String, Option<i64>>) -> EngineResult<Resolution> {
        let mut record = self.load_in_phase(conflict_id, ConflictStatus::AuctionPhase)?;
        if let Some(unknown) = bids.keys().find(|id| !record.auction_request_ids.contains(id)) {
            return Err(EngineError::Validation(format!(
                "申请 {} 不在冲突 {} 的最高价程序中",
                unknown, conflict_id
            )));
        }

        let fees = self.total_fees(&record.auction_request_ids)?;
        let mut decisions: Decisions = Vec::new();
        let mut valid: Vec<(String, i64)> = Vec::new();
        for id in &record.auction_request_ids {
            match bids.get(id).copied().flatten() {
                None => decisions.push((id.clone(), AssignmentStatus::RejectedNoBid)),
                Some(bid) if bid <= fees.get(id).copied().unwrap_or(0) => {
                    decisions.push((id.clone(), AssignmentStatus::RejectedInvalidBid))
                }
                Some(bid) => valid.push((id.clone(), bid)),
            }
        }

        let ranking = rank_by_amount(&valid, record.auction_capacity);
        decisions.extend(ranking.winners.iter().map(|id| (id.clone(), AssignmentStatus::ConfirmedAuction)));
        decisions.extend(ranking.losers.iter().map(|id| (id.clone(), AssignmentStatus::RejectedAuction)));
        decisions.extend(ranking.tied.iter().map(|id| (id.clone(), AssignmentStatus::InAuction)));

        let now = Utc::now().naive_utc();
        for (id, bid) in &valid {
            record.bids.insert(id.clone(), *bid);
        }
        for (id, status) in &decisions {
            if status.is_rejected() {
                record.rejected.insert(id.clone(), *status);
            }
        }
        record.confirmed_request_ids.extend(ranking.winners.iter().cloned());
        if ranking.tied.is_empty() {
            record.close(now);
        } else {
            record.auction_request_ids = ranking.tied.clone();
            record.auction_capacity = ranking.tied_capacity;
            record.updated_at = now;
        }
        tracing::debug!(
            conflict_id = %conflict_id,
            confirmed = ranking.winners.len(),
            still_tied = ranking.tied.len(),
            "最高价轮次结果"
        );
        Ok(Resolution {
            action_type: ActionType::AuctionDecision,
            record,
            decisions,
        })
    }

    // ==========================================
    // 写入
    // ==========================================

    /// 先在副本上试算全部迁移, 全部合法后再逐个写入申请、记录与日志
    fn commit(&self, resolutions: Vec<Resolution>, actor: &str) -> EngineResult<Vec<ConflictRecord>> {
        let ids: Vec<String> = resolutions
            .iter()
            .flat_map(|res| res.decisions.iter().map(|(id, _)| id.clone()))
            .collect();
        let mut trial: HashMap<String, Request> = self
            .repos
            .request_repo
            .find_by_ids(&ids)?
            .into_iter()
            .map(|r| (r.request_id.clone(), r))
            .collect();
        for res in &resolutions {
            for (id, next) in &res.decisions {
                let copy = trial
                    .get_mut(id)
                    .ok_or_else(|| EngineError::not_found("Request", id))?;
                decide(&res.record, copy, *next)?;
            }
        }

        let mut records = Vec::with_capacity(resolutions.len());
        for res in resolutions {
            for (id, next) in &res.decisions {
                apply_to_request(&self.repos.request_repo, id, |r| decide(&res.record, r, *next))?;
            }
            self.repos.conflict_repo.save(&res.record)?;
            self.log_decision(res.action_type, actor, &res.record, &res.decisions)?;
            tracing::info!(
                conflict_id = %res.record.conflict_id,
                action = res.action_type.as_str(),
                decisions = res.decisions.len(),
                status = %res.record.status,
                "冲突决定已写入"
            );
            records.push(res.record);
        }
        Ok(records)
    }

    fn commit_one(&self, resolution: Resolution, actor: &str) -> EngineResult<ConflictRecord> {
        let conflict_id = resolution.record.conflict_id.clone();
        self.commit(vec![resolution], actor)?
            .pop()
            .ok_or_else(|| EngineError::not_found("ConflictRecord", &conflict_id))
    }

    fn load_in_phase(&self, conflict_id: &str, phase: ConflictStatus) -> EngineResult<ConflictRecord> {
        let record = self
            .repos
            .conflict_repo
            .find_by_id(conflict_id)?
            .ok_or_else(|| EngineError::not_found("ConflictRecord", conflict_id))?;
        if record.status != phase {
            return Err(EngineError::StateConflict(format!(
                "冲突 {} 当前为 {}, 需要 {}",
                conflict_id, record.status, phase
            )));
        }
        Ok(record)
    }

    fn total_fees(&self, request_ids: &[String]) -> EngineResult<HashMap<String, i64>> {
        Ok(self
            .repos
            .request_repo
            .find_by_ids(request_ids)?
            .into_iter()
            .map(|r| (r.request_id, r.total_fee))
            .collect())
    }

    fn log_decision(
        &self,
        action_type: ActionType,
        actor: &str,
        record: &ConflictRecord,
        decisions: &Decisions,
    ) -> EngineResult<()> {
        let outcome: BTreeMap<&str, &str> = decisions
            .iter()
            .map(|(id, status)| (id.as_str(), status.to_db_str()))
            .collect();
        record_action(
            &self.repos.action_log_repo,
            action_type,
            actor,
            &record.conflict_id,
            json!({
                "trigger_id": record.trigger_id,
                "group_id": record.group_id,
                "status": record.status.to_db_str(),
                "decisions": outcome,
            }),
            None,
        )
    }
}
