// ==========================================
// 申请提交流程集成测试
// ==========================================
// 测试目标: 槽位匹配、费用计算、跨零点同型槽位、撤回/作废、API 错误分类
// ==========================================


use rail_capacity_alloc::api::{ApiError, InvalidateRequest, RequestQuery, SlotQuery};
use rail_capacity_alloc::domain::{ActionType, LegKind, OverallStatus, TrafficDayGroup};
use rail_capacity_alloc::engine::RequestDraft;
use rail_capacity_alloc::logging;
use test_helpers::{
    create_test_env, create_weekday_slot, d, day_slot, leg, night_slot, submit_weekday, t,
    weekday_draft,
};

#[test]
fn test_daily_two_leg_request_fee_over_two_weeks() {
    logging::init_test();
    let env = create_test_env().unwrap();

    for week in [2, 3] {
        for group in [TrafficDayGroup::MoFr, TrafficDayGroup::SaSo] {
            env.api
                .slots
                .create_slot(day_slot("A", "B", week, group, t(8, 0), t(9, 0), 100), "planner")
                .unwrap();
            env.api
                .slots
                .create_slot(day_slot("B", "C", week, group, t(9, 30), t(10, 30), 50), "planner")
                .unwrap();
        }
    }

    let request = env
        .api
        .requests
        .submit(
            RequestDraft {
                request_id: Some("R-DAILY".to_string()),
                operator: "EVU-1".to_string(),
                traffic_type: "SPFV".to_string(),
                traffic_day_group: TrafficDayGroup::Daily,
                valid_from: d(2025, 1, 6),
                valid_to: d(2025, 1, 19),
                legs: vec![
                    leg("A", "B", t(8, 0), t(9, 0), LegKind::Tag),
                    leg("B", "C", t(9, 30), t(10, 30), LegKind::Tag),
                ],
            },
            "op",
        )
        .unwrap();

    // 14 个运行日 × (100 + 50)
    assert_eq!(request.total_fee, 2100);
    assert_eq!(request.assignments.len(), 8);
    assert_eq!(request.status, OverallStatus::InConflictCheck);

    let matched = env
        .api
        .slots
        .list_slots(SlotQuery {
            from: Some("A".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(matched.total, 4);
    assert!(matched
        .items
        .iter()
        .all(|s| s.request_ids == vec!["R-DAILY".to_string()]));

    let history = env.api.requests.get_history("R-DAILY").unwrap();
    assert!(history
        .iter()
        .any(|log| log.action_type == ActionType::RequestSubmit.as_str()));
}

#[test]
fn test_night_leg_across_midnight_claims_companion_slot() {
    logging::init_test();
    let env = create_test_env().unwrap();

    let weekday = env
        .api
        .slots
        .create_slot(night_slot(2, TrafficDayGroup::MoFr, "23-01", 60, 90, 80), "planner")
        .unwrap();
    let weekend = env
        .api
        .slots
        .create_slot(night_slot(2, TrafficDayGroup::SaSo, "23-01", 60, 90, 80), "planner")
        .unwrap();
    assert_eq!(weekday.traffic_type, "ALL");

    let request = env
        .api
        .requests
        .submit(
            RequestDraft {
                request_id: Some("R-NIGHT".to_string()),
                operator: "EVU-2".to_string(),
                traffic_type: "SGV".to_string(),
                traffic_day_group: TrafficDayGroup::MoFr,
                valid_from: d(2025, 1, 6),
                valid_to: d(2025, 1, 10),
                legs: vec![leg("A", "B", t(23, 30), t(0, 45), LegKind::Nacht)],
            },
            "op",
        )
        .unwrap();

    let slot_ids: Vec<&str> = request.assignments.iter().map(|a| a.slot_id.as_str()).collect();
    assert_eq!(slot_ids, vec![weekday.slot_id.as_str(), weekend.slot_id.as_str()]);
    assert_eq!(request.assignments[1].traffic_day_group, TrafficDayGroup::SaSo);
    assert_eq!(request.assignments[1].leg_index, 0);
    // 费用只按首个匹配槽位: 5 个工作日 × 80
    assert_eq!(request.total_fee, 400);
}

#[test]
fn test_weekend_night_leg_claims_next_week_weekday_slot() {
    logging::init_test();
    let env = create_test_env().unwrap();

    let weekend = env
        .api
        .slots
        .create_slot(night_slot(2, TrafficDayGroup::SaSo, "23-01", 60, 90, 80), "planner")
        .unwrap();
    let next_weekday = env
        .api
        .slots
        .create_slot(night_slot(3, TrafficDayGroup::MoFr, "23-01", 60, 90, 80), "planner")
        .unwrap();

    let request = env
        .api
        .requests
        .submit(
            RequestDraft {
                request_id: Some("R-WEEKEND".to_string()),
                operator: "EVU-4".to_string(),
                traffic_type: "SGV".to_string(),
                traffic_day_group: TrafficDayGroup::SaSo,
                valid_from: d(2025, 1, 11),
                valid_to: d(2025, 1, 12),
                legs: vec![leg("A", "B", t(23, 30), t(0, 45), LegKind::Nacht)],
            },
            "op",
        )
        .unwrap();

    let matched: Vec<(&str, u32, TrafficDayGroup)> = request
        .assignments
        .iter()
        .map(|a| (a.slot_id.as_str(), a.week, a.traffic_day_group))
        .collect();
    assert_eq!(
        matched,
        vec![
            (weekend.slot_id.as_str(), 2, TrafficDayGroup::SaSo),
            (next_weekday.slot_id.as_str(), 3, TrafficDayGroup::MoFr),
        ]
    );
    // 2 个周末运行日 × 80
    assert_eq!(request.total_fee, 160);
    assert_eq!(
        env.api.slots.get_slot(&next_weekday.slot_id).unwrap().request_ids,
        vec!["R-WEEKEND".to_string()]
    );
}

#[test]
fn test_daily_night_leg_claims_companion_beyond_validity() {
    logging::init_test();
    let env = create_test_env().unwrap();

    let weekday = env
        .api
        .slots
        .create_slot(night_slot(2, TrafficDayGroup::MoFr, "23-01", 60, 90, 80), "planner")
        .unwrap();
    let weekend = env
        .api
        .slots
        .create_slot(night_slot(2, TrafficDayGroup::SaSo, "23-01", 60, 90, 80), "planner")
        .unwrap();

    let draft = |id: &str| RequestDraft {
        request_id: Some(id.to_string()),
        operator: "EVU-5".to_string(),
        traffic_type: "SGV".to_string(),
        traffic_day_group: TrafficDayGroup::Daily,
        valid_from: d(2025, 1, 6),
        valid_to: d(2025, 1, 12),
        legs: vec![leg("A", "B", t(23, 30), t(0, 45), LegKind::Nacht)],
    };

    // KW3 Mo-Fr 不存在: 跳过, 不算失败
    let first = env.api.requests.submit(draft("R-D1"), "op").unwrap();
    let slot_ids: Vec<&str> = first.assignments.iter().map(|a| a.slot_id.as_str()).collect();
    assert_eq!(slot_ids, vec![weekday.slot_id.as_str(), weekend.slot_id.as_str()]);
    // 7 个运行日 × 80
    assert_eq!(first.total_fee, 560);

    // KW3 Mo-Fr 存在: 有效期外的下周槽位也被占用
    let next_weekday = env
        .api
        .slots
        .create_slot(night_slot(3, TrafficDayGroup::MoFr, "23-01", 60, 90, 80), "planner")
        .unwrap();
    let second = env.api.requests.submit(draft("R-D2"), "op").unwrap();
    let matched: Vec<(&str, u32, TrafficDayGroup)> = second
        .assignments
        .iter()
        .map(|a| (a.slot_id.as_str(), a.week, a.traffic_day_group))
        .collect();
    assert_eq!(
        matched,
        vec![
            (weekday.slot_id.as_str(), 2, TrafficDayGroup::MoFr),
            (weekend.slot_id.as_str(), 2, TrafficDayGroup::SaSo),
            (next_weekday.slot_id.as_str(), 3, TrafficDayGroup::MoFr),
        ]
    );
    assert_eq!(second.total_fee, 560);
}

#[test]
fn test_fee_overflow_rejects_request_without_persisting() {
    let env = create_test_env().unwrap();
    env.api
        .slots
        .create_slot(
            day_slot("A", "B", 2, TrafficDayGroup::MoFr, t(8, 0), t(9, 0), i64::MAX / 2),
            "planner",
        )
        .unwrap();

    let err = env.api.requests.submit(weekday_draft("R-HUGE", 0), "op").unwrap_err();
    assert!(matches!(err, ApiError::ValidationError(_)));
    assert!(matches!(env.api.requests.get_request("R-HUGE"), Err(ApiError::NotFound(_))));
}

#[test]
fn test_night_leg_outside_travel_range_fails_without_persisting() {
    let env = create_test_env().unwrap();
    env.api
        .slots
        .create_slot(night_slot(2, TrafficDayGroup::MoFr, "23-01", 60, 70, 80), "planner")
        .unwrap();

    let err = env
        .api
        .requests
        .submit(
            RequestDraft {
                request_id: Some("R-LONG".to_string()),
                operator: "EVU-3".to_string(),
                traffic_type: "SGV".to_string(),
                traffic_day_group: TrafficDayGroup::MoFr,
                valid_from: d(2025, 1, 6),
                valid_to: d(2025, 1, 10),
                legs: vec![leg("A", "B", t(23, 30), t(1, 0), LegKind::Nacht)],
            },
            "op",
        )
        .unwrap_err();
    assert!(matches!(err, ApiError::ValidationError(_)));
    assert_eq!(err.code(), "VALIDATION");
    assert!(matches!(env.api.requests.get_request("R-LONG"), Err(ApiError::NotFound(_))));
}

#[test]
fn test_withdraw_releases_membership_and_blocks_second_withdraw() {
    logging::init_test();
    let env = create_test_env().unwrap();
    let (slot_id, pot_id) = create_weekday_slot(&env, 0);
    submit_weekday(&env, "R1", 0);
    submit_weekday(&env, "R2", 0);

    let withdrawn = env.api.requests.withdraw("R1", "op").unwrap();
    assert_eq!(withdrawn.status, OverallStatus::Withdrawn);
    let slot = env.api.slots.get_slot(&slot_id).unwrap();
    assert_eq!(slot.request_ids, vec!["R2".to_string()]);
    let pot = env.api.slots.get_pot(&pot_id).unwrap();
    assert_eq!(pot.pot.request_ids, vec!["R2".to_string()]);

    let err = env.api.requests.withdraw("R1", "op").unwrap_err();
    assert!(matches!(err, ApiError::StateConflict(_)));

    // 作废只改状态
    let invalid = env
        .api
        .requests
        .invalidate(
            "R2",
            InvalidateRequest {
                reason: Some("重复申请".to_string()),
            },
            "op",
        )
        .unwrap();
    assert_eq!(invalid.status, OverallStatus::Invalidated);
    assert_eq!(env.api.slots.get_slot(&slot_id).unwrap().request_ids, vec!["R2".to_string()]);

    let active = env
        .api
        .requests
        .list_requests(RequestQuery {
            status: Some(OverallStatus::Withdrawn),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(active.total, 1);
}

#[test]
fn test_api_error_classification() {
    let env = create_test_env().unwrap();
    create_weekday_slot(&env, 0);
    submit_weekday(&env, "R1", 0);

    // 重复申请ID
    let err = env.api.requests.submit(weekday_draft("R1", 0), "op").unwrap_err();
    assert_eq!(err.code(), "STATE_CONFLICT");

    // 无匹配槽位
    let err = env.api.requests.submit(weekday_draft("R2", 15), "op").unwrap_err();
    assert_eq!(err.code(), "VALIDATION");

    // 必填字段
    let mut draft = weekday_draft("R3", 0);
    draft.operator = "  ".to_string();
    assert!(matches!(
        env.api.requests.submit(draft, "op"),
        Err(ApiError::ValidationError(_))
    ));
    assert!(matches!(
        env.api.requests.withdraw("R1", ""),
        Err(ApiError::ValidationError(_))
    ));

    // 不存在
    assert!(matches!(env.api.requests.get_request("missing"), Err(ApiError::NotFound(_))));
    assert!(matches!(
        env.api.conflicts.resolve_fee("missing", "op"),
        Err(ApiError::NotFound(_))
    ));

    // 已匹配申请的槽位不能删除
    let slot_id = env.api.slots.list_slots(SlotQuery::default()).unwrap().items[0].slot_id.clone();
    assert_eq!(
        env.api.slots.delete_slot(&slot_id, "planner").unwrap_err().code(),
        "STATE_CONFLICT"
    );
}
