// ==========================================
// 容量池归属与时间链集成测试
// ==========================================
// 测试目标: 容量池上限派生、前驱/后继互指 (含跨周)、删除后链修复
// ==========================================


use rail_capacity_alloc::api::{ApiError, PotQuery};
use rail_capacity_alloc::domain::TrafficDayGroup;
use rail_capacity_alloc::logging;
use test_helpers::{create_test_env, day_slot, t};

#[test]
fn test_pot_limit_follows_slot_count() {
    logging::init_test();
    let env = create_test_env().unwrap();

    let mut pot_id = String::new();
    for (i, minute) in [0, 15, 30, 45].iter().enumerate() {
        let slot = env
            .api
            .slots
            .create_slot(
                day_slot("A", "B", 2, TrafficDayGroup::MoFr, t(8, *minute), t(9, *minute), 100),
                "planner",
            )
            .unwrap();
        pot_id = slot.pot_id.unwrap();
        let pot = env.api.slots.get_pot(&pot_id).unwrap();
        assert_eq!(pot.pot.slot_ids.len(), i + 1);
        assert_eq!(pot.max_kapazitaet, (i + 1) * 7 / 10);
    }

    let pot = env.api.slots.get_pot(&pot_id).unwrap();
    assert_eq!(pot.max_kapazitaet, 2);
    assert!(pot_id.starts_with("KT-A-B-KW2-SPFV-"));
    assert!(pot_id.ends_with("-ZF0709"));
}

#[test]
fn test_chain_links_are_reciprocal_across_week_boundary() {
    logging::init_test();
    let env = create_test_env().unwrap();

    // KW2 "23-01" 与 KW3 "01-03" 在时间链上相邻
    let late = env
        .api
        .slots
        .create_slot(
            day_slot("A", "B", 2, TrafficDayGroup::MoFr, t(23, 10), t(23, 50), 100),
            "planner",
        )
        .unwrap();
    let early = env
        .api
        .slots
        .create_slot(
            day_slot("A", "B", 3, TrafficDayGroup::MoFr, t(1, 10), t(1, 50), 100),
            "planner",
        )
        .unwrap();
    let late_pot = late.pot_id.unwrap();
    let early_pot = early.pot_id.unwrap();

    let late_view = env.api.slots.get_pot(&late_pot).unwrap();
    let early_view = env.api.slots.get_pot(&early_pot).unwrap();
    assert_eq!(late_view.pot.successor_id.as_deref(), Some(early_pot.as_str()));
    assert_eq!(early_view.pot.predecessor_id.as_deref(), Some(late_pot.as_str()));

    // 更早的容量池插到链头
    let morning = env
        .api
        .slots
        .create_slot(
            day_slot("A", "B", 2, TrafficDayGroup::MoFr, t(9, 10), t(9, 50), 100),
            "planner",
        )
        .unwrap();
    let morning_pot = morning.pot_id.unwrap();
    let morning_view = env.api.slots.get_pot(&morning_pot).unwrap();
    assert_eq!(morning_view.pot.predecessor_id, None);
    assert_eq!(morning_view.pot.successor_id.as_deref(), Some(late_pot.as_str()));
    let late_view = env.api.slots.get_pot(&late_pot).unwrap();
    assert_eq!(late_view.pot.predecessor_id.as_deref(), Some(morning_pot.as_str()));

    // 删除中间容量池的唯一槽位 → 容量池删除, 两侧直接相连
    env.api.slots.delete_slot(&late.slot_id, "planner").unwrap();
    assert!(matches!(env.api.slots.get_pot(&late_pot), Err(ApiError::NotFound(_))));
    let morning_view = env.api.slots.get_pot(&morning_pot).unwrap();
    let early_view = env.api.slots.get_pot(&early_pot).unwrap();
    assert_eq!(morning_view.pot.successor_id.as_deref(), Some(early_pot.as_str()));
    assert_eq!(early_view.pot.predecessor_id.as_deref(), Some(morning_pot.as_str()));

    let pots = env
        .api
        .slots
        .list_pots(PotQuery {
            section: Some("A-B".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(pots.total, 2);
}

#[test]
fn test_traffic_groups_form_separate_pots() {
    let env = create_test_env().unwrap();
    let weekday = env
        .api
        .slots
        .create_slot(
            day_slot("A", "B", 2, TrafficDayGroup::MoFr, t(8, 0), t(9, 0), 100),
            "planner",
        )
        .unwrap();
    let weekend = env
        .api
        .slots
        .create_slot(
            day_slot("A", "B", 2, TrafficDayGroup::SaSo, t(8, 0), t(9, 0), 100),
            "planner",
        )
        .unwrap();
    assert_ne!(weekday.pot_id, weekend.pot_id);

    // 每日分组只用于申请, 槽位不接受
    let err = env
        .api
        .slots
        .create_slot(
            day_slot("A", "B", 2, TrafficDayGroup::Daily, t(10, 0), t(11, 0), 100),
            "planner",
        )
        .unwrap_err();
    assert!(matches!(err, ApiError::ValidationError(_)));
}
