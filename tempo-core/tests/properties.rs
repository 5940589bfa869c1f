use chrono::{Duration, NaiveDate, TimeZone, Utc};
use proptest::prelude::*;
use tempo_core::{plan_allocation, AllocateRequest, FocusBlock, PriorityLevel, SchedulerPreferences, Task};

fn base_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
}

fn priority(n: u8) -> PriorityLevel {
    match n {
        0 => PriorityLevel::P1,
        1 => PriorityLevel::P2,
        2 => PriorityLevel::P3,
        _ => PriorityLevel::P4,
    }
}

fn arb_tasks() -> impl Strategy<Value = Vec<Task>> {
    prop::collection::vec((0u8..4, 1u32..=40, prop::option::of(0i64..6)), 0..20).prop_map(|rows| {
        rows
            .into_iter()
            .enumerate()
            .map(|(i, (p, quarters, due))| {
                let mut t = Task::new(format!("t{i}"), "generated")
                    .with_priority(priority(p))
                    .with_duration(quarters * 15);
                t.due_date = due.map(|d| base_day() + Duration::days(d));
                t
            })
            .collect()
    })
}

fn arb_blocks() -> impl Strategy<Value = Vec<FocusBlock>> {
    prop::collection::vec((0i64..5, 7u32..18, 1i64..16), 0..8).prop_map(|rows| {
        rows
            .into_iter()
            .enumerate()
            .map(|(i, (day, hour, quarters))| {
                let d = base_day() + Duration::days(day);
                let start = Utc
                    .from_utc_datetime(&d.and_hms_opt(hour, 0, 0).unwrap());
                let mut b = FocusBlock::draft_for(&Task::new(format!("cal{i}"), "calendar"), start, "UTC");
                b.end_time = start + Duration::minutes(quarters * 15);
                b.metadata.task_id = None;
                b
            })
            .collect()
    })
}

fn arb_request() -> impl Strategy<Value = AllocateRequest> {
    (arb_tasks(), arb_blocks(), 0u32..5, prop::option::of(60u32..600)).prop_map(
        |(tasks, blocks, horizon, cap)| {
            let mut preferences = SchedulerPreferences::default().with_horizon_days(horizon);
            preferences.max_daily_minutes = cap;
            AllocateRequest {
                tasks,
                existing_blocks: blocks,
                preferences,
                target_date: base_day(),
                not_before: None,
            }
        },
    )
}

proptest! {
    #[test]
    fn created_blocks_never_overlap_anything(req in arb_request()) {
        let stamp = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let plan = plan_allocation(&req, stamp).unwrap();

        for (i, a) in plan.created_blocks.iter().enumerate() {
            for b in &plan.created_blocks[i + 1..] {
                prop_assert!(!a.interval().overlaps(&b.interval()));
            }
            for existing in &req.existing_blocks {
                prop_assert!(!a.interval().overlaps(&existing.interval()));
            }
        }
    }

    #[test]
    fn placements_respect_deadlines_and_working_hours(req in arb_request()) {
        let stamp = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let plan = plan_allocation(&req, stamp).unwrap();
        let prefs = &req.preferences;

        for st in &plan.scheduled_tasks {
            let day = st.scheduled_start.date_naive();
            if let Some(due) = st.task.due_date {
                prop_assert!(day <= due);
            }
            prop_assert!(day >= req.target_date);
            prop_assert!(day <= prefs.horizon_end(req.target_date));
            prop_assert!(st.scheduled_start.time() >= prefs.working_hours_start);
            prop_assert!(st.scheduled_end.time() <= prefs.working_hours_end);
            prop_assert_eq!(
                (st.scheduled_end - st.scheduled_start).num_minutes(),
                i64::from(st.task.duration_minutes)
            );
        }
    }

    #[test]
    fn at_risk_and_scheduled_are_disjoint(req in arb_request()) {
        let stamp = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let plan = plan_allocation(&req, stamp).unwrap();
        for r in &plan.at_risk_tasks {
            prop_assert!(plan.scheduled_tasks.iter().all(|s| s.task.id != r.task.id));
            prop_assert!(r.task.scheduled_block_id.is_none());
        }
        for s in &plan.scheduled_tasks {
            prop_assert!(!s.task.scheduling_metadata.at_risk);
        }
        prop_assert_eq!(plan.summary.total_scheduled + plan.summary.total_unscheduled, req.tasks.len());
    }

    #[test]
    fn plans_are_deterministic(req in arb_request()) {
        let stamp = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let a = serde_json::to_string(&plan_allocation(&req, stamp).unwrap()).unwrap();
        let b = serde_json::to_string(&plan_allocation(&req, stamp).unwrap()).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn daily_cap_is_never_exceeded_by_new_work(req in arb_request()) {
        let stamp = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let plan = plan_allocation(&req, stamp).unwrap();
        let cap = u64::from(req.preferences.daily_cap());
        let mut per_day: std::collections::BTreeMap<NaiveDate, u64> = Default::default();
        for st in &plan.scheduled_tasks {
            *per_day.entry(st.scheduled_start.date_naive()).or_default() += u64::from(st.task.duration_minutes);
        }
        for minutes in per_day.values() {
            prop_assert!(*minutes <= cap);
        }
    }
}
