//! Schedule metrics: makespan, per-product lateness, slack, utilization,
//! and the global priority ranking the export surface consumes.

use chrono::{NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;

use takt_core::{
    calendar::is_working_day, Criticality, InstanceId, Plan, ProductName, ScheduleRecord,
    TeamName,
};

use crate::dependencies::{Constraint, ConstraintIndex};
use crate::instances::InstanceSet;

/// Makespan marker for an incomplete schedule. Scenario scoring relies on
/// this dwarfing any real figure.
pub const INCOMPLETE_MAKESPAN_DAYS: i64 = 999_999;

/// Slack values past this horizon read as unbounded.
const SLACK_SANITY_HOURS: f64 = 365.0 * 24.0;

/// Whole working days between the earliest start and the latest end across
/// all records. A day counts when it is working for any product.
pub fn makespan_working_days(
    plan: &Plan,
    schedule: &BTreeMap<InstanceId, ScheduleRecord>,
    total_instances: usize,
) -> i64 {
    if schedule.is_empty() {
        return 0;
    }
    if schedule.len() < total_instances {
        return INCOMPLETE_MAKESPAN_DAYS;
    }

    let start = schedule.values().map(|r| r.start).min().expect("non-empty");
    let end = schedule.values().map(|r| r.end).max().expect("non-empty");

    let mut current = start.date();
    let end_date = end.date();
    let mut working_days = 0i64;
    while current <= end_date {
        let works_somewhere = if plan.products.is_empty() {
            is_working_day(current, None)
        } else {
            plan.products.values().any(|p| is_working_day(current, Some(p)))
        };
        if works_somewhere {
            working_days += 1;
        }
        current = match current.succ_opt() {
            Some(d) => d,
            None => break,
        };
    }
    working_days
}

/// Lateness summary for one product.
#[derive(Clone, Debug)]
pub struct ProductLateness {
    pub delivery: NaiveDateTime,
    /// Latest end among the product's placed instances; `None` when
    /// nothing of the product was scheduled.
    pub projected_completion: Option<NaiveDateTime>,
    /// Whole days late (negative = early); `None` without a completion.
    pub lateness_days: Option<i64>,
    pub on_time: bool,
    pub total_tasks: usize,
    /// Instance counts per task-type display name.
    pub breakdown: BTreeMap<String, usize>,
}

/// Per-product lateness across the schedule.
pub fn lateness_by_product(
    plan: &Plan,
    schedule: &BTreeMap<InstanceId, ScheduleRecord>,
) -> BTreeMap<ProductName, ProductLateness> {
    let mut out = BTreeMap::new();

    for (name, product) in &plan.products {
        let records: Vec<&ScheduleRecord> = schedule
            .values()
            .filter(|r| r.product.as_deref() == Some(name.as_str()))
            .collect();

        if records.is_empty() {
            out.insert(
                name.clone(),
                ProductLateness {
                    delivery: product.delivery,
                    projected_completion: None,
                    lateness_days: None,
                    on_time: false,
                    total_tasks: 0,
                    breakdown: BTreeMap::new(),
                },
            );
            continue;
        }

        let completion = records.iter().map(|r| r.end).max().expect("non-empty");
        // Floor division so a half-day-early finish reads as -1.
        let lateness = (completion - product.delivery)
            .num_seconds()
            .div_euclid(86_400);

        let mut breakdown: BTreeMap<String, usize> = BTreeMap::new();
        for r in &records {
            *breakdown.entry(r.task_type.to_string()).or_insert(0) += 1;
        }

        out.insert(
            name.clone(),
            ProductLateness {
                delivery: product.delivery,
                projected_completion: Some(completion),
                lateness_days: Some(lateness),
                on_time: lateness <= 0,
                total_tasks: records.len(),
                breakdown,
            },
        );
    }
    out
}

/// Slack in hours for a placed instance. `None` means unbounded: no
/// delivery commitment constrains it and no successor is placed, or the
/// computed figure is past any plausible horizon.
pub fn slack_hours(
    plan: &Plan,
    set: &InstanceSet,
    constraints: &[Constraint],
    index: &ConstraintIndex,
    schedule: &BTreeMap<InstanceId, ScheduleRecord>,
    id: &InstanceId,
) -> Option<f64> {
    let record = schedule.get(id)?;
    let delivery = set
        .get(id)
        .and_then(|t| t.product.as_deref())
        .and_then(|p| plan.products.get(p))
        .map(|p| p.delivery);

    let mut successor_bound: Option<NaiveDateTime> = None;
    let duration = chrono::Duration::minutes(record.duration_minutes);
    for c in index.successors_of(constraints, id) {
        if let Some(succ) = schedule.get(&c.second) {
            let required_start = succ.start - duration;
            successor_bound =
                Some(successor_bound.map_or(required_start, |b| b.min(required_start)));
        }
    }

    let latest_start = successor_bound.or(delivery)?;
    let hours = (latest_start - record.start).num_seconds() as f64 / 3600.0;
    if hours.abs() > SLACK_SANITY_HOURS {
        return None;
    }
    Some(hours.max(0.0))
}

/// Slack class: under two days is critical, under five buffered, anything
/// else (including unbounded) flexible.
pub fn classify_criticality(slack: Option<f64>) -> Criticality {
    match slack {
        Some(h) if h < 48.0 => Criticality::Critical,
        Some(h) if h < 120.0 => Criticality::Buffer,
        _ => Criticality::Flexible,
    }
}

/// Slack classes for every placed instance.
pub fn criticality_classes(
    plan: &Plan,
    set: &InstanceSet,
    constraints: &[Constraint],
    index: &ConstraintIndex,
    schedule: &BTreeMap<InstanceId, ScheduleRecord>,
) -> BTreeMap<InstanceId, Criticality> {
    schedule
        .keys()
        .map(|id| {
            let slack = slack_hours(plan, set, constraints, index, schedule, id);
            (id.clone(), classify_criticality(slack))
        })
        .collect()
}

/// Percent of a team's daily capacity consumed by work starting on `date`,
/// against the plan's loaded capacity figure.
pub fn day_utilization(
    plan: &Plan,
    schedule: &BTreeMap<InstanceId, ScheduleRecord>,
    team_skill: &str,
    date: NaiveDate,
) -> f64 {
    let capacity = plan.team_capacity(team_skill).unwrap_or(0);
    day_utilization_with_capacity(plan, schedule, team_skill, date, capacity)
}

/// Same reading against an explicit capacity — what the optimizers use
/// while they hold a capacity vector that differs from the plan's.
/// Available minutes come from the team's real shift windows.
pub fn day_utilization_with_capacity(
    plan: &Plan,
    schedule: &BTreeMap<InstanceId, ScheduleRecord>,
    team_skill: &str,
    date: NaiveDate,
    capacity: u32,
) -> f64 {
    if capacity == 0 {
        return 0.0;
    }

    let booked: i64 = schedule
        .values()
        .filter(|r| r.team_skill == team_skill && r.start.date() == date)
        .map(|r| r.duration_minutes * i64::from(r.headcount))
        .sum();

    let available: i64 = plan
        .shifts_for(team_skill)
        .iter()
        .filter_map(|s| plan.shift_hours.get(s))
        .map(|span| span.minutes() * i64::from(capacity))
        .sum();

    if available == 0 {
        return 0.0;
    }
    booked as f64 / available as f64 * 100.0
}

/// Average utilization across teams on the first working day only — the
/// continuous-flow reading of how hard the line runs once it is primed.
pub fn initial_utilization(plan: &Plan, schedule: &BTreeMap<InstanceId, ScheduleRecord>) -> f64 {
    let Some(first_day) = schedule.values().map(|r| r.start.date()).min() else {
        return 0.0;
    };

    let mut total = 0.0f64;
    let mut teams = 0usize;
    for team in plan
        .mechanic_teams
        .keys()
        .chain(plan.quality_teams.keys())
    {
        if plan.team_capacity(team).unwrap_or(0) == 0 {
            continue;
        }
        total += day_utilization(plan, schedule, team, first_day);
        teams += 1;
    }
    if teams == 0 {
        0.0
    } else {
        total / teams as f64
    }
}

/// One row of the global priority ranking.
#[derive(Clone, Debug)]
pub struct RankedTask {
    pub id: InstanceId,
    /// 1-based position after sorting by (scheduled start, slack).
    pub rank: usize,
    pub slack_hours: Option<f64>,
    pub criticality: Criticality,
}

/// Rank the placed instances by scheduled start, then slack.
pub fn rank_schedule(
    plan: &Plan,
    set: &InstanceSet,
    constraints: &[Constraint],
    index: &ConstraintIndex,
    schedule: &BTreeMap<InstanceId, ScheduleRecord>,
) -> Vec<RankedTask> {
    let mut rows: Vec<(NaiveDateTime, f64, InstanceId, Option<f64>)> = schedule
        .iter()
        .map(|(id, record)| {
            let slack = slack_hours(plan, set, constraints, index, schedule, id);
            (record.start, slack.unwrap_or(f64::INFINITY), id.clone(), slack)
        })
        .collect();
    rows.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then(a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .then(a.2.cmp(&b.2))
    });

    rows.into_iter()
        .enumerate()
        .map(|(i, (_, _, id, slack))| RankedTask {
            id,
            rank: i + 1,
            slack_hours: slack,
            criticality: classify_criticality(slack),
        })
        .collect()
}

/// Scenario-level scoreboard: the figures the capacity optimizers steer by.
#[derive(Clone, Debug)]
pub struct DeliveryPerformance {
    /// Worst product lateness in days; `None` when nothing scheduled.
    pub max_lateness_days: Option<i64>,
    pub products_on_time: usize,
    pub products_total: usize,
    pub scheduled_tasks: usize,
    pub total_tasks: usize,
    pub total_workforce: u32,
    pub avg_utilization: f64,
    pub makespan_days: i64,
    pub lateness_by_product: BTreeMap<ProductName, Option<i64>>,
}

impl DeliveryPerformance {
    pub fn is_complete(&self) -> bool {
        self.scheduled_tasks == self.total_tasks
    }
}

/// Evaluate a finished run against delivery targets. `capacities` is the
/// vector the run used (mechanic + quality figures count as workforce).
pub fn evaluate_delivery(
    plan: &Plan,
    schedule: &BTreeMap<InstanceId, ScheduleRecord>,
    total_tasks: usize,
    capacities: &BTreeMap<TeamName, u32>,
) -> DeliveryPerformance {
    let lateness = lateness_by_product(plan, schedule);
    let max_lateness_days = lateness.values().filter_map(|l| l.lateness_days).max();
    let products_on_time = lateness.values().filter(|l| l.on_time).count();

    let makespan = makespan_working_days(plan, schedule, total_tasks);
    let avg_utilization = if makespan > 0 && makespan < INCOMPLETE_MAKESPAN_DAYS {
        initial_utilization(plan, schedule)
    } else {
        0.0
    };

    let total_workforce: u32 = capacities
        .iter()
        .filter(|(team, _)| !team.contains("Customer"))
        .map(|(_, cap)| cap)
        .sum();

    DeliveryPerformance {
        max_lateness_days,
        products_on_time,
        products_total: lateness.len(),
        scheduled_tasks: schedule.len(),
        total_tasks,
        total_workforce,
        avg_utilization,
        makespan_days: makespan,
        lateness_by_product: lateness
            .into_iter()
            .map(|(p, l)| (p, l.lateness_days))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use takt_core::{Product, ShiftSpan, TaskType, Team, TeamKind};

    fn dt(d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 8, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn record(
        start: NaiveDateTime,
        minutes: i64,
        team: &str,
        product: Option<&str>,
    ) -> ScheduleRecord {
        ScheduleRecord {
            start,
            end: start + chrono::Duration::minutes(minutes),
            team: team.to_string(),
            team_skill: team.to_string(),
            skill: None,
            shift: "1st".into(),
            product: product.map(str::to_string),
            duration_minutes: minutes,
            headcount: 1,
            task_type: TaskType::Production,
            template: Some(1),
            criticality: None,
        }
    }

    fn plan_with_product(delivery: NaiveDateTime) -> Plan {
        let mut plan = Plan::default();
        plan.shift_hours
            .insert("1st".into(), ShiftSpan::new(6 * 60, 14 * 60 + 30));
        plan.mechanic_teams.insert(
            "M1".into(),
            Team::new("M1", TeamKind::Mechanic, 2).with_shifts(&["1st"]),
        );
        plan.products.insert("P".into(), Product::new("P", delivery));
        plan
    }

    #[test]
    fn makespan_counts_working_days_only() {
        let plan = plan_with_product(dt(29, 0, 0));
        let mut schedule = BTreeMap::new();
        // Friday and the following Monday: weekend days don't count.
        schedule.insert(
            InstanceId::production("P", 1),
            record(dt(22, 6, 0), 60, "M1", Some("P")),
        );
        schedule.insert(
            InstanceId::production("P", 2),
            record(dt(25, 6, 0), 60, "M1", Some("P")),
        );

        assert_eq!(makespan_working_days(&plan, &schedule, 2), 2);
    }

    #[test]
    fn makespan_sentinel_when_incomplete() {
        let plan = plan_with_product(dt(29, 0, 0));
        let mut schedule = BTreeMap::new();
        schedule.insert(
            InstanceId::production("P", 1),
            record(dt(25, 6, 0), 60, "M1", Some("P")),
        );
        assert_eq!(
            makespan_working_days(&plan, &schedule, 2),
            INCOMPLETE_MAKESPAN_DAYS
        );
        assert_eq!(makespan_working_days(&plan, &BTreeMap::new(), 2), 0);
    }

    #[test]
    fn lateness_floor_division() {
        let plan = plan_with_product(dt(26, 0, 0));
        let mut schedule = BTreeMap::new();
        // Ends 12 hours before delivery: one day early after flooring.
        schedule.insert(
            InstanceId::production("P", 1),
            record(dt(25, 11, 0), 60, "M1", Some("P")),
        );

        let lateness = lateness_by_product(&plan, &schedule);
        let p = &lateness["P"];
        assert_eq!(p.lateness_days, Some(-1));
        assert!(p.on_time);
    }

    #[test]
    fn lateness_when_nothing_scheduled() {
        let plan = plan_with_product(dt(26, 0, 0));
        let lateness = lateness_by_product(&plan, &BTreeMap::new());
        let p = &lateness["P"];
        assert_eq!(p.lateness_days, None);
        assert!(!p.on_time);
        assert_eq!(p.total_tasks, 0);
    }

    #[test]
    fn day_utilization_uses_shift_minutes() {
        let plan = plan_with_product(dt(29, 0, 0));
        let mut schedule = BTreeMap::new();
        // 255 minutes of one person against 510 * 2 available.
        schedule.insert(
            InstanceId::production("P", 1),
            record(dt(25, 6, 0), 255, "M1", Some("P")),
        );

        let util = day_utilization(&plan, &schedule, "M1", NaiveDate::from_ymd_opt(2025, 8, 25).unwrap());
        assert!((util - 25.0).abs() < 1e-9, "got {util}");
    }

    #[test]
    fn criticality_thresholds() {
        assert_eq!(classify_criticality(Some(10.0)), Criticality::Critical);
        assert_eq!(classify_criticality(Some(60.0)), Criticality::Buffer);
        assert_eq!(classify_criticality(Some(500.0)), Criticality::Flexible);
        assert_eq!(classify_criticality(None), Criticality::Flexible);
    }

    #[test]
    fn ranking_orders_by_start_then_slack() {
        let plan = plan_with_product(dt(29, 0, 0));
        let set = InstanceSet::default();
        let constraints: Vec<Constraint> = Vec::new();
        let index = ConstraintIndex::build(&constraints);

        let mut schedule = BTreeMap::new();
        schedule.insert(
            InstanceId::production("P", 2),
            record(dt(25, 8, 0), 60, "M1", Some("P")),
        );
        schedule.insert(
            InstanceId::production("P", 1),
            record(dt(25, 6, 0), 60, "M1", Some("P")),
        );

        let ranked = rank_schedule(&plan, &set, &constraints, &index, &schedule);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].id, InstanceId::production("P", 1));
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[1].id, InstanceId::production("P", 2));
    }
}
