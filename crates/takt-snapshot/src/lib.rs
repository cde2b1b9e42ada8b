//! # takt-snapshot
//!
//! One read-only snapshot object per scenario, shaped for the dashboard:
//! the placed tasks (capped at the top 1000 by global rank), capacity and
//! shift maps, per-product aggregates, utilization, and summary totals.
//! Field names serialize in camelCase to match the consuming side.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeMap;

use takt_solver::engine::ScheduleOutcome;
use takt_solver::metrics::{self, RankedTask};
use takt_solver::{EngineConfig, ScenarioContext};

/// Snapshots carry at most this many tasks; the rest is summarized by the
/// `truncated` flag and the totals.
pub const MAX_TASKS: usize = 1000;

/// Slack below this many hours flags a task as critical on the dashboard.
const CRITICAL_SLACK_HOURS: f64 = 24.0;

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub task_id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub product: String,
    pub team: String,
    pub team_skill: String,
    pub skill: String,
    pub start_time: String,
    pub end_time: String,
    pub duration: i64,
    pub mechanics: u32,
    pub shift: String,
    pub priority: usize,
    pub dependencies: Vec<String>,
    pub is_late_part_task: bool,
    pub is_rework_task: bool,
    pub is_quality_task: bool,
    pub is_customer_task: bool,
    pub is_critical: bool,
    pub slack_hours: Option<f64>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSnapshot {
    pub name: String,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub late_parts_count: usize,
    pub rework_count: usize,
    pub quality_count: usize,
    pub customer_count: usize,
    pub delivery_date: String,
    pub projected_completion: String,
    pub on_time: bool,
    pub lateness_days: i64,
    pub days_remaining: i64,
    pub critical_path: usize,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetrics {
    pub total_mechanics: u32,
    pub total_quality: u32,
    pub total_customer: u32,
    pub total_capacity: u32,
    pub critical_task_count: usize,
    pub late_part_task_count: usize,
    pub rework_task_count: usize,
    pub quality_task_count: usize,
    pub customer_task_count: usize,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioSnapshot {
    pub scenario_id: String,
    pub description: String,
    pub tasks: Vec<TaskSnapshot>,
    pub team_capacities: BTreeMap<String, u32>,
    pub teams: Vec<String>,
    pub team_shifts: BTreeMap<String, Vec<String>>,
    pub products: Vec<ProductSnapshot>,
    pub utilization: BTreeMap<String, f64>,
    pub total_workforce: u32,
    pub total_mechanics: u32,
    pub total_quality: u32,
    pub total_customer: u32,
    pub avg_utilization: f64,
    pub makespan: i64,
    pub on_time_rate: f64,
    pub max_lateness: i64,
    pub total_tasks: usize,
    pub displayed_tasks: usize,
    pub truncated: bool,
    pub metrics: SnapshotMetrics,
}

fn iso(t: NaiveDateTime) -> String {
    t.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Build the snapshot for one finished scenario run. `capacities` is the
/// merged team-skill vector the run actually used; `ranked` the global
/// priority ranking of its schedule.
pub fn build_snapshot(
    scenario_id: &str,
    description: &str,
    ctx: &ScenarioContext,
    capacities: &BTreeMap<String, u32>,
    outcome: &ScheduleOutcome,
    ranked: &[RankedTask],
    config: &EngineConfig,
) -> ScenarioSnapshot {
    let plan = &ctx.plan;
    let lateness = metrics::lateness_by_product(plan, &outcome.schedule);
    let makespan = metrics::makespan_working_days(plan, &outcome.schedule, outcome.total_instances);

    // Top of the ranking, capped for the dashboard.
    let mut tasks: Vec<TaskSnapshot> = Vec::new();
    for row in ranked.iter().take(MAX_TASKS) {
        let Some(record) = outcome.schedule.get(&row.id) else {
            continue;
        };

        let dependencies: Vec<String> = ctx
            .index
            .predecessors_of(&ctx.constraints, &row.id)
            .map(|c| c.first.to_string())
            .collect();

        tasks.push(TaskSnapshot {
            task_id: row.id.to_string(),
            task_type: record.task_type.to_string(),
            product: record.product.clone().unwrap_or_else(|| "Unknown".into()),
            team: record.team.clone(),
            team_skill: record.team_skill.clone(),
            skill: record.skill.clone().unwrap_or_default(),
            start_time: iso(record.start),
            end_time: iso(record.end),
            duration: record.duration_minutes,
            mechanics: record.headcount,
            shift: record.shift.clone(),
            priority: row.rank,
            dependencies,
            is_late_part_task: ctx.instances.late_parts.contains(&row.id),
            is_rework_task: ctx.instances.rework.contains(&row.id),
            is_quality_task: record.is_quality(),
            is_customer_task: record.is_customer(),
            is_critical: row.slack_hours.map_or(false, |s| s < CRITICAL_SLACK_HOURS),
            slack_hours: row.slack_hours,
        });
    }

    // Utilization over the whole schedule against the run's capacities.
    let mut team_minutes: BTreeMap<&str, i64> = BTreeMap::new();
    for record in outcome.schedule.values() {
        *team_minutes.entry(record.team_skill.as_str()).or_insert(0) +=
            record.duration_minutes * i64::from(record.headcount);
    }
    let mut utilization: BTreeMap<String, f64> = BTreeMap::new();
    let day_minutes = if makespan >= metrics::INCOMPLETE_MAKESPAN_DAYS {
        0
    } else {
        8 * 60 * makespan
    };
    for (team, capacity) in capacities {
        let value = if *capacity > 0 && day_minutes > 0 {
            let booked = team_minutes.get(team.as_str()).copied().unwrap_or(0) as f64;
            let available = (day_minutes * i64::from(*capacity)) as f64;
            (booked / available * 100.0).min(100.0)
        } else {
            0.0
        };
        utilization.insert(team.clone(), (value * 10.0).round() / 10.0);
    }
    let avg_utilization = if utilization.is_empty() {
        0.0
    } else {
        utilization.values().sum::<f64>() / utilization.len() as f64
    };

    // Product aggregates.
    let mut products: Vec<ProductSnapshot> = Vec::new();
    for (name, late) in &lateness {
        let critical_path = tasks
            .iter()
            .filter(|t| &t.product == name && t.is_critical)
            .count();
        products.push(ProductSnapshot {
            name: name.clone(),
            total_tasks: late.total_tasks,
            completed_tasks: 0,
            late_parts_count: late.breakdown.get("Late Part").copied().unwrap_or(0),
            rework_count: late.breakdown.get("Rework").copied().unwrap_or(0),
            quality_count: late.breakdown.get("Quality Inspection").copied().unwrap_or(0),
            customer_count: late.breakdown.get("Customer").copied().unwrap_or(0),
            delivery_date: iso(late.delivery),
            projected_completion: late.projected_completion.map(iso).unwrap_or_default(),
            on_time: late.on_time,
            lateness_days: late.lateness_days.unwrap_or(0),
            days_remaining: (late.delivery.date() - config.start.date()).num_days(),
            critical_path,
        });
    }

    let on_time_rate = if products.is_empty() {
        0.0
    } else {
        let on_time = products.iter().filter(|p| p.on_time).count();
        (on_time as f64 / products.len() as f64 * 1000.0).round() / 10.0
    };
    let max_lateness = products.iter().map(|p| p.lateness_days).max().unwrap_or(0);

    let total_mechanics: u32 = capacities
        .iter()
        .filter(|(t, _)| !t.contains("Quality") && !t.contains("Customer"))
        .map(|(_, c)| c)
        .sum();
    let total_quality: u32 = capacities
        .iter()
        .filter(|(t, _)| t.contains("Quality"))
        .map(|(_, c)| c)
        .sum();
    let total_customer: u32 = capacities
        .iter()
        .filter(|(t, _)| t.contains("Customer"))
        .map(|(_, c)| c)
        .sum();

    let team_shifts: BTreeMap<String, Vec<String>> = plan
        .mechanic_teams
        .values()
        .chain(plan.quality_teams.values())
        .chain(plan.customer_teams.values())
        .map(|t| (t.name.clone(), t.shifts.clone()))
        .collect();

    let snapshot_metrics = SnapshotMetrics {
        total_mechanics,
        total_quality,
        total_customer,
        total_capacity: total_mechanics + total_quality + total_customer,
        critical_task_count: tasks.iter().filter(|t| t.is_critical).count(),
        late_part_task_count: tasks.iter().filter(|t| t.is_late_part_task).count(),
        rework_task_count: tasks.iter().filter(|t| t.is_rework_task).count(),
        quality_task_count: tasks.iter().filter(|t| t.is_quality_task).count(),
        customer_task_count: tasks.iter().filter(|t| t.is_customer_task).count(),
    };

    ScenarioSnapshot {
        scenario_id: scenario_id.to_string(),
        description: description.to_string(),
        teams: capacities.keys().cloned().collect(),
        team_capacities: capacities.clone(),
        team_shifts,
        displayed_tasks: tasks.len(),
        truncated: ranked.len() > MAX_TASKS,
        total_tasks: ranked.len(),
        tasks,
        products,
        utilization,
        total_workforce: total_mechanics + total_quality + total_customer,
        total_mechanics,
        total_quality,
        total_customer,
        avg_utilization: (avg_utilization * 10.0).round() / 10.0,
        makespan,
        on_time_rate,
        max_lateness,
        metrics: snapshot_metrics,
    }
}

/// Rank a run and build its snapshot in one call.
pub fn snapshot_run(
    scenario_id: &str,
    description: &str,
    ctx: &ScenarioContext,
    capacities: &BTreeMap<String, u32>,
    outcome: &ScheduleOutcome,
    config: &EngineConfig,
) -> ScenarioSnapshot {
    let ranked = metrics::rank_schedule(
        &ctx.plan,
        &ctx.instances,
        &ctx.constraints,
        &ctx.index,
        &outcome.schedule,
    );
    build_snapshot(scenario_id, description, ctx, capacities, outcome, &ranked, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use takt_solver::scenario::{run_baseline, CapacityVector};

    const FIXTURE: &str = "\
==== SHIFT WORKING HOURS ====
Shift,Start,End
1st,6:00,14:30
==== MECHANIC TEAM CAPACITY ====
Mechanic Team,Capacity
Mechanic Team 1,2
==== MECHANIC TEAM WORKING CALENDARS ====
Mechanic Team,Shift
Mechanic Team 1,1st
==== QUALITY TEAM CAPACITY ====
Quality Team,Capacity
Quality Team 1,1
==== TASK RELATIONSHIPS TABLE ====
First,Second,Relationship Type
1,2,Finish <= Start
==== TASK DURATION AND RESOURCE TABLE ====
Task,Duration (minutes),Resource Type,Mechanics Required
1,60,Mechanic Team 1,1
2,90,Mechanic Team 1,1
==== PRODUCT LINE DELIVERY SCHEDULE ====
Product Line,Delivery Date
P,2025-09-10
==== PRODUCT LINE JOBS ====
Product Line,Task Start,Task End
P,1,2
==== QUALITY INSPECTION REQUIREMENTS ====
Primary Task,Quality Task,Quality Headcount Required,Quality Duration (minutes)
1,601,1,30
";

    fn snapshot() -> ScenarioSnapshot {
        let plan = takt_parser::parse_str(FIXTURE).unwrap();
        let ctx = ScenarioContext::build(plan).unwrap();
        let config = EngineConfig::default();
        let run = run_baseline(&ctx, &config);
        assert!(run.outcome.is_complete());

        let mut capacities: BTreeMap<String, u32> = BTreeMap::new();
        let vector = CapacityVector::from_plan(&ctx.plan);
        capacities.extend(vector.mechanic.clone());
        capacities.extend(vector.quality.clone());

        snapshot_run("baseline", "Baseline scenario", &ctx, &capacities, &run.outcome, &config)
    }

    #[test]
    fn snapshot_counts_and_ordering() {
        let snap = snapshot();
        assert_eq!(snap.scenario_id, "baseline");
        assert_eq!(snap.total_tasks, 3);
        assert_eq!(snap.displayed_tasks, 3);
        assert!(!snap.truncated);

        // Ranked by scheduled start: task 1, its inspection, then task 2.
        assert_eq!(snap.tasks[0].task_id, "P_1");
        assert_eq!(snap.tasks[0].priority, 1);
        assert_eq!(snap.tasks[1].task_id, "P_QI_1");
        assert!(snap.tasks[1].is_quality_task);
        assert_eq!(snap.tasks[2].task_id, "P_2");

        // The inspection depends on its primary.
        assert_eq!(snap.tasks[1].dependencies, vec!["P_1".to_string()]);
    }

    #[test]
    fn snapshot_totals_and_products() {
        let snap = snapshot();
        assert_eq!(snap.total_mechanics, 2);
        assert_eq!(snap.total_quality, 1);
        assert_eq!(snap.total_workforce, 3);
        assert_eq!(snap.products.len(), 1);

        let product = &snap.products[0];
        assert_eq!(product.name, "P");
        assert_eq!(product.total_tasks, 3);
        assert_eq!(product.quality_count, 1);
        assert!(product.on_time);
        assert!(product.lateness_days < 0);
        assert_eq!(snap.on_time_rate, 100.0);
        assert_eq!(snap.makespan, 1);
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let snap = snapshot();
        let json = serde_json::to_value(&snap).unwrap();

        assert!(json.get("scenarioId").is_some());
        assert!(json.get("teamCapacities").is_some());
        assert!(json.get("displayedTasks").is_some());
        let task = &json["tasks"][0];
        assert!(task.get("taskId").is_some());
        assert!(task.get("teamSkill").is_some());
        assert!(task.get("isLatePartTask").is_some());
        assert!(task.get("slackHours").is_some());
        assert_eq!(task["type"], "Production");
        // Start times are ISO-8601.
        assert_eq!(task["startTime"], "2025-08-25T06:00:00");
    }
}
