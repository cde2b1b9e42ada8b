//! Schedulability diagnostics: why a plan cannot place everything.
//!
//! Three families of findings: structural (cycles, undefined references),
//! capacity (tasks demanding more people than their team has, or teams
//! absent from the capacity tables), and progress (blocked-by chains for
//! work a run left unplaced).

use std::collections::BTreeMap;

use takt_core::InstanceId;

use crate::dependencies::validate_dag;
use crate::engine::ScheduleOutcome;
use crate::scenario::ScenarioContext;

/// A task that demands more people than its team can ever field.
#[derive(Clone, Debug)]
pub struct CapacityShortfall {
    pub task: InstanceId,
    pub team: String,
    pub needed: u32,
    pub capacity: u32,
}

/// An unplaced task and the predecessors it waits on.
#[derive(Clone, Debug)]
pub struct BlockedTask {
    pub task: InstanceId,
    pub waiting_on: Vec<InstanceId>,
}

/// Everything the diagnosis pass found.
#[derive(Clone, Debug, Default)]
pub struct DiagnosticReport {
    pub capacity_shortfalls: Vec<CapacityShortfall>,
    /// Teams referenced by tasks but missing from every capacity table.
    pub unknown_teams: Vec<String>,
    /// Rendered cycle description, when the graph has one.
    pub cycle: Option<String>,
    pub blocked: Vec<BlockedTask>,
    pub unplaced_by_team: BTreeMap<String, usize>,
}

impl DiagnosticReport {
    /// Whether anything structurally prevents a complete schedule.
    pub fn is_schedulable(&self) -> bool {
        self.capacity_shortfalls.is_empty()
            && self.unknown_teams.is_empty()
            && self.cycle.is_none()
    }
}

/// Diagnose a context, optionally against the outcome of a run (which
/// contributes the blocked-by chains).
pub fn diagnose(ctx: &ScenarioContext, outcome: Option<&ScheduleOutcome>) -> DiagnosticReport {
    let mut report = DiagnosticReport::default();

    // Capacity checks over the declared vectors.
    for (id, instance) in &ctx.instances.instances {
        match ctx.plan.team_capacity(&instance.team_skill) {
            None => {
                if !report.unknown_teams.contains(&instance.team_skill) {
                    report.unknown_teams.push(instance.team_skill.clone());
                }
            }
            Some(capacity) if instance.headcount > capacity => {
                report.capacity_shortfalls.push(CapacityShortfall {
                    task: id.clone(),
                    team: instance.team_skill.clone(),
                    needed: instance.headcount,
                    capacity,
                });
            }
            Some(_) => {}
        }
    }

    // Structural check.
    if let Err(e) = validate_dag(&ctx.instances, &ctx.constraints) {
        report.cycle = Some(e.to_string());
    }

    // Progress check against a finished run.
    if let Some(outcome) = outcome {
        for id in ctx.instances.instances.keys() {
            if outcome.schedule.contains_key(id) {
                continue;
            }
            let waiting_on: Vec<InstanceId> = ctx
                .index
                .predecessors_of(&ctx.constraints, id)
                .filter(|c| !outcome.schedule.contains_key(&c.first))
                .map(|c| c.first.clone())
                .collect();
            if let Some(instance) = ctx.instances.get(id) {
                *report
                    .unplaced_by_team
                    .entry(instance.team_skill.clone())
                    .or_insert(0) += 1;
            }
            report.blocked.push(BlockedTask {
                task: id.clone(),
                waiting_on,
            });
        }
    }

    report
}
