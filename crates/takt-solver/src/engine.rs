//! The priority-driven, capacity-respecting scheduling engine.
//!
//! Instances enter a ready heap once their gating predecessors are placed,
//! ordered by an urgency score (lower pops first). Each pop computes the
//! earliest start its placed predecessors allow, binds a team, asks the
//! ledger for the earliest feasible slot, and books it. Placement misses
//! retry up to [`MAX_RETRIES`] times with a small priority penalty; a slot
//! past [`crate::FAR_FUTURE_YEAR`] marks the instance failed outright.

use chrono::{Datelike, NaiveDateTime};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use tracing::{debug, warn};

use takt_core::{
    Criticality, InstanceId, Plan, Product, ScheduleRecord, ShiftName, TaskType, TeamName,
};

use crate::dependencies::{Constraint, ConstraintIndex};
use crate::instances::InstanceSet;
use crate::ledger::ResourceLedger;
use crate::leveling;
use crate::{EngineConfig, ScheduleVariant, FAR_FUTURE_YEAR};

/// Retries before a placement miss becomes terminal.
pub const MAX_RETRIES: u32 = 3;

/// Everything one engine run produced.
#[derive(Clone, Debug, Default)]
pub struct ScheduleOutcome {
    pub schedule: BTreeMap<InstanceId, ScheduleRecord>,
    pub failed: BTreeSet<InstanceId>,
    /// Placement attempts that found no slot inside the horizon.
    pub slot_misses: usize,
    /// Placements rejected for landing past the plausible horizon.
    pub far_future: usize,
    pub total_instances: usize,
}

impl ScheduleOutcome {
    pub fn scheduled_count(&self) -> usize {
        self.schedule.len()
    }

    pub fn is_complete(&self) -> bool {
        self.schedule.len() == self.total_instances
    }

    pub fn unscheduled<'a>(&self, set: &'a InstanceSet) -> Vec<&'a InstanceId> {
        set.instances
            .keys()
            .filter(|id| !self.schedule.contains_key(id))
            .collect()
    }
}

/// Run the engine over a prepared instance set and constraint list.
///
/// `capacities` is the team-skill keyed headcount vector for this run;
/// `criticality` supplies the slack classes when the variant wants them.
pub fn schedule(
    plan: &Plan,
    set: &InstanceSet,
    constraints: &[Constraint],
    index: &ConstraintIndex,
    capacities: &BTreeMap<TeamName, u32>,
    config: &EngineConfig,
    criticality: Option<&BTreeMap<InstanceId, Criticality>>,
) -> ScheduleOutcome {
    let mut ledger = ResourceLedger::new(capacities.clone());
    let mut placed: BTreeMap<InstanceId, ScheduleRecord> = BTreeMap::new();
    let mut failed: BTreeSet<InstanceId> = BTreeSet::new();
    let mut retries: BTreeMap<InstanceId, u32> = BTreeMap::new();
    let mut slot_misses = 0usize;
    let mut far_future = 0usize;

    let critical_path = critical_path_lengths(set, constraints, index);
    let total = set.len();

    // Min-heap on (scaled priority, insertion counter): the counter makes
    // ties deterministic.
    let mut heap: BinaryHeap<Reverse<(i64, u64, InstanceId)>> = BinaryHeap::new();
    let mut seq: u64 = 0;

    let push = |heap: &mut BinaryHeap<Reverse<(i64, u64, InstanceId)>>,
                    seq: &mut u64,
                    placed: &BTreeMap<InstanceId, ScheduleRecord>,
                    id: &InstanceId,
                    penalty: i64| {
        let prio = priority_of(plan, set, constraints, index, &critical_path, placed, config, id);
        heap.push(Reverse((prio * 10 + penalty, *seq, id.clone())));
        *seq += 1;
    };

    // Seed: orphans, sources, and instances whose incoming edges are all
    // start-anchored (those do not gate readiness).
    for id in set.instances.keys() {
        let mut incoming = index.predecessors_of(constraints, id).peekable();
        // Orphans and pure sources are ready; so is anything whose incoming
        // edges are all start-anchored.
        let ready = incoming.peek().is_none()
            || !index
                .predecessors_of(constraints, id)
                .any(|c| c.relationship.blocks_successor());
        if ready {
            push(&mut heap, &mut seq, &placed, id, 0);
        }
    }
    debug!(ready = heap.len(), total, "seeded ready queue");

    let max_iterations = total.saturating_mul(10);
    let mut iterations = 0usize;

    while placed.len() < total && iterations < max_iterations {
        iterations += 1;

        let Some(Reverse((_, _, id))) = heap.pop() else {
            // The heap drained with work left: re-arm anything whose
            // predecessors are now all placed.
            let mut refilled = false;
            for id in set.instances.keys() {
                if placed.contains_key(id) || failed.contains(id) {
                    continue;
                }
                let all_placed = index
                    .predecessors_of(constraints, id)
                    .all(|c| placed.contains_key(&c.first));
                if all_placed {
                    push(&mut heap, &mut seq, &placed, id, 0);
                    refilled = true;
                }
            }
            if !refilled {
                break;
            }
            continue;
        };

        if placed.contains_key(&id) || failed.contains(&id) {
            continue;
        }
        if retries.get(&id).copied().unwrap_or(0) >= MAX_RETRIES {
            failed.insert(id.clone());
            warn!(task = %id, "failed after {MAX_RETRIES} retries");
            continue;
        }

        let instance = &set.instances[&id];
        let product = instance
            .product
            .as_deref()
            .and_then(|p| plan.products.get(p));

        let earliest = earliest_start(
            set, constraints, index, &placed, config, &id, instance.duration_minutes,
        );

        let placement = place(
            plan,
            &ledger,
            &placed,
            instance,
            earliest,
            product,
            &config.variant,
            criticality.and_then(|c| c.get(&id)).copied(),
        );

        let Some(placement) = placement else {
            slot_misses += 1;
            let count = retries.entry(id.clone()).or_insert(0);
            *count += 1;
            if *count < MAX_RETRIES {
                push(&mut heap, &mut seq, &placed, &id, 1);
            } else {
                failed.insert(id.clone());
                warn!(task = %id, "no feasible slot inside the search horizon");
            }
            continue;
        };

        if placement.start.year() > FAR_FUTURE_YEAR {
            far_future += 1;
            failed.insert(id.clone());
            warn!(task = %id, year = placement.start.year(), "placement ran past the horizon");
            continue;
        }

        let end = placement.start + chrono::Duration::minutes(instance.duration_minutes);
        ledger.book(&placement.team_skill, placement.start, end, instance.headcount);
        placed.insert(
            id.clone(),
            ScheduleRecord {
                start: placement.start,
                end,
                team: placement.team,
                team_skill: placement.team_skill,
                skill: instance.skill.clone(),
                shift: placement.shift,
                product: instance.product.clone(),
                duration_minutes: instance.duration_minutes,
                headcount: instance.headcount,
                task_type: instance.task_type,
                template: instance.template,
                criticality: criticality.and_then(|c| c.get(&id)).copied(),
            },
        );

        // Successors with every predecessor placed become ready.
        let successors: Vec<InstanceId> = index
            .successors_of(constraints, &id)
            .map(|c| c.second.clone())
            .collect();
        for dependent in successors {
            if placed.contains_key(&dependent) || failed.contains(&dependent) {
                continue;
            }
            let all_placed = index
                .predecessors_of(constraints, &dependent)
                .all(|c| placed.contains_key(&c.first));
            if all_placed {
                push(&mut heap, &mut seq, &placed, &dependent, 0);
            }
        }
    }

    if placed.len() < total {
        warn!(
            scheduled = placed.len(),
            total,
            slot_misses,
            far_future,
            "scheduling finished incomplete"
        );
    } else {
        debug!(scheduled = placed.len(), iterations, "scheduling complete");
    }

    ScheduleOutcome {
        schedule: placed,
        failed,
        slot_misses,
        far_future,
        total_instances: total,
    }
}

struct Placement {
    team: TeamName,
    team_skill: TeamName,
    start: NaiveDateTime,
    shift: ShiftName,
}

/// Lower bound on an instance's start from the datum, its on-dock date,
/// and every placed predecessor. A placed `Start = Start` predecessor pins
/// the bound to its own start.
fn earliest_start(
    set: &InstanceSet,
    constraints: &[Constraint],
    index: &ConstraintIndex,
    placed: &BTreeMap<InstanceId, ScheduleRecord>,
    config: &EngineConfig,
    id: &InstanceId,
    duration_minutes: i64,
) -> NaiveDateTime {
    let mut earliest = config.start;

    if let Some(dock) = set.on_dock.get(id) {
        let available = *dock + chrono::Days::new(config.late_part_delay_days.max(0) as u64);
        if let Some(at_six) = available.and_hms_opt(6, 0, 0) {
            earliest = at_six;
        }
    }

    let mut pinned: Option<NaiveDateTime> = None;
    for c in index.predecessors_of(constraints, id) {
        if let Some(first) = placed.get(&c.first) {
            let bound = c
                .relationship
                .earliest_start_bound(first.start, first.end, duration_minutes);
            earliest = earliest.max(bound);
            if c.relationship == takt_core::Relationship::StartEqualsStart {
                pinned = Some(first.start);
            }
        }
    }
    pinned.unwrap_or(earliest)
}

/// Bind a team and find a slot according to the variant.
fn place(
    plan: &Plan,
    ledger: &ResourceLedger,
    placed: &BTreeMap<InstanceId, ScheduleRecord>,
    instance: &takt_core::TaskInstance,
    earliest: NaiveDateTime,
    product: Option<&Product>,
    variant: &ScheduleVariant,
    criticality: Option<Criticality>,
) -> Option<Placement> {
    if instance.is_customer() {
        // Any customer team may take the task; earliest start wins.
        let mut best: Option<Placement> = None;
        for name in plan.customer_teams.keys() {
            if ledger.capacity(name) < instance.headcount {
                continue;
            }
            let shifts = plan.shifts_for(name);
            if let Some((start, shift)) = ledger.earliest_feasible(
                plan,
                name,
                &shifts,
                instance.headcount,
                instance.duration_minutes,
                earliest,
                product,
            ) {
                if best.as_ref().map_or(true, |b| start < b.start) {
                    best = Some(Placement {
                        team: name.clone(),
                        team_skill: name.clone(),
                        start,
                        shift,
                    });
                }
            }
        }
        return best;
    }

    let (team, team_skill) = if instance.is_quality() {
        // The 1:1 mapping normally resolved at expansion; recover through
        // the primary when it did not.
        let quality = plan.map_quality_team(&instance.team).or_else(|| {
            instance
                .primary
                .as_ref()
                .and_then(|p| placed.get(p))
                .and_then(|r| plan.map_quality_team(&r.team))
        })?;
        (quality.clone(), quality)
    } else {
        (instance.team.clone(), instance.team_skill.clone())
    };

    let shifts = plan.shifts_for(&team_skill);
    let slot = find_slot(
        plan,
        ledger,
        placed,
        &team_skill,
        &shifts,
        instance.headcount,
        instance.duration_minutes,
        earliest,
        product,
        variant,
        criticality,
    )?;

    Some(Placement {
        team,
        team_skill,
        start: slot.0,
        shift: slot.1,
    })
}

fn find_slot(
    plan: &Plan,
    ledger: &ResourceLedger,
    placed: &BTreeMap<InstanceId, ScheduleRecord>,
    team_skill: &str,
    shifts: &[ShiftName],
    headcount: u32,
    duration_minutes: i64,
    earliest: NaiveDateTime,
    product: Option<&Product>,
    variant: &ScheduleVariant,
    criticality: Option<Criticality>,
) -> Option<(NaiveDateTime, ShiftName)> {
    match variant {
        ScheduleVariant::Asap => ledger.earliest_feasible(
            plan, team_skill, shifts, headcount, duration_minutes, earliest, product,
        ),
        ScheduleVariant::LevelLoaded {
            target_utilization,
            max_lookahead_days,
        } => leveling::find_level_loaded_slot(
            plan,
            ledger,
            placed,
            team_skill,
            shifts,
            headcount,
            duration_minutes,
            earliest,
            product,
            *max_lookahead_days,
            *target_utilization,
        ),
        ScheduleVariant::CriticalityAware { target_utilization } => {
            let class = criticality.unwrap_or(Criticality::Flexible);
            let lookahead = leveling::lookahead_days_for(class);
            if lookahead == 0 {
                ledger.earliest_feasible(
                    plan, team_skill, shifts, headcount, duration_minutes, earliest, product,
                )
            } else {
                leveling::find_level_loaded_slot(
                    plan,
                    ledger,
                    placed,
                    team_skill,
                    shifts,
                    headcount,
                    duration_minutes,
                    earliest,
                    product,
                    lookahead,
                    *target_utilization,
                )
            }
        }
    }
}

// ============================================================================
// Priorities
// ============================================================================

/// Urgency score; lower pops first.
pub fn priority_of(
    plan: &Plan,
    set: &InstanceSet,
    constraints: &[Constraint],
    index: &ConstraintIndex,
    critical_path: &BTreeMap<InstanceId, i64>,
    placed: &BTreeMap<InstanceId, ScheduleRecord>,
    config: &EngineConfig,
    id: &InstanceId,
) -> i64 {
    let Some(instance) = set.get(id) else {
        return 0;
    };

    match instance.task_type {
        TaskType::LatePart => match set.on_dock.get(id) {
            // Parts arriving later are less urgent.
            Some(dock) => -3000 + days_between(config.start.date(), *dock) * 10,
            None => -3000,
        },
        TaskType::QualityInspection => {
            // Ride immediately behind the primary once it is placed.
            match instance.primary.as_ref() {
                Some(primary) if placed.contains_key(primary) => {
                    priority_of(plan, set, constraints, index, critical_path, placed, config, primary)
                        - 1
                }
                _ => -2000,
            }
        }
        TaskType::Rework => {
            let mut best: Option<i64> = None;
            for c in index.successors_of(constraints, id) {
                let Some(dep) = set.get(&c.second) else {
                    continue;
                };
                let Some(product) = dep.product.as_deref().and_then(|p| plan.products.get(p))
                else {
                    continue;
                };
                let days = days_between(config.start.date(), product.delivery.date());
                let dep_priority = (days - 100) * 20;
                best = Some(best.map_or(dep_priority, |b: i64| b.min(dep_priority)));
            }
            // Just ahead of whatever depends on it; -500 when nothing does.
            best.map_or(-500, |b| b - 100)
        }
        _ => {
            let days_to_delivery = instance
                .product
                .as_deref()
                .and_then(|p| plan.products.get(p))
                .map_or(999, |p| days_between(config.start.date(), p.delivery.date()));
            let cp = critical_path.get(id).copied().unwrap_or(0);
            // Imminent deliveries and long downstream chains pop first.
            (days_to_delivery - 100) * 20
                + (10_000 - cp) * 5
                + (100 - instance.duration_minutes / 10) * 2
        }
    }
}

fn days_between(from: chrono::NaiveDate, to: chrono::NaiveDate) -> i64 {
    (to - from).num_days()
}

/// Longest duration sum along successor chains from each instance, over
/// every relationship form. Computed once per run and shared.
pub fn critical_path_lengths(
    set: &InstanceSet,
    constraints: &[Constraint],
    index: &ConstraintIndex,
) -> BTreeMap<InstanceId, i64> {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Visiting,
        Done,
    }

    let mut lengths: BTreeMap<InstanceId, i64> = BTreeMap::new();
    let mut state: BTreeMap<InstanceId, State> = BTreeMap::new();

    for root in set.instances.keys() {
        if state.contains_key(root) {
            continue;
        }
        // Post-order over successors with an explicit stack.
        let mut stack: Vec<(InstanceId, bool)> = vec![(root.clone(), false)];
        while let Some((node, expanded)) = stack.pop() {
            if expanded {
                let duration = set.get(&node).map_or(0, |t| t.duration_minutes);
                let best_successor = index
                    .successors_of(constraints, &node)
                    .filter_map(|c| lengths.get(&c.second))
                    .max()
                    .copied()
                    .unwrap_or(0);
                lengths.insert(node.clone(), duration + best_successor);
                state.insert(node, State::Done);
                continue;
            }
            match state.get(&node) {
                Some(State::Done) => continue,
                // A start-anchored loop: break it by scoring the revisited
                // node zero on this path.
                Some(State::Visiting) => continue,
                None => {}
            }
            state.insert(node.clone(), State::Visiting);
            stack.push((node.clone(), true));
            for c in index.successors_of(constraints, &node) {
                if set.instances.contains_key(&c.second) {
                    stack.push((c.second.clone(), false));
                }
            }
        }
    }
    lengths
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependencies::resolve_constraints;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use takt_core::{
        PerturbationConstraint, PerturbationTask, Product, Relationship, ShiftSpan, TaskTemplate,
        Team, TeamKind, TemplateConstraint,
    };

    fn dt(d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 8, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn plan_one_team() -> Plan {
        let mut plan = Plan::default();
        plan.shift_hours.insert("1st".into(), ShiftSpan::new(6 * 60, 14 * 60 + 30));
        plan.mechanic_teams.insert(
            "Mechanic Team 1".into(),
            Team::new("Mechanic Team 1", TeamKind::Mechanic, 1).with_shifts(&["1st"]),
        );
        plan
    }

    fn add_product(plan: &mut Plan, name: &str, delivery_day: u32, range: (u32, u32)) {
        let delivery = NaiveDate::from_ymd_opt(2025, 9, delivery_day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let mut product = Product::new(name, delivery);
        product.remaining = range;
        plan.products.insert(name.into(), product);
    }

    fn run(plan: &Plan) -> (InstanceSet, Vec<Constraint>, ScheduleOutcome) {
        let set = InstanceSet::build(plan);
        let constraints = resolve_constraints(plan, &set);
        let index = ConstraintIndex::build(&constraints);
        let capacities = crate::merged_capacities(plan);
        let outcome = schedule(
            plan,
            &set,
            &constraints,
            &index,
            &capacities,
            &EngineConfig::default(),
            None,
        );
        (set, constraints, outcome)
    }

    #[test]
    fn single_task_lands_on_the_datum() {
        let mut plan = plan_one_team();
        plan.templates.insert(
            1,
            TaskTemplate {
                id: 1,
                duration_minutes: 120,
                team: "Mechanic Team 1".into(),
                skill: None,
                headcount: 1,
            },
        );
        add_product(&mut plan, "P", 10, (1, 1));

        let (_, _, outcome) = run(&plan);
        assert!(outcome.is_complete());

        let record = &outcome.schedule[&InstanceId::production("P", 1)];
        assert_eq!(record.start, dt(25, 6, 0));
        assert_eq!(record.end, dt(25, 8, 0));
        assert_eq!(record.shift, "1st");
        assert_eq!(record.team_skill, "Mechanic Team 1");
    }

    #[test]
    fn task_longer_than_any_shift_fails() {
        let mut plan = plan_one_team();
        plan.templates.insert(
            1,
            TaskTemplate {
                id: 1,
                duration_minutes: 540,
                team: "Mechanic Team 1".into(),
                skill: None,
                headcount: 1,
            },
        );
        add_product(&mut plan, "P", 10, (1, 1));

        let (set, _, outcome) = run(&plan);
        assert_eq!(outcome.scheduled_count(), 0);
        assert_eq!(outcome.unscheduled(&set).len(), 1);
        assert!(outcome.failed.contains(&InstanceId::production("P", 1)));
        assert!(outcome.slot_misses >= 1);
    }

    #[test]
    fn capacity_contention_serializes_equal_work() {
        let mut plan = plan_one_team();
        plan.templates.insert(
            1,
            TaskTemplate {
                id: 1,
                duration_minutes: 120,
                team: "Mechanic Team 1".into(),
                skill: None,
                headcount: 1,
            },
        );
        // P delivers earlier, so it schedules first.
        add_product(&mut plan, "P", 10, (1, 1));
        add_product(&mut plan, "Q", 20, (1, 1));

        let (_, _, outcome) = run(&plan);
        assert!(outcome.is_complete());

        let p = &outcome.schedule[&InstanceId::production("P", 1)];
        let q = &outcome.schedule[&InstanceId::production("Q", 1)];
        assert_eq!(p.start, dt(25, 6, 0));
        // Q starts the moment P releases the only mechanic.
        assert_eq!(q.start, p.end);
    }

    #[test]
    fn fs_chain_orders_and_packs() {
        let mut plan = plan_one_team();
        for (id, minutes) in [(1u32, 60i64), (2, 90)] {
            plan.templates.insert(
                id,
                TaskTemplate {
                    id,
                    duration_minutes: minutes,
                    team: "Mechanic Team 1".into(),
                    skill: None,
                    headcount: 1,
                },
            );
        }
        plan.template_constraints.push(TemplateConstraint {
            first: 1,
            second: 2,
            relationship: Relationship::FinishBeforeStart,
        });
        add_product(&mut plan, "P", 10, (1, 2));

        let (_, _, outcome) = run(&plan);
        let t1 = &outcome.schedule[&InstanceId::production("P", 1)];
        let t2 = &outcome.schedule[&InstanceId::production("P", 2)];
        assert!(t1.end <= t2.start);
    }

    #[test]
    fn late_part_waits_for_on_dock_delay() {
        let mut plan = plan_one_team();
        plan.templates.insert(
            1,
            TaskTemplate {
                id: 1,
                duration_minutes: 60,
                team: "Mechanic Team 1".into(),
                skill: None,
                headcount: 1,
            },
        );
        add_product(&mut plan, "P", 10, (1, 1));
        plan.late_part_constraints.push(PerturbationConstraint {
            first: "LP_1".into(),
            second: "1".into(),
            relationship: Relationship::FinishBeforeStart,
            on_dock: NaiveDate::from_ymd_opt(2025, 8, 26),
            product: Some("P".into()),
        });
        plan.late_part_details.push(PerturbationTask {
            id: "LP_1".into(),
            duration_minutes: 60,
            team: "Mechanic Team 1".into(),
            headcount: 1,
            needs_inspection: false,
            inspection_duration_minutes: 0,
            inspection_headcount: 0,
        });

        let (_, _, outcome) = run(&plan);
        let lp = &outcome.schedule[&InstanceId::LatePart("LP_1".into())];
        // On dock Tuesday + 1 day delay = Wednesday 06:00.
        assert_eq!(lp.start, dt(27, 6, 0));

        let t1 = &outcome.schedule[&InstanceId::production("P", 1)];
        assert!(lp.end <= t1.start);
    }

    #[test]
    fn start_equals_start_pins_the_pair() {
        let mut plan = plan_one_team();
        plan.mechanic_teams.insert(
            "Mechanic Team 2".into(),
            Team::new("Mechanic Team 2", TeamKind::Mechanic, 1).with_shifts(&["1st"]),
        );
        for (id, team) in [(1u32, "Mechanic Team 1"), (2, "Mechanic Team 2")] {
            plan.templates.insert(
                id,
                TaskTemplate {
                    id,
                    duration_minutes: 60,
                    team: team.into(),
                    skill: None,
                    headcount: 1,
                },
            );
        }
        plan.template_constraints.push(TemplateConstraint {
            first: 1,
            second: 2,
            relationship: Relationship::StartEqualsStart,
        });
        add_product(&mut plan, "P", 10, (1, 2));

        let (_, _, outcome) = run(&plan);
        let t1 = &outcome.schedule[&InstanceId::production("P", 1)];
        let t2 = &outcome.schedule[&InstanceId::production("P", 2)];
        assert_eq!(t1.start, t2.start);
    }

    #[test]
    fn priorities_favor_earlier_delivery() {
        let mut plan = plan_one_team();
        plan.templates.insert(
            1,
            TaskTemplate {
                id: 1,
                duration_minutes: 60,
                team: "Mechanic Team 1".into(),
                skill: None,
                headcount: 1,
            },
        );
        add_product(&mut plan, "Early", 5, (1, 1));
        add_product(&mut plan, "Late", 25, (1, 1));

        let set = InstanceSet::build(&plan);
        let constraints = resolve_constraints(&plan, &set);
        let index = ConstraintIndex::build(&constraints);
        let cp = critical_path_lengths(&set, &constraints, &index);
        let placed = BTreeMap::new();
        let config = EngineConfig::default();

        let early = priority_of(
            &plan, &set, &constraints, &index, &cp, &placed, &config,
            &InstanceId::production("Early", 1),
        );
        let late = priority_of(
            &plan, &set, &constraints, &index, &cp, &placed, &config,
            &InstanceId::production("Late", 1),
        );
        assert!(early < late, "earlier delivery must pop first ({early} vs {late})");
    }

    #[test]
    fn critical_path_sums_longest_chain() {
        let mut plan = plan_one_team();
        for (id, minutes) in [(1u32, 60i64), (2, 120), (3, 30)] {
            plan.templates.insert(
                id,
                TaskTemplate {
                    id,
                    duration_minutes: minutes,
                    team: "Mechanic Team 1".into(),
                    skill: None,
                    headcount: 1,
                },
            );
        }
        for (first, second) in [(1u32, 2u32), (2, 3)] {
            plan.template_constraints.push(TemplateConstraint {
                first,
                second,
                relationship: Relationship::FinishBeforeStart,
            });
        }
        add_product(&mut plan, "P", 10, (1, 3));

        let set = InstanceSet::build(&plan);
        let constraints = resolve_constraints(&plan, &set);
        let index = ConstraintIndex::build(&constraints);
        let cp = critical_path_lengths(&set, &constraints, &index);

        assert_eq!(cp[&InstanceId::production("P", 3)], 30);
        assert_eq!(cp[&InstanceId::production("P", 2)], 150);
        assert_eq!(cp[&InstanceId::production("P", 1)], 210);
    }
}
