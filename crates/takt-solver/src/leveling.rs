//! Level-loading slot selection.
//!
//! Same feasibility rules as the ASAP search, different choice among the
//! feasible slots: sample the lookahead window and score each candidate by
//! how close it brings the day's utilization to a target, how much it
//! delays the task, and whether it fills an underused day.

use chrono::NaiveDateTime;
use std::collections::BTreeMap;

use takt_core::{
    calendar::is_working_day, Criticality, InstanceId, Plan, Product, ScheduleRecord, ShiftName,
};

use crate::ledger::ResourceLedger;
use crate::metrics;

/// Candidate sampling stride inside the lookahead window.
const SAMPLE_STRIDE_HOURS: i64 = 4;

/// Cap on sampled candidates per placement.
const MAX_SLOTS_TESTED: usize = 20;

/// Days a day must be under before the fill bonus applies.
const FILL_THRESHOLD_PCT: f64 = 60.0;

/// Lookahead ceiling per criticality class, in days. Critical work takes
/// the earliest feasible slot with no lookahead at all.
pub fn lookahead_days_for(class: Criticality) -> i64 {
    match class {
        Criticality::Critical => 0,
        Criticality::Buffer => 1,
        Criticality::Flexible => 3,
    }
}

/// Best slot inside `[earliest, earliest + lookahead)` by the level-loading
/// score; falls back to the plain earliest feasible slot when nothing in
/// the window beats it.
pub fn find_level_loaded_slot(
    plan: &Plan,
    ledger: &ResourceLedger,
    placed: &BTreeMap<InstanceId, ScheduleRecord>,
    team_skill: &str,
    shifts: &[ShiftName],
    headcount: u32,
    duration_minutes: i64,
    earliest: NaiveDateTime,
    product: Option<&Product>,
    max_lookahead_days: i64,
    target_utilization: f64,
) -> Option<(NaiveDateTime, ShiftName)> {
    let window_end = earliest + chrono::Duration::days(max_lookahead_days.max(0));
    let mut best: Option<(f64, NaiveDateTime, ShiftName)> = None;

    let mut test_time = earliest;
    let mut slots_tested = 0usize;
    while test_time < window_end && slots_tested < MAX_SLOTS_TESTED {
        if is_working_day(test_time.date(), product) {
            if let Some((slot_start, shift)) = ledger.earliest_feasible(
                plan, team_skill, shifts, headcount, duration_minutes, test_time, product,
            ) {
                if slot_start < window_end {
                    let day_util =
                        metrics::day_utilization(plan, placed, team_skill, slot_start.date());
                    let delay_days =
                        (slot_start - earliest).num_seconds() as f64 / 86_400.0;
                    let fill_bonus = if day_util < FILL_THRESHOLD_PCT { -20.0 } else { 0.0 };
                    let score =
                        (day_util - target_utilization).abs() + delay_days * 10.0 + fill_bonus;

                    let better = best.as_ref().map_or(true, |(s, _, _)| score < *s);
                    if better {
                        best = Some((score, slot_start, shift));
                    }
                }
            }
            slots_tested += 1;
        }
        test_time += chrono::Duration::hours(SAMPLE_STRIDE_HOURS);
    }

    match best {
        Some((_, start, shift)) => Some((start, shift)),
        None => ledger.earliest_feasible(
            plan, team_skill, shifts, headcount, duration_minutes, earliest, product,
        ),
    }
}
