//! Per-team, per-instant headcount accounting.
//!
//! The ledger owns every booking the current run has made and answers one
//! question for the engine: the earliest calendar- and capacity-feasible
//! slot for a task on a team. Tasks must fit wholly inside one shift
//! occurrence; the search walks day by day over a 30-day horizon, and
//! inside a shift it skips past conflicting bookings to the next
//! 15-minute-aligned start rather than giving up on the shift.

use chrono::{Days, NaiveDateTime};
use std::collections::BTreeMap;

use takt_core::{
    calendar::{is_working_day, round_up_quarter_hour},
    Plan, Product, ShiftName, TeamName,
};

/// Search horizon for a single placement, in days.
pub const SEARCH_HORIZON_DAYS: u64 = 30;

#[derive(Clone, Debug)]
struct Booking {
    start: NaiveDateTime,
    end: NaiveDateTime,
    headcount: u32,
}

/// Mutable capacity state for one scheduling run.
#[derive(Clone, Debug, Default)]
pub struct ResourceLedger {
    capacities: BTreeMap<TeamName, u32>,
    bookings: BTreeMap<TeamName, Vec<Booking>>,
}

impl ResourceLedger {
    pub fn new(capacities: BTreeMap<TeamName, u32>) -> Self {
        Self {
            capacities,
            bookings: BTreeMap::new(),
        }
    }

    pub fn capacity(&self, team: &str) -> u32 {
        self.capacities.get(team).copied().unwrap_or(0)
    }

    pub fn capacities(&self) -> &BTreeMap<TeamName, u32> {
        &self.capacities
    }

    pub fn set_capacity(&mut self, team: impl Into<TeamName>, capacity: u32) {
        self.capacities.insert(team.into(), capacity);
    }

    /// Record a placement against a team.
    pub fn book(&mut self, team: &str, start: NaiveDateTime, end: NaiveDateTime, headcount: u32) {
        self.bookings.entry(team.to_string()).or_default().push(Booking {
            start,
            end,
            headcount,
        });
    }

    /// Peak concurrent headcount on `team` anywhere inside `[start, end)`,
    /// via an event sweep over the overlapping bookings.
    pub fn peak_load(&self, team: &str, start: NaiveDateTime, end: NaiveDateTime) -> u32 {
        let Some(bookings) = self.bookings.get(team) else {
            return 0;
        };

        let mut events: Vec<(NaiveDateTime, i64)> = Vec::new();
        for b in bookings {
            if b.start < end && b.end > start {
                events.push((b.start.max(start), i64::from(b.headcount)));
                events.push((b.end.min(end), -i64::from(b.headcount)));
            }
        }
        // Ends sort before starts at the same instant, so back-to-back
        // bookings never double-count.
        events.sort_by_key(|&(t, delta)| (t, delta));

        let mut current = 0i64;
        let mut peak = 0i64;
        for (_, delta) in events {
            current += delta;
            peak = peak.max(current);
        }
        peak.max(0) as u32
    }

    /// Whether `headcount` more people fit on `team` for the whole window.
    pub fn fits(
        &self,
        team: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
        headcount: u32,
    ) -> bool {
        self.peak_load(team, start, end) + headcount <= self.capacity(team)
    }

    /// Earliest end among this team's bookings that overlap the window.
    /// This is where the in-shift search jumps to after a conflict.
    fn earliest_conflict_release(
        &self,
        team: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Option<NaiveDateTime> {
        self.bookings
            .get(team)?
            .iter()
            .filter(|b| b.start < end && b.end > start)
            .map(|b| b.end)
            .min()
    }

    /// Earliest feasible `(start, shift)` for a task on `team`, at or after
    /// `not_before`. `None` when the team cannot host the task at all or
    /// no slot exists inside the horizon.
    pub fn earliest_feasible(
        &self,
        plan: &Plan,
        team: &str,
        shifts: &[ShiftName],
        headcount: u32,
        duration_minutes: i64,
        not_before: NaiveDateTime,
        product: Option<&Product>,
    ) -> Option<(NaiveDateTime, ShiftName)> {
        let capacity = self.capacity(team);
        if capacity == 0 || headcount > capacity {
            return None;
        }
        let duration = chrono::Duration::minutes(duration_minutes);

        for offset in 0..SEARCH_HORIZON_DAYS {
            let day = not_before.date().checked_add_days(Days::new(offset))?;
            if !is_working_day(day, product) {
                continue;
            }

            for shift in shifts {
                let Some(span) = plan.shift_hours.get(shift) else {
                    continue;
                };

                // When the search opens inside the tail of an overnight
                // shift, the previous day's occurrence is still running.
                let (window_start, window_end) =
                    if offset == 0 && span.in_overnight_tail(not_before) {
                        span.window(day.pred_opt()?)
                    } else {
                        span.window(day)
                    };

                if window_end <= not_before {
                    continue;
                }

                let mut candidate = round_up_quarter_hour(window_start.max(not_before));
                loop {
                    let candidate_end = candidate + duration;
                    if candidate_end > window_end {
                        break;
                    }
                    if self.fits(team, candidate, candidate_end, headcount) {
                        return Some((candidate, shift.clone()));
                    }
                    // Jump past the earliest conflicting booking.
                    let release = self
                        .earliest_conflict_release(team, candidate, candidate_end)
                        .unwrap_or(candidate_end);
                    candidate = round_up_quarter_hour(release.max(
                        candidate + chrono::Duration::minutes(15),
                    ));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};
    use pretty_assertions::assert_eq;
    use takt_core::ShiftSpan;

    fn dt(d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 8, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn plan_with_shifts() -> Plan {
        let mut plan = Plan::default();
        plan.shift_hours.insert("1st".into(), ShiftSpan::new(6 * 60, 14 * 60 + 30));
        plan.shift_hours.insert("2nd".into(), ShiftSpan::new(14 * 60 + 30, 23 * 60));
        plan.shift_hours.insert("3rd".into(), ShiftSpan::new(23 * 60, 6 * 60));
        plan
    }

    fn ledger(team: &str, capacity: u32) -> ResourceLedger {
        let mut caps = BTreeMap::new();
        caps.insert(team.to_string(), capacity);
        ResourceLedger::new(caps)
    }

    #[test]
    fn peak_load_counts_concurrency_not_window_sum() {
        let mut ledger = ledger("M1", 3);
        // Two sequential bookings never overlap each other.
        ledger.book("M1", dt(25, 6, 0), dt(25, 8, 0), 2);
        ledger.book("M1", dt(25, 8, 0), dt(25, 10, 0), 2);

        assert_eq!(ledger.peak_load("M1", dt(25, 6, 0), dt(25, 10, 0)), 2);
        assert!(ledger.fits("M1", dt(25, 6, 0), dt(25, 10, 0), 1));
        assert!(!ledger.fits("M1", dt(25, 7, 0), dt(25, 7, 30), 2));
    }

    #[test]
    fn finds_first_shift_monday_morning() {
        // 2025-08-25 is a Monday.
        let plan = plan_with_shifts();
        let ledger = ledger("M1", 2);

        let (start, shift) = ledger
            .earliest_feasible(&plan, "M1", &["1st".into()], 1, 120, dt(25, 6, 0), None)
            .unwrap();
        assert_eq!(start, dt(25, 6, 0));
        assert_eq!(shift, "1st");
    }

    #[test]
    fn weekend_rolls_to_monday() {
        // 2025-08-23 is a Saturday.
        let plan = plan_with_shifts();
        let ledger = ledger("M1", 2);

        let (start, _) = ledger
            .earliest_feasible(&plan, "M1", &["1st".into()], 1, 60, dt(23, 6, 0), None)
            .unwrap();
        assert_eq!(start, dt(25, 6, 0));
    }

    #[test]
    fn task_never_spans_two_shifts() {
        let plan = plan_with_shifts();
        let ledger = ledger("M1", 2);

        // 510 minutes fills the 1st shift exactly.
        let (start, _) = ledger
            .earliest_feasible(&plan, "M1", &["1st".into()], 1, 510, dt(25, 6, 0), None)
            .unwrap();
        assert_eq!(start, dt(25, 6, 0));

        // One more minute cannot fit anywhere on a 1st-shift-only team.
        assert!(ledger
            .earliest_feasible(&plan, "M1", &["1st".into()], 1, 511, dt(25, 6, 0), None)
            .is_none());
    }

    #[test]
    fn busy_interval_pushes_start_within_shift() {
        let plan = plan_with_shifts();
        let mut ledger = ledger("M1", 1);
        ledger.book("M1", dt(25, 6, 0), dt(25, 8, 0), 1);

        let (start, shift) = ledger
            .earliest_feasible(&plan, "M1", &["1st".into()], 1, 120, dt(25, 6, 0), None)
            .unwrap();
        assert_eq!(start, dt(25, 8, 0));
        assert_eq!(shift, "1st");
    }

    #[test]
    fn capacity_zero_and_oversized_requests_fail() {
        let plan = plan_with_shifts();
        assert!(ledger("M1", 0)
            .earliest_feasible(&plan, "M1", &["1st".into()], 1, 60, dt(25, 6, 0), None)
            .is_none());
        assert!(ledger("M1", 2)
            .earliest_feasible(&plan, "M1", &["1st".into()], 3, 60, dt(25, 6, 0), None)
            .is_none());
    }

    #[test]
    fn third_shift_extends_past_midnight() {
        let plan = plan_with_shifts();
        let ledger = ledger("M1", 1);

        let (start, shift) = ledger
            .earliest_feasible(&plan, "M1", &["3rd".into()], 1, 240, dt(25, 22, 0), None)
            .unwrap();
        assert_eq!(start, dt(25, 23, 0));
        assert_eq!(shift, "3rd");
        // The task runs 23:00 Monday to 03:00 Tuesday, inside one window.
    }

    #[test]
    fn overnight_tail_keeps_previous_window_alive() {
        let plan = plan_with_shifts();
        let ledger = ledger("M1", 1);

        // At 02:00 Tuesday the Monday 3rd shift still has 4 hours left.
        let (start, shift) = ledger
            .earliest_feasible(&plan, "M1", &["3rd".into()], 1, 120, dt(26, 2, 0), None)
            .unwrap();
        assert_eq!(start, dt(26, 2, 0));
        assert_eq!(shift, "3rd");
    }

    #[test]
    fn holiday_advances_to_next_working_day() {
        let plan = plan_with_shifts();
        let ledger = ledger("M1", 1);
        let delivery = dt(30, 0, 0);
        let mut product = Product::new("A", delivery);
        product.holidays.insert(NaiveDate::from_ymd_opt(2025, 8, 25).unwrap());

        let (start, _) = ledger
            .earliest_feasible(&plan, "M1", &["1st".into()], 1, 60, dt(25, 6, 0), Some(&product))
            .unwrap();
        assert_eq!(start, dt(26, 6, 0));
    }

    #[test]
    fn candidate_start_is_quarter_hour_aligned() {
        let plan = plan_with_shifts();
        let ledger = ledger("M1", 1);

        let (start, _) = ledger
            .earliest_feasible(&plan, "M1", &["1st".into()], 1, 60, dt(25, 6, 7), None)
            .unwrap();
        assert_eq!(start, dt(25, 6, 15));
    }
}
