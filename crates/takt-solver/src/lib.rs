//! # takt-solver
//!
//! Capacity-constrained scheduling for a multi-product production line.
//!
//! This crate provides:
//! - Instance expansion: templates, inspections, late parts, rework
//! - Dependency resolution across six precedence relationship forms
//! - A per-instant resource ledger with shift- and calendar-aware slot search
//! - The priority-driven scheduling engine plus level-loading and
//!   criticality-aware placement variants
//! - Makespan / lateness / slack / utilization metrics
//! - Scenario drivers: fixed capacities, uniform-capacity binary search,
//!   and simulated annealing over per-team headcount
//!
//! ## Example
//!
//! ```rust,ignore
//! let plan = takt_parser::parse_file("scheduling_data.csv")?;
//! let ctx = takt_solver::ScenarioContext::build(plan)?;
//! let run = takt_solver::scenario::run_baseline(&ctx, &EngineConfig::default());
//! println!("makespan: {} days", run.performance.makespan_days);
//! ```

use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

use takt_core::Plan;

pub mod dependencies;
pub mod diagnose;
pub mod engine;
pub mod instances;
pub mod ledger;
pub mod leveling;
pub mod metrics;
pub mod scenario;

pub use dependencies::{resolve_constraints, validate_dag, Constraint, ConstraintIndex};
pub use engine::{schedule, ScheduleOutcome};
pub use instances::InstanceSet;
pub use ledger::ResourceLedger;
pub use metrics::DeliveryPerformance;
pub use scenario::{CapacityVector, ScenarioContext};

/// Solver failure modes. Placement trouble is not an error — unplaced
/// instances are reported in the outcome; only graph defects abort.
#[derive(Debug, Error)]
pub enum SolveError {
    #[error("dependency cycle: {0}")]
    Cycle(String),

    #[error("constraint references undefined instance '{0}'")]
    UnknownInstance(String),
}

/// Placements chosen past this year mark the instance failed instead: the
/// slot search has run away from the plausible horizon.
pub const FAR_FUTURE_YEAR: i32 = 2030;

/// How the engine picks among feasible slots.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum ScheduleVariant {
    /// Earliest feasible slot, always.
    #[default]
    Asap,
    /// Bounded lookahead scoring day utilization against a target.
    LevelLoaded {
        target_utilization: f64,
        max_lookahead_days: i64,
    },
    /// Slack-classified: critical work ASAP, the rest level-loaded with
    /// per-class lookahead ceilings.
    CriticalityAware { target_utilization: f64 },
}

/// Engine knobs shared by every scenario run.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Scheduling datum: the Monday 06:00 the horizon opens on.
    pub start: NaiveDateTime,
    /// Days between a late part's on-dock date and its earliest start.
    pub late_part_delay_days: i64,
    pub variant: ScheduleVariant,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            start: NaiveDate::from_ymd_opt(2025, 8, 25)
                .expect("valid datum")
                .and_hms_opt(6, 0, 0)
                .expect("valid datum"),
            late_part_delay_days: 1,
            variant: ScheduleVariant::Asap,
        }
    }
}

/// Merge every capacity table of a plan into the single team-skill keyed
/// map the ledger runs on.
pub(crate) fn merged_capacities(plan: &Plan) -> std::collections::BTreeMap<String, u32> {
    let mut out = std::collections::BTreeMap::new();
    for team in plan
        .mechanic_teams
        .values()
        .chain(plan.quality_teams.values())
        .chain(plan.customer_teams.values())
    {
        out.insert(team.name.clone(), team.capacity);
    }
    out
}
