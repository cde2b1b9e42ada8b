//! # takt-core
//!
//! Core domain model for the takt production scheduling engine.
//!
//! This crate provides:
//! - Identity types: [`InstanceId`], template and product keys
//! - Domain types: [`Plan`], [`TaskTemplate`], [`TaskInstance`], [`Team`],
//!   [`Product`], [`ScheduleRecord`]
//! - The six precedence [`Relationship`] forms with alias normalization
//!   and tolerance-aware checking
//! - Calendar and shift arithmetic (see [`calendar`])
//!
//! ## Example
//!
//! ```rust
//! use takt_core::{InstanceId, Relationship};
//!
//! let id = InstanceId::production("Line7", 42);
//! assert_eq!(id.to_string(), "Line7_42");
//!
//! let rel = Relationship::parse("F=S");
//! assert_eq!(rel, Relationship::FinishEqualsStart);
//! ```

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

pub mod calendar;

pub use calendar::{is_working_day, round_up_quarter_hour, ShiftSpan};

// ============================================================================
// Type Aliases
// ============================================================================

/// Baseline template key (the integer task number from the input file).
pub type TemplateId = u32;

/// Product line name.
pub type ProductName = String;

/// Team-skill identifier: the unit capacity is tracked on. Either a plain
/// team name or `"Team (Skill)"` when a skill subset applies.
pub type TeamName = String;

/// Shift label as it appears in the input file (`1st`, `2nd`, `3rd`).
pub type ShiftName = String;

/// Equality relationships (`Finish = Start`, `Start = Start`) admit this
/// much clock skew between the two endpoints.
pub const EQUALITY_TOLERANCE_SECS: i64 = 60;

// ============================================================================
// Instance Identity
// ============================================================================

/// Which inspection follows a primary task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InspectionKind {
    Quality,
    Customer,
}

impl InspectionKind {
    fn tag(self) -> &'static str {
        match self {
            InspectionKind::Quality => "QI",
            InspectionKind::Customer => "CC",
        }
    }
}

/// Identity of a concrete schedulable occurrence.
///
/// Baseline production work is keyed by (product, template). Inspections are
/// keyed by the primary instance they certify; there is at most one
/// inspection of each kind per primary. Late-part and rework records keep
/// their raw string ids from the input file (`LP_1001`, `RW_2001`).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InstanceId {
    Production {
        product: ProductName,
        template: TemplateId,
    },
    Inspection {
        kind: InspectionKind,
        primary: Box<InstanceId>,
    },
    LatePart(String),
    Rework(String),
}

impl InstanceId {
    pub fn production(product: impl Into<String>, template: TemplateId) -> Self {
        InstanceId::Production {
            product: product.into(),
            template,
        }
    }

    pub fn inspection(kind: InspectionKind, primary: InstanceId) -> Self {
        InstanceId::Inspection {
            kind,
            primary: Box::new(primary),
        }
    }

    /// The product this instance belongs to, when one is known from the id
    /// itself (late parts and rework carry their product on the instance
    /// record instead).
    pub fn product(&self) -> Option<&str> {
        match self {
            InstanceId::Production { product, .. } => Some(product),
            InstanceId::Inspection { primary, .. } => primary.product(),
            _ => None,
        }
    }

    pub fn is_inspection(&self) -> bool {
        matches!(self, InstanceId::Inspection { .. })
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceId::Production { product, template } => {
                write!(f, "{}_{}", product, template)
            }
            InstanceId::Inspection { kind, primary } => match primary.as_ref() {
                InstanceId::Production { product, template } => {
                    write!(f, "{}_{}_{}", product, kind.tag(), template)
                }
                other => write!(f, "{}_{}", kind.tag(), other),
            },
            InstanceId::LatePart(raw) | InstanceId::Rework(raw) => write!(f, "{}", raw),
        }
    }
}

// ============================================================================
// Precedence Relationships
// ============================================================================

/// The six precedence forms between a `first` and `second` task.
///
/// `Finish <= Start` is the default everywhere a relationship column is
/// absent or unrecognized.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Relationship {
    /// end(first) <= start(second)
    #[default]
    FinishBeforeStart,
    /// end(first) == start(second), within tolerance
    FinishEqualsStart,
    /// end(first) <= end(second)
    FinishBeforeFinish,
    /// start(first) <= start(second)
    StartBeforeStart,
    /// start(first) == start(second), within tolerance
    StartEqualsStart,
    /// start(first) <= end(second)
    StartBeforeFinish,
}

impl Relationship {
    /// Normalize a relationship cell. Symbolic aliases (`FS`, `F-S`,
    /// `Finish-Start`, ...) and the canonical spelled-out forms are
    /// accepted; anything else maps to `Finish <= Start`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "Finish <= Start" | "FS" | "F-S" | "Finish-Start" => Relationship::FinishBeforeStart,
            "Finish = Start" | "F=S" | "Finish=Start" => Relationship::FinishEqualsStart,
            "Finish <= Finish" | "FF" | "F-F" | "Finish-Finish" => Relationship::FinishBeforeFinish,
            "Start <= Start" | "SS" | "S-S" | "Start-Start" => Relationship::StartBeforeStart,
            "Start = Start" | "S=S" | "Start=Start" => Relationship::StartEqualsStart,
            "Start <= Finish" | "SF" | "S-F" | "Start-Finish" => Relationship::StartBeforeFinish,
            _ => Relationship::FinishBeforeStart,
        }
    }

    /// Whether an incoming edge of this form gates the successor's start:
    /// finish-anchored bounds cannot be computed until the predecessor is
    /// placed, start-anchored ones resolve as soon as scheduling begins.
    pub fn blocks_successor(self) -> bool {
        matches!(
            self,
            Relationship::FinishBeforeStart
                | Relationship::FinishEqualsStart
                | Relationship::FinishBeforeFinish
        )
    }

    /// Whether this edge is directed for cycle detection. Only the
    /// finish-to-start forms impose a strict ordering of the two tasks.
    pub fn orders_tasks(self) -> bool {
        matches!(
            self,
            Relationship::FinishBeforeStart | Relationship::FinishEqualsStart
        )
    }

    /// Check the relationship between two placed intervals.
    pub fn check(
        self,
        first_start: NaiveDateTime,
        first_end: NaiveDateTime,
        second_start: NaiveDateTime,
        second_end: NaiveDateTime,
    ) -> bool {
        let within_tolerance = |a: NaiveDateTime, b: NaiveDateTime| {
            (a - b).num_seconds().abs() < EQUALITY_TOLERANCE_SECS
        };
        match self {
            Relationship::FinishBeforeStart => first_end <= second_start,
            Relationship::FinishEqualsStart => within_tolerance(first_end, second_start),
            Relationship::FinishBeforeFinish => first_end <= second_end,
            Relationship::StartBeforeStart => first_start <= second_start,
            Relationship::StartEqualsStart => within_tolerance(first_start, second_start),
            Relationship::StartBeforeFinish => first_start <= second_end,
        }
    }

    /// Lower bound this edge puts on the successor's start, given the
    /// placed predecessor interval and the successor's duration.
    pub fn earliest_start_bound(
        self,
        first_start: NaiveDateTime,
        first_end: NaiveDateTime,
        second_duration_minutes: i64,
    ) -> NaiveDateTime {
        let dur = chrono::Duration::minutes(second_duration_minutes);
        match self {
            Relationship::FinishBeforeStart | Relationship::FinishEqualsStart => first_end,
            Relationship::StartBeforeStart | Relationship::StartEqualsStart => first_start,
            Relationship::FinishBeforeFinish => first_end - dur,
            Relationship::StartBeforeFinish => first_start - dur,
        }
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Relationship::FinishBeforeStart => "Finish <= Start",
            Relationship::FinishEqualsStart => "Finish = Start",
            Relationship::FinishBeforeFinish => "Finish <= Finish",
            Relationship::StartBeforeStart => "Start <= Start",
            Relationship::StartEqualsStart => "Start = Start",
            Relationship::StartBeforeFinish => "Start <= Finish",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// Task Templates and Instances
// ============================================================================

/// Immutable baseline task definition from the duration/resource table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub id: TemplateId,
    /// Working duration in minutes (> 0).
    pub duration_minutes: i64,
    /// Base team, e.g. `Mechanic Team 3`.
    pub team: TeamName,
    /// Optional skill subset within the base team.
    pub skill: Option<String>,
    /// People required for the full duration (>= 1).
    pub headcount: u32,
}

impl TaskTemplate {
    /// The scheduling unit: `"Team (Skill)"` when a skill applies,
    /// otherwise the base team itself.
    pub fn team_skill(&self) -> TeamName {
        team_skill_of(&self.team, self.skill.as_deref())
    }
}

/// Combine a base team and optional skill into the scheduling unit name.
pub fn team_skill_of(team: &str, skill: Option<&str>) -> TeamName {
    match skill {
        Some(s) => format!("{} ({})", team, s),
        None => team.to_string(),
    }
}

/// Strip the skill suffix off a team-skill identifier.
pub fn base_team_of(team_skill: &str) -> &str {
    match team_skill.split_once(" (") {
        Some((base, _)) => base,
        None => team_skill,
    }
}

/// First run of digits in a team name, used by the 1:1 quality mapping.
pub fn team_number(name: &str) -> Option<u32> {
    let digits: String = name
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Classification of every schedulable occurrence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskType {
    Production,
    QualityInspection,
    CustomerInspection,
    LatePart,
    Rework,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskType::Production => "Production",
            TaskType::QualityInspection => "Quality Inspection",
            TaskType::CustomerInspection => "Customer",
            TaskType::LatePart => "Late Part",
            TaskType::Rework => "Rework",
        };
        write!(f, "{}", s)
    }
}

/// A concrete occurrence of work, materialized from a template, an
/// inspection requirement, or a late-part/rework record.
#[derive(Clone, Debug)]
pub struct TaskInstance {
    pub id: InstanceId,
    pub task_type: TaskType,
    pub duration_minutes: i64,
    pub headcount: u32,
    /// Base team (for quality inspections this is the mapped quality team;
    /// for customer inspections a placeholder until scheduling binds one).
    pub team: TeamName,
    pub skill: Option<String>,
    /// The unit this instance is scheduled and capacity-checked against.
    pub team_skill: TeamName,
    pub product: Option<ProductName>,
    /// Template id for production instances.
    pub template: Option<TemplateId>,
    /// The certified task, for inspection instances.
    pub primary: Option<InstanceId>,
    /// Estimated arrival date, for late parts.
    pub on_dock: Option<NaiveDate>,
}

impl TaskInstance {
    pub fn is_quality(&self) -> bool {
        self.task_type == TaskType::QualityInspection
    }

    pub fn is_customer(&self) -> bool {
        self.task_type == TaskType::CustomerInspection
    }
}

// ============================================================================
// Products, Teams, Shifts
// ============================================================================

/// A product line: one unit moving down the line with its own delivery
/// commitment, holiday calendar, and remaining span of baseline work.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Product {
    pub name: ProductName,
    pub delivery: NaiveDateTime,
    /// Inclusive `[start, end]` range of template ids still to run.
    pub remaining: (TemplateId, TemplateId),
    pub holidays: BTreeSet<NaiveDate>,
}

impl Product {
    pub fn new(name: impl Into<String>, delivery: NaiveDateTime) -> Self {
        Self {
            name: name.into(),
            delivery,
            remaining: (1, 100),
            holidays: BTreeSet::new(),
        }
    }

    pub fn contains_template(&self, template: TemplateId) -> bool {
        self.remaining.0 <= template && template <= self.remaining.1
    }
}

/// Team category, which decides capacity table and assignment rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TeamKind {
    Mechanic,
    Quality,
    Customer,
}

/// A crew with an integer headcount and the shifts it works.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Team {
    pub name: TeamName,
    pub kind: TeamKind,
    pub capacity: u32,
    pub shifts: Vec<ShiftName>,
}

impl Team {
    pub fn new(name: impl Into<String>, kind: TeamKind, capacity: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            capacity,
            shifts: Vec::new(),
        }
    }

    pub fn with_shifts(mut self, shifts: &[&str]) -> Self {
        self.shifts = shifts.iter().map(|s| (*s).to_string()).collect();
        self
    }
}

/// Deterministic shift fallback for quality teams with no declared calendar
/// and no numerically matching mechanic team.
pub fn default_quality_shift(team_num: u32) -> ShiftName {
    match team_num {
        1 | 4 | 7 | 10 => "1st".to_string(),
        2 | 5 | 8 => "2nd".to_string(),
        _ => "3rd".to_string(),
    }
}

// ============================================================================
// Input Tables Beyond Templates
// ============================================================================

/// Template-level precedence from the relationships table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateConstraint {
    pub first: TemplateId,
    pub second: TemplateId,
    pub relationship: Relationship,
}

/// Quality inspection requirement against a primary template.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QualityRequirement {
    pub primary: TemplateId,
    /// Inspection task number from the input file (informational; instances
    /// are keyed by their primary).
    pub inspection_task: TemplateId,
    pub headcount: u32,
    pub duration_minutes: i64,
}

/// Customer inspection requirement against a primary template.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CustomerRequirement {
    pub primary: TemplateId,
    /// Label from the input file, e.g. `CC_601`.
    pub label: String,
    pub headcount: u32,
    pub duration_minutes: i64,
}

/// A late-part or rework relationship row. Endpoints are raw strings and
/// resolved against the instance table when dependencies are built.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PerturbationConstraint {
    pub first: String,
    pub second: String,
    pub relationship: Relationship,
    /// Estimated on-dock date (late parts only).
    pub on_dock: Option<NaiveDate>,
    pub product: Option<ProductName>,
}

/// A late-part or rework task detail row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PerturbationTask {
    pub id: String,
    pub duration_minutes: i64,
    /// Declared base team; overridden when a baseline descendant is traced.
    pub team: TeamName,
    pub headcount: u32,
    /// Rework only: spawn a linked quality inspection.
    pub needs_inspection: bool,
    pub inspection_duration_minutes: i64,
    pub inspection_headcount: u32,
}

// ============================================================================
// Plan
// ============================================================================

/// Everything loaded from the input file. Immutable once built; scenario
/// runs copy the capacity figures they mutate.
#[derive(Clone, Debug, Default)]
pub struct Plan {
    pub shift_hours: BTreeMap<ShiftName, ShiftSpan>,
    /// Mechanic teams, including the skill-specific capacity entries.
    pub mechanic_teams: BTreeMap<TeamName, Team>,
    pub quality_teams: BTreeMap<TeamName, Team>,
    pub customer_teams: BTreeMap<TeamName, Team>,
    pub templates: BTreeMap<TemplateId, TaskTemplate>,
    pub template_constraints: Vec<TemplateConstraint>,
    pub products: BTreeMap<ProductName, Product>,
    pub quality_requirements: Vec<QualityRequirement>,
    pub customer_requirements: Vec<CustomerRequirement>,
    pub late_part_constraints: Vec<PerturbationConstraint>,
    pub rework_constraints: Vec<PerturbationConstraint>,
    pub late_part_details: Vec<PerturbationTask>,
    pub rework_details: Vec<PerturbationTask>,
}

impl Plan {
    /// 1:1 quality mapping: `Mechanic Team N` maps to `Quality Team N` when
    /// that quality team exists.
    pub fn map_quality_team(&self, mechanic_team: &str) -> Option<TeamName> {
        let n = team_number(mechanic_team)?;
        let candidate = format!("Quality Team {}", n);
        self.quality_teams.contains_key(&candidate).then_some(candidate)
    }

    /// Capacity of a team-skill unit, searching all three tables.
    pub fn team_capacity(&self, team: &str) -> Option<u32> {
        self.mechanic_teams
            .get(team)
            .or_else(|| self.quality_teams.get(team))
            .or_else(|| self.customer_teams.get(team))
            .map(|t| t.capacity)
    }

    /// Shift list for a team-skill unit. Mechanic skill variants fall back
    /// to their base team's calendar.
    pub fn shifts_for(&self, team: &str) -> Vec<ShiftName> {
        if let Some(t) = self
            .quality_teams
            .get(team)
            .or_else(|| self.customer_teams.get(team))
            .or_else(|| self.mechanic_teams.get(team))
        {
            if !t.shifts.is_empty() {
                return t.shifts.clone();
            }
        }
        let base = base_team_of(team);
        if let Some(t) = self.mechanic_teams.get(base) {
            if !t.shifts.is_empty() {
                return t.shifts.clone();
            }
        }
        vec!["1st".to_string()]
    }

    /// First skill-qualified capacity entry under a declared base team, for
    /// late-part/rework records whose lineage cannot be traced.
    pub fn first_skill_entry(&self, base_team: &str) -> Option<&Team> {
        let prefix = format!("{} (", base_team);
        self.mechanic_teams
            .values()
            .find(|t| t.name.starts_with(&prefix))
    }
}

// ============================================================================
// Schedule Output
// ============================================================================

/// Slack-based urgency class used by the criticality-aware variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Criticality {
    Critical,
    Buffer,
    Flexible,
}

impl fmt::Display for Criticality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Criticality::Critical => "CRITICAL",
            Criticality::Buffer => "BUFFER",
            Criticality::Flexible => "FLEXIBLE",
        };
        write!(f, "{}", s)
    }
}

/// One placed instance: the engine's output row.
#[derive(Clone, Debug)]
pub struct ScheduleRecord {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// Assigned base team (quality/customer team name for inspections).
    pub team: TeamName,
    /// Assigned scheduling unit.
    pub team_skill: TeamName,
    pub skill: Option<String>,
    pub shift: ShiftName,
    pub product: Option<ProductName>,
    pub duration_minutes: i64,
    pub headcount: u32,
    pub task_type: TaskType,
    pub template: Option<TemplateId>,
    pub criticality: Option<Criticality>,
}

impl ScheduleRecord {
    pub fn is_quality(&self) -> bool {
        self.task_type == TaskType::QualityInspection
    }

    pub fn is_customer(&self) -> bool {
        self.task_type == TaskType::CustomerInspection
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Model-level failures shared across the workspace.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid clock time: {0}")]
    InvalidTime(String),
}

// ============================================================================
// Tests
// ============================================================================
