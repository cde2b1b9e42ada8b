//! # takt-parser
//!
//! Reader for the single sectioned scheduling-data file.
//!
//! The file is a sequence of sections, each introduced by a banner line of
//! `====  SECTION NAME  ====` and followed by a CSV block. Unrecognized or
//! absent sections are skipped; malformed rows are dropped with a warning.
//! A missing file or a missing required column is fatal.

use chrono::{NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

use takt_core::{
    default_quality_shift, team_number, CustomerRequirement, PerturbationConstraint,
    PerturbationTask, Plan, Product, QualityRequirement, Relationship, ShiftSpan, TaskTemplate,
    Team, TeamKind, TemplateConstraint,
};

/// Parser failure modes. Row-level trouble never surfaces here; rows are
/// skipped with a warning instead.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("cannot read input file: {0}")]
    Io(#[from] std::io::Error),

    #[error("section '{section}' is missing required column '{column}'")]
    MissingColumn { section: String, column: String },
}

/// Read and parse the scheduling-data file at `path`.
///
/// UTF-8 is tried first (with BOM stripping); undecodable bytes fall back
/// to Latin-1, which cannot fail.
pub fn parse_file(path: impl AsRef<Path>) -> Result<Plan, ParseError> {
    let bytes = std::fs::read(path.as_ref())?;
    let content = match std::str::from_utf8(&bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            warn!("input is not valid UTF-8, decoding as Latin-1");
            encoding_rs::mem::decode_latin1(&bytes).into_owned()
        }
    };
    parse_str(&content)
}

/// Parse file content that has already been decoded.
pub fn parse_str(content: &str) -> Result<Plan, ParseError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let sections = split_sections(content);
    debug!(sections = sections.len(), "split input into sections");

    let mut plan = Plan::default();

    load_shift_hours(&sections, &mut plan);
    load_team_tables(&sections, &mut plan)?;
    load_templates(&sections, &mut plan)?;
    load_template_constraints(&sections, &mut plan)?;
    load_products(&sections, &mut plan)?;
    load_quality_requirements(&sections, &mut plan)?;
    load_customer_requirements(&sections, &mut plan)?;
    load_late_parts(&sections, &mut plan)?;
    load_rework(&sections, &mut plan)?;
    load_holidays(&sections, &mut plan)?;

    inherit_shifts(&mut plan);

    Ok(plan)
}

// ============================================================================
// Section Splitting
// ============================================================================

/// Cut the file into named sections on `====` banner lines. Blank lines are
/// dropped; everything else accumulates under the most recent banner.
fn split_sections(content: &str) -> BTreeMap<String, String> {
    let mut sections = BTreeMap::new();
    let mut current: Option<String> = None;
    let mut lines: Vec<&str> = Vec::new();

    let flush = |name: &Option<String>, lines: &mut Vec<&str>, out: &mut BTreeMap<String, String>| {
        if let Some(name) = name {
            if !lines.is_empty() {
                out.insert(name.clone(), lines.join("\n"));
            }
        }
        lines.clear();
    };

    for line in content.lines() {
        if line.trim_start().starts_with("====") {
            flush(&current, &mut lines, &mut sections);
            current = Some(line.replace('=', "").trim().to_string());
        } else if !line.trim().is_empty() {
            lines.push(line);
        }
    }
    flush(&current, &mut lines, &mut sections);

    sections
}

// ============================================================================
// Table Access
// ============================================================================

/// One parsed CSV block: a header row plus data rows, with named-column
/// lookup for the tables that carry optional columns.
struct Table {
    section: String,
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    fn parse(section: &str, body: &str) -> Self {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(body.as_bytes());

        let mut records: Vec<Vec<String>> = Vec::new();
        for record in reader.records() {
            match record {
                Ok(r) => records.push(r.iter().map(|c| c.to_string()).collect()),
                Err(e) => warn!(section, error = %e, "skipping malformed row"),
            }
        }

        let header = if records.is_empty() {
            Vec::new()
        } else {
            records.remove(0)
        };
        Self {
            section: section.to_string(),
            header,
            rows: records,
        }
    }

    fn col(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }

    fn require(&self, name: &str) -> Result<usize, ParseError> {
        self.col(name).ok_or_else(|| ParseError::MissingColumn {
            section: self.section.clone(),
            column: name.to_string(),
        })
    }

    fn cell<'a>(&self, row: &'a [String], idx: usize) -> Option<&'a str> {
        row.get(idx).map(String::as_str).filter(|c| !c.is_empty())
    }
}

fn parse_u32(cell: &str) -> Option<u32> {
    cell.trim().parse().ok()
}

fn parse_i64(cell: &str) -> Option<i64> {
    cell.trim().parse().ok()
}

/// Date cells appear in ISO and US forms, with or without a time-of-day.
fn parse_datetime_cell(cell: &str) -> Option<NaiveDateTime> {
    let cell = cell.trim();
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%m/%d/%Y %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(cell, fmt) {
            return Some(dt);
        }
    }
    parse_date_cell(cell).and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn parse_date_cell(cell: &str) -> Option<NaiveDate> {
    let cell = cell.trim();
    for fmt in ["%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y"] {
        if let Ok(d) = NaiveDate::parse_from_str(cell, fmt) {
            return Some(d);
        }
    }
    None
}

fn parse_yes(cell: &str) -> bool {
    matches!(
        cell.trim().to_ascii_lowercase().as_str(),
        "yes" | "y" | "1" | "true"
    )
}

// ============================================================================
// Section Loaders
// ============================================================================

fn load_shift_hours(sections: &BTreeMap<String, String>, plan: &mut Plan) {
    let Some(body) = sections.get("SHIFT WORKING HOURS") else {
        warn!("SHIFT WORKING HOURS not found, using default shift windows");
        plan.shift_hours.insert("1st".into(), ShiftSpan::new(6 * 60, 14 * 60 + 30));
        plan.shift_hours.insert("2nd".into(), ShiftSpan::new(14 * 60 + 30, 23 * 60));
        plan.shift_hours.insert("3rd".into(), ShiftSpan::new(23 * 60, 6 * 60));
        return;
    };

    let table = Table::parse("SHIFT WORKING HOURS", body);
    for row in &table.rows {
        let (Some(shift), Some(start), Some(end)) =
            (table.cell(row, 0), table.cell(row, 1), table.cell(row, 2))
        else {
            warn!(section = "SHIFT WORKING HOURS", "skipping incomplete row");
            continue;
        };
        match ShiftSpan::from_cells(start, end) {
            Ok(span) => {
                plan.shift_hours.insert(shift.to_string(), span);
            }
            Err(e) => warn!(shift, error = %e, "skipping shift with unparseable hours"),
        }
    }
    debug!(shifts = plan.shift_hours.len(), "loaded shift windows");
}

/// Capacity and calendar tables for all three team categories. Capacity
/// tables may contain skill-specific entries (`Mechanic Team 1 (Skill 2)`);
/// calendars are declared on base teams.
fn load_team_tables(
    sections: &BTreeMap<String, String>,
    plan: &mut Plan,
) -> Result<(), ParseError> {
    let specs: [(&str, &str, TeamKind); 3] = [
        ("MECHANIC TEAM CAPACITY", "MECHANIC TEAM WORKING CALENDARS", TeamKind::Mechanic),
        ("QUALITY TEAM CAPACITY", "QUALITY TEAM WORKING CALENDARS", TeamKind::Quality),
        ("CUSTOMER TEAM CAPACITY", "CUSTOMER TEAM WORKING CALENDARS", TeamKind::Customer),
    ];

    for (capacity_section, calendar_section, kind) in specs {
        if let Some(body) = sections.get(capacity_section) {
            let table = Table::parse(capacity_section, body);
            for row in &table.rows {
                let (Some(name), Some(capacity)) = (table.cell(row, 0), table.cell(row, 1)) else {
                    continue;
                };
                let Some(capacity) = parse_u32(capacity) else {
                    warn!(section = capacity_section, team = name, "non-integer capacity, skipping");
                    continue;
                };
                let team = Team::new(name, kind, capacity);
                match kind {
                    TeamKind::Mechanic => plan.mechanic_teams.insert(team.name.clone(), team),
                    TeamKind::Quality => plan.quality_teams.insert(team.name.clone(), team),
                    TeamKind::Customer => plan.customer_teams.insert(team.name.clone(), team),
                };
            }
        }

        if let Some(body) = sections.get(calendar_section) {
            let table = Table::parse(calendar_section, body);
            for row in &table.rows {
                let (Some(name), Some(shift)) = (table.cell(row, 0), table.cell(row, 1)) else {
                    continue;
                };
                let teams = match kind {
                    TeamKind::Mechanic => &mut plan.mechanic_teams,
                    TeamKind::Quality => &mut plan.quality_teams,
                    TeamKind::Customer => &mut plan.customer_teams,
                };
                match teams.get_mut(name) {
                    Some(team) => team.shifts.push(shift.to_string()),
                    None => warn!(section = calendar_section, team = name, "calendar for unknown team"),
                }
            }
        }
    }

    debug!(
        mechanic = plan.mechanic_teams.len(),
        quality = plan.quality_teams.len(),
        customer = plan.customer_teams.len(),
        "loaded team tables"
    );
    Ok(())
}

fn load_templates(sections: &BTreeMap<String, String>, plan: &mut Plan) -> Result<(), ParseError> {
    let Some(body) = sections.get("TASK DURATION AND RESOURCE TABLE") else {
        return Ok(());
    };
    let table = Table::parse("TASK DURATION AND RESOURCE TABLE", body);
    let task = table.require("Task")?;
    let duration = table.require("Duration (minutes)")?;
    let team = table.require("Resource Type")?;
    let headcount = table.require("Mechanics Required")?;
    let skill = table.col("Skill Code");

    for row in &table.rows {
        let parsed = (|| {
            let id = parse_u32(table.cell(row, task)?)?;
            let duration = parse_i64(table.cell(row, duration)?)?;
            let team = table.cell(row, team)?.to_string();
            let headcount = parse_u32(table.cell(row, headcount)?)?;
            let skill = skill.and_then(|i| table.cell(row, i)).map(str::to_string);
            Some(TaskTemplate {
                id,
                duration_minutes: duration,
                team,
                skill,
                headcount,
            })
        })();
        match parsed {
            Some(template) => {
                plan.templates.insert(template.id, template);
            }
            None => warn!(section = "TASK DURATION AND RESOURCE TABLE", "skipping incomplete row"),
        }
    }
    debug!(templates = plan.templates.len(), "loaded task definitions");
    Ok(())
}

fn load_template_constraints(
    sections: &BTreeMap<String, String>,
    plan: &mut Plan,
) -> Result<(), ParseError> {
    let Some(body) = sections.get("TASK RELATIONSHIPS TABLE") else {
        return Ok(());
    };
    let table = Table::parse("TASK RELATIONSHIPS TABLE", body);
    let first = table.require("First")?;
    let second = table.require("Second")?;
    let relationship = table.col("Relationship Type").or_else(|| table.col("Relationship"));

    for row in &table.rows {
        let (Some(f), Some(s)) = (
            table.cell(row, first).and_then(parse_u32),
            table.cell(row, second).and_then(parse_u32),
        ) else {
            warn!(section = "TASK RELATIONSHIPS TABLE", "skipping non-numeric row");
            continue;
        };
        let rel = relationship
            .and_then(|i| table.cell(row, i))
            .map_or(Relationship::FinishBeforeStart, Relationship::parse);
        plan.template_constraints.push(TemplateConstraint {
            first: f,
            second: s,
            relationship: rel,
        });
    }
    debug!(constraints = plan.template_constraints.len(), "loaded task relationships");
    Ok(())
}

fn load_products(sections: &BTreeMap<String, String>, plan: &mut Plan) -> Result<(), ParseError> {
    if let Some(body) = sections.get("PRODUCT LINE DELIVERY SCHEDULE") {
        let table = Table::parse("PRODUCT LINE DELIVERY SCHEDULE", body);
        let product = table.require("Product Line")?;
        let delivery = table.require("Delivery Date")?;

        for row in &table.rows {
            let (Some(name), Some(date)) = (
                table.cell(row, product),
                table.cell(row, delivery).and_then(parse_datetime_cell),
            ) else {
                warn!(section = "PRODUCT LINE DELIVERY SCHEDULE", "skipping incomplete row");
                continue;
            };
            plan.products
                .insert(name.to_string(), Product::new(name, date));
        }
    }

    if let Some(body) = sections.get("PRODUCT LINE JOBS") {
        let table = Table::parse("PRODUCT LINE JOBS", body);
        let product = table.require("Product Line")?;
        let start = table.require("Task Start")?;
        let end = table.require("Task End")?;

        for row in &table.rows {
            let (Some(name), Some(start), Some(end)) = (
                table.cell(row, product),
                table.cell(row, start).and_then(parse_u32),
                table.cell(row, end).and_then(parse_u32),
            ) else {
                warn!(section = "PRODUCT LINE JOBS", "skipping incomplete row");
                continue;
            };
            match plan.products.get_mut(name) {
                Some(p) => p.remaining = (start, end),
                None => warn!(product = name, "job range for product without delivery date"),
            }
        }
    }

    debug!(products = plan.products.len(), "loaded product lines");
    Ok(())
}

fn load_holidays(sections: &BTreeMap<String, String>, plan: &mut Plan) -> Result<(), ParseError> {
    let Some(body) = sections.get("PRODUCT LINE HOLIDAY CALENDAR") else {
        return Ok(());
    };
    let table = Table::parse("PRODUCT LINE HOLIDAY CALENDAR", body);
    let product = table.require("Product Line")?;
    let date = table.require("Date")?;

    let mut count = 0usize;
    for row in &table.rows {
        let (Some(name), Some(day)) = (
            table.cell(row, product),
            table.cell(row, date).and_then(parse_date_cell),
        ) else {
            warn!(section = "PRODUCT LINE HOLIDAY CALENDAR", "skipping unparseable row");
            continue;
        };
        match plan.products.get_mut(name) {
            Some(p) => {
                p.holidays.insert(day);
                count += 1;
            }
            None => warn!(product = name, "holiday for unknown product"),
        }
    }
    debug!(holidays = count, "loaded holiday entries");
    Ok(())
}

fn load_quality_requirements(
    sections: &BTreeMap<String, String>,
    plan: &mut Plan,
) -> Result<(), ParseError> {
    let Some(body) = sections.get("QUALITY INSPECTION REQUIREMENTS") else {
        return Ok(());
    };
    let table = Table::parse("QUALITY INSPECTION REQUIREMENTS", body);
    let primary = table.require("Primary Task")?;
    let inspection = table.require("Quality Task")?;
    let headcount = table.require("Quality Headcount Required")?;
    let duration = table.require("Quality Duration (minutes)")?;

    for row in &table.rows {
        let parsed = (|| {
            Some(QualityRequirement {
                primary: parse_u32(table.cell(row, primary)?)?,
                inspection_task: parse_u32(table.cell(row, inspection)?)?,
                headcount: parse_u32(table.cell(row, headcount)?)?,
                duration_minutes: parse_i64(table.cell(row, duration)?)?,
            })
        })();
        match parsed {
            Some(req) => plan.quality_requirements.push(req),
            None => warn!(section = "QUALITY INSPECTION REQUIREMENTS", "skipping incomplete row"),
        }
    }
    Ok(())
}

fn load_customer_requirements(
    sections: &BTreeMap<String, String>,
    plan: &mut Plan,
) -> Result<(), ParseError> {
    let Some(body) = sections.get("CUSTOMER INSPECTION REQUIREMENTS") else {
        return Ok(());
    };
    // Positional block: Primary Task, Customer Task id, Customer Headcount,
    // Customer Duration (the duration column header varies).
    let table = Table::parse("CUSTOMER INSPECTION REQUIREMENTS", body);

    for row in &table.rows {
        let parsed = (|| {
            Some(CustomerRequirement {
                primary: parse_u32(table.cell(row, 0)?)?,
                label: table.cell(row, 1)?.to_string(),
                headcount: parse_u32(table.cell(row, 2)?)?,
                duration_minutes: parse_i64(table.cell(row, 3)?)?,
            })
        })();
        match parsed {
            Some(req) => plan.customer_requirements.push(req),
            None => warn!(section = "CUSTOMER INSPECTION REQUIREMENTS", "skipping incomplete row"),
        }
    }
    Ok(())
}

fn load_late_parts(sections: &BTreeMap<String, String>, plan: &mut Plan) -> Result<(), ParseError> {
    if let Some(body) = sections.get("LATE PARTS RELATIONSHIPS TABLE") {
        let table = Table::parse("LATE PARTS RELATIONSHIPS TABLE", body);
        let first = table.require("First")?;
        let second = table.require("Second")?;
        let on_dock = table.require("Estimated On Dock Date")?;
        let relationship = table.col("Relationship Type").or_else(|| table.col("Relationship"));
        let product = table.col("Product Line");

        for row in &table.rows {
            let (Some(f), Some(s), Some(dock)) = (
                table.cell(row, first),
                table.cell(row, second),
                table.cell(row, on_dock).and_then(parse_date_cell),
            ) else {
                warn!(section = "LATE PARTS RELATIONSHIPS TABLE", "skipping incomplete row");
                continue;
            };
            plan.late_part_constraints.push(PerturbationConstraint {
                first: f.to_string(),
                second: s.to_string(),
                relationship: relationship
                    .and_then(|i| table.cell(row, i))
                    .map_or(Relationship::FinishBeforeStart, Relationship::parse),
                on_dock: Some(dock),
                product: product.and_then(|i| table.cell(row, i)).map(str::to_string),
            });
        }
    }

    if let Some(body) = sections.get("LATE PARTS TASK DETAILS") {
        let table = Table::parse("LATE PARTS TASK DETAILS", body);
        let task = table.require("Task")?;
        let duration = table.require("Duration (minutes)")?;
        let team = table.require("Resource Type")?;
        let headcount = table.require("Mechanics Required")?;

        for row in &table.rows {
            let parsed = (|| {
                Some(PerturbationTask {
                    id: table.cell(row, task)?.to_string(),
                    duration_minutes: parse_i64(table.cell(row, duration)?)?,
                    team: table.cell(row, team)?.to_string(),
                    headcount: parse_u32(table.cell(row, headcount)?)?,
                    needs_inspection: false,
                    inspection_duration_minutes: 0,
                    inspection_headcount: 0,
                })
            })();
            match parsed {
                Some(t) => plan.late_part_details.push(t),
                None => warn!(section = "LATE PARTS TASK DETAILS", "skipping incomplete row"),
            }
        }
    }

    debug!(
        constraints = plan.late_part_constraints.len(),
        tasks = plan.late_part_details.len(),
        "loaded late parts"
    );
    Ok(())
}

fn load_rework(sections: &BTreeMap<String, String>, plan: &mut Plan) -> Result<(), ParseError> {
    if let Some(body) = sections.get("REWORK RELATIONSHIPS TABLE") {
        let table = Table::parse("REWORK RELATIONSHIPS TABLE", body);
        let first = table.require("First")?;
        let second = table.require("Second")?;
        let relationship = table.col("Relationship Type").or_else(|| table.col("Relationship"));
        let product = table.col("Product Line");

        for row in &table.rows {
            let (Some(f), Some(s)) = (table.cell(row, first), table.cell(row, second)) else {
                warn!(section = "REWORK RELATIONSHIPS TABLE", "skipping incomplete row");
                continue;
            };
            plan.rework_constraints.push(PerturbationConstraint {
                first: f.to_string(),
                second: s.to_string(),
                relationship: relationship
                    .and_then(|i| table.cell(row, i))
                    .map_or(Relationship::FinishBeforeStart, Relationship::parse),
                on_dock: None,
                product: product.and_then(|i| table.cell(row, i)).map(str::to_string),
            });
        }
    }

    if let Some(body) = sections.get("REWORK TASK DETAILS") {
        let table = Table::parse("REWORK TASK DETAILS", body);
        let task = table.require("Task")?;
        let duration = table.require("Duration (minutes)")?;
        let team = table.require("Resource Type")?;
        let headcount = table.require("Mechanics Required")?;
        let needs_qi = table.col("Needs QI");
        let qi_duration = table.col("QI Duration (minutes)");
        let qi_headcount = table.col("QI Headcount");

        for row in &table.rows {
            let parsed = (|| {
                Some(PerturbationTask {
                    id: table.cell(row, task)?.to_string(),
                    duration_minutes: parse_i64(table.cell(row, duration)?)?,
                    team: table.cell(row, team)?.to_string(),
                    headcount: parse_u32(table.cell(row, headcount)?)?,
                    // Rework defaults to needing an inspection unless the
                    // column says otherwise.
                    needs_inspection: needs_qi
                        .and_then(|i| table.cell(row, i))
                        .map_or(true, parse_yes),
                    inspection_duration_minutes: qi_duration
                        .and_then(|i| table.cell(row, i))
                        .and_then(parse_i64)
                        .unwrap_or(30),
                    inspection_headcount: qi_headcount
                        .and_then(|i| table.cell(row, i))
                        .and_then(parse_u32)
                        .unwrap_or(1),
                })
            })();
            match parsed {
                Some(t) => plan.rework_details.push(t),
                None => warn!(section = "REWORK TASK DETAILS", "skipping incomplete row"),
            }
        }
    }

    debug!(
        constraints = plan.rework_constraints.len(),
        tasks = plan.rework_details.len(),
        "loaded rework"
    );
    Ok(())
}

// ============================================================================
// Shift Inheritance
// ============================================================================

/// Fill in the shift lists the file leaves implicit: skill-specific
/// mechanic teams work their base team's shifts, quality teams work their
/// numerically matching mechanic team's shifts, and quality teams with no
/// match fall back to the fixed per-number pattern.
fn inherit_shifts(plan: &mut Plan) {
    let base_shifts: BTreeMap<String, Vec<String>> = plan
        .mechanic_teams
        .iter()
        .filter(|(_, t)| !t.shifts.is_empty())
        .map(|(name, t)| (name.clone(), t.shifts.clone()))
        .collect();

    let mut inherited = 0usize;
    for team in plan.mechanic_teams.values_mut() {
        if team.shifts.is_empty() {
            if let Some((base, _)) = team.name.split_once(" (Skill") {
                if let Some(shifts) = base_shifts.get(base.trim()) {
                    team.shifts = shifts.clone();
                    inherited += 1;
                    continue;
                }
            }
            team.shifts = vec!["1st".to_string()];
        }
    }
    if inherited > 0 {
        debug!(inherited, "skill-specific teams inherited base-team shifts");
    }

    for team in plan.quality_teams.values_mut() {
        if !team.shifts.is_empty() {
            continue;
        }
        match team_number(&team.name) {
            Some(n) => {
                let mechanic = format!("Mechanic Team {}", n);
                team.shifts = base_shifts
                    .get(&mechanic)
                    .cloned()
                    .unwrap_or_else(|| vec![default_quality_shift(n)]);
            }
            None => team.shifts = vec!["1st".to_string()],
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const SAMPLE: &str = "\
==== SHIFT WORKING HOURS ====
Shift,Start,End
1st,6:00,14:30
2nd,14:30,23:00
3rd,23:00,6:00
==== MECHANIC TEAM CAPACITY ====
Mechanic Team,Capacity
Mechanic Team 1,5
Mechanic Team 1 (Skill 2),3
Mechanic Team 2,4
==== MECHANIC TEAM WORKING CALENDARS ====
Mechanic Team,Shift
Mechanic Team 1,1st
Mechanic Team 2,2nd
==== QUALITY TEAM CAPACITY ====
Quality Team,Capacity
Quality Team 1,2
Quality Team 2,2
==== CUSTOMER TEAM CAPACITY ====
Customer Team,Capacity
Customer Team 1,2
==== TASK RELATIONSHIPS TABLE ====
First,Second,Relationship Type
1,2,Finish <= Start
2,3,F=S
==== TASK DURATION AND RESOURCE TABLE ====
Task,Duration (minutes),Resource Type,Mechanics Required,Skill Code
1,60,Mechanic Team 1,2,Skill 2
2,90,Mechanic Team 1,1,
3,120,Mechanic Team 2,2,
==== PRODUCT LINE DELIVERY SCHEDULE ====
Product Line,Delivery Date
Line A,2025-10-01
Line B,2025-10-15
==== PRODUCT LINE JOBS ====
Product Line,Task Start,Task End
Line A,1,3
Line B,2,3
==== PRODUCT LINE HOLIDAY CALENDAR ====
Product Line,Date
Line A,2025-09-01
==== QUALITY INSPECTION REQUIREMENTS ====
Primary Task,Quality Task,Quality Headcount Required,Quality Duration (minutes)
1,601,1,30
==== CUSTOMER INSPECTION REQUIREMENTS ====
Primary Task,Customer Task,Customer Headcount,Customer Duration
3,CC_701,1,45
==== LATE PARTS RELATIONSHIPS TABLE ====
First,Second,Relationship Type,Estimated On Dock Date,Product Line
LP_1001,2,Finish <= Start,2025-09-02,Line A
==== LATE PARTS TASK DETAILS ====
Task,Duration (minutes),Resource Type,Mechanics Required
LP_1001,45,Mechanic Team 1,1
==== REWORK RELATIONSHIPS TABLE ====
First,Second,Relationship Type,Product Line
RW_2001,3,Finish <= Start,Line A
==== REWORK TASK DETAILS ====
Task,Duration (minutes),Resource Type,Mechanics Required,Needs QI,QI Duration (minutes),QI Headcount
RW_2001,60,Mechanic Team 2,1,Yes,30,1
";

    #[test]
    fn parses_all_sections() {
        let plan = parse_str(SAMPLE).unwrap();

        assert_eq!(plan.shift_hours.len(), 3);
        assert!(plan.shift_hours["3rd"].crosses_midnight());

        assert_eq!(plan.mechanic_teams.len(), 3);
        assert_eq!(plan.mechanic_teams["Mechanic Team 1"].capacity, 5);
        assert_eq!(plan.quality_teams.len(), 2);
        assert_eq!(plan.customer_teams.len(), 1);

        assert_eq!(plan.templates.len(), 3);
        assert_eq!(plan.templates[&1].skill.as_deref(), Some("Skill 2"));
        assert_eq!(plan.templates[&2].skill, None);

        assert_eq!(plan.template_constraints.len(), 2);
        assert_eq!(
            plan.template_constraints[1].relationship,
            Relationship::FinishEqualsStart
        );

        assert_eq!(plan.products.len(), 2);
        assert_eq!(plan.products["Line A"].remaining, (1, 3));
        assert_eq!(plan.products["Line A"].holidays.len(), 1);

        assert_eq!(plan.quality_requirements.len(), 1);
        assert_eq!(plan.customer_requirements.len(), 1);
        assert_eq!(plan.customer_requirements[0].label, "CC_701");

        assert_eq!(plan.late_part_constraints.len(), 1);
        assert!(plan.late_part_constraints[0].on_dock.is_some());
        assert_eq!(plan.late_part_details.len(), 1);

        assert_eq!(plan.rework_details.len(), 1);
        assert!(plan.rework_details[0].needs_inspection);
    }

    #[test]
    fn shift_inheritance_rules() {
        let plan = parse_str(SAMPLE).unwrap();

        // Skill team inherits its base team's declared shift.
        assert_eq!(
            plan.mechanic_teams["Mechanic Team 1 (Skill 2)"].shifts,
            vec!["1st".to_string()]
        );
        // Quality teams inherit from the numerically matching mechanic team.
        assert_eq!(plan.quality_teams["Quality Team 1"].shifts, vec!["1st".to_string()]);
        assert_eq!(plan.quality_teams["Quality Team 2"].shifts, vec!["2nd".to_string()]);
    }

    #[test]
    fn quality_fallback_shift_without_matching_mechanic() {
        let input = "\
==== QUALITY TEAM CAPACITY ====
Quality Team,Capacity
Quality Team 5,2
Quality Team 9,2
";
        let plan = parse_str(input).unwrap();
        assert_eq!(plan.quality_teams["Quality Team 5"].shifts, vec!["2nd".to_string()]);
        assert_eq!(plan.quality_teams["Quality Team 9"].shifts, vec!["3rd".to_string()]);
    }

    #[test]
    fn bom_is_stripped() {
        let with_bom = format!("\u{feff}{}", SAMPLE);
        let plan = parse_str(&with_bom).unwrap();
        assert_eq!(plan.shift_hours.len(), 3);
    }

    #[test]
    fn missing_required_column_is_fatal() {
        let input = "\
==== TASK DURATION AND RESOURCE TABLE ====
Task,Resource Type,Mechanics Required
1,Mechanic Team 1,2
";
        let err = parse_str(input).unwrap_err();
        match err {
            ParseError::MissingColumn { column, .. } => {
                assert_eq!(column, "Duration (minutes)");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let input = "\
==== TASK DURATION AND RESOURCE TABLE ====
Task,Duration (minutes),Resource Type,Mechanics Required
1,60,Mechanic Team 1,2
not-a-number,60,Mechanic Team 1,2
2,,Mechanic Team 1,2
3,45,Mechanic Team 2,1
";
        let plan = parse_str(input).unwrap();
        assert_eq!(plan.templates.len(), 2);
        assert!(plan.templates.contains_key(&1));
        assert!(plan.templates.contains_key(&3));
    }

    #[test]
    fn missing_shift_section_uses_defaults() {
        let plan = parse_str("==== MECHANIC TEAM CAPACITY ====\nTeam,Cap\nMechanic Team 1,2\n").unwrap();
        assert_eq!(plan.shift_hours.len(), 3);
        assert_eq!(plan.shift_hours["1st"].minutes(), 510);
    }

    #[test]
    fn latin1_file_round_trips() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        // "Qualität" in Latin-1 bytes inside a team name.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"==== MECHANIC TEAM CAPACITY ====\n");
        bytes.extend_from_slice(b"Team,Capacity\nMechanic Team 1 Qualit\xe4t,4\n");
        file.write_all(&bytes).unwrap();

        let plan = parse_file(file.path()).unwrap();
        assert_eq!(
            plan.mechanic_teams["Mechanic Team 1 Qualit\u{e4}t"].capacity,
            4
        );
    }

    #[test]
    fn missing_file_is_fatal() {
        let err = parse_file("/nonexistent/scheduling_data.csv").unwrap_err();
        assert!(matches!(err, ParseError::Io(_)));
    }
}
