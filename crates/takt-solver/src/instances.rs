//! Instance expansion: from templates and perturbation records to the full
//! per-product instance table.
//!
//! Production instances materialize per product over its remaining range.
//! Inspection instances are keyed by the primary they certify. Late parts
//! and rework keep their raw ids and inherit their team from the first
//! baseline production instance reachable through the perturbation edges.

use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, warn};

use takt_core::{
    team_skill_of, InspectionKind, InstanceId, Plan, TaskInstance, TaskType, TeamName,
};

/// The materialized instance table plus the lookup sides the resolver and
/// engine need.
#[derive(Clone, Debug, Default)]
pub struct InstanceSet {
    pub instances: BTreeMap<InstanceId, TaskInstance>,
    /// Primary instance -> its quality inspection.
    pub quality_links: BTreeMap<InstanceId, InstanceId>,
    /// Primary instance -> its customer inspection.
    pub customer_links: BTreeMap<InstanceId, InstanceId>,
    pub late_parts: BTreeSet<InstanceId>,
    pub rework: BTreeSet<InstanceId>,
    /// Estimated arrival per late-part instance.
    pub on_dock: BTreeMap<InstanceId, NaiveDate>,
}

impl InstanceSet {
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn get(&self, id: &InstanceId) -> Option<&TaskInstance> {
        self.instances.get(id)
    }

    /// Expand a plan into its full instance set.
    pub fn build(plan: &Plan) -> Self {
        let mut set = InstanceSet::default();
        set.build_production(plan);
        set.build_quality_inspections(plan);
        set.build_customer_inspections(plan);
        set.build_late_parts(plan);
        set.build_rework(plan);
        debug!(
            instances = set.instances.len(),
            quality = set.quality_links.len(),
            customer = set.customer_links.len(),
            late_parts = set.late_parts.len(),
            rework = set.rework.len(),
            "instance expansion complete"
        );
        set
    }

    fn build_production(&mut self, plan: &Plan) {
        for product in plan.products.values() {
            for template_id in product.remaining.0..=product.remaining.1 {
                let Some(template) = plan.templates.get(&template_id) else {
                    continue;
                };
                let id = InstanceId::production(&product.name, template_id);
                self.instances.insert(
                    id.clone(),
                    TaskInstance {
                        id,
                        task_type: TaskType::Production,
                        duration_minutes: template.duration_minutes,
                        headcount: template.headcount,
                        team: template.team.clone(),
                        skill: template.skill.clone(),
                        team_skill: template.team_skill(),
                        product: Some(product.name.clone()),
                        template: Some(template_id),
                        primary: None,
                        on_dock: None,
                    },
                );
            }
        }
    }

    fn build_quality_inspections(&mut self, plan: &Plan) {
        let mut unmapped = 0usize;
        for req in &plan.quality_requirements {
            for product in plan.products.values() {
                if !product.contains_template(req.primary) {
                    continue;
                }
                let primary_id = InstanceId::production(&product.name, req.primary);
                let Some(primary) = self.instances.get(&primary_id) else {
                    continue;
                };

                // 1:1 mapping off the primary's base team. An unmappable
                // team keeps the primary's name so scheduling can retry the
                // mapping through the primary later.
                let team = match plan.map_quality_team(&primary.team) {
                    Some(t) => t,
                    None => {
                        unmapped += 1;
                        warn!(primary = %primary_id, team = %primary.team,
                              "no quality team for inspection");
                        primary.team.clone()
                    }
                };

                let id = InstanceId::inspection(InspectionKind::Quality, primary_id.clone());
                self.instances.insert(
                    id.clone(),
                    TaskInstance {
                        id: id.clone(),
                        task_type: TaskType::QualityInspection,
                        duration_minutes: req.duration_minutes,
                        headcount: req.headcount,
                        team: team.clone(),
                        skill: None,
                        team_skill: team,
                        product: Some(product.name.clone()),
                        template: None,
                        primary: Some(primary_id.clone()),
                        on_dock: None,
                    },
                );
                self.quality_links.insert(primary_id, id);
            }
        }
        if unmapped > 0 {
            warn!(count = unmapped, "quality inspections without a mapped team");
        }
    }

    fn build_customer_inspections(&mut self, plan: &Plan) {
        for req in &plan.customer_requirements {
            for product in plan.products.values() {
                if !product.contains_template(req.primary) {
                    continue;
                }
                let primary_id = InstanceId::production(&product.name, req.primary);
                if !self.instances.contains_key(&primary_id) {
                    continue;
                }

                // Customer teams are interchangeable; the placeholder is
                // replaced by whichever team offers the earliest slot.
                let placeholder: TeamName = plan
                    .customer_teams
                    .keys()
                    .next()
                    .cloned()
                    .unwrap_or_else(|| "Customer Team 1".to_string());

                let id = InstanceId::inspection(InspectionKind::Customer, primary_id.clone());
                self.instances.insert(
                    id.clone(),
                    TaskInstance {
                        id: id.clone(),
                        task_type: TaskType::CustomerInspection,
                        duration_minutes: req.duration_minutes,
                        headcount: req.headcount,
                        team: placeholder.clone(),
                        skill: None,
                        team_skill: placeholder,
                        product: Some(product.name.clone()),
                        template: None,
                        primary: Some(primary_id.clone()),
                        on_dock: None,
                    },
                );
                self.customer_links.insert(primary_id, id);
            }
        }
    }

    fn build_late_parts(&mut self, plan: &Plan) {
        let mut inherited = 0usize;
        for detail in &plan.late_part_details {
            let product = plan
                .late_part_constraints
                .iter()
                .find(|c| c.first == detail.id && c.product.is_some())
                .and_then(|c| c.product.clone());

            let (team, skill, team_skill) =
                self.inherit_team(plan, &detail.id, product.as_deref(), &detail.team, &mut inherited);

            let id = InstanceId::LatePart(detail.id.clone());
            self.instances.insert(
                id.clone(),
                TaskInstance {
                    id: id.clone(),
                    task_type: TaskType::LatePart,
                    duration_minutes: detail.duration_minutes,
                    headcount: detail.headcount,
                    team,
                    skill,
                    team_skill,
                    product: product.clone(),
                    template: None,
                    primary: None,
                    on_dock: plan
                        .late_part_constraints
                        .iter()
                        .find(|c| c.first == detail.id)
                        .and_then(|c| c.on_dock),
                },
            );
            if let Some(dock) = self.instances[&id].on_dock {
                self.on_dock.insert(id.clone(), dock);
            }
            self.late_parts.insert(id);
        }
        if inherited > 0 {
            debug!(inherited, "late parts inherited team from baseline descendants");
        }
    }

    fn build_rework(&mut self, plan: &Plan) {
        let mut inherited = 0usize;
        for detail in &plan.rework_details {
            let product = plan
                .rework_constraints
                .iter()
                .find(|c| (c.first == detail.id || c.second == detail.id) && c.product.is_some())
                .and_then(|c| c.product.clone());

            let (team, skill, team_skill) =
                self.inherit_team(plan, &detail.id, product.as_deref(), &detail.team, &mut inherited);

            let id = InstanceId::Rework(detail.id.clone());
            self.instances.insert(
                id.clone(),
                TaskInstance {
                    id: id.clone(),
                    task_type: TaskType::Rework,
                    duration_minutes: detail.duration_minutes,
                    headcount: detail.headcount,
                    team: team.clone(),
                    skill,
                    team_skill,
                    product: product.clone(),
                    template: None,
                    primary: None,
                    on_dock: None,
                },
            );
            self.rework.insert(id.clone());

            if detail.needs_inspection {
                let quality_team = match plan.map_quality_team(&team) {
                    Some(t) => t,
                    None => {
                        warn!(rework = %id, team = %team, "no quality team for rework inspection");
                        team.clone()
                    }
                };
                let qi_id = InstanceId::inspection(InspectionKind::Quality, id.clone());
                self.instances.insert(
                    qi_id.clone(),
                    TaskInstance {
                        id: qi_id.clone(),
                        task_type: TaskType::QualityInspection,
                        duration_minutes: detail.inspection_duration_minutes,
                        headcount: detail.inspection_headcount,
                        team: quality_team.clone(),
                        skill: None,
                        team_skill: quality_team,
                        product: product.clone(),
                        template: None,
                        primary: Some(id.clone()),
                        on_dock: None,
                    },
                );
                self.quality_links.insert(id, qi_id);
            }
        }
        if inherited > 0 {
            debug!(inherited, "rework inherited team from baseline descendants");
        }
    }

    /// Team, skill, and team-skill for a late-part/rework record: trace
    /// forward to a baseline descendant, else fall back to the declared
    /// base team's first capacity entry.
    fn inherit_team(
        &self,
        plan: &Plan,
        raw_id: &str,
        product: Option<&str>,
        declared_team: &str,
        inherited: &mut usize,
    ) -> (TeamName, Option<String>, TeamName) {
        if let Some(baseline) = trace_to_baseline(plan, raw_id, product) {
            if let Some(instance) = self.instances.get(&baseline) {
                *inherited += 1;
                return (
                    instance.team.clone(),
                    instance.skill.clone(),
                    instance.team_skill.clone(),
                );
            }
        }

        // No traceable lineage: first skill entry under the declared base
        // team, or the base team itself if it carries no skill variants.
        if plan.team_capacity(declared_team).is_none() {
            if let Some(entry) = plan.first_skill_entry(declared_team) {
                warn!(task = raw_id, team = %entry.name, "untraceable record, using first skill entry");
                let skill = entry
                    .name
                    .split_once(" (")
                    .and_then(|(_, rest)| rest.strip_suffix(')'))
                    .map(str::to_string);
                return (declared_team.to_string(), skill, entry.name.clone());
            }
        }
        warn!(task = raw_id, team = declared_team, "untraceable record, using declared team");
        (
            declared_team.to_string(),
            None,
            team_skill_of(declared_team, None),
        )
    }
}

/// BFS forward through the combined late-part + rework edge set until a
/// baseline production instance turns up. The first one encountered wins.
fn trace_to_baseline(plan: &Plan, start: &str, product: Option<&str>) -> Option<InstanceId> {
    let mut visited: BTreeSet<String> = BTreeSet::new();
    let mut queue: VecDeque<(String, Option<String>)> = VecDeque::new();
    queue.push_back((start.to_string(), product.map(str::to_string)));

    while let Some((current, current_product)) = queue.pop_front() {
        if !visited.insert(current.clone()) {
            continue;
        }

        if let Ok(template) = current.parse::<u32>() {
            // A numeric node is a baseline candidate when some product's
            // remaining range covers it.
            if let Some(p) = &current_product {
                if let Some(prod) = plan.products.get(p) {
                    if prod.contains_template(template) && plan.templates.contains_key(&template) {
                        return Some(InstanceId::production(p, template));
                    }
                }
            } else {
                for prod in plan.products.values() {
                    if prod.contains_template(template) && plan.templates.contains_key(&template) {
                        return Some(InstanceId::production(&prod.name, template));
                    }
                }
            }
        }

        for constraint in plan
            .late_part_constraints
            .iter()
            .chain(plan.rework_constraints.iter())
        {
            if constraint.first == current {
                let next_product = constraint.product.clone().or_else(|| current_product.clone());
                queue.push_back((constraint.second.clone(), next_product));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use takt_core::{
        PerturbationConstraint, PerturbationTask, Product, QualityRequirement, Relationship,
        TaskTemplate, Team, TeamKind,
    };

    fn base_plan() -> Plan {
        let mut plan = Plan::default();
        plan.mechanic_teams.insert(
            "Mechanic Team 1".into(),
            Team::new("Mechanic Team 1", TeamKind::Mechanic, 5).with_shifts(&["1st"]),
        );
        plan.mechanic_teams.insert(
            "Mechanic Team 1 (Skill 2)".into(),
            Team::new("Mechanic Team 1 (Skill 2)", TeamKind::Mechanic, 3).with_shifts(&["1st"]),
        );
        plan.quality_teams.insert(
            "Quality Team 1".into(),
            Team::new("Quality Team 1", TeamKind::Quality, 2).with_shifts(&["1st"]),
        );
        plan.templates.insert(
            1,
            TaskTemplate {
                id: 1,
                duration_minutes: 60,
                team: "Mechanic Team 1".into(),
                skill: Some("Skill 2".into()),
                headcount: 2,
            },
        );
        plan.templates.insert(
            2,
            TaskTemplate {
                id: 2,
                duration_minutes: 90,
                team: "Mechanic Team 1".into(),
                skill: None,
                headcount: 1,
            },
        );
        let delivery = NaiveDate::from_ymd_opt(2025, 9, 30)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let mut product = Product::new("Line A", delivery);
        product.remaining = (1, 2);
        plan.products.insert("Line A".into(), product);
        plan
    }

    #[test]
    fn production_instances_cover_remaining_range() {
        let plan = base_plan();
        let set = InstanceSet::build(&plan);

        assert_eq!(set.instances.len(), 2);
        let t1 = set.get(&InstanceId::production("Line A", 1)).unwrap();
        assert_eq!(t1.team_skill, "Mechanic Team 1 (Skill 2)");
        assert_eq!(t1.headcount, 2);
        let t2 = set.get(&InstanceId::production("Line A", 2)).unwrap();
        assert_eq!(t2.team_skill, "Mechanic Team 1");
    }

    #[test]
    fn quality_inspection_per_product_with_mapped_team() {
        let mut plan = base_plan();
        plan.quality_requirements.push(QualityRequirement {
            primary: 1,
            inspection_task: 601,
            headcount: 1,
            duration_minutes: 30,
        });

        let set = InstanceSet::build(&plan);
        let primary = InstanceId::production("Line A", 1);
        let qi = set.quality_links.get(&primary).unwrap();
        assert_eq!(qi.to_string(), "Line A_QI_1");

        let instance = set.get(qi).unwrap();
        assert_eq!(instance.team, "Quality Team 1");
        assert_eq!(instance.primary.as_ref().unwrap(), &primary);
    }

    #[test]
    fn requirement_outside_range_creates_nothing() {
        let mut plan = base_plan();
        plan.quality_requirements.push(QualityRequirement {
            primary: 50,
            inspection_task: 650,
            headcount: 1,
            duration_minutes: 30,
        });
        let set = InstanceSet::build(&plan);
        assert!(set.quality_links.is_empty());
    }

    #[test]
    fn late_part_inherits_team_through_trace() {
        let mut plan = base_plan();
        plan.late_part_constraints.push(PerturbationConstraint {
            first: "LP_1001".into(),
            second: "1".into(),
            relationship: Relationship::FinishBeforeStart,
            on_dock: NaiveDate::from_ymd_opt(2025, 8, 26),
            product: Some("Line A".into()),
        });
        plan.late_part_details.push(PerturbationTask {
            id: "LP_1001".into(),
            duration_minutes: 45,
            team: "Mechanic Team 9".into(),
            headcount: 1,
            needs_inspection: false,
            inspection_duration_minutes: 0,
            inspection_headcount: 0,
        });

        let set = InstanceSet::build(&plan);
        let lp = set.get(&InstanceId::LatePart("LP_1001".into())).unwrap();
        // Traced to Line A task 1, so the declared Mechanic Team 9 is
        // replaced by the baseline's team-skill.
        assert_eq!(lp.team_skill, "Mechanic Team 1 (Skill 2)");
        assert_eq!(lp.on_dock, NaiveDate::from_ymd_opt(2025, 8, 26));
        assert!(set.late_parts.contains(&lp.id));
    }

    #[test]
    fn late_part_chain_traces_through_rework() {
        let mut plan = base_plan();
        // LP -> RW -> baseline 2
        plan.late_part_constraints.push(PerturbationConstraint {
            first: "LP_1".into(),
            second: "RW_1".into(),
            relationship: Relationship::FinishBeforeStart,
            on_dock: NaiveDate::from_ymd_opt(2025, 8, 26),
            product: None,
        });
        plan.rework_constraints.push(PerturbationConstraint {
            first: "RW_1".into(),
            second: "2".into(),
            relationship: Relationship::FinishBeforeStart,
            on_dock: None,
            product: Some("Line A".into()),
        });
        plan.late_part_details.push(PerturbationTask {
            id: "LP_1".into(),
            duration_minutes: 30,
            team: "Mechanic Team 1".into(),
            headcount: 1,
            needs_inspection: false,
            inspection_duration_minutes: 0,
            inspection_headcount: 0,
        });

        let set = InstanceSet::build(&plan);
        let lp = set.get(&InstanceId::LatePart("LP_1".into())).unwrap();
        // Task 2 has no skill, so the inherited unit is the bare team.
        assert_eq!(lp.team_skill, "Mechanic Team 1");
    }

    #[test]
    fn untraceable_late_part_uses_first_skill_entry() {
        let mut plan = base_plan();
        plan.late_part_details.push(PerturbationTask {
            id: "LP_9".into(),
            duration_minutes: 30,
            team: "Mechanic Team 1".into(),
            headcount: 1,
            needs_inspection: false,
            inspection_duration_minutes: 0,
            inspection_headcount: 0,
        });

        let set = InstanceSet::build(&plan);
        let lp = set.get(&InstanceId::LatePart("LP_9".into())).unwrap();
        // "Mechanic Team 1" exists in the capacity table, so the declared
        // team stands as-is.
        assert_eq!(lp.team_skill, "Mechanic Team 1");
    }

    #[test]
    fn rework_with_inspection_spawns_linked_qi() {
        let mut plan = base_plan();
        plan.rework_constraints.push(PerturbationConstraint {
            first: "RW_1".into(),
            second: "2".into(),
            relationship: Relationship::FinishBeforeStart,
            on_dock: None,
            product: Some("Line A".into()),
        });
        plan.rework_details.push(PerturbationTask {
            id: "RW_1".into(),
            duration_minutes: 60,
            team: "Mechanic Team 1".into(),
            headcount: 1,
            needs_inspection: true,
            inspection_duration_minutes: 20,
            inspection_headcount: 1,
        });

        let set = InstanceSet::build(&plan);
        let rw_id = InstanceId::Rework("RW_1".into());
        let qi_id = set.quality_links.get(&rw_id).unwrap();
        assert_eq!(qi_id.to_string(), "QI_RW_1");

        let qi = set.get(qi_id).unwrap();
        assert_eq!(qi.team, "Quality Team 1");
        assert_eq!(qi.duration_minutes, 20);
        assert_eq!(qi.primary.as_ref().unwrap(), &rw_id);
    }
}
