//! Dependency resolution: from template precedences and perturbation rows
//! to the effective instance-level constraint list.
//!
//! Composition order matters: template precedences (with inspection chains
//! spliced in) come first, then late-part and rework edges, then whatever
//! primary->inspection links are not already implied. The composed list is
//! deduplicated by (first, second, relationship).

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use takt_core::{InstanceId, Plan, ProductName, Relationship};

use crate::{instances::InstanceSet, SolveError};

/// One effective constraint between two instances.
#[derive(Clone, Debug, PartialEq)]
pub struct Constraint {
    pub first: InstanceId,
    pub second: InstanceId,
    pub relationship: Relationship,
    pub product: Option<ProductName>,
}

/// Predecessor/successor lookup over a resolved constraint list. Holds
/// indexes into the list so the constraints themselves stay in one place.
#[derive(Clone, Debug, Default)]
pub struct ConstraintIndex {
    pub by_first: BTreeMap<InstanceId, Vec<usize>>,
    pub by_second: BTreeMap<InstanceId, Vec<usize>>,
}

impl ConstraintIndex {
    pub fn build(constraints: &[Constraint]) -> Self {
        let mut index = ConstraintIndex::default();
        for (i, c) in constraints.iter().enumerate() {
            index.by_first.entry(c.first.clone()).or_default().push(i);
            index.by_second.entry(c.second.clone()).or_default().push(i);
        }
        index
    }

    pub fn successors_of<'a>(
        &'a self,
        constraints: &'a [Constraint],
        id: &InstanceId,
    ) -> impl Iterator<Item = &'a Constraint> {
        self.by_first
            .get(id)
            .into_iter()
            .flatten()
            .map(move |&i| &constraints[i])
    }

    pub fn predecessors_of<'a>(
        &'a self,
        constraints: &'a [Constraint],
        id: &InstanceId,
    ) -> impl Iterator<Item = &'a Constraint> {
        self.by_second
            .get(id)
            .into_iter()
            .flatten()
            .map(move |&i| &constraints[i])
    }
}

/// Build the effective constraint list for an instance set.
pub fn resolve_constraints(plan: &Plan, set: &InstanceSet) -> Vec<Constraint> {
    let mut out: Vec<Constraint> = Vec::new();

    // 1. Template precedences, expanded per product with inspection chains.
    for tc in &plan.template_constraints {
        for product in plan.products.values() {
            let first = InstanceId::production(&product.name, tc.first);
            let second = InstanceId::production(&product.name, tc.second);
            if !set.instances.contains_key(&first) || !set.instances.contains_key(&second) {
                continue;
            }
            push_chain(
                &mut out,
                set,
                first,
                second,
                tc.relationship,
                Some(product.name.clone()),
            );
        }
    }

    // 2. Late part constraints.
    for pc in &plan.late_part_constraints {
        let first = resolve_endpoint(&pc.first, pc.product.as_deref(), plan, set);
        let second = resolve_endpoint(&pc.second, pc.product.as_deref(), plan, set);
        if let (Some(first), Some(second)) = (first, second) {
            out.push(Constraint {
                first,
                second,
                relationship: pc.relationship,
                product: pc.product.clone(),
            });
        }
    }

    // 3. Rework constraints, with inspection chains off the rework source.
    for pc in &plan.rework_constraints {
        let first = resolve_endpoint(&pc.first, pc.product.as_deref(), plan, set);
        let second = resolve_endpoint(&pc.second, pc.product.as_deref(), plan, set);
        if let (Some(first), Some(second)) = (first, second) {
            push_chain(&mut out, set, first, second, pc.relationship, pc.product.clone());
        }
    }

    // 4. Residual inspection links not implied by any chain above.
    let existing: BTreeSet<(InstanceId, InstanceId)> = out
        .iter()
        .map(|c| (c.first.clone(), c.second.clone()))
        .collect();

    for (primary, qi) in &set.quality_links {
        if !existing.contains(&(primary.clone(), qi.clone())) {
            let product = set.get(primary).and_then(|t| t.product.clone());
            out.push(Constraint {
                first: primary.clone(),
                second: qi.clone(),
                relationship: Relationship::FinishEqualsStart,
                product: product.clone(),
            });
            if let Some(cc) = set.customer_links.get(primary) {
                out.push(Constraint {
                    first: qi.clone(),
                    second: cc.clone(),
                    relationship: Relationship::FinishEqualsStart,
                    product,
                });
            }
        }
    }
    for (primary, cc) in &set.customer_links {
        if set.quality_links.contains_key(primary) {
            continue;
        }
        if !existing.contains(&(primary.clone(), cc.clone())) {
            out.push(Constraint {
                first: primary.clone(),
                second: cc.clone(),
                relationship: Relationship::FinishEqualsStart,
                product: set.get(primary).and_then(|t| t.product.clone()),
            });
        }
    }

    // Chain injection happily duplicates edges; collapse them.
    let mut seen: BTreeSet<(InstanceId, InstanceId, Relationship)> = BTreeSet::new();
    out.retain(|c| seen.insert((c.first.clone(), c.second.clone(), c.relationship)));

    debug!(constraints = out.len(), "resolved dependency list");
    out
}

/// Append `first -> second` routed through whatever inspections `first`
/// carries. The inspections join with zero-gap links and the original
/// relationship moves to the tail of the chain.
fn push_chain(
    out: &mut Vec<Constraint>,
    set: &InstanceSet,
    first: InstanceId,
    second: InstanceId,
    relationship: Relationship,
    product: Option<ProductName>,
) {
    let qi = set.quality_links.get(&first).cloned();
    let cc = set.customer_links.get(&first).cloned();

    let mut hops: Vec<InstanceId> = vec![first];
    hops.extend(qi);
    hops.extend(cc);

    for pair in hops.windows(2) {
        out.push(Constraint {
            first: pair[0].clone(),
            second: pair[1].clone(),
            relationship: Relationship::FinishEqualsStart,
            product: product.clone(),
        });
    }
    out.push(Constraint {
        first: hops.last().expect("chain has a head").clone(),
        second,
        relationship,
        product,
    });
}

/// Resolve a raw endpoint cell to an instance id. Bare numbers are
/// production tasks (scoped to the row's product when given, else the
/// first product whose range covers them); everything else is a late-part
/// or rework id, possibly missing its prefix.
fn resolve_endpoint(
    raw: &str,
    product: Option<&str>,
    plan: &Plan,
    set: &InstanceSet,
) -> Option<InstanceId> {
    let raw = raw.trim();

    if let Ok(template) = raw.parse::<u32>() {
        if let Some(p) = product {
            let id = InstanceId::production(p, template);
            if set.instances.contains_key(&id) {
                return Some(id);
            }
        }
        for p in plan.products.keys() {
            let id = InstanceId::production(p, template);
            if set.instances.contains_key(&id) {
                return Some(id);
            }
        }
        return None;
    }

    let candidates = [
        InstanceId::LatePart(raw.to_string()),
        InstanceId::Rework(raw.to_string()),
        InstanceId::LatePart(format!("LP_{}", raw)),
        InstanceId::Rework(format!("RW_{}", raw)),
    ];
    candidates
        .into_iter()
        .find(|id| set.instances.contains_key(id))
}

/// Pre-pass sanity check: the finish-to-start subgraph must be acyclic and
/// every constraint endpoint must name a known instance.
pub fn validate_dag(set: &InstanceSet, constraints: &[Constraint]) -> Result<(), SolveError> {
    for c in constraints {
        for endpoint in [&c.first, &c.second] {
            if !set.instances.contains_key(endpoint) {
                return Err(SolveError::UnknownInstance(endpoint.to_string()));
            }
        }
    }

    let mut graph: BTreeMap<&InstanceId, Vec<&InstanceId>> = BTreeMap::new();
    for c in constraints {
        if c.relationship.orders_tasks() {
            graph.entry(&c.first).or_default().push(&c.second);
        }
    }

    // Iterative three-color DFS; the stack carries the path for the error
    // message when a back edge shows up.
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }
    let mut color: BTreeMap<&InstanceId, Color> = BTreeMap::new();
    for &node in graph.keys() {
        color.entry(node).or_insert(Color::White);
        for &succ in &graph[node] {
            color.entry(succ).or_insert(Color::White);
        }
    }

    let nodes: Vec<&InstanceId> = color.keys().copied().collect();
    for start in nodes {
        if color[start] != Color::White {
            continue;
        }
        // (node, next-child-index) frames.
        let mut stack: Vec<(&InstanceId, usize)> = vec![(start, 0)];
        color.insert(start, Color::Gray);

        while let Some(frame) = stack.last_mut() {
            let node = frame.0;
            let next = frame.1;
            let children = graph.get(node).map_or(&[][..], Vec::as_slice);
            if next < children.len() {
                frame.1 += 1;
                let child = children[next];
                match color[child] {
                    Color::White => {
                        color.insert(child, Color::Gray);
                        stack.push((child, 0));
                    }
                    Color::Gray => {
                        let mut cycle: Vec<String> =
                            stack.iter().map(|(n, _)| n.to_string()).collect();
                        cycle.push(child.to_string());
                        return Err(SolveError::Cycle(cycle.join(" -> ")));
                    }
                    Color::Black => {}
                }
            } else {
                color.insert(node, Color::Black);
                stack.pop();
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use takt_core::{
        CustomerRequirement, PerturbationConstraint, PerturbationTask, Product,
        QualityRequirement, TaskTemplate, Team, TeamKind, TemplateConstraint,
    };

    fn plan_with_chain() -> Plan {
        let mut plan = Plan::default();
        plan.mechanic_teams.insert(
            "Mechanic Team 1".into(),
            Team::new("Mechanic Team 1", TeamKind::Mechanic, 5).with_shifts(&["1st"]),
        );
        plan.quality_teams.insert(
            "Quality Team 1".into(),
            Team::new("Quality Team 1", TeamKind::Quality, 2).with_shifts(&["1st"]),
        );
        plan.customer_teams.insert(
            "Customer Team 1".into(),
            Team::new("Customer Team 1", TeamKind::Customer, 2).with_shifts(&["1st"]),
        );
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
        let delivery = NaiveDate::from_ymd_opt(2025, 9, 30)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let mut product = Product::new("A", delivery);
        product.remaining = (1, 2);
        plan.products.insert("A".into(), product);
        plan
    }

    fn find<'a>(
        constraints: &'a [Constraint],
        first: &str,
        second: &str,
    ) -> Option<&'a Constraint> {
        constraints
            .iter()
            .find(|c| c.first.to_string() == first && c.second.to_string() == second)
    }

    #[test]
    fn direct_edge_without_inspections() {
        let plan = plan_with_chain();
        let set = InstanceSet::build(&plan);
        let constraints = resolve_constraints(&plan, &set);

        assert_eq!(constraints.len(), 1);
        let c = find(&constraints, "A_1", "A_2").unwrap();
        assert_eq!(c.relationship, Relationship::FinishBeforeStart);
    }

    #[test]
    fn quality_chain_splices_between_tasks() {
        let mut plan = plan_with_chain();
        plan.quality_requirements.push(QualityRequirement {
            primary: 1,
            inspection_task: 601,
            headcount: 1,
            duration_minutes: 30,
        });

        let set = InstanceSet::build(&plan);
        let constraints = resolve_constraints(&plan, &set);

        let a = find(&constraints, "A_1", "A_QI_1").unwrap();
        assert_eq!(a.relationship, Relationship::FinishEqualsStart);
        let b = find(&constraints, "A_QI_1", "A_2").unwrap();
        assert_eq!(b.relationship, Relationship::FinishBeforeStart);
        // The direct edge is replaced by the chain.
        assert!(find(&constraints, "A_1", "A_2").is_none());
    }

    #[test]
    fn full_chain_with_quality_and_customer() {
        let mut plan = plan_with_chain();
        plan.quality_requirements.push(QualityRequirement {
            primary: 1,
            inspection_task: 601,
            headcount: 1,
            duration_minutes: 30,
        });
        plan.customer_requirements.push(CustomerRequirement {
            primary: 1,
            label: "CC_701".into(),
            headcount: 1,
            duration_minutes: 45,
        });

        let set = InstanceSet::build(&plan);
        let constraints = resolve_constraints(&plan, &set);

        assert!(find(&constraints, "A_1", "A_QI_1").is_some());
        assert!(find(&constraints, "A_QI_1", "A_CC_1").is_some());
        let tail = find(&constraints, "A_CC_1", "A_2").unwrap();
        assert_eq!(tail.relationship, Relationship::FinishBeforeStart);
    }

    #[test]
    fn residual_edge_for_terminal_primary() {
        // Inspection on task 2, which has no successors: only the residual
        // pass emits its link.
        let mut plan = plan_with_chain();
        plan.quality_requirements.push(QualityRequirement {
            primary: 2,
            inspection_task: 602,
            headcount: 1,
            duration_minutes: 30,
        });

        let set = InstanceSet::build(&plan);
        let constraints = resolve_constraints(&plan, &set);

        let c = find(&constraints, "A_2", "A_QI_2").unwrap();
        assert_eq!(c.relationship, Relationship::FinishEqualsStart);
    }

    #[test]
    fn duplicate_edges_are_collapsed() {
        let mut plan = plan_with_chain();
        plan.template_constraints.push(TemplateConstraint {
            first: 1,
            second: 2,
            relationship: Relationship::FinishBeforeStart,
        });

        let set = InstanceSet::build(&plan);
        let constraints = resolve_constraints(&plan, &set);
        assert_eq!(constraints.len(), 1);
    }

    #[test]
    fn late_part_endpoints_resolve_with_and_without_prefix() {
        let mut plan = plan_with_chain();
        plan.late_part_constraints.push(PerturbationConstraint {
            first: "LP_1001".into(),
            second: "2".into(),
            relationship: Relationship::FinishBeforeStart,
            on_dock: NaiveDate::from_ymd_opt(2025, 8, 26),
            product: Some("A".into()),
        });
        plan.late_part_details.push(PerturbationTask {
            id: "LP_1001".into(),
            duration_minutes: 45,
            team: "Mechanic Team 1".into(),
            headcount: 1,
            needs_inspection: false,
            inspection_duration_minutes: 0,
            inspection_headcount: 0,
        });

        let set = InstanceSet::build(&plan);
        let constraints = resolve_constraints(&plan, &set);
        assert!(find(&constraints, "LP_1001", "A_2").is_some());
    }

    #[test]
    fn validate_accepts_acyclic_graph() {
        let plan = plan_with_chain();
        let set = InstanceSet::build(&plan);
        let constraints = resolve_constraints(&plan, &set);
        assert!(validate_dag(&set, &constraints).is_ok());
    }

    #[test]
    fn validate_rejects_cycle() {
        let mut plan = plan_with_chain();
        plan.template_constraints.push(TemplateConstraint {
            first: 2,
            second: 1,
            relationship: Relationship::FinishBeforeStart,
        });

        let set = InstanceSet::build(&plan);
        let constraints = resolve_constraints(&plan, &set);
        let err = validate_dag(&set, &constraints).unwrap_err();
        assert!(matches!(err, SolveError::Cycle(_)));
    }

    #[test]
    fn start_anchored_edges_do_not_create_cycles() {
        // A pair of opposing Start <= Start edges is legal: only the
        // finish-to-start forms are directed for cycle checking.
        let mut plan = plan_with_chain();
        plan.template_constraints.clear();
        plan.template_constraints.push(TemplateConstraint {
            first: 1,
            second: 2,
            relationship: Relationship::StartBeforeStart,
        });
        plan.template_constraints.push(TemplateConstraint {
            first: 2,
            second: 1,
            relationship: Relationship::StartBeforeStart,
        });

        let set = InstanceSet::build(&plan);
        let constraints = resolve_constraints(&plan, &set);
        assert!(validate_dag(&set, &constraints).is_ok());
    }
}
