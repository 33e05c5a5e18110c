//! Route assignment resolution.
//!
//! Candidates are ranked by an explicit comparator:
//! 1. number of populated predicates (desc)
//! 2. assignment priority (desc)
//! 3. revision number (desc)
//! 4. assignment id (asc, diagnostics only)
//!
//! Two leaders equal on 1-3 are reported as ambiguous instead of letting the id
//! pick silently.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orderflow_core::{CustomerId, ItemId, SiteId, WorkflowError, WorkflowResult};

use crate::assignment::{RouteAssignmentId, RouteTemplateAssignment};
use crate::catalog::RouteCatalog;
use crate::template::RouteTemplate;

/// Order-line attributes a route is resolved for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteQuery {
    pub customer_id: CustomerId,
    pub site_id: SiteId,
    pub item_id: ItemId,
    #[serde(default)]
    pub item_type: Option<String>,
    #[serde(default)]
    pub order_priority: Option<i32>,
    #[serde(default)]
    pub ship_via: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteMatch {
    pub assignment: RouteTemplateAssignment,
    pub template: RouteTemplate,
    pub tier: String,
}

/// Outcome of a resolution. Failures are data here; callers that need an
/// error use [`Resolution::into_result`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Resolution {
    Matched(RouteMatch),
    NoMatch {
        diagnostic: String,
    },
    Ambiguous {
        tier: String,
        priority: i32,
        revision_no: u32,
        assignment_ids: Vec<RouteAssignmentId>,
    },
}

impl Resolution {
    pub fn tier(&self) -> Option<&str> {
        match self {
            Resolution::Matched(m) => Some(&m.tier),
            Resolution::Ambiguous { tier, .. } => Some(tier),
            Resolution::NoMatch { .. } => None,
        }
    }

    pub fn into_result(self) -> WorkflowResult<RouteMatch> {
        match self {
            Resolution::Matched(m) => Ok(m),
            Resolution::NoMatch { diagnostic } => Err(WorkflowError::NoMatch { diagnostic }),
            Resolution::Ambiguous {
                tier,
                assignment_ids,
                ..
            } => Err(WorkflowError::AmbiguousMatch {
                tier,
                assignment_ids: assignment_ids.into_iter().map(|id| id.0).collect(),
                line_no: None,
            }),
        }
    }
}

/// Why a single assignment was or was not a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CandidateOutcome {
    Matched,
    Inactive,
    OutsideWindow,
    PredicateFailed { predicate: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateEvaluation {
    pub assignment_id: RouteAssignmentId,
    pub tier: String,
    pub priority: i32,
    pub revision_no: u32,
    pub outcome: CandidateOutcome,
}

/// Read-only dry run of a resolution with per-candidate explanations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteRuleSimulation {
    pub query: RouteQuery,
    pub evaluated_at: DateTime<Utc>,
    pub resolution: Resolution,
    pub matched_tier: Option<String>,
    pub candidates: Vec<CandidateEvaluation>,
}

fn evaluate(
    assignment: &RouteTemplateAssignment,
    query: &RouteQuery,
    now: DateTime<Utc>,
) -> CandidateOutcome {
    if !assignment.is_active {
        return CandidateOutcome::Inactive;
    }
    if !assignment.is_effective_at(now) {
        return CandidateOutcome::OutsideWindow;
    }
    match assignment.first_failing_predicate(query) {
        Some(p) => CandidateOutcome::PredicateFailed {
            predicate: p.tag().to_string(),
        },
        None => CandidateOutcome::Matched,
    }
}

fn rank_order(a: &RouteTemplateAssignment, b: &RouteTemplateAssignment) -> Ordering {
    b.specificity()
        .cmp(&a.specificity())
        .then_with(|| b.priority.cmp(&a.priority))
        .then_with(|| b.revision_no.cmp(&a.revision_no))
        .then_with(|| a.id.cmp(&b.id))
}

fn same_rank(a: &RouteTemplateAssignment, b: &RouteTemplateAssignment) -> bool {
    a.specificity() == b.specificity()
        && a.priority == b.priority
        && a.revision_no == b.revision_no
}

/// Pick the route assignment for `query` at `now`.
///
/// Deterministic: the result does not depend on catalog iteration order.
pub fn resolve(catalog: &RouteCatalog, query: &RouteQuery, now: DateTime<Utc>) -> Resolution {
    let mut candidates: Vec<&RouteTemplateAssignment> = catalog
        .assignments()
        .filter(|a| evaluate(a, query, now) == CandidateOutcome::Matched)
        .collect();

    if candidates.is_empty() {
        return Resolution::NoMatch {
            diagnostic: format!(
                "no active route assignment matches customer {} site {} item {} ({} evaluated)",
                query.customer_id,
                query.site_id,
                query.item_id,
                catalog.assignment_count()
            ),
        };
    }

    candidates.sort_by(|a, b| rank_order(a, b));
    let best = candidates[0];

    let tied: Vec<RouteAssignmentId> = candidates
        .iter()
        .take_while(|c| same_rank(best, c))
        .map(|c| c.id)
        .collect();

    if tied.len() > 1 {
        return Resolution::Ambiguous {
            tier: best.tier_label(),
            priority: best.priority,
            revision_no: best.revision_no,
            assignment_ids: tied,
        };
    }

    match catalog.template(best.route_template_id) {
        Some(template) => Resolution::Matched(RouteMatch {
            assignment: best.clone(),
            template: template.clone(),
            tier: best.tier_label(),
        }),
        None => Resolution::NoMatch {
            diagnostic: format!(
                "assignment {} references missing route template {}",
                best.id, best.route_template_id
            ),
        },
    }
}

/// Same path as [`resolve`], plus an evaluation of every assignment.
pub fn simulate(catalog: &RouteCatalog, query: &RouteQuery, now: DateTime<Utc>) -> RouteRuleSimulation {
    let candidates = catalog
        .assignments()
        .map(|a| CandidateEvaluation {
            assignment_id: a.id,
            tier: a.tier_label(),
            priority: a.priority,
            revision_no: a.revision_no,
            outcome: evaluate(a, query, now),
        })
        .collect();

    let resolution = resolve(catalog, query, now);
    RouteRuleSimulation {
        query: query.clone(),
        evaluated_at: now,
        matched_tier: resolution.tier().map(str::to_string),
        resolution,
        candidates,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::ScopePredicate;
    use crate::template::{CaptureRequirements, RouteTemplateId, RouteTemplateStep};
    use chrono::Duration;
    use proptest::prelude::*;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn query() -> RouteQuery {
        RouteQuery {
            customer_id: CustomerId(10),
            site_id: SiteId(20),
            item_id: ItemId(30),
            item_type: Some("Assembly".to_string()),
            order_priority: Some(2),
            ship_via: None,
        }
    }

    fn template(id: u64) -> RouteTemplate {
        RouteTemplate {
            id: RouteTemplateId(id),
            code: format!("RT-{id}"),
            name: format!("Route {id}"),
            steps: vec![RouteTemplateStep {
                sequence: 10,
                name: "build".to_string(),
                work_center: "WC".to_string(),
                captures: CaptureRequirements::default(),
            }],
        }
    }

    fn assignment(id: u64, predicates: Vec<ScopePredicate>, priority: i32, revision_no: u32) -> RouteTemplateAssignment {
        RouteTemplateAssignment {
            id: RouteAssignmentId(id),
            predicates,
            priority,
            revision_no,
            is_active: true,
            effective_from: None,
            effective_to: None,
            route_template_id: RouteTemplateId(id),
        }
    }

    fn catalog(assignments: Vec<RouteTemplateAssignment>) -> RouteCatalog {
        let mut catalog = RouteCatalog::new();
        for a in assignments {
            catalog.upsert_template(template(a.id.0)).unwrap();
            catalog.upsert_assignment(a).unwrap();
        }
        catalog
    }

    fn matched_id(resolution: &Resolution) -> u64 {
        match resolution {
            Resolution::Matched(m) => m.assignment.id.0,
            other => panic!("expected a match, got {other:?}"),
        }
    }

    #[test]
    fn more_specific_assignment_wins_over_priority() {
        let catalog = catalog(vec![
            assignment(1, vec![ScopePredicate::Customer(CustomerId(10))], 100, 1),
            assignment(
                2,
                vec![
                    ScopePredicate::Customer(CustomerId(10)),
                    ScopePredicate::Site(SiteId(20)),
                ],
                0,
                1,
            ),
        ]);

        let resolution = resolve(&catalog, &query(), test_time());
        assert_eq!(matched_id(&resolution), 2);
        assert_eq!(resolution.tier(), Some("customer+site"));
    }

    #[test]
    fn priority_then_revision_break_tier_ties() {
        let catalog = catalog(vec![
            assignment(1, vec![ScopePredicate::Site(SiteId(20))], 1, 9),
            assignment(2, vec![ScopePredicate::Item(ItemId(30))], 5, 1),
            assignment(3, vec![ScopePredicate::Item(ItemId(30))], 5, 2),
        ]);
        assert_eq!(matched_id(&resolve(&catalog, &query(), test_time())), 3);
    }

    #[test]
    fn equal_tier_priority_and_revision_is_ambiguous() {
        let catalog = catalog(vec![
            assignment(7, vec![ScopePredicate::Site(SiteId(20))], 3, 1),
            assignment(4, vec![ScopePredicate::Customer(CustomerId(10))], 3, 1),
            assignment(9, vec![], 50, 1),
        ]);

        let resolution = resolve(&catalog, &query(), test_time());

        assert_eq!(
            resolution,
            Resolution::Ambiguous {
                tier: "site".to_string(),
                priority: 3,
                revision_no: 1,
                assignment_ids: vec![RouteAssignmentId(4), RouteAssignmentId(7)],
            }
        );
        let err = resolution.into_result().unwrap_err();
        assert_eq!(err.code(), "ambiguous_match");
    }

    #[test]
    fn inactive_and_expired_rows_are_skipped() {
        let now = test_time();
        let mut inactive = assignment(1, vec![ScopePredicate::Item(ItemId(30))], 9, 1);
        inactive.is_active = false;
        let mut expired = assignment(2, vec![ScopePredicate::Item(ItemId(30))], 9, 1);
        expired.effective_to = Some(now - Duration::days(1));
        let fallback = assignment(3, vec![], 0, 1);

        let catalog = catalog(vec![inactive, expired, fallback]);
        let resolution = resolve(&catalog, &query(), now);
        assert_eq!(matched_id(&resolution), 3);
        assert_eq!(resolution.tier(), Some("default"));
    }

    #[test]
    fn nothing_matching_is_no_match() {
        let catalog = catalog(vec![assignment(
            1,
            vec![ScopePredicate::Customer(CustomerId(99))],
            0,
            1,
        )]);
        let err = resolve(&catalog, &query(), test_time()).into_result().unwrap_err();
        assert_eq!(err.code(), "no_match");
    }

    #[test]
    fn winner_with_missing_template_is_no_match() {
        let mut catalog = RouteCatalog::new();
        let mut a = assignment(1, vec![], 0, 1);
        a.route_template_id = RouteTemplateId(404);
        catalog.upsert_assignment(a).unwrap();

        match resolve(&catalog, &query(), test_time()) {
            Resolution::NoMatch { diagnostic } => assert!(diagnostic.contains("404")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn simulation_explains_every_candidate() {
        let mut inactive = assignment(3, vec![], 0, 1);
        inactive.is_active = false;
        let catalog = catalog(vec![
            assignment(1, vec![ScopePredicate::Customer(CustomerId(10))], 0, 1),
            assignment(2, vec![ScopePredicate::ShipVia("Air".to_string())], 0, 1),
            inactive,
        ]);

        let sim = simulate(&catalog, &query(), test_time());

        assert_eq!(sim.matched_tier.as_deref(), Some("customer"));
        assert_eq!(sim.candidates.len(), 3);
        assert_eq!(sim.candidates[0].outcome, CandidateOutcome::Matched);
        assert_eq!(
            sim.candidates[1].outcome,
            CandidateOutcome::PredicateFailed {
                predicate: "ship_via".to_string()
            }
        );
        assert_eq!(sim.candidates[2].outcome, CandidateOutcome::Inactive);
        assert_eq!(sim.resolution, resolve(&catalog, &query(), sim.evaluated_at));
    }

    fn predicates_from_mask(mask: u8) -> Vec<ScopePredicate> {
        let mut preds = Vec::new();
        if mask & 1 != 0 {
            preds.push(ScopePredicate::Customer(CustomerId(10)));
        }
        if mask & 2 != 0 {
            preds.push(ScopePredicate::Site(SiteId(20)));
        }
        if mask & 4 != 0 {
            preds.push(ScopePredicate::Item(ItemId(30)));
        }
        if mask & 8 != 0 {
            preds.push(ScopePredicate::Customer(CustomerId(11)));
            preds.retain(|p| *p != ScopePredicate::Customer(CustomerId(10)));
        }
        preds
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: the resolution does not depend on the order rows were loaded in.
        #[test]
        fn resolution_is_independent_of_row_order(
            (rows, shuffled) in prop::collection::vec((0u8..16, 0i32..3, 1u32..3), 1..10)
                .prop_flat_map(|rows| {
                    let indices: Vec<usize> = (0..rows.len()).collect();
                    (Just(rows), Just(indices).prop_shuffle())
                })
        ) {
            let build = |order: &[usize]| {
                let mut catalog = RouteCatalog::new();
                for &i in order {
                    let (mask, priority, revision) = rows[i];
                    let id = i as u64 + 1;
                    catalog.upsert_template(template(id)).unwrap();
                    catalog
                        .upsert_assignment(assignment(id, predicates_from_mask(mask), priority, revision))
                        .unwrap();
                }
                catalog
            };

            let in_order: Vec<usize> = (0..rows.len()).collect();
            let now = test_time();
            let a = resolve(&build(&in_order), &query(), now);
            let b = resolve(&build(&shuffled), &query(), now);
            prop_assert_eq!(a, b);
        }
    }
}
