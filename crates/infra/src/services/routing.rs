//! Route catalog setup and resolution.
//!
//! Resolution reads an immutable snapshot of the catalog. Any setup write
//! drops the snapshot before it returns.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use orderflow_core::WorkflowResult;
use orderflow_orders::{LineRouteOutcome, Order, RouteInstance};
use orderflow_routing::{
    Resolution, RouteCatalog, RouteQuery, RouteRuleSimulation, RouteTemplate,
    RouteTemplateAssignment, resolve, simulate,
};

use super::snapshot::SnapshotCache;

#[derive(Debug, Default)]
pub struct RouteCatalogService {
    catalog: RwLock<RouteCatalog>,
    snapshot: SnapshotCache<RouteCatalog>,
}

impl RouteCatalogService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<RouteCatalog> {
        self.snapshot.get_or_build(|| {
            self.catalog
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        })
    }

    pub fn is_cached(&self) -> bool {
        self.snapshot.is_current()
    }

    fn invalidate(&self) {
        self.snapshot.invalidate();
    }

    pub fn upsert_template(&self, template: RouteTemplate) -> WorkflowResult<Option<RouteTemplate>> {
        let id = template.id;
        let previous = {
            let mut catalog = self.catalog.write().unwrap_or_else(PoisonError::into_inner);
            catalog.upsert_template(template)?
        };
        self.invalidate();
        info!(template_id = %id, replaced = previous.is_some(), "route template saved");
        Ok(previous)
    }

    pub fn upsert_assignment(
        &self,
        assignment: RouteTemplateAssignment,
    ) -> WorkflowResult<Option<RouteTemplateAssignment>> {
        let id = assignment.id;
        let previous = {
            let mut catalog = self.catalog.write().unwrap_or_else(PoisonError::into_inner);
            catalog.upsert_assignment(assignment)?
        };
        self.invalidate();
        info!(assignment_id = id.0, replaced = previous.is_some(), "route assignment saved");
        Ok(previous)
    }

    pub fn resolve(&self, query: &RouteQuery, now: DateTime<Utc>) -> Resolution {
        resolve(&self.snapshot(), query, now)
    }

    /// Read-only dry run with per-candidate diagnostics.
    pub fn simulate(&self, query: &RouteQuery, now: DateTime<Utc>) -> RouteRuleSimulation {
        simulate(&self.snapshot(), query, now)
    }

    /// Resolve every line of `order` that has no route instance yet.
    pub fn resolve_unrouted_lines(&self, order: &Order, now: DateTime<Utc>) -> Vec<LineRouteOutcome> {
        let catalog = self.snapshot();
        order
            .unrouted_lines()
            .map(|line| {
                let query = RouteQuery {
                    customer_id: order.customer_id(),
                    site_id: order.site_id(),
                    item_id: line.item_id,
                    item_type: line.item_type.clone(),
                    order_priority: order.order_priority(),
                    ship_via: order.ship_via().map(String::from),
                };
                let resolution = resolve(&catalog, &query, now);
                debug!(line_no = line.line_no, tier = ?resolution.tier(), "route resolved");
                LineRouteOutcome {
                    line_no: line.line_no,
                    outcome: resolution.into_result().map(RouteInstance::from),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use orderflow_core::{CustomerId, ItemId, SiteId};
    use orderflow_routing::{
        CaptureRequirements, RouteAssignmentId, RouteTemplateId, RouteTemplateStep, ScopePredicate,
    };

    use super::*;

    fn template(id: u64) -> RouteTemplate {
        RouteTemplate {
            id: RouteTemplateId(id),
            code: format!("T{id}"),
            name: format!("Template {id}"),
            steps: vec![RouteTemplateStep {
                sequence: 10,
                name: "cut".to_string(),
                work_center: "SAW".to_string(),
                captures: CaptureRequirements::default(),
            }],
        }
    }

    fn assignment(id: u64, template_id: u64, predicates: Vec<ScopePredicate>) -> RouteTemplateAssignment {
        RouteTemplateAssignment {
            id: RouteAssignmentId(id),
            predicates,
            priority: 0,
            revision_no: 1,
            is_active: true,
            effective_from: None,
            effective_to: None,
            route_template_id: RouteTemplateId(template_id),
        }
    }

    fn query() -> RouteQuery {
        RouteQuery {
            customer_id: CustomerId(1),
            site_id: SiteId(2),
            item_id: ItemId(3),
            item_type: None,
            order_priority: None,
            ship_via: None,
        }
    }

    #[test]
    fn setup_write_is_visible_to_next_resolution() {
        let svc = RouteCatalogService::new();
        svc.upsert_template(template(1)).unwrap();
        svc.upsert_template(template(2)).unwrap();
        svc.upsert_assignment(assignment(1, 1, vec![])).unwrap();

        let first = svc.resolve(&query(), Utc::now()).into_result().unwrap();
        assert_eq!(first.template.id, RouteTemplateId(1));
        assert!(svc.is_cached());

        svc.upsert_assignment(assignment(2, 2, vec![ScopePredicate::Customer(CustomerId(1))]))
            .unwrap();
        assert!(!svc.is_cached());

        let second = svc.resolve(&query(), Utc::now()).into_result().unwrap();
        assert_eq!(second.template.id, RouteTemplateId(2));
    }

    #[test]
    fn concurrent_reads_never_keep_a_snapshot_older_than_the_last_write() {
        let svc = RouteCatalogService::new();
        svc.upsert_template(template(1)).unwrap();

        for round in 0..20u64 {
            let done = AtomicBool::new(false);
            std::thread::scope(|scope| {
                for _ in 0..3 {
                    scope.spawn(|| {
                        while !done.load(Ordering::Acquire) {
                            svc.snapshot();
                        }
                    });
                }
                for n in 1..=50 {
                    svc.upsert_assignment(assignment(round * 100 + n, 1, vec![])).unwrap();
                }
                done.store(true, Ordering::Release);
            });

            let expected = ((round + 1) * 50) as usize;
            assert_eq!(svc.snapshot().assignment_count(), expected, "round {round}");
        }
    }

    #[test]
    fn invalid_template_is_rejected_and_cache_kept() {
        let svc = RouteCatalogService::new();
        svc.upsert_template(template(1)).unwrap();
        svc.snapshot();

        let mut bad = template(2);
        bad.steps.clear();
        assert!(svc.upsert_template(bad).is_err());
        assert!(svc.is_cached());
    }
}
