use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orderflow_core::{CustomerId, ItemId, SiteId, WorkflowError, WorkflowResult};

use crate::resolver::RouteQuery;
use crate::template::RouteTemplateId;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteAssignmentId(pub u64);

impl core::fmt::Display for RouteAssignmentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Inclusive order-priority bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityRange {
    pub min: i32,
    pub max: i32,
}

impl PriorityRange {
    pub fn contains(&self, priority: i32) -> bool {
        self.min <= priority && priority <= self.max
    }
}

/// One populated scope condition of an assignment.
///
/// Variant order is the canonical order used in tier labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ScopePredicate {
    Customer(CustomerId),
    Site(SiteId),
    Item(ItemId),
    ItemType(String),
    Priority(PriorityRange),
    ShipVia(String),
}

impl ScopePredicate {
    pub fn tag(&self) -> &'static str {
        match self {
            ScopePredicate::Customer(_) => "customer",
            ScopePredicate::Site(_) => "site",
            ScopePredicate::Item(_) => "item",
            ScopePredicate::ItemType(_) => "item_type",
            ScopePredicate::Priority(_) => "priority",
            ScopePredicate::ShipVia(_) => "ship_via",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            ScopePredicate::Customer(_) => 0,
            ScopePredicate::Site(_) => 1,
            ScopePredicate::Item(_) => 2,
            ScopePredicate::ItemType(_) => 3,
            ScopePredicate::Priority(_) => 4,
            ScopePredicate::ShipVia(_) => 5,
        }
    }

    /// A missing query value never satisfies a populated predicate.
    pub fn matches(&self, query: &RouteQuery) -> bool {
        match self {
            ScopePredicate::Customer(c) => query.customer_id == *c,
            ScopePredicate::Site(s) => query.site_id == *s,
            ScopePredicate::Item(i) => query.item_id == *i,
            ScopePredicate::ItemType(t) => query
                .item_type
                .as_deref()
                .is_some_and(|q| q.trim().eq_ignore_ascii_case(t.trim())),
            ScopePredicate::Priority(range) => {
                query.order_priority.is_some_and(|p| range.contains(p))
            }
            ScopePredicate::ShipVia(v) => query
                .ship_via
                .as_deref()
                .is_some_and(|q| q.trim().eq_ignore_ascii_case(v.trim())),
        }
    }
}

/// Rule mapping order-line attributes to a route template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTemplateAssignment {
    pub id: RouteAssignmentId,
    #[serde(default)]
    pub predicates: Vec<ScopePredicate>,
    pub priority: i32,
    pub revision_no: u32,
    pub is_active: bool,
    #[serde(default)]
    pub effective_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub effective_to: Option<DateTime<Utc>>,
    pub route_template_id: RouteTemplateId,
}

impl RouteTemplateAssignment {
    /// Number of populated predicates (tier rank).
    pub fn specificity(&self) -> usize {
        self.predicates.len()
    }

    /// `[effective_from, effective_to)`; open ends are unbounded.
    pub fn is_effective_at(&self, now: DateTime<Utc>) -> bool {
        let started = self.effective_from.is_none_or(|from| from <= now);
        let not_ended = self.effective_to.is_none_or(|to| now < to);
        started && not_ended
    }

    /// First predicate the query fails, if any.
    pub fn first_failing_predicate(&self, query: &RouteQuery) -> Option<&ScopePredicate> {
        self.sorted_predicates()
            .into_iter()
            .find(|p| !p.matches(query))
    }

    /// Populated predicate tags joined in canonical order, e.g. `customer+site+item`.
    pub fn tier_label(&self) -> String {
        let tags: Vec<&str> = self.sorted_predicates().into_iter().map(|p| p.tag()).collect();
        if tags.is_empty() {
            "default".to_string()
        } else {
            tags.join("+")
        }
    }

    fn sorted_predicates(&self) -> Vec<&ScopePredicate> {
        let mut preds: Vec<&ScopePredicate> = self.predicates.iter().collect();
        preds.sort_by_key(|p| p.rank());
        preds
    }

    pub fn validate(&self) -> WorkflowResult<()> {
        let mut tags = std::collections::BTreeSet::new();
        for p in &self.predicates {
            if !tags.insert(p.tag()) {
                return Err(WorkflowError::validation(format!(
                    "assignment {} repeats predicate '{}'",
                    self.id,
                    p.tag()
                )));
            }
            if let ScopePredicate::Priority(range) = p {
                if range.min > range.max {
                    return Err(WorkflowError::validation(format!(
                        "assignment {} has empty priority range {}..={}",
                        self.id, range.min, range.max
                    )));
                }
            }
        }

        if let (Some(from), Some(to)) = (self.effective_from, self.effective_to) {
            if from >= to {
                return Err(WorkflowError::validation(format!(
                    "assignment {} effective window is empty",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn query() -> RouteQuery {
        RouteQuery {
            customer_id: CustomerId(1),
            site_id: SiteId(2),
            item_id: ItemId(3),
            item_type: None,
            order_priority: Some(5),
            ship_via: Some("Truck".to_string()),
        }
    }

    fn assignment(predicates: Vec<ScopePredicate>) -> RouteTemplateAssignment {
        RouteTemplateAssignment {
            id: RouteAssignmentId(1),
            predicates,
            priority: 0,
            revision_no: 1,
            is_active: true,
            effective_from: None,
            effective_to: None,
            route_template_id: RouteTemplateId(1),
        }
    }

    #[test]
    fn absent_query_value_fails_populated_predicate() {
        let a = assignment(vec![ScopePredicate::ItemType("Valve".to_string())]);
        assert_eq!(
            a.first_failing_predicate(&query()).map(|p| p.tag()),
            Some("item_type")
        );
    }

    #[test]
    fn priority_range_is_inclusive() {
        let range = PriorityRange { min: 5, max: 7 };
        assert!(range.contains(5));
        assert!(range.contains(7));
        assert!(!range.contains(8));
        let a = assignment(vec![ScopePredicate::Priority(range)]);
        assert!(a.first_failing_predicate(&query()).is_none());
    }

    #[test]
    fn ship_via_compares_case_insensitively() {
        let a = assignment(vec![ScopePredicate::ShipVia("truck".to_string())]);
        assert!(a.first_failing_predicate(&query()).is_none());
    }

    #[test]
    fn effective_window_excludes_end() {
        let now = Utc::now();
        let mut a = assignment(vec![]);
        a.effective_from = Some(now - Duration::days(1));
        a.effective_to = Some(now);
        assert!(!a.is_effective_at(now));
        assert!(a.is_effective_at(now - Duration::hours(1)));
    }

    #[test]
    fn tier_label_uses_canonical_order() {
        let a = assignment(vec![
            ScopePredicate::Item(ItemId(3)),
            ScopePredicate::Customer(CustomerId(1)),
            ScopePredicate::Site(SiteId(2)),
        ]);
        assert_eq!(a.tier_label(), "customer+site+item");
        assert_eq!(assignment(vec![]).tier_label(), "default");
    }

    #[test]
    fn repeated_predicate_is_invalid() {
        let a = assignment(vec![
            ScopePredicate::Site(SiteId(1)),
            ScopePredicate::Site(SiteId(2)),
        ]);
        assert!(a.validate().is_err());
    }
}
