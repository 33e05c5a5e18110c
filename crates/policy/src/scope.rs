use serde::{Deserialize, Serialize};

use orderflow_core::{CustomerId, SiteId};

/// Where a policy entry applies. Both fields empty means global.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct PolicyScope {
    pub site_id: Option<SiteId>,
    pub customer_id: Option<CustomerId>,
}

impl PolicyScope {
    pub fn global() -> Self {
        Self::default()
    }

    pub fn site(site_id: SiteId) -> Self {
        Self {
            site_id: Some(site_id),
            customer_id: None,
        }
    }

    pub fn customer(customer_id: CustomerId) -> Self {
        Self {
            site_id: None,
            customer_id: Some(customer_id),
        }
    }

    pub fn site_customer(site_id: SiteId, customer_id: CustomerId) -> Self {
        Self {
            site_id: Some(site_id),
            customer_id: Some(customer_id),
        }
    }

    /// Rank used by lookups: site+customer (3) > site (2) > customer (1) > global (0).
    pub fn specificity(&self) -> u8 {
        let site = if self.site_id.is_some() { 2 } else { 0 };
        let customer = if self.customer_id.is_some() { 1 } else { 0 };
        site + customer
    }

    /// Every populated field must equal the context.
    pub fn matches(&self, ctx: &PolicyContext) -> bool {
        let site_ok = self.site_id.is_none_or(|s| ctx.site_id == Some(s));
        let customer_ok = self.customer_id.is_none_or(|c| ctx.customer_id == Some(c));
        site_ok && customer_ok
    }

    pub fn label(&self) -> &'static str {
        match (self.site_id.is_some(), self.customer_id.is_some()) {
            (true, true) => "site+customer",
            (true, false) => "site",
            (false, true) => "customer",
            (false, false) => "global",
        }
    }
}

/// Lookup context (usually the order's site and customer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PolicyContext {
    pub site_id: Option<SiteId>,
    pub customer_id: Option<CustomerId>,
}

impl PolicyContext {
    pub fn global() -> Self {
        Self::default()
    }

    pub fn new(site_id: SiteId, customer_id: CustomerId) -> Self {
        Self {
            site_id: Some(site_id),
            customer_id: Some(customer_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specificity_ordering() {
        let s = SiteId(1);
        let c = CustomerId(9);
        assert!(PolicyScope::site_customer(s, c).specificity() > PolicyScope::site(s).specificity());
        assert!(PolicyScope::site(s).specificity() > PolicyScope::customer(c).specificity());
        assert!(PolicyScope::customer(c).specificity() > PolicyScope::global().specificity());
    }

    #[test]
    fn populated_fields_must_match_context() {
        let ctx = PolicyContext::new(SiteId(1), CustomerId(9));
        assert!(PolicyScope::global().matches(&ctx));
        assert!(PolicyScope::site(SiteId(1)).matches(&ctx));
        assert!(!PolicyScope::site(SiteId(2)).matches(&ctx));
        assert!(!PolicyScope::customer(CustomerId(9)).matches(&PolicyContext::global()));
    }
}
