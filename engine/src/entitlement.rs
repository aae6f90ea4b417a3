//! Entitlement queries over the purchase cache.
//!
//! Pure lookups: no backend call is ever issued. A product only counts when
//! it is managed under the queried kind and the cache holds a purchase for it.

use crate::{cache::CacheMap, ManagedProducts, ProductKind};

/// Read-only view used to answer one query.
pub(crate) struct EntitlementView<'a> {
    products: &'a ManagedProducts,
    entries: &'a CacheMap,
    loaded: bool,
    debug_override: bool,
}

impl<'a> EntitlementView<'a> {
    pub(crate) fn new(
        products: &'a ManagedProducts,
        entries: &'a CacheMap,
        loaded: bool,
        debug_override: bool,
    ) -> Self {
        Self {
            products,
            entries,
            loaded,
            debug_override,
        }
    }

    /// Whether any of `ids` is owned and managed as `kind`.
    pub(crate) fn owns_any<I>(&self, ids: I, kind: ProductKind) -> bool
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        if self.debug_override {
            return true;
        }
        if !self.loaded {
            return false;
        }
        ids.into_iter().any(|id| {
            let id = id.as_ref();
            self.products.is_managed_as(id, kind) && self.entries.contains_key(id)
        })
    }

    /// Whether any product managed as `kind` is owned.
    pub(crate) fn owns_any_managed(&self, kind: ProductKind) -> bool {
        match kind {
            ProductKind::Subscription => self.owns_any(self.products.subscriptions(), kind),
            ProductKind::Consumable => self.owns_any(self.products.consumables(), kind),
        }
    }
}
