//! Engine configuration and managed product sets.
//!
//! Products are validated before they are accepted: a product id may belong
//! to at most one of the two managed sets.

use crate::{error::Result, Error, ProductId, ProductKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Default number of retries for a connection attempt.
pub const DEFAULT_RETRY_BUDGET: u32 = 2;

/// Default key under which the purchase cache is persisted.
pub const DEFAULT_STORAGE_KEY: &str = "purchases";

/// The two disjoint sets of product ids the engine manages.
///
/// Deserialized sets go through [`ManagedProducts::new`] and are rejected on
/// overlap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawManagedProducts")]
pub struct ManagedProducts {
    subscriptions: BTreeSet<ProductId>,
    consumables: BTreeSet<ProductId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManagedProducts {
    #[serde(default)]
    subscriptions: Vec<ProductId>,
    #[serde(default)]
    consumables: Vec<ProductId>,
}

impl TryFrom<RawManagedProducts> for ManagedProducts {
    type Error = Error;

    fn try_from(raw: RawManagedProducts) -> Result<Self> {
        Self::new(raw.subscriptions, raw.consumables)
    }
}

impl ManagedProducts {
    /// Build the managed sets, rejecting any id present in both.
    pub fn new<S, C>(subscriptions: S, consumables: C) -> Result<Self>
    where
        S: IntoIterator,
        S::Item: Into<ProductId>,
        C: IntoIterator,
        C::Item: Into<ProductId>,
    {
        let subscriptions: BTreeSet<ProductId> =
            subscriptions.into_iter().map(Into::into).collect();
        let consumables: BTreeSet<ProductId> = consumables.into_iter().map(Into::into).collect();

        if let Some(overlap) = subscriptions.intersection(&consumables).next() {
            return Err(Error::OverlappingProduct(overlap.clone()));
        }

        Ok(Self {
            subscriptions,
            consumables,
        })
    }

    /// Managed subscription ids.
    pub fn subscriptions(&self) -> impl Iterator<Item = &ProductId> {
        self.subscriptions.iter()
    }

    /// Managed consumable ids.
    pub fn consumables(&self) -> impl Iterator<Item = &ProductId> {
        self.consumables.iter()
    }

    /// Managed ids of one kind, in sorted order.
    pub fn ids(&self, kind: ProductKind) -> Vec<ProductId> {
        match kind {
            ProductKind::Subscription => self.subscriptions.iter().cloned().collect(),
            ProductKind::Consumable => self.consumables.iter().cloned().collect(),
        }
    }

    /// Which set a product belongs to, if any.
    pub fn kind_of(&self, product_id: &str) -> Option<ProductKind> {
        if self.subscriptions.contains(product_id) {
            Some(ProductKind::Subscription)
        } else if self.consumables.contains(product_id) {
            Some(ProductKind::Consumable)
        } else {
            None
        }
    }

    /// Check whether a product is managed under the given kind.
    pub fn is_managed_as(&self, product_id: &str, kind: ProductKind) -> bool {
        self.kind_of(product_id) == Some(kind)
    }

    /// Check if no products are managed.
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty() && self.consumables.is_empty()
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Managed product ids
    pub products: ManagedProducts,
    /// Retries for an explicit connect request
    pub retry_budget: u32,
    /// Blob key for the persisted purchase cache
    pub storage_key: String,
    /// Answer entitlement queries from a restored cache before the first
    /// reconciliation completes
    pub trust_restored_cache: bool,
}

impl EngineConfig {
    /// Create a configuration with default settings.
    pub fn new(products: ManagedProducts) -> Self {
        Self {
            products,
            retry_budget: DEFAULT_RETRY_BUDGET,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            trust_restored_cache: false,
        }
    }

    /// Set the retry budget.
    pub fn with_retry_budget(mut self, retry_budget: u32) -> Self {
        self.retry_budget = retry_budget;
        self
    }

    /// Set the storage key.
    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    /// Trust a cache restored from storage for entitlement queries.
    pub fn with_trusted_restore(mut self, trust: bool) -> Self {
        self.trust_restored_cache = trust;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(ManagedProducts::default())
    }
}
