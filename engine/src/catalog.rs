//! Product catalog - normalizing store listings into [`ProductDetails`].
//!
//! # Pricing selection
//!
//! - Subscriptions: the cheapest pricing phase with a non-zero price across
//!   all offers. Free trials and zero-priced intro phases are skipped.
//! - Consumables: the single one-time offer.
//!
//! A batch fails as a whole if any listing lacks the pricing data above.

use crate::{backend::BillingBackend, error::Result, Error, ProductId, ProductKind};
use serde::{Deserialize, Serialize};

/// One pricing phase of a subscription offer, as listed by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingPhase {
    pub formatted_price: String,
    pub price_micros: i64,
    pub currency_code: String,
    /// ISO-8601 billing period, e.g. `P1M`
    pub billing_period: String,
}

/// A subscription offer (base plan or promotional offer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionOffer {
    /// Token passed to the purchase flow to select this offer
    pub offer_token: String,
    pub pricing_phases: Vec<PricingPhase>,
}

/// The one-time price of a consumable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneTimeOffer {
    pub formatted_price: String,
    pub price_micros: i64,
    pub currency_code: String,
}

/// A store listing in the backend's shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawProductDetails {
    pub product_id: ProductId,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_time_offer: Option<OneTimeOffer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_offers: Option<Vec<SubscriptionOffer>>,
}

impl RawProductDetails {
    /// Token of the first subscription offer, if any.
    pub fn first_offer_token(&self) -> Option<&str> {
        self.subscription_offers
            .as_ref()?
            .first()
            .map(|offer| offer.offer_token.as_str())
    }
}

/// Normalized, backend-agnostic product descriptor.
///
/// Derived fresh on every fetch; never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDetails {
    pub product_id: ProductId,
    pub title: String,
    pub description: String,
    /// Price formatted by the backend for display
    pub formatted_price: String,
    pub currency_code: String,
    /// Price in millionths of the currency unit
    pub price_micros: i64,
    /// Billing period of the selected phase (subscriptions only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_period: Option<String>,
    pub is_subscription: bool,
}

impl ProductDetails {
    /// Normalize a listing of the given kind.
    pub fn from_raw(raw: &RawProductDetails, kind: ProductKind) -> Result<Self> {
        match kind {
            ProductKind::Subscription => Self::from_subscription(raw),
            ProductKind::Consumable => Self::from_one_time(raw),
        }
    }

    fn from_subscription(raw: &RawProductDetails) -> Result<Self> {
        let offers = raw
            .subscription_offers
            .as_deref()
            .filter(|offers| !offers.is_empty())
            .ok_or_else(|| parsing(raw, "no subscription offers"))?;

        let phase = offers
            .iter()
            .flat_map(|offer| offer.pricing_phases.iter())
            .filter(|phase| phase.price_micros > 0)
            .min_by_key(|phase| phase.price_micros)
            .ok_or_else(|| parsing(raw, "no paid pricing phase"))?;

        Ok(Self {
            product_id: raw.product_id.clone(),
            title: raw.title.clone(),
            description: raw.description.clone(),
            formatted_price: phase.formatted_price.clone(),
            currency_code: phase.currency_code.clone(),
            price_micros: phase.price_micros,
            billing_period: Some(phase.billing_period.clone()),
            is_subscription: true,
        })
    }

    fn from_one_time(raw: &RawProductDetails) -> Result<Self> {
        let offer = raw
            .one_time_offer
            .as_ref()
            .ok_or_else(|| parsing(raw, "no one-time offer"))?;

        Ok(Self {
            product_id: raw.product_id.clone(),
            title: raw.title.clone(),
            description: raw.description.clone(),
            formatted_price: offer.formatted_price.clone(),
            currency_code: offer.currency_code.clone(),
            price_micros: offer.price_micros,
            billing_period: None,
            is_subscription: false,
        })
    }
}

fn parsing(raw: &RawProductDetails, reason: &str) -> Error {
    Error::Parsing {
        product_id: raw.product_id.clone(),
        reason: reason.to_string(),
    }
}

/// Fetch and normalize details for a batch of products of one kind.
pub async fn fetch_details(
    backend: &dyn BillingBackend,
    product_ids: &[ProductId],
    kind: ProductKind,
) -> Result<Vec<ProductDetails>> {
    if product_ids.is_empty() {
        return Ok(Vec::new());
    }

    let listings = backend
        .query_product_details(product_ids, kind)
        .await
        .map_err(Error::Details)?;

    let details = listings
        .iter()
        .map(|raw| ProductDetails::from_raw(raw, kind))
        .collect::<Result<Vec<_>>>();

    match &details {
        Ok(details) => {
            tracing::debug!(kind = %kind, count = details.len(), "Product details fetched")
        }
        Err(e) => tracing::warn!(kind = %kind, error = %e, "Product details rejected"),
    }

    details
}
