//! Buyer account state
//!
//! The server tracks each buyer across posts so it can total what they
//! owe, chase payment and enforce the storage window. The snapshot here
//! is what admin lookups and the confirmation flow report.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::claim::ClaimRecord;
use crate::types::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Confirmed their haul, payment not yet seen
    Pending,
    /// Payment acknowledged by an admin
    Paid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShippingMethod {
    Meetup,
    Mail,
    /// Items held by the seller until pickup, subject to a deadline
    Storage,
}

/// Point-in-time view of one buyer's standing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub user_id: UserId,
    pub username: Option<String>,
    pub claims: Vec<ClaimRecord>,
    pub payment_status: Option<PaymentStatus>,
    pub shipping: Option<ShippingMethod>,
    pub confirmed_at: Option<DateTime<Utc>>,
    /// Last day stored items will be held, when shipping is Storage
    pub storage_deadline: Option<DateTime<Utc>>,
}

impl AccountSnapshot {
    /// Sum of agreed prices across held claims.
    ///
    /// Claims without a stated price contribute nothing.
    pub fn total_owed(&self) -> Decimal {
        self.claims.iter().filter_map(|c| c.price).sum()
    }
}
