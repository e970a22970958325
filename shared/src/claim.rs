//! Claim records
//!
//! A claim is a buyer holding a slot. How the slot was won matters for
//! pricing and for what the buyer is allowed to do next, so the origin is
//! kept alongside the record.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{PostId, SlotNumber, UserId};

/// How a buyer came to hold a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimOrigin {
    /// Plain claim at the asking price
    Direct,
    /// Promoted from the waitlist after the holder released
    Waitlist,
    /// Seller accepted the buyer's offer
    OfferAccepted,
    /// Buyer took a seller counter-offer
    CounterAccepted,
    /// Auction closed with this buyer as highest bidder
    AuctionWon,
}

/// A buyer holding a slot at an agreed price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub post_id: PostId,
    pub slot: SlotNumber,
    pub user_id: UserId,
    /// Agreed price; `None` when the post never stated one and the slot
    /// was claimed directly
    pub price: Option<Decimal>,
    pub origin: ClaimOrigin,
    pub claimed_at: DateTime<Utc>,
}

impl ClaimRecord {
    /// Whether the slot can still be released by the holder.
    ///
    /// Slots won through negotiation or at auction are final; walking
    /// away from an agreed price is a seller-side decision.
    pub fn releasable(&self) -> bool {
        matches!(self.origin, ClaimOrigin::Direct | ClaimOrigin::Waitlist)
    }
}
