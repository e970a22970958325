//! Sale post model
//!
//! A post is the immutable description of something offered for sale in a
//! chat. The mutable negotiation state (claims, offers, bids) lives in the
//! server and is keyed by [`PostId`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{ChatId, MessageId, PostId, UserId};

/// Maximum item name length kept after extraction
pub const MAX_ITEM_NAME_LEN: usize = 100;

/// How a post sells its items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostMode {
    /// One item, or `capacity` interchangeable units, at a fixed price.
    /// `price` is absent when the post never stated one.
    Single {
        price: Option<Decimal>,
        capacity: u32,
    },
    /// Numbered slots sharing one asking price
    Multi { price: Option<Decimal>, slots: u32 },
    /// Timed sale to the highest bidder
    Auction {
        starting_bid: Option<Decimal>,
        /// Deadline as announced to buyers. Bidding actually closes a
        /// little later; the server adds a late-bid grace window.
        display_end: DateTime<Utc>,
        anti_snipe: bool,
    },
}

impl PostMode {
    /// Number of addressable slots
    pub fn slot_count(&self) -> u32 {
        match self {
            PostMode::Single { .. } => 1,
            PostMode::Multi { slots, .. } => *slots,
            PostMode::Auction { .. } => 1,
        }
    }

    /// Sellable units: slots for a multi post, capacity for a single post
    pub fn unit_count(&self) -> u32 {
        match self {
            PostMode::Single { capacity, .. } => *capacity,
            PostMode::Multi { slots, .. } => *slots,
            PostMode::Auction { .. } => 1,
        }
    }

    /// Asking price stated by the post, if any
    pub fn asking_price(&self) -> Option<Decimal> {
        match self {
            PostMode::Single { price, .. } => *price,
            PostMode::Multi { price, .. } => *price,
            PostMode::Auction { starting_bid, .. } => *starting_bid,
        }
    }

    pub fn is_auction(&self) -> bool {
        matches!(self, PostMode::Auction { .. })
    }
}

/// Immutable description of a sale post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub chat_id: ChatId,
    /// Message that introduced the post, for reply threading
    pub message_id: MessageId,
    /// Poster, when the platform exposes one
    pub author: Option<UserId>,
    pub item_name: String,
    pub mode: PostMode,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn unit_count_per_mode() {
        let single = PostMode::Single {
            price: Some(dec!(12)),
            capacity: 3,
        };
        assert_eq!(single.slot_count(), 1);
        assert_eq!(single.unit_count(), 3);

        let multi = PostMode::Multi {
            price: Some(dec!(5)),
            slots: 10,
        };
        assert_eq!(multi.slot_count(), 10);
        assert_eq!(multi.unit_count(), 10);
    }

    #[test]
    fn asking_price_falls_back_to_starting_bid() {
        let auction = PostMode::Auction {
            starting_bid: Some(dec!(50)),
            display_end: Utc::now(),
            anti_snipe: false,
        };
        assert_eq!(auction.asking_price(), Some(dec!(50)));
        assert!(auction.is_auction());
    }
}
