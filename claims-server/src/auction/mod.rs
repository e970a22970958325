//! Timed auctions
//!
//! Split in two: this module holds the bid state machine, pure and
//! synchronous, exercised under the post entry lock; [`engine`] wires it
//! to timers, notifications and the ledger.
//!
//! # Lifecycle
//!
//! ```text
//! Active ──(bid near close, anti-snipe)──> Active, extended
//!   │
//!   └─ end timer ─> Ended ──(admin)──> Won | ReserveNotMet
//! ```

pub mod engine;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;

use shared::UserId;

use crate::claims::NegotiationError;
use crate::core::Config;

pub use engine::AuctionEngine;

/// Admin resolution of an ended auction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuctionResolution {
    Pending,
    Won,
    ReserveNotMet,
}

/// One bidder's standing bid (their latest; earlier ones are replaced)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bid {
    pub amount: Decimal,
    pub placed_at: DateTime<Utc>,
}

/// Timing rules, lifted from [`Config`] so the state machine stays
/// testable without environment plumbing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuctionPolicy {
    /// Gap between the announced close and the real one
    pub grace: Duration,
    /// A bid this close to the effective end extends the auction
    pub anti_snipe_window: Duration,
    /// First extension length
    pub first_extension: Duration,
    /// Every extension after the first
    pub later_extension: Duration,
    /// Minimum gap between outbid pings to the same bidder
    pub outbid_cooldown: Duration,
}

impl AuctionPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            grace: Duration::seconds(config.late_bid_grace_secs),
            anti_snipe_window: Duration::seconds(config.anti_snipe_window_secs),
            first_extension: Duration::seconds(config.anti_snipe_first_ext_secs),
            later_extension: Duration::seconds(config.anti_snipe_step_secs),
            outbid_cooldown: Duration::seconds(config.outbid_cooldown_secs),
        }
    }
}

impl Default for AuctionPolicy {
    fn default() -> Self {
        Self {
            grace: Duration::seconds(60),
            anti_snipe_window: Duration::seconds(60),
            first_extension: Duration::seconds(300),
            later_extension: Duration::seconds(60),
            outbid_cooldown: Duration::seconds(120),
        }
    }
}

/// An anti-snipe extension applied by a late bid
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extension {
    pub new_end: DateTime<Utc>,
    pub new_display_end: DateTime<Utc>,
    /// First extension of this auction (longer, and flips `extended`)
    pub first: bool,
}

/// What recording a bid did
#[derive(Debug, Clone, PartialEq)]
pub struct BidPlaced {
    pub amount: Decimal,
    /// Leader displaced by this bid, if any
    pub previous_leader: Option<(UserId, Decimal)>,
    /// Displaced leader to ping, unless the cooldown swallowed it
    pub outbid_notice: Option<UserId>,
    pub extension: Option<Extension>,
}

/// Result of closing the bidding
#[derive(Debug, Clone, PartialEq)]
pub struct EndSummary {
    pub highest: Option<(UserId, Decimal)>,
    pub bid_count: usize,
}

/// Live state of one auction post
#[derive(Debug, Clone, PartialEq)]
pub struct AuctionState {
    pub starting_bid: Option<Decimal>,
    pub bids: HashMap<UserId, Bid>,
    /// Deadline as announced to buyers
    pub display_end: DateTime<Utc>,
    /// When bidding really closes; display end plus the grace window
    pub end_time: DateTime<Utc>,
    pub extended: bool,
    pub active: bool,
    pub anti_snipe: bool,
    pub resolution: AuctionResolution,
    outbid_notified_at: HashMap<UserId, DateTime<Utc>>,
}

impl AuctionState {
    /// Fresh auction. The effective end starts one grace window after
    /// the display end; [`engine::AuctionEngine::setup`] re-derives it
    /// from config before any timer is installed.
    pub fn new(starting_bid: Option<Decimal>, display_end: DateTime<Utc>, anti_snipe: bool) -> Self {
        Self {
            starting_bid,
            bids: HashMap::new(),
            display_end,
            end_time: display_end + Duration::seconds(60),
            extended: false,
            active: true,
            anti_snipe,
            resolution: AuctionResolution::Pending,
            outbid_notified_at: HashMap::new(),
        }
    }

    /// Current highest bid. Equal amounts resolve to the earliest placed,
    /// then the smaller user id, so the answer is deterministic.
    pub fn highest(&self) -> Option<(UserId, Bid)> {
        self.bids
            .iter()
            .min_by(|(ua, ba), (ub, bb)| {
                bb.amount
                    .cmp(&ba.amount)
                    .then(ba.placed_at.cmp(&bb.placed_at))
                    .then(ua.cmp(ub))
            })
            .map(|(u, b)| (*u, *b))
    }

    /// Record a bid.
    ///
    /// Must strictly beat the current highest; the first bid must at
    /// least meet the starting bid. A qualifying late bid extends the
    /// close per the anti-snipe policy.
    pub fn place_bid(
        &mut self,
        user: UserId,
        amount: Decimal,
        now: DateTime<Utc>,
        policy: &AuctionPolicy,
    ) -> Result<BidPlaced, NegotiationError> {
        if !self.active {
            return Err(NegotiationError::AuctionInactive);
        }

        let previous_leader = self.highest().map(|(u, b)| (u, b.amount));
        match previous_leader {
            Some((_, top)) => {
                if amount <= top {
                    return Err(NegotiationError::BidTooLow { minimum: top });
                }
            }
            None => {
                if let Some(start) = self.starting_bid
                    && amount < start
                {
                    return Err(NegotiationError::BidTooLow { minimum: start });
                }
            }
        }

        self.bids.insert(
            user,
            Bid {
                amount,
                placed_at: now,
            },
        );

        let outbid_notice = match previous_leader {
            Some((leader, _)) if leader != user => {
                let throttled = self
                    .outbid_notified_at
                    .get(&leader)
                    .is_some_and(|last| now - *last < policy.outbid_cooldown);
                if throttled {
                    None
                } else {
                    self.outbid_notified_at.insert(leader, now);
                    Some(leader)
                }
            }
            _ => None,
        };

        let extension = if self.anti_snipe && now >= self.end_time - policy.anti_snipe_window {
            let first = !self.extended;
            let step = if first {
                policy.first_extension
            } else {
                policy.later_extension
            };
            self.end_time += step;
            self.display_end += step;
            self.extended = true;
            Some(Extension {
                new_end: self.end_time,
                new_display_end: self.display_end,
                first,
            })
        } else {
            None
        };

        Ok(BidPlaced {
            amount,
            previous_leader,
            outbid_notice,
            extension,
        })
    }

    /// Close bidding. Idempotent callers are rejected so a stale timer
    /// cannot double-announce.
    pub fn end(&mut self) -> Result<EndSummary, NegotiationError> {
        if !self.active {
            return Err(NegotiationError::AuctionInactive);
        }
        self.active = false;
        Ok(EndSummary {
            highest: self.highest().map(|(u, b)| (u, b.amount)),
            bid_count: self.bids.len(),
        })
    }

    /// Admin confirms the sale to the highest bidder
    pub fn confirm_won(&mut self) -> Result<(UserId, Decimal), NegotiationError> {
        self.check_resolvable()?;
        let (winner, bid) = self.highest().ok_or(NegotiationError::NoBids)?;
        self.resolution = AuctionResolution::Won;
        Ok((winner, bid.amount))
    }

    /// Admin declines the highest bid; the price is recorded, nothing
    /// is sold
    pub fn confirm_reserve_not_met(&mut self) -> Result<Option<(UserId, Decimal)>, NegotiationError> {
        self.check_resolvable()?;
        self.resolution = AuctionResolution::ReserveNotMet;
        Ok(self.highest().map(|(u, b)| (u, b.amount)))
    }

    fn check_resolvable(&self) -> Result<(), NegotiationError> {
        if self.active {
            return Err(NegotiationError::AuctionStillActive);
        }
        if self.resolution != AuctionResolution::Pending {
            return Err(NegotiationError::AuctionAlreadyResolved);
        }
        Ok(())
    }

    pub fn is_sold(&self) -> bool {
        self.resolution == AuctionResolution::Won
    }
}
