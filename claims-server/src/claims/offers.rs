//! Per-slot offer book
//!
//! Buyers raise their own offers, the seller may counter the highest one,
//! and either side closes the deal. All of it is plain in-memory state;
//! the post entry lock above this module provides the atomicity.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;

use shared::UserId;

use super::error::NegotiationError;

/// One buyer's standing offer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Offer {
    pub amount: Decimal,
    pub placed_at: DateTime<Utc>,
}

/// Seller's counter to a specific buyer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CounterOffer {
    pub user: UserId,
    pub amount: Decimal,
}

/// What placing an offer did
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OfferPlaced {
    pub amount: Decimal,
    /// Previous highest offerer, when this offer pushed them off the top
    pub displaced: Option<UserId>,
    pub is_highest: bool,
}

/// Negotiation state for one slot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotOffers {
    offers: HashMap<UserId, Offer>,
    counter: Option<CounterOffer>,
}

impl SlotOffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an offer.
    ///
    /// A buyer's successive offers must strictly increase. A new offer
    /// from a countered buyer voids the counter addressed to them; they
    /// are bargaining on, not accepting.
    pub fn place(
        &mut self,
        user: UserId,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<OfferPlaced, NegotiationError> {
        if let Some(prev) = self.offers.get(&user)
            && amount <= prev.amount
        {
            return Err(NegotiationError::OfferTooLow {
                previous: prev.amount,
            });
        }

        let previous_top = self.highest().map(|(u, o)| (u, o.amount));
        self.offers.insert(
            user,
            Offer {
                amount,
                placed_at: now,
            },
        );
        if self.counter.is_some_and(|c| c.user == user) {
            self.counter = None;
        }

        let is_highest = self.highest().map(|(u, _)| u) == Some(user);
        let displaced = match previous_top {
            Some((top_user, top_amount))
                if is_highest && top_user != user && amount > top_amount =>
            {
                Some(top_user)
            }
            _ => None,
        };
        Ok(OfferPlaced {
            amount,
            displaced,
            is_highest,
        })
    }

    /// Current highest offer.
    ///
    /// Equal amounts resolve to the earliest placed; a user id comparison
    /// breaks the (timestamp-identical) remainder so the answer is
    /// deterministic.
    pub fn highest(&self) -> Option<(UserId, Offer)> {
        self.offers
            .iter()
            .min_by(|(ua, oa), (ub, ob)| {
                ob.amount
                    .cmp(&oa.amount)
                    .then(oa.placed_at.cmp(&ob.placed_at))
                    .then(ua.cmp(ub))
            })
            .map(|(u, o)| (*u, *o))
    }

    /// Seller counters the current highest offerer.
    ///
    /// The counter must strictly beat the highest standing offer.
    pub fn set_counter(&mut self, amount: Decimal) -> Result<CounterOffer, NegotiationError> {
        let (user, top) = self.highest().ok_or(NegotiationError::NoOffers)?;
        if amount <= top.amount {
            return Err(NegotiationError::CounterTooLow { highest: top.amount });
        }
        let counter = CounterOffer { user, amount };
        self.counter = Some(counter);
        Ok(counter)
    }

    /// Countered buyer accepts; consumes the counter
    pub fn take_counter(&mut self, user: UserId) -> Result<Decimal, NegotiationError> {
        match self.counter {
            Some(c) if c.user == user => {
                self.counter = None;
                Ok(c.amount)
            }
            _ => Err(NegotiationError::NoCounterForUser),
        }
    }

    pub fn counter(&self) -> Option<CounterOffer> {
        self.counter
    }

    pub fn offer_of(&self, user: UserId) -> Option<Offer> {
        self.offers.get(&user).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.offers.is_empty() && self.counter.is_none()
    }

    /// Wipe the book, returning every offerer for notification
    pub fn clear(&mut self) -> Vec<UserId> {
        self.counter = None;
        self.offers.drain().map(|(u, _)| u).collect()
    }

    /// Drop one user's offer and any counter addressed to them
    pub fn clear_user(&mut self, user: UserId) {
        self.offers.remove(&user);
        if self.counter.is_some_and(|c| c.user == user) {
            self.counter = None;
        }
    }
}
