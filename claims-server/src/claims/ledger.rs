//! Claim ledger - per-post ownership and quantity tracking
//!
//! The registry hands out one `Arc<Mutex<PostEntry>>` per post. Every
//! operation locks the entry, runs its whole read-modify-write inside,
//! and returns an outcome struct. Outcomes carry everything the caller
//! needs for notifications and ledger pushes, so no state is read again
//! outside the lock.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::Mutex;

use shared::{ClaimOrigin, Post, PostId, PostMode, SlotNumber, UserId};

use super::error::NegotiationError;
use super::offers::SlotOffers;
use super::waitlist::{JoinOutcome, Waitlist};
use crate::auction::AuctionState;

// ============ State ============

/// One sold unit and who holds it
#[derive(Debug, Clone, PartialEq)]
pub struct UnitClaim {
    pub user: UserId,
    pub price: Option<Decimal>,
    pub origin: ClaimOrigin,
    pub claimed_at: DateTime<Utc>,
}

impl UnitClaim {
    fn releasable(&self) -> bool {
        matches!(self.origin, ClaimOrigin::Direct | ClaimOrigin::Waitlist)
    }
}

/// Single post: a pool of `capacity` interchangeable units
#[derive(Debug, Clone, PartialEq)]
pub struct SingleState {
    pub capacity: u32,
    /// Current unit price; an accepted offer replaces it for the rest
    /// of the pool
    pub price: Option<Decimal>,
    pub negotiated: bool,
    pub claims: Vec<UnitClaim>,
    pub waitlist: Waitlist,
    pub offers: SlotOffers,
}

impl SingleState {
    fn new(price: Option<Decimal>, capacity: u32) -> Self {
        Self {
            capacity,
            price,
            negotiated: false,
            claims: Vec::new(),
            waitlist: Waitlist::new(),
            offers: SlotOffers::new(),
        }
    }

    pub fn sold(&self) -> u32 {
        self.claims.len() as u32
    }

    pub fn open(&self) -> u32 {
        self.capacity - self.sold()
    }
}

/// State of one numbered slot in a multi post
#[derive(Debug, Clone, PartialEq)]
pub enum SlotState {
    Open,
    Claimed(UnitClaim),
    /// Terminal; the negotiated sale is final
    SoldViaOffer(UnitClaim),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultiSlot {
    pub price: Option<Decimal>,
    pub state: SlotState,
    pub waitlist: Waitlist,
    pub offers: SlotOffers,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultiState {
    pub slots: Vec<MultiSlot>,
}

impl MultiState {
    fn new(price: Option<Decimal>, count: u32) -> Self {
        Self {
            slots: (0..count)
                .map(|_| MultiSlot {
                    price,
                    state: SlotState::Open,
                    waitlist: Waitlist::new(),
                    offers: SlotOffers::new(),
                })
                .collect(),
        }
    }

    pub fn sold(&self) -> u32 {
        self.slots
            .iter()
            .filter(|s| !matches!(s.state, SlotState::Open))
            .count() as u32
    }
}

/// Mutable negotiation state, one variant per sale mode
#[derive(Debug, Clone, PartialEq)]
pub enum Negotiation {
    Single(SingleState),
    Multi(MultiState),
    Auction(AuctionState),
}

/// A registered post plus its live negotiation state
#[derive(Debug, Clone, PartialEq)]
pub struct PostEntry {
    pub post: Post,
    pub negotiation: Negotiation,
}

impl PostEntry {
    fn new(post: Post) -> Self {
        let negotiation = match &post.mode {
            PostMode::Single { price, capacity } => {
                Negotiation::Single(SingleState::new(*price, (*capacity).max(1)))
            }
            PostMode::Multi { price, slots } => {
                Negotiation::Multi(MultiState::new(*price, (*slots).max(1)))
            }
            PostMode::Auction {
                starting_bid,
                display_end,
                anti_snipe,
            } => Negotiation::Auction(AuctionState::new(*starting_bid, *display_end, *anti_snipe)),
        };
        Self { post, negotiation }
    }

    /// Units sold so far
    pub fn sold(&self) -> u32 {
        match &self.negotiation {
            Negotiation::Single(s) => s.sold(),
            Negotiation::Multi(m) => m.sold(),
            Negotiation::Auction(a) => u32::from(a.is_sold()),
        }
    }

    /// Units still on sale
    pub fn open(&self) -> u32 {
        self.post.mode.unit_count() - self.sold()
    }
}

// ============ Outcomes ============

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Claimed {
        slot: SlotNumber,
        price: Option<Decimal>,
        /// Offerers whose open offers were voided by the claim
        cleared_offerers: Vec<UserId>,
    },
    Waitlisted {
        slot: SlotNumber,
        position: usize,
    },
    AlreadyWaitlisted {
        slot: SlotNumber,
        position: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseOutcome {
    pub slot: SlotNumber,
    pub price: Option<Decimal>,
    /// Head of the waitlist the slot was handed to, if any
    pub transferred_to: Option<UserId>,
    /// -1 when a unit went back on sale, 0 on an ownership transfer
    pub sold_delta: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OfferOutcome {
    pub slot: SlotNumber,
    pub amount: Decimal,
    pub displaced: Option<UserId>,
    pub is_highest: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CounterOutcome {
    pub slot: SlotNumber,
    pub target: UserId,
    pub amount: Decimal,
}

/// A materialized negotiated sale
#[derive(Debug, Clone, PartialEq)]
pub struct SaleOutcome {
    pub slot: SlotNumber,
    pub buyer: UserId,
    pub price: Decimal,
    pub item_name: String,
    pub origin: ClaimOrigin,
    /// Other offerers whose offers are now void
    pub cleared_offerers: Vec<UserId>,
    /// Waitlisted users released because the slot settled for good
    pub cleared_waitlist: Vec<UserId>,
    /// Units still on sale (at the negotiated price) after this sale
    pub remaining: u32,
}

/// Pre-reset statistics returned by [`PostRegistry::reset_all`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResetStats {
    pub posts: usize,
    pub claims: usize,
    pub total_value: Decimal,
}

/// One post touched while purging a user
#[derive(Debug, Clone, PartialEq)]
pub struct UserReleased {
    pub post_id: PostId,
    pub releases: Vec<ReleaseOutcome>,
}

// ============ Registry ============

/// Key-addressable store of every known post
pub struct PostRegistry {
    posts: DashMap<PostId, Arc<Mutex<PostEntry>>>,
}

impl PostRegistry {
    pub fn new() -> Self {
        Self {
            posts: DashMap::new(),
        }
    }

    /// Register a classified post. Returns false when the id is taken.
    pub fn register(&self, post: Post) -> bool {
        match self.posts.entry(post.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(Mutex::new(PostEntry::new(post))));
                true
            }
        }
    }

    pub fn contains(&self, id: PostId) -> bool {
        self.posts.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    /// Clone of the immutable post descriptor
    pub async fn post(&self, id: PostId) -> Option<Post> {
        let entry = self.posts.get(&id)?.value().clone();
        let guard = entry.lock().await;
        Some(guard.post.clone())
    }

    /// Run `f` with the entry locked. The auction engine and admin paths
    /// use this for operations the registry has no dedicated method for.
    pub async fn with_entry<R>(
        &self,
        id: PostId,
        f: impl FnOnce(&mut PostEntry) -> R,
    ) -> Result<R, NegotiationError> {
        let entry = self.entry(id)?;
        let mut guard = entry.lock().await;
        Ok(f(&mut guard))
    }

    fn entry(&self, id: PostId) -> Result<Arc<Mutex<PostEntry>>, NegotiationError> {
        self.posts
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(NegotiationError::PostNotFound)
    }

    // ============ Claims ============

    /// Claim a slot (or one unit of a single post's pool).
    pub async fn claim(
        &self,
        id: PostId,
        slot: Option<SlotNumber>,
        user: UserId,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, NegotiationError> {
        let entry = self.entry(id)?;
        let mut guard = entry.lock().await;
        match &mut guard.negotiation {
            Negotiation::Auction(_) => Err(NegotiationError::AuctionPost),
            Negotiation::Single(state) => {
                check_single_slot(slot)?;
                if state.open() > 0 {
                    let price = state.price;
                    state.claims.push(UnitClaim {
                        user,
                        price,
                        origin: ClaimOrigin::Direct,
                        claimed_at: now,
                    });
                    let mut cleared_offerers = state.offers.clear();
                    cleared_offerers.retain(|u| *u != user);
                    Ok(ClaimOutcome::Claimed {
                        slot: SlotNumber::FIRST,
                        price,
                        cleared_offerers,
                    })
                } else if state.negotiated && state.claims.iter().all(|c| !c.releasable()) {
                    // Fully settled through negotiation; no transfer can
                    // ever free a unit, so queueing would be a dead end.
                    Err(NegotiationError::SoldOut)
                } else if state.claims.iter().any(|c| c.user == user) {
                    Err(NegotiationError::AlreadyOwner)
                } else {
                    Ok(waitlist_join(&mut state.waitlist, SlotNumber::FIRST, user))
                }
            }
            Negotiation::Multi(state) => {
                let slot = require_slot(slot, state.slots.len() as u32)?;
                let ms = &mut state.slots[slot.index()];
                match &ms.state {
                    SlotState::Open => {
                        let price = ms.price;
                        ms.state = SlotState::Claimed(UnitClaim {
                            user,
                            price,
                            origin: ClaimOrigin::Direct,
                            claimed_at: now,
                        });
                        let mut cleared_offerers = ms.offers.clear();
                        cleared_offerers.retain(|u| *u != user);
                        Ok(ClaimOutcome::Claimed {
                            slot,
                            price,
                            cleared_offerers,
                        })
                    }
                    SlotState::Claimed(holder) if holder.user == user => {
                        Err(NegotiationError::AlreadyOwner)
                    }
                    SlotState::Claimed(_) => Ok(waitlist_join(&mut ms.waitlist, slot, user)),
                    SlotState::SoldViaOffer(_) => Err(NegotiationError::SoldOut),
                }
            }
        }
    }

    /// Release a claim. A non-empty waitlist turns the release into an
    /// ownership transfer at the same price; sold counts do not move.
    pub async fn unclaim(
        &self,
        id: PostId,
        slot: Option<SlotNumber>,
        user: UserId,
        now: DateTime<Utc>,
    ) -> Result<ReleaseOutcome, NegotiationError> {
        let entry = self.entry(id)?;
        let mut guard = entry.lock().await;
        match &mut guard.negotiation {
            Negotiation::Auction(_) => Err(NegotiationError::AuctionPost),
            Negotiation::Single(state) => {
                check_single_slot(slot)?;
                release_single_unit(state, user, now)
            }
            Negotiation::Multi(state) => {
                let slot = match slot {
                    Some(s) => {
                        check_slot_range(s, state.slots.len() as u32)?;
                        s
                    }
                    None => latest_claim_of(state, user).ok_or(NegotiationError::NothingToRelease)?,
                };
                release_multi_slot(&mut state.slots[slot.index()], slot, user, now)
            }
        }
    }

    // ============ Offers ============

    pub async fn place_offer(
        &self,
        id: PostId,
        slot: Option<SlotNumber>,
        user: UserId,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<OfferOutcome, NegotiationError> {
        let entry = self.entry(id)?;
        let mut guard = entry.lock().await;
        match &mut guard.negotiation {
            Negotiation::Auction(_) => Err(NegotiationError::AuctionPost),
            Negotiation::Single(state) => {
                check_single_slot(slot)?;
                if state.open() == 0 {
                    return Err(NegotiationError::SoldOut);
                }
                if state.price == Some(amount) {
                    return Err(NegotiationError::OfferAtListPrice);
                }
                let placed = state.offers.place(user, amount, now)?;
                Ok(OfferOutcome {
                    slot: SlotNumber::FIRST,
                    amount: placed.amount,
                    displaced: placed.displaced,
                    is_highest: placed.is_highest,
                })
            }
            Negotiation::Multi(state) => {
                let slot = require_slot(slot, state.slots.len() as u32)?;
                let ms = &mut state.slots[slot.index()];
                match &ms.state {
                    SlotState::SoldViaOffer(_) => return Err(NegotiationError::SlotSettled),
                    SlotState::Claimed(_) => return Err(NegotiationError::SlotTaken),
                    SlotState::Open => {}
                }
                if ms.price == Some(amount) {
                    return Err(NegotiationError::OfferAtListPrice);
                }
                let placed = ms.offers.place(user, amount, now)?;
                Ok(OfferOutcome {
                    slot,
                    amount: placed.amount,
                    displaced: placed.displaced,
                    is_highest: placed.is_highest,
                })
            }
        }
    }

    /// Seller counters the highest offer on a slot
    pub async fn counter_offer(
        &self,
        id: PostId,
        slot: Option<SlotNumber>,
        amount: Decimal,
    ) -> Result<CounterOutcome, NegotiationError> {
        let entry = self.entry(id)?;
        let mut guard = entry.lock().await;
        match &mut guard.negotiation {
            Negotiation::Auction(_) => Err(NegotiationError::AuctionPost),
            Negotiation::Single(state) => {
                check_single_slot(slot)?;
                let counter = state.offers.set_counter(amount)?;
                Ok(CounterOutcome {
                    slot: SlotNumber::FIRST,
                    target: counter.user,
                    amount: counter.amount,
                })
            }
            Negotiation::Multi(state) => {
                let slot = require_slot(slot, state.slots.len() as u32)?;
                let counter = state.slots[slot.index()].offers.set_counter(amount)?;
                Ok(CounterOutcome {
                    slot,
                    target: counter.user,
                    amount: counter.amount,
                })
            }
        }
    }

    /// Countered buyer accepts the seller's price ("take")
    pub async fn take_counter(
        &self,
        id: PostId,
        slot: Option<SlotNumber>,
        user: UserId,
        now: DateTime<Utc>,
    ) -> Result<SaleOutcome, NegotiationError> {
        let entry = self.entry(id)?;
        let mut guard = entry.lock().await;
        let item_name = guard.post.item_name.clone();
        match &mut guard.negotiation {
            Negotiation::Auction(_) => Err(NegotiationError::AuctionPost),
            Negotiation::Single(state) => {
                check_single_slot(slot)?;
                if state.open() == 0 {
                    return Err(NegotiationError::SoldOut);
                }
                let amount = state.offers.take_counter(user)?;
                Ok(settle_single(
                    state,
                    user,
                    amount,
                    ClaimOrigin::CounterAccepted,
                    item_name,
                    now,
                ))
            }
            Negotiation::Multi(state) => {
                let slot = require_slot(slot, state.slots.len() as u32)?;
                let ms = &mut state.slots[slot.index()];
                if matches!(ms.state, SlotState::SoldViaOffer(_)) {
                    return Err(NegotiationError::SlotSettled);
                }
                let amount = ms.offers.take_counter(user)?;
                Ok(settle_multi(
                    ms,
                    slot,
                    user,
                    amount,
                    ClaimOrigin::CounterAccepted,
                    item_name,
                    now,
                ))
            }
        }
    }

    /// Seller accepts the highest standing offer ("yours")
    pub async fn accept_highest(
        &self,
        id: PostId,
        slot: Option<SlotNumber>,
        now: DateTime<Utc>,
    ) -> Result<SaleOutcome, NegotiationError> {
        let entry = self.entry(id)?;
        let mut guard = entry.lock().await;
        let item_name = guard.post.item_name.clone();
        match &mut guard.negotiation {
            Negotiation::Auction(_) => Err(NegotiationError::AuctionPost),
            Negotiation::Single(state) => {
                check_single_slot(slot)?;
                if state.open() == 0 {
                    return Err(NegotiationError::SoldOut);
                }
                let (buyer, offer) = state.offers.highest().ok_or(NegotiationError::NoOffers)?;
                Ok(settle_single(
                    state,
                    buyer,
                    offer.amount,
                    ClaimOrigin::OfferAccepted,
                    item_name,
                    now,
                ))
            }
            Negotiation::Multi(state) => {
                let slot = require_slot(slot, state.slots.len() as u32)?;
                let ms = &mut state.slots[slot.index()];
                if matches!(ms.state, SlotState::SoldViaOffer(_)) {
                    return Err(NegotiationError::SlotSettled);
                }
                let (buyer, offer) = ms.offers.highest().ok_or(NegotiationError::NoOffers)?;
                Ok(settle_multi(
                    ms,
                    slot,
                    buyer,
                    offer.amount,
                    ClaimOrigin::OfferAccepted,
                    item_name,
                    now,
                ))
            }
        }
    }

    // ============ Administration ============

    /// Purge one user from every post: release their claims (with
    /// waitlist transfers), drop their waitlist entries and void their
    /// offers. Returns what moved, per post, for ledger bookkeeping.
    pub async fn purge_user(&self, user: UserId, now: DateTime<Utc>) -> Vec<UserReleased> {
        let entries: Vec<_> = self
            .posts
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();

        let mut touched = Vec::new();
        for (post_id, entry) in entries {
            let mut guard = entry.lock().await;
            let mut releases = Vec::new();
            match &mut guard.negotiation {
                Negotiation::Single(state) => {
                    state.waitlist.remove(user);
                    state.offers.clear_user(user);
                    // Release every releasable unit; negotiated sales stay
                    while let Some(position) = state
                        .claims
                        .iter()
                        .position(|c| c.user == user && c.releasable())
                    {
                        releases.push(release_unit_at(state, position, now));
                    }
                }
                Negotiation::Multi(state) => {
                    for (idx, ms) in state.slots.iter_mut().enumerate() {
                        ms.waitlist.remove(user);
                        ms.offers.clear_user(user);
                        let slot = SlotNumber(idx as u32 + 1);
                        if let Ok(release) = release_multi_slot(ms, slot, user, now) {
                            releases.push(release);
                        }
                    }
                }
                Negotiation::Auction(state) => {
                    state.bids.remove(&user);
                }
            }
            if !releases.is_empty() {
                touched.push(UserReleased { post_id, releases });
            }
        }
        touched
    }

    /// Clear every post after snapshotting headline numbers
    pub async fn reset_all(&self) -> ResetStats {
        let mut claims = 0usize;
        let mut total_value = Decimal::ZERO;
        for entry in self.posts.iter() {
            let guard = entry.value().lock().await;
            match &guard.negotiation {
                Negotiation::Single(s) => {
                    claims += s.claims.len();
                    total_value += s.claims.iter().filter_map(|c| c.price).sum::<Decimal>();
                }
                Negotiation::Multi(m) => {
                    for slot in &m.slots {
                        if let SlotState::Claimed(c) | SlotState::SoldViaOffer(c) = &slot.state {
                            claims += 1;
                            total_value += c.price.unwrap_or(Decimal::ZERO);
                        }
                    }
                }
                Negotiation::Auction(a) => {
                    if a.is_sold()
                        && let Some((_, bid)) = a.highest()
                    {
                        claims += 1;
                        total_value += bid.amount;
                    }
                }
            }
        }
        let stats = ResetStats {
            posts: self.posts.len(),
            claims,
            total_value,
        };
        self.posts.clear();
        stats
    }
}

impl Default for PostRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============ Helpers ============

fn check_single_slot(slot: Option<SlotNumber>) -> Result<(), NegotiationError> {
    match slot {
        None | Some(SlotNumber::FIRST) => Ok(()),
        Some(s) => Err(NegotiationError::SlotOutOfRange { slot: s, total: 1 }),
    }
}

fn check_slot_range(slot: SlotNumber, total: u32) -> Result<(), NegotiationError> {
    if slot.0 == 0 || slot.0 > total {
        return Err(NegotiationError::SlotOutOfRange { slot, total });
    }
    Ok(())
}

fn require_slot(slot: Option<SlotNumber>, total: u32) -> Result<SlotNumber, NegotiationError> {
    let slot = slot.ok_or(NegotiationError::SlotRequired)?;
    check_slot_range(slot, total)?;
    Ok(slot)
}

fn waitlist_join(waitlist: &mut Waitlist, slot: SlotNumber, user: UserId) -> ClaimOutcome {
    match waitlist.join(user) {
        JoinOutcome::Joined { position } => ClaimOutcome::Waitlisted { slot, position },
        JoinOutcome::AlreadyQueued { position } => {
            ClaimOutcome::AlreadyWaitlisted { slot, position }
        }
    }
}

/// The user's most recently claimed multi slot
fn latest_claim_of(state: &MultiState, user: UserId) -> Option<SlotNumber> {
    state
        .slots
        .iter()
        .enumerate()
        .filter_map(|(idx, ms)| match &ms.state {
            SlotState::Claimed(c) if c.user == user => Some((idx, c.claimed_at)),
            _ => None,
        })
        .max_by_key(|(_, at)| *at)
        .map(|(idx, _)| SlotNumber(idx as u32 + 1))
}

fn release_single_unit(
    state: &mut SingleState,
    user: UserId,
    now: DateTime<Utc>,
) -> Result<ReleaseOutcome, NegotiationError> {
    let position = state
        .claims
        .iter()
        .enumerate()
        .filter(|(_, c)| c.user == user)
        .max_by_key(|(_, c)| c.claimed_at)
        .map(|(idx, _)| idx);
    let Some(position) = position else {
        return Err(NegotiationError::NothingToRelease);
    };
    if !state.claims[position].releasable() {
        return Err(NegotiationError::SlotSettled);
    }
    Ok(release_unit_at(state, position, now))
}

/// Drop the claim at `position`, promoting the waitlist head when one is
/// queued
fn release_unit_at(state: &mut SingleState, position: usize, now: DateTime<Utc>) -> ReleaseOutcome {
    let released = state.claims.remove(position);

    if let Some(next) = state.waitlist.pop_next() {
        state.claims.push(UnitClaim {
            user: next,
            price: released.price,
            origin: ClaimOrigin::Waitlist,
            claimed_at: now,
        });
        ReleaseOutcome {
            slot: SlotNumber::FIRST,
            price: released.price,
            transferred_to: Some(next),
            sold_delta: 0,
        }
    } else {
        ReleaseOutcome {
            slot: SlotNumber::FIRST,
            price: released.price,
            transferred_to: None,
            sold_delta: -1,
        }
    }
}

fn release_multi_slot(
    ms: &mut MultiSlot,
    slot: SlotNumber,
    user: UserId,
    now: DateTime<Utc>,
) -> Result<ReleaseOutcome, NegotiationError> {
    match &ms.state {
        SlotState::Claimed(c) if c.user == user => {}
        SlotState::SoldViaOffer(c) if c.user == user => {
            return Err(NegotiationError::SlotSettled);
        }
        _ => return Err(NegotiationError::NothingToRelease),
    }
    let price = match &ms.state {
        SlotState::Claimed(c) => c.price,
        _ => unreachable!(),
    };

    if let Some(next) = ms.waitlist.pop_next() {
        ms.state = SlotState::Claimed(UnitClaim {
            user: next,
            price,
            origin: ClaimOrigin::Waitlist,
            claimed_at: now,
        });
        Ok(ReleaseOutcome {
            slot,
            price,
            transferred_to: Some(next),
            sold_delta: 0,
        })
    } else {
        ms.state = SlotState::Open;
        Ok(ReleaseOutcome {
            slot,
            price,
            transferred_to: None,
            sold_delta: -1,
        })
    }
}

/// Materialize a negotiated sale on a single post's pool. The negotiated
/// price carries over to the remaining units.
fn settle_single(
    state: &mut SingleState,
    buyer: UserId,
    amount: Decimal,
    origin: ClaimOrigin,
    item_name: String,
    now: DateTime<Utc>,
) -> SaleOutcome {
    state.claims.push(UnitClaim {
        user: buyer,
        price: Some(amount),
        origin,
        claimed_at: now,
    });
    state.price = Some(amount);
    state.negotiated = true;

    let mut cleared_offerers = state.offers.clear();
    cleared_offerers.retain(|u| *u != buyer);

    let remaining = state.open();
    let cleared_waitlist = if remaining == 0 {
        state.waitlist.drain()
    } else {
        Vec::new()
    };

    SaleOutcome {
        slot: SlotNumber::FIRST,
        buyer,
        price: amount,
        item_name,
        origin,
        cleared_offerers,
        cleared_waitlist,
        remaining,
    }
}

/// Materialize a negotiated sale on one multi slot; the slot is terminal
/// afterwards.
fn settle_multi(
    ms: &mut MultiSlot,
    slot: SlotNumber,
    buyer: UserId,
    amount: Decimal,
    origin: ClaimOrigin,
    item_name: String,
    now: DateTime<Utc>,
) -> SaleOutcome {
    ms.state = SlotState::SoldViaOffer(UnitClaim {
        user: buyer,
        price: Some(amount),
        origin,
        claimed_at: now,
    });
    ms.price = Some(amount);

    let mut cleared_offerers = ms.offers.clear();
    cleared_offerers.retain(|u| *u != buyer);
    let mut cleared_waitlist = ms.waitlist.drain();
    cleared_waitlist.retain(|u| *u != buyer);

    SaleOutcome {
        slot,
        buyer,
        price: amount,
        item_name,
        origin,
        cleared_offerers,
        cleared_waitlist,
        remaining: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use shared::{ChatId, MessageId};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn post(id: i64, mode: PostMode) -> Post {
        Post {
            id: PostId(id),
            chat_id: ChatId(-100),
            message_id: MessageId(id),
            author: None,
            item_name: format!("Item {id}"),
            mode,
            created_at: at(0),
        }
    }

    fn single(id: i64, price: Decimal, capacity: u32) -> Post {
        post(
            id,
            PostMode::Single {
                price: Some(price),
                capacity,
            },
        )
    }

    fn multi(id: i64, price: Decimal, slots: u32) -> Post {
        post(
            id,
            PostMode::Multi {
                price: Some(price),
                slots,
            },
        )
    }

    async fn counts(registry: &PostRegistry, id: PostId) -> (u32, u32) {
        registry
            .with_entry(id, |entry| (entry.sold(), entry.open()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn claim_then_waitlist_then_transfer() {
        let registry = PostRegistry::new();
        registry.register(single(1, dec!(10), 1));
        let id = PostId(1);

        let a = registry.claim(id, None, UserId(1), at(1)).await.unwrap();
        assert!(matches!(
            a,
            ClaimOutcome::Claimed {
                price: Some(p),
                ..
            } if p == dec!(10)
        ));
        assert_eq!(counts(&registry, id).await, (1, 0));

        let b = registry.claim(id, None, UserId(2), at(2)).await.unwrap();
        assert_eq!(
            b,
            ClaimOutcome::Waitlisted {
                slot: SlotNumber::FIRST,
                position: 1
            }
        );

        // Release transfers to B at the same price; sold count unchanged
        let release = registry.unclaim(id, None, UserId(1), at(3)).await.unwrap();
        assert_eq!(release.transferred_to, Some(UserId(2)));
        assert_eq!(release.sold_delta, 0);
        assert_eq!(release.price, Some(dec!(10)));
        assert_eq!(counts(&registry, id).await, (1, 0));

        // B releases with nobody queued; the unit goes back on sale
        let release = registry.unclaim(id, None, UserId(2), at(4)).await.unwrap();
        assert_eq!(release.transferred_to, None);
        assert_eq!(release.sold_delta, -1);
        assert_eq!(counts(&registry, id).await, (0, 1));
    }

    #[tokio::test]
    async fn multi_slots_are_independent() {
        let registry = PostRegistry::new();
        registry.register(multi(2, dec!(5), 5));
        let id = PostId(2);

        registry
            .claim(id, Some(SlotNumber(3)), UserId(1), at(1))
            .await
            .unwrap();
        let b = registry
            .claim(id, Some(SlotNumber(3)), UserId(2), at(2))
            .await
            .unwrap();
        assert_eq!(
            b,
            ClaimOutcome::Waitlisted {
                slot: SlotNumber(3),
                position: 1
            }
        );

        // Slot 1 is untouched by slot 3's queue
        let b1 = registry
            .claim(id, Some(SlotNumber(1)), UserId(2), at(3))
            .await
            .unwrap();
        assert!(matches!(b1, ClaimOutcome::Claimed { .. }));
        assert_eq!(counts(&registry, id).await, (2, 3));
    }

    #[tokio::test]
    async fn multi_claim_requires_a_slot_number() {
        let registry = PostRegistry::new();
        registry.register(multi(3, dec!(5), 3));

        let err = registry
            .claim(PostId(3), None, UserId(1), at(1))
            .await
            .unwrap_err();
        assert_eq!(err, NegotiationError::SlotRequired);

        let err = registry
            .claim(PostId(3), Some(SlotNumber(4)), UserId(1), at(1))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            NegotiationError::SlotOutOfRange {
                slot: SlotNumber(4),
                total: 3
            }
        );
    }

    #[tokio::test]
    async fn concurrent_claims_elect_exactly_one_owner() {
        let registry = Arc::new(PostRegistry::new());
        registry.register(single(4, dec!(10), 1));

        let mut handles = Vec::new();
        for uid in 1..=8i64 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry
                    .claim(PostId(4), None, UserId(uid), Utc::now())
                    .await
            }));
        }

        let mut claimed = 0;
        let mut queued = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                ClaimOutcome::Claimed { .. } => claimed += 1,
                ClaimOutcome::Waitlisted { .. } | ClaimOutcome::AlreadyWaitlisted { .. } => {
                    queued += 1
                }
            }
        }
        assert_eq!(claimed, 1);
        assert_eq!(queued, 7);
        assert_eq!(counts(&registry, PostId(4)).await, (1, 0));
    }

    #[tokio::test]
    async fn accepted_offer_reprices_remaining_capacity() {
        let registry = PostRegistry::new();
        registry.register(single(5, dec!(10), 3));
        let id = PostId(5);

        registry
            .place_offer(id, None, UserId(1), dec!(8), at(1))
            .await
            .unwrap();
        let sale = registry.accept_highest(id, None, at(2)).await.unwrap();
        assert_eq!(sale.buyer, UserId(1));
        assert_eq!(sale.price, dec!(8));
        assert_eq!(sale.origin, ClaimOrigin::OfferAccepted);
        assert_eq!(sale.remaining, 2);

        // The rest of the pool now sells at the negotiated price
        let c = registry.claim(id, None, UserId(2), at(3)).await.unwrap();
        assert!(matches!(c, ClaimOutcome::Claimed { price: Some(p), .. } if p == dec!(8)));
        assert_eq!(counts(&registry, id).await, (2, 1));
    }

    #[tokio::test]
    async fn counter_flow_settles_at_counter_price() {
        let registry = PostRegistry::new();
        registry.register(single(6, dec!(10), 1));
        let id = PostId(6);

        registry
            .place_offer(id, None, UserId(1), dec!(8), at(1))
            .await
            .unwrap();
        let counter = registry.counter_offer(id, None, dec!(9)).await.unwrap();
        assert_eq!(counter.target, UserId(1));

        // Only the countered user can take it
        let err = registry
            .take_counter(id, None, UserId(2), at(2))
            .await
            .unwrap_err();
        assert_eq!(err, NegotiationError::NoCounterForUser);

        let sale = registry
            .take_counter(id, None, UserId(1), at(3))
            .await
            .unwrap();
        assert_eq!(sale.price, dec!(9));
        assert_eq!(sale.origin, ClaimOrigin::CounterAccepted);
        assert_eq!(sale.remaining, 0);

        // Settled through negotiation; claims are rejected outright
        let err = registry.claim(id, None, UserId(3), at(4)).await.unwrap_err();
        assert_eq!(err, NegotiationError::SoldOut);
    }

    #[tokio::test]
    async fn negotiated_multi_slot_is_terminal() {
        let registry = PostRegistry::new();
        registry.register(multi(7, dec!(10), 2));
        let id = PostId(7);

        registry
            .place_offer(id, Some(SlotNumber(2)), UserId(1), dec!(7), at(1))
            .await
            .unwrap();
        let sale = registry
            .accept_highest(id, Some(SlotNumber(2)), at(2))
            .await
            .unwrap();
        assert_eq!(sale.slot, SlotNumber(2));

        let err = registry
            .claim(id, Some(SlotNumber(2)), UserId(3), at(3))
            .await
            .unwrap_err();
        assert_eq!(err, NegotiationError::SoldOut);
        let err = registry
            .unclaim(id, Some(SlotNumber(2)), UserId(1), at(4))
            .await
            .unwrap_err();
        assert_eq!(err, NegotiationError::SlotSettled);

        // Slot 1 still sells normally at list price
        let c = registry
            .claim(id, Some(SlotNumber(1)), UserId(3), at(5))
            .await
            .unwrap();
        assert!(matches!(c, ClaimOutcome::Claimed { price: Some(p), .. } if p == dec!(10)));
    }

    #[tokio::test]
    async fn plain_claim_voids_open_offers() {
        let registry = PostRegistry::new();
        registry.register(single(8, dec!(10), 1));
        let id = PostId(8);

        registry
            .place_offer(id, None, UserId(1), dec!(8), at(1))
            .await
            .unwrap();
        registry
            .place_offer(id, None, UserId(2), dec!(9), at(2))
            .await
            .unwrap();

        let outcome = registry.claim(id, None, UserId(3), at(3)).await.unwrap();
        let ClaimOutcome::Claimed {
            mut cleared_offerers,
            ..
        } = outcome
        else {
            panic!("expected a claim");
        };
        cleared_offerers.sort();
        assert_eq!(cleared_offerers, vec![UserId(1), UserId(2)]);
    }

    #[tokio::test]
    async fn offer_on_claimed_multi_slot_redirects_to_waitlist() {
        let registry = PostRegistry::new();
        registry.register(multi(9, dec!(10), 2));
        let id = PostId(9);

        registry
            .claim(id, Some(SlotNumber(1)), UserId(1), at(1))
            .await
            .unwrap();
        let err = registry
            .place_offer(id, Some(SlotNumber(1)), UserId(2), dec!(12), at(2))
            .await
            .unwrap_err();
        assert_eq!(err, NegotiationError::SlotTaken);
    }

    #[tokio::test]
    async fn offer_at_list_price_is_redirected_to_claim() {
        let registry = PostRegistry::new();
        registry.register(single(10, dec!(10), 1));

        let err = registry
            .place_offer(PostId(10), None, UserId(1), dec!(10), at(1))
            .await
            .unwrap_err();
        assert_eq!(err, NegotiationError::OfferAtListPrice);
    }

    #[tokio::test]
    async fn purge_user_releases_claims_and_transfers() {
        let registry = PostRegistry::new();
        registry.register(single(11, dec!(10), 1));
        registry.register(multi(12, dec!(5), 2));

        registry
            .claim(PostId(11), None, UserId(1), at(1))
            .await
            .unwrap();
        registry
            .claim(PostId(11), None, UserId(2), at(2))
            .await
            .unwrap(); // waitlisted
        registry
            .claim(PostId(12), Some(SlotNumber(1)), UserId(1), at(3))
            .await
            .unwrap();

        let touched = registry.purge_user(UserId(1), at(4)).await;
        assert_eq!(touched.len(), 2);

        let on_single = touched
            .iter()
            .find(|t| t.post_id == PostId(11))
            .unwrap();
        assert_eq!(on_single.releases[0].transferred_to, Some(UserId(2)));
        assert_eq!(on_single.releases[0].sold_delta, 0);

        let on_multi = touched.iter().find(|t| t.post_id == PostId(12)).unwrap();
        assert_eq!(on_multi.releases[0].transferred_to, None);
        assert_eq!(on_multi.releases[0].sold_delta, -1);
        assert_eq!(counts(&registry, PostId(12)).await, (0, 2));
    }

    #[tokio::test]
    async fn purge_user_skips_settled_claims_but_frees_the_rest() {
        let registry = PostRegistry::new();
        registry.register(single(15, dec!(10), 2));
        let id = PostId(15);

        // A plain claim first, then a negotiated sale on the same pool.
        // The sale is the newer claim and cannot be released.
        registry.claim(id, None, UserId(1), at(1)).await.unwrap();
        registry
            .place_offer(id, None, UserId(1), dec!(8), at(2))
            .await
            .unwrap();
        registry.counter_offer(id, None, dec!(9)).await.unwrap();
        registry.take_counter(id, None, UserId(1), at(3)).await.unwrap();
        assert_eq!(counts(&registry, id).await, (2, 0));

        let touched = registry.purge_user(UserId(1), at(4)).await;
        assert_eq!(touched.len(), 1);
        assert_eq!(touched[0].releases.len(), 1);
        assert_eq!(touched[0].releases[0].price, Some(dec!(10)));
        assert_eq!(touched[0].releases[0].sold_delta, -1);

        // The negotiated unit stays sold; the freed unit sells again at
        // the negotiated price
        assert_eq!(counts(&registry, id).await, (1, 1));
        let c = registry.claim(id, None, UserId(2), at(5)).await.unwrap();
        assert!(matches!(c, ClaimOutcome::Claimed { price: Some(p), .. } if p == dec!(9)));
    }

    #[tokio::test]
    async fn reset_all_snapshots_before_clearing() {
        let registry = PostRegistry::new();
        registry.register(single(13, dec!(10), 2));
        registry
            .claim(PostId(13), None, UserId(1), at(1))
            .await
            .unwrap();
        registry
            .claim(PostId(13), None, UserId(2), at(2))
            .await
            .unwrap();

        let stats = registry.reset_all().await;
        assert_eq!(stats.posts, 1);
        assert_eq!(stats.claims, 2);
        assert_eq!(stats.total_value, dec!(20));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn claims_on_auctions_are_redirected_to_bidding() {
        let registry = PostRegistry::new();
        registry.register(post(
            14,
            PostMode::Auction {
                starting_bid: Some(dec!(50)),
                display_end: at(86_400),
                anti_snipe: false,
            },
        ));

        let err = registry
            .claim(PostId(14), None, UserId(1), at(1))
            .await
            .unwrap_err();
        assert_eq!(err, NegotiationError::AuctionPost);
    }
}
