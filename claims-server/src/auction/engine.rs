//! Auction orchestration
//!
//! Owns everything about an auction that is not pure bid arithmetic:
//! close timers, pre-close reminders, anti-snipe rescheduling, outbid
//! pings and the ledger pushes on resolution. All state mutation still
//! happens inside [`PostRegistry::with_entry`], so bids and timer
//! callbacks serialize on the same post lock.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use shared::{ClaimOrigin, ClaimRecord, Notification, Post, PostId, SlotNumber, UserId};

use crate::accounts::AccountRegistry;
use crate::claims::{Negotiation, NegotiationError, PostEntry, PostRegistry};
use crate::core::Config;
use crate::ledger_sync::{LedgerOp, LedgerSync};
use crate::timers::{Purpose, TimerKey, TimerService};
use crate::transport::Outbox;
use crate::utils::format_display_end;

use super::{AuctionPolicy, AuctionState, BidPlaced};

/// Fixed pre-close reminder offsets, in minutes before bidding closes
const REMINDER_OFFSETS_MIN: [u32; 3] = [30, 5, 1];

/// The periodic "still open" cycle starts this long after the auction
/// opens, then repeats at the configured period
const PERIODIC_FIRST_DELAY: StdDuration = StdDuration::from_secs(5 * 60);

/// A confirmed auction sale, ready for the public announcement
#[derive(Debug, Clone, PartialEq)]
pub struct AuctionSale {
    pub winner: UserId,
    pub amount: Decimal,
    pub item_name: String,
}

/// Outcome of declining the highest bid
#[derive(Debug, Clone, PartialEq)]
pub struct ReserveOutcome {
    pub highest: Option<(UserId, Decimal)>,
    pub item_name: String,
}

pub struct AuctionEngine {
    registry: Arc<PostRegistry>,
    timers: Arc<TimerService>,
    accounts: Arc<AccountRegistry>,
    ledger: Arc<LedgerSync>,
    outbox: Outbox,
    policy: AuctionPolicy,
    periodic_reminder: StdDuration,
}

impl AuctionEngine {
    pub fn new(
        registry: Arc<PostRegistry>,
        timers: Arc<TimerService>,
        accounts: Arc<AccountRegistry>,
        ledger: Arc<LedgerSync>,
        outbox: Outbox,
        config: &Config,
    ) -> Self {
        Self {
            registry,
            timers,
            accounts,
            ledger,
            outbox,
            policy: AuctionPolicy::from_config(config),
            periodic_reminder: StdDuration::from_secs(config.periodic_reminder_mins as u64 * 60),
        }
    }

    /// Open a freshly registered auction: re-derive the effective end
    /// from policy, announce the auction and install its timers.
    pub async fn setup(self: &Arc<Self>, post: &Post, now: DateTime<Utc>) {
        let grace = self.policy.grace;
        let derived = self
            .registry
            .with_entry(post.id, |entry| {
                auction_of(entry).map(|state| {
                    state.end_time = state.display_end + grace;
                    (state.display_end, state.end_time, state.starting_bid)
                })
            })
            .await;

        let (display_end, end_time, starting_bid) = match derived {
            Ok(Ok(ends)) => ends,
            Ok(Err(e)) | Err(e) => {
                tracing::warn!(post = %post.id, error = %e, "Auction setup skipped");
                return;
            }
        };

        let opening = match starting_bid {
            Some(start) => format!(
                "Auction open for {}! Starting bid ${start}. {}. Reply with an amount to bid.",
                post.item_name,
                format_display_end(display_end)
            ),
            None => format!(
                "Auction open for {}! {}. Reply with an amount to bid.",
                post.item_name,
                format_display_end(display_end)
            ),
        };
        self.outbox
            .send(Notification::reply(post.chat_id, post.message_id, opening));

        self.install_schedule(post.id, end_time, now);
    }

    /// Record a bid and carry out its side effects. The caller sends
    /// the bid confirmation; extensions and outbid pings go out here.
    pub async fn bid(
        self: &Arc<Self>,
        post_id: PostId,
        user: UserId,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<BidPlaced, NegotiationError> {
        let policy = self.policy;
        let (placed, post) = self
            .registry
            .with_entry(post_id, |entry| {
                let post = entry.post.clone();
                let state = auction_of(entry)?;
                let placed = state.place_bid(user, amount, now, &policy)?;
                Ok::<_, NegotiationError>((placed, post))
            })
            .await??;

        if let Some(displaced) = placed.outbid_notice {
            self.outbox.send_with_fallback(
                Notification::direct(
                    displaced,
                    format!(
                        "You've been outbid on {}. The highest bid is now ${amount}.",
                        post.item_name
                    ),
                ),
                Notification::reply(
                    post.chat_id,
                    post.message_id,
                    format!("@{displaced} you've been outbid! Highest is now ${amount}."),
                ),
            );
        }

        if let Some(ext) = placed.extension {
            let line = if ext.first {
                format!(
                    "Going once! Late bid extends the auction. {}.",
                    format_display_end(ext.new_display_end)
                )
            } else {
                format!(
                    "Another late bid! {}.",
                    format_display_end(ext.new_display_end)
                )
            };
            self.outbox
                .send(Notification::reply(post.chat_id, post.message_id, line));
            self.install_schedule(post_id, ext.new_end, now);
        }

        Ok(placed)
    }

    /// Seller confirms the sale to the highest bidder
    pub async fn confirm_won(
        &self,
        post_id: PostId,
        now: DateTime<Utc>,
    ) -> Result<AuctionSale, NegotiationError> {
        let (winner, amount, post) = self
            .registry
            .with_entry(post_id, |entry| {
                let post = entry.post.clone();
                let (winner, amount) = auction_of(entry)?.confirm_won()?;
                Ok::<_, NegotiationError>((winner, amount, post))
            })
            .await??;

        self.accounts.add_claim(
            winner,
            ClaimRecord {
                post_id,
                slot: SlotNumber::FIRST,
                user_id: winner,
                price: Some(amount),
                origin: ClaimOrigin::AuctionWon,
                claimed_at: now,
            },
        );
        self.ledger.push(post_id, LedgerOp::QuantityDelta(1));
        self.ledger.push(post_id, LedgerOp::Price(amount));

        self.outbox.send_with_fallback(
            Notification::direct(
                winner,
                format!("You won {} at ${amount}! The seller will be in touch.", post.item_name),
            ),
            Notification::reply(
                post.chat_id,
                post.message_id,
                format!("@{winner} you won {} at ${amount}!", post.item_name),
            ),
        );

        Ok(AuctionSale {
            winner,
            amount,
            item_name: post.item_name,
        })
    }

    /// Seller declines the highest bid. Nothing is sold; the final
    /// price still lands in the ledger for the record.
    pub async fn reserve_not_met(
        &self,
        post_id: PostId,
    ) -> Result<ReserveOutcome, NegotiationError> {
        let (highest, post) = self
            .registry
            .with_entry(post_id, |entry| {
                let post = entry.post.clone();
                let highest = auction_of(entry)?.confirm_reserve_not_met()?;
                Ok::<_, NegotiationError>((highest, post))
            })
            .await??;

        if let Some((bidder, amount)) = highest {
            self.ledger.push(post_id, LedgerOp::Price(amount));
            self.outbox.send_with_fallback(
                Notification::direct(
                    bidder,
                    format!(
                        "The reserve on {} wasn't met; your bid of ${amount} was not accepted.",
                        post.item_name
                    ),
                ),
                Notification::reply(
                    post.chat_id,
                    post.message_id,
                    format!("@{bidder} the reserve wasn't met at ${amount}."),
                ),
            );
        }

        Ok(ReserveOutcome {
            highest,
            item_name: post.item_name,
        })
    }

    // ============ Timer callbacks ============

    /// Close bidding; fired by the end timer
    async fn close(self: Arc<Self>, post_id: PostId) {
        let closed = self
            .registry
            .with_entry(post_id, |entry| {
                let post = entry.post.clone();
                let summary = auction_of(entry)?.end()?;
                Ok::<_, NegotiationError>((summary, post))
            })
            .await;

        let (summary, post) = match closed {
            Ok(Ok(closed)) => closed,
            // A stale timer that lost a reschedule race lands here
            Ok(Err(e)) | Err(e) => {
                tracing::debug!(post = %post_id, error = %e, "Auction close skipped");
                return;
            }
        };

        self.timers.cancel_all_for(TimerKey::Post(post_id));

        let line = match summary.highest {
            Some((leader, amount)) => format!(
                "Bidding closed for {}! Highest bid ${amount} by @{leader} ({} bid{}). Awaiting seller confirmation.",
                post.item_name,
                summary.bid_count,
                if summary.bid_count == 1 { "" } else { "s" }
            ),
            None => format!("Bidding closed for {} with no bids.", post.item_name),
        };
        self.outbox
            .send(Notification::reply(post.chat_id, post.message_id, line));
    }

    /// Post a pre-close or periodic reminder while bidding is open
    async fn remind(self: Arc<Self>, post_id: PostId, minutes_before: Option<u32>) {
        let snapshot = self
            .registry
            .with_entry(post_id, |entry| {
                let post = entry.post.clone();
                let state = auction_of(entry)?;
                if !state.active {
                    return Err(NegotiationError::AuctionInactive);
                }
                Ok((
                    post,
                    state.highest().map(|(u, b)| (u, b.amount)),
                    state.starting_bid,
                    state.display_end,
                ))
            })
            .await;

        let (post, highest, starting_bid, display_end) = match snapshot {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(_)) | Err(_) => return,
        };

        let lead = match (highest, starting_bid) {
            (Some((leader, amount)), _) => format!("Highest bid ${amount} by @{leader}."),
            (None, Some(start)) => format!("No bids yet, starting bid ${start}."),
            (None, None) => "No bids yet.".to_string(),
        };
        let line = match minutes_before {
            Some(minutes) => format!(
                "{minutes} minute{} left on {}! {lead}",
                if minutes == 1 { "" } else { "s" },
                post.item_name
            ),
            None => format!(
                "Auction still open for {}! {lead} {}.",
                post.item_name,
                format_display_end(display_end)
            ),
        };
        self.outbox
            .send(Notification::reply(post.chat_id, post.message_id, line));
    }

    /// (Re-)install the close timer and reminders. Named scheduling
    /// replaces the previous set, so extensions never leave stale timers.
    fn install_schedule(
        self: &Arc<Self>,
        post_id: PostId,
        end_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        let key = TimerKey::Post(post_id);

        let engine = Arc::clone(self);
        self.timers.schedule_once(
            key,
            Purpose::AuctionEnd,
            delay_until(end_time, now),
            async move { engine.close(post_id).await },
        );

        for minutes in REMINDER_OFFSETS_MIN {
            let fire_at = end_time - chrono::Duration::minutes(minutes as i64);
            if fire_at <= now {
                continue;
            }
            let engine = Arc::clone(self);
            self.timers.schedule_once(
                key,
                Purpose::AuctionReminder {
                    minutes_before: minutes,
                },
                delay_until(fire_at, now),
                async move { engine.remind(post_id, Some(minutes)).await },
            );
        }

        let engine = Arc::clone(self);
        self.timers.schedule_every(
            key,
            Purpose::PeriodicReminder,
            PERIODIC_FIRST_DELAY,
            self.periodic_reminder,
            move || {
                let engine = Arc::clone(&engine);
                async move { engine.remind(post_id, None).await }
            },
        );
    }
}

fn auction_of(entry: &mut PostEntry) -> Result<&mut AuctionState, NegotiationError> {
    match &mut entry.negotiation {
        Negotiation::Auction(state) => Ok(state),
        _ => Err(NegotiationError::NotAnAuction),
    }
}

fn delay_until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> StdDuration {
    (deadline - now).to_std().unwrap_or(StdDuration::ZERO)
}
