//! Inbound event routing
//!
//! Turns chat traffic into negotiation operations:
//! ```text
//! InboundEvent
//!     │
//!     ├─ reply to a tracked post ──> Command::parse ──> registry / auctions
//!     │
//!     └─ fresh message ──┬─ admin command ──> admin handlers
//!                        ├─ "confirm"     ──> account confirmation
//!                        └─ classifier    ──> register + ledger + timers
//! ```
//!
//! Every user-facing failure collapses into one reply carrying the
//! [`CommandError`] message; replies that parse as nothing are ignored
//! so ordinary chatter under a post stays silent.

pub mod admin;

use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use regex::Regex;
use rust_decimal::Decimal;

use shared::{
    ClaimOrigin, ClaimRecord, CommandError, InboundEvent, Notification, PaymentStatus, Post,
    PostId, SlotNumber, UserId,
};

use crate::accounts::AccountRegistry;
use crate::auction::AuctionEngine;
use crate::claims::{ClaimOutcome, PostRegistry, SaleOutcome};
use crate::classifier;
use crate::core::Config;
use crate::ledger_sync::{LedgerOp, LedgerSync};
use crate::timers::{Purpose, TimerKey, TimerService};
use crate::transport::{ChatTransport, Outbox};

pub use admin::AdminCommand;

// ============ Command grammar ============

static CLAIM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^claims?(?:\s+(\d{1,3}))?\s*!*$").unwrap());
static UNCLAIM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^unclaims?(?:\s+(\d{1,3}))?\s*$").unwrap());
static OFFER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^offer(?:\s+(\d{1,3})\s+at)?\s+\$?(\d+(?:\.\d{1,2})?)\s*$").unwrap()
});
static COUNTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^co(?:\s+(\d{1,3})\s+at)?\s+\$?(\d+(?:\.\d{1,2})?)\s*$").unwrap()
});
static TAKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^take(?:\s+(\d{1,3}))?\s*$").unwrap());
static ACCEPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:yours|urs)(?:\s+(\d{1,3}))?\s*!*$").unwrap());
static RESERVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^rp\s+not\s+met\s*$").unwrap());
static BARE_AMOUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$?(\d+(?:\.\d{1,2})?)$").unwrap());

/// A parsed reply-command against one post
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Claim(Option<SlotNumber>),
    Unclaim(Option<SlotNumber>),
    Offer {
        slot: Option<SlotNumber>,
        amount: Decimal,
    },
    /// Seller counters the highest offer (admin)
    Counter {
        slot: Option<SlotNumber>,
        amount: Decimal,
    },
    /// Countered buyer accepts the seller's price
    Take(Option<SlotNumber>),
    /// Seller accepts the highest offer, or confirms an auction (admin)
    AcceptHighest(Option<SlotNumber>),
    /// Seller declines the final auction bid (admin)
    ReserveNotMet,
    /// Bare amount under an auction post
    Bid(Decimal),
}

impl Command {
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Some(caps) = CLAIM.captures(text) {
            return Some(Command::Claim(slot_arg(&caps, 1)));
        }
        if let Some(caps) = UNCLAIM.captures(text) {
            return Some(Command::Unclaim(slot_arg(&caps, 1)));
        }
        if let Some(caps) = OFFER.captures(text) {
            return Some(Command::Offer {
                slot: slot_arg(&caps, 1),
                amount: amount_arg(&caps, 2)?,
            });
        }
        if let Some(caps) = COUNTER.captures(text) {
            return Some(Command::Counter {
                slot: slot_arg(&caps, 1),
                amount: amount_arg(&caps, 2)?,
            });
        }
        if let Some(caps) = TAKE.captures(text) {
            return Some(Command::Take(slot_arg(&caps, 1)));
        }
        if let Some(caps) = ACCEPT.captures(text) {
            return Some(Command::AcceptHighest(slot_arg(&caps, 1)));
        }
        if RESERVE.is_match(text) {
            return Some(Command::ReserveNotMet);
        }
        if let Some(caps) = BARE_AMOUNT.captures(text) {
            return Some(Command::Bid(amount_arg(&caps, 1)?));
        }
        None
    }

    fn needs_admin(&self) -> bool {
        matches!(
            self,
            Command::Counter { .. } | Command::AcceptHighest(_) | Command::ReserveNotMet
        )
    }
}

fn slot_arg(caps: &regex::Captures<'_>, group: usize) -> Option<SlotNumber> {
    caps.get(group)
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .map(SlotNumber)
}

fn amount_arg(caps: &regex::Captures<'_>, group: usize) -> Option<Decimal> {
    caps.get(group).and_then(|m| m.as_str().parse().ok())
}

// ============ Router ============

pub struct Router {
    config: Config,
    registry: Arc<PostRegistry>,
    accounts: Arc<AccountRegistry>,
    auctions: Arc<AuctionEngine>,
    ledger: Arc<LedgerSync>,
    timers: Arc<TimerService>,
    outbox: Outbox,
    transport: Arc<dyn ChatTransport>,
}

impl Router {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        registry: Arc<PostRegistry>,
        accounts: Arc<AccountRegistry>,
        auctions: Arc<AuctionEngine>,
        ledger: Arc<LedgerSync>,
        timers: Arc<TimerService>,
        outbox: Outbox,
        transport: Arc<dyn ChatTransport>,
    ) -> Self {
        Self {
            config,
            registry,
            accounts,
            auctions,
            ledger,
            timers,
            outbox,
            transport,
        }
    }

    /// Entry point for every chat event. Never returns an error; every
    /// failure ends as a reply or a log line.
    pub async fn handle_event(&self, event: InboundEvent) {
        self.accounts
            .note_identity(event.user_id, event.username.as_deref());
        let admin = self.is_admin(&event);

        match event.reply_to {
            Some(target) => {
                let post_id = PostId(target.0);
                if !self.registry.contains(post_id) {
                    // Reply to something we never tracked; not ours to answer
                    return;
                }
                if let Err(err) = self.dispatch(&event, post_id, admin).await {
                    self.reply(&event, err.message);
                }
            }
            None => {
                if admin && let Some(cmd) = AdminCommand::parse(&event.text) {
                    self.handle_admin(&event, cmd).await;
                } else if event.text.trim().eq_ignore_ascii_case("confirm") {
                    self.handle_confirm(&event);
                } else {
                    self.handle_new_post(&event).await;
                }
            }
        }
    }

    fn is_admin(&self, event: &InboundEvent) -> bool {
        event.via_channel || self.config.is_admin(event.user_id)
    }

    fn reply(&self, event: &InboundEvent, text: impl Into<String>) {
        self.outbox
            .send(Notification::reply(event.chat_id, event.message_id, text));
    }

    // ============ New posts ============

    async fn handle_new_post(&self, event: &InboundEvent) {
        let now = Utc::now();
        let classified =
            match classifier::classify(&event.text, now, self.config.auction_default_hours) {
                Ok(Some(classified)) => classified,
                Ok(None) => return,
                Err(e) => {
                    let err: CommandError = e.into();
                    self.reply(event, err.message);
                    return;
                }
            };

        let post = Post {
            id: PostId(event.message_id.0),
            chat_id: event.chat_id,
            message_id: event.message_id,
            author: Some(event.user_id),
            item_name: classified.item_name,
            mode: classified.mode,
            created_at: now,
        };
        self.track_post(post, now).await;
    }

    /// Register a classified post, create its ledger row and, for
    /// auctions, open bidding. Shared by ingestion and recover-post.
    pub(crate) async fn track_post(&self, post: Post, now: DateTime<Utc>) {
        if !self.registry.register(post.clone()) {
            tracing::warn!(post = %post.id, "Post already registered, skipping");
            return;
        }
        self.ledger.push(
            post.id,
            LedgerOp::Append {
                item_name: post.item_name.clone(),
                price: post.mode.asking_price(),
                total: post.mode.unit_count(),
            },
        );
        tracing::info!(post = %post.id, item = %post.item_name, "Tracking new post");

        if post.mode.is_auction() {
            self.auctions.setup(&post, now).await;
        } else {
            let units = post.mode.unit_count();
            let line = match post.mode.asking_price() {
                Some(price) => format!(
                    "Now tracking {}: {units} available at ${price}. Reply 'claim' to take one.",
                    post.item_name
                ),
                None => format!(
                    "Now tracking {}: {units} available. Reply 'claim' to take one.",
                    post.item_name
                ),
            };
            self.outbox
                .send(Notification::reply(post.chat_id, post.message_id, line));
        }
    }

    // ============ Reply commands ============

    async fn dispatch(
        &self,
        event: &InboundEvent,
        post_id: PostId,
        admin: bool,
    ) -> Result<(), CommandError> {
        let Some(cmd) = Command::parse(&event.text) else {
            // Chatter under a post
            return Ok(());
        };
        if cmd.needs_admin() && !admin {
            // Unauthorized seller commands fail silently
            tracing::debug!(user = %event.user_id, post = %post_id, "Ignoring non-admin seller command");
            return Ok(());
        }

        let post = self
            .registry
            .post(post_id)
            .await
            .ok_or_else(|| CommandError::not_found("That post is no longer tracked."))?;
        let user = event.user_id;
        let now = Utc::now();

        match cmd {
            Command::Claim(slot) => {
                match self.registry.claim(post_id, slot, user, now).await? {
                    ClaimOutcome::Claimed {
                        slot,
                        price,
                        cleared_offerers,
                    } => {
                        self.accounts.add_claim(
                            user,
                            ClaimRecord {
                                post_id,
                                slot,
                                user_id: user,
                                price,
                                origin: ClaimOrigin::Direct,
                                claimed_at: now,
                            },
                        );
                        self.ledger.push(post_id, LedgerOp::QuantityDelta(1));
                        self.schedule_payment_reminder(user);
                        self.notify_offers_cleared(&post, &cleared_offerers);
                        let line = match price {
                            Some(p) => {
                                format!("Claimed{}! ${p} for {}.", slot_label(&post, slot), post.item_name)
                            }
                            None => format!("Claimed{}!", slot_label(&post, slot)),
                        };
                        self.reply(event, line);
                    }
                    ClaimOutcome::Waitlisted { slot, position } => {
                        self.reply(
                            event,
                            format!(
                                "Already claimed{}. You're #{position} on the waitlist.",
                                slot_label(&post, slot)
                            ),
                        );
                    }
                    ClaimOutcome::AlreadyWaitlisted { slot, position } => {
                        self.reply(
                            event,
                            format!(
                                "You're already #{position} on the waitlist{}.",
                                slot_label(&post, slot)
                            ),
                        );
                    }
                }
            }
            Command::Unclaim(slot) => {
                let release = self.registry.unclaim(post_id, slot, user, now).await?;
                if self
                    .accounts
                    .remove_claim(user, post_id, release.slot)
                    .is_none()
                {
                    tracing::debug!(user = %user, post = %post_id, "Released a claim with no account record");
                }
                if let Some(next) = release.transferred_to {
                    self.accounts.add_claim(
                        next,
                        ClaimRecord {
                            post_id,
                            slot: release.slot,
                            user_id: next,
                            price: release.price,
                            origin: ClaimOrigin::Waitlist,
                            claimed_at: now,
                        },
                    );
                    self.schedule_payment_reminder(next);
                    let price_part = release
                        .price
                        .map(|p| format!(" at ${p}"))
                        .unwrap_or_default();
                    self.outbox.send_with_fallback(
                        Notification::direct(
                            next,
                            format!(
                                "You're up! {}{} is now yours{price_part}.",
                                post.item_name,
                                slot_label(&post, release.slot)
                            ),
                        ),
                        Notification::reply(
                            post.chat_id,
                            post.message_id,
                            format!(
                                "@{next} the waitlist came through: {}{} is yours{price_part}.",
                                post.item_name,
                                slot_label(&post, release.slot)
                            ),
                        ),
                    );
                    self.reply(event, "Released. The next in line takes it over.");
                } else {
                    if release.sold_delta != 0 {
                        self.ledger
                            .push(post_id, LedgerOp::QuantityDelta(release.sold_delta));
                    }
                    self.reply(event, "Released.");
                }
            }
            Command::Offer { slot, amount } => {
                let placed = self
                    .registry
                    .place_offer(post_id, slot, user, amount, now)
                    .await?;
                if let Some(displaced) = placed.displaced {
                    self.outbox.send_with_fallback(
                        Notification::direct(
                            displaced,
                            format!(
                                "Your offer on {} was topped; the highest is now ${amount}.",
                                post.item_name
                            ),
                        ),
                        Notification::reply(
                            post.chat_id,
                            post.message_id,
                            format!("@{displaced} your offer was topped at ${amount}."),
                        ),
                    );
                }
                let line = if placed.is_highest {
                    format!("Offer of ${amount} noted. You're the highest offer.")
                } else {
                    format!("Offer of ${amount} noted.")
                };
                self.reply(event, line);
            }
            Command::Counter { slot, amount } => {
                let counter = self.registry.counter_offer(post_id, slot, amount).await?;
                self.outbox.send_with_fallback(
                    Notification::direct(
                        counter.target,
                        format!(
                            "The seller counters at ${} on {}. Reply 'take' under the post to accept.",
                            counter.amount, post.item_name
                        ),
                    ),
                    Notification::reply(
                        post.chat_id,
                        post.message_id,
                        format!(
                            "@{} the seller counters at ${}. Reply 'take' to accept.",
                            counter.target, counter.amount
                        ),
                    ),
                );
                self.reply(event, format!("Counter of ${} sent.", counter.amount));
            }
            Command::Take(slot) => {
                let sale = self.registry.take_counter(post_id, slot, user, now).await?;
                self.finalize_sale(event, &post, sale, now);
            }
            Command::AcceptHighest(slot) => {
                if post.mode.is_auction() {
                    let sale = self.auctions.confirm_won(post_id, now).await?;
                    self.schedule_payment_reminder(sale.winner);
                    self.reply(
                        event,
                        format!(
                            "Sold! {} goes to @{} at ${}.",
                            sale.item_name, sale.winner, sale.amount
                        ),
                    );
                } else {
                    let sale = self.registry.accept_highest(post_id, slot, now).await?;
                    self.finalize_sale(event, &post, sale, now);
                }
            }
            Command::ReserveNotMet => {
                let outcome = self.auctions.reserve_not_met(post_id).await?;
                let line = match outcome.highest {
                    Some((_, amount)) => format!(
                        "Reserve not met on {}; the final bid of ${amount} is on record.",
                        outcome.item_name
                    ),
                    None => format!("Reserve not met on {}; no bids came in.", outcome.item_name),
                };
                self.reply(event, line);
            }
            Command::Bid(amount) => {
                self.auctions.bid(post_id, user, amount, now).await?;
                self.reply(
                    event,
                    format!("Bid of ${amount} recorded. You're the highest bidder!"),
                );
            }
        }
        Ok(())
    }

    /// Book a negotiated sale: account, ledger, payment clock, releases
    fn finalize_sale(
        &self,
        event: &InboundEvent,
        post: &Post,
        sale: SaleOutcome,
        now: DateTime<Utc>,
    ) {
        self.accounts.add_claim(
            sale.buyer,
            ClaimRecord {
                post_id: post.id,
                slot: sale.slot,
                user_id: sale.buyer,
                price: Some(sale.price),
                origin: sale.origin,
                claimed_at: now,
            },
        );
        self.ledger.push(post.id, LedgerOp::QuantityDelta(1));
        self.ledger.push(post.id, LedgerOp::Price(sale.price));
        self.schedule_payment_reminder(sale.buyer);

        self.notify_offers_cleared(post, &sale.cleared_offerers);
        for user in &sale.cleared_waitlist {
            self.outbox.send(Notification::direct(
                *user,
                format!(
                    "{} has sold out; you've been released from its waitlist.",
                    post.item_name
                ),
            ));
        }

        let mut line = format!(
            "Sold! {}{} to @{} at ${}.",
            sale.item_name,
            slot_label(post, sale.slot),
            sale.buyer,
            sale.price
        );
        if sale.remaining > 0 {
            line.push_str(&format!(
                " {} more available at ${}.",
                sale.remaining, sale.price
            ));
        }
        self.reply(event, line);
    }

    fn notify_offers_cleared(&self, post: &Post, offerers: &[UserId]) {
        for user in offerers {
            self.outbox.send(Notification::direct(
                *user,
                format!(
                    "Your offer on {} lapsed; the item went another way.",
                    post.item_name
                ),
            ));
        }
    }

    /// Start the payment clock for a buyer; a later sale pushes it back
    fn schedule_payment_reminder(&self, user: UserId) {
        let accounts = Arc::clone(&self.accounts);
        let outbox = self.outbox.clone();
        let delay = StdDuration::from_secs(self.config.payment_reminder_hours as u64 * 3600);
        self.timers.schedule_once(
            TimerKey::User(user),
            Purpose::PaymentReminder,
            delay,
            async move {
                let unpaid = accounts.snapshot(user).is_some_and(|s| {
                    !s.claims.is_empty() && s.payment_status != Some(PaymentStatus::Paid)
                });
                if unpaid {
                    let owed = accounts.total_owed(user);
                    outbox.send(Notification::direct(
                        user,
                        format!(
                            "Friendly reminder: ${owed} outstanding on your claims. Send 'confirm' in the channel to lock in your haul."
                        ),
                    ));
                }
            },
        );
    }

    // ============ Account confirmation ============

    fn handle_confirm(&self, event: &InboundEvent) {
        match self.accounts.confirm(event.user_id, Utc::now()) {
            Some(snapshot) => {
                let total = snapshot.total_owed();
                let count = snapshot.claims.len();
                self.outbox.send_with_fallback(
                    Notification::direct(
                        event.user_id,
                        format!(
                            "Confirmed: {count} item{} for ${total}. Payment details follow.",
                            if count == 1 { "" } else { "s" }
                        ),
                    ),
                    Notification::reply(
                        event.chat_id,
                        event.message_id,
                        format!("@{} confirmed: {count} item(s) for ${total}.", event.user_id),
                    ),
                );
                self.reply(event, "Confirmed! Check your messages for the invoice.");
            }
            None => {
                self.reply(event, "Nothing to confirm yet; claim something first.");
            }
        }
    }
}

fn slot_label(post: &Post, slot: SlotNumber) -> String {
    if post.mode.slot_count() > 1 {
        format!(" slot {slot}")
    } else {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use shared::{ChatId, MessageId};

    use crate::ledger_sync::MemoryLedgerStore;
    use crate::transport::{MemoryTransport, OutboundItem};

    struct Harness {
        router: Router,
        accounts: Arc<AccountRegistry>,
        registry: Arc<PostRegistry>,
        store: Arc<MemoryLedgerStore>,
        rx: mpsc::Receiver<OutboundItem>,
    }

    fn harness() -> Harness {
        let config = Config::with_admins([900]);
        let registry = Arc::new(PostRegistry::new());
        let accounts = Arc::new(AccountRegistry::new());
        let timers = Arc::new(TimerService::new());
        let store = Arc::new(MemoryLedgerStore::new());
        let ledger = Arc::new(LedgerSync::new(store.clone(), CancellationToken::new()));
        let (outbox, rx) = Outbox::new(256);
        let auctions = Arc::new(AuctionEngine::new(
            registry.clone(),
            timers.clone(),
            accounts.clone(),
            ledger.clone(),
            outbox.clone(),
            &config,
        ));
        let transport = Arc::new(MemoryTransport::new());
        let router = Router::new(
            config,
            registry.clone(),
            accounts.clone(),
            auctions,
            ledger,
            timers,
            outbox,
            transport,
        );
        Harness {
            router,
            accounts,
            registry,
            store,
            rx,
        }
    }

    fn event(user: i64, message_id: i64, text: &str, reply_to: Option<i64>) -> InboundEvent {
        InboundEvent {
            chat_id: ChatId(1),
            message_id: MessageId(message_id),
            user_id: UserId(user),
            username: Some(format!("user{user}")),
            text: text.to_string(),
            reply_to: reply_to.map(MessageId),
            via_channel: false,
        }
    }

    fn replies(rx: &mut mpsc::Receiver<OutboundItem>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            if let Notification::Reply { text, .. } = item.note {
                out.push(text);
            }
        }
        out
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    // ============ Parsing ============

    #[test]
    fn commands_parse() {
        assert_eq!(Command::parse("claim"), Some(Command::Claim(None)));
        assert_eq!(Command::parse("Claim 3"), Some(Command::Claim(Some(SlotNumber(3)))));
        assert_eq!(Command::parse("claim!"), Some(Command::Claim(None)));
        assert_eq!(Command::parse("unclaim 2"), Some(Command::Unclaim(Some(SlotNumber(2)))));
        assert_eq!(
            Command::parse("offer 12.50"),
            Some(Command::Offer {
                slot: None,
                amount: dec!(12.50)
            })
        );
        assert_eq!(
            Command::parse("offer 3 at $15"),
            Some(Command::Offer {
                slot: Some(SlotNumber(3)),
                amount: dec!(15)
            })
        );
        assert_eq!(
            Command::parse("co 2 at 18"),
            Some(Command::Counter {
                slot: Some(SlotNumber(2)),
                amount: dec!(18)
            })
        );
        assert_eq!(Command::parse("take"), Some(Command::Take(None)));
        assert_eq!(Command::parse("yours"), Some(Command::AcceptHighest(None)));
        assert_eq!(Command::parse("URS 4"), Some(Command::AcceptHighest(Some(SlotNumber(4)))));
        assert_eq!(Command::parse("rp not met"), Some(Command::ReserveNotMet));
        assert_eq!(Command::parse("$42"), Some(Command::Bid(dec!(42))));
        assert_eq!(Command::parse("42.5"), Some(Command::Bid(dec!(42.5))));
        assert_eq!(Command::parse("nice lamp!"), None);
        assert_eq!(Command::parse("offer"), None);
    }

    // ============ End-to-end dispatch ============

    #[tokio::test]
    async fn posting_then_claiming_updates_account_and_ledger() {
        let mut h = harness();

        h.router
            .handle_event(event(10, 100, "For sale: enamel pin $12.50", None))
            .await;
        settle().await;
        assert!(h.registry.contains(PostId(100)));
        assert_eq!(h.store.rows().len(), 1);

        h.router.handle_event(event(20, 101, "claim", Some(100))).await;
        settle().await;

        let snapshot = h.accounts.snapshot(UserId(20)).unwrap();
        assert_eq!(snapshot.claims.len(), 1);
        assert_eq!(snapshot.claims[0].price, Some(dec!(12.50)));

        let texts = replies(&mut h.rx);
        assert!(texts.iter().any(|t| t.contains("Now tracking")));
        assert!(texts.iter().any(|t| t.contains("Claimed")));

        let updates = h.store.updates();
        assert!(updates.iter().any(|(_, col, v)| col.name() == "sold" && v == "1"));
    }

    #[tokio::test]
    async fn second_claim_waitlists_and_unclaim_transfers() {
        let mut h = harness();
        h.router
            .handle_event(event(10, 100, "For sale: enamel pin $12.50", None))
            .await;
        h.router.handle_event(event(20, 101, "claim", Some(100))).await;
        h.router.handle_event(event(21, 102, "claim", Some(100))).await;
        settle().await;
        let texts = replies(&mut h.rx);
        assert!(texts.iter().any(|t| t.contains("#1 on the waitlist")));

        h.router.handle_event(event(20, 103, "unclaim", Some(100))).await;
        settle().await;

        // Ownership moved to the waitlist head at the same price
        assert!(h.accounts.snapshot(UserId(20)).unwrap().claims.is_empty());
        let next = h.accounts.snapshot(UserId(21)).unwrap();
        assert_eq!(next.claims.len(), 1);
        assert_eq!(next.claims[0].origin, ClaimOrigin::Waitlist);

        // A transfer is not an unsale; sold stayed at 1
        let updates = h.store.updates();
        assert!(!updates.iter().any(|(_, col, v)| col.name() == "sold" && v == "0"));
    }

    #[tokio::test]
    async fn offer_counter_take_settles_at_counter_price() {
        let mut h = harness();
        h.router
            .handle_event(event(10, 100, "For sale: enamel pin $20", None))
            .await;
        h.router
            .handle_event(event(30, 101, "offer 15", Some(100)))
            .await;
        // Admin counters, buyer takes
        let mut counter = event(900, 102, "co 18", Some(100));
        counter.via_channel = false;
        h.router.handle_event(counter).await;
        h.router.handle_event(event(30, 103, "take", Some(100))).await;
        settle().await;

        let snapshot = h.accounts.snapshot(UserId(30)).unwrap();
        assert_eq!(snapshot.claims.len(), 1);
        assert_eq!(snapshot.claims[0].price, Some(dec!(18)));
        assert_eq!(snapshot.claims[0].origin, ClaimOrigin::CounterAccepted);

        let updates = h.store.updates();
        assert!(updates.iter().any(|(_, col, v)| col.name() == "price" && v == "18"));
    }

    #[tokio::test]
    async fn seller_commands_from_non_admin_are_silently_dropped() {
        let mut h = harness();
        h.router
            .handle_event(event(10, 100, "For sale: enamel pin $20", None))
            .await;
        h.router
            .handle_event(event(30, 101, "offer 15", Some(100)))
            .await;
        settle().await;
        replies(&mut h.rx);

        // User 31 is not an admin; no reply, no counter recorded
        h.router.handle_event(event(31, 102, "co 18", Some(100))).await;
        settle().await;
        assert!(replies(&mut h.rx).is_empty());

        h.router.handle_event(event(30, 103, "take", Some(100))).await;
        settle().await;
        let texts = replies(&mut h.rx);
        assert!(texts.iter().any(|t| t.contains("No counter")));
    }

    #[tokio::test]
    async fn bids_are_guided_to_auctions_and_claims_away_from_them() {
        let mut h = harness();
        h.router
            .handle_event(event(10, 100, "For sale: enamel pin $20", None))
            .await;
        h.router
            .handle_event(event(11, 200, "Auction: signed print, bid from $30", None))
            .await;
        settle().await;
        replies(&mut h.rx);

        h.router.handle_event(event(30, 101, "25", Some(100))).await;
        h.router.handle_event(event(30, 102, "claim", Some(200))).await;
        settle().await;
        let texts = replies(&mut h.rx);
        assert!(texts.iter().any(|t| t.contains("not an auction")));
        assert!(texts.iter().any(|t| t.contains("auction")));

        h.router.handle_event(event(30, 103, "35", Some(200))).await;
        settle().await;
        let texts = replies(&mut h.rx);
        assert!(texts.iter().any(|t| t.contains("highest bidder")));
    }

    #[tokio::test]
    async fn chatter_under_a_post_is_ignored() {
        let mut h = harness();
        h.router
            .handle_event(event(10, 100, "For sale: enamel pin $20", None))
            .await;
        settle().await;
        replies(&mut h.rx);

        h.router
            .handle_event(event(30, 101, "gorgeous, love this one", Some(100)))
            .await;
        settle().await;
        assert!(replies(&mut h.rx).is_empty());
    }

    #[tokio::test]
    async fn confirm_locks_in_the_haul() {
        let mut h = harness();
        h.router
            .handle_event(event(10, 100, "For sale: enamel pin $20", None))
            .await;
        h.router.handle_event(event(30, 101, "claim", Some(100))).await;
        h.router.handle_event(event(30, 102, "confirm", None)).await;
        settle().await;

        let snapshot = h.accounts.snapshot(UserId(30)).unwrap();
        assert_eq!(snapshot.payment_status, Some(PaymentStatus::Pending));
        let texts = replies(&mut h.rx);
        assert!(texts.iter().any(|t| t.contains("Confirmed")));
    }
}
