//! Administrative commands
//!
//! Plain-text commands accepted from admins (or the linked channel) in
//! non-reply messages: bulk resets, buyer lookup, payment bookkeeping
//! and recovery for posts the normal ingestion path missed. Anything
//! that doesn't parse here falls through to the classifier, so a bad
//! admin command is simply ignored like any other chatter.

use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration as StdDuration;

use chrono::Utc;
use regex::Regex;

use shared::{
    ClaimOrigin, ClaimRecord, CommandError, InboundEvent, MessageId, Notification, Post, PostId,
    ShippingMethod, UserId,
};

use crate::classifier;
use crate::ledger_sync::LedgerOp;
use crate::timers::{Purpose, TimerKey};

use super::Router;

static RESET_ALL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^reset\s+all$").unwrap());
static RESET_USER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^reset\s+user\s+(\d+)$").unwrap());
static FIND_USER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^find\s+(\S.*)$").unwrap());
static RECOVER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^recover\s+(\d+)$").unwrap());
static PAID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^paid\s+(\d+)$").unwrap());
static SHIPPING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^shipping\s+(\d+)\s+(mail|meetup|storage)$").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub enum AdminCommand {
    /// Clear every post and account, reporting pre-reset statistics
    ResetAll,
    /// Purge one buyer everywhere and clear their account
    ResetUser(UserId),
    /// Look buyers up by id or username fragment
    FindUser(String),
    /// Re-run classification for a post the ingestion path missed
    RecoverPost(PostId),
    /// Record a buyer's payment and start the post-payment clock
    MarkPaid(UserId),
    SetShipping(UserId, ShippingMethod),
}

impl AdminCommand {
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if RESET_ALL.is_match(text) {
            return Some(AdminCommand::ResetAll);
        }
        if let Some(caps) = RESET_USER.captures(text) {
            return Some(AdminCommand::ResetUser(UserId(caps[1].parse().ok()?)));
        }
        if let Some(caps) = RECOVER.captures(text) {
            return Some(AdminCommand::RecoverPost(PostId(caps[1].parse().ok()?)));
        }
        if let Some(caps) = PAID.captures(text) {
            return Some(AdminCommand::MarkPaid(UserId(caps[1].parse().ok()?)));
        }
        if let Some(caps) = SHIPPING.captures(text) {
            let user = UserId(caps[1].parse().ok()?);
            let method = match caps[2].to_lowercase().as_str() {
                "mail" => ShippingMethod::Mail,
                "meetup" => ShippingMethod::Meetup,
                _ => ShippingMethod::Storage,
            };
            return Some(AdminCommand::SetShipping(user, method));
        }
        if let Some(caps) = FIND_USER.captures(text) {
            return Some(AdminCommand::FindUser(caps[1].trim().to_string()));
        }
        None
    }
}

impl Router {
    pub(crate) async fn handle_admin(&self, event: &InboundEvent, cmd: AdminCommand) {
        match cmd {
            AdminCommand::ResetAll => self.admin_reset_all(event).await,
            AdminCommand::ResetUser(user) => self.admin_reset_user(event, user).await,
            AdminCommand::FindUser(query) => self.admin_find_user(event, &query),
            AdminCommand::RecoverPost(post_id) => self.admin_recover_post(event, post_id).await,
            AdminCommand::MarkPaid(user) => self.admin_mark_paid(event, user),
            AdminCommand::SetShipping(user, method) => {
                self.admin_set_shipping(event, user, method);
            }
        }
    }

    async fn admin_reset_all(&self, event: &InboundEvent) {
        let posts = self.registry.reset_all().await;
        let accounts = self.accounts.reset_all();
        // Auction closes and payment chasers for the cleared state must
        // not fire against the fresh one
        let timers = self.timers.cancel_all();
        tracing::info!(
            posts = posts.posts,
            claims = posts.claims,
            buyers = accounts.users,
            timers,
            "Full reset"
        );
        self.reply(
            event,
            format!(
                "Reset complete: {} posts cleared, {} claims by {} buyers worth ${}.",
                posts.posts, accounts.items, accounts.users, accounts.total_value
            ),
        );
    }

    async fn admin_reset_user(&self, event: &InboundEvent, user: UserId) {
        let now = Utc::now();
        let touched = self.registry.purge_user(user, now).await;
        for post in &touched {
            for release in &post.releases {
                if let Some(next) = release.transferred_to {
                    self.accounts.add_claim(
                        next,
                        ClaimRecord {
                            post_id: post.post_id,
                            slot: release.slot,
                            user_id: next,
                            price: release.price,
                            origin: ClaimOrigin::Waitlist,
                            claimed_at: now,
                        },
                    );
                    self.schedule_payment_reminder(next);
                    self.outbox.send(Notification::direct(
                        next,
                        "A slot freed up and the waitlist came through, it's yours now.",
                    ));
                } else if release.sold_delta != 0 {
                    self.ledger
                        .push(post.post_id, LedgerOp::QuantityDelta(release.sold_delta));
                }
            }
        }
        self.timers.cancel_all_for(TimerKey::User(user));
        let before = self.accounts.reset_user(user);
        let line = match before {
            Some(snapshot) => format!(
                "Reset @{user}: {} claim(s) worth ${} cleared, {} post(s) touched.",
                snapshot.claims.len(),
                snapshot.total_owed(),
                touched.len()
            ),
            None => format!("No account for {user}; negotiation state purged anyway."),
        };
        self.reply(event, line);
    }

    fn admin_find_user(&self, event: &InboundEvent, query: &str) {
        let matches = self.accounts.find(query);
        if matches.is_empty() {
            self.reply(event, format!("No buyers match '{query}'."));
            return;
        }
        let lines: Vec<String> = matches
            .iter()
            .take(5)
            .map(|m| {
                let name = m.username.as_deref().unwrap_or("?");
                format!(
                    "{} ({name}): {} item(s), ${}",
                    m.user_id,
                    m.claims.len(),
                    m.total_owed()
                )
            })
            .collect();
        self.reply(event, lines.join("\n"));
    }

    async fn admin_recover_post(&self, event: &InboundEvent, post_id: PostId) {
        if self.registry.contains(post_id) {
            self.reply(event, format!("Post {post_id} is already tracked."));
            return;
        }
        let message_id = MessageId(post_id.0);
        let text = match self
            .transport
            .fetch_message_text(event.chat_id, message_id)
            .await
        {
            Ok(Some(text)) => text,
            Ok(None) => {
                self.reply(event, format!("Message {post_id} not found in this chat."));
                return;
            }
            Err(e) => {
                tracing::warn!(post = %post_id, error = %e, "Recover lookup failed");
                self.reply(event, format!("Could not fetch message {post_id}."));
                return;
            }
        };

        let now = Utc::now();
        match classifier::classify(&text, now, self.config.auction_default_hours) {
            Ok(Some(classified)) => {
                let post = Post {
                    id: post_id,
                    chat_id: event.chat_id,
                    message_id,
                    author: None,
                    item_name: classified.item_name.clone(),
                    mode: classified.mode,
                    created_at: now,
                };
                self.track_post(post, now).await;
                self.reply(
                    event,
                    format!("Recovered post {post_id}: {}.", classified.item_name),
                );
            }
            Ok(None) => {
                self.reply(
                    event,
                    format!("Message {post_id} doesn't read as a sale post."),
                );
            }
            Err(e) => {
                let err: CommandError = e.into();
                self.reply(event, err.message);
            }
        }
    }

    fn admin_mark_paid(&self, event: &InboundEvent, user: UserId) {
        if !self.accounts.mark_paid(user) {
            self.reply(event, format!("@{user} has nothing pending."));
            return;
        }
        self.timers
            .cancel(TimerKey::User(user), Purpose::PaymentReminder);

        // Paid slates clear themselves a few hours later
        let accounts = Arc::clone(&self.accounts);
        let outbox = self.outbox.clone();
        let delay = StdDuration::from_secs(self.config.post_payment_reset_hours as u64 * 3600);
        self.timers.schedule_once(
            TimerKey::User(user),
            Purpose::PostPaymentReset,
            delay,
            async move {
                if accounts.reset_user(user).is_some() {
                    outbox.send(Notification::direct(
                        user,
                        "All settled, your slate is clear. Thanks for buying!",
                    ));
                }
            },
        );

        self.outbox.send(Notification::direct(
            user,
            "Payment received, thank you! Your claims are confirmed.",
        ));
        self.reply(event, format!("Marked @{user} as paid."));
    }

    fn admin_set_shipping(&self, event: &InboundEvent, user: UserId, method: ShippingMethod) {
        if self.accounts.snapshot(user).is_none() {
            self.reply(event, format!("No account for {user}."));
            return;
        }
        let now = Utc::now();
        let deadline = self
            .accounts
            .set_shipping(user, method, now, self.config.storage_days);
        match deadline {
            Some(deadline) => {
                let date = deadline.format("%d/%m/%Y");
                self.outbox.send(Notification::direct(
                    user,
                    format!("Your items go into storage; collect them by {date}."),
                ));
                self.reply(event, format!("Storage for @{user} until {date}."));
            }
            None => {
                self.reply(event, format!("Shipping for @{user} noted."));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use shared::{ChatId, PaymentStatus};

    use crate::accounts::AccountRegistry;
    use crate::auction::AuctionEngine;
    use crate::claims::PostRegistry;
    use crate::core::Config;
    use crate::ledger_sync::{LedgerSync, MemoryLedgerStore};
    use crate::timers::TimerService;
    use crate::transport::{ChatTransport, MemoryTransport, Outbox, OutboundItem};

    struct Harness {
        router: Router,
        accounts: Arc<AccountRegistry>,
        registry: Arc<PostRegistry>,
        timers: Arc<TimerService>,
        transport: Arc<MemoryTransport>,
        rx: mpsc::Receiver<OutboundItem>,
    }

    fn harness() -> Harness {
        let config = Config::with_admins([900]);
        let registry = Arc::new(PostRegistry::new());
        let accounts = Arc::new(AccountRegistry::new());
        let timers = Arc::new(TimerService::new());
        let store = Arc::new(MemoryLedgerStore::new());
        let ledger = Arc::new(LedgerSync::new(store, CancellationToken::new()));
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
            timers.clone(),
            outbox,
            transport.clone(),
        );
        Harness {
            router,
            accounts,
            registry,
            timers,
            transport,
            rx,
        }
    }

    fn admin_event(message_id: i64, text: &str) -> InboundEvent {
        InboundEvent {
            chat_id: ChatId(1),
            message_id: MessageId(message_id),
            user_id: UserId(900),
            username: Some("seller".to_string()),
            text: text.to_string(),
            reply_to: None,
            via_channel: false,
        }
    }

    fn buyer_event(user: i64, message_id: i64, text: &str, reply_to: Option<i64>) -> InboundEvent {
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

    #[test]
    fn admin_commands_parse() {
        assert_eq!(AdminCommand::parse("reset all"), Some(AdminCommand::ResetAll));
        assert_eq!(
            AdminCommand::parse("Reset User 42"),
            Some(AdminCommand::ResetUser(UserId(42)))
        );
        assert_eq!(
            AdminCommand::parse("find pin_lover"),
            Some(AdminCommand::FindUser("pin_lover".to_string()))
        );
        assert_eq!(
            AdminCommand::parse("recover 1234"),
            Some(AdminCommand::RecoverPost(PostId(1234)))
        );
        assert_eq!(AdminCommand::parse("paid 42"), Some(AdminCommand::MarkPaid(UserId(42))));
        assert_eq!(
            AdminCommand::parse("shipping 42 storage"),
            Some(AdminCommand::SetShipping(UserId(42), ShippingMethod::Storage))
        );
        assert_eq!(AdminCommand::parse("sell me something"), None);
        assert_eq!(AdminCommand::parse("reset"), None);
    }

    #[tokio::test]
    async fn reset_all_reports_pre_reset_numbers() {
        let mut h = harness();
        h.router
            .handle_event(buyer_event(10, 100, "For sale: enamel pin $12.50", None))
            .await;
        h.router
            .handle_event(buyer_event(20, 101, "claim", Some(100)))
            .await;
        replies(&mut h.rx);

        h.router.handle_event(admin_event(102, "reset all")).await;

        assert!(h.registry.is_empty());
        assert!(h.accounts.snapshot(UserId(20)).unwrap().claims.is_empty());
        let texts = replies(&mut h.rx);
        assert!(
            texts
                .iter()
                .any(|t| t.contains("1 posts cleared") && t.contains("$12.50"))
        );
    }

    #[tokio::test]
    async fn reset_all_cancels_outstanding_timers() {
        let mut h = harness();
        // An open auction (close timer and reminders) plus a paid buyer
        // (post-payment reset timer)
        h.router
            .handle_event(buyer_event(10, 100, "Auction: signed print, bid from $30", None))
            .await;
        h.router
            .handle_event(buyer_event(11, 101, "For sale: enamel pin $20", None))
            .await;
        h.router
            .handle_event(buyer_event(20, 102, "claim", Some(101)))
            .await;
        h.router
            .handle_event(buyer_event(20, 103, "confirm", None))
            .await;
        h.router.handle_event(admin_event(104, "paid 20")).await;
        assert!(!h.timers.is_empty());

        h.router.handle_event(admin_event(105, "reset all")).await;
        assert!(h.timers.is_empty());
    }

    #[tokio::test]
    async fn reset_user_transfers_to_the_waitlist() {
        let mut h = harness();
        h.router
            .handle_event(buyer_event(10, 100, "For sale: enamel pin $12.50", None))
            .await;
        h.router
            .handle_event(buyer_event(20, 101, "claim", Some(100)))
            .await;
        h.router
            .handle_event(buyer_event(21, 102, "claim", Some(100)))
            .await;
        replies(&mut h.rx);

        h.router.handle_event(admin_event(103, "reset user 20")).await;

        assert!(h.accounts.snapshot(UserId(20)).unwrap().claims.is_empty());
        let next = h.accounts.snapshot(UserId(21)).unwrap();
        assert_eq!(next.claims.len(), 1);
        assert_eq!(next.claims[0].price, Some(dec!(12.50)));
    }

    #[tokio::test]
    async fn recover_post_classifies_from_history() {
        let mut h = harness();
        // The original post never reached the router, but the transport
        // remembers the message text
        h.transport
            .inject(buyer_event(10, 500, "For sale: zine bundle $8", None))
            .await;
        // Drain the injected event so it does not linger
        let _ = h.transport.next_event().await;

        h.router.handle_event(admin_event(501, "recover 500")).await;

        assert!(h.registry.contains(PostId(500)));
        let texts = replies(&mut h.rx);
        assert!(texts.iter().any(|t| t.contains("Recovered post 500")));

        h.router
            .handle_event(buyer_event(20, 502, "claim", Some(500)))
            .await;
        let texts = replies(&mut h.rx);
        assert!(texts.iter().any(|t| t.contains("Claimed")));
    }

    #[tokio::test(start_paused = true)]
    async fn paid_buyers_are_reset_after_the_holding_window() {
        let mut h = harness();
        h.router
            .handle_event(buyer_event(10, 100, "For sale: enamel pin $20", None))
            .await;
        h.router
            .handle_event(buyer_event(20, 101, "claim", Some(100)))
            .await;
        h.router
            .handle_event(buyer_event(20, 102, "confirm", None))
            .await;

        h.router.handle_event(admin_event(103, "paid 20")).await;
        assert_eq!(
            h.accounts.snapshot(UserId(20)).unwrap().payment_status,
            Some(PaymentStatus::Paid)
        );

        // Four hours later the slate clears on its own
        tokio::time::sleep(StdDuration::from_secs(4 * 3600 + 1)).await;
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        let after = h.accounts.snapshot(UserId(20)).unwrap();
        assert!(after.claims.is_empty());
        assert_eq!(after.payment_status, None);
    }

    #[tokio::test]
    async fn shipping_storage_sets_the_deadline() {
        let mut h = harness();
        h.router
            .handle_event(buyer_event(10, 100, "For sale: enamel pin $20", None))
            .await;
        h.router
            .handle_event(buyer_event(20, 101, "claim", Some(100)))
            .await;

        h.router
            .handle_event(admin_event(102, "shipping 20 storage"))
            .await;

        let snapshot = h.accounts.snapshot(UserId(20)).unwrap();
        assert_eq!(snapshot.shipping, Some(ShippingMethod::Storage));
        assert!(snapshot.storage_deadline.is_some());
        let texts = replies(&mut h.rx);
        assert!(texts.iter().any(|t| t.contains("Storage for @20")));
    }
}
