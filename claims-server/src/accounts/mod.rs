//! Buyer accounts
//!
//! Running invoice per buyer: what they hold, what they owe, where it
//! ships and whether they have paid. Each operation mutates one account
//! atomically through the map entry, so the invariant `total == sum of
//! item prices` cannot be observed broken.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::HashSet;

use shared::{
    AccountSnapshot, ClaimRecord, PaymentStatus, PostId, ShippingMethod, SlotNumber, UserId,
};

/// One buyer's standing
#[derive(Debug, Clone, PartialEq)]
struct Account {
    user_id: UserId,
    username: Option<String>,
    claims: Vec<ClaimRecord>,
    payment_status: Option<PaymentStatus>,
    shipping: Option<ShippingMethod>,
    confirmed_at: Option<DateTime<Utc>>,
    storage_deadline: Option<DateTime<Utc>>,
    /// Day marks (7, 1) already reminded about, so the daily scan never
    /// repeats itself
    storage_reminded: HashSet<i64>,
}

impl Account {
    fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            username: None,
            claims: Vec::new(),
            payment_status: None,
            shipping: None,
            confirmed_at: None,
            storage_deadline: None,
            storage_reminded: HashSet::new(),
        }
    }

    fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            user_id: self.user_id,
            username: self.username.clone(),
            claims: self.claims.clone(),
            payment_status: self.payment_status,
            shipping: self.shipping,
            confirmed_at: self.confirmed_at,
            storage_deadline: self.storage_deadline,
        }
    }

    /// Clear negotiation state, keep who the buyer is
    fn reset(&mut self) {
        self.claims.clear();
        self.payment_status = None;
        self.shipping = None;
        self.confirmed_at = None;
        self.storage_deadline = None;
        self.storage_reminded.clear();
    }
}

/// Headline numbers snapshotted before a bulk reset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccountResetStats {
    pub users: usize,
    pub items: usize,
    pub total_value: Decimal,
}

/// A pending storage reminder the daily scan found
#[derive(Debug, Clone, PartialEq)]
pub struct StorageReminder {
    pub user_id: UserId,
    pub days_left: i64,
    pub deadline: DateTime<Utc>,
}

/// Registry of every buyer the server has seen
pub struct AccountRegistry {
    accounts: DashMap<UserId, Account>,
}

impl AccountRegistry {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
        }
    }

    /// Remember the latest username seen for a buyer
    pub fn note_identity(&self, user: UserId, username: Option<&str>) {
        let mut account = self
            .accounts
            .entry(user)
            .or_insert_with(|| Account::new(user));
        if let Some(name) = username {
            account.username = Some(name.to_string());
        }
    }

    pub fn add_claim(&self, user: UserId, record: ClaimRecord) {
        let mut account = self
            .accounts
            .entry(user)
            .or_insert_with(|| Account::new(user));
        account.claims.push(record);
    }

    /// Remove the buyer's claim on (post, slot); returned for transfer
    /// bookkeeping
    pub fn remove_claim(
        &self,
        user: UserId,
        post_id: PostId,
        slot: SlotNumber,
    ) -> Option<ClaimRecord> {
        let mut account = self.accounts.get_mut(&user)?;
        let idx = account
            .claims
            .iter()
            .position(|c| c.post_id == post_id && c.slot == slot)?;
        Some(account.claims.remove(idx))
    }

    /// Buyer locked in their haul; payment is now expected
    pub fn confirm(&self, user: UserId, now: DateTime<Utc>) -> Option<AccountSnapshot> {
        let mut account = self.accounts.get_mut(&user)?;
        if account.claims.is_empty() {
            return None;
        }
        account.payment_status = Some(PaymentStatus::Pending);
        account.confirmed_at = Some(now);
        Some(account.snapshot())
    }

    /// Returns false when the buyer had nothing pending
    pub fn mark_paid(&self, user: UserId) -> bool {
        let Some(mut account) = self.accounts.get_mut(&user) else {
            return false;
        };
        if account.payment_status != Some(PaymentStatus::Pending) {
            return false;
        }
        account.payment_status = Some(PaymentStatus::Paid);
        true
    }

    /// Record how the buyer wants their items; storage starts the
    /// holding clock
    pub fn set_shipping(
        &self,
        user: UserId,
        method: ShippingMethod,
        now: DateTime<Utc>,
        storage_days: i64,
    ) -> Option<DateTime<Utc>> {
        let mut account = self.accounts.get_mut(&user)?;
        account.shipping = Some(method);
        account.storage_deadline = match method {
            ShippingMethod::Storage => Some(now + Duration::days(storage_days)),
            _ => None,
        };
        account.storage_deadline
    }

    pub fn snapshot(&self, user: UserId) -> Option<AccountSnapshot> {
        self.accounts.get(&user).map(|a| a.snapshot())
    }

    pub fn total_owed(&self, user: UserId) -> Decimal {
        self.accounts
            .get(&user)
            .map(|a| a.snapshot().total_owed())
            .unwrap_or(Decimal::ZERO)
    }

    /// Clear one buyer's slate, keeping their identity. Returns the
    /// pre-reset snapshot.
    pub fn reset_user(&self, user: UserId) -> Option<AccountSnapshot> {
        let mut account = self.accounts.get_mut(&user)?;
        let before = account.snapshot();
        account.reset();
        Some(before)
    }

    /// Clear every buyer's slate after snapshotting headline numbers
    pub fn reset_all(&self) -> AccountResetStats {
        let mut users = 0;
        let mut items = 0;
        let mut total_value = Decimal::ZERO;
        for mut entry in self.accounts.iter_mut() {
            if !entry.claims.is_empty() {
                users += 1;
                items += entry.claims.len();
                total_value += entry.claims.iter().filter_map(|c| c.price).sum::<Decimal>();
            }
            entry.reset();
        }
        AccountResetStats {
            users,
            items,
            total_value,
        }
    }

    /// Match buyers by id or username fragment, case-insensitive
    pub fn find(&self, query: &str) -> Vec<AccountSnapshot> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.accounts
            .iter()
            .filter(|entry| {
                entry.user_id.0.to_string() == needle
                    || entry
                        .username
                        .as_ref()
                        .is_some_and(|name| name.to_lowercase().contains(&needle))
            })
            .map(|entry| entry.snapshot())
            .collect()
    }

    /// Storage reminders due right now: 7 days out and 1 day out, each
    /// sent once. Called by the daily scan.
    pub fn storage_reminders_due(&self, now: DateTime<Utc>) -> Vec<StorageReminder> {
        let mut due = Vec::new();
        for mut entry in self.accounts.iter_mut() {
            let Some(deadline) = entry.storage_deadline else {
                continue;
            };
            let days_left = (deadline - now).num_days();
            for mark in [7i64, 1] {
                if days_left <= mark && days_left >= 0 && !entry.storage_reminded.contains(&mark) {
                    entry.storage_reminded.insert(mark);
                    due.push(StorageReminder {
                        user_id: entry.user_id,
                        days_left,
                        deadline,
                    });
                    break;
                }
            }
        }
        due
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

impl Default for AccountRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use shared::ClaimOrigin;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn record(post: i64, slot: u32, price: Decimal) -> ClaimRecord {
        ClaimRecord {
            post_id: PostId(post),
            slot: SlotNumber(slot),
            user_id: UserId(1),
            price: Some(price),
            origin: ClaimOrigin::Direct,
            claimed_at: at(0),
        }
    }

    #[test]
    fn total_tracks_claims() {
        let registry = AccountRegistry::new();
        registry.note_identity(UserId(1), Some("alice"));
        registry.add_claim(UserId(1), record(10, 1, dec!(10)));
        registry.add_claim(UserId(1), record(11, 2, dec!(5.50)));
        assert_eq!(registry.total_owed(UserId(1)), dec!(15.50));

        let removed = registry.remove_claim(UserId(1), PostId(10), SlotNumber(1));
        assert_eq!(removed.unwrap().price, Some(dec!(10)));
        assert_eq!(registry.total_owed(UserId(1)), dec!(5.50));
    }

    #[test]
    fn payment_flow_guards_state() {
        let registry = AccountRegistry::new();
        registry.add_claim(UserId(1), record(10, 1, dec!(10)));

        // Nothing pending yet
        assert!(!registry.mark_paid(UserId(1)));

        let snap = registry.confirm(UserId(1), at(10)).unwrap();
        assert_eq!(snap.payment_status, Some(PaymentStatus::Pending));
        assert!(registry.mark_paid(UserId(1)));
        assert!(!registry.mark_paid(UserId(1)));
    }

    #[test]
    fn reset_preserves_identity() {
        let registry = AccountRegistry::new();
        registry.note_identity(UserId(1), Some("alice"));
        registry.add_claim(UserId(1), record(10, 1, dec!(10)));

        let before = registry.reset_user(UserId(1)).unwrap();
        assert_eq!(before.claims.len(), 1);

        let after = registry.snapshot(UserId(1)).unwrap();
        assert!(after.claims.is_empty());
        assert_eq!(after.username.as_deref(), Some("alice"));
    }

    #[test]
    fn reset_all_counts_only_buyers_with_claims() {
        let registry = AccountRegistry::new();
        registry.add_claim(UserId(1), record(10, 1, dec!(10)));
        registry.add_claim(UserId(1), record(11, 1, dec!(20)));
        registry.add_claim(UserId(2), record(12, 1, dec!(5)));
        registry.note_identity(UserId(3), Some("lurker"));

        let stats = registry.reset_all();
        assert_eq!(stats.users, 2);
        assert_eq!(stats.items, 3);
        assert_eq!(stats.total_value, dec!(35));
        assert!(registry.snapshot(UserId(1)).unwrap().claims.is_empty());
    }

    #[test]
    fn find_matches_id_and_username() {
        let registry = AccountRegistry::new();
        registry.note_identity(UserId(42), Some("PinCollector"));
        registry.note_identity(UserId(7), Some("someone"));

        assert_eq!(registry.find("42").len(), 1);
        assert_eq!(registry.find("pincol").len(), 1);
        assert_eq!(registry.find("nobody").len(), 0);
    }

    #[test]
    fn storage_reminders_fire_once_per_mark() {
        let registry = AccountRegistry::new();
        registry.add_claim(UserId(1), record(10, 1, dec!(10)));
        registry.set_shipping(UserId(1), ShippingMethod::Storage, at(0), 60);

        // 55 days in: 5 days left, inside the 7-day mark
        let now = at(55 * 86_400);
        let due = registry.storage_reminders_due(now);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].days_left, 5);

        // Same day again: nothing new
        assert!(registry.storage_reminders_due(now).is_empty());

        // Final day: the 1-day mark fires
        let due = registry.storage_reminders_due(at(59 * 86_400 + 3_600));
        assert_eq!(due.len(), 1);
        assert!(due[0].days_left <= 1);
    }

    #[test]
    fn mail_shipping_sets_no_deadline() {
        let registry = AccountRegistry::new();
        registry.add_claim(UserId(1), record(10, 1, dec!(10)));
        assert_eq!(
            registry.set_shipping(UserId(1), ShippingMethod::Mail, at(0), 60),
            None
        );
    }
}
