use shared::UserId;

/// Server configuration - everything the claims server tunes at runtime
///
/// # Environment variables
///
/// | Variable | Default | Meaning |
/// |----------|---------|---------|
/// | ADMIN_IDS | (empty) | Comma-separated user ids with seller authority |
/// | LEDGER_URL | (unset) | Base URL of the external ledger store; unset disables pushes |
/// | ENVIRONMENT | development | development \| staging \| production |
/// | AUCTION_DEFAULT_HOURS | 24 | Auction length when the post names no deadline |
/// | LATE_BID_GRACE_SECS | 60 | Gap between the announced and effective close |
/// | ANTI_SNIPE_WINDOW_SECS | 60 | How close to the end a bid must land to extend |
/// | ANTI_SNIPE_FIRST_EXT_SECS | 300 | First extension length |
/// | ANTI_SNIPE_STEP_SECS | 60 | Every later extension length |
/// | OUTBID_COOLDOWN_SECS | 120 | Minimum gap between outbid pings to one bidder |
/// | PERIODIC_REMINDER_MINS | 120 | Auction reminder cadence |
/// | PAYMENT_REMINDER_HOURS | 12 | Chase unpaid buyers after this long |
/// | POST_PAYMENT_RESET_HOURS | 4 | Clear a paid buyer's slate after this long |
/// | STORAGE_DAYS | 60 | How long stored items are held |
/// | SHUTDOWN_TIMEOUT_MS | 10000 | Graceful shutdown budget |
///
/// # Example
///
/// ```ignore
/// ADMIN_IDS=1001,1002 LEDGER_URL=http://localhost:9000 cargo run
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Users allowed to run seller-side commands
    pub admin_ids: Vec<UserId>,
    /// External ledger store endpoint; `None` turns syncing off
    pub ledger_url: Option<String>,
    /// development | staging | production
    pub environment: String,

    // === Auction timing ===
    /// Auction length when the post names no deadline
    pub auction_default_hours: i64,
    /// Seconds between the announced close and the real one
    pub late_bid_grace_secs: i64,
    /// A bid this close to the effective end triggers an extension
    pub anti_snipe_window_secs: i64,
    /// First extension length in seconds
    pub anti_snipe_first_ext_secs: i64,
    /// Every extension after the first, in seconds
    pub anti_snipe_step_secs: i64,
    /// Minimum seconds between outbid notifications to the same bidder
    pub outbid_cooldown_secs: i64,
    /// Recurring auction reminder cadence in minutes
    pub periodic_reminder_mins: i64,

    // === Buyer follow-up ===
    /// Hours before an unpaid buyer is reminded
    pub payment_reminder_hours: i64,
    /// Hours after payment before the buyer's slate is cleared
    pub post_payment_reset_hours: i64,
    /// Days stored items are held before the deadline lapses
    pub storage_days: i64,

    /// Graceful shutdown budget in milliseconds
    pub shutdown_timeout_ms: u64,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Unset variables fall back to defaults
    pub fn from_env() -> Self {
        Self {
            admin_ids: std::env::var("ADMIN_IDS")
                .map(|raw| {
                    raw.split(',')
                        .filter_map(|part| part.trim().parse::<i64>().ok())
                        .map(UserId)
                        .collect()
                })
                .unwrap_or_default(),
            ledger_url: std::env::var("LEDGER_URL").ok().filter(|u| !u.is_empty()),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),

            auction_default_hours: env_i64("AUCTION_DEFAULT_HOURS", 24),
            late_bid_grace_secs: env_i64("LATE_BID_GRACE_SECS", 60),
            anti_snipe_window_secs: env_i64("ANTI_SNIPE_WINDOW_SECS", 60),
            anti_snipe_first_ext_secs: env_i64("ANTI_SNIPE_FIRST_EXT_SECS", 300),
            anti_snipe_step_secs: env_i64("ANTI_SNIPE_STEP_SECS", 60),
            outbid_cooldown_secs: env_i64("OUTBID_COOLDOWN_SECS", 120),
            periodic_reminder_mins: env_i64("PERIODIC_REMINDER_MINS", 120),

            payment_reminder_hours: env_i64("PAYMENT_REMINDER_HOURS", 12),
            post_payment_reset_hours: env_i64("POST_PAYMENT_RESET_HOURS", 4),
            storage_days: env_i64("STORAGE_DAYS", 60),

            shutdown_timeout_ms: env_i64("SHUTDOWN_TIMEOUT_MS", 10_000) as u64,
        }
    }

    /// Defaults plus an explicit admin list
    ///
    /// Mostly used by tests
    pub fn with_admins(ids: impl IntoIterator<Item = i64>) -> Self {
        let mut config = Self::from_env();
        config.admin_ids = ids.into_iter().map(UserId).collect();
        config
    }

    /// Whether the given user carries seller authority by id
    pub fn is_admin(&self, user: UserId) -> bool {
        self.admin_ids.contains(&user)
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
