//! Claims Server - chat-channel sales negotiation core
//!
//! # Architecture overview
//!
//! The server consumes chat events from a pluggable transport, turns
//! sale posts into tracked negotiation state and lets buyers claim,
//! offer and bid through short reply commands:
//!
//! - **Classification** (`classifier`): free-text posts become Single,
//!   Multi or Auction descriptors
//! - **Negotiation** (`claims`): per-post claim/waitlist/offer state
//!   machines behind one mutex per post
//! - **Auctions** (`auction`): timed bidding with anti-snipe extensions
//! - **Accounts** (`accounts`): per-buyer invoices and payment status
//! - **Ledger sync** (`ledger_sync`): best-effort, ordered writes to an
//!   external bookkeeping store
//!
//! # Module structure
//!
//! ```text
//! claims-server/src/
//! ├── core/          # config, state, server loop, background tasks
//! ├── classifier/    # free-text post classification
//! ├── claims/        # claim ledger, offers, waitlists
//! ├── auction/       # bid state machine and auction engine
//! ├── accounts/      # buyer invoices
//! ├── ledger_sync/   # external ledger writer
//! ├── router/        # inbound command dispatch, admin commands
//! ├── timers/        # named timer service
//! ├── transport/     # chat transport trait + in-process impl
//! └── utils/         # logging, time parsing
//! ```

pub mod accounts;
pub mod auction;
pub mod claims;
pub mod classifier;
pub mod core;
pub mod ledger_sync;
pub mod router;
pub mod timers;
pub mod transport;
pub mod utils;

// Re-export the types a binary or test harness needs
pub use accounts::AccountRegistry;
pub use auction::AuctionEngine;
pub use claims::{NegotiationError, PostRegistry};
pub use crate::core::{BackgroundTasks, Config, Server, ServerState, TaskKind};
pub use ledger_sync::{LedgerSync, MemoryLedgerStore, RestLedgerStore};
pub use router::{AdminCommand, Command, Router};
pub use timers::TimerService;
pub use transport::{ChatTransport, MemoryTransport, Outbox};
pub use utils::{init_logger, init_logger_with_level};

pub fn print_banner() {
    println!(
        r#"
   ________      _
  / ____/ /___ _(_)___ ___  _____
 / /   / / __ `/ / __ `__ \/ ___/
/ /___/ / /_/ / / / / / / (__  )
\____/_/\__,_/_/_/ /_/ /_/____/
   _____
  / ___/___  ______   _____  _____
  \__ \/ _ \/ ___/ | / / _ \/ ___/
 ___/ /  __/ /   | |/ /  __/ /
/____/\___/_/    |___/\___/_/
    "#
    );
}

/// Load `.env` and start logging; call once before anything else
pub fn setup_environment() {
    dotenv::dotenv().ok();
    utils::init_logger();
}
