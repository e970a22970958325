//! Server state - shared handles to every service
//!
//! `ServerState` wires the services together once at startup and hands
//! out `Arc` clones from then on. Cloning the state itself is cheap;
//! the heavy pieces live behind shared pointers.
//!
//! # Service components
//!
//! | Field | Type | Purpose |
//! |-------|------|---------|
//! | config | `Config` | immutable runtime configuration |
//! | registry | `Arc<PostRegistry>` | posts and their negotiation state |
//! | accounts | `Arc<AccountRegistry>` | buyer invoices |
//! | timers | `Arc<TimerService>` | named one-shot and repeating timers |
//! | ledger | `Arc<LedgerSync>` | best-effort external ledger writer |
//! | auctions | `Arc<AuctionEngine>` | auction timers and resolution |
//! | router | `Arc<Router>` | inbound event dispatch |
//! | outbox | `Outbox` | queued outbound notifications |

use std::sync::Arc;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::accounts::AccountRegistry;
use crate::auction::AuctionEngine;
use crate::claims::PostRegistry;
use crate::core::Config;
use crate::ledger_sync::{LedgerStore, LedgerSync, MemoryLedgerStore, RestLedgerStore};
use crate::router::Router;
use crate::timers::TimerService;
use crate::transport::{ChatTransport, Outbox, OutboundItem};

const OUTBOX_DEPTH: usize = 256;

#[derive(Clone)]
pub struct ServerState {
    pub config: Config,
    pub transport: Arc<dyn ChatTransport>,
    pub registry: Arc<PostRegistry>,
    pub accounts: Arc<AccountRegistry>,
    pub timers: Arc<TimerService>,
    pub ledger: Arc<LedgerSync>,
    pub auctions: Arc<AuctionEngine>,
    pub router: Arc<Router>,
    pub outbox: Outbox,
    /// Receiving half of the outbox, claimed once by the server
    outbox_rx: Arc<Mutex<Option<mpsc::Receiver<OutboundItem>>>>,
}

impl ServerState {
    /// Build every service against one transport and one shutdown token
    pub fn initialize(
        config: Config,
        transport: Arc<dyn ChatTransport>,
        shutdown: CancellationToken,
    ) -> Self {
        let store: Arc<dyn LedgerStore> = match &config.ledger_url {
            Some(url) => Arc::new(RestLedgerStore::new(url.clone())),
            None => {
                tracing::warn!("LEDGER_URL unset, ledger writes stay in memory");
                Arc::new(MemoryLedgerStore::new())
            }
        };

        let registry = Arc::new(PostRegistry::new());
        let accounts = Arc::new(AccountRegistry::new());
        let timers = Arc::new(TimerService::new());
        let ledger = Arc::new(LedgerSync::new(store, shutdown));
        let (outbox, outbox_rx) = Outbox::new(OUTBOX_DEPTH);

        let auctions = Arc::new(AuctionEngine::new(
            registry.clone(),
            timers.clone(),
            accounts.clone(),
            ledger.clone(),
            outbox.clone(),
            &config,
        ));
        let router = Arc::new(Router::new(
            config.clone(),
            registry.clone(),
            accounts.clone(),
            auctions.clone(),
            ledger.clone(),
            timers.clone(),
            outbox.clone(),
            transport.clone(),
        ));

        Self {
            config,
            transport,
            registry,
            accounts,
            timers,
            ledger,
            auctions,
            router,
            outbox,
            outbox_rx: Arc::new(Mutex::new(Some(outbox_rx))),
        }
    }

    /// Take the outbox receiver; only the first caller gets it
    pub(crate) fn take_outbox_rx(&self) -> Option<mpsc::Receiver<OutboundItem>> {
        self.outbox_rx.lock().ok()?.take()
    }
}
