//! Best-effort ledger synchronization
//!
//! Every in-memory mutation that the outside world should see becomes a
//! [`LedgerOp`] pushed here. Pushing never blocks and never fails the
//! caller; the op lands on a bounded per-post queue drained by one worker
//! per post, so writes for a post apply in arrival order while different
//! posts proceed independently.
//!
//! Failures are logged, never retried. A failed append leaves the row
//! reference empty; the next op for that post appends again before doing
//! its own work.

pub mod store;

use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use shared::PostId;

pub use store::{
    LedgerColumn, LedgerRowFields, LedgerStore, LedgerStoreError, MemoryLedgerStore,
    RestLedgerStore, RowRef,
};

const QUEUE_DEPTH: usize = 64;

/// One unit of work for a post's ledger row
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerOp {
    /// First observation of a post; creates the row
    Append {
        item_name: String,
        price: Option<Decimal>,
        total: u32,
    },
    /// Sold count moved by this much; available re-balances to match
    QuantityDelta(i32),
    /// Record a (possibly negotiated) price
    Price(Decimal),
}

/// Fire-and-forget ledger writer
pub struct LedgerSync {
    store: Arc<dyn LedgerStore>,
    queues: DashMap<PostId, mpsc::Sender<LedgerOp>>,
    shutdown: CancellationToken,
}

impl LedgerSync {
    pub fn new(store: Arc<dyn LedgerStore>, shutdown: CancellationToken) -> Self {
        Self {
            store,
            queues: DashMap::new(),
            shutdown,
        }
    }

    /// Queue an op for a post. Returns immediately; a full queue drops
    /// the op with a warning rather than stall the caller.
    pub fn push(&self, post_id: PostId, op: LedgerOp) {
        let sender = self
            .queues
            .entry(post_id)
            .or_insert_with(|| self.spawn_worker(post_id))
            .clone();
        if let Err(e) = sender.try_send(op) {
            tracing::warn!(post = %post_id, error = %e, "Ledger queue rejected op, dropping");
        }
    }

    fn spawn_worker(&self, post_id: PostId) -> mpsc::Sender<LedgerOp> {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let store = Arc::clone(&self.store);
        let token = self.shutdown.clone();
        tokio::spawn(async move {
            run_worker(post_id, store, rx, token).await;
        });
        tx
    }
}

/// Row state one worker tracks between ops
struct RowState {
    row_ref: Option<RowRef>,
    fields: Option<LedgerRowFields>,
}

async fn run_worker(
    post_id: PostId,
    store: Arc<dyn LedgerStore>,
    mut rx: mpsc::Receiver<LedgerOp>,
    token: CancellationToken,
) {
    let mut state = RowState {
        row_ref: None,
        fields: None,
    };
    loop {
        tokio::select! {
            op = rx.recv() => {
                match op {
                    Some(op) => apply(post_id, store.as_ref(), &mut state, op).await,
                    None => break,
                }
            }
            _ = token.cancelled() => break,
        }
    }
    tracing::debug!(post = %post_id, "Ledger worker stopped");
}

async fn apply(post_id: PostId, store: &dyn LedgerStore, state: &mut RowState, op: LedgerOp) {
    match op {
        LedgerOp::Append {
            item_name,
            price,
            total,
        } => {
            let sold = state.fields.as_ref().map(|f| f.sold).unwrap_or(0);
            state.fields = Some(LedgerRowFields {
                post_id,
                item_name,
                price,
                total,
                sold,
            });
            ensure_row(post_id, store, state).await;
        }
        LedgerOp::QuantityDelta(delta) => {
            let Some(fields) = state.fields.as_mut() else {
                tracing::warn!(post = %post_id, "Quantity update before append, dropping");
                return;
            };
            fields.sold = fields
                .sold
                .saturating_add_signed(delta)
                .min(fields.total);
            let sold = fields.sold;
            let available = fields.total - sold;

            let Some(row) = ensure_row(post_id, store, state).await else {
                return;
            };
            report(
                post_id,
                store
                    .update_cell(&row, LedgerColumn::Sold, sold.to_string())
                    .await,
            );
            report(
                post_id,
                store
                    .update_cell(&row, LedgerColumn::Available, available.to_string())
                    .await,
            );
        }
        LedgerOp::Price(price) => {
            if let Some(fields) = state.fields.as_mut() {
                fields.price = Some(price);
            }
            let Some(row) = ensure_row(post_id, store, state).await else {
                return;
            };
            report(
                post_id,
                store
                    .update_cell(&row, LedgerColumn::Price, price.to_string())
                    .await,
            );
        }
    }
}

/// Append the row if it is not there yet. Returns the ref to write to.
async fn ensure_row(
    post_id: PostId,
    store: &dyn LedgerStore,
    state: &mut RowState,
) -> Option<RowRef> {
    if let Some(row) = &state.row_ref {
        return Some(row.clone());
    }
    let fields = state.fields.as_ref()?;
    match store.append_row(fields).await {
        Ok(row) => {
            state.row_ref = Some(row.clone());
            Some(row)
        }
        Err(e) => {
            tracing::warn!(post = %post_id, error = %e, "Ledger append failed");
            None
        }
    }
}

fn report(post_id: PostId, result: Result<(), LedgerStoreError>) {
    if let Err(e) = result {
        tracing::warn!(post = %post_id, error = %e, "Ledger update failed");
    }
}
