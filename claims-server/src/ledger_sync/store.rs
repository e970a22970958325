//! Ledger store backends
//!
//! The external ledger looks like a sheet: append a row per post, then
//! poke individual cells. The trait keeps the sync worker testable; the
//! REST backend is the production one.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use shared::PostId;

/// Stable handle to an appended row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRef(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerColumn {
    Price,
    Available,
    Sold,
}

impl LedgerColumn {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerColumn::Price => "price",
            LedgerColumn::Available => "available",
            LedgerColumn::Sold => "sold",
        }
    }
}

/// Row contents at append time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRowFields {
    pub post_id: PostId,
    pub item_name: String,
    pub price: Option<Decimal>,
    pub total: u32,
    pub sold: u32,
}

#[derive(Debug, Error)]
pub enum LedgerStoreError {
    #[error("ledger request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ledger rejected the request: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn append_row(&self, fields: &LedgerRowFields) -> Result<RowRef, LedgerStoreError>;

    async fn update_cell(
        &self,
        row: &RowRef,
        column: LedgerColumn,
        value: String,
    ) -> Result<(), LedgerStoreError>;
}

// ============ REST backend ============

/// JSON-over-HTTP ledger store
pub struct RestLedgerStore {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct AppendResponse {
    row_ref: String,
}

impl RestLedgerStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl LedgerStore for RestLedgerStore {
    async fn append_row(&self, fields: &LedgerRowFields) -> Result<RowRef, LedgerStoreError> {
        let url = format!("{}/rows", self.base_url);
        let response = self.client.post(&url).json(fields).send().await?;
        if !response.status().is_success() {
            return Err(LedgerStoreError::Rejected(format!(
                "append returned {}",
                response.status()
            )));
        }
        let body: AppendResponse = response.json().await?;
        Ok(RowRef(body.row_ref))
    }

    async fn update_cell(
        &self,
        row: &RowRef,
        column: LedgerColumn,
        value: String,
    ) -> Result<(), LedgerStoreError> {
        let url = format!("{}/rows/{}/{}", self.base_url, row.0, column.name());
        let response = self
            .client
            .put(&url)
            .json(&serde_json::json!({ "value": value }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(LedgerStoreError::Rejected(format!(
                "update returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

// ============ In-memory backend (tests) ============

/// Recording store used by the tests; can be told to fail
pub struct MemoryLedgerStore {
    rows: parking_lot::Mutex<Vec<(RowRef, LedgerRowFields)>>,
    updates: parking_lot::Mutex<Vec<(RowRef, LedgerColumn, String)>>,
    fail_appends: std::sync::atomic::AtomicBool,
    next_row: std::sync::atomic::AtomicU64,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self {
            rows: parking_lot::Mutex::new(Vec::new()),
            updates: parking_lot::Mutex::new(Vec::new()),
            fail_appends: std::sync::atomic::AtomicBool::new(false),
            next_row: std::sync::atomic::AtomicU64::new(1),
        }
    }

    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn rows(&self) -> Vec<(RowRef, LedgerRowFields)> {
        self.rows.lock().clone()
    }

    pub fn updates(&self) -> Vec<(RowRef, LedgerColumn, String)> {
        self.updates.lock().clone()
    }
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn append_row(&self, fields: &LedgerRowFields) -> Result<RowRef, LedgerStoreError> {
        if self.fail_appends.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(LedgerStoreError::Rejected("append disabled".into()));
        }
        let id = self
            .next_row
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let row = RowRef(format!("row-{id}"));
        self.rows.lock().push((row.clone(), fields.clone()));
        Ok(row)
    }

    async fn update_cell(
        &self,
        row: &RowRef,
        column: LedgerColumn,
        value: String,
    ) -> Result<(), LedgerStoreError> {
        self.updates.lock().push((row.clone(), column, value));
        Ok(())
    }
}
