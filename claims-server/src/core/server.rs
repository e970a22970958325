//! Server implementation
//!
//! Owns the background tasks and the inbound event loop. The loop runs
//! on the calling task; everything else (outbox delivery, the daily
//! storage scan) runs as registered background tasks so shutdown can
//! reach all of it through one token.

use std::time::Duration;

use chrono::Utc;

use shared::Notification;

use crate::core::{BackgroundTasks, Config, ServerState, TaskKind};
use crate::transport::run_outbox;

/// How often stored-item deadlines are checked
const STORAGE_SCAN_PERIOD: Duration = Duration::from_secs(24 * 3600);

pub struct Server {
    state: ServerState,
    tasks: BackgroundTasks,
}

impl Server {
    pub fn new(config: Config, transport: std::sync::Arc<dyn crate::transport::ChatTransport>) -> Self {
        let tasks = BackgroundTasks::new();
        let state = ServerState::initialize(config, transport, tasks.shutdown_token());
        Self { state, tasks }
    }

    /// Create a server around existing state (tests share the state)
    pub fn with_state(state: ServerState, tasks: BackgroundTasks) -> Self {
        Self { state, tasks }
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    /// Run until the transport closes or a shutdown signal arrives
    pub async fn run(mut self) -> anyhow::Result<()> {
        let token = self.tasks.shutdown_token();

        // 1. Outbox delivery worker
        let rx = self
            .state
            .take_outbox_rx()
            .ok_or_else(|| anyhow::anyhow!("outbox receiver already taken"))?;
        self.tasks.spawn(
            "outbox",
            TaskKind::Worker,
            run_outbox(rx, self.state.transport.clone(), token.clone()),
        );

        // 2. Daily storage-deadline scan
        let accounts = self.state.accounts.clone();
        let outbox = self.state.outbox.clone();
        let scan_token = token.clone();
        self.tasks.spawn("storage-scan", TaskKind::Periodic, async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(STORAGE_SCAN_PERIOD) => {}
                    _ = scan_token.cancelled() => break,
                }
                for due in accounts.storage_reminders_due(Utc::now()) {
                    let date = due.deadline.format("%d/%m/%Y");
                    outbox.send(Notification::direct(
                        due.user_id,
                        format!(
                            "Storage reminder: {} day(s) left to collect your items (by {date}).",
                            due.days_left
                        ),
                    ));
                }
            }
        });

        self.tasks.log_summary();
        tracing::info!(
            environment = %self.state.config.environment,
            "Claims server ready, consuming chat events"
        );

        // 3. Inbound event loop
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
                event = self.state.transport.next_event() => {
                    match event {
                        Some(event) => self.state.router.handle_event(event).await,
                        None => {
                            tracing::info!("Transport closed, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        let timeout = Duration::from_millis(self.state.config.shutdown_timeout_ms as u64);
        match tokio::time::timeout(timeout, self.tasks.shutdown()).await {
            Ok(()) => {}
            Err(_) => tracing::warn!("Shutdown timed out with tasks still running"),
        }
        Ok(())
    }
}
