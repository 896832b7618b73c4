// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Settlement Poller
//!
//! Background task that periodically verifies pending deposits against the
//! payment gateway. This ensures settlement happens server-side even when a
//! webhook delivery is lost or delayed.
//!
//! ## Strategy
//!
//! Every `poll_interval` (default 30 s) the poller:
//! 1. Lists references of all non-terminal transactions.
//! 2. Runs each through [`Reconciler::verify_with_gateway`], which applies
//!    the same terminal-state check and atomic settle logic as the webhook
//!    path.
//! 3. Treats `GatewayUnavailable` as transient: the row stays pending and is
//!    picked up again on the next sweep.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken` for graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::LedgerError;
use crate::service::Reconciler;
use crate::storage::LedgerDb;

/// Default interval between polling sweeps.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Background poller that settles pending deposits via gateway verification.
pub struct SettlementPoller {
    ledger: Arc<LedgerDb>,
    reconciler: Arc<Reconciler>,
    poll_interval: Duration,
}

impl SettlementPoller {
    /// Create a new poller over the given ledger and reconciler.
    pub fn new(ledger: Arc<LedgerDb>, reconciler: Arc<Reconciler>) -> Self {
        Self {
            ledger,
            reconciler,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the sweep interval.
    pub fn with_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Run the poller loop until the cancellation token is triggered.
    ///
    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(poller.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.poll_interval.as_secs(),
            "Settlement poller starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("Settlement poller shutting down");
                return;
            }

            self.poll_step().await;

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Settlement poller shutting down");
                    return;
                }
            }
        }
    }

    /// Execute one polling sweep: find pending rows and verify each.
    async fn poll_step(&self) {
        let pending = match self.ledger.pending_references() {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "Settlement poller: failed to list pending transactions");
                return;
            }
        };

        if pending.is_empty() {
            return;
        }

        info!(
            count = pending.len(),
            "Settlement poller: verifying pending transactions"
        );

        for reference in &pending {
            match self.reconciler.verify_with_gateway(reference).await {
                Ok(outcome) => {
                    info!(
                        reference = %reference,
                        outcome = ?outcome,
                        "Settlement poller: verified transaction"
                    );
                }
                Err(LedgerError::GatewayUnavailable(message)) => {
                    warn!(
                        reference = %reference,
                        error = %message,
                        "Settlement poller: gateway unavailable, will retry"
                    );
                }
                Err(e) => {
                    warn!(
                        reference = %reference,
                        error = %e,
                        "Settlement poller: failed to verify transaction"
                    );
                }
            }
        }
    }
}
