// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Gateway reconciliation: maps asynchronous payment-gateway notifications
//! onto ledger state transitions, exactly once.
//!
//! Two entry points feed the same settle routine: webhook delivery
//! ([`Reconciler::handle_webhook`]) and active polling
//! ([`Reconciler::verify_with_gateway`]). Both enforce the per-transaction
//! state machine `pending → success | failed`; re-delivery for an
//! already-terminal row is a no-op that reports "already processed".
//!
//! Signatures are verified over the exact raw request bytes. Verifying a
//! re-serialized copy of the payload would be a correctness bug: formatting
//! differences change the digest.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use sha2::Sha512;
use tracing::{debug, info, warn};

use crate::error::LedgerError;
use crate::gateway::{ChargeStatus, GatewayError, PaymentGateway};
use crate::models::{TxStatus, WebhookEvent};
use crate::money::Money;
use crate::storage::LedgerDb;

type HmacSha512 = Hmac<Sha512>;

/// Outcome of one webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// The row was settled by this delivery.
    Processed { reference: String, status: TxStatus },
    /// The row was already terminal; nothing changed.
    AlreadyProcessed { reference: String },
    /// Event outside the charge family; nothing changed.
    Ignored { event: String },
}

/// Outcome of one polling verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// The row was settled by this poll.
    Settled { reference: String, status: TxStatus },
    /// The row was already terminal; nothing changed.
    AlreadyProcessed { reference: String },
    /// The gateway has not finished the charge; the row stays pending.
    StillPending { reference: String },
}

/// Result of the shared atomic settle routine.
enum SettleResult {
    Applied(TxStatus),
    AlreadyTerminal,
}

/// Maps gateway notifications onto ledger state, exactly once.
pub struct Reconciler {
    ledger: Arc<LedgerDb>,
    gateway: Arc<dyn PaymentGateway>,
    webhook_secret: String,
}

impl Reconciler {
    pub fn new(
        ledger: Arc<LedgerDb>,
        gateway: Arc<dyn PaymentGateway>,
        webhook_secret: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            gateway,
            webhook_secret: webhook_secret.into(),
        }
    }

    /// Verify a webhook signature against the raw request bytes.
    ///
    /// The signature header carries a hex HMAC-SHA-512 digest of the body,
    /// keyed with the shared gateway secret. Comparison is constant-time.
    pub fn verify_signature(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<(), LedgerError> {
        let Some(signature) = signature else {
            warn!("Webhook rejected: missing signature header");
            return Err(LedgerError::SignatureInvalid);
        };

        let digest = hex::decode(signature.trim()).map_err(|_| {
            warn!("Webhook rejected: signature is not valid hex");
            LedgerError::SignatureInvalid
        })?;

        let mut mac = HmacSha512::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| LedgerError::SignatureInvalid)?;
        mac.update(raw_body);
        mac.verify_slice(&digest).map_err(|_| {
            warn!("Webhook rejected: signature mismatch");
            LedgerError::SignatureInvalid
        })
    }

    /// Verify, parse, and settle one raw webhook delivery.
    pub fn ingest(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, LedgerError> {
        self.verify_signature(raw_body, signature)?;
        let event: WebhookEvent = serde_json::from_slice(raw_body)
            .map_err(|e| LedgerError::Validation(format!("malformed webhook payload: {e}")))?;
        self.handle_webhook(&event)
    }

    /// Settle the transaction named by an already-verified webhook event.
    ///
    /// An unknown reference is a hard error: it indicates a reference
    /// mismatch or a forged payload, never something to swallow.
    pub fn handle_webhook(&self, event: &WebhookEvent) -> Result<WebhookOutcome, LedgerError> {
        if !event.event.starts_with("charge.") {
            debug!(event = %event.event, "Ignoring non-charge webhook event");
            return Ok(WebhookOutcome::Ignored {
                event: event.event.clone(),
            });
        }

        let reference = event.data.reference.clone();
        let success = event.event == "charge.success" && event.data.status == "success";

        match self.settle(
            &reference,
            success,
            Money::from_minor(event.data.amount),
            event.data.gateway_response.clone(),
        )? {
            SettleResult::Applied(status) => Ok(WebhookOutcome::Processed { reference, status }),
            SettleResult::AlreadyTerminal => {
                info!(reference = %reference, "Webhook re-delivery for settled transaction");
                Ok(WebhookOutcome::AlreadyProcessed { reference })
            }
        }
    }

    /// Actively poll the gateway for a pending transaction.
    ///
    /// A gateway `not found` settles the row as failed (abandoned charge).
    /// Any other gateway error leaves the row pending and surfaces as
    /// `GatewayUnavailable` so the caller retries later.
    pub async fn verify_with_gateway(&self, reference: &str) -> Result<VerifyOutcome, LedgerError> {
        let row = self
            .ledger
            .transaction_by_reference(reference)?
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {reference}")))?;
        if row.is_terminal() {
            return Ok(VerifyOutcome::AlreadyProcessed {
                reference: reference.to_string(),
            });
        }

        let settled = match self.gateway.verify_transaction(reference).await {
            Ok(verification) => match verification.status {
                ChargeStatus::Success => self.settle(
                    reference,
                    true,
                    verification.amount,
                    verification.gateway_response,
                )?,
                ChargeStatus::Failed => self.settle(
                    reference,
                    false,
                    verification.amount,
                    verification.gateway_response,
                )?,
                ChargeStatus::Pending => {
                    return Ok(VerifyOutcome::StillPending {
                        reference: reference.to_string(),
                    });
                }
            },
            Err(GatewayError::NotFound(_)) => self.settle(
                reference,
                false,
                Money::ZERO,
                Some("abandoned: gateway has no record of this charge".to_string()),
            )?,
            Err(err) => {
                warn!(
                    reference = %reference,
                    error = %err,
                    "Gateway verification failed transiently; leaving transaction pending"
                );
                return Err(LedgerError::GatewayUnavailable(err.to_string()));
            }
        };

        match settled {
            SettleResult::Applied(status) => Ok(VerifyOutcome::Settled {
                reference: reference.to_string(),
                status,
            }),
            SettleResult::AlreadyTerminal => Ok(VerifyOutcome::AlreadyProcessed {
                reference: reference.to_string(),
            }),
        }
    }

    /// The one atomic settle routine both notification paths share.
    ///
    /// Status update and balance credit commit in the same unit; a crash
    /// between them is not possible. The terminal check runs inside the
    /// unit, so a concurrent duplicate delivery observes `AlreadyTerminal`
    /// rather than crediting twice.
    fn settle(
        &self,
        reference: &str,
        success: bool,
        amount: Money,
        gateway_response: Option<String>,
    ) -> Result<SettleResult, LedgerError> {
        self.ledger.run_atomic(|txn| {
            let mut row = txn.transaction_by_reference(reference)?.ok_or_else(|| {
                warn!(
                    reference = %reference,
                    "Settlement for unknown reference; possible forged payload"
                );
                LedgerError::NotFound(format!("transaction {reference}"))
            })?;

            if row.is_terminal() {
                return Ok(SettleResult::AlreadyTerminal);
            }

            if success {
                let mut wallet = txn.wallet_by_user(&row.user_id)?.ok_or_else(|| {
                    LedgerError::NotFound(format!("wallet for user {}", row.user_id))
                })?;
                wallet.balance = wallet.balance.checked_add(amount).ok_or_else(|| {
                    LedgerError::Validation("credit overflows wallet balance".into())
                })?;
                txn.update_wallet(&mut wallet)?;
                row.mark_success(gateway_response);
            } else {
                row.mark_failed(gateway_response);
            }
            txn.update_transaction(&row)?;

            info!(
                reference = %reference,
                status = ?row.status,
                amount = %amount,
                "Settled transaction"
            );
            Ok(SettleResult::Applied(row.status))
        })
    }
}
