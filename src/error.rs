// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Service-level error taxonomy.
//!
//! Every ledger-mutating error aborts the enclosing atomic unit wholesale;
//! there is no partial commit. Idempotent duplicate detection is never an
//! error — duplicates return the original outcome as success.

use crate::gateway::GatewayError;
use crate::money::Money;
use crate::storage::StoreError;

/// Errors surfaced at the wallet-service and reconciler boundary.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Input rejected before any storage access.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown wallet or transaction reference.
    #[error("not found: {0}")]
    NotFound(String),

    /// Debit would take the balance below zero; never silently clamped.
    #[error("insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: Money, requested: Money },

    /// Wallet-number generation exhausted its retry budget; caller may retry.
    #[error("wallet number allocation failed: {0}")]
    AllocationFailed(String),

    /// Optimistic-concurrency loss after internal retries.
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    /// The gateway refused or could not start a charge; nothing was written.
    #[error("payment initiation failed: {0}")]
    PaymentInitiationFailed(#[source] GatewayError),

    /// Transient gateway failure; ledger state stays pending and the
    /// operation is retried by polling or webhook re-delivery.
    #[error("gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// Webhook signature missing or mismatched; rejected with no state change.
    #[error("webhook signature invalid")]
    SignatureInvalid,

    /// Reference collision. Unreachable given the reference scheme; treated
    /// as an integrity violation, never masked.
    #[error("duplicate transaction reference: {0}")]
    DuplicateReference(String),

    /// Underlying storage failure.
    #[error("storage error: {0}")]
    Storage(StoreError),
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => LedgerError::NotFound(what),
            StoreError::DuplicateReference(reference) => LedgerError::DuplicateReference(reference),
            StoreError::ConcurrentModification(what) => LedgerError::ConcurrentModification(what),
            StoreError::AllocationFailed(what) => LedgerError::AllocationFailed(what),
            other => LedgerError::Storage(other),
        }
    }
}
