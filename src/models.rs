// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Ledger Data Models
//!
//! This module defines the two durable entities of the ledger — [`Wallet`]
//! and [`TransactionRecord`] — plus the webhook payload shape delivered by
//! the payment gateway and the receipt types returned at the service
//! boundary.
//!
//! ## Invariants
//!
//! - A wallet balance never goes negative; enforced at the point of debit.
//! - A transaction `reference` is globally unique and immutable.
//! - `status` only moves `pending → success` or `pending → failed`; terminal
//!   rows are never re-entered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::money::Money;

/// Metadata key under which transfer rows carry their shared idempotency key.
pub const META_IDEMPOTENCY_KEY: &str = "idempotency_key";

/// Metadata key naming the other wallet involved in a transfer.
pub const META_COUNTERPARTY: &str = "counterparty";

/// Metadata key for the depositor email forwarded to the gateway.
pub const META_EMAIL: &str = "email";

// =============================================================================
// Wallet
// =============================================================================

/// A user's wallet row.
///
/// One wallet per user, created lazily on first access and never deleted.
/// `version` is the optimistic-concurrency counter: every committed update
/// bumps it, and an update built from a stale read is rejected by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Wallet {
    /// Opaque row identifier (UUID).
    pub id: String,
    /// Owning user; unique across wallets.
    pub user_id: String,
    /// Public-facing numeric identifier, 10-13 digits.
    pub wallet_number: String,
    /// Current balance in minor units; never negative.
    pub balance: Money,
    /// Optimistic-concurrency version, bumped on every committed update.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Create a zero-balance wallet for a user.
    pub fn new(user_id: impl Into<String>, wallet_number: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            wallet_number: wallet_number.into(),
            balance: Money::ZERO,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// What a transaction row did to its owner's balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    /// Gateway-funded credit, created pending and settled by the reconciler.
    Deposit,
    /// Debit leg of a peer-to-peer transfer.
    TransferOut,
    /// Credit leg of a peer-to-peer transfer.
    TransferIn,
}

/// Transaction lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    /// Awaiting gateway settlement.
    Pending,
    /// Settled; balance effect applied.
    Success,
    /// Settled negatively; no balance effect.
    Failed,
}

/// An immutable ledger entry on one user's transaction history.
///
/// `amount` is signed: positive rows credit the wallet, negative rows debit
/// it. A transfer produces two rows (out and in) that sum to zero.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionRecord {
    /// Opaque row identifier (UUID).
    pub id: String,
    /// The participant whose ledger this row belongs to.
    pub user_id: String,
    /// Globally unique, caller-visible reference.
    pub reference: String,
    /// Signed amount in minor units.
    pub amount: Money,
    pub kind: TxKind,
    pub status: TxStatus,
    /// External handle returned by the gateway at initiation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_reference: Option<String>,
    /// Diagnostic text from the gateway's settlement report.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_response: Option<String>,
    /// Opaque key-value map: idempotency key, counterparty info.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Set when the row reaches a terminal status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionRecord {
    /// Create a pending deposit row carrying the gateway's handle.
    pub fn new_pending_deposit(
        user_id: impl Into<String>,
        reference: impl Into<String>,
        amount: Money,
        gateway_reference: Option<String>,
        metadata: Map<String, Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            reference: reference.into(),
            amount,
            kind: TxKind::Deposit,
            status: TxStatus::Pending,
            gateway_reference,
            gateway_response: None,
            metadata,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create one leg of a transfer, already settled.
    ///
    /// Transfer legs are born terminal: the balance mutations commit in the
    /// same atomic unit that inserts the rows.
    pub fn new_transfer_leg(
        user_id: impl Into<String>,
        reference: impl Into<String>,
        amount: Money,
        kind: TxKind,
        metadata: Map<String, Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            reference: reference.into(),
            amount,
            kind,
            status: TxStatus::Success,
            gateway_reference: None,
            gateway_response: None,
            metadata,
            completed_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the row has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, TxStatus::Success | TxStatus::Failed)
    }

    /// Mark the row settled successfully.
    pub fn mark_success(&mut self, gateway_response: Option<String>) {
        self.status = TxStatus::Success;
        self.gateway_response = gateway_response;
        self.completed_at = Some(Utc::now());
        self.updated_at = Utc::now();
    }

    /// Mark the row settled negatively.
    pub fn mark_failed(&mut self, gateway_response: Option<String>) {
        self.status = TxStatus::Failed;
        self.gateway_response = gateway_response;
        self.completed_at = Some(Utc::now());
        self.updated_at = Utc::now();
    }
}

// =============================================================================
// Gateway webhook payload
// =============================================================================

/// A webhook delivery from the payment gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Event name, e.g. `charge.success` or `charge.failed`.
    pub event: String,
    pub data: WebhookData,
}

/// The charge payload inside a webhook delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookData {
    /// Ledger reference the gateway echoes back.
    pub reference: String,
    /// Settled amount in minor units.
    pub amount: i64,
    /// Gateway-side status string, `success` on a settled charge.
    pub status: String,
    /// Diagnostic text, e.g. `Approved`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_response: Option<String>,
}

// =============================================================================
// Service receipts
// =============================================================================

/// Returned by deposit initiation: where to send the user next.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositInit {
    /// Ledger reference for the pending deposit.
    pub reference: String,
    /// Gateway page the user completes the charge on.
    pub authorization_url: String,
    /// Gateway session handle.
    pub access_code: String,
}

/// Returned by a transfer, including the duplicate short-circuit case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferReceipt {
    /// The sender-side reference; duplicates return the original one.
    pub reference: String,
    /// Transferred amount in minor units.
    pub amount: Money,
}
