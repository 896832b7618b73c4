// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Payment Gateway Interface
//!
//! The ledger treats the remote payment gateway as a black-box capability:
//! it can start a charge and report on one, nothing more. The concrete HTTP
//! client lives in [`paystack`]; tests substitute their own implementation.
//!
//! Error classification matters more than the calls themselves. A transient
//! failure ([`GatewayError::Unavailable`]) must leave ledger state pending
//! so polling or webhook re-delivery can finish the job, while a confirmed
//! negative answer ([`GatewayError::Rejected`] / [`GatewayError::NotFound`])
//! is terminal.

pub mod paystack;

pub use paystack::PaystackClient;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::money::Money;

/// Inputs for starting a remote charge.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    /// Payer email forwarded to the gateway.
    pub email: String,
    /// Charge amount in minor units.
    pub amount: Money,
    /// Ledger reference the gateway echoes back in reports.
    pub reference: String,
    /// Where the gateway redirects the user after the charge.
    pub callback_url: Option<String>,
    /// Opaque metadata stored alongside the charge.
    pub metadata: Map<String, Value>,
}

/// Handle returned by a successful charge initiation.
#[derive(Debug, Clone)]
pub struct ChargeAuthorization {
    /// Hosted page the user completes the charge on.
    pub authorization_url: String,
    /// Gateway session handle, kept as the transaction's external reference.
    pub access_code: String,
}

/// Settlement status reported by the gateway for a charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeStatus {
    Success,
    Failed,
    Pending,
}

impl ChargeStatus {
    /// Map a raw gateway status string onto the settlement status.
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "success" => ChargeStatus::Success,
            "failed" | "abandoned" | "reversed" => ChargeStatus::Failed,
            _ => ChargeStatus::Pending,
        }
    }
}

/// Result of polling the gateway for a charge.
#[derive(Debug, Clone)]
pub struct ChargeVerification {
    pub status: ChargeStatus,
    /// Settled amount in minor units.
    pub amount: Money,
    /// Diagnostic text, e.g. `Approved`.
    pub gateway_response: Option<String>,
}

/// Errors from the remote gateway, classified by what the ledger may do next.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Network failure or gateway-side outage; safe to retry.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    /// The gateway processed the request and declined it.
    #[error("gateway rejected request: {0}")]
    Rejected(String),

    /// The gateway does not know the reference.
    #[error("gateway has no record of reference: {0}")]
    NotFound(String),

    /// The gateway answered with a body the client could not interpret.
    #[error("gateway response was invalid: {0}")]
    InvalidResponse(String),
}

/// Remote charge capability the ledger composes against.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Start a remote charge; returns the redirect handle.
    async fn initialize_charge(
        &self,
        request: &ChargeRequest,
    ) -> Result<ChargeAuthorization, GatewayError>;

    /// Ask the gateway for the current state of a charge.
    async fn verify_transaction(&self, reference: &str)
        -> Result<ChargeVerification, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_status_mapping_is_stable() {
        assert_eq!(ChargeStatus::from_raw("success"), ChargeStatus::Success);
        assert_eq!(ChargeStatus::from_raw("FAILED"), ChargeStatus::Failed);
        assert_eq!(ChargeStatus::from_raw("abandoned"), ChargeStatus::Failed);
        assert_eq!(ChargeStatus::from_raw("ongoing"), ChargeStatus::Pending);
        assert_eq!(ChargeStatus::from_raw(" pending "), ChargeStatus::Pending);
    }
}
