// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Idempotency key derivation.
//!
//! A key is a deterministic fingerprint of an operation's inputs, used to
//! detect and collapse duplicate invocations. Keys are scoped by operation
//! type so a transfer key can never match a deposit key.
//!
//! The default transfer key is derived from content (sender, recipient
//! wallet number, minor amount), which means two genuinely separate transfer
//! requests with identical parameters are indistinguishable from retries.
//! Callers that need to distinguish them pass their own token via
//! [`IdempotencyKey::with_token`].

use sha2::{Digest, Sha512};

use crate::money::Money;

/// Scoped idempotency key, e.g. `transfer:3fb4…`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Derive the key for a transfer from its content.
    pub fn for_transfer(from_user: &str, to_wallet_number: &str, amount: Money) -> Self {
        let mut hasher = Sha512::new();
        hasher.update(from_user.as_bytes());
        hasher.update([0u8]);
        hasher.update(to_wallet_number.as_bytes());
        hasher.update([0u8]);
        hasher.update(amount.minor().to_be_bytes());
        IdempotencyKey(format!("transfer:{}", hex::encode(hasher.finalize())))
    }

    /// Build a transfer key from a caller-supplied token instead of content.
    pub fn with_token(token: &str) -> Self {
        IdempotencyKey(format!("transfer:token:{token}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
