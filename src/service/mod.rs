// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Ledger Services
//!
//! The two writers of wallet and transaction state:
//!
//! - [`WalletService`] - caller-driven operations: balances, deposit
//!   initiation, transfers, history
//! - [`Reconciler`] - gateway-driven settlement: webhook handling and
//!   verification polling
//!
//! Both go through the same storage atomic units; there is no third writer.

pub mod reconciler;
pub mod wallets;

pub use reconciler::{Reconciler, VerifyOutcome, WebhookOutcome};
pub use wallets::WalletService;
