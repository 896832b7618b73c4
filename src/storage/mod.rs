// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Ledger Storage Module
//!
//! Durable, transactional storage for Wallet and Transaction rows on an
//! embedded redb database (pure Rust, ACID).
//!
//! ## Storage Layout
//!
//! One database file holds every table:
//!
//! ```text
//! wallets            user_id → Wallet
//! wallet_numbers     wallet_number → user_id
//! transactions       reference → TransactionRecord
//! user_tx_index      user_id|!timestamp|reference → reference
//! idempotency        scoped key → reference
//! pending_tx_index   reference → user_id
//! ```
//!
//! ## Important Notes
//!
//! - Every mutation runs inside [`LedgerDb::run_atomic`]; there is no write
//!   path that bypasses the atomic unit.
//! - Wallet updates are version-checked: a writer that read a row before
//!   another writer committed aborts with `ConcurrentModification` instead
//!   of applying against stale state.

pub mod ledger_db;

pub use ledger_db::{LedgerDb, LedgerTxn, StoreError, StoreResult};
