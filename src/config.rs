// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration Constants
//!
//! This module defines environment variable names and default values used
//! throughout the crate. Configuration is loaded from the environment by the
//! embedding binary.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `LEDGER_DB_PATH` | Path to the embedded ledger database file | `./data/ledger.redb` |
//! | `PAYSTACK_SECRET_KEY` | Gateway API secret; also the HMAC key for webhook signatures | Required |
//! | `PAYSTACK_API_BASE_URL` | Gateway API base URL | `https://api.paystack.co` |
//! | `PAYSTACK_CALLBACK_URL` | Redirect target after a hosted charge | Optional |
//! | `RUST_LOG` | Log level filter | `info` |

/// Environment variable name for the ledger database file path.
///
/// The database is a single redb file holding every wallet and transaction
/// table. The parent directory is created on open if missing.
pub const LEDGER_DB_PATH_ENV: &str = "LEDGER_DB_PATH";

/// Default ledger database path when `LEDGER_DB_PATH` is unset.
pub const DEFAULT_LEDGER_DB_PATH: &str = "./data/ledger.redb";
