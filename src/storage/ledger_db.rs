// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded ledger database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `wallets`: user_id → serialized Wallet
//! - `wallet_numbers`: wallet_number → user_id (uniqueness index)
//! - `transactions`: reference → serialized TransactionRecord
//! - `user_tx_index`: composite key (user_id|!timestamp|reference) → reference
//! - `idempotency`: scoped idempotency key → reference
//! - `pending_tx_index`: reference → user_id (feeds the settlement poller)
//!
//! ## Atomic units
//!
//! All mutations go through [`LedgerDb::run_atomic`]: one redb write
//! transaction, committed only if the closure returns `Ok`. A closure error
//! aborts the transaction and leaves the wallet and transaction tables
//! indistinguishable from never having been touched.
//!
//! Wallet rows carry a version counter. [`LedgerTxn::update_wallet`] refuses
//! to apply an update whose version no longer matches the stored row, so a
//! writer holding a stale read aborts instead of clobbering newer state.

use std::path::Path;

use chrono::Utc;
use rand::Rng;
use redb::{
    Database, ReadableDatabase, ReadableTable, Table, TableDefinition, WriteTransaction,
};

use crate::idempotency::IdempotencyKey;
use crate::models::{TransactionRecord, TxStatus, Wallet};

// =============================================================================
// Table Definitions
// =============================================================================

/// Primary wallet table: user_id → Wallet (JSON bytes).
const WALLETS: TableDefinition<&str, &[u8]> = TableDefinition::new("wallets");

/// Uniqueness index: wallet_number → user_id.
const WALLET_NUMBERS: TableDefinition<&str, &str> = TableDefinition::new("wallet_numbers");

/// Primary transaction table: reference → TransactionRecord (JSON bytes).
const TRANSACTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("transactions");

/// History index: composite key → reference.
/// Key format: `user_id|!timestamp_be|reference` for descending-time scans.
const USER_TX_INDEX: TableDefinition<&[u8], &str> = TableDefinition::new("user_tx_index");

/// Idempotency index: scoped key → reference of the recorded outcome.
const IDEMPOTENCY: TableDefinition<&str, &str> = TableDefinition::new("idempotency");

/// Status index over non-terminal rows: reference → user_id.
const PENDING_TX_INDEX: TableDefinition<&str, &str> = TableDefinition::new("pending_tx_index");

/// Wallet number allocation attempts before giving up.
const WALLET_NUMBER_ATTEMPTS: usize = 5;

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("duplicate reference: {0}")]
    DuplicateReference(String),

    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("wallet number allocation failed: {0}")]
    AllocationFailed(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// Index Key Helpers
// =============================================================================

/// Build a composite key for the user_tx_index table.
///
/// Format: `user_id | inverted_timestamp_be_bytes | reference`
///
/// The inverted timestamp ensures newest-first ordering when scanning forward.
fn make_index_key(user_id: &str, timestamp_millis: i64, reference: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(user_id.len() + 1 + 8 + 1 + reference.len());
    key.extend_from_slice(user_id.as_bytes());
    key.push(b'|');
    key.extend_from_slice(&(!timestamp_millis as u64).to_be_bytes());
    key.push(b'|');
    key.extend_from_slice(reference.as_bytes());
    key
}

/// Build a prefix key for range scanning all transactions of a user.
fn make_prefix(user_id: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(user_id.len() + 1);
    prefix.extend_from_slice(user_id.as_bytes());
    prefix.push(b'|');
    prefix
}

/// Build the upper bound for a range scan (prefix with 0xFF bytes appended).
fn make_prefix_end(user_id: &str) -> Vec<u8> {
    let mut end = Vec::with_capacity(user_id.len() + 1 + 20);
    end.extend_from_slice(user_id.as_bytes());
    end.push(b'|');
    end.extend_from_slice(&[0xFF; 20]);
    end
}

/// 12-digit wallet number candidate: 10-digit unix-seconds suffix plus a
/// 2-digit random disambiguator. Uniqueness is verified against the
/// wallet_numbers table before use.
fn wallet_number_candidate() -> String {
    let secs = Utc::now().timestamp();
    let suffix: u32 = rand::thread_rng().gen_range(0..100);
    format!("{secs}{suffix:02}")
}

// =============================================================================
// LedgerTxn — one atomic unit
// =============================================================================

/// Handle on an open atomic unit.
///
/// All reads performed through this handle see the unit's own writes; all
/// writes commit or abort together with the unit.
pub struct LedgerTxn<'txn> {
    wallets: Table<'txn, &'static str, &'static [u8]>,
    wallet_numbers: Table<'txn, &'static str, &'static str>,
    transactions: Table<'txn, &'static str, &'static [u8]>,
    user_tx_index: Table<'txn, &'static [u8], &'static str>,
    idempotency: Table<'txn, &'static str, &'static str>,
    pending_tx_index: Table<'txn, &'static str, &'static str>,
}

impl<'txn> LedgerTxn<'txn> {
    fn open(txn: &'txn WriteTransaction) -> StoreResult<Self> {
        Ok(Self {
            wallets: txn.open_table(WALLETS)?,
            wallet_numbers: txn.open_table(WALLET_NUMBERS)?,
            transactions: txn.open_table(TRANSACTIONS)?,
            user_tx_index: txn.open_table(USER_TX_INDEX)?,
            idempotency: txn.open_table(IDEMPOTENCY)?,
            pending_tx_index: txn.open_table(PENDING_TX_INDEX)?,
        })
    }

    /// Load a wallet by owning user.
    pub fn wallet_by_user(&self, user_id: &str) -> StoreResult<Option<Wallet>> {
        match self.wallets.get(user_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Load a wallet by its public wallet number.
    pub fn wallet_by_number(&self, wallet_number: &str) -> StoreResult<Option<Wallet>> {
        let user_id = match self.wallet_numbers.get(wallet_number)? {
            Some(value) => value.value().to_string(),
            None => return Ok(None),
        };
        self.wallet_by_user(&user_id)
    }

    /// Whether a wallet number is already allocated.
    pub fn wallet_number_taken(&self, wallet_number: &str) -> StoreResult<bool> {
        Ok(self.wallet_numbers.get(wallet_number)?.is_some())
    }

    /// Insert a brand-new wallet and claim its number.
    pub fn insert_wallet(&mut self, wallet: &Wallet) -> StoreResult<()> {
        if self.wallets.get(wallet.user_id.as_str())?.is_some() {
            return Err(StoreError::AlreadyExists(format!(
                "wallet for user {}",
                wallet.user_id
            )));
        }
        if self.wallet_numbers.get(wallet.wallet_number.as_str())?.is_some() {
            return Err(StoreError::AlreadyExists(format!(
                "wallet number {}",
                wallet.wallet_number
            )));
        }

        let json = serde_json::to_vec(wallet)?;
        self.wallets.insert(wallet.user_id.as_str(), json.as_slice())?;
        self.wallet_numbers
            .insert(wallet.wallet_number.as_str(), wallet.user_id.as_str())?;
        Ok(())
    }

    /// Conditionally update a wallet row.
    ///
    /// The update only applies if the stored version still matches the
    /// version the caller read; otherwise the row changed underneath the
    /// caller and the unit must abort with `ConcurrentModification`. On
    /// success the version is bumped and `updated_at` refreshed in place.
    pub fn update_wallet(&mut self, wallet: &mut Wallet) -> StoreResult<()> {
        let stored_version = {
            let existing = self.wallets.get(wallet.user_id.as_str())?.ok_or_else(|| {
                StoreError::NotFound(format!("wallet for user {}", wallet.user_id))
            })?;
            let stored: Wallet = serde_json::from_slice(existing.value())?;
            stored.version
        };

        if stored_version != wallet.version {
            return Err(StoreError::ConcurrentModification(format!(
                "wallet for user {} moved from version {} to {}",
                wallet.user_id, wallet.version, stored_version
            )));
        }

        wallet.version += 1;
        wallet.updated_at = Utc::now();

        let json = serde_json::to_vec(wallet)?;
        self.wallets.insert(wallet.user_id.as_str(), json.as_slice())?;
        Ok(())
    }

    /// Load a transaction row by reference.
    pub fn transaction_by_reference(
        &self,
        reference: &str,
    ) -> StoreResult<Option<TransactionRecord>> {
        match self.transactions.get(reference)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Insert one or more transaction rows and their index entries.
    ///
    /// A reference collision fails the whole unit with `DuplicateReference`
    /// before any row is written.
    pub fn append_transactions(&mut self, rows: &[TransactionRecord]) -> StoreResult<()> {
        for row in rows {
            if self.transactions.get(row.reference.as_str())?.is_some() {
                return Err(StoreError::DuplicateReference(row.reference.clone()));
            }
        }

        for row in rows {
            let json = serde_json::to_vec(row)?;
            self.transactions
                .insert(row.reference.as_str(), json.as_slice())?;

            let key = make_index_key(
                &row.user_id,
                row.created_at.timestamp_millis(),
                &row.reference,
            );
            self.user_tx_index
                .insert(key.as_slice(), row.reference.as_str())?;

            if row.status == TxStatus::Pending {
                self.pending_tx_index
                    .insert(row.reference.as_str(), row.user_id.as_str())?;
            }
        }
        Ok(())
    }

    /// Overwrite an existing transaction row (status settlement).
    ///
    /// The history index is keyed by `created_at`, which never changes, so
    /// only the pending index needs maintenance here.
    pub fn update_transaction(&mut self, row: &TransactionRecord) -> StoreResult<()> {
        if self.transactions.get(row.reference.as_str())?.is_none() {
            return Err(StoreError::NotFound(format!(
                "transaction {}",
                row.reference
            )));
        }

        let json = serde_json::to_vec(row)?;
        self.transactions
            .insert(row.reference.as_str(), json.as_slice())?;

        if row.is_terminal() {
            self.pending_tx_index.remove(row.reference.as_str())?;
        }
        Ok(())
    }

    /// Look up a prior successful outcome recorded under an idempotency key.
    pub fn find_completed(
        &self,
        key: &IdempotencyKey,
    ) -> StoreResult<Option<TransactionRecord>> {
        let reference = match self.idempotency.get(key.as_str())? {
            Some(value) => value.value().to_string(),
            None => return Ok(None),
        };
        let row = self.transaction_by_reference(&reference)?;
        Ok(row.filter(|tx| tx.status == TxStatus::Success))
    }

    /// Record an idempotency key against its outcome reference.
    ///
    /// Must run in the same unit that creates the outcome, so a concurrent
    /// duplicate cannot slip between check and write.
    pub fn record_idempotency(
        &mut self,
        key: &IdempotencyKey,
        reference: &str,
    ) -> StoreResult<()> {
        self.idempotency.insert(key.as_str(), reference)?;
        Ok(())
    }
}

// =============================================================================
// LedgerDb
// =============================================================================

/// Durable, transactional store for wallets and transactions.
pub struct LedgerDb {
    db: Database,
}

impl LedgerDb {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(WALLETS)?;
            let _ = write_txn.open_table(WALLET_NUMBERS)?;
            let _ = write_txn.open_table(TRANSACTIONS)?;
            let _ = write_txn.open_table(USER_TX_INDEX)?;
            let _ = write_txn.open_table(IDEMPOTENCY)?;
            let _ = write_txn.open_table(PENDING_TX_INDEX)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Execute `f` inside a single all-or-nothing unit.
    ///
    /// Any error raised by the closure aborts the unit with no partial
    /// effect. Generic over the error type so service closures can mix
    /// store errors with their own taxonomy via `?`.
    pub fn run_atomic<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<StoreError>,
        F: FnOnce(&mut LedgerTxn<'_>) -> Result<T, E>,
    {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| E::from(StoreError::from(e)))?;

        let outcome = {
            let mut txn = match LedgerTxn::open(&write_txn) {
                Ok(txn) => txn,
                Err(e) => return Err(E::from(e)),
            };
            f(&mut txn)
        };

        match outcome {
            Ok(value) => {
                write_txn
                    .commit()
                    .map_err(|e| E::from(StoreError::from(e)))?;
                Ok(value)
            }
            Err(err) => {
                let _ = write_txn.abort();
                Err(err)
            }
        }
    }

    /// Get-or-create the wallet for a user.
    ///
    /// Allocation tries up to five 12-digit candidates (unix-seconds suffix
    /// plus two random digits), each verified unique, then signals
    /// `AllocationFailed`. Concurrent first-time calls for the same user
    /// serialize on the write transaction, so at most one row is created.
    pub fn create_wallet_if_absent(&self, user_id: &str) -> StoreResult<Wallet> {
        self.run_atomic(|txn| {
            if let Some(existing) = txn.wallet_by_user(user_id)? {
                return Ok(existing);
            }

            for _ in 0..WALLET_NUMBER_ATTEMPTS {
                let candidate = wallet_number_candidate();
                if txn.wallet_number_taken(&candidate)? {
                    continue;
                }
                let wallet = Wallet::new(user_id, candidate);
                txn.insert_wallet(&wallet)?;
                tracing::info!(
                    user_id = %user_id,
                    wallet_number = %wallet.wallet_number,
                    "Created wallet"
                );
                return Ok(wallet);
            }

            Err(StoreError::AllocationFailed(format!(
                "exhausted {WALLET_NUMBER_ATTEMPTS} wallet number candidates"
            )))
        })
    }

    // =========================================================================
    // Read-only queries
    // =========================================================================

    /// Load a wallet by owning user.
    pub fn wallet_by_user(&self, user_id: &str) -> StoreResult<Option<Wallet>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(WALLETS)?;
        match table.get(user_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Load a wallet by its public wallet number.
    pub fn wallet_by_number(&self, wallet_number: &str) -> StoreResult<Option<Wallet>> {
        let read_txn = self.db.begin_read()?;
        let numbers = read_txn.open_table(WALLET_NUMBERS)?;
        let user_id = match numbers.get(wallet_number)? {
            Some(value) => value.value().to_string(),
            None => return Ok(None),
        };
        let wallets = read_txn.open_table(WALLETS)?;
        match wallets.get(user_id.as_str())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Load a transaction row by reference.
    pub fn transaction_by_reference(
        &self,
        reference: &str,
    ) -> StoreResult<Option<TransactionRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TRANSACTIONS)?;
        match table.get(reference)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// List a user's transactions, newest first.
    pub fn transactions_by_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<TransactionRecord>> {
        let read_txn = self.db.begin_read()?;
        let idx_table = read_txn.open_table(USER_TX_INDEX)?;
        let tx_table = read_txn.open_table(TRANSACTIONS)?;

        let prefix = make_prefix(user_id);
        let prefix_end = make_prefix_end(user_id);

        let mut results = Vec::new();
        for entry in idx_table.range(prefix.as_slice()..prefix_end.as_slice())? {
            let entry = entry?;
            let reference = entry.1.value().to_string();
            if let Some(value) = tx_table.get(reference.as_str())? {
                results.push(serde_json::from_slice(value.value())?);
            }
            if results.len() >= limit {
                break;
            }
        }
        Ok(results)
    }

    /// References of all non-terminal transactions (poller sweep).
    pub fn pending_references(&self) -> StoreResult<Vec<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PENDING_TX_INDEX)?;
        let mut references = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            references.push(entry.0.value().to_string());
        }
        Ok(references)
    }
}

// =============================================================================
// Tests
// =============================================================================
