// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet business logic: balances, deposits, transfers, history.
//!
//! Composes the ledger store with the payment gateway. Every balance-touching
//! operation goes through get-or-create, so a plain balance query can create
//! a wallet row as a side effect.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::LedgerError;
use crate::gateway::{ChargeRequest, PaymentGateway};
use crate::idempotency::IdempotencyKey;
use crate::models::{
    DepositInit, TransactionRecord, TransferReceipt, TxKind, Wallet, META_COUNTERPARTY,
    META_EMAIL, META_IDEMPOTENCY_KEY,
};
use crate::money::Money;
use crate::storage::LedgerDb;

/// Internal retries after an optimistic-concurrency loss before surfacing
/// `ConcurrentModification` to the caller.
const TRANSFER_RETRY_ATTEMPTS: usize = 3;

/// Business-logic facade over the ledger store and payment gateway.
///
/// Storage and gateway are passed in by reference, never inherited, so the
/// logic runs unchanged against any conformant store or a test gateway.
pub struct WalletService {
    ledger: Arc<LedgerDb>,
    gateway: Arc<dyn PaymentGateway>,
    callback_url: Option<String>,
}

impl WalletService {
    pub fn new(ledger: Arc<LedgerDb>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self {
            ledger,
            gateway,
            callback_url: None,
        }
    }

    /// Set the URL the gateway redirects users to after a hosted charge.
    pub fn with_callback_url(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }

    /// Get the user's wallet, creating it on first access.
    pub fn get_or_create_wallet(&self, user_id: &str) -> Result<Wallet, LedgerError> {
        if user_id.trim().is_empty() {
            return Err(LedgerError::Validation("user id must not be empty".into()));
        }
        Ok(self.ledger.create_wallet_if_absent(user_id)?)
    }

    /// Current balance. Creates the wallet if absent.
    pub fn get_balance(&self, user_id: &str) -> Result<Money, LedgerError> {
        Ok(self.get_or_create_wallet(user_id)?.balance)
    }

    /// Full wallet row. Creates the wallet if absent.
    pub fn get_wallet_details(&self, user_id: &str) -> Result<Wallet, LedgerError> {
        self.get_or_create_wallet(user_id)
    }

    /// Start a deposit: remote charge first, pending ledger row second.
    ///
    /// If the gateway call fails nothing is written, so a timed-out
    /// initiation can never leave behind a pending row whose gateway handle
    /// the caller does not know.
    pub async fn initiate_deposit(
        &self,
        user_id: &str,
        amount_major: f64,
        email: &str,
    ) -> Result<DepositInit, LedgerError> {
        let amount = Money::from_major(amount_major);
        if !amount.is_positive() {
            return Err(LedgerError::Validation(
                "deposit amount must be positive".into(),
            ));
        }
        if email.trim().is_empty() {
            return Err(LedgerError::Validation(
                "depositor email must not be empty".into(),
            ));
        }

        let wallet = self.get_or_create_wallet(user_id)?;
        let reference = format!("dep_{}_{}", Utc::now().timestamp_millis(), user_id);

        let mut metadata = Map::new();
        metadata.insert(META_EMAIL.to_string(), Value::String(email.to_string()));
        metadata.insert(
            "wallet_number".to_string(),
            Value::String(wallet.wallet_number.clone()),
        );

        let request = ChargeRequest {
            email: email.to_string(),
            amount,
            reference: reference.clone(),
            callback_url: self.callback_url.clone(),
            metadata: metadata.clone(),
        };

        let authorization = self
            .gateway
            .initialize_charge(&request)
            .await
            .map_err(LedgerError::PaymentInitiationFailed)?;

        let row = TransactionRecord::new_pending_deposit(
            user_id,
            &reference,
            amount,
            Some(authorization.access_code.clone()),
            metadata,
        );
        self.ledger.run_atomic(|txn| {
            txn.append_transactions(std::slice::from_ref(&row))?;
            Ok::<_, LedgerError>(())
        })?;

        info!(
            user_id = %user_id,
            reference = %reference,
            amount = %amount,
            "Deposit initiated"
        );

        Ok(DepositInit {
            reference,
            authorization_url: authorization.authorization_url,
            access_code: authorization.access_code,
        })
    }

    /// Move funds between two wallets, idempotently.
    ///
    /// Without `idempotency_token` the dedup key is derived from
    /// (sender, recipient wallet number, amount), so a repeat call with
    /// identical parameters returns the original receipt instead of moving
    /// funds again. Callers that need to distinguish genuine repeats supply
    /// their own token.
    pub fn transfer(
        &self,
        from_user: &str,
        to_wallet_number: &str,
        amount_major: f64,
        idempotency_token: Option<&str>,
    ) -> Result<TransferReceipt, LedgerError> {
        let amount = Money::from_major(amount_major);
        if !amount.is_positive() {
            return Err(LedgerError::Validation(
                "transfer amount must be positive".into(),
            ));
        }
        validate_wallet_number(to_wallet_number)?;

        self.get_or_create_wallet(from_user)?;

        let key = match idempotency_token {
            Some(token) => IdempotencyKey::with_token(token),
            None => IdempotencyKey::for_transfer(from_user, to_wallet_number, amount),
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_transfer(from_user, to_wallet_number, amount, &key) {
                Err(LedgerError::ConcurrentModification(what))
                    if attempt < TRANSFER_RETRY_ATTEMPTS =>
                {
                    debug!(
                        attempt,
                        conflict = %what,
                        "Retrying transfer after concurrent modification"
                    );
                }
                other => return other,
            }
        }
    }

    /// One transfer attempt inside a single atomic unit.
    fn try_transfer(
        &self,
        from_user: &str,
        to_wallet_number: &str,
        amount: Money,
        key: &IdempotencyKey,
    ) -> Result<TransferReceipt, LedgerError> {
        self.ledger.run_atomic(|txn| {
            // Duplicate short-circuit: same unit as the effect it guards.
            if let Some(prior) = txn.find_completed(key)? {
                debug!(
                    reference = %prior.reference,
                    "Transfer duplicate collapsed to original outcome"
                );
                return Ok(TransferReceipt {
                    reference: prior.reference,
                    amount,
                });
            }

            let mut sender = txn.wallet_by_user(from_user)?.ok_or_else(|| {
                LedgerError::NotFound(format!("wallet for user {from_user}"))
            })?;
            let mut recipient = txn.wallet_by_number(to_wallet_number)?.ok_or_else(|| {
                LedgerError::NotFound(format!("wallet {to_wallet_number}"))
            })?;

            if recipient.user_id == sender.user_id {
                return Err(LedgerError::Validation(
                    "cannot transfer to your own wallet".into(),
                ));
            }

            if sender.balance < amount {
                return Err(LedgerError::InsufficientBalance {
                    available: sender.balance,
                    requested: amount,
                });
            }

            // Debit before credit: a balance violation aborts the unit
            // before any credit is applied.
            sender.balance = sender.balance.checked_sub(amount).ok_or_else(|| {
                LedgerError::Validation("transfer amount out of range".into())
            })?;
            txn.update_wallet(&mut sender)?;

            recipient.balance = recipient.balance.checked_add(amount).ok_or_else(|| {
                LedgerError::Validation("credit overflows recipient balance".into())
            })?;
            txn.update_wallet(&mut recipient)?;

            let now_millis = Utc::now().timestamp_millis();
            let out_reference = format!("trf_{now_millis}_{from_user}");
            let in_reference = format!("rcv_{}_{}", now_millis, recipient.user_id);

            let mut out_meta = Map::new();
            out_meta.insert(
                META_IDEMPOTENCY_KEY.to_string(),
                Value::String(key.to_string()),
            );
            out_meta.insert(
                META_COUNTERPARTY.to_string(),
                Value::String(recipient.wallet_number.clone()),
            );

            let mut in_meta = Map::new();
            in_meta.insert(
                META_IDEMPOTENCY_KEY.to_string(),
                Value::String(key.to_string()),
            );
            in_meta.insert(
                META_COUNTERPARTY.to_string(),
                Value::String(sender.wallet_number.clone()),
            );

            let rows = [
                TransactionRecord::new_transfer_leg(
                    from_user,
                    &out_reference,
                    -amount,
                    TxKind::TransferOut,
                    out_meta,
                ),
                TransactionRecord::new_transfer_leg(
                    recipient.user_id.clone(),
                    &in_reference,
                    amount,
                    TxKind::TransferIn,
                    in_meta,
                ),
            ];
            txn.append_transactions(&rows)?;
            txn.record_idempotency(key, &out_reference)?;

            info!(
                from = %from_user,
                to = %recipient.user_id,
                amount = %amount,
                reference = %out_reference,
                "Transfer committed"
            );

            Ok(TransferReceipt {
                reference: out_reference,
                amount,
            })
        })
    }

    /// The user's transaction history, newest first.
    pub fn transaction_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>, LedgerError> {
        Ok(self.ledger.transactions_by_user(user_id, limit)?)
    }
}

fn validate_wallet_number(number: &str) -> Result<(), LedgerError> {
    let well_formed =
        (10..=13).contains(&number.len()) && number.chars().all(|c| c.is_ascii_digit());
    if well_formed {
        Ok(())
    } else {
        Err(LedgerError::Validation(format!(
            "malformed wallet number: {number}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{ChargeAuthorization, ChargeVerification, GatewayError};
    use crate::models::TxStatus;
    use crate::storage::StoreError;
    use async_trait::async_trait;

    struct StubGateway {
        fail_init: bool,
    }

    #[async_trait]
    impl PaymentGateway for StubGateway {
        async fn initialize_charge(
            &self,
            request: &ChargeRequest,
        ) -> Result<ChargeAuthorization, GatewayError> {
            if self.fail_init {
                return Err(GatewayError::Unavailable("gateway down".to_string()));
            }
            Ok(ChargeAuthorization {
                authorization_url: format!("https://checkout.example.com/{}", request.reference),
                access_code: format!("ac_{}", request.reference),
            })
        }

        async fn verify_transaction(
            &self,
            reference: &str,
        ) -> Result<ChargeVerification, GatewayError> {
            Err(GatewayError::NotFound(reference.to_string()))
        }
    }

    fn service_with(fail_init: bool) -> (WalletService, Arc<LedgerDb>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(LedgerDb::open(&dir.path().join("test.redb")).unwrap());
        let gateway = Arc::new(StubGateway { fail_init });
        (
            WalletService::new(Arc::clone(&ledger), gateway),
            ledger,
            dir,
        )
    }

    fn service() -> (WalletService, Arc<LedgerDb>, tempfile::TempDir) {
        service_with(false)
    }

    fn fund(ledger: &LedgerDb, user_id: &str, minor: i64) {
        ledger
            .run_atomic::<_, StoreError, _>(|txn| {
                let mut wallet = txn.wallet_by_user(user_id)?.unwrap();
                wallet.balance = wallet.balance.checked_add(Money::from_minor(minor)).unwrap();
                txn.update_wallet(&mut wallet)
            })
            .unwrap();
    }

    #[test]
    fn balance_query_creates_wallet() {
        let (service, ledger, _dir) = service();

        let balance = service.get_balance("user-1").unwrap();
        assert_eq!(balance, Money::ZERO);

        // The read created a row
        assert!(ledger.wallet_by_user("user-1").unwrap().is_some());
    }

    #[test]
    fn empty_user_id_is_rejected() {
        let (service, _ledger, _dir) = service();
        let err = service.get_balance("  ").unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn deposit_initiation_writes_one_pending_row() {
        let (service, ledger, _dir) = service();

        let init = service
            .initiate_deposit("user-1", 5000.0, "u1@example.com")
            .await
            .unwrap();

        assert!(init.reference.starts_with("dep_"));
        assert!(init.reference.ends_with("_user-1"));
        assert!(init.authorization_url.contains(&init.reference));

        let row = ledger
            .transaction_by_reference(&init.reference)
            .unwrap()
            .unwrap();
        assert_eq!(row.status, TxStatus::Pending);
        assert_eq!(row.kind, TxKind::Deposit);
        assert_eq!(row.amount, Money::from_minor(500_000));
        assert_eq!(row.gateway_reference.as_deref(), Some(init.access_code.as_str()));

        // Balance is untouched until the reconciler settles
        assert_eq!(service.get_balance("user-1").unwrap(), Money::ZERO);
        assert_eq!(ledger.pending_references().unwrap(), vec![init.reference]);
    }

    #[tokio::test]
    async fn deposit_rejects_non_positive_amount() {
        let (service, ledger, _dir) = service();

        let err = service
            .initiate_deposit("user-1", 0.0, "u1@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert!(ledger.pending_references().unwrap().is_empty());
    }

    #[tokio::test]
    async fn gateway_failure_writes_nothing() {
        let (service, ledger, _dir) = service_with(true);

        let err = service
            .initiate_deposit("user-1", 50.0, "u1@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::PaymentInitiationFailed(_)));

        assert!(ledger.pending_references().unwrap().is_empty());
        assert!(service.transaction_history("user-1", 10).unwrap().is_empty());
    }

    #[test]
    fn transfer_conserves_balances_with_two_rows() {
        let (service, ledger, _dir) = service();
        let sender = service.get_or_create_wallet("alice").unwrap();
        let recipient = service.get_or_create_wallet("bob").unwrap();
        fund(&ledger, "alice", 10_000);

        let receipt = service
            .transfer("alice", &recipient.wallet_number, 25.0, None)
            .unwrap();

        assert_eq!(receipt.amount, Money::from_minor(2500));
        assert_eq!(service.get_balance("alice").unwrap(), Money::from_minor(7500));
        assert_eq!(service.get_balance("bob").unwrap(), Money::from_minor(2500));

        let alice_rows = service.transaction_history("alice", 10).unwrap();
        let bob_rows = service.transaction_history("bob", 10).unwrap();
        assert_eq!(alice_rows.len(), 1);
        assert_eq!(bob_rows.len(), 1);

        let out = &alice_rows[0];
        let incoming = &bob_rows[0];
        assert_eq!(out.kind, TxKind::TransferOut);
        assert_eq!(incoming.kind, TxKind::TransferIn);
        assert_eq!(out.amount.checked_add(incoming.amount), Some(Money::ZERO));
        assert_eq!(
            out.metadata.get(META_IDEMPOTENCY_KEY),
            incoming.metadata.get(META_IDEMPOTENCY_KEY)
        );
        assert_eq!(
            out.metadata.get(META_COUNTERPARTY).and_then(|v| v.as_str()),
            Some(recipient.wallet_number.as_str())
        );
        assert_eq!(
            incoming.metadata.get(META_COUNTERPARTY).and_then(|v| v.as_str()),
            Some(sender.wallet_number.as_str())
        );
    }

    #[test]
    fn insufficient_balance_changes_nothing() {
        let (service, ledger, _dir) = service();
        service.get_or_create_wallet("alice").unwrap();
        let recipient = service.get_or_create_wallet("bob").unwrap();
        fund(&ledger, "alice", 100);

        let err = service
            .transfer("alice", &recipient.wallet_number, 2.0, None)
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance {
                available,
                requested,
            } if available == Money::from_minor(100) && requested == Money::from_minor(200)
        ));

        assert_eq!(service.get_balance("alice").unwrap(), Money::from_minor(100));
        assert_eq!(service.get_balance("bob").unwrap(), Money::ZERO);
        assert!(service.transaction_history("alice", 10).unwrap().is_empty());
    }

    #[test]
    fn duplicate_transfer_collapses_to_one_net_change() {
        let (service, ledger, _dir) = service();
        service.get_or_create_wallet("alice").unwrap();
        let recipient = service.get_or_create_wallet("bob").unwrap();
        fund(&ledger, "alice", 10_000);

        let first = service
            .transfer("alice", &recipient.wallet_number, 25.0, None)
            .unwrap();
        let second = service
            .transfer("alice", &recipient.wallet_number, 25.0, None)
            .unwrap();

        assert_eq!(first.reference, second.reference);
        assert_eq!(service.get_balance("alice").unwrap(), Money::from_minor(7500));
        assert_eq!(service.get_balance("bob").unwrap(), Money::from_minor(2500));
        assert_eq!(service.transaction_history("alice", 10).unwrap().len(), 1);
    }

    #[test]
    fn caller_tokens_distinguish_genuine_repeats() {
        let (service, ledger, _dir) = service();
        service.get_or_create_wallet("alice").unwrap();
        let recipient = service.get_or_create_wallet("bob").unwrap();
        fund(&ledger, "alice", 10_000);

        let first = service
            .transfer("alice", &recipient.wallet_number, 25.0, Some("req-1"))
            .unwrap();
        // References are timestamped per millisecond
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = service
            .transfer("alice", &recipient.wallet_number, 25.0, Some("req-2"))
            .unwrap();

        assert_ne!(first.reference, second.reference);
        assert_eq!(service.get_balance("alice").unwrap(), Money::from_minor(5000));
        assert_eq!(service.get_balance("bob").unwrap(), Money::from_minor(5000));
    }

    #[test]
    fn transfer_validates_inputs_before_storage() {
        let (service, ledger, _dir) = service();
        service.get_or_create_wallet("alice").unwrap();
        let own = service.get_or_create_wallet("alice").unwrap();
        fund(&ledger, "alice", 10_000);

        // Non-positive amount
        let err = service.transfer("alice", "172845600042", 0.0, None).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        // Malformed wallet number
        let err = service.transfer("alice", "12ab", 1.0, None).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        // Unknown recipient
        let err = service.transfer("alice", "9999999999", 1.0, None).unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));

        // Self transfer
        let err = service
            .transfer("alice", &own.wallet_number, 1.0, None)
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        assert_eq!(service.get_balance("alice").unwrap(), Money::from_minor(10_000));
    }

    #[test]
    fn concurrent_transfers_admit_exactly_one_winner() {
        let (service, ledger, _dir) = service();
        let service = Arc::new(service);
        service.get_or_create_wallet("alice").unwrap();
        let r1 = service.get_or_create_wallet("bob").unwrap();
        let r2 = service.get_or_create_wallet("carol").unwrap();
        fund(&ledger, "alice", 2500);

        // Both debits want the full balance; only one can fit.
        let mut handles = Vec::new();
        for number in [r1.wallet_number.clone(), r2.wallet_number.clone()] {
            let service = Arc::clone(&service);
            handles.push(std::thread::spawn(move || {
                service.transfer("alice", &number, 25.0, None)
            }));
        }

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(LedgerError::InsufficientBalance { .. })
        )));

        assert_eq!(service.get_balance("alice").unwrap(), Money::ZERO);
        let credited = service.get_balance("bob").unwrap().minor()
            + service.get_balance("carol").unwrap().minor();
        assert_eq!(credited, 2500);
    }

    #[test]
    fn history_is_newest_first() {
        let (service, ledger, _dir) = service();
        service.get_or_create_wallet("alice").unwrap();
        let bob = service.get_or_create_wallet("bob").unwrap();
        let carol = service.get_or_create_wallet("carol").unwrap();
        fund(&ledger, "alice", 10_000);

        service.transfer("alice", &bob.wallet_number, 10.0, None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let latest = service
            .transfer("alice", &carol.wallet_number, 20.0, None)
            .unwrap();

        let history = service.transaction_history("alice", 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].reference, latest.reference);
    }
}
