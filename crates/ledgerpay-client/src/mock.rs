//! In-memory gateway backed by `MockLedger`, with fault injection for tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ledgerpay_ledger_mock::MockLedger;
use ledgerpay_types::{
    AccountState, Address, Drops, Escrow, LedgerTime, SignedTransaction, SubmissionOutcome,
    SubmissionResult, TxHash,
};
use tracing::debug;

use crate::gateway::{GatewayError, LedgerGateway};

/// When pending transactions get validated by the mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// Close a ledger on the first status poll of a pending transaction.
    OnFirstPoll,
    /// Close a ledger once a pending transaction has been polled `n` times.
    AfterPolls(u32),
    /// Never close on polling; the test closes ledgers itself.
    Hold,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub account_state: u32,
    pub fee: u32,
    pub network_time: u32,
    pub submit: u32,
    pub status: u32,
    pub escrows: u32,
}

impl CallCounts {
    pub fn total(&self) -> u32 {
        self.account_state + self.fee + self.network_time + self.submit + self.status + self.escrows
    }
}

#[derive(Debug, Default)]
struct Counters {
    account_state: AtomicU32,
    fee: AtomicU32,
    network_time: AtomicU32,
    submit: AtomicU32,
    status: AtomicU32,
    escrows: AtomicU32,
}

#[derive(Debug)]
struct Faults {
    /// Submissions still to fail with a network error.
    submit_failures: u32,
    /// Whether a failing submission still reaches the ledger first.
    deliver_failed_submits: bool,
    status_failures: u32,
    status_error: GatewayError,
    validation: ValidationMode,
    polls_since_close: u32,
    submitted: Vec<TxHash>,
}

#[derive(Clone)]
pub struct MockGateway {
    ledger: Arc<Mutex<MockLedger>>,
    faults: Arc<Mutex<Faults>>,
    counters: Arc<Counters>,
    poll_interval: Duration,
}

impl MockGateway {
    pub fn new(ledger: MockLedger) -> Self {
        Self {
            ledger: Arc::new(Mutex::new(ledger)),
            faults: Arc::new(Mutex::new(Faults {
                submit_failures: 0,
                deliver_failed_submits: false,
                status_failures: 0,
                status_error: GatewayError::Timeout,
                validation: ValidationMode::OnFirstPoll,
                polls_since_close: 0,
                submitted: Vec::new(),
            })),
            counters: Arc::new(Counters::default()),
            poll_interval: Duration::from_millis(100),
        }
    }

    pub fn with_validation(self, validation: ValidationMode) -> Self {
        self.set_validation(validation);
        self
    }

    /// Changes validation behavior for every clone of this gateway.
    pub fn set_validation(&self, validation: ValidationMode) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.validation = validation;
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// The next `count` submissions fail with a network error. With `delivered`
    /// set the ledger still receives each one, as when a response is lost.
    pub fn fail_next_submits(&self, count: u32, delivered: bool) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.submit_failures = count;
            faults.deliver_failed_submits = delivered;
        }
    }

    /// The next `count` status polls time out.
    pub fn fail_next_status_polls(&self, count: u32) {
        self.fail_next_status_polls_with(count, GatewayError::Timeout);
    }

    pub fn fail_next_status_polls_with(&self, count: u32, error: GatewayError) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.status_failures = count;
            faults.status_error = error;
        }
    }

    pub fn calls(&self) -> CallCounts {
        let c = &self.counters;
        CallCounts {
            account_state: c.account_state.load(Ordering::SeqCst),
            fee: c.fee.load(Ordering::SeqCst),
            network_time: c.network_time.load(Ordering::SeqCst),
            submit: c.submit.load(Ordering::SeqCst),
            status: c.status.load(Ordering::SeqCst),
            escrows: c.escrows.load(Ordering::SeqCst),
        }
    }

    /// Hashes of every submit call, in order, including repeats.
    pub fn submitted_hashes(&self) -> Vec<TxHash> {
        self.faults
            .lock()
            .map(|faults| faults.submitted.clone())
            .unwrap_or_default()
    }

    /// Direct access to the backing ledger for setup and assertions.
    pub fn ledger<R>(&self, f: impl FnOnce(&mut MockLedger) -> R) -> R {
        let mut lock = match self.ledger.lock() {
            Ok(lock) => lock,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut lock)
    }

    fn with_ledger<R>(&self, f: impl FnOnce(&mut MockLedger) -> R) -> Result<R, GatewayError> {
        let mut lock = self
            .ledger
            .lock()
            .map_err(|_| GatewayError::Internal("mutex poisoned".to_string()))?;
        Ok(f(&mut lock))
    }

    fn with_faults<R>(&self, f: impl FnOnce(&mut Faults) -> R) -> Result<R, GatewayError> {
        let mut lock = self
            .faults
            .lock()
            .map_err(|_| GatewayError::Internal("mutex poisoned".to_string()))?;
        Ok(f(&mut lock))
    }
}

#[async_trait]
impl LedgerGateway for MockGateway {
    async fn fetch_account_state(&self, address: &Address) -> Result<AccountState, GatewayError> {
        self.counters.account_state.fetch_add(1, Ordering::SeqCst);
        self.with_ledger(|ledger| ledger.account_state(address))?
            .ok_or(GatewayError::AccountNotFound(*address))
    }

    async fn fetch_fee(&self) -> Result<Drops, GatewayError> {
        self.counters.fee.fetch_add(1, Ordering::SeqCst);
        self.with_ledger(|ledger| ledger.base_fee)
    }

    async fn fetch_network_time(&self) -> Result<LedgerTime, GatewayError> {
        self.counters.network_time.fetch_add(1, Ordering::SeqCst);
        self.with_ledger(|ledger| ledger.close_time())
    }

    async fn submit(&self, tx: &SignedTransaction) -> Result<SubmissionResult, GatewayError> {
        self.counters.submit.fetch_add(1, Ordering::SeqCst);
        let (fail, deliver) = self.with_faults(|faults| {
            faults.submitted.push(*tx.hash());
            let fail = faults.submit_failures > 0;
            if fail {
                faults.submit_failures -= 1;
            }
            (fail, faults.deliver_failed_submits)
        })?;
        if fail {
            if deliver {
                self.with_ledger(|ledger| ledger.submit_blob(tx.blob()))?;
            }
            debug!(hash = %tx.hash(), delivered = deliver, "mock gateway dropped submit response");
            return Err(GatewayError::Network("connection reset by peer".to_string()));
        }
        self.with_ledger(|ledger| ledger.submit_blob(tx.blob()))
    }

    async fn transaction_status(&self, hash: &TxHash) -> Result<SubmissionResult, GatewayError> {
        self.counters.status.fetch_add(1, Ordering::SeqCst);
        let (failure, validation) = self.with_faults(|faults| {
            let failure = (faults.status_failures > 0).then(|| {
                faults.status_failures -= 1;
                faults.status_error.clone()
            });
            (failure, faults.validation)
        })?;
        if let Some(err) = failure {
            return Err(err);
        }

        let status = self.with_ledger(|ledger| ledger.transaction_status(hash))?;
        let Some(status) = status else {
            return Ok(SubmissionResult::new(
                *hash,
                SubmissionOutcome::ProvisionallyAccepted,
                "txnNotFound",
            ));
        };
        if status.outcome != SubmissionOutcome::ProvisionallyAccepted {
            return Ok(status);
        }

        let close = self.with_faults(|faults| {
            faults.polls_since_close += 1;
            let close = match validation {
                ValidationMode::OnFirstPoll => true,
                ValidationMode::AfterPolls(n) => faults.polls_since_close >= n,
                ValidationMode::Hold => false,
            };
            if close {
                faults.polls_since_close = 0;
            }
            close
        })?;
        if !close {
            return Ok(status);
        }
        self.with_ledger(|ledger| {
            ledger.close_ledger();
            ledger.transaction_status(hash).unwrap_or(status)
        })
    }

    async fn account_escrows(&self, owner: &Address) -> Result<Vec<Escrow>, GatewayError> {
        self.counters.escrows.fetch_add(1, Ordering::SeqCst);
        self.with_ledger(|ledger| ledger.escrows_of(owner))
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}
