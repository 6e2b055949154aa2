//! LedgerAccount: high-level facade for payments, escrows and account queries.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use ledgerpay_crypto::KeyStore;
use ledgerpay_types::{
    Account, AccountState, Address, Drops, Escrow, EscrowAction, EscrowStatus, LedgerTime,
    PublicKey, Sequence, SubmissionResult,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::clock::{LedgerClock, NetworkClock};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::escrow::{EscrowError, EscrowStateMachine};
use crate::gateway::{retry_with_backoff, LedgerGateway};
use crate::sequencer::Sequencer;
use crate::submitter::ReliableSubmitter;
use crate::tx_builder::TxIntent;

type EscrowKey = (Address, Sequence);
type EscrowBook = BTreeMap<EscrowKey, EscrowStateMachine>;

/// Outcome of `create_escrow`: the submission and the tracked escrow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowReceipt {
    pub result: SubmissionResult,
    pub escrow: Escrow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Finish,
    Cancel,
}

impl Resolution {
    fn action(self) -> EscrowAction {
        match self {
            Self::Finish => EscrowAction::Finish,
            Self::Cancel => EscrowAction::Cancel,
        }
    }

    fn intent(self, owner: Address, offer_sequence: Sequence) -> TxIntent {
        match self {
            Self::Finish => TxIntent::EscrowFinish {
                owner,
                offer_sequence,
            },
            Self::Cancel => TxIntent::EscrowCancel {
                owner,
                offer_sequence,
            },
        }
    }
}

/// High-level client for one account: coordinates building, sequencing,
/// signing, submission and escrow bookkeeping. All methods take `&self`, so
/// one instance can be shared across tasks.
pub struct LedgerAccount<G, C> {
    keys: KeyStore,
    gateway: Arc<G>,
    submitter: ReliableSubmitter<G>,
    clock: C,
    escrows: Mutex<EscrowBook>,
    last_state: Mutex<Option<AccountState>>,
}

impl<G: LedgerGateway, C: LedgerClock> LedgerAccount<G, C> {
    pub fn new(keys: KeyStore, gateway: Arc<G>, clock: C, config: ClientConfig) -> Self {
        let sequencer = Arc::new(Sequencer::new(
            Arc::clone(&gateway),
            config.retry_policy.clone(),
        ));
        Self::with_sequencer(keys, gateway, sequencer, clock, config)
    }

    /// Shares `sequencer` with other clients submitting for the same account
    /// in this process.
    pub fn with_sequencer(
        keys: KeyStore,
        gateway: Arc<G>,
        sequencer: Arc<Sequencer<G>>,
        clock: C,
        config: ClientConfig,
    ) -> Self {
        Self {
            keys,
            submitter: ReliableSubmitter::new(Arc::clone(&gateway), sequencer, config),
            gateway,
            clock,
            escrows: Mutex::new(BTreeMap::new()),
            last_state: Mutex::new(None),
        }
    }

    pub fn address(&self) -> Address {
        self.keys.address()
    }

    pub fn public_key(&self) -> PublicKey {
        self.keys.public_key()
    }

    pub fn config(&self) -> &ClientConfig {
        self.submitter.config()
    }

    /// Validation deadline starting now, from the configured timeout.
    pub fn default_deadline(&self) -> Instant {
        Instant::now() + self.config().validation_timeout()
    }

    pub async fn send_payment(
        &self,
        destination: Address,
        amount: Drops,
        deadline: Instant,
    ) -> Result<SubmissionResult, ClientError> {
        let result = self
            .submitter
            .submit(
                &self.keys,
                TxIntent::Payment {
                    destination,
                    amount,
                },
                deadline,
            )
            .await?;
        info!(
            account = %self.address(),
            %destination,
            amount,
            outcome = ?result.outcome,
            "payment submitted"
        );
        Ok(result)
    }

    /// Creates an escrow. The escrow is identified by the sequence of the
    /// create transaction, returned in the receipt.
    pub async fn create_escrow(
        &self,
        destination: Address,
        amount: Drops,
        finish_after: Option<DateTime<Utc>>,
        cancel_after: Option<DateTime<Utc>>,
        deadline: Instant,
    ) -> Result<EscrowReceipt, ClientError> {
        let finish = finish_after.map(LedgerTime::from_datetime).transpose()?;
        let cancel = cancel_after.map(LedgerTime::from_datetime).transpose()?;
        let result = self
            .submitter
            .submit(
                &self.keys,
                TxIntent::EscrowCreate {
                    destination,
                    amount,
                    finish_after,
                    cancel_after,
                },
                deadline,
            )
            .await?;
        let offer_sequence = result.sequence.ok_or_else(|| {
            ClientError::Internal("submission result is missing its sequence".to_string())
        })?;

        let mut machine = EscrowStateMachine::requested(
            self.address(),
            destination,
            amount,
            offer_sequence,
            finish,
            cancel,
        );
        machine.on_create_result(&result);
        let escrow = machine.escrow().clone();
        self.with_escrows(|book| book.insert(escrow.key(), machine))?;
        info!(
            owner = %escrow.owner,
            offer_sequence,
            status = ?escrow.status,
            "escrow created"
        );
        Ok(EscrowReceipt { result, escrow })
    }

    /// Releases escrowed funds to the destination. Timing is checked locally
    /// first; an escrow that is not yet finishable costs no network calls
    /// when already tracked and the clock is local.
    pub async fn finish_escrow(
        &self,
        owner: Address,
        offer_sequence: Sequence,
        deadline: Instant,
    ) -> Result<SubmissionResult, ClientError> {
        self.resolve_escrow(owner, offer_sequence, Resolution::Finish, deadline)
            .await
    }

    /// Returns escrowed funds to the owner once `cancel_after` has passed.
    pub async fn cancel_escrow(
        &self,
        owner: Address,
        offer_sequence: Sequence,
        deadline: Instant,
    ) -> Result<SubmissionResult, ClientError> {
        self.resolve_escrow(owner, offer_sequence, Resolution::Cancel, deadline)
            .await
    }

    pub async fn account_info(&self) -> Result<Account, ClientError> {
        let address = self.address();
        let state = retry_with_backoff(&self.config().retry_policy, None, || {
            self.gateway.fetch_account_state(&address)
        })
        .await?;
        *self
            .last_state
            .lock()
            .map_err(|_| ClientError::Internal("account mutex poisoned".to_string()))? = Some(state);
        Ok(Account {
            address,
            public_key: self.public_key(),
            sequence: state.sequence,
            balance: state.balance,
        })
    }

    pub async fn account_balance(&self) -> Result<Drops, ClientError> {
        Ok(self.account_info().await?.balance)
    }

    /// Last account state read by `account_info`, without a network call.
    pub fn last_known_state(&self) -> Option<AccountState> {
        self.last_state.lock().ok().and_then(|state| *state)
    }

    /// Escrows owned by `owner` on the ledger, with statuses evaluated at the
    /// current ledger time. Unknown escrows start being tracked.
    pub async fn escrows_of(&self, owner: Address) -> Result<Vec<Escrow>, ClientError> {
        let (on_ledger, now) = futures::try_join!(
            retry_with_backoff(&self.config().retry_policy, None, || {
                self.gateway.account_escrows(&owner)
            }),
            self.clock.now(),
        )?;
        self.with_escrows(|book| {
            on_ledger
                .into_iter()
                .map(|escrow| {
                    let machine = book
                        .entry(escrow.key())
                        .or_insert_with(|| EscrowStateMachine::from_ledger(escrow.clone()));
                    if !machine.status().is_terminal() {
                        machine.reconcile(true);
                    }
                    machine.observe(now);
                    machine.escrow().clone()
                })
                .collect()
        })
    }

    pub fn tracked_escrow(&self, owner: Address, offer_sequence: Sequence) -> Option<Escrow> {
        self.escrows
            .lock()
            .ok()
            .and_then(|book| book.get(&(owner, offer_sequence)).map(|m| m.escrow().clone()))
    }

    pub fn tracked_escrows(&self) -> Vec<Escrow> {
        self.escrows
            .lock()
            .map(|book| book.values().map(|m| m.escrow().clone()).collect())
            .unwrap_or_default()
    }

    /// Settles tracked escrows whose last outcome is unknown by checking
    /// which escrow objects still exist. Returns how many changed status.
    ///
    /// Only escrows tracked before the ledger listing is read are settled, and
    /// only if their status has not moved since; anything added or resolved
    /// concurrently is left for the next pass.
    pub async fn reconcile_escrows(&self) -> Result<usize, ClientError> {
        let snapshot: HashMap<EscrowKey, EscrowStatus> = self.with_escrows(|book| {
            book.iter()
                .filter(|(_, m)| !m.status().is_terminal() && m.in_flight().is_none())
                .map(|(key, m)| (*key, m.status()))
                .collect()
        })?;
        if snapshot.is_empty() {
            return Ok(0);
        }
        let owners: Vec<Address> = snapshot
            .keys()
            .map(|(owner, _)| *owner)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let policy = &self.config().retry_policy;
        let listings = try_join_all(owners.iter().map(|owner| {
            retry_with_backoff(policy, None, move || self.gateway.account_escrows(owner))
        }))
        .await?;
        let present: HashSet<EscrowKey> = listings
            .into_iter()
            .flatten()
            .map(|escrow| escrow.key())
            .collect();

        let changed = self.with_escrows(|book| {
            let mut changed = 0;
            for (key, status) in &snapshot {
                let Some(machine) = book.get_mut(key) else {
                    continue;
                };
                if machine.in_flight().is_some() || machine.status() != *status {
                    continue;
                }
                if machine.reconcile(present.contains(key)) {
                    changed += 1;
                }
            }
            changed
        })?;
        debug!(owners = owners.len(), changed, "escrows reconciled");
        Ok(changed)
    }

    async fn resolve_escrow(
        &self,
        owner: Address,
        offer_sequence: Sequence,
        resolution: Resolution,
        deadline: Instant,
    ) -> Result<SubmissionResult, ClientError> {
        let key = (owner, offer_sequence);
        if !self.with_escrows(|book| book.contains_key(&key))? {
            self.adopt_from_ledger(owner, offer_sequence).await?;
        }

        let now = self.clock.now().await?;
        let action = resolution.action();
        self.with_escrows(|book| {
            let machine = book.get_mut(&key).ok_or(EscrowError::NotFound {
                owner,
                offer_sequence,
            })?;
            machine.observe(now);
            match resolution {
                Resolution::Finish => machine.check_finish(now)?,
                Resolution::Cancel => machine.check_cancel(now)?,
            }
            machine.begin(action)
        })??;

        let in_flight = InFlight {
            book: &self.escrows,
            key,
            armed: true,
        };
        let result = self
            .submitter
            .submit(&self.keys, resolution.intent(owner, offer_sequence), deadline)
            .await;
        in_flight.settle(action, result.as_ref().ok());

        let result = result?;
        info!(
            %owner,
            offer_sequence,
            action = ?action,
            outcome = ?result.outcome,
            "escrow resolution submitted"
        );
        Ok(result)
    }

    async fn adopt_from_ledger(
        &self,
        owner: Address,
        offer_sequence: Sequence,
    ) -> Result<(), ClientError> {
        let on_ledger = retry_with_backoff(&self.config().retry_policy, None, || {
            self.gateway.account_escrows(&owner)
        })
        .await?;
        let escrow = on_ledger
            .into_iter()
            .find(|escrow| escrow.offer_sequence == offer_sequence)
            .ok_or(EscrowError::NotFound {
                owner,
                offer_sequence,
            })?;
        debug!(%owner, offer_sequence, "tracking escrow found on ledger");
        self.with_escrows(|book| {
            book.entry(escrow.key())
                .or_insert_with(|| EscrowStateMachine::from_ledger(escrow));
        })
    }

    fn with_escrows<R>(&self, f: impl FnOnce(&mut EscrowBook) -> R) -> Result<R, ClientError> {
        let mut lock = self
            .escrows
            .lock()
            .map_err(|_| ClientError::Internal("escrow mutex poisoned".to_string()))?;
        Ok(f(&mut lock))
    }
}

impl<G: LedgerGateway> LedgerAccount<G, NetworkClock<G>> {
    /// Account whose escrow timing follows the network's ledger close time,
    /// recalibrated as `config` prescribes.
    pub fn with_network_clock(keys: KeyStore, gateway: Arc<G>, config: ClientConfig) -> Self {
        let clock = NetworkClock::from_config(Arc::clone(&gateway), &config);
        Self::new(keys, gateway, clock, config)
    }
}

/// Clears an escrow's in-flight marker even if the resolving future is dropped.
struct InFlight<'a> {
    book: &'a Mutex<EscrowBook>,
    key: EscrowKey,
    armed: bool,
}

impl InFlight<'_> {
    fn settle(mut self, action: EscrowAction, result: Option<&SubmissionResult>) {
        self.armed = false;
        let mut book = match self.book.lock() {
            Ok(book) => book,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(machine) = book.get_mut(&self.key) {
            match result {
                Some(result) => machine.complete(action, result),
                None => machine.abort(),
            }
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut book = match self.book.lock() {
            Ok(book) => book,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(machine) = book.get_mut(&self.key) {
            warn!(owner = %self.key.0, offer_sequence = self.key.1, "escrow resolution abandoned");
            machine.abort();
        }
    }
}
