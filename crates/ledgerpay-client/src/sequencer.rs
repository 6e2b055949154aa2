//! Per-account sequence leasing.
//!
//! At most one lease per account is outstanding. Waiters are served in FIFO
//! order. A lease ends in exactly one of `commit`, `release` or `invalidate`;
//! dropping it unresolved invalidates the cached sequence so the next lease
//! re-reads it from the ledger.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ledgerpay_types::{Address, Sequence};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::gateway::{retry_with_backoff, GatewayError, LedgerGateway};

#[derive(Debug, Default)]
struct SequenceSlot {
    /// Next sequence to hand out; `None` until fetched or after invalidation.
    next: Option<Sequence>,
}

pub struct Sequencer<G> {
    gateway: Arc<G>,
    retry_policy: RetryPolicy,
    slots: Mutex<HashMap<Address, Arc<AsyncMutex<SequenceSlot>>>>,
}

impl<G: LedgerGateway> Sequencer<G> {
    pub fn new(gateway: Arc<G>, retry_policy: RetryPolicy) -> Self {
        Self {
            gateway,
            retry_policy,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Waits for exclusive use of `account`'s next sequence. The first lease
    /// for an account, and the first after an invalidation, reads the
    /// sequence from the ledger.
    pub async fn acquire(&self, account: Address) -> Result<SequenceLease, GatewayError> {
        let slot = self.slot(account)?;
        let mut guard = slot.lock_owned().await;
        let sequence = match guard.next {
            Some(next) => next,
            None => {
                let state = retry_with_backoff(&self.retry_policy, None, || {
                    self.gateway.fetch_account_state(&account)
                })
                .await?;
                debug!(%account, sequence = state.sequence, "fetched account sequence");
                guard.next = Some(state.sequence);
                state.sequence
            }
        };
        debug!(%account, sequence, "sequence leased");
        Ok(SequenceLease {
            account,
            sequence,
            guard: Some(guard),
        })
    }

    fn slot(&self, account: Address) -> Result<Arc<AsyncMutex<SequenceSlot>>, GatewayError> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| GatewayError::Internal("sequencer mutex poisoned".to_string()))?;
        Ok(Arc::clone(slots.entry(account).or_default()))
    }
}

/// Exclusive hold on one account sequence.
#[must_use = "a lease must be committed, released or invalidated"]
pub struct SequenceLease {
    account: Address,
    sequence: Sequence,
    guard: Option<OwnedMutexGuard<SequenceSlot>>,
}

impl SequenceLease {
    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    pub fn account(&self) -> Address {
        self.account
    }

    /// The network accepted a transaction carrying this sequence.
    pub fn commit(mut self) {
        if let Some(mut guard) = self.guard.take() {
            guard.next = Some(self.sequence.saturating_add(1));
            debug!(account = %self.account, sequence = self.sequence, "sequence committed");
        }
    }

    /// The sequence was not consumed; the next lease reuses it.
    pub fn release(mut self) {
        if let Some(mut guard) = self.guard.take() {
            guard.next = Some(self.sequence);
            debug!(account = %self.account, sequence = self.sequence, "sequence released");
        }
    }

    /// Whether the sequence was consumed is unknown, or the cached value is
    /// stale; the next lease refetches from the ledger.
    pub fn invalidate(mut self) {
        if let Some(mut guard) = self.guard.take() {
            guard.next = None;
            debug!(account = %self.account, sequence = self.sequence, "sequence cache invalidated");
        }
    }
}

impl Drop for SequenceLease {
    fn drop(&mut self) {
        if let Some(mut guard) = self.guard.take() {
            guard.next = None;
            warn!(
                account = %self.account,
                sequence = self.sequence,
                "sequence lease dropped unresolved; cache invalidated"
            );
        }
    }
}

impl std::fmt::Debug for SequenceLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceLease")
            .field("account", &self.account)
            .field("sequence", &self.sequence)
            .field("active", &self.guard.is_some())
            .finish()
    }
}
