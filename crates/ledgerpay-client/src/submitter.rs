//! ReliableSubmitter: lease a sequence, build, sign, submit with retry and
//! wait for validation.
//!
//! The lease is held only until the network answers the submission, so other
//! transactions from the same account queue behind the submit step and not
//! behind validation polling.

use std::sync::Arc;

use ledgerpay_crypto::{sign_transaction, KeyStore};
use ledgerpay_types::{
    Address, Drops, OperationKind, Sequence, SignedTransaction, SubmissionOutcome,
    SubmissionResult, TxHash,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::gateway::{is_sequence_mismatch, retry_with_backoff, LedgerGateway};
use crate::sequencer::Sequencer;
use crate::tx_builder::{TxBuilder, TxIntent};

/// Progress of one submission. Terminal states are `Validated`, `Rejected`
/// and `Expired`; failures before `Submitted` abandon the attempt instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubmissionState {
    Building,
    Sequenced,
    Signed,
    Submitted,
    Validated,
    Rejected,
    Expired,
}

impl SubmissionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Validated | Self::Rejected | Self::Expired)
    }

    pub fn can_advance_to(self, next: SubmissionState) -> bool {
        use SubmissionState::*;
        matches!(
            (self, next),
            (Building, Sequenced)
                | (Sequenced, Signed)
                | (Signed, Submitted)
                | (Signed, Rejected)
                | (Submitted, Validated)
                | (Submitted, Rejected)
                | (Submitted, Expired)
        )
    }
}

struct Attempt {
    account: Address,
    kind: OperationKind,
    state: SubmissionState,
    hash: Option<TxHash>,
}

impl Attempt {
    fn new(account: Address, kind: OperationKind) -> Self {
        Self {
            account,
            kind,
            state: SubmissionState::Building,
            hash: None,
        }
    }

    fn advance(&mut self, next: SubmissionState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal submission transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(
            account = %self.account,
            kind = ?self.kind,
            hash = ?self.hash,
            from = ?self.state,
            to = ?next,
            "submission state"
        );
        self.state = next;
    }
}

pub struct ReliableSubmitter<G> {
    gateway: Arc<G>,
    sequencer: Arc<Sequencer<G>>,
    config: ClientConfig,
}

impl<G: LedgerGateway> ReliableSubmitter<G> {
    pub fn new(gateway: Arc<G>, sequencer: Arc<Sequencer<G>>, config: ClientConfig) -> Self {
        Self {
            gateway,
            sequencer,
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn sequencer(&self) -> &Arc<Sequencer<G>> {
        &self.sequencer
    }

    /// Submits `intent` from the account held by `keys`.
    ///
    /// Returns `Ok` with outcome `Validated`, or `TimedOut` when `deadline`
    /// passed before the network reported a final result. Definitive
    /// rejections come back as `ClientError::TransactionRejected`. Transport
    /// failures surface only after the retry policy is exhausted.
    pub async fn submit(
        &self,
        keys: &KeyStore,
        intent: TxIntent,
        deadline: Instant,
    ) -> Result<SubmissionResult, ClientError> {
        let account = keys.address();
        let mut attempt = Attempt::new(account, intent.kind());

        let fee = retry_with_backoff(&self.config.retry_policy, Some(deadline), || {
            self.gateway.fetch_fee()
        })
        .await?;
        if fee > self.config.max_fee_drops {
            return Err(ClientError::FeeAboveLimit {
                fee,
                limit: self.config.max_fee_drops,
            });
        }

        let lease = self.sequencer.acquire(account).await?;
        let sequence = lease.sequence();
        attempt.advance(SubmissionState::Sequenced);

        let signed = match self.build_and_sign(keys, intent, sequence, fee) {
            Ok(signed) => signed,
            Err(err) => {
                lease.release();
                return Err(err);
            }
        };
        let hash = *signed.hash();
        attempt.hash = Some(hash);
        attempt.advance(SubmissionState::Signed);

        // The same blob is resent on every retry, so a copy that already
        // reached the network is reported back as a duplicate, not applied twice.
        let submitted = retry_with_backoff(&self.config.retry_policy, Some(deadline), || {
            self.gateway.submit(&signed)
        })
        .await;
        let result = match submitted {
            Ok(result) => result,
            Err(err) => {
                // Unknown whether any attempt landed; reread the ledger next time.
                lease.invalidate();
                warn!(%account, %hash, sequence, error = %err, "submission failed after retries");
                return Err(err.into());
            }
        };

        match result.outcome {
            SubmissionOutcome::Rejected => {
                if is_sequence_mismatch(&result) {
                    lease.invalidate();
                } else {
                    lease.release();
                }
                attempt.advance(SubmissionState::Rejected);
                warn!(%account, %hash, sequence, code = %result.diagnostic, "transaction rejected");
                return Err(ClientError::TransactionRejected {
                    hash,
                    code: result.diagnostic,
                });
            }
            SubmissionOutcome::Validated => {
                lease.commit();
                attempt.advance(SubmissionState::Submitted);
                attempt.advance(SubmissionState::Validated);
                info!(%account, %hash, sequence, "transaction validated");
                return Ok(result.with_sequence(sequence));
            }
            SubmissionOutcome::ProvisionallyAccepted => lease.commit(),
            SubmissionOutcome::TimedOut => lease.invalidate(),
        }
        attempt.advance(SubmissionState::Submitted);
        debug!(%account, %hash, sequence, code = %result.diagnostic, "awaiting validation");

        // The network holds the transaction; a polling failure leaves the
        // outcome unknown, not failed.
        let status = match self
            .gateway
            .await_validation_every(&hash, deadline, self.config.poll_interval())
            .await
        {
            Ok(status) => status,
            Err(err) => {
                warn!(%account, %hash, sequence, error = %err, "validation polling failed");
                SubmissionResult::new(hash, SubmissionOutcome::TimedOut, err.to_string())
            }
        };
        match status.outcome {
            SubmissionOutcome::Validated => {
                attempt.advance(SubmissionState::Validated);
                info!(
                    %account,
                    %hash,
                    sequence,
                    ledger_index = ?status.ledger_index,
                    "transaction validated"
                );
                Ok(status.with_sequence(sequence))
            }
            SubmissionOutcome::Rejected => {
                attempt.advance(SubmissionState::Rejected);
                warn!(%account, %hash, sequence, code = %status.diagnostic, "transaction failed in validated ledger");
                Err(ClientError::TransactionRejected {
                    hash,
                    code: status.diagnostic,
                })
            }
            SubmissionOutcome::ProvisionallyAccepted | SubmissionOutcome::TimedOut => {
                attempt.advance(SubmissionState::Expired);
                warn!(%account, %hash, sequence, "validation deadline reached; outcome unknown");
                Ok(SubmissionResult {
                    outcome: SubmissionOutcome::TimedOut,
                    ..status
                }
                .with_sequence(sequence))
            }
        }
    }

    fn build_and_sign(
        &self,
        keys: &KeyStore,
        intent: TxIntent,
        sequence: Sequence,
        fee: Drops,
    ) -> Result<SignedTransaction, ClientError> {
        let unsigned = TxBuilder::new(self.config.network_id)
            .with_account(keys.address())
            .with_sequence(sequence)
            .with_fee(fee)
            .with_intent(intent)
            .build()?;
        Ok(sign_transaction(unsigned, keys.keypair())?)
    }
}
