//! Escrow lifecycle tracking and local timing checks.
//!
//! Boundaries follow the ledger's strict `after` rule: finishing requires
//! `now > finish_after`, cancelling requires `now > cancel_after`, and once
//! `now > cancel_after` the escrow can no longer be finished.

use ledgerpay_types::{
    Address, Drops, Escrow, EscrowAction, EscrowStatus, LedgerTime, Sequence, SubmissionOutcome,
    SubmissionResult,
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EscrowError {
    #[error("escrow {offer_sequence} is not finishable until after {finish_after} (now {now})")]
    NotYetFinishable {
        offer_sequence: Sequence,
        now: LedgerTime,
        finish_after: LedgerTime,
    },
    #[error("escrow {offer_sequence} is not cancellable yet (now {now})")]
    NotYetCancellable {
        offer_sequence: Sequence,
        now: LedgerTime,
        cancel_after: Option<LedgerTime>,
    },
    #[error("escrow {offer_sequence} passed cancel_after {cancel_after}; it can only be cancelled")]
    Expired {
        offer_sequence: Sequence,
        now: LedgerTime,
        cancel_after: LedgerTime,
    },
    #[error("escrow {offer_sequence} is already resolved ({status:?})")]
    AlreadyResolved {
        offer_sequence: Sequence,
        status: EscrowStatus,
    },
    #[error("escrow {offer_sequence} has not been confirmed on ledger ({status:?})")]
    NotCreated {
        offer_sequence: Sequence,
        status: EscrowStatus,
    },
    #[error("escrow {offer_sequence} has an unconfirmed {action:?}; reconcile before retrying")]
    OutcomeUnknown {
        offer_sequence: Sequence,
        action: EscrowAction,
    },
    #[error("escrow {offer_sequence} already has a {action:?} in flight")]
    ResolutionInFlight {
        offer_sequence: Sequence,
        action: EscrowAction,
    },
    #[error("no escrow {offer_sequence} owned by {owner}")]
    NotFound {
        owner: Address,
        offer_sequence: Sequence,
    },
}

/// Status and timing rules for one escrow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowStateMachine {
    escrow: Escrow,
    in_flight: Option<EscrowAction>,
}

impl EscrowStateMachine {
    /// An escrow whose create transaction has been signed but not confirmed.
    pub fn requested(
        owner: Address,
        destination: Address,
        amount: Drops,
        offer_sequence: Sequence,
        finish_after: Option<LedgerTime>,
        cancel_after: Option<LedgerTime>,
    ) -> Self {
        Self {
            escrow: Escrow {
                owner,
                destination,
                amount,
                offer_sequence,
                finish_after,
                cancel_after,
                status: EscrowStatus::Requested,
            },
            in_flight: None,
        }
    }

    /// An escrow read back from the ledger, which proves it exists.
    pub fn from_ledger(mut escrow: Escrow) -> Self {
        escrow.status = EscrowStatus::Created;
        Self {
            escrow,
            in_flight: None,
        }
    }

    pub fn escrow(&self) -> &Escrow {
        &self.escrow
    }

    pub fn status(&self) -> EscrowStatus {
        self.escrow.status
    }

    pub fn in_flight(&self) -> Option<EscrowAction> {
        self.in_flight
    }

    fn is_confirmed(&self) -> bool {
        !matches!(
            self.escrow.status,
            EscrowStatus::Requested | EscrowStatus::Expired(EscrowAction::Create)
        )
    }

    /// Records the outcome of the create transaction.
    pub fn on_create_result(&mut self, result: &SubmissionResult) {
        let next = match result.outcome {
            SubmissionOutcome::Validated => EscrowStatus::Created,
            SubmissionOutcome::TimedOut | SubmissionOutcome::ProvisionallyAccepted => {
                EscrowStatus::Expired(EscrowAction::Create)
            }
            // Never tracked: a rejected create leaves no escrow behind.
            SubmissionOutcome::Rejected => return,
        };
        self.transition(next);
    }

    /// Moves a confirmed, unresolved escrow between Created, Finishable and
    /// Cancellable according to `now`. Unknown outcomes are left alone until
    /// reconciled.
    pub fn observe(&mut self, now: LedgerTime) -> EscrowStatus {
        if matches!(
            self.escrow.status,
            EscrowStatus::Created | EscrowStatus::Finishable | EscrowStatus::Cancellable
        ) {
            let next = if self.cancel_reached(now) {
                EscrowStatus::Cancellable
            } else if self.finish_reached(now) {
                EscrowStatus::Finishable
            } else {
                EscrowStatus::Created
            };
            self.transition(next);
        }
        self.escrow.status
    }

    fn finish_reached(&self, now: LedgerTime) -> bool {
        self.escrow.finish_after.map_or(true, |finish| now.is_after(finish))
    }

    fn cancel_reached(&self, now: LedgerTime) -> bool {
        self.escrow.cancel_after.is_some_and(|cancel| now.is_after(cancel))
    }

    fn check_resolvable(&self) -> Result<(), EscrowError> {
        let offer_sequence = self.escrow.offer_sequence;
        if self.escrow.status.is_terminal() {
            return Err(EscrowError::AlreadyResolved {
                offer_sequence,
                status: self.escrow.status,
            });
        }
        if !self.is_confirmed() {
            return Err(EscrowError::NotCreated {
                offer_sequence,
                status: self.escrow.status,
            });
        }
        if let EscrowStatus::Expired(action) = self.escrow.status {
            return Err(EscrowError::OutcomeUnknown {
                offer_sequence,
                action,
            });
        }
        if let Some(action) = self.in_flight {
            return Err(EscrowError::ResolutionInFlight {
                offer_sequence,
                action,
            });
        }
        Ok(())
    }

    /// Local legality of an EscrowFinish at ledger time `now`.
    pub fn check_finish(&self, now: LedgerTime) -> Result<(), EscrowError> {
        self.check_resolvable()?;
        let offer_sequence = self.escrow.offer_sequence;
        if let Some(cancel_after) = self.escrow.cancel_after {
            if now.is_after(cancel_after) {
                return Err(EscrowError::Expired {
                    offer_sequence,
                    now,
                    cancel_after,
                });
            }
        }
        if let Some(finish_after) = self.escrow.finish_after {
            if !now.is_after(finish_after) {
                return Err(EscrowError::NotYetFinishable {
                    offer_sequence,
                    now,
                    finish_after,
                });
            }
        }
        Ok(())
    }

    /// Local legality of an EscrowCancel at ledger time `now`.
    pub fn check_cancel(&self, now: LedgerTime) -> Result<(), EscrowError> {
        self.check_resolvable()?;
        if !self.cancel_reached(now) {
            return Err(EscrowError::NotYetCancellable {
                offer_sequence: self.escrow.offer_sequence,
                now,
                cancel_after: self.escrow.cancel_after,
            });
        }
        Ok(())
    }

    /// Marks `action` as submitted. At most one resolution runs at a time.
    pub fn begin(&mut self, action: EscrowAction) -> Result<(), EscrowError> {
        if let Some(running) = self.in_flight {
            return Err(EscrowError::ResolutionInFlight {
                offer_sequence: self.escrow.offer_sequence,
                action: running,
            });
        }
        self.in_flight = Some(action);
        Ok(())
    }

    /// Records the outcome of a finish or cancel started with `begin`.
    pub fn complete(&mut self, action: EscrowAction, result: &SubmissionResult) {
        self.in_flight = None;
        let next = match (action, result.outcome) {
            (EscrowAction::Finish, SubmissionOutcome::Validated) => EscrowStatus::Finished,
            (EscrowAction::Cancel, SubmissionOutcome::Validated) => EscrowStatus::Cancelled,
            (_, SubmissionOutcome::Rejected) => return,
            (action, _) => EscrowStatus::Expired(action),
        };
        self.transition(next);
    }

    /// Clears an in-flight action that produced no outcome.
    pub fn abort(&mut self) {
        self.in_flight = None;
    }

    /// Resolves unknown outcomes from whether the escrow object is still on
    /// the ledger. Returns true when the status changed.
    pub fn reconcile(&mut self, on_ledger: bool) -> bool {
        let next = match (self.escrow.status, on_ledger) {
            (EscrowStatus::Requested | EscrowStatus::Expired(_), true) => EscrowStatus::Created,
            (EscrowStatus::Expired(EscrowAction::Finish), false) => EscrowStatus::Finished,
            (EscrowStatus::Expired(EscrowAction::Cancel), false) => EscrowStatus::Cancelled,
            (EscrowStatus::Created | EscrowStatus::Finishable | EscrowStatus::Cancellable, false) => {
                // Resolved by someone else; which way is not observable here.
                EscrowStatus::Finished
            }
            _ => return false,
        };
        let changed = next != self.escrow.status;
        self.transition(next);
        changed
    }

    fn transition(&mut self, next: EscrowStatus) {
        if next != self.escrow.status {
            debug!(
                owner = %self.escrow.owner,
                offer_sequence = self.escrow.offer_sequence,
                from = ?self.escrow.status,
                to = ?next,
                "escrow status changed"
            );
            self.escrow.status = next;
        }
    }
}
