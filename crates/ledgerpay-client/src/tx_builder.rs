//! TxBuilder: assemble unsigned transactions from account, sequence, fee and
//! an operation intent expressed in wall-clock time.

use chrono::{DateTime, Utc};
use ledgerpay_types::{
    Address, Drops, LedgerTime, NetworkId, Operation, OperationKind, Sequence,
    UnsignedTransaction, ValidationError,
};
use thiserror::Error;

/// Transaction builder validation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TxBuilderError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("invalid payment: {0}")]
    InvalidPayment(&'static str),
    #[error("invalid escrow time window: {0}")]
    InvalidTimeWindow(&'static str),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// What the caller wants done, before sequence and fee are known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxIntent {
    Payment {
        destination: Address,
        amount: Drops,
    },
    EscrowCreate {
        destination: Address,
        amount: Drops,
        finish_after: Option<DateTime<Utc>>,
        cancel_after: Option<DateTime<Utc>>,
    },
    EscrowFinish {
        owner: Address,
        offer_sequence: Sequence,
    },
    EscrowCancel {
        owner: Address,
        offer_sequence: Sequence,
    },
}

impl TxIntent {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Payment { .. } => OperationKind::Payment,
            Self::EscrowCreate { .. } => OperationKind::EscrowCreate,
            Self::EscrowFinish { .. } => OperationKind::EscrowFinish,
            Self::EscrowCancel { .. } => OperationKind::EscrowCancel,
        }
    }
}

/// Fluent builder for `UnsignedTransaction`. Pure: no I/O and no clock reads.
#[derive(Debug, Clone)]
pub struct TxBuilder {
    network_id: NetworkId,
    account: Option<Address>,
    sequence: Option<Sequence>,
    fee: Option<Drops>,
    intent: Option<TxIntent>,
}

impl TxBuilder {
    pub fn new(network_id: NetworkId) -> Self {
        Self {
            network_id,
            account: None,
            sequence: None,
            fee: None,
            intent: None,
        }
    }

    pub fn with_account(mut self, account: Address) -> Self {
        self.account = Some(account);
        self
    }

    pub fn with_sequence(mut self, sequence: Sequence) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn with_fee(mut self, fee: Drops) -> Self {
        self.fee = Some(fee);
        self
    }

    pub fn with_intent(mut self, intent: TxIntent) -> Self {
        self.intent = Some(intent);
        self
    }

    pub fn with_payment(self, destination: Address, amount: Drops) -> Self {
        self.with_intent(TxIntent::Payment {
            destination,
            amount,
        })
    }

    pub fn with_escrow_create(
        self,
        destination: Address,
        amount: Drops,
        finish_after: Option<DateTime<Utc>>,
        cancel_after: Option<DateTime<Utc>>,
    ) -> Self {
        self.with_intent(TxIntent::EscrowCreate {
            destination,
            amount,
            finish_after,
            cancel_after,
        })
    }

    pub fn with_escrow_finish(self, owner: Address, offer_sequence: Sequence) -> Self {
        self.with_intent(TxIntent::EscrowFinish {
            owner,
            offer_sequence,
        })
    }

    pub fn with_escrow_cancel(self, owner: Address, offer_sequence: Sequence) -> Self {
        self.with_intent(TxIntent::EscrowCancel {
            owner,
            offer_sequence,
        })
    }

    pub fn build(self) -> Result<UnsignedTransaction, TxBuilderError> {
        let account = self
            .account
            .ok_or(TxBuilderError::MissingField("account"))?;
        let sequence = self
            .sequence
            .ok_or(TxBuilderError::MissingField("sequence"))?;
        let fee = self.fee.ok_or(TxBuilderError::MissingField("fee"))?;
        let intent = self
            .intent
            .ok_or(TxBuilderError::MissingField("operation"))?;

        let operation = match intent {
            TxIntent::Payment {
                destination,
                amount,
            } => {
                if destination == account {
                    return Err(TxBuilderError::InvalidPayment(
                        "account and destination must be different",
                    ));
                }
                if amount == 0 {
                    return Err(TxBuilderError::InvalidPayment("amount must be > 0"));
                }
                Operation::Payment {
                    destination,
                    amount,
                }
            }
            TxIntent::EscrowCreate {
                destination,
                amount,
                finish_after,
                cancel_after,
            } => {
                if amount == 0 {
                    return Err(TxBuilderError::InvalidPayment("amount must be > 0"));
                }
                let finish_after = finish_after.map(LedgerTime::from_datetime).transpose()?;
                let cancel_after = cancel_after.map(LedgerTime::from_datetime).transpose()?;
                match (finish_after, cancel_after) {
                    (None, None) => {
                        return Err(TxBuilderError::InvalidTimeWindow(
                            "finish_after or cancel_after is required",
                        ))
                    }
                    // Compared after conversion so sub-second inputs cannot collapse
                    // into an empty window.
                    (Some(finish), Some(cancel)) if finish >= cancel => {
                        return Err(TxBuilderError::InvalidTimeWindow(
                            "finish_after must be before cancel_after",
                        ))
                    }
                    _ => {}
                }
                Operation::EscrowCreate {
                    destination,
                    amount,
                    finish_after,
                    cancel_after,
                }
            }
            TxIntent::EscrowFinish {
                owner,
                offer_sequence,
            } => Operation::EscrowFinish {
                owner,
                offer_sequence,
            },
            TxIntent::EscrowCancel {
                owner,
                offer_sequence,
            } => Operation::EscrowCancel {
                owner,
                offer_sequence,
            },
        };

        Ok(UnsignedTransaction {
            account,
            operation,
            sequence,
            fee,
            network_id: self.network_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use ledgerpay_types::{Address, LedgerTime, Operation, ValidationError};

    use super::{TxBuilder, TxBuilderError, TxIntent};

    fn alice() -> Address {
        Address::new([0x01; 20])
    }

    fn bob() -> Address {
        Address::new([0x02; 20])
    }

    fn base() -> TxBuilder {
        TxBuilder::new(7)
            .with_account(alice())
            .with_sequence(10)
            .with_fee(12)
    }

    #[test]
    fn builds_payment() {
        let tx = base().with_payment(bob(), 100).build().expect("valid payment");
        assert_eq!(tx.account, alice());
        assert_eq!(tx.sequence, 10);
        assert_eq!(tx.fee, 12);
        assert_eq!(tx.network_id, 7);
        assert_eq!(
            tx.operation,
            Operation::Payment {
                destination: bob(),
                amount: 100
            }
        );
    }

    #[test]
    fn rejects_missing_fields() {
        assert_eq!(
            TxBuilder::new(7).with_payment(bob(), 1).build().unwrap_err(),
            TxBuilderError::MissingField("account")
        );
        assert_eq!(
            base().build().unwrap_err(),
            TxBuilderError::MissingField("operation")
        );
        assert_eq!(
            TxBuilder::new(7)
                .with_account(alice())
                .with_sequence(1)
                .with_payment(bob(), 1)
                .build()
                .unwrap_err(),
            TxBuilderError::MissingField("fee")
        );
    }

    #[test]
    fn rejects_invalid_payments() {
        assert!(matches!(
            base().with_payment(bob(), 0).build(),
            Err(TxBuilderError::InvalidPayment(_))
        ));
        assert!(matches!(
            base().with_payment(alice(), 5).build(),
            Err(TxBuilderError::InvalidPayment(_))
        ));
    }

    #[test]
    fn converts_escrow_times_to_ledger_time() {
        let finish = Utc.with_ymd_and_hms(2030, 1, 1, 0, 1, 0).unwrap();
        let cancel = finish + Duration::hours(1);
        let tx = base()
            .with_escrow_create(bob(), 500, Some(finish), Some(cancel))
            .build()
            .expect("valid escrow");
        let Operation::EscrowCreate {
            finish_after,
            cancel_after,
            ..
        } = tx.operation
        else {
            panic!("expected escrow create");
        };
        assert_eq!(finish_after, Some(LedgerTime::from_seconds(946_771_260)));
        assert_eq!(cancel_after, Some(LedgerTime::from_seconds(946_774_860)));
    }

    #[test]
    fn rejects_empty_or_inverted_windows() {
        let at = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        assert!(matches!(
            base().with_escrow_create(bob(), 5, None, None).build(),
            Err(TxBuilderError::InvalidTimeWindow(_))
        ));
        assert!(matches!(
            base().with_escrow_create(bob(), 5, Some(at), Some(at)).build(),
            Err(TxBuilderError::InvalidTimeWindow(_))
        ));
        // Same ledger second once fractions are dropped.
        let later_in_same_second = at + Duration::milliseconds(400);
        assert!(matches!(
            base()
                .with_escrow_create(bob(), 5, Some(at), Some(later_in_same_second))
                .build(),
            Err(TxBuilderError::InvalidTimeWindow(_))
        ));
    }

    #[test]
    fn rejects_times_before_ledger_epoch() {
        let before_epoch = Utc.with_ymd_and_hms(1999, 12, 31, 23, 59, 59).unwrap();
        let err = base()
            .with_escrow_create(bob(), 5, None, Some(before_epoch))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            TxBuilderError::Validation(ValidationError::TimeOutOfRange { .. })
        ));
    }

    #[test]
    fn escrow_resolution_intents_carry_offer_sequence() {
        let tx = base()
            .with_intent(TxIntent::EscrowCancel {
                owner: bob(),
                offer_sequence: 4,
            })
            .build()
            .unwrap();
        assert_eq!(tx.operation.debit(), 0);
        assert_eq!(
            tx.operation,
            Operation::EscrowCancel {
                owner: bob(),
                offer_sequence: 4
            }
        );
    }
}
