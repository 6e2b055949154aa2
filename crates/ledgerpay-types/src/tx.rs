//! Transaction records flowing through build, sign, submit and confirm.

use serde::{Deserialize, Serialize};

use crate::{
    ids::{Address, Drops, NetworkId, PublicKey, Sequence, TxHash},
    time::LedgerTime,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Payment,
    EscrowCreate,
    EscrowFinish,
    EscrowCancel,
}

impl OperationKind {
    pub const fn type_code(self) -> u16 {
        match self {
            Self::Payment => 0,
            Self::EscrowCreate => 1,
            Self::EscrowFinish => 2,
            Self::EscrowCancel => 4,
        }
    }
}

/// Operation-dependent fields of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Payment {
        destination: Address,
        amount: Drops,
    },
    EscrowCreate {
        destination: Address,
        amount: Drops,
        finish_after: Option<LedgerTime>,
        cancel_after: Option<LedgerTime>,
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

impl Operation {
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::Payment { .. } => OperationKind::Payment,
            Self::EscrowCreate { .. } => OperationKind::EscrowCreate,
            Self::EscrowFinish { .. } => OperationKind::EscrowFinish,
            Self::EscrowCancel { .. } => OperationKind::EscrowCancel,
        }
    }

    /// Amount debited from the submitting account, excluding the fee.
    pub const fn debit(&self) -> Drops {
        match self {
            Self::Payment { amount, .. } | Self::EscrowCreate { amount, .. } => *amount,
            Self::EscrowFinish { .. } | Self::EscrowCancel { .. } => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedTransaction {
    pub account: Address,
    pub operation: Operation,
    pub sequence: Sequence,
    pub fee: Drops,
    pub network_id: NetworkId,
}

impl UnsignedTransaction {
    pub const fn kind(&self) -> OperationKind {
        self.operation.kind()
    }
}

/// A signed transaction. Fields are only readable so the blob, signature and
/// hash can never drift apart once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    unsigned: UnsignedTransaction,
    signing_public_key: PublicKey,
    signature: Vec<u8>,
    blob: Vec<u8>,
    hash: TxHash,
}

impl SignedTransaction {
    pub fn new(
        unsigned: UnsignedTransaction,
        signing_public_key: PublicKey,
        signature: Vec<u8>,
        blob: Vec<u8>,
        hash: TxHash,
    ) -> Self {
        Self {
            unsigned,
            signing_public_key,
            signature,
            blob,
            hash,
        }
    }

    pub fn unsigned(&self) -> &UnsignedTransaction {
        &self.unsigned
    }

    pub fn signing_public_key(&self) -> &PublicKey {
        &self.signing_public_key
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Canonical wire encoding submitted to the network.
    pub fn blob(&self) -> &[u8] {
        &self.blob
    }

    pub fn hash(&self) -> &TxHash {
        &self.hash
    }

    pub fn sequence(&self) -> Sequence {
        self.unsigned.sequence
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubmissionOutcome {
    /// Included in a validated ledger.
    Validated,
    /// Accepted into the network's pending set; not final.
    ProvisionallyAccepted,
    /// Definitively refused by the network.
    Rejected,
    /// No final answer before the caller's deadline. The transaction may
    /// still validate later.
    TimedOut,
}

impl SubmissionOutcome {
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Validated | Self::Rejected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub hash: TxHash,
    pub outcome: SubmissionOutcome,
    /// Sequence consumed by the transaction, when one was assigned.
    pub sequence: Option<Sequence>,
    pub ledger_index: Option<u32>,
    /// Raw engine result or transport diagnostic reported by the network.
    pub diagnostic: String,
}

impl SubmissionResult {
    pub fn new(hash: TxHash, outcome: SubmissionOutcome, diagnostic: impl Into<String>) -> Self {
        Self {
            hash,
            outcome,
            sequence: None,
            ledger_index: None,
            diagnostic: diagnostic.into(),
        }
    }

    pub fn with_sequence(mut self, sequence: Sequence) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn with_ledger_index(mut self, ledger_index: u32) -> Self {
        self.ledger_index = Some(ledger_index);
        self
    }

    pub fn is_validated(&self) -> bool {
        self.outcome == SubmissionOutcome::Validated
    }
}
