//! Account and escrow records.

use serde::{Deserialize, Serialize};

use crate::{
    ids::{Address, Drops, PublicKey, Sequence},
    time::LedgerTime,
};

/// On-ledger account root as reported by the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub sequence: Sequence,
    pub balance: Drops,
    pub exists: bool,
}

/// Local view of the managed account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,
    pub public_key: PublicKey,
    /// Next sequence the ledger will accept, as last observed.
    pub sequence: Sequence,
    pub balance: Drops,
}

/// Escrow-resolving action whose outcome may be left unknown by a timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EscrowAction {
    Create,
    Finish,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EscrowStatus {
    /// EscrowCreate submitted, not yet confirmed.
    Requested,
    Created,
    Finishable,
    Cancellable,
    Finished,
    Cancelled,
    /// The confirmation deadline for `action` elapsed with the outcome unknown.
    Expired(EscrowAction),
}

impl EscrowStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escrow {
    pub owner: Address,
    pub destination: Address,
    pub amount: Drops,
    /// Sequence of the EscrowCreate transaction; identifies the escrow within
    /// its owner's account.
    pub offer_sequence: Sequence,
    pub finish_after: Option<LedgerTime>,
    pub cancel_after: Option<LedgerTime>,
    pub status: EscrowStatus,
}

impl Escrow {
    pub fn key(&self) -> (Address, Sequence) {
        (self.owner, self.offer_sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::{EscrowAction, EscrowStatus};

    #[test]
    fn only_finished_and_cancelled_are_terminal() {
        assert!(EscrowStatus::Finished.is_terminal());
        assert!(EscrowStatus::Cancelled.is_terminal());
        for status in [
            EscrowStatus::Requested,
            EscrowStatus::Created,
            EscrowStatus::Finishable,
            EscrowStatus::Cancellable,
            EscrowStatus::Expired(EscrowAction::Finish),
        ] {
            assert!(!status.is_terminal(), "{status:?}");
        }
    }
}
