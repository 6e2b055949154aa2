pub mod account;
pub mod error;
pub mod ids;
pub mod time;
pub mod tx;

pub use account::{Account, AccountState, Escrow, EscrowAction, EscrowStatus};
pub use error::ValidationError;
pub use ids::{Address, Drops, NetworkId, PublicKey, Sequence, TxHash};
pub use time::{LedgerTime, LEDGER_EPOCH_UNIX_SECONDS};
pub use tx::{
    Operation, OperationKind, SignedTransaction, SubmissionOutcome, SubmissionResult,
    UnsignedTransaction,
};
