use ledgerpay_crypto::{KeyError, SigningError};
use ledgerpay_types::{Drops, TxHash, ValidationError};
use thiserror::Error;

use crate::escrow::EscrowError;
use crate::gateway::GatewayError;
use crate::tx_builder::TxBuilderError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Builder(#[from] TxBuilderError),
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Escrow(#[from] EscrowError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("transaction {hash} rejected: {code}")]
    TransactionRejected { hash: TxHash, code: String },
    #[error("network fee {fee} drops exceeds the configured limit of {limit}")]
    FeeAboveLimit { fee: Drops, limit: Drops },
    #[error("internal client error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Transport-level failure that outlasted the retry policy.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Gateway(err) if err.is_retryable())
    }

    /// Engine result code for rejected transactions.
    pub fn rejection_code(&self) -> Option<&str> {
        match self {
            Self::TransactionRejected { code, .. } => Some(code),
            _ => None,
        }
    }
}
