//! Client library for a ledger account.
//!
//! This crate exposes:
//! - the gateway abstraction (`LedgerGateway`) with an in-memory `MockGateway`
//!   and a JSON-RPC implementation over a pluggable `RpcTransport`,
//! - transaction construction (`TxBuilder`, `TxIntent`),
//! - per-account sequence leasing (`Sequencer`, `SequenceLease`),
//! - reliable submission with retry and validation polling (`ReliableSubmitter`),
//! - escrow lifecycle tracking (`EscrowStateMachine`) and ledger clocks,
//! - the high-level facade (`LedgerAccount`).

pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod escrow;
pub mod gateway;
pub mod mock;
pub mod rpc;
pub mod sequencer;
pub mod submitter;
pub mod tx_builder;

pub use client::{EscrowReceipt, LedgerAccount};
pub use clock::{LedgerClock, ManualClock, NetworkClock};
pub use config::{ClientConfig, RetryPolicy};
pub use error::ClientError;
pub use escrow::{EscrowError, EscrowStateMachine};
pub use gateway::{
    backoff_delay_ms, is_sequence_mismatch, retry_with_backoff, GatewayError, LedgerGateway,
    DEFAULT_POLL_INTERVAL, MIN_POLL_INTERVAL, SEQUENCE_MISMATCH_CODES,
};
pub use mock::{CallCounts, MockGateway, ValidationMode};
pub use rpc::{classify_engine_result, EngineResultClass, JsonRpcGateway, RpcTransport};
pub use sequencer::{SequenceLease, Sequencer};
pub use submitter::{ReliableSubmitter, SubmissionState};
pub use tx_builder::{TxBuilder, TxBuilderError, TxIntent};
