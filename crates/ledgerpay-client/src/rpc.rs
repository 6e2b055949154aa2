//! JSON-RPC gateway speaking the rippled-style method set over a pluggable
//! transport.

use std::time::Duration;

use async_trait::async_trait;
use ledgerpay_types::{
    AccountState, Address, Drops, Escrow, EscrowStatus, LedgerTime, SignedTransaction,
    SubmissionOutcome, SubmissionResult, TxHash,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::gateway::{GatewayError, LedgerGateway, DEFAULT_POLL_INTERVAL};

/// Carries one JSON-RPC call and returns the `result` object.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, GatewayError>;
}

/// How a preliminary engine result from `submit` is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineResultClass {
    /// Queued or applied to the open ledger; only validation is final.
    Provisional,
    /// Transient refusal; resubmitting the same blob may succeed.
    Retry,
    Rejected,
}

pub fn classify_engine_result(code: &str) -> EngineResultClass {
    match code {
        "tesSUCCESS" | "terQUEUED" | "tefALREADY" => EngineResultClass::Provisional,
        "telINSUF_FEE_P" | "telCAN_NOT_QUEUE" | "telCAN_NOT_QUEUE_FULL" => EngineResultClass::Retry,
        // Claimed a fee and holds the sequence; the validated result decides.
        code if code.starts_with("tec") => EngineResultClass::Provisional,
        code if code.starts_with("ter") => EngineResultClass::Retry,
        _ => EngineResultClass::Rejected,
    }
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    error: String,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AccountData {
    sequence: u32,
    balance: String,
}

#[derive(Debug, Deserialize)]
struct AccountInfoResult {
    account_data: AccountData,
}

#[derive(Debug, Deserialize)]
struct FeeDrops {
    open_ledger_fee: String,
}

#[derive(Debug, Deserialize)]
struct FeeResult {
    drops: FeeDrops,
}

#[derive(Debug, Deserialize)]
struct LedgerHeader {
    close_time: u32,
}

#[derive(Debug, Deserialize)]
struct LedgerResult {
    ledger: LedgerHeader,
}

#[derive(Debug, Deserialize)]
struct SubmitTxJson {
    hash: String,
}

#[derive(Debug, Deserialize)]
struct SubmitResult {
    engine_result: String,
    #[serde(default)]
    engine_result_message: String,
    tx_json: SubmitTxJson,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TxMeta {
    transaction_result: String,
}

#[derive(Debug, Deserialize)]
struct TxResult {
    #[serde(default)]
    validated: bool,
    #[serde(default)]
    ledger_index: Option<u32>,
    #[serde(default, rename = "Sequence")]
    sequence: Option<u32>,
    #[serde(default)]
    meta: Option<TxMeta>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EscrowObject {
    account: String,
    destination: String,
    amount: String,
    sequence: u32,
    #[serde(default)]
    finish_after: Option<u32>,
    #[serde(default)]
    cancel_after: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct AccountObjectsResult {
    account_objects: Vec<EscrowObject>,
}

pub struct JsonRpcGateway<T> {
    transport: T,
    poll_interval: Duration,
}

impl<T: RpcTransport> JsonRpcGateway<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn call<R: DeserializeOwned>(&self, method: &str, params: Value) -> Result<R, RpcFailure> {
        let value = self.transport.request(method, params).await?;
        if value.get("error").is_some() {
            let body: RpcErrorBody = decode(method, value)?;
            return Err(RpcFailure::Remote {
                code: body.error,
                message: body.error_message.unwrap_or_default(),
            });
        }
        Ok(decode(method, value)?)
    }
}

enum RpcFailure {
    Gateway(GatewayError),
    Remote { code: String, message: String },
}

impl From<GatewayError> for RpcFailure {
    fn from(err: GatewayError) -> Self {
        Self::Gateway(err)
    }
}

impl RpcFailure {
    fn into_gateway(self) -> GatewayError {
        match self {
            Self::Gateway(err) => err,
            Self::Remote { code, message } => match code.as_str() {
                "noNetwork" | "noCurrent" | "noClosed" | "tooBusy" | "slowDown" => {
                    GatewayError::Network(code)
                }
                _ => GatewayError::Internal(format!("{code}: {message}")),
            },
        }
    }
}

fn decode<R: DeserializeOwned>(method: &str, value: Value) -> Result<R, GatewayError> {
    serde_json::from_value(value)
        .map_err(|err| GatewayError::MalformedResponse(format!("{method}: {err}")))
}

fn parse_drops(field: &str, value: &str) -> Result<Drops, GatewayError> {
    value
        .parse()
        .map_err(|_| GatewayError::MalformedResponse(format!("{field} is not drops: {value}")))
}

fn parse_address(value: &str) -> Result<Address, GatewayError> {
    Address::from_hex(value).map_err(|err| GatewayError::MalformedResponse(err.to_string()))
}

#[async_trait]
impl<T: RpcTransport> LedgerGateway for JsonRpcGateway<T> {
    async fn fetch_account_state(&self, address: &Address) -> Result<AccountState, GatewayError> {
        let params = json!({ "account": address.to_string(), "ledger_index": "current" });
        match self.call::<AccountInfoResult>("account_info", params).await {
            Ok(info) => Ok(AccountState {
                sequence: info.account_data.sequence,
                balance: parse_drops("Balance", &info.account_data.balance)?,
                exists: true,
            }),
            Err(RpcFailure::Remote { code, .. }) if code == "actNotFound" => {
                Err(GatewayError::AccountNotFound(*address))
            }
            Err(failure) => Err(failure.into_gateway()),
        }
    }

    async fn fetch_fee(&self) -> Result<Drops, GatewayError> {
        let fee: FeeResult = self
            .call("fee", json!({}))
            .await
            .map_err(RpcFailure::into_gateway)?;
        parse_drops("open_ledger_fee", &fee.drops.open_ledger_fee)
    }

    async fn fetch_network_time(&self) -> Result<LedgerTime, GatewayError> {
        let ledger: LedgerResult = self
            .call("ledger", json!({ "ledger_index": "validated" }))
            .await
            .map_err(RpcFailure::into_gateway)?;
        Ok(LedgerTime::from_seconds(ledger.ledger.close_time))
    }

    async fn submit(&self, tx: &SignedTransaction) -> Result<SubmissionResult, GatewayError> {
        let params = json!({ "tx_blob": hex::encode_upper(tx.blob()) });
        let result: SubmitResult = self
            .call("submit", params)
            .await
            .map_err(RpcFailure::into_gateway)?;
        let hash = TxHash::from_hex(&result.tx_json.hash)
            .map_err(|err| GatewayError::MalformedResponse(err.to_string()))?;
        if hash != *tx.hash() {
            return Err(GatewayError::MalformedResponse(format!(
                "submit echoed hash {hash}, expected {}",
                tx.hash()
            )));
        }
        debug!(%hash, engine_result = %result.engine_result, "submit answered");
        let outcome = match classify_engine_result(&result.engine_result) {
            EngineResultClass::Provisional => SubmissionOutcome::ProvisionallyAccepted,
            EngineResultClass::Retry => {
                return Err(GatewayError::Network(format!(
                    "{}: {}",
                    result.engine_result, result.engine_result_message
                )))
            }
            EngineResultClass::Rejected => SubmissionOutcome::Rejected,
        };
        Ok(SubmissionResult::new(hash, outcome, result.engine_result).with_sequence(tx.sequence()))
    }

    async fn transaction_status(&self, hash: &TxHash) -> Result<SubmissionResult, GatewayError> {
        let params = json!({ "transaction": hex::encode_upper(hash.as_bytes()) });
        let tx: TxResult = match self.call("tx", params).await {
            Ok(tx) => tx,
            Err(RpcFailure::Remote { code, .. }) if code == "txnNotFound" => {
                return Ok(SubmissionResult::new(
                    *hash,
                    SubmissionOutcome::ProvisionallyAccepted,
                    code,
                ))
            }
            Err(failure) => return Err(failure.into_gateway()),
        };
        let code = tx
            .meta
            .map(|meta| meta.transaction_result)
            .unwrap_or_default();
        let outcome = match (tx.validated, code.as_str()) {
            (false, _) => SubmissionOutcome::ProvisionallyAccepted,
            (true, "tesSUCCESS") => SubmissionOutcome::Validated,
            (true, _) => SubmissionOutcome::Rejected,
        };
        let mut result = SubmissionResult::new(*hash, outcome, code);
        if let Some(sequence) = tx.sequence {
            result = result.with_sequence(sequence);
        }
        if let Some(ledger_index) = tx.ledger_index.filter(|_| tx.validated) {
            result = result.with_ledger_index(ledger_index);
        }
        Ok(result)
    }

    async fn account_escrows(&self, owner: &Address) -> Result<Vec<Escrow>, GatewayError> {
        let params = json!({ "account": owner.to_string(), "type": "escrow" });
        let objects: AccountObjectsResult = match self.call("account_objects", params).await {
            Ok(objects) => objects,
            Err(RpcFailure::Remote { code, .. }) if code == "actNotFound" => {
                return Err(GatewayError::AccountNotFound(*owner))
            }
            Err(failure) => return Err(failure.into_gateway()),
        };
        objects
            .account_objects
            .into_iter()
            .map(|object| {
                Ok(Escrow {
                    owner: parse_address(&object.account)?,
                    destination: parse_address(&object.destination)?,
                    amount: parse_drops("Amount", &object.amount)?,
                    offer_sequence: object.sequence,
                    finish_after: object.finish_after.map(LedgerTime::from_seconds),
                    cancel_after: object.cancel_after.map(LedgerTime::from_seconds),
                    status: EscrowStatus::Created,
                })
            })
            .collect()
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}
