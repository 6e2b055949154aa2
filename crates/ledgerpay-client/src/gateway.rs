use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use ledgerpay_types::{
    AccountState, Address, Drops, Escrow, LedgerTime, SignedTransaction, SubmissionOutcome,
    SubmissionResult, TxHash,
};
use rand::Rng;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RetryPolicy;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Floor applied to polling intervals so a zero setting cannot spin.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Engine results meaning the submitted sequence disagrees with the ledger:
/// already consumed, or ahead of the account's next sequence.
pub const SEQUENCE_MISMATCH_CODES: [&str; 2] = ["tefPAST_SEQ", "terPRE_SEQ"];

/// Error model for gateway operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("request timed out")]
    Timeout,
    #[error("network unavailable: {0}")]
    Network(String),
    #[error("account {0} not found on ledger")]
    AccountNotFound(Address),
    #[error("malformed gateway response: {0}")]
    MalformedResponse(String),
    #[error("internal gateway error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Network(_))
    }
}

/// The only path between the client and a ledger network.
///
/// `submit` must be idempotent for an identical signed blob: resubmitting a
/// transaction the network already holds reports it as provisionally accepted
/// instead of applying it twice.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    async fn fetch_account_state(&self, address: &Address) -> Result<AccountState, GatewayError>;

    /// Current open-ledger fee in drops.
    async fn fetch_fee(&self) -> Result<Drops, GatewayError>;

    /// Close time of the latest validated ledger.
    async fn fetch_network_time(&self) -> Result<LedgerTime, GatewayError>;

    async fn submit(&self, tx: &SignedTransaction) -> Result<SubmissionResult, GatewayError>;

    async fn transaction_status(&self, hash: &TxHash) -> Result<SubmissionResult, GatewayError>;

    async fn account_escrows(&self, owner: &Address) -> Result<Vec<Escrow>, GatewayError>;

    fn poll_interval(&self) -> Duration {
        DEFAULT_POLL_INTERVAL
    }

    /// Polls `transaction_status` every `poll_interval()` until the
    /// transaction is final or `deadline` passes. Retryable polling failures
    /// are logged and polling continues; reaching the deadline yields a
    /// `TimedOut` result rather than an error.
    async fn await_validation(
        &self,
        hash: &TxHash,
        deadline: Instant,
    ) -> Result<SubmissionResult, GatewayError> {
        self.await_validation_every(hash, deadline, self.poll_interval())
            .await
    }

    /// `await_validation` with an explicit polling interval.
    async fn await_validation_every(
        &self,
        hash: &TxHash,
        deadline: Instant,
        poll_interval: Duration,
    ) -> Result<SubmissionResult, GatewayError> {
        let poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
        let mut last_diagnostic = String::new();
        let mut polls = 0u32;
        loop {
            polls += 1;
            match self.transaction_status(hash).await {
                Ok(status) if status.outcome.is_final() => {
                    debug!(%hash, polls, outcome = ?status.outcome, "transaction reached final state");
                    return Ok(status);
                }
                Ok(status) => last_diagnostic = status.diagnostic,
                Err(err) if err.is_retryable() => {
                    warn!(%hash, error = %err, "validation poll failed; will poll again");
                }
                Err(err) => return Err(err),
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(%hash, polls, "validation deadline elapsed without a final outcome");
                return Ok(SubmissionResult::new(
                    *hash,
                    SubmissionOutcome::TimedOut,
                    last_diagnostic,
                ));
            }
            tokio::time::sleep_until(deadline.min(now + poll_interval)).await;
        }
    }
}

/// A rejection caused by a cached sequence that no longer matches the ledger.
pub fn is_sequence_mismatch(result: &SubmissionResult) -> bool {
    result.outcome == SubmissionOutcome::Rejected
        && SEQUENCE_MISMATCH_CODES
            .iter()
            .any(|code| result.diagnostic.starts_with(code))
}

/// Runs `op` until it succeeds, fails with a non-retryable error, exhausts the
/// policy, or would sleep past `deadline`.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    deadline: Option<Instant>,
    mut op: F,
) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() || attempt >= policy.max_retries {
                    return Err(err);
                }
                let delay = Duration::from_millis(backoff_delay_ms(attempt, policy));
                attempt += 1;
                if let Some(deadline) = deadline {
                    if Instant::now() + delay > deadline {
                        return Err(err);
                    }
                }
                warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying gateway call");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

pub fn backoff_delay_ms(attempt: u32, policy: &RetryPolicy) -> u64 {
    let exp = policy
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt));
    let capped = exp.min(policy.max_backoff_ms);
    let jitter = if policy.jitter_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=policy.jitter_ms)
    };
    capped.saturating_add(jitter)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use ledgerpay_types::{SubmissionOutcome, SubmissionResult, TxHash};
    use tokio::time::Instant;

    use super::{backoff_delay_ms, is_sequence_mismatch, retry_with_backoff, GatewayError};
    use crate::config::RetryPolicy;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
            jitter_ms: 0,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = policy(5);
        assert_eq!(backoff_delay_ms(0, &policy), 100);
        assert_eq!(backoff_delay_ms(2, &policy), 400);
        assert_eq!(backoff_delay_ms(4, &policy), 1_000);
        assert_eq!(backoff_delay_ms(40, &policy), 1_000);
    }

    #[test]
    fn jitter_stays_within_bound() {
        let policy = RetryPolicy {
            jitter_ms: 30,
            ..policy(1)
        };
        for _ in 0..50 {
            let delay = backoff_delay_ms(0, &policy);
            assert!((100..=130).contains(&delay));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_network_errors_until_success() {
        let calls = AtomicU32::new(0);
        let value = retry_with_backoff(&policy(3), None, || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(GatewayError::Network("connection reset".to_string()))
            } else {
                Ok(7)
            }
        })
        .await
        .expect("third attempt succeeds");
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let err = retry_with_backoff(&policy(2), None, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(GatewayError::Timeout)
        })
        .await
        .unwrap_err();
        assert_eq!(err, GatewayError::Timeout);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let err = retry_with_backoff(&policy(5), None, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(GatewayError::MalformedResponse("missing field".to_string()))
        })
        .await
        .unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_before_sleeping_past_deadline() {
        let calls = AtomicU32::new(0);
        let deadline = Instant::now() + Duration::from_millis(150);
        let err = retry_with_backoff(&policy(10), Some(deadline), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(GatewayError::Network("down".to_string()))
        })
        .await
        .unwrap_err();
        assert!(err.is_retryable());
        // 100ms first backoff fits, the 200ms second one does not.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn sequence_mismatch_detection() {
        let hash = TxHash::new([1; 32]);
        assert!(is_sequence_mismatch(&SubmissionResult::new(
            hash,
            SubmissionOutcome::Rejected,
            "tefPAST_SEQ"
        )));
        assert!(is_sequence_mismatch(&SubmissionResult::new(
            hash,
            SubmissionOutcome::Rejected,
            "terPRE_SEQ"
        )));
        assert!(!is_sequence_mismatch(&SubmissionResult::new(
            hash,
            SubmissionOutcome::Rejected,
            "tecUNFUNDED_PAYMENT"
        )));
    }
}
