//! Ledger-time sources used for escrow timing checks.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ledgerpay_types::LedgerTime;
use tokio::time::Instant;
use tracing::debug;

use crate::config::{ClientConfig, RetryPolicy};
use crate::gateway::{retry_with_backoff, GatewayError, LedgerGateway};

#[async_trait]
pub trait LedgerClock: Send + Sync {
    async fn now(&self) -> Result<LedgerTime, GatewayError>;
}

/// Network time extrapolated from a periodic calibration against the latest
/// validated ledger close time. Between calibrations `now` makes no calls.
pub struct NetworkClock<G> {
    gateway: Arc<G>,
    retry_policy: RetryPolicy,
    recalibrate_after: Duration,
    anchor: Mutex<Option<(LedgerTime, Instant)>>,
}

impl<G: LedgerGateway> NetworkClock<G> {
    pub fn new(gateway: Arc<G>, retry_policy: RetryPolicy, recalibrate_after: Duration) -> Self {
        Self {
            gateway,
            retry_policy,
            recalibrate_after,
            anchor: Mutex::new(None),
        }
    }

    /// Retry policy and recalibration period taken from `config`.
    pub fn from_config(gateway: Arc<G>, config: &ClientConfig) -> Self {
        Self::new(
            gateway,
            config.retry_policy.clone(),
            config.clock_recalibrate_after(),
        )
    }

    fn extrapolate(&self) -> Result<Option<LedgerTime>, GatewayError> {
        let anchor = self
            .anchor
            .lock()
            .map_err(|_| GatewayError::Internal("clock mutex poisoned".to_string()))?;
        Ok((*anchor).and_then(|(time, at)| {
            let elapsed = at.elapsed();
            (elapsed < self.recalibrate_after).then(|| {
                let secs = u32::try_from(elapsed.as_secs()).unwrap_or(u32::MAX);
                time.saturating_add(secs)
            })
        }))
    }
}

#[async_trait]
impl<G: LedgerGateway> LedgerClock for NetworkClock<G> {
    async fn now(&self) -> Result<LedgerTime, GatewayError> {
        if let Some(now) = self.extrapolate()? {
            return Ok(now);
        }
        let time = retry_with_backoff(&self.retry_policy, None, || {
            self.gateway.fetch_network_time()
        })
        .await?;
        debug!(ledger_time = %time, "network clock calibrated");
        let mut anchor = self
            .anchor
            .lock()
            .map_err(|_| GatewayError::Internal("clock mutex poisoned".to_string()))?;
        *anchor = Some((time, Instant::now()));
        Ok(time)
    }
}

/// Clock under explicit control. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    seconds: Arc<AtomicU32>,
}

impl ManualClock {
    pub fn new(start: LedgerTime) -> Self {
        Self {
            seconds: Arc::new(AtomicU32::new(start.seconds())),
        }
    }

    pub fn set(&self, time: LedgerTime) {
        self.seconds.store(time.seconds(), Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: u32) {
        let _ = self
            .seconds
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.saturating_add(seconds))
            });
    }

    pub fn current(&self) -> LedgerTime {
        LedgerTime::from_seconds(self.seconds.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl LedgerClock for ManualClock {
    async fn now(&self) -> Result<LedgerTime, GatewayError> {
        Ok(self.current())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use ledgerpay_ledger_mock::{DemoScenario, DEMO_START_TIME};
    use ledgerpay_types::LedgerTime;

    use super::{LedgerClock, ManualClock, NetworkClock};
    use crate::config::{ClientConfig, RetryPolicy};
    use crate::mock::MockGateway;

    #[tokio::test]
    async fn manual_clock_is_shared_between_clones() {
        let clock = ManualClock::new(LedgerTime::from_seconds(100));
        let other = clock.clone();
        other.advance(61);
        assert_eq!(clock.now().await.unwrap(), LedgerTime::from_seconds(161));
        clock.set(LedgerTime::from_seconds(5));
        assert_eq!(other.current(), LedgerTime::from_seconds(5));
    }

    #[tokio::test(start_paused = true)]
    async fn network_clock_extrapolates_between_calibrations() {
        let gateway = MockGateway::new(DemoScenario::new().ledger);
        let clock = NetworkClock::new(
            Arc::new(gateway.clone()),
            RetryPolicy::no_retries(),
            Duration::from_secs(60),
        );

        assert_eq!(clock.now().await.unwrap(), DEMO_START_TIME);
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(clock.now().await.unwrap(), DEMO_START_TIME.saturating_add(10));
        assert_eq!(gateway.calls().network_time, 1);

        gateway.ledger(|ledger| ledger.advance_time(500));
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(clock.now().await.unwrap(), DEMO_START_TIME.saturating_add(500));
        assert_eq!(gateway.calls().network_time, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn configured_recalibration_period_is_honored() {
        let gateway = MockGateway::new(DemoScenario::new().ledger);
        let config = ClientConfig {
            clock_recalibrate_secs: 30,
            ..ClientConfig::default()
        };
        let clock = NetworkClock::from_config(Arc::new(gateway.clone()), &config);

        clock.now().await.unwrap();
        tokio::time::advance(Duration::from_secs(29)).await;
        clock.now().await.unwrap();
        assert_eq!(gateway.calls().network_time, 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        clock.now().await.unwrap();
        assert_eq!(gateway.calls().network_time, 2);
    }
}
