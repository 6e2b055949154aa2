//! Ledger-native time: whole seconds since 2000-01-01T00:00:00Z.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Unix timestamp of the ledger epoch.
pub const LEDGER_EPOCH_UNIX_SECONDS: i64 = 946_684_800;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct LedgerTime(u32);

impl LedgerTime {
    pub const fn from_seconds(seconds: u32) -> Self {
        Self(seconds)
    }

    pub const fn seconds(self) -> u32 {
        self.0
    }

    /// Sub-second precision is truncated, so strictly ordered instants that
    /// differ by at least one whole second stay strictly ordered.
    pub fn from_datetime(instant: DateTime<Utc>) -> Result<Self, ValidationError> {
        Self::from_unix_seconds(instant.timestamp())
    }

    pub fn from_unix_seconds(unix_seconds: i64) -> Result<Self, ValidationError> {
        let offset = unix_seconds
            .checked_sub(LEDGER_EPOCH_UNIX_SECONDS)
            .ok_or(ValidationError::TimeOutOfRange { unix_seconds })?;
        u32::try_from(offset)
            .map(Self)
            .map_err(|_| ValidationError::TimeOutOfRange { unix_seconds })
    }

    pub fn to_unix_seconds(self) -> i64 {
        LEDGER_EPOCH_UNIX_SECONDS + i64::from(self.0)
    }

    pub fn to_datetime(self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.to_unix_seconds(), 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub const fn saturating_add(self, seconds: u32) -> Self {
        Self(self.0.saturating_add(seconds))
    }

    /// The ledger's `after` predicate: `self` lies strictly past `mark`.
    pub fn is_after(self, mark: LedgerTime) -> bool {
        self.0 > mark.0
    }
}

impl fmt::Display for LedgerTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for LedgerTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LedgerTime({} = {})", self.0, self.to_datetime().to_rfc3339())
    }
}
