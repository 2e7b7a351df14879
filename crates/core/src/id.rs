//! Strongly-typed identifiers used across the domain.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};

/// Identifier of a user (owner of refund records).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    /// Create a new identifier.
    ///
    /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
    /// for determinism.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for UserId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for UserId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<UserId> for Uuid {
    fn from(value: UserId) -> Self {
        value.0
    }
}

impl FromStr for UserId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::from_str(s.trim())
            .map_err(|e| DomainError::invalid_id(format!("UserId: {e}")))?;
        Ok(Self(uuid))
    }
}

/// Filing period of a refund (a tax year).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaxYear(i32);

impl TaxYear {
    pub const MIN: i32 = 1900;
    pub const MAX: i32 = 9999;

    /// Validate and wrap a four-digit year.
    pub fn new(year: i32) -> DomainResult<Self> {
        if !(Self::MIN..=Self::MAX).contains(&year) {
            return Err(DomainError::validation(format!(
                "tax year must be within {}..={}, got {year}",
                Self::MIN,
                Self::MAX
            )));
        }
        Ok(Self(year))
    }

    /// Wrap a year read back from storage without re-validating it.
    pub fn from_stored(year: i32) -> Self {
        Self(year)
    }

    pub fn value(&self) -> i32 {
        self.0
    }
}

impl core::fmt::Display for TaxYear {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Key of a refund record: one row per (user, tax year).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub user_id: UserId,
    pub tax_year: TaxYear,
}

impl RecordKey {
    pub fn new(user_id: UserId, tax_year: TaxYear) -> Self {
        Self { user_id, tax_year }
    }

    /// Aggregate key used to correlate outbox entries (`"{user}:{year}"`).
    pub fn aggregate_key(&self) -> String {
        format!("{}:{}", self.user_id, self.tax_year)
    }
}

impl core::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.user_id, self.tax_year)
    }
}

/// Identifier of an outbox entry (store-assigned, monotonically increasing).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutboxEntryId(pub i64);

impl core::fmt::Display for OutboxEntryId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}
