use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Refund status as reported by the upstream tax authority.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    NotFound,
    Received,
    Processing,
    Approved,
    Sent,
    Available,
    Rejected,
}

impl RefundStatus {
    pub const ALL: [RefundStatus; 7] = [
        RefundStatus::NotFound,
        RefundStatus::Received,
        RefundStatus::Processing,
        RefundStatus::Approved,
        RefundStatus::Sent,
        RefundStatus::Available,
        RefundStatus::Rejected,
    ];

    /// Stable wire/storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::NotFound => "NOT_FOUND",
            RefundStatus::Received => "RECEIVED",
            RefundStatus::Processing => "PROCESSING",
            RefundStatus::Approved => "APPROVED",
            RefundStatus::Sent => "SENT",
            RefundStatus::Available => "AVAILABLE",
            RefundStatus::Rejected => "REJECTED",
        }
    }

    /// The refund reached an end state (funds available or refund rejected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, RefundStatus::Available | RefundStatus::Rejected)
    }

    /// Whether "days until available" is a meaningful question for this status.
    pub fn wants_eta(&self) -> bool {
        !self.is_terminal() && *self != RefundStatus::NotFound
    }
}

impl core::fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefundStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        RefundStatus::ALL
            .into_iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| DomainError::UnknownStatus(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_case_insensitively() {
        assert_eq!("PROCESSING".parse::<RefundStatus>().unwrap(), RefundStatus::Processing);
        assert_eq!(" not_found ".parse::<RefundStatus>().unwrap(), RefundStatus::NotFound);
        assert!("LOST".parse::<RefundStatus>().is_err());
    }

    #[test]
    fn serde_uses_storage_names() {
        for status in RefundStatus::ALL {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
    }

    #[test]
    fn eta_only_for_in_flight_statuses() {
        assert!(RefundStatus::Received.wants_eta());
        assert!(RefundStatus::Sent.wants_eta());
        assert!(!RefundStatus::Available.wants_eta());
        assert!(!RefundStatus::Rejected.wants_eta());
        assert!(!RefundStatus::NotFound.wants_eta());
    }
}
