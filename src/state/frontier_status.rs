/// Lifecycle states of a frontier item
use std::fmt;

/// Represents where a URL is in its crawl lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrontierStatus {
    // ===== Active States =====
    /// Waiting to be picked up by a worker
    Pending,

    /// Claimed by a worker
    InFlight,

    /// Failed with a transient error; eligible again after its backoff
    FailedRetryable,

    // ===== Terminal States =====
    /// Fetched and processed
    Succeeded,

    /// Failed for good (permanent error or attempts exhausted)
    FailedPermanent,
}

impl FrontierStatus {
    /// Returns true if no further processing will happen
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::FailedPermanent)
    }

    /// Status an item takes when reloaded from a checkpoint
    ///
    /// InFlight items were interrupted mid-processing and go back to Pending.
    pub fn on_resume(self) -> Self {
        match self {
            Self::InFlight => Self::Pending,
            other => other,
        }
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::FailedRetryable => "failed_retryable",
            Self::Succeeded => "succeeded",
            Self::FailedPermanent => "failed_permanent",
        }
    }

    /// Parses a status from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_flight" => Some(Self::InFlight),
            "failed_retryable" => Some(Self::FailedRetryable),
            "succeeded" => Some(Self::Succeeded),
            "failed_permanent" => Some(Self::FailedPermanent),
            _ => None,
        }
    }

    pub fn all() -> [Self; 5] {
        [
            Self::Pending,
            Self::InFlight,
            Self::FailedRetryable,
            Self::Succeeded,
            Self::FailedPermanent,
        ]
    }
}

impl fmt::Display for FrontierStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_terminal() {
        assert!(!FrontierStatus::Pending.is_terminal());
        assert!(!FrontierStatus::InFlight.is_terminal());
        assert!(!FrontierStatus::FailedRetryable.is_terminal());
        assert!(FrontierStatus::Succeeded.is_terminal());
        assert!(FrontierStatus::FailedPermanent.is_terminal());
    }

    #[test]
    fn test_in_flight_resumes_as_pending() {
        assert_eq!(FrontierStatus::InFlight.on_resume(), FrontierStatus::Pending);
        assert_eq!(
            FrontierStatus::FailedRetryable.on_resume(),
            FrontierStatus::FailedRetryable
        );
        assert_eq!(
            FrontierStatus::Succeeded.on_resume(),
            FrontierStatus::Succeeded
        );
    }

    #[test]
    fn test_db_string_round_trip() {
        for status in FrontierStatus::all() {
            assert_eq!(
                FrontierStatus::from_db_string(status.to_db_string()),
                Some(status)
            );
        }
        assert_eq!(FrontierStatus::from_db_string("queued"), None);
    }
}
