//! Error taxonomy for the rewards engine.
//!
//! Read paths swallow these and degrade to zero/partial results; only
//! `trigger_unlock_evaluation` and the referral ledger writes surface them.

/// Rewards engine errors
#[derive(Debug, thiserror::Error)]
pub enum RewardsError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("transient storage error after {attempts} attempts: {reason}")]
    TransientStorage { attempts: u32, reason: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("referral rejected: {0}")]
    ReferralRejected(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl RewardsError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Caller may retry the whole operation
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientStorage { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, RewardsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let err = RewardsError::TransientStorage {
            attempts: 5,
            reason: "write conflict".to_string(),
        };
        assert!(err.is_transient());
        assert!(!err.is_not_found());
        assert_eq!(
            err.to_string(),
            "transient storage error after 5 attempts: write conflict"
        );
    }

    #[test]
    fn test_not_found_message() {
        let err = RewardsError::not_found("referral code", "USERDEADBEEF");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "referral code not found: USERDEADBEEF");
    }
}
