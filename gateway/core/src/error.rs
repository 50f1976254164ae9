//! Action Error Types
//!
//! Every step an action runs returns `Result<(), ActionError>`. The first
//! error is kept in the action's error slot (see [`crate::action::ActionBase`])
//! and later turned into exactly one response artifact by
//! [`crate::problem::map_terminal`].

use thiserror::Error;

use crate::ledger::StoreError;
use crate::rate_limit::LimiterError;

/// Terminal error recorded by an action step or by the streaming engine
#[derive(Debug, Error)]
pub enum ActionError {
    /// A request parameter was missing or malformed
    #[error("invalid parameter `{field}`: {reason}")]
    InvalidParam {
        /// Name of the offending parameter
        field: String,
        /// Human-readable reason, safe to show to clients
        reason: String,
    },

    /// The ledger data layer failed or found nothing
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A resource could not be serialized
    #[error("failed to serialize resource: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The client exhausted its request budget
    #[error("rate limit exceeded")]
    RateLimited,

    /// The rate limiter backend could not answer
    #[error(transparent)]
    Limiter(#[from] LimiterError),
}

impl ActionError {
    /// Shorthand for an invalid parameter error
    pub fn invalid_param(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParam {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// True when the underlying cause is "no matching row"
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_no_rows())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(ActionError::from(StoreError::NoRows).is_not_found());
        assert!(!ActionError::from(StoreError::Backend("down".into())).is_not_found());
        assert!(!ActionError::RateLimited.is_not_found());
    }

    #[test]
    fn test_invalid_param_message() {
        let err = ActionError::invalid_param("limit", "must be between 1 and 200");
        assert_eq!(
            err.to_string(),
            "invalid parameter `limit`: must be between 1 and 200"
        );
    }
}
