use thiserror::Error;

/// Outcome of a failed renewal attempt.
///
/// `Clone` because every caller waiting on the same attempt receives its own
/// copy of the one result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("Renewal rejected ({status}): {}", detail.as_deref().unwrap_or("no detail"))]
    Rejected {
        status: u16,
        code: Option<String>,
        detail: Option<String>,
    },

    #[error("Renewal network error: {0}")]
    Network(String),

    #[error("Renewal timed out")]
    Timeout,

    #[error("Invalid renewal response: {0}")]
    InvalidResponse(String),

    #[error("Renewal task aborted")]
    Aborted,

    /// The store was cleared (logout, forced logout) while the attempt was
    /// in flight, so its result was thrown away.
    #[error("Session ended during renewal")]
    SessionCleared,
}

/// Codes the renewal endpoint uses when the request carried no session at
/// all, as opposed to carrying one that is no longer valid.
const MISSING_SESSION_CODES: &[&str] = &[
    "no_session",
    "refresh_cookie_missing",
    "refresh_token_missing",
];

impl RefreshError {
    /// True when the server saw no ambient session, which makes an explicit
    /// refresh credential worth trying.
    pub fn is_missing_session(&self) -> bool {
        match self {
            RefreshError::Rejected {
                code: Some(code), ..
            } => MISSING_SESSION_CODES.contains(&code.as_str()),
            _ => false,
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RefreshError::Timeout
        } else {
            RefreshError::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(code: Option<&str>) -> RefreshError {
        RefreshError::Rejected {
            status: 401,
            code: code.map(str::to_string),
            detail: None,
        }
    }

    #[test]
    fn test_missing_session_codes() {
        assert!(rejected(Some("no_session")).is_missing_session());
        assert!(rejected(Some("refresh_cookie_missing")).is_missing_session());
        assert!(!rejected(Some("token_not_valid")).is_missing_session());
        assert!(!rejected(None).is_missing_session());
        assert!(!RefreshError::Timeout.is_missing_session());
    }

    #[test]
    fn test_display() {
        let err = RefreshError::Rejected {
            status: 401,
            code: Some("token_not_valid".into()),
            detail: Some("Token is blacklisted".into()),
        };
        assert_eq!(err.to_string(), "Renewal rejected (401): Token is blacklisted");
        assert_eq!(rejected(None).to_string(), "Renewal rejected (401): no detail");
        assert_eq!(
            RefreshError::SessionCleared.to_string(),
            "Session ended during renewal"
        );
    }
}
