//! Security check error types.

use alloc::string::String;

/// Result type for security checks.
pub type CapsResult<T> = Result<T, AccessError>;

/// Outcome of a failed security check.
///
/// Every variant except [`AccessError::Unexpected`] is an ordinary policy
/// decision. `Unexpected` marks a broken internal invariant and is always
/// treated as a denial by callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    /// Property, method or URI access denied.
    #[error("access denied: {0}")]
    AccessDenied(String),
    /// Cross-principal object access or capability failure.
    #[error("security error: {0}")]
    SecurityError(String),
    /// Scheme or flag based load rejection.
    #[error("bad URI: {0}")]
    BadUri(String),
    /// Recursion cap hit, or a collaborator is not initialized.
    #[error("not available: {0}")]
    Unavailable(String),
    /// Internal invariant violated.
    #[error("unexpected: {0}")]
    Unexpected(String),
}

impl AccessError {
    /// Create an access-denied error.
    pub fn denied<S: Into<String>>(msg: S) -> Self {
        AccessError::AccessDenied(msg.into())
    }

    /// Create a security error.
    pub fn security<S: Into<String>>(msg: S) -> Self {
        AccessError::SecurityError(msg.into())
    }

    /// Create a bad-URI error.
    pub fn bad_uri<S: Into<String>>(msg: S) -> Self {
        AccessError::BadUri(msg.into())
    }

    /// Create a not-available error.
    pub fn unavailable<S: Into<String>>(msg: S) -> Self {
        AccessError::Unavailable(msg.into())
    }

    /// Create an unexpected-state error and log it as a defect.
    pub fn unexpected<S: Into<String>>(msg: S) -> Self {
        let msg = msg.into();
        log::error!("[KPIO Caps] internal error: {}", msg);
        AccessError::Unexpected(msg)
    }

    /// Get error name.
    pub fn name(&self) -> &'static str {
        match self {
            AccessError::AccessDenied(_) => "AccessDenied",
            AccessError::SecurityError(_) => "SecurityError",
            AccessError::BadUri(_) => "BadUri",
            AccessError::Unavailable(_) => "Unavailable",
            AccessError::Unexpected(_) => "Unexpected",
        }
    }

    /// Get error message.
    pub fn message(&self) -> &str {
        match self {
            AccessError::AccessDenied(msg)
            | AccessError::SecurityError(msg)
            | AccessError::BadUri(msg)
            | AccessError::Unavailable(msg)
            | AccessError::Unexpected(msg) => msg,
        }
    }

    /// Whether this error is a defect rather than a security decision.
    pub fn is_defect(&self) -> bool {
        matches!(self, AccessError::Unexpected(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_display_and_name() {
        let err = AccessError::bad_uri("chrome://browser/content/");
        assert_eq!(err.name(), "BadUri");
        assert_eq!(err.to_string(), "bad URI: chrome://browser/content/");
        assert!(!err.is_defect());
    }

    #[test]
    fn test_unexpected_is_defect() {
        let err = AccessError::unexpected("principal without origin");
        assert!(err.is_defect());
        assert_eq!(err.message(), "principal without origin");
    }
}
