use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

/// Stable error codes carried by every [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ConfigRead,
    ConfigParse,
    ConfigValidation,
    StateRead,
    StateParse,
    UnsupportedStateVersion,
    Mapping,
    ResourceNotFound,
    Matching,
    Comparison,
    NotImplemented,
    Internal,
    Cancelled,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigRead => "CONFIG_READ",
            ErrorCode::ConfigParse => "CONFIG_PARSE",
            ErrorCode::ConfigValidation => "CONFIG_VALIDATION",
            ErrorCode::StateRead => "STATE_READ",
            ErrorCode::StateParse => "STATE_PARSE",
            ErrorCode::UnsupportedStateVersion => "UNSUPPORTED_STATE_VERSION",
            ErrorCode::Mapping => "MAPPING",
            ErrorCode::ResourceNotFound => "RESOURCE_NOT_FOUND",
            ErrorCode::Matching => "MATCHING",
            ErrorCode::Comparison => "COMPARISON",
            ErrorCode::NotImplemented => "NOT_IMPLEMENTED",
            ErrorCode::Internal => "INTERNAL",
            ErrorCode::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The one error envelope used across the workspace.
///
/// `message` and `suggested_action` may be shown to end users when
/// `user_facing` is set; `internal_details` and the wrapped source are for
/// logs only. The source is `Arc`'d so cached parse errors can be cloned out
/// of once-guards.
#[derive(Debug, Clone, ThisError)]
#[error("{code}: {message}")]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub internal_details: Option<String>,
    pub user_facing: bool,
    pub suggested_action: Option<String>,
    #[source]
    source: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            internal_details: None,
            user_facing: false,
            suggested_action: None,
            source: None,
        }
    }

    /// Construct an error whose message is intended for end users.
    pub fn user(code: ErrorCode, message: impl Into<String>) -> Self {
        let mut err = Self::new(code, message);
        err.user_facing = true;
        err
    }

    /// Wrap an underlying error without losing it.
    pub fn wrap(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::new(code, message).with_source(source)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "operation cancelled")
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == ErrorCode::Cancelled
    }

    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.internal_details = Some(details.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggested_action = Some(suggestion.into());
        self
    }

    /// The portion of this error safe to print to an end user.
    ///
    /// Non-user-facing errors collapse to a generic line so internals never
    /// leak to stderr; the full chain stays available for logging.
    pub fn user_message(&self) -> String {
        if self.user_facing {
            self.message.clone()
        } else {
            format!("an internal error occurred ({})", self.code)
        }
    }

    /// Full single-line rendering including the wrapped source, for logs.
    pub fn log_message(&self) -> String {
        let mut out = format!("{}: {}", self.code, self.message);
        if let Some(details) = &self.internal_details {
            out.push_str(&format!(" ({details})"));
        }
        if let Some(source) = &self.source {
            out.push_str(&format!(": {source}"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_hides_internal_errors() {
        let err = Error::new(ErrorCode::Internal, "mutex poisoned in aggregation");
        assert!(!err.user_message().contains("mutex"));
        assert!(err.user_message().contains("INTERNAL"));
    }

    #[test]
    fn user_message_surfaces_user_facing_text() {
        let err = Error::user(ErrorCode::StateParse, "state file is empty")
            .with_suggestion("run terraform apply first");
        assert_eq!(err.user_message(), "state file is empty");
        assert_eq!(err.suggested_action.as_deref(), Some("run terraform apply first"));
    }

    #[test]
    fn wrapping_preserves_the_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = Error::wrap(ErrorCode::StateRead, "cannot read state", io);
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.log_message().contains("no such file"));
    }

    #[test]
    fn cancelled_is_detectable() {
        assert!(Error::cancelled().is_cancelled());
        assert!(!Error::new(ErrorCode::Matching, "x").is_cancelled());
    }
}
