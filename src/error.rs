//! Crate-wide error type.
//!
//! `CoreError` carries exactly the error kinds enumerated in the task
//! tracker's error-handling design: validation failures surface before any
//! mutation, internal/database failures roll back their enclosing
//! transaction. A flat `thiserror` enum with string payloads, sized to
//! exactly the kind set this domain needs.

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("workspace_path is required")]
    WorkspaceMissing,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid mode: {0} (expected \"summary\" or \"details\")")]
    InvalidMode(String),

    #[error("invalid pagination: {0}")]
    PaginationInvalid(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("dependency not satisfied: {0}")]
    DependencyNotSatisfied(String),

    #[error("cycle detected: {0}")]
    Cycle(String),

    #[error("blocker_reason is required when status = blocked")]
    BlockerReasonMissing,

    #[error("database busy, retry")]
    LockContended,

    #[error("response size exceeded")]
    ResponseSizeExceeded {
        actual_tokens: usize,
        max_tokens: usize,
        suggestion: String,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable string tag for the error, used in the `{error: {code, ...}}` envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::WorkspaceMissing => "WORKSPACE_MISSING",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::InvalidMode(_) => "INVALID_MODE",
            Self::PaginationInvalid(_) => "PAGINATION_INVALID",
            Self::Conflict(_) => "CONFLICT",
            Self::DependencyNotSatisfied(_) => "DEPENDENCY_NOT_SATISFIED",
            Self::Cycle(_) => "CYCLE",
            Self::BlockerReasonMissing => "BLOCKER_REASON_MISSING",
            Self::LockContended => "LOCK_CONTENDED",
            Self::ResponseSizeExceeded { .. } => "RESPONSE_SIZE_EXCEEDED",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Whether the caller may usefully retry the same call unchanged.
    pub fn retriable(&self) -> bool {
        matches!(self, Self::LockContended)
    }

    /// Render as the `{error: {code, message, details?}, suggestion?}` envelope.
    pub fn to_envelope(&self) -> serde_json::Value {
        let mut error = serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        let mut suggestion: Option<String> = None;
        if let Self::ResponseSizeExceeded {
            actual_tokens,
            max_tokens,
            suggestion: s,
        } = self
        {
            error["details"] = serde_json::json!({
                "actual_tokens": actual_tokens,
                "max_tokens": max_tokens,
            });
            suggestion = Some(s.clone());
        }
        let mut envelope = serde_json::json!({ "error": error });
        if let Some(s) = suggestion {
            envelope["suggestion"] = serde_json::Value::String(s);
        }
        envelope
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(err, _) = &e {
            if err.code == rusqlite::ErrorCode::DatabaseBusy
                || err.code == rusqlite::ErrorCode::DatabaseLocked
            {
                return Self::LockContended;
            }
        }
        Self::Internal(e.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
