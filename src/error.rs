//! Error taxonomy shared by every layer of the harness.
//!
//! Library functions return [`Result`] with a [`WizardError`]; the HTTP
//! server maps each variant to a status code and the machine-readable
//! [`code`](WizardError::code) that appears in JSON error bodies.
//!
//! Per-file read or classification failures during corpus extraction are
//! not errors at all: the file is skipped and the walk continues.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WizardError>;

#[derive(Error, Debug)]
pub enum WizardError {
    /// A required request field is missing or malformed.
    #[error("{0}")]
    InvalidInput(String),

    /// Unknown workflow, stage, or route target.
    #[error("{0}")]
    NotFound(String),

    /// Cloning the remote repository failed.
    #[error("failed to fetch repository: {0}")]
    Fetch(String),

    /// The LLM subsystem did not initialise at process start.
    #[error("LLM provider is not initialized: {0}")]
    ProviderUnavailable(String),

    /// The hosted model call failed.
    #[error("LLM call failed: {0}")]
    LlmCall(String),

    /// The cache handle does not exist on the provider or has expired.
    #[error("cache handle not found or expired: {0}")]
    CacheNotFound(String),

    /// Any other cache register/list/delete/query failure.
    #[error("cache operation failed: {0}")]
    Cache(String),

    #[error("history write failed: {0}")]
    HistoryWrite(String),

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl WizardError {
    pub fn invalid(message: impl Into<String>) -> Self {
        WizardError::InvalidInput(message.into())
    }

    pub fn timeout(operation: impl Into<String>, secs: u64) -> Self {
        WizardError::Timeout {
            operation: operation.into(),
            secs,
        }
    }

    /// Stable machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            WizardError::InvalidInput(_) => "bad_request",
            WizardError::NotFound(_) => "not_found",
            WizardError::Fetch(_) => "fetch_failed",
            WizardError::ProviderUnavailable(_) => "provider_unavailable",
            WizardError::LlmCall(_) => "llm_error",
            WizardError::CacheNotFound(_) => "cache_not_found",
            WizardError::Cache(_) => "cache_error",
            WizardError::HistoryWrite(_) => "history_write_failed",
            WizardError::Timeout { .. } => "timeout",
            WizardError::Internal(_) => "internal",
        }
    }
}
