//! Error types for the automation engine
//!
//! Every failure the engine can produce is an [`AppError`]. The top-level
//! variants line up with the recovery taxonomy in [`ErrorKind`]; storage,
//! config and job-bookkeeping errors sit beside them and are never retried.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failure category used by the recovery policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Bad input data: unparseable instructions, unknown fuel grade
    Validation,
    /// Login rejected or session expired
    Authentication,
    /// Browser crashed or stopped responding
    Browser,
    /// Expected DOM element missing or stale
    Form,
    /// Connectivity failure
    Network,
    /// A phase exceeded its allotted time
    Timeout,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Browser => "browser",
            ErrorKind::Form => "form",
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application error
#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("authentication error: {0}")]
    Authentication(#[from] AuthError),

    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),

    #[error("form error: {0}")]
    Form(#[from] FormError),

    #[error("network error: {message}")]
    Network { message: String },

    #[error("timeout: phase {phase} exceeded {limit_ms}ms")]
    Timeout { phase: String, limit_ms: u64 },

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("job error: {0}")]
    Job(#[from] JobError),

    #[error("error: {0}")]
    Other(String),
}

/// Input-data errors. These never retry.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("unknown fuel grade '{grade}' on dispenser {dispenser}")]
    UnknownFuelGrade { grade: String, dispenser: u32 },

    #[error("dispenser {dispenser} has no fuel grades")]
    EmptyFuelGrades { dispenser: u32 },

    #[error("work order {work_order_id} has no supported service code (found: {codes:?})")]
    NoSupportedServiceCode {
        work_order_id: String,
        codes: Vec<String>,
    },

    #[error("cannot read dispenser list from instructions: {0}")]
    UnparseableInstructions(#[from] ParseError),

    #[error("dispenser {number} is targeted but not listed on the work order")]
    DispenserNotFound { number: u32 },

    #[error("service asks for {requested} dispensers but the work order lists {available}")]
    InsufficientDispensers { requested: u32, available: usize },

    #[error("service code {code} has quantity 0")]
    ZeroQuantity { code: String },
}

/// Errors from the "specific dispensers" instruction parser
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("no dispenser numbers found in '{text}'")]
    NoDispenserNumbers { text: String },

    #[error("dispenser number 0 is not valid")]
    ZeroDispenser,

    #[error("range {start}-{end} runs backwards")]
    ReversedRange { start: u32, end: u32 },

    #[error("range {start}-{end} is too wide")]
    RangeTooWide { start: u32, end: u32 },
}

/// Login / session errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("login rejected at {url}")]
    LoginRejected { url: String },

    #[error("session expired, redirected to {url}")]
    SessionExpired { url: String },

    #[error("platform credentials are not configured")]
    MissingCredentials,
}

/// Browser-level errors
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("cannot connect to browser on port {port}: {source}")]
    ConnectionFailed {
        port: u16,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("cannot launch browser: {message}")]
    LaunchFailed { message: String },

    #[error("cannot create page: {message}")]
    PageCreationFailed { message: String },

    #[error("navigation to {url} failed: {message}")]
    NavigationFailed { url: String, message: String },

    #[error("CDP call failed: {message}")]
    Cdp { message: String },

    #[error("session is closed")]
    SessionClosed,
}

/// DOM / form interaction errors
#[derive(Debug, Error)]
pub enum FormError {
    #[error("element not found: {selector}")]
    ElementMissing { selector: String },

    #[error("element is stale or disabled: {selector}")]
    StaleElement { selector: String },

    #[error("no way to create a form for dispenser {dispenser}")]
    NoCreationAffordance { dispenser: u32 },

    #[error("submission rejected: {message}")]
    SubmitRejected { message: String },
}

/// Configuration and option validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {var_name}: '{value}' is not a valid {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },

    #[error("invalid option {field}: {reason}")]
    InvalidOption { field: String, reason: String },
}

/// Checkpoint / artifact storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("cannot read {path}: {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write {path}: {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt checkpoint {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Registry bookkeeping errors
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job {job_id} not found")]
    NotFound { job_id: String },

    #[error("batch {batch_id} not found")]
    BatchNotFound { batch_id: String },

    #[error("invalid transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("job {job_id} is not terminal")]
    NotTerminal { job_id: String },
}

impl AppError {
    /// Default category for this error, before message heuristics
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation(_) | AppError::Config(_) => ErrorKind::Validation,
            AppError::Authentication(_) => ErrorKind::Authentication,
            AppError::Form(_) => ErrorKind::Form,
            AppError::Network { .. } => ErrorKind::Network,
            AppError::Timeout { .. } => ErrorKind::Timeout,
            AppError::Browser(_) | AppError::Storage(_) | AppError::Job(_) | AppError::Other(_) => {
                ErrorKind::Browser
            }
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        AppError::Network {
            message: message.into(),
        }
    }

    pub fn timeout(phase: impl Into<String>, limit_ms: u64) -> Self {
        AppError::Timeout {
            phase: phase.into(),
            limit_ms,
        }
    }

    pub fn element_missing(selector: impl Into<String>) -> Self {
        AppError::Form(FormError::ElementMissing {
            selector: selector.into(),
        })
    }

    pub fn browser_connection_failed(
        port: u16,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Browser(BrowserError::ConnectionFailed {
            port,
            source: Box::new(source),
        })
    }

    pub fn invalid_option(field: impl Into<String>, reason: impl Into<String>) -> Self {
        AppError::Config(ConfigError::InvalidOption {
            field: field.into(),
            reason: reason.into(),
        })
    }
}

// ========== conversions from library errors ==========

impl From<chromiumoxide::error::CdpError> for AppError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        if matches!(err, chromiumoxide::error::CdpError::Timeout) {
            return AppError::timeout("cdp", 0);
        }
        AppError::Browser(BrowserError::Cdp {
            message: err.to_string(),
        })
    }
}

impl From<ParseError> for AppError {
    fn from(err: ParseError) -> Self {
        AppError::Validation(ValidationError::UnparseableInstructions(err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Browser(BrowserError::Cdp {
            message: format!("unexpected script result: {}", err),
        })
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::invalid_option("visit file", err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(StorageError::ReadFailed {
            path: String::new(),
            source: err,
        })
    }
}

/// Result alias used across the library
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_kinds_follow_variant() {
        let err = AppError::from(ValidationError::ZeroQuantity {
            code: "2861".into(),
        });
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(AppError::network("reset").kind(), ErrorKind::Network);
        assert_eq!(AppError::timeout("login", 10).kind(), ErrorKind::Timeout);
        assert_eq!(AppError::element_missing("#save").kind(), ErrorKind::Form);
        assert_eq!(
            AppError::from(AuthError::MissingCredentials).kind(),
            ErrorKind::Authentication
        );
        assert_eq!(
            AppError::invalid_option("delay", "negative").kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn error_kind_serializes_camel_case() {
        let json = serde_json::to_string(&ErrorKind::Authentication).unwrap();
        assert_eq!(json, "\"authentication\"");
    }
}
