//! Engine error type.
//!
//! Every failure an execution can produce is a variant here, and every
//! variant carries a stable machine-readable code via [`EngineError::code`].
//! The engine boundary converts these into the structured `error` field of an
//! execution result; nothing escapes to callers as an unhandled fault.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("capability is missing required field '{0}'")]
    MissingField(String),

    #[error("invalid capability type '{0}' (expected 'atomic' or 'composite')")]
    InvalidCapabilityType(String),

    #[error("missing required input parameter '{0}'")]
    MissingRequiredInput(String),

    #[error("{label}: expected {expected}, got {actual}")]
    TypeMismatch {
        label: String,
        expected: String,
        actual: String,
    },

    #[error("{label}: value does not match format '{format}'")]
    FormatMismatch { label: String, format: String },

    #[error("{label}: value {value} is not one of the allowed values")]
    EnumMismatch { label: String, value: String },

    #[error("{label}: value {value} is outside the allowed range {range}")]
    OutOfRange {
        label: String,
        value: f64,
        range: String,
    },

    #[error("{label}: value does not match pattern '{pattern}'")]
    PatternMismatch { label: String, pattern: String },

    #[error("unsupported execution environment '{0}'")]
    UnsupportedEnvironment(String),

    #[error("required environment variable '{0}' is not set and has no default")]
    MissingRequiredEnvVar(String),

    #[error("no access token configured for remote workflow execution")]
    MissingCredential,

    #[error("flow references task '{0}' which is not defined in the capability")]
    TaskNotFound(String),

    #[error("unsupported task language '{0}'")]
    UnsupportedLanguage(String),

    #[error("task '{0}' has no source code to execute")]
    MissingCode(String),

    #[error("script execution failed: {0}")]
    ScriptExecution(String),

    #[error("capability '{0}' not found")]
    NotFound(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Execution(String),
}

impl EngineError {
    /// Stable machine-readable category for the structured result record.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::MissingField(_) => "MissingField",
            // Both the capability discriminator gate and the schema type
            // check report the same category.
            EngineError::InvalidCapabilityType(_) | EngineError::TypeMismatch { .. } => {
                "InvalidType"
            }
            EngineError::MissingRequiredInput(_) => "MissingRequiredInput",
            EngineError::FormatMismatch { .. } => "InvalidFormat",
            EngineError::EnumMismatch { .. } => "InvalidEnum",
            EngineError::OutOfRange { .. } => "OutOfRange",
            EngineError::PatternMismatch { .. } => "PatternMismatch",
            EngineError::UnsupportedEnvironment(_) => "UnsupportedEnvironment",
            EngineError::MissingRequiredEnvVar(_) => "MissingRequiredEnvVar",
            EngineError::MissingCredential => "MissingCredential",
            EngineError::TaskNotFound(_) => "TaskNotFound",
            EngineError::UnsupportedLanguage(_) => "UnsupportedLanguage",
            EngineError::MissingCode(_) => "MissingCode",
            EngineError::ScriptExecution(_) => "ScriptExecutionError",
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::Config(_)
            | EngineError::Io(_)
            | EngineError::Http(_)
            | EngineError::Execution(_) => "EXECUTION_ERROR",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
