//! Error handling for Cadence Core.
//!
//! This module provides:
//! - A single error type carrying a machine-readable [`ErrorCode`]
//! - User-facing vs internal messages
//! - Error chaining through an optional boxed source
//! - Metrics integration for error tracking
//!
//! Handler failures are not represented here; see [`crate::jobs::JobError`].

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Cadence operations.
pub type Result<T> = std::result::Result<T, CadenceError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and can be matched on by embedding applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Schedule Errors (1000-1099)
    InvalidCronExpression,
    PrecisionMismatch,
    RuleCannotAdvance,

    // Registry Errors (1100-1199)
    JobNotFound,
    DuplicateJob,
    InvalidJobDefinition,

    // Execution Errors (1200-1299)
    StartupJobFailed,
    EngineShutdown,
    EngineAlreadyStarted,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    InvalidConfiguration,

    // Internal Errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::InvalidCronExpression => 1000,
            Self::PrecisionMismatch => 1001,
            Self::RuleCannotAdvance => 1002,

            Self::JobNotFound => 1100,
            Self::DuplicateJob => 1101,
            Self::InvalidJobDefinition => 1102,

            Self::StartupJobFailed => 1200,
            Self::EngineShutdown => 1201,
            Self::EngineAlreadyStarted => 1202,

            Self::ConfigurationError => 5000,
            Self::InvalidConfiguration => 5001,

            Self::InternalError => 9000,
        }
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "schedule",
            1100..=1199 => "registry",
            1200..=1299 => "execution",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }

    /// Whether this error leaves the engine unable to continue.
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::StartupJobFailed | Self::InvalidConfiguration | Self::InternalError
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Cadence Core.
#[derive(Error, Debug)]
pub struct CadenceError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for CadenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl CadenceError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    /// A cron expression could not be parsed.
    pub fn invalid_cron(expression: &str, reason: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::InvalidCronExpression,
            format!("Invalid cron expression: '{}'", expression),
            reason,
        )
    }

    /// The field count of an expression does not match its precision flag.
    pub fn precision_mismatch(expression: &str, second_precision: bool, fields: usize) -> Self {
        let expected = if second_precision { 6 } else { 5 };
        Self::new(
            ErrorCode::PrecisionMismatch,
            format!(
                "Cron expression '{}' has {} fields, expected {}",
                expression, fields, expected
            ),
        )
    }

    /// A recurrence rule produced an occurrence that is not after its reference.
    pub fn rule_cannot_advance(expression: &str, reference: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::RuleCannotAdvance,
            format!(
                "Cron expression '{}' did not advance past {}",
                expression, reference
            ),
        )
    }

    /// No job is registered under the given key.
    pub fn job_not_found(key: impl fmt::Display) -> Self {
        Self::new(ErrorCode::JobNotFound, format!("Job not found: {}", key))
    }

    /// A job is already registered under the given key.
    pub fn duplicate_job(key: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::DuplicateJob,
            format!("Job already registered: {}", key),
        )
    }

    /// A job definition is malformed.
    pub fn invalid_job_definition(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidJobDefinition, message)
    }

    /// A fatal startup job failed.
    pub fn startup_failed(key: impl fmt::Display, reason: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::StartupJobFailed,
            format!("Startup job '{}' failed", key),
            reason,
        )
    }

    /// The engine has begun (or finished) shutting down.
    pub fn shutdown() -> Self {
        Self::new(ErrorCode::EngineShutdown, "The job engine is shutting down")
    }

    /// Start was called more than once.
    pub fn already_started() -> Self {
        Self::new(
            ErrorCode::EngineAlreadyStarted,
            "The job engine has already been started",
        )
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message.into())
    }

    /// Create an invalid-configuration error.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, message.into())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add internal message.
    pub fn with_internal_message(mut self, message: impl Into<String>) -> Self {
        self.internal_message = Some(message.into());
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the user-friendly message.
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Log this error at a level matching its code.
    pub fn log(&self) {
        if self.code.is_fatal() {
            error!(
                error_code = %self.code,
                category = self.code.category(),
                user_message = %self.user_message,
                internal_message = ?self.internal_message,
                "Fatal engine error"
            );
        } else {
            warn!(
                error_code = %self.code,
                category = self.code.category(),
                user_message = %self.user_message,
                internal_message = ?self.internal_message,
                "Engine error"
            );
        }
    }

    fn record_metrics(&self) {
        counter!(
            "cadence_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Conversions
// ═══════════════════════════════════════════════════════════════════════════════

impl From<config::ConfigError> for CadenceError {
    fn from(error: config::ConfigError) -> Self {
        Self::with_internal(
            ErrorCode::ConfigurationError,
            "Failed to load configuration",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<std::io::Error> for CadenceError {
    fn from(error: std::io::Error) -> Self {
        Self::with_internal(ErrorCode::InternalError, "I/O error", error.to_string())
            .with_source(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_codes_and_categories() {
        assert_eq!(ErrorCode::InvalidCronExpression.numeric_code(), 1000);
        assert_eq!(ErrorCode::InvalidCronExpression.category(), "schedule");
        assert_eq!(ErrorCode::DuplicateJob.category(), "registry");
        assert_eq!(ErrorCode::EngineShutdown.category(), "execution");
        assert_eq!(ErrorCode::InvalidConfiguration.category(), "configuration");
        assert_eq!(ErrorCode::InternalError.category(), "internal");
    }

    #[test]
    fn test_fatal_codes() {
        assert!(ErrorCode::StartupJobFailed.is_fatal());
        assert!(!ErrorCode::JobNotFound.is_fatal());
        assert!(!ErrorCode::InvalidCronExpression.is_fatal());
    }

    #[test]
    fn test_error_display() {
        let error = CadenceError::invalid_cron("* *", "expected 5 fields");
        let display = error.to_string();
        assert!(display.contains("InvalidCronExpression"));
        assert!(display.contains("'* *'"));
        assert!(display.contains("expected 5 fields"));
    }

    #[test]
    fn test_precision_mismatch_message() {
        let error = CadenceError::precision_mismatch("* * * * * *", false, 6);
        assert_eq!(error.code(), ErrorCode::PrecisionMismatch);
        assert!(error.user_message().contains("expected 5"));
    }

    #[test]
    fn test_source_chain() {
        use std::error::Error as _;

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let error = CadenceError::from(io);
        assert_eq!(error.code(), ErrorCode::InternalError);
        assert!(error.source().is_some());
    }
}
