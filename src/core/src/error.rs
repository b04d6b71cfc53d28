//! Error handling for the jobrank scheduler.
//!
//! This module provides:
//! - A single error type carrying a machine-readable [`ErrorCode`]
//! - Severity classification that drives how an error is logged
//! - Recoverability (cancellation and unknown priorities are expected at runtime,
//!   configuration mistakes are not)
//! - Metrics integration for error tracking
//!
//! # Usage
//!
//! ```rust,ignore
//! use jobrank_core::error::{SchedulerError, Result, ErrorContext};
//!
//! fn load() -> Result<String> {
//!     std::fs::read_to_string("jobrank.toml").context("Failed to read config")
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for scheduler operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Configuration Errors (1000-1099)
    ConfigurationError,
    DuplicatePriority,
    InvalidConfiguration,
    HookAfterStart,

    // Scheduling Errors (1100-1199)
    UnknownPriority,

    // Wait Errors (1200-1299)
    Timeout,
    Cancelled,

    // Job Errors (1300-1399)
    JobAlreadyExecuted,
    MissingResultKey,
    ResultTypeMismatch,

    // Internal Errors (9000-9099)
    WorkerPanicked,
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::ConfigurationError => 1000,
            Self::DuplicatePriority => 1001,
            Self::InvalidConfiguration => 1002,
            Self::HookAfterStart => 1003,

            Self::UnknownPriority => 1100,

            Self::Timeout => 1200,
            Self::Cancelled => 1201,

            Self::JobAlreadyExecuted => 1300,
            Self::MissingResultKey => 1301,
            Self::ResultTypeMismatch => 1302,

            Self::WorkerPanicked => 9000,
            Self::InternalError => 9001,
        }
    }

    /// Check whether the condition is an expected runtime outcome the caller can
    /// handle, as opposed to a setup or programming mistake.
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::UnknownPriority
                | Self::Timeout
                | Self::Cancelled
                | Self::MissingResultKey
                | Self::ResultTypeMismatch
        )
    }

    /// Check whether this code marks the end of a blocking wait.
    pub const fn is_interruption(&self) -> bool {
        matches!(self, Self::Timeout | Self::Cancelled)
    }

    /// Setup-time mistakes: bad parameters, duplicate ranks, late hooks.
    pub const fn is_configuration(&self) -> bool {
        matches!(self.numeric_code(), 1000..=1099)
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "configuration",
            1100..=1199 => "scheduling",
            1200..=1299 => "wait",
            1300..=1399 => "job",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Expected outcomes (timeouts, cancellation)
    Low,
    /// Caller mistakes at runtime
    Medium,
    /// Setup errors
    High,
    /// Broken internals
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::Timeout | ErrorCode::Cancelled => Self::Low,

            ErrorCode::UnknownPriority
            | ErrorCode::JobAlreadyExecuted
            | ErrorCode::MissingResultKey
            | ErrorCode::ResultTypeMismatch => Self::Medium,

            ErrorCode::ConfigurationError
            | ErrorCode::DuplicatePriority
            | ErrorCode::InvalidConfiguration
            | ErrorCode::HookAfterStart => Self::High,

            ErrorCode::WorkerPanicked | ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for jobrank.
#[derive(Error, Debug)]
pub struct SchedulerError {
    /// Machine-readable error code
    code: ErrorCode,

    /// Human-readable message
    message: Cow<'static, str>,

    /// Structured context for logs
    details: HashMap<String, serde_json::Value>,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl SchedulerError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and message.
    pub fn new(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            message: message.into(),
            details: HashMap::new(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message.into())
    }

    /// Create a generic configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message.into())
    }

    /// A priority rank was registered twice.
    pub fn duplicate_priority(rank: i64) -> Self {
        Self::new(
            ErrorCode::DuplicatePriority,
            format!("Priority rank {} is already registered", rank),
        )
        .with_context("rank", rank)
    }

    /// A configuration call referenced a rank that was never registered.
    pub fn unregistered_priority(rank: i64) -> Self {
        Self::new(
            ErrorCode::ConfigurationError,
            format!("Priority rank {} is not registered", rank),
        )
        .with_context("rank", rank)
    }

    /// A duration or count parameter is out of range.
    pub fn invalid_parameter(name: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::new(
            ErrorCode::InvalidConfiguration,
            format!("Invalid {}: {}", name, reason),
        )
        .with_context("parameter", name)
    }

    /// A zero duration was given where a positive one is required.
    pub fn zero_duration(name: &str) -> Self {
        Self::invalid_parameter(name, format!("must be greater than {:?}", Duration::ZERO))
    }

    /// The completion hook was set while workers were already running.
    pub fn hook_after_start() -> Self {
        Self::new(
            ErrorCode::HookAfterStart,
            "Completion hook must be set before the scheduler starts running",
        )
    }

    /// A job was scheduled against a rank the queue does not know.
    pub fn unknown_priority(rank: i64) -> Self {
        Self::new(
            ErrorCode::UnknownPriority,
            format!("Cannot schedule against unregistered priority rank {}", rank),
        )
        .with_context("rank", rank)
    }

    /// A blocking wait hit its deadline.
    pub fn timeout() -> Self {
        Self::new(ErrorCode::Timeout, "Wait deadline exceeded")
    }

    /// A blocking wait was cancelled explicitly.
    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "Wait cancelled")
    }

    /// `execute` was called on a job whose work has already been taken.
    pub fn job_already_executed(job_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::JobAlreadyExecuted,
            format!("Job {} has already been executed", job_id),
        )
    }

    /// A result key was not present.
    pub fn missing_result_key(key: &str) -> Self {
        Self::new(
            ErrorCode::MissingResultKey,
            format!("Result has no value for key '{}'", key),
        )
        .with_context("key", key)
    }

    /// A result value was read back as the wrong type.
    pub fn result_type_mismatch(key: &str, stored: &str, requested: &str) -> Self {
        Self::new(
            ErrorCode::ResultTypeMismatch,
            format!(
                "Result value '{}' is {}, requested {}",
                key, stored, requested
            ),
        )
        .with_context("key", key)
        .with_context("stored_type", stored)
        .with_context("requested_type", requested)
    }

    /// A worker task panicked outside job execution (e.g. inside the hook).
    pub fn worker_panicked(worker: usize, reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::WorkerPanicked,
            format!("Worker {} panicked: {}", worker, reason.into()),
        )
        .with_context("worker", worker)
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

    /// Add structured context.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the structured context.
    pub fn details(&self) -> &HashMap<String, serde_json::Value> {
        &self.details
    }

    /// Check if the caller can reasonably recover from this error.
    pub fn is_recoverable(&self) -> bool {
        self.code.is_recoverable()
    }

    /// Check if this error ended a blocking wait.
    pub fn is_interruption(&self) -> bool {
        self.code.is_interruption()
    }

    pub fn is_configuration(&self) -> bool {
        self.code.is_configuration()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    details = ?self.details,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    "Low severity error"
                );
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metrics
    // ─────────────────────────────────────────────────────────────────────────

    fn record_metrics(&self) {
        counter!(
            "jobrank_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "severity" => format!("{:?}", self.severity()),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with error code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| SchedulerError::internal(message.into()).with_source(e))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| SchedulerError::new(code, e.to_string()).with_source(e))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| SchedulerError::internal(message.into()))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| SchedulerError::new(code, "Value not present"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Conversions
// ═══════════════════════════════════════════════════════════════════════════════

impl From<config::ConfigError> for SchedulerError {
    fn from(error: config::ConfigError) -> Self {
        SchedulerError::new(
            ErrorCode::InvalidConfiguration,
            format!("Failed to load configuration: {}", error),
        )
        .with_source(error)
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(error: serde_json::Error) -> Self {
        SchedulerError::new(ErrorCode::InternalError, error.to_string()).with_source(error)
    }
}

impl From<std::io::Error> for SchedulerError {
    fn from(error: std::io::Error) -> Self {
        SchedulerError::new(ErrorCode::InternalError, format!("I/O error: {}", error))
            .with_source(error)
    }
}

impl From<anyhow::Error> for SchedulerError {
    fn from(error: anyhow::Error) -> Self {
        SchedulerError::internal(format!("{:#}", error))
    }
}
