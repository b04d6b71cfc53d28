//! Job results.
//!
//! A [`JobResult`] is what a job hands back to its waiters: an optional
//! [`JobError`], a bag of typed values keyed by name, and the time the job
//! finished. Values are read back with [`JobResult::get`], which checks the
//! stored type at runtime.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

/// Key under which [`JobResult::value`] stores its single value.
pub const DEFAULT_KEY: &str = "";

// ═══════════════════════════════════════════════════════════════════════════════
// Job Error
// ═══════════════════════════════════════════════════════════════════════════════

/// Failure reported by a job's work function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    /// Error message
    pub message: String,
    /// Optional error code
    pub code: Option<String>,
    /// Additional context
    pub context: Option<serde_json::Value>,
}

impl JobError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            context: None,
        }
    }

    /// Add an error code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Add context.
    pub fn with_context(mut self, context: impl Serialize) -> Self {
        self.context = serde_json::to_value(context).ok();
        self
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(code) = &self.code {
            write!(f, " (code: {})", code)?;
        }
        Ok(())
    }
}

impl std::error::Error for JobError {}

impl From<anyhow::Error> for JobError {
    fn from(error: anyhow::Error) -> Self {
        Self::new(format!("{:#}", error))
    }
}

impl From<SchedulerError> for JobError {
    fn from(error: SchedulerError) -> Self {
        Self::new(error.message()).with_code(error.code().to_string())
    }
}

impl From<&str> for JobError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for JobError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Result
// ═══════════════════════════════════════════════════════════════════════════════

struct StoredValue {
    value: Box<dyn Any + Send + Sync>,
    type_name: &'static str,
}

/// Outcome of a job.
#[derive(Default)]
pub struct JobResult {
    error: Option<JobError>,
    values: HashMap<String, StoredValue>,
    done_at: Option<DateTime<Utc>>,
}

impl JobResult {
    /// A result with no error and no values.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A result holding one value under [`DEFAULT_KEY`].
    pub fn value<T: Any + Send + Sync>(value: T) -> Self {
        Self::empty().set(DEFAULT_KEY, value)
    }

    /// A result carrying an error.
    pub fn failed(error: impl Into<JobError>) -> Self {
        let mut result = Self::empty();
        result.set_error(error);
        result
    }

    /// Record an error. Only the first error is kept.
    pub fn set_error(&mut self, error: impl Into<JobError>) -> &mut Self {
        if self.error.is_none() {
            self.error = Some(error.into());
        }
        self
    }

    pub fn error(&self) -> Option<&JobError> {
        self.error.as_ref()
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Store a value, replacing any previous value under the same key.
    pub fn set<T: Any + Send + Sync>(mut self, key: impl Into<String>, value: T) -> Self {
        self.insert(key, value);
        self
    }

    /// In-place variant of [`set`](Self::set).
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(
            key.into(),
            StoredValue {
                value: Box::new(value),
                type_name: type_name::<T>(),
            },
        );
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Borrow a value as `T`.
    pub fn get_ref<T: Any>(&self, key: &str) -> Result<&T> {
        let stored = self
            .values
            .get(key)
            .ok_or_else(|| SchedulerError::missing_result_key(key))?;
        stored.value.downcast_ref::<T>().ok_or_else(|| {
            SchedulerError::result_type_mismatch(key, stored.type_name, type_name::<T>())
        })
    }

    /// Read a value as `T`.
    pub fn get<T: Any + Clone>(&self, key: &str) -> Result<T> {
        self.get_ref::<T>(key).cloned()
    }

    /// Read the value stored by [`JobResult::value`].
    pub fn get_value<T: Any + Clone>(&self) -> Result<T> {
        self.get(DEFAULT_KEY)
    }

    /// When the job finished. Set by the executing job.
    pub fn done_at(&self) -> Option<DateTime<Utc>> {
        self.done_at
    }

    pub(crate) fn stamp_done(&mut self, at: DateTime<Utc>) {
        self.done_at = Some(at);
    }
}

impl fmt::Debug for JobResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<(&str, &str)> = self
            .values
            .iter()
            .map(|(k, v)| (k.as_str(), v.type_name))
            .collect();
        keys.sort_unstable();
        f.debug_struct("JobResult")
            .field("error", &self.error)
            .field("values", &keys)
            .field("done_at", &self.done_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_has_and_set() {
        let result = JobResult::empty();
        assert!(!result.has("var1"));

        let result = result.set("var1", 3_i32);
        assert!(result.has("var1"));
        assert_eq!(result.get::<i32>("var1").unwrap(), 3);
    }

    #[test]
    fn test_default_value() {
        let result = JobResult::value(String::from("background"));
        assert_eq!(result.get_value::<String>().unwrap(), "background");
        assert!(result.is_ok());
    }

    #[test]
    fn test_typed_accessors() {
        let result = JobResult::empty()
            .set("bool", true)
            .set("i64", 1_i64)
            .set("u32", 1_u32)
            .set("f64", 1.5_f64)
            .set("string", String::from("something"));

        assert!(result.get::<bool>("bool").unwrap());
        assert_eq!(result.get::<i64>("i64").unwrap(), 1);
        assert_eq!(result.get::<u32>("u32").unwrap(), 1);
        assert_eq!(result.get::<f64>("f64").unwrap(), 1.5);
        assert_eq!(result.get_ref::<String>("string").unwrap(), "something");
        assert_eq!(result.len(), 5);
    }

    #[test]
    fn test_type_mismatch() {
        let result = JobResult::empty().set("count", 7_i32);
        let err = result.get::<i64>("count").unwrap_err();
        assert_eq!(err.code(), ErrorCode::ResultTypeMismatch);
        assert!(err.message().contains("i32"));
        assert!(err.message().contains("i64"));
    }

    #[test]
    fn test_missing_key() {
        let result = JobResult::empty();
        let err = result.get::<i32>("nope").unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingResultKey);
    }

    #[test]
    fn test_error_slot_is_write_once() {
        let mut result = JobResult::failed("something wrong");
        result.set_error(JobError::new("second").with_code("E2"));

        let error = result.error().unwrap();
        assert_eq!(error.message, "something wrong");
        assert!(error.code.is_none());
        assert!(!result.is_ok());
    }

    #[test]
    fn test_job_error_display() {
        let error = JobError::new("network timeout")
            .with_code("TIMEOUT")
            .with_context(serde_json::json!({"attempt": 3}));
        assert_eq!(error.to_string(), "network timeout (code: TIMEOUT)");
        assert!(error.context.is_some());
    }
}
