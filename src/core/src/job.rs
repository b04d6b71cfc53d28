//! Job handles.
//!
//! A [`Job`] wraps a unit of work and doubles as its future: the work runs at
//! most once via [`Job::execute`], and the resulting [`JobResult`] is broadcast
//! to every caller of [`Job::wait_result`] or [`Job::get_result`], whether they
//! arrived before or after completion. All observers receive the same
//! `Arc<JobResult>`.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::error::{Result, SchedulerError};
use crate::result::{JobError, JobResult};

// ═══════════════════════════════════════════════════════════════════════════════
// Job Identification
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for a job instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Create a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Status
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle of a job handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Not yet picked up
    Pending,
    /// Work function taken, result not yet published
    Running,
    /// Result published
    Completed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job
// ═══════════════════════════════════════════════════════════════════════════════

type Work = Box<dyn FnOnce(CancelToken) -> BoxFuture<'static, Option<JobResult>> + Send>;

/// A unit of work with a broadcast result slot.
pub struct Job {
    id: JobId,
    label: Option<String>,
    work: Mutex<Option<Work>>,
    result: watch::Sender<Option<Arc<JobResult>>>,
}

impl Job {
    /// Wrap an async work function.
    ///
    /// The function may return a [`JobResult`] or `Option<JobResult>`; `None` is
    /// replaced by an empty result.
    pub fn new<F, Fut, R>(f: F) -> Arc<Self>
    where
        F: FnOnce(CancelToken) -> Fut + Send + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: Into<Option<JobResult>> + 'static,
    {
        let work: Work = Box::new(move |token| {
            f(token)
                .map(Into::<Option<JobResult>>::into)
                .boxed()
        });
        let (result, _) = watch::channel(None);
        Arc::new(Self {
            id: JobId::new(),
            label: None,
            work: Mutex::new(Some(work)),
            result,
        })
    }

    /// Wrap an async work function and attach a label used in logs.
    pub fn labeled<F, Fut, R>(label: impl Into<String>, f: F) -> Arc<Self>
    where
        F: FnOnce(CancelToken) -> Fut + Send + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: Into<Option<JobResult>> + 'static,
    {
        let mut job = Self::new(f);
        // Freshly created, so the Arc is unique.
        if let Some(inner) = Arc::get_mut(&mut job) {
            inner.label = Some(label.into());
        }
        job
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Current lifecycle state.
    pub fn status(&self) -> JobStatus {
        if self.result.borrow().is_some() {
            JobStatus::Completed
        } else if self.work.lock().is_none() {
            JobStatus::Running
        } else {
            JobStatus::Pending
        }
    }

    pub fn is_completed(&self) -> bool {
        self.result.borrow().is_some()
    }

    /// Run the work function and publish its result.
    ///
    /// A work function that returns `None` yields an empty result; one that
    /// panics yields a result carrying a [`JobError`]. Either way the result is
    /// stamped and published. Calling this twice fails with
    /// [`ErrorCode::JobAlreadyExecuted`](crate::error::ErrorCode::JobAlreadyExecuted).
    pub async fn execute(&self, token: &CancelToken) -> Result<Arc<JobResult>> {
        let work = self.work.lock().take();
        let Some(work) = work else {
            tracing::warn!(job_id = %self.id, "Job executed more than once");
            return Err(SchedulerError::job_already_executed(self.id));
        };

        tracing::debug!(job_id = %self.id, label = ?self.label, "Job started");

        let outcome = AssertUnwindSafe(work(token.clone())).catch_unwind().await;
        let mut result = match outcome {
            Ok(Some(result)) => result,
            Ok(None) => JobResult::empty(),
            Err(panic) => {
                let reason = format!("job panicked: {}", panic_message(panic.as_ref()));
                tracing::error!(job_id = %self.id, reason = %reason, "Job panicked");
                JobResult::failed(JobError::new(reason).with_code("JOB_PANICKED"))
            }
        };
        result.stamp_done(Utc::now());

        Ok(self.publish(result))
    }

    /// Publish a result unless one is already present; returns whichever result
    /// ended up in the slot.
    fn publish(&self, result: JobResult) -> Arc<JobResult> {
        let candidate = Arc::new(result);
        self.result.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(candidate.clone());
                true
            } else {
                false
            }
        });

        let published = self
            .result
            .borrow()
            .clone()
            .unwrap_or(candidate);

        tracing::debug!(
            job_id = %self.id,
            failed = !published.is_ok(),
            "Job completed"
        );
        published
    }

    /// The published result, if any. Never blocks.
    pub fn get_result(&self) -> Option<Arc<JobResult>> {
        self.result.borrow().clone()
    }

    /// Wait until the result is published or `token` fires.
    ///
    /// Returns `None` when the token fires first.
    pub async fn wait_result(&self, token: &CancelToken) -> Option<Arc<JobResult>> {
        let mut rx = self.result.subscribe();
        tokio::select! {
            biased;
            published = rx.wait_for(Option::is_some) => {
                published.ok().and_then(|slot| slot.clone())
            }
            reason = token.stopped() => {
                tracing::trace!(job_id = %self.id, reason = ?reason, "Stopped waiting for job result");
                // A result published at the same instant still wins.
                self.get_result()
            }
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("status", &self.status())
            .finish()
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
