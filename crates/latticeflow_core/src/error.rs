//! Error taxonomy shared by every worker/scanner crate.
//!
//! The job queue (`latticeflow_queue`) only needs to know whether a
//! failure is retryable; this module is the seam where a library error
//! is classified once, at the source, instead of re-derived at every
//! call site.

use thiserror::Error;

/// How the worker runtime should react to a job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    /// Requeue subject to the attempt cap and backoff schedule.
    Retryable,
    /// Mark FAILED immediately, skipping the attempt cap.
    NonRetryable,
}

/// A job-processing error carrying its own retry classification.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct JobError {
    pub message: String,
    pub retry: Retry,
}

impl JobError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retry: Retry::Retryable,
        }
    }

    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retry: Retry::NonRetryable,
        }
    }

    /// Truncate to ~500 chars before it lands in `Job::last_error` (spec §7).
    pub fn truncated_message(&self) -> String {
        truncate(&self.message, 500)
    }
}

/// Any other error is retryable by default (spec §7 "Unexpected").
impl From<anyhow::Error> for JobError {
    fn from(err: anyhow::Error) -> Self {
        JobError::retryable(err.to_string())
    }
}

pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_long_messages() {
        let long = "x".repeat(1000);
        let t = truncate(&long, 500);
        assert_eq!(t.chars().count(), 500);
    }

    #[test]
    fn leaves_short_messages_untouched() {
        assert_eq!(truncate("short", 500), "short");
    }

    #[test]
    fn anyhow_errors_default_retryable() {
        let err: JobError = anyhow::anyhow!("boom").into();
        assert_eq!(err.retry, Retry::Retryable);
    }
}
