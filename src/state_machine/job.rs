use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::state::JobState;
use crate::api::{LookupResult, TaskId};
use crate::error::CarscanError;

/// Failures recorded on a job.
///
/// `Submission` and `Timeout` end the job; `TransientPoll` is only kept as
/// the most recent poll failure while polling carries on.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum JobError {
    #[error("submission failed: {0}")]
    Submission(String),

    #[error("poll failed: {0}")]
    TransientPoll(String),

    #[error("no result after {attempts} polls")]
    Timeout { attempts: u32 },
}

/// Coarse classification of a [`JobError`] for the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    SubmissionError,
    TransientPollError,
    TimeoutError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::SubmissionError => write!(f, "SubmissionError"),
            ErrorKind::TransientPollError => write!(f, "TransientPollError"),
            ErrorKind::TimeoutError => write!(f, "TimeoutError"),
        }
    }
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::Submission(_) => ErrorKind::SubmissionError,
            JobError::TransientPoll(_) => ErrorKind::TransientPollError,
            JobError::Timeout { .. } => ErrorKind::TimeoutError,
        }
    }

    /// Whether this error ends the job.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, JobError::TransientPoll(_))
    }
}

/// Polling cadence and cutoffs, fixed when the client is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between the end of one poll and the start of the next.
    pub interval: Duration,
    /// Polls allowed before the job fails with a timeout. Always enforced.
    pub max_polls: u32,
    /// Optional wall-clock limit measured from the start of polling.
    pub timeout: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_polls: 300,
            timeout: None,
        }
    }
}

impl PollConfig {
    pub fn new(interval: Duration, max_polls: u32) -> Self {
        Self {
            interval,
            max_polls,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> Result<(), CarscanError> {
        if self.interval.is_zero() {
            return Err(CarscanError::Config("poll interval must be non-zero".into()));
        }
        if self.max_polls == 0 {
            return Err(CarscanError::Config("max_polls must be at least 1".into()));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(CarscanError::Config("poll timeout must be non-zero".into()));
        }
        Ok(())
    }
}

/// Observable snapshot of one lookup job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Local id, known before the backend issues one.
    pub handle_id: String,
    /// Backend-issued id; set once on successful submission.
    pub task_id: Option<TaskId>,
    /// Plate or VIN the lookup was started for.
    pub identifier: String,
    pub state: JobState,
    pub state_history: Vec<JobState>,
    pub result: Option<LookupResult>,
    /// Fatal error that ended the job.
    pub error: Option<JobError>,
    /// Latest progress message from the backend.
    pub last_message: Option<String>,
    /// Latest transient poll failure, if any.
    pub last_poll_error: Option<JobError>,
    pub poll_count: u32,
    pub transient_failures: u32,
    pub max_polls: u32,
    /// Set when the job was abandoned by `cancel`.
    pub cancelled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(identifier: String, max_polls: u32) -> Self {
        let now = Utc::now();
        Self {
            handle_id: Uuid::new_v4().to_string(),
            task_id: None,
            identifier,
            state: JobState::Idle,
            state_history: Vec::new(),
            result: None,
            error: None,
            last_message: None,
            last_poll_error: None,
            poll_count: 0,
            transient_failures: 0,
            max_polls,
            cancelled: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Terminal or abandoned: nothing will change this job again.
    pub fn is_settled(&self) -> bool {
        self.is_terminal() || self.cancelled
    }
}

/// Summary printed once a job has settled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub task_id: Option<TaskId>,
    pub identifier: String,
    pub state: JobState,
    pub state_transitions: Vec<JobState>,
    pub poll_count: u32,
    pub transient_failures: u32,
    pub max_polls: u32,
    pub cancelled: bool,
    pub result: Option<LookupResult>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl JobReport {
    pub fn from_job(job: &Job) -> Self {
        let finished_at = job.updated_at;
        let mut transitions = job.state_history.clone();
        transitions.push(job.state);

        Self {
            task_id: job.task_id.clone(),
            identifier: job.identifier.clone(),
            state: job.state,
            state_transitions: transitions,
            poll_count: job.poll_count,
            transient_failures: job.transient_failures,
            max_polls: job.max_polls,
            cancelled: job.cancelled,
            result: job.result.clone(),
            error: job.error.as_ref().map(ToString::to_string),
            error_kind: job.error.as_ref().map(JobError::kind),
            started_at: job.created_at,
            finished_at,
            duration_ms: (finished_at - job.created_at).num_milliseconds(),
        }
    }
}
