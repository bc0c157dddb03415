use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::job::{Job, JobError};
use crate::api::{LookupResult, TaskId};

/// Lifecycle states of a lookup job.
///
/// Idle → Submitting → Polling → Completed, with Failed reachable from
/// Submitting (rejected submission) and Polling (cutoff reached).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Idle,
    Submitting,
    Polling,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Idle => write!(f, "IDLE"),
            JobState::Submitting => write!(f, "SUBMITTING"),
            JobState::Polling => write!(f, "POLLING"),
            JobState::Completed => write!(f, "COMPLETED"),
            JobState::Failed => write!(f, "FAILED"),
        }
    }
}

/// Everything that can happen to a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    SubmitStarted,
    Submitted(TaskId),
    SubmitFailed(String),
    PollPending { message: String },
    PollFinished(LookupResult),
    PollFailed(String),
    /// The optional wall-clock limit ran out.
    DeadlineElapsed,
    Cancelled,
}

/// The effect an event had on a job.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Moved to a new non-terminal state.
    Next(JobState),
    /// Still polling; the timer re-arms.
    Stay,
    /// Reached a terminal state.
    Complete(JobState),
    /// The event did not apply (job settled, or out-of-order event).
    Ignored,
}

/// Applies events to a [`Job`]. All state changes go through here.
pub struct StateMachine;

impl StateMachine {
    /// Apply `event` to `job` and report what happened.
    ///
    /// - Settled jobs (terminal or cancelled) ignore everything.
    /// - A task id is accepted once, from `Idle` or `Submitting`.
    /// - Every poll event counts towards `max_polls`; `result` completes the
    ///   job, while `message` and transient failures keep it polling until
    ///   the cutoff turns it into a `Timeout` failure.
    /// - `Cancelled` abandons a non-terminal job in `Idle`.
    pub fn apply(job: &mut Job, event: JobEvent) -> Transition {
        if job.is_settled() {
            return Transition::Ignored;
        }

        let transition = match (job.state, event) {
            (JobState::Idle, JobEvent::SubmitStarted) => Transition::Next(JobState::Submitting),

            (JobState::Idle | JobState::Submitting, JobEvent::Submitted(task_id)) => {
                if job.task_id.is_some() {
                    Transition::Ignored
                } else {
                    job.task_id = Some(task_id);
                    Transition::Next(JobState::Polling)
                }
            }

            (JobState::Idle | JobState::Submitting, JobEvent::SubmitFailed(reason)) => {
                job.error = Some(JobError::Submission(reason));
                Transition::Complete(JobState::Failed)
            }

            (JobState::Polling, JobEvent::PollFinished(result)) => {
                job.poll_count += 1;
                job.result = Some(result);
                Transition::Complete(JobState::Completed)
            }

            (JobState::Polling, JobEvent::PollPending { message }) => {
                job.poll_count += 1;
                job.last_message = Some(message);
                Self::check_cutoff(job)
            }

            (JobState::Polling, JobEvent::PollFailed(reason)) => {
                job.poll_count += 1;
                job.transient_failures += 1;
                job.last_poll_error = Some(JobError::TransientPoll(reason));
                Self::check_cutoff(job)
            }

            (JobState::Polling, JobEvent::DeadlineElapsed) => {
                job.error = Some(JobError::Timeout {
                    attempts: job.poll_count,
                });
                Transition::Complete(JobState::Failed)
            }

            (_, JobEvent::Cancelled) => {
                job.cancelled = true;
                Transition::Next(JobState::Idle)
            }

            _ => Transition::Ignored,
        };

        match &transition {
            Transition::Next(next) | Transition::Complete(next) => {
                job.state_history.push(job.state);
                job.state = *next;
                job.updated_at = Utc::now();
            }
            Transition::Stay => {
                job.updated_at = Utc::now();
            }
            Transition::Ignored => {}
        }

        transition
    }

    fn check_cutoff(job: &mut Job) -> Transition {
        if job.poll_count >= job.max_polls {
            job.error = Some(JobError::Timeout {
                attempts: job.poll_count,
            });
            Transition::Complete(JobState::Failed)
        } else {
            Transition::Stay
        }
    }
}
