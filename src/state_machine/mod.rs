mod job;
mod state;

pub use job::{ErrorKind, Job, JobError, JobReport, PollConfig};
pub use state::{JobEvent, JobState, StateMachine, Transition};
