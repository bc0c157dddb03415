//! CarScan lookup client.
//!
//! Submits a plate/VIN check to the CarScan backend and follows the
//! resulting background task until it produces a result, fails, or is
//! cancelled. See [`poller::TaskPollingClient`].

pub mod api;
pub mod config;
pub mod error;
pub mod poller;
pub mod state_machine;

pub use error::CarscanError;
pub use poller::{JobHandle, PollOutcome, TaskPollingClient};
