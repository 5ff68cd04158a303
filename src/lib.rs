//! Offload job queue
//!
//! Hands dialogue-classification jobs from a local pipeline to a remote
//! worker through a folder kept in sync by a third-party file-sync client.
//! The two sides share no network connection; every state change is an
//! atomic rename inside the shared folder.
//!
//! The public contract is [`Submitter::submit`] on the producing side and
//! [`PollingClient::await_result`] on the consuming side. [`WorkerLoop`] runs
//! on the remote machine.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
pub mod shutdown;

pub use config::QueueConfig;
pub use services::classifier::{ClassifierBackend, Classify};
pub use services::poller::{PollError, PollingClient};
pub use services::queue::{QueueDirectory, QueueError};
pub use services::submitter::{SubmissionError, Submitter};
pub use services::worker::WorkerLoop;
