pub mod classifier;
pub mod poller;
pub mod queue;
pub mod submitter;
pub mod worker;
