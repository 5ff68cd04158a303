pub mod job;
pub mod label;
pub mod status;
