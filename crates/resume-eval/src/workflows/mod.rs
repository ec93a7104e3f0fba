pub mod batch;
pub mod candidates;
pub mod notify;
