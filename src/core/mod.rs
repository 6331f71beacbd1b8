//! Core domain types: jobs, their states and recurring job templates.

pub mod details;
pub mod job;
pub mod recurring;
pub mod schedule;
pub mod state;
pub mod types;
