//! Core domain types
//!
//! These types represent the fundamental business entities and are shared
//! between the orchestrator (scheduling, persistence) and the runner
//! (task execution).

pub mod catalog;
pub mod execution;
pub mod log;
pub mod pipeline;
pub mod task;
pub mod trigger;
