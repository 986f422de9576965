//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services orchestrate between repositories, the runner and the trigger
//! engine.

pub mod execution;
pub mod pipeline;
pub mod trigger;
