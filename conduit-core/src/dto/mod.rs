//! Data Transfer Objects
//!
//! Request and response shapes used by the orchestrator API. DTOs are
//! lightweight representations of domain entities optimized for transfer.

pub mod execution;
pub mod pipeline;
pub mod trigger;
