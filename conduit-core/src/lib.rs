//! Conduit Core
//!
//! Core types and abstractions for the Conduit automation system.
//!
//! This crate contains:
//! - Domain types: triggers, the trigger definition catalog, pipelines,
//!   tasks, task results and executions
//! - DTOs: request/response shapes shared by the orchestrator API
//! - Errors shared across crates (task validation)
//!
//! Persistence lives in the orchestrator, task execution in the runner.

pub mod domain;
pub mod dto;
pub mod error;
