//! Conduit Orchestrator
//!
//! Architecture:
//! - Repository: trigger, pipeline and execution stores (memory or postgres)
//! - Engine: schedule loops and per-account event checking
//! - Service: trigger registry, pipelines and execution aggregation
//! - API: thin HTTP controllers over the services

pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod repository;
pub mod service;
