//! Shared domain types for sagaflow.
//!
//! This crate contains the serialisable vocabulary shared by the engine, its
//! observers and any persistence layer: run and node status, error kinds,
//! step options, engine events and engine configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod workflow;
