//! Core domain model for the scanforge orchestration backend.
//!
//! This crate holds the entity types shared by every other crate (projects,
//! assets, jobs, vulnerabilities, credentials, results, workflows), the
//! tool registry, deterministic fingerprinting, and the in-process event
//! bus used for real-time fanout to session layers.

pub mod error;
pub mod events;
pub mod fingerprint;
pub mod model;
pub mod tools;

pub use error::{CoreError, Result};
pub use events::{Event, EventBus, Topic};
pub use fingerprint::fingerprint;
pub use model::*;
pub use tools::{ToolDefinition, ToolOutput, ToolParameter, ToolRegistry};
