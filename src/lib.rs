//! Core library for a per-developer task-and-entity tracker, exposed to
//! AI-assistant clients over MCP (the transport itself lives in
//! `src/bin/task-tracker-mcpd.rs`; this crate is transport-agnostic).
//!
//! A workspace (an absolute filesystem path) gets its own SQLite database,
//! keyed by a short hash of the path. A master registry tracks every
//! workspace seen and aggregates tool-usage telemetry. The domain layer
//! enforces task/entity invariants (hierarchy, dependency gating, soft
//! delete, blocked-state rules); the query layer applies mode projection,
//! pagination, and a response-size budget on top.

pub mod audit;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod models;
pub mod query;
pub mod resolver;
pub mod store;
pub mod telemetry;
pub mod util;

pub use engine::Core;
pub use error::{CoreError, CoreResult};
pub use resolver::DataRoot;
