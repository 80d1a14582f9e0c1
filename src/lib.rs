//! Incident Pipeline Core
//!
//! Process wiring for the incident pipeline: loads configuration, constructs
//! every component crate behind its trait, and exposes a single
//! [`PipelineRuntime`] the binary in `src/main.rs` drives.

pub mod loaders;
pub mod wiring;

pub use wiring::PipelineRuntime;
