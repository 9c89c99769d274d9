//! Core rebuild logic
//!
//! # Submodules
//!
//! - [`config`] - Run configuration and branch resolution
//! - [`classify`] - Build log classification
//! - [`artifacts`] - Build artifact relocation
//! - [`queue`] - Work queue and list file parsing
//! - [`package`] - Package state machine
//! - [`status`] - Persisted per-package status
//! - [`orchestrator`] - Queue processing, assignment and install

pub mod artifacts;
pub mod classify;
pub mod config;
pub mod orchestrator;
pub mod package;
pub mod queue;
pub mod status;
