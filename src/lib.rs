//! gear-rebuild - rebuild gear source packages against a target branch
//!
//! This library drives a resumable rebuild of a set of gear repositories:
//! every package is cloned, checked out and built with hasher, the build log
//! is classified, and packages whose build failed on a missing gem are
//! retried after the gem has been requeued into the remote build task.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`cli`] - Command-line interface parsing and output formatting
//! - [`core`] - Package state machine, classification and orchestration
//! - [`task`] - Remote build task (queue) model, fetch and mutation
//! - [`infra`] - Infrastructure layer (processes, git, workspace filesystem)
//! - [`config`] - Configuration constants
//! - [`error`] - Error types and handling

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod infra;
pub mod task;

#[cfg(test)]
pub mod test_utils;
