//! Infrastructure layer
//!
//! Handles all I/O operations: filesystem, external processes and the plant
//! workspace. This module is the only place where side effects occur.

pub mod dirs;
pub mod filesystem;
pub mod git;
pub mod process;
pub mod workspace;
