//! Error types for gear-rebuild
//!
//! Domain-specific error types using thiserror.

use std::path::PathBuf;
use thiserror::Error;

use crate::infra::git::GitError;
use crate::infra::process::ProcessError;

/// Filesystem errors
#[derive(Error, Debug)]
pub enum FilesystemError {
    /// Failed to create directory
    #[error("Failed to create directory '{path}': {error}")]
    CreateDir { path: PathBuf, error: String },

    /// Failed to remove directory
    #[error("Failed to remove directory '{path}': {error}")]
    RemoveDir { path: PathBuf, error: String },

    /// Failed to remove file
    #[error("Failed to remove file '{path}': {error}")]
    RemoveFile { path: PathBuf, error: String },

    /// Failed to write file
    #[error("Failed to write file '{path}': {error}")]
    WriteFile { path: PathBuf, error: String },

    /// Failed to read file
    #[error("Failed to read file '{path}': {error}")]
    ReadFile { path: PathBuf, error: String },

    /// Failed to move a file into a store
    #[error("Failed to move '{from}' to '{to}': {error}")]
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        error: String,
    },

    /// Failed to create a symlink
    #[error("Failed to link '{link}' -> '{target}': {error}")]
    Symlink {
        link: PathBuf,
        target: PathBuf,
        error: String,
    },
}

/// Workspace errors
#[derive(Error, Debug)]
pub enum WorkspaceError {
    /// Branch source listing cannot be read
    #[error("Cannot list source packages of branch '{branch}' at '{path}': {error}")]
    BranchListing {
        branch: String,
        path: PathBuf,
        error: String,
    },

    /// Filesystem failure
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),
}

/// Remote task (build queue) errors
#[derive(Error, Debug)]
pub enum TaskError {
    /// No free ordinal before the requested one
    #[error("No free space before '{package}' with no {ordinal}")]
    NoSpaceAvailable { package: String, ordinal: u32 },

    /// Descriptor fetch failed
    #[error("Failed to fetch task descriptor '{url}': {error}")]
    Fetch { url: String, error: String },

    /// Queue mutation command failed
    #[error("Task command '{command}' failed: {error}")]
    Control { command: String, error: String },

    /// Queue mutation produced output we cannot interpret
    #[error("Unexpected task command output: {output}")]
    UnexpectedOutput { output: String },
}

/// Persisted status errors
#[derive(Error, Debug)]
pub enum StatusError {
    /// Record cannot be serialized
    #[error("Failed to serialize status of '{name}': {error}")]
    Serialize { name: String, error: String },

    /// Filesystem failure
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file '{path}': {error}")]
    ReadError { path: String, error: String },

    /// Failed to parse config file
    #[error("Failed to parse config file '{path}': {error}")]
    ParseError { path: String, error: String },

    /// Invalid value
    #[error("Invalid value for '{name}': {message}")]
    InvalidValue { name: String, message: String },
}

/// Top-level gear-rebuild error type
#[derive(Error, Debug)]
pub enum RebuildError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Workspace error
    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    /// Filesystem error
    #[error("Filesystem error: {0}")]
    Filesystem(#[from] FilesystemError),

    /// External process error
    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    /// Git error
    #[error("Git error: {0}")]
    Git(#[from] GitError),

    /// Remote task error
    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    /// Status store error
    #[error("Status error: {0}")]
    Status(#[from] StatusError),
}
