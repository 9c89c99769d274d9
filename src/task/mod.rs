//! Remote build tasks
//!
//! A task is a numbered server-side build queue. Its subtasks are keyed by
//! ordinal, written in octal on the wire and in `task` commands.

pub mod client;
pub mod control;
pub mod info;
pub mod queue;

/// Parse an octal ordinal
pub fn parse_octal(text: &str) -> Option<u32> {
    u32::from_str_radix(text.trim(), 8).ok()
}

/// Octal form of an ordinal
pub fn format_octal(no: u32) -> String {
    format!("{no:o}")
}
