//! Configuration constants and URL builders

pub mod defaults;
pub mod urls;
