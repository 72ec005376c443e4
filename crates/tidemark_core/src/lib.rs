#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Configuration options
pub mod config;

/// Error (common error types)
pub mod error;

/// Document persistence, milestones, and snapshot revert
pub mod persist;
