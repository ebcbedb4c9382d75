//! Shared types for jobbox parent-child communication.
//!
//! The parent supervisor and the `jobbox-child` runtime exchange
//! newline-delimited JSON over the child's stdin/stdout. This crate holds
//! the message types for both directions plus the error type used across
//! the runtime, so an embedder can speak the protocol without depending on
//! the runtime itself.

pub mod errors;
pub mod protocol;

pub use errors::{JobboxError, JobboxResult};
