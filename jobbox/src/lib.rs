//! Per-job sandbox child runtime.
//!
//! A `jobbox-child` process executes exactly one user-supplied handler
//! inside a declared bundle directory, mediates its filesystem and
//! network access according to the bundle's capability list, and speaks a
//! newline-delimited JSON protocol with its parent supervisor over
//! stdin/stdout.
//!
//! This is an in-process, advisory sandbox: handlers are linked against
//! the [`guard`] facades and everything they reach through the
//! [`JobContext`] is mediated, but kernel-enforced isolation is the
//! parent's responsibility.
//!
//! Handlers implement [`Handler`] and register themselves:
//!
//! ```ignore
//! struct Greet;
//!
//! #[async_trait::async_trait]
//! impl jobbox::Handler for Greet {
//!     async fn run(&self, ctx: &jobbox::JobContext) -> anyhow::Result<jobbox::JobValue> {
//!         ctx.logger("starting", None);
//!         Ok(jobbox::JobValue::object([("ok", jobbox::JobValue::Bool(true))]))
//!     }
//! }
//!
//! inventory::submit! { jobbox::HandlerEntry::new("handler", &Greet) }
//! ```

pub mod guard;
pub mod ipc;
pub mod runtime;
pub mod value;

pub use guard::{Capabilities, PathResolver, SandboxFs, SandboxNet};
pub use jobbox_shared::{JobboxError, JobboxResult, errors, protocol};
pub use runtime::context::JobContext;
pub use runtime::registry::{Handler, HandlerEntry};
pub use runtime::{
    HOST_ROOT_PREFIX_ENV, RuntimeOptions, WORKFLOW_EVENT_CONTEXT_ENV, run,
};
pub use value::{JobValue, sanitize, sanitize_result};
