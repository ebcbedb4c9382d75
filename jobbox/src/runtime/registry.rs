//! Handler registration and resolution.
//!
//! Handler implementations auto-register themselves via the inventory
//! pattern, so the runtime doesn't need to know about specific handlers.
//! A bundle names its entry symbol in the manifest (`exportName`); the
//! runtime resolves it with a fixed precedence so bundles without an
//! explicit name still work:
//!
//! 1. the bundle's `exportName`, when registered
//! 2. `"handler"`
//! 3. `"default"`

use async_trait::async_trait;

use crate::runtime::context::JobContext;
use crate::value::JobValue;

/// A user-supplied job handler.
///
/// Invoked with the job context; the returned tree is sanitized before it
/// goes on the wire. Errors (and panics) are reported to the parent as a
/// structured handler failure, not a process failure.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn run(&self, ctx: &JobContext) -> anyhow::Result<JobValue>;
}

/// Registry entry submitted with `inventory::submit!`.
pub struct HandlerEntry {
    pub name: &'static str,
    pub handler: &'static (dyn Handler + 'static),
}

impl HandlerEntry {
    pub const fn new(name: &'static str, handler: &'static dyn Handler) -> Self {
        HandlerEntry { name, handler }
    }
}

inventory::collect!(HandlerEntry);

/// Resolve the handler for a bundle from the process-wide registry.
pub fn resolve(export_name: Option<&str>) -> Option<&'static dyn Handler> {
    let entries: Vec<&'static HandlerEntry> = inventory::iter::<HandlerEntry>.into_iter().collect();
    resolve_in(&entries, export_name)
}

fn resolve_in<'a>(
    entries: &[&'a HandlerEntry],
    export_name: Option<&str>,
) -> Option<&'a dyn Handler> {
    let lookup = |name: &str| {
        entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.handler)
    };
    // An exportName that is not registered falls through to the
    // conventional names rather than failing outright.
    if let Some(found) = export_name.and_then(lookup) {
        return Some(found);
    }
    lookup("handler").or_else(|| lookup("default"))
}
