//! The façade handed to handler code.
//!
//! Exposes the job payload, a protocol logger, the update/resolve-secret
//! round-trips, and the guarded filesystem/network facades. The
//! round-trip methods register a waiter in the pending table, emit the
//! request, and suspend until the dispatcher correlates the response.
//!
//! Handler authors coming from either naming convention are served: the
//! round-trip accessors exist in both underscore and camelCase spellings,
//! and both are the same operation.

use std::sync::Arc;

use jobbox_shared::protocol::{ChildMessage, JobPayload, LogLevel};
use jobbox_shared::{JobboxError, JobboxResult};
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::guard::{SandboxFs, SandboxNet};
use crate::ipc::{IpcWriter, PendingRequests, RequestKind};
use crate::value::{JobValue, sanitize};

/// Keys that survive `update` normalization.
const UPDATE_KEYS: [&str; 5] = ["parameters", "logsUrl", "metrics", "context", "timeoutMs"];

/// Job context passed to every handler invocation.
pub struct JobContext {
    task_id: String,
    definition: Value,
    run: Mutex<Value>,
    parameters: Mutex<Value>,
    workflow_event_context: Option<Value>,
    fs: SandboxFs,
    net: SandboxNet,
    writer: Arc<IpcWriter>,
    pending: Arc<PendingRequests>,
}

impl JobContext {
    pub(crate) fn new(
        task_id: String,
        job: JobPayload,
        workflow_event_context: Option<Value>,
        fs: SandboxFs,
        net: SandboxNet,
        writer: Arc<IpcWriter>,
        pending: Arc<PendingRequests>,
    ) -> Self {
        JobContext {
            task_id,
            definition: job.definition,
            run: Mutex::new(job.run),
            parameters: Mutex::new(job.parameters),
            workflow_event_context,
            fs,
            net,
            writer,
            pending,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn definition(&self) -> &Value {
        &self.definition
    }

    /// Current run record; replaced by successful `update` results.
    pub fn run(&self) -> Value {
        self.run.lock().clone()
    }

    /// Current parameters; replaced when an `update` result carries a
    /// `parameters` key.
    pub fn parameters(&self) -> Value {
        self.parameters.lock().clone()
    }

    pub fn workflow_event_context(&self) -> Option<&Value> {
        self.workflow_event_context.as_ref()
    }

    /// camelCase spelling of [`JobContext::workflow_event_context`].
    #[allow(non_snake_case)]
    pub fn workflowEventContext(&self) -> Option<&Value> {
        self.workflow_event_context()
    }

    /// Guarded filesystem facade.
    pub fn fs(&self) -> &SandboxFs {
        &self.fs
    }

    /// Guarded network facade.
    pub fn net(&self) -> &SandboxNet {
        &self.net
    }

    /// Forward an info-level log line to the parent. Meta is sanitized
    /// and always carries the authoritative `sandboxTaskId` key.
    pub fn logger(&self, message: impl Into<String>, meta: Option<JobValue>) {
        send_log(&self.writer, &self.task_id, LogLevel::Info, message.into(), meta);
    }

    /// Push run updates to the parent and await the refreshed run record.
    ///
    /// Only the whitelisted keys survive. When the parent returns an
    /// object it replaces the local run, and its `parameters` key (if
    /// present) replaces the local parameters.
    pub async fn update(&self, updates: JobValue) -> JobboxResult<Value> {
        let normalized = normalize_updates(&updates);
        let (request_id, receiver) = self.pending.register(RequestKind::Update);
        if let Err(err) = self.writer.send(&ChildMessage::UpdateRequest {
            request_id: request_id.clone(),
            updates: normalized,
        }) {
            self.pending.complete(&request_id, Err(JobboxError::Internal(
                "update request was never sent".to_string(),
            )));
            return Err(err);
        }

        let value = receiver
            .await
            .map_err(|_| JobboxError::Request("Request failed".to_string()))??;
        if value.is_object() {
            *self.run.lock() = value.clone();
            if let Some(parameters) = value.get("parameters") {
                *self.parameters.lock() = parameters.clone();
            }
        }
        Ok(value)
    }

    /// Ask the parent to resolve a secret reference.
    pub async fn resolve_secret(&self, reference: JobValue) -> JobboxResult<Option<String>> {
        let sanitized = sanitize(&reference).unwrap_or(Value::Null);
        let (request_id, receiver) = self.pending.register(RequestKind::ResolveSecret);
        if let Err(err) = self.writer.send(&ChildMessage::ResolveSecretRequest {
            request_id: request_id.clone(),
            reference: sanitized,
        }) {
            self.pending.complete(&request_id, Err(JobboxError::Internal(
                "resolve-secret request was never sent".to_string(),
            )));
            return Err(err);
        }

        let value = receiver
            .await
            .map_err(|_| JobboxError::Request("Secret resolution failed".to_string()))??;
        Ok(match value {
            Value::String(secret) => Some(secret),
            _ => None,
        })
    }

    /// camelCase spelling of [`JobContext::resolve_secret`].
    #[allow(non_snake_case)]
    pub async fn resolveSecret(&self, reference: JobValue) -> JobboxResult<Option<String>> {
        self.resolve_secret(reference).await
    }
}

/// Emit a protocol log line with normalized meta.
pub(crate) fn send_log(
    writer: &IpcWriter,
    task_id: &str,
    level: LogLevel,
    message: String,
    meta: Option<JobValue>,
) {
    let meta = normalize_meta(task_id, meta);
    if let Err(err) = writer.send(&ChildMessage::Log { level, message, meta }) {
        tracing::warn!(error = %err, "Failed to forward log line to parent");
    }
}

/// Sanitize log meta. A meta that does not sanitize to an object is
/// replaced by a bare `{sandboxTaskId}`; the task id always wins over a
/// handler-supplied value for that key.
fn normalize_meta(task_id: &str, meta: Option<JobValue>) -> Value {
    let fallback = || {
        let mut map = Map::new();
        map.insert("sandboxTaskId".to_string(), Value::String(task_id.to_string()));
        Value::Object(map)
    };
    match meta.as_ref().map(sanitize) {
        Some(Some(Value::Object(mut map))) => {
            map.insert("sandboxTaskId".to_string(), Value::String(task_id.to_string()));
            Value::Object(map)
        }
        _ => fallback(),
    }
}

/// Apply the update whitelist, sanitizing each surviving value.
fn normalize_updates(updates: &JobValue) -> Value {
    let mut normalized = Map::new();
    if let JobValue::Map(entries) = updates {
        for key in UPDATE_KEYS {
            let found = entries
                .iter()
                .find(|(entry_key, _)| matches!(entry_key, JobValue::Str(s) if s == key));
            if let Some((_, value)) = found {
                if let Some(converted) = sanitize(value) {
                    normalized.insert(key.to_string(), converted);
                }
            }
        }
    }
    Value::Object(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_updates_applies_whitelist() {
        let updates = JobValue::object([
            ("parameters", JobValue::object([("x", JobValue::Int(1))])),
            ("logsUrl", JobValue::Str("http://x".into())),
            ("other", JobValue::Str("dropped".into())),
        ]);
        assert_eq!(
            normalize_updates(&updates),
            json!({"parameters": {"x": 1}, "logsUrl": "http://x"})
        );
    }

    #[test]
    fn normalize_updates_sanitizes_values() {
        let updates = JobValue::object([
            (
                "metrics",
                JobValue::object([("rate", JobValue::Float(f64::NAN)), ("count", JobValue::Int(2))]),
            ),
            ("timeoutMs", JobValue::Int(5000)),
        ]);
        assert_eq!(
            normalize_updates(&updates),
            json!({"metrics": {"count": 2}, "timeoutMs": 5000})
        );
    }

    #[test]
    fn normalize_updates_of_non_map_is_empty() {
        assert_eq!(normalize_updates(&JobValue::Int(3)), json!({}));
        assert_eq!(normalize_updates(&JobValue::Null), json!({}));
    }

    #[test]
    fn normalize_meta_forces_task_id() {
        let meta = JobValue::object([
            ("step", JobValue::Str("fetch".into())),
            ("sandboxTaskId", JobValue::Str("spoofed".into())),
        ]);
        assert_eq!(
            normalize_meta("task-1", Some(meta)),
            json!({"step": "fetch", "sandboxTaskId": "task-1"})
        );
    }

    #[test]
    fn normalize_meta_falls_back_for_non_objects() {
        assert_eq!(
            normalize_meta("task-1", Some(JobValue::Int(3))),
            json!({"sandboxTaskId": "task-1"})
        );
        assert_eq!(normalize_meta("task-1", None), json!({"sandboxTaskId": "task-1"}));
    }
}
