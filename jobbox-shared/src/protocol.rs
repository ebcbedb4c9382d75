//! Wire protocol between the parent supervisor and the sandbox child.
//!
//! One JSON object per line in both directions, UTF-8, compact separators,
//! trailing `\n`. Message types are the `type` tag; field names are
//! camelCase. Blank and malformed inbound lines are dropped by the child.

use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Messages the parent sends to the child.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ParentMessage {
    /// Carries the bundle, job payload, and capability declarations.
    /// Exactly one is consumed per process; later ones are ignored.
    Start { payload: StartPayload },

    /// Response to an `update-request`, correlated by `requestId`.
    #[serde(rename_all = "camelCase")]
    UpdateResponse {
        request_id: String,
        #[serde(default)]
        ok: bool,
        #[serde(default)]
        run: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },

    /// Response to a `resolve-secret-request`, correlated by `requestId`.
    #[serde(rename_all = "camelCase")]
    ResolveSecretResponse {
        request_id: String,
        #[serde(default)]
        ok: bool,
        #[serde(default)]
        value: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },

    /// Cooperative cancellation of the running handler.
    Cancel {
        #[serde(default)]
        reason: Option<String>,
    },
}

/// Messages the child sends to the parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ChildMessage {
    /// Forwarded handler/runtime log line. `meta` always carries the
    /// authoritative `sandboxTaskId` key.
    Log {
        level: LogLevel,
        message: String,
        meta: Value,
    },

    /// Asynchronous run-update request initiated by the handler.
    #[serde(rename_all = "camelCase")]
    UpdateRequest { request_id: String, updates: Value },

    /// Secret resolution request initiated by the handler.
    #[serde(rename_all = "camelCase")]
    ResolveSecretRequest { request_id: String, reference: Value },

    /// Terminal success message. Emitted at most once per process.
    #[serde(rename_all = "camelCase")]
    Result {
        result: Value,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resource_usage: Option<ResourceUsage>,
    },

    /// Terminal failure message (handler error, cancellation, or fatal
    /// bootstrap failure). Emitted at most once per process.
    Error { error: ErrorInfo },
}

/// Severity of a forwarded log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Structured error payload of a terminal `error` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// Payload of the `start` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPayload {
    /// Stable task identifier; the child derives one when absent.
    #[serde(default)]
    pub task_id: Option<String>,
    pub bundle: BundleDescriptor,
    pub job: JobPayload,
    #[serde(default)]
    pub workflow_event_context: Option<Value>,
}

/// Where the handler lives and what it is allowed to do.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleDescriptor {
    /// Absolute path of the bundle root.
    pub directory: PathBuf,
    /// Entry artifact; must realpath-resolve under `directory`.
    pub entry_file: PathBuf,
    /// Preferred handler symbol name.
    #[serde(default)]
    pub export_name: Option<String>,
    #[serde(default)]
    pub manifest: BundleManifest,
}

/// Bundle manifest carried inline in the start payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BundleManifest {
    /// Declared capability names. A non-array value or non-string entries
    /// degrade to the empty set rather than failing the start parse.
    #[serde(default, deserialize_with = "lenient_capabilities")]
    pub capabilities: Vec<String>,
}

/// Job payload, opaque to the runtime and handed to handlers verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    #[serde(default)]
    pub definition: Value,
    #[serde(default)]
    pub run: Value,
    #[serde(default)]
    pub parameters: Value,
}

/// Per-process counters reported alongside a `result`, mirroring
/// `getrusage(2)` field names. Times are in seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub ru_utime: f64,
    pub ru_stime: f64,
    pub ru_maxrss: i64,
    pub ru_ixrss: i64,
    pub ru_idrss: i64,
    pub ru_isrss: i64,
    pub ru_minflt: i64,
    pub ru_majflt: i64,
    pub ru_nswap: i64,
    pub ru_inblock: i64,
    pub ru_oublock: i64,
    pub ru_msgsnd: i64,
    pub ru_msgrcv: i64,
    pub ru_nsignals: i64,
    pub ru_nvcsw: i64,
    pub ru_nivcsw: i64,
}

fn lenient_capabilities<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(entries) => entries
            .into_iter()
            .filter_map(|entry| match entry {
                Value::String(name) => Some(name),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    })
}
