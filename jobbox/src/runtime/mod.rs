//! Handler lifecycle: handshake, guard installation, invocation, and
//! outcome reporting.
//!
//! One handler invocation per process. The flow is:
//!
//! 1. a reader thread bridges stdin into the inbound queue
//! 2. the first `start` message wins; everything before it is discarded
//! 3. the dispatcher takes over the queue for response correlation and
//!    cancellation
//! 4. the handler runs, raced against the cancellation token
//! 5. a single terminal message (`result` or `error`) is emitted, pending
//!    requests are drained, and the dispatcher is joined via the shutdown
//!    sentinel
//!
//! Fatal bootstrap failures (no start payload, bad bundle, no handler
//! symbol) surface as `Err` so the binary exits non-zero; handler
//! failures are reported in-band and exit zero.

pub mod context;
pub mod registry;
mod rusage;

use std::any::Any;
use std::io::{BufRead, Write};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use jobbox_shared::protocol::{ChildMessage, ErrorInfo, LogLevel, ParentMessage, StartPayload};
use jobbox_shared::{JobboxError, JobboxResult};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::guard::{Capabilities, PathResolver, SandboxFs, SandboxNet};
use crate::ipc::{self, Dispatcher, Inbound, IpcWriter, PendingRequests};
use crate::value::{JobValue, sanitize_result};
use context::{JobContext, send_log};

/// Host-root prefix consumed by the path resolver's remap rule.
pub const HOST_ROOT_PREFIX_ENV: &str = "JOBBOX_HOST_ROOT_PREFIX";

/// Variable the runtime writes with the serialized workflow event context
/// before invoking the handler.
pub const WORKFLOW_EVENT_CONTEXT_ENV: &str = "JOBBOX_WORKFLOW_EVENT_CONTEXT";

const CANCELLED_DEFAULT: &str = "Sandbox execution cancelled";
const HANDLER_THREW: &str = "Handler threw error";
const HANDLER_FAILED: &str = "Handler failed";

/// Runtime configuration supplied by the binary (or a test harness).
#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    /// Optional host-root remap prefix for the path resolver.
    pub host_root: Option<PathBuf>,
}

impl RuntimeOptions {
    /// Read the host root from [`HOST_ROOT_PREFIX_ENV`].
    pub fn from_env() -> Self {
        RuntimeOptions {
            host_root: std::env::var_os(HOST_ROOT_PREFIX_ENV).map(PathBuf::from),
        }
    }
}

/// Run the full child lifecycle over the given streams.
///
/// Returns `Err` only for fatal bootstrap failures; a handler failure or
/// cancellation is reported to the parent and returns `Ok`.
pub async fn run(
    input: impl BufRead + Send + 'static,
    output: impl Write + Send + 'static,
    options: RuntimeOptions,
) -> JobboxResult<()> {
    let (queue_tx, mut queue_rx) = mpsc::unbounded_channel();
    // The reader thread outlives this future and is never joined; it ends
    // when the input closes or the queue's receiver is dropped.
    let _reader = ipc::spawn_reader(input, queue_tx.clone())?;
    let writer = Arc::new(IpcWriter::new(output));

    let Some(payload) = wait_for_start(&mut queue_rx).await else {
        let err = JobboxError::Protocol("input closed before a start message".to_string());
        let _ = writer.send(&ChildMessage::Error {
            error: ErrorInfo {
                message: err.to_string(),
                stack: None,
            },
        });
        return Err(err);
    };

    let pending = Arc::new(PendingRequests::default());
    let cancel = CancellationToken::new();
    let cancel_reason = Arc::new(Mutex::new(None));
    let dispatcher = Dispatcher::new(
        queue_rx,
        Arc::clone(&pending),
        cancel.clone(),
        Arc::clone(&cancel_reason),
    );
    let dispatcher_task = tokio::spawn(dispatcher.run());

    let outcome = execute_start(
        payload,
        &options,
        Arc::clone(&writer),
        Arc::clone(&pending),
        cancel,
        cancel_reason,
    )
    .await;

    // Always signal shutdown and join the dispatcher before exiting, even
    // on the fatal path.
    let _ = queue_tx.send(Inbound::Shutdown);
    if let Err(err) = dispatcher_task.await {
        tracing::warn!(error = %err, "Dispatcher task failed to join");
    }

    if let Err(err) = &outcome {
        tracing::error!(error = %err, "Fatal sandbox bootstrap failure");
        let _ = writer.send(&ChildMessage::Error {
            error: ErrorInfo {
                message: err.to_string(),
                stack: None,
            },
        });
    }
    outcome
}

/// Await the first `start`, discarding other pre-start traffic. `None`
/// means the input closed first — no start can ever arrive, which the
/// caller treats as the missing-start bootstrap failure.
async fn wait_for_start(queue: &mut UnboundedReceiver<Inbound>) -> Option<StartPayload> {
    while let Some(inbound) = queue.recv().await {
        match inbound {
            Inbound::Message(ParentMessage::Start { payload }) => return Some(payload),
            Inbound::Eof => return None,
            other => {
                tracing::debug!(?other, "Discarding pre-start message");
            }
        }
    }
    None
}

async fn execute_start(
    payload: StartPayload,
    options: &RuntimeOptions,
    writer: Arc<IpcWriter>,
    pending: Arc<PendingRequests>,
    cancel: CancellationToken,
    cancel_reason: Arc<Mutex<Option<String>>>,
) -> JobboxResult<()> {
    let task_id = payload
        .task_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let bundle = payload.bundle;

    let resolver = PathResolver::new(&bundle.directory, options.host_root.clone())?;
    let entry = resolver.resolve(&bundle.entry_file)?;
    if !entry.try_exists()? {
        return Err(JobboxError::Bundle(format!(
            "Failed to load bundle entry: {} not found",
            entry.display()
        )));
    }

    if let Some(event_context) = &payload.workflow_event_context {
        match serde_json::to_string(event_context) {
            // SAFETY: the handler has not started; the only other running
            // thread is the stdin reader, which never touches the
            // environment.
            Ok(serialized) => unsafe { std::env::set_var(WORKFLOW_EVENT_CONTEXT_ENV, serialized) },
            // SAFETY: as above.
            Err(_) => unsafe { std::env::remove_var(WORKFLOW_EVENT_CONTEXT_ENV) },
        }
    }

    std::env::set_current_dir(resolver.bundle_root())?;

    let capabilities = Capabilities::from_declared(&bundle.manifest.capabilities);
    let fs = SandboxFs::new(resolver, capabilities);
    let net = SandboxNet::new(capabilities);

    let handler = registry::resolve(bundle.export_name.as_deref()).ok_or_else(|| {
        JobboxError::Bundle("Bundle entry did not export a callable handler".to_string())
    })?;

    let ctx = JobContext::new(
        task_id.clone(),
        payload.job,
        payload.workflow_event_context,
        fs,
        net,
        Arc::clone(&writer),
        Arc::clone(&pending),
    );

    tracing::info!(task_id = %task_id, "Invoking handler");
    let started = Instant::now();
    let handler_future = AssertUnwindSafe(handler.run(&ctx)).catch_unwind();

    tokio::select! {
        _ = cancel.cancelled() => {
            let message = cancel_reason
                .lock()
                .take()
                .unwrap_or_else(|| CANCELLED_DEFAULT.to_string());
            tracing::info!(task_id = %task_id, reason = %message, "Handler cancelled");
            pending.fail_all(&message);
            writer.send(&ChildMessage::Error {
                error: ErrorInfo {
                    message,
                    stack: None,
                },
            })?;
        }
        outcome = handler_future => match outcome {
            Ok(Ok(value)) => {
                let result = sanitize_result(&value);
                let duration_ms = started.elapsed().as_millis() as u64;
                tracing::info!(task_id = %task_id, duration_ms, "Handler completed");
                writer.send(&ChildMessage::Result {
                    result,
                    duration_ms,
                    resource_usage: rusage::collect(),
                })?;
            }
            Ok(Err(err)) => {
                report_handler_failure(&writer, &pending, &task_id, format!("{err:?}"))?;
            }
            Err(panic) => {
                report_handler_failure(&writer, &pending, &task_id, panic_text(panic))?;
            }
        }
    }

    Ok(())
}

/// Handler exception path: protocol log with the formatted error, drain
/// pending waiters, then the terminal error message with the stack.
fn report_handler_failure(
    writer: &IpcWriter,
    pending: &PendingRequests,
    task_id: &str,
    stack: String,
) -> JobboxResult<()> {
    tracing::warn!(task_id = %task_id, "Handler threw an error");
    send_log(
        writer,
        task_id,
        LogLevel::Error,
        HANDLER_THREW.to_string(),
        Some(JobValue::object([("error", JobValue::Str(stack.clone()))])),
    );
    pending.fail_all(HANDLER_FAILED);
    writer.send(&ChildMessage::Error {
        error: ErrorInfo {
            message: HANDLER_THREW.to_string(),
            stack: Some(stack),
        },
    })
}

fn panic_text(payload: Box<dyn Any + Send>) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "handler panicked".to_string()
    }
}
