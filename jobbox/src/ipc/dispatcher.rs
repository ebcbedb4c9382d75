//! Inbound message dispatch after the start handshake.
//!
//! Consumes the inbound queue in FIFO order: correlates responses to
//! pending requests by request id, delivers cancellation to the handler
//! task, and terminates on the shutdown sentinel. Everything else —
//! duplicate `start` messages, EOF sentinels, responses for unknown ids —
//! is ignored.

use std::sync::Arc;

use jobbox_shared::JobboxError;
use jobbox_shared::protocol::ParentMessage;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use super::pending::PendingRequests;
use super::Inbound;

const UPDATE_FAILED: &str = "Request failed";
const SECRET_FAILED: &str = "Secret resolution failed";

/// The post-handshake consume loop.
pub struct Dispatcher {
    queue: UnboundedReceiver<Inbound>,
    pending: Arc<PendingRequests>,
    cancel: CancellationToken,
    cancel_reason: Arc<Mutex<Option<String>>>,
}

impl Dispatcher {
    pub fn new(
        queue: UnboundedReceiver<Inbound>,
        pending: Arc<PendingRequests>,
        cancel: CancellationToken,
        cancel_reason: Arc<Mutex<Option<String>>>,
    ) -> Self {
        Dispatcher {
            queue,
            pending,
            cancel,
            cancel_reason,
        }
    }

    /// Run until the shutdown sentinel (or the queue closing).
    pub async fn run(mut self) {
        while let Some(inbound) = self.queue.recv().await {
            match inbound {
                Inbound::Shutdown => return,
                Inbound::Eof => {}
                Inbound::Message(message) => self.handle(message),
            }
        }
    }

    fn handle(&self, message: ParentMessage) {
        match message {
            ParentMessage::UpdateResponse {
                request_id,
                ok,
                run,
                error,
            } => {
                let outcome = if ok {
                    Ok(run.unwrap_or(Value::Null))
                } else {
                    Err(JobboxError::Request(
                        error.unwrap_or_else(|| UPDATE_FAILED.to_string()),
                    ))
                };
                self.pending.complete(&request_id, outcome);
            }
            ParentMessage::ResolveSecretResponse {
                request_id,
                ok,
                value,
                error,
            } => {
                let outcome = if ok {
                    Ok(value.unwrap_or(Value::Null))
                } else {
                    Err(JobboxError::Request(
                        error.unwrap_or_else(|| SECRET_FAILED.to_string()),
                    ))
                };
                self.pending.complete(&request_id, outcome);
            }
            ParentMessage::Cancel { reason } => {
                // Capture the reason before cancellation is initiated so
                // the runtime's cancelled branch can read it.
                *self.cancel_reason.lock() = reason;
                self.cancel.cancel();
            }
            ParentMessage::Start { .. } => {
                tracing::debug!("Ignoring duplicate start message");
            }
        }
    }
}
