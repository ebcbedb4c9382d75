//! Line-delimited JSON channel between parent and child.
//!
//! Outbound messages are serialized compactly and written atomically —
//! serialize, then write+flush under the writer lock — so concurrent
//! contexts (handler logger, request initiators, runtime outcome) never
//! interleave bytes. Inbound lines are read by a dedicated OS thread
//! (portable non-blocking stdin does not exist) and handed into an
//! unbounded FIFO consumed by the cooperative runtime.

mod dispatcher;
mod pending;

pub use dispatcher::Dispatcher;
pub use pending::{PendingRequests, RequestKind};

use std::io::{BufRead, Write};
use std::thread;

use jobbox_shared::JobboxResult;
use jobbox_shared::protocol::{ChildMessage, ParentMessage};
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;

/// An item on the inbound queue. The reader produces `Message` and `Eof`;
/// the runtime enqueues `Shutdown` itself after the handler finishes.
#[derive(Debug)]
pub enum Inbound {
    Message(ParentMessage),
    Eof,
    Shutdown,
}

/// Serializing writer for the outbound stream.
pub struct IpcWriter {
    sink: Mutex<Box<dyn Write + Send>>,
}

impl IpcWriter {
    pub fn new(sink: impl Write + Send + 'static) -> Self {
        IpcWriter {
            sink: Mutex::new(Box::new(sink)),
        }
    }

    /// Write one message as a single complete JSON line.
    pub fn send(&self, message: &ChildMessage) -> JobboxResult<()> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        let mut sink = self.sink.lock();
        sink.write_all(&line)?;
        sink.flush()?;
        Ok(())
    }
}

/// Spawn the blocking reader thread.
///
/// Blank and malformed lines are dropped silently (debug-traced only).
/// End of stream enqueues [`Inbound::Eof`]. The thread ends when the
/// input closes or the queue's receiver is gone; it is never joined.
pub fn spawn_reader(
    input: impl BufRead + Send + 'static,
    queue: UnboundedSender<Inbound>,
) -> JobboxResult<thread::JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in input.lines() {
                let Ok(line) = line else { break };
                let payload = line.trim();
                if payload.is_empty() {
                    continue;
                }
                match serde_json::from_str::<ParentMessage>(payload) {
                    Ok(message) => {
                        if queue.send(Inbound::Message(message)).is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        tracing::debug!(error = %err, "Dropping malformed input line");
                    }
                }
            }
            let _ = queue.send(Inbound::Eof);
        })?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobbox_shared::protocol::{ErrorInfo, LogLevel};
    use serde_json::json;
    use std::io::Cursor;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    /// Shared in-memory sink for inspecting writer output.
    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn send_frames_one_json_object_per_line() {
        let sink = SharedSink::default();
        let writer = IpcWriter::new(sink.clone());

        writer
            .send(&ChildMessage::Log {
                level: LogLevel::Info,
                message: "hello".to_string(),
                meta: json!({"sandboxTaskId": "t"}),
            })
            .unwrap();
        writer
            .send(&ChildMessage::Error {
                error: ErrorInfo {
                    message: "boom".to_string(),
                    stack: None,
                },
            })
            .unwrap();

        let bytes = sink.0.lock().clone();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(text.ends_with('\n'), "every frame ends with a newline");
        for line in lines {
            serde_json::from_str::<serde_json::Value>(line)
                .expect("each line is a complete JSON object");
        }
    }

    #[tokio::test]
    async fn reader_parses_lines_and_drops_garbage() {
        let input = Cursor::new(
            b"\n{\"type\":\"cancel\",\"reason\":\"x\"}\nnot json\n{\"type\":\"unknown-kind\"}\n"
                .to_vec(),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        spawn_reader(input, tx).unwrap();

        let first = rx.recv().await.expect("one message expected");
        assert!(matches!(
            first,
            Inbound::Message(ParentMessage::Cancel { reason: Some(ref r) }) if r == "x"
        ));

        // Blank, malformed, and unknown-type lines are all dropped; next
        // item is the EOF sentinel.
        let second = rx.recv().await.expect("eof sentinel expected");
        assert!(matches!(second, Inbound::Eof));
    }
}
