//! Background delivery of attempt records.
//!
//! The dispatcher only ever enqueues. A single drain task per queue hands
//! records to the sink in order, bounding each call with a timeout and
//! swallowing errors and panics.

use super::TelemetrySink;
use crate::dispatch::AttemptRecord;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

/// Records waiting for the sink. Past this, new records are dropped.
const QUEUE_CAPACITY: usize = 1024;

enum Message {
    Record(AttemptRecord),
    Flush(oneshot::Sender<()>),
}

pub(crate) struct RecordQueue {
    sink: Arc<dyn TelemetrySink>,
    timeout: Duration,
    tx: OnceLock<mpsc::Sender<Message>>,
}

impl RecordQueue {
    pub(crate) fn new(sink: Arc<dyn TelemetrySink>, timeout: Duration) -> Self {
        Self {
            sink,
            timeout,
            tx: OnceLock::new(),
        }
    }

    /// The drain task starts on first use, inside the caller's runtime.
    fn sender(&self) -> &mpsc::Sender<Message> {
        self.tx.get_or_init(|| {
            let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
            tokio::spawn(drain(self.sink.clone(), self.timeout, rx));
            tx
        })
    }

    /// Enqueue without waiting.
    pub(crate) fn push(&self, record: AttemptRecord) {
        match self.sender().try_send(Message::Record(record)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(capacity = QUEUE_CAPACITY, "telemetry queue full; dropping record")
            }
            Err(TrySendError::Closed(_)) => warn!("telemetry queue closed; dropping record"),
        }
    }

    /// Wait until every record enqueued so far has been handed to the sink,
    /// then flush the sink.
    pub(crate) async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.sender().send(Message::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn drain(sink: Arc<dyn TelemetrySink>, timeout: Duration, mut rx: mpsc::Receiver<Message>) {
    while let Some(msg) = rx.recv().await {
        match msg {
            Message::Record(record) => {
                let fut = AssertUnwindSafe(sink.record(record)).catch_unwind();
                match tokio::time::timeout(timeout, fut).await {
                    Ok(Ok(Ok(()))) => {}
                    Ok(Ok(Err(e))) => warn!(error = %e, "telemetry sink failed; ignoring"),
                    Ok(Err(_)) => warn!("telemetry sink panicked; ignoring"),
                    Err(_) => warn!(
                        timeout_ms = timeout.as_millis() as u64,
                        "telemetry sink timed out; ignoring"
                    ),
                }
            }
            Message::Flush(done) => {
                let fut = AssertUnwindSafe(sink.flush()).catch_unwind();
                if !matches!(tokio::time::timeout(timeout, fut).await, Ok(Ok(Ok(())))) {
                    warn!("telemetry sink flush failed; ignoring");
                }
                let _ = done.send(());
            }
        }
    }
}
