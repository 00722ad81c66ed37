//! Log transaction lifecycle.
//!
//! A [`LogTransaction`] is `Open` from [`LogTransactionManager::open`] until its
//! first [`LogTransaction::close`], after which its record is frozen and has
//! been offered to the sink exactly once. Dropping an open transaction closes
//! it, so early returns and unwinding still produce a record.

use crate::{
    error::{Error, Result},
    fallback::FallbackLog,
    record::{RecordDraft, TransactionLogRecord},
    sink::SharedSink,
};
use std::{
    panic::{self, AssertUnwindSafe},
    sync::{mpsc, Arc, Mutex},
    thread,
    time::Duration,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_SINK_TIMEOUT: Duration = Duration::from_secs(5);

/// Records allowed to wait for the delivery worker before closes fail fast.
const DELIVERY_QUEUE_CAPACITY: usize = 64;

struct DeliveryJob {
    record: Arc<TransactionLogRecord>,
    reply: mpsc::Sender<Result<()>>,
}

/// Opens log transactions and delivers their records.
///
/// Clones share one delivery worker thread, started on the first close. A
/// sink that stops answering holds that worker only; records queued behind it
/// fail after `sink_timeout` and go to the fallback log.
#[derive(Debug, Clone)]
pub struct LogTransactionManager {
    sink: SharedSink,
    sink_timeout: Duration,
    fallback: FallbackLog,
    worker: Arc<Mutex<Option<mpsc::SyncSender<DeliveryJob>>>>,
}

impl LogTransactionManager {
    pub fn new(sink: SharedSink) -> Self {
        Self {
            sink,
            sink_timeout: DEFAULT_SINK_TIMEOUT,
            fallback: FallbackLog::default(),
            worker: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_sink_timeout(mut self, sink_timeout: Duration) -> Self {
        self.sink_timeout = sink_timeout;
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackLog) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn sink_timeout(&self) -> Duration {
        self.sink_timeout
    }

    pub fn open<S: Into<String>>(&self, test_step: S, test_case: Option<&str>) -> LogTransaction<'_> {
        let draft = RecordDraft::new(test_step, test_case.map(String::from));

        debug!(
            correlation_id = %draft.correlation_id(),
            test_step = draft.test_step(),
            "log transaction opened"
        );

        LogTransaction {
            manager: self,
            draft,
            outcome: None,
        }
    }

    /// Runs `f` against the draft of a fresh transaction and closes it
    /// afterwards. An `Err` from `f` is recorded as the record's error
    /// before closing.
    pub fn scoped<T, F>(&self, test_step: &str, test_case: Option<&str>, f: F) -> (Result<T>, CloseOutcome)
    where
        F: FnOnce(&mut RecordDraft) -> Result<T>,
    {
        let mut transaction = self.open(test_step, test_case);
        let result = f(&mut transaction.draft);
        if let Err(error) = &result {
            transaction.draft.set_error(error.to_string());
        }

        (result, transaction.finish())
    }

    // Queues the record for the delivery worker and waits at most
    // `sink_timeout` for the sink's answer.
    fn deliver(&self, record: &Arc<TransactionLogRecord>) -> std::result::Result<(), String> {
        let (reply, answer) = mpsc::channel();
        self.submit(DeliveryJob {
            record: record.clone(),
            reply,
        })?;

        match answer.recv_timeout(self.sink_timeout) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(Error::LogDelivery(reason))) => Err(reason),
            Ok(Err(e)) => Err(e.to_string()),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(format!(
                "sink did not acknowledge within {} ms",
                self.sink_timeout.as_millis()
            )),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(String::from("delivery worker stopped before answering"))
            }
        }
    }

    fn submit(&self, job: DeliveryJob) -> std::result::Result<(), String> {
        let mut worker = self
            .worker
            .lock()
            .map_err(|_| String::from("delivery worker lock poisoned"))?;

        let job = match worker.as_ref() {
            Some(queue) => match queue.try_send(job) {
                Ok(()) => return Ok(()),
                Err(mpsc::TrySendError::Full(_)) => {
                    return Err(format!(
                        "{} records already waiting for the sink",
                        DELIVERY_QUEUE_CAPACITY
                    ))
                }
                Err(mpsc::TrySendError::Disconnected(job)) => job,
            },
            None => job,
        };

        let queue = self.spawn_worker()?;
        let queued = queue.try_send(job);
        *worker = Some(queue);
        queued.map_err(|_| String::from("delivery worker unavailable"))
    }

    fn spawn_worker(&self) -> std::result::Result<mpsc::SyncSender<DeliveryJob>, String> {
        let (queue, jobs) = mpsc::sync_channel::<DeliveryJob>(DELIVERY_QUEUE_CAPACITY);
        let sink = self.sink.clone();

        thread::Builder::new()
            .name(String::from("wirelog-delivery"))
            .spawn(move || {
                for job in jobs {
                    let result = panic::catch_unwind(AssertUnwindSafe(|| sink.deliver(&job.record)))
                        .unwrap_or_else(|_| {
                            Err(Error::LogDelivery(String::from("sink panicked during delivery")))
                        });
                    let _ = job.reply.send(result);
                }
            })
            .map_err(|e| e.to_string())?;

        debug!("delivery worker started");
        Ok(queue)
    }
}

/// Result of closing a transaction.
#[derive(Debug, Clone)]
pub struct CloseOutcome {
    pub record: Arc<TransactionLogRecord>,
    delivery_failure: Option<String>,
}

impl CloseOutcome {
    pub fn is_delivered(&self) -> bool {
        self.delivery_failure.is_none()
    }

    pub fn delivery_error(&self) -> Option<Error> {
        self.delivery_failure
            .as_ref()
            .map(|reason| Error::LogDelivery(reason.clone()))
    }
}

#[derive(Debug)]
pub struct LogTransaction<'m> {
    manager: &'m LogTransactionManager,
    draft: RecordDraft,
    outcome: Option<CloseOutcome>,
}

impl<'m> LogTransaction<'m> {
    pub fn correlation_id(&self) -> Uuid {
        self.draft.correlation_id()
    }

    pub fn is_open(&self) -> bool {
        self.outcome.is_none()
    }

    pub fn record_mut(&mut self) -> Result<&mut RecordDraft> {
        match self.outcome {
            None => Ok(&mut self.draft),
            Some(_) => Err(Error::TransactionClosed(self.correlation_id())),
        }
    }

    /// Freezes the record and hands it to the sink. A second call is
    /// rejected with `DoubleClose` and delivers nothing.
    pub fn close(&mut self) -> Result<CloseOutcome> {
        if self.outcome.is_some() {
            warn!(
                correlation_id = %self.correlation_id(),
                "close called on an already closed log transaction"
            );
            return Err(Error::DoubleClose(self.correlation_id()));
        }

        Ok(self.finish())
    }

    pub fn outcome(&self) -> Option<&CloseOutcome> {
        self.outcome.as_ref()
    }

    fn finish(&mut self) -> CloseOutcome {
        let record = Arc::new(self.draft.freeze());

        let delivery_failure = match self.manager.deliver(&record) {
            Ok(()) => {
                info!(
                    correlation_id = %record.correlation_id(),
                    test_step = record.test_step(),
                    status = ?record.response_code(),
                    "log transaction closed"
                );
                None
            }
            Err(reason) => {
                warn!(
                    correlation_id = %record.correlation_id(),
                    test_step = record.test_step(),
                    %reason,
                    "log delivery failed, record written to fallback log"
                );
                self.manager.fallback.write(&record, &reason);
                Some(reason)
            }
        };

        let outcome = CloseOutcome {
            record,
            delivery_failure,
        };
        self.outcome = Some(outcome.clone());
        outcome
    }
}

impl Drop for LogTransaction<'_> {
    fn drop(&mut self) {
        if self.outcome.is_some() {
            return;
        }

        if thread::panicking() {
            self.draft
                .set_error("test step panicked before the log transaction was closed");
        }
        warn!(
            correlation_id = %self.correlation_id(),
            "log transaction dropped while open, closing it"
        );
        self.finish();
    }
}
