//! Job intake loop.
//!
//! Leases messages from the queue and runs them through the [`Pipeline`] one
//! at a time. A message is deleted only after its results are persisted;
//! every failure leaves it on the queue, where its lease expires and the
//! queue redelivers it.
//!
//! Shutdown is cooperative: the [`CancellationToken`] is checked between
//! jobs, and the shutdown channel wakes an idle long-poll. A job already
//! running gets the configured grace period before its task is aborted.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use nrf_protocol::defaults::CORRELATION_ID_ATTRIBUTE;
use nrf_protocol::{ImpactAssessmentJob, IntakeConfig};

use crate::error::{ErrorKind, JobError, QueueError};
use crate::pipeline::Pipeline;
use crate::queue::{JobQueue, LeasedMessage};

/// Pause before polling again after the queue itself failed.
const RECEIVE_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Token for cooperative cancellation of the intake loop.
///
/// Clone is cheap and shares state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Lifecycle of one leased message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Leased,
    Validating,
    Running,
    /// Results persisted and the message deleted.
    Committed,
    /// No acknowledgement was issued; the lease will expire.
    Abandoned,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Idle => "idle",
            JobState::Leased => "leased",
            JobState::Validating => "validating",
            JobState::Running => "running",
            JobState::Committed => "committed",
            JobState::Abandoned => "abandoned",
        }
    }
}

/// Correlation context for one message, carried explicitly through
/// processing.
#[derive(Debug)]
pub struct JobContext {
    pub message_id: String,
    /// The `correlation_id` message attribute, or the message id.
    pub correlation_id: String,
    pub job_id: Option<String>,
    pub span: tracing::Span,
    state: JobState,
}

impl JobContext {
    pub fn new(message: &LeasedMessage) -> Self {
        let correlation_id = message
            .attributes
            .get(CORRELATION_ID_ATTRIBUTE)
            .filter(|id| !id.is_empty())
            .cloned()
            .unwrap_or_else(|| message.message_id.clone());
        let span = nrf_logging::job_span(&message.message_id, &correlation_id);
        Self {
            message_id: message.message_id.clone(),
            correlation_id,
            job_id: None,
            span,
            state: JobState::Idle,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn transition(&mut self, next: JobState) {
        debug!(from = self.state.as_str(), to = next.as_str(), "job state");
        self.state = next;
    }

    fn record_job_id(&mut self, job_id: &str) {
        self.span.record("job_id", job_id);
        self.job_id = Some(job_id.to_string());
    }
}

pub struct IntakeLoop {
    queue: Arc<dyn JobQueue>,
    pipeline: Arc<Pipeline>,
    config: IntakeConfig,
    heartbeat: Option<PathBuf>,
    cancel: CancellationToken,
}

impl IntakeLoop {
    pub fn new(queue: Arc<dyn JobQueue>, pipeline: Arc<Pipeline>, config: IntakeConfig) -> Self {
        Self {
            queue,
            pipeline,
            config,
            heartbeat: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Write the poll time to `path` after every successful receive.
    pub fn with_heartbeat(mut self, path: Option<PathBuf>) -> Self {
        self.heartbeat = path;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn spawn(self) -> IntakeHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let cancel = self.cancel.clone();
        let graceful = self.config.graceful_shutdown();
        let join_handle = tokio::spawn(self.run(shutdown_rx));
        IntakeHandle {
            shutdown_tx,
            cancel,
            graceful,
            join_handle,
        }
    }

    pub async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(
            wait_seconds = self.config.wait_time_seconds,
            visibility_seconds = self.config.visibility_timeout_seconds,
            max_messages = self.config.max_messages,
            "intake loop started"
        );

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            // Only the wait for messages is interruptible; a leased batch
            // runs to completion or until the handle aborts the task.
            let received = tokio::select! {
                biased;

                _ = shutdown_rx.recv() => break,
                received = self.receive() => received,
            };

            match received {
                Ok(messages) => {
                    self.handle_batch(messages).await;
                }
                Err(e) => {
                    error!(kind = %ErrorKind::Infrastructure, error = %e, "queue receive failed");
                    tokio::select! {
                        biased;

                        _ = shutdown_rx.recv() => break,
                        _ = tokio::time::sleep(RECEIVE_RETRY_DELAY) => {}
                    }
                }
            }
        }

        info!("intake loop stopped");
    }

    /// One receive followed by processing of everything it leased.
    pub async fn poll_once(&self) -> Result<Vec<JobState>, QueueError> {
        let messages = self.receive().await?;
        Ok(self.handle_batch(messages).await)
    }

    async fn receive(&self) -> Result<Vec<LeasedMessage>, QueueError> {
        self.queue
            .receive(
                self.config.max_messages,
                self.config.wait_time(),
                self.config.visibility_timeout(),
            )
            .await
    }

    async fn handle_batch(&self, messages: Vec<LeasedMessage>) -> Vec<JobState> {
        self.write_heartbeat().await;
        let mut states = Vec::with_capacity(messages.len());
        for message in messages {
            if self.cancel.is_cancelled() {
                info!(
                    message_id = %message.message_id,
                    "stop requested; leaving leased message for redelivery"
                );
                break;
            }
            states.push(self.process(message).await);
        }
        states
    }

    /// Run one leased message. Returns its final state.
    pub async fn process(&self, message: LeasedMessage) -> JobState {
        let ctx = JobContext::new(&message);
        let span = ctx.span.clone();
        self.process_in(ctx, message).instrument(span).await
    }

    async fn process_in(&self, mut ctx: JobContext, message: LeasedMessage) -> JobState {
        ctx.transition(JobState::Leased);
        debug!(receive_count = message.receive_count, "leased message");

        ctx.transition(JobState::Validating);
        let job = match ImpactAssessmentJob::from_message_body(&message.body) {
            Ok(job) => job,
            Err(e) => {
                let err = JobError::from(e);
                error!(
                    correlation_id = %ctx.correlation_id,
                    kind = %err.kind(),
                    error = %err,
                    "rejected job message; it stays on the queue"
                );
                ctx.transition(JobState::Abandoned);
                return ctx.state();
            }
        };
        ctx.record_job_id(&job.job_id);

        ctx.transition(JobState::Running);
        if let Err(err) = self.pipeline.run(&job).await {
            error!(
                correlation_id = %ctx.correlation_id,
                kind = %err.kind(),
                error = %err,
                "job failed; it stays on the queue"
            );
            ctx.transition(JobState::Abandoned);
            return ctx.state();
        }

        match self.queue.delete(&message.receipt).await {
            Ok(()) => {
                info!("job committed");
                ctx.transition(JobState::Committed);
            }
            Err(e) => {
                error!(
                    correlation_id = %ctx.correlation_id,
                    kind = %ErrorKind::Infrastructure,
                    error = %e,
                    "results persisted but the message could not be deleted"
                );
                ctx.transition(JobState::Abandoned);
            }
        }
        ctx.state()
    }

    async fn write_heartbeat(&self) {
        let Some(path) = &self.heartbeat else {
            return;
        };
        let mut temp = path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);
        let stamp = Utc::now().to_rfc3339();
        let result = async {
            tokio::fs::write(&temp, stamp.as_bytes()).await?;
            tokio::fs::rename(&temp, path).await
        }
        .await;
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "failed to write heartbeat");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The loop stopped within the grace period.
    Graceful,
    /// The grace period ran out, or the task failed, and it was aborted.
    Aborted,
}

/// Handle for stopping a spawned intake loop.
pub struct IntakeHandle {
    shutdown_tx: mpsc::Sender<()>,
    cancel: CancellationToken,
    graceful: Duration,
    join_handle: JoinHandle<()>,
}

impl IntakeHandle {
    pub async fn shutdown(self) -> ShutdownOutcome {
        info!(grace_seconds = self.graceful.as_secs(), "stopping intake loop");
        self.cancel.cancel();
        let _ = self.shutdown_tx.try_send(());

        let mut join_handle = self.join_handle;
        match tokio::time::timeout(self.graceful, &mut join_handle).await {
            Ok(Ok(())) => ShutdownOutcome::Graceful,
            Ok(Err(e)) => {
                error!(error = %e, "intake task ended abnormally");
                ShutdownOutcome::Aborted
            }
            Err(_) => {
                warn!("grace period elapsed; aborting in-flight job");
                join_handle.abort();
                ShutdownOutcome::Aborted
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::ReceiptHandle;
    use std::collections::BTreeMap;

    fn message(attributes: BTreeMap<String, String>) -> LeasedMessage {
        LeasedMessage {
            message_id: "msg-1".into(),
            receipt: ReceiptHandle("r-1".into()),
            body: "{}".into(),
            attributes,
            receive_count: 1,
        }
    }

    #[test]
    fn correlation_id_prefers_attribute() {
        let attributes = BTreeMap::from([(CORRELATION_ID_ATTRIBUTE.to_string(), "corr-9".to_string())]);
        assert_eq!(JobContext::new(&message(attributes)).correlation_id, "corr-9");
        assert_eq!(JobContext::new(&message(BTreeMap::new())).correlation_id, "msg-1");
    }

    #[test]
    fn context_starts_idle_and_tracks_transitions() {
        let mut ctx = JobContext::new(&message(BTreeMap::new()));
        assert_eq!(ctx.state(), JobState::Idle);
        ctx.transition(JobState::Leased);
        ctx.record_job_id("job-1");
        assert_eq!(ctx.state(), JobState::Leased);
        assert_eq!(ctx.job_id.as_deref(), Some("job-1"));
    }

    #[test]
    fn cancellation_is_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
