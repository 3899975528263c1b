//! NRF impact assessment worker.
//!
//! Leases job messages from a [`queue::JobQueue`], runs each one through the
//! [`pipeline::Pipeline`] and deletes the message only after its results are
//! persisted by a [`sink::ResultSink`].

pub mod config;
pub mod error;
pub mod input;
pub mod intake;
pub mod pipeline;
pub mod queue;
pub mod sink;

pub use config::{WorkerArgs, WorkerSettings};
pub use error::{ErrorKind, InputError, JobError, QueueError, SinkError};
pub use input::{decode_boundary, InputStore, LocalInputStore};
pub use intake::{CancellationToken, IntakeHandle, IntakeLoop, JobContext, JobState, ShutdownOutcome};
pub use pipeline::Pipeline;
pub use queue::{InMemoryJobQueue, JobQueue, LeasedMessage, ReceiptHandle, SqliteJobQueue};
pub use sink::{FileResultSink, JobOutcome, MemoryResultSink, ResultSink};
