//! Transcription pipeline.
//!
//! Two components cooperate here:
//! - **WorkerSupervisor**: owns the lifecycle of one external engine
//!   process, streaming progress and enforcing timeout/cancellation
//! - **QueueManager**: strictly FIFO admission, single-flight draining,
//!   status persistence and cancellation
//!
//! ```text
//! add_to_queue → [pending] → drain → WorkerSupervisor → engine process
//!                                   ↘ progress / completion → event bus
//! ```

pub mod queue;
pub mod worker;

// Re-export key types
pub use queue::{QueueError, QueueItem, QueueItemStatus, QueueManager};
pub use worker::{
    Transcript, TranscriptionRequest, WorkerConfig, WorkerError, WorkerSupervisor,
};
