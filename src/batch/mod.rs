//! Concurrent batch signing.

mod coordinator;
mod pool;

pub use coordinator::{
    BatchConfig, BatchCoordinator, BatchDocument, BatchNotifier, BatchReport, BatchRequest, DirectoryOutputSink,
    SignedOutputSink, TaskReport, TaskState,
};
pub use pool::{WorkerPool, DEFAULT_WORKERS};
