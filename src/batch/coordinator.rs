//! Signing many documents with one request.
//!
//! Every document becomes an independent task on the [`WorkerPool`]. The
//! coordinator thread collects results, enforces the per-task time budget
//! (measured from the moment a worker picks the task up), hands signed files
//! to the output sink and writes one audit entry per document.
//!
//! The whole batch also has a wait budget of `ceil(documents / workers)`
//! task timeouts. When it runs out, every task that is still pending or
//! running becomes `TimedOut`, and queued jobs for those tasks are skipped
//! when a worker reaches them. When every task is terminal the notifier is
//! called once with the final report.

use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditSink, AuditStatus};
use crate::batch::pool::{WorkerPool, DEFAULT_WORKERS};
use crate::clock::{Clock, SystemClock};
use crate::error::BatchTaskError;
use crate::pipeline::{SignedDocument, SigningRequest, SigningService};

const DEFAULT_TASK_TIMEOUT_SECS: u64 = 300;

/// Batch tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BatchConfig {
    /// Worker threads
    pub workers: usize,
    /// Time budget per document, in seconds
    pub task_timeout_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            task_timeout_secs: DEFAULT_TASK_TIMEOUT_SECS,
        }
    }
}

impl BatchConfig {
    /// Set the worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the per-task time budget (whole seconds).
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout_secs = timeout.as_secs();
        self
    }

    /// Per-task time budget.
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

/// One file in a batch.
#[derive(Debug, Clone)]
pub struct BatchDocument {
    /// File name
    pub name: String,
    /// PDF bytes
    pub pdf: Vec<u8>,
}

impl BatchDocument {
    /// Named document.
    pub fn new(name: impl Into<String>, pdf: Vec<u8>) -> Self {
        Self { name: name.into(), pdf }
    }
}

/// Documents plus the signing parameters they share.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    /// Identifier reported back in [`BatchReport`]
    pub batch_id: Uuid,
    /// Files to sign
    pub documents: Vec<BatchDocument>,
    /// Shared parameters; its source name and bytes are replaced per document
    pub template: SigningRequest,
    /// Caller address for the audit trail
    pub source_address: Option<String>,
    /// Per-request override of [`BatchConfig::task_timeout`]
    pub task_timeout: Option<Duration>,
}

impl BatchRequest {
    /// New batch with a fresh id.
    pub fn new(documents: Vec<BatchDocument>, template: SigningRequest) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            documents,
            template,
            source_address: None,
            task_timeout: None,
        }
    }

    /// Record the caller address in audit entries.
    pub fn with_source_address(mut self, address: impl Into<String>) -> Self {
        self.source_address = Some(address.into());
        self
    }

    /// Override the per-task time budget.
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }
}

/// Lifecycle of one task: `Pending → Running → Succeeded | Failed | TimedOut`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum TaskState {
    /// Queued, no worker yet
    Pending,
    /// A worker is on it
    Running,
    /// Signed and stored
    #[serde(rename_all = "camelCase")]
    Succeeded {
        /// Name of the signed output
        output_name: String,
    },
    /// The pipeline or the sink failed
    Failed {
        /// Error message
        reason: String,
    },
    /// Exceeded its time budget; the late result, if any, was discarded
    TimedOut,
}

impl TaskState {
    /// True for the three final states.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded { .. } | TaskState::Failed { .. } | TaskState::TimedOut
        )
    }
}

/// Outcome of one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskReport {
    /// Position in the request
    pub index: usize,
    /// Submitted file name
    pub source_name: String,
    /// Final state
    #[serde(flatten)]
    pub state: TaskState,
}

impl TaskReport {
    /// Failure reason; `"timeout"` for timed out tasks.
    pub fn reason(&self) -> Option<String> {
        match &self.state {
            TaskState::Failed { reason } => Some(reason.clone()),
            TaskState::TimedOut => Some(BatchTaskError::Timeout.to_string()),
            _ => None,
        }
    }
}

/// Summary of a whole batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    /// Batch identifier
    pub batch_id: Uuid,
    /// Documents submitted
    pub total_documents: usize,
    /// Documents signed and stored
    pub success_count: usize,
    /// Documents failed or timed out
    pub failure_count: usize,
    /// One entry per document, in submission order
    pub results: Vec<TaskReport>,
}

impl BatchReport {
    /// Pretty-printed camelCase JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Receives each signed document.
pub trait SignedOutputSink: Send + Sync {
    /// Persist `document`. An error fails the task.
    fn store(&self, batch_id: Uuid, document: &SignedDocument) -> io::Result<()>;
}

/// Told once when a batch finishes.
pub trait BatchNotifier: Send + Sync {
    /// Called with the final report.
    fn batch_completed(&self, report: &BatchReport);
}

/// Writes signed files into a directory under their output names.
#[derive(Debug, Clone)]
pub struct DirectoryOutputSink {
    dir: PathBuf,
}

impl DirectoryOutputSink {
    /// Sink writing into `dir` (created on first use).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl SignedOutputSink for DirectoryOutputSink {
    fn store(&self, _batch_id: Uuid, document: &SignedDocument) -> io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.dir.join(&document.output_name), &document.bytes)
    }
}

/// Messages from tasks back to the coordinator.
enum TaskEvent {
    Started(usize, Instant),
    Finished(usize, Result<SignedDocument, BatchTaskError>),
}

/// Runs batches on an owned worker pool.
pub struct BatchCoordinator {
    pool: WorkerPool,
    config: BatchConfig,
    service: Arc<SigningService>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for BatchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchCoordinator")
            .field("pool", &self.pool)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BatchCoordinator {
    /// Coordinator over `pool` with the default signing service.
    pub fn new(pool: WorkerPool, config: BatchConfig) -> Self {
        Self {
            pool,
            config,
            service: Arc::new(SigningService::new()),
            clock: Arc::new(SystemClock),
        }
    }

    /// Use a configured signing service.
    pub fn with_service(mut self, service: SigningService) -> Self {
        self.service = Arc::new(service);
        self
    }

    /// Time source for audit entries.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The batch settings.
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Stop the pool after queued work finishes.
    pub fn shutdown(mut self) {
        self.pool.shutdown();
    }

    /// Sign every document; returns once each task is terminal or the batch budget is spent.
    pub fn run(
        &self,
        request: BatchRequest,
        outputs: &dyn SignedOutputSink,
        audit: &dyn AuditSink,
        notifier: Option<&dyn BatchNotifier>,
    ) -> BatchReport {
        let batch_id = request.batch_id;
        let timeout = request.task_timeout.unwrap_or_else(|| self.config.task_timeout());
        let total = request.documents.len();
        log::info!("Batch {}: {} document(s), timeout {:?}", batch_id, total, timeout);

        let mut tasks: Vec<TaskReport> = request
            .documents
            .iter()
            .enumerate()
            .map(|(index, doc)| TaskReport {
                index,
                source_name: doc.name.clone(),
                state: TaskState::Pending,
            })
            .collect();
        let mut started: Vec<Option<Instant>> = vec![None; total];
        let mut remaining = total;

        let batch_deadline = Instant::now() + batch_budget(timeout, total, self.pool.size());
        let abandoned: Arc<Vec<AtomicBool>> = Arc::new((0..total).map(|_| AtomicBool::new(false)).collect());

        let recorder = Recorder {
            batch_id,
            source_address: request.source_address.clone(),
            audit,
            clock: self.clock.as_ref(),
        };

        let (tx, rx) = mpsc::channel::<TaskEvent>();
        for (index, doc) in request.documents.into_iter().enumerate() {
            let mut job = request.template.clone();
            job.source_name = doc.name;
            job.source_pdf = doc.pdf;

            let tx = tx.clone();
            let service = Arc::clone(&self.service);
            let abandoned = Arc::clone(&abandoned);
            let submitted = self.pool.execute(move || {
                if abandoned[index].load(Ordering::SeqCst) {
                    return;
                }
                // Send failures mean the batch was abandoned.
                let _ = tx.send(TaskEvent::Started(index, Instant::now()));
                let outcome = catch_unwind(AssertUnwindSafe(|| service.sign(job)))
                    .map_err(|_| BatchTaskError::WorkerLost)
                    .and_then(|signed| signed.map_err(BatchTaskError::from));
                let _ = tx.send(TaskEvent::Finished(index, outcome));
            });
            if let Err(e) = submitted {
                recorder.failed(&mut tasks[index], &e);
                remaining -= 1;
            }
        }
        drop(tx);

        while remaining > 0 {
            let now = Instant::now();
            let budget_spent = now >= batch_deadline;
            for (index, task) in tasks.iter_mut().enumerate() {
                if task.state.is_terminal() {
                    continue;
                }
                let overdue = task.state == TaskState::Running && started[index].is_some_and(|at| now >= at + timeout);
                if overdue || budget_spent {
                    abandoned[index].store(true, Ordering::SeqCst);
                    recorder.timed_out(task);
                    remaining -= 1;
                }
            }
            if remaining == 0 {
                break;
            }

            let wait = tasks
                .iter()
                .zip(&started)
                .filter(|(task, _)| task.state == TaskState::Running)
                .filter_map(|(_, at)| at.map(|at| at + timeout))
                .chain(std::iter::once(batch_deadline))
                .min()
                .map_or(timeout, |deadline| deadline.saturating_duration_since(now));

            match rx.recv_timeout(wait) {
                Ok(TaskEvent::Started(index, at)) => {
                    if tasks[index].state == TaskState::Pending {
                        tasks[index].state = TaskState::Running;
                        started[index] = Some(at);
                    }
                },
                Ok(TaskEvent::Finished(index, outcome)) => {
                    let task = &mut tasks[index];
                    if task.state.is_terminal() {
                        log::debug!("Batch {}: discarding late result for task {}", batch_id, index);
                        continue;
                    }
                    let late = started[index].is_some_and(|at| at.elapsed() > timeout);
                    if late {
                        recorder.timed_out(task);
                    } else {
                        match outcome.and_then(|doc| {
                            outputs
                                .store(batch_id, &doc)
                                .map(|_| doc)
                                .map_err(|e| BatchTaskError::Sink(e.to_string()))
                        }) {
                            Ok(doc) => recorder.succeeded(task, &doc),
                            Err(e) => recorder.failed(task, &e),
                        }
                    }
                    remaining -= 1;
                },
                Err(RecvTimeoutError::Timeout) => {},
                Err(RecvTimeoutError::Disconnected) => {
                    for task in tasks.iter_mut().filter(|t| !t.state.is_terminal()) {
                        recorder.failed(task, &BatchTaskError::WorkerLost);
                    }
                    remaining = 0;
                },
            }
        }

        let success_count = tasks
            .iter()
            .filter(|t| matches!(t.state, TaskState::Succeeded { .. }))
            .count();
        let report = BatchReport {
            batch_id,
            total_documents: total,
            success_count,
            failure_count: total - success_count,
            results: tasks,
        };
        log::info!(
            "Batch {} finished: {} signed, {} failed",
            batch_id,
            report.success_count,
            report.failure_count
        );

        if let Some(notifier) = notifier {
            notifier.batch_completed(&report);
        }
        report
    }
}

/// How long `run` waits in total: one task timeout per round of workers.
fn batch_budget(timeout: Duration, tasks: usize, workers: usize) -> Duration {
    let rounds = tasks.div_ceil(workers.max(1)).max(1);
    timeout.saturating_mul(u32::try_from(rounds).unwrap_or(u32::MAX))
}

/// Moves tasks into terminal states and writes the matching audit entry.
struct Recorder<'a> {
    batch_id: Uuid,
    source_address: Option<String>,
    audit: &'a dyn AuditSink,
    clock: &'a dyn Clock,
}

impl Recorder<'_> {
    fn succeeded(&self, task: &mut TaskReport, doc: &SignedDocument) {
        task.state = TaskState::Succeeded {
            output_name: doc.output_name.clone(),
        };
        let mut entry = self
            .entry(task, AuditStatus::Signed)
            .with_signed_name(&doc.output_name)
            .with_signer(&doc.signer_identity)
            .with_extra("pages", doc.pages_signed.clone())
            .with_extra("timestamped", doc.timestamped);
        if !doc.skipped_placements.is_empty() {
            let skipped: Vec<String> = doc.skipped_placements.iter().map(|e| e.to_string()).collect();
            entry = entry.with_extra("skipped", skipped);
        }
        self.write(entry);
    }

    fn failed(&self, task: &mut TaskReport, error: &BatchTaskError) {
        log::warn!("Batch {}: {} failed: {}", self.batch_id, task.source_name, error);
        task.state = TaskState::Failed {
            reason: error.to_string(),
        };
        let entry = self.entry(task, AuditStatus::Failed).with_extra("reason", error.to_string());
        self.write(entry);
    }

    fn timed_out(&self, task: &mut TaskReport) {
        log::warn!("Batch {}: {} timed out", self.batch_id, task.source_name);
        task.state = TaskState::TimedOut;
        let entry = self
            .entry(task, AuditStatus::TimedOut)
            .with_extra("reason", BatchTaskError::Timeout.to_string());
        self.write(entry);
    }

    fn entry(&self, task: &TaskReport, status: AuditStatus) -> AuditEntry {
        let entry = AuditEntry::new(&task.source_name, status, self.clock.now()).with_batch(self.batch_id);
        match &self.source_address {
            Some(address) => entry.with_source_address(address),
            None => entry,
        }
    }

    fn write(&self, entry: AuditEntry) {
        if let Err(e) = self.audit.record(&entry) {
            log::warn!("Batch {}: audit entry not written: {}", self.batch_id, e);
        }
    }
}
