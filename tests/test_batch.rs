//! End-to-end batch signing.

mod common;

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use pdf_seal::batch::{
    BatchConfig, BatchCoordinator, BatchDocument, BatchNotifier, BatchReport, BatchRequest, DirectoryOutputSink,
    SignedOutputSink, TaskState, WorkerPool,
};
use pdf_seal::error::TimestampError;
use pdf_seal::signatures::{SignatureVerifier, TimestampProvider};
use pdf_seal::{AuditStatus, JsonLinesAuditLog, MemoryAuditLog, SignedDocument};
use uuid::Uuid;

use common::{pkcs12, request, service, simple_pdf};

/// Keeps every stored document in memory.
#[derive(Default)]
struct CollectingSink {
    stored: Mutex<Vec<(Uuid, String, Vec<u8>)>>,
}

impl SignedOutputSink for CollectingSink {
    fn store(&self, batch_id: Uuid, document: &SignedDocument) -> io::Result<()> {
        self.stored
            .lock()
            .unwrap()
            .push((batch_id, document.output_name.clone(), document.bytes.clone()));
        Ok(())
    }
}

#[derive(Default)]
struct CountingNotifier {
    calls: AtomicUsize,
    last: Mutex<Option<BatchReport>>,
}

impl BatchNotifier for CountingNotifier {
    fn batch_completed(&self, report: &BatchReport) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(report.clone());
    }
}

/// A timestamp authority that never answers in time.
struct SlowTsa(Duration);

impl TimestampProvider for SlowTsa {
    fn timestamp(&self, _digest: &[u8]) -> Result<Vec<u8>, TimestampError> {
        thread::sleep(self.0);
        Err(TimestampError::Transport("gave up".to_string()))
    }
}

fn documents(count: usize, corrupt: usize) -> Vec<BatchDocument> {
    (0..count)
        .map(|i| {
            let pdf = if i == corrupt {
                b"%PDF-1.7\nthis file is truncated".to_vec()
            } else {
                simple_pdf(1)
            };
            BatchDocument::new(format!("doc_{}.pdf", i), pdf)
        })
        .collect()
}

#[test]
fn test_batch_with_one_corrupt_document() {
    let template = request("", Vec::new(), pkcs12("Batch Signer"));
    let batch = BatchRequest::new(documents(10, 4), template).with_source_address("10.0.0.7");
    let batch_id = batch.batch_id;

    let coordinator =
        BatchCoordinator::new(WorkerPool::new(3).unwrap(), BatchConfig::default()).with_service(service());
    let sink = CollectingSink::default();
    let audit = MemoryAuditLog::new();
    let notifier = CountingNotifier::default();

    let report = coordinator.run(batch, &sink, &audit, Some(&notifier));
    coordinator.shutdown();

    assert_eq!(report.batch_id, batch_id);
    assert_eq!(report.total_documents, 10);
    assert_eq!(report.success_count, 9);
    assert_eq!(report.failure_count, 1);

    // Results come back in submission order.
    for (i, result) in report.results.iter().enumerate() {
        assert_eq!(result.index, i);
        assert_eq!(result.source_name, format!("doc_{}.pdf", i));
    }
    assert!(matches!(report.results[4].state, TaskState::Failed { .. }));
    assert!(report.results[4].reason().is_some());
    match &report.results[0].state {
        TaskState::Succeeded { output_name } => {
            assert_eq!(output_name, "doc_0_signed_20240601120000.pdf")
        },
        other => panic!("unexpected state {:?}", other),
    }

    assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
    assert_eq!(notifier.last.lock().unwrap().as_ref(), Some(&report));

    let entries = audit.entries();
    assert_eq!(entries.len(), 10);
    assert!(entries.iter().all(|e| e.batch_id == Some(batch_id)));
    assert!(entries
        .iter()
        .all(|e| e.source_address.as_deref() == Some("10.0.0.7")));
    assert_eq!(entries.iter().filter(|e| e.status == AuditStatus::Signed).count(), 9);
    let failed: Vec<_> = entries
        .iter()
        .filter(|e| e.status == AuditStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].original_name, "doc_4.pdf");
    assert!(failed[0].signed_name.is_none());

    let stored = sink.stored.lock().unwrap();
    assert_eq!(stored.len(), 9);
    let verifier = SignatureVerifier::new();
    for (id, _, bytes) in stored.iter() {
        assert_eq!(*id, batch_id);
        assert!(verifier.verify(bytes).unwrap().all_valid);
    }
}

#[test]
fn test_batch_task_timeout() {
    let template = request("", Vec::new(), pkcs12("Patient Signer"));
    let batch = BatchRequest::new(documents(2, usize::MAX), template).with_task_timeout(Duration::from_secs(1));

    let slow = service().with_timestamp_provider(Arc::new(SlowTsa(Duration::from_secs(3))));
    let coordinator = BatchCoordinator::new(WorkerPool::new(2).unwrap(), BatchConfig::default()).with_service(slow);
    let sink = CollectingSink::default();
    let audit = MemoryAuditLog::new();

    let report = coordinator.run(batch, &sink, &audit, None);
    coordinator.shutdown();

    assert_eq!(report.success_count, 0);
    assert_eq!(report.failure_count, 2);
    for result in &report.results {
        assert_eq!(result.state, TaskState::TimedOut);
        assert_eq!(result.reason().as_deref(), Some("timeout"));
    }
    assert!(sink.stored.lock().unwrap().is_empty());
    assert!(audit
        .entries()
        .iter()
        .all(|e| e.status == AuditStatus::TimedOut));
}

#[test]
fn test_queued_tasks_time_out_behind_a_stuck_worker() {
    let template = request("", Vec::new(), pkcs12("Queued Signer"));
    let batch = BatchRequest::new(documents(3, usize::MAX), template).with_task_timeout(Duration::from_secs(1));

    let slow = service().with_timestamp_provider(Arc::new(SlowTsa(Duration::from_secs(5))));
    let coordinator = BatchCoordinator::new(WorkerPool::new(1).unwrap(), BatchConfig::default()).with_service(slow);
    let audit = MemoryAuditLog::new();
    let notifier = CountingNotifier::default();

    let began = Instant::now();
    let report = coordinator.run(batch, &CollectingSink::default(), &audit, Some(&notifier));
    let waited = began.elapsed();

    // One worker, three tasks: the wait is capped at three task timeouts.
    assert!(waited < Duration::from_secs(4), "run waited {:?}", waited);
    assert_eq!(report.failure_count, 3);
    assert!(report.results.iter().all(|r| r.state == TaskState::TimedOut));
    assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
    assert_eq!(audit.entries().len(), 3);

    // Abandoned jobs still in the queue are skipped, so only the first one blocks shutdown.
    coordinator.shutdown();
    assert!(began.elapsed() < Duration::from_secs(9));
}

#[test]
fn test_batch_writes_files_and_audit_log() {
    let dir = tempfile::tempdir().unwrap();
    let out_dir = dir.path().join("signed");
    let audit_path = dir.path().join("audit.jsonl");

    let template = request("", Vec::new(), pkcs12("File Signer"));
    let coordinator = BatchCoordinator::new(
        WorkerPool::new(2).unwrap(),
        BatchConfig::default().with_workers(2),
    )
    .with_service(service());
    let audit = JsonLinesAuditLog::open(&audit_path).unwrap();

    let report = coordinator.run(
        BatchRequest::new(documents(3, usize::MAX), template),
        &DirectoryOutputSink::new(&out_dir),
        &audit,
        None,
    );
    coordinator.shutdown();
    assert_eq!(report.success_count, 3);

    for i in 0..3 {
        let path = out_dir.join(format!("doc_{}_signed_20240601120000.pdf", i));
        let bytes = std::fs::read(&path).unwrap();
        assert!(SignatureVerifier::new().verify(&bytes).unwrap().all_valid);
    }

    let log = std::fs::read_to_string(&audit_path).unwrap();
    let lines: Vec<serde_json::Value> = log
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 3);
    assert!(lines.iter().all(|l| l["status"] == "SIGNED"));
}

#[test]
fn test_report_json_shape() {
    let template = request("", Vec::new(), pkcs12("Json Signer"));
    let coordinator =
        BatchCoordinator::new(WorkerPool::new(1).unwrap(), BatchConfig::default()).with_service(service());
    let report = coordinator.run(
        BatchRequest::new(documents(2, 1), template),
        &CollectingSink::default(),
        &MemoryAuditLog::new(),
        None,
    );
    coordinator.shutdown();

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["totalDocuments"], 2);
    assert_eq!(json["successCount"], 1);
    assert_eq!(json["failureCount"], 1);
    assert_eq!(json["results"][0]["state"], "succeeded");
    assert_eq!(json["results"][1]["state"], "failed");
    assert!(json["results"][1]["reason"].is_string());
}
