//! Sign-then-verify tests for a single document.
//!
//! Each test builds a small PDF and a throwaway PKCS#12 container, runs the
//! full stamp and signature pipeline, and checks what the verifier reports.

mod common;

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use pdf_seal::clock::FixedClock;
use pdf_seal::document::PdfDocument;
use pdf_seal::error::{CertificateError, PipelineError, RenderError, TimestampError};
use pdf_seal::geometry::SignaturePlacement;
use pdf_seal::pipeline::SigningService;
use pdf_seal::signatures::{
    CertificateLoader, SignOptions, SignatureEngine, SignatureVerifier, TimestampProvider,
};

use common::{
    find, pkcs12, pkcs12_valid_between, request, service, signing_time, simple_pdf, timestamp_token,
};

/// Answers every request with a token issued at a fixed time.
struct FixedTsa(DateTime<Utc>);

impl TimestampProvider for FixedTsa {
    fn timestamp(&self, digest: &[u8]) -> Result<Vec<u8>, TimestampError> {
        Ok(timestamp_token(digest, self.0))
    }
}

/// Answers with a token over an unrelated digest.
struct MismatchedTsa(DateTime<Utc>);

impl TimestampProvider for MismatchedTsa {
    fn timestamp(&self, _digest: &[u8]) -> Result<Vec<u8>, TimestampError> {
        Ok(timestamp_token(&[0xAB; 32], self.0))
    }
}

struct UnreachableTsa;

impl TimestampProvider for UnreachableTsa {
    fn timestamp(&self, _digest: &[u8]) -> Result<Vec<u8>, TimestampError> {
        Err(TimestampError::Transport("connection refused".to_string()))
    }
}

#[test]
fn test_signed_document_verifies() {
    let source = simple_pdf(2);
    let signed = service()
        .sign(request("contract.pdf", source.clone(), pkcs12("Alice Example")))
        .unwrap();

    assert_eq!(signed.output_name, "contract_signed_20240601120000.pdf");
    assert_eq!(signed.pages_signed, vec![1]);
    assert!(signed.skipped_placements.is_empty());
    assert!(!signed.timestamped);
    assert!(signed.signer_identity.contains("CN=Alice Example"));

    // Append-only: the original file is a byte prefix of the output.
    assert!(signed.bytes.starts_with(&source));

    let report = SignatureVerifier::new().verify(&signed.bytes).unwrap();
    assert_eq!(report.signature_count, 1);
    assert!(report.all_valid);
    assert_eq!(report.file_size, signed.bytes.len());

    let sig = &report.signatures[0];
    assert!(sig.valid, "issues: {:?}", sig.issues);
    assert!(sig.is_last_signature);
    assert!(sig.covers_whole_document);
    assert!(sig.signature_integrity);
    assert!(sig.document_integrity_valid);
    assert!(sig.certificate_valid_at_signing_time);
    assert!(sig.is_self_signed);
    assert!(!sig.has_timestamp);
    assert_eq!(sig.field_name, signed.field_name);
    assert_eq!(sig.signer_cn.as_deref(), Some("Alice Example"));
    assert_eq!(sig.reason.as_deref(), Some("Digital Signature"));
    assert_eq!(sig.location.as_deref(), Some("Berlin"));
    assert_eq!(sig.sub_filter.as_deref(), Some("adbe.pkcs7.detached"));
    assert_eq!(sig.sign_date, Some(signing_time()));
    assert_eq!(sig.byte_range[0], 0);
    assert_eq!(
        (sig.byte_range[2] + sig.byte_range[3]) as usize,
        signed.bytes.len()
    );
    assert!(sig.issues.is_empty());
}

#[test]
fn test_signed_document_structure() {
    let signed = service()
        .sign(request("form.pdf", simple_pdf(1), pkcs12("Bob")))
        .unwrap();

    let mut doc = PdfDocument::load(&signed.bytes).unwrap();
    assert_eq!(doc.page_count().unwrap(), 1);
    assert!(doc.has_signatures().unwrap());
    let fields = doc.form_fields().unwrap();
    assert_eq!(fields.len(), 1);
    assert_eq!(fields[0].full_name, signed.field_name);
}

#[test]
fn test_verification_is_repeatable() {
    let signed = service()
        .sign(request("a.pdf", simple_pdf(1), pkcs12("Carol")))
        .unwrap();

    let verifier = SignatureVerifier::new();
    let first = verifier.verify(&signed.bytes).unwrap();
    let second = verifier.verify(&signed.bytes).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_appended_bytes_break_document_integrity() {
    let signed = service()
        .sign(request("a.pdf", simple_pdf(1), pkcs12("Dave")))
        .unwrap();

    let mut modified = signed.bytes.clone();
    modified.extend_from_slice(b"\n% appended after signing\n");

    let report = SignatureVerifier::new().verify(&modified).unwrap();
    assert!(!report.all_valid);
    let sig = &report.signatures[0];
    assert!(sig.signature_integrity);
    assert!(!sig.covers_whole_document);
    assert!(!sig.document_integrity_valid);
    assert!(!sig.valid);
    assert!(sig
        .issues
        .iter()
        .any(|i| i.contains("modified after this signature")));
}

#[test]
fn test_altered_content_breaks_signature_integrity() {
    let signed = service()
        .sign(request("a.pdf", simple_pdf(1), pkcs12("Erin")))
        .unwrap();

    let mut tampered = signed.bytes.clone();
    let at = find(&tampered, b"(Page 1)", 0).unwrap();
    tampered[at + 6] = b'9';

    let report = SignatureVerifier::new().verify(&tampered).unwrap();
    let sig = &report.signatures[0];
    assert!(!sig.signature_integrity);
    assert!(!sig.valid);
    assert!(sig
        .issues
        .iter()
        .any(|i| i.starts_with("Signature integrity check failed")));
}

#[test]
fn test_timestamp_time_becomes_sign_date() {
    let stamped_at = signing_time() + Duration::minutes(3);
    let signed = service()
        .with_timestamp_provider(Arc::new(FixedTsa(stamped_at)))
        .sign(request("tsa.pdf", simple_pdf(1), pkcs12("Tess Stamp")))
        .unwrap();
    assert!(signed.timestamped);

    let report = SignatureVerifier::new().verify(&signed.bytes).unwrap();
    assert!(report.all_valid);
    let sig = &report.signatures[0];
    assert!(sig.has_timestamp);
    assert_eq!(sig.timestamp_time, Some(stamped_at));
    assert_eq!(sig.sign_date, Some(stamped_at));
    assert!(sig.certificate_valid_at_signing_time);
    assert!(sig.valid, "issues: {:?}", sig.issues);
    assert!(sig.issues.is_empty());
}

#[test]
fn test_unreachable_tsa_still_signs() {
    let signed = service()
        .with_timestamp_provider(Arc::new(UnreachableTsa))
        .sign(request("offline.pdf", simple_pdf(1), pkcs12("Otto Offline")))
        .unwrap();
    assert!(!signed.timestamped);

    let report = SignatureVerifier::new().verify(&signed.bytes).unwrap();
    assert!(report.all_valid);
    let sig = &report.signatures[0];
    assert!(!sig.has_timestamp);
    assert!(sig.timestamp_time.is_none());
    assert_eq!(sig.sign_date, Some(signing_time()));
}

#[test]
fn test_timestamp_for_another_signature_is_ignored() {
    // Far outside the certificate window: trusting it would fail the certificate check.
    let stamped_at = signing_time() + Duration::days(400);
    let signed = service()
        .with_timestamp_provider(Arc::new(MismatchedTsa(stamped_at)))
        .sign(request("wrong.pdf", simple_pdf(1), pkcs12("Mira Match")))
        .unwrap();

    let report = SignatureVerifier::new().verify(&signed.bytes).unwrap();
    let sig = &report.signatures[0];
    assert!(sig.has_timestamp);
    assert_eq!(sig.timestamp_time, Some(stamped_at));
    assert_eq!(sig.sign_date, Some(signing_time()));
    assert!(sig.certificate_valid_at_signing_time);
    assert!(sig.valid, "issues: {:?}", sig.issues);
    assert!(sig
        .issues
        .iter()
        .any(|i| i.contains("Timestamp token does not match")));
}

#[test]
fn test_expired_certificate_still_valid_at_signing_time() {
    // Validity in 2020, signing pinned to 2020; verification happens years later.
    let not_before = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    let not_after = Utc.with_ymd_and_hms(2020, 12, 31, 0, 0, 0).unwrap();
    let signed_at = Utc.with_ymd_and_hms(2020, 6, 15, 8, 30, 0).unwrap();

    let signed = SigningService::new()
        .with_clock(Arc::new(FixedClock(signed_at)))
        .sign(request(
            "old.pdf",
            simple_pdf(1),
            pkcs12_valid_between("Frank", not_before, not_after),
        ))
        .unwrap();

    let report = SignatureVerifier::new().verify(&signed.bytes).unwrap();
    let sig = &report.signatures[0];
    assert_eq!(sig.sign_date, Some(signed_at));
    assert!(sig.certificate_valid_at_signing_time);
    assert!(sig.valid);
}

#[test]
fn test_signing_time_outside_certificate_window() {
    let loader_clock = Arc::new(FixedClock(signing_time()));
    let bundle = CertificateLoader::new()
        .with_clock(loader_clock)
        .load(&pkcs12("Grace"), common::PASSWORD)
        .unwrap();

    let late = signing_time() + Duration::days(365 * 3);
    let signed = SignatureEngine::new()
        .with_clock(Arc::new(FixedClock(late)))
        .sign(
            &simple_pdf(1),
            &bundle,
            &SignaturePlacement::new(1, 10.0, 10.0, 100.0, 40.0),
            &SignOptions::default(),
            None,
        )
        .unwrap();

    let report = SignatureVerifier::new().verify(&signed.bytes).unwrap();
    let sig = &report.signatures[0];
    assert!(sig.signature_integrity);
    assert!(sig.document_integrity_valid);
    assert!(!sig.certificate_valid_at_signing_time);
    assert!(!sig.valid);
    assert!(sig
        .issues
        .iter()
        .any(|i| i.starts_with("Certificate was not valid at signing time")));
}

#[test]
fn test_invalid_page_is_skipped() {
    let req = request("a.pdf", simple_pdf(2), pkcs12("Heidi"))
        .with_placement(SignaturePlacement::new(7, 10.0, 10.0, 100.0, 40.0))
        .with_placement(SignaturePlacement::new(2, 10.0, 10.0, 100.0, 40.0));

    let signed = service().sign(req).unwrap();
    assert_eq!(signed.pages_signed, vec![1, 2]);
    assert_eq!(signed.skipped_placements.len(), 1);
    assert!(matches!(
        signed.skipped_placements[0],
        RenderError::InvalidPage { page: 7, page_count: 2 }
    ));

    let report = SignatureVerifier::new().verify(&signed.bytes).unwrap();
    assert!(report.all_valid);
}

#[test]
fn test_only_invalid_pages_fails() {
    let mut req = request("a.pdf", simple_pdf(1), pkcs12("Ivan"));
    req.placements = vec![SignaturePlacement::new(3, 10.0, 10.0, 100.0, 40.0)];

    let err = service().sign(req).unwrap_err();
    assert!(matches!(err, PipelineError::Render(RenderError::NoValidPlacement)));
}

#[test]
fn test_wrong_passphrase() {
    let mut req = request("a.pdf", simple_pdf(1), pkcs12("Judy"));
    req.passphrase = "wrong".to_string();

    let err = service().sign(req).unwrap_err();
    assert!(matches!(err, PipelineError::Certificate(CertificateError::BadPassphrase)));
}

#[test]
fn test_expired_certificate_refused_at_load() {
    let not_before = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    let not_after = Utc.with_ymd_and_hms(2020, 12, 31, 0, 0, 0).unwrap();
    let req = request("a.pdf", simple_pdf(1), pkcs12_valid_between("Ken", not_before, not_after));

    let err = service().sign(req).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Certificate(CertificateError::ExpiredOrNotYetValid { .. })
    ));
}

#[test]
fn test_unsigned_document_reports_nothing() {
    let report = SignatureVerifier::new().verify(&simple_pdf(1)).unwrap();
    assert_eq!(report.signature_count, 0);
    assert!(report.all_valid);
    assert!(report.signatures.is_empty());
}

#[test]
fn test_garbage_is_not_verifiable() {
    assert!(SignatureVerifier::new().verify(b"definitely not a pdf").is_err());
}

#[test]
fn test_report_json_is_camel_case() {
    let signed = service()
        .sign(request("a.pdf", simple_pdf(1), pkcs12("Leo")))
        .unwrap();
    let json = SignatureVerifier::new()
        .verify(&signed.bytes)
        .unwrap()
        .to_json()
        .unwrap();
    assert!(json.contains("\"signatureCount\": 1"));
    assert!(json.contains("\"documentIntegrityValid\": true"));
    assert!(json.contains("\"certificateValidAtSigningTime\": true"));
}
