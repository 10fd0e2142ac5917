//! PDF digital signatures.
//!
//! Signing appends one incremental revision holding a signature field whose
//! `/Contents` is a detached CMS SignedData (`adbe.pkcs7.detached`, RSA with
//! SHA-256). Existing bytes are never touched, so earlier signatures stay
//! valid. Verification walks every signature field and checks the digest,
//! the RSA signature, tampering after signing and the signer certificate's
//! validity at the signing time.
//!
//! ## Example
//!
//! ```ignore
//! use pdf_seal::geometry::SignaturePlacement;
//! use pdf_seal::signatures::{CertificateLoader, SignOptions, SignatureEngine, SignatureVerifier};
//!
//! let bundle = CertificateLoader::new().load(&std::fs::read("signer.p12")?, "secret")?;
//! let placement = SignaturePlacement::new(1, 0.0, 0.0, 1.0, 1.0);
//! let signed = SignatureEngine::new().sign(&pdf, &bundle, &placement, &SignOptions::default(), None)?;
//! let report = SignatureVerifier::new().verify(&signed.bytes)?;
//! assert!(report.all_valid);
//! ```
//!
//! ## References
//!
//! - ISO 32000-1:2008 Section 12.8 - Digital Signatures
//! - RFC 5652 (CMS), RFC 3161 (Time-Stamp Protocol)

mod byterange;
mod certificate;
mod cms;
mod signer;
mod timestamp;
mod types;
mod verifier;

pub use byterange::ByteRangeCalculator;
pub use certificate::{CertificateBundle, CertificateLoader, CertificateSummary};
pub use cms::{parse_signed_data, verify_rsa, DetachedSignature, ParsedSignature};
pub use signer::{format_pdf_date, SignatureEngine};
pub use timestamp::{
    build_request, token_covers, token_from_response, token_time, TimestampClient, TimestampProvider, TsaConfig,
    TsaProfile,
};
pub use types::{
    DigestAlgorithm, SignOptions, SignatureSubFilter, SignedOutput, DEFAULT_REASON, DEFAULT_SIGNATURE_SIZE,
    DEFAULT_TIMESTAMPED_SIGNATURE_SIZE,
};
pub use verifier::{parse_pdf_date, SignatureReport, SignatureVerifier, VerificationReport};
