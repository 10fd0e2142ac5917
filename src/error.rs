//! Error types for the signing pipeline.
//!
//! [`Error`] covers the PDF object layer (parsing, cross-references, writing).
//! Each pipeline stage has its own enum so callers can tell a bad passphrase
//! from a write failure without string matching.

use crate::object::ObjectRef;

/// Result type alias for PDF layer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while reading or writing PDF structure.
#[derive(Debug, thiserror::Error)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// Invalid PDF header (expected '%PDF-')
    #[error("Invalid PDF header: expected '%PDF-', found '{0}'")]
    InvalidHeader(String),

    /// Parse error at specific byte offset
    #[error("Failed to parse object at byte {offset}: {reason}")]
    ParseError {
        /// Byte offset where error occurred
        offset: usize,
        /// Reason for parse failure
        reason: String,
    },

    /// Invalid cross-reference table
    #[error("Invalid cross-reference table")]
    InvalidXref,

    /// Referenced object not found in cross-reference table
    #[error("Object not found: {0} {1} R")]
    ObjectNotFound(u32, u16),

    /// Object has wrong type
    #[error("Invalid object type: expected {expected}, found {found}")]
    InvalidObjectType {
        /// Expected object type
        expected: String,
        /// Actual object type found
        found: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid PDF structure (generic)
    #[error("Invalid PDF: {0}")]
    InvalidPdf(String),

    /// Stream decoding error
    #[error("Stream decoding error: {0}")]
    Decode(String),

    /// Unsupported stream filter
    #[error("Unsupported filter: {0}")]
    UnsupportedFilter(String),

    /// Image error
    #[error("Image error: {0}")]
    Image(String),

    /// Circular reference detected in object graph
    #[error("Circular reference detected: object {0}")]
    CircularReference(ObjectRef),

    /// Recursion depth limit exceeded
    #[error("Recursion depth limit exceeded (max: {0})")]
    RecursionLimitExceeded(u32),

    /// Configuration could not be parsed
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Failures while opening a PKCS#12 container.
#[derive(Debug, thiserror::Error)]
pub enum CertificateError {
    /// The container could not be decoded or the passphrase is wrong
    #[error("PKCS#12 container could not be opened (bad passphrase or corrupt data)")]
    BadPassphrase,

    /// The container holds no private key
    #[error("PKCS#12 container holds no private key entry")]
    NoKeyEntry,

    /// The container holds no certificate
    #[error("PKCS#12 container holds no certificate")]
    NoCertificate,

    /// The key is not an RSA key
    #[error("Unsupported private key: {0}")]
    UnsupportedKey(String),

    /// A certificate could not be parsed
    #[error("Malformed certificate: {0}")]
    MalformedCertificate(String),

    /// The current time lies outside the certificate's validity window
    #[error("Certificate not valid now (valid from {not_before} to {not_after})")]
    ExpiredOrNotYetValid {
        /// Start of validity
        not_before: chrono::DateTime<chrono::Utc>,
        /// End of validity
        not_after: chrono::DateTime<chrono::Utc>,
    },
}

/// Failures while drawing a visual stamp.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// Placement refers to a page the document does not have
    #[error("Invalid page {page}: document has {page_count} page(s)")]
    InvalidPage {
        /// Requested 1-based page number
        page: u32,
        /// Number of pages in the document
        page_count: u32,
    },

    /// Every placement was skipped
    #[error("No placement could be drawn")]
    NoValidPlacement,

    /// Canvas dimensions must be positive
    #[error("Invalid canvas size {width}x{height}")]
    InvalidCanvas {
        /// Canvas width
        width: f64,
        /// Canvas height
        height: f64,
    },

    /// The stamp image could not be decoded
    #[error("Stamp image error: {0}")]
    Image(String),

    /// The source document could not be read or written
    #[error("PDF error: {0}")]
    Pdf(#[from] Error),
}

/// Failures while applying a digital signature.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    /// No usable private key was supplied
    #[error("No private key available for signing")]
    NoPrivateKey,

    /// Hashing or the asymmetric signature operation failed
    #[error("Digest or signature computation failed: {0}")]
    DigestFailure(String),

    /// The signed revision could not be written
    #[error("Failed to write signed document: {0}")]
    WriteFailure(String),

    /// The source is not a readable PDF
    #[error("Invalid source document: {0}")]
    InvalidDocument(#[from] Error),

    /// The signature field page does not exist
    #[error("Invalid signature page {page}: document has {page_count} page(s)")]
    InvalidPage {
        /// Requested 1-based page number
        page: u32,
        /// Number of pages in the document
        page_count: u32,
    },

    /// The CMS blob does not fit in the reserved /Contents slot
    #[error("Signature needs {needed} bytes but only {reserved} were reserved")]
    PlaceholderTooSmall {
        /// Bytes required
        needed: usize,
        /// Bytes reserved
        reserved: usize,
    },
}

/// Failures talking to a timestamp authority.
#[derive(Debug, thiserror::Error)]
pub enum TimestampError {
    /// Timestamping is disabled or misconfigured
    #[error("Timestamp authority not configured: {0}")]
    NotConfigured(String),

    /// HTTP transport failure
    #[error("TSA request failed: {0}")]
    Transport(String),

    /// The TSA refused the request
    #[error("TSA rejected request with status {0}")]
    Rejected(String),

    /// The response could not be decoded
    #[error("Malformed TSA response: {0}")]
    Malformed(String),
}

/// Failures that stop verification of a whole document.
///
/// Problems with a single signature never surface here; they are recorded
/// on that signature's report.
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    /// The input is not a PDF at all
    #[error("Not a readable PDF: {0}")]
    Unreadable(#[from] Error),
}

/// Failure of one task inside a batch.
#[derive(Debug, thiserror::Error)]
pub enum BatchTaskError {
    /// The task exceeded its time budget
    #[error("timeout")]
    Timeout,

    /// The signing pipeline failed for this document
    #[error("{0}")]
    Pipeline(#[from] PipelineError),

    /// The output sink rejected the signed document
    #[error("Output sink failed: {0}")]
    Sink(String),

    /// The worker running the task went away
    #[error("Worker terminated before reporting a result")]
    WorkerLost,
}

/// Error returned by the single-document signing operation.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Request is missing required data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Certificate loading failed
    #[error(transparent)]
    Certificate(#[from] CertificateError),

    /// Stamp rendering failed
    #[error(transparent)]
    Render(#[from] RenderError),

    /// Signing failed
    #[error(transparent)]
    Signing(#[from] SigningError),
}
