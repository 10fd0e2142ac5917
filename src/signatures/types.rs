//! Signature options, algorithms and results.

use der::oid::ObjectIdentifier;
use serde::{Deserialize, Serialize};
use sha2::Digest;

/// Placeholder reserved for /Contents when no TSA is configured.
pub const DEFAULT_SIGNATURE_SIZE: usize = 8192;

/// Placeholder reserved for /Contents when a timestamp token will be embedded.
pub const DEFAULT_TIMESTAMPED_SIGNATURE_SIZE: usize = 16384;

/// Reason written into the signature dictionary when the caller gives none.
pub const DEFAULT_REASON: &str = "Digital Signature";

/// Digest algorithm named by a SignerInfo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestAlgorithm {
    /// SHA-1 (legacy signatures only)
    Sha1,
    /// SHA-256
    #[default]
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

impl DigestAlgorithm {
    const SHA1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.14.3.2.26");
    const SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1");
    const SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.2");
    const SHA512: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.3");

    /// Algorithm OID.
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            DigestAlgorithm::Sha1 => Self::SHA1,
            DigestAlgorithm::Sha256 => Self::SHA256,
            DigestAlgorithm::Sha384 => Self::SHA384,
            DigestAlgorithm::Sha512 => Self::SHA512,
        }
    }

    /// Look up an algorithm by OID.
    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        [Self::Sha1, Self::Sha256, Self::Sha384, Self::Sha512]
            .into_iter()
            .find(|alg| alg.oid() == *oid)
    }

    /// Get the name of this algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "SHA-1",
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha384 => "SHA-384",
            DigestAlgorithm::Sha512 => "SHA-512",
        }
    }

    /// Hash `parts` as one continuous message.
    pub fn digest(&self, parts: &[&[u8]]) -> Vec<u8> {
        fn run<D: Digest>(parts: &[&[u8]]) -> Vec<u8> {
            let mut hasher = D::new();
            for part in parts {
                hasher.update(*part);
            }
            hasher.finalize().to_vec()
        }

        match self {
            DigestAlgorithm::Sha1 => run::<sha1::Sha1>(parts),
            DigestAlgorithm::Sha256 => run::<sha2::Sha256>(parts),
            DigestAlgorithm::Sha384 => run::<sha2::Sha384>(parts),
            DigestAlgorithm::Sha512 => run::<sha2::Sha512>(parts),
        }
    }
}

/// Signature sub-filter type (signature format).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureSubFilter {
    /// adbe.pkcs7.detached - PKCS#7 detached signature
    #[default]
    Pkcs7Detached,
    /// adbe.pkcs7.sha1 - PKCS#7 with SHA-1 digest
    Pkcs7Sha1,
    /// ETSI.CAdES.detached - PAdES CAdES signature
    CadesDetached,
    /// ETSI.RFC3161 - document timestamp
    Rfc3161,
}

impl SignatureSubFilter {
    /// Get the PDF name for this sub-filter.
    pub fn as_pdf_name(&self) -> &'static str {
        match self {
            SignatureSubFilter::Pkcs7Detached => "adbe.pkcs7.detached",
            SignatureSubFilter::Pkcs7Sha1 => "adbe.pkcs7.sha1",
            SignatureSubFilter::CadesDetached => "ETSI.CAdES.detached",
            SignatureSubFilter::Rfc3161 => "ETSI.RFC3161",
        }
    }

    /// Parse a PDF name into a sub-filter type.
    pub fn from_pdf_name(name: &str) -> Option<Self> {
        match name {
            "adbe.pkcs7.detached" => Some(SignatureSubFilter::Pkcs7Detached),
            "adbe.pkcs7.sha1" => Some(SignatureSubFilter::Pkcs7Sha1),
            "ETSI.CAdES.detached" => Some(SignatureSubFilter::CadesDetached),
            "ETSI.RFC3161" => Some(SignatureSubFilter::Rfc3161),
            _ => None,
        }
    }
}

/// Options for signing a PDF.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SignOptions {
    /// Reason for signing
    pub reason: Option<String>,
    /// Location where the document was signed
    pub location: Option<String>,
    /// Contact information
    pub contact_info: Option<String>,
    /// Name of the signer (defaults to the certificate CN)
    pub name: Option<String>,
    /// Bytes reserved for the CMS blob; `None` picks a default based on
    /// whether a timestamp will be requested
    pub estimated_size: Option<usize>,
    /// Partial name of the new signature field; `None` generates `Signature<N>`
    pub field_name: Option<String>,
}

impl Default for SignOptions {
    fn default() -> Self {
        Self {
            reason: Some(DEFAULT_REASON.to_string()),
            location: None,
            contact_info: None,
            name: None,
            estimated_size: None,
            field_name: None,
        }
    }
}

impl SignOptions {
    /// Set the reason for signing.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Set the signing location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Set the contact information.
    pub fn with_contact_info(mut self, contact: impl Into<String>) -> Self {
        self.contact_info = Some(contact.into());
        self
    }

    /// Override the signer name written into /Name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Reserve a specific number of bytes for the CMS blob.
    pub fn with_estimated_size(mut self, size: usize) -> Self {
        self.estimated_size = Some(size);
        self
    }

    /// Use a specific signature field name.
    pub fn with_field_name(mut self, name: impl Into<String>) -> Self {
        self.field_name = Some(name.into());
        self
    }

    /// Bytes to reserve for the signature.
    pub fn reserved_size(&self, timestamped: bool) -> usize {
        self.estimated_size.unwrap_or(if timestamped {
            DEFAULT_TIMESTAMPED_SIGNATURE_SIZE
        } else {
            DEFAULT_SIGNATURE_SIZE
        })
    }
}

/// A signed document.
#[derive(Debug, Clone)]
pub struct SignedOutput {
    /// Complete signed file
    pub bytes: Vec<u8>,
    /// Byte range covered by the new signature
    pub byte_range: [i64; 4],
    /// Whether a timestamp token was embedded
    pub timestamped: bool,
    /// Fully qualified name of the new signature field
    pub field_name: String,
}
