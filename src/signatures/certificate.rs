//! Signing credentials loaded from PKCS#12 containers.
//!
//! The container is opened with OpenSSL, which handles the many PBE schemes
//! found in real-world `.p12` files. The key and certificates then leave
//! OpenSSL as DER and everything downstream uses the RustCrypto stack.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use openssl::pkcs12::Pkcs12;
use openssl::pkey::Id;
use pkcs1::DecodeRsaPrivateKey;
use pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;
use x509_parser::prelude::{FromDer, X509Certificate, X509Name};

use crate::clock::{Clock, SystemClock};
use crate::error::CertificateError;
use crate::writer::hex_upper;

/// Identity fields read from one X.509 certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateSummary {
    /// Subject distinguished name
    pub subject_dn: String,
    /// Issuer distinguished name
    pub issuer_dn: String,
    /// Subject common name, empty when absent
    pub subject_cn: String,
    /// Issuer common name, empty when absent
    pub issuer_cn: String,
    /// Serial number as uppercase hex
    pub serial_number: String,
    /// Start of the validity window
    pub not_before: DateTime<Utc>,
    /// End of the validity window
    pub not_after: DateTime<Utc>,
}

impl CertificateSummary {
    /// Parse a DER certificate.
    pub fn from_der(der: &[u8]) -> Result<Self, CertificateError> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| CertificateError::MalformedCertificate(e.to_string()))?;

        let validity = cert.validity();
        Ok(Self {
            subject_dn: cert.subject().to_string(),
            issuer_dn: cert.issuer().to_string(),
            subject_cn: common_name(cert.subject()),
            issuer_cn: common_name(cert.issuer()),
            serial_number: serial_hex(cert.raw_serial()),
            not_before: to_utc(validity.not_before.timestamp())?,
            not_after: to_utc(validity.not_after.timestamp())?,
        })
    }

    /// Issuer and subject are the same name.
    pub fn is_self_signed(&self) -> bool {
        self.issuer_dn == self.subject_dn
    }

    /// True when `at` lies inside `[not_before, not_after]`.
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.not_before <= at && at <= self.not_after
    }
}

fn common_name(name: &X509Name<'_>) -> String {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn serial_hex(raw: &[u8]) -> String {
    let trimmed = match raw.iter().position(|&b| b != 0) {
        Some(first) => &raw[first..],
        None => return "0".to_string(),
    };
    hex_upper(trimmed)
}

fn to_utc(seconds: i64) -> Result<DateTime<Utc>, CertificateError> {
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| CertificateError::MalformedCertificate(format!("validity time {} out of range", seconds)))
}

/// An RSA private key with its certificate chain (leaf first).
///
/// Loaded fresh for every signing operation and never cached or cloned.
pub struct CertificateBundle {
    private_key: RsaPrivateKey,
    /// DER certificates, leaf first
    pub certificate_chain: Vec<Vec<u8>>,
    /// Start of the leaf's validity window
    pub not_before: DateTime<Utc>,
    /// End of the leaf's validity window
    pub not_after: DateTime<Utc>,
    /// Leaf subject distinguished name
    pub subject_dn: String,
    /// Leaf issuer distinguished name
    pub issuer_dn: String,
    /// Leaf subject common name
    pub subject_cn: String,
    /// Leaf issuer common name
    pub issuer_cn: String,
    /// Leaf serial number (uppercase hex)
    pub serial_number: String,
    /// Issuer DN equals subject DN
    pub is_self_signed: bool,
}

impl CertificateBundle {
    /// Assemble a bundle from a key and a DER chain (leaf first).
    pub fn from_parts(
        private_key: RsaPrivateKey,
        certificate_chain: Vec<Vec<u8>>,
    ) -> Result<Self, CertificateError> {
        let leaf = certificate_chain.first().ok_or(CertificateError::NoCertificate)?;
        let summary = CertificateSummary::from_der(leaf)?;
        let is_self_signed = summary.is_self_signed();

        Ok(Self {
            private_key,
            certificate_chain,
            not_before: summary.not_before,
            not_after: summary.not_after,
            subject_dn: summary.subject_dn,
            issuer_dn: summary.issuer_dn,
            subject_cn: summary.subject_cn,
            issuer_cn: summary.issuer_cn,
            serial_number: summary.serial_number,
            is_self_signed,
        })
    }

    /// The signing key.
    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    /// DER of the signer certificate.
    pub fn leaf_certificate(&self) -> &[u8] {
        // from_parts guarantees a non-empty chain
        &self.certificate_chain[0]
    }

    /// True when `at` lies inside the leaf's validity window.
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.not_before <= at && at <= self.not_after
    }
}

impl std::fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("private_key", &"[REDACTED]")
            .field("certificate_chain", &format!("{} certificates", self.certificate_chain.len()))
            .field("subject_dn", &self.subject_dn)
            .field("issuer_dn", &self.issuer_dn)
            .field("serial_number", &self.serial_number)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .finish()
    }
}

/// Opens PKCS#12 containers and checks the certificate against a clock.
#[derive(Clone)]
pub struct CertificateLoader {
    clock: Arc<dyn Clock>,
}

impl Default for CertificateLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CertificateLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateLoader").finish_non_exhaustive()
    }
}

impl CertificateLoader {
    /// Loader using the system clock.
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock),
        }
    }

    /// Use a different time source for the validity check.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Decrypt `pkcs12` and build a bundle valid at the current time.
    pub fn load(&self, pkcs12: &[u8], passphrase: &str) -> Result<CertificateBundle, CertificateError> {
        let parsed = Pkcs12::from_der(pkcs12)
            .and_then(|container| container.parse2(passphrase))
            .map_err(|e| {
                log::debug!("PKCS#12 open failed: {}", e);
                CertificateError::BadPassphrase
            })?;

        let pkey = parsed.pkey.ok_or(CertificateError::NoKeyEntry)?;
        let cert = parsed.cert.ok_or(CertificateError::NoCertificate)?;

        if pkey.id() != Id::RSA {
            return Err(CertificateError::UnsupportedKey(format!("{:?} keys cannot sign", pkey.id())));
        }
        let key_der = pkey
            .private_key_to_der()
            .map_err(|e| CertificateError::UnsupportedKey(e.to_string()))?;
        let private_key = RsaPrivateKey::from_pkcs8_der(&key_der)
            .or_else(|_| RsaPrivateKey::from_pkcs1_der(&key_der))
            .map_err(|e| CertificateError::UnsupportedKey(e.to_string()))?;

        let leaf = cert
            .to_der()
            .map_err(|e| CertificateError::MalformedCertificate(e.to_string()))?;
        let mut chain = vec![leaf];
        if let Some(ca) = parsed.ca {
            for extra in ca.iter() {
                let der = extra
                    .to_der()
                    .map_err(|e| CertificateError::MalformedCertificate(e.to_string()))?;
                if !chain.contains(&der) {
                    chain.push(der);
                }
            }
        }

        let bundle = CertificateBundle::from_parts(private_key, chain)?;
        let now = self.clock.now();
        if !bundle.is_valid_at(now) {
            return Err(CertificateError::ExpiredOrNotYetValid {
                not_before: bundle.not_before,
                not_after: bundle.not_after,
            });
        }

        log::debug!(
            "Loaded certificate {} (serial {}, {} in chain)",
            bundle.subject_dn,
            bundle.serial_number,
            bundle.certificate_chain.len()
        );
        Ok(bundle)
    }
}
