//! PDF signature verification.
//!
//! Every signature field with a value is checked independently. Signatures
//! are reported in append order (ascending end of their byte range), which
//! is also the order in which the revisions were written.
//!
//! Only the last signature is expected to cover the whole file. For earlier
//! signatures, the later revisions legitimately extend the file, so their
//! document integrity is exactly their own cryptographic integrity.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::document::{decode_text_string, PdfDocument};
use crate::error::VerificationError;
use crate::object::{Dict, Object};
use crate::signatures::byterange::ByteRangeCalculator;
use crate::signatures::certificate::CertificateSummary;
use crate::signatures::cms::{parse_signed_data, verify_rsa, ParsedSignature};
use crate::signatures::timestamp::{token_covers, token_time};

/// Outcome of checking one signature.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureReport {
    /// Position in append order, starting at 0
    pub index: usize,
    /// Fully qualified field name
    pub field_name: String,
    /// `/ByteRange` of the signature (zeros when unreadable)
    pub byte_range: [i64; 4],
    /// Signing time used for the certificate check
    pub sign_date: Option<DateTime<Utc>>,
    /// Signer subject distinguished name
    pub signer_subject_dn: Option<String>,
    /// Signer common name
    pub signer_cn: Option<String>,
    /// Issuer distinguished name
    pub issuer_dn: Option<String>,
    /// Issuer common name
    pub issuer_cn: Option<String>,
    /// Signer serial number (hex)
    pub serial_number: Option<String>,
    /// Certificates embedded in the CMS blob
    pub certificate_chain_length: usize,
    /// Signer certificate issuer equals subject
    pub is_self_signed: bool,
    /// A timestamp token is attached
    pub has_timestamp: bool,
    /// genTime of the timestamp token
    pub timestamp_time: Option<DateTime<Utc>>,
    /// This is the newest signature
    pub is_last_signature: bool,
    /// Byte range starts at 0 and ends at the end of the file
    pub covers_whole_document: bool,
    /// Message digest and RSA signature both check out
    pub signature_integrity: bool,
    /// No tampering relevant to this signature
    pub document_integrity_valid: bool,
    /// Signer certificate was inside its validity window at `sign_date`
    pub certificate_valid_at_signing_time: bool,
    /// `/Reason`
    pub reason: Option<String>,
    /// `/Location`
    pub location: Option<String>,
    /// `/SubFilter`
    pub sub_filter: Option<String>,
    /// All three checks passed
    pub valid: bool,
    /// Problems, most severe first
    pub issues: Vec<String>,
}

/// Verification result for a whole file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    /// Number of signatures found
    pub signature_count: usize,
    /// Every signature is valid (true when there are none)
    pub all_valid: bool,
    /// Size of the verified file in bytes
    pub file_size: usize,
    /// Per-signature results in append order
    pub signatures: Vec<SignatureReport>,
}

impl VerificationReport {
    /// Pretty-printed camelCase JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// A signature field found in the document.
struct FoundSignature {
    field_name: String,
    dict: Result<Dict, String>,
    byte_range: Option<[i64; 4]>,
}

/// Verifier for PDF digital signatures.
#[derive(Debug, Clone, Default)]
pub struct SignatureVerifier;

impl SignatureVerifier {
    /// Create a new signature verifier.
    pub fn new() -> Self {
        Self
    }

    /// Verify every signature in `pdf_data`.
    ///
    /// Only input that is not a PDF at all is an error; anything wrong with
    /// an individual signature is recorded on its report.
    pub fn verify(&self, pdf_data: &[u8]) -> Result<VerificationReport, VerificationError> {
        let mut doc = PdfDocument::load(pdf_data)?;
        let mut found = collect_signatures(&mut doc);
        found.sort_by_key(|sig| sig.byte_range.map(|r| r[2].saturating_add(r[3])).unwrap_or(i64::MAX));

        let count = found.len();
        let signatures: Vec<SignatureReport> = found
            .into_iter()
            .enumerate()
            .map(|(index, sig)| self.check(pdf_data, index, index + 1 == count, sig))
            .collect();

        let all_valid = signatures.iter().all(|s| s.valid);
        log::info!(
            "Verified {} signature(s) in {} bytes: {}",
            count,
            pdf_data.len(),
            if all_valid { "all valid" } else { "problems found" }
        );

        Ok(VerificationReport {
            signature_count: count,
            all_valid,
            file_size: pdf_data.len(),
            signatures,
        })
    }

    fn check(&self, pdf_data: &[u8], index: usize, is_last: bool, sig: FoundSignature) -> SignatureReport {
        let mut report = SignatureReport {
            index,
            field_name: sig.field_name,
            is_last_signature: is_last,
            ..SignatureReport::default()
        };

        let dict = match sig.dict {
            Ok(dict) => dict,
            Err(reason) => {
                log::warn!("Malformed signature '{}': {}", report.field_name, reason);
                report.issues.push(format!("Malformed signature dictionary: {}", reason));
                return report;
            },
        };

        let text = |key: &str| dict.get(key).and_then(|o| o.as_string()).map(decode_text_string);
        report.reason = text("Reason");
        report.location = text("Location");
        report.sub_filter = dict.get("SubFilter").and_then(|o| o.as_name()).map(str::to_string);
        let pdf_time = text("M").and_then(|m| parse_pdf_date(&m));

        let Some(byte_range) = sig.byte_range else {
            report.issues.push("Signature has no valid /ByteRange".to_string());
            return report;
        };
        report.byte_range = byte_range;
        report.covers_whole_document = ByteRangeCalculator::covers_whole_file(&byte_range, pdf_data.len());

        let parsed = dict
            .get("Contents")
            .and_then(|o| o.as_string())
            .ok_or_else(|| "Signature has no /Contents".to_string())
            .and_then(parse_signed_data);

        let mut cert_issue = None;
        match parsed {
            Ok(parsed) => {
                match check_integrity(pdf_data, &byte_range, &parsed) {
                    Ok(()) => report.signature_integrity = true,
                    Err(reason) => report.issues.push(format!("Signature integrity check failed: {}", reason)),
                }

                report.certificate_chain_length = parsed.certificates.len();
                report.has_timestamp = parsed.timestamp_token.is_some();
                report.timestamp_time = parsed.timestamp_token.as_deref().and_then(token_time);
                let timestamped_at = match parsed.timestamp_token.as_deref() {
                    Some(token) if token_covers(token, &parsed.signature) => report.timestamp_time,
                    Some(_) => {
                        log::warn!("Timestamp in '{}' was issued for a different signature", report.field_name);
                        report
                            .issues
                            .push("Timestamp token does not match this signature; its time is ignored".to_string());
                        None
                    },
                    None => None,
                };
                report.sign_date = timestamped_at.or(parsed.signing_time).or(pdf_time);

                match parsed.signer_certificate().map(CertificateSummary::from_der) {
                    Some(Ok(summary)) => {
                        report.signer_subject_dn = Some(summary.subject_dn.clone());
                        report.signer_cn = Some(summary.subject_cn.clone());
                        report.issuer_dn = Some(summary.issuer_dn.clone());
                        report.issuer_cn = Some(summary.issuer_cn.clone());
                        report.serial_number = Some(summary.serial_number.clone());
                        report.is_self_signed = summary.is_self_signed();
                        match report.sign_date {
                            Some(at) if summary.is_valid_at(at) => report.certificate_valid_at_signing_time = true,
                            Some(at) => {
                                cert_issue = Some(format!(
                                    "Certificate was not valid at signing time {} (valid {} to {})",
                                    at.to_rfc3339(),
                                    summary.not_before.to_rfc3339(),
                                    summary.not_after.to_rfc3339()
                                ))
                            },
                            None => cert_issue = Some("Signing time could not be determined".to_string()),
                        }
                    },
                    Some(Err(e)) => cert_issue = Some(format!("Signer certificate unreadable: {}", e)),
                    None => cert_issue = Some("No signer certificate embedded".to_string()),
                }
            },
            Err(reason) => {
                log::warn!("Unreadable CMS in '{}': {}", report.field_name, reason);
                report.issues.push(format!("Signature integrity check failed: {}", reason));
                report.sign_date = pdf_time;
                cert_issue = Some("Signer certificate unavailable".to_string());
            },
        }

        report.document_integrity_valid = if is_last {
            report.covers_whole_document
        } else {
            report.signature_integrity
        };
        if !report.document_integrity_valid {
            report.issues.push(if is_last {
                "Document has been modified after this signature was applied".to_string()
            } else {
                "Revision covered by this signature has been altered".to_string()
            });
        }
        report.issues.extend(cert_issue);

        report.valid =
            report.signature_integrity && report.document_integrity_valid && report.certificate_valid_at_signing_time;
        report
    }
}

/// Digest over the byte range, then the RSA signature.
fn check_integrity(pdf_data: &[u8], byte_range: &[i64; 4], parsed: &ParsedSignature) -> Result<(), String> {
    let (first, second) = ByteRangeCalculator::signed_slices(pdf_data, byte_range).map_err(|e| e.to_string())?;
    let algorithm = parsed
        .digest_algorithm
        .ok_or_else(|| format!("unsupported digest algorithm {}", parsed.digest_oid))?;
    let certificate = parsed
        .signer_certificate()
        .ok_or_else(|| "no signer certificate embedded".to_string())?;

    match &parsed.signed_attrs_der {
        Some(signed_attrs) => {
            let computed = algorithm.digest(&[first, second]);
            if parsed.message_digest.as_deref() != Some(computed.as_slice()) {
                return Err("message digest does not match the signed bytes".to_string());
            }
            verify_rsa(certificate, algorithm, signed_attrs, &parsed.signature)
        },
        None => {
            let mut content = Vec::with_capacity(first.len() + second.len());
            content.extend_from_slice(first);
            content.extend_from_slice(second);
            verify_rsa(certificate, algorithm, &content, &parsed.signature)
        },
    }
}

/// Signature fields that carry a value.
fn collect_signatures(doc: &mut PdfDocument<'_>) -> Vec<FoundSignature> {
    let fields = match doc.form_fields() {
        Ok(fields) => fields,
        Err(e) => {
            log::warn!("Form fields unreadable, no signatures reported: {}", e);
            return Vec::new();
        },
    };

    fields
        .into_iter()
        .filter(|f| f.field_type.as_deref() == Some("Sig"))
        .filter_map(|field| {
            let value = field.dict.get("V")?.clone();
            let dict = doc
                .resolve(&value)
                .map_err(|e| e.to_string())
                .and_then(|obj| match obj {
                    Object::Dictionary(d) => Ok(d),
                    other => Err(format!("/V is a {}", other.type_name())),
                });
            let byte_range = dict.as_ref().ok().and_then(|d| read_byte_range(&mut *doc, d));
            Some(FoundSignature {
                field_name: field.full_name,
                dict,
                byte_range,
            })
        })
        .collect()
}

fn read_byte_range(doc: &mut PdfDocument<'_>, dict: &Dict) -> Option<[i64; 4]> {
    let array = doc.resolve(dict.get("ByteRange")?).ok()?;
    let values: Vec<i64> = array.as_array()?.iter().filter_map(|o| o.as_integer()).collect();
    <[i64; 4]>::try_from(values).ok()
}

/// Parse `D:YYYYMMDDHHmmSSOHH'mm'`; missing trailing parts default.
pub fn parse_pdf_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    let digits = value.strip_prefix("D:").unwrap_or(value);
    let field = |start: usize, len: usize, default: u32| -> Option<u32> {
        match digits.get(start..start + len) {
            Some(s) if s.bytes().all(|b| b.is_ascii_digit()) => s.parse().ok(),
            Some(_) => None,
            None => Some(default),
        }
    };

    let year = field(0, 4, 0).filter(|_| digits.len() >= 4)? as i32;
    let month = field(4, 2, 1)?;
    let day = field(6, 2, 1)?;
    let hour = field(8, 2, 0)?;
    let minute = field(10, 2, 0)?;
    let second = field(12, 2, 0)?;
    let local = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)?;

    let zone = digits.get(14..).unwrap_or("");
    let offset_secs = match zone.chars().next() {
        Some(sign @ ('+' | '-')) => {
            let rest: String = zone[1..].chars().filter(|c| c.is_ascii_digit()).collect();
            let hours: i64 = rest.get(0..2)?.parse().ok()?;
            let minutes: i64 = rest.get(2..4).and_then(|m| m.parse().ok()).unwrap_or(0);
            let total = hours * 3600 + minutes * 60;
            if sign == '+' {
                total
            } else {
                -total
            }
        },
        _ => 0,
    };

    Some(Utc.from_utc_datetime(&local) - chrono::Duration::seconds(offset_secs))
}
