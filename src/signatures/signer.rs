//! Applying a detached CMS signature as an incremental revision.
//!
//! The revision adds a signature dictionary, an invisible widget on the
//! placement's page, the page's updated `/Annots` and an AcroForm with
//! `/SigFlags 3`. The `/ByteRange` and `/Contents` values are fixed-width
//! slots that are patched in place after the file is assembled.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::clock::{Clock, SystemClock};
use crate::document::PdfDocument;
use crate::error::SigningError;
use crate::geometry::{Rect, SignaturePlacement};
use crate::object::{Dict, Object, ObjectRef};
use crate::signatures::byterange::ByteRangeCalculator;
use crate::signatures::certificate::CertificateBundle;
use crate::signatures::cms::DetachedSignature;
use crate::signatures::timestamp::TimestampProvider;
use crate::signatures::types::{DigestAlgorithm, SignOptions, SignatureSubFilter, SignedOutput};
use crate::writer::{IncrementalUpdate, ObjectSerializer};

/// Print + Locked annotation flags.
const WIDGET_FLAGS: i64 = 132;

/// SignaturesExist + AppendOnly.
const SIG_FLAGS: i64 = 3;

/// Signs documents with a certificate bundle.
#[derive(Clone)]
pub struct SignatureEngine {
    clock: Arc<dyn Clock>,
}

impl Default for SignatureEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SignatureEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureEngine").finish_non_exhaustive()
    }
}

impl SignatureEngine {
    /// Engine stamping signatures with the system time.
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock),
        }
    }

    /// Use a different time source for `/M` and the signingTime attribute.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Append a signature revision to `source`.
    ///
    /// The field goes on `placement.page`. A timestamp is requested when a
    /// provider is given; failing to get one is logged and the signature is
    /// kept without it.
    pub fn sign(
        &self,
        source: &[u8],
        bundle: &CertificateBundle,
        placement: &SignaturePlacement,
        options: &SignOptions,
        tsa: Option<&dyn TimestampProvider>,
    ) -> Result<SignedOutput, SigningError> {
        ensure_key_matches(bundle)?;

        let mut doc = PdfDocument::load(source)?;
        let signing_time = self.clock.now();
        let calc = ByteRangeCalculator::new(options.reserved_size(tsa.is_some()));

        let (mut revision, field_name, sig_ref) = prepare_revision(&mut doc, bundle, placement, options, &calc, signing_time)?;

        let span = revision
            .object_spans
            .get(&sig_ref.id)
            .cloned()
            .ok_or_else(|| SigningError::WriteFailure("signature dictionary was not written".to_string()))?;
        let contents_offset = ByteRangeCalculator::find_contents_offset(&revision.bytes, span.start)
            .ok_or_else(|| SigningError::WriteFailure("/Contents placeholder not found".to_string()))?;
        let byte_range_offset = ByteRangeCalculator::find_byte_range_offset(&revision.bytes, span.start)
            .ok_or_else(|| SigningError::WriteFailure("/ByteRange placeholder not found".to_string()))?;

        let byte_range = calc.calculate_byte_range(revision.bytes.len(), contents_offset);
        ByteRangeCalculator::patch_byte_range(&mut revision.bytes, byte_range_offset, &byte_range)
            .map_err(|e| SigningError::WriteFailure(e.to_string()))?;

        let (first, second) = ByteRangeCalculator::signed_slices(&revision.bytes, &byte_range)
            .map_err(|e| SigningError::WriteFailure(e.to_string()))?;
        let digest = DigestAlgorithm::Sha256.digest(&[first, second]);

        let mut signature = DetachedSignature::sign(bundle, &digest, signing_time)?;
        let timestamped = match tsa {
            Some(provider) => attach_timestamp(&mut signature, provider),
            None => false,
        };

        let cms_der = signature.to_der()?;
        calc.insert_signature(&mut revision.bytes, contents_offset, &cms_der)?;

        log::info!(
            "Signed field '{}' as {} ({} byte CMS{})",
            field_name,
            bundle.subject_cn,
            cms_der.len(),
            if timestamped { ", timestamped" } else { "" }
        );

        Ok(SignedOutput {
            bytes: revision.bytes,
            byte_range,
            timestamped,
            field_name,
        })
    }
}

/// Request a token over the signature value; any failure leaves the signature untimestamped.
fn attach_timestamp(signature: &mut DetachedSignature, provider: &dyn TimestampProvider) -> bool {
    let imprint = DigestAlgorithm::Sha256.digest(&[signature.signature_value()]);
    match provider.timestamp(&imprint) {
        Ok(token) => match signature.add_timestamp_token(&token) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Timestamp token could not be embedded: {}", e);
                false
            },
        },
        Err(e) => {
            log::warn!("Timestamp request failed, signing without timestamp: {}", e);
            false
        },
    }
}

/// The leaf certificate must carry the public half of the bundle's key.
fn ensure_key_matches(bundle: &CertificateBundle) -> Result<(), SigningError> {
    let (_, cert) =
        X509Certificate::from_der(bundle.leaf_certificate()).map_err(|_| SigningError::NoPrivateKey)?;
    let public_key = RsaPublicKey::from_public_key_der(cert.public_key().raw).map_err(|_| SigningError::NoPrivateKey)?;
    if public_key != bundle.private_key().to_public_key() {
        return Err(SigningError::NoPrivateKey);
    }
    Ok(())
}

/// Build and write every object of the signature revision with placeholders.
fn prepare_revision(
    doc: &mut PdfDocument<'_>,
    bundle: &CertificateBundle,
    placement: &SignaturePlacement,
    options: &SignOptions,
    calc: &ByteRangeCalculator,
    signing_time: DateTime<Utc>,
) -> Result<(crate::writer::WrittenRevision, String, ObjectRef), SigningError> {
    let pages = doc.pages()?;
    let page_count = pages.len() as u32;
    let page = placement
        .page
        .checked_sub(1)
        .and_then(|i| pages.get(i as usize))
        .ok_or(SigningError::InvalidPage {
            page: placement.page,
            page_count,
        })?;

    let existing = doc.form_fields()?;
    let field_name = unique_field_name(options.field_name.as_deref(), &existing);

    let mut update = IncrementalUpdate::new(doc);
    let sig_ref = update.allocate();
    let widget_ref = update.allocate();
    let appearance_ref = update.allocate();

    let signer_name = options.name.clone().unwrap_or_else(|| bundle.subject_cn.clone());
    update.set_raw(sig_ref, signature_dictionary(options, &signer_name, calc, signing_time));

    let origin = Rect::new(page.media_box.x, page.media_box.y, 1.0, 1.0);
    let mut appearance = Dict::new();
    appearance.insert("Type".to_string(), Object::name("XObject"));
    appearance.insert("Subtype".to_string(), Object::name("Form"));
    appearance.insert("BBox".to_string(), Rect::new(0.0, 0.0, 1.0, 1.0).to_pdf_array());
    update.set_object(
        appearance_ref,
        Object::Stream {
            dict: appearance,
            data: bytes::Bytes::new(),
        },
    );

    let mut widget = Dict::new();
    widget.insert("Type".to_string(), Object::name("Annot"));
    widget.insert("Subtype".to_string(), Object::name("Widget"));
    widget.insert("FT".to_string(), Object::name("Sig"));
    widget.insert("T".to_string(), Object::text(&field_name));
    widget.insert("V".to_string(), Object::Reference(sig_ref));
    widget.insert("Rect".to_string(), origin.to_pdf_array());
    widget.insert("F".to_string(), Object::Integer(WIDGET_FLAGS));
    widget.insert("P".to_string(), Object::Reference(page.object_ref));
    let mut ap = Dict::new();
    ap.insert("N".to_string(), Object::Reference(appearance_ref));
    widget.insert("AP".to_string(), Object::Dictionary(ap));
    update.set_object(widget_ref, Object::Dictionary(widget));

    add_to_array(doc, &mut update, page.object_ref, "Annots", widget_ref)?;
    register_field(doc, &mut update, widget_ref)?;

    log::debug!(
        "Signature field '{}' on page {} (sig {}, widget {})",
        field_name,
        page.number,
        sig_ref,
        widget_ref
    );

    let written = update
        .write()
        .map_err(|e| SigningError::WriteFailure(e.to_string()))?;
    Ok((written, field_name, sig_ref))
}

/// Raw signature dictionary with fixed-width `/ByteRange` and `/Contents` slots.
fn signature_dictionary(
    options: &SignOptions,
    signer_name: &str,
    calc: &ByteRangeCalculator,
    signing_time: DateTime<Utc>,
) -> Vec<u8> {
    let serializer = ObjectSerializer::compact();
    let text = |value: &str| serializer.serialize(&Object::text(value));

    let mut dict = Vec::with_capacity(calc.placeholder_size() + 512);
    dict.extend_from_slice(b"<<\n/Type /Sig\n/Filter /Adobe.PPKLite\n");
    dict.extend_from_slice(format!("/SubFilter /{}\n", SignatureSubFilter::Pkcs7Detached.as_pdf_name()).as_bytes());
    dict.extend_from_slice(format!("/ByteRange {}\n", ByteRangeCalculator::byte_range_placeholder()).as_bytes());
    dict.extend_from_slice(b"/Contents ");
    dict.extend_from_slice(calc.generate_placeholder().as_bytes());
    dict.extend_from_slice(b"\n/M ");
    dict.extend_from_slice(&text(&format_pdf_date(signing_time)));
    for (key, value) in [
        ("Name", Some(signer_name)),
        ("Reason", options.reason.as_deref()),
        ("Location", options.location.as_deref()),
        ("ContactInfo", options.contact_info.as_deref()),
    ] {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            dict.extend_from_slice(format!("\n/{} ", key).as_bytes());
            dict.extend_from_slice(&text(value));
        }
    }
    dict.extend_from_slice(b"\n>>");
    dict
}

/// `D:YYYYMMDDHHmmSS+00'00'`
pub fn format_pdf_date(at: DateTime<Utc>) -> String {
    at.format("D:%Y%m%d%H%M%S+00'00'").to_string()
}

fn unique_field_name(requested: Option<&str>, existing: &[crate::document::FormField]) -> String {
    let taken: HashSet<&str> = existing.iter().map(|f| f.full_name.as_str()).collect();
    if let Some(name) = requested.filter(|n| !n.is_empty() && !taken.contains(n)) {
        return name.to_string();
    }
    let base = requested.filter(|n| !n.is_empty()).unwrap_or("Signature");
    let signature_count = existing
        .iter()
        .filter(|f| f.field_type.as_deref() == Some("Sig"))
        .count();
    (signature_count + 1..)
        .map(|n| format!("{}{}", base, n))
        .find(|candidate| !taken.contains(candidate.as_str()))
        .unwrap_or_else(|| base.to_string())
}

/// Append `item` to the array `key` of the dictionary at `owner`, writing
/// whichever object actually holds the array.
fn add_to_array(
    doc: &mut PdfDocument<'_>,
    update: &mut IncrementalUpdate<'_>,
    owner: ObjectRef,
    key: &str,
    item: ObjectRef,
) -> Result<(), SigningError> {
    let mut dict = doc.resolve_dict(&Object::Reference(owner))?;
    match dict.get(key).cloned() {
        Some(Object::Reference(array_ref)) => {
            let mut items = match doc.load_object(array_ref)? {
                Object::Array(items) => items,
                _ => Vec::new(),
            };
            items.push(Object::Reference(item));
            update.set_object(array_ref, Object::Array(items));
        },
        Some(Object::Array(mut items)) => {
            items.push(Object::Reference(item));
            dict.insert(key.to_string(), Object::Array(items));
            update.set_object(owner, Object::Dictionary(dict));
        },
        _ => {
            dict.insert(key.to_string(), Object::Array(vec![Object::Reference(item)]));
            update.set_object(owner, Object::Dictionary(dict));
        },
    }
    Ok(())
}

/// Add the field to `/AcroForm /Fields` and set `/SigFlags`, creating the form if needed.
fn register_field(
    doc: &mut PdfDocument<'_>,
    update: &mut IncrementalUpdate<'_>,
    field_ref: ObjectRef,
) -> Result<(), SigningError> {
    let catalog_ref = doc.catalog_ref()?;
    let mut catalog = doc.catalog()?;

    match catalog.get("AcroForm").cloned() {
        Some(Object::Reference(form_ref)) => {
            let mut form = doc.resolve_dict(&Object::Reference(form_ref))?;
            append_field(doc, update, &mut form, field_ref)?;
            update.set_object(form_ref, Object::Dictionary(form));
        },
        Some(Object::Dictionary(mut form)) => {
            append_field(doc, update, &mut form, field_ref)?;
            catalog.insert("AcroForm".to_string(), Object::Dictionary(form));
            update.set_object(catalog_ref, Object::Dictionary(catalog));
        },
        _ => {
            let form_ref = update.allocate();
            let mut form = Dict::new();
            append_field(doc, update, &mut form, field_ref)?;
            update.set_object(form_ref, Object::Dictionary(form));
            catalog.insert("AcroForm".to_string(), Object::Reference(form_ref));
            update.set_object(catalog_ref, Object::Dictionary(catalog));
        },
    }
    Ok(())
}

/// Append to the form's `/Fields` (in place or in its indirect array) and set `/SigFlags`.
fn append_field(
    doc: &mut PdfDocument<'_>,
    update: &mut IncrementalUpdate<'_>,
    form: &mut Dict,
    field_ref: ObjectRef,
) -> Result<(), SigningError> {
    let entry = Object::Reference(field_ref);
    match form.get("Fields").cloned() {
        Some(Object::Reference(fields_ref)) => {
            let mut fields = match doc.load_object(fields_ref)? {
                Object::Array(items) => items,
                _ => Vec::new(),
            };
            fields.push(entry);
            update.set_object(fields_ref, Object::Array(fields));
        },
        Some(Object::Array(mut fields)) => {
            fields.push(entry);
            form.insert("Fields".to_string(), Object::Array(fields));
        },
        _ => {
            form.insert("Fields".to_string(), Object::Array(vec![entry]));
        },
    }
    form.insert("SigFlags".to_string(), Object::Integer(SIG_FLAGS));
    Ok(())
}
