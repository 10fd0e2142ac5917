//! Single-document signing: certificate, stamp, signature.
//!
//! The stages run strictly in order on one thread. The stamp revision is
//! written first and the signature revision is appended on top of it, so the
//! signature covers the stamp.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::clock::{Clock, SystemClock};
use crate::document::PdfDocument;
use crate::error::{PipelineError, RenderError};
use crate::geometry::{CanvasSize, SignaturePlacement};
use crate::signatures::{CertificateLoader, SignOptions, SignatureEngine, TimestampProvider, DEFAULT_REASON};
use crate::stamp::{StampContent, StampRenderer, StampStyle};

/// Everything needed to sign one document.
#[derive(Clone)]
pub struct SigningRequest {
    /// Name of the submitted file, used to derive the output name
    pub source_name: String,
    /// The PDF to sign
    pub source_pdf: Vec<u8>,
    /// Signature image (PNG or JPEG)
    pub signature_image: Vec<u8>,
    /// PKCS#12 container with the signer's key and certificate
    pub pkcs12: Vec<u8>,
    /// Passphrase of the container
    pub passphrase: String,
    /// Stamp positions; the first one also carries the signature field
    pub placements: Vec<SignaturePlacement>,
    /// Coordinate space of the placements
    pub canvas: CanvasSize,
    /// `/Location` of the signature
    pub location: Option<String>,
    /// `/Reason` of the signature
    pub reason: Option<String>,
    /// Abbreviated signature without the text band
    pub initial: bool,
    /// Optional seal drawn behind the signature
    pub seal_image: Option<Vec<u8>>,
    /// Name shown in the stamp instead of the certificate CN
    pub signer_display_name: Option<String>,
}

impl std::fmt::Debug for SigningRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningRequest")
            .field("source_name", &self.source_name)
            .field("source_pdf", &format_args!("{} bytes", self.source_pdf.len()))
            .field("placements", &self.placements)
            .field("canvas", &self.canvas)
            .field("initial", &self.initial)
            .field("passphrase", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl SigningRequest {
    /// Request with the required inputs and defaults for everything else.
    pub fn new(
        source_name: impl Into<String>,
        source_pdf: Vec<u8>,
        signature_image: Vec<u8>,
        pkcs12: Vec<u8>,
        passphrase: impl Into<String>,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            source_pdf,
            signature_image,
            pkcs12,
            passphrase: passphrase.into(),
            placements: Vec::new(),
            canvas: CanvasSize::new(612.0, 792.0),
            location: None,
            reason: None,
            initial: false,
            seal_image: None,
            signer_display_name: None,
        }
    }

    /// Add a stamp position.
    pub fn with_placement(mut self, placement: SignaturePlacement) -> Self {
        self.placements.push(placement);
        self
    }

    /// Set the placement coordinate space.
    pub fn with_canvas(mut self, canvas: CanvasSize) -> Self {
        self.canvas = canvas;
        self
    }

    /// Set `/Location`.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Set `/Reason`.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Mark as an initial.
    pub fn with_initial(mut self, initial: bool) -> Self {
        self.initial = initial;
        self
    }

    /// Draw a seal behind the signature.
    pub fn with_seal(mut self, seal: Vec<u8>) -> Self {
        self.seal_image = Some(seal);
        self
    }

    /// Override the name shown in the stamp.
    pub fn with_signer_display_name(mut self, name: impl Into<String>) -> Self {
        self.signer_display_name = Some(name.into());
        self
    }

    fn validate(&self) -> Result<(), PipelineError> {
        if self.source_pdf.is_empty() {
            return Err(PipelineError::InvalidRequest("source PDF is empty".to_string()));
        }
        if self.signature_image.is_empty() {
            return Err(PipelineError::InvalidRequest("signature image is empty".to_string()));
        }
        if self.placements.is_empty() {
            return Err(PipelineError::InvalidRequest("at least one placement is required".to_string()));
        }
        Ok(())
    }
}

/// Result of a successful signing.
#[derive(Debug)]
pub struct SignedDocument {
    /// `<stem>_signed_<yyyyMMddHHmmss>.pdf`
    pub output_name: String,
    /// The signed file
    pub bytes: Vec<u8>,
    /// Pages that received a stamp
    pub pages_signed: Vec<u32>,
    /// Placements that were not drawn
    pub skipped_placements: Vec<RenderError>,
    /// Whether a timestamp token was embedded
    pub timestamped: bool,
    /// Subject DN of the signing certificate
    pub signer_identity: String,
    /// Name of the new signature field
    pub field_name: String,
}

/// Runs the stamp and signature stages for one document.
#[derive(Clone)]
pub struct SigningService {
    clock: Arc<dyn Clock>,
    loader: CertificateLoader,
    renderer: StampRenderer,
    engine: SignatureEngine,
    defaults: SignOptions,
    tsa: Option<Arc<dyn TimestampProvider>>,
}

impl Default for SigningService {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SigningService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningService")
            .field("style", self.renderer.style())
            .field("defaults", &self.defaults)
            .field("timestamping", &self.tsa.is_some())
            .finish_non_exhaustive()
    }
}

impl SigningService {
    /// Service on the system clock, default style, no timestamping.
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            loader: CertificateLoader::new(),
            renderer: StampRenderer::new(),
            engine: SignatureEngine::new(),
            defaults: SignOptions::default(),
            tsa: None,
        }
    }

    /// Use `clock` for certificate checks, stamp dates, signing times and output names.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.loader = self.loader.with_clock(Arc::clone(&clock));
        self.engine = self.engine.with_clock(Arc::clone(&clock));
        self.clock = clock;
        self
    }

    /// Stamp appearance.
    pub fn with_style(mut self, style: StampStyle) -> Self {
        self.renderer = self.renderer.with_style(style);
        self
    }

    /// Signature dictionary defaults (reason, location, reserved size).
    pub fn with_sign_options(mut self, options: SignOptions) -> Self {
        self.defaults = options;
        self
    }

    /// Request timestamps from `tsa`.
    pub fn with_timestamp_provider(mut self, tsa: Arc<dyn TimestampProvider>) -> Self {
        self.tsa = Some(tsa);
        self
    }

    /// Stamp and sign one document.
    pub fn sign(&self, request: SigningRequest) -> Result<SignedDocument, PipelineError> {
        request.validate()?;

        let bundle = self.loader.load(&request.pkcs12, &request.passphrase)?;
        let now = self.clock.now();
        let signer_name = request
            .signer_display_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| display_name(&bundle.subject_cn, &bundle.subject_dn));

        let preserve_existing = already_signed(&request.source_pdf);
        let content = StampContent {
            signer_name: signer_name.clone(),
            sign_date: now,
            seal_image: request.seal_image.clone(),
            signature_image: request.signature_image.clone(),
            initial: request.initial,
        };
        let rendered = self.renderer.render(
            &request.source_pdf,
            &request.placements,
            request.canvas,
            &content,
            preserve_existing,
        )?;

        // The field goes with the first placement that was actually drawn.
        let field_placement = request
            .placements
            .iter()
            .find(|p| rendered.pages_stamped.contains(&p.page))
            .ok_or(RenderError::NoValidPlacement)?;

        let mut options = self.defaults.clone().with_name(signer_name);
        options.reason = request
            .reason
            .clone()
            .or(options.reason)
            .or_else(|| Some(DEFAULT_REASON.to_string()));
        if let Some(location) = &request.location {
            options.location = Some(location.clone());
        }

        let signed = self
            .engine
            .sign(&rendered.bytes, &bundle, field_placement, &options, self.tsa.as_deref())?;

        let output_name = output_name(&request.source_name, now);
        log::info!(
            "Signed {} as {} ({} page(s) stamped, {} skipped, timestamped: {})",
            request.source_name,
            output_name,
            rendered.pages_stamped.len(),
            rendered.skipped.len(),
            signed.timestamped
        );

        Ok(SignedDocument {
            output_name,
            bytes: signed.bytes,
            pages_signed: rendered.pages_stamped,
            skipped_placements: rendered.skipped,
            timestamped: signed.timestamped,
            signer_identity: bundle.subject_dn.clone(),
            field_name: signed.field_name,
        })
    }
}

/// `<stem>_signed_<yyyyMMddHHmmss>.pdf`
pub fn output_name(source_name: &str, at: DateTime<Utc>) -> String {
    let stem = Path::new(source_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("document");
    format!("{}_signed_{}.pdf", stem, at.format("%Y%m%d%H%M%S"))
}

fn display_name(cn: &str, dn: &str) -> String {
    if cn.is_empty() {
        dn.to_string()
    } else {
        cn.to_string()
    }
}

fn already_signed(pdf: &[u8]) -> bool {
    PdfDocument::load(pdf)
        .and_then(|mut doc| doc.has_signatures())
        .unwrap_or(false)
}
