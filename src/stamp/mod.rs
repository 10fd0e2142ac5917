//! Visual signature stamps.
//!
//! A stamp is drawn directly into page content: an optional translucent
//! seal in the background, the caller's signature image, and a text band
//! with the signer's name and the signing date. The result is always a new
//! incremental revision, so signatures already in the file are untouched.
//!
//! ```text
//! ┌──────────────────────────┐
//! │   (seal, 15% opacity)    │
//! │    signature image       │
//! ├──────────────────────────┤
//! │       Signer Name        │  text band, omitted for initials
//! │   2024-05-01 10:00:00    │
//! └──────────────────────────┘
//! ```

mod layout;
mod renderer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RenderError;

pub use layout::{StampLayout, TextLine};
pub use renderer::StampRenderer;

/// Default opacity of the seal watermark.
pub const DEFAULT_SEAL_OPACITY: f64 = 0.15;

/// What to draw in each placement.
#[derive(Debug, Clone)]
pub struct StampContent {
    /// Signer name shown in the text band
    pub signer_name: String,
    /// Date shown in the text band
    pub sign_date: DateTime<Utc>,
    /// Optional seal image (PNG or JPEG), drawn behind everything
    pub seal_image: Option<Vec<u8>>,
    /// Signature image (PNG or JPEG)
    pub signature_image: Vec<u8>,
    /// Abbreviated signature: no text band
    pub initial: bool,
}

impl StampContent {
    /// Content with a signature image and no seal.
    pub fn new(signer_name: impl Into<String>, sign_date: DateTime<Utc>, signature_image: Vec<u8>) -> Self {
        Self {
            signer_name: signer_name.into(),
            sign_date,
            seal_image: None,
            signature_image,
            initial: false,
        }
    }

    /// Draw `seal` behind the signature.
    pub fn with_seal(mut self, seal: Vec<u8>) -> Self {
        self.seal_image = Some(seal);
        self
    }

    /// Mark as an initial (abbreviated) signature.
    pub fn as_initial(mut self, initial: bool) -> Self {
        self.initial = initial;
        self
    }
}

/// Visual parameters of the stamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StampStyle {
    /// Seal opacity, 0.0 to 1.0
    pub seal_opacity: f64,
    /// Fraction of the stamp height reserved for the text band
    pub text_band_ratio: f64,
    /// Maximum font size in points; shrunk to fit the band
    pub font_size: f64,
    /// strftime pattern for the date line
    pub date_format: String,
}

impl Default for StampStyle {
    fn default() -> Self {
        Self {
            seal_opacity: DEFAULT_SEAL_OPACITY,
            text_band_ratio: 0.3,
            font_size: 10.0,
            date_format: "%Y-%m-%d %H:%M:%S".to_string(),
        }
    }
}

impl StampStyle {
    /// Set the seal opacity (clamped to 0..=1).
    pub fn with_seal_opacity(mut self, opacity: f64) -> Self {
        self.seal_opacity = opacity.clamp(0.0, 1.0);
        self
    }

    /// Set the text band height as a fraction of the stamp (clamped to 0..=0.9).
    pub fn with_text_band_ratio(mut self, ratio: f64) -> Self {
        self.text_band_ratio = ratio.clamp(0.0, 0.9);
        self
    }

    /// Set the maximum font size.
    pub fn with_font_size(mut self, size: f64) -> Self {
        self.font_size = size.max(1.0);
        self
    }
}

/// Result of stamping a document.
#[derive(Debug)]
pub struct RenderOutput {
    /// Source bytes plus the stamp revision
    pub bytes: Vec<u8>,
    /// Pages that received at least one stamp, ascending
    pub pages_stamped: Vec<u32>,
    /// Placements that were not drawn
    pub skipped: Vec<RenderError>,
}
