//! Service configuration.
//!
//! Every section has working defaults, so an empty JSON object is a valid
//! configuration. The timestamp section is validated by [`SealConfig::validate`]
//! before anything is signed.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::batch::BatchConfig;
use crate::error::{Error, Result, TimestampError};
use crate::pipeline::SigningService;
use crate::signatures::{SignOptions, TsaConfig};
use crate::stamp::StampStyle;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SealConfig {
    /// Signature dictionary defaults
    pub signing: SignOptions,
    /// Timestamp authority
    pub tsa: TsaConfig,
    /// Batch worker settings
    pub batch: BatchConfig,
    /// Stamp appearance
    pub stamp: StampStyle,
}

impl SealConfig {
    /// Parse JSON; missing sections and fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }

    /// Read and parse a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Check the timestamp profile without contacting the TSA.
    pub fn validate(&self) -> std::result::Result<(), TimestampError> {
        self.tsa.resolve().map(|_| ())
    }

    /// A signing service configured from these settings.
    pub fn signing_service(&self) -> std::result::Result<SigningService, TimestampError> {
        let service = SigningService::new()
            .with_sign_options(self.signing.clone())
            .with_style(self.stamp.clone());
        Ok(match self.tsa.resolve()? {
            Some(client) => {
                log::debug!("Timestamping via {}", client.url());
                service.with_timestamp_provider(Arc::new(client))
            },
            None => service,
        })
    }
}
