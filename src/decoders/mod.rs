//! Stream decoders needed to read document structure.
//!
//! Only the filters that appear on cross-reference streams, object streams
//! and page content are supported: FlateDecode (with PNG/TIFF predictors) and
//! ASCIIHexDecode. Image filters are never decoded because stamping only
//! appends new content.

use crate::error::{Error, Result};

mod ascii_hex;
mod flate;
mod predictor;

pub use ascii_hex::AsciiHexDecoder;
pub use flate::{flate_encode, FlateDecoder};
pub use predictor::{decode_predictor, DecodeParams};

/// Upper bound on decoded output; larger streams are treated as hostile.
const MAX_DECOMPRESSED_SIZE: usize = 100 * 1024 * 1024;

/// A single PDF filter.
pub trait StreamDecoder {
    /// Decode the input data.
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>>;

    /// Filter name as it appears in /Filter.
    fn name(&self) -> &str;
}

/// Decode stream data through a filter pipeline, then reverse any predictor.
pub fn decode_stream_with_params(
    data: &[u8],
    filters: &[String],
    params: Option<&DecodeParams>,
) -> Result<Vec<u8>> {
    let mut current = data.to_vec();

    for filter_name in filters {
        let decoder: Box<dyn StreamDecoder> = match filter_name.as_str() {
            "FlateDecode" | "Fl" => Box::new(FlateDecoder),
            "ASCIIHexDecode" | "AHx" => Box::new(AsciiHexDecoder),
            _ => return Err(Error::UnsupportedFilter(filter_name.clone())),
        };

        current = decoder.decode(&current)?;
        if current.len() > MAX_DECOMPRESSED_SIZE {
            return Err(Error::Decode(format!(
                "{} output of {} bytes exceeds limit of {} bytes",
                decoder.name(),
                current.len(),
                MAX_DECOMPRESSED_SIZE
            )));
        }
    }

    match params {
        Some(params) if params.predictor != 1 => decode_predictor(&current, params),
        _ => Ok(current),
    }
}
