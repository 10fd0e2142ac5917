//! ASCIIHexDecode.
//!
//! Whitespace is ignored, `>` terminates, and an odd trailing digit is padded
//! with an implicit `0`.

use crate::decoders::StreamDecoder;
use crate::error::{Error, Result};

/// ASCIIHexDecode filter implementation.
pub struct AsciiHexDecoder;

impl StreamDecoder for AsciiHexDecoder {
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>> {
        let digits: Vec<u8> = input
            .iter()
            .copied()
            .take_while(|&c| c != b'>')
            .filter(|c| !c.is_ascii_whitespace())
            .collect();

        digits
            .chunks(2)
            .map(|pair| {
                let high = nibble(pair[0])?;
                let low = pair.get(1).map(|&c| nibble(c)).transpose()?.unwrap_or(0);
                Ok((high << 4) | low)
            })
            .collect()
    }

    fn name(&self) -> &str {
        "ASCIIHexDecode"
    }
}

fn nibble(digit: u8) -> Result<u8> {
    (digit as char)
        .to_digit(16)
        .map(|v| v as u8)
        .ok_or_else(|| Error::Decode(format!("ASCIIHexDecode: invalid hex digit '{}'", digit as char)))
}
