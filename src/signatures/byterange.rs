//! ByteRange calculation for PDF signatures.
//!
//! PDF digital signatures use a ByteRange array to specify which portions
//! of the document are covered by the signature. The signature itself is
//! stored in a placeholder that is excluded from the signed bytes.
//!
//! ## ByteRange Format
//!
//! The ByteRange is an array of four integers:
//! `[offset1, length1, offset2, length2]`
//!
//! Where:
//! - `offset1` = 0 (start of file)
//! - `length1` = byte offset where the signature value begins
//! - `offset2` = byte offset where the signature value ends
//! - `length2` = remaining bytes to end of file
//!
//! Both the `/ByteRange` array and the `/Contents` hex string are written as
//! fixed-width slots first and patched in place once the file is assembled,
//! so no offset moves after the ranges are computed.

use crate::error::{Error, Result, SigningError};
use crate::writer::hex_upper;

/// Width of the `/ByteRange` slot: `[0` plus three ten-digit numbers and `]`.
pub const BYTE_RANGE_SLOT_WIDTH: usize = 36;

/// Calculator for PDF signature byte ranges.
#[derive(Debug, Clone, Copy)]
pub struct ByteRangeCalculator {
    /// Size of the placeholder for the signature value (hex digits + 2 for angle brackets)
    placeholder_size: usize,
}

impl ByteRangeCalculator {
    /// Create a calculator reserving room for `estimated_signature_size` DER bytes.
    ///
    /// Each byte becomes two hex characters, plus the angle brackets.
    pub fn new(estimated_signature_size: usize) -> Self {
        Self {
            placeholder_size: estimated_signature_size * 2 + 2,
        }
    }

    /// Size of the `/Contents` value including the brackets.
    pub fn placeholder_size(&self) -> usize {
        self.placeholder_size
    }

    /// Largest DER blob that fits the placeholder.
    pub fn capacity(&self) -> usize {
        (self.placeholder_size - 2) / 2
    }

    /// `<00...00>` of the reserved size.
    pub fn generate_placeholder(&self) -> String {
        format!("<{}>", "0".repeat(self.placeholder_size - 2))
    }

    /// A `/ByteRange` value of the slot width, to be patched later.
    pub fn byte_range_placeholder() -> String {
        format!("[0 {0} {0} {0}]", "0".repeat(10))
    }

    /// Calculate the ByteRange array given the position of the /Contents value.
    ///
    /// `contents_offset` is the offset of the opening `<`.
    pub fn calculate_byte_range(&self, file_size: usize, contents_offset: usize) -> [i64; 4] {
        let before_sig = contents_offset as i64;
        let after_sig_start = (contents_offset + self.placeholder_size) as i64;
        let after_sig_len = file_size as i64 - after_sig_start;

        [0, before_sig, after_sig_start, after_sig_len]
    }

    /// Format a ByteRange array, right-padded with spaces to the slot width.
    pub fn format_byte_range(byte_range: &[i64; 4]) -> String {
        let text = format!("[{} {} {} {}]", byte_range[0], byte_range[1], byte_range[2], byte_range[3]);
        format!("{:<width$}", text, width = BYTE_RANGE_SLOT_WIDTH)
    }

    /// Overwrite the `/ByteRange` slot starting at `offset` (the `[`).
    pub fn patch_byte_range(pdf_data: &mut [u8], offset: usize, byte_range: &[i64; 4]) -> Result<()> {
        let formatted = Self::format_byte_range(byte_range);
        if formatted.len() != BYTE_RANGE_SLOT_WIDTH {
            return Err(Error::InvalidPdf(format!("ByteRange {:?} does not fit its slot", byte_range)));
        }
        let slot = pdf_data
            .get_mut(offset..offset + BYTE_RANGE_SLOT_WIDTH)
            .ok_or_else(|| Error::InvalidPdf("ByteRange slot outside file".to_string()))?;
        if slot.first() != Some(&b'[') {
            return Err(Error::InvalidPdf(format!("No ByteRange slot at offset {}", offset)));
        }
        slot.copy_from_slice(formatted.as_bytes());
        Ok(())
    }

    /// The two signed regions of `pdf_data`.
    pub fn signed_slices<'a>(pdf_data: &'a [u8], byte_range: &[i64; 4]) -> Result<(&'a [u8], &'a [u8])> {
        let [offset1, length1, offset2, length2] = *byte_range;
        if [offset1, length1, offset2, length2].iter().any(|v| *v < 0) {
            return Err(Error::InvalidPdf(format!("Negative ByteRange entry in {:?}", byte_range)));
        }
        let slice = |start: i64, len: i64| {
            let (start, len) = (start as usize, len as usize);
            start
                .checked_add(len)
                .and_then(|end| pdf_data.get(start..end))
                .ok_or_else(|| {
                    Error::InvalidPdf(format!(
                        "ByteRange {:?} exceeds file size {}",
                        byte_range,
                        pdf_data.len()
                    ))
                })
        };
        if offset1.saturating_add(length1) > offset2 {
            return Err(Error::InvalidPdf(format!(
                "ByteRange first range ({}) overlaps with second range start ({})",
                offset1.saturating_add(length1),
                offset2
            )));
        }
        Ok((slice(offset1, length1)?, slice(offset2, length2)?))
    }

    /// Concatenation of the two signed regions.
    pub fn extract_signed_bytes(pdf_data: &[u8], byte_range: &[i64; 4]) -> Result<Vec<u8>> {
        let (first, second) = Self::signed_slices(pdf_data, byte_range)?;
        let mut signed_bytes = Vec::with_capacity(first.len() + second.len());
        signed_bytes.extend_from_slice(first);
        signed_bytes.extend_from_slice(second);
        Ok(signed_bytes)
    }

    /// True when the range starts at 0 and ends at `file_size`.
    pub fn covers_whole_file(byte_range: &[i64; 4], file_size: usize) -> bool {
        byte_range[0] == 0
            && byte_range[1] <= byte_range[2]
            && byte_range[2].checked_add(byte_range[3]) == Some(file_size as i64)
    }

    /// Find the /Contents value position in a signature dictionary.
    ///
    /// This searches for the pattern `/Contents <` and returns the offset
    /// of the opening angle bracket.
    pub fn find_contents_offset(pdf_data: &[u8], sig_dict_offset: usize) -> Option<usize> {
        find_value_after(pdf_data, sig_dict_offset, b"/Contents", b'<')
    }

    /// Offset of the `[` that opens the `/ByteRange` value.
    pub fn find_byte_range_offset(pdf_data: &[u8], sig_dict_offset: usize) -> Option<usize> {
        find_value_after(pdf_data, sig_dict_offset, b"/ByteRange", b'[')
    }

    /// Replace the placeholder with the DER signature, zero padded.
    pub fn insert_signature(
        &self,
        pdf_data: &mut [u8],
        contents_offset: usize,
        signature_der: &[u8],
    ) -> std::result::Result<(), SigningError> {
        if signature_der.len() > self.capacity() {
            return Err(SigningError::PlaceholderTooSmall {
                needed: signature_der.len(),
                reserved: self.capacity(),
            });
        }

        let mut sig_value = String::with_capacity(self.placeholder_size);
        sig_value.push('<');
        sig_value.push_str(&hex_upper(signature_der));
        while sig_value.len() < self.placeholder_size - 1 {
            sig_value.push('0');
        }
        sig_value.push('>');

        let target = pdf_data
            .get_mut(contents_offset..contents_offset + self.placeholder_size)
            .ok_or_else(|| {
                SigningError::WriteFailure("Signature insertion would exceed file bounds".to_string())
            })?;
        target.copy_from_slice(sig_value.as_bytes());
        Ok(())
    }
}

impl Default for ByteRangeCalculator {
    fn default() -> Self {
        Self::new(crate::signatures::types::DEFAULT_SIGNATURE_SIZE)
    }
}

fn find_value_after(pdf_data: &[u8], start: usize, key: &[u8], opener: u8) -> Option<usize> {
    let search_end = (start + 4096).min(pdf_data.len());
    let window = pdf_data.get(start..search_end)?;
    let key_pos = window.windows(key.len()).position(|w| w == key)?;
    window[key_pos + key.len()..]
        .iter()
        .position(|b| !matches!(b, b' ' | b'\t' | b'\n' | b'\r'))
        .map(|skip| key_pos + key.len() + skip)
        .filter(|&pos| window[pos] == opener)
        .map(|pos| start + pos)
}
