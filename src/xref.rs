//! Cross-reference parsing.
//!
//! Handles classic `xref` tables and PDF 1.5 cross-reference streams, including
//! hybrid files (`/XRefStm`) and `/Prev` chains left by incremental updates.
//! Newer sections win when the same object number appears twice.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::object::{Dict, Object};
use crate::parser::{parse_indirect_object, parse_object, to_parse_error};

/// Maximum number of `/Prev` hops followed before giving up.
const MAX_PREV_DEPTH: u32 = 256;

/// Cross-reference table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefEntry {
    /// Free object slot
    Free {
        /// Generation to use when the slot is reused
        generation: u16,
    },
    /// Object stored at a byte offset
    Uncompressed {
        /// Byte offset of `id gen obj`
        offset: u64,
        /// Generation number
        generation: u16,
    },
    /// Object stored inside an object stream
    Compressed {
        /// Object number of the containing /ObjStm
        stream_id: u32,
        /// Index within the stream
        index: u32,
    },
}

/// Physical format of one cross-reference section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefFormat {
    /// `xref` keyword followed by 20-byte entries and a `trailer` dictionary
    Table,
    /// `/Type /XRef` stream
    Stream,
}

/// Merged view of every cross-reference section in a file.
#[derive(Debug, Clone)]
pub struct CrossRefTable {
    entries: HashMap<u32, XRefEntry>,
    trailer: Dict,
    format: XrefFormat,
    startxref: u64,
}

impl CrossRefTable {
    fn empty(format: XrefFormat, startxref: u64) -> Self {
        Self {
            entries: HashMap::new(),
            trailer: Dict::new(),
            format,
            startxref,
        }
    }

    /// Look up an object number.
    pub fn get(&self, object_number: u32) -> Option<&XRefEntry> {
        self.entries.get(&object_number)
    }

    /// Trailer of the newest section (older keys are filled in when missing).
    pub fn trailer(&self) -> &Dict {
        &self.trailer
    }

    /// Format of the newest section; an incremental update should match it.
    pub fn format(&self) -> XrefFormat {
        self.format
    }

    /// Offset the file's final `startxref` points at.
    pub fn startxref(&self) -> u64 {
        self.startxref
    }

    /// Highest object number seen in any section.
    pub fn max_object_number(&self) -> u32 {
        self.entries.keys().copied().max().unwrap_or(0)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries were found.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fill in entries and trailer keys from an older section.
    fn merge_older(&mut self, older: CrossRefTable) {
        for (id, entry) in older.entries {
            self.entries.entry(id).or_insert(entry);
        }
        for (key, value) in older.trailer {
            if key != "Prev" && key != "XRefStm" {
                self.trailer.entry(key).or_insert(value);
            }
        }
    }
}

/// Find the offset that the last `startxref` keyword points at.
pub fn find_xref_offset(data: &[u8]) -> Result<u64> {
    let tail_start = data.len().saturating_sub(4096);
    let tail = &data[tail_start..];
    let keyword = b"startxref";
    let pos = tail
        .windows(keyword.len())
        .rposition(|w| w == keyword)
        .ok_or(Error::InvalidXref)?;

    let digits: String = tail[pos + keyword.len()..]
        .iter()
        .skip_while(|c| c.is_ascii_whitespace())
        .take_while(|c| c.is_ascii_digit())
        .map(|&c| c as char)
        .collect();

    digits.parse::<u64>().map_err(|_| Error::InvalidXref)
}

/// Parse the section at `offset` and every older section it chains to.
pub fn parse_xref(data: &[u8], offset: u64) -> Result<CrossRefTable> {
    let mut table = parse_section_chain(data, offset, 0)?;
    table.startxref = offset;
    table.trailer.remove("Prev");
    table.trailer.remove("XRefStm");
    Ok(table)
}

fn parse_section_chain(data: &[u8], offset: u64, depth: u32) -> Result<CrossRefTable> {
    if depth > MAX_PREV_DEPTH {
        return Err(Error::InvalidPdf("xref /Prev chain too deep".to_string()));
    }

    let mut table = parse_section(data, offset)?;
    log::debug!(
        "Parsed {:?} xref section at {} with {} entries",
        table.format,
        offset,
        table.len()
    );

    // Hybrid files: the table's /XRefStm lists objects hidden from old readers.
    if let Some(stm_offset) = table.trailer.get("XRefStm").and_then(|o| o.as_integer()) {
        match parse_stream_section(data, stm_offset as u64) {
            Ok(hidden) => table.merge_older(hidden),
            Err(e) => log::warn!("Ignoring unreadable /XRefStm at {}: {}", stm_offset, e),
        }
    }

    if let Some(prev) = table.trailer.get("Prev").and_then(|o| o.as_integer()) {
        if prev >= 0 && prev as u64 != offset {
            let older = parse_section_chain(data, prev as u64, depth + 1)?;
            table.merge_older(older);
        }
    }

    Ok(table)
}

fn parse_section(data: &[u8], offset: u64) -> Result<CrossRefTable> {
    let start = usize::try_from(offset).map_err(|_| Error::InvalidXref)?;
    if start >= data.len() {
        return Err(Error::InvalidXref);
    }
    let rest = &data[start..];
    let skipped = rest.iter().take_while(|c| c.is_ascii_whitespace()).count();

    if rest[skipped..].starts_with(b"xref") {
        parse_table_section(data, start + skipped)
    } else {
        parse_stream_section(data, offset)
    }
}

/// Whitespace-separated word cursor over a classic xref table.
struct WordCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WordCursor<'a> {
    fn skip_ws(&mut self) {
        while self.pos < self.data.len() && self.data[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek_starts_with(&mut self, prefix: &[u8]) -> bool {
        self.skip_ws();
        self.data[self.pos..].starts_with(prefix)
    }

    fn next_word(&mut self) -> Option<&'a [u8]> {
        self.skip_ws();
        let begin = self.pos;
        while self.pos < self.data.len() && !self.data[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        (self.pos > begin).then(|| &self.data[begin..self.pos])
    }

    fn next_number(&mut self) -> Option<u64> {
        std::str::from_utf8(self.next_word()?).ok()?.parse().ok()
    }
}

fn parse_table_section(data: &[u8], start: usize) -> Result<CrossRefTable> {
    let mut table = CrossRefTable::empty(XrefFormat::Table, start as u64);
    let mut cursor = WordCursor {
        data,
        pos: start + b"xref".len(),
    };

    while !cursor.peek_starts_with(b"trailer") {
        let first = cursor.next_number().ok_or(Error::InvalidXref)? as u32;
        let count = cursor.next_number().ok_or(Error::InvalidXref)? as u32;
        if count as usize > data.len() / 18 {
            return Err(Error::InvalidPdf(format!("xref subsection count {} is implausible", count)));
        }

        for i in 0..count {
            let field1 = cursor.next_number().ok_or(Error::InvalidXref)?;
            let generation = cursor.next_number().ok_or(Error::InvalidXref)? as u16;
            let entry = match cursor.next_word() {
                Some(b"n") => XRefEntry::Uncompressed {
                    offset: field1,
                    generation,
                },
                Some(b"f") => XRefEntry::Free { generation },
                _ => return Err(Error::InvalidXref),
            };
            table.entries.entry(first + i).or_insert(entry);
        }
    }

    cursor.skip_ws();
    let trailer_start = cursor.pos + b"trailer".len();
    let (_, trailer) = parse_object(&data[trailer_start..])
        .map_err(|e| to_parse_error(trailer_start, e))?;
    table.trailer = match trailer {
        Object::Dictionary(dict) => dict,
        other => {
            return Err(Error::InvalidObjectType {
                expected: "Dictionary".to_string(),
                found: other.type_name().to_string(),
            })
        },
    };

    Ok(table)
}

fn parse_stream_section(data: &[u8], offset: u64) -> Result<CrossRefTable> {
    let start = usize::try_from(offset).map_err(|_| Error::InvalidXref)?;
    let input = data.get(start..).ok_or(Error::InvalidXref)?;
    let (_, (_, obj)) = parse_indirect_object(input).map_err(|e| to_parse_error(start, e))?;

    let decoded = obj.decode_stream_data()?;
    let dict = match obj {
        Object::Stream { dict, .. } => dict,
        other => {
            return Err(Error::InvalidObjectType {
                expected: "Stream".to_string(),
                found: other.type_name().to_string(),
            })
        },
    };
    if dict.get("Type").and_then(|o| o.as_name()) != Some("XRef") {
        return Err(Error::InvalidPdf(format!("object at {} is not an xref stream", offset)));
    }

    let widths: Vec<usize> = dict
        .get("W")
        .and_then(|o| o.as_array())
        .map(|arr| arr.iter().filter_map(|o| o.as_integer()).map(|w| w.max(0) as usize).collect())
        .unwrap_or_default();
    if widths.len() != 3 || widths.iter().any(|&w| w > 8) {
        return Err(Error::InvalidPdf("invalid /W in xref stream".to_string()));
    }
    let (w1, w2, w3) = (widths[0], widths[1], widths[2]);
    let entry_size = w1 + w2 + w3;
    if entry_size == 0 {
        return Err(Error::InvalidPdf("zero-width xref stream entries".to_string()));
    }

    let size = dict
        .get("Size")
        .and_then(|o| o.as_integer())
        .ok_or_else(|| Error::InvalidPdf("missing /Size in xref stream".to_string()))? as u32;

    let ranges: Vec<(u32, u32)> = match dict.get("Index").and_then(|o| o.as_array()) {
        Some(index) => index
            .chunks_exact(2)
            .filter_map(|pair| Some((pair[0].as_integer()? as u32, pair[1].as_integer()? as u32)))
            .collect(),
        None => vec![(0, size)],
    };

    let mut table = CrossRefTable::empty(XrefFormat::Stream, offset);
    let mut rows = decoded.chunks_exact(entry_size);
    for (first, count) in ranges {
        for i in 0..count {
            let row = rows
                .next()
                .ok_or_else(|| Error::InvalidPdf("truncated xref stream data".to_string()))?;
            let kind = if w1 == 0 { 1 } else { read_int(&row[..w1]) };
            let field2 = read_int(&row[w1..w1 + w2]);
            let field3 = read_int(&row[w1 + w2..]);
            let entry = match kind {
                0 => XRefEntry::Free {
                    generation: field3 as u16,
                },
                1 => XRefEntry::Uncompressed {
                    offset: field2,
                    generation: field3 as u16,
                },
                2 => XRefEntry::Compressed {
                    stream_id: field2 as u32,
                    index: field3 as u32,
                },
                // Unknown types are treated as null references.
                _ => continue,
            };
            table.entries.entry(first + i).or_insert(entry);
        }
    }

    table.trailer = dict;
    Ok(table)
}

/// Big-endian integer of up to eight bytes.
fn read_int(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}
