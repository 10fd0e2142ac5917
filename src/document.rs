//! Read-only view of a PDF held in memory.
//!
//! A [`PdfDocument`] borrows the caller's bytes for the duration of one
//! stamping, signing or verification call and is dropped at the end of it.
//! There is no long-lived document handle.

use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};
use crate::geometry::Rect;
use crate::object::{Dict, Object, ObjectRef};
use crate::objstm::parse_object_stream;
use crate::parser::{parse_indirect_object, to_parse_error};
use crate::xref::{find_xref_offset, parse_xref, CrossRefTable, XRefEntry};

/// Maximum nesting followed while walking page trees and field trees.
const MAX_TREE_DEPTH: u32 = 64;

/// US Letter, used when a page has no usable /MediaBox.
const DEFAULT_MEDIA_BOX: Rect = Rect {
    x: 0.0,
    y: 0.0,
    width: 612.0,
    height: 792.0,
};

/// A page with inherited attributes already applied.
#[derive(Debug, Clone)]
pub struct PageInfo {
    /// 1-based page number
    pub number: u32,
    /// Indirect reference of the page dictionary
    pub object_ref: ObjectRef,
    /// Page dictionary including inherited /Resources /MediaBox /CropBox /Rotate
    pub dict: Dict,
    /// Media box in user space
    pub media_box: Rect,
}

/// A terminal AcroForm field.
#[derive(Debug, Clone)]
pub struct FormField {
    /// Indirect reference of the field (or merged field/widget) dictionary
    pub object_ref: ObjectRef,
    /// Fully qualified name (`parent.child`)
    pub full_name: String,
    /// Field type, inherited from ancestors when absent
    pub field_type: Option<String>,
    /// The field dictionary
    pub dict: Dict,
}

/// PDF document parsed from an in-memory buffer.
pub struct PdfDocument<'a> {
    data: &'a [u8],
    version: (u8, u8),
    xref: CrossRefTable,
    object_cache: HashMap<ObjectRef, Object>,
    stream_cache: HashMap<u32, HashMap<u32, Object>>,
    resolving: HashSet<ObjectRef>,
}

impl std::fmt::Debug for PdfDocument<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfDocument")
            .field("len", &self.data.len())
            .field("version", &self.version)
            .field("xref_entries", &self.xref.len())
            .finish_non_exhaustive()
    }
}

impl<'a> PdfDocument<'a> {
    /// Parse the header, cross-reference sections and trailer.
    pub fn load(data: &'a [u8]) -> Result<Self> {
        let version = parse_header(data)?;
        let offset = find_xref_offset(data)?;
        let xref = parse_xref(data, offset)?;

        if xref.trailer().get("Root").and_then(|o| o.as_reference()).is_none() {
            return Err(Error::InvalidPdf("trailer has no /Root reference".to_string()));
        }
        if xref.trailer().contains_key("Encrypt") {
            return Err(Error::InvalidPdf("encrypted documents are not supported".to_string()));
        }

        log::debug!(
            "Loaded PDF {}.{} ({} bytes, {} xref entries)",
            version.0,
            version.1,
            data.len(),
            xref.len()
        );

        Ok(Self {
            data,
            version,
            xref,
            object_cache: HashMap::new(),
            stream_cache: HashMap::new(),
            resolving: HashSet::new(),
        })
    }

    /// The raw bytes this document was parsed from.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Header version (major, minor).
    pub fn version(&self) -> (u8, u8) {
        self.version
    }

    /// Merged cross-reference information.
    pub fn xref(&self) -> &CrossRefTable {
        &self.xref
    }

    /// Trailer of the newest revision.
    pub fn trailer(&self) -> &Dict {
        self.xref.trailer()
    }

    /// First object number not used by any revision.
    pub fn next_object_number(&self) -> u32 {
        let size = self
            .trailer()
            .get("Size")
            .and_then(|o| o.as_integer())
            .unwrap_or(0)
            .max(0) as u32;
        size.max(self.xref.max_object_number() + 1)
    }

    /// Load an indirect object, using the cache when possible.
    pub fn load_object(&mut self, obj_ref: ObjectRef) -> Result<Object> {
        if let Some(cached) = self.object_cache.get(&obj_ref) {
            return Ok(cached.clone());
        }
        if !self.resolving.insert(obj_ref) {
            return Err(Error::CircularReference(obj_ref));
        }

        let result = self.load_object_uncached(obj_ref);
        self.resolving.remove(&obj_ref);

        let object = result?;
        self.object_cache.insert(obj_ref, object.clone());
        Ok(object)
    }

    fn load_object_uncached(&mut self, obj_ref: ObjectRef) -> Result<Object> {
        match self.xref.get(obj_ref.id).copied() {
            Some(XRefEntry::Uncompressed { offset, .. }) => {
                let start = usize::try_from(offset).map_err(|_| Error::ObjectNotFound(obj_ref.id, obj_ref.gen))?;
                let input = self
                    .data
                    .get(start..)
                    .ok_or(Error::ObjectNotFound(obj_ref.id, obj_ref.gen))?;
                let (_, (found, object)) =
                    parse_indirect_object(input).map_err(|e| to_parse_error(start, e))?;
                if found.id != obj_ref.id {
                    return Err(Error::ParseError {
                        offset: start,
                        reason: format!("expected object {}, found {}", obj_ref, found),
                    });
                }
                Ok(object)
            },
            Some(XRefEntry::Compressed { stream_id, .. }) => {
                if !self.stream_cache.contains_key(&stream_id) {
                    let stream = self.load_object(ObjectRef::new(stream_id, 0))?;
                    let objects = parse_object_stream(&stream)?;
                    self.stream_cache.insert(stream_id, objects);
                }
                self.stream_cache
                    .get(&stream_id)
                    .and_then(|objects| objects.get(&obj_ref.id))
                    .cloned()
                    .ok_or(Error::ObjectNotFound(obj_ref.id, obj_ref.gen))
            },
            // Free or missing objects resolve to null.
            Some(XRefEntry::Free { .. }) | None => Ok(Object::Null),
        }
    }

    /// Follow a reference (one level); direct objects are cloned.
    pub fn resolve(&mut self, obj: &Object) -> Result<Object> {
        match obj {
            Object::Reference(r) => self.load_object(*r),
            other => Ok(other.clone()),
        }
    }

    /// Resolve an object that must be a dictionary (or stream dictionary).
    pub fn resolve_dict(&mut self, obj: &Object) -> Result<Dict> {
        let resolved = self.resolve(obj)?;
        match resolved {
            Object::Dictionary(d) => Ok(d),
            Object::Stream { dict, .. } => Ok(dict),
            other => Err(Error::InvalidObjectType {
                expected: "Dictionary".to_string(),
                found: other.type_name().to_string(),
            }),
        }
    }

    /// Reference of the document catalog.
    pub fn catalog_ref(&self) -> Result<ObjectRef> {
        self.trailer()
            .get("Root")
            .and_then(|o| o.as_reference())
            .ok_or_else(|| Error::InvalidPdf("trailer has no /Root reference".to_string()))
    }

    /// The document catalog.
    pub fn catalog(&mut self) -> Result<Dict> {
        let root = self.catalog_ref()?;
        self.resolve_dict(&Object::Reference(root))
    }

    /// Every page in document order.
    pub fn pages(&mut self) -> Result<Vec<PageInfo>> {
        let catalog = self.catalog()?;
        let pages_ref = catalog
            .get("Pages")
            .and_then(|o| o.as_reference())
            .ok_or_else(|| Error::InvalidPdf("catalog missing /Pages reference".to_string()))?;

        let mut pages = Vec::new();
        let mut visited = HashSet::new();
        self.collect_pages(pages_ref, &Dict::new(), &mut visited, &mut pages, 0)?;
        Ok(pages)
    }

    fn collect_pages(
        &mut self,
        node_ref: ObjectRef,
        inherited: &Dict,
        visited: &mut HashSet<ObjectRef>,
        pages: &mut Vec<PageInfo>,
        depth: u32,
    ) -> Result<()> {
        if depth > MAX_TREE_DEPTH {
            return Err(Error::RecursionLimitExceeded(MAX_TREE_DEPTH));
        }
        if !visited.insert(node_ref) {
            log::warn!("Page tree revisits {}, skipping", node_ref);
            return Ok(());
        }

        let node = self.resolve_dict(&Object::Reference(node_ref))?;
        let is_leaf = match node.get("Type").and_then(|o| o.as_name()) {
            Some("Page") => true,
            Some("Pages") => false,
            // Untyped nodes: a /Kids array means an intermediate node.
            _ => !node.contains_key("Kids"),
        };

        let mut attrs = inherited.clone();
        for key in ["Resources", "MediaBox", "CropBox", "Rotate"] {
            if let Some(value) = node.get(key) {
                attrs.insert(key.to_string(), value.clone());
            }
        }

        if is_leaf {
            let mut dict = node;
            for (key, value) in attrs {
                dict.entry(key).or_insert(value);
            }
            let media_box = match dict.get("MediaBox") {
                Some(obj) => {
                    let resolved = self.resolve(obj)?;
                    Rect::from_pdf_array(&resolved)
                },
                None => None,
            }
            .filter(|r| r.width > 0.0 && r.height > 0.0)
            .unwrap_or(DEFAULT_MEDIA_BOX);

            pages.push(PageInfo {
                number: pages.len() as u32 + 1,
                object_ref: node_ref,
                dict,
                media_box,
            });
            return Ok(());
        }

        let kids = match node.get("Kids") {
            Some(kids) => self.resolve(kids)?,
            None => Object::Array(Vec::new()),
        };
        for kid in kids.as_array().map(|k| k.as_slice()).unwrap_or_default() {
            match kid.as_reference() {
                Some(kid_ref) => self.collect_pages(kid_ref, &attrs, visited, pages, depth + 1)?,
                None => log::warn!("Direct object in /Kids of {} ignored", node_ref),
            }
        }
        Ok(())
    }

    /// Number of pages.
    pub fn page_count(&mut self) -> Result<u32> {
        Ok(self.pages()?.len() as u32)
    }

    /// Terminal fields of the interactive form, in /Fields order.
    pub fn form_fields(&mut self) -> Result<Vec<FormField>> {
        let catalog = self.catalog()?;
        let acroform = match catalog.get("AcroForm") {
            Some(obj) => self.resolve_dict(obj)?,
            None => return Ok(Vec::new()),
        };
        let roots = match acroform.get("Fields") {
            Some(obj) => self.resolve(obj)?,
            None => return Ok(Vec::new()),
        };

        let mut fields = Vec::new();
        let mut visited = HashSet::new();
        for root in roots.as_array().map(|a| a.as_slice()).unwrap_or_default() {
            if let Some(field_ref) = root.as_reference() {
                self.collect_fields(field_ref, "", None, &mut visited, &mut fields, 0)?;
            }
        }
        Ok(fields)
    }

    fn collect_fields(
        &mut self,
        field_ref: ObjectRef,
        parent_name: &str,
        parent_type: Option<&str>,
        visited: &mut HashSet<ObjectRef>,
        fields: &mut Vec<FormField>,
        depth: u32,
    ) -> Result<()> {
        if depth > MAX_TREE_DEPTH || !visited.insert(field_ref) {
            return Ok(());
        }

        let dict = self.resolve_dict(&Object::Reference(field_ref))?;
        let partial = dict
            .get("T")
            .and_then(|o| o.as_string())
            .map(decode_text_string);
        let full_name = match (parent_name.is_empty(), partial) {
            (_, None) => parent_name.to_string(),
            (true, Some(name)) => name,
            (false, Some(name)) => format!("{}.{}", parent_name, name),
        };
        let field_type = dict
            .get("FT")
            .and_then(|o| o.as_name())
            .map(str::to_string)
            .or_else(|| parent_type.map(str::to_string));

        // Kids that carry /T are child fields; kids without /T are widgets.
        let mut child_fields = Vec::new();
        if let Some(kids) = dict.get("Kids") {
            let kids = self.resolve(kids)?;
            for kid in kids.as_array().map(|k| k.as_slice()).unwrap_or_default() {
                if let Some(kid_ref) = kid.as_reference() {
                    let kid_dict = self.resolve_dict(kid)?;
                    if kid_dict.contains_key("T") {
                        child_fields.push(kid_ref);
                    }
                }
            }
        }

        if child_fields.is_empty() {
            fields.push(FormField {
                object_ref: field_ref,
                full_name,
                field_type,
                dict,
            });
            return Ok(());
        }

        for kid_ref in child_fields {
            self.collect_fields(kid_ref, &full_name, field_type.as_deref(), visited, fields, depth + 1)?;
        }
        Ok(())
    }

    /// True when any form field is a signature field with a value.
    pub fn has_signatures(&mut self) -> Result<bool> {
        Ok(self
            .form_fields()?
            .iter()
            .any(|f| f.field_type.as_deref() == Some("Sig") && f.dict.contains_key("V")))
    }
}

/// Validate `%PDF-M.m` at the start of the buffer (leading junk up to 1 KiB is tolerated).
pub fn parse_header(data: &[u8]) -> Result<(u8, u8)> {
    let window = &data[..data.len().min(1024)];
    let pos = window
        .windows(5)
        .position(|w| w == b"%PDF-")
        .ok_or_else(|| {
            Error::InvalidHeader(String::from_utf8_lossy(&data[..data.len().min(8)]).into_owned())
        })?;

    let version = &data[pos + 5..];
    match version {
        [major, b'.', minor, ..] if major.is_ascii_digit() && minor.is_ascii_digit() => {
            Ok((major - b'0', minor - b'0'))
        },
        _ => Err(Error::InvalidHeader(
            String::from_utf8_lossy(&data[pos..data.len().min(pos + 8)]).into_owned(),
        )),
    }
}

/// Decode a PDF text string (UTF-16BE with BOM, otherwise byte-per-char).
pub fn decode_text_string(bytes: &[u8]) -> String {
    if bytes.starts_with(&[0xFE, 0xFF]) {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        String::from_utf8_lossy(&bytes[3..]).into_owned()
    } else {
        bytes.iter().map(|&b| b as char).collect()
    }
}
