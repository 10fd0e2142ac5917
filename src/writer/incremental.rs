//! Incremental updates (append-only revisions).
//!
//! The original bytes are copied verbatim and every new or replaced object
//! is appended after them, followed by a cross-reference section chained to
//! the previous one with `/Prev`. Nothing before the old `%%EOF` changes, so
//! signatures over earlier revisions stay valid.

use std::collections::BTreeMap;
use std::ops::Range;

use sha2::{Digest, Sha256};

use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::object::{Dict, Object, ObjectRef};
use crate::writer::object_serializer::ObjectSerializer;
use crate::xref::XrefFormat;

/// Body of an object queued for the new revision.
#[derive(Debug, Clone)]
enum PendingBody {
    Object(Object),
    /// Pre-serialized body, written between `obj` and `endobj` untouched.
    Raw(Vec<u8>),
}

/// A revision being assembled on top of an existing document.
#[derive(Debug)]
pub struct IncrementalUpdate<'a> {
    original: &'a [u8],
    prev_startxref: u64,
    format: XrefFormat,
    base_trailer: Dict,
    next_id: u32,
    objects: BTreeMap<u32, (u16, PendingBody)>,
}

/// Output of [`IncrementalUpdate::write`].
#[derive(Debug, Clone)]
pub struct WrittenRevision {
    /// Complete file: original bytes plus the new revision
    pub bytes: Vec<u8>,
    /// Byte span of each written object (`id gen obj` through `endobj`)
    pub object_spans: BTreeMap<u32, Range<usize>>,
    /// Offset of the new cross-reference section
    pub startxref: u64,
}

impl<'a> IncrementalUpdate<'a> {
    /// Start a revision on top of `doc`.
    pub fn new(doc: &PdfDocument<'a>) -> Self {
        let mut base_trailer = Dict::new();
        for key in ["Root", "Info", "ID"] {
            if let Some(value) = doc.trailer().get(key) {
                base_trailer.insert(key.to_string(), value.clone());
            }
        }

        Self {
            original: doc.data(),
            prev_startxref: doc.xref().startxref(),
            format: doc.xref().format(),
            base_trailer,
            next_id: doc.next_object_number(),
            objects: BTreeMap::new(),
        }
    }

    /// Reserve a fresh object number.
    pub fn allocate(&mut self) -> ObjectRef {
        let id = self.next_id;
        self.next_id += 1;
        ObjectRef::new(id, 0)
    }

    /// Add a new object or replace an existing one in this revision.
    pub fn set_object(&mut self, obj_ref: ObjectRef, object: Object) {
        self.objects.insert(obj_ref.id, (obj_ref.gen, PendingBody::Object(object)));
    }

    /// Add an object whose body is already serialized.
    pub fn set_raw(&mut self, obj_ref: ObjectRef, body: Vec<u8>) {
        self.objects.insert(obj_ref.id, (obj_ref.gen, PendingBody::Raw(body)));
    }

    /// Number of objects queued so far.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True when nothing has been queued.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Append the revision to a copy of the original bytes.
    pub fn write(mut self) -> Result<WrittenRevision> {
        if self.objects.is_empty() {
            return Err(Error::InvalidPdf("incremental update with no objects".to_string()));
        }

        let serializer = ObjectSerializer::new();
        let mut out = Vec::with_capacity(self.original.len() + 4096);
        out.extend_from_slice(self.original);
        if !out.ends_with(b"\n") {
            out.push(b'\n');
        }

        let mut entries: BTreeMap<u32, (u64, u16)> = BTreeMap::new();
        let mut object_spans = BTreeMap::new();
        let objects = std::mem::take(&mut self.objects);
        for (id, (gen, body)) in &objects {
            let start = out.len();
            match body {
                PendingBody::Object(object) => {
                    out.extend_from_slice(&serializer.serialize_indirect(*id, *gen, object));
                },
                PendingBody::Raw(raw) => {
                    out.extend_from_slice(format!("{} {} obj\n", id, gen).as_bytes());
                    out.extend_from_slice(raw);
                    out.extend_from_slice(b"\nendobj\n");
                },
            }
            entries.insert(*id, (start as u64, *gen));
            object_spans.insert(*id, start..out.len());
        }

        let mut trailer = self.base_trailer.clone();
        trailer.insert("Prev".to_string(), Object::Integer(self.prev_startxref as i64));
        trailer.insert("ID".to_string(), self.document_id(&out));

        let startxref = out.len() as u64;
        match self.format {
            XrefFormat::Table => {
                trailer.insert("Size".to_string(), Object::Integer(self.next_id as i64));
                write_xref_table(&mut out, &entries);
                out.extend_from_slice(b"trailer\n");
                out.extend_from_slice(&serializer.serialize(&Object::Dictionary(trailer)));
                out.push(b'\n');
            },
            XrefFormat::Stream => {
                let xref_ref = self.allocate();
                entries.insert(xref_ref.id, (startxref, 0));
                trailer.insert("Size".to_string(), Object::Integer(self.next_id as i64));
                let stream = build_xref_stream(trailer, &entries);
                let bytes = serializer.serialize_indirect(xref_ref.id, 0, &stream);
                out.extend_from_slice(&bytes);
                object_spans.insert(xref_ref.id, startxref as usize..out.len());
            },
        }
        out.extend_from_slice(format!("startxref\n{}\n%%EOF\n", startxref).as_bytes());

        log::debug!(
            "Appended revision with {} objects ({} -> {} bytes)",
            entries.len(),
            self.original.len(),
            out.len()
        );

        Ok(WrittenRevision {
            bytes: out,
            object_spans,
            startxref,
        })
    }

    /// Keep the permanent identifier, derive a new changing one.
    fn document_id(&self, content: &[u8]) -> Object {
        let mut hasher = Sha256::new();
        hasher.update((content.len() as u64).to_be_bytes());
        hasher.update(chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default().to_be_bytes());
        hasher.update(&content[content.len().saturating_sub(1024)..]);
        let changing = hasher.finalize()[..16].to_vec();

        let permanent = self
            .base_trailer
            .get("ID")
            .and_then(|o| o.as_array())
            .and_then(|ids| ids.first())
            .and_then(|o| o.as_string())
            .map(|s| s.to_vec())
            .unwrap_or_else(|| changing.clone());

        Object::Array(vec![Object::String(permanent), Object::String(changing)])
    }
}

/// Group sorted ids into runs of consecutive numbers.
fn subsections(entries: &BTreeMap<u32, (u64, u16)>) -> Vec<(u32, Vec<(u64, u16)>)> {
    let mut runs: Vec<(u32, Vec<(u64, u16)>)> = Vec::new();
    for (&id, &entry) in entries {
        match runs.last_mut() {
            Some((first, items)) if *first + items.len() as u32 == id => items.push(entry),
            _ => runs.push((id, vec![entry])),
        }
    }
    runs
}

fn write_xref_table(out: &mut Vec<u8>, entries: &BTreeMap<u32, (u64, u16)>) {
    out.extend_from_slice(b"xref\n");
    for (first, items) in subsections(entries) {
        out.extend_from_slice(format!("{} {}\n", first, items.len()).as_bytes());
        for (offset, gen) in items {
            out.extend_from_slice(format!("{:010} {:05} n \n", offset, gen).as_bytes());
        }
    }
}

fn build_xref_stream(mut dict: Dict, entries: &BTreeMap<u32, (u64, u16)>) -> Object {
    let mut index = Vec::new();
    let mut data = Vec::with_capacity(entries.len() * 7);
    for (first, items) in subsections(entries) {
        index.push(Object::Integer(first as i64));
        index.push(Object::Integer(items.len() as i64));
        for (offset, gen) in items {
            data.push(1u8);
            data.extend_from_slice(&(offset as u32).to_be_bytes());
            data.extend_from_slice(&gen.to_be_bytes());
        }
    }

    dict.insert("Type".to_string(), Object::name("XRef"));
    dict.insert(
        "W".to_string(),
        Object::Array(vec![Object::Integer(1), Object::Integer(4), Object::Integer(2)]),
    );
    dict.insert("Index".to_string(), Object::Array(index));

    Object::Stream {
        dict,
        data: bytes::Bytes::from(data),
    }
}
