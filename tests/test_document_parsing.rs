//! Loading documents: page trees, cross-reference streams, object streams
//! and incremental update chains.

mod common;

use pdf_seal::document::PdfDocument;
use pdf_seal::object::{Object, ObjectRef};
use pdf_seal::xref::{find_xref_offset, parse_xref, XRefEntry, XrefFormat};

use common::{assemble, simple_pdf, xref_stream_pdf};

/// One-page PDF whose catalog and page tree live in an uncompressed object stream.
fn object_stream_pdf() -> Vec<u8> {
    let catalog = "<< /Type /Catalog /Pages 2 0 R >>";
    let pages = "<< /Type /Pages /Kids [3 0 R] /Count 1 /MediaBox [0 0 420 595] >>";
    let header = format!("1 0 2 {} ", catalog.len() + 1);
    let body = format!("{}{} {}", header, catalog, pages);

    let mut pdf = b"%PDF-1.5\n".to_vec();
    let page_offset = pdf.len();
    pdf.extend_from_slice(b"3 0 obj\n<< /Type /Page /Parent 2 0 R >>\nendobj\n");
    let objstm_offset = pdf.len();
    pdf.extend_from_slice(
        format!(
            "4 0 obj\n<< /Type /ObjStm /N 2 /First {} /Length {} >>\nstream\n{}\nendstream\nendobj\n",
            header.len(),
            body.len(),
            body
        )
        .as_bytes(),
    );

    let xref_offset = pdf.len();
    let mut rows: Vec<u8> = vec![0, 0, 0, 0, 0, 0xFF, 0xFF];
    // Objects 1 and 2: compressed in stream 4 at index 0 and 1
    for index in 0..2u16 {
        rows.push(2);
        rows.extend_from_slice(&4u32.to_be_bytes());
        rows.extend_from_slice(&index.to_be_bytes());
    }
    for offset in [page_offset, objstm_offset, xref_offset] {
        rows.push(1);
        rows.extend_from_slice(&(offset as u32).to_be_bytes());
        rows.extend_from_slice(&[0, 0]);
    }
    pdf.extend_from_slice(
        format!(
            "5 0 obj\n<< /Type /XRef /Size 6 /W [1 4 2] /Root 1 0 R /Length {} >>\nstream\n",
            rows.len()
        )
        .as_bytes(),
    );
    pdf.extend_from_slice(&rows);
    pdf.extend_from_slice(format!("\nendstream\nendobj\nstartxref\n{}\n%%EOF\n", xref_offset).as_bytes());
    pdf
}

/// Append a revision that replaces page 1's dictionary with a smaller media box.
fn append_revision(base: &[u8]) -> Vec<u8> {
    let prev = find_xref_offset(base).unwrap();
    let mut pdf = base.to_vec();
    let offset = pdf.len();
    pdf.extend_from_slice(b"3 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 300 300] /Contents 4 0 R >>\nendobj\n");
    let xref = pdf.len();
    pdf.extend_from_slice(format!("xref\n3 1\n{:010} 00000 n \n", offset).as_bytes());
    pdf.extend_from_slice(
        format!(
            "trailer\n<< /Size 5 /Root 1 0 R /Prev {} >>\nstartxref\n{}\n%%EOF\n",
            prev, xref
        )
        .as_bytes(),
    );
    pdf
}

#[test]
fn test_pages_inherit_media_box() {
    let data = simple_pdf(3);
    let mut doc = PdfDocument::load(&data).unwrap();
    assert_eq!(doc.version(), (1, 7));
    assert_eq!(doc.page_count().unwrap(), 3);

    let pages = doc.pages().unwrap();
    assert_eq!(pages.iter().map(|p| p.number).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(pages[1].object_ref, ObjectRef::new(5, 0));
    for page in &pages {
        assert_eq!(page.media_box.width, 612.0);
        assert_eq!(page.media_box.height, 792.0);
        assert!(page.dict.contains_key("MediaBox"));
    }
    assert!(!doc.has_signatures().unwrap());
    assert!(doc.form_fields().unwrap().is_empty());
}

#[test]
fn test_nested_page_tree() {
    let data = assemble(&[
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R 4 0 R] /Count 3 /Rotate 90 >>".to_string(),
        "<< /Type /Page /Parent 2 0 R >>".to_string(),
        "<< /Type /Pages /Parent 2 0 R /Kids [5 0 R 6 0 R] /Count 2 /MediaBox [0 0 200 100] >>".to_string(),
        "<< /Type /Page /Parent 4 0 R >>".to_string(),
        "<< /Type /Page /Parent 4 0 R /MediaBox [10 20 110 220] >>".to_string(),
    ]);
    let mut doc = PdfDocument::load(&data).unwrap();
    let pages = doc.pages().unwrap();
    assert_eq!(pages.len(), 3);
    assert_eq!(pages[0].media_box.width, 612.0);
    assert_eq!(pages[1].media_box.width, 200.0);
    assert_eq!(pages[2].media_box.x, 10.0);
    assert_eq!(pages[2].media_box.height, 200.0);
    assert_eq!(pages[2].dict.get("Rotate").and_then(Object::as_integer), Some(90));
}

#[test]
fn test_xref_stream_document() {
    let data = xref_stream_pdf();
    let table = parse_xref(&data, find_xref_offset(&data).unwrap()).unwrap();
    assert_eq!(table.format(), XrefFormat::Stream);
    assert!(matches!(table.get(0), Some(XRefEntry::Free { .. })));
    assert!(matches!(table.get(3), Some(XRefEntry::Uncompressed { .. })));

    let mut doc = PdfDocument::load(&data).unwrap();
    let pages = doc.pages().unwrap();
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].media_box.width, 595.0);
    assert_eq!(pages[0].media_box.height, 842.0);
}

#[test]
fn test_object_stream_document() {
    let data = object_stream_pdf();
    let table = parse_xref(&data, find_xref_offset(&data).unwrap()).unwrap();
    assert_eq!(
        table.get(2),
        Some(&XRefEntry::Compressed {
            stream_id: 4,
            index: 1
        })
    );

    let mut doc = PdfDocument::load(&data).unwrap();
    let catalog = doc.catalog().unwrap();
    assert_eq!(catalog.get("Type").and_then(Object::as_name), Some("Catalog"));
    let pages = doc.pages().unwrap();
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].media_box.width, 420.0);
    assert_eq!(pages[0].media_box.height, 595.0);
}

#[test]
fn test_incremental_update_overrides_older_revision() {
    let base = simple_pdf(1);
    let updated = append_revision(&base);

    let table = parse_xref(&updated, find_xref_offset(&updated).unwrap()).unwrap();
    assert_eq!(table.startxref(), find_xref_offset(&updated).unwrap());
    assert!(table.startxref() > base.len() as u64);
    // Object 1 only exists in the original section.
    assert!(table.get(1).is_some());
    assert!(matches!(
        table.get(3),
        Some(XRefEntry::Uncompressed { offset, .. }) if *offset == base.len() as u64
    ));

    let mut doc = PdfDocument::load(&updated).unwrap();
    let pages = doc.pages().unwrap();
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].media_box.width, 300.0);

    // The original revision is untouched and still loads on its own.
    let mut original = PdfDocument::load(&updated[..base.len()]).unwrap();
    assert_eq!(original.pages().unwrap()[0].media_box.width, 612.0);
}

#[test]
fn test_next_object_number_follows_size() {
    let data = simple_pdf(2);
    let doc = PdfDocument::load(&data).unwrap();
    assert_eq!(doc.next_object_number(), 7);
}

#[test]
fn test_rejects_non_pdf() {
    assert!(PdfDocument::load(b"hello world").is_err());
    assert!(PdfDocument::load(b"%PDF-1.4\nno xref here").is_err());
}
