//! Drawing stamps into page content as an incremental revision.

use std::collections::BTreeMap;

use crate::document::{PageInfo, PdfDocument};
use crate::error::RenderError;
use crate::geometry::{map_to_page, CanvasSize, Rect, SignaturePlacement};
use crate::object::{Dict, Object, ObjectRef};
use crate::stamp::layout::StampLayout;
use crate::stamp::{RenderOutput, StampContent, StampStyle};
use crate::writer::{ContentStreamBuilder, ImageData, IncrementalUpdate};

/// Resources shared by every stamped page of one revision.
struct SharedResources {
    signature: (ObjectRef, (u32, u32)),
    seal: Option<(ObjectRef, (u32, u32))>,
    font: ObjectRef,
    seal_state: Option<ObjectRef>,
}

/// Names under which the shared resources appear on one page.
struct PageNames {
    signature: String,
    seal: Option<String>,
    font: String,
    seal_state: Option<String>,
}

/// Renders visual stamps.
#[derive(Debug, Clone, Default)]
pub struct StampRenderer {
    style: StampStyle,
}

impl StampRenderer {
    /// Renderer with the default style.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different style.
    pub fn with_style(mut self, style: StampStyle) -> Self {
        self.style = style;
        self
    }

    /// Current style.
    pub fn style(&self) -> &StampStyle {
        &self.style
    }

    /// Draw `content` at every placement and append the result as a new revision.
    ///
    /// Placements on pages the document does not have are reported in
    /// [`RenderOutput::skipped`]. The output is an incremental update whether
    /// or not `preserve_existing` is set, so existing signatures always survive.
    pub fn render(
        &self,
        source: &[u8],
        placements: &[SignaturePlacement],
        canvas: CanvasSize,
        content: &StampContent,
        preserve_existing: bool,
    ) -> Result<RenderOutput, RenderError> {
        if !canvas.is_valid() {
            return Err(RenderError::InvalidCanvas {
                width: canvas.width,
                height: canvas.height,
            });
        }

        let mut doc = PdfDocument::load(source)?;
        let pages = doc.pages()?;
        let page_count = pages.len() as u32;

        let mut skipped = Vec::new();
        let mut by_page: BTreeMap<u32, Vec<Rect>> = BTreeMap::new();
        for placement in placements {
            match pages.get((placement.page as usize).wrapping_sub(1)) {
                Some(page) => {
                    by_page
                        .entry(placement.page)
                        .or_default()
                        .push(map_to_page(placement, canvas, &page.media_box));
                },
                _ => {
                    log::warn!(
                        "Skipping stamp on page {} (document has {} page(s))",
                        placement.page,
                        page_count
                    );
                    skipped.push(RenderError::InvalidPage {
                        page: placement.page,
                        page_count,
                    });
                },
            }
        }
        if by_page.is_empty() {
            return Err(RenderError::NoValidPlacement);
        }
        if !preserve_existing {
            log::debug!("Stamping as an incremental update regardless of preserve_existing");
        }

        let signature = decode_image(&content.signature_image)?;
        let seal = content.seal_image.as_deref().map(decode_image).transpose()?;

        let mut update = IncrementalUpdate::new(&doc);
        let shared = SharedResources {
            signature: (add_image(&mut update, &signature), (signature.width, signature.height)),
            seal: seal
                .as_ref()
                .map(|image| (add_image(&mut update, image), (image.width, image.height))),
            font: add_object(&mut update, helvetica()),
            seal_state: seal
                .as_ref()
                .map(|_| add_object(&mut update, opacity_state(self.style.seal_opacity))),
        };

        let lines = if content.initial {
            Vec::new()
        } else {
            vec![
                content.signer_name.clone(),
                content.sign_date.format(&self.style.date_format).to_string(),
            ]
        };

        let mut pages_stamped = Vec::new();
        for (number, rects) in &by_page {
            let page = &pages[*number as usize - 1];
            let layouts: Vec<StampLayout> = rects
                .iter()
                .map(|rect| {
                    StampLayout::compute(*rect, shared.signature.1, shared.seal.map(|s| s.1), &lines, &self.style)
                })
                .collect();
            self.stamp_page(&mut doc, &mut update, page, &shared, &layouts)?;
            pages_stamped.push(*number);
        }

        let revision = update.write()?;
        log::info!(
            "Stamped {} placement(s) on page(s) {:?}, skipped {}",
            by_page.values().map(Vec::len).sum::<usize>(),
            pages_stamped,
            skipped.len()
        );

        Ok(RenderOutput {
            bytes: revision.bytes,
            pages_stamped,
            skipped,
        })
    }

    fn stamp_page(
        &self,
        doc: &mut PdfDocument<'_>,
        update: &mut IncrementalUpdate<'_>,
        page: &PageInfo,
        shared: &SharedResources,
        layouts: &[StampLayout],
    ) -> Result<(), RenderError> {
        let mut resources = match page.dict.get("Resources") {
            Some(obj) => doc.resolve_dict(obj)?,
            None => Dict::new(),
        };

        let names = PageNames {
            signature: register(doc, &mut resources, "XObject", "SealSig", shared.signature.0)?,
            seal: shared
                .seal
                .map(|(seal_ref, _)| register(doc, &mut resources, "XObject", "SealImg", seal_ref))
                .transpose()?,
            font: register(doc, &mut resources, "Font", "SealF", shared.font)?,
            seal_state: shared
                .seal_state
                .map(|gs_ref| register(doc, &mut resources, "ExtGState", "SealGS", gs_ref))
                .transpose()?,
        };

        let open = add_object(update, plain_stream(b"q\n".to_vec()));
        let stamp = add_object(update, plain_stream(draw(layouts, &names)?));

        let mut contents = vec![Object::Reference(open)];
        contents.extend(existing_contents(doc, &page.dict)?);
        contents.push(Object::Reference(stamp));

        let mut dict = page.dict.clone();
        dict.insert("Resources".to_string(), Object::Dictionary(resources));
        dict.insert("Contents".to_string(), Object::Array(contents));
        update.set_object(page.object_ref, Object::Dictionary(dict));

        log::debug!("Page {}: {} stamp(s) as {}", page.number, layouts.len(), stamp);
        Ok(())
    }
}

/// The content stream closing the isolation `q` and drawing every stamp.
fn draw(layouts: &[StampLayout], names: &PageNames) -> Result<Vec<u8>, RenderError> {
    let mut builder = ContentStreamBuilder::new();
    for layout in layouts {
        if let (Some(rect), Some(image), Some(state)) = (layout.seal, &names.seal, &names.seal_state) {
            builder.save_state().set_ext_gstate(state);
            builder.draw_image(image, rect.x, rect.y, rect.width, rect.height);
            builder.restore_state();
        }

        let sig = layout.signature;
        if sig.width > 0.0 && sig.height > 0.0 {
            builder.draw_image(&names.signature, sig.x, sig.y, sig.width, sig.height);
        }

        if !layout.text.is_empty() {
            builder.save_state().fill_gray(0.0);
            for line in &layout.text {
                builder.set_font(&names.font, line.size).text(&line.text, line.x, line.baseline);
            }
            builder.end_text().restore_state();
        }
    }

    let body = builder.build().map_err(|e| RenderError::Pdf(e.into()))?;
    let mut out = b"Q\n".to_vec();
    out.extend_from_slice(&body);
    Ok(out)
}

/// Existing page content as a list of references, in order.
fn existing_contents(doc: &mut PdfDocument<'_>, page: &Dict) -> Result<Vec<Object>, RenderError> {
    let Some(contents) = page.get("Contents") else {
        return Ok(Vec::new());
    };
    // A reference may point at a single stream or at an array of streams.
    if let Object::Reference(r) = contents {
        if let Object::Array(items) = doc.load_object(*r)? {
            return Ok(items);
        }
        return Ok(vec![contents.clone()]);
    }
    match contents {
        Object::Array(items) => Ok(items.clone()),
        _ => Ok(Vec::new()),
    }
}

/// Add `target` to `resources[category]` under a name not already in use.
fn register(
    doc: &mut PdfDocument<'_>,
    resources: &mut Dict,
    category: &str,
    prefix: &str,
    target: ObjectRef,
) -> Result<String, RenderError> {
    let mut entries = match resources.get(category) {
        Some(obj) => doc.resolve_dict(obj)?,
        None => Dict::new(),
    };

    let name = (1..)
        .map(|n| format!("{}{}", prefix, n))
        .find(|candidate| !entries.contains_key(candidate))
        .unwrap_or_else(|| prefix.to_string());
    entries.insert(name.clone(), Object::Reference(target));
    resources.insert(category.to_string(), Object::Dictionary(entries));
    Ok(name)
}

fn decode_image(bytes: &[u8]) -> Result<ImageData, RenderError> {
    ImageData::from_bytes(bytes).map_err(|e| RenderError::Image(e.to_string()))
}

fn add_object(update: &mut IncrementalUpdate<'_>, object: Object) -> ObjectRef {
    let obj_ref = update.allocate();
    update.set_object(obj_ref, object);
    obj_ref
}

/// Image XObject plus its soft mask, if any.
fn add_image(update: &mut IncrementalUpdate<'_>, image: &ImageData) -> ObjectRef {
    let smask = image
        .soft_mask_xobject()
        .map(|mask| Object::Reference(add_object(update, mask)));
    add_object(update, image.to_xobject(smask))
}

fn helvetica() -> Object {
    let mut font = Dict::new();
    font.insert("Type".to_string(), Object::name("Font"));
    font.insert("Subtype".to_string(), Object::name("Type1"));
    font.insert("BaseFont".to_string(), Object::name("Helvetica"));
    font.insert("Encoding".to_string(), Object::name("WinAnsiEncoding"));
    Object::Dictionary(font)
}

fn opacity_state(opacity: f64) -> Object {
    let mut state = Dict::new();
    state.insert("Type".to_string(), Object::name("ExtGState"));
    state.insert("CA".to_string(), Object::Real(opacity));
    state.insert("ca".to_string(), Object::Real(opacity));
    Object::Dictionary(state)
}

fn plain_stream(data: Vec<u8>) -> Object {
    let mut dict = Dict::new();
    dict.insert("Length".to_string(), Object::Integer(data.len() as i64));
    Object::Stream {
        dict,
        data: bytes::Bytes::from(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    /// Two-page PDF with one content stream on page 1.
    fn two_page_pdf() -> Vec<u8> {
        let objects = [
            "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
            "<< /Type /Pages /Kids [3 0 R 4 0 R] /Count 2 /MediaBox [0 0 612 792] >>".to_string(),
            "<< /Type /Page /Parent 2 0 R /Contents 5 0 R /Resources << /XObject << /SealSig1 6 0 R >> >> >>"
                .to_string(),
            "<< /Type /Page /Parent 2 0 R >>".to_string(),
            "<< /Length 8 >>\nstream\n0 0 m S\n\nendstream".to_string(),
            "<< /Length 0 >>\nstream\n\nendstream".to_string(),
        ];
        let mut pdf = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::new();
        for (i, body) in objects.iter().enumerate() {
            offsets.push(pdf.len());
            pdf.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
        }
        let xref = pdf.len();
        pdf.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
        for offset in offsets {
            pdf.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
        }
        pdf.extend_from_slice(
            format!("trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n", objects.len() + 1, xref)
                .as_bytes(),
        );
        pdf
    }

    fn jpeg_1x1() -> Vec<u8> {
        // SOI, SOF0 (8-bit, 1x1, 3 components), EOI
        vec![
            0xFF, 0xD8, 0xFF, 0xC0, 0x00, 0x11, 0x08, 0x00, 0x01, 0x00, 0x01, 0x03, 0x01, 0x11, 0x00, 0x02, 0x11,
            0x00, 0x03, 0x11, 0x00, 0xFF, 0xD9,
        ]
    }

    fn content() -> StampContent {
        StampContent::new("Jane Doe", Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(), jpeg_1x1())
    }

    #[test]
    fn test_render_appends_revision() {
        let source = two_page_pdf();
        let placements = [SignaturePlacement::new(1, 100.0, 100.0, 200.0, 50.0)];
        let out = StampRenderer::new()
            .render(&source, &placements, CanvasSize::new(800.0, 1000.0), &content(), true)
            .unwrap();

        assert!(out.bytes.starts_with(&source));
        assert_eq!(out.pages_stamped, vec![1]);
        assert!(out.skipped.is_empty());

        let mut doc = PdfDocument::load(&out.bytes).unwrap();
        let pages = doc.pages().unwrap();
        let contents = pages[0].dict.get("Contents").unwrap().as_array().unwrap().clone();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1], Object::Reference(ObjectRef::new(5, 0)));

        let xobjects = doc.resolve_dict(pages[0].dict.get("Resources").unwrap()).unwrap();
        let xobjects = xobjects.get("XObject").unwrap().as_dict().unwrap().clone();
        assert!(xobjects.contains_key("SealSig1"));
        assert!(xobjects.contains_key("SealSig2"));
    }

    #[test]
    fn test_invalid_pages_are_warnings() {
        let source = two_page_pdf();
        let placements = [
            SignaturePlacement::new(2, 0.0, 0.0, 100.0, 50.0),
            SignaturePlacement::new(7, 0.0, 0.0, 100.0, 50.0),
            SignaturePlacement::new(0, 0.0, 0.0, 100.0, 50.0),
        ];
        let out = StampRenderer::new()
            .render(&source, &placements, CanvasSize::new(612.0, 792.0), &content(), true)
            .unwrap();
        assert_eq!(out.pages_stamped, vec![2]);
        assert_eq!(out.skipped.len(), 2);
        assert!(matches!(out.skipped[0], RenderError::InvalidPage { page: 7, page_count: 2 }));
    }

    #[test]
    fn test_all_placements_invalid() {
        let placements = [SignaturePlacement::new(9, 0.0, 0.0, 10.0, 10.0)];
        let result = StampRenderer::new().render(
            &two_page_pdf(),
            &placements,
            CanvasSize::new(612.0, 792.0),
            &content(),
            true,
        );
        assert!(matches!(result, Err(RenderError::NoValidPlacement)));
    }

    #[test]
    fn test_invalid_canvas_and_image() {
        let placements = [SignaturePlacement::new(1, 0.0, 0.0, 10.0, 10.0)];
        let renderer = StampRenderer::new();
        assert!(matches!(
            renderer.render(&two_page_pdf(), &placements, CanvasSize::new(0.0, 10.0), &content(), true),
            Err(RenderError::InvalidCanvas { .. })
        ));

        let mut bad = content();
        bad.signature_image = b"GIF89a".to_vec();
        assert!(matches!(
            renderer.render(&two_page_pdf(), &placements, CanvasSize::new(612.0, 792.0), &bad, true),
            Err(RenderError::Image(_))
        ));
    }

    #[test]
    fn test_seal_uses_opacity_state() {
        let placements = [SignaturePlacement::new(1, 0.0, 0.0, 300.0, 100.0)];
        let out = StampRenderer::new()
            .render(
                &two_page_pdf(),
                &placements,
                CanvasSize::new(612.0, 792.0),
                &content().with_seal(jpeg_1x1()),
                true,
            )
            .unwrap();
        let text = String::from_utf8_lossy(&out.bytes);
        assert!(text.contains("/ca 0.15"));
        assert!(text.contains("/SealGS1 gs"));
        assert!(text.contains("(Jane Doe) Tj"));
    }

    #[test]
    fn test_initial_has_no_text() {
        let placements = [SignaturePlacement::new(1, 0.0, 0.0, 300.0, 100.0)];
        let out = StampRenderer::new()
            .render(
                &two_page_pdf(),
                &placements,
                CanvasSize::new(612.0, 792.0),
                &content().as_initial(true),
                true,
            )
            .unwrap();
        let text = String::from_utf8_lossy(&out.bytes);
        assert!(!text.contains("Tj"));
        assert!(text.contains("/SealSig2 Do"));
    }
}
