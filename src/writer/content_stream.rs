//! Content stream builder for stamp drawing.
//!
//! Only the operators a stamp needs: graphics state, transforms, image
//! painting, and single-line text in a standard font.

use std::io::Write;

use crate::writer::object_serializer::format_real;

/// Operations that can be added to a content stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentStreamOp {
    /// Save graphics state (q)
    SaveState,
    /// Restore graphics state (Q)
    RestoreState,
    /// Concatenate matrix (cm)
    Transform(f64, f64, f64, f64, f64, f64),
    /// Apply an ExtGState resource (gs)
    SetExtGState(String),
    /// Paint an XObject resource (Do)
    PaintXObject(String),
    /// Begin text object (BT)
    BeginText,
    /// End text object (ET)
    EndText,
    /// Set font and size (Tf)
    SetFont(String, f64),
    /// Set text matrix (Tm)
    SetTextMatrix(f64, f64, f64, f64, f64, f64),
    /// Show text (Tj), bytes already in the font's encoding
    ShowText(Vec<u8>),
    /// Set fill color gray (g)
    SetFillColorGray(f64),
    /// Set fill color RGB (rg)
    SetFillColorRGB(f64, f64, f64),
}

/// Builder for PDF content streams.
#[derive(Debug, Default)]
pub struct ContentStreamBuilder {
    operations: Vec<ContentStreamOp>,
    /// Font selected by the last `Tf`; part of the graphics state, so it survives BT/ET
    current_font: Option<(String, f64)>,
    /// Fonts saved by `q`, restored by `Q`
    saved_fonts: Vec<Option<(String, f64)>>,
    in_text_object: bool,
}

impl ContentStreamBuilder {
    /// Create a new content stream builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an operation to the stream.
    pub fn op(&mut self, op: ContentStreamOp) -> &mut Self {
        self.operations.push(op);
        self
    }

    /// Save graphics state.
    pub fn save_state(&mut self) -> &mut Self {
        self.saved_fonts.push(self.current_font.clone());
        self.op(ContentStreamOp::SaveState)
    }

    /// Restore graphics state.
    pub fn restore_state(&mut self) -> &mut Self {
        // Unbalanced Q: the font in effect is unknown, so the next Tf is always written.
        self.current_font = self.saved_fonts.pop().flatten();
        self.op(ContentStreamOp::RestoreState)
    }

    /// Apply a named ExtGState from the page resources.
    pub fn set_ext_gstate(&mut self, name: &str) -> &mut Self {
        self.op(ContentStreamOp::SetExtGState(name.to_string()))
    }

    /// Set the fill color to a gray level.
    pub fn fill_gray(&mut self, level: f64) -> &mut Self {
        self.op(ContentStreamOp::SetFillColorGray(level))
    }

    /// Set the fill color.
    pub fn fill_rgb(&mut self, r: f64, g: f64, b: f64) -> &mut Self {
        self.op(ContentStreamOp::SetFillColorRGB(r, g, b))
    }

    /// Paint an image XObject scaled into `(x, y, width, height)`.
    ///
    /// Image space is the unit square, so the image is wrapped in q/cm/Do/Q.
    pub fn draw_image(&mut self, name: &str, x: f64, y: f64, width: f64, height: f64) -> &mut Self {
        self.end_text();
        self.save_state()
            .op(ContentStreamOp::Transform(width, 0.0, 0.0, height, x, y))
            .op(ContentStreamOp::PaintXObject(name.to_string()))
            .restore_state()
    }

    /// Begin a text object.
    pub fn begin_text(&mut self) -> &mut Self {
        if !self.in_text_object {
            self.op(ContentStreamOp::BeginText);
            self.in_text_object = true;
        }
        self
    }

    /// End a text object.
    pub fn end_text(&mut self) -> &mut Self {
        if self.in_text_object {
            self.op(ContentStreamOp::EndText);
            self.in_text_object = false;
        }
        self
    }

    /// Set font for text operations (only emitted when it changes).
    pub fn set_font(&mut self, font_name: &str, size: f64) -> &mut Self {
        let wanted = (font_name.to_string(), size);
        if self.current_font.as_ref() != Some(&wanted) {
            self.op(ContentStreamOp::SetFont(font_name.to_string(), size));
            self.current_font = Some(wanted);
        }
        self
    }

    /// Show text at a baseline position, encoded as WinAnsi.
    pub fn text(&mut self, text: &str, x: f64, y: f64) -> &mut Self {
        self.begin_text();
        self.op(ContentStreamOp::SetTextMatrix(1.0, 0.0, 0.0, 1.0, x, y));
        self.op(ContentStreamOp::ShowText(encode_win_ansi(text)))
    }

    /// True when nothing has been added.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Build the content stream to bytes, closing any open text object.
    pub fn build(&mut self) -> std::io::Result<Vec<u8>> {
        self.end_text();
        let mut buf = Vec::new();
        for op in &self.operations {
            write_op(&mut buf, op)?;
            writeln!(buf)?;
        }
        Ok(buf)
    }
}

fn write_op<W: Write>(w: &mut W, op: &ContentStreamOp) -> std::io::Result<()> {
    let n = |v: &f64| format_real(*v);
    match op {
        ContentStreamOp::SaveState => write!(w, "q"),
        ContentStreamOp::RestoreState => write!(w, "Q"),
        ContentStreamOp::Transform(a, b, c, d, e, f) => {
            write!(w, "{} {} {} {} {} {} cm", n(a), n(b), n(c), n(d), n(e), n(f))
        },
        ContentStreamOp::SetExtGState(name) => write!(w, "/{} gs", name),
        ContentStreamOp::PaintXObject(name) => write!(w, "/{} Do", name),
        ContentStreamOp::BeginText => write!(w, "BT"),
        ContentStreamOp::EndText => write!(w, "ET"),
        ContentStreamOp::SetFont(name, size) => write!(w, "/{} {} Tf", name, n(size)),
        ContentStreamOp::SetTextMatrix(a, b, c, d, e, f) => {
            write!(w, "{} {} {} {} {} {} Tm", n(a), n(b), n(c), n(d), n(e), n(f))
        },
        ContentStreamOp::ShowText(bytes) => {
            w.write_all(b"(")?;
            write_escaped(w, bytes)?;
            w.write_all(b") Tj")
        },
        ContentStreamOp::SetFillColorGray(g) => write!(w, "{} g", n(g)),
        ContentStreamOp::SetFillColorRGB(r, g, b) => write!(w, "{} {} {} rg", n(r), n(g), n(b)),
    }
}

fn write_escaped<W: Write>(w: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    for &byte in bytes {
        match byte {
            b'(' | b')' | b'\\' => w.write_all(&[b'\\', byte])?,
            b'\n' => w.write_all(b"\\n")?,
            b'\r' => w.write_all(b"\\r")?,
            0x00..=0x1F | 0x7F..=0xFF => write!(w, "\\{:03o}", byte)?,
            _ => w.write_all(&[byte])?,
        }
    }
    Ok(())
}

/// Encode text for a standard font with /WinAnsiEncoding.
///
/// Latin-1 maps directly; the handful of punctuation marks WinAnsi places in
/// 0x80..0x9F are translated; anything else becomes `?`.
pub fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            '\u{20AC}' => 0x80,
            '\u{2026}' => 0x85,
            '\u{2018}' => 0x91,
            '\u{2019}' => 0x92,
            '\u{201C}' => 0x93,
            '\u{201D}' => 0x94,
            '\u{2013}' => 0x96,
            '\u{2014}' => 0x97,
            c if (c as u32) < 0x80 || (0xA0..=0xFF).contains(&(c as u32)) => c as u8,
            _ => b'?',
        })
        .collect()
}

/// Approximate advance width of WinAnsi text in Helvetica, in text space units.
pub fn helvetica_width(text: &[u8], size: f64) -> f64 {
    let units: u32 = text.iter().map(|&b| helvetica_advance(b)).sum();
    units as f64 * size / 1000.0
}

fn helvetica_advance(byte: u8) -> u32 {
    match byte {
        b' ' | b'!' | b',' | b'.' | b'/' | b':' | b';' | b'I' | b'[' | b']' | b'\\' | b'f' | b't' => 278,
        b'i' | b'j' | b'l' => 222,
        b'(' | b')' | b'-' | b'r' => 333,
        b'0'..=b'9' | b'a'..=b'e' | b'g' | b'h' | b'n'..=b'q' | b'u' => 556,
        b'k' | b's' | b'v' | b'x' | b'y' | b'z' | b'J' => 500,
        b'm' | b'M' => 833,
        b'w' | b'W' => 722,
        b'A'..=b'Z' => 667,
        _ => 556,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_image_wraps_state() {
        let mut builder = ContentStreamBuilder::new();
        builder.draw_image("Im1", 10.0, 20.5, 100.0, 50.0);
        let out = String::from_utf8(builder.build().unwrap()).unwrap();
        assert_eq!(out, "q\n100 0 0 50 10 20.5 cm\n/Im1 Do\nQ\n");
    }

    #[test]
    fn test_text_closes_text_object() {
        let mut builder = ContentStreamBuilder::new();
        builder.set_font("F1", 9.0);
        builder.text("Jane (QA)", 5.0, 6.0);
        builder.set_font("F1", 9.0);
        builder.text("2026", 5.0, 16.0);
        let out = String::from_utf8(builder.build().unwrap()).unwrap();
        assert_eq!(out.matches("Tf").count(), 1);
        assert!(out.contains("(Jane \\(QA\\)) Tj"));
        assert!(out.ends_with("ET\n"));
    }

    #[test]
    fn test_font_survives_text_objects_until_restore() {
        let mut builder = ContentStreamBuilder::new();
        builder.save_state().set_font("F1", 9.0);
        builder.text("one", 0.0, 0.0).end_text();
        builder.set_font("F1", 9.0).text("two", 0.0, 10.0).end_text();
        builder.restore_state();
        builder.set_font("F1", 9.0).text("three", 0.0, 20.0);
        let out = String::from_utf8(builder.build().unwrap()).unwrap();
        // BT/ET keeps the font; Q drops back to the state saved before it was set.
        assert_eq!(out.matches("/F1 9 Tf").count(), 2);
        assert_eq!(out.matches("BT").count(), 3);
    }

    #[test]
    fn test_restore_state_brings_back_saved_font() {
        let mut builder = ContentStreamBuilder::new();
        builder.set_font("F1", 9.0);
        builder.draw_image("Im1", 0.0, 0.0, 10.0, 10.0);
        builder.set_font("F1", 9.0).text("after image", 0.0, 0.0);
        let out = String::from_utf8(builder.build().unwrap()).unwrap();
        assert_eq!(out.matches("Tf").count(), 1);
    }

    #[test]
    fn test_encode_win_ansi() {
        assert_eq!(encode_win_ansi("Zoë"), vec![b'Z', b'o', 0xEB]);
        assert_eq!(encode_win_ansi("\u{2013}"), vec![0x96]);
        assert_eq!(encode_win_ansi("王"), b"?".to_vec());
    }

    #[test]
    fn test_non_ascii_escaped_as_octal() {
        let mut builder = ContentStreamBuilder::new();
        builder.text("é", 0.0, 0.0);
        let out = builder.build().unwrap();
        assert!(String::from_utf8_lossy(&out).contains("(\\351) Tj"));
    }

    #[test]
    fn test_helvetica_width_scales_with_size() {
        let narrow = helvetica_width(b"il", 10.0);
        let wide = helvetica_width(b"MW", 10.0);
        assert!(wide > narrow);
        assert!((helvetica_width(b"0", 1000.0) - 556.0).abs() < 1e-9);
    }
}
