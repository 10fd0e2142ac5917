//! Placement of the seal, signature image and text inside one stamp.

use crate::geometry::{fit_centered, Rect};
use crate::stamp::StampStyle;
use crate::writer::{encode_win_ansi, helvetica_width};

/// Line height as a multiple of the font size.
const LEADING: f64 = 1.2;

/// Horizontal fraction of the stamp a text line may use.
const TEXT_WIDTH_FILL: f64 = 0.95;

/// One line of the text band.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    /// Text to show
    pub text: String,
    /// Left edge of the line
    pub x: f64,
    /// Baseline
    pub baseline: f64,
    /// Font size
    pub size: f64,
}

/// Where everything goes within a mapped stamp rectangle.
#[derive(Debug, Clone, PartialEq)]
pub struct StampLayout {
    /// The whole stamp in page space
    pub area: Rect,
    /// Seal rectangle, centered on the whole stamp
    pub seal: Option<Rect>,
    /// Signature image rectangle, above the text band
    pub signature: Rect,
    /// Height reserved at the bottom for text
    pub band_height: f64,
    /// Text lines, top to bottom
    pub text: Vec<TextLine>,
}

impl StampLayout {
    /// Lay out a stamp. `lines` is empty for initials, which removes the band.
    ///
    /// Image sizes are in pixels; only their aspect ratio matters.
    pub fn compute(
        area: Rect,
        signature_px: (u32, u32),
        seal_px: Option<(u32, u32)>,
        lines: &[String],
        style: &StampStyle,
    ) -> Self {
        let band_height = if lines.is_empty() {
            0.0
        } else {
            area.height * style.text_band_ratio.clamp(0.0, 0.9)
        };

        let image_area = Rect::new(area.x, area.y + band_height, area.width, area.height - band_height);
        let signature = fit_centered(signature_px.0 as f64, signature_px.1 as f64, &image_area);
        let seal = seal_px.map(|(w, h)| fit_centered(w as f64, h as f64, &area));

        Self {
            area,
            seal,
            signature,
            band_height,
            text: layout_text(&area, band_height, lines, style.font_size),
        }
    }
}

/// Center the lines in the band, shrinking the font until every line fits.
fn layout_text(area: &Rect, band_height: f64, lines: &[String], max_size: f64) -> Vec<TextLine> {
    if lines.is_empty() || band_height <= 0.0 {
        return Vec::new();
    }

    let unit_widths: Vec<f64> = lines
        .iter()
        .map(|line| helvetica_width(&encode_win_ansi(line), 1.0))
        .collect();

    let mut size = max_size.min(band_height / (lines.len() as f64 * LEADING));
    for width in &unit_widths {
        if *width > 0.0 {
            size = size.min(area.width * TEXT_WIDTH_FILL / width);
        }
    }
    let size = size.max(0.0);

    let line_height = size * LEADING;
    let block_top = area.y + (band_height + line_height * lines.len() as f64) / 2.0;

    lines
        .iter()
        .zip(unit_widths)
        .enumerate()
        .map(|(i, (text, unit_width))| TextLine {
            text: text.clone(),
            x: area.x + (area.width - unit_width * size) / 2.0,
            baseline: block_top - i as f64 * line_height - size,
            size,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines() -> Vec<String> {
        vec!["Jane Doe".to_string(), "2024-05-01 10:00:00".to_string()]
    }

    #[test]
    fn test_text_band_reserved_below_signature() {
        let area = Rect::new(100.0, 100.0, 200.0, 100.0);
        let layout = StampLayout::compute(area, (400, 100), None, &lines(), &StampStyle::default());

        assert!((layout.band_height - 30.0).abs() < 1e-9);
        assert!(layout.signature.y >= area.y + layout.band_height - 1e-9);
        assert!(area.contains(&layout.signature));
        assert_eq!(layout.text.len(), 2);
        for line in &layout.text {
            assert!(line.baseline >= area.y);
            assert!(line.baseline < area.y + layout.band_height);
            assert!(line.x >= area.x);
        }
        assert!(layout.text[0].baseline > layout.text[1].baseline);
    }

    #[test]
    fn test_initial_uses_whole_area() {
        let area = Rect::new(0.0, 0.0, 100.0, 50.0);
        let layout = StampLayout::compute(area, (200, 100), None, &[], &StampStyle::default());
        assert_eq!(layout.band_height, 0.0);
        assert!(layout.text.is_empty());
        assert!((layout.signature.height - 50.0).abs() < 1e-9);
        assert!((layout.signature.x - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_seal_centered_on_stamp() {
        let area = Rect::new(10.0, 20.0, 200.0, 100.0);
        let layout = StampLayout::compute(area, (10, 10), Some((50, 50)), &lines(), &StampStyle::default());
        let seal = layout.seal.unwrap();
        assert!((seal.width - 100.0).abs() < 1e-9);
        assert!((seal.x + seal.width / 2.0 - (area.x + area.width / 2.0)).abs() < 1e-9);
        assert!((seal.y + seal.height / 2.0 - (area.y + area.height / 2.0)).abs() < 1e-9);
    }

    #[test]
    fn test_font_shrinks_for_narrow_stamps() {
        let area = Rect::new(0.0, 0.0, 30.0, 200.0);
        let layout = StampLayout::compute(area, (1, 1), None, &lines(), &StampStyle::default());
        for line in &layout.text {
            let width = helvetica_width(&encode_win_ansi(&line.text), line.size);
            assert!(width <= area.width + 1e-9);
        }
        assert!(layout.text[0].size < 10.0);
    }
}
