//! Placement mapping and stamp layout properties.

use pdf_seal::geometry::{fit_centered, map_to_page, CanvasSize, Rect, SignaturePlacement};
use pdf_seal::stamp::{StampLayout, StampStyle};
use proptest::prelude::*;

fn letter() -> Rect {
    Rect::new(0.0, 0.0, 612.0, 792.0)
}

#[test]
fn test_canvas_mapping_example() {
    let rect = map_to_page(
        &SignaturePlacement::new(1, 100.0, 100.0, 200.0, 50.0),
        CanvasSize::new(800.0, 1000.0),
        &letter(),
    );
    assert!((rect.x - 76.5).abs() < 1e-9);
    assert!((rect.y - 673.2).abs() < 1e-9);
    assert!((rect.width - 153.0).abs() < 1e-9);
    assert!((rect.height - 39.6).abs() < 1e-9);
}

#[test]
fn test_mapping_respects_media_box_origin() {
    let page = Rect::new(50.0, 100.0, 400.0, 600.0);
    let rect = map_to_page(
        &SignaturePlacement::new(1, 0.0, 0.0, 40.0, 60.0),
        CanvasSize::new(400.0, 600.0),
        &page,
    );
    assert_eq!(rect, Rect::new(50.0, 640.0, 40.0, 60.0));
}

#[test]
fn test_oversized_placement_is_clamped() {
    let rect = map_to_page(
        &SignaturePlacement::new(1, 700.0, 950.0, 400.0, 200.0),
        CanvasSize::new(800.0, 1000.0),
        &letter(),
    );
    assert!(letter().contains(&rect));
    assert!(rect.width > 0.0 && rect.height > 0.0);
}

#[test]
fn test_layout_without_text_uses_whole_area() {
    let area = Rect::new(10.0, 10.0, 200.0, 100.0);
    let layout = StampLayout::compute(area, (400, 100), None, &[], &StampStyle::default());
    assert_eq!(layout.band_height, 0.0);
    assert!(layout.text.is_empty());
    assert!((layout.signature.width - 200.0).abs() < 1e-9);
    assert!((layout.signature.height - 50.0).abs() < 1e-9);
}

#[test]
fn test_long_names_shrink_to_fit() {
    let area = Rect::new(0.0, 0.0, 120.0, 80.0);
    let lines = vec![
        "Maximilian Alexander von Habsburg-Lothringen".to_string(),
        "2024-06-01 12:00:00".to_string(),
    ];
    let layout = StampLayout::compute(area, (100, 40), None, &lines, &StampStyle::default());
    assert_eq!(layout.text.len(), 2);
    assert!(layout.text[0].size < StampStyle::default().font_size);
    assert!(layout.text.iter().all(|line| line.x >= area.x - 1e-9));
}

proptest! {
    #[test]
    fn prop_mapped_rect_stays_on_page(
        x in -2000.0f64..2000.0,
        y in -2000.0f64..2000.0,
        w in 0.0f64..3000.0,
        h in 0.0f64..3000.0,
        cw in 1.0f64..2000.0,
        ch in 1.0f64..2000.0,
    ) {
        let page = letter();
        let rect = map_to_page(&SignaturePlacement::new(1, x, y, w, h), CanvasSize::new(cw, ch), &page);
        prop_assert!(page.contains(&rect));
        prop_assert!(rect.width >= 0.0 && rect.height >= 0.0);
    }

    #[test]
    fn prop_fit_centered_keeps_aspect_ratio(
        iw in 1.0f64..5000.0,
        ih in 1.0f64..5000.0,
        aw in 1.0f64..1000.0,
        ah in 1.0f64..1000.0,
    ) {
        let area = Rect::new(5.0, 7.0, aw, ah);
        let fitted = fit_centered(iw, ih, &area);
        prop_assert!(area.contains(&fitted));
        let expected = iw / ih;
        let actual = fitted.width / fitted.height;
        prop_assert!((expected - actual).abs() / expected < 1e-6);
        // Touches the area on at least one axis.
        prop_assert!((fitted.width - aw).abs() < 1e-6 || (fitted.height - ah).abs() < 1e-6);
    }

    #[test]
    fn prop_layout_stays_inside_area(
        w in 20.0f64..600.0,
        h in 20.0f64..300.0,
        ratio in 0.0f64..1.0,
        name in "[A-Za-z ]{0,60}",
    ) {
        let area = Rect::new(30.0, 40.0, w, h);
        let style = StampStyle::default().with_text_band_ratio(ratio);
        let layout = StampLayout::compute(area, (300, 120), Some((200, 200)), &[name], &style);
        prop_assert!(area.contains(&layout.signature));
        prop_assert!(layout.seal.map(|s| area.contains(&s)).unwrap_or(false));
        prop_assert!(layout.band_height <= h * 0.9 + 1e-9);
    }
}
