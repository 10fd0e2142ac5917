//! Geometric primitives and the canvas-to-page mapping used for stamps.
//!
//! Callers position stamps on a rendered preview of the page (the "canvas")
//! whose origin is top-left with y growing downward. PDF user space has its
//! origin at the bottom-left of the media box, so every placement goes
//! through [`map_to_page`] before anything is drawn.

use serde::{Deserialize, Serialize};

use crate::object::Object;

/// A rectangle in PDF user space (origin bottom-left).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    /// Lower-left x
    pub x: f64,
    /// Lower-left y
    pub y: f64,
    /// Width
    pub width: f64,
    /// Height
    pub height: f64,
}

impl Rect {
    /// Create a new rectangle from position and dimensions.
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Create a normalized rectangle from two opposite corners.
    ///
    /// ```
    /// use pdf_seal::geometry::Rect;
    ///
    /// let rect = Rect::from_points(110.0, 70.0, 10.0, 20.0);
    /// assert_eq!(rect, Rect::new(10.0, 20.0, 100.0, 50.0));
    /// ```
    pub fn from_points(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            x: x0.min(x1),
            y: y0.min(y1),
            width: (x1 - x0).abs(),
            height: (y1 - y0).abs(),
        }
    }

    /// Read a `[llx lly urx ury]` array such as /MediaBox.
    pub fn from_pdf_array(obj: &Object) -> Option<Self> {
        let values: Vec<f64> = obj.as_array()?.iter().filter_map(|o| o.as_number()).collect();
        match values.as_slice() {
            [x0, y0, x1, y1] => Some(Self::from_points(*x0, *y0, *x1, *y1)),
            _ => None,
        }
    }

    /// Right edge.
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    /// Top edge.
    pub fn top(&self) -> f64 {
        self.y + self.height
    }

    /// True when `other` lies entirely inside `self`, with a small tolerance.
    pub fn contains(&self, other: &Rect) -> bool {
        const EPS: f64 = 1e-6;
        other.x >= self.x - EPS
            && other.y >= self.y - EPS
            && other.right() <= self.right() + EPS
            && other.top() <= self.top() + EPS
    }

    /// Serialize as a PDF `[llx lly urx ury]` array.
    pub fn to_pdf_array(&self) -> Object {
        Object::Array(vec![
            Object::Real(self.x),
            Object::Real(self.y),
            Object::Real(self.right()),
            Object::Real(self.top()),
        ])
    }
}

/// Size of the caller's coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CanvasSize {
    /// Canvas width
    pub width: f64,
    /// Canvas height
    pub height: f64,
}

impl CanvasSize {
    /// Create a canvas size.
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Both dimensions are finite and positive.
    pub fn is_valid(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

/// Where a stamp goes, in canvas units. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignaturePlacement {
    /// 1-based page number
    pub page: u32,
    /// Left edge on the canvas
    pub x: f64,
    /// Top edge on the canvas (y grows downward)
    pub y: f64,
    /// Width on the canvas
    pub width: f64,
    /// Height on the canvas
    pub height: f64,
}

impl SignaturePlacement {
    /// Create a placement.
    pub fn new(page: u32, x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            page,
            x,
            y,
            width,
            height,
        }
    }
}

/// Map a canvas rectangle onto a page's media box.
///
/// The x and y axes scale independently, y is flipped, and the result is
/// clamped so it never extends past the page.
///
/// ```
/// use pdf_seal::geometry::{map_to_page, CanvasSize, Rect, SignaturePlacement};
///
/// let page = Rect::new(0.0, 0.0, 612.0, 792.0);
/// let placement = SignaturePlacement::new(1, 100.0, 100.0, 200.0, 50.0);
/// let rect = map_to_page(&placement, CanvasSize::new(800.0, 1000.0), &page);
/// assert!((rect.x - 76.5).abs() < 1e-9);
/// assert!((rect.y - 673.2).abs() < 1e-9);
/// ```
pub fn map_to_page(placement: &SignaturePlacement, canvas: CanvasSize, page: &Rect) -> Rect {
    let finite = |v: f64| if v.is_finite() { v } else { 0.0 };
    let (scale_x, scale_y) = if canvas.is_valid() {
        (page.width / canvas.width, page.height / canvas.height)
    } else {
        (1.0, 1.0)
    };

    let width = finite(placement.width * scale_x).clamp(0.0, page.width);
    let height = finite(placement.height * scale_y).clamp(0.0, page.height);
    let x = page.x + finite(placement.x * scale_x);
    let y = page.y + page.height - finite(placement.y * scale_y) - height;

    Rect {
        x: x.clamp(page.x, page.right() - width),
        y: y.clamp(page.y, page.top() - height),
        width,
        height,
    }
}

/// Largest rectangle with the image's aspect ratio that fits in `area`, centered.
pub fn fit_centered(image_width: f64, image_height: f64, area: &Rect) -> Rect {
    if image_width <= 0.0 || image_height <= 0.0 || area.width <= 0.0 || area.height <= 0.0 {
        return Rect::new(area.x, area.y, 0.0, 0.0);
    }
    let scale = (area.width / image_width).min(area.height / image_height);
    let width = image_width * scale;
    let height = image_height * scale;
    Rect::new(
        area.x + (area.width - width) / 2.0,
        area.y + (area.height - height) / 2.0,
        width,
        height,
    )
}
