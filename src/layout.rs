//! Page layout calculations
//!
//! All rectangles here live in *page space*: points (1/72 inch), origin at the
//! top-left corner of the page as displayed, y growing downward. The PDF engine
//! converts to PDF user space (bottom-left origin) when it writes content.

/// Width and height in points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// US Letter size (8.5" × 11")
    pub fn letter() -> Self {
        Self::new(612.0, 792.0)
    }

    /// The same size turned a quarter turn
    pub fn transposed(self) -> Self {
        Self::new(self.height, self.width)
    }
}

/// Watermark offset from the page's top-left corner
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Offset {
    pub x: f32,
    pub y: f32,
}

impl Offset {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle in page space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl Rect {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Rectangle covering a whole page
    pub fn from_size(size: Size) -> Self {
        Self::new(0.0, 0.0, size.width, size.height)
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }

    pub fn contains_point(&self, x: f32, y: f32) -> bool {
        x >= self.x0 && x <= self.x1 && y >= self.y0 && y <= self.y1
    }

    /// True if `other` lies entirely inside this rectangle
    pub fn contains(&self, other: &Rect) -> bool {
        other.x0 >= self.x0 && other.y0 >= self.y0 && other.x1 <= self.x1 && other.y1 <= self.y1
    }

    /// Smallest rectangle covering both
    pub fn union(&self, other: &Rect) -> Rect {
        Rect::new(
            self.x0.min(other.x0),
            self.y0.min(other.y0),
            self.x1.max(other.x1),
            self.y1.max(other.y1),
        )
    }
}

/// Scale `content` uniformly to fit `page` and center it.
///
/// Used to place a raster image on a standard page: the result never exceeds
/// the page bounds and preserves the content's aspect ratio.
pub fn fit_centered(content: Size, page: Size) -> Rect {
    let scale_x = page.width / content.width;
    let scale_y = page.height / content.height;
    let scale = scale_x.min(scale_y);

    let new_width = content.width * scale;
    let new_height = content.height * scale;

    let x = (page.width - new_width) / 2.0;
    let y = (page.height - new_height) / 2.0;

    Rect::new(x, y, x + new_width, y + new_height)
}

/// Where a watermark goes on one page
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub rect: Rect,
    /// The scaled overlay did not fit and was clamped to the page edge
    pub overflowed: bool,
}

/// Compute the watermark rectangle for a page.
///
/// The overlay is scaled by `ratio` and anchored at `offset`. If it runs past
/// the right or bottom page edge, that dimension is clamped to
/// `page dimension - offset` and the placement is marked as overflowed; the
/// watermark is then drawn smaller rather than dropped.
pub fn place_watermark(page: Size, overlay: Size, ratio: f32, offset: Offset) -> Placement {
    let mut width = overlay.width * ratio;
    let mut height = overlay.height * ratio;
    let mut overflowed = false;

    if offset.x + width > page.width {
        width = (page.width - offset.x).max(0.0);
        overflowed = true;
    }
    if offset.y + height > page.height {
        height = (page.height - offset.y).max(0.0);
        overflowed = true;
    }

    Placement {
        rect: Rect::new(offset.x, offset.y, offset.x + width, offset.y + height),
        overflowed,
    }
}

/// Represents a PDF transformation matrix [a b c d e f]
/// where: x' = a*x + c*y + e, y' = b*x + d*y + f
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformMatrix {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl TransformMatrix {
    pub fn new(a: f32, b: f32, c: f32, d: f32, e: f32, f: f32) -> Self {
        Self { a, b, c, d, e, f }
    }

    /// Identity matrix (no transformation)
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, 0.0, 0.0)
    }

    pub fn translate(tx: f32, ty: f32) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    /// `self` applied first, then `next` (PDF row-vector order: self × next)
    pub fn then(&self, next: &TransformMatrix) -> Self {
        Self {
            a: self.a * next.a + self.b * next.c,
            b: self.a * next.b + self.b * next.d,
            c: self.c * next.a + self.d * next.c,
            d: self.c * next.b + self.d * next.d,
            e: self.e * next.a + self.f * next.c + next.e,
            f: self.e * next.b + self.f * next.d + next.f,
        }
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (self.a * x + self.c * y + self.e, self.b * x + self.d * y + self.f)
    }

    /// Calculate the inverse of this transformation matrix
    pub fn inverse(&self) -> Self {
        // For a 2D affine transformation matrix:
        // | a  c  e |
        // | b  d  f |
        // | 0  0  1 |
        //
        // The determinant is: det = a*d - b*c
        let det = self.a * self.d - self.b * self.c;
        if det.abs() < 1e-10 {
            // Singular matrix, return identity
            return Self::identity();
        }

        Self {
            a: self.d / det,
            b: -self.b / det,
            c: -self.c / det,
            d: self.a / det,
            e: (self.c * self.f - self.d * self.e) / det,
            f: (self.b * self.e - self.a * self.f) / det,
        }
    }

    /// Bounding box of `(x0, y0)-(x1, y1)` after transformation
    pub fn apply_box(&self, x0: f32, y0: f32, x1: f32, y1: f32) -> (f32, f32, f32, f32) {
        let corners = [
            self.apply(x0, y0),
            self.apply(x1, y0),
            self.apply(x0, y1),
            self.apply(x1, y1),
        ];
        let mut out = (f32::MAX, f32::MAX, f32::MIN, f32::MIN);
        for (x, y) in corners {
            out.0 = out.0.min(x);
            out.1 = out.1.min(y);
            out.2 = out.2.max(x);
            out.3 = out.3.max(y);
        }
        out
    }
}
