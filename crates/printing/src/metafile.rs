use std::fmt;

#[cfg(test)]
use serde::Serialize;

/// Recorded drawing operations for one rendered page.
#[cfg_attr(test, derive(Serialize))]
#[derive(Debug, Clone, Default)]
pub struct PageMetafile {
    pub ops: Vec<MetafileOp>,
}

impl PageMetafile {
    pub fn push(&mut self, op: MetafileOp) {
        self.ops.push(op);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Convenience for a page holding a single run of text.
    pub fn with_text(text: impl Into<String>, origin: Point, font_size_pt: f32) -> Self {
        let mut metafile = Self::default();
        metafile.push(MetafileOp::Text(TextRun {
            text: text.into(),
            font_family: "Helvetica".into(),
            font_size_pt,
            origin,
            color: Color::BLACK,
        }));
        metafile
    }
}

/// Drawing primitives a renderer can emit.
#[cfg_attr(test, derive(Serialize))]
#[derive(Debug, Clone)]
pub enum MetafileOp {
    Text(TextRun),
    FillRect { rect: Rect, color: Color },
    Line { from: Point, to: Point, stroke: Stroke },
}

#[cfg_attr(test, derive(Serialize))]
#[derive(Debug, Clone)]
pub struct TextRun {
    pub text: String,
    pub font_family: String,
    pub font_size_pt: f32,
    pub origin: Point,
    pub color: Color,
}

#[cfg_attr(test, derive(Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub origin: Point,
    pub size: Size,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            origin: Point { x, y },
            size: Size { width, height },
        }
    }
}

/// 2D size in points.
#[cfg_attr(test, derive(Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// 2D coordinate in points, origin at the top-left of the page.
#[cfg_attr(test, derive(Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// RGBA color stored in normalized floating-point form.
#[cfg_attr(test, derive(Serialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }
}

/// Stroke descriptor for simple line drawing.
#[cfg_attr(test, derive(Serialize))]
#[derive(Debug, Clone, Copy)]
pub struct Stroke {
    pub width: f32,
    pub color: Color,
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rgba({:.3}, {:.3}, {:.3}, {:.3})",
            self.r, self.g, self.b, self.a
        )
    }
}
