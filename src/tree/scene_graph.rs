//! Drawing surface abstraction.
//!
//! Painting goes through the [`Canvas`] trait. The [`SceneRecorder`] canvas
//! captures every primitive in device coordinates into a [`TreeSceneGraph`],
//! which the GUI and the SVG exporter replay.

use eframe::egui::Color32;
use vello::kurbo::{Affine, BezPath, PathEl, Point, Rect, Shape, Size};

/// Colour source for fills and strokes.
#[derive(Debug, Clone, PartialEq)]
pub enum Paint {
    Solid(Color32),
    /// Linear gradient between two points, in the coordinates of the shape it
    /// is used with.
    Gradient {
        start: Point,
        end: Point,
        from: Color32,
        to: Color32,
    },
}

impl Paint {
    /// Representative colour, the start colour for gradients.
    pub fn color(&self) -> Color32 {
        match self {
            Paint::Solid(color) => *color,
            Paint::Gradient { from, .. } => *from,
        }
    }

    pub fn transformed(&self, transform: Affine) -> Paint {
        match self {
            Paint::Solid(color) => Paint::Solid(*color),
            Paint::Gradient {
                start,
                end,
                from,
                to,
            } => Paint::Gradient {
                start: transform * *start,
                end: transform * *end,
                from: *from,
                to: *to,
            },
        }
    }

    /// Same paint with its alpha halved, used for fills derived from a line
    /// colour.
    pub fn lighter(&self) -> Paint {
        let halve = |color: Color32| {
            let [r, g, b, a] = color.to_srgba_unmultiplied();
            Color32::from_rgba_unmultiplied(r, g, b, a / 2)
        };
        match self {
            Paint::Solid(color) => Paint::Solid(halve(*color)),
            Paint::Gradient {
                start,
                end,
                from,
                to,
            } => Paint::Gradient {
                start: *start,
                end: *end,
                from: halve(*from),
                to: halve(*to),
            },
        }
    }
}

impl From<Color32> for Paint {
    fn from(color: Color32) -> Self {
        Paint::Solid(color)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrokeStyle {
    pub width: f64,
    /// `(dash, gap)` lengths in pixels.
    pub dash: Option<(f64, f64)>,
}

impl StrokeStyle {
    pub fn new(width: f64) -> Self {
        Self { width, dash: None }
    }

    pub fn dashed(width: f64, dash: f64, gap: f64) -> Self {
        Self {
            width,
            dash: Some((dash, gap)),
        }
    }
}

impl Default for StrokeStyle {
    fn default() -> Self {
        Self::new(1.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FontStyle {
    pub size: f64,
    pub bold: bool,
}

impl FontStyle {
    pub fn new(size: f64) -> Self {
        Self { size, bold: false }
    }
}

impl Default for FontStyle {
    fn default() -> Self {
        Self::new(12.0)
    }
}

/// Horizontal alignment of a text run relative to its origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAnchor {
    Start,
    Middle,
    End,
}

/// Approximate text metrics.
///
/// Glyph-accurate measurement depends on the backend that finally draws the
/// text, so layout works with an average advance per character.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextMeasure {
    pub advance: f64,
    pub min_width: f64,
    pub min_height: f64,
}

impl Default for TextMeasure {
    fn default() -> Self {
        Self {
            advance: 0.56,
            min_width: 2.0,
            min_height: 8.0,
        }
    }
}

impl TextMeasure {
    pub fn width(&self, text: &str, font: &FontStyle) -> f64 {
        let advance = if font.bold {
            self.advance * 1.1
        } else {
            self.advance
        };
        (text.chars().count() as f64 * font.size * advance).max(self.min_width)
    }

    pub fn height(&self, font: &FontStyle) -> f64 {
        font.size.max(self.min_height)
    }

    /// Baseline position below the vertical centre of a line.
    pub fn baseline_offset(&self, font: &FontStyle) -> f64 {
        self.height(font) * 0.35
    }

    pub fn size(&self, text: &str, font: &FontStyle) -> Size {
        Size::new(self.width(text, font), self.height(font))
    }
}

/// Target of all tree drawing.
pub trait Canvas {
    fn transform(&self) -> Affine;

    fn set_transform(&mut self, transform: Affine);

    fn fill(&mut self, path: &BezPath, paint: &Paint);

    fn stroke(&mut self, path: &BezPath, style: &StrokeStyle, paint: &Paint);

    /// Draw `text` with its baseline at `origin.y`.
    fn text(&mut self, text: &str, origin: Point, anchor: TextAnchor, font: &FontStyle, paint: &Paint);

    fn measure(&self) -> TextMeasure {
        TextMeasure::default()
    }

    fn fill_rect(&mut self, rect: Rect, paint: &Paint) {
        self.fill(&rect.to_path(0.1), paint);
    }
}

/// Append `transform` to the canvas transform for the duration of `draw`.
pub fn with_transform(canvas: &mut dyn Canvas, transform: Affine, draw: impl FnOnce(&mut dyn Canvas)) {
    let saved = canvas.transform();
    canvas.set_transform(saved * transform);
    draw(canvas);
    canvas.set_transform(saved);
}

/// One recorded drawing operation, in device coordinates.
#[derive(Debug, Clone, PartialEq)]
pub enum ScenePrimitive {
    Fill {
        path: BezPath,
        paint: Paint,
    },
    Stroke {
        path: BezPath,
        style: StrokeStyle,
        paint: Paint,
    },
    Text {
        text: String,
        /// Maps text space (origin on the baseline) to device space.
        transform: Affine,
        anchor: TextAnchor,
        font: FontStyle,
        paint: Paint,
    },
}

impl ScenePrimitive {
    /// Approximate device-space extent.
    pub fn bounds(&self, measure: &TextMeasure) -> Rect {
        match self {
            ScenePrimitive::Fill { path, .. } => path.bounding_box(),
            ScenePrimitive::Stroke { path, style, .. } => {
                path.bounding_box().inflate(style.width / 2.0, style.width / 2.0)
            }
            ScenePrimitive::Text {
                text,
                transform,
                anchor,
                font,
                ..
            } => {
                let size = measure.size(text, font);
                let x0 = match anchor {
                    TextAnchor::Start => 0.0,
                    TextAnchor::Middle => -size.width / 2.0,
                    TextAnchor::End => -size.width,
                };
                let offset = measure.baseline_offset(font);
                let half = size.height / 2.0;
                let local = Rect::new(x0, -half - offset, x0 + size.width, half - offset);
                (*transform * local.to_path(0.1)).bounding_box()
            }
        }
    }
}

/// Recorded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeSceneGraph {
    pub size: Size,
    pub background: Option<Color32>,
    pub primitives: Vec<ScenePrimitive>,
}

impl TreeSceneGraph {
    pub fn is_empty(&self) -> bool {
        self.primitives.is_empty()
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.primitives.iter().filter_map(|primitive| match primitive {
            ScenePrimitive::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }
}

/// Canvas that records primitives.
#[derive(Debug, Clone)]
pub struct SceneRecorder {
    size: Size,
    background: Option<Color32>,
    transform: Affine,
    measure: TextMeasure,
    primitives: Vec<ScenePrimitive>,
}

impl SceneRecorder {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            size: Size::new(width, height),
            background: None,
            transform: Affine::IDENTITY,
            measure: TextMeasure::default(),
            primitives: Vec::new(),
        }
    }

    pub fn with_background(mut self, color: Color32) -> Self {
        self.background = Some(color);
        self
    }

    pub fn with_measure(mut self, measure: TextMeasure) -> Self {
        self.measure = measure;
        self
    }

    pub fn primitives(&self) -> &[ScenePrimitive] {
        &self.primitives
    }

    pub fn finish(self) -> TreeSceneGraph {
        TreeSceneGraph {
            size: self.size,
            background: self.background,
            primitives: self.primitives,
        }
    }
}

impl Canvas for SceneRecorder {
    fn transform(&self) -> Affine {
        self.transform
    }

    fn set_transform(&mut self, transform: Affine) {
        self.transform = transform;
    }

    fn fill(&mut self, path: &BezPath, paint: &Paint) {
        if path.elements().is_empty() {
            return;
        }
        self.primitives.push(ScenePrimitive::Fill {
            path: self.transform * path.clone(),
            paint: paint.transformed(self.transform),
        });
    }

    fn stroke(&mut self, path: &BezPath, style: &StrokeStyle, paint: &Paint) {
        if path.elements().is_empty() || style.width <= 0.0 {
            return;
        }
        self.primitives.push(ScenePrimitive::Stroke {
            path: self.transform * path.clone(),
            style: *style,
            paint: paint.transformed(self.transform),
        });
    }

    fn text(&mut self, text: &str, origin: Point, anchor: TextAnchor, font: &FontStyle, paint: &Paint) {
        if text.is_empty() {
            return;
        }
        self.primitives.push(ScenePrimitive::Text {
            text: text.to_string(),
            transform: self.transform * Affine::translate(origin.to_vec2()),
            anchor,
            font: font.clone(),
            paint: paint.transformed(self.transform),
        });
    }

    fn measure(&self) -> TextMeasure {
        self.measure
    }
}

/// Flattened sub-path.
#[derive(Debug, Clone, PartialEq)]
pub struct Polyline {
    pub points: Vec<Point>,
    pub closed: bool,
}

/// Flatten `path` into line segments no further than `tolerance` from the curve.
pub fn polylines(path: &BezPath, tolerance: f64) -> Vec<Polyline> {
    let mut lines = Vec::new();
    let mut current = Polyline {
        points: Vec::new(),
        closed: false,
    };
    path.flatten(tolerance, |element| match element {
        PathEl::MoveTo(p) => {
            if current.points.len() > 1 {
                lines.push(std::mem::replace(
                    &mut current,
                    Polyline {
                        points: Vec::new(),
                        closed: false,
                    },
                ));
            }
            current.points.clear();
            current.points.push(p);
        }
        PathEl::LineTo(p) => current.points.push(p),
        PathEl::ClosePath => current.closed = true,
        _ => {}
    });
    if current.points.len() > 1 {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use vello::kurbo::Circle;

    use super::*;

    fn line(from: (f64, f64), to: (f64, f64)) -> BezPath {
        let mut path = BezPath::new();
        path.move_to(from);
        path.line_to(to);
        path
    }

    #[test]
    fn recorder_applies_the_current_transform() {
        let mut recorder = SceneRecorder::new(100.0, 100.0);
        with_transform(&mut recorder, Affine::translate((10.0, 20.0)), |canvas| {
            canvas.stroke(&line((0.0, 0.0), (5.0, 0.0)), &StrokeStyle::new(2.0), &Color32::RED.into());
        });
        assert_eq!(recorder.transform(), Affine::IDENTITY);

        let scene = recorder.finish();
        let ScenePrimitive::Stroke { path, .. } = &scene.primitives[0] else {
            panic!("expected a stroke");
        };
        let bounds = path.bounding_box();
        assert_eq!(bounds, Rect::new(10.0, 20.0, 15.0, 20.0));
    }

    #[test]
    fn gradients_follow_the_transform() {
        let mut recorder = SceneRecorder::new(10.0, 10.0);
        recorder.set_transform(Affine::scale(2.0));
        let paint = Paint::Gradient {
            start: Point::new(1.0, 1.0),
            end: Point::new(2.0, 2.0),
            from: Color32::RED,
            to: Color32::BLUE,
        };
        recorder.fill(&Circle::new((1.0, 1.0), 1.0).to_path(0.1), &paint);
        let ScenePrimitive::Fill { paint, .. } = &recorder.primitives()[0] else {
            panic!("expected a fill");
        };
        assert_eq!(
            paint,
            &Paint::Gradient {
                start: Point::new(2.0, 2.0),
                end: Point::new(4.0, 4.0),
                from: Color32::RED,
                to: Color32::BLUE,
            }
        );
    }

    #[test]
    fn empty_paths_and_text_are_skipped() {
        let mut recorder = SceneRecorder::new(10.0, 10.0);
        recorder.fill(&BezPath::new(), &Color32::BLACK.into());
        recorder.text("", Point::ORIGIN, TextAnchor::Start, &FontStyle::default(), &Color32::BLACK.into());
        recorder.stroke(&line((0.0, 0.0), (1.0, 1.0)), &StrokeStyle::new(0.0), &Color32::BLACK.into());
        assert!(recorder.finish().is_empty());
    }

    #[test]
    fn text_bounds_respect_anchor() {
        let measure = TextMeasure::default();
        let font = FontStyle::new(10.0);
        let mut recorder = SceneRecorder::new(100.0, 100.0);
        recorder.text("abcd", Point::new(50.0, 50.0), TextAnchor::End, &font, &Color32::BLACK.into());
        let bounds = recorder.primitives()[0].bounds(&measure);
        assert!((bounds.x1 - 50.0).abs() < 1e-9);
        assert!((bounds.width() - measure.width("abcd", &font)).abs() < 1e-9);
    }

    #[test]
    fn flattening_splits_subpaths() {
        let mut path = line((0.0, 0.0), (1.0, 0.0));
        path.move_to((0.0, 1.0));
        path.line_to((1.0, 1.0));
        path.line_to((1.0, 2.0));
        path.close_path();
        let lines = polylines(&path, 0.1);
        assert_eq!(lines.len(), 2);
        assert!(!lines[0].closed);
        assert!(lines[1].closed);
        assert_eq!(lines[1].points.len(), 3);
    }

    #[test]
    fn measure_has_floors() {
        let measure = TextMeasure::default();
        assert_eq!(measure.width("", &FontStyle::new(12.0)), 2.0);
        assert_eq!(measure.height(&FontStyle::new(4.0)), 8.0);
    }
}
