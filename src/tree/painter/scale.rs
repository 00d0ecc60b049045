use eframe::egui::Color32;
use log::warn;
use vello::kurbo::{Point, Rect, Size};

use super::{Justification, NumberFormat, Painter, PainterBase, ScaleContext, ScalePainter};
use crate::tree::layout::{line_path, TreeLayoutType};
use crate::tree::scene_graph::{Canvas, FontStyle, Paint, StrokeStyle, TextAnchor};

const MAX_TICKS: usize = 500;
const TICK_DIGITS: usize = 8;

/// Maps node heights to the ages shown on axes and labels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeScale {
    factor: f64,
    offset: f64,
}

impl Default for TimeScale {
    fn default() -> Self {
        Self {
            factor: 1.0,
            offset: 0.0,
        }
    }
}

impl TimeScale {
    /// A zero or non-finite factor falls back to 1.
    pub fn new(factor: f64, offset: f64) -> Self {
        let factor = if factor.is_finite() && factor != 0.0 {
            factor
        } else {
            1.0
        };
        Self {
            factor,
            offset: if offset.is_finite() { offset } else { 0.0 },
        }
    }

    /// Scale so that the root of a tree of `root_height` has age `root_age`.
    pub fn from_root_age(root_age: f64, root_height: f64) -> Self {
        if root_height > 0.0 {
            Self::new(root_age / root_height, 0.0)
        } else {
            Self::default()
        }
    }

    pub fn scale_factor(&self) -> f64 {
        self.factor
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn age(&self, height: f64) -> f64 {
        height * self.factor + self.offset
    }

    pub fn height(&self, age: f64) -> f64 {
        (age - self.offset) / self.factor
    }

    pub fn length_to_time(&self, length: f64) -> f64 {
        length * self.factor
    }

    pub fn time_to_length(&self, time: f64) -> f64 {
        time / self.factor
    }
}

/// A round step of about a fifth of `width`: 1, 2 or 5 times a power of ten.
pub fn nice_tick_span(width: f64) -> Option<f64> {
    if !width.is_finite() || width <= 0.0 {
        return None;
    }
    let raw = width / 5.0;
    let base = 10_f64.powf(raw.log10().floor());
    [1.0, 2.0, 5.0, 10.0]
        .into_iter()
        .map(|m| m * base)
        .find(|v| *v >= raw * (1.0 - 1e-9))
        .or(Some(10.0 * base))
}

/// Range and tick placement of the scale axis, in axis units.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleAxis {
    min: f64,
    max: f64,
    manual_spacing: Option<f64>,
    minor_per_major: usize,
}

impl Default for ScaleAxis {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 1.0,
            manual_spacing: None,
            minor_per_major: 1,
        }
    }
}

impl ScaleAxis {
    pub fn range(&self) -> (f64, f64) {
        (self.min, self.max)
    }

    pub fn set_range(&mut self, a: f64, b: f64) {
        if !a.is_finite() || !b.is_finite() {
            warn!("ignoring non-finite axis range {a}..{b}");
            return;
        }
        self.min = a.min(b);
        self.max = a.max(b);
    }

    pub fn manual_spacing(&self) -> Option<f64> {
        self.manual_spacing
    }

    /// `None` (or a non-positive value) chooses spacing automatically.
    pub fn set_manual_spacing(&mut self, spacing: Option<f64>) {
        self.manual_spacing = spacing.filter(|s| s.is_finite() && *s > 0.0);
    }

    pub fn minor_ticks_per_major(&self) -> usize {
        self.minor_per_major
    }

    pub fn set_minor_ticks_per_major(&mut self, count: usize) {
        self.minor_per_major = count;
    }

    pub fn major_spacing(&self) -> Option<f64> {
        self.manual_spacing
            .or_else(|| nice_tick_span(self.max - self.min))
    }

    pub fn major_ticks(&self) -> Vec<f64> {
        match self.major_spacing() {
            Some(spacing) => self.ticks(spacing),
            None => vec![self.min],
        }
    }

    /// Minor ticks, excluding positions already holding a major tick.
    pub fn minor_ticks(&self) -> Vec<f64> {
        let Some(spacing) = self.major_spacing() else {
            return Vec::new();
        };
        if self.minor_per_major == 0 {
            return Vec::new();
        }
        let step = spacing / (self.minor_per_major + 1) as f64;
        let stride = self.minor_per_major as i64 + 1;
        self.tick_indices(step)
            .filter(|index| index.rem_euclid(stride) != 0)
            .map(|index| index as f64 * step)
            .collect()
    }

    fn ticks(&self, step: f64) -> Vec<f64> {
        self.tick_indices(step).map(|index| index as f64 * step).collect()
    }

    fn tick_indices(&self, step: f64) -> impl Iterator<Item = i64> {
        let first = (self.min / step - 1e-9).ceil() as i64;
        let last = (self.max / step + 1e-9).floor() as i64;
        let count = (last - first + 1).max(0) as usize;
        if count > MAX_TICKS {
            warn!("axis spacing {step} gives {count} ticks, keeping {MAX_TICKS}");
        }
        (first..=last).take(MAX_TICKS)
    }

    pub fn format_tick(&self, value: f64) -> String {
        NumberFormat::Decimal.format(value, TICK_DIGITS)
    }
}

/// Labelled bar of a round length of branch.
#[derive(Debug, Clone)]
pub struct ScaleBarPainter {
    base: PainterBase,
    font: FontStyle,
    foreground: Color32,
    stroke: StrokeStyle,
    user_range: Option<f64>,
    top_margin: f64,
    bottom_margin: f64,
}

impl Default for ScaleBarPainter {
    fn default() -> Self {
        Self {
            base: PainterBase::default(),
            font: FontStyle::new(10.0),
            foreground: Color32::BLACK,
            stroke: StrokeStyle::new(1.0),
            user_range: None,
            top_margin: 4.0,
            bottom_margin: 4.0,
        }
    }
}

impl ScaleBarPainter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_font_size(&mut self, size: f64) {
        self.font.size = size.max(1.0);
        self.base.fire_changed();
    }

    pub fn set_line_width(&mut self, width: f64) {
        self.stroke = StrokeStyle::new(width.max(0.0));
        self.base.fire_changed();
    }

    pub fn set_foreground(&mut self, color: Color32) {
        self.foreground = color;
        self.base.fire_settings_changed();
    }

    pub fn user_range(&self) -> Option<f64> {
        self.user_range
    }

    /// Fix the bar length, or choose it from the tree height when `None`.
    pub fn set_user_range(&mut self, range: Option<f64>) {
        self.user_range = range.filter(|r| r.is_finite() && *r > 0.0);
        self.base.fire_changed();
    }

    /// Bar length in branch length units.
    pub fn scale_range(&self, ctx: &ScaleContext<'_>) -> f64 {
        self.user_range
            .or_else(|| nice_tick_span(ctx.tree_height()))
            .unwrap_or(0.0)
    }

    fn label_height(&self, ctx: &ScaleContext<'_>) -> f64 {
        ctx.measure.height(&self.font)
    }
}

impl Painter for ScaleBarPainter {
    fn base(&self) -> &PainterBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PainterBase {
        &mut self.base
    }
}

impl ScalePainter for ScaleBarPainter {
    fn calibrate(&self, ctx: &ScaleContext<'_>) -> Size {
        Size::new(
            ctx.tree_scale() * self.scale_range(ctx),
            self.label_height(ctx) + self.top_margin + self.bottom_margin + self.stroke.width,
        )
    }

    fn paint(
        &self,
        canvas: &mut dyn Canvas,
        ctx: &ScaleContext<'_>,
        justification: Justification,
        bounds: Rect,
    ) {
        let range = self.scale_range(ctx);
        if range <= 0.0 {
            return;
        }
        let width = ctx.tree_scale() * range;
        let label = NumberFormat::Decimal.format(range, TICK_DIGITS);
        let (x1, text_x, anchor) = match justification {
            Justification::Center => (
                bounds.center().x - width / 2.0,
                bounds.center().x,
                TextAnchor::Middle,
            ),
            Justification::Flush | Justification::Left => (bounds.x0, bounds.x0, TextAnchor::Start),
            Justification::Right => (bounds.x1 - width, bounds.x1, TextAnchor::End),
        };
        let paint = Paint::Solid(self.foreground);
        let y = bounds.y0 + self.top_margin;
        canvas.stroke(
            &line_path(Point::new(x1, y), Point::new(x1 + width, y)),
            &self.stroke,
            &paint,
        );

        let label_height = self.label_height(ctx);
        let baseline = bounds.y0
            + self.top_margin
            + self.bottom_margin
            + self.stroke.width
            + label_height / 2.0
            + ctx.measure.baseline_offset(&self.font);
        canvas.text(&label, Point::new(text_x, baseline), anchor, &self.font, &paint);
    }
}

/// Ruled axis under the tree with labelled major ticks.
#[derive(Debug, Clone)]
pub struct ScaleAxisPainter {
    base: PainterBase,
    font: FontStyle,
    foreground: Color32,
    stroke: StrokeStyle,
    major_tick_length: f64,
    minor_tick_length: f64,
    top_margin: f64,
    bottom_margin: f64,
}

impl Default for ScaleAxisPainter {
    fn default() -> Self {
        Self {
            base: PainterBase::hidden(),
            font: FontStyle::new(10.0),
            foreground: Color32::BLACK,
            stroke: StrokeStyle::new(1.0),
            major_tick_length: 5.0,
            minor_tick_length: 2.0,
            top_margin: 4.0,
            bottom_margin: 4.0,
        }
    }
}

impl ScaleAxisPainter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_font_size(&mut self, size: f64) {
        self.font.size = size.max(1.0);
        self.base.fire_changed();
    }

    pub fn set_line_width(&mut self, width: f64) {
        self.stroke = StrokeStyle::new(width.max(0.0));
        self.base.fire_changed();
    }

    pub fn set_foreground(&mut self, color: Color32) {
        self.foreground = color;
        self.base.fire_settings_changed();
    }
}

impl Painter for ScaleAxisPainter {
    fn base(&self) -> &PainterBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PainterBase {
        &mut self.base
    }
}

impl ScalePainter for ScaleAxisPainter {
    fn calibrate(&self, ctx: &ScaleContext<'_>) -> Size {
        if ctx.layout.layout_type() != TreeLayoutType::Rectangular {
            return Size::ZERO;
        }
        Size::new(
            ctx.tree_bounds.width(),
            ctx.measure.height(&self.font)
                + self.top_margin
                + self.bottom_margin
                + self.stroke.width
                + self.major_tick_length,
        )
    }

    fn paint(
        &self,
        canvas: &mut dyn Canvas,
        ctx: &ScaleContext<'_>,
        _justification: Justification,
        bounds: Rect,
    ) {
        if ctx.layout.layout_type() != TreeLayoutType::Rectangular {
            return;
        }
        let paint = Paint::Solid(self.foreground);
        let y = bounds.y0;
        let (min, max) = ctx.axis.range();
        canvas.stroke(
            &line_path(
                Point::new(ctx.scale_on_axis(min), y),
                Point::new(ctx.scale_on_axis(max), y),
            ),
            &self.stroke,
            &paint,
        );

        for value in ctx.axis.minor_ticks() {
            let x = ctx.scale_on_axis(value);
            canvas.stroke(
                &line_path(Point::new(x, y), Point::new(x, y + self.minor_tick_length)),
                &self.stroke,
                &paint,
            );
        }

        let baseline = y
            + self.major_tick_length
            + self.top_margin
            + ctx.measure.height(&self.font) / 2.0
            + ctx.measure.baseline_offset(&self.font);
        for value in ctx.axis.major_ticks() {
            let x = ctx.scale_on_axis(value);
            canvas.stroke(
                &line_path(Point::new(x, y), Point::new(x, y + self.major_tick_length)),
                &self.stroke,
                &paint,
            );
            canvas.text(
                &ctx.axis.format_tick(value),
                Point::new(x, baseline),
                TextAnchor::Middle,
                &self.font,
                &paint,
            );
        }
    }
}

/// Lines of constant axis value across the tree.
#[derive(Debug, Clone)]
pub struct ScaleGridPainter {
    base: PainterBase,
    foreground: Color32,
    major_stroke: StrokeStyle,
    minor_stroke: StrokeStyle,
}

impl Default for ScaleGridPainter {
    fn default() -> Self {
        Self {
            base: PainterBase::hidden(),
            foreground: Color32::from_gray(200),
            major_stroke: StrokeStyle::new(0.5),
            minor_stroke: StrokeStyle::new(0.25),
        }
    }
}

impl ScaleGridPainter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_foreground(&mut self, color: Color32) {
        self.foreground = color;
        self.base.fire_settings_changed();
    }

    pub fn set_strokes(&mut self, major: StrokeStyle, minor: StrokeStyle) {
        self.major_stroke = major;
        self.minor_stroke = minor;
        self.base.fire_settings_changed();
    }
}

impl Painter for ScaleGridPainter {
    fn base(&self) -> &PainterBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PainterBase {
        &mut self.base
    }
}

impl ScalePainter for ScaleGridPainter {
    /// The grid lies over the tree and takes no space of its own.
    fn calibrate(&self, _ctx: &ScaleContext<'_>) -> Size {
        Size::ZERO
    }

    fn paint(
        &self,
        canvas: &mut dyn Canvas,
        ctx: &ScaleContext<'_>,
        _justification: Justification,
        _bounds: Rect,
    ) {
        if ctx.layout.layout_type() == TreeLayoutType::Radial {
            return;
        }
        let paint = Paint::Solid(self.foreground);
        let lines = ctx
            .axis
            .minor_ticks()
            .into_iter()
            .map(|value| (value, &self.minor_stroke))
            .chain(
                ctx.axis
                    .major_ticks()
                    .into_iter()
                    .map(|value| (value, &self.major_stroke)),
            );
        for (value, stroke) in lines {
            if let Some(line) = ctx.axis_line(value) {
                canvas.stroke(&line, stroke, &paint);
            }
        }
    }
}
