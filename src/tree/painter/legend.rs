use std::rc::Rc;

use eframe::egui::Color32;
use vello::kurbo::{Point, Rect, Shape, Size};

use super::{Justification, Painter, PainterBase, ScaleContext, ScalePainter};
use crate::tree::decorator::Decorator;
use crate::tree::scene_graph::{Canvas, FontStyle, Paint, StrokeStyle, TextAnchor};

/// Colour key for a discrete decorator, drawn in a panel beside the tree.
#[derive(Debug, Clone)]
pub struct LegendPainter {
    base: PainterBase,
    font: FontStyle,
    foreground: Color32,
    title: Option<String>,
    decorator: Option<Rc<dyn Decorator>>,
    swatch: f64,
    margin: f64,
    spacing: f64,
}

impl Default for LegendPainter {
    fn default() -> Self {
        Self {
            base: PainterBase::hidden(),
            font: FontStyle::new(10.0),
            foreground: Color32::BLACK,
            title: None,
            decorator: None,
            swatch: 10.0,
            margin: 4.0,
            spacing: 2.0,
        }
    }
}

impl LegendPainter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_font_size(&mut self, size: f64) {
        self.font.size = size.max(1.0);
        self.base.fire_changed();
    }

    pub fn set_foreground(&mut self, color: Color32) {
        self.foreground = color;
        self.base.fire_settings_changed();
    }

    /// Show the entries of `decorator`, titled with its attribute name.
    pub fn set_decorator(&mut self, decorator: Option<Rc<dyn Decorator>>) {
        self.title = decorator
            .as_ref()
            .and_then(|decorator| decorator.attribute_name())
            .map(str::to_string);
        self.decorator = decorator;
        self.base.fire_changed();
    }

    pub fn set_title(&mut self, title: Option<String>) {
        self.title = title;
        self.base.fire_changed();
    }

    pub fn entries(&self) -> Vec<(String, Color32)> {
        self.decorator
            .as_ref()
            .map(|decorator| decorator.legend_entries())
            .unwrap_or_default()
    }

    fn row_height(&self, line_height: f64) -> f64 {
        line_height.max(self.swatch) + self.spacing
    }
}

impl Painter for LegendPainter {
    fn base(&self) -> &PainterBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PainterBase {
        &mut self.base
    }
}

impl ScalePainter for LegendPainter {
    fn calibrate(&self, ctx: &ScaleContext<'_>) -> Size {
        let entries = self.entries();
        if entries.is_empty() {
            return Size::ZERO;
        }
        let line_height = ctx.measure.height(&self.font);
        let label_width = entries
            .iter()
            .map(|(label, _)| ctx.measure.width(label, &self.font))
            .fold(0.0, f64::max);
        let title = self.title.as_deref().map(|title| {
            let bold = FontStyle {
                bold: true,
                ..self.font.clone()
            };
            ctx.measure.width(title, &bold)
        });
        let width = (self.swatch + self.spacing * 2.0 + label_width).max(title.unwrap_or(0.0));
        let title_height = title.map_or(0.0, |_| line_height + self.spacing);
        Size::new(
            width + self.margin * 2.0,
            title_height + entries.len() as f64 * self.row_height(line_height) + self.margin * 2.0,
        )
    }

    fn paint(
        &self,
        canvas: &mut dyn Canvas,
        ctx: &ScaleContext<'_>,
        _justification: Justification,
        bounds: Rect,
    ) {
        let entries = self.entries();
        if entries.is_empty() {
            return;
        }
        let line_height = ctx.measure.height(&self.font);
        let baseline = line_height / 2.0 + ctx.measure.baseline_offset(&self.font);
        let text = Paint::Solid(self.foreground);
        let x = bounds.x0 + self.margin;
        let mut y = bounds.y0 + self.margin;

        if let Some(title) = &self.title {
            let bold = FontStyle {
                bold: true,
                ..self.font.clone()
            };
            canvas.text(title, Point::new(x, y + baseline), TextAnchor::Start, &bold, &text);
            y += line_height + self.spacing;
        }

        let row = self.row_height(line_height);
        for (label, color) in entries {
            let center_y = y + (row - self.spacing) / 2.0;
            let swatch = Rect::from_center_size(
                Point::new(x + self.swatch / 2.0, center_y),
                (self.swatch, self.swatch),
            );
            canvas.fill_rect(swatch, &Paint::Solid(color));
            canvas.stroke(
                &swatch.to_path(0.1),
                &StrokeStyle::new(0.5),
                &Paint::Solid(Color32::BLACK),
            );
            canvas.text(
                &label,
                Point::new(
                    x + self.swatch + self.spacing * 2.0,
                    center_y + ctx.measure.baseline_offset(&self.font),
                ),
                TextAnchor::Start,
                &self.font,
                &text,
            );
            y += row;
        }
    }
}
