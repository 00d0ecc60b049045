//! Painters draw the parts of a tree that do not scale with branch lengths:
//! labels, node shapes, node bars, scales and the legend.
//!
//! Each painter reports a preferred size during calibration and is later asked
//! to paint inside the bounds the calibration gave it.

use std::fmt;
use std::rc::Weak;

use vello::kurbo::{Affine, BezPath, Point, Rect, Size};

use super::events::{Listeners, PainterListener};
use super::layout::{TreeLayout, TreeLayoutCache};
use super::scene_graph::{Canvas, TextMeasure};
use super::Tree;

mod label;
mod legend;
mod node;
mod scale;

pub use label::{LabelDisplay, LabelIntent, LabelPainter};
pub use legend::LegendPainter;
pub use node::{NodeBarPainter, NodeShapePainter, NodeTarget, ShapeType};
pub use scale::{
    nice_tick_span, ScaleAxis, ScaleAxisPainter, ScaleBarPainter, ScaleGridPainter, TimeScale,
};

/// Placement of content inside the bounds a painter is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Justification {
    Flush,
    Left,
    Right,
    Center,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NumberFormat {
    #[default]
    Decimal,
    Scientific,
    Percentage,
}

impl NumberFormat {
    pub const ALL: [NumberFormat; 3] = [
        NumberFormat::Decimal,
        NumberFormat::Scientific,
        NumberFormat::Percentage,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Decimal => "Decimal",
            Self::Scientific => "Scientific",
            Self::Percentage => "Percentage",
        }
    }

    /// Format with at most `digits` fractional digits. Decimal output drops
    /// trailing zeros.
    pub fn format(self, value: f64, digits: usize) -> String {
        match self {
            NumberFormat::Decimal => trim_zeros(format!("{value:.digits$}")),
            NumberFormat::Scientific => format!("{value:.digits$e}"),
            NumberFormat::Percentage => {
                let percent = value * 100.0;
                format!("{}%", trim_zeros(format!("{percent:.digits$}")))
            }
        }
    }
}

fn trim_zeros(text: String) -> String {
    if !text.contains('.') {
        return text;
    }
    let trimmed = text.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Visibility and listener registry shared by all painters.
#[derive(Debug, Clone)]
pub struct PainterBase {
    pub visible: bool,
    pub listeners: Listeners<dyn PainterListener>,
}

impl Default for PainterBase {
    fn default() -> Self {
        Self {
            visible: true,
            listeners: Listeners::new(),
        }
    }
}

impl PainterBase {
    pub fn hidden() -> Self {
        Self {
            visible: false,
            ..Self::default()
        }
    }

    /// What is drawn changed, so the layout needs new space.
    pub fn fire_changed(&mut self) {
        self.listeners.fire(|listener| listener.painter_changed());
    }

    /// How it is drawn changed.
    pub fn fire_settings_changed(&mut self) {
        self.listeners.fire(|listener| listener.painter_settings_changed());
    }

    pub fn fire_attributes_changed(&mut self) {
        self.listeners.fire(|listener| listener.attributes_changed());
    }
}

pub trait Painter {
    fn base(&self) -> &PainterBase;

    fn base_mut(&mut self) -> &mut PainterBase;

    fn is_visible(&self) -> bool {
        self.base().visible
    }

    fn set_visible(&mut self, visible: bool) {
        let base = self.base_mut();
        if base.visible != visible {
            base.visible = visible;
            base.fire_changed();
        }
    }

    fn add_listener(&mut self, listener: Weak<dyn PainterListener>) {
        self.base_mut().listeners.add(listener);
    }
}

/// What per-node painters need to know about the tree being drawn.
#[derive(Clone, Copy)]
pub struct PainterContext<'a> {
    pub tree: &'a Tree,
    pub heights: &'a [f64],
    pub cache: &'a TreeLayoutCache,
    pub time_scale: TimeScale,
    pub measure: TextMeasure,
}

impl<'a> PainterContext<'a> {
    pub fn height(&self, node: usize) -> f64 {
        self.heights.get(node).copied().unwrap_or(0.0)
    }
}

/// What scale painters and the legend need to know about the pane.
#[derive(Clone, Copy)]
pub struct ScaleContext<'a> {
    pub tree: &'a Tree,
    pub layout: &'a dyn TreeLayout,
    /// Layout to device transform. Identity before the final transform is known.
    pub transform: Affine,
    /// Device bounds of the tree proper.
    pub tree_bounds: Rect,
    pub axis: &'a ScaleAxis,
    pub time_scale: TimeScale,
    pub measure: TextMeasure,
}

impl<'a> ScaleContext<'a> {
    /// Pixels per unit of branch length.
    pub fn tree_scale(&self) -> f64 {
        let unit = self.transform * Point::new(1.0, 0.0) - self.transform * Point::ORIGIN;
        unit.hypot()
    }

    pub fn tree_height(&self) -> f64 {
        self.tree.root_height()
    }

    /// Device x coordinate of an axis value.
    pub fn scale_on_axis(&self, value: f64) -> f64 {
        let height = self.time_scale.height(value);
        (self.transform * Point::new(self.layout.axis_position(height), 0.0)).x
    }

    /// Device geometry of the grid line through an axis value.
    pub fn axis_line(&self, value: f64) -> Option<BezPath> {
        let height = self.time_scale.height(value);
        self.layout
            .axis_line(height)
            .map(|line| self.transform * line)
    }
}

/// Painters that draw once per pane in a panel of their own.
pub trait ScalePainter: Painter + fmt::Debug {
    fn calibrate(&self, ctx: &ScaleContext<'_>) -> Size;

    fn paint(
        &self,
        canvas: &mut dyn Canvas,
        ctx: &ScaleContext<'_>,
        justification: Justification,
        bounds: Rect,
    );
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn decimal_output_drops_trailing_zeros() {
        assert_eq!(NumberFormat::Decimal.format(0.5, 4), "0.5");
        assert_eq!(NumberFormat::Decimal.format(2.0, 4), "2");
        assert_eq!(NumberFormat::Decimal.format(1.23456, 2), "1.23");
        assert_eq!(NumberFormat::Decimal.format(-0.00001, 2), "0");
        assert_eq!(NumberFormat::Percentage.format(0.955, 1), "95.5%");
        assert_eq!(NumberFormat::Scientific.format(1234.0, 2), "1.23e3");
    }

    struct Count(Cell<usize>);

    impl PainterListener for Count {
        fn painter_changed(&self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[derive(Default)]
    struct Dummy {
        base: PainterBase,
    }

    impl Painter for Dummy {
        fn base(&self) -> &PainterBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut PainterBase {
            &mut self.base
        }
    }

    #[test]
    fn visibility_changes_notify_once() {
        let count = Rc::new(Count(Cell::new(0)));
        let weak: Weak<dyn PainterListener> = Rc::downgrade(&count) as Weak<_>;
        let mut painter = Dummy::default();
        painter.add_listener(weak);
        painter.set_visible(false);
        painter.set_visible(false);
        painter.set_visible(true);
        assert_eq!(count.0.get(), 2);
    }
}
