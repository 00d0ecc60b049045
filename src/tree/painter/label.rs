use std::rc::Rc;

use eframe::egui::Color32;
use log::debug;
use vello::kurbo::{Point, Rect, Shape, Size};

use super::{Justification, NumberFormat, Painter, PainterBase, PainterContext};
use crate::tree::decorator::{DecoratedItem, Decorator};
use crate::tree::scene_graph::{Canvas, FontStyle, Paint, StrokeStyle, TextAnchor};
use crate::tree::{AttributeValue, NodeId, Tree};

/// Which anchors a label painter is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelIntent {
    Tip,
    Node,
    Branch,
}

impl LabelIntent {
    pub fn label(self) -> &'static str {
        match self {
            LabelIntent::Tip => "Tip Labels",
            LabelIntent::Node => "Node Labels",
            LabelIntent::Branch => "Branch Labels",
        }
    }
}

/// What a label shows for a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LabelDisplay {
    Names,
    NodeAges,
    NodeHeights,
    BranchLengths,
    Attribute(String),
}

impl LabelDisplay {
    pub fn label(&self) -> &str {
        match self {
            LabelDisplay::Names => "Names",
            LabelDisplay::NodeAges => "Node ages",
            LabelDisplay::NodeHeights => "Node heights",
            LabelDisplay::BranchLengths => "Branch lengths",
            LabelDisplay::Attribute(key) => key,
        }
    }

    /// Parse the persisted form written by [`LabelDisplay::label`].
    pub fn from_label(label: &str) -> Self {
        match label {
            "Names" => LabelDisplay::Names,
            "Node ages" => LabelDisplay::NodeAges,
            "Node heights" => LabelDisplay::NodeHeights,
            "Branch lengths" => LabelDisplay::BranchLengths,
            other => LabelDisplay::Attribute(other.to_string()),
        }
    }
}

/// Draws one text label per anchor, for tips, internal nodes or branches.
#[derive(Debug, Clone)]
pub struct LabelPainter {
    base: PainterBase,
    intent: LabelIntent,
    display: LabelDisplay,
    displays: Vec<LabelDisplay>,
    font: FontStyle,
    foreground: Color32,
    background: Option<Color32>,
    border: Option<(Color32, StrokeStyle)>,
    number_format: NumberFormat,
    digits: usize,
    text_decorator: Option<Rc<dyn Decorator>>,
}

impl LabelPainter {
    pub fn new(intent: LabelIntent) -> Self {
        let (base, display) = match intent {
            LabelIntent::Tip => (PainterBase::default(), LabelDisplay::Names),
            LabelIntent::Node => (PainterBase::hidden(), LabelDisplay::NodeAges),
            LabelIntent::Branch => (PainterBase::hidden(), LabelDisplay::BranchLengths),
        };
        let font = match intent {
            LabelIntent::Tip => FontStyle::new(12.0),
            _ => FontStyle::new(9.0),
        };
        Self {
            base,
            intent,
            display,
            displays: default_displays(),
            font,
            foreground: Color32::BLACK,
            background: None,
            border: None,
            number_format: NumberFormat::Decimal,
            digits: 4,
            text_decorator: None,
        }
    }

    pub fn intent(&self) -> LabelIntent {
        self.intent
    }

    pub fn display(&self) -> &LabelDisplay {
        &self.display
    }

    pub fn set_display(&mut self, display: LabelDisplay) {
        if self.display != display {
            self.display = display;
            self.base.fire_changed();
        }
    }

    /// Displays offered for the current tree.
    pub fn displays(&self) -> &[LabelDisplay] {
        &self.displays
    }

    /// Refresh the offered displays from the user attributes of `tree`.
    pub fn setup_attributes(&mut self, tree: &Tree) {
        let mut displays = default_displays();
        displays.extend(
            tree.node_attribute_keys()
                .into_iter()
                .filter(|key| !key.starts_with('!'))
                .map(LabelDisplay::Attribute),
        );
        debug!("{}: {} display option(s)", self.intent.label(), displays.len());
        self.displays = displays;
        self.base.fire_attributes_changed();
    }

    pub fn font(&self) -> &FontStyle {
        &self.font
    }

    pub fn set_font_size(&mut self, size: f64) {
        self.font.size = size.max(1.0);
        self.base.fire_changed();
    }

    pub fn set_bold(&mut self, bold: bool) {
        self.font.bold = bold;
        self.base.fire_changed();
    }

    pub fn foreground(&self) -> Color32 {
        self.foreground
    }

    pub fn set_foreground(&mut self, color: Color32) {
        self.foreground = color;
        self.base.fire_settings_changed();
    }

    pub fn set_background(&mut self, color: Option<Color32>) {
        self.background = color;
        self.base.fire_settings_changed();
    }

    pub fn set_border(&mut self, border: Option<(Color32, StrokeStyle)>) {
        self.border = border;
        self.base.fire_settings_changed();
    }

    pub fn number_format(&self) -> NumberFormat {
        self.number_format
    }

    pub fn digits(&self) -> usize {
        self.digits
    }

    pub fn set_number_format(&mut self, format: NumberFormat, digits: usize) {
        self.number_format = format;
        self.digits = digits;
        self.base.fire_changed();
    }

    pub fn set_text_decorator(&mut self, decorator: Option<Rc<dyn Decorator>>) {
        self.text_decorator = decorator;
        self.base.fire_settings_changed();
    }

    /// Text shown for `node`, `None` when there is nothing to show.
    pub fn label_text(&self, ctx: &PainterContext<'_>, node: NodeId) -> Option<String> {
        let tree_node = ctx.tree.node(node)?;
        let text = match &self.display {
            LabelDisplay::Names => {
                let clade_label = [crate::tree::COLLAPSE_ATTRIBUTE, crate::tree::CARTOON_ATTRIBUTE]
                    .into_iter()
                    .filter_map(|key| tree_node.attribute(key))
                    .filter_map(AttributeValue::as_clade)
                    .find_map(|summary| summary.label.clone());
                clade_label.or_else(|| tree_node.name.clone())
            }
            LabelDisplay::NodeAges => Some(self.format(ctx.time_scale.age(ctx.height(node)))),
            LabelDisplay::NodeHeights => Some(self.format(ctx.height(node))),
            LabelDisplay::BranchLengths => tree_node
                .parent
                .map(|_| self.format(ctx.time_scale.length_to_time(ctx.tree.length(node)))),
            LabelDisplay::Attribute(key) => tree_node.attribute(key).map(|value| match value {
                AttributeValue::Number(number) => self.format(*number),
                AttributeValue::Range(_) => match value.as_range() {
                    Some((low, high)) => format!("[{},{}]", self.format(low), self.format(high)),
                    None => value.to_string(),
                },
                other => other.to_string(),
            }),
        };
        text.filter(|text| !text.is_empty())
    }

    fn format(&self, value: f64) -> String {
        self.number_format.format(value, self.digits)
    }

    fn font_for(&self, node: &crate::tree::TreeNode) -> FontStyle {
        match &self.text_decorator {
            Some(decorator) => decorator.font(DecoratedItem::Node(node), &self.font),
            None => self.font.clone(),
        }
    }

    /// Size of the label for `node`; zero when it has none.
    pub fn calibrate(&self, ctx: &PainterContext<'_>, node: NodeId) -> Size {
        let (Some(text), Some(tree_node)) = (self.label_text(ctx, node), ctx.tree.node(node)) else {
            return Size::ZERO;
        };
        ctx.measure.size(&text, &self.font_for(tree_node))
    }

    /// Height reserved above branches for branch labels.
    pub fn height_bound(&self, ctx: &PainterContext<'_>) -> f64 {
        ctx.measure.height(&self.font)
    }

    /// Draw the label of `node` inside `bounds`, in the canvas' current
    /// coordinates.
    pub fn paint(
        &self,
        canvas: &mut dyn Canvas,
        ctx: &PainterContext<'_>,
        node: NodeId,
        justification: Justification,
        bounds: Rect,
    ) {
        let (Some(text), Some(tree_node)) = (self.label_text(ctx, node), ctx.tree.node(node)) else {
            return;
        };

        if let Some(background) = self.background {
            canvas.fill_rect(bounds, &Paint::Solid(background));
        }
        if let Some((color, stroke)) = &self.border {
            canvas.stroke(&bounds.to_path(0.1), stroke, &Paint::Solid(*color));
        }

        let font = self.font_for(tree_node);
        let paint = match &self.text_decorator {
            Some(decorator) => {
                decorator.paint(DecoratedItem::Node(tree_node), &Paint::Solid(self.foreground))
            }
            None => Paint::Solid(self.foreground),
        };
        let baseline = bounds.center().y + ctx.measure.baseline_offset(&font);
        let (x, anchor) = match justification {
            Justification::Flush | Justification::Left => (bounds.x0, TextAnchor::Start),
            Justification::Right => (bounds.x1, TextAnchor::End),
            Justification::Center => (bounds.center().x, TextAnchor::Middle),
        };
        canvas.text(&text, Point::new(x, baseline), anchor, &font, &paint);
    }
}

impl Painter for LabelPainter {
    fn base(&self) -> &PainterBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PainterBase {
        &mut self.base
    }
}

fn default_displays() -> Vec<LabelDisplay> {
    vec![
        LabelDisplay::Names,
        LabelDisplay::NodeAges,
        LabelDisplay::NodeHeights,
        LabelDisplay::BranchLengths,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::decorator::FixedColourDecorator;
    use crate::tree::layout::TreeLayoutCache;
    use crate::tree::painter::TimeScale;
    use crate::tree::scene_graph::{SceneRecorder, ScenePrimitive, TextMeasure};
    use crate::tree::test_support::{node_named, tree_from_newick};

    fn context<'a>(tree: &'a Tree, heights: &'a [f64], cache: &'a TreeLayoutCache) -> PainterContext<'a> {
        PainterContext {
            tree,
            heights,
            cache,
            time_scale: TimeScale::default(),
            measure: TextMeasure::default(),
        }
    }

    #[test]
    fn displays_pick_the_right_text() {
        let mut tree = tree_from_newick("((A:1,B:1):0.5,C:1.5);");
        let a = node_named(&tree, "A");
        let clade = tree.parent(a).unwrap();
        tree.nodes[clade].set_attribute("posterior", AttributeValue::Number(0.98765));
        tree.nodes[clade].set_attribute("range", AttributeValue::Range(vec![1.0, 2.25]));
        let heights = tree.node_heights();
        let cache = TreeLayoutCache::default();
        let ctx = context(&tree, &heights, &cache);

        let mut painter = LabelPainter::new(LabelIntent::Node);
        assert_eq!(painter.label_text(&ctx, a).as_deref(), Some("0"));
        assert_eq!(painter.label_text(&ctx, clade).as_deref(), Some("1"));

        painter.set_display(LabelDisplay::Attribute("posterior".into()));
        painter.set_number_format(NumberFormat::Decimal, 2);
        assert_eq!(painter.label_text(&ctx, clade).as_deref(), Some("0.99"));
        assert_eq!(painter.label_text(&ctx, a), None);

        painter.set_display(LabelDisplay::Attribute("range".into()));
        assert_eq!(painter.label_text(&ctx, clade).as_deref(), Some("[1,2.25]"));

        painter.set_display(LabelDisplay::BranchLengths);
        assert_eq!(painter.label_text(&ctx, clade).as_deref(), Some("0.5"));
        assert_eq!(painter.label_text(&ctx, tree.root.unwrap()), None);
    }

    #[test]
    fn node_ages_follow_the_time_scale() {
        let tree = tree_from_newick("((A:1,B:1):1,C:2);");
        let heights = tree.node_heights();
        let cache = TreeLayoutCache::default();
        let mut ctx = context(&tree, &heights, &cache);
        ctx.time_scale = TimeScale::from_root_age(100.0, tree.root_height());
        let painter = LabelPainter::new(LabelIntent::Node);
        let clade = tree.parent(node_named(&tree, "A")).unwrap();
        assert_eq!(painter.label_text(&ctx, clade).as_deref(), Some("50"));
    }

    #[test]
    fn collapsed_clades_show_their_label() {
        let mut tree = tree_from_newick("((A:1,B:1):1,C:2);");
        let clade = tree.parent(node_named(&tree, "A")).unwrap();
        tree.nodes[clade].set_attribute(
            crate::tree::COLLAPSE_ATTRIBUTE,
            AttributeValue::Clade(crate::tree::CladeSummary {
                tip_count: 2,
                min_tip_height: 0.0,
                label: Some("AB clade".into()),
                color: None,
            }),
        );
        let heights = tree.node_heights();
        let cache = TreeLayoutCache::default();
        let ctx = context(&tree, &heights, &cache);
        let painter = LabelPainter::new(LabelIntent::Tip);
        assert_eq!(painter.label_text(&ctx, clade).as_deref(), Some("AB clade"));
    }

    #[test]
    fn calibration_grows_with_font_size() {
        let tree = tree_from_newick("(Alpha:1,B:1);");
        let heights = tree.node_heights();
        let cache = TreeLayoutCache::default();
        let ctx = context(&tree, &heights, &cache);
        let alpha = node_named(&tree, "Alpha");
        let mut painter = LabelPainter::new(LabelIntent::Tip);
        let small = painter.calibrate(&ctx, alpha);
        painter.set_font_size(24.0);
        let large = painter.calibrate(&ctx, alpha);
        assert!(large.width > small.width && large.height > small.height);
        assert_eq!(painter.calibrate(&ctx, tree.root.unwrap()), Size::ZERO);
    }

    #[test]
    fn paint_anchors_by_justification_and_uses_the_decorator() {
        let tree = tree_from_newick("(A:1,B:1);");
        let heights = tree.node_heights();
        let cache = TreeLayoutCache::default();
        let ctx = context(&tree, &heights, &cache);
        let a = node_named(&tree, "A");
        let mut painter = LabelPainter::new(LabelIntent::Tip);
        painter.set_text_decorator(Some(Rc::new(FixedColourDecorator::new(Color32::RED))));

        let mut recorder = SceneRecorder::new(100.0, 100.0);
        let bounds = Rect::new(10.0, 0.0, 50.0, 12.0);
        painter.paint(&mut recorder, &ctx, a, Justification::Right, bounds);
        painter.paint(&mut recorder, &ctx, a, Justification::Left, bounds);
        let scene = recorder.finish();
        let anchors: Vec<_> = scene
            .primitives
            .iter()
            .filter_map(|primitive| match primitive {
                ScenePrimitive::Text {
                    anchor,
                    transform,
                    paint,
                    ..
                } => Some((*anchor, transform.translation().x, paint.color())),
                _ => None,
            })
            .collect();
        assert_eq!(anchors[0].0, TextAnchor::End);
        assert!((anchors[0].1 - 50.0).abs() < 1e-9);
        assert_eq!(anchors[1].0, TextAnchor::Start);
        assert!((anchors[1].1 - 10.0).abs() < 1e-9);
        assert_eq!(anchors[0].2, Color32::RED);
        assert!(scene.primitives[0].bounds(&TextMeasure::default()).area() > 0.0);
    }
}
