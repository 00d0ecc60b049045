use std::rc::Rc;

use eframe::egui::Color32;
use log::debug;
use vello::kurbo::{BezPath, Circle, Line, Point, Rect, Shape, Vec2};

use super::{Painter, PainterBase, PainterContext};
use crate::tree::decorator::{DecoratedItem, Decorator};
use crate::tree::scene_graph::{Canvas, Paint, StrokeStyle};
use crate::tree::{NodeId, Tree, TreeNode};

const OUTLINE_WIDTH: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ShapeType {
    #[default]
    Circle,
    Square,
    Diamond,
}

impl ShapeType {
    pub const ALL: [ShapeType; 3] = [ShapeType::Circle, ShapeType::Square, ShapeType::Diamond];

    pub fn label(self) -> &'static str {
        match self {
            Self::Circle => "Circle",
            Self::Square => "Square",
            Self::Diamond => "Diamond",
        }
    }

    /// Outline of this shape with the given diameter.
    pub fn path(self, center: Point, size: f64) -> BezPath {
        let r = size / 2.0;
        match self {
            ShapeType::Circle => Circle::new(center, r).to_path(0.05),
            ShapeType::Square => Rect::from_center_size(center, (size, size)).to_path(0.05),
            ShapeType::Diamond => {
                let mut path = BezPath::new();
                path.move_to((center.x, center.y - r));
                path.line_to((center.x + r, center.y));
                path.line_to((center.x, center.y + r));
                path.line_to((center.x - r, center.y));
                path.close_path();
                path
            }
        }
    }
}

/// Which nodes get a shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NodeTarget {
    Tips,
    #[default]
    Internal,
    Both,
}

impl NodeTarget {
    pub const ALL: [NodeTarget; 3] = [NodeTarget::Tips, NodeTarget::Internal, NodeTarget::Both];

    pub fn label(self) -> &'static str {
        match self {
            Self::Tips => "Tips",
            Self::Internal => "Internal nodes",
            Self::Both => "All nodes",
        }
    }

    pub fn applies_to(self, tree: &Tree, node: NodeId) -> bool {
        match self {
            NodeTarget::Tips => tree.is_external(node),
            NodeTarget::Internal => !tree.is_external(node),
            NodeTarget::Both => true,
        }
    }
}

/// Draws a circle, square or diamond on nodes, optionally sized by a numeric
/// attribute.
#[derive(Debug, Clone)]
pub struct NodeShapePainter {
    base: PainterBase,
    shape: ShapeType,
    target: NodeTarget,
    size: f64,
    size_attribute: Option<String>,
    min_size: f64,
    max_size: f64,
    /// Observed range of the size attribute, refreshed by `setup_attributes`.
    value_range: Option<(f64, f64)>,
    foreground: Color32,
    decorator: Option<Rc<dyn Decorator>>,
}

impl Default for NodeShapePainter {
    fn default() -> Self {
        Self {
            base: PainterBase::hidden(),
            shape: ShapeType::Circle,
            target: NodeTarget::Internal,
            size: 4.0,
            size_attribute: None,
            min_size: 2.0,
            max_size: 10.0,
            value_range: None,
            foreground: Color32::GRAY,
            decorator: None,
        }
    }
}

impl NodeShapePainter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shape(&self) -> ShapeType {
        self.shape
    }

    pub fn set_shape(&mut self, shape: ShapeType) {
        self.shape = shape;
        self.base.fire_settings_changed();
    }

    pub fn target(&self) -> NodeTarget {
        self.target
    }

    pub fn set_target(&mut self, target: NodeTarget) {
        self.target = target;
        self.base.fire_changed();
    }

    pub fn size(&self) -> f64 {
        self.size
    }

    pub fn set_size(&mut self, size: f64) {
        self.size = size.max(0.0);
        self.base.fire_changed();
    }

    pub fn size_attribute(&self) -> Option<&str> {
        self.size_attribute.as_deref()
    }

    /// Scale shapes between `min_size` and `max_size` by `attribute`, or use the
    /// fixed size when `None`.
    pub fn set_size_attribute(&mut self, attribute: Option<String>, min_size: f64, max_size: f64) {
        self.size_attribute = attribute;
        self.min_size = min_size.max(0.0);
        self.max_size = max_size.max(self.min_size);
        self.value_range = None;
        self.base.fire_changed();
    }

    pub fn set_foreground(&mut self, color: Color32) {
        self.foreground = color;
        self.base.fire_settings_changed();
    }

    pub fn set_decorator(&mut self, decorator: Option<Rc<dyn Decorator>>) {
        self.decorator = decorator;
        self.base.fire_settings_changed();
    }

    /// Record the range of the size attribute over `tree`.
    pub fn setup_attributes(&mut self, tree: &Tree) {
        self.value_range = self.size_attribute.as_deref().and_then(|key| {
            tree.nodes
                .iter()
                .filter_map(|node| node.numeric_attribute(key))
                .filter(|value| value.is_finite())
                .fold(None, |range: Option<(f64, f64)>, value| match range {
                    Some((low, high)) => Some((low.min(value), high.max(value))),
                    None => Some((value, value)),
                })
        });
        debug!("node shape size range: {:?}", self.value_range);
        self.base.fire_attributes_changed();
    }

    /// Diameter in pixels of the shape for `node`, `None` when it gets none.
    pub fn shape_size(&self, tree: &Tree, node: NodeId) -> Option<f64> {
        if !self.target.applies_to(tree, node) {
            return None;
        }
        let size = match self.size_attribute.as_deref() {
            None => self.size,
            Some(key) => {
                let value = tree.node(node)?.numeric_attribute(key)?;
                match self.value_range {
                    Some((low, high)) if (high - low).abs() > f64::EPSILON => {
                        let t = ((value - low) / (high - low)).clamp(0.0, 1.0);
                        self.min_size + (self.max_size - self.min_size) * t
                    }
                    _ => self.max_size,
                }
            }
        };
        (size > 0.0).then_some(size)
    }

    /// Bounds of the shape placed at the layout position of `node`.
    pub fn calibrate(&self, ctx: &PainterContext<'_>, node: NodeId) -> Option<Rect> {
        let anchor = ctx.cache.node_shape_paths.get(&node)?;
        let size = self.shape_size(ctx.tree, node)?;
        Some(Rect::from_center_size(anchor.p0, (size, size)))
    }

    /// Draw the shape centred on `center`, in device coordinates.
    pub fn paint(&self, canvas: &mut dyn Canvas, node: &TreeNode, center: Point, size: f64) {
        let path = self.shape.path(center, size);
        let default = Paint::Solid(self.foreground);
        let paint = match &self.decorator {
            Some(decorator) => decorator.paint(DecoratedItem::Node(node), &default),
            None => default,
        };
        canvas.fill(&path, &paint);
        canvas.stroke(
            &path,
            &StrokeStyle::new(OUTLINE_WIDTH),
            &Paint::Solid(Color32::BLACK),
        );
    }
}

impl Painter for NodeShapePainter {
    fn base(&self) -> &PainterBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PainterBase {
        &mut self.base
    }
}

/// Draws the interval of a range attribute, usually an HPD interval of node
/// heights, as a bar along the height axis.
#[derive(Debug, Clone)]
pub struct NodeBarPainter {
    base: PainterBase,
    attribute: String,
    width: f64,
    foreground: Color32,
}

impl Default for NodeBarPainter {
    fn default() -> Self {
        Self {
            base: PainterBase::hidden(),
            attribute: "height_95%_HPD".to_string(),
            width: 4.0,
            foreground: Color32::from_rgba_unmultiplied(0, 0, 255, 128),
        }
    }
}

impl NodeBarPainter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    pub fn set_attribute(&mut self, attribute: impl Into<String>) {
        self.attribute = attribute.into();
        self.base.fire_changed();
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn set_width(&mut self, width: f64) {
        self.width = width.max(0.0);
        self.base.fire_changed();
    }

    pub fn set_foreground(&mut self, color: Color32) {
        self.foreground = color;
        self.base.fire_settings_changed();
    }

    /// Layout-space segment spanned by the bar of `node`.
    ///
    /// The node shape anchor points one unit towards the root, so heights
    /// above the node extend along it.
    pub fn bar(&self, ctx: &PainterContext<'_>, node: NodeId) -> Option<Line> {
        if ctx.tree.is_external(node) {
            return None;
        }
        let (lower, upper) = ctx
            .tree
            .node(node)?
            .numeric_range_attribute(&self.attribute)?;
        let anchor = ctx.cache.node_shape_paths.get(&node)?;
        let direction = anchor.p1 - anchor.p0;
        let height = ctx.height(node);
        Some(Line::new(
            anchor.p0 + direction * (lower - height),
            anchor.p0 + direction * (upper - height),
        ))
    }

    /// Outline of a bar drawn over `line`, in the same coordinates.
    pub fn bar_outline(&self, line: Line) -> BezPath {
        let along = line.p1 - line.p0;
        let normal = if along.hypot() > f64::EPSILON {
            Vec2::new(-along.y, along.x).normalize() * (self.width / 2.0)
        } else {
            Vec2::new(0.0, self.width / 2.0)
        };
        let mut path = BezPath::new();
        path.move_to(line.p0 + normal);
        path.line_to(line.p1 + normal);
        path.line_to(line.p1 - normal);
        path.line_to(line.p0 - normal);
        path.close_path();
        path
    }

    /// Draw a bar over a device-space segment.
    pub fn paint(&self, canvas: &mut dyn Canvas, line: Line) {
        let outline = self.bar_outline(line);
        canvas.fill(&outline, &Paint::Solid(self.foreground));
        canvas.stroke(
            &outline,
            &StrokeStyle::new(OUTLINE_WIDTH),
            &Paint::Solid(Color32::BLACK),
        );
    }
}

impl Painter for NodeBarPainter {
    fn base(&self) -> &PainterBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PainterBase {
        &mut self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::layout::{TreeLayout, TreeLayoutCache, RectilinearTreeLayout};
    use crate::tree::painter::TimeScale;
    use crate::tree::scene_graph::{SceneRecorder, ScenePrimitive, TextMeasure};
    use crate::tree::test_support::{node_named, tree_from_newick};
    use crate::tree::AttributeValue;

    fn laid_out(newick: &str) -> (Tree, Vec<f64>, TreeLayoutCache) {
        let tree = tree_from_newick(newick);
        let heights = tree.node_heights();
        let mut cache = TreeLayoutCache::default();
        RectilinearTreeLayout::new().layout(&tree, &mut cache);
        (tree, heights, cache)
    }

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
    fn targets_select_nodes() {
        let tree = tree_from_newick("((A:1,B:1):1,C:2);");
        let a = node_named(&tree, "A");
        let root = tree.root.unwrap();
        let mut painter = NodeShapePainter::new();
        assert_eq!(painter.shape_size(&tree, a), None);
        assert_eq!(painter.shape_size(&tree, root), Some(4.0));
        painter.set_target(NodeTarget::Tips);
        assert_eq!(painter.shape_size(&tree, a), Some(4.0));
        assert_eq!(painter.shape_size(&tree, root), None);
    }

    #[test]
    fn attribute_sizes_scale_between_bounds() {
        let mut tree = tree_from_newick("((A:1,B:1):1,(C:1,D:1):1);");
        let internal = tree.internal_nodes();
        for (value, node) in internal.iter().enumerate() {
            tree.nodes[*node].set_attribute("support", AttributeValue::Number(value as f64));
        }
        let mut painter = NodeShapePainter::new();
        painter.set_size_attribute(Some("support".into()), 2.0, 10.0);
        painter.setup_attributes(&tree);

        let sizes: Vec<f64> = internal
            .iter()
            .filter_map(|node| painter.shape_size(&tree, *node))
            .collect();
        assert_eq!(sizes.len(), 3);
        assert!((sizes[0] - 2.0).abs() < 1e-9);
        assert!((sizes[1] - 6.0).abs() < 1e-9);
        assert!((sizes[2] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn shape_bounds_centre_on_the_node() {
        let (tree, heights, cache) = laid_out("((A:1,B:1):1,C:2);");
        let ctx = context(&tree, &heights, &cache);
        let painter = NodeShapePainter::new();
        let root = tree.root.unwrap();
        let bounds = painter.calibrate(&ctx, root).unwrap();
        assert!((bounds.center() - cache.node_points[&root]).hypot() < 1e-9);
        assert!((bounds.width() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn bars_span_the_interval_towards_the_root() {
        let (mut tree, _, _) = laid_out("((A:1,B:1):1,C:2);");
        let clade = tree.parent(node_named(&tree, "A")).unwrap();
        tree.nodes[clade].set_attribute("height_95%_HPD", AttributeValue::Range(vec![0.5, 1.5]));
        let heights = tree.node_heights();
        let mut cache = TreeLayoutCache::default();
        RectilinearTreeLayout::new().layout(&tree, &mut cache);
        let ctx = context(&tree, &heights, &cache);

        let painter = NodeBarPainter::new();
        let bar = painter.bar(&ctx, clade).unwrap();
        let node_x = cache.node_points[&clade].x;
        assert!((bar.p0.x - (node_x + 0.5)).abs() < 1e-9);
        assert!((bar.p1.x - (node_x - 0.5)).abs() < 1e-9);
        assert!(painter.bar(&ctx, tree.root.unwrap()).is_none());
        assert!(painter.bar(&ctx, node_named(&tree, "A")).is_none());
    }

    #[test]
    fn shapes_and_bars_paint_fill_then_outline() {
        let tree = tree_from_newick("(A:1,B:1);");
        let mut recorder = SceneRecorder::new(50.0, 50.0);
        NodeShapePainter::new().paint(&mut recorder, &tree.nodes[0], Point::new(10.0, 10.0), 6.0);
        NodeBarPainter::new().paint(&mut recorder, Line::new((0.0, 20.0), (30.0, 20.0)));
        let kinds: Vec<bool> = recorder
            .primitives()
            .iter()
            .map(|primitive| matches!(primitive, ScenePrimitive::Fill { .. }))
            .collect();
        assert_eq!(kinds, vec![true, false, true, false]);
        let bar = recorder.primitives()[2].bounds(&TextMeasure::default());
        assert!((bar.height() - 4.0).abs() < 1e-9);
    }
}
