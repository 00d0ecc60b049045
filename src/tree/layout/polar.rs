use log::debug;
use vello::kurbo::{Arc, BezPath, Circle, Line, Point, Shape, Vec2};

use super::{
    line_path, max_extent, LayoutBase, LayoutConventions, TreeLayout, TreeLayoutCache,
    TreeLayoutType, ROOT_LENGTH_PROPORTION,
};
use crate::tree::{CladeSummary, NodeId, Tree};

const ARC_TOLERANCE: f64 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TipLabelPosition {
    /// Labels start at each tip.
    #[default]
    Flush,
    /// Labels start on the outer circle with callouts from the tips.
    Radial,
}

/// Circular phylogram: distance from the root is the radius, tip order the angle.
#[derive(Debug, Clone)]
pub struct PolarTreeLayout {
    base: LayoutBase,
    root_angle: f64,
    angular_range: f64,
    root_length_proportion: f64,
    showing_root_branch: bool,
    tip_label_position: TipLabelPosition,
}

impl Default for PolarTreeLayout {
    fn default() -> Self {
        Self::new()
    }
}

impl PolarTreeLayout {
    pub fn new() -> Self {
        Self {
            base: LayoutBase::default(),
            root_angle: 180.0,
            angular_range: 360.0,
            root_length_proportion: ROOT_LENGTH_PROPORTION,
            showing_root_branch: true,
            tip_label_position: TipLabelPosition::Flush,
        }
    }

    pub fn root_angle(&self) -> f64 {
        self.root_angle
    }

    /// Direction of the root branch, in degrees.
    pub fn set_root_angle(&mut self, degrees: f64) {
        self.root_angle = degrees;
        self.base.fire_changed();
    }

    pub fn angular_range(&self) -> f64 {
        self.angular_range
    }

    pub fn set_angular_range(&mut self, degrees: f64) {
        self.angular_range = degrees.clamp(0.0, 360.0);
        self.base.fire_changed();
    }

    pub fn root_length_proportion(&self) -> f64 {
        self.root_length_proportion
    }

    pub fn set_root_length_proportion(&mut self, proportion: f64) {
        self.root_length_proportion = proportion.max(0.0);
        self.base.fire_changed();
    }

    pub fn set_showing_root_branch(&mut self, showing: bool) {
        self.showing_root_branch = showing;
        self.base.fire_changed();
    }

    pub fn tip_label_position(&self) -> TipLabelPosition {
        self.tip_label_position
    }

    pub fn set_tip_label_position(&mut self, position: TipLabelPosition) {
        self.tip_label_position = position;
        self.base.fire_changed();
    }
}

impl TreeLayout for PolarTreeLayout {
    fn layout_type(&self) -> TreeLayoutType {
        TreeLayoutType::Polar
    }

    fn layout(&mut self, tree: &Tree, cache: &mut TreeLayoutCache) {
        cache.clear();
        let Some(root) = tree.root else {
            return;
        };

        let heights = tree.node_heights();
        let total_root_length = self.root_length_proportion * heights[root] * 10.0;
        let max_x = max_extent(tree, total_root_length);
        let tip_count = tree.leaf_count().max(1);

        let mut pass = PolarPass {
            tree,
            heights: &heights,
            conventions: &self.base.conventions,
            cache,
            root_angle: self.root_angle,
            angular_range: self.angular_range,
            tip_label_position: self.tip_label_position,
            showing_cartoon_tip_labels: self.base.showing_cartoon_tip_labels,
            y_position: 0.0,
            y_increment: 1.0 / tip_count as f64,
            max_x,
        };

        let root_point = pass.construct_node(root, total_root_length);
        if self.showing_root_branch {
            let line = line_path(
                pass.transform(0.0, root_point.y),
                pass.transform(root_point.x, root_point.y),
            );
            cache.branch_paths.insert(root, line);
        }

        self.base.root_length = total_root_length;
        self.base.max_extent = max_x;
        debug!("polar layout: {} tip(s), radius {:.4}", tip_count, max_x);
    }

    fn maintain_aspect_ratio(&self) -> bool {
        true
    }

    fn is_showing_root_branch(&self) -> bool {
        self.showing_root_branch
    }

    fn is_showing_colouring(&self) -> bool {
        self.base.conventions.branch_colouring_attribute.is_some()
    }

    fn axis_line(&self, value: f64) -> Option<BezPath> {
        let radius = self.axis_position(value).max(0.0);
        Some(Circle::new(Point::ORIGIN, radius).to_path(ARC_TOLERANCE))
    }

    fn base(&self) -> &LayoutBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayoutBase {
        &mut self.base
    }
}

struct PolarPass<'a> {
    tree: &'a Tree,
    heights: &'a [f64],
    conventions: &'a LayoutConventions,
    cache: &'a mut TreeLayoutCache,
    root_angle: f64,
    angular_range: f64,
    tip_label_position: TipLabelPosition,
    showing_cartoon_tip_labels: bool,
    y_position: f64,
    y_increment: f64,
    max_x: f64,
}

impl PolarPass<'_> {
    /// Angle in degrees, counter-clockwise on screen, for position `y` in `[0, 1]`.
    fn angle(&self, y: f64) -> f64 {
        self.root_angle - (360.0 - self.angular_range) * 0.5 - y * self.angular_range
    }

    fn transform(&self, x: f64, y: f64) -> Point {
        let r = -self.angle(y).to_radians();
        Point::new(x * r.cos(), x * r.sin())
    }

    /// Arc about the origin from angle position `from_y` to `to_y`.
    fn append_arc(&self, path: &mut BezPath, radius: f64, from_y: f64, to_y: f64) {
        let start = self.angle(from_y);
        let finish = self.angle(to_y);
        let arc = Arc::new(
            Point::ORIGIN,
            Vec2::new(radius, radius),
            -start.to_radians(),
            -(finish - start).to_radians(),
            0.0,
        );
        path.extend(arc.append_iter(ARC_TOLERANCE));
    }

    fn construct_node(&mut self, node: NodeId, x: f64) -> Point {
        let tree = self.tree;
        let tree_node = &tree.nodes[node];

        let point = if tree_node.is_leaf() {
            self.construct_tip(node, x)
        } else if let Some(collapsed) = self.conventions.collapsed(tree_node) {
            self.construct_collapsed_node(node, x, collapsed)
        } else if let Some(cartoon) = self.conventions.cartoon(tree_node) {
            self.construct_cartoon_node(node, x, cartoon)
        } else {
            self.construct_internal(node, x)
        };

        let transformed = self.transform(point.x, point.y);
        self.cache.node_points.insert(node, transformed);
        point
    }

    fn construct_internal(&mut self, node: NodeId, x: f64) -> Point {
        let tree = self.tree;
        let children = tree.ordered_children(node);
        let mut child_points = Vec::with_capacity(children.len());
        for child in &children {
            let point = self.construct_node(*child, x + tree.length(*child));
            child_points.push((*child, point));
        }
        let y = child_points.iter().map(|(_, p)| p.y).sum::<f64>() / children.len() as f64;

        for (child, child_point) in child_points {
            let mut path = BezPath::new();
            path.move_to(self.transform(child_point.x, child_point.y));

            if let Some(colouring) = self.conventions.colouring(&tree.nodes[child]) {
                let span = self.heights[node] - self.heights[child];
                if span > 0.0 {
                    self.cache.coloured_branches.insert(child);
                    let mut segment_x = child_point.x;
                    for (_, interval) in &colouring.segments {
                        segment_x -= (child_point.x - x) * (interval / span);
                        path.line_to(self.transform(segment_x, child_point.y));
                    }
                }
            }
            path.line_to(self.transform(x, child_point.y));
            self.append_arc(&mut path, x, child_point.y, y);
            self.cache.branch_paths.insert(child, path);

            let x3 = (x + child_point.x) / 2.0;
            self.cache.branch_label_paths.insert(
                child,
                Line::new(
                    self.transform(x3 - 1.0, child_point.y),
                    self.transform(x3 + 1.0, child_point.y),
                ),
            );
        }

        self.insert_node_paths(node, x, y);
        Point::new(x, y)
    }

    fn construct_tip(&mut self, node: NodeId, x: f64) -> Point {
        let y = self.y_position;
        self.insert_tip_label(node, x, y);
        self.cache.node_shape_paths.insert(
            node,
            Line::new(self.transform(x, y), self.transform(x - 1.0, y)),
        );
        self.y_position += self.y_increment;
        Point::new(x, y)
    }

    fn construct_collapsed_node(&mut self, node: NodeId, x: f64, summary: &CladeSummary) -> Point {
        let max_x_pos = x + self.heights[node] - summary.min_tip_height;
        let min_y = self.y_position - self.y_increment * 0.5;
        let max_y = min_y + self.y_increment;
        self.y_position += self.y_increment;
        let y = (min_y + max_y) / 2.0;

        self.insert_wedge(node, x, y, max_x_pos, min_y, max_y);
        self.insert_node_paths(node, x, y);
        self.insert_tip_label(node, max_x_pos, y);
        Point::new(x, y)
    }

    fn construct_cartoon_node(&mut self, node: NodeId, x: f64, summary: &CladeSummary) -> Point {
        let max_x_pos = x + self.heights[node] - summary.min_tip_height;
        let tip_count = summary.tip_count.max(1);
        let min_y = self.y_position;
        self.y_position += self.y_increment * (tip_count - 1) as f64;
        let max_y = self.y_position;
        self.y_position += self.y_increment;
        let y = (min_y + max_y) / 2.0;

        self.insert_wedge(node, x, y, max_x_pos, min_y, max_y);
        self.insert_node_paths(node, x, y);

        if self.showing_cartoon_tip_labels {
            let mut tip_y = min_y;
            for tip in self.tree.descendant_tips(node) {
                self.insert_tip_label(tip, max_x_pos, tip_y);
                tip_y += self.y_increment;
            }
        }
        Point::new(x, y)
    }

    fn insert_wedge(&mut self, node: NodeId, x: f64, y: f64, max_x_pos: f64, min_y: f64, max_y: f64) {
        let mut shape = BezPath::new();
        shape.move_to(self.transform(x, y));
        shape.line_to(self.transform(max_x_pos, min_y));
        self.append_arc(&mut shape, max_x_pos, min_y, max_y);
        shape.close_path();
        self.cache.collapsed_shapes.insert(node, shape);
    }

    fn insert_node_paths(&mut self, node: NodeId, x: f64, y: f64) {
        let anchor = self.transform(x, y);
        self.cache
            .node_label_paths
            .insert(node, Line::new(anchor, self.transform(x + 1.0, y)));
        self.cache
            .node_shape_paths
            .insert(node, Line::new(anchor, self.transform(x - 1.0, y)));
    }

    fn insert_tip_label(&mut self, node: NodeId, x: f64, y: f64) {
        let tip = self.transform(x, y);
        let label = match self.tip_label_position {
            TipLabelPosition::Flush => Line::new(tip, self.transform(x + 1.0, y)),
            TipLabelPosition::Radial => {
                let outer = self.transform(self.max_x, y);
                self.cache.callout_paths.insert(node, Line::new(tip, outer));
                Line::new(outer, self.transform(self.max_x + 1.0, y))
            }
        };
        self.cache.tip_label_paths.insert(node, label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::test_support::{node_named, tree_from_newick};

    fn layout(tree: &Tree, configure: impl FnOnce(&mut PolarTreeLayout)) -> TreeLayoutCache {
        let mut layout = PolarTreeLayout::new();
        configure(&mut layout);
        let mut cache = TreeLayoutCache::default();
        layout.layout(tree, &mut cache);
        cache
    }

    #[test]
    fn tips_sit_at_their_distance_from_the_origin() {
        let tree = tree_from_newick("((A:1,B:2):1,C:1.5);");
        let cache = layout(&tree, |l| l.set_root_length_proportion(0.0));
        for (name, distance) in [("A", 2.0), ("B", 3.0), ("C", 1.5)] {
            let point = cache.node_points[&node_named(&tree, name)];
            assert!((point.to_vec2().hypot() - distance).abs() < 1e-9, "{name}");
        }
    }

    #[test]
    fn branch_paths_end_on_the_parent_arc() {
        let tree = tree_from_newick("((A:1,B:2):1,C:1.5);");
        let cache = layout(&tree, |l| l.set_root_length_proportion(0.0));
        let a = node_named(&tree, "A");
        let path = &cache.branch_paths[&a];
        let end = path.elements().last().and_then(|el| el.end_point()).unwrap();
        let parent = cache.node_points[&tree.parent(a).unwrap()];
        assert!((end - parent).hypot() < 1e-6);
    }

    #[test]
    fn radial_labels_start_on_the_outer_circle() {
        let tree = tree_from_newick("((A:1,B:2):1,C:1.5);");
        let cache = layout(&tree, |l| {
            l.set_root_length_proportion(0.0);
            l.set_tip_label_position(TipLabelPosition::Radial);
        });
        for name in ["A", "B", "C"] {
            let label = cache.tip_label_paths[&node_named(&tree, name)];
            assert!((label.p0.to_vec2().hypot() - 3.0).abs() < 1e-9);
        }
        assert_eq!(cache.callout_paths.len(), 3);
    }

    #[test]
    fn root_branch_can_be_hidden() {
        let tree = tree_from_newick("(A:1,B:2);");
        let root = tree.root.unwrap();
        assert!(layout(&tree, |_| {}).branch_paths.contains_key(&root));
        let hidden = layout(&tree, |l| l.set_showing_root_branch(false));
        assert!(!hidden.branch_paths.contains_key(&root));
    }

    #[test]
    fn keeps_aspect_ratio_and_draws_circular_axes() {
        let layout = PolarTreeLayout::new();
        assert!(layout.maintain_aspect_ratio());
        let circle = layout.axis_line(1.0).unwrap().bounding_box();
        assert!((circle.width() - 2.0).abs() < 1e-6);
    }
}
