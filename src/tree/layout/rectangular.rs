use log::debug;
use vello::kurbo::{BezPath, Line, Point, Shape};

use super::{
    line_path, max_extent, LayoutBase, LayoutConventions, TreeLayout, TreeLayoutCache,
    TreeLayoutType, ROOT_LENGTH_PROPORTION,
};
use crate::tree::{CladeSummary, NodeId, Tree};

/// Rectangular phylogram: tips evenly spaced down the y axis, distance from the
/// root along x.
#[derive(Debug, Clone)]
pub struct RectilinearTreeLayout {
    base: LayoutBase,
    curvature: f64,
    align_tip_labels: bool,
    fish_eye: f64,
    point_of_interest: f64,
    root_length_proportion: f64,
}

impl Default for RectilinearTreeLayout {
    fn default() -> Self {
        Self::new()
    }
}

impl RectilinearTreeLayout {
    pub fn new() -> Self {
        Self {
            base: LayoutBase::default(),
            curvature: 0.0,
            align_tip_labels: false,
            fish_eye: 0.0,
            point_of_interest: 0.5,
            root_length_proportion: ROOT_LENGTH_PROPORTION,
        }
    }

    pub fn curvature(&self) -> f64 {
        self.curvature
    }

    /// 0.0 draws square steps, 1.0 straight diagonals, values between curved corners.
    pub fn set_curvature(&mut self, curvature: f64) {
        self.curvature = curvature.clamp(0.0, 1.0);
        self.base.fire_changed();
    }

    pub fn is_align_tip_labels(&self) -> bool {
        self.align_tip_labels
    }

    pub fn set_align_tip_labels(&mut self, align: bool) {
        self.align_tip_labels = align;
        self.base.fire_changed();
    }

    pub fn fish_eye(&self) -> f64 {
        self.fish_eye
    }

    pub fn point_of_interest(&self) -> f64 {
        self.point_of_interest
    }

    pub fn root_length_proportion(&self) -> f64 {
        self.root_length_proportion
    }

    pub fn set_root_length_proportion(&mut self, proportion: f64) {
        self.root_length_proportion = proportion.max(0.0);
        self.base.fire_changed();
    }
}

impl TreeLayout for RectilinearTreeLayout {
    fn layout_type(&self) -> TreeLayoutType {
        TreeLayoutType::Rectangular
    }

    fn layout(&mut self, tree: &Tree, cache: &mut TreeLayoutCache) {
        cache.clear();
        let Some(root) = tree.root else {
            return;
        };

        let heights = tree.node_heights();
        let root_length = self.root_length_proportion * heights[root];
        let max_x = max_extent(tree, root_length);
        let tip_count = tree.leaf_count();
        let y_increment = if tip_count > 1 {
            1.0 / (tip_count - 1) as f64
        } else {
            1.0
        };

        let mut pass = RectilinearPass {
            tree,
            heights: &heights,
            conventions: &self.base.conventions,
            cache,
            curvature: self.curvature,
            align_tip_labels: self.align_tip_labels,
            showing_cartoon_tip_labels: self.base.showing_cartoon_tip_labels,
            fish_eye: self.fish_eye,
            point_of_interest: self.point_of_interest,
            tip_count,
            y_position: 0.0,
            y_increment,
            max_x,
        };

        let root_point = pass.construct_node(root, 0.0, root_length);
        pass.construct_node_areas(root);

        let ty = pass.transform_y(root_point.y);
        cache.branch_paths.insert(
            root,
            line_path(Point::new(0.0, ty), Point::new(root_point.x, ty)),
        );

        self.base.root_length = root_length;
        self.base.max_extent = max_x;
        debug!(
            "rectangular layout: {} tip(s), max x {:.4}",
            tip_count,
            max_x
        );
    }

    fn maintain_aspect_ratio(&self) -> bool {
        false
    }

    fn is_showing_root_branch(&self) -> bool {
        true
    }

    fn is_showing_colouring(&self) -> bool {
        self.base.conventions.branch_colouring_attribute.is_some() && self.curvature == 0.0
    }

    fn axis_line(&self, value: f64) -> Option<BezPath> {
        let x = self.axis_position(value);
        Some(line_path(Point::new(x, 0.0), Point::new(x, 1.0)))
    }

    fn set_fish_eye(&mut self, fish_eye: f64) {
        self.fish_eye = fish_eye.max(0.0);
        self.base.fire_changed();
    }

    fn set_point_of_interest(&mut self, point: Point) {
        self.point_of_interest = point.y;
        self.base.fire_changed();
    }

    fn base(&self) -> &LayoutBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayoutBase {
        &mut self.base
    }
}

struct RectilinearPass<'a> {
    tree: &'a Tree,
    heights: &'a [f64],
    conventions: &'a LayoutConventions,
    cache: &'a mut TreeLayoutCache,
    curvature: f64,
    align_tip_labels: bool,
    showing_cartoon_tip_labels: bool,
    fish_eye: f64,
    point_of_interest: f64,
    tip_count: usize,
    y_position: f64,
    y_increment: f64,
    max_x: f64,
}

impl RectilinearPass<'_> {
    /// Lay out `node` at `x`, returning its untransformed position.
    fn construct_node(&mut self, node: NodeId, x_parent: f64, x: f64) -> Point {
        let tree = self.tree;
        let tree_node = &tree.nodes[node];

        if let Some(hilight) = self.conventions.hilight(tree_node) {
            self.construct_hilight(node, x_parent, x, hilight);
        }

        let point = if tree_node.is_leaf() {
            self.construct_tip(node, x)
        } else if let Some(collapsed) = self.conventions.collapsed(tree_node) {
            self.construct_collapsed_node(node, x, collapsed)
        } else if let Some(cartoon) = self.conventions.cartoon(tree_node) {
            self.construct_cartoon_node(node, x, cartoon)
        } else {
            self.construct_internal(node, x)
        };

        self.cache
            .node_points
            .insert(node, Point::new(point.x, self.transform_y(point.y)));
        point
    }

    fn construct_internal(&mut self, node: NodeId, x: f64) -> Point {
        let tree = self.tree;
        let children = tree.ordered_children(node);
        let mut child_points = Vec::with_capacity(children.len());
        for child in &children {
            let point = self.construct_node(*child, x, x + tree.length(*child));
            child_points.push((*child, point));
        }

        let y = child_points.iter().map(|(_, p)| p.y).sum::<f64>() / children.len() as f64;
        let ty = self.transform_y(y);
        let (x0, y0) = (x, ty);

        for (child, child_point) in child_points {
            let x1 = child_point.x;
            let y1 = self.transform_y(child_point.y);
            let mut path = BezPath::new();

            if self.curvature == 0.0 {
                path.move_to((x1, y1));
                // Colouring segments run backwards from the child.
                if let Some(colouring) = self.conventions.colouring(&tree.nodes[child]) {
                    let span = self.heights[node] - self.heights[child];
                    if span > 0.0 {
                        self.cache.coloured_branches.insert(child);
                        let mut segment_x = x1;
                        for (_, interval) in &colouring.segments {
                            segment_x -= (x1 - x0) * (interval / span);
                            path.line_to((segment_x, y1));
                        }
                    }
                }
                path.line_to((x0, y1));
                path.line_to((x0, y0));
            } else if self.curvature == 1.0 {
                path.move_to((x0, y0));
                path.line_to((x1, y1));
            } else {
                let x2 = x1 - (x1 - x0) * (1.0 - self.curvature);
                let y2 = y0 + (y1 - y0) * (1.0 - self.curvature);
                path.move_to((x1, y1));
                path.line_to((x2, y1));
                path.quad_to((x0, y1), (x0, y2));
                path.line_to((x0, y0));
            }
            self.cache.branch_paths.insert(child, path);

            let x3 = (x + x1) / 2.0;
            self.cache
                .branch_label_paths
                .insert(child, Line::new((x3 - 1.0, y1), (x3 + 1.0, y1)));
        }

        self.insert_node_paths(node, x, ty);
        Point::new(x, y)
    }

    fn construct_tip(&mut self, node: NodeId, x: f64) -> Point {
        let point = Point::new(x, self.y_position);
        let ty = self.transform_y(self.y_position);
        self.insert_tip_label(node, x, ty);
        self.cache
            .node_shape_paths
            .insert(node, Line::new((x, ty), (x - 1.0, ty)));
        self.y_position += self.y_increment;
        point
    }

    fn construct_collapsed_node(&mut self, node: NodeId, x: f64, summary: &CladeSummary) -> Point {
        let max_x_pos = x + self.heights[node] - summary.min_tip_height;

        let min_y = self.y_position - self.y_increment * 0.5;
        let max_y = min_y + self.y_increment;
        self.y_position += self.y_increment;

        let y = (min_y + max_y) / 2.0;
        let ty = self.transform_y(y);
        self.insert_triangle(node, Point::new(x, ty), max_x_pos, min_y, max_y);
        self.insert_node_paths(node, x, ty);
        self.insert_tip_label(node, max_x_pos, ty);
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
        let ty = self.transform_y(y);
        self.insert_triangle(node, Point::new(x, ty), max_x_pos, min_y, max_y);
        self.insert_node_paths(node, x, ty);

        if self.showing_cartoon_tip_labels {
            let mut tip_y = min_y;
            for tip in self.tree.descendant_tips(node) {
                let ty = self.transform_y(tip_y);
                self.insert_tip_label(tip, max_x_pos, ty);
                tip_y += self.y_increment;
            }
        }
        Point::new(x, y)
    }

    fn construct_hilight(&mut self, node: NodeId, x_parent: f64, x: f64, summary: &CladeSummary) {
        let x0 = (x + x_parent) / 2.0;
        let x1 = x + self.heights[node];
        let top = self.y_position - self.y_increment / 2.0;
        let y0 = self.transform_y(top);
        let y1 = self.transform_y(top + self.y_increment * summary.tip_count as f64);

        let mut shape = BezPath::new();
        shape.move_to((x0, y0));
        shape.line_to((x1, y0));
        shape.line_to((x1, y1));
        shape.line_to((x0, y1));
        shape.close_path();

        self.cache.hilight_nodes.push(node);
        self.cache.hilight_shapes.insert(node, shape);
    }

    fn insert_triangle(&mut self, node: NodeId, apex: Point, max_x_pos: f64, min_y: f64, max_y: f64) {
        let mut shape = BezPath::new();
        shape.move_to(apex);
        shape.line_to((max_x_pos, self.transform_y(min_y)));
        shape.line_to((max_x_pos, self.transform_y(max_y)));
        shape.close_path();
        self.cache.collapsed_shapes.insert(node, shape);
    }

    fn insert_node_paths(&mut self, node: NodeId, x: f64, ty: f64) {
        self.cache
            .node_label_paths
            .insert(node, Line::new((x, ty), (x + 1.0, ty)));
        self.cache
            .node_shape_paths
            .insert(node, Line::new((x, ty), (x - 1.0, ty)));
    }

    fn insert_tip_label(&mut self, node: NodeId, x: f64, ty: f64) {
        let label = if self.align_tip_labels {
            self.cache
                .callout_paths
                .insert(node, Line::new((x, ty), (self.max_x, ty)));
            Line::new((self.max_x, ty), (self.max_x + 1.0, ty))
        } else {
            Line::new((x, ty), (x + 1.0, ty))
        };
        self.cache.tip_label_paths.insert(node, label);
    }

    /// Background region of each expanded internal node, spanning from the
    /// node to the tips between its outermost children.
    fn construct_node_areas(&mut self, root: NodeId) {
        let tree = self.tree;
        for node in tree.preorder_from(root) {
            let tree_node = &tree.nodes[node];
            if tree_node.is_leaf() || self.conventions.hides_subtree(tree_node) {
                continue;
            }
            if self.is_hidden(node) {
                continue;
            }
            let children = tree.ordered_children(node);
            let (Some(first), Some(last)) = (children.first(), children.last()) else {
                continue;
            };
            let (Some(bounds1), Some(bounds2)) = (
                self.cache.branch_paths.get(first).map(Shape::bounding_box),
                self.cache.branch_paths.get(last).map(Shape::bounding_box),
            ) else {
                continue;
            };

            let x0 = bounds1.x0;
            let y0 = bounds1.y1;
            let top = bounds1.y0;
            let bottom = bounds2.y1;
            let mut path = BezPath::new();
            path.move_to((x0, y0));

            if self.curvature == 0.0 {
                path.line_to((x0, top));
                path.line_to((self.max_x, top));
                path.line_to((self.max_x, bottom));
                path.line_to((x0, bottom));
            } else if self.curvature == 1.0 {
                path.line_to((bounds1.x1, top));
                path.line_to((self.max_x, top));
                path.line_to((self.max_x, bottom));
                path.line_to((bounds2.x1, bottom));
            } else {
                let x1 = bounds1.x1;
                let x2 = x1 - (x1 - x0) * (1.0 - self.curvature);
                let y2 = y0 - (y0 - top) * (1.0 - self.curvature);
                path.line_to((x0, y2));
                path.quad_to((x0, top), (x2, top));
                path.line_to((self.max_x, top));
                path.line_to((self.max_x, bottom));
                let x3 = bounds2.x1;
                let x4 = x3 - (x3 - x0) * (1.0 - self.curvature);
                let y4 = y0 + (bottom - y0) * (1.0 - self.curvature);
                path.line_to((x4, bottom));
                path.quad_to((x0, bottom), (x0, y4));
            }
            path.line_to((x0, y0));
            path.close_path();
            self.cache.node_areas.insert(node, path);
        }
    }

    fn is_hidden(&self, node: NodeId) -> bool {
        let mut current = self.tree.parent(node);
        while let Some(ancestor) = current {
            if self.conventions.hides_subtree(&self.tree.nodes[ancestor]) {
                return true;
            }
            current = self.tree.parent(ancestor);
        }
        false
    }

    /// Fish-eye magnification of y around the point of interest.
    fn transform_y(&self, y: f64) -> f64 {
        if self.fish_eye == 0.0 || self.tip_count == 0 {
            return y;
        }

        let scale = 1.0 / (self.fish_eye * self.tip_count as f64);
        let dist = self.point_of_interest - y;
        let min = 1.0 - (self.point_of_interest / (scale + self.point_of_interest));
        let max = 1.0 - ((self.point_of_interest - 1.0) / (scale - (self.point_of_interest - 1.0)));
        let c = 1.0
            - if dist < 0.0 {
                dist / (scale - dist)
            } else {
                dist / (scale + dist)
            };

        if (max - min).abs() <= f64::EPSILON {
            return y;
        }
        (c - min) / (max - min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::test_support::{node_named, tree_from_newick};
    use crate::tree::{AttributeValue, BranchColouring, CARTOON_ATTRIBUTE, HILIGHT_ATTRIBUTE};

    fn layout(tree: &Tree, configure: impl FnOnce(&mut RectilinearTreeLayout)) -> TreeLayoutCache {
        let mut layout = RectilinearTreeLayout::new();
        configure(&mut layout);
        let mut cache = TreeLayoutCache::default();
        layout.layout(tree, &mut cache);
        cache
    }

    #[test]
    fn balanced_tree_spans_two_units_with_ordered_tips() {
        let tree = tree_from_newick("((A:1,B:1):1,(C:1,D:1):1);");
        let cache = layout(&tree, |l| l.set_root_length_proportion(0.0));

        let bounds = cache.tree_bounds().unwrap();
        assert!((bounds.width() - 2.0).abs() < 1e-12);

        let ys: Vec<f64> = ["A", "B", "C", "D"]
            .iter()
            .map(|name| cache.node_points[&node_named(&tree, name)].y)
            .collect();
        assert!(ys.windows(2).all(|pair| pair[0] < pair[1]));
        assert!((ys[0]).abs() < 1e-12);
        assert!((ys[3] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn internal_nodes_sit_between_their_children() {
        let tree = tree_from_newick("((A:1,B:1):1,C:2);");
        let cache = layout(&tree, |_| {});
        let a = node_named(&tree, "A");
        let ab = tree.parent(a).unwrap();
        let points = &cache.node_points;
        let expected = (points[&a].y + points[&node_named(&tree, "B")].y) / 2.0;
        assert!((points[&ab].y - expected).abs() < 1e-12);
        assert!(points[&ab].x < points[&a].x);
    }

    #[test]
    fn root_stub_is_a_proportion_of_the_height() {
        let tree = tree_from_newick("((A:1,B:1):1,C:2);");
        let cache = layout(&tree, |l| l.set_root_length_proportion(0.1));
        let root = tree.root.unwrap();
        assert!((cache.node_points[&root].x - 0.2).abs() < 1e-12);
        let stub = cache.branch_paths[&root].bounding_box();
        assert!((stub.width() - 0.2).abs() < 1e-12);
    }

    #[test]
    fn aligned_labels_get_callouts() {
        let tree = tree_from_newick("((A:1,B:2):1,C:1);");
        let cache = layout(&tree, |l| l.set_align_tip_labels(true));
        let a = node_named(&tree, "A");
        let max_x = cache.tip_label_paths[&node_named(&tree, "B")].p0.x;
        assert!((cache.tip_label_paths[&a].p0.x - max_x).abs() < 1e-12);
        assert!(cache.callout_paths.contains_key(&a));
    }

    #[test]
    fn collapsing_five_tips_leaves_one_anchor() {
        let mut tree = tree_from_newick("((A:1,B:1,C:1,D:1,E:1):1,F:2);");
        let clade = tree.parent(node_named(&tree, "A")).unwrap();
        let heights = tree.node_heights();
        let min_tip_height = tree.min_tip_height(clade, &heights);
        tree.nodes[clade].set_attribute(
            crate::tree::COLLAPSE_ATTRIBUTE,
            AttributeValue::Clade(CladeSummary {
                tip_count: 5,
                min_tip_height,
                label: Some("collapsed".into()),
                color: None,
            }),
        );
        let cache = layout(&tree, |_| {});
        assert_eq!(cache.collapsed_shapes.len(), 1);
        assert_eq!(cache.tip_label_paths.len(), 2);
        assert!(!cache.branch_paths.contains_key(&node_named(&tree, "A")));

        tree.nodes[clade].remove_attribute(crate::tree::COLLAPSE_ATTRIBUTE);
        let cache = layout(&tree, |_| {});
        assert!(cache.collapsed_shapes.is_empty());
        assert_eq!(cache.tip_label_paths.len(), 6);
    }

    #[test]
    fn cartoon_reserves_a_slot_per_tip() {
        let mut tree = tree_from_newick("((A:1,B:1,C:1):1,D:2);");
        let clade = tree.parent(node_named(&tree, "A")).unwrap();
        tree.nodes[clade].set_attribute(
            CARTOON_ATTRIBUTE,
            AttributeValue::Clade(CladeSummary {
                tip_count: 3,
                min_tip_height: 0.0,
                label: None,
                color: None,
            }),
        );
        let cache = layout(&tree, |_| {});
        let d = node_named(&tree, "D");
        assert!((cache.node_points[&d].y - 1.0).abs() < 1e-12);
        assert_eq!(cache.collapsed_shapes.len(), 1);
        assert_eq!(cache.tip_label_paths.len(), 4);

        let cache = layout(&tree, |l| l.set_showing_cartoon_tip_labels(false));
        assert_eq!(cache.tip_label_paths.len(), 1);
    }

    #[test]
    fn hilight_covers_the_clade() {
        let mut tree = tree_from_newick("((A:1,B:1):1,C:2);");
        let clade = tree.parent(node_named(&tree, "A")).unwrap();
        tree.nodes[clade].set_attribute(
            HILIGHT_ATTRIBUTE,
            AttributeValue::Clade(CladeSummary {
                tip_count: 2,
                min_tip_height: 0.0,
                label: None,
                color: None,
            }),
        );
        let cache = layout(&tree, |l| l.set_root_length_proportion(0.0));
        assert_eq!(cache.hilight_nodes, vec![clade]);
        let bounds = cache.hilight_shapes[&clade].bounding_box();
        assert!((bounds.x0 - 0.5).abs() < 1e-12);
        assert!((bounds.x1 - 2.0).abs() < 1e-12);
        assert!((bounds.y0 + 0.25).abs() < 1e-12);
        assert!((bounds.y1 - 0.75).abs() < 1e-12);
    }

    #[test]
    fn colouring_splits_the_branch() {
        let mut tree = tree_from_newick("((A:2,B:2):1,C:3);");
        let a = node_named(&tree, "A");
        tree.nodes[a].set_attribute(
            "states",
            AttributeValue::Colouring(BranchColouring {
                segments: vec![(1, 0.5), (2, 1.0)],
                final_colour: 3,
            }),
        );
        let cache = layout(&tree, |l| {
            l.set_branch_colouring_attribute(Some("states".into()))
        });
        // move, two segment points, shoulder, parent
        assert_eq!(cache.branch_paths[&a].elements().len(), 5);
    }

    #[test]
    fn curvature_changes_branch_shape() {
        let tree = tree_from_newick("((A:1,B:1):1,C:2);");
        let a = node_named(&tree, "A");
        let square = layout(&tree, |_| {});
        let straight = layout(&tree, |l| l.set_curvature(1.0));
        let curved = layout(&tree, |l| l.set_curvature(0.5));
        assert_eq!(square.branch_paths[&a].elements().len(), 3);
        assert_eq!(straight.branch_paths[&a].elements().len(), 2);
        assert_eq!(curved.branch_paths[&a].elements().len(), 4);
        assert!(!square.node_areas.is_empty());
    }

    #[test]
    fn fish_eye_keeps_the_ends_fixed() {
        let tree = tree_from_newick("(A:1,B:1,C:1,D:1,E:1);");
        let cache = layout(&tree, |l| {
            l.set_fish_eye(0.5);
            l.set_point_of_interest(Point::new(0.0, 0.5));
        });
        let first = cache.node_points[&node_named(&tree, "A")].y;
        let last = cache.node_points[&node_named(&tree, "E")].y;
        assert!(first.abs() < 1e-9);
        assert!((last - 1.0).abs() < 1e-9);
    }

    #[test]
    fn reversed_axis_counts_back_from_the_tips() {
        let tree = tree_from_newick("(A:1,B:2);");
        let mut layout = RectilinearTreeLayout::new();
        layout.set_root_length_proportion(0.0);
        let mut cache = TreeLayoutCache::default();
        layout.layout(&tree, &mut cache);
        let forward = layout.axis_line(0.5).unwrap().bounding_box();
        layout.set_axis_reversed(true);
        let reversed = layout.axis_line(0.5).unwrap().bounding_box();
        assert!((forward.x0 - 0.5).abs() < 1e-12);
        assert!((reversed.x0 - 1.5).abs() < 1e-12);
    }
}
