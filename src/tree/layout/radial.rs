use std::f64::consts::{PI, TAU};

use log::debug;
use vello::kurbo::{BezPath, Line, Point, Vec2};

use super::{
    display_weights, line_path, LayoutBase, LayoutConventions, TreeLayout, TreeLayoutCache,
    TreeLayoutType,
};
use crate::tree::{CladeSummary, NodeId, Tree};

/// Unrooted-style layout: each clade gets a wedge of angle proportional to its
/// tip count and branches are straight lines.
#[derive(Debug, Clone, Default)]
pub struct RadialTreeLayout {
    base: LayoutBase,
    spread: f64,
}

impl RadialTreeLayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spread(&self) -> f64 {
        self.spread
    }

    /// Widen (positive) or narrow (negative) the wedge of every non-root clade.
    pub fn set_spread(&mut self, spread: f64) {
        self.spread = spread;
        self.base.fire_changed();
    }
}

impl TreeLayout for RadialTreeLayout {
    fn layout_type(&self) -> TreeLayoutType {
        TreeLayoutType::Radial
    }

    fn layout(&mut self, tree: &Tree, cache: &mut TreeLayoutCache) {
        cache.clear();
        let Some(root) = tree.root else {
            return;
        };

        let heights = tree.node_heights();
        let weights = display_weights(tree, &self.base.conventions);
        let mut pass = RadialPass {
            tree,
            heights: &heights,
            weights: &weights,
            conventions: &self.base.conventions,
            cache,
            spread: self.spread,
        };

        // Iterative so very deep trees do not exhaust the stack.
        let mut stack = vec![RadialFrame {
            node: root,
            angle_start: 0.0,
            angle_finish: TAU,
            origin: Point::ORIGIN,
            length: 0.0,
        }];
        while let Some(frame) = stack.pop() {
            stack.extend(pass.construct_node(frame).into_iter().rev());
        }

        self.base.root_length = 0.0;
        self.base.max_extent = tree.root_height();
        debug!("radial layout: {} node(s)", cache.node_points.len());
    }

    fn maintain_aspect_ratio(&self) -> bool {
        true
    }

    fn is_showing_root_branch(&self) -> bool {
        false
    }

    fn is_showing_colouring(&self) -> bool {
        self.base.conventions.branch_colouring_attribute.is_some()
    }

    fn axis_line(&self, _value: f64) -> Option<BezPath> {
        None
    }

    fn base(&self) -> &LayoutBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayoutBase {
        &mut self.base
    }
}

#[derive(Debug, Clone, Copy)]
struct RadialFrame {
    node: NodeId,
    angle_start: f64,
    angle_finish: f64,
    origin: Point,
    length: f64,
}

struct RadialPass<'a> {
    tree: &'a Tree,
    heights: &'a [f64],
    weights: &'a [usize],
    conventions: &'a LayoutConventions,
    cache: &'a mut TreeLayoutCache,
    spread: f64,
}

impl RadialPass<'_> {
    /// Place one node and its incoming branch, returning the frames of its
    /// children.
    fn construct_node(&mut self, frame: RadialFrame) -> Vec<RadialFrame> {
        let tree = self.tree;
        let node = frame.node;
        let tree_node = &tree.nodes[node];

        let branch_angle = (frame.angle_start + frame.angle_finish) / 2.0;
        let direction = Vec2::new(branch_angle.cos(), branch_angle.sin());
        let node_point = frame.origin + direction * frame.length;

        self.cache.node_points.insert(node, node_point);
        self.cache.node_shape_paths.insert(
            node,
            Line::new(node_point, frame.origin + direction * (frame.length - 1.0)),
        );

        if let Some(parent) = tree_node.parent {
            self.insert_branch(parent, node, frame.origin, node_point);
        }

        let label_path = Line::new(node_point, frame.origin + direction * (frame.length + 1.0));
        if tree_node.is_leaf() {
            self.cache.tip_label_paths.insert(node, label_path);
            return Vec::new();
        }

        let mut span = frame.angle_finish - frame.angle_start;
        let (mut angle_start, mut angle_finish) = (frame.angle_start, frame.angle_finish);
        if tree_node.parent.is_some() {
            span *= 1.0 + self.spread / 10.0;
            angle_start = branch_angle - span / 2.0;
            angle_finish = branch_angle + span / 2.0;
        }

        self.cache.node_label_paths.insert(node, label_path);

        let hidden = self
            .conventions
            .collapsed(tree_node)
            .or_else(|| self.conventions.cartoon(tree_node));
        if let Some(summary) = hidden {
            self.insert_wedge(node, node_point, angle_start, angle_finish, summary);
            return Vec::new();
        }

        let children = tree.ordered_children(node);
        let total: usize = children.iter().map(|child| self.weights[*child]).sum();
        let total = total.max(1) as f64;
        let mut frames = Vec::with_capacity(children.len());
        let mut a2 = angle_start;
        for child in children {
            let a1 = a2;
            a2 = a1 + span * self.weights[child] as f64 / total;
            frames.push(RadialFrame {
                node: child,
                angle_start: a1,
                angle_finish: a2,
                origin: node_point,
                length: tree.length(child),
            });
        }
        frames
    }

    fn insert_branch(&mut self, parent: NodeId, node: NodeId, parent_point: Point, node_point: Point) {
        let line = Line::new(node_point, parent_point);
        let mut path = BezPath::new();
        path.move_to(node_point);

        if let Some(colouring) = self.conventions.colouring(&self.tree.nodes[node]) {
            let span = self.heights[parent] - self.heights[node];
            if span > 0.0 {
                self.cache.coloured_branches.insert(node);
                let mut interval = 0.0;
                for (_, segment) in &colouring.segments {
                    interval += segment;
                    let p = interval / span;
                    path.line_to(node_point.lerp(parent_point, p));
                }
            }
        }
        path.line_to(parent_point);

        self.cache.branch_paths.insert(node, path);
        self.cache.branch_label_paths.insert(node, line);
    }

    /// Collapsed and cartoon clades are drawn as a wedge out to their tips.
    fn insert_wedge(
        &mut self,
        node: NodeId,
        apex: Point,
        angle_start: f64,
        angle_finish: f64,
        summary: &CladeSummary,
    ) {
        let depth = (self.heights[node] - summary.min_tip_height).max(0.0);
        let mut span = angle_finish - angle_start;
        if span > PI {
            span = PI;
        }
        let middle = (angle_start + angle_finish) / 2.0;
        let (a1, a2) = (middle - span / 2.0, middle + span / 2.0);
        let edge1 = apex + Vec2::new(a1.cos(), a1.sin()) * depth;
        let edge2 = apex + Vec2::new(a2.cos(), a2.sin()) * depth;

        let mut shape = line_path(apex, edge1);
        shape.line_to(edge2);
        shape.close_path();
        self.cache.collapsed_shapes.insert(node, shape);

        let direction = Vec2::new(middle.cos(), middle.sin());
        let tip = apex + direction * depth;
        self.cache
            .tip_label_paths
            .insert(node, Line::new(tip, tip + direction));
    }
}
