use std::collections::{BTreeMap, BTreeSet};
use std::rc::Weak;

use vello::kurbo::{BezPath, Line, Point, Rect, Shape};

use super::events::{Listeners, TreeLayoutListener};
use super::{
    BranchColouring, CladeSummary, NodeId, Tree, TreeNode, CARTOON_ATTRIBUTE, COLLAPSE_ATTRIBUTE,
    HILIGHT_ATTRIBUTE,
};

mod polar;
mod radial;
mod rectangular;

pub use polar::{PolarTreeLayout, TipLabelPosition};
pub use radial::RadialTreeLayout;
pub use rectangular::RectilinearTreeLayout;

pub(super) const ROOT_LENGTH_PROPORTION: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeLayoutType {
    Rectangular,
    Polar,
    Radial,
}

impl TreeLayoutType {
    pub const ALL: [TreeLayoutType; 3] = [
        TreeLayoutType::Rectangular,
        TreeLayoutType::Polar,
        TreeLayoutType::Radial,
    ];

    pub fn label(self) -> &'static str {
        match self {
            TreeLayoutType::Rectangular => "Rectangular",
            TreeLayoutType::Polar => "Polar",
            TreeLayoutType::Radial => "Radial",
        }
    }

    /// Build a fresh layout strategy of this type.
    pub fn create(self) -> Box<dyn TreeLayout> {
        match self {
            TreeLayoutType::Rectangular => Box::new(RectilinearTreeLayout::new()),
            TreeLayoutType::Polar => Box::new(PolarTreeLayout::new()),
            TreeLayoutType::Radial => Box::new(RadialTreeLayout::new()),
        }
    }
}

/// Logical-space geometry for every node of the display tree.
///
/// Filled by a [`TreeLayout`] and read by calibration, painting and hit testing.
#[derive(Debug, Clone, Default)]
pub struct TreeLayoutCache {
    pub node_points: BTreeMap<NodeId, Point>,
    pub branch_paths: BTreeMap<NodeId, BezPath>,
    pub node_areas: BTreeMap<NodeId, BezPath>,
    pub collapsed_shapes: BTreeMap<NodeId, BezPath>,
    /// Hilighted nodes in the order they were laid out.
    pub hilight_nodes: Vec<NodeId>,
    pub hilight_shapes: BTreeMap<NodeId, BezPath>,
    pub tip_label_paths: BTreeMap<NodeId, Line>,
    pub node_label_paths: BTreeMap<NodeId, Line>,
    pub branch_label_paths: BTreeMap<NodeId, Line>,
    pub node_shape_paths: BTreeMap<NodeId, Line>,
    pub callout_paths: BTreeMap<NodeId, Line>,
    /// Branches whose paths carry one element per colouring segment.
    pub coloured_branches: BTreeSet<NodeId>,
}

impl TreeLayoutCache {
    pub fn clear(&mut self) {
        self.node_points.clear();
        self.branch_paths.clear();
        self.node_areas.clear();
        self.collapsed_shapes.clear();
        self.hilight_nodes.clear();
        self.hilight_shapes.clear();
        self.tip_label_paths.clear();
        self.node_label_paths.clear();
        self.branch_label_paths.clear();
        self.node_shape_paths.clear();
        self.callout_paths.clear();
        self.coloured_branches.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.node_points.is_empty() && self.branch_paths.is_empty()
    }

    /// Union of the branch paths, callouts, collapsed and hilight shapes.
    pub fn tree_bounds(&self) -> Option<Rect> {
        let branches = self.branch_paths.values().map(Shape::bounding_box);
        let callouts = self.callout_paths.values().map(Shape::bounding_box);
        let collapsed = self.collapsed_shapes.values().map(Shape::bounding_box);
        let hilights = self.hilight_shapes.values().map(Shape::bounding_box);
        union_all(branches.chain(callouts).chain(collapsed).chain(hilights))
    }
}

pub(crate) fn union_all(rects: impl IntoIterator<Item = Rect>) -> Option<Rect> {
    rects
        .into_iter()
        .filter(|rect| rect.is_finite())
        .reduce(|acc, rect| acc.union(rect))
}

pub(crate) fn line_path(from: Point, to: Point) -> BezPath {
    let mut path = BezPath::new();
    path.move_to(from);
    path.line_to(to);
    path
}

/// Names of the attributes a layout consults. `None` disables the feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutConventions {
    pub cartoon_attribute: Option<String>,
    pub collapsed_attribute: Option<String>,
    pub hilight_attribute: Option<String>,
    pub branch_colouring_attribute: Option<String>,
}

impl Default for LayoutConventions {
    fn default() -> Self {
        Self {
            cartoon_attribute: Some(CARTOON_ATTRIBUTE.to_string()),
            collapsed_attribute: Some(COLLAPSE_ATTRIBUTE.to_string()),
            hilight_attribute: Some(HILIGHT_ATTRIBUTE.to_string()),
            branch_colouring_attribute: None,
        }
    }
}

impl LayoutConventions {
    fn summary<'a>(key: &Option<String>, node: &'a TreeNode) -> Option<&'a CladeSummary> {
        key.as_deref()
            .and_then(|key| node.attribute(key))
            .and_then(|value| value.as_clade())
    }

    pub fn collapsed<'a>(&self, node: &'a TreeNode) -> Option<&'a CladeSummary> {
        if node.is_leaf() {
            return None;
        }
        Self::summary(&self.collapsed_attribute, node)
    }

    pub fn cartoon<'a>(&self, node: &'a TreeNode) -> Option<&'a CladeSummary> {
        if node.is_leaf() {
            return None;
        }
        Self::summary(&self.cartoon_attribute, node)
    }

    pub fn hilight<'a>(&self, node: &'a TreeNode) -> Option<&'a CladeSummary> {
        Self::summary(&self.hilight_attribute, node)
    }

    pub fn colouring<'a>(&self, node: &'a TreeNode) -> Option<&'a BranchColouring> {
        self.branch_colouring_attribute
            .as_deref()
            .and_then(|key| node.attribute(key))
            .and_then(|value| value.as_colouring())
    }

    /// True when the node is drawn as a single collapsed or cartoon shape.
    pub fn hides_subtree(&self, node: &TreeNode) -> bool {
        self.collapsed(node).is_some() || self.cartoon(node).is_some()
    }
}

/// State shared by every layout strategy.
#[derive(Debug, Clone)]
pub struct LayoutBase {
    pub conventions: LayoutConventions,
    pub root_length: f64,
    pub showing_cartoon_tip_labels: bool,
    pub axis_reversed: bool,
    /// Largest root-to-tip distance of the last pass, root stub included.
    pub max_extent: f64,
    listeners: Listeners<dyn TreeLayoutListener>,
}

impl Default for LayoutBase {
    fn default() -> Self {
        Self {
            conventions: LayoutConventions::default(),
            root_length: 0.0,
            showing_cartoon_tip_labels: true,
            axis_reversed: false,
            max_extent: 0.0,
            listeners: Listeners::new(),
        }
    }
}

impl LayoutBase {
    pub fn fire_changed(&mut self) {
        self.listeners.fire(|listener| listener.tree_layout_changed());
    }
}

/// A strategy placing the display tree in logical space.
pub trait TreeLayout {
    fn layout_type(&self) -> TreeLayoutType;

    /// Clear `cache` and fill it with geometry for `tree`.
    fn layout(&mut self, tree: &Tree, cache: &mut TreeLayoutCache);

    fn maintain_aspect_ratio(&self) -> bool;

    fn is_showing_root_branch(&self) -> bool;

    fn is_showing_colouring(&self) -> bool;

    /// Line or circle of constant value along the scale axis.
    fn axis_line(&self, value: f64) -> Option<BezPath>;

    fn set_fish_eye(&mut self, _fish_eye: f64) {}

    fn set_point_of_interest(&mut self, _point: Point) {}

    fn base(&self) -> &LayoutBase;

    fn base_mut(&mut self) -> &mut LayoutBase;

    fn root_length(&self) -> f64 {
        self.base().root_length
    }

    /// Logical distance from the origin for a value on the scale axis.
    fn axis_position(&self, value: f64) -> f64 {
        let base = self.base();
        if base.axis_reversed {
            base.max_extent - value
        } else {
            base.root_length + value
        }
    }

    fn conventions(&self) -> &LayoutConventions {
        &self.base().conventions
    }

    fn set_conventions(&mut self, conventions: LayoutConventions) {
        let base = self.base_mut();
        base.conventions = conventions;
        base.fire_changed();
    }

    fn set_branch_colouring_attribute(&mut self, attribute: Option<String>) {
        let base = self.base_mut();
        base.conventions.branch_colouring_attribute = attribute;
        base.fire_changed();
    }

    fn is_showing_cartoon_tip_labels(&self) -> bool {
        self.base().showing_cartoon_tip_labels
    }

    fn set_showing_cartoon_tip_labels(&mut self, showing: bool) {
        let base = self.base_mut();
        base.showing_cartoon_tip_labels = showing;
        base.fire_changed();
    }

    fn is_axis_reversed(&self) -> bool {
        self.base().axis_reversed
    }

    fn set_axis_reversed(&mut self, reversed: bool) {
        let base = self.base_mut();
        base.axis_reversed = reversed;
        base.fire_changed();
    }

    fn add_listener(&mut self, listener: Weak<dyn TreeLayoutListener>) {
        self.base_mut().listeners.add(listener);
    }
}

/// Drawing weight of each node: tips and collapsed clades count one, cartoons
/// count their recorded tips.
pub(super) fn display_weights(tree: &Tree, conventions: &LayoutConventions) -> Vec<usize> {
    let mut weights = vec![0usize; tree.nodes.len()];
    for id in tree.postorder() {
        let node = &tree.nodes[id];
        weights[id] = if node.is_leaf() || conventions.collapsed(node).is_some() {
            1
        } else if let Some(cartoon) = conventions.cartoon(node) {
            cartoon.tip_count.max(1)
        } else {
            node.children.iter().map(|child| weights[*child]).sum()
        };
    }
    weights
}

/// Longest root-to-tip distance starting from `offset` at the root.
pub(super) fn max_extent(tree: &Tree, offset: f64) -> f64 {
    let mut positions = vec![0.0; tree.nodes.len()];
    let mut max_x = offset;
    for id in tree.preorder() {
        positions[id] = match tree.parent(id) {
            Some(parent) => positions[parent] + tree.length(id),
            None => offset,
        };
        if tree.is_external(id) {
            max_x = max_x.max(positions[id]);
        }
    }
    max_x
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::tree::test_support::tree_from_newick;
    use crate::tree::AttributeValue;

    struct Changes(Cell<usize>);

    impl TreeLayoutListener for Changes {
        fn tree_layout_changed(&self) {
            self.0.set(self.0.get() + 1);
        }
    }

    fn collapse(tree: &mut Tree, node: NodeId) {
        let heights = tree.node_heights();
        let summary = CladeSummary {
            tip_count: tree.tip_count(node),
            min_tip_height: tree.min_tip_height(node, &heights),
            label: Some("collapsed".to_string()),
            color: None,
        };
        tree.nodes[node].set_attribute(COLLAPSE_ATTRIBUTE, AttributeValue::Clade(summary));
    }

    #[test]
    fn every_strategy_gives_each_non_root_node_a_branch() {
        let tree = tree_from_newick("((A:1,B:1.5):1,(C:0.5,D:2):0.5,E:1);");
        for layout_type in TreeLayoutType::ALL {
            let mut layout = layout_type.create();
            let mut cache = TreeLayoutCache::default();
            layout.layout(&tree, &mut cache);
            for id in tree.preorder() {
                if tree.parent(id).is_some() {
                    assert!(
                        cache.branch_paths.contains_key(&id),
                        "{} missing branch for {id}",
                        layout_type.label()
                    );
                }
                if tree.is_external(id) {
                    assert!(cache.tip_label_paths.contains_key(&id));
                }
            }
            assert!(cache.tree_bounds().is_some());
        }
    }

    #[test]
    fn collapsed_clades_have_one_tip_anchor_in_every_strategy() {
        let mut tree = tree_from_newick("((A:1,B:1,C:1,D:1,E:1):1,F:2);");
        let clade = tree.parent(tree.find_by_name("A").unwrap()).unwrap();
        collapse(&mut tree, clade);
        for layout_type in TreeLayoutType::ALL {
            let mut layout = layout_type.create();
            let mut cache = TreeLayoutCache::default();
            layout.layout(&tree, &mut cache);
            assert_eq!(cache.collapsed_shapes.len(), 1, "{}", layout_type.label());
            assert_eq!(cache.tip_label_paths.len(), 2, "{}", layout_type.label());
            assert!(cache.tip_label_paths.contains_key(&clade));
        }
    }

    #[test]
    fn setters_notify_listeners() {
        let changes = Rc::new(Changes(Cell::new(0)));
        let mut layout = TreeLayoutType::Rectangular.create();
        let weak: Weak<dyn TreeLayoutListener> = Rc::downgrade(&changes) as Weak<_>;
        layout.add_listener(weak);
        layout.set_axis_reversed(true);
        layout.set_showing_cartoon_tip_labels(false);
        layout.set_branch_colouring_attribute(Some("colour".into()));
        assert_eq!(changes.0.get(), 3);
        assert_eq!(
            layout.conventions().branch_colouring_attribute.as_deref(),
            Some("colour")
        );
    }

    #[test]
    fn cache_clear_empties_every_map() {
        let tree = tree_from_newick("(A:1,B:1);");
        let mut layout = TreeLayoutType::Rectangular.create();
        let mut cache = TreeLayoutCache::default();
        layout.layout(&tree, &mut cache);
        assert!(!cache.is_empty());
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.tip_label_paths.is_empty());
        assert!(cache.tree_bounds().is_none());
    }
}
