//! The tree pane owns a loaded tree and everything needed to draw it: the
//! derived display tree, the layout strategies, painters, decorators, the
//! selection and the last successful calibration.
//!
//! Setters never recompute geometry themselves. They mark the calibration
//! stale through the shared [`Invalidation`] flags and the next
//! [`TreePane::draw`] recalibrates before painting.

use std::collections::BTreeSet;
use std::rc::{Rc, Weak};

use eframe::egui::Color32;
use log::{debug, info, warn};
use vello::kurbo::{BezPath, PathEl, Point, Rect, Shape, Size};

use super::calibration::{calibrate, Calibration, CalibrationInput};
use super::decorator::{DecoratedItem, Decorator};
use super::events::{
    Invalidation, Listeners, PainterListener, TreeLayoutListener, TreePaneListener,
    TreeSelectionListener,
};
use super::layout::{
    line_path, PolarTreeLayout, RadialTreeLayout, RectilinearTreeLayout, TreeLayout,
    TreeLayoutCache, TreeLayoutType,
};
use super::painter::{
    Justification, LabelIntent, LabelPainter, LegendPainter, NodeBarPainter, NodeShapePainter,
    Painter, PainterContext, ScaleAxis, ScaleAxisPainter, ScaleBarPainter, ScaleContext,
    ScaleGridPainter, ScalePainter, TimeScale,
};
use super::scene_graph::{polylines, with_transform, Canvas, Paint, StrokeStyle, TextMeasure};
use super::selection::{SelectionMode, SelectionModel};
use super::transform::{
    derive_display_tree, rooting_point_for_branch, write_through, BranchOrdering,
    BranchTransform, RootingType, TransformSettings,
};
use super::{
    AttributeValue, CladeSummary, NodeId, Tree, TreeNode, CARTOON_ATTRIBUTE, COLLAPSE_ATTRIBUTE,
    HILIGHT_ATTRIBUTE, ROTATE_ATTRIBUTE,
};

/// Side of the square probed around a pointer position.
const HIT_SIZE: f64 = 3.0;
const DEFAULT_HILIGHT: Color32 = Color32::from_rgb(255, 222, 128);
const DRAG_FILL: Color32 = Color32::from_rgba_premultiplied(64, 64, 64, 128);
const COLLAPSED_LABEL: &str = "collapsed";

/// The three layout strategies; one is active at a time and the others keep
/// their settings.
struct Layouts {
    active: TreeLayoutType,
    rectangular: RectilinearTreeLayout,
    polar: PolarTreeLayout,
    radial: RadialTreeLayout,
}

impl Layouts {
    fn get(&self) -> &dyn TreeLayout {
        match self.active {
            TreeLayoutType::Rectangular => &self.rectangular,
            TreeLayoutType::Polar => &self.polar,
            TreeLayoutType::Radial => &self.radial,
        }
    }

    fn get_mut(&mut self) -> &mut dyn TreeLayout {
        match self.active {
            TreeLayoutType::Rectangular => &mut self.rectangular,
            TreeLayoutType::Polar => &mut self.polar,
            TreeLayoutType::Radial => &mut self.radial,
        }
    }

    fn all_mut(&mut self) -> [&mut dyn TreeLayout; 3] {
        [&mut self.rectangular, &mut self.polar, &mut self.radial]
    }
}

/// Device geometry of the selection overlay, valid for one selection revision
/// and one calibration.
#[derive(Debug, Clone, Default)]
struct SelectionGeometry {
    key: Option<(u64, u64)>,
    branches: Vec<BezPath>,
    labels: Vec<BezPath>,
}

/// Nodes kept by [`TreePane::selected_subtree`].
struct KeptNode {
    node: NodeId,
    children: Vec<KeptNode>,
}

pub struct TreePane {
    source: Option<Tree>,
    tree: Option<Tree>,
    heights: Vec<f64>,
    transform_settings: TransformSettings,
    layouts: Layouts,
    cache: TreeLayoutCache,
    calibration: Option<Calibration>,
    calibration_serial: u64,
    invalidation: Rc<Invalidation>,
    size: Size,
    measure: TextMeasure,

    selection: SelectionModel,
    selection_geometry: SelectionGeometry,
    selection_color: Color32,
    selection_stroke: StrokeStyle,
    drag_rectangle: Option<Rect>,

    tip_labels: LabelPainter,
    node_labels: LabelPainter,
    branch_labels: LabelPainter,
    node_shapes: NodeShapePainter,
    node_bars: NodeBarPainter,
    scale_bar: ScaleBarPainter,
    scale_axis: ScaleAxisPainter,
    scale_grid: ScaleGridPainter,
    legend: LegendPainter,

    branch_decorator: Option<Rc<dyn Decorator>>,
    branch_gradient: bool,
    branch_colouring_decorator: Option<Rc<dyn Decorator>>,
    node_background_decorator: Option<Rc<dyn Decorator>>,
    hilighting_gradient: bool,
    branch_stroke: StrokeStyle,
    callout_stroke: StrokeStyle,
    showing_tip_callouts: bool,

    axis: ScaleAxis,
    axis_origin: f64,
    root_age: Option<f64>,

    listeners: Listeners<dyn TreePaneListener>,
}

impl Default for TreePane {
    fn default() -> Self {
        Self::new()
    }
}

impl TreePane {
    pub fn new() -> Self {
        let branch_stroke = StrokeStyle::new(1.0);
        let mut pane = Self {
            source: None,
            tree: None,
            heights: Vec::new(),
            transform_settings: TransformSettings::default(),
            layouts: Layouts {
                active: TreeLayoutType::Rectangular,
                rectangular: RectilinearTreeLayout::new(),
                polar: PolarTreeLayout::new(),
                radial: RadialTreeLayout::new(),
            },
            cache: TreeLayoutCache::default(),
            calibration: None,
            calibration_serial: 0,
            invalidation: Invalidation::new(),
            size: Size::new(800.0, 600.0),
            measure: TextMeasure::default(),
            selection: SelectionModel::new(),
            selection_geometry: SelectionGeometry::default(),
            selection_color: Color32::from_rgba_unmultiplied(90, 144, 229, 128),
            selection_stroke: selection_stroke_for(&branch_stroke),
            drag_rectangle: None,
            tip_labels: LabelPainter::new(LabelIntent::Tip),
            node_labels: LabelPainter::new(LabelIntent::Node),
            branch_labels: LabelPainter::new(LabelIntent::Branch),
            node_shapes: NodeShapePainter::new(),
            node_bars: NodeBarPainter::new(),
            scale_bar: ScaleBarPainter::new(),
            scale_axis: ScaleAxisPainter::new(),
            scale_grid: ScaleGridPainter::new(),
            legend: LegendPainter::new(),
            branch_decorator: None,
            branch_gradient: false,
            branch_colouring_decorator: None,
            node_background_decorator: None,
            hilighting_gradient: false,
            branch_stroke,
            callout_stroke: StrokeStyle::dashed(0.5, 0.5, 2.0),
            showing_tip_callouts: true,
            axis: ScaleAxis::default(),
            axis_origin: 0.0,
            root_age: None,
            listeners: Listeners::new(),
        };
        pane.register_listeners();
        pane
    }

    fn register_listeners(&mut self) {
        let painter: Weak<dyn PainterListener> = Rc::<Invalidation>::downgrade(&self.invalidation);
        self.tip_labels.add_listener(painter.clone());
        self.node_labels.add_listener(painter.clone());
        self.branch_labels.add_listener(painter.clone());
        self.node_shapes.add_listener(painter.clone());
        self.node_bars.add_listener(painter.clone());
        self.scale_bar.add_listener(painter.clone());
        self.scale_axis.add_listener(painter.clone());
        self.scale_grid.add_listener(painter.clone());
        self.legend.add_listener(painter);

        let layout: Weak<dyn TreeLayoutListener> = Rc::<Invalidation>::downgrade(&self.invalidation);
        for strategy in self.layouts.all_mut() {
            strategy.add_listener(layout.clone());
        }

        let selection: Weak<dyn TreeSelectionListener> = Rc::<Invalidation>::downgrade(&self.invalidation);
        self.selection.add_listener(selection);
    }

    fn invalidate(&self) {
        self.invalidation.invalidate();
    }

    fn fire_settings_changed(&mut self) {
        self.listeners
            .fire(|listener| listener.tree_pane_settings_changed());
    }

    // ---- tree and transform chain ----

    /// Replace the loaded tree. The display tree is derived from it at once.
    pub fn set_tree(&mut self, tree: Tree) {
        info!(
            "showing tree with {} tip(s){}",
            tree.leaf_count(),
            if tree.has_lengths() {
                ""
            } else {
                ", no branch lengths"
            }
        );
        self.source = Some(tree);
        self.transform_settings.rooting = None;
        self.rebuild();
    }

    pub fn clear_tree(&mut self) {
        self.source = None;
        self.rebuild();
    }

    /// The tree as drawn.
    pub fn tree(&self) -> Option<&Tree> {
        self.tree.as_ref()
    }

    /// The tree as loaded, carrying annotations made through the pane.
    pub fn source_tree(&self) -> Option<&Tree> {
        self.source.as_ref()
    }

    fn rebuild(&mut self) {
        self.tree = self
            .source
            .as_ref()
            .map(|source| derive_display_tree(source, &self.transform_settings));
        self.heights = self
            .tree
            .as_ref()
            .map(Tree::node_heights)
            .unwrap_or_default();
        // Node ids are not stable across derivations.
        if self.selection.has_selection() {
            self.selection.clear_selection();
        }
        self.setup_painter_attributes();
        self.invalidate();
    }

    fn setup_painter_attributes(&mut self) {
        let Some(tree) = &self.tree else {
            return;
        };
        self.tip_labels.setup_attributes(tree);
        self.node_labels.setup_attributes(tree);
        self.branch_labels.setup_attributes(tree);
        self.node_shapes.setup_attributes(tree);
    }

    pub fn transform_settings(&self) -> &TransformSettings {
        &self.transform_settings
    }

    pub fn set_transform_settings(&mut self, settings: TransformSettings) {
        if self.transform_settings != settings {
            self.transform_settings = settings;
            self.rebuild();
            self.fire_settings_changed();
        }
    }

    fn update_transform(&mut self, update: impl FnOnce(&mut TransformSettings)) {
        let mut settings = self.transform_settings.clone();
        update(&mut settings);
        self.set_transform_settings(settings);
    }

    /// True when branch lengths are replaced, either by choice or because the
    /// loaded tree has none.
    pub fn is_branch_transform_active(&self) -> bool {
        self.transform_settings.transform_branches_on
            || self.source.as_ref().is_some_and(|tree| !tree.has_lengths())
    }

    pub fn set_branch_transform_on(&mut self, on: bool) {
        self.update_transform(|settings| settings.transform_branches_on = on);
    }

    pub fn set_branch_transform(&mut self, transform: BranchTransform) {
        self.update_transform(|settings| settings.branch_transform = transform);
    }

    pub fn set_branch_ordering_on(&mut self, on: bool) {
        self.update_transform(|settings| settings.order_branches_on = on);
    }

    pub fn set_branch_ordering(&mut self, ordering: BranchOrdering) {
        self.update_transform(|settings| settings.branch_ordering = ordering);
    }

    pub fn set_rooting_on(&mut self, on: bool) {
        self.update_transform(|settings| settings.rooting_on = on);
    }

    pub fn set_rooting_type(&mut self, rooting_type: RootingType) {
        self.update_transform(|settings| settings.rooting_type = rooting_type);
    }

    pub fn midpoint_root(&mut self) {
        self.update_transform(|settings| {
            settings.rooting_on = true;
            settings.rooting_type = RootingType::MidPoint;
        });
    }

    /// Root on the branch above `node` of the display tree, `fraction` of the
    /// way down from its parent.
    pub fn set_root_location(&mut self, node: NodeId, fraction: f64) {
        let (Some(source), Some(tree)) = (&self.source, &self.tree) else {
            return;
        };
        let Some(point) =
            rooting_point_for_branch(source, tree, node, fraction, self.transform_settings.rooting)
        else {
            warn!("node {node} has no branch to root on");
            return;
        };
        self.update_transform(|settings| {
            settings.rooting_on = true;
            settings.rooting_type = RootingType::UserRooting;
            settings.rooting = Some(point);
        });
    }

    /// Root half way along the first selected branch.
    pub fn reroot_on_selected_branch(&mut self) {
        if let Some(node) = self.selection.selected_nodes().first().copied() {
            self.set_root_location(node, 0.5);
        }
    }

    pub fn clear_rooting(&mut self) {
        self.update_transform(|settings| settings.rooting = None);
    }

    // ---- node annotations ----

    fn write_attribute(&mut self, node: NodeId, key: &str, value: Option<AttributeValue>) {
        if let (Some(source), Some(tree)) = (self.source.as_mut(), self.tree.as_mut()) {
            write_through(source, tree, node, key, value);
        }
    }

    /// Flip the child order of `node`.
    pub fn rotate_node(&mut self, node: NodeId) {
        let Some(tree_node) = self.tree.as_ref().and_then(|tree| tree.node(node)) else {
            return;
        };
        let rotated = tree_node
            .attribute(ROTATE_ATTRIBUTE)
            .and_then(AttributeValue::as_bool)
            .unwrap_or(false);
        self.write_attribute(node, ROTATE_ATTRIBUTE, Some(AttributeValue::Boolean(!rotated)));
        self.invalidate();
    }

    pub fn clear_rotation(&mut self, node: NodeId) {
        self.write_attribute(node, ROTATE_ATTRIBUTE, None);
        self.invalidate();
    }

    pub fn rotate_selected_node(&mut self) {
        let selected: Vec<NodeId> = self.selection.selected_nodes().iter().copied().collect();
        for node in selected {
            self.rotate_node(node);
        }
    }

    /// Clear rotations of the selected nodes, or of every node when nothing is
    /// selected.
    pub fn clear_selected_node_rotations(&mut self) {
        let nodes: Vec<NodeId> = if self.selection.selected_nodes().is_empty() {
            self.tree
                .as_ref()
                .map(Tree::internal_nodes)
                .unwrap_or_default()
        } else {
            self.selection.selected_nodes().iter().copied().collect()
        };
        for node in nodes {
            self.clear_rotation(node);
        }
    }

    /// Selected internal nodes that have no selected ancestor.
    fn outermost_selected(&self) -> Vec<NodeId> {
        let Some(tree) = &self.tree else {
            return Vec::new();
        };
        let selected = self.selection.selected_nodes();
        let mut found = Vec::new();
        let mut stack: Vec<NodeId> = tree.root.into_iter().collect();
        while let Some(node) = stack.pop() {
            if tree.is_external(node) {
                continue;
            }
            if selected.contains(&node) {
                found.push(node);
            } else {
                stack.extend(tree.children(node).iter().rev());
            }
        }
        found
    }

    fn clade_summary(&self, node: NodeId, label: Option<String>, color: Option<Color32>) -> Option<AttributeValue> {
        let tree = self.tree.as_ref()?;
        Some(AttributeValue::Clade(CladeSummary {
            tip_count: tree.tip_count(node),
            min_tip_height: tree.min_tip_height(node, &self.heights),
            label,
            color,
        }))
    }

    fn has_attribute(&self, node: NodeId, key: &str) -> bool {
        self.tree
            .as_ref()
            .and_then(|tree| tree.node(node))
            .is_some_and(|tree_node| tree_node.attribute(key).is_some())
    }

    fn toggle_clade_attribute(&mut self, key: &str, label: Option<&str>) {
        for node in self.outermost_selected() {
            let value = if self.has_attribute(node, key) {
                None
            } else {
                self.clade_summary(node, label.map(str::to_string), None)
            };
            self.write_attribute(node, key, value);
        }
        self.invalidate();
    }

    /// Draw each selected clade as a triangle with one slot per tip.
    pub fn cartoon_selected_nodes(&mut self) {
        self.toggle_clade_attribute(CARTOON_ATTRIBUTE, None);
    }

    /// Draw each selected clade as a single tip.
    pub fn collapse_selected_nodes(&mut self) {
        self.toggle_clade_attribute(COLLAPSE_ATTRIBUTE, Some(COLLAPSED_LABEL));
    }

    pub fn hilight_selected_nodes(&mut self, color: Color32) {
        for node in self.outermost_selected() {
            let value = self.clade_summary(node, None, Some(color));
            self.write_attribute(node, HILIGHT_ATTRIBUTE, value);
        }
        self.invalidate();
    }

    /// Refresh tip counts and heights stored by cartoons, collapses and
    /// hilights of the selected clades.
    pub fn recalculate_collapsed_nodes(&mut self) {
        for node in self.outermost_selected() {
            for key in [CARTOON_ATTRIBUTE, COLLAPSE_ATTRIBUTE, HILIGHT_ATTRIBUTE] {
                let Some(AttributeValue::Clade(old)) = self
                    .tree
                    .as_ref()
                    .and_then(|tree| tree.node(node))
                    .and_then(|tree_node| tree_node.attribute(key))
                    .cloned()
                else {
                    continue;
                };
                let value = self.clade_summary(node, old.label, old.color);
                self.write_attribute(node, key, value);
            }
        }
        self.invalidate();
    }

    /// Expand the outermost selected collapsed clades, or all of them when
    /// nothing is selected.
    pub fn clear_collapsed_nodes(&mut self) {
        let nodes = if self.selection.has_selection() {
            self.outermost_selected()
        } else {
            self.tree
                .as_ref()
                .map(Tree::internal_nodes)
                .unwrap_or_default()
        };
        for node in nodes {
            self.write_attribute(node, COLLAPSE_ATTRIBUTE, None);
            self.write_attribute(node, CARTOON_ATTRIBUTE, None);
        }
        self.invalidate();
    }

    /// Remove hilights from every selected node, or from all nodes when
    /// nothing is selected.
    pub fn clear_hilighted_nodes(&mut self) {
        let nodes: Vec<NodeId> = if self.selection.has_selection() {
            self.selection.selected_nodes().iter().copied().collect()
        } else {
            self.tree
                .as_ref()
                .map(Tree::internal_nodes)
                .unwrap_or_default()
        };
        for node in nodes {
            self.write_attribute(node, HILIGHT_ATTRIBUTE, None);
        }
        self.invalidate();
    }

    fn annotate(&mut self, nodes: Vec<NodeId>, key: &str, value: Option<AttributeValue>) {
        for node in nodes {
            self.write_attribute(node, key, value.clone());
        }
        self.setup_painter_attributes();
        self.invalidate();
    }

    pub fn annotate_selected_nodes(&mut self, key: &str, value: AttributeValue) {
        let nodes = self.selection.selected_nodes().iter().copied().collect();
        self.annotate(nodes, key, Some(value));
    }

    pub fn annotate_selected_tips(&mut self, key: &str, value: AttributeValue) {
        let tips = self.selection.selected_tips().iter().copied().collect();
        self.annotate(tips, key, Some(value));
    }

    pub fn clear_selected_node_annotation(&mut self, key: &str) {
        let nodes = self.selection.selected_nodes().iter().copied().collect();
        self.annotate(nodes, key, None);
    }

    pub fn clear_selected_tip_annotation(&mut self, key: &str) {
        let tips = self.selection.selected_tips().iter().copied().collect();
        self.annotate(tips, key, None);
    }

    // ---- selection ----

    pub fn selection(&self) -> &SelectionModel {
        &self.selection
    }

    pub fn selected_nodes(&self) -> &BTreeSet<NodeId> {
        self.selection.selected_nodes()
    }

    pub fn selected_tips(&self) -> &BTreeSet<NodeId> {
        self.selection.selected_tips()
    }

    pub fn has_selection(&self) -> bool {
        self.selection.has_selection()
    }

    pub fn set_selected_node(&mut self, node: NodeId) {
        if let Some(tree) = &self.tree {
            self.selection.set_selected_node(tree, node);
        }
    }

    pub fn set_selected_tip(&mut self, node: NodeId) {
        if let Some(tree) = &self.tree {
            self.selection.set_selected_tip(tree, node);
        }
    }

    pub fn set_selected_clade(&mut self, node: NodeId) {
        if let Some(tree) = &self.tree {
            self.selection.set_selected_clade(tree, node);
        }
    }

    pub fn set_selected_tips(&mut self, node: NodeId) {
        if let Some(tree) = &self.tree {
            self.selection.set_selected_tips(tree, node);
        }
    }

    pub fn add_selected_node(&mut self, node: NodeId, toggle: bool, extend: bool) {
        if let Some(tree) = &self.tree {
            self.selection.add_selected_node(tree, node, toggle, extend);
        }
    }

    pub fn add_selected_tip(&mut self, node: NodeId, toggle: bool, extend: bool) {
        if let Some(tree) = &self.tree {
            self.selection.add_selected_tip(tree, node, toggle, extend);
        }
    }

    pub fn add_selected_clade(&mut self, node: NodeId, toggle: bool, extend: bool) {
        if let Some(tree) = &self.tree {
            self.selection.add_selected_clade(tree, node, toggle, extend);
        }
    }

    pub fn add_selected_tips(&mut self, node: NodeId, toggle: bool) {
        if let Some(tree) = &self.tree {
            self.selection.add_selected_tips(tree, node, toggle);
        }
    }

    pub fn select_with_mode(&mut self, node: NodeId, mode: SelectionMode, toggle: bool, extend: bool) {
        if let Some(tree) = &self.tree {
            self.selection.select_with_mode(tree, node, mode, toggle, extend);
        }
    }

    pub fn select_clades_from_selected_nodes(&mut self) {
        if let Some(tree) = &self.tree {
            self.selection.select_clades_from_selected_nodes(tree);
        }
    }

    pub fn select_tips_from_selected_nodes(&mut self) {
        if let Some(tree) = &self.tree {
            self.selection.select_tips_from_selected_nodes(tree);
        }
    }

    pub fn select_nodes_from_selected_tips(&mut self) {
        if let Some(tree) = &self.tree {
            self.selection.select_nodes_from_selected_tips(tree);
        }
    }

    pub fn convert_selection(&mut self, from: SelectionMode, to: SelectionMode) {
        if let Some(tree) = &self.tree {
            self.selection.convert_for_mode(tree, from, to);
        }
    }

    pub fn select_all_taxa(&mut self) {
        if let Some(tree) = &self.tree {
            self.selection.select_all_taxa(tree);
        }
    }

    pub fn select_all_nodes(&mut self) {
        if let Some(tree) = &self.tree {
            self.selection.select_all_nodes(tree);
        }
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear_selection();
    }

    pub fn add_selection_listener(&mut self, listener: Weak<dyn TreeSelectionListener>) {
        self.selection.add_listener(listener);
    }

    pub fn add_pane_listener(&mut self, listener: Weak<dyn TreePaneListener>) {
        self.listeners.add(listener);
    }

    /// The part of the display tree spanned by the selection, the whole tree
    /// when nothing is selected. `None` when the selection spans fewer than two
    /// tips.
    pub fn selected_subtree(&self) -> Option<Tree> {
        let tree = self.tree.as_ref()?;
        if !self.selection.has_selection() {
            return Some(tree.clone());
        }
        let kept = self.kept_subtree(tree, tree.root?, false)?;
        if kept.children.is_empty() {
            return None;
        }
        let mut subtree = Tree::empty(tree.id, tree.label.clone());
        append_kept(&mut subtree, tree, &self.heights, &kept, None);
        subtree.root = Some(0);
        Some(subtree)
    }

    fn kept_subtree(&self, tree: &Tree, node: NodeId, whole: bool) -> Option<KeptNode> {
        let nodes = self.selection.selected_nodes();
        if tree.is_external(node) {
            let kept = whole || nodes.contains(&node) || self.selection.selected_tips().contains(&node);
            return kept.then(|| KeptNode {
                node,
                children: Vec::new(),
            });
        }
        let mut children: Vec<KeptNode> = tree
            .ordered_children(node)
            .into_iter()
            .filter_map(|child| self.kept_subtree(tree, child, whole))
            .collect();
        match children.len() {
            0 if !whole && nodes.contains(&node) => self.kept_subtree(tree, node, true),
            0 => None,
            1 => children.pop(),
            _ => Some(KeptNode { node, children }),
        }
    }

    // ---- layout ----

    pub fn layout_type(&self) -> TreeLayoutType {
        self.layouts.active
    }

    pub fn set_tree_layout(&mut self, layout_type: TreeLayoutType) {
        if self.layouts.active != layout_type {
            self.layouts.active = layout_type;
            self.invalidate();
        }
    }

    pub fn tree_layout(&self) -> &dyn TreeLayout {
        self.layouts.get()
    }

    pub fn rectangular_layout(&self) -> &RectilinearTreeLayout {
        &self.layouts.rectangular
    }

    pub fn polar_layout(&self) -> &PolarTreeLayout {
        &self.layouts.polar
    }

    pub fn radial_layout(&self) -> &RadialTreeLayout {
        &self.layouts.radial
    }

    pub fn rectangular_layout_mut(&mut self) -> &mut RectilinearTreeLayout {
        &mut self.layouts.rectangular
    }

    pub fn polar_layout_mut(&mut self) -> &mut PolarTreeLayout {
        &mut self.layouts.polar
    }

    pub fn radial_layout_mut(&mut self) -> &mut RadialTreeLayout {
        &mut self.layouts.radial
    }

    pub fn set_showing_cartoon_tip_labels(&mut self, showing: bool) {
        for layout in self.layouts.all_mut() {
            layout.set_showing_cartoon_tip_labels(showing);
        }
    }

    pub fn layout_cache(&self) -> &TreeLayoutCache {
        &self.cache
    }

    pub fn calibration(&self) -> Option<&Calibration> {
        self.calibration.as_ref()
    }

    // ---- painters and decorators ----

    pub fn label_painter(&self, intent: LabelIntent) -> &LabelPainter {
        match intent {
            LabelIntent::Tip => &self.tip_labels,
            LabelIntent::Node => &self.node_labels,
            LabelIntent::Branch => &self.branch_labels,
        }
    }

    pub fn label_painter_mut(&mut self, intent: LabelIntent) -> &mut LabelPainter {
        match intent {
            LabelIntent::Tip => &mut self.tip_labels,
            LabelIntent::Node => &mut self.node_labels,
            LabelIntent::Branch => &mut self.branch_labels,
        }
    }

    pub fn node_shape_painter(&self) -> &NodeShapePainter {
        &self.node_shapes
    }

    pub fn node_bar_painter(&self) -> &NodeBarPainter {
        &self.node_bars
    }

    pub fn scale_bar_painter(&self) -> &ScaleBarPainter {
        &self.scale_bar
    }

    pub fn scale_axis_painter(&self) -> &ScaleAxisPainter {
        &self.scale_axis
    }

    pub fn scale_grid_painter(&self) -> &ScaleGridPainter {
        &self.scale_grid
    }

    pub fn legend_painter(&self) -> &LegendPainter {
        &self.legend
    }

    pub fn node_shape_painter_mut(&mut self) -> &mut NodeShapePainter {
        &mut self.node_shapes
    }

    pub fn node_bar_painter_mut(&mut self) -> &mut NodeBarPainter {
        &mut self.node_bars
    }

    pub fn scale_bar_painter_mut(&mut self) -> &mut ScaleBarPainter {
        &mut self.scale_bar
    }

    pub fn scale_axis_painter_mut(&mut self) -> &mut ScaleAxisPainter {
        &mut self.scale_axis
    }

    pub fn scale_grid_painter_mut(&mut self) -> &mut ScaleGridPainter {
        &mut self.scale_grid
    }

    pub fn legend_painter_mut(&mut self) -> &mut LegendPainter {
        &mut self.legend
    }

    /// Colour branches through `decorator`, blending from parent to child when
    /// `gradient` is set and the decorator supports it.
    pub fn set_branch_decorator(&mut self, decorator: Option<Rc<dyn Decorator>>, gradient: bool) {
        self.branch_decorator = decorator;
        self.branch_gradient = gradient;
        self.invalidate();
    }

    /// Split branches into coloured segments read from `attribute`.
    pub fn set_branch_colouring(&mut self, attribute: Option<String>, decorator: Option<Rc<dyn Decorator>>) {
        for layout in self.layouts.all_mut() {
            layout.set_branch_colouring_attribute(attribute.clone());
        }
        self.branch_colouring_decorator = decorator;
        self.invalidate();
    }

    pub fn set_node_background_decorator(&mut self, decorator: Option<Rc<dyn Decorator>>) {
        self.node_background_decorator = decorator;
        self.invalidate();
    }

    pub fn set_hilighting_gradient(&mut self, gradient: bool) {
        self.hilighting_gradient = gradient;
        self.invalidate();
    }

    pub fn branch_stroke(&self) -> StrokeStyle {
        self.branch_stroke
    }

    pub fn set_branch_stroke(&mut self, stroke: StrokeStyle) {
        self.branch_stroke = stroke;
        self.selection_stroke = selection_stroke_for(&stroke);
        self.invalidate();
    }

    pub fn set_callout_stroke(&mut self, stroke: StrokeStyle) {
        self.callout_stroke = stroke;
        self.invalidate();
    }

    pub fn selection_color(&self) -> Color32 {
        self.selection_color
    }

    /// Selection overlays are drawn half transparent in `color`.
    pub fn set_selection_color(&mut self, color: Color32) {
        self.selection_color = Color32::from_rgba_unmultiplied(color.r(), color.g(), color.b(), 128);
        self.invalidation.request_repaint();
    }

    pub fn set_showing_tip_callouts(&mut self, showing: bool) {
        self.showing_tip_callouts = showing;
        self.invalidate();
    }

    pub fn set_drag_rectangle(&mut self, rect: Option<Rect>) {
        self.drag_rectangle = rect;
        self.invalidation.request_repaint();
    }

    // ---- scale axis ----

    pub fn axis_origin(&self) -> f64 {
        self.axis_origin
    }

    pub fn set_axis_origin(&mut self, origin: f64) {
        self.axis_origin = origin;
        self.invalidate();
    }

    pub fn is_axis_reversed(&self) -> bool {
        self.layouts.get().is_axis_reversed()
    }

    pub fn set_axis_reversed(&mut self, reversed: bool) {
        for layout in self.layouts.all_mut() {
            layout.set_axis_reversed(reversed);
        }
    }

    pub fn axis(&self) -> &ScaleAxis {
        &self.axis
    }

    /// Fixed major tick spacing and minor ticks per major tick.
    pub fn set_tick_spacing(&mut self, major: Option<f64>, minor_per_major: usize) {
        self.axis.set_manual_spacing(major);
        self.axis.set_minor_ticks_per_major(minor_per_major);
        self.invalidate();
    }

    pub fn set_automatic_scale(&mut self) {
        self.axis.set_manual_spacing(None);
        self.invalidate();
    }

    pub fn root_age(&self) -> Option<f64> {
        self.root_age
    }

    /// Age of the root; node heights are mapped to ages through it.
    pub fn set_root_age(&mut self, age: Option<f64>) {
        self.root_age = age.filter(|age| age.is_finite());
        self.invalidate();
    }

    pub fn time_scale(&self) -> TimeScale {
        match (self.root_age, &self.tree) {
            (Some(age), Some(tree)) => TimeScale::from_root_age(age, tree.root_height()),
            _ => TimeScale::default(),
        }
    }

    // ---- calibration and drawing ----

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn set_size(&mut self, width: f64, height: f64) {
        let size = Size::new(width, height);
        if size != self.size {
            self.size = size;
            self.invalidate();
        }
    }

    pub fn set_text_measure(&mut self, measure: TextMeasure) {
        self.measure = measure;
        self.invalidate();
    }

    /// True once after every change that needs a repaint.
    pub fn take_repaint_request(&self) -> bool {
        self.invalidation.take_repaint()
    }

    /// Recalibrate when stale. Returns whether a calibration is available.
    ///
    /// A failed calibration keeps the previous cache and calibration, and is
    /// not retried until something changes.
    pub fn ensure_calibrated(&mut self) -> bool {
        if self.invalidation.is_calibrated() && self.calibration.is_some() {
            return true;
        }
        let Some(tree) = &self.tree else {
            return false;
        };
        let time_scale = self.time_scale();
        let node_bars = (!self.is_branch_transform_active()).then_some(&self.node_bars);
        let scale_painters: [&dyn ScalePainter; 2] = [&self.scale_bar, &self.scale_axis];

        let result = calibrate(
            CalibrationInput {
                tree,
                layout: self.layouts.get_mut(),
                tip_labels: &self.tip_labels,
                node_labels: &self.node_labels,
                branch_labels: &self.branch_labels,
                node_shapes: &self.node_shapes,
                node_bars,
                scale_painters: &scale_painters,
                legend: &self.legend,
                axis: self.axis.clone(),
                axis_origin: self.axis_origin,
                time_scale,
                measure: self.measure,
            },
            self.size.width,
            self.size.height,
        );
        match result {
            Ok((cache, calibration)) => {
                self.cache = cache;
                self.calibration = Some(calibration);
                self.calibration_serial = self.calibration_serial.wrapping_add(1);
            }
            Err(error) => warn!("calibration failed, keeping the previous drawing: {error}"),
        }
        self.invalidation.mark_calibrated();
        self.calibration.is_some()
    }

    /// Draw the tree into a `width` x `height` canvas, with the selection
    /// overlay and the drag rectangle on top.
    pub fn draw(&mut self, canvas: &mut dyn Canvas, width: f64, height: f64) {
        self.set_size(width, height);
        if !self.ensure_calibrated() {
            return;
        }
        self.refresh_selection_geometry();
        self.paint_tree(canvas);
        self.paint_selection(canvas);
    }

    fn refresh_selection_geometry(&mut self) {
        let key = Some((self.selection.revision(), self.calibration_serial));
        if self.selection_geometry.key == key {
            return;
        }
        let Some(calibration) = &self.calibration else {
            return;
        };
        let transform = calibration.transform;
        let mut branches = Vec::new();
        for node in self.selection.selected_nodes() {
            if let Some(path) = self.cache.branch_paths.get(node) {
                branches.push(transform * path.clone());
            }
            if let Some(shape) = self.cache.collapsed_shapes.get(node) {
                branches.push(transform * shape.clone());
            }
        }
        let labels = self
            .selection
            .selected_tips()
            .iter()
            .filter_map(|tip| calibration.tip_labels.get(tip))
            .map(|placement| placement.outline())
            .collect();
        debug!("rebuilt selection overlay for revision {}", self.selection.revision());
        self.selection_geometry = SelectionGeometry {
            key,
            branches,
            labels,
        };
    }

    fn paint_selection(&self, canvas: &mut dyn Canvas) {
        let paint = Paint::Solid(self.selection_color);
        for branch in &self.selection_geometry.branches {
            canvas.stroke(branch, &self.selection_stroke, &paint);
        }
        for label in &self.selection_geometry.labels {
            canvas.fill(label, &paint);
        }
        if let Some(rect) = self.drag_rectangle {
            canvas.fill_rect(rect, &Paint::Solid(DRAG_FILL));
        }
    }

    fn paint_tree(&self, canvas: &mut dyn Canvas) {
        let (Some(tree), Some(calibration)) = (&self.tree, &self.calibration) else {
            return;
        };
        let transform = calibration.transform;
        let layout = self.layouts.get();
        let time_scale = self.time_scale();
        let ctx = PainterContext {
            tree,
            heights: &self.heights,
            cache: &self.cache,
            time_scale,
            measure: self.measure,
        };
        let scale_ctx = ScaleContext {
            tree,
            layout,
            transform,
            tree_bounds: calibration.tree_bounds,
            axis: &calibration.axis,
            time_scale,
            measure: self.measure,
        };

        if self.legend.is_visible() {
            if let Some(bounds) = calibration.legend_bounds {
                self.legend.paint(canvas, &scale_ctx, Justification::Center, bounds);
            }
        }

        let scale_painters: [&dyn ScalePainter; 2] = [&self.scale_bar, &self.scale_axis];
        for (painter, bounds) in scale_painters.iter().zip(&calibration.scale_bounds) {
            if let (true, Some(bounds)) = (painter.is_visible(), bounds) {
                painter.paint(canvas, &scale_ctx, Justification::Center, *bounds);
            }
        }

        if let Some(decorator) = &self.node_background_decorator {
            let clear = Paint::Solid(Color32::TRANSPARENT);
            for (node, area) in &self.cache.node_areas {
                let paint = decorator.paint(DecoratedItem::Node(&tree.nodes[*node]), &clear);
                if paint != clear {
                    canvas.fill(&(transform * area.clone()), &paint);
                }
            }
        }

        for node in &self.cache.hilight_nodes {
            let Some(shape) = self.cache.hilight_shapes.get(node) else {
                continue;
            };
            let color = layout
                .conventions()
                .hilight(&tree.nodes[*node])
                .and_then(|summary| summary.color)
                .unwrap_or(DEFAULT_HILIGHT);
            let shape = transform * shape.clone();
            if self.hilighting_gradient {
                let bounds = shape.bounding_box();
                let gradient = Paint::Gradient {
                    start: Point::new(bounds.x0, 0.0),
                    end: Point::new(bounds.x1, 0.0),
                    from: Color32::WHITE,
                    to: color,
                };
                canvas.fill(&shape, &gradient);
            } else {
                canvas.fill(&shape, &Paint::Solid(color));
                canvas.stroke(&shape, &StrokeStyle::new(0.5), &Paint::Solid(darker(color)));
            }
        }

        if self.scale_grid.is_visible() {
            self.scale_grid
                .paint(canvas, &scale_ctx, Justification::Center, calibration.grid_bounds);
        }

        let black = Paint::Solid(Color32::BLACK);
        for (node, shape) in &self.cache.collapsed_shapes {
            let shape = transform * shape.clone();
            let item = DecoratedItem::Node(&tree.nodes[*node]);
            let (paint, stroke) = match &self.branch_decorator {
                Some(decorator) => {
                    let fill = decorator.fill_paint(item, &black);
                    if fill != black {
                        canvas.fill(&shape, &fill);
                    }
                    (decorator.paint(item, &black), decorator.stroke(item, &self.branch_stroke))
                }
                None => (black.clone(), self.branch_stroke),
            };
            canvas.stroke(&shape, &stroke, &paint);
        }

        for (node, path) in &self.cache.branch_paths {
            self.paint_branch(canvas, tree, *node, transform * path.clone());
        }

        if !self.is_branch_transform_active() && self.node_bars.is_visible() {
            for line in calibration.node_bars.values() {
                self.node_bars.paint(canvas, *line);
            }
        }

        if self.node_shapes.is_visible() {
            for (node, placement) in &calibration.node_shapes {
                self.node_shapes
                    .paint(canvas, &tree.nodes[*node], placement.center, placement.size);
            }
        }

        if self.tip_labels.is_visible() {
            for (node, placement) in &calibration.tip_labels {
                with_transform(canvas, placement.transform, |canvas| {
                    self.tip_labels.paint(
                        canvas,
                        &ctx,
                        *node,
                        placement.justification,
                        placement.local_bounds(),
                    )
                });
                if self.showing_tip_callouts {
                    if let Some(callout) = self.cache.callout_paths.get(node) {
                        let line = line_path(transform * callout.p0, transform * callout.p1);
                        canvas.stroke(&line, &self.callout_stroke, &black);
                    }
                }
            }
        }

        for (painter, placements) in [
            (&self.node_labels, &calibration.node_labels),
            (&self.branch_labels, &calibration.branch_labels),
        ] {
            if !painter.is_visible() {
                continue;
            }
            let centred = painter.intent() == LabelIntent::Branch;
            for (node, placement) in placements {
                let justification = if centred {
                    Justification::Center
                } else {
                    placement.justification
                };
                with_transform(canvas, placement.transform, |canvas| {
                    painter.paint(canvas, &ctx, *node, justification, placement.local_bounds())
                });
            }
        }
    }

    fn paint_branch(&self, canvas: &mut dyn Canvas, tree: &Tree, node: NodeId, path: BezPath) {
        let tree_node = &tree.nodes[node];
        let item = DecoratedItem::Node(tree_node);
        let stroke = match &self.branch_decorator {
            Some(decorator) => decorator.stroke(item, &self.branch_stroke),
            None => self.branch_stroke,
        };
        let black = Paint::Solid(Color32::BLACK);

        let layout = self.layouts.get();
        let colouring = (layout.is_showing_colouring()
            && self.cache.coloured_branches.contains(&node))
        .then(|| layout.conventions().colouring(tree_node))
        .flatten();
        if let (Some(colouring), Some(decorator)) = (colouring, &self.branch_colouring_decorator) {
            let elements = path.elements();
            let Some(PathEl::MoveTo(mut from)) = elements.first().copied() else {
                return;
            };
            let mut rest = 1;
            for (colour, _) in &colouring.segments {
                let Some(to) = elements.get(rest).and_then(|element| element.end_point()) else {
                    break;
                };
                let segment = line_path(from, to);
                canvas.stroke(&segment, &stroke, &decorator.paint(DecoratedItem::Index(*colour), &black));
                from = to;
                rest += 1;
            }
            let mut remainder = BezPath::new();
            remainder.move_to(from);
            for element in elements.iter().skip(rest) {
                remainder.push(*element);
            }
            let paint = decorator.paint(DecoratedItem::Index(colouring.final_colour), &black);
            canvas.stroke(&remainder, &stroke, &paint);
            return;
        }

        let paint = match &self.branch_decorator {
            Some(decorator) if self.branch_gradient && decorator.allows_gradient() => {
                let parent = tree_node.parent.map(|parent| &tree.nodes[parent]);
                let start = path.elements().first().and_then(|element| element.end_point());
                let end = path.elements().last().and_then(|element| element.end_point());
                match (parent, start, end) {
                    (Some(parent), Some(start), Some(end)) => decorator.pair_paint(
                        DecoratedItem::Node(parent),
                        item,
                        start,
                        end,
                        &black,
                    ),
                    _ => decorator.paint(item, &black),
                }
            }
            Some(decorator) => decorator.paint(item, &black),
            None => black,
        };
        canvas.stroke(&path, &stroke, &paint);
    }

    // ---- hit testing ----

    /// Node under a device point: a tip whose label contains it, else the
    /// first node whose branch or collapsed shape passes within a pixel.
    pub fn node_at(&self, point: Point) -> Option<NodeId> {
        let tree = self.tree.as_ref()?;
        let calibration = self.calibration.as_ref()?;
        let probe = Rect::from_center_size(point, (HIT_SIZE, HIT_SIZE));

        let tip = tree.external_nodes().into_iter().find(|tip| {
            calibration
                .tip_labels
                .get(tip)
                .is_some_and(|placement| placement.contains(point))
        });
        if tip.is_some() {
            return tip;
        }
        tree.preorder()
            .into_iter()
            .find(|node| self.geometry_hits(*node, calibration, probe))
    }

    /// Nodes whose tip label, branch or collapsed shape meets `rect`.
    pub fn nodes_at(&self, rect: Rect) -> BTreeSet<NodeId> {
        let (Some(tree), Some(calibration)) = (&self.tree, &self.calibration) else {
            return BTreeSet::new();
        };
        let rect = rect.abs();
        let mut nodes: BTreeSet<NodeId> = calibration
            .tip_labels
            .iter()
            .filter(|(_, placement)| rects_overlap(placement.bounds(), rect))
            .map(|(node, _)| *node)
            .collect();
        nodes.extend(
            tree.preorder()
                .into_iter()
                .filter(|node| self.geometry_hits(*node, calibration, rect)),
        );
        nodes
    }

    fn geometry_hits(&self, node: NodeId, calibration: &Calibration, rect: Rect) -> bool {
        let transform = calibration.transform;
        let branch = self
            .cache
            .branch_paths
            .get(&node)
            .is_some_and(|path| path_meets_rect(&(transform * path.clone()), rect));
        branch
            || self.cache.collapsed_shapes.get(&node).is_some_and(|shape| {
                let shape = transform * shape.clone();
                shape.contains(rect.center()) || path_meets_rect(&shape, rect)
            })
    }

    /// Device position of a tip.
    pub fn location_of_tip(&self, tip: NodeId) -> Option<Point> {
        let calibration = self.calibration.as_ref()?;
        self.cache
            .node_points
            .get(&tip)
            .map(|point| calibration.transform * *point)
    }
}

fn selection_stroke_for(branch: &StrokeStyle) -> StrokeStyle {
    StrokeStyle::new((branch.width + 4.0).max(branch.width * 1.5))
}

fn darker(color: Color32) -> Color32 {
    let scale = |channel: u8| (f64::from(channel) * 0.7) as u8;
    Color32::from_rgba_unmultiplied(scale(color.r()), scale(color.g()), scale(color.b()), color.a())
}

fn rects_overlap(a: Rect, b: Rect) -> bool {
    a.x0 <= b.x1 && b.x0 <= a.x1 && a.y0 <= b.y1 && b.y0 <= a.y1
}

fn path_meets_rect(path: &BezPath, rect: Rect) -> bool {
    if !rects_overlap(path.bounding_box(), rect) {
        return false;
    }
    polylines(path, 0.25).iter().any(|polyline| {
        let closing = polyline
            .closed
            .then(|| (polyline.points.last().copied(), polyline.points.first().copied()));
        polyline
            .points
            .windows(2)
            .map(|pair| (pair[0], pair[1]))
            .chain(closing.and_then(|(a, b)| Some((a?, b?))))
            .any(|(a, b)| segment_meets_rect(a, b, rect))
    })
}

/// Liang-Barsky clip of the segment `a`-`b` against `rect`.
fn segment_meets_rect(a: Point, b: Point, rect: Rect) -> bool {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let mut t0: f64 = 0.0;
    let mut t1: f64 = 1.0;
    for (p, q) in [
        (-dx, a.x - rect.x0),
        (dx, rect.x1 - a.x),
        (-dy, a.y - rect.y0),
        (dy, rect.y1 - a.y),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return false;
            }
        } else {
            let r = q / p;
            if p < 0.0 {
                t0 = t0.max(r);
            } else {
                t1 = t1.min(r);
            }
            if t0 > t1 {
                return false;
            }
        }
    }
    true
}

fn append_kept(target: &mut Tree, source: &Tree, heights: &[f64], kept: &KeptNode, parent: Option<(NodeId, NodeId)>) {
    let id = target.nodes.len();
    let original = &source.nodes[kept.node];
    let length = parent.map(|(_, source_parent)| heights[source_parent] - heights[kept.node]);
    let mut node = TreeNode::new(id, original.name.clone(), length);
    node.attributes = original.attributes.clone();
    node.parent = parent.map(|(new_parent, _)| new_parent);
    node.source = original.source;
    target.nodes.push(node);
    if let Some((new_parent, _)) = parent {
        target.nodes[new_parent].children.push(id);
    }
    for child in &kept.children {
        append_kept(target, source, heights, child, Some((id, kept.node)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::scene_graph::{SceneRecorder, ScenePrimitive, TreeSceneGraph};
    use crate::tree::test_support::{node_named, tree_from_newick};

    const WIDTH: f64 = 400.0;
    const HEIGHT: f64 = 300.0;

    fn pane_with(newick: &str) -> TreePane {
        let mut pane = TreePane::new();
        pane.set_tree(tree_from_newick(newick));
        pane
    }

    fn draw(pane: &mut TreePane) -> TreeSceneGraph {
        let mut recorder = SceneRecorder::new(WIDTH, HEIGHT);
        pane.draw(&mut recorder, WIDTH, HEIGHT);
        recorder.finish()
    }

    /// Device positions of the tips, by name, after drawing at the pane's size.
    fn tip_positions(pane: &mut TreePane) -> Vec<(String, Point)> {
        let size = pane.size();
        let mut recorder = SceneRecorder::new(size.width, size.height);
        pane.draw(&mut recorder, size.width, size.height);
        let tree = pane.tree().unwrap();
        let mut positions: Vec<(String, Point)> = tree
            .external_nodes()
            .into_iter()
            .filter_map(|tip| Some((tree.nodes[tip].name.clone()?, pane.location_of_tip(tip)?)))
            .collect();
        positions.sort_by(|a, b| a.0.cmp(&b.0));
        positions
    }

    #[test]
    fn drawing_labels_every_tip() {
        let mut pane = pane_with("((A:1,B:2):1,(C:0.5,D:1):0.5);");
        let scene = draw(&mut pane);
        let texts: Vec<&str> = scene.texts().collect();
        for name in ["A", "B", "C", "D"] {
            assert!(texts.contains(&name), "{name} missing");
        }
        assert_eq!(pane.calibration().unwrap().viewport, Size::new(WIDTH, HEIGHT));
    }

    #[test]
    fn geometry_setters_change_the_next_paint() {
        let mut pane = pane_with("((A:1,(B:1,C:1):1):1,D:3);");
        let mut previous = tip_positions(&mut pane);
        let changes: Vec<(&str, Box<dyn Fn(&mut TreePane)>)> = vec![
            ("branch transform", Box::new(|pane| pane.set_branch_transform_on(true))),
            ("ordering", Box::new(|pane| pane.set_branch_ordering_on(true))),
            ("tip labels", Box::new(|pane| pane.label_painter_mut(LabelIntent::Tip).set_visible(false))),
            ("font size", Box::new(|pane| {
                let tips = pane.label_painter_mut(LabelIntent::Tip);
                tips.set_visible(true);
                tips.set_font_size(24.0);
            })),
            ("layout", Box::new(|pane| pane.set_tree_layout(TreeLayoutType::Polar))),
            ("size", Box::new(|pane| pane.set_size(WIDTH / 2.0, HEIGHT))),
        ];
        for (name, change) in changes {
            change(&mut pane);
            let next = tip_positions(&mut pane);
            assert_ne!(next, previous, "{name} did not move the tips");
            previous = next;
        }
    }

    #[test]
    fn flat_branches_ignore_their_colouring() {
        let mut tree = tree_from_newick("((A:0,B:1):1,C:2);");
        for name in ["A", "B"] {
            let node = node_named(&tree, name);
            tree.nodes[node].set_attribute(
                "states",
                crate::tree::AttributeValue::Colouring(crate::tree::BranchColouring {
                    segments: vec![(1, 0.5)],
                    final_colour: 2,
                }),
            );
        }
        let mut pane = TreePane::new();
        pane.set_tree(tree);
        let palette = vec![Color32::RED, Color32::GREEN, Color32::BLUE];
        pane.set_branch_colouring(
            Some("states".to_string()),
            Some(Rc::new(crate::tree::decorator::IndexedColourDecorator::new(palette))),
        );
        let scene = draw(&mut pane);

        let strokes_in = |colour: Color32| {
            scene
                .primitives
                .iter()
                .filter(|primitive| {
                    matches!(primitive, ScenePrimitive::Stroke { paint, .. } if *paint == Paint::Solid(colour))
                })
                .count()
        };
        // only B has room for its segment, A is drawn plainly
        assert_eq!(strokes_in(Color32::GREEN), 1);
        assert_eq!(strokes_in(Color32::BLUE), 1);

        let cache = pane.layout_cache();
        let tree = pane.tree().unwrap();
        assert!(cache.coloured_branches.contains(&node_named(tree, "B")));
        assert!(!cache.coloured_branches.contains(&node_named(tree, "A")));
    }

    #[test]
    fn collapsing_a_clade_leaves_one_anchor() {
        let mut pane = pane_with("((A:1,B:1,C:1,D:1,E:1):1,F:2);");
        let clade = pane.tree().unwrap().parent(node_named(pane.tree().unwrap(), "A")).unwrap();
        pane.set_selected_node(clade);
        pane.collapse_selected_nodes();
        draw(&mut pane);
        assert_eq!(pane.layout_cache().collapsed_shapes.len(), 1);
        assert_eq!(pane.layout_cache().tip_label_paths.len(), 2);
        let source = pane.source_tree().unwrap();
        assert!(source.nodes[clade].attribute(COLLAPSE_ATTRIBUTE).is_some());

        pane.clear_collapsed_nodes();
        draw(&mut pane);
        assert!(pane.layout_cache().collapsed_shapes.is_empty());
        assert_eq!(pane.layout_cache().tip_label_paths.len(), 6);
    }

    #[test]
    fn pointer_hits_labels_and_branches() {
        let mut pane = pane_with("((A:1,B:1):1,(C:1,D:1):1);");
        draw(&mut pane);
        let tree = pane.tree().unwrap().clone();
        let a = node_named(&tree, "A");
        let calibration = pane.calibration().unwrap().clone();

        let label = calibration.tip_labels[&a].bounds().center();
        assert_eq!(pane.node_at(label), Some(a));

        let parent = tree.parent(a).unwrap();
        let cache = pane.layout_cache();
        let on_branch = Point::new(
            (cache.node_points[&a].x + cache.node_points[&parent].x) / 2.0,
            cache.node_points[&a].y,
        );
        assert_eq!(pane.node_at(calibration.transform * on_branch), Some(a));
        assert_eq!(pane.node_at(Point::new(-50.0, -50.0)), None);

        let everything = pane.nodes_at(Rect::new(0.0, 0.0, WIDTH, HEIGHT));
        for node in pane.layout_cache().branch_paths.keys() {
            assert!(everything.contains(node));
        }
        assert!(tree.external_nodes().iter().all(|tip| everything.contains(tip)));
    }

    #[test]
    fn selected_tips_make_a_subtree() {
        let mut pane = pane_with("((A:1,B:1):1,(C:1,D:1):1);");
        let tree = pane.tree().unwrap().clone();
        assert_eq!(pane.selected_subtree().unwrap().nodes.len(), tree.nodes.len());

        pane.add_selected_tip(node_named(&tree, "A"), false, false);
        assert!(pane.selected_subtree().is_none());

        pane.add_selected_tip(node_named(&tree, "C"), false, false);
        let subtree = pane.selected_subtree().unwrap();
        assert_eq!(subtree.nodes.len(), 3);
        let a = node_named(&subtree, "A");
        assert!((subtree.length(a) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn failed_calibration_keeps_the_previous_one() {
        let mut pane = pane_with("((A:1,B:1):1,C:2);");
        draw(&mut pane);
        let before = pane.calibration().unwrap().clone();
        let mut recorder = SceneRecorder::new(5.0, 5.0);
        pane.draw(&mut recorder, 5.0, 5.0);
        assert_eq!(pane.calibration(), Some(&before));
    }

    #[test]
    fn rotation_swaps_children_and_reaches_the_source() {
        let mut pane = pane_with("((A:1,B:1):1,C:2);");
        let before = tip_positions(&mut pane);
        let ab = pane.tree().unwrap().parent(node_named(pane.tree().unwrap(), "A")).unwrap();
        pane.set_selected_node(ab);
        pane.rotate_selected_node();
        let after = tip_positions(&mut pane);
        assert!(before[0].1.y < before[1].1.y);
        assert!(after[0].1.y > after[1].1.y);
        let source = pane.source_tree().unwrap();
        assert_eq!(
            source.nodes[ab].attribute(ROTATE_ATTRIBUTE),
            Some(&AttributeValue::Boolean(true))
        );

        pane.clear_selected_node_rotations();
        assert_eq!(tip_positions(&mut pane), before);
    }

    #[test]
    fn rerooting_and_clearing_restores_the_tree() {
        let mut pane = pane_with("((A:1,B:1):1,(C:1,D:1):1);");
        let source_a = node_named(pane.source_tree().unwrap(), "A");
        pane.set_selected_node(node_named(pane.tree().unwrap(), "A"));
        pane.reroot_on_selected_branch();

        let tree = pane.tree().unwrap();
        let root = tree.root.unwrap();
        assert!(tree
            .children(root)
            .iter()
            .any(|child| tree.nodes[*child].source == Some(source_a)));
        assert!(!pane.has_selection());

        pane.clear_rooting();
        let names = |tree: &Tree| -> Vec<Option<String>> {
            tree.preorder().into_iter().map(|id| tree.nodes[id].name.clone()).collect()
        };
        assert_eq!(names(pane.tree().unwrap()), names(pane.source_tree().unwrap()));
    }

    #[test]
    fn trees_without_lengths_are_transformed() {
        let mut pane = pane_with("((A,B),C);");
        assert!(pane.is_branch_transform_active());
        draw(&mut pane);
        let tree = pane.tree().unwrap();
        assert!(tree.nodes.iter().skip(1).all(|node| node.length.is_some()));
        assert!(pane.calibration().is_some());
    }

    #[test]
    fn selection_overlay_is_cached_until_the_selection_changes() {
        let mut pane = pane_with("((A:1,B:1):1,C:2);");
        let a = node_named(pane.tree().unwrap(), "A");
        let overlay = |scene: &TreeSceneGraph, color: Color32| {
            scene
                .primitives
                .iter()
                .filter(|primitive| {
                    matches!(primitive, ScenePrimitive::Stroke { paint, .. } if *paint == Paint::Solid(color))
                })
                .count()
        };
        let color = pane.selection_color();
        assert_eq!(overlay(&draw(&mut pane), color), 0);

        pane.set_selected_node(a);
        assert_eq!(overlay(&draw(&mut pane), color), 1);
        let key = pane.selection_geometry.key;
        draw(&mut pane);
        assert_eq!(pane.selection_geometry.key, key);

        pane.add_selected_node(node_named(pane.tree().unwrap(), "C"), false, false);
        assert_eq!(overlay(&draw(&mut pane), color), 2);
    }

    #[test]
    fn annotations_reach_both_trees() {
        let mut pane = pane_with("((A:1,B:1):1,C:2);");
        let a = node_named(pane.tree().unwrap(), "A");
        pane.set_selected_tip(a);
        pane.annotate_selected_tips("host", AttributeValue::Text("bat".into()));
        let expected = Some(&AttributeValue::Text("bat".into()));
        assert_eq!(pane.tree().unwrap().nodes[a].attribute("host"), expected);
        assert_eq!(pane.source_tree().unwrap().nodes[a].attribute("host"), expected);

        pane.clear_selected_tip_annotation("host");
        assert_eq!(pane.source_tree().unwrap().nodes[a].attribute("host"), None);
    }

    #[test]
    fn hilights_are_painted_under_the_branches() {
        let mut pane = pane_with("((A:1,B:1):1,C:2);");
        let ab = pane.tree().unwrap().parent(node_named(pane.tree().unwrap(), "A")).unwrap();
        pane.set_selected_node(ab);
        pane.hilight_selected_nodes(Color32::RED);
        pane.clear_selection();
        pane.scale_bar_painter_mut().set_visible(false);
        let scene = draw(&mut pane);
        let first_fill = scene
            .primitives
            .iter()
            .position(|primitive| {
                matches!(primitive, ScenePrimitive::Fill { paint, .. } if *paint == Paint::Solid(Color32::RED))
            })
            .unwrap();
        let first_branch = scene
            .primitives
            .iter()
            .position(|primitive| {
                matches!(primitive, ScenePrimitive::Stroke { paint, .. } if *paint == Paint::Solid(Color32::BLACK))
            })
            .unwrap();
        assert!(first_fill < first_branch);

        pane.clear_hilighted_nodes();
        draw(&mut pane);
        assert!(pane.layout_cache().hilight_shapes.is_empty());
    }
}
