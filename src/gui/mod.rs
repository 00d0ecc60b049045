mod rotated_text;

use std::rc::Rc;

use eframe::egui::{self, Color32};
use log::{error, info, warn};
use vello::kurbo::{Point, Rect};

use crate::app::AppConfig;
use crate::settings::PaneConfig;
use crate::tree::decorator::{AttributeColourDecorator, Decorator};
use crate::tree::layout::TreeLayoutType;
use crate::tree::painter::{LabelDisplay, LabelIntent, Painter};
use crate::tree::pane::TreePane;
use crate::tree::scene_graph::{SceneRecorder, StrokeStyle, TreeSceneGraph};
use crate::tree::selection::SelectionMode;
use crate::tree::transform::{BranchOrdering, BranchTransform};
use crate::io;
use crate::tree::{NodeId, TreeBundle};
use crate::ui::{export as export_scene, save as save_bundle};

pub use rotated_text::{paint_scene, RotatedText};

/// What a click on the tree does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolMode {
    #[default]
    Select,
    Root,
    Rotate,
    Cartoon,
    Collapse,
    Hilight,
}

impl ToolMode {
    pub const ALL: [ToolMode; 6] = [
        ToolMode::Select,
        ToolMode::Root,
        ToolMode::Rotate,
        ToolMode::Cartoon,
        ToolMode::Collapse,
        ToolMode::Hilight,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ToolMode::Select => "Select",
            ToolMode::Root => "Root",
            ToolMode::Rotate => "Rotate",
            ToolMode::Cartoon => "Cartoon",
            ToolMode::Collapse => "Collapse",
            ToolMode::Hilight => "Hilight",
        }
    }

    /// Clade tools act on a whole clade, so clicks pick clades.
    fn selection_mode(self, mode: SelectionMode) -> SelectionMode {
        match self {
            ToolMode::Cartoon | ToolMode::Collapse | ToolMode::Hilight => SelectionMode::Clade,
            ToolMode::Root | ToolMode::Rotate => SelectionMode::Nodes,
            ToolMode::Select => mode,
        }
    }
}

/// Modifier keys held during a click or drag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClickModifiers {
    /// Join the picked node to the selection through the common ancestor.
    pub extend: bool,
    /// Add or remove the picked node without clearing the selection.
    pub toggle: bool,
    /// Swap node and clade picking.
    pub swap: bool,
}

impl ClickModifiers {
    fn from_egui(modifiers: egui::Modifiers) -> Self {
        Self {
            extend: modifiers.shift,
            toggle: modifiers.command,
            swap: modifiers.alt,
        }
    }

    fn mode(self, mode: SelectionMode) -> SelectionMode {
        match (self.swap, mode) {
            (true, SelectionMode::Nodes) => SelectionMode::Clade,
            (true, SelectionMode::Clade) => SelectionMode::Nodes,
            (_, mode) => mode,
        }
    }
}

/// Viewer state independent of egui, so pointer handling can be driven by
/// tests.
pub struct TreeViewerState {
    pub pane: TreePane,
    pub selection_mode: SelectionMode,
    pub tool: ToolMode,
    pub hilight_color: Color32,
    drag_origin: Option<Point>,
}

impl TreeViewerState {
    pub fn new(pane: TreePane) -> Self {
        Self {
            pane,
            selection_mode: SelectionMode::Nodes,
            tool: ToolMode::Select,
            hilight_color: Color32::from_rgb(255, 222, 128),
            drag_origin: None,
        }
    }

    /// Switch modes, carrying the current selection across.
    pub fn set_selection_mode(&mut self, mode: SelectionMode) {
        if mode != self.selection_mode {
            self.pane.convert_selection(self.selection_mode, mode);
            self.selection_mode = mode;
        }
    }

    /// Handle a click at `point`, in pane coordinates.
    pub fn click(&mut self, point: Point, modifiers: ClickModifiers) {
        let Some(node) = self.pane.node_at(point) else {
            if !modifiers.toggle && !modifiers.extend {
                self.pane.clear_selection();
            }
            return;
        };
        let mode = modifiers.mode(self.tool.selection_mode(self.selection_mode));
        match self.tool {
            ToolMode::Select => {
                if !modifiers.toggle && !modifiers.extend {
                    self.pane.clear_selection();
                }
                self.pane
                    .select_with_mode(node, mode, modifiers.toggle, modifiers.extend);
            }
            ToolMode::Root => {
                self.pane.set_selected_node(node);
                self.pane.reroot_on_selected_branch();
            }
            ToolMode::Rotate => self.pane.rotate_node(node),
            ToolMode::Cartoon | ToolMode::Collapse | ToolMode::Hilight => {
                if self.pane.tree().is_some_and(|tree| tree.is_external(node)) {
                    return;
                }
                self.pane.set_selected_clade(node);
                match self.tool {
                    ToolMode::Cartoon => self.pane.cartoon_selected_nodes(),
                    ToolMode::Collapse => self.pane.collapse_selected_nodes(),
                    _ => self.pane.hilight_selected_nodes(self.hilight_color),
                }
            }
        }
    }

    pub fn drag_started(&mut self, point: Point) {
        self.drag_origin = Some(point);
    }

    pub fn drag_moved(&mut self, point: Point) {
        if let Some(origin) = self.drag_origin {
            self.pane.set_drag_rectangle(Some(Rect::from_points(origin, point)));
        }
    }

    /// Select everything under the dragged rectangle.
    pub fn drag_released(&mut self, point: Point, modifiers: ClickModifiers) {
        let Some(origin) = self.drag_origin.take() else {
            return;
        };
        self.pane.set_drag_rectangle(None);
        let hits = self.pane.nodes_at(Rect::from_points(origin, point));
        if !modifiers.toggle && !modifiers.extend {
            self.pane.clear_selection();
        }
        let mode = modifiers.mode(self.selection_mode);
        let tips: Vec<NodeId> = match self.pane.tree() {
            Some(tree) => hits.iter().copied().filter(|node| tree.is_external(*node)).collect(),
            None => return,
        };
        for node in hits {
            match mode {
                SelectionMode::Tips | SelectionMode::Taxa if !tips.contains(&node) => {}
                SelectionMode::Tips | SelectionMode::Taxa => {
                    self.pane.add_selected_tip(node, false, false)
                }
                SelectionMode::Clade => self.pane.add_selected_clade(node, false, false),
                SelectionMode::Nodes => self.pane.add_selected_node(node, false, false),
            }
        }
    }

    /// Draw the pane at `width` by `height`.
    pub fn render(&mut self, width: f64, height: f64) -> TreeSceneGraph {
        self.pane.set_size(width, height);
        let mut recorder = SceneRecorder::new(width, height).with_background(Color32::WHITE);
        self.pane.draw(&mut recorder, width, height);
        recorder.finish()
    }
}

pub struct TreePaneGui {
    config: AppConfig,
    bundle: Option<TreeBundle>,
    tree_index: usize,
    viewer: TreeViewerState,
    scene: Option<TreeSceneGraph>,
    colour_attribute: Option<String>,
    status: Option<String>,
}

impl TreePaneGui {
    pub fn new(
        _cc: &eframe::CreationContext<'_>,
        config: AppConfig,
        bundle: Option<TreeBundle>,
    ) -> Self {
        let pane = match &bundle {
            Some(bundle) => config.build_pane(bundle).unwrap_or_else(|err| {
                error!("could not configure the tree: {err:#}");
                let mut pane = TreePane::new();
                if let Some(tree) = bundle.trees.first() {
                    pane.set_tree(tree.clone());
                }
                pane
            }),
            None => TreePane::new(),
        };
        let tree_index = config.tree_index;
        Self {
            config,
            bundle,
            tree_index,
            viewer: TreeViewerState::new(pane),
            scene: None,
            colour_attribute: None,
            status: None,
        }
    }

    fn show_tree(&mut self, index: usize) {
        let Some(tree) = self.bundle.as_ref().and_then(|bundle| bundle.trees.get(index)) else {
            return;
        };
        info!("showing tree {}", index + 1);
        self.tree_index = index;
        self.viewer.pane.set_tree(tree.clone());
        self.scene = None;
    }

    fn set_colour_attribute(&mut self, attribute: Option<String>) {
        let decorator: Option<Rc<dyn Decorator>> = attribute.as_ref().and_then(|attribute| {
            let tree = self.viewer.pane.tree()?;
            let decorator = AttributeColourDecorator::from_tree(attribute.clone(), tree)?;
            Some(Rc::new(decorator) as Rc<dyn Decorator>)
        });
        if attribute.is_some() && decorator.is_none() {
            warn!("attribute {attribute:?} has no colourable values");
        }
        self.viewer.pane.set_branch_decorator(decorator.clone(), false);
        let legend = self.viewer.pane.legend_painter_mut();
        legend.set_decorator(decorator.clone());
        legend.set_visible(decorator.is_some());
        self.colour_attribute = attribute;
    }

    fn toolbar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal_wrapped(|ui| {
            for tool in ToolMode::ALL {
                ui.selectable_value(&mut self.viewer.tool, tool, tool.label());
            }
            if self.viewer.tool == ToolMode::Hilight {
                ui.color_edit_button_srgba(&mut self.viewer.hilight_color);
            }
            ui.separator();

            let mut mode = self.viewer.selection_mode;
            egui::ComboBox::from_id_salt("selection_mode")
                .selected_text(mode.label())
                .show_ui(ui, |ui| {
                    for option in SelectionMode::ALL {
                        ui.selectable_value(&mut mode, option, option.label());
                    }
                });
            self.viewer.set_selection_mode(mode);
            ui.separator();

            let pane = &mut self.viewer.pane;
            let has_selection = pane.has_selection();
            if ui.add_enabled(has_selection, egui::Button::new("Reroot")).clicked() {
                pane.reroot_on_selected_branch();
            }
            if ui.button("Midpoint").clicked() {
                pane.midpoint_root();
            }
            if ui.button("Unroot").clicked() {
                pane.clear_rooting();
            }
            if ui.add_enabled(has_selection, egui::Button::new("Rotate")).clicked() {
                pane.rotate_selected_node();
            }
            if ui.add_enabled(has_selection, egui::Button::new("Clear rotation")).clicked() {
                pane.clear_selected_node_rotations();
            }
            if ui.button("Expand all").clicked() {
                pane.clear_collapsed_nodes();
            }
            if ui.button("Clear hilights").clicked() {
                pane.clear_hilighted_nodes();
            }
            if ui.button("Select all").clicked() {
                if self.viewer.selection_mode.selects_tips() {
                    pane.select_all_taxa();
                } else {
                    pane.select_all_nodes();
                }
            }
        });
    }

    fn settings_panel(&mut self, ui: &mut egui::Ui) {
        egui::CollapsingHeader::new(egui::RichText::new("Trees").strong())
            .id_salt("controls_trees")
            .default_open(true)
            .show(ui, |ui| {
                let count = self.bundle.as_ref().map_or(0, |bundle| bundle.trees.len());
                if count > 1 {
                    ui.horizontal(|ui| {
                        if ui.button("Previous").clicked() && self.tree_index > 0 {
                            self.show_tree(self.tree_index - 1);
                        }
                        ui.label(format!("{} of {}", self.tree_index + 1, count));
                        if ui.button("Next").clicked() && self.tree_index + 1 < count {
                            self.show_tree(self.tree_index + 1);
                        }
                    });
                }

                let pane = &mut self.viewer.pane;
                let settings = pane.transform_settings().clone();

                let mut transform_on = settings.transform_branches_on;
                if ui.checkbox(&mut transform_on, "Transform branches").changed() {
                    pane.set_branch_transform_on(transform_on);
                }
                let mut transform = settings.branch_transform;
                egui::ComboBox::from_id_salt("branch_transform")
                    .selected_text(format!("{transform:?}"))
                    .show_ui(ui, |ui| {
                        for option in [
                            BranchTransform::Cladogram,
                            BranchTransform::Proportional,
                            BranchTransform::Equal,
                        ] {
                            ui.selectable_value(&mut transform, option, format!("{option:?}"));
                        }
                    });
                if transform != settings.branch_transform {
                    pane.set_branch_transform(transform);
                }

                let mut order_on = settings.order_branches_on;
                if ui.checkbox(&mut order_on, "Order nodes").changed() {
                    pane.set_branch_ordering_on(order_on);
                }
                let mut ordering = settings.branch_ordering;
                egui::ComboBox::from_id_salt("branch_ordering")
                    .selected_text(format!("{ordering:?}"))
                    .show_ui(ui, |ui| {
                        for option in [BranchOrdering::Increasing, BranchOrdering::Decreasing] {
                            ui.selectable_value(&mut ordering, option, format!("{option:?}"));
                        }
                    });
                if ordering != settings.branch_ordering {
                    pane.set_branch_ordering(ordering);
                }
            });

        egui::CollapsingHeader::new(egui::RichText::new("Layout").strong())
            .id_salt("controls_layout")
            .default_open(true)
            .show(ui, |ui| {
                let pane = &mut self.viewer.pane;
                let mut layout = pane.layout_type();
                egui::ComboBox::from_id_salt("layout_combo")
                    .selected_text(layout.label())
                    .show_ui(ui, |ui| {
                        for option in TreeLayoutType::ALL {
                            ui.selectable_value(&mut layout, option, option.label());
                        }
                    });
                if layout != pane.layout_type() {
                    pane.set_tree_layout(layout);
                }

                match layout {
                    TreeLayoutType::Rectangular => {
                        let rectangular = pane.rectangular_layout_mut();
                        let mut curvature = rectangular.curvature();
                        if ui
                            .add(egui::Slider::new(&mut curvature, 0.0..=1.0).text("Curvature"))
                            .changed()
                        {
                            rectangular.set_curvature(curvature);
                        }
                        let mut align = rectangular.is_align_tip_labels();
                        if ui.checkbox(&mut align, "Align tip labels").changed() {
                            rectangular.set_align_tip_labels(align);
                        }
                        let mut root_length = rectangular.root_length_proportion();
                        if ui
                            .add(egui::Slider::new(&mut root_length, 0.0..=1.0).text("Root length"))
                            .changed()
                        {
                            rectangular.set_root_length_proportion(root_length);
                        }
                    }
                    TreeLayoutType::Polar => {
                        let polar = pane.polar_layout_mut();
                        let mut angle = polar.root_angle();
                        if ui
                            .add(egui::Slider::new(&mut angle, 0.0..=360.0).text("Root angle"))
                            .changed()
                        {
                            polar.set_root_angle(angle);
                        }
                        let mut range = polar.angular_range();
                        if ui
                            .add(egui::Slider::new(&mut range, 0.0..=360.0).text("Angle range"))
                            .changed()
                        {
                            polar.set_angular_range(range);
                        }
                    }
                    TreeLayoutType::Radial => {
                        let radial = pane.radial_layout_mut();
                        let mut spread = radial.spread();
                        if ui
                            .add(egui::Slider::new(&mut spread, 0.0..=100.0).text("Spread"))
                            .changed()
                        {
                            radial.set_spread(spread);
                        }
                    }
                }
            });

        egui::CollapsingHeader::new(egui::RichText::new("Appearance").strong())
            .id_salt("controls_appearance")
            .default_open(false)
            .show(ui, |ui| {
                let mut width = self.viewer.pane.branch_stroke().width;
                if ui
                    .add(egui::Slider::new(&mut width, 0.5..=10.0).text("Line weight"))
                    .changed()
                {
                    self.viewer.pane.set_branch_stroke(StrokeStyle::new(width));
                }

                let attributes: Vec<String> = self
                    .viewer
                    .pane
                    .tree()
                    .map(|tree| tree.node_attribute_keys().into_iter().collect())
                    .unwrap_or_default();
                let mut attribute = self.colour_attribute.clone();
                egui::ComboBox::from_id_salt("colour_by")
                    .selected_text(attribute.as_deref().unwrap_or("User selection"))
                    .show_ui(ui, |ui| {
                        ui.selectable_value(&mut attribute, None, "User selection");
                        for key in attributes {
                            ui.selectable_value(&mut attribute, Some(key.clone()), key);
                        }
                    });
                if attribute != self.colour_attribute {
                    self.set_colour_attribute(attribute);
                }
            });

        for intent in [LabelIntent::Tip, LabelIntent::Node, LabelIntent::Branch] {
            egui::CollapsingHeader::new(egui::RichText::new(intent.label()).strong())
                .id_salt(intent.label())
                .default_open(intent == LabelIntent::Tip)
                .show(ui, |ui| label_controls(ui, &mut self.viewer.pane, intent));
        }

        egui::CollapsingHeader::new(egui::RichText::new("Nodes").strong())
            .id_salt("controls_nodes")
            .default_open(false)
            .show(ui, |ui| {
                let pane = &mut self.viewer.pane;
                let shapes = pane.node_shape_painter_mut();
                let mut shown = shapes.is_visible();
                if ui.checkbox(&mut shown, "Node shapes").changed() {
                    shapes.set_visible(shown);
                }
                let mut size = shapes.size();
                if ui.add(egui::Slider::new(&mut size, 1.0..=20.0).text("Size")).changed() {
                    shapes.set_size(size);
                }

                let bars = pane.node_bar_painter_mut();
                let mut shown = bars.is_visible();
                if ui.checkbox(&mut shown, "Node bars").changed() {
                    bars.set_visible(shown);
                }
                let mut width = bars.width();
                if ui.add(egui::Slider::new(&mut width, 1.0..=20.0).text("Bar width")).changed() {
                    bars.set_width(width);
                }
            });

        egui::CollapsingHeader::new(egui::RichText::new("Scale").strong())
            .id_salt("controls_scale")
            .default_open(false)
            .show(ui, |ui| {
                let pane = &mut self.viewer.pane;
                let mut shown = pane.scale_bar_painter().is_visible();
                if ui.checkbox(&mut shown, "Scale bar").changed() {
                    pane.scale_bar_painter_mut().set_visible(shown);
                }
                let mut shown = pane.scale_axis_painter().is_visible();
                if ui.checkbox(&mut shown, "Scale axis").changed() {
                    pane.scale_axis_painter_mut().set_visible(shown);
                }
                let mut shown = pane.scale_grid_painter().is_visible();
                if ui.checkbox(&mut shown, "Grid").changed() {
                    pane.scale_grid_painter_mut().set_visible(shown);
                }
                let mut reversed = pane.is_axis_reversed();
                if ui.checkbox(&mut reversed, "Reverse axis").changed() {
                    pane.set_axis_reversed(reversed);
                }
                let mut shown = pane.legend_painter().is_visible();
                if ui.checkbox(&mut shown, "Legend").changed() {
                    pane.legend_painter_mut().set_visible(shown);
                }
            });
    }

    fn file_menu(&mut self, ui: &mut egui::Ui) {
        ui.menu_button("File", |ui| {
            if ui.button("Export SVG").clicked() {
                ui.close_menu();
                let path = self
                    .config
                    .output
                    .clone()
                    .unwrap_or_else(|| "tree.svg".into());
                let size = self.viewer.pane.size();
                let scene = self.viewer.render(size.width, size.height);
                self.status = Some(match export_scene(&scene, &path) {
                    Ok(()) => format!("Exported {}", path.display()),
                    Err(err) => format!("Export failed: {err:#}"),
                });
            }
            if ui.button("Save Nexus").clicked() {
                ui.close_menu();
                let path = self.config.save.clone().unwrap_or_else(|| "tree.nex".into());
                let result = match &self.bundle {
                    Some(bundle) => save_bundle(bundle, &self.viewer.pane, &path),
                    None => io::save_nexus(
                        &path,
                        &[],
                        &PaneConfig::capture(&self.viewer.pane).to_settings(),
                    ),
                };
                self.status = Some(match result {
                    Ok(()) => format!("Saved {}", path.display()),
                    Err(err) => format!("Save failed: {err:#}"),
                });
            }
        });
    }
}

fn label_controls(ui: &mut egui::Ui, pane: &mut TreePane, intent: LabelIntent) {
    let painter = pane.label_painter_mut(intent);
    let mut shown = painter.is_visible();
    if ui.checkbox(&mut shown, "Show").changed() {
        painter.set_visible(shown);
    }
    let mut display = painter.display().clone();
    let options: Vec<LabelDisplay> = painter.displays().to_vec();
    egui::ComboBox::from_id_salt((intent.label(), "display"))
        .selected_text(display.label().to_string())
        .show_ui(ui, |ui| {
            for option in options {
                let text = option.label().to_string();
                ui.selectable_value(&mut display, option, text);
            }
        });
    if &display != painter.display() {
        painter.set_display(display);
    }
    let mut size = painter.font().size;
    if ui
        .add(egui::Slider::new(&mut size, 4.0..=48.0).text("Font size"))
        .changed()
    {
        painter.set_font_size(size);
    }
}

impl eframe::App for TreePaneGui {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        egui::TopBottomPanel::top("menu_bar").show(ctx, |ui| {
            egui::menu::bar(ui, |ui| self.file_menu(ui));
            self.toolbar(ui);
        });

        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            let pane = &self.viewer.pane;
            let summary = match pane.tree() {
                Some(tree) => format!(
                    "{} tips, {} selected",
                    tree.leaf_count(),
                    pane.selected_nodes().len().max(pane.selected_tips().len())
                ),
                None => "No tree loaded".to_string(),
            };
            ui.horizontal(|ui| {
                ui.label(summary);
                if let Some(status) = &self.status {
                    ui.separator();
                    ui.label(status);
                }
            });
        });

        egui::SidePanel::left("settings_panel")
            .resizable(true)
            .default_width(240.0)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical()
                    .auto_shrink([false, false])
                    .show(ui, |ui| self.settings_panel(ui));
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            let size = ui.available_size();
            let (response, painter) = ui.allocate_painter(size, egui::Sense::click_and_drag());
            let rect = response.rect;
            let offset = rect.min.to_vec2();
            let to_pane = |pos: egui::Pos2| {
                Point::new((pos.x - rect.min.x) as f64, (pos.y - rect.min.y) as f64)
            };
            let modifiers = ClickModifiers::from_egui(ctx.input(|input| input.modifiers));

            if response.drag_started() {
                if let Some(pos) = response.interact_pointer_pos() {
                    self.viewer.drag_started(to_pane(pos));
                }
            }
            if response.dragged() {
                if let Some(pos) = response.interact_pointer_pos() {
                    self.viewer.drag_moved(to_pane(pos));
                }
            }
            if response.drag_stopped() {
                if let Some(pos) = response.interact_pointer_pos().or_else(|| ctx.pointer_latest_pos()) {
                    self.viewer.drag_released(to_pane(pos), modifiers);
                }
            }
            if response.clicked() {
                if let Some(pos) = response.interact_pointer_pos() {
                    self.viewer.click(to_pane(pos), modifiers);
                }
            }

            let (width, height) = (rect.width() as f64, rect.height() as f64);
            let resized = self
                .scene
                .as_ref()
                .map_or(true, |scene| scene.size.width != width || scene.size.height != height);
            if resized || self.viewer.pane.take_repaint_request() {
                self.scene = Some(self.viewer.render(width, height));
            }
            if let Some(scene) = &self.scene {
                paint_scene(&painter, scene, offset);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::test_support::{node_named, tree_from_newick};
    use crate::tree::CARTOON_ATTRIBUTE;

    fn viewer() -> TreeViewerState {
        let mut pane = TreePane::new();
        pane.set_tree(tree_from_newick("((A:1,B:1):1,(C:1,D:1):1);"));
        let mut viewer = TreeViewerState::new(pane);
        viewer.render(400.0, 300.0);
        viewer
    }

    fn tip_point(viewer: &TreeViewerState, name: &str) -> Point {
        let tree = viewer.pane.tree().unwrap();
        viewer.pane.location_of_tip(node_named(tree, name)).unwrap()
    }

    #[test]
    fn plain_clicks_replace_and_toggles_add() {
        let mut viewer = viewer();
        viewer.set_selection_mode(SelectionMode::Taxa);
        viewer.click(tip_point(&viewer, "A"), ClickModifiers::default());
        assert_eq!(viewer.pane.selected_tips().len(), 1);
        viewer.click(tip_point(&viewer, "C"), ClickModifiers::default());
        let tree = viewer.pane.tree().unwrap();
        let c = node_named(tree, "C");
        assert_eq!(viewer.pane.selected_tips().iter().copied().collect::<Vec<_>>(), [c]);
        viewer.click(tip_point(&viewer, "A"), ClickModifiers::default());

        let toggle = ClickModifiers {
            toggle: true,
            ..Default::default()
        };
        viewer.click(tip_point(&viewer, "C"), toggle);
        assert_eq!(viewer.pane.selected_tips().len(), 2);
        viewer.click(tip_point(&viewer, "C"), toggle);
        assert_eq!(viewer.pane.selected_tips().len(), 1);

        viewer.click(Point::new(-50.0, -50.0), ClickModifiers::default());
        assert!(!viewer.pane.has_selection());
    }

    #[test]
    fn alt_swaps_node_and_clade_picking() {
        let modifiers = ClickModifiers {
            swap: true,
            ..Default::default()
        };
        assert_eq!(modifiers.mode(SelectionMode::Nodes), SelectionMode::Clade);
        assert_eq!(modifiers.mode(SelectionMode::Clade), SelectionMode::Nodes);
        assert_eq!(modifiers.mode(SelectionMode::Taxa), SelectionMode::Taxa);
    }

    #[test]
    fn dragging_selects_covered_tips() {
        let mut viewer = viewer();
        viewer.set_selection_mode(SelectionMode::Taxa);
        let (a, b) = (tip_point(&viewer, "A"), tip_point(&viewer, "B"));
        viewer.drag_started(Point::new(a.x - 5.0, a.y.min(b.y) - 5.0));
        viewer.drag_moved(Point::new(b.x + 5.0, b.y));
        viewer.drag_released(
            Point::new(a.x.max(b.x) + 5.0, a.y.max(b.y) + 5.0),
            ClickModifiers::default(),
        );

        let tree = viewer.pane.tree().unwrap();
        let names: Vec<_> = viewer
            .pane
            .selected_tips()
            .iter()
            .filter_map(|id| tree.nodes[*id].name.clone())
            .collect();
        assert!(names.contains(&"A".to_string()));
        assert!(names.contains(&"B".to_string()));
        assert!(!names.contains(&"D".to_string()));
    }

    #[test]
    fn cartoon_tool_acts_on_the_clicked_clade() {
        let mut viewer = viewer();
        viewer.tool = ToolMode::Cartoon;
        let tree = viewer.pane.tree().unwrap();
        let clade = tree.parent(node_named(tree, "A")).unwrap();
        let point = viewer.pane.layout_cache().node_points[&clade];
        let point = viewer
            .pane
            .calibration()
            .map(|calibration| calibration.transform * point)
            .unwrap();
        viewer.click(point, ClickModifiers::default());

        let source = viewer.pane.source_tree().unwrap();
        let cartooned = source
            .nodes
            .iter()
            .filter(|node| node.attribute(CARTOON_ATTRIBUTE).is_some())
            .count();
        assert_eq!(cartooned, 1);
    }

    #[test]
    fn switching_modes_converts_the_selection() {
        let mut viewer = viewer();
        viewer.set_selection_mode(SelectionMode::Clade);
        let tree = viewer.pane.tree().unwrap();
        let clade = tree.parent(node_named(tree, "C")).unwrap();
        viewer.pane.set_selected_clade(clade);
        viewer.set_selection_mode(SelectionMode::Taxa);
        assert_eq!(viewer.pane.selected_tips().len(), 2);
    }
}
