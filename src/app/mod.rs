use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, ValueEnum};
use eframe::{egui, NativeOptions};
use log::{error, info, warn};

use crate::gui::TreePaneGui;
use crate::io;
use crate::settings::{keys, PaneConfig, Settings};
use crate::tree::pane::TreePane;
use crate::tree::TreeBundle;
use crate::ui;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "treepane",
    about = "Lays out and draws phylogenetic trees from Newick and Nexus files."
)]
pub struct AppConfig {
    /// Tree file to load (Newick or Nexus formats).
    #[arg(value_name = "TREE_FILE")]
    pub tree_path: Option<PathBuf>,

    /// Write the rendered tree to this SVG file.
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: Option<PathBuf>,

    /// Save the tree and the applied display settings as Nexus.
    #[arg(long, value_name = "NEXUS_FILE")]
    pub save: Option<PathBuf>,

    /// Canvas width in pixels
    #[arg(long, default_value_t = 1100)]
    pub width: u32,

    /// Canvas height in pixels
    #[arg(long, default_value_t = 760)]
    pub height: u32,

    /// Layout strategy
    #[arg(long, value_enum)]
    pub layout: Option<LayoutArg>,

    /// Branch length transform
    #[arg(long, value_enum)]
    pub transform: Option<TransformArg>,

    /// Order branches by clade size
    #[arg(long, value_enum)]
    pub order: Option<OrderArg>,

    /// Root the tree at the midpoint of its longest path.
    #[arg(long)]
    pub midpoint: bool,

    /// Hide tip labels.
    #[arg(long)]
    pub no_tip_labels: bool,

    /// Align tip labels at the right edge (rectangular layout).
    #[arg(long)]
    pub align_tip_labels: bool,

    /// File with a `begin figtree; ... end;` settings block.
    #[arg(long, value_name = "SETTINGS_FILE")]
    pub settings: Option<PathBuf>,

    /// Index of the tree to show when the file holds several.
    #[arg(long = "tree", default_value_t = 0)]
    pub tree_index: usize,

    /// Run without launching the GUI; output summary to stdout instead.
    #[arg(long)]
    pub headless: bool,

    /// Force launch of the egui window even when an output path is given.
    #[arg(long)]
    pub gui: bool,

    /// Ignore display detection safeguards and attempt to launch the GUI anyway.
    #[arg(long)]
    pub force_gui: bool,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
pub enum LayoutArg {
    Rectangular,
    Polar,
    Radial,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
pub enum TransformArg {
    Cladogram,
    Proportional,
    Equal,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
pub enum OrderArg {
    Increasing,
    Decreasing,
}

impl AppConfig {
    /// Settings named on the command line, in the same keys as a settings
    /// block so they merge over file settings.
    pub fn settings_overrides(&self) -> Settings {
        let mut settings = Settings::new();
        if let Some(layout) = self.layout {
            let name = match layout {
                LayoutArg::Rectangular => "Rectangular",
                LayoutArg::Polar => "Polar",
                LayoutArg::Radial => "Radial",
            };
            settings.set_string(keys::LAYOUT_TYPE, name);
        }
        if let Some(transform) = self.transform {
            let name = match transform {
                TransformArg::Cladogram => "cladogram",
                TransformArg::Proportional => "proportional",
                TransformArg::Equal => "equal",
            };
            settings.set_bool(keys::TRANSFORM, true);
            settings.set_string(keys::TRANSFORM_TYPE, name);
        }
        if let Some(order) = self.order {
            let name = match order {
                OrderArg::Increasing => "increasing",
                OrderArg::Decreasing => "decreasing",
            };
            settings.set_bool(keys::ORDER, true);
            settings.set_string(keys::ORDER_TYPE, name);
        }
        if self.midpoint {
            settings.set_bool(keys::ROOTING, true);
            settings.set_string(keys::ROOTING_TYPE, "Midpoint");
        }
        if self.no_tip_labels {
            settings.set_bool("tipLabels.isShown", false);
        }
        if self.align_tip_labels {
            settings.set_bool(keys::RECT_ALIGN_TIP_LABELS, true);
        }
        settings
    }

    /// Tree-file settings, then the settings file, then the command line.
    pub fn merged_settings(&self, bundle: &TreeBundle) -> Result<Settings> {
        let mut settings = bundle.settings.clone();
        if let Some(path) = &self.settings {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read settings file: {}", path.display()))?;
            let file = Settings::parse_block(&text)
                .with_context(|| format!("invalid settings file: {}", path.display()))?;
            settings.merge(&file);
        }
        settings.merge(&self.settings_overrides());
        Ok(settings)
    }

    /// A pane showing the selected tree of `bundle`, configured from the
    /// merged settings.
    pub fn build_pane(&self, bundle: &TreeBundle) -> Result<TreePane> {
        let Some(tree) = bundle.trees.get(self.tree_index) else {
            bail!(
                "tree index {} is out of range, the file holds {} tree(s)",
                self.tree_index,
                bundle.trees.len()
            );
        };
        let settings = self.merged_settings(bundle)?;
        let config = PaneConfig::from_settings(&settings).context("invalid display settings")?;

        let mut pane = TreePane::new();
        pane.set_tree(tree.clone());
        config.apply(&mut pane);
        pane.set_size(self.width as f64, self.height as f64);
        Ok(pane)
    }
}

#[cfg(target_os = "macos")]
mod macos {
    use std::ffi::c_uint;

    #[link(name = "CoreGraphics", kind = "framework")]
    extern "C" {
        fn CGMainDisplayID() -> c_uint;
        fn CGDisplayPixelsWide(display: c_uint) -> usize;
    }

    pub unsafe fn primary_display_width() -> Option<usize> {
        let id = CGMainDisplayID();
        if id == 0 {
            return None;
        }
        Some(CGDisplayPixelsWide(id))
    }
}

pub struct TreePaneApp;

impl TreePaneApp {
    pub fn run(config: &AppConfig) -> Result<()> {
        let wants_gui = config.gui || config.force_gui || !(config.headless || config.output.is_some());

        if !wants_gui {
            return Self::run_headless(config);
        }

        if !config.force_gui && !Self::display_available() {
            warn!("GUI requested but no display was detected; falling back to headless mode.");
            return Self::run_headless(config);
        }

        let bundle = config
            .tree_path
            .as_deref()
            .map(io::load_trees)
            .transpose()?;

        let mut native_options = NativeOptions::default();
        info!("Launching egui window ({}x{}).", config.width, config.height);
        native_options.viewport = egui::ViewportBuilder::default()
            .with_title("treepane")
            .with_inner_size(egui::vec2(config.width as f32, config.height as f32));

        let initial_config = config.clone();
        match eframe::run_native(
            "treepane",
            native_options,
            Box::new(move |cc| Ok(Box::new(TreePaneGui::new(cc, initial_config, bundle)))),
        ) {
            Ok(()) => Ok(()),
            Err(err) => {
                error!("Failed to launch egui window: {}", err);
                if config.tree_path.is_some() {
                    warn!("Falling back to headless mode.");
                    Self::run_headless(config)
                } else {
                    Err(anyhow!(err.to_string()))
                }
            }
        }
    }

    fn display_available() -> bool {
        #[cfg(target_os = "macos")]
        {
            unsafe {
                macos::primary_display_width()
                    .map(|width| width > 0)
                    .unwrap_or(false)
            }
        }
        #[cfg(any(
            target_os = "linux",
            target_os = "freebsd",
            target_os = "dragonfly",
            target_os = "netbsd"
        ))]
        {
            std::env::var("DISPLAY").is_ok() || std::env::var("WAYLAND_DISPLAY").is_ok()
        }
        #[cfg(target_os = "windows")]
        {
            true
        }
        #[cfg(not(any(
            target_os = "macos",
            target_os = "linux",
            target_os = "freebsd",
            target_os = "dragonfly",
            target_os = "netbsd",
            target_os = "windows"
        )))]
        {
            false
        }
    }

    fn run_headless(config: &AppConfig) -> Result<()> {
        let tree_path = config
            .tree_path
            .as_deref()
            .ok_or_else(|| anyhow!("headless mode requires a TREE_FILE argument"))?;
        let bundle = io::load_trees(tree_path)?;
        let mut pane = config.build_pane(&bundle)?;
        let scene = ui::render(&mut pane);
        ui::print_summary(&bundle, &pane, &scene, config.tree_index);

        if let Some(dest) = &config.output {
            ui::export(&scene, dest)?;
        }
        if let Some(dest) = &config.save {
            ui::save(&bundle, &pane, dest)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::layout::TreeLayoutType;
    use crate::tree::painter::{LabelIntent, Painter};

    fn config(args: &[&str]) -> AppConfig {
        AppConfig::parse_from(std::iter::once("treepane").chain(args.iter().copied()))
    }

    const FILE: &str = "#NEXUS
begin trees;
    tree one = ((A:1,B:2):1,C:1);
    tree two = ((A:1,C:1):1,B:3);
end;
begin figtree;
    set layout.layoutType=\"Radial\";
    set tipLabels.fontSize=20.0;
    set nodeShape.size=6.0;
end;";

    #[test]
    fn command_line_overrides_file_settings() {
        let dir = tempfile::tempdir().unwrap();
        let settings_path = dir.path().join("display.txt");
        fs::write(&settings_path, "begin figtree;\n\tset tipLabels.fontSize=8.0;\nend;\n").unwrap();

        let bundle = io::parse_trees(FILE).unwrap();
        let config = config(&[
            "--layout",
            "polar",
            "--settings",
            settings_path.to_str().unwrap(),
            "--tree",
            "1",
            "--no-tip-labels",
        ]);
        let pane = config.build_pane(&bundle).unwrap();

        assert_eq!(pane.layout_type(), TreeLayoutType::Polar);
        let tips = pane.label_painter(LabelIntent::Tip);
        assert_eq!(tips.font().size, 8.0);
        assert!(!tips.is_visible());
        assert_eq!(pane.node_shape_painter().size(), 6.0);
        let tree = pane.source_tree().unwrap();
        assert_eq!(tree.label.as_deref(), Some("two"));
    }

    #[test]
    fn invalid_settings_are_reported() {
        let bundle = io::parse_trees(FILE).unwrap();
        assert!(config(&["--tree", "5"]).build_pane(&bundle).is_err());

        let mut broken = bundle.clone();
        broken.settings.set_string(keys::LAYOUT_TYPE, "Spiral");
        assert!(config(&[]).build_pane(&broken).is_err());
    }

    #[test]
    fn headless_run_writes_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let tree_path = dir.path().join("input.tree");
        fs::write(&tree_path, FILE).unwrap();
        let svg = dir.path().join("out.svg");
        let saved = dir.path().join("saved.tree");

        let config = config(&[
            tree_path.to_str().unwrap(),
            "--headless",
            "--midpoint",
            "--transform",
            "cladogram",
            "-o",
            svg.to_str().unwrap(),
            "--save",
            saved.to_str().unwrap(),
        ]);
        TreePaneApp::run(&config).unwrap();

        assert!(fs::read_to_string(&svg).unwrap().contains("<svg"));
        let reloaded = io::load_trees(&saved).unwrap();
        assert_eq!(reloaded.trees.len(), 2);
        assert_eq!(reloaded.settings.get_bool(keys::TRANSFORM), Ok(Some(true)));
        assert_eq!(
            reloaded.settings.get_string(keys::ROOTING_TYPE).as_deref(),
            Some("Midpoint")
        );
    }
}
