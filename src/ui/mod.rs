use std::path::Path;

use anyhow::Result;
use eframe::egui::Color32;

use crate::export::export_svg;
use crate::io;
use crate::settings::PaneConfig;
use crate::tree::pane::TreePane;
use crate::tree::scene_graph::{SceneRecorder, TreeSceneGraph};
use crate::tree::TreeBundle;

/// Draw `pane` at its own size onto a white recorded frame.
pub fn render(pane: &mut TreePane) -> TreeSceneGraph {
    let size = pane.size();
    let mut recorder = SceneRecorder::new(size.width, size.height).with_background(Color32::WHITE);
    pane.draw(&mut recorder, size.width, size.height);
    recorder.finish()
}

pub fn print_summary(bundle: &TreeBundle, pane: &TreePane, scene: &TreeSceneGraph, index: usize) {
    println!(
        "Loaded {:?} file with {} tree(s).",
        bundle.format,
        bundle.trees.len()
    );

    let Some(tree) = pane.tree() else {
        return;
    };
    let name = bundle
        .trees
        .get(index)
        .and_then(|tree| tree.label.clone())
        .unwrap_or_else(|| format!("tree #{}", index + 1));
    println!(
        "Showing {} ({} tips, {} nodes, root height {:.4}).",
        name,
        tree.leaf_count(),
        tree.nodes.len(),
        tree.root_height()
    );
    println!(
        "{} layout at {}x{} px: {} primitive(s), {} label(s).",
        pane.layout_type().label(),
        scene.size.width,
        scene.size.height,
        scene.primitives.len(),
        scene.texts().count()
    );
    if !bundle.settings.is_empty() {
        println!("Applied {} setting(s) from the tree file.", bundle.settings.len());
    }
}

pub fn export(scene: &TreeSceneGraph, output: &Path) -> Result<()> {
    export_svg(scene, output)?;
    println!("Exported {}.", output.display());
    Ok(())
}

/// Save the bundle's trees, with the shown tree's edits, and the pane's
/// current display settings.
pub fn save(bundle: &TreeBundle, pane: &TreePane, output: &Path) -> Result<()> {
    let mut trees = bundle.trees.clone();
    if let Some(source) = pane.source_tree() {
        if let Some(slot) = trees.iter_mut().find(|tree| tree.id == source.id) {
            *slot = source.clone();
        }
    }
    let settings = PaneConfig::capture(pane).to_settings();
    io::save_nexus(output, &trees, &settings)?;
    println!("Saved {}.", output.display());
    Ok(())
}
