use std::path::Path;

use anyhow::{Context, Result};
use eframe::egui::Color32;
use log::info;
use svg::node::element::{Definitions, Group, LinearGradient, Path as SvgPath, Rectangle, Stop, Text};
use svg::Document;
use vello::kurbo::Affine;

use crate::tree::scene_graph::{Paint, ScenePrimitive, TextAnchor, TreeSceneGraph};

/// Write a recorded frame as an SVG file.
pub fn export_svg(scene: &TreeSceneGraph, path: &Path) -> Result<()> {
    let document = scene_to_svg(scene);
    svg::save(path, &document)
        .with_context(|| format!("failed to save SVG: {}", path.display()))?;
    info!(
        "exported {} primitive(s) to {}",
        scene.primitives.len(),
        path.display()
    );
    Ok(())
}

pub fn scene_to_svg(scene: &TreeSceneGraph) -> Document {
    let (width, height) = (scene.size.width, scene.size.height);
    let mut document = Document::new()
        .set("width", width)
        .set("height", height)
        .set("viewBox", (0.0, 0.0, width, height));

    if let Some(background) = scene.background {
        let rect = Rectangle::new()
            .set("width", "100%")
            .set("height", "100%")
            .set("fill", color_to_hex(background))
            .set("fill-opacity", color_opacity(background));
        document = document.add(rect);
    }

    let mut gradients: Vec<LinearGradient> = Vec::new();
    let mut paint_attribute = |paint: &Paint| -> (String, f32) {
        match paint {
            Paint::Solid(color) => (color_to_hex(*color), color_opacity(*color)),
            Paint::Gradient {
                start,
                end,
                from,
                to,
            } => {
                let id = format!("gradient{}", gradients.len());
                let gradient = LinearGradient::new()
                    .set("id", id.clone())
                    .set("gradientUnits", "userSpaceOnUse")
                    .set("x1", start.x)
                    .set("y1", start.y)
                    .set("x2", end.x)
                    .set("y2", end.y)
                    .add(stop("0", *from))
                    .add(stop("1", *to));
                gradients.push(gradient);
                (format!("url(#{id})"), 1.0)
            }
        }
    };

    let mut group = Group::new().set("id", "tree");
    for primitive in &scene.primitives {
        match primitive {
            ScenePrimitive::Fill { path, paint } => {
                let (fill, opacity) = paint_attribute(paint);
                group = group.add(
                    SvgPath::new()
                        .set("d", path.to_svg())
                        .set("fill", fill)
                        .set("fill-opacity", opacity)
                        .set("stroke", "none"),
                );
            }
            ScenePrimitive::Stroke { path, style, paint } => {
                let (stroke, opacity) = paint_attribute(paint);
                let mut element = SvgPath::new()
                    .set("d", path.to_svg())
                    .set("fill", "none")
                    .set("stroke", stroke)
                    .set("stroke-opacity", opacity)
                    .set("stroke-width", style.width);
                if let Some((dash, gap)) = style.dash {
                    element = element.set("stroke-dasharray", format!("{dash} {gap}"));
                }
                group = group.add(element);
            }
            ScenePrimitive::Text {
                text,
                transform,
                anchor,
                font,
                paint,
            } => {
                let (fill, opacity) = paint_attribute(paint);
                let mut element = Text::new("")
                    .set("x", 0)
                    .set("y", 0)
                    .set("transform", matrix(*transform))
                    .set("font-family", "sans-serif")
                    .set("font-size", font.size)
                    .set("fill", fill)
                    .set("fill-opacity", opacity)
                    .set("text-anchor", anchor_name(*anchor))
                    .add(svg::node::Text::new(text.clone()));
                if font.bold {
                    element = element.set("font-weight", "bold");
                }
                group = group.add(element);
            }
        }
    }

    if !gradients.is_empty() {
        let definitions = gradients
            .into_iter()
            .fold(Definitions::new(), |definitions, gradient| definitions.add(gradient));
        document = document.add(definitions);
    }
    document.add(group)
}

fn stop(offset: &str, color: Color32) -> Stop {
    Stop::new()
        .set("offset", offset)
        .set("stop-color", color_to_hex(color))
        .set("stop-opacity", color_opacity(color))
}

fn matrix(transform: Affine) -> String {
    let [a, b, c, d, e, f] = transform.as_coeffs();
    format!("matrix({a} {b} {c} {d} {e} {f})")
}

fn anchor_name(anchor: TextAnchor) -> &'static str {
    match anchor {
        TextAnchor::Start => "start",
        TextAnchor::Middle => "middle",
        TextAnchor::End => "end",
    }
}

fn color_to_hex(color: Color32) -> String {
    let [r, g, b, _a] = color.to_srgba_unmultiplied();
    format!("#{:02x}{:02x}{:02x}", r, g, b)
}

fn color_opacity(color: Color32) -> f32 {
    (color.a() as f32) / 255.0
}

#[cfg(test)]
mod tests {
    use vello::kurbo::{Point, Rect, Shape};

    use super::*;
    use crate::tree::pane::TreePane;
    use crate::tree::scene_graph::{Canvas, FontStyle, SceneRecorder, StrokeStyle};
    use crate::tree::test_support::tree_from_newick;

    #[test]
    fn primitives_become_svg_elements() {
        let mut recorder = SceneRecorder::new(100.0, 50.0).with_background(Color32::WHITE);
        let rect = Rect::new(10.0, 10.0, 20.0, 20.0);
        recorder.fill(&rect.to_path(0.1), &Paint::Solid(Color32::RED));
        recorder.stroke(
            &rect.to_path(0.1),
            &StrokeStyle::dashed(1.0, 2.0, 3.0),
            &Paint::Gradient {
                start: Point::new(0.0, 0.0),
                end: Point::new(10.0, 0.0),
                from: Color32::RED,
                to: Color32::BLUE,
            },
        );
        recorder.text(
            "Homo <sapiens>",
            Point::new(5.0, 40.0),
            TextAnchor::End,
            &FontStyle::new(12.0),
            &Paint::Solid(Color32::BLACK),
        );

        let svg = scene_to_svg(&recorder.finish()).to_string();
        assert!(svg.contains("#ff0000"));
        assert!(svg.contains("stroke-dasharray=\"2 3\""));
        assert!(svg.contains("url(#gradient0)"));
        assert!(svg.contains("<linearGradient"));
        assert!(svg.contains("text-anchor=\"end\""));
        assert!(svg.contains("Homo"));
    }

    #[test]
    fn exports_a_drawn_pane() {
        let mut pane = TreePane::new();
        pane.set_tree(tree_from_newick("((Alpha:1,Beta:1):1,Gamma:2);"));
        let mut recorder = SceneRecorder::new(400.0, 300.0);
        pane.draw(&mut recorder, 400.0, 300.0);
        let scene = recorder.finish();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tree.svg");
        export_svg(&scene, &path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("<svg"));
        for name in ["Alpha", "Beta", "Gamma"] {
            assert!(written.contains(name), "{name} missing");
        }
    }
}
