use eframe::egui::{epaint::TextShape, *};
use vello::kurbo::{self, Affine};

use crate::tree::scene_graph::{
    polylines, FontStyle, ScenePrimitive, TextAnchor, TreeSceneGraph,
};

/// Flattening tolerance for curves, in pixels.
const TOLERANCE: f64 = 0.25;

pub trait RotatedText {
    /// Draw `text` with its baseline origin mapped through `transform`.
    fn rotated_text(
        &self,
        transform: Affine,
        offset: Vec2,
        anchor: TextAnchor,
        text: &str,
        font: &FontStyle,
        text_color: Color32,
    ) -> Rect;
}

impl RotatedText for Painter {
    fn rotated_text(
        &self,
        transform: Affine,
        offset: Vec2,
        anchor: TextAnchor,
        text: &str,
        font: &FontStyle,
        text_color: Color32,
    ) -> Rect {
        let [a, b, ..] = transform.as_coeffs();
        let scale = a.hypot(b).max(f64::EPSILON);
        let angle = b.atan2(a) as f32;
        let font_id = FontId::proportional((font.size * scale) as f32);
        let galley = self.layout_no_wrap(text.to_string(), font_id, text_color);
        let text_size = galley.size();

        // Galley origin relative to the anchor, before rotation. The text
        // baseline sits roughly three quarters of the way down the galley.
        let anchor_offset = Vec2::new(
            match anchor {
                TextAnchor::Start => 0.0,
                TextAnchor::Middle => text_size.x / 2.0,
                TextAnchor::End => text_size.x,
            },
            text_size.y * 0.75,
        );

        let (cos_a, sin_a) = (angle.cos(), angle.sin());
        let rotate = |v: Vec2| Vec2::new(v.x * cos_a - v.y * sin_a, v.x * sin_a + v.y * cos_a);
        let origin = to_pos(transform * kurbo::Point::ORIGIN, offset);
        let text_pos = origin - rotate(anchor_offset);

        self.add(TextShape {
            pos: text_pos,
            galley,
            angle,
            override_text_color: Some(text_color),
            fallback_color: text_color,
            underline: Stroke::NONE,
            opacity_factor: 1.0,
        });

        let corners = [
            Vec2::ZERO,
            Vec2::new(text_size.x, 0.0),
            text_size,
            Vec2::new(0.0, text_size.y),
        ]
        .map(|corner| text_pos + rotate(corner));
        Rect::from_points(&corners)
    }
}

fn to_pos(point: kurbo::Point, offset: Vec2) -> Pos2 {
    pos2(point.x as f32, point.y as f32) + offset
}

/// Replay a recorded frame onto `painter`, shifted by `offset`. Gradients are
/// drawn in their start colour and fills are drawn as convex polygons.
pub fn paint_scene(painter: &Painter, scene: &TreeSceneGraph, offset: Vec2) {
    if let Some(background) = scene.background {
        let size = vec2(scene.size.width as f32, scene.size.height as f32);
        painter.rect_filled(Rect::from_min_size(offset.to_pos2(), size), 0.0, background);
    }
    for primitive in &scene.primitives {
        match primitive {
            ScenePrimitive::Fill { path, paint } => {
                let color = paint.color();
                for line in polylines(path, TOLERANCE) {
                    let points: Vec<Pos2> = line.points.iter().map(|p| to_pos(*p, offset)).collect();
                    if points.len() >= 3 {
                        painter.add(Shape::convex_polygon(points, color, Stroke::NONE));
                    }
                }
            }
            ScenePrimitive::Stroke { path, style, paint } => {
                let stroke = Stroke::new(style.width as f32, paint.color());
                for line in polylines(path, TOLERANCE) {
                    let mut points: Vec<Pos2> =
                        line.points.iter().map(|p| to_pos(*p, offset)).collect();
                    if line.closed {
                        if let Some(first) = points.first().copied() {
                            points.push(first);
                        }
                    }
                    match style.dash {
                        Some((dash, gap)) => {
                            painter.extend(Shape::dashed_line(&points, stroke, dash as f32, gap as f32));
                        }
                        None => {
                            painter.add(Shape::line(points, stroke));
                        }
                    }
                }
            }
            ScenePrimitive::Text {
                text,
                transform,
                anchor,
                font,
                paint,
            } => {
                painter.rotated_text(*transform, offset, *anchor, text, font, paint.color());
            }
        }
    }
}
