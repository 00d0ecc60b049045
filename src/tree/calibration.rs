//! Fitting a laid out tree into a viewport.
//!
//! Calibration runs in two passes. The first measures everything that does not
//! scale with the tree (labels, shapes, scale panels, the legend) around the
//! untransformed layout, which gives the space left for the tree itself. The
//! second builds the final layout-to-device transform and places every label,
//! shape and panel with it.
//!
//! Results are computed into fresh values and only handed back on success, so
//! a caller keeping the previous [`Calibration`] never sees a partial one.

use std::collections::BTreeMap;

use log::debug;
use thiserror::Error;
use vello::kurbo::{Affine, BezPath, Line, Point, Rect, Shape, Size};

use super::layout::{union_all, TreeLayout, TreeLayoutCache};
use super::painter::{
    Justification, LabelPainter, LegendPainter, NodeBarPainter, NodeShapePainter, Painter,
    PainterContext, ScaleAxis, ScaleContext, ScalePainter, TimeScale,
};
use super::scene_graph::TextMeasure;
use super::{NodeId, Tree};

/// Blank margin around the drawing, in pixels.
pub const INSET: f64 = 6.0;
/// Distance between a label and the point it annotates, in pixels.
pub const LABEL_GAP: f64 = 10.0;

/// Smallest tree extent used as a divisor.
const MIN_EXTENT: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalibrationError {
    #[error("the tree has nothing to lay out")]
    EmptyTree,
    #[error("a {width}x{height} viewport leaves no room to draw")]
    DegenerateViewport { width: f64, height: f64 },
    #[error("calibration produced a non-finite transform")]
    NonFiniteTransform,
}

/// Where a label goes: its local box `(0, 0, w, h)` mapped to device space.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelPlacement {
    pub transform: Affine,
    pub size: Size,
    pub justification: Justification,
}

impl LabelPlacement {
    pub fn local_bounds(&self) -> Rect {
        Rect::from_origin_size(Point::ORIGIN, self.size)
    }

    /// Device-space outline of the label box.
    pub fn outline(&self) -> BezPath {
        self.transform * self.local_bounds().to_path(0.1)
    }

    pub fn bounds(&self) -> Rect {
        self.transform.transform_rect_bbox(self.local_bounds())
    }

    pub fn contains(&self, point: Point) -> bool {
        if self.transform.determinant().abs() < f64::EPSILON {
            return false;
        }
        self.local_bounds()
            .contains(self.transform.inverse() * point)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeShapePlacement {
    pub center: Point,
    pub size: f64,
}

/// Result of a successful calibration. Rectangles are in device pixels unless
/// named otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    pub viewport: Size,
    pub transform: Affine,
    /// Horizontal pixels per unit of branch length.
    pub tree_scale: f64,
    pub tree_bounds: Rect,
    /// Tree bounds in layout units.
    pub layout_tree_bounds: Rect,
    /// First-pass bounds: layout units for the tree, pixels for what surrounds it.
    pub total_bounds: Rect,
    pub tip_labels: BTreeMap<NodeId, LabelPlacement>,
    pub node_labels: BTreeMap<NodeId, LabelPlacement>,
    pub branch_labels: BTreeMap<NodeId, LabelPlacement>,
    pub node_shapes: BTreeMap<NodeId, NodeShapePlacement>,
    pub node_bars: BTreeMap<NodeId, Line>,
    /// One entry per scale painter passed in, `None` for hidden ones.
    pub scale_bounds: Vec<Option<Rect>>,
    pub grid_bounds: Rect,
    pub legend_bounds: Option<Rect>,
    pub axis: ScaleAxis,
}

/// Everything calibration reads.
pub struct CalibrationInput<'a> {
    pub tree: &'a Tree,
    pub layout: &'a mut dyn TreeLayout,
    pub tip_labels: &'a LabelPainter,
    pub node_labels: &'a LabelPainter,
    pub branch_labels: &'a LabelPainter,
    pub node_shapes: &'a NodeShapePainter,
    /// `None` while node bars are suppressed.
    pub node_bars: Option<&'a NodeBarPainter>,
    pub scale_painters: &'a [&'a dyn ScalePainter],
    pub legend: &'a LegendPainter,
    /// Axis carrying the user's tick settings; its range is recomputed.
    pub axis: ScaleAxis,
    pub axis_origin: f64,
    pub time_scale: TimeScale,
    pub measure: TextMeasure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Anchoring {
    /// Beside the anchor point, on the side the anchor line points to.
    Justified,
    /// Centred over the middle of the anchor line, sitting on it.
    Centered,
}

/// Transform placing a `size` label box on `line`, after mapping the line
/// through `global`.
///
/// The label is rotated to follow the layout-space line. Vertical lines keep
/// their labels horizontal.
fn label_transform(global: Affine, line: Line, size: Size, anchoring: Anchoring) -> (Affine, Justification) {
    let (dx, dy) = (line.p1.x - line.p0.x, line.p1.y - line.p0.y);
    let angle = if dy != 0.0 && dx != 0.0 {
        (dy / dx).atan()
    } else {
        0.0
    };
    let justification = if line.p0.x < line.p1.x {
        Justification::Left
    } else {
        Justification::Right
    };

    let (origin, tx, ty) = match anchoring {
        Anchoring::Justified => {
            let origin = global * line.p0;
            let tx = if line.p1.x > line.p0.x {
                origin.x + LABEL_GAP
            } else {
                origin.x - (LABEL_GAP + size.width)
            };
            (origin, tx, origin.y - size.height / 2.0)
        }
        Anchoring::Centered => {
            let origin = global * line.midpoint();
            (origin, origin.x - size.width / 2.0, origin.y - size.height)
        }
    };
    let transform = Affine::rotate_about(angle, origin) * Affine::translate((tx, ty));
    (transform, justification)
}

fn ensure_extent(rect: Rect) -> Rect {
    let mut rect = rect.abs();
    if rect.width() < MIN_EXTENT {
        rect.x1 = rect.x0 + MIN_EXTENT;
    }
    if rect.height() < MIN_EXTENT {
        rect.y1 = rect.y0 + MIN_EXTENT;
    }
    rect
}

fn place_labels(
    painter: &LabelPainter,
    ctx: &PainterContext<'_>,
    paths: &BTreeMap<NodeId, Line>,
    global: Affine,
    anchoring: Anchoring,
) -> BTreeMap<NodeId, LabelPlacement> {
    if !painter.is_visible() {
        return BTreeMap::new();
    }
    let mut placements = BTreeMap::new();
    for (node, line) in paths {
        let mut size = painter.calibrate(ctx, *node);
        if size.is_empty() {
            continue;
        }
        if anchoring == Anchoring::Centered {
            size.height = size.height.max(painter.height_bound(ctx));
        }
        let (transform, justification) = label_transform(global, *line, size, anchoring);
        placements.insert(
            *node,
            LabelPlacement {
                transform,
                size,
                justification,
            },
        );
    }
    placements
}

/// Axis range: from the tips (or the axis origin, if further out) to the root.
fn setup_axis(mut axis: ScaleAxis, tree: &Tree, layout: &dyn TreeLayout, origin: f64, time_scale: TimeScale) -> ScaleAxis {
    let mut tree_height = tree.root_height();
    if layout.is_axis_reversed() {
        tree_height += layout.root_length();
    }
    let mut min = time_scale.age(0.0);
    let max = time_scale.age(tree_height);
    if min < max {
        min = min.min(origin);
    } else {
        min = min.max(origin);
    }
    axis.set_range(min, max);
    axis
}

/// Lay out `input.tree` and fit it into a `width` x `height` viewport.
pub fn calibrate(
    input: CalibrationInput<'_>,
    width: f64,
    height: f64,
) -> Result<(TreeLayoutCache, Calibration), CalibrationError> {
    let available = Size::new(width - 2.0 * INSET, height - 2.0 * INSET);
    if !available.is_finite() || available.width <= 0.0 || available.height <= 0.0 {
        return Err(CalibrationError::DegenerateViewport { width, height });
    }
    let tree = input.tree;
    if tree.root.is_none() {
        return Err(CalibrationError::EmptyTree);
    }

    let mut cache = TreeLayoutCache::default();
    input.layout.layout(tree, &mut cache);
    let layout: &dyn TreeLayout = input.layout;
    let heights = tree.node_heights();
    let axis = setup_axis(input.axis, tree, layout, input.axis_origin, input.time_scale);

    let ctx = PainterContext {
        tree,
        heights: &heights,
        cache: &cache,
        time_scale: input.time_scale,
        measure: input.measure,
    };

    // First pass, in layout units.
    let branch_bounds = cache.tree_bounds().or_else(|| {
        union_all(
            cache
                .node_points
                .values()
                .map(|point| Rect::from_points(*point, *point)),
        )
    });
    let Some(mut tree_bounds) = branch_bounds else {
        return Err(CalibrationError::EmptyTree);
    };

    let bars: BTreeMap<NodeId, Line> = match input.node_bars {
        Some(painter) if painter.is_visible() => tree
            .internal_nodes()
            .into_iter()
            .filter_map(|node| painter.bar(&ctx, node).map(|bar| (node, bar)))
            .collect(),
        _ => BTreeMap::new(),
    };
    for bar in bars.values() {
        tree_bounds = tree_bounds.union(Rect::from_points(bar.p0, bar.p1));
    }
    let tree_bounds = ensure_extent(tree_bounds);

    let mut total = tree_bounds;
    let first_pass = [
        (input.tip_labels, &cache.tip_label_paths, Anchoring::Justified),
        (input.node_labels, &cache.node_label_paths, Anchoring::Justified),
        (input.branch_labels, &cache.branch_label_paths, Anchoring::Centered),
    ];
    for (painter, paths, anchoring) in first_pass {
        for placement in place_labels(painter, &ctx, paths, Affine::IDENTITY, anchoring).values() {
            total = total.union(placement.bounds());
        }
    }
    if input.node_shapes.is_visible() {
        for node in cache.node_shape_paths.keys() {
            if let Some(bounds) = input.node_shapes.calibrate(&ctx, *node) {
                total = total.union(bounds);
            }
        }
    }

    let scale_ctx = ScaleContext {
        tree,
        layout,
        transform: Affine::IDENTITY,
        tree_bounds,
        axis: &axis,
        time_scale: input.time_scale,
        measure: input.measure,
    };
    let mut y = total.y1;
    for painter in input.scale_painters.iter().filter(|p| p.is_visible()) {
        let panel_height = painter.calibrate(&scale_ctx).height;
        total = total.union(Rect::new(tree_bounds.x0, y, tree_bounds.x1, y + panel_height));
        y += panel_height;
    }
    if input.legend.is_visible() {
        let legend_width = input.legend.calibrate(&scale_ctx).width;
        if legend_width > 0.0 {
            total = total.union(Rect::new(
                tree_bounds.x0 - legend_width,
                tree_bounds.y0,
                tree_bounds.x0,
                tree_bounds.y1,
            ));
        }
    }

    // Space left for the tree once the non-scaling parts are accounted for.
    let (mut x_diff, mut y_diff) = if layout.maintain_aspect_ratio() {
        let left = tree_bounds.x0 - total.x0;
        let right = total.x1 - tree_bounds.x1;
        let top = tree_bounds.y0 - total.y0;
        let bottom = total.y1 - tree_bounds.y1;
        (2.0 * left.max(right), 2.0 * top.max(bottom))
    } else {
        (
            total.width() - tree_bounds.width(),
            total.height() - tree_bounds.height(),
        )
    };
    if x_diff >= available.width {
        x_diff = available.width.min(total.width()) - tree_bounds.width();
    }
    if y_diff >= available.height {
        y_diff = available.height.min(total.height()) - tree_bounds.height();
    }
    let w = (available.width - x_diff).max(MIN_EXTENT);
    let h = (available.height - y_diff).max(MIN_EXTENT);

    let (x_scale, y_scale, x_offset, y_offset) = if layout.maintain_aspect_ratio() {
        let scale = (w / tree_bounds.width()).min(h / tree_bounds.height());
        (
            scale,
            scale,
            INSET + (available.width - tree_bounds.width() * scale) / 2.0 - tree_bounds.x0 * scale,
            INSET + (available.height - tree_bounds.height() * scale) / 2.0 - tree_bounds.y0 * scale,
        )
    } else {
        let x_scale = w / tree_bounds.width();
        let y_scale = h / tree_bounds.height();
        (
            x_scale,
            y_scale,
            INSET + (tree_bounds.x0 - total.x0) - tree_bounds.x0 * x_scale,
            INSET + (tree_bounds.y0 - total.y0) - tree_bounds.y0 * y_scale,
        )
    };
    let transform = Affine::new([x_scale, 0.0, 0.0, y_scale, x_offset, y_offset]);
    if !transform.is_finite() || x_scale <= 0.0 || y_scale <= 0.0 {
        return Err(CalibrationError::NonFiniteTransform);
    }

    // Second pass, in device pixels.
    let device_tree_bounds = transform.transform_rect_bbox(tree_bounds);
    let tip_labels = place_labels(input.tip_labels, &ctx, &cache.tip_label_paths, transform, Anchoring::Justified);
    let node_labels = place_labels(input.node_labels, &ctx, &cache.node_label_paths, transform, Anchoring::Justified);
    let branch_labels = place_labels(input.branch_labels, &ctx, &cache.branch_label_paths, transform, Anchoring::Centered);

    let node_shapes = if input.node_shapes.is_visible() {
        cache
            .node_shape_paths
            .iter()
            .filter_map(|(node, anchor)| {
                let size = input.node_shapes.shape_size(tree, *node)?;
                Some((
                    *node,
                    NodeShapePlacement {
                        center: transform * anchor.p0,
                        size,
                    },
                ))
            })
            .collect()
    } else {
        BTreeMap::new()
    };
    let node_bars = bars
        .into_iter()
        .map(|(node, bar)| (node, Line::new(transform * bar.p0, transform * bar.p1)))
        .collect();

    let scale_ctx = ScaleContext {
        transform,
        tree_bounds: device_tree_bounds,
        ..scale_ctx
    };
    let panel_heights: Vec<Option<f64>> = input
        .scale_painters
        .iter()
        .map(|painter| {
            painter
                .is_visible()
                .then(|| painter.calibrate(&scale_ctx).height)
        })
        .collect();
    let scale_top = height - INSET - panel_heights.iter().flatten().sum::<f64>();
    let mut y = scale_top;
    let scale_bounds = panel_heights
        .into_iter()
        .map(|panel_height| {
            panel_height.map(|panel_height| {
                let rect = Rect::new(device_tree_bounds.x0, y, device_tree_bounds.x1, y + panel_height);
                y += panel_height;
                rect
            })
        })
        .collect();
    let grid_bounds = Rect::new(device_tree_bounds.x0, 0.0, device_tree_bounds.x1, scale_top);

    let legend_bounds = if input.legend.is_visible() {
        let legend_width = input.legend.calibrate(&scale_ctx).width;
        (legend_width > 0.0).then(|| {
            Rect::new(INSET, device_tree_bounds.y0, INSET + legend_width, device_tree_bounds.y1)
        })
    } else {
        None
    };

    debug!(
        "calibrated {}x{}: scale {:.3}x{:.3}, {} tip label(s)",
        width,
        height,
        x_scale,
        y_scale,
        tip_labels.len()
    );

    let calibration = Calibration {
        viewport: Size::new(width, height),
        transform,
        tree_scale: x_scale,
        tree_bounds: device_tree_bounds,
        layout_tree_bounds: tree_bounds,
        total_bounds: total,
        tip_labels,
        node_labels,
        branch_labels,
        node_shapes,
        node_bars,
        scale_bounds,
        grid_bounds,
        legend_bounds,
        axis,
    };
    Ok((cache, calibration))
}
