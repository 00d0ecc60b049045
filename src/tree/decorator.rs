//! Per-element colours, strokes and fonts.
//!
//! Painters ask a [`Decorator`] how to draw one element: a node (looked up
//! through an attribute), a raw attribute value, or a colour index from a
//! branch colouring. Decorators that only know a colour leave strokes and
//! fonts alone.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use eframe::egui::ecolor::HsvaGamma;
use eframe::egui::Color32;
use vello::kurbo::Point;

use super::scene_graph::{FontStyle, Paint, StrokeStyle};
use super::{AttributeValue, Tree, TreeNode};

/// Thing being decorated.
#[derive(Debug, Clone, Copy)]
pub enum DecoratedItem<'a> {
    Node(&'a TreeNode),
    Value(&'a AttributeValue),
    /// Colour index of a branch colouring segment.
    Index(i32),
}

pub trait Decorator: fmt::Debug {
    /// Line colour for `item`, or `default` when the decorator has nothing to
    /// say about it.
    fn paint(&self, item: DecoratedItem<'_>, default: &Paint) -> Paint;

    fn fill_paint(&self, item: DecoratedItem<'_>, default: &Paint) -> Paint {
        let paint = self.paint(item, default);
        if &paint == default {
            paint
        } else {
            paint.lighter()
        }
    }

    /// Paint for a branch from `parent` (at `start`) to `child` (at `end`).
    fn pair_paint(
        &self,
        parent: DecoratedItem<'_>,
        child: DecoratedItem<'_>,
        start: Point,
        end: Point,
        default: &Paint,
    ) -> Paint {
        let _ = (parent, start, end);
        self.paint(child, default)
    }

    fn stroke(&self, _item: DecoratedItem<'_>, default: &StrokeStyle) -> StrokeStyle {
        *default
    }

    fn font(&self, _item: DecoratedItem<'_>, default: &FontStyle) -> FontStyle {
        default.clone()
    }

    fn allows_gradient(&self) -> bool {
        false
    }

    /// Ordered value to colour entries for a legend.
    fn legend_entries(&self) -> Vec<(String, Color32)> {
        Vec::new()
    }

    fn attribute_name(&self) -> Option<&str> {
        None
    }
}

/// Paints everything in one colour.
#[derive(Debug, Clone)]
pub struct FixedColourDecorator {
    color: Color32,
}

impl FixedColourDecorator {
    pub fn new(color: Color32) -> Self {
        Self { color }
    }
}

impl Decorator for FixedColourDecorator {
    fn paint(&self, _item: DecoratedItem<'_>, _default: &Paint) -> Paint {
        Paint::Solid(self.color)
    }
}

/// Maps the colour indices of a branch colouring onto a palette.
#[derive(Debug, Clone)]
pub struct IndexedColourDecorator {
    palette: Vec<Color32>,
    labels: Vec<String>,
}

impl IndexedColourDecorator {
    pub fn new(palette: Vec<Color32>) -> Self {
        Self {
            palette,
            labels: Vec::new(),
        }
    }

    /// Names shown in the legend for each index, in index order.
    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn color(&self, index: i32) -> Option<Color32> {
        if self.palette.is_empty() || index < 0 {
            return None;
        }
        self.palette.get(index as usize % self.palette.len()).copied()
    }
}

impl Default for IndexedColourDecorator {
    fn default() -> Self {
        Self::new(hue_palette(8))
    }
}

impl Decorator for IndexedColourDecorator {
    fn paint(&self, item: DecoratedItem<'_>, default: &Paint) -> Paint {
        let index = match item {
            DecoratedItem::Index(index) => Some(index),
            DecoratedItem::Value(value) => value.as_number().map(|n| n as i32),
            DecoratedItem::Node(_) => None,
        };
        index
            .and_then(|index| self.color(index))
            .map(Paint::Solid)
            .unwrap_or_else(|| default.clone())
    }

    fn legend_entries(&self) -> Vec<(String, Color32)> {
        self.labels
            .iter()
            .enumerate()
            .filter_map(|(index, label)| Some((label.clone(), self.color(index as i32)?)))
            .collect()
    }
}

/// Value to colour mapping of an attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum ColourScale {
    /// One colour per observed value.
    Discrete { entries: Vec<(String, Color32)> },
    /// Interpolation over a numeric range, through an optional middle colour.
    Continuous {
        min: f64,
        max: f64,
        logarithm: bool,
        colours: Vec<Color32>,
    },
}

pub const CONTINUOUS_LOW: Color32 = Color32::from_rgb(217, 77, 65);
pub const CONTINUOUS_HIGH: Color32 = Color32::from_rgb(65, 108, 217);

impl ColourScale {
    /// Discrete scale over the distinct values, numbers first in numeric order
    /// then text in lexical order.
    pub fn discrete<'a>(values: impl IntoIterator<Item = &'a AttributeValue>) -> Self {
        let mut distinct: Vec<String> = Vec::new();
        let mut seen = BTreeMap::new();
        for value in values {
            let text = value.to_string();
            if seen.insert(text.clone(), value.as_number()).is_none() {
                distinct.push(text);
            }
        }
        distinct.sort_by(|a, b| match (seen[a], seen[b]) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.cmp(b),
        });
        let palette = hue_palette(distinct.len());
        ColourScale::Discrete {
            entries: distinct.into_iter().zip(palette).collect(),
        }
    }

    /// Continuous scale over the numeric values. Under a log scale only
    /// positive values count. `None` when no usable value is present.
    pub fn continuous<'a>(
        values: impl IntoIterator<Item = &'a AttributeValue>,
        logarithm: bool,
    ) -> Option<Self> {
        let numbers = values
            .into_iter()
            .filter_map(AttributeValue::as_number)
            .filter(|n| n.is_finite() && (!logarithm || *n > 0.0));
        let (min, max) = numbers.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), n| {
            (lo.min(n), hi.max(n))
        });
        if !min.is_finite() || !max.is_finite() {
            return None;
        }
        Some(ColourScale::Continuous {
            min,
            max,
            logarithm,
            colours: vec![CONTINUOUS_LOW, CONTINUOUS_HIGH],
        })
    }

    pub fn with_colours(self, new_colours: Vec<Color32>) -> Self {
        match self {
            ColourScale::Continuous {
                min,
                max,
                logarithm,
                ..
            } if new_colours.len() >= 2 => ColourScale::Continuous {
                min,
                max,
                logarithm,
                colours: new_colours,
            },
            ColourScale::Discrete { entries } => ColourScale::Discrete {
                entries: entries
                    .into_iter()
                    .zip(new_colours.into_iter().chain(std::iter::repeat(Color32::GRAY)))
                    .map(|((value, _), colour)| (value, colour))
                    .collect(),
            },
            other => other,
        }
    }

    /// Position of `value` on a continuous scale in `[0, 1]`.
    pub fn scaled(&self, value: f64) -> Option<f64> {
        let ColourScale::Continuous {
            min,
            max,
            logarithm,
            ..
        } = self
        else {
            return None;
        };
        if !value.is_finite() || (*logarithm && value <= 0.0) {
            return None;
        }
        let (value, min, max) = if *logarithm {
            (value.ln(), min.ln(), max.ln())
        } else {
            (value, *min, *max)
        };
        let range = max - min;
        if range.abs() < f64::EPSILON {
            return Some(0.5);
        }
        Some(((value - min) / range).clamp(0.0, 1.0))
    }

    pub fn colour_for(&self, value: &AttributeValue) -> Option<Color32> {
        match self {
            ColourScale::Discrete { entries } => {
                let text = value.to_string();
                entries
                    .iter()
                    .find(|(entry, _)| *entry == text)
                    .map(|(_, colour)| *colour)
            }
            ColourScale::Continuous { colours, .. } => {
                let t = self.scaled(value.as_number()?)?;
                Some(interpolate(colours, t))
            }
        }
    }
}

/// Colours nodes by the value of one attribute.
#[derive(Debug, Clone)]
pub struct AttributeColourDecorator {
    attribute: String,
    scale: ColourScale,
    gradient: bool,
}

impl AttributeColourDecorator {
    pub fn new(attribute: impl Into<String>, scale: ColourScale) -> Self {
        Self {
            attribute: attribute.into(),
            scale,
            gradient: false,
        }
    }

    /// Build a scale from the values `attribute` takes in `tree`. Attributes
    /// holding non-integral numbers get a continuous scale, anything else a
    /// discrete one.
    pub fn from_tree(attribute: impl Into<String>, tree: &Tree) -> Option<Self> {
        let attribute = attribute.into();
        let values: Vec<&AttributeValue> = tree
            .nodes
            .iter()
            .filter_map(|node| node.attribute(&attribute))
            .collect();
        if values.is_empty() {
            return None;
        }
        let continuous = values.iter().all(|value| value.is_numeric())
            && values
                .iter()
                .filter_map(|value| value.as_number())
                .any(|n| n.fract() != 0.0);
        let scale = if continuous {
            ColourScale::continuous(values.iter().copied(), false)?
        } else {
            ColourScale::discrete(values.iter().copied())
        };
        Some(Self::new(attribute, scale))
    }

    pub fn with_gradient(mut self, gradient: bool) -> Self {
        self.gradient = gradient;
        self
    }

    pub fn scale(&self) -> &ColourScale {
        &self.scale
    }

    fn colour(&self, item: DecoratedItem<'_>) -> Option<Color32> {
        match item {
            DecoratedItem::Node(node) => self.scale.colour_for(node.attribute(&self.attribute)?),
            DecoratedItem::Value(value) => self.scale.colour_for(value),
            DecoratedItem::Index(index) => {
                self.scale.colour_for(&AttributeValue::Number(index as f64))
            }
        }
    }
}

impl Decorator for AttributeColourDecorator {
    fn paint(&self, item: DecoratedItem<'_>, default: &Paint) -> Paint {
        self.colour(item)
            .map(Paint::Solid)
            .unwrap_or_else(|| default.clone())
    }

    fn pair_paint(
        &self,
        parent: DecoratedItem<'_>,
        child: DecoratedItem<'_>,
        start: Point,
        end: Point,
        default: &Paint,
    ) -> Paint {
        match (self.gradient, self.colour(parent), self.colour(child)) {
            (true, Some(from), Some(to)) => Paint::Gradient {
                start,
                end,
                from,
                to,
            },
            _ => self.paint(child, default),
        }
    }

    fn allows_gradient(&self) -> bool {
        self.gradient
    }

    fn legend_entries(&self) -> Vec<(String, Color32)> {
        match &self.scale {
            ColourScale::Discrete { entries } => entries.clone(),
            ColourScale::Continuous { .. } => Vec::new(),
        }
    }

    fn attribute_name(&self) -> Option<&str> {
        Some(&self.attribute)
    }
}

/// `count` colours spread evenly around the hue circle.
pub fn hue_palette(count: usize) -> Vec<Color32> {
    (0..count)
        .map(|i| {
            let hue = i as f32 / count.max(1) as f32;
            Color32::from(HsvaGamma {
                h: hue,
                s: 0.7,
                v: 0.85,
                a: 1.0,
            })
        })
        .collect()
}

fn interpolate(colours: &[Color32], t: f64) -> Color32 {
    match colours {
        [] => Color32::GRAY,
        [only] => *only,
        _ => {
            let spans = (colours.len() - 1) as f64;
            let position = t.clamp(0.0, 1.0) * spans;
            let index = (position.floor() as usize).min(colours.len() - 2);
            let local = (position - index as f64) as f32;
            colours[index].lerp_to_gamma(colours[index + 1], local)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::test_support::{node_named, tree_from_newick};

    fn annotated() -> Tree {
        let mut tree = tree_from_newick("((A:1,B:1):1,(C:1,D:1):1);");
        for (name, host) in [("A", "human"), ("B", "bat"), ("C", "human"), ("D", "pig")] {
            let node = node_named(&tree, name);
            tree.nodes[node].set_attribute("host", AttributeValue::Text(host.into()));
        }
        for (name, rate) in [("A", 0.5), ("B", 1.5), ("C", 2.5)] {
            let node = node_named(&tree, name);
            tree.nodes[node].set_attribute("rate", AttributeValue::Number(rate));
        }
        tree
    }

    #[test]
    fn discrete_scale_orders_values() {
        let values = [
            AttributeValue::Number(10.0),
            AttributeValue::Text("b".into()),
            AttributeValue::Number(2.0),
            AttributeValue::Text("a".into()),
            AttributeValue::Number(2.0),
        ];
        let ColourScale::Discrete { entries } = ColourScale::discrete(values.iter()) else {
            panic!("expected a discrete scale");
        };
        let names: Vec<&str> = entries.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["2", "10", "a", "b"]);
    }

    #[test]
    fn attribute_kind_picks_the_scale() {
        let tree = annotated();
        let host = AttributeColourDecorator::from_tree("host", &tree).unwrap();
        assert!(matches!(host.scale(), ColourScale::Discrete { .. }));
        assert_eq!(host.legend_entries().len(), 3);

        let rate = AttributeColourDecorator::from_tree("rate", &tree).unwrap();
        assert!(matches!(rate.scale(), ColourScale::Continuous { .. }));
        assert!(rate.legend_entries().is_empty());
        assert!(AttributeColourDecorator::from_tree("missing", &tree).is_none());
    }

    #[test]
    fn nodes_without_the_attribute_keep_the_default() {
        let tree = annotated();
        let decorator = AttributeColourDecorator::from_tree("rate", &tree).unwrap();
        let default = Paint::Solid(Color32::BLACK);
        let d = &tree.nodes[node_named(&tree, "D")];
        assert_eq!(decorator.paint(DecoratedItem::Node(d), &default), default);

        let a = &tree.nodes[node_named(&tree, "A")];
        assert_eq!(
            decorator.paint(DecoratedItem::Node(a), &default),
            Paint::Solid(CONTINUOUS_LOW)
        );
    }

    #[test]
    fn log_scale_treats_non_positive_values_as_missing() {
        let values = [
            AttributeValue::Number(-1.0),
            AttributeValue::Number(0.0),
            AttributeValue::Number(1.0),
            AttributeValue::Number(100.0),
        ];
        let scale = ColourScale::continuous(values.iter(), true).unwrap();
        assert_eq!(scale.scaled(0.0), None);
        assert_eq!(scale.scaled(-5.0), None);
        assert!((scale.scaled(10.0).unwrap() - 0.5).abs() < 1e-12);
        assert!(ColourScale::continuous([AttributeValue::Number(0.0)].iter(), true).is_none());
    }

    #[test]
    fn degenerate_range_maps_to_the_middle() {
        let values = [AttributeValue::Number(3.0)];
        let scale = ColourScale::continuous(values.iter(), false).unwrap();
        assert_eq!(scale.scaled(3.0), Some(0.5));
    }

    #[test]
    fn gradients_only_when_allowed() {
        let tree = annotated();
        let a = &tree.nodes[node_named(&tree, "A")];
        let b = &tree.nodes[node_named(&tree, "B")];
        let default = Paint::Solid(Color32::BLACK);
        let (start, end) = (Point::new(0.0, 0.0), Point::new(1.0, 0.0));

        let solid = AttributeColourDecorator::from_tree("rate", &tree).unwrap();
        let paint = solid.pair_paint(DecoratedItem::Node(a), DecoratedItem::Node(b), start, end, &default);
        assert!(matches!(paint, Paint::Solid(_)));

        let gradient = solid.with_gradient(true);
        assert!(gradient.allows_gradient());
        let paint =
            gradient.pair_paint(DecoratedItem::Node(a), DecoratedItem::Node(b), start, end, &default);
        assert!(matches!(paint, Paint::Gradient { from, .. } if from == CONTINUOUS_LOW));
    }

    #[test]
    fn indexed_palette_wraps() {
        let decorator = IndexedColourDecorator::new(vec![Color32::RED, Color32::BLUE])
            .with_labels(vec!["left".into(), "right".into()]);
        let default = Paint::Solid(Color32::BLACK);
        assert_eq!(decorator.paint(DecoratedItem::Index(3), &default), Paint::Solid(Color32::BLUE));
        assert_eq!(decorator.paint(DecoratedItem::Index(-1), &default), default);
        assert_eq!(decorator.legend_entries()[0], ("left".to_string(), Color32::RED));
    }

    #[test]
    fn fill_is_lighter_than_line() {
        let decorator = FixedColourDecorator::new(Color32::from_rgba_unmultiplied(10, 20, 30, 200));
        let default = Paint::Solid(Color32::BLACK);
        let fill = decorator.fill_paint(DecoratedItem::Index(0), &default);
        assert_eq!(fill.color().a(), Color32::from_rgba_unmultiplied(10, 20, 30, 100).a());
    }
}
