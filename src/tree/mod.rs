use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use eframe::egui::Color32;
use phylotree::tree::Tree as PhyloTree;

use crate::settings::Settings;

pub mod calibration;
pub mod decorator;
pub mod events;
pub mod layout;
pub mod painter;
pub mod pane;
pub mod scene_graph;
pub mod selection;
pub mod transform;

pub type NodeId = usize;

pub const CARTOON_ATTRIBUTE: &str = "!cartoon";
pub const COLLAPSE_ATTRIBUTE: &str = "!collapse";
pub const HILIGHT_ATTRIBUTE: &str = "!hilight";
pub const ROTATE_ATTRIBUTE: &str = "!rotate";
pub const COLOR_ATTRIBUTE: &str = "!color";

/// Length used for branches that carry no length.
pub const DEFAULT_BRANCH_LENGTH: f64 = 1.0;

/// Typed node annotation value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Number(f64),
    Text(String),
    Boolean(bool),
    Color(Color32),
    /// Numeric array, usually a `{lower, upper}` interval such as an HPD range.
    Range(Vec<f64>),
    Colouring(BranchColouring),
    /// Subtree summary stored by cartoon, collapse and hilight annotations.
    Clade(CladeSummary),
}

impl AttributeValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(value) => Some(*value),
            AttributeValue::Text(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Boolean(value) => Some(*value),
            AttributeValue::Text(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_color(&self) -> Option<Color32> {
        match self {
            AttributeValue::Color(color) => Some(*color),
            _ => None,
        }
    }

    /// Lower and upper bound of a range value, in ascending order.
    pub fn as_range(&self) -> Option<(f64, f64)> {
        match self {
            AttributeValue::Range(values) if values.len() >= 2 => {
                let (a, b) = (values[0], values[1]);
                if a.is_finite() && b.is_finite() {
                    Some((a.min(b), a.max(b)))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    pub fn as_clade(&self) -> Option<&CladeSummary> {
        match self {
            AttributeValue::Clade(summary) => Some(summary),
            _ => None,
        }
    }

    pub fn as_colouring(&self) -> Option<&BranchColouring> {
        match self {
            AttributeValue::Colouring(colouring) => Some(colouring),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, AttributeValue::Number(_))
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Number(value) => write!(f, "{value}"),
            AttributeValue::Text(text) => write!(f, "{text}"),
            AttributeValue::Boolean(value) => write!(f, "{value}"),
            AttributeValue::Color(color) => {
                let [r, g, b, _] = color.to_srgba_unmultiplied();
                write!(f, "#{r:02x}{g:02x}{b:02x}")
            }
            AttributeValue::Range(values) => {
                let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "{{{}}}", parts.join(","))
            }
            AttributeValue::Colouring(colouring) => {
                for (colour, interval) in &colouring.segments {
                    write!(f, "{colour},{interval},")?;
                }
                write!(f, "{}", colouring.final_colour)
            }
            AttributeValue::Clade(summary) => match &summary.label {
                Some(label) => write!(f, "{label}"),
                None => write!(f, "{} tips", summary.tip_count),
            },
        }
    }
}

/// Per-branch colour segments, listed from the child end towards the parent.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchColouring {
    /// `(colour index, interval length)` pairs.
    pub segments: Vec<(i32, f64)>,
    /// Colour of the remaining stretch up to the parent.
    pub final_colour: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CladeSummary {
    pub tip_count: usize,
    pub min_tip_height: f64,
    pub label: Option<String>,
    pub color: Option<Color32>,
}

/// Representation of a phylogenetic tree with an explicit node list.
///
/// Node ids index into `nodes`. Trees built by this crate number their nodes in
/// pre-order, so id order is also drawing order.
#[derive(Debug, Clone)]
pub struct Tree {
    pub id: usize,
    pub label: Option<String>,
    pub root: Option<NodeId>,
    pub nodes: Vec<TreeNode>,
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl Tree {
    pub fn empty(id: usize, label: Option<String>) -> Self {
        Self {
            id,
            label,
            root: None,
            nodes: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    /// Copy a parsed phylotree into pre-order numbered nodes.
    pub fn from_phylo(id: usize, label: Option<String>, phylo: &PhyloTree) -> Self {
        let mut tree = Self::empty(id, label);
        let Ok(root) = phylo.get_root() else {
            return tree;
        };

        let mut stack = vec![(root, None)];
        while let Some((phylo_id, parent)) = stack.pop() {
            let Ok(phylo_node) = phylo.get(&phylo_id) else {
                continue;
            };
            let node_id = tree.nodes.len();
            let name = phylo_node
                .name
                .as_ref()
                .map(|name| name.trim().to_owned())
                .filter(|name| !name.is_empty());
            let length = if parent.is_some() {
                phylo_node.parent_edge
            } else {
                None
            };
            let mut node = TreeNode::new(node_id, name, length);
            node.parent = parent;
            node.source = Some(node_id);
            tree.nodes.push(node);
            if let Some(parent) = parent {
                tree.nodes[parent].children.push(node_id);
            }
            for child in phylo_node.children.iter().rev() {
                stack.push((*child, Some(node_id)));
            }
        }
        tree.root = Some(0);
        tree
    }

    pub fn node(&self, id: NodeId) -> Option<&TreeNode> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut TreeNode> {
        self.nodes.get_mut(id)
    }

    pub fn root_node(&self) -> Option<&TreeNode> {
        self.root.and_then(|id| self.nodes.get(id))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id < self.nodes.len()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id).and_then(|node| node.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    /// Children in drawing order, reversed when the node carries `!rotate = true`.
    pub fn ordered_children(&self, id: NodeId) -> Vec<NodeId> {
        let mut children = self.children(id).to_vec();
        if self.nodes.get(id).map_or(false, TreeNode::is_rotated) {
            children.reverse();
        }
        children
    }

    pub fn is_external(&self, id: NodeId) -> bool {
        self.nodes.get(id).map_or(false, TreeNode::is_leaf)
    }

    pub fn is_root(&self, id: NodeId) -> bool {
        self.root == Some(id)
    }

    /// Branch length above `id`, falling back to the default length.
    pub fn length(&self, id: NodeId) -> f64 {
        self.nodes
            .get(id)
            .and_then(|node| node.length)
            .filter(|length| length.is_finite())
            .unwrap_or(DEFAULT_BRANCH_LENGTH)
    }

    /// True when every non-root node carries a branch length.
    pub fn has_lengths(&self) -> bool {
        let mut any = false;
        for node in &self.nodes {
            if Some(node.id) == self.root {
                continue;
            }
            match node.length {
                Some(length) if length.is_finite() => any = true,
                _ => return false,
            }
        }
        any
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|node| node.is_leaf()).count()
    }

    pub fn external_nodes(&self) -> Vec<NodeId> {
        self.preorder()
            .into_iter()
            .filter(|id| self.is_external(*id))
            .collect()
    }

    pub fn internal_nodes(&self) -> Vec<NodeId> {
        self.preorder()
            .into_iter()
            .filter(|id| !self.is_external(*id))
            .collect()
    }

    /// Node ids reachable from the root in pre-order.
    pub fn preorder(&self) -> Vec<NodeId> {
        match self.root {
            Some(root) => self.preorder_from(root),
            None => Vec::new(),
        }
    }

    pub fn preorder_from(&self, start: NodeId) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        if !self.contains(start) {
            return order;
        }
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            order.push(id);
            for child in self.children(id).iter().rev() {
                stack.push(*child);
            }
        }
        order
    }

    pub fn postorder(&self) -> Vec<NodeId> {
        let mut order = self.preorder();
        order.reverse();
        order
    }

    /// Tip descendants of `id` (the node itself when it is a tip).
    pub fn descendant_tips(&self, id: NodeId) -> Vec<NodeId> {
        self.preorder_from(id)
            .into_iter()
            .filter(|node| self.is_external(*node))
            .collect()
    }

    /// Distance of every node below the root, measured as a height above the
    /// lowest tip: the root has the longest root-to-tip distance, a child has its
    /// parent's height minus its branch length.
    pub fn node_heights(&self) -> Vec<f64> {
        let mut depths = vec![0.0; self.nodes.len()];
        let mut max_depth: f64 = 0.0;
        for id in self.preorder() {
            if let Some(parent) = self.parent(id) {
                depths[id] = depths[parent] + self.length(id);
            }
            if self.is_external(id) {
                max_depth = max_depth.max(depths[id]);
            }
        }
        depths.iter().map(|depth| max_depth - depth).collect()
    }

    pub fn root_height(&self) -> f64 {
        match self.root {
            Some(root) => self.node_heights().get(root).copied().unwrap_or(0.0),
            None => 0.0,
        }
    }

    /// Number of tips below each node.
    pub fn tip_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.nodes.len()];
        for id in self.postorder() {
            counts[id] = if self.is_external(id) {
                1
            } else {
                self.children(id).iter().map(|child| counts[*child]).sum()
            };
        }
        counts
    }

    pub fn tip_count(&self, id: NodeId) -> usize {
        self.descendant_tips(id).len()
    }

    pub fn min_tip_height(&self, id: NodeId, heights: &[f64]) -> f64 {
        self.descendant_tips(id)
            .into_iter()
            .filter_map(|tip| heights.get(tip).copied())
            .fold(f64::INFINITY, f64::min)
            .min(heights.get(id).copied().unwrap_or(0.0))
    }

    /// Nodes from `id` up to and including the root.
    pub fn path_to_root(&self, id: NodeId) -> Vec<NodeId> {
        let mut path = Vec::new();
        let mut current = self.contains(id).then_some(id);
        while let Some(node) = current {
            path.push(node);
            current = self.parent(node);
        }
        path
    }

    /// Most recent common ancestor of a set of nodes, `None` for an empty set.
    pub fn common_ancestor<I>(&self, nodes: I) -> Option<NodeId>
    where
        I: IntoIterator<Item = NodeId>,
    {
        let mut iter = nodes.into_iter().filter(|id| self.contains(*id));
        let first = iter.next()?;
        let mut ancestors = self.path_to_root(first);
        for node in iter {
            let path: BTreeSet<NodeId> = self.path_to_root(node).into_iter().collect();
            ancestors.retain(|ancestor| path.contains(ancestor));
        }
        ancestors.first().copied()
    }

    pub fn is_ancestor_of(&self, ancestor: NodeId, node: NodeId) -> bool {
        self.path_to_root(node).contains(&ancestor)
    }

    /// True when a collapse or cartoon annotation hides the node's descendants.
    pub fn hides_descendants(&self, id: NodeId) -> bool {
        self.nodes.get(id).map_or(false, |node| {
            !node.is_leaf()
                && (node.attributes.contains_key(COLLAPSE_ATTRIBUTE)
                    || node.attributes.contains_key(CARTOON_ATTRIBUTE))
        })
    }

    /// Attribute names used on any node, sorted.
    pub fn node_attribute_keys(&self) -> BTreeSet<String> {
        self.nodes
            .iter()
            .flat_map(|node| node.attributes.keys())
            .filter(|key| !key.starts_with('!'))
            .cloned()
            .collect()
    }

    pub fn node_numeric_attribute_keys(&self) -> BTreeSet<String> {
        self.nodes
            .iter()
            .flat_map(|node| node.attributes.iter())
            .filter(|(key, value)| !key.starts_with('!') && value.is_numeric())
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn find_by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|node| node.name.as_deref() == Some(name))
            .map(|node| node.id)
    }
}

/// Node within a phylogenetic tree.
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub id: NodeId,
    pub name: Option<String>,
    pub length: Option<f64>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub attributes: BTreeMap<String, AttributeValue>,
    /// Node of the loaded tree this node was derived from. `None` for nodes
    /// synthesised by re-rooting.
    pub source: Option<NodeId>,
}

impl TreeNode {
    pub fn new(id: NodeId, name: Option<String>, length: Option<f64>) -> Self {
        Self {
            id,
            name,
            length,
            parent: None,
            children: Vec::new(),
            attributes: BTreeMap::new(),
            source: None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_rotated(&self) -> bool {
        self.attributes
            .get(ROTATE_ATTRIBUTE)
            .and_then(AttributeValue::as_bool)
            .unwrap_or(false)
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: AttributeValue) {
        self.attributes.insert(key.into(), value);
    }

    pub fn remove_attribute(&mut self, key: &str) -> Option<AttributeValue> {
        self.attributes.remove(key)
    }

    pub fn numeric_attribute(&self, key: &str) -> Option<f64> {
        self.attributes.get(key).and_then(AttributeValue::as_number)
    }

    pub fn numeric_range_attribute(&self, key: &str) -> Option<(f64, f64)> {
        self.attributes.get(key).and_then(AttributeValue::as_range)
    }
}

/// Container for the full contents of an imported file.
#[derive(Debug, Clone)]
pub struct TreeBundle {
    pub format: TreeFileFormat,
    pub trees: Vec<Tree>,
    /// Display settings embedded in the file, empty when none were present.
    pub settings: Settings,
}

impl TreeBundle {
    pub fn new(format: TreeFileFormat, trees: Vec<Tree>) -> Self {
        Self {
            format,
            trees,
            settings: Settings::default(),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TreeFileFormat {
    Newick,
    Nexus,
}

#[cfg(test)]
pub(crate) mod test_support {
    use phylotree::tree::Tree as PhyloTree;

    use super::{NodeId, Tree};

    pub fn tree_from_newick(newick: &str) -> Tree {
        let phylo = PhyloTree::from_newick(newick).expect("valid test newick");
        Tree::from_phylo(0, Some("test".to_string()), &phylo)
    }

    pub fn node_named(tree: &Tree, name: &str) -> NodeId {
        tree.find_by_name(name)
            .unwrap_or_else(|| panic!("no node named {name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{node_named, tree_from_newick};
    use super::*;

    #[test]
    fn nodes_are_numbered_in_preorder() {
        let tree = tree_from_newick("((A:1,B:2):1,C:3);");
        assert_eq!(tree.root, Some(0));
        assert_eq!(tree.preorder(), (0..tree.nodes.len()).collect::<Vec<_>>());
        let names: Vec<_> = tree
            .external_nodes()
            .into_iter()
            .filter_map(|id| tree.nodes[id].name.clone())
            .collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[test]
    fn heights_measure_from_the_deepest_tip() {
        let tree = tree_from_newick("((A:1,B:2):1,C:3);");
        let heights = tree.node_heights();
        let root = tree.root.unwrap();
        assert!((heights[root] - 3.0).abs() < 1e-12);
        assert!((heights[node_named(&tree, "B")]).abs() < 1e-12);
        assert!((heights[node_named(&tree, "A")] - 1.0).abs() < 1e-12);
        assert!((tree.root_height() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn common_ancestor_of_tips() {
        let tree = tree_from_newick("((A:1,B:2):1,(C:3,D:1):1);");
        let a = node_named(&tree, "A");
        let b = node_named(&tree, "B");
        let c = node_named(&tree, "C");
        let ab = tree.parent(a).unwrap();
        assert_eq!(tree.common_ancestor([a, b]), Some(ab));
        assert_eq!(tree.common_ancestor([a, c]), tree.root);
        assert_eq!(tree.common_ancestor([a]), Some(a));
        assert_eq!(tree.common_ancestor(Vec::new()), None);
    }

    #[test]
    fn detects_missing_lengths() {
        assert!(tree_from_newick("(A:1,B:2);").has_lengths());
        assert!(!tree_from_newick("(A,B);").has_lengths());
        assert!(!tree_from_newick("(A:1,B);").has_lengths());
    }

    #[test]
    fn rotation_reverses_child_order() {
        let mut tree = tree_from_newick("(A:1,B:1,C:1);");
        let root = tree.root.unwrap();
        let original = tree.ordered_children(root);
        tree.nodes[root].set_attribute(ROTATE_ATTRIBUTE, AttributeValue::Boolean(true));
        let mut rotated = tree.ordered_children(root);
        rotated.reverse();
        assert_eq!(original, rotated);
    }

    #[test]
    fn tip_counts_and_min_tip_heights() {
        let tree = tree_from_newick("((A:1,B:2):1,C:3);");
        let heights = tree.node_heights();
        let ab = tree.parent(node_named(&tree, "A")).unwrap();
        assert_eq!(tree.tip_counts()[ab], 2);
        assert_eq!(tree.tip_count(tree.root.unwrap()), 3);
        assert!((tree.min_tip_height(ab, &heights)).abs() < 1e-12);
    }

    #[test]
    fn range_values_are_ordered() {
        let value = AttributeValue::Range(vec![2.0, 1.0]);
        assert_eq!(value.as_range(), Some((1.0, 2.0)));
        assert_eq!(AttributeValue::Range(vec![1.0]).as_range(), None);
        assert_eq!(AttributeValue::Text("0.5".into()).as_number(), Some(0.5));
    }
}
