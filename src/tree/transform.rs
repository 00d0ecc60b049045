//! Derivation of the display tree from a loaded tree.
//!
//! The chain runs re-rooting, branch ordering and branch-length transformation
//! in that order. Every stage builds a fresh tree; each derived node keeps the id
//! of the loaded node it came from in [`TreeNode::source`].

use log::{debug, warn};

use super::{AttributeValue, NodeId, Tree, TreeNode, DEFAULT_BRANCH_LENGTH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RootingType {
    #[default]
    UserRooting,
    MidPoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BranchOrdering {
    /// Smaller clades first.
    #[default]
    Increasing,
    /// Larger clades first.
    Decreasing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BranchTransform {
    /// Tips at height zero, internal nodes one above their tallest child.
    #[default]
    Cladogram,
    /// Original lengths with tip branches stretched so every tip aligns.
    Proportional,
    /// Every branch has unit length.
    Equal,
}

/// A point on an edge of the loaded tree, read as an unrooted tree.
///
/// `from` and `to` are adjacent once a bifurcating root has been dissolved into
/// a single edge. `fraction` runs from `from` (0.0) to `to` (1.0).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RootingPoint {
    pub from: NodeId,
    pub to: NodeId,
    pub fraction: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformSettings {
    pub rooting_on: bool,
    pub rooting_type: RootingType,
    pub rooting: Option<RootingPoint>,
    pub order_branches_on: bool,
    pub branch_ordering: BranchOrdering,
    pub transform_branches_on: bool,
    pub branch_transform: BranchTransform,
}

impl Default for TransformSettings {
    fn default() -> Self {
        Self {
            rooting_on: false,
            rooting_type: RootingType::UserRooting,
            rooting: None,
            order_branches_on: false,
            branch_ordering: BranchOrdering::Increasing,
            transform_branches_on: false,
            branch_transform: BranchTransform::Cladogram,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransformStage {
    RootAt(RootingPoint),
    MidPointRoot,
    Sort(BranchOrdering),
    Transform(BranchTransform),
}

/// Ordered list of stages turning a loaded tree into a display tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransformChain {
    stages: Vec<TransformStage>,
}

impl TransformChain {
    pub fn from_settings(settings: &TransformSettings, source: &Tree) -> Self {
        let mut stages = Vec::new();
        if settings.rooting_on {
            match settings.rooting_type {
                RootingType::MidPoint => stages.push(TransformStage::MidPointRoot),
                RootingType::UserRooting => {
                    if let Some(point) = settings.rooting {
                        stages.push(TransformStage::RootAt(point));
                    }
                }
            }
        }
        if settings.order_branches_on {
            stages.push(TransformStage::Sort(settings.branch_ordering));
        }
        if settings.transform_branches_on || !source.has_lengths() {
            stages.push(TransformStage::Transform(settings.branch_transform));
        }
        Self { stages }
    }

    pub fn stages(&self) -> &[TransformStage] {
        &self.stages
    }

    pub fn is_identity(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn apply(&self, source: &Tree) -> Tree {
        let mut tree = identity_copy(source);
        for stage in &self.stages {
            tree = match stage {
                TransformStage::RootAt(point) => match reroot(&tree, *point) {
                    Some(rerooted) => rerooted,
                    None => {
                        warn!(
                            "rooting edge {}-{} is not part of the current tree; keeping the original root",
                            point.from, point.to
                        );
                        tree
                    }
                },
                TransformStage::MidPointRoot => match midpoint(&tree) {
                    Some(point) => reroot(&tree, point).unwrap_or(tree),
                    None => tree,
                },
                TransformStage::Sort(ordering) => sort_branches(&tree, *ordering),
                TransformStage::Transform(transform) => transform_branches(&tree, *transform),
            };
        }
        debug!(
            "derived display tree with {} node(s) through {} stage(s)",
            tree.nodes.len(),
            self.stages.len()
        );
        tree
    }
}

/// Build the display tree for `source` under `settings`.
pub fn derive_display_tree(source: &Tree, settings: &TransformSettings) -> Tree {
    TransformChain::from_settings(settings, source).apply(source)
}

/// Translate a branch picked in the display tree into a rooting point on the
/// loaded tree. `fraction` is measured from the parent end of the picked branch.
pub fn rooting_point_for_branch(
    source: &Tree,
    derived: &Tree,
    node: NodeId,
    fraction: f64,
    current: Option<RootingPoint>,
) -> Option<RootingPoint> {
    let fraction = fraction.clamp(0.0, 1.0);
    let derived_node = derived.node(node)?;
    let derived_parent = derived.node(derived_node.parent?)?;
    let child = derived_node.source?;

    let Some(parent) = derived_parent.source else {
        // Picked one half of the currently split edge.
        let current = current?;
        return if child == current.to {
            Some(RootingPoint {
                fraction: current.fraction + fraction * (1.0 - current.fraction),
                ..current
            })
        } else if child == current.from {
            Some(RootingPoint {
                fraction: current.fraction * (1.0 - fraction),
                ..current
            })
        } else {
            None
        };
    };

    if let Some(other) = dissolved_partner(source, parent, child) {
        // The picked branch is half of the edge formed by dissolving the root.
        let child_length = source.length(child);
        let total = child_length + source.length(other);
        let along = if total > 0.0 {
            (1.0 - fraction) * child_length / total
        } else {
            0.5
        };
        return Some(RootingPoint {
            from: child,
            to: other,
            fraction: along,
        });
    }

    Some(RootingPoint {
        from: parent,
        to: child,
        fraction,
    })
}

/// Rooting point equivalent to the loaded tree's own root, when it has one.
pub fn original_root_point(source: &Tree) -> Option<RootingPoint> {
    let root = source.root?;
    let children = source.children(root);
    if children.len() != 2 {
        return None;
    }
    let (a, b) = (children[0], children[1]);
    let (la, lb) = (source.length(a), source.length(b));
    let total = la + lb;
    Some(RootingPoint {
        from: a,
        to: b,
        fraction: if total > 0.0 { la / total } else { 0.5 },
    })
}

fn dissolved_partner(source: &Tree, parent: NodeId, child: NodeId) -> Option<NodeId> {
    if !source.is_root(parent) || source.children(parent).len() != 2 {
        return None;
    }
    source
        .children(parent)
        .iter()
        .copied()
        .find(|other| *other != child)
}

fn identity_copy(source: &Tree) -> Tree {
    let mut tree = source.clone();
    for node in &mut tree.nodes {
        node.source = node.source.or(Some(node.id));
    }
    tree
}

/// Undirected adjacency with a bifurcating root dissolved into one edge.
///
/// Each node lists its children first, in order, then its parent side.
fn build_adjacency(tree: &Tree) -> Vec<Vec<(NodeId, f64)>> {
    if tree.nodes.is_empty() {
        return Vec::new();
    }

    let mut adjacency = vec![Vec::new(); tree.nodes.len()];
    let dissolved = tree
        .root
        .filter(|root| tree.children(*root).len() == 2);

    for id in tree.preorder() {
        for child in tree.children(id) {
            if Some(id) != dissolved {
                adjacency[id].push((*child, tree.length(*child)));
            }
        }
        if let Some(parent) = tree.parent(id) {
            if Some(parent) == dissolved {
                if let Some(other) = dissolved_partner(tree, parent, id) {
                    adjacency[id].push((other, tree.length(id) + tree.length(other)));
                }
            } else {
                adjacency[id].push((parent, tree.length(id)));
            }
        }
    }

    adjacency
}

fn edge_length(adjacency: &[Vec<(NodeId, f64)>], a: NodeId, b: NodeId) -> Option<f64> {
    adjacency
        .get(a)?
        .iter()
        .find(|(next, _)| *next == b)
        .map(|(_, length)| *length)
}

/// Root `tree` at a point on one of its edges.
///
/// Returns `None` when the edge does not exist.
fn reroot(tree: &Tree, point: RootingPoint) -> Option<Tree> {
    let adjacency = build_adjacency(tree);
    let length = edge_length(&adjacency, point.from, point.to)?;
    let fraction = point.fraction.clamp(0.0, 1.0);

    let mut rooted = Tree::empty(tree.id, tree.label.clone());
    rooted.attributes = tree.attributes.clone();
    rooted.nodes.push(TreeNode::new(0, None, None));
    rooted.root = Some(0);

    orient_tree(
        tree,
        &adjacency,
        &mut rooted,
        (point.from, point.to),
        fraction * length,
    );
    orient_tree(
        tree,
        &adjacency,
        &mut rooted,
        (point.to, point.from),
        (1.0 - fraction) * length,
    );
    Some(rooted)
}

/// Append the subtree reached through `edge.0`, looking away from `edge.1`,
/// below the new root.
fn orient_tree(
    tree: &Tree,
    adjacency: &[Vec<(NodeId, f64)>],
    rooted: &mut Tree,
    edge: (NodeId, NodeId),
    length: f64,
) {
    let root = 0;
    let mut stack = vec![(edge.0, edge.1, root, length)];
    while let Some((node, came_from, new_parent, length)) = stack.pop() {
        let new_id = rooted.nodes.len();
        let source_node = &tree.nodes[node];
        let mut new_node = TreeNode::new(new_id, source_node.name.clone(), Some(length));
        new_node.parent = Some(new_parent);
        new_node.attributes = source_node.attributes.clone();
        new_node.source = source_node.source;
        rooted.nodes.push(new_node);
        rooted.nodes[new_parent].children.push(new_id);

        for &(next, next_length) in adjacency[node].iter().rev() {
            if next != came_from {
                stack.push((next, node, new_id, next_length));
            }
        }
    }
}

/// Find the leaf farthest from `start`, returning it with its distance and the
/// path leading to it.
fn farthest_leaf(adjacency: &[Vec<(NodeId, f64)>], start: NodeId) -> (NodeId, f64, Vec<NodeId>) {
    let mut parents: Vec<Option<NodeId>> = vec![None; adjacency.len()];
    let mut best_node = start;
    let mut best_distance = 0.0;

    let mut stack = vec![(start, None, 0.0)];
    while let Some((node, parent, distance)) = stack.pop() {
        parents[node] = parent;
        let mut has_child = false;
        for &(next, weight) in &adjacency[node] {
            if Some(next) == parent {
                continue;
            }
            has_child = true;
            stack.push((next, Some(node), distance + weight));
        }
        if !has_child && distance > best_distance {
            best_distance = distance;
            best_node = node;
        }
    }

    let mut path = vec![best_node];
    let mut current = best_node;
    while let Some(parent) = parents[current] {
        current = parent;
        path.push(current);
    }
    path.reverse();

    (best_node, best_distance, path)
}

/// Point halfway along the longest tip-to-tip path.
fn midpoint(tree: &Tree) -> Option<RootingPoint> {
    let adjacency = build_adjacency(tree);
    let start = tree.external_nodes().into_iter().next()?;
    let (first_leaf, _, _) = farthest_leaf(&adjacency, start);
    let (_, diameter, path) = farthest_leaf(&adjacency, first_leaf);
    if path.len() < 2 || diameter <= f64::EPSILON {
        return None;
    }

    let half = diameter / 2.0;
    let mut traversed = 0.0;
    for window in path.windows(2) {
        let (a, b) = (window[0], window[1]);
        let length = edge_length(&adjacency, a, b).unwrap_or(DEFAULT_BRANCH_LENGTH);
        if traversed + length >= half {
            let fraction = if length > 0.0 {
                (half - traversed) / length
            } else {
                0.0
            };
            return Some(RootingPoint {
                from: a,
                to: b,
                fraction,
            });
        }
        traversed += length;
    }
    None
}

fn sort_branches(tree: &Tree, ordering: BranchOrdering) -> Tree {
    let counts = tree.tip_counts();
    let mut sorted = tree.clone();
    for node in &mut sorted.nodes {
        // Vec::sort_by is stable, so ties keep their original order.
        node.children.sort_by(|a, b| match ordering {
            BranchOrdering::Increasing => counts[*a].cmp(&counts[*b]),
            BranchOrdering::Decreasing => counts[*b].cmp(&counts[*a]),
        });
    }
    renumber(&sorted)
}

/// Copy `tree` with ids reassigned in pre-order.
fn renumber(tree: &Tree) -> Tree {
    let mut renumbered = Tree::empty(tree.id, tree.label.clone());
    renumbered.attributes = tree.attributes.clone();
    let Some(root) = tree.root else {
        return renumbered;
    };

    let mut stack = vec![(root, None)];
    while let Some((old, parent)) = stack.pop() {
        let new_id = renumbered.nodes.len();
        let mut node = tree.nodes[old].clone();
        node.id = new_id;
        node.parent = parent;
        node.children.clear();
        renumbered.nodes.push(node);
        if let Some(parent) = parent {
            renumbered.nodes[parent].children.push(new_id);
        }
        for child in tree.children(old).iter().rev() {
            stack.push((*child, Some(new_id)));
        }
    }
    renumbered.root = Some(0);
    renumbered
}

fn transform_branches(tree: &Tree, transform: BranchTransform) -> Tree {
    let mut transformed = tree.clone();
    match transform {
        BranchTransform::Equal => {
            for node in &mut transformed.nodes {
                if node.parent.is_some() {
                    node.length = Some(1.0);
                }
            }
        }
        BranchTransform::Cladogram => {
            let mut heights = vec![0.0; tree.nodes.len()];
            for id in tree.postorder() {
                heights[id] = tree
                    .children(id)
                    .iter()
                    .map(|child| heights[*child] + 1.0)
                    .fold(0.0, f64::max);
            }
            for id in tree.preorder() {
                if let Some(parent) = tree.parent(id) {
                    transformed.nodes[id].length = Some(heights[parent] - heights[id]);
                }
            }
        }
        BranchTransform::Proportional => {
            let mut depths = vec![0.0; tree.nodes.len()];
            let mut max_depth: f64 = 0.0;
            for id in tree.preorder() {
                if let Some(parent) = tree.parent(id) {
                    depths[id] = depths[parent] + tree.length(id);
                }
                if tree.is_external(id) {
                    max_depth = max_depth.max(depths[id]);
                }
            }
            for id in tree.preorder() {
                if tree.parent(id).is_none() {
                    continue;
                }
                let mut length = tree.length(id);
                if tree.is_external(id) {
                    length += max_depth - depths[id];
                }
                transformed.nodes[id].length = Some(length);
            }
        }
    }
    transformed
}

/// Write an attribute to a display node and to the loaded node it came from.
pub fn write_through(
    source: &mut Tree,
    derived: &mut Tree,
    node: NodeId,
    key: &str,
    value: Option<AttributeValue>,
) {
    let source_id = derived.node(node).and_then(|n| n.source);
    for (tree, id) in [(derived, Some(node)), (source, source_id)] {
        let Some(target) = id.and_then(|id| tree.node_mut(id)) else {
            continue;
        };
        match &value {
            Some(value) => target.set_attribute(key, value.clone()),
            None => {
                target.remove_attribute(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::tree::test_support::{node_named, tree_from_newick};

    fn canonical(tree: &Tree, node: NodeId) -> String {
        let length = tree.nodes[node]
            .length
            .map(|l| format!("{l:.6}"))
            .unwrap_or_default();
        if tree.is_external(node) {
            return format!("{}:{}", tree.nodes[node].name.clone().unwrap_or_default(), length);
        }
        let mut children: Vec<String> = tree
            .children(node)
            .iter()
            .map(|child| canonical(tree, *child))
            .collect();
        children.sort();
        format!("({}):{}", children.join(","), length)
    }

    fn canonical_tree(tree: &Tree) -> String {
        let root = tree.root.unwrap();
        let mut children: Vec<String> = tree
            .children(root)
            .iter()
            .map(|child| canonical(tree, *child))
            .collect();
        children.sort();
        children.join(",")
    }

    #[test]
    fn identity_settings_copy_the_tree() {
        let source = tree_from_newick("((A:1,B:2):1,C:3);");
        let derived = derive_display_tree(&source, &TransformSettings::default());
        assert_eq!(canonical_tree(&derived), canonical_tree(&source));
        for node in &derived.nodes {
            assert_eq!(node.source, Some(node.id));
        }
    }

    #[test]
    fn rooting_at_original_root_and_clearing_is_isomorphic() {
        let source = tree_from_newick("((A:1,B:2):1,(C:3,D:1):2);");
        let mut settings = TransformSettings {
            rooting_on: true,
            rooting: original_root_point(&source),
            ..TransformSettings::default()
        };
        let rooted = derive_display_tree(&source, &settings);
        assert_eq!(canonical_tree(&rooted), canonical_tree(&source));

        settings.rooting = None;
        let cleared = derive_display_tree(&source, &settings);
        assert_eq!(canonical_tree(&cleared), canonical_tree(&source));
    }

    #[test]
    fn user_rooting_splits_the_edge() {
        let source = tree_from_newick("((A:1,B:2):1,(C:3,D:1):2);");
        let a = node_named(&source, "A");
        let parent = source.parent(a).unwrap();
        let settings = TransformSettings {
            rooting_on: true,
            rooting: Some(RootingPoint {
                from: parent,
                to: a,
                fraction: 0.25,
            }),
            ..TransformSettings::default()
        };
        let derived = derive_display_tree(&source, &settings);
        let root = derived.root.unwrap();
        assert_eq!(derived.nodes[root].source, None);
        let children = derived.children(root);
        assert_eq!(children.len(), 2);
        let lengths: Vec<f64> = children.iter().map(|c| derived.length(*c)).collect();
        assert!((lengths[0] - 0.25).abs() < 1e-12);
        assert!((lengths[1] - 0.75).abs() < 1e-12);
        assert_eq!(derived.nodes[children[1]].name.as_deref(), Some("A"));
        assert_eq!(derived.leaf_count(), 4);
    }

    #[test]
    fn stale_rooting_falls_back_to_original_root() {
        let source = tree_from_newick("((A:1,B:2):1,C:3);");
        let settings = TransformSettings {
            rooting_on: true,
            rooting: Some(RootingPoint {
                from: 0,
                to: 99,
                fraction: 0.5,
            }),
            ..TransformSettings::default()
        };
        let derived = derive_display_tree(&source, &settings);
        assert_eq!(canonical_tree(&derived), canonical_tree(&source));
    }

    #[test]
    fn midpoint_root_balances_the_diameter() {
        let source = tree_from_newick("((A:1,B:1):1,C:9);");
        let settings = TransformSettings {
            rooting_on: true,
            rooting_type: RootingType::MidPoint,
            ..TransformSettings::default()
        };
        let derived = derive_display_tree(&source, &settings);
        let heights = derived.node_heights();
        let c = node_named(&derived, "C");
        let a = node_named(&derived, "A");
        let root = derived.root.unwrap();
        // Both ends of the diameter (A or B, and C) sit 5.5 below the root.
        assert!((heights[root] - heights[c] - 5.5).abs() < 1e-9);
        assert!((heights[root] - heights[a] - 5.5).abs() < 1e-9);
    }

    #[test]
    fn ordering_is_stable_for_ties() {
        let source = tree_from_newick("((A:1,B:1):1,C:1,D:1,(E:1,F:1,G:1):1);");
        let settings = TransformSettings {
            order_branches_on: true,
            branch_ordering: BranchOrdering::Increasing,
            ..TransformSettings::default()
        };
        let derived = derive_display_tree(&source, &settings);
        let names: Vec<_> = derived
            .external_nodes()
            .into_iter()
            .filter_map(|id| derived.nodes[id].name.clone())
            .collect();
        assert_eq!(names, vec!["C", "D", "A", "B", "E", "F", "G"]);

        let decreasing = derive_display_tree(
            &source,
            &TransformSettings {
                branch_ordering: BranchOrdering::Decreasing,
                ..settings
            },
        );
        let first = decreasing.external_nodes()[0];
        assert_eq!(decreasing.nodes[first].name.as_deref(), Some("E"));
    }

    #[test]
    fn missing_lengths_force_the_branch_transform() {
        let source = tree_from_newick("((A,B),(C,(D,E)));");
        let settings = TransformSettings::default();
        let chain = TransformChain::from_settings(&settings, &source);
        assert_eq!(
            chain.stages(),
            &[TransformStage::Transform(BranchTransform::Cladogram)]
        );
        let derived = chain.apply(&source);
        for node in &derived.nodes {
            if node.parent.is_some() {
                assert!(node.length.is_some());
            }
        }
        let heights = derived.node_heights();
        for tip in derived.external_nodes() {
            assert!(heights[tip].abs() < 1e-12);
        }
        assert!((derived.root_height() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn proportional_transform_aligns_tips() {
        let source = tree_from_newick("((A:1,B:2):1,C:1);");
        let derived = derive_display_tree(
            &source,
            &TransformSettings {
                transform_branches_on: true,
                branch_transform: BranchTransform::Proportional,
                ..TransformSettings::default()
            },
        );
        let heights = derived.node_heights();
        for tip in derived.external_nodes() {
            assert!(heights[tip].abs() < 1e-12);
        }
    }

    #[test]
    fn picking_the_split_branch_moves_along_the_same_edge() {
        let source = tree_from_newick("((A:1,B:2):1,(C:3,D:1):2);");
        let a = node_named(&source, "A");
        let parent = source.parent(a).unwrap();
        let point = RootingPoint {
            from: parent,
            to: a,
            fraction: 0.5,
        };
        let settings = TransformSettings {
            rooting_on: true,
            rooting: Some(point),
            ..TransformSettings::default()
        };
        let derived = derive_display_tree(&source, &settings);
        let derived_a = node_named(&derived, "A");
        let moved =
            rooting_point_for_branch(&source, &derived, derived_a, 0.5, Some(point)).unwrap();
        assert_eq!((moved.from, moved.to), (parent, a));
        assert!((moved.fraction - 0.75).abs() < 1e-12);
    }

    #[test]
    fn attribute_writes_reach_the_source_node() {
        let mut source = tree_from_newick("((A:1,B:2):1,C:3);");
        let mut derived = derive_display_tree(
            &source,
            &TransformSettings {
                order_branches_on: true,
                branch_ordering: BranchOrdering::Increasing,
                ..TransformSettings::default()
            },
        );
        let c = node_named(&derived, "C");
        write_through(
            &mut source,
            &mut derived,
            c,
            "label",
            Some(AttributeValue::Text("x".into())),
        );
        let source_c = node_named(&source, "C");
        assert!(source.nodes[source_c].attribute("label").is_some());
        assert!(derived.nodes[c].attribute("label").is_some());
    }

    fn newick_strategy() -> impl Strategy<Value = String> {
        (3usize..10, prop::collection::vec((0usize..64, 0usize..64, 1u32..5), 9)).prop_map(
            |(tips, merges)| {
                let mut parts: Vec<String> =
                    (0..tips).map(|i| format!("T{i}:{}", 1 + i % 3)).collect();
                for (a, b, length) in merges {
                    if parts.len() <= 2 {
                        break;
                    }
                    let first = parts.remove(a % parts.len());
                    let second = parts.remove(b % parts.len());
                    parts.push(format!("({first},{second}):{length}"));
                }
                while parts.len() > 2 {
                    let first = parts.remove(0);
                    let second = parts.remove(0);
                    parts.push(format!("({first},{second}):1"));
                }
                let text = parts.join(",");
                format!("({text});")
            },
        )
    }

    proptest! {
        #[test]
        fn rerooting_keeps_every_tip(newick in newick_strategy(), pick in 0usize..64, fraction in 0.0f64..1.0) {
            let source = tree_from_newick(&newick);
            let candidates: Vec<NodeId> = source
                .preorder()
                .into_iter()
                .filter(|id| source.parent(*id).is_some())
                .collect();
            let node = candidates[pick % candidates.len()];
            let derived_source = derive_display_tree(&source, &TransformSettings::default());
            let point = rooting_point_for_branch(&source, &derived_source, node, fraction, None);
            prop_assume!(point.is_some());
            let derived = derive_display_tree(&source, &TransformSettings {
                rooting_on: true,
                rooting: point,
                ..TransformSettings::default()
            });
            prop_assert_eq!(derived.leaf_count(), source.leaf_count());
            let total_source: f64 = source.preorder().iter().filter(|id| source.parent(**id).is_some()).map(|id| source.length(*id)).sum();
            let total_derived: f64 = derived.preorder().iter().filter(|id| derived.parent(**id).is_some()).map(|id| derived.length(*id)).sum();
            prop_assert!((total_source - total_derived).abs() < 1e-9);
        }
    }
}
