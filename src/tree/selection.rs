//! Node and tip selection.
//!
//! The model keeps two disjoint-purpose sets: selected nodes (drawn as
//! highlighted branches) and selected tips (drawn as highlighted labels). All
//! operations take the display tree they refer to; ids that are not in that
//! tree are ignored.

use std::collections::BTreeSet;
use std::rc::Weak;

use log::debug;

use super::events::{Listeners, TreeSelectionListener};
use super::{NodeId, Tree};

/// How a pointer pick is turned into a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionMode {
    /// The picked node only.
    #[default]
    Nodes,
    /// The picked node and everything below it.
    Clade,
    /// The tips below the picked node. Extend has no effect, since no nodes
    /// stay selected in this mode.
    Tips,
    /// The tips below the picked node, toggled one by one.
    Taxa,
}

impl SelectionMode {
    pub const ALL: [SelectionMode; 4] = [
        SelectionMode::Nodes,
        SelectionMode::Clade,
        SelectionMode::Tips,
        SelectionMode::Taxa,
    ];

    pub fn label(self) -> &'static str {
        match self {
            SelectionMode::Nodes => "Nodes",
            SelectionMode::Clade => "Clade",
            SelectionMode::Tips => "Tips",
            SelectionMode::Taxa => "Taxa",
        }
    }

    pub fn selects_tips(self) -> bool {
        matches!(self, SelectionMode::Tips | SelectionMode::Taxa)
    }

    /// Node and clade modes swap when the alternate modifier is held.
    pub fn alternate(self) -> Self {
        match self {
            SelectionMode::Nodes => SelectionMode::Clade,
            SelectionMode::Clade => SelectionMode::Nodes,
            other => other,
        }
    }
}

#[derive(Debug, Default)]
pub struct SelectionModel {
    selected_nodes: BTreeSet<NodeId>,
    selected_tips: BTreeSet<NodeId>,
    revision: u64,
    listeners: Listeners<dyn TreeSelectionListener>,
}

impl SelectionModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected_nodes(&self) -> &BTreeSet<NodeId> {
        &self.selected_nodes
    }

    pub fn selected_tips(&self) -> &BTreeSet<NodeId> {
        &self.selected_tips
    }

    pub fn has_selection(&self) -> bool {
        !self.selected_nodes.is_empty() || !self.selected_tips.is_empty()
    }

    /// Bumped by every mutation. Cached highlight geometry keyed on an older
    /// revision is stale.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn add_listener(&mut self, listener: Weak<dyn TreeSelectionListener>) {
        self.listeners.add(listener);
    }

    pub fn set_selected_node(&mut self, tree: &Tree, node: NodeId) {
        self.clear_sets();
        self.amend_node(tree, node, false, false);
        self.changed();
    }

    pub fn set_selected_tip(&mut self, tree: &Tree, node: NodeId) {
        self.clear_sets();
        self.amend_node(tree, node, false, false);
        self.tips_from_nodes(tree);
        self.changed();
    }

    pub fn set_selected_clade(&mut self, tree: &Tree, node: NodeId) {
        self.clear_sets();
        self.amend_clade(tree, node, false, false);
        self.changed();
    }

    pub fn set_selected_tips(&mut self, tree: &Tree, node: NodeId) {
        self.clear_sets();
        self.add_child_tips(tree, node, false);
        self.changed();
    }

    pub fn add_selected_node(&mut self, tree: &Tree, node: NodeId, toggle: bool, extend: bool) {
        self.amend_node(tree, node, toggle, extend);
        self.changed();
    }

    pub fn add_selected_tip(&mut self, tree: &Tree, node: NodeId, toggle: bool, extend: bool) {
        self.amend_node(tree, node, toggle, extend);
        self.tips_from_nodes(tree);
        self.changed();
    }

    pub fn add_selected_clade(&mut self, tree: &Tree, node: NodeId, toggle: bool, extend: bool) {
        self.amend_clade(tree, node, toggle, extend);
        self.changed();
    }

    /// Add, or toggle, every tip below `node`.
    pub fn add_selected_tips(&mut self, tree: &Tree, node: NodeId, toggle: bool) {
        self.add_child_tips(tree, node, toggle);
        self.changed();
    }

    /// Apply a pointer pick according to `mode`.
    pub fn select_with_mode(
        &mut self,
        tree: &Tree,
        node: NodeId,
        mode: SelectionMode,
        toggle: bool,
        extend: bool,
    ) {
        match mode {
            SelectionMode::Nodes => self.add_selected_node(tree, node, toggle, extend),
            SelectionMode::Clade => self.add_selected_clade(tree, node, toggle, extend),
            SelectionMode::Tips => self.add_selected_tip(tree, node, toggle, extend),
            SelectionMode::Taxa => self.add_selected_tips(tree, node, toggle),
        }
    }

    /// Grow every selected node into its whole clade.
    pub fn select_clades_from_selected_nodes(&mut self, tree: &Tree) {
        let nodes = std::mem::take(&mut self.selected_nodes);
        for node in nodes {
            self.amend_clade(tree, node, false, false);
        }
        self.changed();
    }

    /// Replace the selected nodes with the tips below them.
    pub fn select_tips_from_selected_nodes(&mut self, tree: &Tree) {
        self.tips_from_nodes(tree);
        self.changed();
    }

    /// Replace the selected tips with the clade of their common ancestor.
    pub fn select_nodes_from_selected_tips(&mut self, tree: &Tree) {
        if let Some(ancestor) = tree.common_ancestor(self.selected_tips.iter().copied()) {
            self.amend_clade(tree, ancestor, false, false);
        }
        self.selected_tips.clear();
        self.changed();
    }

    /// Convert the current selection when the pick mode changes between node
    /// and tip based modes.
    pub fn convert_for_mode(&mut self, tree: &Tree, from: SelectionMode, to: SelectionMode) {
        match (from.selects_tips(), to.selects_tips()) {
            (false, true) => self.select_tips_from_selected_nodes(tree),
            (true, false) => {
                self.select_nodes_from_selected_tips(tree);
                if to == SelectionMode::Nodes {
                    // a tip set maps to a single node in node mode
                    if let Some(ancestor) = tree.common_ancestor(self.selected_nodes.iter().copied())
                    {
                        self.selected_nodes.clear();
                        self.selected_nodes.insert(ancestor);
                        self.changed();
                    }
                }
            }
            (false, false) if to == SelectionMode::Clade && from != to => {
                self.select_clades_from_selected_nodes(tree)
            }
            _ => {}
        }
    }

    pub fn select_all_taxa(&mut self, tree: &Tree) {
        self.selected_tips.extend(tree.external_nodes());
        self.changed();
    }

    pub fn select_all_nodes(&mut self, tree: &Tree) {
        self.selected_nodes.extend(tree.preorder());
        self.changed();
    }

    pub fn clear_selection(&mut self) {
        self.clear_sets();
        self.changed();
    }

    /// Drop ids that no longer belong to `tree`, for instance after the
    /// display tree was derived again.
    pub fn retain_in(&mut self, tree: &Tree) {
        let before = self.selected_nodes.len() + self.selected_tips.len();
        self.selected_nodes.retain(|node| tree.contains(*node));
        self.selected_tips
            .retain(|node| tree.contains(*node) && tree.is_external(*node));
        if self.selected_nodes.len() + self.selected_tips.len() != before {
            self.changed();
        }
    }

    fn clear_sets(&mut self) {
        self.selected_nodes.clear();
        self.selected_tips.clear();
    }

    /// Nodes on the paths from the current selection and `node` up to, but
    /// excluding, their common ancestor.
    fn extension_path(&self, tree: &Tree, node: NodeId) -> Vec<NodeId> {
        let mut members = self.selected_nodes.clone();
        members.insert(node);
        let Some(ancestor) = tree.common_ancestor(members.iter().copied()) else {
            return Vec::new();
        };
        let mut path = Vec::new();
        for member in members {
            let mut current = Some(member);
            while let Some(id) = current {
                if id == ancestor {
                    break;
                }
                path.push(id);
                current = tree.parent(id);
            }
        }
        path
    }

    fn amend_node(&mut self, tree: &Tree, node: NodeId, toggle: bool, extend: bool) {
        if !tree.contains(node) {
            return;
        }
        if extend && !self.selected_nodes.is_empty() {
            let path = self.extension_path(tree, node);
            self.selected_nodes.extend(path);
        } else if toggle && self.selected_nodes.contains(&node) {
            self.selected_nodes.remove(&node);
        } else {
            self.selected_nodes.insert(node);
        }
    }

    fn amend_clade(&mut self, tree: &Tree, node: NodeId, toggle: bool, extend: bool) {
        if !tree.contains(node) {
            return;
        }
        if extend && !self.selected_nodes.is_empty() {
            for member in self.extension_path(tree, node) {
                self.amend_clade(tree, member, toggle, false);
            }
            return;
        }
        self.amend_node(tree, node, toggle, false);
        let mut stack: Vec<NodeId> = tree.children(node).to_vec();
        while let Some(child) = stack.pop() {
            self.amend_node(tree, child, toggle, false);
            stack.extend_from_slice(tree.children(child));
        }
    }

    fn add_child_tips(&mut self, tree: &Tree, node: NodeId, toggle: bool) {
        if !tree.contains(node) {
            return;
        }
        for tip in tree.descendant_tips(node) {
            if toggle && self.selected_tips.contains(&tip) {
                self.selected_tips.remove(&tip);
            } else {
                self.selected_tips.insert(tip);
            }
        }
    }

    fn tips_from_nodes(&mut self, tree: &Tree) {
        let nodes = std::mem::take(&mut self.selected_nodes);
        for node in nodes {
            self.add_child_tips(tree, node, false);
        }
    }

    fn changed(&mut self) {
        self.revision = self.revision.wrapping_add(1);
        debug!(
            "selection: {} node(s), {} tip(s)",
            self.selected_nodes.len(),
            self.selected_tips.len()
        );
        self.listeners.fire(|listener| listener.selection_changed());
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use proptest::prelude::*;

    use super::*;
    use crate::tree::test_support::{node_named, tree_from_newick};

    fn sample() -> Tree {
        tree_from_newick("(((A:1,B:1):1,C:2):1,(D:1,(E:1,F:1):1):1);")
    }

    fn names(tree: &Tree, ids: &BTreeSet<NodeId>) -> Vec<String> {
        let mut names: Vec<String> = ids
            .iter()
            .filter_map(|id| tree.nodes[*id].name.clone())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn toggle_removes_a_selected_node() {
        let tree = sample();
        let a = node_named(&tree, "A");
        let mut selection = SelectionModel::new();
        selection.add_selected_node(&tree, a, true, false);
        assert!(selection.selected_nodes().contains(&a));
        selection.add_selected_node(&tree, a, true, false);
        assert!(!selection.has_selection());
    }

    #[test]
    fn extend_selects_the_connecting_path() {
        let tree = sample();
        let a = node_named(&tree, "A");
        let c = node_named(&tree, "C");
        let ab = tree.parent(a).unwrap();
        let abc = tree.parent(c).unwrap();

        let mut selection = SelectionModel::new();
        selection.add_selected_node(&tree, a, false, false);
        selection.add_selected_node(&tree, c, false, true);

        let expected: BTreeSet<NodeId> = [a, ab, c].into_iter().collect();
        assert_eq!(selection.selected_nodes(), &expected);
        assert!(!selection.selected_nodes().contains(&abc));
    }

    #[test]
    fn clade_selection_covers_descendants() {
        let tree = sample();
        let e = node_named(&tree, "E");
        let def = tree.parent(node_named(&tree, "D")).unwrap();
        let mut selection = SelectionModel::new();
        selection.set_selected_clade(&tree, def);
        assert_eq!(selection.selected_nodes().len(), 5);
        assert!(selection.selected_nodes().contains(&e));

        // toggling the clade again removes every member
        selection.add_selected_clade(&tree, def, true, false);
        assert!(!selection.has_selection());
    }

    #[test]
    fn extended_clades_stay_whole() {
        let tree = sample();
        let mut selection = SelectionModel::new();
        selection.add_selected_clade(&tree, node_named(&tree, "A"), false, false);
        selection.add_selected_clade(&tree, node_named(&tree, "C"), false, true);
        assert!(selection.selected_nodes().contains(&node_named(&tree, "B")));

        selection.add_selected_clade(&tree, node_named(&tree, "F"), false, true);
        for node in selection.selected_nodes() {
            for child in tree.children(*node) {
                assert!(
                    selection.selected_nodes().contains(child),
                    "node {node} is selected but its child {child} is not"
                );
            }
        }
        assert_eq!(
            names(&tree, selection.selected_nodes()),
            ["A", "B", "C", "D", "E", "F"]
        );
        assert!(!selection.selected_nodes().contains(&tree.root.unwrap()));
    }

    #[test]
    fn extending_in_tip_mode_adds_only_the_pick() {
        let tree = sample();
        let mut selection = SelectionModel::new();
        selection.select_with_mode(&tree, node_named(&tree, "A"), SelectionMode::Tips, false, false);
        selection.select_with_mode(&tree, node_named(&tree, "C"), SelectionMode::Tips, false, true);
        assert_eq!(names(&tree, selection.selected_tips()), ["A", "C"]);
        assert!(selection.selected_nodes().is_empty());
    }

    #[test]
    fn node_to_tip_conversion_clears_nodes() {
        let tree = sample();
        let ab = tree.parent(node_named(&tree, "A")).unwrap();
        let mut selection = SelectionModel::new();
        selection.set_selected_node(&tree, ab);
        selection.select_tips_from_selected_nodes(&tree);
        assert!(selection.selected_nodes().is_empty());
        assert_eq!(names(&tree, selection.selected_tips()), vec!["A", "B"]);
    }

    #[test]
    fn tips_to_nodes_picks_the_common_clade() {
        let tree = sample();
        let mut selection = SelectionModel::new();
        selection.add_selected_tips(&tree, node_named(&tree, "A"), false);
        selection.add_selected_tips(&tree, node_named(&tree, "C"), false);
        selection.select_nodes_from_selected_tips(&tree);
        assert!(selection.selected_tips().is_empty());
        // A, B, C, (A,B) and ((A,B),C)
        assert_eq!(selection.selected_nodes().len(), 5);
    }

    #[test]
    fn taxa_mode_toggles_each_tip() {
        let tree = sample();
        let ab = tree.parent(node_named(&tree, "A")).unwrap();
        let mut selection = SelectionModel::new();
        selection.add_selected_tips(&tree, node_named(&tree, "A"), false);
        selection.select_with_mode(&tree, ab, SelectionMode::Taxa, true, false);
        assert_eq!(names(&tree, selection.selected_tips()), vec!["B"]);
    }

    #[test]
    fn mode_switch_converts_selection() {
        let tree = sample();
        let ab = tree.parent(node_named(&tree, "A")).unwrap();
        let mut selection = SelectionModel::new();
        selection.set_selected_node(&tree, ab);
        selection.convert_for_mode(&tree, SelectionMode::Nodes, SelectionMode::Taxa);
        assert_eq!(names(&tree, selection.selected_tips()), vec!["A", "B"]);
        selection.convert_for_mode(&tree, SelectionMode::Taxa, SelectionMode::Nodes);
        assert!(selection.selected_tips().is_empty());
        assert_eq!(
            selection.selected_nodes().iter().copied().collect::<Vec<_>>(),
            vec![ab]
        );
    }

    #[test]
    fn select_all_and_clear() {
        let tree = sample();
        let mut selection = SelectionModel::new();
        selection.select_all_taxa(&tree);
        assert_eq!(selection.selected_tips().len(), 6);
        selection.select_all_nodes(&tree);
        assert_eq!(selection.selected_nodes().len(), tree.nodes.len());
        selection.clear_selection();
        assert!(!selection.has_selection());
    }

    struct Counter(Cell<usize>);

    impl TreeSelectionListener for Counter {
        fn selection_changed(&self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn every_mutation_notifies_and_bumps_revision() {
        let tree = sample();
        let counter = Rc::new(Counter(Cell::new(0)));
        let weak: Weak<dyn TreeSelectionListener> = Rc::downgrade(&counter) as Weak<_>;
        let mut selection = SelectionModel::new();
        selection.add_listener(weak);

        let start = selection.revision();
        selection.set_selected_node(&tree, node_named(&tree, "A"));
        selection.select_tips_from_selected_nodes(&tree);
        selection.clear_selection();
        assert_eq!(counter.0.get(), 3);
        assert_eq!(selection.revision(), start + 3);
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let tree = sample();
        let mut selection = SelectionModel::new();
        selection.add_selected_node(&tree, 999, false, false);
        selection.add_selected_clade(&tree, 999, false, true);
        assert!(!selection.has_selection());
        selection.select_nodes_from_selected_tips(&tree);
        assert!(!selection.has_selection());
    }

    proptest! {
        #[test]
        fn clade_tips_survive_a_round_trip(pick in 0usize..11) {
            let tree = sample();
            let node = pick % tree.nodes.len();
            let mut selection = SelectionModel::new();
            selection.set_selected_tips(&tree, node);
            let tips = selection.selected_tips().clone();

            selection.select_nodes_from_selected_tips(&tree);
            selection.select_tips_from_selected_nodes(&tree);
            prop_assert_eq!(selection.selected_tips(), &tips);
        }

        #[test]
        fn extended_selection_is_connected(first in 0usize..11, second in 0usize..11) {
            let tree = sample();
            let (a, b) = (first % tree.nodes.len(), second % tree.nodes.len());
            let mut selection = SelectionModel::new();
            selection.add_selected_node(&tree, a, false, false);
            selection.add_selected_node(&tree, b, false, true);

            let selected = selection.selected_nodes();
            prop_assert!(selected.contains(&a));
            prop_assert!(selected.contains(&b) || a == b || tree.is_ancestor_of(b, a));
            // every selected node except the topmost has its parent selected,
            // or its parent is the excluded common ancestor
            let ancestor = tree.common_ancestor([a, b]).unwrap();
            for node in selected {
                if *node == ancestor {
                    continue;
                }
                let parent = tree.parent(*node).unwrap();
                prop_assert!(selected.contains(&parent) || parent == ancestor);
            }
        }
    }
}
