//! Whole-forest invariant assertions. Used by tests; cheap enough to run
//! after any suspect sequence of operations.

use std::collections::HashSet;

use crate::tree::{TreeState, ViewId};

#[derive(Debug, Clone)]
pub struct InvariantViolation {
    pub msg: String,
}

fn violation(msg: String) -> InvariantViolation {
    InvariantViolation { msg }
}

/// Check every structural invariant: single-parent acyclic forest, mutual
/// parent/child consistency, per-view membership, and tab-index bijection.
pub fn assert_forest_invariants(state: &TreeState) -> Result<(), InvariantViolation> {
    for (id, node) in &state.nodes {
        if *id != node.id {
            return Err(violation(format!("node {} stored under key {}", node.id, id)));
        }
        if let Some(p) = node.parent {
            let parent = state
                .nodes
                .get(&p)
                .ok_or_else(|| violation(format!("node {} has missing parent {}", id, p)))?;
            if parent.children.iter().filter(|c| **c == *id).count() != 1 {
                return Err(violation(format!("node {} not listed exactly once by parent {}", id, p)));
            }
            if parent.view != node.view || parent.window != node.window {
                return Err(violation(format!("node {} crosses view/window from parent {}", id, p)));
            }
        }
        for child in &node.children {
            let c = state
                .nodes
                .get(child)
                .ok_or_else(|| violation(format!("node {} lists missing child {}", id, child)))?;
            if c.parent != Some(*id) {
                return Err(violation(format!("child {} does not point back at {}", child, id)));
            }
        }
        match state.tab_index.get(&node.backing_tab) {
            Some(r) if r.node == *id && r.view == node.view => {}
            _ => return Err(violation(format!("tab index out of sync for node {}", id))),
        }
    }
    if state.tab_index.len() != state.nodes.len() {
        return Err(violation(format!(
            "tab index has {} entries for {} nodes",
            state.tab_index.len(),
            state.nodes.len()
        )));
    }

    // Every node reachable exactly once from its view's roots: acyclic, no
    // orphans, no double links.
    let mut seen: HashSet<u64> = HashSet::new();
    for (vid, view) in &state.views {
        let mut stack: Vec<u64> = view.roots.clone();
        for root in &view.roots {
            let r = state
                .nodes
                .get(root)
                .ok_or_else(|| violation(format!("view {} lists missing root {}", vid, root)))?;
            if r.parent.is_some() {
                return Err(violation(format!("root {} of view {} has a parent", root, vid)));
            }
        }
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                return Err(violation(format!("node {} reached twice", id)));
            }
            let node = &state.nodes[&id];
            if node.view != *vid {
                return Err(violation(format!("node {} reached from foreign view {}", id, vid)));
            }
            stack.extend(node.children.iter().copied());
        }
    }
    if seen.len() != state.nodes.len() {
        return Err(violation(format!(
            "{} of {} nodes reachable from roots",
            seen.len(),
            state.nodes.len()
        )));
    }
    for vid in state.views.keys() {
        view_belongs(state, *vid)?;
    }
    Ok(())
}

fn view_belongs(state: &TreeState, view: ViewId) -> Result<(), InvariantViolation> {
    let v = &state.views[&view];
    let listed = state
        .windows
        .get(&v.window)
        .map(|ctx| ctx.views.contains(&view))
        .unwrap_or(false);
    if !listed {
        return Err(violation(format!("view {} not listed by window {}", view, v.window)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{Node, TreeStore};

    #[test]
    fn clean_forest_passes() {
        let mut s = TreeStore::new();
        let view = s.ensure_window(1);
        let a = s.alloc_node_id();
        s.insert_node(Node::new(a, 10, view, 1), None, 0).unwrap();
        let b = s.alloc_node_id();
        s.insert_node(Node::new(b, 11, view, 1), Some(a), 0).unwrap();
        assert!(assert_forest_invariants(s.state()).is_ok());
    }

    #[test]
    fn dangling_parent_is_caught() {
        let mut s = TreeStore::new();
        let view = s.ensure_window(1);
        let a = s.alloc_node_id();
        s.insert_node(Node::new(a, 10, view, 1), None, 0).unwrap();
        let mut state = s.state().clone();
        state.nodes.get_mut(&a).unwrap().parent = Some(999);
        assert!(assert_forest_invariants(&state).is_err());
    }
}
