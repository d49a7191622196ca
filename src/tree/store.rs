//! Authoritative in-memory forest plus lookup indices.
//!
//! Every mutation validates before touching state: a call that would violate
//! a structural invariant fails and leaves the store unchanged. Callers run
//! on the single-writer queue, so each call is atomic with respect to every
//! other call.

use super::error::TreeError;
use super::node::{Node, NodeId, TabId, TabRef, TreeState, View, ViewId, WindowContext, WindowId};

pub struct TreeStore {
    state: TreeState,
}

impl TreeStore {
    pub fn new() -> Self {
        Self { state: TreeState::new() }
    }

    pub fn from_state(state: TreeState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &TreeState {
        &self.state
    }

    pub fn into_state(self) -> TreeState {
        self.state
    }

    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.state.nodes.get(&id)
    }

    pub fn get_node_by_tab(&self, tab: TabId) -> Option<&Node> {
        let r = self.state.tab_index.get(&tab)?;
        self.state.nodes.get(&r.node)
    }

    /// Insert a new node, linking it at the end of its parent's children (or
    /// the view's roots), or update an existing one in place. A parent change
    /// on an existing node relinks it at the end of the new parent. The
    /// stored `children` list and `group` marker of an existing node are
    /// preserved: children are derived from other nodes' parent fields, and
    /// group markers are set only at group synthesis.
    pub fn upsert_node(&mut self, node: Node) -> Result<(), TreeError> {
        if let Some(existing) = self.state.tab_index.get(&node.backing_tab) {
            if existing.node != node.id {
                return Err(TreeError::DuplicateBackingTab { tab: node.backing_tab, node: existing.node });
            }
        }
        self.validate_parent_link(node.id, node.parent, node.view, node.window)?;
        if !self.state.views.contains_key(&node.view) {
            return Err(TreeError::NodeNotFound { node: node.view });
        }

        match self.state.nodes.get(&node.id) {
            None => {
                let id = node.id;
                let parent = node.parent;
                let view = node.view;
                let mut fresh = node;
                fresh.children = Vec::new();
                self.state.tab_index.insert(fresh.backing_tab, TabRef { view, node: id });
                self.state.nodes.insert(id, fresh);
                self.link(id, parent, view, usize::MAX);
                Ok(())
            }
            Some(current) => {
                if current.view != node.view || current.window != node.window {
                    return Err(TreeError::CrossViewReparent {
                        node: node.id,
                        from: current.view,
                        to: node.view,
                    });
                }
                let old_parent = current.parent;
                let old_tab = current.backing_tab;
                let old_children = current.children.clone();
                let old_group = current.group.clone();
                let view = current.view;
                if old_tab != node.backing_tab {
                    self.state.tab_index.remove(&old_tab);
                    self.state.tab_index.insert(node.backing_tab, TabRef { view, node: node.id });
                }
                let id = node.id;
                let relink = old_parent != node.parent;
                let mut stored = node;
                stored.children = old_children;
                stored.group = old_group;
                if relink {
                    self.unlink(id);
                }
                let parent = stored.parent;
                self.state.nodes.insert(id, stored);
                if relink {
                    self.link(id, parent, view, usize::MAX);
                }
                Ok(())
            }
        }
    }

    /// Remove a node. Its children are promoted in place: spliced into the
    /// removed node's former slot, preserving their relative order. Root
    /// removal promotes children to roots.
    pub fn remove_node(&mut self, id: NodeId) -> Result<Node, TreeError> {
        let (parent, view) = match self.state.nodes.get(&id) {
            Some(n) => (n.parent, n.view),
            None => return Err(TreeError::NodeNotFound { node: id }),
        };
        let index = self.unlink(id);
        let node = self.state.nodes.remove(&id).expect("node vanished mid-removal");
        for (i, child) in node.children.iter().enumerate() {
            if let Some(c) = self.state.nodes.get_mut(child) {
                c.parent = parent;
                self.splice(*child, parent, view, index + i);
            }
        }
        self.state.tab_index.remove(&node.backing_tab);
        Ok(node)
    }

    /// Replace the child order under `parent` (or the view's roots when
    /// `parent` is `None`). `ordered` must be a permutation of the current
    /// children; anything else references an element that is not there.
    pub fn reorder_children(
        &mut self,
        view: ViewId,
        parent: Option<NodeId>,
        ordered: &[NodeId],
    ) -> Result<(), TreeError> {
        let current = match parent {
            Some(p) => match self.state.nodes.get(&p) {
                Some(n) => &n.children,
                None => return Err(TreeError::NodeNotFound { node: p }),
            },
            None => match self.state.views.get(&view) {
                Some(v) => &v.roots,
                None => return Err(TreeError::NodeNotFound { node: view }),
            },
        };
        for id in ordered {
            if !current.contains(id) {
                return Err(TreeError::NodeNotFound { node: *id });
            }
        }
        for id in current {
            if !ordered.contains(id) {
                return Err(TreeError::NodeNotFound { node: *id });
            }
        }
        if current.len() != ordered.len() {
            // Same membership but different length means duplicates.
            return Err(TreeError::NodeNotFound { node: parent.unwrap_or(view) });
        }
        match parent {
            Some(p) => self.state.nodes.get_mut(&p).expect("parent vanished").children = ordered.to_vec(),
            None => self.state.views.get_mut(&view).expect("view vanished").roots = ordered.to_vec(),
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Primitives for the mutation engine
    // ------------------------------------------------------------------

    /// Insert a freshly created node at `index` under `parent` (or the view
    /// roots). Validates backing-tab uniqueness and the parent link.
    pub(crate) fn insert_node(
        &mut self,
        node: Node,
        parent: Option<NodeId>,
        index: usize,
    ) -> Result<NodeId, TreeError> {
        if let Some(existing) = self.state.tab_index.get(&node.backing_tab) {
            return Err(TreeError::DuplicateBackingTab { tab: node.backing_tab, node: existing.node });
        }
        self.validate_parent_link(node.id, parent, node.view, node.window)?;
        let id = node.id;
        let view = node.view;
        let mut stored = node;
        stored.parent = parent;
        self.state.tab_index.insert(stored.backing_tab, TabRef { view, node: id });
        self.state.nodes.insert(id, stored);
        self.link(id, parent, view, index);
        Ok(id)
    }

    /// Unlink a node (subtree intact) from its parent or the view roots,
    /// returning the slot it occupied.
    pub(crate) fn detach_subtree(&mut self, id: NodeId) -> Result<(Option<NodeId>, usize), TreeError> {
        let parent = match self.state.nodes.get(&id) {
            Some(n) => n.parent,
            None => return Err(TreeError::NodeNotFound { node: id }),
        };
        let index = self.unlink(id);
        if let Some(n) = self.state.nodes.get_mut(&id) {
            n.parent = None;
        }
        Ok((parent, index))
    }

    /// Link a detached node (subtree intact) under `parent` at `index`, or
    /// into its view's roots when `parent` is `None`.
    pub(crate) fn attach_subtree(
        &mut self,
        id: NodeId,
        parent: Option<NodeId>,
        index: usize,
    ) -> Result<(), TreeError> {
        let (view, window) = match self.state.nodes.get(&id) {
            Some(n) => (n.view, n.window),
            None => return Err(TreeError::NodeNotFound { node: id }),
        };
        self.validate_parent_link(id, parent, view, window)?;
        if let Some(n) = self.state.nodes.get_mut(&id) {
            n.parent = parent;
        }
        self.link(id, parent, view, index);
        Ok(())
    }

    pub(crate) fn set_expanded(&mut self, id: NodeId, expanded: bool) -> Result<(), TreeError> {
        match self.state.nodes.get_mut(&id) {
            Some(n) => {
                n.is_expanded = expanded;
                Ok(())
            }
            None => Err(TreeError::NodeNotFound { node: id }),
        }
    }

    /// Refresh the title/url caches for a backing tab. Returns whether
    /// anything changed. Unknown tabs are a benign no-op.
    pub(crate) fn refresh_caches(&mut self, tab: TabId, title: Option<&str>, url: Option<&str>) -> bool {
        let id = match self.state.tab_index.get(&tab) {
            Some(r) => r.node,
            None => return false,
        };
        let node = self.state.nodes.get_mut(&id).expect("indexed node missing");
        let mut changed = false;
        if let Some(t) = title {
            if node.title != t {
                node.title = t.to_string();
                changed = true;
            }
        }
        if let Some(u) = url {
            if node.url != u {
                node.url = u.to_string();
                changed = true;
            }
        }
        changed
    }

    /// Window context for `window`, created with a default view on first use.
    pub(crate) fn ensure_window(&mut self, window: WindowId) -> ViewId {
        if let Some(ctx) = self.state.windows.get(&window) {
            return ctx.active_view;
        }
        let view = self.state.alloc_view_id();
        self.state.views.insert(
            view,
            View { id: view, name: "Default".to_string(), window, roots: Vec::new() },
        );
        self.state.windows.insert(
            window,
            WindowContext { window, views: vec![view], active_view: view, active_tab: None },
        );
        view
    }

    pub(crate) fn create_view(&mut self, window: WindowId, name: &str) -> ViewId {
        self.ensure_window(window);
        let view = self.state.alloc_view_id();
        self.state.views.insert(
            view,
            View { id: view, name: name.to_string(), window, roots: Vec::new() },
        );
        self.state.windows.get_mut(&window).expect("window vanished").views.push(view);
        view
    }

    pub(crate) fn set_active_view(&mut self, window: WindowId, view: ViewId) -> Result<(), TreeError> {
        let belongs = self
            .state
            .windows
            .get(&window)
            .map(|ctx| ctx.views.contains(&view))
            .unwrap_or(false);
        if !belongs {
            return Err(TreeError::NodeNotFound { node: view });
        }
        self.state.windows.get_mut(&window).expect("window vanished").active_view = view;
        Ok(())
    }

    /// Drop a view and everything in it. Returns the backing tabs of the
    /// destroyed nodes. The caller guards the last-view precondition.
    pub(crate) fn delete_view(&mut self, view: ViewId) -> Result<Vec<TabId>, TreeError> {
        let window = match self.state.views.get(&view) {
            Some(v) => v.window,
            None => return Err(TreeError::NodeNotFound { node: view }),
        };
        let doomed: Vec<NodeId> = self
            .state
            .nodes
            .values()
            .filter(|n| n.view == view)
            .map(|n| n.id)
            .collect();
        let mut tabs = Vec::with_capacity(doomed.len());
        for id in doomed {
            if let Some(n) = self.state.nodes.remove(&id) {
                self.state.tab_index.remove(&n.backing_tab);
                tabs.push(n.backing_tab);
            }
        }
        self.state.views.remove(&view);
        if let Some(ctx) = self.state.windows.get_mut(&window) {
            ctx.views.retain(|v| *v != view);
            if ctx.active_view == view {
                if let Some(first) = ctx.views.first() {
                    ctx.active_view = *first;
                }
            }
        }
        tabs.sort_unstable();
        Ok(tabs)
    }

    pub(crate) fn set_active_tab(&mut self, window: WindowId, tab: Option<TabId>) {
        if let Some(ctx) = self.state.windows.get_mut(&window) {
            ctx.active_tab = tab;
        }
    }

    pub(crate) fn alloc_node_id(&mut self) -> NodeId {
        self.state.alloc_node_id()
    }

    /// True if making `target` the parent of `node` would close a cycle.
    pub(crate) fn would_cycle(&self, node: NodeId, target: NodeId) -> bool {
        let mut cursor = Some(target);
        while let Some(id) = cursor {
            if id == node {
                return true;
            }
            cursor = self.state.nodes.get(&id).and_then(|n| n.parent);
        }
        false
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn validate_parent_link(
        &self,
        node: NodeId,
        parent: Option<NodeId>,
        view: ViewId,
        window: WindowId,
    ) -> Result<(), TreeError> {
        let pid = match parent {
            Some(p) => p,
            None => return Ok(()),
        };
        let p = self
            .state
            .nodes
            .get(&pid)
            .ok_or(TreeError::NodeNotFound { node: pid })?;
        if p.view != view || p.window != window {
            return Err(TreeError::CrossViewReparent { node, from: view, to: p.view });
        }
        if self.would_cycle(node, pid) {
            return Err(TreeError::CycleDetected { node, target: pid });
        }
        Ok(())
    }

    /// Remove `id` from its parent's children or its view's roots, returning
    /// the index it held. Absent ids report the end of the list.
    fn unlink(&mut self, id: NodeId) -> usize {
        let (parent, view) = match self.state.nodes.get(&id) {
            Some(n) => (n.parent, n.view),
            None => return 0,
        };
        match parent {
            Some(p) => {
                let children = &mut self.state.nodes.get_mut(&p).expect("parent vanished").children;
                match children.iter().position(|c| *c == id) {
                    Some(i) => {
                        children.remove(i);
                        i
                    }
                    None => children.len(),
                }
            }
            None => {
                let roots = &mut self.state.views.get_mut(&view).expect("view vanished").roots;
                match roots.iter().position(|c| *c == id) {
                    Some(i) => {
                        roots.remove(i);
                        i
                    }
                    None => roots.len(),
                }
            }
        }
    }

    fn link(&mut self, id: NodeId, parent: Option<NodeId>, view: ViewId, index: usize) {
        self.splice(id, parent, view, index);
    }

    fn splice(&mut self, id: NodeId, parent: Option<NodeId>, view: ViewId, index: usize) {
        let list = match parent {
            Some(p) => &mut self.state.nodes.get_mut(&p).expect("parent vanished").children,
            None => &mut self.state.views.get_mut(&view).expect("view vanished").roots,
        };
        let at = index.min(list.len());
        list.insert(at, id);
    }
}

impl Default for TreeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_view() -> (TreeStore, ViewId) {
        let mut s = TreeStore::new();
        let view = s.ensure_window(1);
        (s, view)
    }

    fn add(s: &mut TreeStore, tab: TabId, view: ViewId, parent: Option<NodeId>) -> NodeId {
        let id = s.alloc_node_id();
        let node = Node::new(id, tab, view, 1);
        s.insert_node(node, parent, usize::MAX).unwrap()
    }

    #[test]
    fn duplicate_backing_tab_rejected_without_mutation() {
        let (mut s, view) = store_with_view();
        let a = add(&mut s, 10, view, None);
        let before = s.state().clone();

        let id = s.alloc_node_id();
        let err = s.insert_node(Node::new(id, 10, view, 1), None, 0).unwrap_err();
        assert_eq!(err, TreeError::DuplicateBackingTab { tab: 10, node: a });

        let mut expected = before;
        expected.next_node_id += 1; // id allocation happened before the insert
        assert_eq!(s.state(), &expected);
    }

    #[test]
    fn reparent_under_own_descendant_is_a_cycle() {
        let (mut s, view) = store_with_view();
        let a = add(&mut s, 10, view, None);
        let b = add(&mut s, 11, view, Some(a));
        let c = add(&mut s, 12, view, Some(b));

        let before = s.state().clone();
        s.detach_subtree(a).unwrap();
        let err = s.attach_subtree(a, Some(c), 0).unwrap_err();
        assert_eq!(err, TreeError::CycleDetected { node: a, target: c });
        // Recovery: put it back where it was.
        s.attach_subtree(a, None, 0).unwrap();
        assert_eq!(s.state(), &before);
    }

    #[test]
    fn cross_view_link_rejected() {
        let (mut s, view) = store_with_view();
        let a = add(&mut s, 10, view, None);
        let other = s.create_view(1, "Work");
        let b = add(&mut s, 11, other, None);

        s.detach_subtree(b).unwrap();
        let err = s.attach_subtree(b, Some(a), 0).unwrap_err();
        assert_eq!(err, TreeError::CrossViewReparent { node: b, from: other, to: view });
    }

    #[test]
    fn remove_node_splices_children_in_place() {
        let (mut s, view) = store_with_view();
        let a = add(&mut s, 10, view, None);
        let b = add(&mut s, 11, view, None);
        let c1 = add(&mut s, 12, view, Some(b));
        let c2 = add(&mut s, 13, view, Some(b));
        let d = add(&mut s, 14, view, None);

        s.remove_node(b).unwrap();
        let roots = &s.state().views[&view].roots;
        assert_eq!(roots, &vec![a, c1, c2, d]);
        assert_eq!(s.get_node(c1).unwrap().parent, None);
        assert!(s.get_node_by_tab(11).is_none());
    }

    #[test]
    fn remove_child_promotes_grandchildren_to_former_slot() {
        let (mut s, view) = store_with_view();
        let root = add(&mut s, 10, view, None);
        let a = add(&mut s, 11, view, Some(root));
        let b = add(&mut s, 12, view, Some(root));
        let ba = add(&mut s, 13, view, Some(b));
        let c = add(&mut s, 14, view, Some(root));

        s.remove_node(b).unwrap();
        assert_eq!(s.get_node(root).unwrap().children, vec![a, ba, c]);
        assert_eq!(s.get_node(ba).unwrap().parent, Some(root));
    }

    #[test]
    fn reorder_requires_a_permutation() {
        let (mut s, view) = store_with_view();
        let a = add(&mut s, 10, view, None);
        let b = add(&mut s, 11, view, None);

        assert!(s.reorder_children(view, None, &[b, a]).is_ok());
        assert_eq!(s.state().views[&view].roots, vec![b, a]);

        let err = s.reorder_children(view, None, &[a]).unwrap_err();
        assert_eq!(err, TreeError::NodeNotFound { node: b });
        let err = s.reorder_children(view, None, &[a, b, 999]).unwrap_err();
        assert_eq!(err, TreeError::NodeNotFound { node: 999 });
        assert_eq!(s.state().views[&view].roots, vec![b, a]);
    }

    #[test]
    fn upsert_refreshes_existing_node_in_place() {
        let (mut s, view) = store_with_view();
        let a = add(&mut s, 10, view, None);
        let b = add(&mut s, 11, view, Some(a));

        let mut updated = s.get_node(b).unwrap().clone();
        updated.title = "Docs".to_string();
        updated.is_expanded = false;
        s.upsert_node(updated).unwrap();

        let stored = s.get_node(b).unwrap();
        assert_eq!(stored.title, "Docs");
        assert!(!stored.is_expanded);
        assert_eq!(stored.parent, Some(a));
        assert_eq!(s.get_node(a).unwrap().children, vec![b]);
    }
}
