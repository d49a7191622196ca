//! All structural operations over the tree store. Host events funnel through
//! [`MutationEngine::handle_event`]; collaborator commands through
//! [`MutationEngine::apply_command`]. Every operation validates its
//! preconditions before the first store mutation, so a rejection never
//! leaves partial state behind.

use std::collections::HashSet;

use anyhow::{anyhow, bail, Result};

use crate::events::{EngineCommand, TabEvent};
use crate::host::HostTabs;
use crate::logging::{obj, v_str, v_u64, warn_log};
use crate::policy::{decide_placement, PlacementContext, PolicyConfig};
use crate::projection;
use crate::tree::{GroupInfo, Node, NodeId, TabId, TreeError, TreeState, TreeStore, ViewId, WindowId};

pub struct MutationEngine {
    store: TreeStore,
    policy: PolicyConfig,
    host: Box<dyn HostTabs + Send>,
}

impl MutationEngine {
    pub fn new(state: TreeState, policy: PolicyConfig, host: Box<dyn HostTabs + Send>) -> Self {
        Self { store: TreeStore::from_state(state), policy, host }
    }

    pub fn state(&self) -> &TreeState {
        self.store.state()
    }

    pub fn store(&self) -> &TreeStore {
        &self.store
    }

    pub fn into_state(self) -> TreeState {
        self.store.into_state()
    }

    /// Apply one host signal. Returns whether persisted state changed.
    /// Stale or contradictory signals are benign no-ops or, for upstream
    /// ordering bugs, logged and dropped.
    pub fn handle_event(&mut self, ev: &TabEvent) -> bool {
        match ev {
            TabEvent::Created { tab, opener, url, window, user_initiated } => {
                match self.attach(*tab, *opener, url, *user_initiated, *window) {
                    Ok(_) => true,
                    Err(err) => {
                        warn_log(
                            "engine",
                            obj(&[("dropped", v_str("created")), ("tab", v_u64(*tab)), ("reason", v_str(&err.to_string()))]),
                        );
                        false
                    }
                }
            }
            TabEvent::Removed { tab } => self.detach(*tab),
            TabEvent::Updated { tab, title, url, .. } => {
                self.handle_updated(*tab, title.as_deref(), url.as_deref())
            }
            TabEvent::Moved { tab, new_index } => self.handle_moved(*tab, *new_index),
            TabEvent::Activated { tab, window } => {
                self.handle_activated(*tab, *window);
                false
            }
        }
    }

    /// Apply one collaborator command. Returns whether persisted state
    /// changed; structural rejections surface to the caller.
    pub fn apply_command(&mut self, cmd: &EngineCommand) -> Result<bool> {
        match cmd {
            EngineCommand::Group { nodes, name, color } => {
                if nodes.is_empty() {
                    return Ok(false);
                }
                self.create_group(nodes, name.as_deref(), color.as_deref())?;
                Ok(true)
            }
            EngineCommand::AddToGroup { node, group } => {
                self.add_to_group(*node, *group)?;
                Ok(true)
            }
            EngineCommand::Reparent { node, new_parent, index } => {
                self.reparent(*node, *new_parent, *index)?;
                Ok(true)
            }
            EngineCommand::ToggleExpand { node } => {
                self.toggle_expand(*node)?;
                Ok(true)
            }
            EngineCommand::Move { node, index } => {
                self.move_to_position(*node, *index)?;
                Ok(true)
            }
            EngineCommand::CreateView { window, name } => {
                self.store.create_view(*window, name);
                Ok(true)
            }
            EngineCommand::SwitchView { window, view } => {
                self.store.set_active_view(*window, *view)?;
                Ok(true)
            }
            EngineCommand::DeleteView { view } => {
                self.delete_view(*view)?;
                Ok(true)
            }
        }
    }

    /// Place a newly observed tab. The policy engine picks the slot; if the
    /// chosen parent existed and was collapsed it is expanded, that one
    /// parent only.
    pub fn attach(
        &mut self,
        tab: TabId,
        opener: Option<TabId>,
        url: &str,
        user_initiated: bool,
        window: WindowId,
    ) -> Result<NodeId, TreeError> {
        if let Some(n) = self.store.get_node_by_tab(tab) {
            return Err(TreeError::DuplicateBackingTab { tab, node: n.id });
        }
        let view = self.store.ensure_window(window);
        // An opener outside the target view cannot be honored without an
        // implicit cross-view reparent; treat it as absent.
        let opener_node = opener
            .and_then(|o| self.store.get_node_by_tab(o))
            .filter(|n| n.view == view);
        let ctx = PlacementContext { view, opener: opener_node, url, user_initiated };
        let placement = decide_placement(self.store.state(), &ctx, &self.policy);
        let parent_was_collapsed = placement
            .parent
            .and_then(|p| self.store.get_node(p))
            .map(|p| !p.is_expanded)
            .unwrap_or(false);

        let id = self.store.alloc_node_id();
        let mut node = Node::new(id, tab, view, window);
        node.url = url.to_string();
        self.store.insert_node(node, placement.parent, placement.index)?;
        if parent_was_collapsed {
            let parent = placement.parent.expect("collapsed parent exists");
            self.store.set_expanded(parent, true).expect("parent vanished");
        }
        Ok(id)
    }

    /// Remove the node backing `tab`. Children are promoted in place to the
    /// removed node's former parent, preserving their relative order.
    /// Idempotent: an unknown tab is a benign no-op.
    pub fn detach(&mut self, tab: TabId) -> bool {
        let (node, window) = match self.store.get_node_by_tab(tab) {
            Some(n) => (n.id, n.window),
            None => return false,
        };
        self.store.remove_node(node).expect("indexed node missing");
        if self.store.state().windows.get(&window).and_then(|w| w.active_tab) == Some(tab) {
            self.store.set_active_tab(window, None);
        }
        true
    }

    pub fn reparent(&mut self, node: NodeId, new_parent: Option<NodeId>, index: usize) -> Result<(), TreeError> {
        let view = self
            .store
            .get_node(node)
            .ok_or(TreeError::NodeNotFound { node })?
            .view;
        if let Some(target) = new_parent {
            let t = self
                .store
                .get_node(target)
                .ok_or(TreeError::NodeNotFound { node: target })?;
            if t.view != view {
                return Err(TreeError::CrossViewReparent { node, from: view, to: t.view });
            }
            if self.store.would_cycle(node, target) {
                return Err(TreeError::CycleDetected { node, target });
            }
        }
        self.store.detach_subtree(node)?;
        self.store.attach_subtree(node, new_parent, index)?;
        Ok(())
    }

    /// Reorder within the same parent.
    pub fn move_to_position(&mut self, node: NodeId, index: usize) -> Result<(), TreeError> {
        let parent = self
            .store
            .get_node(node)
            .ok_or(TreeError::NodeNotFound { node })?
            .parent;
        self.store.detach_subtree(node)?;
        self.store.attach_subtree(node, parent, index)?;
        Ok(())
    }

    /// Synthesize a group container around `ids`. The group node supplants
    /// the slot of the last selected node in document order; selected nodes
    /// are reparented under it preserving that order. Selected nodes nested
    /// under other selected nodes move with their ancestors and are not
    /// reparented twice.
    pub fn create_group(&mut self, ids: &[NodeId], name: Option<&str>, color: Option<&str>) -> Result<NodeId> {
        let first = self
            .store
            .get_node(*ids.first().ok_or_else(|| anyhow!("empty selection"))?)
            .ok_or(TreeError::NodeNotFound { node: ids[0] })?;
        let view = first.view;
        let window = first.window;
        for id in ids {
            let n = self.store.get_node(*id).ok_or(TreeError::NodeNotFound { node: *id })?;
            if n.view != view {
                return Err(TreeError::CrossViewReparent { node: *id, from: n.view, to: view }.into());
            }
        }

        // Selection in document order, not argument order. Flatten yields
        // unique ids, so duplicates in the input collapse here.
        let selected: HashSet<NodeId> = ids.iter().copied().collect();
        let mut ordered: Vec<NodeId> = projection::flatten(self.store.state(), view)
            .iter()
            .map(|e| e.node)
            .filter(|n| selected.contains(n))
            .collect();
        ordered.retain(|id| !self.has_selected_ancestor(*id, &selected));

        let group_name = match name {
            Some(n) => n.to_string(),
            None => {
                let titles: Vec<String> = ordered
                    .iter()
                    .map(|id| self.store.get_node(*id).expect("validated above").title.clone())
                    .collect();
                default_group_name(&titles)
            }
        };

        let tab = self
            .host
            .create_group_tab(window, &group_name)
            .map_err(|e| anyhow!("group tab synthesis failed: {}", e))?;
        if let Some(n) = self.store.get_node_by_tab(tab) {
            return Err(TreeError::DuplicateBackingTab { tab, node: n.id }.into());
        }

        let anchor = *ordered.last().expect("non-empty selection");
        for id in &ordered[..ordered.len() - 1] {
            self.store.detach_subtree(*id)?;
        }
        let (parent, index) = self.store.detach_subtree(anchor)?;

        let gid = self.store.alloc_node_id();
        let mut gnode = Node::new(gid, tab, view, window);
        gnode.title = group_name.clone();
        gnode.group = Some(GroupInfo { name: group_name, color: color.map(str::to_string) });
        self.store.insert_node(gnode, parent, index)?;
        for (i, id) in ordered.iter().enumerate() {
            self.store.attach_subtree(*id, Some(gid), i)?;
        }
        Ok(gid)
    }

    /// Reparent a single node as the last child of an existing group.
    pub fn add_to_group(&mut self, node: NodeId, group: NodeId) -> Result<(), TreeError> {
        let g = self
            .store
            .get_node(group)
            .ok_or(TreeError::NodeNotFound { node: group })?;
        if !g.is_group() {
            return Err(TreeError::NotAGroup { node: group });
        }
        let to = g.view;
        let n = self.store.get_node(node).ok_or(TreeError::NodeNotFound { node })?;
        if n.view != to {
            return Err(TreeError::CrossViewReparent { node, from: n.view, to });
        }
        if self.store.would_cycle(node, group) {
            return Err(TreeError::CycleDetected { node, target: group });
        }
        self.store.detach_subtree(node)?;
        self.store.attach_subtree(node, Some(group), usize::MAX)?;
        Ok(())
    }

    /// Flip one node's expansion flag. Never propagates to descendants.
    pub fn toggle_expand(&mut self, node: NodeId) -> Result<(), TreeError> {
        let expanded = self
            .store
            .get_node(node)
            .ok_or(TreeError::NodeNotFound { node })?
            .is_expanded;
        self.store.set_expanded(node, !expanded)
    }

    /// Refresh title/url caches. Unknown tabs are benign no-ops.
    pub fn handle_updated(&mut self, tab: TabId, title: Option<&str>, url: Option<&str>) -> bool {
        self.store.refresh_caches(tab, title, url)
    }

    /// Mirror a host-side flat reorder. The node keeps its parent; its new
    /// position among siblings is found by walking sibling subtree spans in
    /// document order until the span containing the host index is reached.
    pub fn handle_moved(&mut self, tab: TabId, new_index: usize) -> bool {
        let (node, view, parent) = match self.store.get_node_by_tab(tab) {
            Some(n) => (n.id, n.view, n.parent),
            None => return false,
        };
        let state = self.store.state();
        let flat = projection::flatten(state, view);
        let base = match parent {
            Some(p) => match flat.iter().position(|e| e.node == p) {
                Some(i) => i + 1,
                None => return false,
            },
            None => 0,
        };
        let siblings: Vec<NodeId> = match parent {
            Some(p) => state.nodes[&p].children.clone(),
            None => state.views[&view].roots.clone(),
        };
        let current = siblings.iter().position(|c| *c == node).expect("linked node");

        let mut slot = 0;
        let mut pos = base;
        for sib in siblings.iter().filter(|s| **s != node) {
            let span = projection::subtree_size(state, *sib);
            if new_index >= pos + span {
                slot += 1;
                pos += span;
            } else {
                break;
            }
        }
        if slot == current {
            return false;
        }
        self.store.detach_subtree(node).expect("linked node");
        self.store.attach_subtree(node, parent, slot).expect("same parent relink");
        true
    }

    /// Refresh the window's active-tab cache. Not structural, not persisted.
    pub fn handle_activated(&mut self, tab: TabId, window: WindowId) {
        if self.store.get_node_by_tab(tab).is_some() {
            self.store.set_active_tab(window, Some(tab));
        }
    }

    pub fn create_view(&mut self, window: WindowId, name: &str) -> ViewId {
        self.store.create_view(window, name)
    }

    /// Destroy a view and every node in it. The last view of a window stays.
    pub fn delete_view(&mut self, view: ViewId) -> Result<()> {
        let window = self
            .store
            .state()
            .views
            .get(&view)
            .ok_or(TreeError::NodeNotFound { node: view })?
            .window;
        let remaining = self.store.state().windows[&window].views.len();
        if remaining <= 1 {
            bail!("cannot delete the last view of window {}", window);
        }
        let tabs = self.store.delete_view(view)?;
        warn_log(
            "engine",
            obj(&[("view_deleted", v_u64(view)), ("nodes_dropped", v_u64(tabs.len() as u64))]),
        );
        Ok(())
    }

    fn has_selected_ancestor(&self, id: NodeId, selected: &HashSet<NodeId>) -> bool {
        let mut cursor = self.store.get_node(id).and_then(|n| n.parent);
        while let Some(p) = cursor {
            if selected.contains(&p) {
                return true;
            }
            cursor = self.store.get_node(p).and_then(|n| n.parent);
        }
        false
    }
}

/// Longest word shared by every title; ties resolve to the word appearing
/// earliest in the first title. Falls back to "Group".
fn default_group_name(titles: &[String]) -> String {
    let mut first_words: Vec<&str> = Vec::new();
    for (i, title) in titles.iter().enumerate() {
        let words: HashSet<&str> = title.split_whitespace().collect();
        if i == 0 {
            first_words = title.split_whitespace().collect();
        } else {
            first_words.retain(|w| words.contains(w));
        }
        if first_words.is_empty() {
            break;
        }
    }
    let mut best: Option<&str> = None;
    for word in first_words {
        if best.map(|b| word.len() > b.len()).unwrap_or(true) {
            best = Some(word);
        }
    }
    best.map(str::to_string).unwrap_or_else(|| "Group".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::StubHost;

    fn engine() -> MutationEngine {
        MutationEngine::new(TreeState::new(), PolicyConfig::default(), Box::new(StubHost::default()))
    }

    fn created(tab: TabId, opener: Option<TabId>, user_initiated: bool) -> TabEvent {
        TabEvent::Created {
            tab,
            opener,
            url: format!("https://example.com/{}", tab),
            window: 1,
            user_initiated,
        }
    }

    fn titled(e: &mut MutationEngine, tab: TabId, title: &str) {
        assert!(e.handle_updated(tab, Some(title), None));
    }

    #[test]
    fn duplicate_created_event_is_dropped() {
        let mut e = engine();
        assert!(e.handle_event(&created(10, None, true)));
        let before = e.state().clone();
        assert!(!e.handle_event(&created(10, None, true)));
        assert_eq!(e.state(), &before);
    }

    #[test]
    fn detach_internal_node_promotes_children_in_order() {
        let mut e = engine();
        e.handle_event(&created(10, None, true));
        e.handle_event(&created(11, Some(10), false));
        e.handle_event(&created(12, Some(11), false));
        e.handle_event(&created(13, Some(11), false));

        let root = e.store().get_node_by_tab(10).unwrap().id;
        let c1 = e.store().get_node_by_tab(12).unwrap().id;
        let c2 = e.store().get_node_by_tab(13).unwrap().id;

        assert!(e.detach(11));
        let root_node = e.store().get_node(root).unwrap();
        assert_eq!(root_node.children, vec![c1, c2]);
        // Idempotent: a second removal signal changes nothing.
        assert!(!e.detach(11));
    }

    #[test]
    fn group_supplants_last_selected_slot_in_document_order() {
        let mut e = engine();
        for tab in [10, 11, 12, 13] {
            e.handle_event(&created(tab, None, true));
        }
        let a = e.store().get_node_by_tab(10).unwrap().id;
        let b = e.store().get_node_by_tab(12).unwrap().id;
        let view = e.store().get_node(a).unwrap().view;

        // Argument order reversed on purpose; document order must win.
        let gid = e.create_group(&[b, a], None, None).unwrap();
        let group = e.store().get_node(gid).unwrap();
        assert_eq!(group.children, vec![a, b]);
        assert!(group.is_expanded);
        assert!(group.is_group());

        let other1 = e.store().get_node_by_tab(11).unwrap().id;
        let other2 = e.store().get_node_by_tab(13).unwrap().id;
        // The group sits where b (third root) was, after a's removal shifted
        // the list: [11, group, 13].
        assert_eq!(e.state().views[&view].roots, vec![other1, gid, other2]);
    }

    #[test]
    fn group_default_name_is_longest_common_title_word() {
        let mut e = engine();
        e.handle_event(&created(10, None, true));
        e.handle_event(&created(11, None, true));
        titled(&mut e, 10, "Tokio runtime handbook");
        titled(&mut e, 11, "The runtime reference");
        let a = e.store().get_node_by_tab(10).unwrap().id;
        let b = e.store().get_node_by_tab(11).unwrap().id;

        let gid = e.create_group(&[a, b], None, None).unwrap();
        let name = e.store().get_node(gid).unwrap().group.as_ref().unwrap().name.clone();
        assert_eq!(name, "runtime");
    }

    #[test]
    fn group_name_falls_back_when_titles_share_nothing() {
        let mut e = engine();
        e.handle_event(&created(10, None, true));
        e.handle_event(&created(11, None, true));
        titled(&mut e, 10, "alpha");
        titled(&mut e, 11, "beta");
        let a = e.store().get_node_by_tab(10).unwrap().id;
        let b = e.store().get_node_by_tab(11).unwrap().id;
        let gid = e.create_group(&[a, b], None, None).unwrap();
        assert_eq!(e.store().get_node(gid).unwrap().group.as_ref().unwrap().name, "Group");
    }

    #[test]
    fn add_to_group_rejects_plain_nodes() {
        let mut e = engine();
        e.handle_event(&created(10, None, true));
        e.handle_event(&created(11, None, true));
        let a = e.store().get_node_by_tab(10).unwrap().id;
        let b = e.store().get_node_by_tab(11).unwrap().id;
        assert_eq!(e.add_to_group(a, b), Err(TreeError::NotAGroup { node: b }));
    }

    #[test]
    fn moved_signal_walks_sibling_spans() {
        let mut e = engine();
        // roots: 10 (with child 11), 12, 13
        e.handle_event(&created(10, None, true));
        e.handle_event(&created(11, Some(10), false));
        e.handle_event(&created(12, None, true));
        e.handle_event(&created(13, None, true));
        let view = e.store().get_node_by_tab(10).unwrap().view;
        let r0 = e.store().get_node_by_tab(10).unwrap().id;
        let r1 = e.store().get_node_by_tab(12).unwrap().id;
        let r2 = e.store().get_node_by_tab(13).unwrap().id;

        // Host moved tab 13 to flat index 0: it becomes the first root.
        assert!(e.handle_moved(13, 0));
        assert_eq!(e.state().views[&view].roots, vec![r2, r0, r1]);

        // Moving it past 10's two-tab subtree lands after 10 again.
        assert!(e.handle_moved(13, 2));
        assert_eq!(e.state().views[&view].roots, vec![r0, r2, r1]);
    }

    #[test]
    fn activated_only_touches_the_cache() {
        let mut e = engine();
        e.handle_event(&created(10, None, true));
        let before = e.state().clone();
        assert!(!e.handle_event(&TabEvent::Activated { tab: 10, window: 1 }));
        assert_eq!(e.state().windows[&1].active_tab, Some(10));
        // Everything except the cache is untouched.
        let mut after = e.state().clone();
        after.windows.get_mut(&1).unwrap().active_tab = before.windows[&1].active_tab;
        assert_eq!(after, before);
    }

    #[test]
    fn last_view_cannot_be_deleted() {
        let mut e = engine();
        e.handle_event(&created(10, None, true));
        let view = e.store().get_node_by_tab(10).unwrap().view;
        assert!(e.delete_view(view).is_err());

        let second = e.create_view(1, "Work");
        assert!(e.delete_view(second).is_ok());
    }
}
