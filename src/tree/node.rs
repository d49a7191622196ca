//! Forest data model: nodes, views, window contexts, and the aggregate root.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Host-assigned tab identifier. Every node is backed by exactly one tab.
pub type TabId = u64;
/// Engine-assigned node identifier, stable across the backing tab's navigations.
pub type NodeId = u64;
/// Engine-assigned view identifier.
pub type ViewId = u64;
/// Host-assigned window identifier.
pub type WindowId = u64;

/// Present iff the node is a group container. Set at group synthesis,
/// never retrofitted onto an ordinary node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub backing_tab: TabId,
    pub parent: Option<NodeId>,
    /// Ordered child ids. Order mirrors the on-screen tab order within this
    /// parent's range.
    pub children: Vec<NodeId>,
    pub is_expanded: bool,
    pub group: Option<GroupInfo>,
    pub view: ViewId,
    pub window: WindowId,
    /// Title cache, refreshed by update signals. Feeds group default-naming.
    pub title: String,
    /// URL cache, refreshed by update signals.
    pub url: String,
}

impl Node {
    pub fn new(id: NodeId, backing_tab: TabId, view: ViewId, window: WindowId) -> Self {
        Self {
            id,
            backing_tab,
            parent: None,
            children: Vec::new(),
            is_expanded: true,
            group: None,
            view,
            window,
            title: String::new(),
            url: String::new(),
        }
    }

    pub fn is_group(&self) -> bool {
        self.group.is_some()
    }
}

/// A named, independently ordered forest within a window.
#[derive(Debug, Clone, PartialEq)]
pub struct View {
    pub id: ViewId,
    pub name: String,
    pub window: WindowId,
    /// Ordered ids of nodes with no parent.
    pub roots: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowContext {
    pub window: WindowId,
    /// View ids in creation order.
    pub views: Vec<ViewId>,
    pub active_view: ViewId,
    /// Last activated tab. A cache of host state, never persisted.
    pub active_tab: Option<TabId>,
}

/// Where a backing tab currently lives in the forest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TabRef {
    pub view: ViewId,
    pub node: NodeId,
}

/// Aggregate root: every window's views, all nodes, and the tab index.
///
/// Id counters are part of the aggregate so that node and view ids stay
/// stable across save/load cycles.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeState {
    pub windows: BTreeMap<WindowId, WindowContext>,
    pub views: HashMap<ViewId, View>,
    pub nodes: HashMap<NodeId, Node>,
    pub tab_index: HashMap<TabId, TabRef>,
    pub next_node_id: NodeId,
    pub next_view_id: ViewId,
}

impl TreeState {
    pub fn new() -> Self {
        Self {
            windows: BTreeMap::new(),
            views: HashMap::new(),
            nodes: HashMap::new(),
            tab_index: HashMap::new(),
            next_node_id: 1,
            next_view_id: 1,
        }
    }

    pub fn alloc_node_id(&mut self) -> NodeId {
        let id = self.next_node_id;
        self.next_node_id += 1;
        id
    }

    pub fn alloc_view_id(&mut self) -> ViewId {
        let id = self.next_view_id;
        self.next_view_id += 1;
        id
    }
}

impl Default for TreeState {
    fn default() -> Self {
        Self::new()
    }
}
