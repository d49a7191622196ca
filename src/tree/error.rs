use thiserror::Error;

use super::node::{NodeId, TabId, ViewId};

/// Closed taxonomy of structural rejections. Every rejection is local and
/// synchronous with no partial mutation; there is no internal retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("placing node {node} under {target} would create a cycle")]
    CycleDetected { node: NodeId, target: NodeId },

    #[error("node {node} is in view {from}, target is in view {to}; explicit migration required")]
    CrossViewReparent { node: NodeId, from: ViewId, to: ViewId },

    #[error("tab {tab} already backs node {node}")]
    DuplicateBackingTab { tab: TabId, node: NodeId },

    #[error("node {node} is not a group container")]
    NotAGroup { node: NodeId },

    #[error("no element with id {node}")]
    NodeNotFound { node: NodeId },
}
