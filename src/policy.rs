//! Placement policy: a pure decision function choosing where a newly
//! observed tab lands in the forest. No mutation happens here.

use serde::{Deserialize, Serialize};

use crate::tree::{Node, NodeId, TreeState, ViewId};

/// Schemes the host renders internally. Tabs on these URLs are always placed
/// by the manual policy, even when the host reports an opener.
const SYSTEM_SCHEMES: &[&str] = &[
    "about",
    "chrome",
    "chrome-extension",
    "edge",
    "brave",
    "vivaldi",
    "moz-extension",
    "view-source",
    "devtools",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacementPolicy {
    /// Insert as the opener's last child.
    Child,
    /// Insert immediately after the opener, under the opener's own parent.
    Sibling,
    /// Append as a new root at the end of the view.
    End,
}

impl PlacementPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "child" => Some(Self::Child),
            "sibling" => Some(Self::Sibling),
            "end" => Some(Self::End),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Applies when the creation was link-initiated and the opener is live.
    pub link_opened: PlacementPolicy,
    /// Applies to everything else, system URLs with an opener included.
    pub manual_opened: PlacementPolicy,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self { link_opened: PlacementPolicy::Child, manual_opened: PlacementPolicy::End }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub parent: Option<NodeId>,
    pub index: usize,
}

pub struct PlacementContext<'a> {
    pub view: ViewId,
    /// Opener node, already resolved to the target view. `None` when the
    /// host reported no opener or the opener lives elsewhere.
    pub opener: Option<&'a Node>,
    pub url: &'a str,
    /// Host flag: true for deliberate new-tab actions, false for creations
    /// spawned by a page or link.
    pub user_initiated: bool,
}

pub fn is_system_url(url: &str) -> bool {
    match url::Url::parse(url) {
        Ok(u) => SYSTEM_SCHEMES.contains(&u.scheme()),
        Err(_) => false,
    }
}

/// Choose `{parent, index}` for a new node in `ctx.view`.
pub fn decide_placement(state: &TreeState, ctx: &PlacementContext<'_>, cfg: &PolicyConfig) -> Placement {
    let link_initiated = ctx.opener.is_some() && !ctx.user_initiated;
    let policy = if is_system_url(ctx.url) {
        cfg.manual_opened
    } else if link_initiated {
        cfg.link_opened
    } else {
        cfg.manual_opened
    };
    apply(state, ctx, policy)
}

fn apply(state: &TreeState, ctx: &PlacementContext<'_>, policy: PlacementPolicy) -> Placement {
    match (policy, ctx.opener) {
        (PlacementPolicy::End, _) | (_, None) => end_of_view(state, ctx.view),
        (PlacementPolicy::Child, Some(opener)) => {
            Placement { parent: Some(opener.id), index: opener.children.len() }
        }
        (PlacementPolicy::Sibling, Some(opener)) => {
            let siblings = match opener.parent {
                Some(p) => state.nodes.get(&p).map(|n| &n.children),
                None => state.views.get(&ctx.view).map(|v| &v.roots),
            };
            let index = siblings
                .and_then(|list| list.iter().position(|c| *c == opener.id))
                .map(|i| i + 1)
                .unwrap_or(usize::MAX);
            Placement { parent: opener.parent, index }
        }
    }
}

fn end_of_view(state: &TreeState, view: ViewId) -> Placement {
    let index = state.views.get(&view).map(|v| v.roots.len()).unwrap_or(0);
    Placement { parent: None, index }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{Node, TreeStore};

    fn store_with_opener() -> (TreeStore, ViewId, NodeId) {
        let mut s = TreeStore::new();
        let view = s.ensure_window(1);
        let id = s.alloc_node_id();
        s.insert_node(Node::new(id, 10, view, 1), None, 0).unwrap();
        (s, view, id)
    }

    #[test]
    fn link_opened_child_targets_openers_last_child_slot() {
        let (s, view, opener) = store_with_opener();
        let ctx = PlacementContext {
            view,
            opener: s.get_node(opener),
            url: "https://example.com/a",
            user_initiated: false,
        };
        let p = decide_placement(s.state(), &ctx, &PolicyConfig::default());
        assert_eq!(p, Placement { parent: Some(opener), index: 0 });
    }

    #[test]
    fn sibling_policy_inserts_right_after_opener() {
        let (mut s, view, opener) = store_with_opener();
        let other = s.alloc_node_id();
        s.insert_node(Node::new(other, 11, view, 1), None, usize::MAX).unwrap();
        let cfg = PolicyConfig { link_opened: PlacementPolicy::Sibling, ..Default::default() };
        let ctx = PlacementContext {
            view,
            opener: s.get_node(opener),
            url: "https://example.com/a",
            user_initiated: false,
        };
        let p = decide_placement(s.state(), &ctx, &cfg);
        assert_eq!(p, Placement { parent: None, index: 1 });
    }

    #[test]
    fn manual_creation_ignores_opener() {
        let (s, view, opener) = store_with_opener();
        let ctx = PlacementContext {
            view,
            opener: s.get_node(opener),
            url: "https://example.com/a",
            user_initiated: true,
        };
        let p = decide_placement(s.state(), &ctx, &PolicyConfig::default());
        assert_eq!(p, Placement { parent: None, index: 1 });
    }

    #[test]
    fn system_url_with_opener_is_forced_manual() {
        let (s, view, opener) = store_with_opener();
        let ctx = PlacementContext {
            view,
            opener: s.get_node(opener),
            url: "about:blank",
            user_initiated: false,
        };
        let p = decide_placement(s.state(), &ctx, &PolicyConfig::default());
        assert_eq!(p, Placement { parent: None, index: 1 });
    }

    #[test]
    fn system_scheme_detection() {
        assert!(is_system_url("about:blank"));
        assert!(is_system_url("chrome://settings"));
        assert!(!is_system_url("https://example.com"));
        assert!(!is_system_url("not a url"));
    }
}
