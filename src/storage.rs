//! Durable snapshots of the forest over a key-value table.
//!
//! Saves are idempotent and last-write-wins. Nodes are persisted per view as
//! a flat table in document order with `children` omitted: `load` rebuilds
//! children arrays, roots and the tab index by one in-order scan grouping
//! nodes on their parent, so the two representations can never disagree.

use anyhow::Result;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tokio::time::{sleep, Duration};

use crate::logging::{error_log, obj, v_str, v_u64, warn_log};
use crate::projection;
use crate::tree::{
    GroupInfo, Node, NodeId, TabId, TabRef, TreeState, View, ViewId, WindowContext, WindowId,
};

/// Persisted form of one node. `children` is derivable and never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedNode {
    pub id: NodeId,
    pub backing_tab: TabId,
    #[serde(default)]
    pub parent: Option<NodeId>,
    pub is_expanded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupInfo>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewSnapshot {
    pub id: ViewId,
    pub name: String,
    /// Document (pre-order) order. Rebuild relies on parents preceding
    /// their children, which pre-order guarantees.
    pub nodes: Vec<PersistedNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSnapshot {
    pub window: WindowId,
    pub active_view: ViewId,
    pub views: Vec<ViewSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub windows: Vec<WindowSnapshot>,
    pub next_node_id: NodeId,
    pub next_view_id: ViewId,
}

impl Snapshot {
    pub fn capture(state: &TreeState) -> Self {
        let mut windows = Vec::with_capacity(state.windows.len());
        for (wid, ctx) in &state.windows {
            let mut views = Vec::with_capacity(ctx.views.len());
            for vid in &ctx.views {
                let Some(view) = state.views.get(vid) else { continue };
                let nodes = projection::flatten(state, *vid)
                    .iter()
                    .filter_map(|e| state.nodes.get(&e.node))
                    .map(|n| PersistedNode {
                        id: n.id,
                        backing_tab: n.backing_tab,
                        parent: n.parent,
                        is_expanded: n.is_expanded,
                        group: n.group.clone(),
                        title: n.title.clone(),
                        url: n.url.clone(),
                    })
                    .collect();
                views.push(ViewSnapshot { id: *vid, name: view.name.clone(), nodes });
            }
            windows.push(WindowSnapshot { window: *wid, active_view: ctx.active_view, views });
        }
        Self { windows, next_node_id: state.next_node_id, next_view_id: state.next_view_id }
    }

    /// Rebuild the full aggregate. Children arrays, roots and the tab index
    /// come from the in-order scan; the stored tables are never trusted to
    /// carry them.
    pub fn restore(&self) -> TreeState {
        let mut state = TreeState::new();
        state.next_node_id = self.next_node_id;
        state.next_view_id = self.next_view_id;
        for ws in &self.windows {
            let mut view_ids = Vec::with_capacity(ws.views.len());
            for vs in &ws.views {
                state.views.insert(
                    vs.id,
                    View { id: vs.id, name: vs.name.clone(), window: ws.window, roots: Vec::new() },
                );
                view_ids.push(vs.id);
                for pn in &vs.nodes {
                    if let Some(existing) = state.tab_index.get(&pn.backing_tab) {
                        warn_log(
                            "storage",
                            obj(&[
                                ("skipped", v_str("duplicate_backing_tab")),
                                ("tab", v_u64(pn.backing_tab)),
                                ("kept_node", v_u64(existing.node)),
                            ]),
                        );
                        continue;
                    }
                    let mut node = Node::new(pn.id, pn.backing_tab, vs.id, ws.window);
                    node.parent = pn.parent;
                    node.is_expanded = pn.is_expanded;
                    node.group = pn.group.clone();
                    node.title = pn.title.clone();
                    node.url = pn.url.clone();
                    match pn.parent {
                        Some(p) if state.nodes.contains_key(&p) => {
                            state.nodes.get_mut(&p).expect("checked").children.push(pn.id);
                        }
                        Some(_) | None => {
                            node.parent = None;
                            state.views.get_mut(&vs.id).expect("just inserted").roots.push(pn.id);
                        }
                    }
                    state.tab_index.insert(pn.backing_tab, TabRef { view: vs.id, node: pn.id });
                    state.nodes.insert(pn.id, node);
                }
            }
            let active_view = if view_ids.contains(&ws.active_view) {
                ws.active_view
            } else {
                *view_ids.first().unwrap_or(&ws.active_view)
            };
            state.windows.insert(
                ws.window,
                WindowContext { window: ws.window, views: view_ids, active_view, active_tab: None },
            );
        }
        state
    }
}

pub struct SnapshotStore {
    conn: Connection,
}

impl SnapshotStore {
    pub fn open(path: &str) -> Result<Self> {
        Ok(Self { conn: Connection::open(path)? })
    }

    pub fn init(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS snapshots (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            COMMIT;",
        )?;
        Ok(())
    }

    pub fn save(&mut self, snap: &Snapshot) -> Result<()> {
        let mut ordered: Vec<&WindowSnapshot> = snap.windows.iter().collect();
        ordered.sort_by_key(|ws| ws.window);
        let mut hasher = Sha256::new();
        let mut rows: Vec<(String, String)> = Vec::with_capacity(ordered.len());
        for ws in ordered {
            let value = serde_json::to_string(ws)?;
            hasher.update(value.as_bytes());
            rows.push((format!("window:{}", ws.window), value));
        }
        let meta = serde_json::json!({
            "next_node_id": snap.next_node_id,
            "next_view_id": snap.next_view_id,
            "hash": hex::encode(hasher.finalize()),
        })
        .to_string();

        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM snapshots WHERE key LIKE 'window:%'", [])?;
        for (key, value) in &rows {
            tx.execute(
                "INSERT OR REPLACE INTO snapshots (key, value) VALUES (?1, ?2)",
                params![key, value],
            )?;
        }
        tx.execute(
            "INSERT OR REPLACE INTO snapshots (key, value) VALUES ('meta', ?1)",
            params![meta],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Load the last snapshot, or `None` on first run. A content-hash
    /// mismatch is logged and the rows are still used; the reconciliation
    /// pass straightens out whatever a torn write left behind.
    pub fn load(&mut self) -> Result<Option<Snapshot>> {
        let meta: Option<String> = self
            .conn
            .query_row("SELECT value FROM snapshots WHERE key = 'meta'", [], |r| r.get(0))
            .ok();
        let Some(meta) = meta else { return Ok(None) };
        let meta: serde_json::Value = serde_json::from_str(&meta)?;

        let mut stmt = self
            .conn
            .prepare("SELECT value FROM snapshots WHERE key LIKE 'window:%'")?;
        let values: Vec<String> = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<std::result::Result<_, _>>()?;

        // Hash in window-id order, the same order `save` wrote the rows in.
        let mut rows: Vec<(WindowSnapshot, String)> = Vec::with_capacity(values.len());
        for value in values {
            let ws = serde_json::from_str::<WindowSnapshot>(&value)?;
            rows.push((ws, value));
        }
        rows.sort_by_key(|(ws, _)| ws.window);
        let mut hasher = Sha256::new();
        for (_, value) in &rows {
            hasher.update(value.as_bytes());
        }
        let windows: Vec<WindowSnapshot> = rows.into_iter().map(|(ws, _)| ws).collect();
        let stored_hash = meta.get("hash").and_then(|v| v.as_str()).unwrap_or("");
        let actual = hex::encode(hasher.finalize());
        if stored_hash != actual {
            warn_log(
                "storage",
                obj(&[("snapshot_hash_mismatch", v_str(stored_hash)), ("actual", v_str(&actual))]),
            );
        }
        Ok(Some(Snapshot {
            windows,
            next_node_id: meta.get("next_node_id").and_then(|v| v.as_u64()).unwrap_or(1),
            next_view_id: meta.get("next_view_id").and_then(|v| v.as_u64()).unwrap_or(1),
        }))
    }
}

/// Debounced saver task. Bursts of mutations within the window collapse into
/// one write; a snapshot published while an earlier one waits supersedes it.
/// Failed writes are logged and retried on the next debounced save.
pub fn spawn_saver(
    mut store: SnapshotStore,
    mut rx: watch::Receiver<Option<Snapshot>>,
    debounce_ms: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            sleep(Duration::from_millis(debounce_ms)).await;
            let snap = rx.borrow_and_update().clone();
            if let Some(snap) = snap {
                if let Err(err) = store.save(&snap) {
                    error_log(
                        "storage",
                        obj(&[("save_failed", v_str(&err.to_string()))]),
                    );
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TabEvent;
    use crate::host::StubHost;
    use crate::engine::MutationEngine;
    use crate::policy::PolicyConfig;

    fn sample_state() -> TreeState {
        let mut e = MutationEngine::new(
            TreeState::new(),
            PolicyConfig::default(),
            Box::new(StubHost::default()),
        );
        for (tab, opener) in [(10, None), (11, Some(10)), (12, Some(11)), (13, None)] {
            e.handle_event(&TabEvent::Created {
                tab,
                opener,
                url: format!("https://example.com/{}", tab),
                window: 1,
                user_initiated: opener.is_none(),
            });
        }
        e.handle_updated(11, Some("Inbox"), None);
        let collapsed = e.store().get_node_by_tab(11).unwrap().id;
        e.toggle_expand(collapsed).unwrap();
        e.into_state()
    }

    #[test]
    fn capture_restore_round_trips() {
        let state = sample_state();
        let restored = Snapshot::capture(&state).restore();
        assert_eq!(restored, state);
    }

    #[test]
    fn save_load_round_trips_through_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forest.sqlite");
        let state = sample_state();

        let mut store = SnapshotStore::open(path.to_str().unwrap()).unwrap();
        store.init().unwrap();
        let snap = Snapshot::capture(&state);
        store.save(&snap).unwrap();
        // Idempotent last-write-wins: saving again changes nothing.
        store.save(&snap).unwrap();

        let loaded = store.load().unwrap().expect("snapshot present");
        assert_eq!(loaded, snap);
        assert_eq!(loaded.restore(), state);
    }

    #[test]
    fn load_on_empty_store_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forest.sqlite");
        let mut store = SnapshotStore::open(path.to_str().unwrap()).unwrap();
        store.init().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn stale_window_rows_are_dropped_on_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forest.sqlite");
        let mut store = SnapshotStore::open(path.to_str().unwrap()).unwrap();
        store.init().unwrap();

        let state = sample_state();
        store.save(&Snapshot::capture(&state)).unwrap();

        // A later snapshot without window 1 must not resurrect it on load.
        let empty = Snapshot { windows: Vec::new(), next_node_id: 99, next_view_id: 9 };
        store.save(&empty).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert!(loaded.windows.is_empty());
        assert_eq!(loaded.next_node_id, 99);
    }

    #[test]
    fn restore_skips_conflicting_backing_tabs() {
        let node = |id: NodeId, tab: TabId| PersistedNode {
            id,
            backing_tab: tab,
            parent: None,
            is_expanded: true,
            group: None,
            title: String::new(),
            url: String::new(),
        };
        let snap = Snapshot {
            windows: vec![WindowSnapshot {
                window: 1,
                active_view: 1,
                views: vec![ViewSnapshot {
                    id: 1,
                    name: "Default".to_string(),
                    nodes: vec![node(1, 10), node(2, 10)],
                }],
            }],
            next_node_id: 3,
            next_view_id: 2,
        };
        let state = snap.restore();
        assert_eq!(state.nodes.len(), 1);
        assert_eq!(state.tab_index[&10].node, 1);
    }
}
