//! Engine loop: restore the persisted forest, then drain newline-delimited
//! JSON inputs (host events, collaborator commands, enumeration for startup
//! reconciliation) from stdin until EOF. All structural work happens on the
//! single-writer queue; saves are debounced on their own task.

use std::io::BufRead;

use anyhow::Result;
use tokio::sync::{oneshot, watch};

use tabforest::config::Config;
use tabforest::engine::runtime::{spawn_engine, EngineMsg};
use tabforest::engine::MutationEngine;
use tabforest::events::Input;
use tabforest::host::StubHost;
use tabforest::logging::{json_log, obj, v_str, v_u64, warn_log};
use tabforest::storage::{spawn_saver, Snapshot, SnapshotStore};
use tabforest::tree::TreeState;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    let mut store = SnapshotStore::open(&cfg.sqlite_path)?;
    store.init()?;
    let state = match store.load()? {
        Some(snap) => snap.restore(),
        None => TreeState::new(),
    };
    json_log(
        "main",
        obj(&[
            ("sqlite", v_str(&cfg.sqlite_path)),
            ("restored_nodes", v_u64(state.nodes.len() as u64)),
            ("debounce_ms", v_u64(cfg.debounce_ms)),
        ]),
    );

    let engine = MutationEngine::new(state, cfg.policy(), Box::new(StubHost::new(cfg.group_tab_base)));
    let (snap_tx, snap_rx) = watch::channel(None);
    let saver = spawn_saver(store, snap_rx, cfg.debounce_ms);
    let (handle, engine_task) = spawn_engine(engine, snap_tx, cfg.queue_capacity);

    let feeder = {
        let tx = handle.sender();
        tokio::task::spawn_blocking(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    continue;
                }
                match serde_json::from_str::<Input>(trimmed) {
                    Ok(Input::Event { event }) => {
                        if tx.blocking_send(EngineMsg::Event(event)).is_err() {
                            break;
                        }
                    }
                    Ok(Input::Command { command }) => {
                        let (reply, rx) = oneshot::channel();
                        if tx.blocking_send(EngineMsg::Command(command, reply)).is_err() {
                            break;
                        }
                        if let Ok(Err(err)) = rx.blocking_recv() {
                            warn_log("main", obj(&[("command_rejected", v_str(&err))]));
                        }
                    }
                    Ok(Input::Enumerate { tabs }) => {
                        let (reply, rx) = oneshot::channel();
                        if tx.blocking_send(EngineMsg::Enumerate(tabs, reply)).is_err() {
                            break;
                        }
                        let _ = rx.blocking_recv();
                    }
                    Err(err) => {
                        warn_log("main", obj(&[("bad_input", v_str(&err.to_string()))]));
                    }
                }
            }
        })
    };

    feeder.await?;
    drop(handle);
    let engine = engine_task.await?;
    saver.abort();

    // Flush whatever the debounce window was still holding.
    let mut store = SnapshotStore::open(&cfg.sqlite_path)?;
    store.init()?;
    store.save(&Snapshot::capture(engine.state()))?;
    json_log(
        "main",
        obj(&[("shutdown", v_str("clean")), ("nodes", v_u64(engine.state().nodes.len() as u64))]),
    );
    Ok(())
}
