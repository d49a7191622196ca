//! Single-writer runtime: one task owns the mutation engine and drains a
//! command queue strictly in arrival order. Every mutation is a bounded
//! synchronous step; persistence runs on its own task and never holds the
//! queue.

use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::events::{EngineCommand, LiveTab, TabEvent};
use crate::projection::{self, FlatEntry};
use crate::storage::Snapshot;
use crate::tree::ViewId;

use super::mutation::MutationEngine;
use super::reconcile::{reconcile, ReconcileReport};

pub enum EngineMsg {
    Event(TabEvent),
    Command(EngineCommand, oneshot::Sender<Result<bool, String>>),
    Enumerate(Vec<LiveTab>, oneshot::Sender<ReconcileReport>),
    Flatten(ViewId, oneshot::Sender<Vec<FlatEntry>>),
}

#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineMsg>,
}

impl EngineHandle {
    pub async fn event(&self, ev: TabEvent) -> Result<()> {
        self.tx
            .send(EngineMsg::Event(ev))
            .await
            .map_err(|_| anyhow!("engine task gone"))
    }

    /// Submit a collaborator command and wait for its outcome.
    pub async fn request(&self, cmd: EngineCommand) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineMsg::Command(cmd, reply))
            .await
            .map_err(|_| anyhow!("engine task gone"))?;
        rx.await.map_err(|_| anyhow!("engine task gone"))?.map_err(|e| anyhow!(e))
    }

    pub async fn enumerate(&self, tabs: Vec<LiveTab>) -> Result<ReconcileReport> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineMsg::Enumerate(tabs, reply))
            .await
            .map_err(|_| anyhow!("engine task gone"))?;
        rx.await.map_err(|_| anyhow!("engine task gone"))
    }

    /// Depth-annotated projection of a view, served from the queue so the
    /// store is never observed mid-mutation.
    pub async fn flatten(&self, view: ViewId) -> Result<Vec<FlatEntry>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineMsg::Flatten(view, reply))
            .await
            .map_err(|_| anyhow!("engine task gone"))?;
        rx.await.map_err(|_| anyhow!("engine task gone"))
    }

    /// Raw sender for feeder threads.
    pub fn sender(&self) -> mpsc::Sender<EngineMsg> {
        self.tx.clone()
    }
}

/// Spawn the single-writer task. The engine is handed back when every
/// handle is dropped, so callers can flush a final snapshot.
pub fn spawn_engine(
    mut engine: MutationEngine,
    snap_tx: watch::Sender<Option<Snapshot>>,
    capacity: usize,
) -> (EngineHandle, JoinHandle<MutationEngine>) {
    let (tx, mut rx) = mpsc::channel(capacity);
    let task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let mutated = match msg {
                EngineMsg::Event(ev) => engine.handle_event(&ev),
                EngineMsg::Command(cmd, reply) => {
                    let outcome = engine.apply_command(&cmd).map_err(|e| e.to_string());
                    let mutated = *outcome.as_ref().unwrap_or(&false);
                    let _ = reply.send(outcome);
                    mutated
                }
                EngineMsg::Enumerate(tabs, reply) => {
                    let report = reconcile(&mut engine, &tabs);
                    let _ = reply.send(report);
                    report.attached > 0 || report.detached > 0
                }
                EngineMsg::Flatten(view, reply) => {
                    let _ = reply.send(projection::flatten(engine.state(), view));
                    false
                }
            };
            if mutated {
                snap_tx.send_replace(Some(Snapshot::capture(engine.state())));
            }
        }
        engine
    });
    (EngineHandle { tx }, task)
}
