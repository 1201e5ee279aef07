// src/graph/mod.rs

//! The process graph: nodes wrapping external processes, connected by pipe
//! edges (fan-out and cycles included), driven to closure by a shared
//! reaper task.
//!
//! Task layout per started node: one *pump* task drains the child's output
//! and dispatches each line to the node's sinks, and one *waiter* task
//! collects the exit status. Both report into a single per-graph event
//! channel consumed by the *reaper* task, which joins "terminated" with
//! "drained" into the node's closure and propagates end-of-input downstream.

mod node;
mod pump;
mod reaper;

pub use node::ProcessNode;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::channel::ChannelWriter;
use crate::child::ChildHandle;
use crate::errors::Result;
use node::NodeState;
use reaper::ReapEvent;

/// Index of a node in its graph's arena.
pub type NodeId = usize;

/// Per-node progress published to waiters: bumped whenever a line lands in
/// the manual-read buffer, and flipped to `closed` by the reaper.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct NodeProgress {
    pub revision: u64,
    pub closed: bool,
}

pub(crate) struct NodeSlot {
    pub id: NodeId,
    pub state: Mutex<NodeState>,
    /// Kept outside `state` so a slow write never blocks state inspection,
    /// and a held state lock never blocks a pipe write.
    pub writer: Mutex<Option<ChannelWriter>>,
    pub progress: watch::Sender<NodeProgress>,
}

pub(crate) struct GraphCore {
    nodes: StdMutex<Vec<Arc<NodeSlot>>>,
    pids: StdMutex<HashMap<u32, NodeId>>,
    events: mpsc::Sender<ReapEvent>,
}

impl GraphCore {
    pub fn slot(&self, id: NodeId) -> Arc<NodeSlot> {
        self.nodes
            .lock()
            .expect("node arena lock poisoned")
            .get(id)
            .cloned()
            .expect("node id out of bounds")
    }

    pub fn events(&self) -> &mpsc::Sender<ReapEvent> {
        &self.events
    }

    pub fn register_pid(&self, pid: u32, id: NodeId) {
        self.pids
            .lock()
            .expect("pid table lock poisoned")
            .insert(pid, id);
    }

    pub fn unregister_pid(&self, pid: u32) {
        self.pids.lock().expect("pid table lock poisoned").remove(&pid);
    }

    pub fn node_for_pid(&self, pid: u32) -> Option<NodeId> {
        self.pids
            .lock()
            .expect("pid table lock poisoned")
            .get(&pid)
            .copied()
    }

    fn all_slots(&self) -> Vec<Arc<NodeSlot>> {
        self.nodes.lock().expect("node arena lock poisoned").clone()
    }
}

/// Owns the node arena and the reaper task. Nodes are created with
/// [`node`](PipeGraph::node) and survive as long as the graph does.
pub struct PipeGraph {
    core: Arc<GraphCore>,
    reaper: StdMutex<Option<JoinHandle<()>>>,
}

impl PipeGraph {
    pub fn new() -> Self {
        let (events, rx) = mpsc::channel(64);
        let core = Arc::new(GraphCore {
            nodes: StdMutex::new(Vec::new()),
            pids: StdMutex::new(HashMap::new()),
            events,
        });
        let reaper = tokio::spawn(reaper::reaper_loop(Arc::clone(&core), rx));
        Self {
            core,
            reaper: StdMutex::new(Some(reaper)),
        }
    }

    /// Adds a node wrapping the given (not yet spawned) process.
    pub fn node(&self, child: ChildHandle) -> ProcessNode {
        let mut nodes = self.core.nodes.lock().expect("node arena lock poisoned");
        let id = nodes.len();
        let (progress, _) = watch::channel(NodeProgress::default());
        nodes.push(Arc::new(NodeSlot {
            id,
            state: Mutex::new(NodeState::new(child)),
            writer: Mutex::new(None),
            progress,
        }));
        drop(nodes);
        ProcessNode::from_parts(Arc::clone(&self.core), id)
    }

    /// Tears the whole graph down: end-of-input to every started node,
    /// `finish` on each of them (idempotent, so cycles and shared
    /// predecessors are safe in any order), then stop the reaper and join
    /// the pump tasks.
    pub async fn shutdown(&self) -> Result<()> {
        let slots = self.core.all_slots();
        for slot in &slots {
            let started = slot.state.lock().await.started;
            if !started {
                continue;
            }
            let mut writer = slot.writer.lock().await;
            if let Some(mut w) = writer.take() {
                w.close().await;
            }
        }
        for slot in &slots {
            let started = slot.state.lock().await.started;
            if !started {
                continue;
            }
            let node = ProcessNode::from_parts(Arc::clone(&self.core), slot.id);
            if let Err(e) = node.finish().await {
                warn!(node = slot.id, error = %e, "finish during shutdown failed");
            }
        }
        let _ = self.core.events.send(ReapEvent::Shutdown).await;
        let reaper = self
            .reaper
            .lock()
            .expect("reaper handle lock poisoned")
            .take();
        if let Some(handle) = reaper {
            let _ = handle.await;
        }
        for slot in &slots {
            let pump = slot.state.lock().await.pump.take();
            if let Some(handle) = pump {
                let _ = handle.await;
            }
        }
        Ok(())
    }
}

impl Default for PipeGraph {
    fn default() -> Self {
        Self::new()
    }
}
