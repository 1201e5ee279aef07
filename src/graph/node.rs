// src/graph/node.rs

use std::collections::VecDeque;
use std::path::Path;
use std::process::ExitStatus;
use std::sync::Arc;

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tokio::time::timeout_at;
use tracing::{debug, info};

use super::pump;
use super::reaper::ReapEvent;
use super::{GraphCore, NodeId};
use crate::channel::{Budget, Wait};
use crate::child::ChildHandle;
use crate::errors::{Error, Result};

/// How a node's output leaves it. The first sink registration fixes `Push`,
/// the first manual `read` fixes `Pull`; the modes are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Push,
    Pull,
}

pub(crate) struct NodeState {
    pub child: ChildHandle,
    /// Outgoing edges in registration order; duplicates mean duplicate
    /// delivery.
    pub succs: Vec<NodeId>,
    /// Incoming edges, used only to pull the whole component up at start.
    pub preds: Vec<NodeId>,
    /// Predecessors whose closure has not yet been accounted for. Counts
    /// edges, not distinct nodes, so duplicate edges resolve one by one.
    pub preds_unresolved: usize,
    pub callback: Option<Box<dyn FnMut(&str) + Send>>,
    pub files: Vec<File>,
    /// Lines buffered for manual `read` when the node has no sink,
    /// terminators stripped.
    pub pending_out: VecDeque<String>,
    /// Input queued before `start()`, flushed in order at start.
    pub pending_in: VecDeque<String>,
    pub delivery: Option<Delivery>,
    pub started: bool,
    pub finished: bool,
    pub terminated: bool,
    pub drained: bool,
    pub closed: bool,
    pub pump: Option<JoinHandle<()>>,
}

impl NodeState {
    pub fn new(child: ChildHandle) -> Self {
        Self {
            child,
            succs: Vec::new(),
            preds: Vec::new(),
            preds_unresolved: 0,
            callback: None,
            files: Vec::new(),
            pending_out: VecDeque::new(),
            pending_in: VecDeque::new(),
            delivery: None,
            started: false,
            finished: false,
            terminated: false,
            drained: false,
            closed: false,
            pump: None,
        }
    }

    pub fn has_sink(&self) -> bool {
        self.callback.is_some() || !self.files.is_empty() || !self.succs.is_empty()
    }

    fn mark_push(&mut self) -> Result<()> {
        if self.delivery == Some(Delivery::Pull) {
            return Err(Error::MixedDeliveryMode);
        }
        self.delivery = Some(Delivery::Push);
        Ok(())
    }
}

/// A handle to one node of a [`PipeGraph`](super::PipeGraph). Cheap to
/// clone; all clones address the same underlying process.
#[derive(Clone)]
pub struct ProcessNode {
    core: Arc<GraphCore>,
    id: NodeId,
}

impl ProcessNode {
    pub(crate) fn from_parts(core: Arc<GraphCore>, id: NodeId) -> Self {
        Self { core, id }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Registers the node's single line callback. Pre-start only; the line
    /// is passed with its terminator stripped.
    pub async fn on_line(&self, f: impl FnMut(&str) + Send + 'static) -> Result<()> {
        let slot = self.core.slot(self.id);
        let mut st = slot.state.lock().await;
        if st.started {
            return Err(Error::EdgesFrozen);
        }
        if st.callback.is_some() {
            return Err(Error::CallbackAlreadySet);
        }
        st.mark_push()?;
        st.callback = Some(Box::new(f));
        Ok(())
    }

    /// Adds an edge feeding this node's output into `other`'s input and
    /// returns `other` for chaining. Pre-start only. Duplicate edges and
    /// self-loops are legal; each registration delivers independently.
    pub async fn pipe_to(&self, other: &ProcessNode) -> Result<ProcessNode> {
        if !Arc::ptr_eq(&self.core, &other.core) {
            return Err(Error::InvalidPipeline(
                "cannot pipe between nodes of different graphs".into(),
            ));
        }
        let src = self.core.slot(self.id);
        if self.id == other.id {
            let mut st = src.state.lock().await;
            if st.started {
                return Err(Error::EdgesFrozen);
            }
            st.mark_push()?;
            st.succs.push(other.id);
            st.preds.push(self.id);
            st.preds_unresolved += 1;
            return Ok(other.clone());
        }
        let dst = self.core.slot(other.id);
        {
            let st = dst.state.lock().await;
            if st.started {
                return Err(Error::EdgesFrozen);
            }
        }
        {
            let mut st = src.state.lock().await;
            if st.started {
                return Err(Error::EdgesFrozen);
            }
            st.mark_push()?;
            st.succs.push(other.id);
        }
        let mut st = dst.state.lock().await;
        st.preds.push(self.id);
        st.preds_unresolved += 1;
        Ok(other.clone())
    }

    /// Adds a file sink. Pre-start only; may be called repeatedly for
    /// multiple files. Lines are written verbatim and flushed one by one.
    pub async fn output_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let slot = self.core.slot(self.id);
        if slot.state.lock().await.started {
            return Err(Error::EdgesFrozen);
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .await
            .map_err(|e| Error::FileOpen {
                path: path.to_path_buf(),
                source: e,
            })?;
        let mut st = slot.state.lock().await;
        if st.started {
            return Err(Error::EdgesFrozen);
        }
        st.mark_push()?;
        st.files.push(file);
        Ok(())
    }

    /// Sends raw text to the process's input. The caller supplies line
    /// terminators. Before `start()` the text is queued and flushed at
    /// start, in order.
    pub async fn write(&self, text: &str) -> Result<()> {
        let slot = self.core.slot(self.id);
        {
            let mut st = slot.state.lock().await;
            if st.finished {
                return Err(Error::WriteAfterFinish);
            }
            if !st.started {
                st.pending_in.push_back(text.to_string());
                debug!(node = self.id, "queued input before start");
                return Ok(());
            }
        }
        let mut writer = slot.writer.lock().await;
        match writer.as_mut() {
            Some(w) => w.write_all(text).await.map_err(Error::Io),
            None => Err(Error::InputClosed),
        }
    }

    /// Explicit end-of-input, for source nodes feeding long-running
    /// consumers. The engine sends it automatically once all predecessors
    /// have closed; this is for nodes with none, or for cutting a feed
    /// short. Idempotent.
    pub async fn close_input(&self) -> Result<()> {
        let slot = self.core.slot(self.id);
        {
            let st = slot.state.lock().await;
            if !st.started {
                return Err(Error::NotStarted);
            }
        }
        let mut writer = slot.writer.lock().await;
        if let Some(mut w) = writer.take() {
            w.close().await;
            debug!(node = self.id, "end-of-input sent");
        }
        Ok(())
    }

    /// Starts this node and, transitively, every node connected to it
    /// through edges in either direction. Safe on cyclic graphs; a node
    /// already running is left alone. Queued input is flushed after the
    /// whole component is up.
    pub async fn start(&self) -> Result<()> {
        let mut newly_started = Vec::new();
        let mut work = vec![self.id];
        while let Some(id) = work.pop() {
            let slot = self.core.slot(id);
            let mut st = slot.state.lock().await;
            if st.started {
                continue;
            }
            st.started = true;
            let channel = match st.child.spawn() {
                Ok(channel) => channel,
                Err(e) => {
                    st.started = false;
                    return Err(e);
                }
            };
            let (writer, output) = channel.split();
            *slot.writer.lock().await = Some(writer);
            let pid = st.child.id();
            if let (Some(pid), Some(child)) = (pid, st.child.take_child()) {
                self.core.register_pid(pid, id);
                let events = self.core.events().clone();
                tokio::spawn(reap_on_exit(events, pid, child));
            }
            st.pump = Some(tokio::spawn(pump::run(
                Arc::clone(&self.core),
                id,
                output,
            )));
            work.extend(st.succs.iter().copied());
            work.extend(st.preds.iter().copied());
            info!(node = id, program = %st.child.program(), pid = ?pid, "node started");
            drop(st);
            newly_started.push(id);
        }
        for id in newly_started {
            self.flush_pending_input(id).await?;
        }
        Ok(())
    }

    async fn flush_pending_input(&self, id: NodeId) -> Result<()> {
        let slot = self.core.slot(id);
        loop {
            let next = slot.state.lock().await.pending_in.pop_front();
            let Some(text) = next else { return Ok(()) };
            let mut writer = slot.writer.lock().await;
            match writer.as_mut() {
                Some(w) => w.write_all(&text).await?,
                None => return Err(Error::InputClosed),
            }
        }
    }

    /// Reads the next output line, terminator stripped. Only legal on a
    /// node without sinks; the first call fixes the node in pull mode.
    /// `Ok(None)` means no line within the wait budget, or — once the node
    /// has drained — that no more lines will ever come.
    pub async fn read(&self, wait: Wait) -> Result<Option<String>> {
        let slot = self.core.slot(self.id);
        let mut rx = slot.progress.subscribe();
        let budget = wait.budget();
        loop {
            {
                let mut st = slot.state.lock().await;
                if st.has_sink() {
                    return Err(Error::MixedDeliveryMode);
                }
                st.delivery = Some(Delivery::Pull);
                if let Some(line) = st.pending_out.pop_front() {
                    return Ok(Some(line));
                }
                if st.drained {
                    return Ok(None);
                }
            }
            match budget {
                Budget::Poll => return Ok(None),
                Budget::Forever => {
                    rx.changed().await.map_err(|_| Error::EngineStopped)?;
                }
                Budget::Until(at) => match timeout_at(at, rx.changed()).await {
                    Ok(changed) => changed.map_err(|_| Error::EngineStopped)?,
                    Err(_) => return Ok(None),
                },
            }
        }
    }

    /// Blocks until the node is closed (process terminated *and* output
    /// fully drained and dispatched) and returns its exit status. If the
    /// node has no unresolved predecessors its input is closed first, so a
    /// filter-style child sees end-of-input and can exit. Idempotent.
    pub async fn finish(&self) -> Result<ExitStatus> {
        let slot = self.core.slot(self.id);
        let mut rx = {
            let st = slot.state.lock().await;
            if !st.started {
                return Err(Error::NotStarted);
            }
            if st.finished {
                return st.child.status().ok_or(Error::EngineStopped);
            }
            slot.progress.subscribe()
        };
        let close_own_input = slot.state.lock().await.preds_unresolved == 0;
        if close_own_input {
            let mut writer = slot.writer.lock().await;
            if let Some(mut w) = writer.take() {
                w.close().await;
            }
        }
        rx.wait_for(|p| p.closed)
            .await
            .map_err(|_| Error::EngineStopped)?;
        let mut st = slot.state.lock().await;
        st.finished = true;
        for file in st.files.iter_mut() {
            let _ = file.flush().await;
        }
        st.files.clear();
        let status = st.child.status().ok_or(Error::EngineStopped)?;
        info!(node = self.id, status = ?status, "node finished");
        Ok(status)
    }

    pub async fn is_started(&self) -> bool {
        self.core.slot(self.id).state.lock().await.started
    }
}

/// Waiter task: collects the exit status and hands it to the reaper.
async fn reap_on_exit(
    events: tokio::sync::mpsc::Sender<ReapEvent>,
    pid: u32,
    mut child: tokio::process::Child,
) {
    let status = child.wait().await;
    let _ = events.send(ReapEvent::Exited { pid, status }).await;
}
