// src/graph/reaper.rs

//! The per-graph reaper task. It is the only place node closure is decided:
//! a node closes when its process has terminated *and* its pump has drained
//! the output to end-of-stream. Deciding on the pair (rather than on
//! termination alone) keeps late-buffered output from being lost and keeps
//! end-of-input from reaching a successor while lines for it are still in
//! flight.

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{GraphCore, NodeId};

#[derive(Debug)]
pub(crate) enum ReapEvent {
    /// From a waiter task: the OS reported process termination.
    Exited {
        pid: u32,
        status: io::Result<ExitStatus>,
    },
    /// From a pump task: the node's output hit end-of-stream and every line
    /// has been dispatched.
    Drained { node: NodeId },
    /// From `PipeGraph::shutdown`.
    Shutdown,
}

pub(crate) async fn reaper_loop(core: Arc<GraphCore>, mut rx: mpsc::Receiver<ReapEvent>) {
    debug!("graph reaper running");
    while let Some(event) = rx.recv().await {
        match event {
            ReapEvent::Exited { pid, status } => on_exited(&core, pid, status).await,
            ReapEvent::Drained { node } => on_drained(&core, node).await,
            ReapEvent::Shutdown => break,
        }
    }
    debug!("graph reaper stopped");
}

async fn on_exited(core: &Arc<GraphCore>, pid: u32, status: io::Result<ExitStatus>) {
    let Some(id) = core.node_for_pid(pid) else {
        warn!(pid, "termination reported for unknown pid; ignoring");
        return;
    };
    let status = status.unwrap_or_else(|e| {
        error!(pid, error = %e, "collecting exit status failed");
        ExitStatus::from_raw(0x7f00)
    });
    let slot = core.slot(id);
    {
        let mut st = slot.state.lock().await;
        st.terminated = true;
        st.child.set_status(status);
        debug!(node = id, pid, status = ?status, "node terminated");
    }
    maybe_close(core, id).await;
}

async fn on_drained(core: &Arc<GraphCore>, id: NodeId) {
    let slot = core.slot(id);
    {
        let mut st = slot.state.lock().await;
        st.drained = true;
    }
    // a waiter for the final manual read may be parked on the watch channel
    slot.progress.send_modify(|p| p.revision += 1);
    maybe_close(core, id).await;
}

/// Closes the node if both halves have arrived, then accounts for the
/// closure at every successor.
async fn maybe_close(core: &Arc<GraphCore>, id: NodeId) {
    let slot = core.slot(id);
    let (succs, pid) = {
        let mut st = slot.state.lock().await;
        if st.closed || !st.terminated || !st.drained {
            return;
        }
        st.closed = true;
        (st.succs.clone(), st.child.id())
    };
    if let Some(pid) = pid {
        core.unregister_pid(pid);
    }
    slot.progress.send_modify(|p| p.closed = true);
    info!(node = id, "node closed");
    for succ in succs {
        resolve_predecessor(core, succ).await;
    }
}

/// One incoming edge of `succ` has resolved. When the last one does, the
/// successor's input receives end-of-input.
async fn resolve_predecessor(core: &Arc<GraphCore>, succ: NodeId) {
    let slot = core.slot(succ);
    let now_zero = {
        let mut st = slot.state.lock().await;
        if st.preds_unresolved == 0 {
            return;
        }
        st.preds_unresolved -= 1;
        st.preds_unresolved == 0
    };
    if now_zero {
        let mut writer = slot.writer.lock().await;
        if let Some(mut w) = writer.take() {
            w.close().await;
        }
        debug!(node = succ, "all predecessors closed; end-of-input sent");
    }
}
