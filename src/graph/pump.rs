// src/graph/pump.rs

//! Per-node pump task: drains a started node's output continuously and
//! dispatches every line to the node's sinks. Draining never waits on any
//! consumer's state lock, so a stalled reader elsewhere cannot back up this
//! node's pipe.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::reaper::ReapEvent;
use super::{GraphCore, NodeId};
use crate::channel::OutputStream;

pub(crate) async fn run(core: Arc<GraphCore>, id: NodeId, mut output: OutputStream) {
    while let Some(line) = output.next_line().await {
        dispatch(&core, id, line).await;
    }
    debug!(node = id, "output drained to end-of-stream");
    let _ = core.events().send(ReapEvent::Drained { node: id }).await;
}

/// Sink order per line: callback, file sinks, successors in edge order.
/// Callback and the manual-read buffer get the line with its terminator
/// stripped; files and successors get the raw text.
async fn dispatch(core: &Arc<GraphCore>, id: NodeId, raw: String) {
    let slot = core.slot(id);
    let succs = {
        let mut st = slot.state.lock().await;
        let stripped = raw.strip_suffix('\n').unwrap_or(&raw);
        if let Some(cb) = st.callback.as_mut() {
            cb(stripped);
        }
        for file in st.files.iter_mut() {
            if let Err(e) = file.write_all(raw.as_bytes()).await {
                warn!(node = id, error = %e, "file sink write failed");
            } else {
                let _ = file.flush().await;
            }
        }
        if !st.has_sink() {
            let line = stripped.to_string();
            st.pending_out.push_back(line);
        }
        st.succs.clone()
    };
    slot.progress.send_modify(|p| p.revision += 1);
    for succ in succs {
        let dst = core.slot(succ);
        let mut writer = dst.writer.lock().await;
        match writer.as_mut() {
            Some(w) => {
                if let Err(e) = w.write_all(&raw).await {
                    debug!(node = id, succ, error = %e, "successor gone; line dropped");
                }
            }
            None => debug!(node = id, succ, "successor input closed; line dropped"),
        }
    }
}
