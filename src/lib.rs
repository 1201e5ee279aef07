// src/lib.rs

//! `pipegraph` wires external processes into a directed graph: each node
//! wraps one process, each edge pipes the source's output lines into the
//! target's input. Fan-out, duplicate edges and cycles are all legal; the
//! graph is driven to completion by a background reaper that closes a
//! node's successors' inputs only once the node has both terminated and
//! been fully drained.
//!
//! ```no_run
//! use pipegraph::{ChildHandle, PipeGraph, Wait};
//!
//! # async fn demo() -> pipegraph::Result<()> {
//! let graph = PipeGraph::new();
//! let producer = graph.node(ChildHandle::new("/bin/echo", ["high to roam"]));
//! let filter = graph.node(ChildHandle::new("/bin/grep", ["-o", "hi"]));
//! producer.pipe_to(&filter).await?;
//! producer.start().await?;
//! assert_eq!(filter.read(Wait::Forever).await?.as_deref(), Some("hi"));
//! filter.finish().await?;
//! graph.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! [`PipeGraph`] must be created inside a tokio runtime; it spawns its
//! reaper task on construction.

pub mod channel;
pub mod child;
pub mod config;
pub mod errors;
pub mod graph;
pub mod logging;

pub use channel::{ChannelWriter, DuplexChannel, LineReader, OutputStream, Wait};
pub use child::ChildHandle;
pub use errors::{Error, Result};
pub use graph::{NodeId, PipeGraph, ProcessNode};
pub use logging::init_logging;
