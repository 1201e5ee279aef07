// src/errors.rs

//! Crate-wide error taxonomy.
//!
//! Caller-misuse conditions (`WriteAfterFinish`, `MixedDeliveryMode`,
//! `EdgesFrozen`, ...) are surfaced immediately and never retried. A child
//! exiting with a non-zero status is *not* an error here; the raw
//! `ExitStatus` is data returned from `finish()`.

use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The parent end of the duplex channel could not be bound (a stdio
    /// handle was missing or already taken).
    #[error("failed to set up process channel: {0}")]
    ChannelSetup(String),

    /// The OS reported a spawn failure synchronously (e.g. executable not
    /// found). Exec failures the OS only reports inside the child are not
    /// distinguishable from a fast-failing program; those show up as EOF
    /// with no output plus a non-zero exit status.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// An operation that requires a started node was called before `start()`.
    #[error("process has not been started")]
    NotStarted,

    /// `write` on a node whose `finish()` already completed.
    #[error("cannot write to a finished process")]
    WriteAfterFinish,

    /// `write` on a node whose stdin has already received end-of-input.
    #[error("process input has already been closed")]
    InputClosed,

    /// `read` on a node that pushes to sinks, or a sink registration on a
    /// node that is manually read. The two delivery modes are exclusive.
    #[error("manual read and sink delivery are mutually exclusive for a node")]
    MixedDeliveryMode,

    /// Edge or sink mutation after `start()`.
    #[error("edges and sinks are frozen once a process has started")]
    EdgesFrozen,

    /// A second `on_line` registration; a node has at most one callback.
    #[error("a line callback is already registered for this node")]
    CallbackAlreadySet,

    /// A file sink could not be opened at `output_to_file` time.
    #[error("cannot open output file {path}: {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A pipeline description referenced unknown processes or was otherwise
    /// inconsistent.
    #[error("invalid pipeline: {0}")]
    InvalidPipeline(String),

    /// A pipeline file could not be read or parsed.
    #[error("failed to load pipeline file {path}: {message}")]
    PipelineLoad { path: PathBuf, message: String },

    /// The graph engine's reaper is gone; no closure transitions can be
    /// observed anymore.
    #[error("graph engine has stopped")]
    EngineStopped,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
