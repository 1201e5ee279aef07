// src/config/mod.rs

//! Declarative pipeline descriptions.
//!
//! A pipeline file is a TOML table of processes:
//!
//! ```toml
//! [proc.source]
//! program = "/bin/cat"
//! input = ["one", "two"]
//! pipe_to = ["sink"]
//!
//! [proc.sink]
//! program = "/bin/grep"
//! args = ["-o", "on"]
//! output_file = "hits.txt"
//! ```
//!
//! [`build`] turns a parsed description into graph nodes; the caller still
//! decides when to start and finish them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::child::ChildHandle;
use crate::errors::{Error, Result};
use crate::graph::{PipeGraph, ProcessNode};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineFile {
    #[serde(default)]
    pub proc: BTreeMap<String, ProcConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Omitted: inherit the parent environment. Present (even empty):
    /// replace it with exactly these variables.
    #[serde(default)]
    pub env: Option<BTreeMap<String, String>>,
    /// Names of processes this one's output feeds into. Duplicates deliver
    /// duplicate lines, matching `pipe_to` on the node API.
    #[serde(default)]
    pub pipe_to: Vec<String>,
    #[serde(default)]
    pub output_file: Option<PathBuf>,
    /// Lines queued before start; a `'\n'` is appended to each.
    #[serde(default)]
    pub input: Vec<String>,
}

/// Reads and validates a pipeline file.
pub fn load_pipeline(path: impl AsRef<Path>) -> Result<PipelineFile> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| Error::PipelineLoad {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let file: PipelineFile = toml::from_str(&raw).map_err(|e| Error::PipelineLoad {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    validate(&file)?;
    Ok(file)
}

/// Checks that every `pipe_to` target names a process in the file.
pub fn validate(file: &PipelineFile) -> Result<()> {
    for (name, cfg) in &file.proc {
        for target in &cfg.pipe_to {
            if !file.proc.contains_key(target) {
                return Err(Error::InvalidPipeline(format!(
                    "process '{name}' pipes to unknown process '{target}'"
                )));
            }
        }
    }
    Ok(())
}

/// Instantiates the description as nodes of `graph`, wires the edges and
/// sinks, and queues the pre-start input. Returns the nodes by name.
pub async fn build(
    graph: &PipeGraph,
    file: &PipelineFile,
) -> Result<BTreeMap<String, ProcessNode>> {
    validate(file)?;
    let mut nodes = BTreeMap::new();
    for (name, cfg) in &file.proc {
        let mut child = ChildHandle::new(&cfg.program, cfg.args.clone());
        if let Some(env) = &cfg.env {
            child = child.env(env.iter().map(|(k, v)| (k.clone(), v.clone())).collect());
        }
        nodes.insert(name.clone(), graph.node(child));
    }
    for (name, cfg) in &file.proc {
        let node = &nodes[name];
        for target in &cfg.pipe_to {
            node.pipe_to(&nodes[target]).await?;
        }
        if let Some(path) = &cfg.output_file {
            node.output_to_file(path).await?;
        }
        for line in &cfg.input {
            node.write(&format!("{line}\n")).await?;
        }
        debug!(proc = %name, program = %cfg.program, "pipeline process configured");
    }
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_description() {
        let file: PipelineFile = toml::from_str(
            r#"
            [proc.source]
            program = "/bin/cat"
            input = ["one", "two"]
            pipe_to = ["sink"]

            [proc.sink]
            program = "/bin/grep"
            args = ["-o", "on"]
            env = { LANG = "C" }
            output_file = "hits.txt"
            "#,
        )
        .unwrap();
        assert!(validate(&file).is_ok());
        let source = &file.proc["source"];
        assert_eq!(source.pipe_to, ["sink"]);
        assert_eq!(source.input, ["one", "two"]);
        let sink = &file.proc["sink"];
        assert_eq!(sink.args, ["-o", "on"]);
        assert_eq!(sink.env.as_ref().unwrap()["LANG"], "C");
    }

    #[test]
    fn unknown_pipe_target_is_rejected() {
        let file: PipelineFile = toml::from_str(
            r#"
            [proc.lonely]
            program = "/bin/true"
            pipe_to = ["ghost"]
            "#,
        )
        .unwrap();
        match validate(&file) {
            Err(Error::InvalidPipeline(msg)) => {
                assert!(msg.contains("lonely") && msg.contains("ghost"));
            }
            other => panic!("expected InvalidPipeline, got {other:?}"),
        }
    }

    #[test]
    fn empty_description_is_valid() {
        let file: PipelineFile = toml::from_str("").unwrap();
        assert!(file.proc.is_empty());
        assert!(validate(&file).is_ok());
    }
}
