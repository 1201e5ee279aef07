// src/child/mod.rs

//! Ownership of a single external process: describe it, spawn it with piped
//! stdio, and collect its exit status exactly once.

use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, Command};
use tracing::debug;

use crate::channel::DuplexChannel;
use crate::errors::{Error, Result};

/// Describes and owns one child process.
///
/// Build with [`ChildHandle::new`], optionally override the environment,
/// then [`spawn`](ChildHandle::spawn) once. `args` holds only the arguments
/// proper; the argv[0] convention is handled by the process launcher.
pub struct ChildHandle {
    program: String,
    args: Vec<String>,
    env: Option<Vec<(String, String)>>,
    child: Option<Child>,
    pid: Option<u32>,
    status: Option<ExitStatus>,
}

impl ChildHandle {
    pub fn new(
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: None,
            child: None,
            pid: None,
            status: None,
        }
    }

    /// Replace the inherited environment with exactly `vars`. Passing an
    /// empty list gives the child an empty environment; not calling this
    /// inherits the parent's.
    pub fn env(mut self, vars: Vec<(String, String)>) -> Self {
        self.env = Some(vars);
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// OS pid, available once spawned.
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Exit status, available once the process has been waited on.
    pub fn status(&self) -> Option<ExitStatus> {
        self.status
    }

    /// Launches the process with stdin, stdout and stderr piped and returns
    /// the parent end of the channel.
    ///
    /// Failures the OS reports synchronously (missing executable,
    /// permissions) surface here; failures it reports only through the
    /// child show up later as end-of-stream plus a non-zero exit status.
    pub fn spawn(&mut self) -> Result<DuplexChannel> {
        if self.child.is_some() || self.status.is_some() {
            return Err(Error::ChannelSetup("process already spawned".into()));
        }
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(vars) = &self.env {
            cmd.env_clear();
            cmd.envs(vars.iter().cloned());
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = cmd.spawn().map_err(|e| Error::Spawn {
            program: self.program.clone(),
            source: e,
        })?;
        let channel = DuplexChannel::from_child(&mut child)?;
        self.pid = child.id();
        debug!(program = %self.program, pid = ?self.pid, "spawned child process");
        self.child = Some(child);
        Ok(channel)
    }

    /// Waits for the process to exit. Memoized; later calls return the same
    /// status without touching the OS again.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let child = self.child.as_mut().ok_or(Error::NotStarted)?;
        let status = child.wait().await?;
        self.status = Some(status);
        self.child = None;
        Ok(status)
    }

    /// Moves the inner child out, for a caller that waits on it elsewhere
    /// and reports the status back via [`set_status`](Self::set_status).
    pub(crate) fn take_child(&mut self) -> Option<Child> {
        self.child.take()
    }

    pub(crate) fn set_status(&mut self, status: ExitStatus) {
        self.status = Some(status);
    }
}

#[cfg(test)]
mod tests {
    use crate::channel::Wait;

    use super::*;

    #[tokio::test]
    async fn spawn_echo_and_wait_twice() {
        let mut handle = ChildHandle::new("/bin/echo", ["hello"]);
        let mut chan = handle.spawn().unwrap();
        assert!(handle.id().is_some());
        assert_eq!(
            chan.read_line(Wait::Forever).await.unwrap().as_deref(),
            Some("hello\n")
        );
        let first = handle.wait().await.unwrap();
        assert!(first.success());
        let second = handle.wait().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn duplex_round_trip_through_cat() {
        let mut handle = ChildHandle::new("/bin/cat", Vec::<String>::new());
        let mut chan = handle.spawn().unwrap();
        chan.write_all("a\n").await.unwrap();
        assert_eq!(
            chan.read_line(Wait::Forever).await.unwrap().as_deref(),
            Some("a\n")
        );
        chan.write_all("b").await.unwrap();
        chan.close_output().await;
        assert!(chan.can_read_line(Wait::Forever).await);
        assert_eq!(
            chan.read_line(Wait::Forever).await.unwrap().as_deref(),
            Some("b")
        );
        assert_eq!(chan.read_line(Wait::Forever).await.unwrap(), None);
        assert!(handle.wait().await.unwrap().success());
    }

    #[tokio::test]
    async fn missing_executable_is_a_spawn_error() {
        let mut handle = ChildHandle::new("/no/such/binary", Vec::<String>::new());
        match handle.spawn() {
            Err(Error::Spawn { program, .. }) => assert_eq!(program, "/no/such/binary"),
            Err(other) => panic!("expected spawn error, got {other}"),
            Ok(_) => panic!("spawn unexpectedly succeeded"),
        }
    }

    #[tokio::test]
    async fn replaced_environment_is_exact() {
        let mut handle = ChildHandle::new("/bin/sh", ["-c", "echo \"${GREETING:-unset}\""])
            .env(vec![("GREETING".into(), "hi".into())]);
        let mut chan = handle.spawn().unwrap();
        assert_eq!(
            chan.read_line(Wait::Forever).await.unwrap().as_deref(),
            Some("hi\n")
        );
        assert!(handle.wait().await.unwrap().success());

        let mut bare = ChildHandle::new("/bin/sh", ["-c", "echo \"${GREETING:-unset}\""])
            .env(Vec::new());
        let mut chan = bare.spawn().unwrap();
        assert_eq!(
            chan.read_line(Wait::Forever).await.unwrap().as_deref(),
            Some("unset\n")
        );
        assert!(bare.wait().await.unwrap().success());
    }
}
