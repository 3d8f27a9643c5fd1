//! Server session - runs `sleuthxfer serve` as a child process
//!
//! Provides the raw stdout stream. Frame handling is done by the receiver.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};

use crate::server::Request;

/// Manages one request to a `sleuthxfer serve` child process
pub struct ServerSession {
    child: Child,
    stdout: Option<ChildStdout>,
}

/// Options forwarded to the server process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionOptions<'a> {
    pub config: Option<&'a Path>,
    pub verbose: bool,
}

impl ServerSession {
    /// Spawn the current executable in server mode for `request`.
    pub fn connect_local(request: &Request, options: SessionOptions<'_>) -> Result<Self> {
        let exe = std::env::current_exe().context("Failed to locate current executable")?;
        Self::connect_with(&exe, request, options)
    }

    /// Spawn `program` in server mode for `request`.
    pub fn connect_with(
        program: &Path,
        request: &Request,
        options: SessionOptions<'_>,
    ) -> Result<Self> {
        let mut cmd = Command::new(program);

        if let Some(config) = options.config {
            cmd.arg("--config").arg(config);
        }
        if options.verbose {
            cmd.arg("-v");
        }
        cmd.arg("serve");
        cmd.args(request.to_args());

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit());

        tracing::debug!(?request, "spawning server");
        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn {}", program.display()))?;

        let stdout = child.stdout.take().context("Failed to open stdout")?;

        Ok(Self {
            child,
            stdout: Some(stdout),
        })
    }

    /// The server's frame stream.
    pub fn stdout(&mut self) -> Result<&mut ChildStdout> {
        self.stdout.as_mut().context("Server stdout already closed")
    }

    /// Run `receive` on the server's stdout, then reap the child whether or
    /// not receiving succeeded.
    pub fn receive_with<T, F>(mut self, receive: F) -> Result<T>
    where
        F: FnOnce(&mut ChildStdout) -> crate::error::Result<T>,
    {
        let received = receive(self.stdout()?);
        self.finish()?;
        Ok(received?)
    }

    /// Close the stream and reap the child. The exit status is only logged:
    /// the frames already told the receiver how the request went.
    pub fn finish(mut self) -> Result<()> {
        drop(self.stdout.take());
        let status = self.child.wait().context("Failed to wait for server")?;
        if !status.success() {
            tracing::debug!(%status, "server exited unsuccessfully");
        }
        Ok(())
    }
}
