//! Spawning the child process.
//!
//! [`Launcher`] is the seam between the connection state machine and the
//! operating system: production uses [`ProcessLauncher`], tests plug in
//! in-memory pipes.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, ChildStderr, Command};

use crate::config::BackendConfig;
use crate::error::BridgeError;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The byte streams of a freshly started child, plus its process handle
/// when there is one.
pub struct Transport {
    /// The child's stdout.
    pub reader: BoxedReader,
    /// The child's stdin.
    pub writer: BoxedWriter,
    pub process: Option<Child>,
}

impl Transport {
    pub fn new(reader: BoxedReader, writer: BoxedWriter) -> Self {
        Self {
            reader,
            writer,
            process: None,
        }
    }
}

#[async_trait]
pub trait Launcher: Send + Sync {
    /// Start a new child and hand back its streams.
    async fn launch(&self) -> Result<Transport, BridgeError>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// Launches `command args… <backend_url>` with piped stdio.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    command: String,
    args: Vec<String>,
    backend_url: String,
}

impl ProcessLauncher {
    pub fn new(command: impl Into<String>, args: Vec<String>, backend_url: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args,
            backend_url: backend_url.into(),
        }
    }

    pub fn from_config(config: &BackendConfig) -> Self {
        Self::new(config.command.clone(), config.args.clone(), config.url.clone())
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch(&self) -> Result<Transport, BridgeError> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .arg(&self.backend_url)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| BridgeError::backend(format!("failed to spawn `{}`: {}", self.command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::backend("failed to capture child stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::backend("failed to capture child stdout"))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(relay_stderr(stderr));
        }

        tracing::info!(
            command = %self.command,
            backend_url = %self.backend_url,
            pid = child.id(),
            "Backend process spawned"
        );

        Ok(Transport {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            process: Some(child),
        })
    }

    fn describe(&self) -> String {
        let mut parts = vec![self.command.clone()];
        parts.extend(self.args.iter().cloned());
        parts.push(self.backend_url.clone());
        parts.join(" ")
    }
}

async fn relay_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(target: "mcp_bridge::backend::stderr", "{}", line);
    }
}
