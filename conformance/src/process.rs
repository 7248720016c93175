//! Client IUT process control.
//!
//! The spawned implementation is opaque: we need its captured output for
//! diagnostics, an exit event, and a kill switch, nothing else. The command
//! template is split on whitespace (no shell), with `{url}` replaced by the
//! scenario's entry URL.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::scenario::SetupError;

pub struct ClientProcess {
    child: Option<Child>,
    stdout: Arc<Mutex<String>>,
    stderr: Arc<Mutex<String>>,
}

impl ClientProcess {
    /// Spawn the client IUT with `{url}` substituted into its command line
    /// and scenario context exported through the environment.
    pub fn spawn(
        template: &str,
        entry_url: &str,
        env: &[(String, String)],
    ) -> Result<Self, SetupError> {
        let argv: Vec<String> = template
            .split_whitespace()
            .map(|arg| arg.replace("{url}", entry_url))
            .collect();
        let Some((program, args)) = argv.split_first() else {
            return Err(SetupError::Config("empty client command".to_string()));
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .env("MCP_SERVER_URL", entry_url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(SetupError::Spawn)?;
        tracing::debug!(command = template, %entry_url, "spawned client IUT");

        let stdout = Arc::new(Mutex::new(String::new()));
        let stderr = Arc::new(Mutex::new(String::new()));
        if let Some(pipe) = child.stdout.take() {
            let sink = stdout.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(pipe).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let mut buf = sink.lock();
                    buf.push_str(&line);
                    buf.push('\n');
                }
            });
        }
        if let Some(pipe) = child.stderr.take() {
            let sink = stderr.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(pipe).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let mut buf = sink.lock();
                    buf.push_str(&line);
                    buf.push('\n');
                }
            });
        }

        Ok(Self {
            child: Some(child),
            stdout,
            stderr,
        })
    }

    /// Wait for the process to exit, up to `deadline`. `Ok(None)` means it
    /// is still running.
    pub async fn wait(&mut self, deadline: Duration) -> std::io::Result<Option<std::process::ExitStatus>> {
        let Some(child) = self.child.as_mut() else {
            return Ok(None);
        };
        match tokio::time::timeout(deadline, child.wait()).await {
            Ok(status) => status.map(Some),
            Err(_) => Ok(None),
        }
    }

    pub async fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
        }
    }

    /// Captured (stdout, stderr) so far.
    pub fn output(&self) -> (String, String) {
        (self.stdout.lock().clone(), self.stderr.lock().clone())
    }
}
