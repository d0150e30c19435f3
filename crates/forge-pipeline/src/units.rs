//! Generic unit adapters: external commands and dry-run stubs.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;

use forge_types::{ForgeError, Result};

use crate::registry::UnitHandler;

// ---------------------------------------------------------------------------
// CommandUnit: JSON in on stdin, JSON out on stdout
// ---------------------------------------------------------------------------

pub struct CommandUnit {
    name: String,
    program: String,
    args: Vec<String>,
    workdir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl CommandUnit {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            workdir: None,
            timeout: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn failed(&self, message: impl Into<String>) -> ForgeError {
        ForgeError::UnitFailed {
            unit: self.name.clone(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl UnitHandler for CommandUnit {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, input: Value) -> Result<Value> {
        tracing::info!(unit = %self.name, program = %self.program, "Executing unit command");

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = self.workdir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| self.failed(format!("Failed to spawn '{}': {}", self.program, e)))?;

        // Feed stdin from a separate task so a chatty child cannot deadlock us.
        let payload = serde_json::to_vec(&input)?;
        let writer = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                stdin.write_all(&payload).await?;
                stdin.shutdown().await?;
                Ok::<(), std::io::Error>(())
            })
        });

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| ForgeError::CommandTimeout {
                    timeout_ms: limit.as_millis() as u64,
                })?,
            None => child.wait_with_output().await,
        }
        .map_err(|e| self.failed(format!("Command execution failed: {}", e)))?;

        if let Some(writer) = writer {
            match writer.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::debug!(unit = %self.name, error = %e, "Failed to write unit input to stdin");
                }
                Err(e) => {
                    tracing::debug!(unit = %self.name, error = %e, "Stdin writer task did not finish");
                }
            }
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::debug!(
            unit = %self.name,
            exit_code = output.status.code().unwrap_or(-1),
            stdout_len = stdout.len(),
            stderr_len = stderr.len(),
            "Unit command finished"
        );

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            let detail = stderr.trim();
            return Err(self.failed(if detail.is_empty() {
                format!("exit code {code}")
            } else {
                format!("exit code {code}: {detail}")
            }));
        }

        serde_json::from_str(stdout.trim())
            .map_err(|e| self.failed(format!("stdout is not valid JSON: {e}")))
    }
}

// ---------------------------------------------------------------------------
// StubUnit: dry-run echo
// ---------------------------------------------------------------------------

/// Echoes its input without doing any work. Used for dry runs.
pub struct StubUnit {
    name: String,
}

impl StubUnit {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl UnitHandler for StubUnit {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, input: Value) -> Result<Value> {
        tracing::info!(unit = %self.name, "Dry run, skipping unit execution");
        Ok(json!({
            "unit": self.name,
            "dry_run": true,
            "input": input,
        }))
    }
}
