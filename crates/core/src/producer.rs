//! External merge producer.
//!
//! The merge itself is computed by a separate program (by default the Python
//! merge client). [`ProcessProducer`] runs it as a child process, waits for it
//! with a timeout and returns the decoded JSON payload. Structural validation
//! of the payload is left to the engine's load step.

use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::ProducerConfig;
use crate::errors::ProducerError;

/// Source of merge-result payloads.
pub trait MergeProducer {
    /// Run one merge over `inputs` and return the raw JSON payload.
    fn run_merge(
        &self,
        inputs: &[String],
    ) -> impl Future<Output = Result<serde_json::Value, ProducerError>> + Send;
}

/// Runs the configured command as a child process.
#[derive(Debug, Clone)]
pub struct ProcessProducer {
    command: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    output_file: Option<PathBuf>,
    timeout: Duration,
}

impl ProcessProducer {
    pub fn new(config: &ProducerConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            working_dir: config.working_dir.clone(),
            output_file: config.payload_file().map(PathBuf::from),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Where the payload is read from after a successful run, if not stdout.
    fn output_path(&self) -> Option<PathBuf> {
        let file = self.output_file.as_ref()?;
        match &self.working_dir {
            Some(dir) if file.is_relative() => Some(dir.join(file)),
            _ => Some(file.clone()),
        }
    }

    async fn run(&self, inputs: &[String]) -> Result<serde_json::Value, ProducerError> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .args(inputs)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        // A file left behind by an earlier run must not pass for this run's output.
        if let Some(path) = self.output_path() {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "removed previous producer output"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(ProducerError::FetchFailed(format!(
                        "cannot clear previous producer output {}: {}",
                        path.display(),
                        e
                    )));
                }
            }
        }

        info!(
            command = %self.command,
            args = ?self.args,
            inputs = inputs.len(),
            "running merge producer"
        );

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                warn!(command = %self.command, timeout_secs = self.timeout.as_secs(), "merge producer timed out");
                ProducerError::FetchFailed(format!(
                    "'{}' did not finish within {}s",
                    self.command,
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| {
                warn!(command = %self.command, error = %e, "failed to start merge producer");
                ProducerError::FetchFailed(format!("failed to start '{}': {}", self.command, e))
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            let exit_code = output.status.code();
            warn!(?exit_code, %stderr, "merge producer failed");
            return Err(ProducerError::ProducerFailed {
                exit_code,
                detail: if stderr.is_empty() {
                    "no diagnostic output".into()
                } else {
                    stderr
                },
            });
        }
        if !stderr.is_empty() {
            warn!(%stderr, "merge producer wrote to stderr");
        }

        let payload = match self.output_path() {
            Some(path) => {
                debug!(path = %path.display(), "reading merge producer output file");
                tokio::fs::read_to_string(&path).await.map_err(|e| {
                    ProducerError::FetchFailed(format!(
                        "cannot read producer output {}: {}",
                        path.display(),
                        e
                    ))
                })?
            }
            None => String::from_utf8_lossy(&output.stdout).into_owned(),
        };

        let value: serde_json::Value =
            serde_json::from_str(&payload).map_err(|e| ProducerError::ProducerFailed {
                exit_code: output.status.code(),
                detail: format!("output is not valid JSON: {}", e),
            })?;

        debug!(bytes = payload.len(), "merge producer finished");
        Ok(value)
    }
}

impl MergeProducer for ProcessProducer {
    async fn run_merge(&self, inputs: &[String]) -> Result<serde_json::Value, ProducerError> {
        self.run(inputs).await
    }
}
