use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use conmon_core::error::AppError;
use conmon_core::models::ExtractionConfig;
use conmon_core::traits::EngineLauncher;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Runs the crawl engine as a child process.
///
/// The child is invoked as `<program> <args…> --config <json>`; its stdout is
/// read line by line to completion, stderr is inherited. A non-zero exit, a
/// broken stream or an overrun of the overall timeout (the child is killed)
/// is an error.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: Duration::from_secs(600),
        }
    }

    /// The running executable with the `engine` subcommand.
    pub fn current_exe() -> Result<Self, AppError> {
        let program = std::env::current_exe().map_err(|e| {
            AppError::ConfigError(format!("cannot locate the current executable: {e}"))
        })?;
        Ok(Self::new(program, vec!["engine".to_string()]))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Append an argument placed before `--config`.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl EngineLauncher for ProcessLauncher {
    async fn launch(&self, config: &ExtractionConfig) -> Result<Vec<String>, AppError> {
        let config_json = serde_json::to_string(config)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg("--config")
            .arg(&config_json)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AppError::EngineError(format!(
                    "failed to start {}: {e}",
                    self.program.display()
                ))
            })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::EngineError("engine stdout was not captured".into()))?;

        let run = async {
            let mut reader = BufReader::new(stdout).lines();
            let mut lines = Vec::new();
            while let Some(line) = reader
                .next_line()
                .await
                .map_err(|e| AppError::EngineError(format!("broken output stream: {e}")))?
            {
                lines.push(line);
            }
            let status = child
                .wait()
                .await
                .map_err(|e| AppError::EngineError(format!("failed to wait for engine: {e}")))?;
            Ok::<_, AppError>((lines, status))
        };

        let (lines, status) = match tokio::time::timeout(self.timeout, run).await {
            Ok(result) => result?,
            Err(_) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "Failed to kill timed out engine");
                }
                return Err(AppError::Timeout(self.timeout.as_secs()));
            }
        };

        if !status.success() {
            return Err(AppError::EngineError(format!(
                "engine exited with {status} after {} lines",
                lines.len()
            )));
        }
        tracing::debug!(lines = lines.len(), "Engine finished");
        Ok(lines)
    }
}
