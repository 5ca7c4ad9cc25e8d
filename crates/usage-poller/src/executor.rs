use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::{timeout, Duration};

use crate::error::{CollectError, CollectResult};

pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 10;

/// Runs read-only probe commands and returns their standard output
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, program: &str, args: &[String]) -> CollectResult<String>;
}

/// Probe executor backed by `tokio::process`
///
/// Relative program names are resolved against the script directory, when
/// one is configured.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    script_dir: Option<PathBuf>,
    timeout: Duration,
}

impl ProcessExecutor {
    pub fn new(script_dir: Option<PathBuf>, timeout_secs: u64) -> Self {
        Self {
            script_dir,
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    async fn resolve(&self, program: &str) -> PathBuf {
        let path = Path::new(program);
        let Some(dir) = self.script_dir.as_ref().filter(|_| path.is_relative()) else {
            return path.to_path_buf();
        };

        let candidate = dir.join(path);
        if path.components().count() > 1 {
            return candidate;
        }
        match tokio::fs::try_exists(&candidate).await {
            Ok(true) => candidate,
            _ => path.to_path_buf(),
        }
    }
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new(None, DEFAULT_PROBE_TIMEOUT_SECS)
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(&self, program: &str, args: &[String]) -> CollectResult<String> {
        let resolved = self.resolve(program).await;
        let mut command = Command::new(&resolved);
        command.args(args).kill_on_drop(true);

        let output = timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                CollectError::TransientIo(format!(
                    "probe '{}' timed out after {}s",
                    program,
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|error| {
                CollectError::TransientIo(format!("failed to run probe '{}': {}", program, error))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CollectError::TransientIo(format!(
                "probe '{}' exited with {}: {}",
                program,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}
