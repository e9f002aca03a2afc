use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use log::debug;
use tokio::process::Command;

use crate::error::EngineError;
use crate::utils::binary_resolver;

/// Thin wrapper around the adb binary. One instance per target device;
/// every command is bounded by a timeout.
pub struct AdbTransport {
    adb_path: PathBuf,
    serial: Option<String>,
    command_timeout: Duration,
}

impl AdbTransport {
    pub fn new(serial: Option<String>, command_timeout: Duration) -> Result<Self, EngineError> {
        let adb_path = binary_resolver::find_adb()
            .map_err(|e| EngineError::DeviceUnreachable(e.to_string()))?;
        Ok(Self {
            adb_path,
            serial,
            command_timeout,
        })
    }

    fn full_args(&self, args: &[&str]) -> Vec<String> {
        let mut full = Vec::new();
        if let Some(s) = &self.serial {
            full.push("-s".to_string());
            full.push(s.clone());
        }
        full.extend(args.iter().map(|a| a.to_string()));
        full
    }

    async fn run(
        &self,
        args: &[&str],
        timeout: Option<Duration>,
    ) -> Result<std::process::Output, EngineError> {
        let full_args = self.full_args(args);
        debug!("adb {}", full_args.join(" "));

        let budget = timeout.unwrap_or(self.command_timeout);
        let output = Command::new(&self.adb_path)
            .args(&full_args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();

        tokio::time::timeout(budget, output)
            .await
            .map_err(|_| EngineError::Timeout {
                what: format!("adb {}", full_args.join(" ")),
                elapsed_ms: budget.as_millis() as u64,
            })?
            .map_err(|e| EngineError::DeviceUnreachable(format!("failed to run adb: {e}")))
    }

    /// Run `adb <args>` and return stdout as text.
    pub async fn exec(&self, args: &[&str], timeout: Option<Duration>) -> Result<String, EngineError> {
        let output = self.run(args, timeout).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::DeviceUnreachable(format!(
                "adb {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Run a command through the device shell.
    pub async fn shell(&self, cmd: &str, timeout: Option<Duration>) -> Result<String, EngineError> {
        self.exec(&["shell", cmd], timeout).await
    }

    /// Run `adb exec-out <cmd>` and return raw stdout bytes. exec-out skips
    /// the shell's tty mangling, so it is the route for binary output such
    /// as screenshots. exec-out does not always report an exit status, so a
    /// non-empty stdout counts as success.
    pub async fn exec_out_binary(
        &self,
        cmd: &str,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, EngineError> {
        let output = self.run(&["exec-out", cmd], timeout).await?;
        if output.stdout.is_empty() && !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::DeviceUnreachable(format!(
                "adb exec-out {} failed: {}",
                cmd,
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    }

    /// Text variant of exec-out, used for the UI dump fast path.
    pub async fn exec_out(&self, cmd: &str, timeout: Option<Duration>) -> Result<String, EngineError> {
        let bytes = self.exec_out_binary(cmd, timeout).await?;
        Ok(String::from_utf8_lossy(&bytes).to_string())
    }
}
