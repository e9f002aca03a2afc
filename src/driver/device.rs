use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::debug;
use regex::Regex;

use crate::driver::adb::AdbTransport;
use crate::driver::traits::DeviceControl;
use crate::error::EngineError;

const SCREENSHOT_TIMEOUT: Duration = Duration::from_secs(30);
const DUMP_TIMEOUT: Duration = Duration::from_secs(15);

/// adb-backed implementation of [`DeviceControl`].
pub struct AdbDevice {
    transport: AdbTransport,
}

impl AdbDevice {
    pub fn new(serial: Option<String>, command_timeout: Duration) -> Result<Self, EngineError> {
        Ok(Self {
            transport: AdbTransport::new(serial, command_timeout)?,
        })
    }
}

/// Escape characters the device shell would otherwise interpret, so the
/// literal text reaches the focused field. `input text` wants spaces as %s.
pub fn escape_input_text(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace(' ', "%s")
        .replace('&', "\\&")
        .replace('(', "\\(")
        .replace(')', "\\)")
        .replace('<', "\\<")
        .replace('>', "\\>")
        .replace('?', "\\?")
        .replace('!', "\\!")
        .replace('\'', "\\'")
        .replace('"', "\\\"")
        .replace('|', "\\|")
        .replace(';', "\\;")
}

/// Resolve the foreground package from combined dumpsys output.
///
/// The fallback order is a compatibility contract observed across platform
/// versions, not a documented guarantee: focused window, then focused app
/// record, then top resumed activity, then resumed/focused activity
/// records. Later lines reflect more current state than earlier ones, so
/// the last match of each source wins.
pub fn parse_foreground_package(dump: &str) -> Option<String> {
    let patterns = [
        r"mCurrentFocus=Window\{[^}]*\s([A-Za-z0-9_.]+)/[^}\s]+",
        r"mFocusedApp=.*?\s([A-Za-z0-9_.]+)/[^}\s]+",
        r"topResumedActivity=ActivityRecord\{[^}]*\s([A-Za-z0-9_.]+)/[^}\s]+",
        r"ResumedActivity:\s*ActivityRecord\{[^}]*\s([A-Za-z0-9_.]+)/[^}\s]+",
        r"mFocusedActivity:\s*ActivityRecord\{[^}]*\s([A-Za-z0-9_.]+)/[^}\s]+",
    ];

    for pattern in patterns {
        let re = Regex::new(pattern).unwrap();
        if let Some(caps) = re.captures_iter(dump).last() {
            return Some(caps[1].to_string());
        }
    }

    None
}

#[async_trait]
impl DeviceControl for AdbDevice {
    async fn wait_for_device(&self, timeout: Duration) -> Result<(), EngineError> {
        self.transport
            .exec(&["wait-for-device"], Some(timeout))
            .await?;
        Ok(())
    }

    async fn wait_for_boot_complete(
        &self,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<(), EngineError> {
        let start = Instant::now();
        loop {
            match self.get_property("sys.boot_completed").await {
                Ok(value) if value == "1" => return Ok(()),
                Ok(_) => {}
                Err(err) => debug!("boot probe failed: {err}"),
            }

            if start.elapsed() >= timeout {
                return Err(EngineError::Timeout {
                    what: "waiting for boot completion".to_string(),
                    elapsed_ms: start.elapsed().as_millis() as u64,
                });
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    async fn get_property(&self, key: &str) -> Result<String, EngineError> {
        let output = self.transport.shell(&format!("getprop {key}"), None).await?;
        Ok(output.trim().to_string())
    }

    async fn tap(&self, x: i32, y: i32) -> Result<(), EngineError> {
        self.transport
            .shell(&format!("input tap {x} {y}"), None)
            .await?;
        Ok(())
    }

    async fn keyevent(&self, code: &str) -> Result<(), EngineError> {
        self.transport
            .shell(&format!("input keyevent {code}"), None)
            .await?;
        Ok(())
    }

    async fn input_text(&self, text: &str) -> Result<(), EngineError> {
        let escaped = escape_input_text(text);
        self.transport
            .shell(&format!("input text {escaped}"), None)
            .await?;
        Ok(())
    }

    async fn start_app(&self, package: &str, activity: Option<&str>) -> Result<(), EngineError> {
        match activity {
            Some(activity) => {
                self.transport
                    .shell(&format!("am start -n {package}/{activity}"), None)
                    .await?;
            }
            None => {
                // No explicit entry point; let the launcher intent pick it.
                self.transport
                    .shell(
                        &format!("monkey -p {package} -c android.intent.category.LAUNCHER 1"),
                        None,
                    )
                    .await?;
            }
        }
        Ok(())
    }

    async fn is_screen_on(&self) -> Result<bool, EngineError> {
        let output = self.transport.shell("dumpsys power", None).await?;
        Ok(output.contains("mWakefulness=Awake") || output.contains("Display Power: state=ON"))
    }

    async fn foreground_package(&self) -> Result<Option<String>, EngineError> {
        // grep on-device to keep the transfer small; `|| true` because grep
        // exits non-zero on no match.
        let mut dump = self
            .transport
            .shell(
                "dumpsys window | grep -E 'mCurrentFocus|mFocusedApp' || true",
                None,
            )
            .await?;

        match self
            .transport
            .shell(
                "dumpsys activity activities | grep -E 'ResumedActivity|mFocusedActivity' || true",
                None,
            )
            .await
        {
            Ok(more) => {
                dump.push('\n');
                dump.push_str(&more);
            }
            Err(err) => debug!("activity dump unavailable: {err}"),
        }

        Ok(parse_foreground_package(&dump))
    }

    async fn dump_ui(&self) -> Result<String, EngineError> {
        // Fast path: dump straight to stdout, no file I/O on the device.
        if let Ok(output) = self
            .transport
            .exec_out("uiautomator dump /dev/stdout", Some(DUMP_TIMEOUT))
            .await
        {
            if output.contains("<?xml") {
                return Ok(output);
            }
        }

        // Older builds refuse to dump to a pipe; go through a file.
        self.transport
            .shell(
                "uiautomator dump /sdcard/window_dump.xml > /dev/null && cat /sdcard/window_dump.xml",
                Some(DUMP_TIMEOUT),
            )
            .await
    }

    async fn screenshot(&self) -> Result<Vec<u8>, EngineError> {
        self.transport
            .exec_out_binary("screencap -p", Some(SCREENSHOT_TIMEOUT))
            .await
    }
}
