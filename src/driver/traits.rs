use async_trait::async_trait;
use std::time::Duration;

use crate::error::EngineError;

/// Primitive operations against the device over the adb transport.
///
/// The interpreter is written against this trait so tests can substitute a
/// recording stub. Every call is timeout-bounded and fails with a transport
/// error when the remote shell is unreachable; callers decide whether to
/// retry.
#[async_trait]
pub trait DeviceControl: Send + Sync {
    /// Block until the transport reports the device connected.
    async fn wait_for_device(&self, timeout: Duration) -> Result<(), EngineError>;

    /// Poll the boot-completion property until it reads true.
    async fn wait_for_boot_complete(
        &self,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<(), EngineError>;

    /// Read a system property.
    async fn get_property(&self, key: &str) -> Result<String, EngineError>;

    /// Tap at absolute screen coordinates.
    async fn tap(&self, x: i32, y: i32) -> Result<(), EngineError>;

    /// Send one key event. Accepts numeric codes or `KEYCODE_*` names,
    /// as `input keyevent` does.
    async fn keyevent(&self, code: &str) -> Result<(), EngineError>;

    /// Type literal text into the focused field.
    async fn input_text(&self, text: &str) -> Result<(), EngineError>;

    /// Start an app, either at an explicit activity or via the launcher
    /// intent for the package.
    async fn start_app(&self, package: &str, activity: Option<&str>) -> Result<(), EngineError>;

    async fn is_screen_on(&self) -> Result<bool, EngineError>;

    /// Package name of the foreground app, if it can be determined.
    async fn foreground_package(&self) -> Result<Option<String>, EngineError>;

    /// Raw accessibility dump XML for the current screen.
    async fn dump_ui(&self) -> Result<String, EngineError>;

    /// PNG screenshot bytes.
    async fn screenshot(&self) -> Result<Vec<u8>, EngineError>;
}
