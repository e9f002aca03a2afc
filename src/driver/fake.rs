use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::driver::traits::DeviceControl;
use crate::error::EngineError;

pub const EMPTY_DUMP: &str = r#"<?xml version='1.0'?><hierarchy rotation="0"></hierarchy>"#;

/// Recording stub device for interpreter and engine tests.
///
/// Read-only queries are recorded with a `query`/`dump` prefix so tests can
/// filter down to the state-changing device-operation trace.
#[derive(Default)]
pub struct FakeDevice {
    calls: Mutex<Vec<String>>,
    pub screen_on: AtomicBool,
    pub foreground: Mutex<Option<String>>,
    /// Dumps are served front-to-back; the last one repeats.
    dumps: Mutex<VecDeque<String>>,
    pub dump_count: AtomicUsize,
    pub fail_keyevents: AtomicBool,
    /// Simulated boot time for wait_for_boot_complete.
    pub boot_delay_ms: AtomicU64,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dump(xml: &str) -> Self {
        let fake = Self::default();
        fake.push_dump(xml);
        fake
    }

    pub fn push_dump(&self, xml: &str) {
        self.dumps.lock().unwrap().push_back(xml.to_string());
    }

    pub fn set_foreground(&self, package: &str) {
        *self.foreground.lock().unwrap() = Some(package.to_string());
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// The state-changing operations, in order.
    pub fn op_trace(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.starts_with("query") && !c.starts_with("dump"))
            .collect()
    }
}

#[async_trait]
impl DeviceControl for FakeDevice {
    async fn wait_for_device(&self, _timeout: Duration) -> Result<(), EngineError> {
        self.record("query wait_for_device");
        Ok(())
    }

    async fn wait_for_boot_complete(
        &self,
        _timeout: Duration,
        _poll_interval: Duration,
    ) -> Result<(), EngineError> {
        self.record("query wait_for_boot");
        let delay = self.boot_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(())
    }

    async fn get_property(&self, key: &str) -> Result<String, EngineError> {
        self.record(format!("query getprop {key}"));
        Ok("1".to_string())
    }

    async fn tap(&self, x: i32, y: i32) -> Result<(), EngineError> {
        self.record(format!("tap {x},{y}"));
        Ok(())
    }

    async fn keyevent(&self, code: &str) -> Result<(), EngineError> {
        if self.fail_keyevents.load(Ordering::SeqCst) {
            self.record(format!("keyevent {code} failed"));
            return Err(EngineError::DeviceUnreachable("keyevent rejected".to_string()));
        }
        self.record(format!("keyevent {code}"));
        if code == "KEYCODE_WAKEUP" {
            self.screen_on.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn input_text(&self, text: &str) -> Result<(), EngineError> {
        self.record(format!("input {text}"));
        Ok(())
    }

    async fn start_app(&self, package: &str, activity: Option<&str>) -> Result<(), EngineError> {
        self.record(match activity {
            Some(activity) => format!("launch {package}/{activity}"),
            None => format!("launch {package}"),
        });
        self.set_foreground(package);
        Ok(())
    }

    async fn is_screen_on(&self) -> Result<bool, EngineError> {
        self.record("query screen");
        Ok(self.screen_on.load(Ordering::SeqCst))
    }

    async fn foreground_package(&self) -> Result<Option<String>, EngineError> {
        self.record("query foreground");
        Ok(self.foreground.lock().unwrap().clone())
    }

    async fn dump_ui(&self) -> Result<String, EngineError> {
        self.record("dump");
        self.dump_count.fetch_add(1, Ordering::SeqCst);
        let mut dumps = self.dumps.lock().unwrap();
        if dumps.len() > 1 {
            Ok(dumps.pop_front().unwrap())
        } else {
            Ok(dumps
                .front()
                .cloned()
                .unwrap_or_else(|| EMPTY_DUMP.to_string()))
        }
    }

    async fn screenshot(&self) -> Result<Vec<u8>, EngineError> {
        self.record("query screenshot");
        Ok(vec![0x89, b'P', b'N', b'G'])
    }
}
