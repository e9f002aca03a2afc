use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::actions::{match_first, Action, Selector, Step};
use crate::driver::snapshot::SnapshotCache;
use crate::driver::traits::DeviceControl;
use crate::driver::uiautomator::Bounds;
use crate::error::EngineError;
use crate::runner::watchdog;
use crate::utils::config::EngineConfig;

const KEY_WAKEUP: &str = "KEYCODE_WAKEUP";
const KEY_UNLOCK: &str = "KEYCODE_MENU";
const KEY_HOME: &str = "KEYCODE_HOME";

/// Executes one action's step tree against the device.
///
/// Never runs concurrently with itself: the engine's single worker owns the
/// only instance, so neither the interpreter nor the snapshot cache needs
/// internal locking beyond what the cache already carries.
pub struct Interpreter {
    device: Arc<dyn DeviceControl>,
    cache: SnapshotCache,
    config: EngineConfig,
}

impl Interpreter {
    pub fn new(device: Arc<dyn DeviceControl>, config: EngineConfig) -> Self {
        let cache = SnapshotCache::new(Duration::from_millis(config.snapshot_ttl_ms));
        Self {
            device,
            cache,
            config,
        }
    }

    /// Run the action to completion or first unrecovered failure.
    ///
    /// A leading run of `ensure_device_ready` steps executes outside the
    /// action deadline: boot time is unbounded and must not count against
    /// the action's own budget. The remainder races a single deadline, and
    /// the timer is dropped on normal completion.
    pub async fn execute(&self, action: &Action) -> Result<(), EngineError> {
        self.settle_interstitial().await;

        let split = action
            .steps
            .iter()
            .position(|s| !matches!(s, Step::EnsureDeviceReady { .. }))
            .unwrap_or(action.steps.len());
        let (ready_steps, rest) = action.steps.split_at(split);

        self.run_sequence(ready_steps).await?;
        if rest.is_empty() {
            return Ok(());
        }

        let budget = Duration::from_millis(
            action
                .timeout
                .unwrap_or(self.config.default_action_timeout_ms),
        );
        let started = Instant::now();
        match tokio::time::timeout(budget, self.run_sequence(rest)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(EngineError::Timeout {
                what: "action deadline".to_string(),
                elapsed_ms: started.elapsed().as_millis() as u64,
            }),
        }
    }

    async fn run_sequence(&self, steps: &[Step]) -> Result<(), EngineError> {
        for step in steps {
            self.settle_interstitial().await;
            self.run_step(step).await?;
        }
        Ok(())
    }

    async fn run_step(&self, step: &Step) -> Result<(), EngineError> {
        debug!("step {}", step.name());
        match step {
            Step::EnsureDeviceReady { timeout } => {
                let budget = Duration::from_millis(
                    timeout.unwrap_or(self.config.device_ready_timeout_ms),
                );
                self.device.wait_for_device(budget).await?;
                self.device
                    .wait_for_boot_complete(
                        budget,
                        Duration::from_millis(self.config.boot_poll_interval_ms),
                    )
                    .await
            }
            Step::WakeAndUnlock => self.wake_and_unlock().await,
            Step::LaunchApp { package, activity } => {
                self.device.start_app(package, activity.as_deref()).await?;
                self.cache.invalidate().await;
                Ok(())
            }
            Step::EnsureAppOpen {
                package,
                activity,
                already_open_selector,
                delay_if_open,
                delay_if_launch,
            } => {
                self.ensure_app_open(
                    package,
                    activity.as_deref(),
                    already_open_selector.as_ref(),
                    *delay_if_open,
                    *delay_if_launch,
                )
                .await
            }
            Step::TapSelector { selector, timeout } => {
                let (_, bounds) = self
                    .wait_for_match(std::slice::from_ref(selector), *timeout)
                    .await?;
                self.tap_bounds(bounds).await
            }
            Step::TapCoordinates { x, y } => {
                self.device.tap(*x, *y).await?;
                self.cache.invalidate().await;
                Ok(())
            }
            Step::WaitForText {
                text,
                text_contains,
                timeout,
            } => {
                let selector = Selector {
                    text: text.clone(),
                    text_contains: text_contains.clone(),
                    ..Selector::default()
                };
                self.wait_for_match(std::slice::from_ref(&selector), *timeout)
                    .await
                    .map(|_| ())
            }
            Step::WaitForSelector { selector, timeout } => self
                .wait_for_match(std::slice::from_ref(selector), *timeout)
                .await
                .map(|_| ()),
            Step::WaitForAnySelector { selectors, timeout } => self
                .wait_for_match(selectors, *timeout)
                .await
                .map(|_| ()),
            Step::Sleep { duration_ms } => {
                tokio::time::sleep(Duration::from_millis(*duration_ms)).await;
                Ok(())
            }
            Step::InputText { text } => {
                self.device.input_text(text).await?;
                self.cache.invalidate().await;
                Ok(())
            }
            Step::Keyevent { code } => {
                self.device.keyevent(code).await?;
                self.cache.invalidate().await;
                Ok(())
            }
            Step::Retry {
                attempts,
                delay,
                steps,
            } => self.run_retry(*attempts, *delay, steps).await,
            Step::Repeat {
                count,
                delay,
                steps,
            } => self.run_repeat(*count, *delay, steps).await,
        }
    }

    /// Sending wake events to an already-awake screen can toggle it back
    /// off, so the screen-state check is mandatory, not an optimization.
    async fn wake_and_unlock(&self) -> Result<(), EngineError> {
        if self.device.is_screen_on().await? {
            debug!("screen already on, skipping wake");
            return Ok(());
        }
        self.device.keyevent(KEY_WAKEUP).await?;
        self.device.keyevent(KEY_UNLOCK).await?;
        self.device.keyevent(KEY_HOME).await?;
        self.cache.invalidate().await;
        Ok(())
    }

    async fn ensure_app_open(
        &self,
        package: &str,
        activity: Option<&str>,
        already_open_selector: Option<&Selector>,
        delay_if_open: Option<u64>,
        delay_if_launch: Option<u64>,
    ) -> Result<(), EngineError> {
        let step_start = Instant::now();

        let open = match already_open_selector {
            Some(selector) => {
                self.cache.invalidate().await;
                match self.cache.elements(self.device.as_ref()).await {
                    Ok(elements) => {
                        match_first(&elements, std::slice::from_ref(selector)).is_some()
                    }
                    Err(err) => {
                        debug!("open-check dump failed, assuming not open: {err}");
                        false
                    }
                }
            }
            None => {
                let foreground = self.device.foreground_package().await?;
                foreground.as_deref() == Some(package)
            }
        };

        if open {
            info!("{package} already open");
            sleep_remainder(step_start, delay_if_open).await;
            return Ok(());
        }

        self.device.start_app(package, activity).await?;
        self.cache.invalidate().await;
        sleep_remainder(step_start, delay_if_launch).await;
        Ok(())
    }

    async fn tap_bounds(&self, bounds: Bounds) -> Result<(), EngineError> {
        let (x, y) = bounds.center();
        self.device.tap(x, y).await?;
        self.cache.invalidate().await;
        Ok(())
    }

    async fn run_retry(
        &self,
        attempts: u32,
        delay: Option<u64>,
        steps: &[Step],
    ) -> Result<(), EngineError> {
        let attempts = attempts.max(1);
        let delay = Duration::from_millis(delay.unwrap_or(self.config.retry_delay_ms));
        let mut last_error = None;

        for attempt in 1..=attempts {
            match Box::pin(self.run_sequence(steps)).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    if attempt < attempts {
                        warn!("attempt {attempt}/{attempts} failed, retrying: {err}");
                        last_error = Some(err);
                        tokio::time::sleep(delay).await;
                    } else {
                        last_error = Some(err);
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            EngineError::DeviceUnreachable("retry executed no attempts".to_string())
        }))
    }

    async fn run_repeat(
        &self,
        count: u32,
        delay: Option<u64>,
        steps: &[Step],
    ) -> Result<(), EngineError> {
        let delay = delay.map(Duration::from_millis);
        for iteration in 1..=count {
            Box::pin(self.run_sequence(steps)).await?;
            if iteration < count {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
            }
        }
        Ok(())
    }

    /// Poll the snapshot until any selector matches or the step deadline
    /// elapses. Every attempt invalidates the cache first so it sees the
    /// current screen, then consults the watchdog against the same dump on a
    /// non-match; a dismissed interstitial triggers a fast re-poll. An error
    /// during a poll is remembered and surfaces only if the deadline is
    /// reached without a match.
    async fn wait_for_match<'a>(
        &self,
        selectors: &'a [Selector],
        timeout: Option<u64>,
    ) -> Result<(&'a Selector, Bounds), EngineError> {
        let budget =
            Duration::from_millis(timeout.unwrap_or(self.config.default_step_timeout_ms));
        let started = Instant::now();
        let mut last_error: Option<EngineError> = None;

        loop {
            self.cache.invalidate().await;
            let mut pause = self.config.poll_interval_ms;

            match self.cache.elements(self.device.as_ref()).await {
                Ok(elements) => {
                    if let Some(hit) = match_first(&elements, selectors) {
                        return Ok(hit);
                    }
                    match watchdog::dismiss_if_present(
                        &elements,
                        self.device.as_ref(),
                        &self.cache,
                    )
                    .await
                    {
                        Ok(true) => pause = self.config.watchdog_repoll_ms,
                        Ok(false) => {}
                        Err(err) => warn!("interstitial dismissal failed: {err}"),
                    }
                }
                Err(err) => {
                    debug!("snapshot poll failed: {err}");
                    last_error = Some(err);
                }
            }

            if started.elapsed() >= budget {
                return Err(last_error.unwrap_or_else(|| {
                    EngineError::SelectorNotFound(describe_selectors(selectors))
                }));
            }
            tokio::time::sleep(Duration::from_millis(pause)).await;
        }
    }

    /// Best-effort interstitial pass run once at action start and before
    /// every step; a failed check never aborts the action.
    async fn settle_interstitial(&self) {
        match self.cache.elements(self.device.as_ref()).await {
            Ok(elements) => {
                if let Err(err) =
                    watchdog::dismiss_if_present(&elements, self.device.as_ref(), &self.cache)
                        .await
                {
                    debug!("interstitial pre-check failed: {err}");
                }
            }
            Err(err) => debug!("interstitial pre-check skipped: {err}"),
        }
    }
}

/// Delays in `ensure_app_open` are wall-clock from step start; only the
/// remainder not already consumed by the open-check is slept.
async fn sleep_remainder(since: Instant, delay_ms: Option<u64>) {
    let Some(delay_ms) = delay_ms else { return };
    let target = Duration::from_millis(delay_ms);
    let elapsed = since.elapsed();
    if elapsed < target {
        tokio::time::sleep(target - elapsed).await;
    }
}

fn describe_selectors(selectors: &[Selector]) -> String {
    selectors
        .iter()
        .map(|s| format!("{{{}}}", s.describe()))
        .collect::<Vec<_>>()
        .join(" or ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::{FakeDevice, EMPTY_DUMP};
    use std::sync::atomic::Ordering;

    const OPEN_DUMP: &str = r#"<hierarchy>
        <node class="Button" text="Open" resource-id="com.chirp.access:id/open" content-desc="" bounds="[100,200][300,250]"/>
    </hierarchy>"#;

    fn interpreter(device: Arc<FakeDevice>) -> Interpreter {
        Interpreter::new(device, EngineConfig::default())
    }

    fn action(steps: Vec<Step>) -> Action {
        Action {
            steps,
            timeout: None,
            description: None,
        }
    }

    #[tokio::test]
    async fn test_wake_and_unlock_is_a_noop_when_screen_is_on() {
        let device = Arc::new(FakeDevice::new());
        device.screen_on.store(true, Ordering::SeqCst);

        interpreter(device.clone())
            .execute(&action(vec![Step::WakeAndUnlock]))
            .await
            .unwrap();

        assert!(device.op_trace().is_empty());
    }

    #[tokio::test]
    async fn test_wake_and_unlock_sends_wake_unlock_home() {
        let device = Arc::new(FakeDevice::new());

        interpreter(device.clone())
            .execute(&action(vec![Step::WakeAndUnlock]))
            .await
            .unwrap();

        assert_eq!(
            device.op_trace(),
            vec![
                "keyevent KEYCODE_WAKEUP",
                "keyevent KEYCODE_MENU",
                "keyevent KEYCODE_HOME"
            ]
        );
    }

    #[tokio::test]
    async fn test_tap_selector_taps_rect_center() {
        let device = Arc::new(FakeDevice::with_dump(OPEN_DUMP));

        interpreter(device.clone())
            .execute(&action(vec![Step::TapSelector {
                selector: Selector {
                    text: Some("Open".to_string()),
                    ..Selector::default()
                },
                timeout: Some(1_000),
            }]))
            .await
            .unwrap();

        assert_eq!(device.op_trace(), vec!["tap 200,225"]);
    }

    #[tokio::test]
    async fn test_retry_runs_exactly_n_attempts_with_delay() {
        let device = Arc::new(FakeDevice::new());
        device.fail_keyevents.store(true, Ordering::SeqCst);

        let started = Instant::now();
        let result = interpreter(device.clone())
            .execute(&action(vec![Step::Retry {
                attempts: 3,
                delay: Some(100),
                steps: vec![Step::Keyevent {
                    code: "66".to_string(),
                }],
            }]))
            .await;

        let failed_attempts = device
            .calls()
            .into_iter()
            .filter(|c| c == "keyevent 66 failed")
            .count();
        assert_eq!(failed_attempts, 3);
        assert!(started.elapsed() >= Duration::from_millis(200));
        // The final attempt's failure propagates unmodified.
        assert!(matches!(result, Err(EngineError::DeviceUnreachable(_))));
    }

    #[tokio::test]
    async fn test_retry_short_circuits_on_success() {
        let device = Arc::new(FakeDevice::new());

        interpreter(device.clone())
            .execute(&action(vec![Step::Retry {
                attempts: 3,
                delay: Some(10),
                steps: vec![Step::TapCoordinates { x: 1, y: 2 }],
            }]))
            .await
            .unwrap();

        assert_eq!(device.op_trace(), vec!["tap 1,2"]);
    }

    #[tokio::test]
    async fn test_repeat_runs_exactly_n_times_with_delay_between() {
        let device = Arc::new(FakeDevice::new());

        let started = Instant::now();
        interpreter(device.clone())
            .execute(&action(vec![Step::Repeat {
                count: 3,
                delay: Some(50),
                steps: vec![Step::TapCoordinates { x: 5, y: 5 }],
            }]))
            .await
            .unwrap();

        assert_eq!(device.op_trace().len(), 3);
        // Two inter-iteration delays, none after the last.
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_repeat_aborts_on_iteration_failure() {
        let device = Arc::new(FakeDevice::new());
        device.fail_keyevents.store(true, Ordering::SeqCst);

        let result = interpreter(device.clone())
            .execute(&action(vec![Step::Repeat {
                count: 5,
                delay: None,
                steps: vec![Step::Keyevent {
                    code: "3".to_string(),
                }],
            }]))
            .await;

        assert!(result.is_err());
        let attempts = device
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("keyevent"))
            .count();
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn test_wait_for_selector_times_out_with_not_found() {
        let device = Arc::new(FakeDevice::with_dump(EMPTY_DUMP));

        let started = Instant::now();
        let result = interpreter(device)
            .execute(&action(vec![Step::WaitForSelector {
                selector: Selector {
                    text: Some("Missing".to_string()),
                    ..Selector::default()
                },
                timeout: Some(500),
            }]))
            .await;

        assert!(started.elapsed() >= Duration::from_millis(500));
        match result {
            Err(EngineError::SelectorNotFound(what)) => assert!(what.contains("Missing")),
            other => panic!("expected SelectorNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ensure_app_open_skips_launch_when_foreground_matches() {
        let device = Arc::new(FakeDevice::new());
        device.set_foreground("com.chirp.access");

        let started = Instant::now();
        interpreter(device.clone())
            .execute(&action(vec![Step::EnsureAppOpen {
                package: "com.chirp.access".to_string(),
                activity: None,
                already_open_selector: None,
                delay_if_open: Some(120),
                delay_if_launch: None,
            }]))
            .await
            .unwrap();

        assert!(device.op_trace().is_empty());
        // delayIfOpen is wall-clock from step start.
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_ensure_app_open_launches_on_foreground_mismatch() {
        let device = Arc::new(FakeDevice::new());
        device.set_foreground("com.other.app");

        interpreter(device.clone())
            .execute(&action(vec![Step::EnsureAppOpen {
                package: "com.chirp.access".to_string(),
                activity: None,
                already_open_selector: None,
                delay_if_open: None,
                delay_if_launch: None,
            }]))
            .await
            .unwrap();

        assert_eq!(device.op_trace(), vec!["launch com.chirp.access"]);
    }

    #[tokio::test]
    async fn test_ensure_app_open_honors_already_open_selector() {
        let device = Arc::new(FakeDevice::with_dump(OPEN_DUMP));

        interpreter(device.clone())
            .execute(&action(vec![Step::EnsureAppOpen {
                package: "com.chirp.access".to_string(),
                activity: None,
                already_open_selector: Some(Selector {
                    text: Some("Open".to_string()),
                    ..Selector::default()
                }),
                delay_if_open: None,
                delay_if_launch: None,
            }]))
            .await
            .unwrap();

        assert!(device.op_trace().is_empty());
    }

    #[tokio::test]
    async fn test_interstitial_is_dismissed_before_waiting_continues() {
        const ANR_DUMP: &str = r#"<hierarchy>
            <node class="TextView" text="System UI isn't responding" bounds="[100,800][980,900]"/>
            <node class="Button" text="Wait" resource-id="android:id/aerr_wait" bounds="[600,1000][980,1100]"/>
        </hierarchy>"#;
        let device = Arc::new(FakeDevice::new());
        device.push_dump(ANR_DUMP);
        device.push_dump(OPEN_DUMP);

        interpreter(device.clone())
            .execute(&action(vec![Step::WaitForSelector {
                selector: Selector {
                    text: Some("Open".to_string()),
                    ..Selector::default()
                },
                timeout: Some(3_000),
            }]))
            .await
            .unwrap();

        assert_eq!(device.op_trace(), vec!["tap 790,1050"]);
    }

    #[tokio::test]
    async fn test_input_text_and_keyevent_pass_through() {
        let device = Arc::new(FakeDevice::new());

        interpreter(device.clone())
            .execute(&action(vec![
                Step::InputText {
                    text: "hello world".to_string(),
                },
                Step::Keyevent {
                    code: "KEYCODE_ENTER".to_string(),
                },
            ]))
            .await
            .unwrap();

        assert_eq!(
            device.op_trace(),
            vec!["input hello world", "keyevent KEYCODE_ENTER"]
        );
    }

    #[tokio::test]
    async fn test_action_deadline_wins_over_running_step() {
        let device = Arc::new(FakeDevice::new());
        let mut act = action(vec![Step::Sleep { duration_ms: 10_000 }]);
        act.timeout = Some(100);

        let started = Instant::now();
        let result = interpreter(device).execute(&act).await;

        assert!(matches!(result, Err(EngineError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_device_ready_prefix_is_outside_action_deadline() {
        let device = Arc::new(FakeDevice::new());
        // Boot takes 300ms but the action deadline is 100ms: the leading
        // prefix must run exempt from the deadline for this to succeed.
        device.boot_delay_ms.store(300, Ordering::SeqCst);
        let mut act = action(vec![
            Step::EnsureDeviceReady { timeout: None },
            Step::TapCoordinates { x: 9, y: 9 },
        ]);
        act.timeout = Some(100);

        let started = Instant::now();
        interpreter(device.clone()).execute(&act).await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(device.op_trace(), vec!["tap 9,9"]);
    }
}
