use std::path::PathBuf;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deadline for an action body when the action sets none (ms)
    pub default_action_timeout_ms: u64,

    /// Deadline for a single polling step when the step sets none (ms)
    pub default_step_timeout_ms: u64,

    /// Interval between snapshot polls (ms)
    pub poll_interval_ms: u64,

    /// Short pause before re-polling after an interstitial dismissal (ms)
    pub watchdog_repoll_ms: u64,

    /// Snapshot cache time-to-live (ms)
    pub snapshot_ttl_ms: u64,

    /// Deadline for ensure_device_ready when the step sets none (ms)
    pub device_ready_timeout_ms: u64,

    /// Interval between boot-completion probes (ms)
    pub boot_poll_interval_ms: u64,

    /// Delay between retry attempts when the step sets none (ms)
    pub retry_delay_ms: u64,

    /// Per-adb-command timeout (ms)
    pub adb_command_timeout_ms: u64,

    /// Where failure artifacts land
    pub artifact_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_action_timeout_ms: 30_000,
            default_step_timeout_ms: 10_000,
            poll_interval_ms: 250,
            watchdog_repoll_ms: 200,
            snapshot_ttl_ms: 400,
            device_ready_timeout_ms: 120_000,
            boot_poll_interval_ms: 1_000,
            retry_delay_ms: 500,
            adb_command_timeout_ms: 10_000,
            artifact_dir: PathBuf::from("artifacts"),
        }
    }
}
