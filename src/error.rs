use thiserror::Error;

/// Errors surfaced by the action engine.
///
/// Every terminal failure of an action is wrapped in [`EngineError::ActionFailed`]
/// carrying the underlying cause; callers inspect the cause to decide on
/// remediation. There is no separate fatal channel.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown action '{0}'")]
    UnknownAction(String),

    /// The adb transport failed: binary missing, device offline, command
    /// rejected by the remote shell.
    #[error("device unreachable: {0}")]
    DeviceUnreachable(String),

    /// A step- or action-level deadline elapsed.
    #[error("{what} timed out after {elapsed_ms}ms")]
    Timeout { what: String, elapsed_ms: u64 },

    /// Polling exhausted the deadline without any selector matching.
    #[error("no element matched {0}")]
    SelectorNotFound(String),

    /// The accessibility dump could not be parsed.
    #[error("malformed accessibility snapshot: {0}")]
    MalformedSnapshot(String),

    /// Terminal wrapper handed to the caller of `run_action`.
    #[error("action '{action_id}' failed after {duration_ms}ms: {source}")]
    ActionFailed {
        action_id: String,
        duration_ms: u64,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// The underlying cause of a terminal failure, unwrapping the
    /// `ActionFailed` envelope if present.
    pub fn cause(&self) -> &EngineError {
        match self {
            EngineError::ActionFailed { source, .. } => source,
            other => other,
        }
    }
}
