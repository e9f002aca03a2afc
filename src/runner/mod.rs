pub mod artifacts;
pub mod executor;
pub mod state;
pub mod watchdog;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use log::{error, info};
use tokio::sync::{mpsc, oneshot};

use crate::actions::{Action, ActionBook};
use crate::driver::traits::DeviceControl;
use crate::error::EngineError;
use crate::utils::config::EngineConfig;

pub use executor::Interpreter;
pub use state::{EngineState, ExecutionResult, ExecutionStatus, InFlight, Readiness};

struct Job {
    action_id: String,
    action: Action,
    reply: oneshot::Sender<Result<ExecutionResult, EngineError>>,
}

/// Serialized execution front-end.
///
/// Requests are admitted immediately but execute strictly one at a time in
/// arrival order: an unbounded channel feeds a single worker task, so a
/// failed job never breaks the chain. Status queries read a snapshot and
/// never block on the execution lane.
#[derive(Clone)]
pub struct ActionEngine {
    tx: mpsc::UnboundedSender<Job>,
    book: Arc<ActionBook>,
    device: Arc<dyn DeviceControl>,
    status: Arc<Mutex<EngineState>>,
}

impl ActionEngine {
    pub fn new(device: Arc<dyn DeviceControl>, book: ActionBook, config: EngineConfig) -> Self {
        let status = Arc::new(Mutex::new(EngineState::default()));
        let interpreter = Interpreter::new(device.clone(), config.clone());
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(run_worker(
            rx,
            interpreter,
            device.clone(),
            config.artifact_dir,
            status.clone(),
        ));

        Self {
            tx,
            book: Arc::new(book),
            device,
            status,
        }
    }

    /// Run one action to completion.
    ///
    /// An unknown id fails before any device interaction and without
    /// artifact capture. Any other terminal failure comes back as
    /// [`EngineError::ActionFailed`] carrying the cause and elapsed time.
    pub async fn run_action(&self, action_id: &str) -> Result<ExecutionResult, EngineError> {
        let action = self
            .book
            .get(action_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownAction(action_id.to_string()))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Job {
                action_id: action_id.to_string(),
                action,
                reply: reply_tx,
            })
            .map_err(|_| EngineError::DeviceUnreachable("execution lane closed".to_string()))?;

        reply_rx
            .await
            .map_err(|_| EngineError::DeviceUnreachable("execution lane closed".to_string()))?
    }

    /// Read-only snapshot of the in-flight request and the last result.
    pub fn state(&self) -> EngineState {
        self.status.lock().unwrap().clone()
    }

    /// Thin readiness pass-through; never touches the execution lane.
    pub async fn readiness(&self) -> Readiness {
        match self.device.get_property("sys.boot_completed").await {
            Ok(value) => Readiness {
                device_reachable: true,
                boot_completed: value.trim() == "1",
            },
            Err(_) => Readiness {
                device_reachable: false,
                boot_completed: false,
            },
        }
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<Job>,
    interpreter: Interpreter,
    device: Arc<dyn DeviceControl>,
    artifact_dir: PathBuf,
    status: Arc<Mutex<EngineState>>,
) {
    while let Some(job) = rx.recv().await {
        let started_at = Utc::now();
        let clock = Instant::now();
        {
            let mut state = status.lock().unwrap();
            state.in_flight = Some(InFlight {
                action_id: job.action_id.clone(),
                started_at,
            });
        }
        info!("action '{}' started", job.action_id);

        let outcome = interpreter.execute(&job.action).await;
        let duration_ms = clock.elapsed().as_millis() as u64;

        let reply = match outcome {
            Ok(()) => {
                info!("action '{}' ok in {duration_ms}ms", job.action_id);
                Ok(ExecutionResult {
                    action_id: job.action_id.clone(),
                    status: ExecutionStatus::Ok,
                    started_at,
                    duration_ms,
                    error: None,
                })
            }
            Err(cause) => {
                error!(
                    "action '{}' failed after {duration_ms}ms: {cause}",
                    job.action_id
                );
                artifacts::capture_failure(device.as_ref(), &artifact_dir, &job.action_id, &cause)
                    .await;
                Err(EngineError::ActionFailed {
                    action_id: job.action_id.clone(),
                    duration_ms,
                    source: Box::new(cause),
                })
            }
        };

        let record = match &reply {
            Ok(result) => result.clone(),
            Err(err) => ExecutionResult {
                action_id: job.action_id.clone(),
                status: ExecutionStatus::Error,
                started_at,
                duration_ms,
                error: Some(err.cause().to_string()),
            },
        };

        {
            let mut state = status.lock().unwrap();
            state.in_flight = None;
            state.last_result = Some(record);
        }

        // A caller that gave up on the reply is not a lane error.
        let _ = job.reply.send(reply);
    }
}
