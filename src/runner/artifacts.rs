use std::path::Path;

use chrono::Local;
use log::{info, warn};

use crate::driver::traits::DeviceControl;
use crate::error::EngineError;

/// Best-effort capture of a screenshot and an annotated UI dump after a
/// failed action. Capture problems are logged, never escalated.
pub async fn capture_failure(
    device: &dyn DeviceControl,
    dir: &Path,
    action_id: &str,
    error: &EngineError,
) {
    if let Err(err) = tokio::fs::create_dir_all(dir).await {
        warn!("artifact dir {} unavailable: {err}", dir.display());
        return;
    }

    let stem = format!(
        "{}-{}",
        sanitize(action_id),
        Local::now().format("%Y%m%d-%H%M%S-%3f")
    );

    let screenshot_path = dir.join(format!("{stem}.png"));
    match device.screenshot().await {
        Ok(bytes) => {
            if let Err(err) = tokio::fs::write(&screenshot_path, bytes).await {
                warn!("failed to write {}: {err}", screenshot_path.display());
            }
        }
        Err(err) => warn!("screenshot capture failed: {err}"),
    }

    let dump_path = dir.join(format!("{stem}.xml"));
    match device.dump_ui().await {
        Ok(xml) => {
            let annotated = format!("<!-- failure: {error} -->\n{xml}");
            if let Err(err) = tokio::fs::write(&dump_path, annotated).await {
                warn!("failed to write {}: {err}", dump_path.display());
            }
        }
        Err(err) => warn!("ui dump capture failed: {err}"),
    }

    info!(
        "failure artifacts for '{action_id}' written under {}",
        dir.display()
    );
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
