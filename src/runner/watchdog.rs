use log::warn;

use crate::driver::snapshot::SnapshotCache;
use crate::driver::traits::DeviceControl;
use crate::driver::uiautomator::UiElement;
use crate::error::EngineError;

/// Markers of the system "app not responding" interstitial. Wording varies
/// slightly across releases.
const DIALOG_MARKERS: [&str; 2] = ["isn't responding", "is not responding"];

/// Dismiss buttons in preference order: waiting keeps the unresponsive
/// process alive, closing it is the fallback.
const WAIT_BUTTON_ID: &str = "android:id/aerr_wait";
const CLOSE_BUTTON_ID: &str = "android:id/aerr_close";

/// Tap point for the interstitial's dismiss button, if the dialog is
/// present in this snapshot.
pub fn find_dismiss_point(elements: &[UiElement]) -> Option<(i32, i32)> {
    let present = elements
        .iter()
        .any(|e| DIALOG_MARKERS.iter().any(|m| e.text.contains(m)));
    if !present {
        return None;
    }

    for id in [WAIT_BUTTON_ID, CLOSE_BUTTON_ID] {
        if let Some(button) = elements.iter().find(|e| e.resource_id == id) {
            return Some(button.bounds.center());
        }
    }

    // Resource ids drift across builds; fall back to the button labels.
    for label in ["Wait", "Close app"] {
        if let Some(button) = elements.iter().find(|e| e.text == label) {
            return Some(button.bounds.center());
        }
    }

    None
}

/// If the interstitial is visible in `elements`, tap it away and invalidate
/// the snapshot cache. Returns whether a dialog was dismissed.
pub async fn dismiss_if_present(
    elements: &[UiElement],
    device: &dyn DeviceControl,
    cache: &SnapshotCache,
) -> Result<bool, EngineError> {
    let Some((x, y)) = find_dismiss_point(elements) else {
        return Ok(false);
    };

    warn!("not-responding dialog detected, dismissing at ({x}, {y})");
    device.tap(x, y).await?;
    cache.invalidate().await;
    Ok(true)
}
