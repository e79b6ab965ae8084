//! Background reconciler: re-embeds stale and abandoned pending nodes.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::state::AppState;

/// Start the reconcile loop. A zero interval disables it.
pub fn start_reconcile_worker(state: Arc<AppState>) -> Option<tokio::task::JoinHandle<()>> {
    let period = state.config.reconcile_interval;
    if period.is_zero() {
        info!("Reconciler disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        info!("Reconciler started (every {}s)", period.as_secs());
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match state.coordinator.reconcile_all().await {
                Ok(report) if report.candidates == 0 => debug!("Reconcile pass: nothing to do"),
                Ok(report) if report.failures > 0 => {
                    warn!("Reconcile pass: {} owner(s) could not be re-embedded", report.failures)
                }
                Ok(_) => {}
                Err(e) => warn!("Reconcile pass failed: {}", e),
            }
        }
    }))
}
