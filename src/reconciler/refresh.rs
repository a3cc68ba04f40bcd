use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;

use crate::{directory::AppDirectory, exec::PrivilegedExecutor};

use super::{PolicyReconciler, sync::ShutdownSignal};

/// Re-probe every pair each `interval` until `shutdown` fires
///
/// Catches drift such as a mutation batch whose commands silently failed or rules
/// changed by another tool. Failed probes are logged and retried on the next tick.
pub fn spawn_refresh<E: PrivilegedExecutor, D: AppDirectory>(
    reconciler: PolicyReconciler<E, D>,
    interval: Duration,
    shutdown: Arc<ShutdownSignal>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if shutdown.wait_timeout_or_shutdown(interval).await {
                log::debug!("Refresh loop stopped");
                return;
            }

            let report = reconciler.refresh_all().await;
            if !report.failures.is_empty() {
                log::warn!(
                    "Refresh pass: {} of {} probes failed",
                    report.failures.len(),
                    report.probed.max(report.failures.len())
                );
            }
        }
    })
}
