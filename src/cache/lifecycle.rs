//! Cache lifecycle: ingestion run loop, config reload, maintenance.

use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::WatchCacheConfig;
use crate::storage::traits::Notification;

use super::{CacheState, WatchCache};

fn maintenance_interval(config: &WatchCacheConfig) -> Interval {
    let mut interval = tokio::time::interval(config.maintenance_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

impl WatchCache {
    /// Consume the change feed until it closes or `shutdown` fires.
    ///
    /// Notifications are committed strictly in arrival order. Config updates
    /// from the watch channel and the periodic freshness trim are handled
    /// between notifications. The cache is `Stopped` when this returns.
    #[tracing::instrument(skip_all)]
    pub async fn run(&self, mut feed: mpsc::Receiver<Notification>, shutdown: CancellationToken) {
        info!("Watch cache running");
        let mut config_rx = self.config_rx.lock().await;
        let mut maintenance = maintenance_interval(&self.config.read());

        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }

                received = feed.recv() => match received {
                    Some(notification) => {
                        let kind = notification.kind();
                        let revision = notification.revision();
                        if let Err(e) = self.ingest(notification) {
                            warn!(kind, revision, error = %e, "Notification not applied");
                        }
                    }
                    None => {
                        warn!("Change feed closed");
                        break;
                    }
                },

                Ok(()) = config_rx.changed() => {
                    let new_config = config_rx.borrow_and_update().clone();
                    if self.apply_config(new_config) {
                        maintenance = maintenance_interval(&self.config.read());
                    }
                }

                _ = maintenance.tick() => {
                    self.maintain();
                }
            }
        }

        self.set_state(CacheState::Stopped);
        info!(revision = self.revision(), "Watch cache stopped");
    }

    /// Apply a config update. Invalid configs are logged and ignored.
    ///
    /// Returns whether the maintenance interval changed.
    pub fn apply_config(&self, new_config: WatchCacheConfig) -> bool {
        if let Err(e) = new_config.validate() {
            warn!(error = %e, "Ignoring invalid config update");
            return false;
        }
        let interval_changed = {
            let mut config = self.config.write();
            let changed = config.maintenance_interval_ms != new_config.maintenance_interval_ms;
            *config = new_config.clone();
            changed
        };
        self.core.write().events.set_bounds(&new_config);
        info!(
            from_snapshot = new_config.consistent_list_from_snapshot,
            lower = new_config.lower_bound_capacity,
            upper = new_config.upper_bound_capacity,
            "Config updated"
        );
        interval_changed
    }

    /// Trim expired events and shrink an underused ring.
    pub fn maintain(&self) {
        {
            let mut core = self.core.write();
            core.events.maintain(Instant::now());
        }
        self.update_gauge_metrics();
        debug!("Maintenance pass complete");
    }
}
