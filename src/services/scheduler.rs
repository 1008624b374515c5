//! Periodic refresh loop: a plain timer invoking the provider's refresh
//! entrypoint. Failures are logged and retried on the next tick; the
//! previously published snapshot stays in place.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::proxy::Provider;

pub fn spawn_refresh_loop(provider: Arc<Provider>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the initial refresh already
        // ran at startup.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            info!("scheduled refresh starting");
            if let Err(error) = provider.refresh().await {
                error!("scheduled refresh failed: {error:#}");
            }
        }
    })
}
