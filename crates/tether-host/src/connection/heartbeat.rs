//! Periodic liveness checks while connected.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use super::{ConnectionManager, Inner};

/// Spawns the heartbeat loop. The task holds only a weak reference so it
/// ends on its own once the manager is dropped.
pub(super) fn spawn(weak: Weak<Inner>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            let manager = ConnectionManager { inner };
            if !manager.heartbeat_once().await {
                break;
            }
        }
    })
}
