//! Background poll loop behind `refresh_interval` queries.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::debug;

use crate::reactive::Teardown;

/// One poll iteration.
pub(crate) type Tick = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Spawn a loop running `tick` every `interval` and return its teardown.
///
/// The next tick is scheduled only after the previous one settled. After
/// teardown no tick starts, and a tick already running completes without
/// rescheduling. The task is never aborted mid-fetch.
pub(crate) fn spawn_poll_loop(
    handle: &Handle,
    interval: Duration,
    key: String,
    tick: Tick,
) -> Teardown {
    let (stop_tx, stop_rx) = watch::channel(false);
    handle.spawn(poll_loop(interval, key, tick, stop_rx));

    Box::new(move || {
        stop_tx.send_replace(true);
    })
}

async fn poll_loop(
    interval: Duration,
    key: String,
    tick: Tick,
    mut stop_rx: watch::Receiver<bool>,
) {
    debug!(
        key = %key,
        interval_ms = interval.as_millis() as u64,
        "Poll loop started"
    );

    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                // A dropped teardown can never stop us later, so stop now
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
                continue;
            }
            _ = sleep(interval) => {}
        }

        if *stop_rx.borrow() {
            break;
        }
        tick().await;
        if *stop_rx.borrow() {
            break;
        }
    }

    debug!(key = %key, "Poll loop stopped");
}
