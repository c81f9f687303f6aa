//! Periodic wake-up of the dispatch loop.
//!
//! Sends [`Event::Tick`] every poll interval so the dispatch task can
//! abandon save/load rounds a client never finished and collect exited
//! child processes.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

use super::dispatch::Event;

/// Spawn the watchdog. It stops when `cancel` fires or the dispatch loop
/// is gone.
#[must_use]
pub fn spawn_task_watchdog(
    events: mpsc::Sender<Event>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let span = info_span!("task_watchdog", period_secs = period.as_secs());
    tokio::spawn(
        async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("task watchdog shutting down");
                        break;
                    }
                    _ = ticker.tick() => {}
                }

                if events.send(Event::Tick).await.is_err() {
                    debug!("dispatch loop gone; stopping watchdog");
                    break;
                }
            }
        }
        .instrument(span),
    )
}
