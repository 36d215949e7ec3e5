//! One-minute clock tick driver.

use std::sync::Arc;
use std::time::Duration;

use irrigation_core::{Irrigator, Store};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Drive the irrigator's clock: one `on_minute` per `period`.  Runs until
/// the task is aborted.  Ticks never overlap since a late tick is delayed
/// rather than bunched.
pub async fn run<S: Store>(irrigator: Arc<Irrigator<S>>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    info!(period_ms = period.as_millis() as u64, "ticker started");

    loop {
        ticker.tick().await;
        irrigator.on_minute().await;
        let time = irrigator.clock_time().await;
        debug!(%time, "minute elapsed");
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use irrigation_core::{MemoryStore, MilitaryTime, SimClock};

    #[tokio::test(start_paused = true)]
    async fn advances_one_minute_per_period() {
        let irrigator = Arc::new(
            Irrigator::open(MemoryStore::new(), Box::new(SimClock::default()))
                .await
                .unwrap(),
        );
        let task = tokio::spawn(run(Arc::clone(&irrigator), Duration::from_secs(60)));

        tokio::time::sleep(Duration::from_secs(181)).await;
        task.abort();

        assert_eq!(
            irrigator.clock_time().await,
            MilitaryTime::from_military(3).unwrap()
        );
    }
}
