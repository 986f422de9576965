//! Schedule loop of one Schedule trigger

use std::sync::Arc;

use chrono::Utc;
use conduit_core::domain::trigger::{Cadence, Trigger};
use serde_json::json;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{EngineInner, TriggerState};

/// Instant of the next fire
///
/// Intervals count from the previous deadline, not from when the previous
/// dispatch returned, so slow dispatches do not push the schedule back.
/// Deadlines already behind `now` are skipped.
fn next_deadline(cadence: &Cadence, previous: Instant, now: Instant) -> Option<Instant> {
    match cadence {
        Cadence::Every(period) => {
            let mut next = previous + *period;
            while next <= now {
                next += *period;
            }
            Some(next)
        }
        Cadence::Cron(_) => {
            let wall = Utc::now();
            let next = cadence.next_after(wall)?;
            Some(now + (next - wall).to_std().unwrap_or_default())
        }
    }
}

pub(super) async fn run(
    inner: Arc<EngineInner>,
    trigger: Trigger,
    cadence: Cadence,
    token: CancellationToken,
) {
    let key = trigger.key();
    debug!("Schedule loop of {} started", key);

    let mut previous = Instant::now();
    loop {
        inner.status.set_state(&key, TriggerState::Checking);

        let Some(deadline) = next_deadline(&cadence, previous, Instant::now()) else {
            warn!("Trigger {} has no upcoming fire time", key);
            inner.status.failed(&key, "schedule has no upcoming fire time");
            break;
        };

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep_until(deadline) => {}
        }
        previous = deadline;

        // deleted while the timer fired
        if token.is_cancelled() {
            break;
        }

        let input = json!({
            "trigger": trigger.name,
            "firedAt": Utc::now(),
        });

        // dispatch failures are recorded and retried at the next fire time
        let _ = inner.fire(&trigger, input).await;
    }

    debug!("Schedule loop of {} stopped", key);
}
