//! Round Timer - remaining time in the active round

use crate::snapshot::CircleSnapshot;
use circle_types::{CircleId, CircleState, Timestamp};
use ledger_gateway::Clock;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tokio::{sync::watch, task::JoinHandle};

/// Remaining time and expiry of a round
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundTime {
    /// Seconds left, never negative
    pub remaining: u64,
    pub expired: bool,
}

impl RoundTime {
    /// "2d 03h 04m 05s"
    pub fn countdown(&self) -> String {
        let days = self.remaining / 86_400;
        let hours = (self.remaining % 86_400) / 3_600;
        let minutes = (self.remaining % 3_600) / 60;
        let seconds = self.remaining % 60;
        format!("{}d {:02}h {:02}m {:02}s", days, hours, minutes, seconds)
    }
}

/// `max(0, roundStart + periodDuration - now)`
pub fn round_time(round_start: Timestamp, period_duration: u64, now: Timestamp) -> RoundTime {
    let remaining = round_start
        .saturating_add(period_duration)
        .saturating_sub(now);
    RoundTime {
        remaining,
        expired: remaining == 0,
    }
}

/// Round time for a snapshot; `None` unless the circle is Active
pub fn snapshot_round_time(circle: &CircleSnapshot, now: Timestamp) -> Option<RoundTime> {
    (circle.state == CircleState::Active)
        .then(|| round_time(circle.round_start, circle.period_duration, now))
}

/// Ticking countdown for one Active circle
///
/// Built from a snapshot and thrown away when the viewed circle or its state
/// changes. Dropping the timer stops the tick task.
pub struct RoundTimer {
    circle_id: CircleId,
    receiver: watch::Receiver<RoundTime>,
    task: JoinHandle<()>,
}

impl RoundTimer {
    /// Start ticking; returns `None` for circles that are not Active
    pub fn start(circle: &CircleSnapshot, clock: Arc<dyn Clock>, tick: Duration) -> Option<Self> {
        let initial = snapshot_round_time(circle, clock.now())?;
        let (sender, receiver) = watch::channel(initial);
        let round_start = circle.round_start;
        let period = circle.period_duration;
        let circle_id = circle.id;

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let next = round_time(round_start, period, clock.now());
                sender.send_if_modified(|current| {
                    let changed = *current != next;
                    *current = next;
                    changed
                });
                if next.expired {
                    tracing::debug!("Round of circle {} expired", circle_id);
                    break;
                }
                if sender.is_closed() {
                    break;
                }
            }
        });

        Some(Self {
            circle_id,
            receiver,
            task,
        })
    }

    pub fn circle_id(&self) -> CircleId {
        self.circle_id
    }

    pub fn current(&self) -> RoundTime {
        *self.receiver.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RoundTime> {
        self.receiver.clone()
    }
}

impl Drop for RoundTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::fixtures::snapshot;
    use circle_types::Address;
    use ledger_gateway::ManualClock;

    #[test]
    fn test_round_time_clamps_at_zero() {
        assert_eq!(
            round_time(100, 50, 120),
            RoundTime {
                remaining: 30,
                expired: false
            }
        );
        assert_eq!(
            round_time(100, 50, 10_000),
            RoundTime {
                remaining: 0,
                expired: true
            }
        );
        assert!(round_time(100, 50, 150).expired);
    }

    #[test]
    fn test_countdown_format() {
        let time = RoundTime {
            remaining: 2 * 86_400 + 3 * 3_600 + 4 * 60 + 5,
            expired: false,
        };
        assert_eq!(time.countdown(), "2d 03h 04m 05s");
    }

    #[tokio::test]
    async fn test_timer_only_for_active_circles() {
        let clock = Arc::new(ManualClock::new(0));
        let open = snapshot(CircleState::Open, vec![]);
        assert!(RoundTimer::start(&open, clock, Duration::from_millis(5)).is_none());
    }

    #[tokio::test]
    async fn test_timer_observes_expiry() {
        let clock = ManualClock::new(1_000);
        let active = snapshot(CircleState::Active, vec![Address::from_low_u64(10)]);
        let timer =
            RoundTimer::start(&active, Arc::new(clock.clone()), Duration::from_millis(5)).unwrap();
        assert!(!timer.current().expired);

        clock.advance(active.period_duration);
        let mut receiver = timer.subscribe();
        let expired = tokio::time::timeout(
            Duration::from_secs(2),
            receiver.wait_for(|time| time.expired),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(expired.remaining, 0);
    }
}
