//! Per-card expiry countdown.
//!
//! `Countdown` is the pure state machine; `CountdownHandle` drives one of them
//! on its own 1-second tokio interval and publishes every state change.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};

use crate::config::COUNTDOWN_TICK_SECS;
use crate::types::now_ms;

pub const EXPIRED_LABEL: &str = "EXPIRED";

const MS_PER_SECOND: i64 = 1_000;
const MS_PER_MINUTE: i64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;
const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

/// `{h}h {m}m {s}s` for a non-negative distance. Hours are taken modulo 24,
/// so whole days are not shown.
pub fn format_remaining(distance_ms: i64) -> String {
    let h = (distance_ms % MS_PER_DAY) / MS_PER_HOUR;
    let m = (distance_ms % MS_PER_HOUR) / MS_PER_MINUTE;
    let s = (distance_ms % MS_PER_MINUTE) / MS_PER_SECOND;
    format!("{h}h {m}m {s}s")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CountdownState {
    /// The deal carries no expiry.
    Inactive,
    Ticking { label: String },
    Expired,
}

impl CountdownState {
    /// Text shown on the card. Empty when inactive.
    pub fn label(&self) -> &str {
        match self {
            CountdownState::Inactive => "",
            CountdownState::Ticking { label } => label,
            CountdownState::Expired => EXPIRED_LABEL,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, CountdownState::Ticking { .. })
    }
}

// ---------------------------------------------------------------------------
// Countdown
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Countdown {
    expires_at: Option<i64>,
    state: CountdownState,
}

impl Countdown {
    /// Evaluate immediately at `now_ms`.
    pub fn start(expires_at: Option<i64>, now_ms: i64) -> Self {
        let mut countdown = Self {
            expires_at,
            state: match expires_at {
                None => CountdownState::Inactive,
                Some(_) => CountdownState::Ticking {
                    label: String::new(),
                },
            },
        };
        countdown.tick(now_ms);
        countdown
    }

    /// Recompute from `now_ms`. Only `Ticking` moves; `Expired` never comes back.
    pub fn tick(&mut self, now_ms: i64) -> &CountdownState {
        if let (CountdownState::Ticking { .. }, Some(expires_at)) = (&self.state, self.expires_at) {
            let distance = expires_at - now_ms;
            self.state = if distance < 0 {
                CountdownState::Expired
            } else {
                CountdownState::Ticking {
                    label: format_remaining(distance),
                }
            };
        }
        &self.state
    }

    pub fn state(&self) -> &CountdownState {
        &self.state
    }
}

// ---------------------------------------------------------------------------
// CountdownHandle
// ---------------------------------------------------------------------------

/// Wall-clock milliseconds measured off a monotonic tokio anchor, so a paused
/// test clock moves the countdown too.
#[derive(Debug, Clone, Copy)]
struct Clock {
    anchor_ms: i64,
    anchor: Instant,
}

impl Clock {
    fn now() -> Self {
        Self {
            anchor_ms: now_ms(),
            anchor: Instant::now(),
        }
    }

    fn now_ms(&self) -> i64 {
        self.anchor_ms + self.anchor.elapsed().as_millis() as i64
    }
}

/// One card's countdown task. Dropping the handle cancels the task.
pub struct CountdownHandle {
    state: watch::Receiver<CountdownState>,
    task: Option<JoinHandle<()>>,
}

impl CountdownHandle {
    pub fn spawn(expires_at: Option<i64>) -> Self {
        let clock = Clock::now();
        let countdown = Countdown::start(expires_at, clock.now_ms());
        let (tx, rx) = watch::channel(countdown.state().clone());

        // Inactive and already-expired cards never need a timer.
        let task = (!countdown.state().is_terminal())
            .then(|| tokio::spawn(run_countdown(countdown, clock, tx)));

        Self { state: rx, task }
    }

    pub fn state(&self) -> CountdownState {
        self.state.borrow().clone()
    }

    pub fn label(&self) -> String {
        self.state.borrow().label().to_string()
    }

    /// Receiver for views that redraw on change.
    pub fn watch(&self) -> watch::Receiver<CountdownState> {
        self.state.clone()
    }

    /// True once the timer has stopped (or never started).
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }
}

impl Drop for CountdownHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_countdown(
    mut countdown: Countdown,
    clock: Clock,
    tx: watch::Sender<CountdownState>,
) {
    let mut ticker = interval(Duration::from_secs(COUNTDOWN_TICK_SECS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await; // consume immediate first tick; start() already evaluated

    loop {
        ticker.tick().await;
        let state = countdown.tick(clock.now_ms()).clone();
        let done = state.is_terminal();
        tx.send_replace(state);
        if done {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_hours_minutes_seconds() {
        assert_eq!(format_remaining(3_661_000), "1h 1m 1s");
        assert_eq!(format_remaining(0), "0h 0m 0s");
        assert_eq!(format_remaining(59_999), "0h 0m 59s");
    }

    #[test]
    fn hours_wrap_past_a_day() {
        // 25h remaining shows as 1h.
        assert_eq!(format_remaining(25 * MS_PER_HOUR), "1h 0m 0s");
    }

    #[test]
    fn start_without_expiry_is_inactive() {
        let c = Countdown::start(None, 1_000);
        assert_eq!(c.state(), &CountdownState::Inactive);
        assert_eq!(c.state().label(), "");
    }

    #[test]
    fn start_renders_immediately() {
        let now = 1_700_000_000_000;
        let c = Countdown::start(Some(now + 3_661_000), now);
        assert_eq!(c.state().label(), "1h 1m 1s");
    }

    #[test]
    fn past_expiry_is_expired_at_start() {
        let now = 1_700_000_000_000;
        let c = Countdown::start(Some(now - 1), now);
        assert_eq!(c.state(), &CountdownState::Expired);
        assert_eq!(c.state().label(), EXPIRED_LABEL);
    }

    #[test]
    fn exactly_at_expiry_still_ticks() {
        let now = 1_700_000_000_000;
        let c = Countdown::start(Some(now), now);
        assert_eq!(c.state().label(), "0h 0m 0s");
    }

    #[test]
    fn expired_never_returns_to_ticking() {
        let now = 1_700_000_000_000;
        let mut c = Countdown::start(Some(now + 1_000), now);
        assert_eq!(c.tick(now + 2_000), &CountdownState::Expired);
        // Clock going backwards must not revive it.
        assert_eq!(c.tick(now), &CountdownState::Expired);
    }

    #[tokio::test(start_paused = true)]
    async fn task_ticks_every_second() {
        let expires_at = now_ms() + 3_661_000;
        let handle = CountdownHandle::spawn(Some(expires_at));
        let mut rx = handle.watch();
        assert!(handle.label().starts_with("1h 1m "), "got {}", handle.label());

        rx.changed().await.unwrap();
        let label = rx.borrow_and_update().label().to_string();
        assert!(label.starts_with("1h 1m ") || label.starts_with("1h 0m "), "got {label}");
        assert!(!handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn task_stops_after_expiry() {
        let handle = CountdownHandle::spawn(Some(now_ms() + 1_500));
        let mut rx = handle.watch();

        while !rx.borrow_and_update().is_terminal() {
            rx.changed().await.unwrap();
        }
        assert_eq!(handle.state(), CountdownState::Expired);

        // The task returns right after publishing Expired.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(handle.is_finished());
        assert_eq!(handle.state(), CountdownState::Expired);
    }

    #[tokio::test(start_paused = true)]
    async fn already_expired_card_spawns_no_timer() {
        let handle = CountdownHandle::spawn(Some(now_ms() - 1));
        assert_eq!(handle.label(), EXPIRED_LABEL);
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn cards_tick_independently() {
        let short = CountdownHandle::spawn(Some(now_ms() + 1_500));
        let long = CountdownHandle::spawn(Some(now_ms() + 3_600_000));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(short.state(), CountdownState::Expired);
        assert!(matches!(long.state(), CountdownState::Ticking { .. }));

        drop(short);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(matches!(long.state(), CountdownState::Ticking { .. }));
    }
}
