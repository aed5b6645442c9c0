//! Resumable countdown timer for preparation and speech phases.
//!
//! Remaining time is always recomputed from wall-clock arithmetic, never by
//! decrementing per tick, so a stalled task or a process restart cannot
//! introduce drift.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::StorageError;
use crate::store::{KvStore, KvStoreExt, Namespace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerPhase {
    Idle,
    Running,
    Paused,
    Completed,
}

/// Persistable timer state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimerState {
    pub total_duration_secs: u64,
    pub remaining_secs: u64,
    /// Start of the current running segment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Running time banked by earlier segments, in milliseconds.
    #[serde(default)]
    pub paused_accumulated_ms: i64,
    pub running: bool,
    pub paused: bool,
    #[serde(default)]
    pub completed: bool,
}

impl TimerState {
    pub fn idle(total_duration_secs: u64) -> Self {
        Self {
            total_duration_secs,
            remaining_secs: total_duration_secs,
            started_at: None,
            paused_accumulated_ms: 0,
            running: false,
            paused: false,
            completed: false,
        }
    }

    pub fn phase(&self) -> TimerPhase {
        if self.completed {
            TimerPhase::Completed
        } else if self.running {
            TimerPhase::Running
        } else if self.paused {
            TimerPhase::Paused
        } else {
            TimerPhase::Idle
        }
    }

    fn total_ms(&self) -> i64 {
        i64::try_from(self.total_duration_secs)
            .unwrap_or(i64::MAX / 1000)
            .saturating_mul(1000)
    }

    fn elapsed_ms(&self, now: DateTime<Utc>) -> i64 {
        let current = match (self.running, self.started_at) {
            (true, Some(started)) => (now - started).num_milliseconds().max(0),
            _ => 0,
        };
        self.paused_accumulated_ms.saturating_add(current)
    }

    fn remaining_ms(&self, now: DateTime<Utc>) -> i64 {
        let total = self.total_ms();
        (total - self.elapsed_ms(now)).clamp(0, total)
    }
}

pub type CompletionCallback = Box<dyn FnMut() + Send>;

/// Countdown timer driven by a [`Clock`].
pub struct ClockTimer {
    state: TimerState,
    clock: Arc<dyn Clock>,
    on_complete: Option<CompletionCallback>,
}

impl ClockTimer {
    pub fn new(total_duration_secs: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: TimerState::idle(total_duration_secs),
            clock,
            on_complete: None,
        }
    }

    /// Register the callback invoked once when the countdown reaches zero.
    pub fn on_complete(mut self, callback: impl FnMut() + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(callback));
        self
    }

    /// Rehydrate state persisted under `key`, if any.
    ///
    /// A timer that was running keeps counting from its persisted start, so
    /// time spent while the process was gone is subtracted immediately. If
    /// that exhausts the countdown, the completion callback fires here.
    pub async fn restore(mut self, kv: &dyn KvStore, key: &str) -> Result<Self, StorageError> {
        if let Some(state) = kv.get_typed::<TimerState>(Namespace::Timers, key).await? {
            debug!(key, ?state, "Restoring timer state");
            self.state = state;
            self.observe();
        }
        Ok(self)
    }

    pub async fn persist(&self, kv: &dyn KvStore, key: &str) -> Result<(), StorageError> {
        kv.put_typed(Namespace::Timers, key, &self.state).await
    }

    pub async fn forget(kv: &dyn KvStore, key: &str) -> Result<bool, StorageError> {
        kv.delete(Namespace::Timers, key).await
    }

    pub fn state(&self) -> &TimerState {
        &self.state
    }

    pub fn phase(&self) -> TimerPhase {
        self.state.phase()
    }

    pub fn total_secs(&self) -> u64 {
        self.state.total_duration_secs
    }

    /// Recompute remaining time from the wall clock, completing the timer if
    /// it has run out. Returns the remaining whole seconds (rounded up).
    pub fn observe(&mut self) -> u64 {
        let now = self.clock.now();
        let remaining_ms = self.state.remaining_ms(now);
        self.state.remaining_secs = u64::try_from((remaining_ms + 999) / 1000).unwrap_or(0);

        if self.state.running && remaining_ms <= 0 {
            self.complete();
        }
        self.state.remaining_secs
    }

    pub fn remaining_secs(&mut self) -> u64 {
        self.observe()
    }

    /// Seconds of the countdown already spent.
    pub fn time_used_secs(&mut self) -> u64 {
        let remaining = self.observe();
        self.state.total_duration_secs.saturating_sub(remaining)
    }

    /// Start from idle or resume from pause. No effect while running or
    /// after completion.
    pub fn start(&mut self) {
        match self.phase() {
            TimerPhase::Idle | TimerPhase::Paused => {
                if self.state.remaining_ms(self.clock.now()) <= 0 {
                    self.complete();
                    return;
                }
                self.state.started_at = Some(self.clock.now());
                self.state.running = true;
                self.state.paused = false;
                info!(remaining = self.state.remaining_secs, "Timer running");
            }
            TimerPhase::Running | TimerPhase::Completed => {}
        }
    }

    /// Bank the running segment and stop counting.
    pub fn pause(&mut self) {
        if self.phase() != TimerPhase::Running {
            return;
        }
        self.observe();
        if self.phase() != TimerPhase::Running {
            return;
        }

        let now = self.clock.now();
        self.state.paused_accumulated_ms = self.state.elapsed_ms(now);
        self.state.started_at = None;
        self.state.running = false;
        self.state.paused = true;
        info!(remaining = self.state.remaining_secs, "Timer paused");
    }

    /// Back to idle with the full duration.
    pub fn reset(&mut self) {
        self.state = TimerState::idle(self.state.total_duration_secs);
        debug!("Timer reset");
    }

    /// Observe every `period` until the timer stops running, reporting the
    /// remaining seconds after each observation.
    pub async fn run_until_complete(
        &mut self,
        period: std::time::Duration,
        mut on_tick: impl FnMut(u64),
    ) -> TimerPhase {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let remaining = self.observe();
            on_tick(remaining);
            if self.phase() != TimerPhase::Running {
                return self.phase();
            }
        }
    }

    fn complete(&mut self) {
        let now = self.clock.now();
        self.state.paused_accumulated_ms = self.state.elapsed_ms(now).min(self.state.total_ms());
        self.state.started_at = None;
        self.state.remaining_secs = 0;
        self.state.running = false;
        self.state.paused = false;
        self.state.completed = true;
        info!(total = self.state.total_duration_secs, "Timer completed");

        if let Some(callback) = self.on_complete.as_mut() {
            callback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl FnMut() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let hook = count.clone();
        (count, move || {
            hook.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_pause_resume_keeps_wall_clock_accounting() {
        let clock = Arc::new(ManualClock::default());
        let mut timer = ClockTimer::new(900, clock.clone());
        timer.start();

        for _ in 0..300 {
            clock.advance_secs(1);
            timer.observe();
        }
        timer.pause();
        assert_eq!(timer.phase(), TimerPhase::Paused);

        // Time spent paused does not count.
        clock.advance_secs(1_000);
        assert_eq!(timer.observe(), 600);

        timer.start();
        clock.advance_secs(10);
        assert_eq!(timer.observe(), 590);
        assert_eq!(timer.time_used_secs(), 310);
    }

    #[test]
    fn test_observation_count_does_not_matter() {
        let clock = Arc::new(ManualClock::default());
        let mut sparse = ClockTimer::new(900, clock.clone());
        let mut dense = ClockTimer::new(900, clock.clone());
        sparse.start();
        dense.start();
        for _ in 0..120 {
            clock.advance(chrono::Duration::milliseconds(2_500));
            dense.observe();
        }
        assert_eq!(sparse.observe(), dense.observe());
        assert_eq!(sparse.observe(), 600);
    }

    #[test]
    fn test_completion_fires_exactly_once() {
        let clock = Arc::new(ManualClock::default());
        let (count, hook) = counter();
        let mut timer = ClockTimer::new(60, clock.clone()).on_complete(hook);
        timer.start();
        clock.advance_secs(59);
        assert_eq!(timer.observe(), 1);
        clock.advance_secs(5);
        assert_eq!(timer.observe(), 0);
        assert_eq!(timer.observe(), 0);
        timer.start();
        timer.pause();
        assert_eq!(timer.phase(), TimerPhase::Completed);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reset_returns_to_idle() {
        let clock = Arc::new(ManualClock::default());
        let mut timer = ClockTimer::new(120, clock.clone());
        timer.start();
        clock.advance_secs(30);
        timer.pause();
        timer.reset();
        assert_eq!(timer.phase(), TimerPhase::Idle);
        clock.advance_secs(30);
        assert_eq!(timer.observe(), 120);
    }

    #[tokio::test]
    async fn test_restore_running_timer_subtracts_downtime() {
        let kv = MemoryStore::new();
        let clock = Arc::new(ManualClock::default());
        let mut timer = ClockTimer::new(900, clock.clone());
        timer.start();
        clock.advance_secs(100);
        timer.observe();
        timer.persist(&kv, "prep").await.unwrap();
        drop(timer);

        clock.advance_secs(200);
        let mut restored = ClockTimer::new(900, clock.clone())
            .restore(&kv, "prep")
            .await
            .unwrap();
        assert_eq!(restored.phase(), TimerPhase::Running);
        assert_eq!(restored.observe(), 600);
    }

    #[tokio::test]
    async fn test_restore_after_expiry_fires_callback() {
        let kv = MemoryStore::new();
        let clock = Arc::new(ManualClock::default());
        let mut timer = ClockTimer::new(60, clock.clone());
        timer.start();
        timer.persist(&kv, "speech").await.unwrap();

        clock.advance_secs(3_600);
        let (count, hook) = counter();
        let restored = ClockTimer::new(60, clock.clone())
            .on_complete(hook)
            .restore(&kv, "speech")
            .await
            .unwrap();
        assert_eq!(restored.phase(), TimerPhase::Completed);
        assert_eq!(restored.state().remaining_secs, 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // A completed timer persisted and restored again stays silent.
        restored.persist(&kv, "speech").await.unwrap();
        let (again, hook) = counter();
        ClockTimer::new(60, clock.clone())
            .on_complete(hook)
            .restore(&kv, "speech")
            .await
            .unwrap();
        assert_eq!(again.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_restore_paused_timer_keeps_remaining() {
        let kv = MemoryStore::new();
        let clock = Arc::new(ManualClock::default());
        let mut timer = ClockTimer::new(300, clock.clone());
        timer.start();
        clock.advance_secs(45);
        timer.pause();
        timer.persist(&kv, "paused").await.unwrap();

        clock.advance_secs(10_000);
        let mut restored = ClockTimer::new(300, clock.clone())
            .restore(&kv, "paused")
            .await
            .unwrap();
        assert_eq!(restored.phase(), TimerPhase::Paused);
        assert_eq!(restored.observe(), 255);
        assert!(ClockTimer::forget(&kv, "paused").await.unwrap());
    }

    #[tokio::test]
    async fn test_run_until_complete_stops_when_time_is_up() {
        let clock = Arc::new(crate::clock::SystemClock);
        let mut timer = ClockTimer::new(0, clock);
        timer.start();
        let mut ticks = Vec::new();
        let phase = timer
            .run_until_complete(std::time::Duration::from_millis(5), |r| ticks.push(r))
            .await;
        assert_eq!(phase, TimerPhase::Completed);
        assert_eq!(ticks, vec![0]);
    }
}
