//! Tick timer
//!
//! A single repeating interval that paces engine iterations. It is only
//! reconfigured from inside the session task, and only when the engine's
//! clamped recommendation differs from the current period.

use tokio::time::{interval_at, Duration, Instant, Interval, MissedTickBehavior};
use toxsession_core::TimerConfig;

#[derive(Debug)]
pub struct TickTimer {
    interval: Interval,
    current_ms: u64,
    config: TimerConfig,
    reschedules: u64,
}

impl TickTimer {
    pub fn new(config: TimerConfig) -> Self {
        let current_ms = config.clamp(config.initial_interval_ms);
        Self {
            interval: Self::make_interval(current_ms),
            current_ms,
            config,
            reschedules: 0,
        }
    }

    fn make_interval(period_ms: u64) -> Interval {
        let period = Duration::from_millis(period_ms);
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    }

    /// Wait for the next tick
    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }

    /// Apply an engine recommendation. Returns true when the period changed.
    pub fn reschedule(&mut self, recommended_ms: u64) -> bool {
        let clamped = self.config.clamp(recommended_ms);
        if clamped == self.current_ms {
            return false;
        }
        self.interval = Self::make_interval(clamped);
        self.current_ms = clamped;
        self.reschedules += 1;
        true
    }

    /// Current period in milliseconds
    pub fn interval_ms(&self) -> u64 {
        self.current_ms
    }

    pub fn reschedules(&self) -> u64 {
        self.reschedules
    }
}
