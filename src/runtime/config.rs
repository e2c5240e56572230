//! Message loop cadence configuration.

use std::time::Duration;

/// Error returned when a [`LoopConfig`] is inconsistent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// An interval was configured as zero.
    #[error("{0} must be nonzero")]
    ZeroInterval(&'static str),

    /// The wheel tick is finer than the heartbeat that drives it, so
    /// ticks would be skipped.
    #[error("wheel tick {tick:?} is finer than the heartbeat interval {heartbeat:?}")]
    TickFinerThanHeartbeat {
        /// Configured wheel tick granularity.
        tick: Duration,
        /// Configured heartbeat interval.
        heartbeat: Duration,
    },
}

/// Cadences that drive a message loop.
///
/// The heartbeat advances the timer wheel; the task interval drains the
/// priority bands; the wheel tick is the wheel's time granularity. The
/// wheel tick must be at least as coarse as the heartbeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    /// How often the timer wheel is advanced. Default: 1 ms.
    pub heartbeat_interval: Duration,
    /// How often the priority bands are drained. Default: 10 ms.
    pub task_interval: Duration,
    /// Wall time represented by one wheel tick. Default: 1 ms.
    pub wheel_tick: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(1),
            task_interval: Duration::from_millis(10),
            wheel_tick: Duration::from_millis(1),
        }
    }
}

impl LoopConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the heartbeat interval.
    #[must_use]
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the band drain interval.
    #[must_use]
    pub fn task_interval(mut self, interval: Duration) -> Self {
        self.task_interval = interval;
        self
    }

    /// Sets the wheel tick granularity.
    #[must_use]
    pub fn wheel_tick(mut self, tick: Duration) -> Self {
        self.wheel_tick = tick;
        self
    }

    /// Checks the configuration for consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("heartbeat interval"));
        }
        if self.task_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("task interval"));
        }
        if self.wheel_tick.is_zero() {
            return Err(ConfigError::ZeroInterval("wheel tick"));
        }
        if self.wheel_tick < self.heartbeat_interval {
            return Err(ConfigError::TickFinerThanHeartbeat {
                tick: self.wheel_tick,
                heartbeat: self.heartbeat_interval,
            });
        }
        Ok(())
    }
}
