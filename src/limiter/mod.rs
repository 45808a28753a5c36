//! Per-channel send admission over rolling hour and day windows.
//!
//! Rollover is evaluated lazily on every check, so an idle process still
//! sees correct windows when it wakes up.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Platform-wide caps protecting the shared external channel.
pub const HARD_MAX_PER_HOUR: u32 = 120;
pub const HARD_MAX_PER_DAY: u32 = 300;
pub const HARD_MIN_DELAY: Duration = Duration::from_secs(30);

const DEFAULT_MAX_PER_HOUR: u32 = 60;
const DEFAULT_MAX_PER_DAY: u32 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LimitScope {
    Hour,
    Day,
}

impl LimitScope {
    pub fn reason(self) -> &'static str {
        match self {
            Self::Hour => "HourlyLimitReached",
            Self::Day => "DailyLimitReached",
        }
    }
}

impl fmt::Display for LimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// Effective limits. Only constructible through [`RateLimits::clamped`], so
/// every instance respects the hard caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    max_per_hour: u32,
    max_per_day: u32,
    min_delay: Duration,
}

impl RateLimits {
    pub fn clamped(max_per_day: u32, max_per_hour: u32, min_delay: Duration) -> Self {
        let limits = Self {
            max_per_hour: max_per_hour.min(HARD_MAX_PER_HOUR),
            max_per_day: max_per_day.min(HARD_MAX_PER_DAY),
            min_delay: min_delay.max(HARD_MIN_DELAY),
        };
        if limits.max_per_hour != max_per_hour
            || limits.max_per_day != max_per_day
            || limits.min_delay != min_delay
        {
            warn!(
                "rate limits clamped to platform caps: requested {}/day {}/hour {}s delay, effective {}/day {}/hour {}s delay",
                max_per_day,
                max_per_hour,
                min_delay.as_secs(),
                limits.max_per_day,
                limits.max_per_hour,
                limits.min_delay.as_secs()
            );
        }
        limits
    }

    pub fn max_per_hour(&self) -> u32 {
        self.max_per_hour
    }

    pub fn max_per_day(&self) -> u32 {
        self.max_per_day
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            max_per_hour: DEFAULT_MAX_PER_HOUR,
            max_per_day: DEFAULT_MAX_PER_DAY,
            min_delay: HARD_MIN_DELAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Denied(LimitScope),
}

impl Admission {
    pub fn is_admitted(self) -> bool {
        matches!(self, Self::Admitted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageStats {
    #[serde(rename = "sentToday")]
    pub sent_today: u32,
    #[serde(rename = "sentThisHour")]
    pub sent_this_hour: u32,
    #[serde(rename = "remainingToday")]
    pub remaining_today: u32,
    #[serde(rename = "remainingThisHour")]
    pub remaining_this_hour: u32,
}

#[derive(Debug, Clone)]
pub struct RateWindow {
    pub sent_in_current_hour: u32,
    pub sent_in_current_day: u32,
    pub hour_window_start: DateTime<Utc>,
    pub day_window_start: DateTime<Utc>,
    pub limits: RateLimits,
}

impl RateWindow {
    pub fn new(limits: RateLimits, now: DateTime<Utc>) -> Self {
        Self {
            sent_in_current_hour: 0,
            sent_in_current_day: 0,
            hour_window_start: now,
            day_window_start: now,
            limits,
        }
    }

    fn roll_over(&mut self, now: DateTime<Utc>) {
        if now - self.hour_window_start >= TimeDelta::hours(1) {
            debug!(
                "hour window rolled over ({} sent in previous window)",
                self.sent_in_current_hour
            );
            self.sent_in_current_hour = 0;
            self.hour_window_start = now;
        }
        if now - self.day_window_start >= TimeDelta::days(1) {
            debug!(
                "day window rolled over ({} sent in previous window)",
                self.sent_in_current_day
            );
            self.sent_in_current_day = 0;
            self.day_window_start = now;
        }
    }

    pub fn try_admit(&mut self, now: DateTime<Utc>) -> Admission {
        self.roll_over(now);
        if self.sent_in_current_day >= self.limits.max_per_day {
            return Admission::Denied(LimitScope::Day);
        }
        if self.sent_in_current_hour >= self.limits.max_per_hour {
            return Admission::Denied(LimitScope::Hour);
        }
        self.sent_in_current_hour += 1;
        self.sent_in_current_day += 1;
        Admission::Admitted
    }

    /// Counters as they would read at `now`, without moving the window starts.
    pub fn stats(&self, now: DateTime<Utc>) -> MessageStats {
        let sent_this_hour = if now - self.hour_window_start >= TimeDelta::hours(1) {
            0
        } else {
            self.sent_in_current_hour
        };
        let sent_today = if now - self.day_window_start >= TimeDelta::days(1) {
            0
        } else {
            self.sent_in_current_day
        };
        MessageStats {
            sent_today,
            sent_this_hour,
            remaining_today: self.limits.max_per_day.saturating_sub(sent_today),
            remaining_this_hour: self.limits.max_per_hour.saturating_sub(sent_this_hour),
        }
    }
}

pub struct RateLimiter {
    channel_id: String,
    window: Mutex<RateWindow>,
}

impl RateLimiter {
    pub fn new(channel_id: impl Into<String>, limits: RateLimits) -> Self {
        Self {
            channel_id: channel_id.into(),
            window: Mutex::new(RateWindow::new(limits, Utc::now())),
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    fn lock(&self) -> MutexGuard<'_, RateWindow> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn try_admit(&self) -> Admission {
        self.try_admit_at(Utc::now())
    }

    pub fn try_admit_at(&self, now: DateTime<Utc>) -> Admission {
        let admission = self.lock().try_admit(now);
        if let Admission::Denied(scope) = admission {
            info!("send denied on {}: {}", self.channel_id, scope);
        }
        admission
    }

    /// Replace the limits, clamped to the platform caps. Counters are kept.
    pub fn update_limits(&self, max_per_day: u32, max_per_hour: u32, min_delay: Duration) -> RateLimits {
        let limits = RateLimits::clamped(max_per_day, max_per_hour, min_delay);
        self.lock().limits = limits;
        info!(
            "rate limits for {} updated: {}/day {}/hour {}s delay",
            self.channel_id,
            limits.max_per_day(),
            limits.max_per_hour(),
            limits.min_delay().as_secs()
        );
        limits
    }

    pub fn limits(&self) -> RateLimits {
        self.lock().limits
    }

    pub fn stats(&self) -> MessageStats {
        self.stats_at(Utc::now())
    }

    pub fn stats_at(&self, now: DateTime<Utc>) -> MessageStats {
        self.lock().stats(now)
    }

    /// Snapshot of the raw window, mostly for diagnostics.
    pub fn window(&self) -> RateWindow {
        self.lock().clone()
    }
}
