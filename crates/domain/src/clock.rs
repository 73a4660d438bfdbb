//! Simulated town time.
//!
//! The world runs on a (day, minute-of-day) clock. Days conceptually begin at
//! dawn (06:00), not midnight: rollover bookkeeping (event-log archiving, the
//! daily refresh) fires when the clock crosses the dawn boundary.

use serde::{Deserialize, Serialize};

/// Minutes in a simulated day.
pub const MINUTES_PER_DAY: u32 = 1440;

/// The dawn boundary: crossing 06:00 counts as a new day.
pub const DAWN_MINUTE: u32 = 6 * 60;

/// Start of the overnight fast-forward window (02:00).
pub const NIGHT_SKIP_START: u32 = 2 * 60;

/// Hour at which evening outings end and everyone heads home (23:00).
pub const CURFEW_MINUTE: u32 = 23 * 60;

// =============================================================================
// Moment
// =============================================================================

/// A point on the simulated timeline: day number plus minute-of-day.
///
/// Ordering is lexicographic, so `a >= b` means "a is at or after b" - which
/// is exactly the "both day and minute thresholds reached" rule used for
/// directive and task expiry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Moment {
    pub day: u32,
    pub minute: u32,
}

impl Moment {
    pub fn new(day: u32, minute: u32) -> Self {
        Self {
            day,
            minute: minute % MINUTES_PER_DAY,
        }
    }

    /// The moment `minutes` simulated minutes after this one.
    pub fn plus_minutes(self, minutes: u32) -> Self {
        let total = self.minute + minutes;
        Self {
            day: self.day + total / MINUTES_PER_DAY,
            minute: total % MINUTES_PER_DAY,
        }
    }
}

impl std::fmt::Display for Moment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Day {}, {:02}:{:02}",
            self.day,
            self.minute / 60,
            self.minute % 60
        )
    }
}

// =============================================================================
// World clock
// =============================================================================

/// The shared world clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldClock {
    day: u32,
    minute: u32,
}

impl WorldClock {
    /// Worlds start on the morning of day 1.
    pub fn new() -> Self {
        Self {
            day: 1,
            minute: 8 * 60,
        }
    }

    pub fn starting_at(day: u32, minute: u32) -> Self {
        Self {
            day,
            minute: minute % MINUTES_PER_DAY,
        }
    }

    pub fn day(&self) -> u32 {
        self.day
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    pub fn hour(&self) -> u32 {
        self.minute / 60
    }

    pub fn now(&self) -> Moment {
        Moment {
            day: self.day,
            minute: self.minute,
        }
    }

    /// Weekday index in a 7-day week, used for per-NPC holidays.
    pub fn weekday(&self) -> u32 {
        self.day % 7
    }

    /// Advance by `delta` simulated minutes.
    ///
    /// Returns how many dawn boundaries were crossed. Minute-of-day wraps
    /// modulo 1440 and the day counter increases by the crossing count, so the
    /// clock invariants (minute in [0, 1440), day non-decreasing) hold for any
    /// non-negative delta.
    pub fn advance(&mut self, delta: u32) -> u32 {
        let since_dawn = (self.minute + MINUTES_PER_DAY - DAWN_MINUTE) % MINUTES_PER_DAY;
        let crossings = (since_dawn as u64 + delta as u64) / MINUTES_PER_DAY as u64;
        self.minute = ((self.minute as u64 + delta as u64) % MINUTES_PER_DAY as u64) as u32;
        self.day += crossings as u32;
        crossings as u32
    }

    /// Whether the clock sits inside the overnight fast-forward window
    /// (02:00 inclusive to 06:00 exclusive).
    pub fn in_night_skip_window(&self) -> bool {
        self.minute >= NIGHT_SKIP_START && self.minute < DAWN_MINUTE
    }

    /// Minutes remaining until the next 06:00.
    pub fn minutes_until_dawn(&self) -> u32 {
        if self.minute < DAWN_MINUTE {
            DAWN_MINUTE - self.minute
        } else {
            MINUTES_PER_DAY - self.minute + DAWN_MINUTE
        }
    }

    /// Human-readable label, e.g. "Day 3, 07:45".
    pub fn label(&self) -> String {
        self.now().to_string()
    }
}

impl Default for WorldClock {
    fn default() -> Self {
        Self::new()
    }
}
