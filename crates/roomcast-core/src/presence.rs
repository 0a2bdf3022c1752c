//! Presence status for roomcast.
//!
//! The server relays presence labels verbatim and never computes them. This
//! module captures how a client is expected to derive its label from the time
//! since its last pointer or key activity, so client code and tests share one
//! definition of the thresholds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::debug;

/// Inactivity after which a participant is idle.
pub const IDLE_AFTER: Duration = Duration::from_secs(3 * 60);

/// Inactivity after which a participant is asleep.
pub const SLEEP_AFTER: Duration = Duration::from_secs(30 * 60);

/// Coarse activity status of a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    /// Recently interacted.
    Active,
    /// Inactive for a while.
    Idle,
    /// Inactive for a long time.
    Sleep,
}

impl PresenceStatus {
    /// Get the wire label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Active => "active",
            PresenceStatus::Idle => "idle",
            PresenceStatus::Sleep => "sleep",
        }
    }

    /// Classify an inactivity duration with the default thresholds.
    #[must_use]
    pub fn from_inactivity(inactive_for: Duration) -> Self {
        PresenceThresholds::default().classify(inactive_for)
    }
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PresenceStatus {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(PresenceStatus::Active),
            "idle" => Ok(PresenceStatus::Idle),
            "sleep" => Ok(PresenceStatus::Sleep),
            _ => Err("Unknown presence status"),
        }
    }
}

/// Inactivity thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceThresholds {
    /// Inactivity at which `active` becomes `idle`.
    pub idle_after: Duration,
    /// Inactivity beyond which `idle` becomes `sleep`.
    pub sleep_after: Duration,
}

impl Default for PresenceThresholds {
    fn default() -> Self {
        Self {
            idle_after: IDLE_AFTER,
            sleep_after: SLEEP_AFTER,
        }
    }
}

impl PresenceThresholds {
    /// Classify an inactivity duration.
    ///
    /// `active` below `idle_after`, `idle` from `idle_after` up to and
    /// including `sleep_after`, `sleep` beyond.
    #[must_use]
    pub fn classify(&self, inactive_for: Duration) -> PresenceStatus {
        if inactive_for < self.idle_after {
            PresenceStatus::Active
        } else if inactive_for <= self.sleep_after {
            PresenceStatus::Idle
        } else {
            PresenceStatus::Sleep
        }
    }
}

/// Tracks the last local interaction and reports status transitions.
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    thresholds: PresenceThresholds,
    last_activity: Instant,
    last_reported: Option<PresenceStatus>,
}

impl PresenceTracker {
    /// Create a tracker whose last activity is `now`.
    #[must_use]
    pub fn new(now: Instant) -> Self {
        Self::with_thresholds(PresenceThresholds::default(), now)
    }

    /// Create a tracker with custom thresholds.
    #[must_use]
    pub fn with_thresholds(thresholds: PresenceThresholds, now: Instant) -> Self {
        Self {
            thresholds,
            last_activity: now,
            last_reported: None,
        }
    }

    /// Record a local interaction.
    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// Get the time of the last recorded interaction.
    #[must_use]
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Get the status at `now`.
    #[must_use]
    pub fn status_at(&self, now: Instant) -> PresenceStatus {
        self.thresholds
            .classify(now.saturating_duration_since(self.last_activity))
    }

    /// Get the status at `now` if it differs from the last one reported.
    ///
    /// The first poll always reports.
    pub fn poll(&mut self, now: Instant) -> Option<PresenceStatus> {
        let status = self.status_at(now);
        if self.last_reported == Some(status) {
            return None;
        }

        debug!(status = %status, "Presence changed");
        self.last_reported = Some(status);
        Some(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn test_classify_thresholds() {
        assert_eq!(PresenceStatus::from_inactivity(Duration::ZERO), PresenceStatus::Active);
        assert_eq!(
            PresenceStatus::from_inactivity(3 * MINUTE - Duration::from_millis(1)),
            PresenceStatus::Active
        );
        assert_eq!(PresenceStatus::from_inactivity(3 * MINUTE), PresenceStatus::Idle);
        assert_eq!(PresenceStatus::from_inactivity(30 * MINUTE), PresenceStatus::Idle);
        assert_eq!(
            PresenceStatus::from_inactivity(30 * MINUTE + Duration::from_millis(1)),
            PresenceStatus::Sleep
        );
    }

    #[test]
    fn test_status_labels() {
        for status in [
            PresenceStatus::Active,
            PresenceStatus::Idle,
            PresenceStatus::Sleep,
        ] {
            assert_eq!(status.as_str().parse::<PresenceStatus>(), Ok(status));
            assert_eq!(
                serde_json::to_value(status).unwrap(),
                serde_json::json!(status.as_str())
            );
        }
        assert!("away".parse::<PresenceStatus>().is_err());
    }

    #[test]
    fn test_tracker_reports_transitions_once() {
        let start = Instant::now();
        let mut tracker = PresenceTracker::new(start);

        assert_eq!(tracker.poll(start), Some(PresenceStatus::Active));
        assert_eq!(tracker.poll(start + MINUTE), None);
        assert_eq!(tracker.poll(start + 5 * MINUTE), Some(PresenceStatus::Idle));
        assert_eq!(tracker.poll(start + 10 * MINUTE), None);
        assert_eq!(tracker.poll(start + 31 * MINUTE), Some(PresenceStatus::Sleep));

        tracker.touch(start + 32 * MINUTE);
        assert_eq!(tracker.last_activity(), start + 32 * MINUTE);
        assert_eq!(tracker.poll(start + 32 * MINUTE), Some(PresenceStatus::Active));
    }

    #[test]
    fn test_custom_thresholds() {
        let start = Instant::now();
        let thresholds = PresenceThresholds {
            idle_after: Duration::from_secs(10),
            sleep_after: Duration::from_secs(20),
        };
        let tracker = PresenceTracker::with_thresholds(thresholds, start);

        assert_eq!(tracker.status_at(start + Duration::from_secs(5)), PresenceStatus::Active);
        assert_eq!(tracker.status_at(start + Duration::from_secs(15)), PresenceStatus::Idle);
        assert_eq!(tracker.status_at(start + Duration::from_secs(25)), PresenceStatus::Sleep);
    }
}
