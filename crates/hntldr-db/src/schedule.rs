//! Re-check cadence of published items.
//!
//! A freshly published item is checked every [`UpdateSchedule::fast_interval`].
//! After [`UpdateSchedule::fast_phase_checks`] checks it relaxes to
//! [`UpdateSchedule::slow_interval`], and it is retired once the next check
//! would land at or past its expiry.

use std::time::Duration;

use time::OffsetDateTime;

use crate::{IsoTimestamp, Phase};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateSchedule {
    pub fast_interval: Duration,
    pub slow_interval: Duration,
    /// Total observation window, counted from the moment of publishing.
    pub lifetime: Duration,
    /// Number of checks after which a task leaves [`Phase::Fast`].
    pub fast_phase_checks: u32,
}

impl Default for UpdateSchedule {
    fn default() -> Self {
        Self {
            fast_interval: Duration::from_secs(10 * 60),
            slow_interval: Duration::from_secs(30 * 60),
            lifetime: Duration::from_secs(3 * 60 * 60),
            fast_phase_checks: 3,
        }
    }
}

/// Outcome of one step of the phase state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleStep {
    Reschedule {
        phase: Phase,
        update_count: u32,
        next_update_at: IsoTimestamp,
    },
    /// Next check would fall outside the observation window.
    Retire,
}

impl UpdateSchedule {
    pub fn interval(&self, phase: Phase) -> Duration {
        match phase {
            Phase::Fast => self.fast_interval,
            Phase::Slow => self.slow_interval,
        }
    }

    /// `(next_update_at, expires_at)` of a task enqueued at `now`.
    pub fn initial(&self, now: OffsetDateTime) -> (IsoTimestamp, IsoTimestamp) {
        (
            IsoTimestamp::from(now + self.fast_interval),
            IsoTimestamp::from(now + self.lifetime),
        )
    }

    pub fn next_step(
        &self,
        phase: Phase,
        update_count: u32,
        expires_at: &IsoTimestamp,
        now: OffsetDateTime,
    ) -> ScheduleStep {
        let update_count = update_count.saturating_add(1);

        let phase = if phase == Phase::Fast && self.fast_phase_checks <= update_count {
            Phase::Slow
        } else {
            phase
        };

        let next_update_at = IsoTimestamp::from(now + self.interval(phase));

        if *expires_at <= next_update_at {
            return ScheduleStep::Retire;
        }

        ScheduleStep::Reschedule {
            phase,
            update_count,
            next_update_at,
        }
    }
}
