use chrono::{DateTime, Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Periodic wake-up schedule for a stage loop.
///
/// Ticks fall on every UTC instant whose unix time is congruent to `phase`
/// modulo `period`, so a 30 s cadence with phase 0 wakes at :00 and :30.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cadence {
    pub period_seconds: u64,
    #[serde(default)]
    pub phase_seconds: u64,
}

impl Cadence {
    pub fn every(period_seconds: u64) -> Self {
        Self {
            period_seconds,
            phase_seconds: 0,
        }
    }

    pub fn with_phase(mut self, phase_seconds: u64) -> Self {
        self.phase_seconds = phase_seconds;
        self
    }

    fn period(&self) -> i64 {
        self.period_seconds.max(1) as i64
    }

    /// First tick strictly after `now`.
    pub fn next_tick(&self, now: NaiveDateTime) -> NaiveDateTime {
        let period = self.period();
        let phase = (self.phase_seconds as i64) % period;
        let seconds = now.and_utc().timestamp();
        let offset = (seconds - phase).rem_euclid(period);
        let next = seconds - offset + period;
        DateTime::from_timestamp(next, 0)
            .map(|t| t.naive_utc())
            .unwrap_or_else(|| now + Duration::seconds(period))
    }

    pub fn delay_until_next(&self, now: NaiveDateTime) -> std::time::Duration {
        (self.next_tick(now) - now)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(text: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(text, "%Y%m%d-%H%M%S").unwrap()
    }

    #[test]
    fn thirty_second_cadence_lands_on_half_minutes() {
        let cadence = Cadence::every(30);
        assert_eq!(cadence.next_tick(at("20240101-120012")), at("20240101-120030"));
        assert_eq!(cadence.next_tick(at("20240101-120030")), at("20240101-120100"));
        assert_eq!(
            cadence.delay_until_next(at("20240101-120045")),
            std::time::Duration::from_secs(15)
        );
    }

    #[test]
    fn phase_shifts_the_tick() {
        let cadence = Cadence::every(60).with_phase(5);
        assert_eq!(cadence.next_tick(at("20240101-235959")), at("20240102-000005"));
        assert_eq!(cadence.next_tick(at("20240101-120005")), at("20240101-120105"));
    }

    #[test]
    fn zero_period_is_treated_as_one_second() {
        let cadence = Cadence::every(0);
        assert_eq!(cadence.next_tick(at("20240101-120000")), at("20240101-120001"));
    }
}
