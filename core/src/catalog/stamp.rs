use crate::prelude::{StageError, StageResult};
use chrono::{NaiveDate, NaiveDateTime, Timelike};
use std::fmt;

pub const MINUTES_PER_DAY: usize = 24 * 60;

/// A frame name of the form `<prefix>-YYYYMMDD-HHMMSS.png`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameName {
    pub prefix: String,
    pub captured: NaiveDateTime,
}

impl FrameName {
    pub fn new(prefix: impl Into<String>, captured: NaiveDateTime) -> Self {
        Self {
            prefix: prefix.into(),
            captured,
        }
    }

    /// Parses a bare file name. The prefix may itself contain dashes.
    pub fn parse(file_name: &str) -> StageResult<Self> {
        let invalid = || StageError::InvalidName(file_name.to_string());
        let stem = file_name.strip_suffix(".png").ok_or_else(invalid)?;

        let mut parts = stem.rsplitn(3, '-');
        let (time, date, prefix) = match (parts.next(), parts.next(), parts.next()) {
            (Some(time), Some(date), Some(prefix)) => (time, date, prefix),
            _ => return Err(invalid()),
        };

        let digits = |field: &str, len: usize| {
            field.len() == len && field.bytes().all(|b| b.is_ascii_digit())
        };
        if prefix.is_empty() || !digits(date, 8) || !digits(time, 6) {
            return Err(invalid());
        }

        let captured = NaiveDateTime::parse_from_str(&format!("{date}{time}"), "%Y%m%d%H%M%S")
            .map_err(|_| invalid())?;
        Ok(Self::new(prefix, captured))
    }

    pub fn minute(&self) -> MinuteKey {
        MinuteKey::floor(self.captured)
    }

    pub fn file_name(&self) -> String {
        format!(
            "{}-{}.png",
            self.prefix,
            self.captured.format("%Y%m%d-%H%M%S")
        )
    }
}

/// A UTC calendar minute; the bucket key shared by every stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MinuteKey(NaiveDateTime);

impl MinuteKey {
    pub fn floor(instant: NaiveDateTime) -> Self {
        let floored = instant
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(instant);
        Self(floored)
    }

    pub fn from_minute_of_day(date: NaiveDate, minute_of_day: usize) -> Option<Self> {
        if minute_of_day >= MINUTES_PER_DAY {
            return None;
        }
        let hour = (minute_of_day / 60) as u32;
        let minute = (minute_of_day % 60) as u32;
        date.and_hms_opt(hour, minute, 0).map(Self)
    }

    pub fn start(&self) -> NaiveDateTime {
        self.0
    }

    pub fn date(&self) -> NaiveDate {
        self.0.date()
    }

    pub fn hour(&self) -> u32 {
        self.0.hour()
    }

    pub fn minute(&self) -> u32 {
        self.0.minute()
    }

    pub fn minute_of_day(&self) -> usize {
        minute_of_day(self.0)
    }

    /// Artifact name for this minute: `<prefix>-YYYYMMDD-HHMM00.png`.
    pub fn file_name(&self, prefix: &str) -> String {
        FrameName::new(prefix, self.0).file_name()
    }
}

impl fmt::Display for MinuteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y%m%d-%H%M"))
    }
}

pub fn minute_of_day(instant: NaiveDateTime) -> usize {
    (instant.hour() * 60 + instant.minute()) as usize
}
