use crate::catalog::stamp::{FrameName, MinuteKey};
use crate::fsio;
use chrono::{Duration, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// How a minute bucket is judged complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosePolicy {
    /// The bucket minute is at least one minute old and the clock is past
    /// `grace_seconds` within the current minute.
    Grace,
    /// The next minute boundary has been reached.
    NextMinute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloseRule {
    pub policy: ClosePolicy,
    pub grace_seconds: u32,
}

impl Default for CloseRule {
    fn default() -> Self {
        Self {
            policy: ClosePolicy::Grace,
            grace_seconds: 30,
        }
    }
}

impl CloseRule {
    pub fn is_closed(&self, key: MinuteKey, now: NaiveDateTime) -> bool {
        let elapsed = now - key.start();
        if elapsed < Duration::minutes(1) {
            return false;
        }
        match self.policy {
            ClosePolicy::Grace => now.second() >= self.grace_seconds,
            ClosePolicy::NextMinute => true,
        }
    }
}

/// A recognised frame sitting in the staging tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFrame {
    pub name: FrameName,
    pub path: PathBuf,
}

/// Splits paths into recognised frames and names that do not match the
/// `<prefix>-YYYYMMDD-HHMMSS.png` convention. Hidden files are dropped.
pub fn classify(paths: impl IntoIterator<Item = PathBuf>) -> (Vec<StagedFrame>, Vec<PathBuf>) {
    let mut frames = Vec::new();
    let mut rejected = Vec::new();
    for path in paths {
        if fsio::is_hidden(&path) {
            continue;
        }
        let parsed = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(FrameName::parse);
        match parsed {
            Some(Ok(name)) => frames.push(StagedFrame { name, path }),
            _ => rejected.push(path),
        }
    }
    (frames, rejected)
}

/// Groups frames by capture minute, each bucket in capture order.
pub fn bucket_frames(
    frames: impl IntoIterator<Item = StagedFrame>,
) -> BTreeMap<MinuteKey, Vec<StagedFrame>> {
    let mut buckets: BTreeMap<MinuteKey, Vec<StagedFrame>> = BTreeMap::new();
    for frame in frames {
        buckets.entry(frame.name.minute()).or_default().push(frame);
    }
    for bucket in buckets.values_mut() {
        bucket.sort_by(|a, b| {
            a.name
                .captured
                .cmp(&b.name.captured)
                .then_with(|| a.path.cmp(&b.path))
        });
    }
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(text: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(text, "%Y%m%d-%H%M%S").unwrap()
    }

    fn key(text: &str) -> MinuteKey {
        MinuteKey::floor(at(text))
    }

    #[test]
    fn grace_rule_waits_for_the_grace_second() {
        let rule = CloseRule::default();
        let bucket = key("20240101-120000");
        assert!(!rule.is_closed(bucket, at("20240101-120059")));
        assert!(!rule.is_closed(bucket, at("20240101-120105")));
        assert!(rule.is_closed(bucket, at("20240101-120130")));
        assert!(rule.is_closed(bucket, at("20240101-121045")));
    }

    #[test]
    fn next_minute_rule_closes_at_the_boundary() {
        let rule = CloseRule {
            policy: ClosePolicy::NextMinute,
            grace_seconds: 30,
        };
        let bucket = key("20240101-120000");
        assert!(!rule.is_closed(bucket, at("20240101-120059")));
        assert!(rule.is_closed(bucket, at("20240101-120100")));
        assert!(rule.is_closed(bucket, at("20240101-120105")));
    }

    #[test]
    fn frames_bucket_by_minute_in_capture_order() {
        let paths = [
            "/s/MISS2-20240101-120040.png",
            "/s/MISS2-20240101-120010.png",
            "/s/MISS2-20240101-120105.png",
            "/s/readme.md",
            "/s/.tmp123",
        ]
        .map(PathBuf::from);
        let (frames, rejected) = classify(paths);
        assert_eq!(rejected, vec![PathBuf::from("/s/readme.md")]);

        let buckets = bucket_frames(frames);
        let keys: Vec<_> = buckets.keys().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["20240101-1200", "20240101-1201"]);

        let first = &buckets[&key("20240101-120000")];
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].name.captured, at("20240101-120010"));
    }
}
