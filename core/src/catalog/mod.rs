//! The filesystem-as-index layer.
//!
//! Artifacts live under `<root>/YYYY/MM/DD/<prefix>-YYYYMMDD-HHMMSS.png`.
//! Parsing, bucketing and ordering are pure functions over names so they can
//! be exercised without touching the disk.

pub mod index;
pub mod layout;
pub mod ledger;
pub mod stamp;

pub use index::{bucket_frames, classify, CloseRule, ClosePolicy, StagedFrame};
pub use layout::DatedTree;
pub use ledger::Ledger;
pub use stamp::{minute_of_day, FrameName, MinuteKey, MINUTES_PER_DAY};
