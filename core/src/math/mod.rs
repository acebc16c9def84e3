pub mod filter;
pub mod stats;

pub use filter::{median_filter_3x3, subtract_background};
pub use stats::StatsHelper;
