pub mod aggregator;
pub mod assembler;
pub mod extractor;
pub mod feed;

pub use aggregator::{AveragedFrame, MinuteAggregator};
pub use assembler::{ColumnSource, ColumnTree, Keogram, KeogramAssembler, KeogramPhase, KeogramStore};
pub use extractor::{column_from_frame, EmissionColumn, EmissionExtractor};
pub use feed::LiveFeed;
