pub mod domain;
pub mod series;

pub use domain::{AccountIdentity, Reading, ReadingsBatch};
pub use series::{MergeSummary, SeriesError, SeriesStore};
