//! Funnel reporting engine — event normalization, per-user deduplication,
//! top-N group ranking, funnel step counts and conversion rates.

pub mod aggregator;
pub mod conversion;
pub mod dedup;
pub mod export;
pub mod funnel;
pub mod input;
pub mod normalizer;
pub mod ranker;

pub use aggregator::FunnelAggregator;
pub use dedup::Deduplicator;
pub use export::ExportFormat;
pub use funnel::{FunnelAnalyzer, FunnelReport};
pub use normalizer::{DropReport, Normalizer};
pub use ranker::GroupRanker;
