//! 指标计算层：OHLCV序列 -> 命名指标列

pub mod pipeline;
pub mod series;
pub mod smart_money;

pub use pipeline::enrich;
pub use series::{IndicatorSeries, SnapshotRow};
