//! 持久化层：rbatis实体与Model包装

pub mod order;
pub mod strategy;
pub mod trade_store;

pub use trade_store::{DbTradeStore, MemoryTradeStore, TradeClose, TradeStore};
