//! 交易账本的存取抽象
//!
//! 实盘循环只依赖这个trait：生产走sqlite，测试用内存实现，
//! 控制循环的行为测试不需要起数据库。

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::order::algo_trade::{AlgoTradeEntity, AlgoTradeEntityModel};
use crate::time_util;

/// 平仓时补全的字段
#[derive(Debug, Clone)]
pub struct TradeClose {
    pub exit_price: f64,
    pub exit_time: String,
    pub exit_indicators: String,
    pub exit_reason: String,
    pub bars_held: i64,
    pub profit: Option<f64>,
}

#[async_trait]
pub trait TradeStore: Send + Sync {
    /// 写入开仓stub，返回记录id
    async fn open_trade(&self, entity: AlgoTradeEntity) -> Result<String>;

    /// 按id补全平仓信息
    async fn close_trade(&self, id: &str, close: TradeClose) -> Result<()>;

    /// 某品种所有status='open'的记录
    async fn open_trades(&self, symbol: &str) -> Result<Vec<AlgoTradeEntity>>;
}

/// sqlite实现
pub struct DbTradeStore;

#[async_trait]
impl TradeStore for DbTradeStore {
    async fn open_trade(&self, entity: AlgoTradeEntity) -> Result<String> {
        let id = entity.id.clone();
        AlgoTradeEntityModel::new().await.add(&entity).await?;
        Ok(id)
    }

    async fn close_trade(&self, id: &str, close: TradeClose) -> Result<()> {
        let model = AlgoTradeEntityModel::new().await;
        let mut entity = model
            .get(id)
            .await?
            .ok_or_else(|| anyhow!("交易记录不存在: {}", id))?;
        apply_close(&mut entity, close);
        model.update(&entity).await?;
        Ok(())
    }

    async fn open_trades(&self, symbol: &str) -> Result<Vec<AlgoTradeEntity>> {
        AlgoTradeEntityModel::new().await.open_by_symbol(symbol).await
    }
}

fn apply_close(entity: &mut AlgoTradeEntity, close: TradeClose) {
    entity.exit_price = Some(close.exit_price);
    entity.exit_time = Some(close.exit_time);
    entity.exit_indicators = Some(close.exit_indicators);
    entity.exit_reason = Some(close.exit_reason);
    entity.bars_held = Some(close.bars_held);
    entity.profit = close.profit;
    entity.status = "closed".to_string();
    entity.updated_at = time_util::now_iso();
}

/// 纯内存实现，测试用
#[derive(Default)]
pub struct MemoryTradeStore {
    trades: Mutex<HashMap<String, AlgoTradeEntity>>,
}

impl MemoryTradeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 测试断言用：导出全部记录
    pub fn all(&self) -> Vec<AlgoTradeEntity> {
        self.trades.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl TradeStore for MemoryTradeStore {
    async fn open_trade(&self, entity: AlgoTradeEntity) -> Result<String> {
        let id = entity.id.clone();
        self.trades.lock().unwrap().insert(id.clone(), entity);
        Ok(id)
    }

    async fn close_trade(&self, id: &str, close: TradeClose) -> Result<()> {
        let mut trades = self.trades.lock().unwrap();
        let entity = trades
            .get_mut(id)
            .ok_or_else(|| anyhow!("交易记录不存在: {}", id))?;
        apply_close(entity, close);
        Ok(())
    }

    async fn open_trades(&self, symbol: &str) -> Result<Vec<AlgoTradeEntity>> {
        Ok(self
            .trades
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.symbol == symbol && t.status == "open")
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub(symbol: &str) -> AlgoTradeEntity {
        AlgoTradeEntity {
            id: uuid::Uuid::new_v4().to_string(),
            strategy_id: None,
            strategy_name: "demo".to_string(),
            rule_index: 0,
            rule_name: "r1".to_string(),
            symbol: symbol.to_string(),
            timeframe: "1h".to_string(),
            direction: "buy".to_string(),
            volume: 0.01,
            entry_price: 1.1,
            entry_time: time_util::now_iso(),
            sl_price: Some(1.098),
            tp_price: Some(1.104),
            sl_atr_mult: None,
            tp_atr_mult: None,
            atr_at_entry: None,
            entry_indicators: "{}".to_string(),
            exit_price: None,
            exit_time: None,
            exit_indicators: None,
            exit_reason: None,
            bars_held: None,
            profit: None,
            mt5_ticket: Some(123),
            ml_confidence: None,
            lstm_direction: None,
            lstm_confidence: None,
            status: "open".to_string(),
            created_at: time_util::now_iso(),
            updated_at: time_util::now_iso(),
        }
    }

    #[tokio::test]
    async fn test_memory_store_lifecycle() {
        let store = MemoryTradeStore::new();
        let id = store.open_trade(stub("EURUSD")).await.unwrap();
        assert_eq!(store.open_trades("EURUSD").await.unwrap().len(), 1);
        assert!(store.open_trades("GBPUSD").await.unwrap().is_empty());

        store
            .close_trade(
                &id,
                TradeClose {
                    exit_price: 1.104,
                    exit_time: time_util::now_iso(),
                    exit_indicators: "{}".to_string(),
                    exit_reason: "take_profit".to_string(),
                    bars_held: 3,
                    profit: Some(40.0),
                },
            )
            .await
            .unwrap();
        assert!(store.open_trades("EURUSD").await.unwrap().is_empty());
        let all = store.all();
        assert_eq!(all[0].status, "closed");
        assert_eq!(all[0].exit_reason.as_deref(), Some("take_profit"));
    }

    #[tokio::test]
    async fn test_close_unknown_id_errors() {
        let store = MemoryTradeStore::new();
        let err = store
            .close_trade(
                "missing",
                TradeClose {
                    exit_price: 0.0,
                    exit_time: String::new(),
                    exit_indicators: "{}".to_string(),
                    exit_reason: "external".to_string(),
                    bars_held: 0,
                    profit: None,
                },
            )
            .await;
        assert!(err.is_err());
    }
}
