use anyhow::Result;
use rbatis::rbdc::db::ExecResult;
use rbatis::{crud, impl_select, RBatis};
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::app_config::db;
use crate::time_util;
use crate::trading::backtest::BacktestResult;
use crate::trading::strategy::Strategy;

/// backtests表实体，统计/成交/净值曲线按JSON落库
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct BackTestLog {
    pub id: String,
    pub strategy_id: String,
    pub strategy_name: String,
    pub symbol: String,
    pub initial_balance: f64,
    pub risk_percent: f64,
    pub stats: String,
    pub trades: String,
    pub equity_curve: String,
    pub created_at: String,
}

crud!(BackTestLog {}, "backtests");
impl_select!(BackTestLog{select_by_strategy(strategy_id:&str) =>
    "`where strategy_id = #{strategy_id} order by created_at desc`"}, "backtests");

impl BackTestLog {
    pub fn from_result(
        strategy: &Strategy,
        result: &BacktestResult,
        initial_balance: f64,
    ) -> Result<Self> {
        Ok(BackTestLog {
            id: Uuid::new_v4().to_string(),
            strategy_id: strategy.id.clone().unwrap_or_default(),
            strategy_name: strategy.name.clone(),
            symbol: strategy.symbol.clone(),
            initial_balance,
            risk_percent: strategy.rules.first().map(|r| r.risk_percent).unwrap_or(1.0),
            stats: serde_json::to_string(&result.stats)?,
            trades: serde_json::to_string(&result.trades)?,
            equity_curve: serde_json::to_string(&result.equity_curve)?,
            created_at: time_util::now_iso(),
        })
    }
}

pub struct BackTestLogModel {
    db: &'static RBatis,
}

impl BackTestLogModel {
    pub async fn new() -> BackTestLogModel {
        Self {
            db: db::get_db_client(),
        }
    }

    pub async fn add(&self, log: &BackTestLog) -> Result<ExecResult> {
        let data = BackTestLog::insert(self.db, log).await?;
        debug!("insert_back_test_log_result = {}", json!(data));
        Ok(data)
    }

    pub async fn list_by_strategy(&self, strategy_id: &str) -> Result<Vec<BackTestLog>> {
        let data = BackTestLog::select_by_strategy(self.db, strategy_id).await?;
        Ok(data)
    }
}
