use anyhow::Result;
use rbatis::rbdc::db::ExecResult;
use rbatis::{crud, impl_select, impl_update, RBatis};
use serde_json::json;
use tracing::debug;

use crate::app_config::db;

/// algo_trades表实体
///
/// 开仓时写入stub（status='open'），平仓时补全exit_*字段并置closed。
/// 进出场指标快照序列化成JSON文本列。
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct AlgoTradeEntity {
    pub id: String,
    pub strategy_id: Option<String>,
    pub strategy_name: String,
    pub rule_index: i64,
    pub rule_name: String,
    pub symbol: String,
    pub timeframe: String,
    pub direction: String,
    pub volume: f64,
    pub entry_price: f64,
    pub entry_time: String,
    pub sl_price: Option<f64>,
    pub tp_price: Option<f64>,
    pub sl_atr_mult: Option<f64>,
    pub tp_atr_mult: Option<f64>,
    pub atr_at_entry: Option<f64>,
    pub entry_indicators: String,
    pub exit_price: Option<f64>,
    pub exit_time: Option<String>,
    pub exit_indicators: Option<String>,
    pub exit_reason: Option<String>,
    pub bars_held: Option<i64>,
    pub profit: Option<f64>,
    pub mt5_ticket: Option<i64>,
    pub ml_confidence: Option<f64>,
    pub lstm_direction: Option<String>,
    pub lstm_confidence: Option<f64>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

crud!(AlgoTradeEntity {}, "algo_trades");
impl_select!(AlgoTradeEntity{select_by_id(id:&str) => "`where id = #{id}`"}, "algo_trades");
impl_select!(AlgoTradeEntity{select_open_by_symbol(symbol:&str) =>
    "`where symbol = #{symbol} and status = 'open'`"}, "algo_trades");
impl_update!(AlgoTradeEntity{update_by_id(id:&str) => "`where id = #{id}`"}, "algo_trades");

pub struct AlgoTradeEntityModel {
    db: &'static RBatis,
}

impl AlgoTradeEntityModel {
    pub async fn new() -> AlgoTradeEntityModel {
        Self {
            db: db::get_db_client(),
        }
    }

    pub async fn add(&self, entity: &AlgoTradeEntity) -> Result<ExecResult> {
        let data = AlgoTradeEntity::insert(self.db, entity).await?;
        debug!("insert_algo_trade_result = {}", json!(data));
        Ok(data)
    }

    pub async fn get(&self, id: &str) -> Result<Option<AlgoTradeEntity>> {
        let mut rows = AlgoTradeEntity::select_by_id(self.db, id).await?;
        Ok(rows.pop())
    }

    pub async fn open_by_symbol(&self, symbol: &str) -> Result<Vec<AlgoTradeEntity>> {
        let data = AlgoTradeEntity::select_open_by_symbol(self.db, symbol).await?;
        Ok(data)
    }

    pub async fn update(&self, entity: &AlgoTradeEntity) -> Result<ExecResult> {
        let data = AlgoTradeEntity::update_by_id(self.db, entity, &entity.id).await?;
        debug!("update_algo_trade_result = {}", json!(data));
        Ok(data)
    }
}
