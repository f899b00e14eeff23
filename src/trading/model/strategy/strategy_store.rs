use anyhow::{anyhow, Result};
use rbatis::rbdc::db::ExecResult;
use rbatis::{crud, impl_delete, impl_select, RBatis};
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::app_config::db;
use crate::time_util;
use crate::trading::strategy::Strategy;

/// strategies表实体，rules列存整棵规则树的JSON
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct StrategyEntity {
    pub id: String,
    pub name: String,
    pub symbol: String,
    pub rules: String,
    pub raw_description: String,
    pub ai_explanation: String,
    pub created_at: String,
    pub updated_at: String,
}

crud!(StrategyEntity {}, "strategies");
impl_select!(StrategyEntity{select_by_id(id:&str) => "`where id = #{id}`"}, "strategies");
impl_select!(StrategyEntity{select_by_symbol(symbol:&str) => "`where symbol = #{symbol}`"}, "strategies");
impl_delete!(StrategyEntity{delete_by_id(id:&str) => "`where id = #{id}`"}, "strategies");

impl StrategyEntity {
    /// 从领域策略构造实体，空id时分配uuid
    pub fn from_strategy(strategy: &Strategy) -> Result<Self> {
        let id = strategy
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = time_util::now_iso();
        Ok(StrategyEntity {
            id,
            name: strategy.name.clone(),
            symbol: strategy.symbol.clone(),
            rules: serde_json::to_string(&strategy.rules)?,
            raw_description: strategy.raw_description.clone(),
            ai_explanation: strategy.ai_explanation.clone(),
            created_at: strategy.created_at.clone().unwrap_or_else(|| now.clone()),
            updated_at: now,
        })
    }

    pub fn to_strategy(&self) -> Result<Strategy> {
        Ok(Strategy {
            id: Some(self.id.clone()),
            name: self.name.clone(),
            symbol: self.symbol.clone(),
            rules: serde_json::from_str(&self.rules)
                .map_err(|e| anyhow!("strategies.rules反序列化失败 id={}: {}", self.id, e))?,
            raw_description: self.raw_description.clone(),
            ai_explanation: self.ai_explanation.clone(),
            created_at: Some(self.created_at.clone()),
        })
    }
}

pub struct StrategyEntityModel {
    db: &'static RBatis,
}

impl StrategyEntityModel {
    pub async fn new() -> StrategyEntityModel {
        Self {
            db: db::get_db_client(),
        }
    }

    pub async fn add(&self, entity: &StrategyEntity) -> Result<ExecResult> {
        let data = StrategyEntity::insert(self.db, entity).await?;
        debug!("insert_strategy_result = {}", json!(data));
        Ok(data)
    }

    pub async fn get(&self, id: &str) -> Result<Option<StrategyEntity>> {
        let mut rows = StrategyEntity::select_by_id(self.db, id).await?;
        Ok(rows.pop())
    }

    pub async fn list_by_symbol(&self, symbol: &str) -> Result<Vec<StrategyEntity>> {
        let data = StrategyEntity::select_by_symbol(self.db, symbol).await?;
        Ok(data)
    }

    pub async fn list(&self) -> Result<Vec<StrategyEntity>> {
        let data = StrategyEntity::select_all(self.db).await?;
        Ok(data)
    }

    pub async fn delete(&self, id: &str) -> Result<u64> {
        let data = StrategyEntity::delete_by_id(self.db, id).await?;
        Ok(data.rows_affected)
    }
}
