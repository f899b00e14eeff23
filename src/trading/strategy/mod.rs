//! 策略模型与条件求值
//!
//! 策略是纯数据：一组按优先级排列的规则，每条规则带进出场条件
//! 与风控参数。回测与实盘共用同一套求值逻辑。

pub mod condition;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub use condition::{all_conditions_met, evaluate_condition, resolve_column};

/// 交易方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "buy",
            Direction::Sell => "sell",
        }
    }

    /// 反方向的平仓动作
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Buy => Direction::Sell,
            Direction::Sell => Direction::Buy,
        }
    }
}

impl Default for Direction {
    fn default() -> Self {
        Direction::Buy
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 条件比较操作符，封闭集合，未知操作符在反序列化时即被拒绝
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "crosses_above")]
    CrossesAbove,
    #[serde(rename = "crosses_below")]
    CrossesBelow,
}

/// 条件右值：数字阈值或另一个指标引用
///
/// 能解析为数字的字符串按字面量处理（列查找优先）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TargetValue {
    Number(f64),
    Signal(String),
}

/// 单个指标条件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorCondition {
    /// 指标名，如 "RSI"、"MACD"、"EMA_50"
    pub indicator: String,
    /// 指标参数，如 "value"、"histogram"、"signal"
    #[serde(default = "default_parameter")]
    pub parameter: String,
    pub operator: Operator,
    pub value: TargetValue,
    #[serde(default)]
    pub description: String,
}

fn default_parameter() -> String {
    "value".to_string()
}

/// 策略规则，风控字段都可选但不能全空（见validate）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyRule {
    pub name: String,
    pub timeframe: String,
    #[serde(default)]
    pub direction: Direction,
    pub entry_conditions: Vec<IndicatorCondition>,
    #[serde(default)]
    pub exit_conditions: Vec<IndicatorCondition>,
    #[serde(default)]
    pub stop_loss_pips: Option<f64>,
    #[serde(default)]
    pub take_profit_pips: Option<f64>,
    #[serde(default)]
    pub stop_loss_atr_multiplier: Option<f64>,
    #[serde(default)]
    pub take_profit_atr_multiplier: Option<f64>,
    #[serde(default)]
    pub min_bars_in_trade: Option<u32>,
    #[serde(default)]
    pub additional_timeframes: Option<Vec<String>>,
    #[serde(default = "default_risk_percent")]
    pub risk_percent: f64,
    #[serde(default)]
    pub description: String,
}

fn default_risk_percent() -> f64 {
    1.0
}

impl StrategyRule {
    /// 是否配置了任何一种止损（固定点数或ATR倍数）
    pub fn has_stop_loss(&self) -> bool {
        self.stop_loss_pips.map_or(false, |v| v > 0.0)
            || self.stop_loss_atr_multiplier.map_or(false, |v| v > 0.0)
    }
}

/// 完整策略：规则顺序即优先级，首个命中的规则胜出
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub symbol: String,
    pub rules: Vec<StrategyRule>,
    #[serde(default)]
    pub raw_description: String,
    #[serde(default)]
    pub ai_explanation: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Strategy {
    /// 启动前校验，不合法的策略既不能回测也不能上实盘
    pub fn validate(&self) -> Result<(), AppError> {
        if self.rules.is_empty() {
            return Err(AppError::InvalidStrategy(format!(
                "策略 {} 没有任何规则",
                self.name
            )));
        }
        for rule in &self.rules {
            if rule.risk_percent <= 0.0 {
                return Err(AppError::InvalidStrategy(format!(
                    "规则 {} 的risk_percent必须大于0",
                    rule.name
                )));
            }
            if rule.exit_conditions.is_empty() && !rule.has_stop_loss() {
                return Err(AppError::InvalidStrategy(format!(
                    "规则 {} 既无出场条件也无止损，风险无上限",
                    rule.name
                )));
            }
        }
        Ok(())
    }
}
