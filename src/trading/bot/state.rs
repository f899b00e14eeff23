use std::fmt;

use serde::{Deserialize, Serialize};

use crate::time_util;
use crate::trading::strategy::Direction;

/// 循环状态机
///
/// Watching -> InPosition -> Watching 可往复；
/// 收到停止指令进入Stopping，平仓完成后Stopped，不可逆。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotState {
    Watching,
    InPosition,
    Stopping,
    Stopped,
}

impl fmt::Display for BotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BotState::Watching => "watching",
            BotState::InPosition => "in_position",
            BotState::Stopping => "stopping",
            BotState::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

/// 对外发布的状态快照，只读
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotStatus {
    pub symbol: String,
    pub strategy_name: String,
    pub state: BotState,
    pub ticket: Option<i64>,
    pub entry_price: Option<f64>,
    pub bars_held: usize,
    pub updated_at: String,
}

impl BotStatus {
    pub fn new(symbol: &str, strategy_name: &str) -> Self {
        BotStatus {
            symbol: symbol.to_string(),
            strategy_name: strategy_name.to_string(),
            state: BotState::Watching,
            ticket: None,
            entry_price: None,
            bars_held: 0,
            updated_at: time_util::now_iso(),
        }
    }
}

/// 循环内部跟踪的持仓
#[derive(Debug, Clone)]
pub struct OpenPosition {
    pub ticket: i64,
    pub direction: Direction,
    pub volume: f64,
    pub entry_price: f64,
    pub entry_time: String,
    pub sl_price: Option<f64>,
    pub tp_price: Option<f64>,
    pub atr_at_entry: Option<f64>,
    /// 只在K线时间戳翻动时递增
    pub bars_held: usize,
    /// 账本stub的id，接管的外部持仓没有
    pub record_id: Option<String>,
    pub last_candle_ts: i64,
    /// 开仓时命中的规则下标
    pub rule_index: usize,
}
