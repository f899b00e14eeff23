use serde::{Deserialize, Serialize};

use crate::CandleItem;

/// 买卖报价
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    /// 报价时间戳（毫秒）
    pub time: i64,
}

impl Quote {
    /// 中间价
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }
}

/// 品种合约信息，手数计算与点值换算都依赖这里
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    /// 最小报价单位（如EURUSD为0.00001）
    pub point: f64,
    pub digits: i32,
    pub volume_min: f64,
    pub volume_max: f64,
    pub volume_step: f64,
    /// 价格每跳动一个tick、一标准手的盈亏
    pub trade_tick_value: f64,
    /// 一个tick对应的价格变化
    pub trade_tick_size: f64,
    #[serde(default)]
    pub spread: i64,
}

/// 账户信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    pub balance: f64,
    pub equity: f64,
    #[serde(default)]
    pub margin_free: f64,
    #[serde(default)]
    pub currency: String,
}

/// 终端持仓
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionInfo {
    pub ticket: i64,
    pub symbol: String,
    /// "buy" 或 "sell"
    #[serde(rename = "type")]
    pub position_type: String,
    pub volume: f64,
    pub price_open: f64,
    #[serde(default)]
    pub price_current: f64,
    #[serde(default)]
    pub sl: f64,
    #[serde(default)]
    pub tp: f64,
    #[serde(default)]
    pub profit: f64,
    #[serde(default)]
    pub time: i64,
}

/// 下单/平仓回执
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub retcode: i32,
    #[serde(default)]
    pub order_id: i64,
    #[serde(default)]
    pub deal: i64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub comment: String,
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

/// 桥接返回的K线
#[derive(Debug, Clone, Deserialize)]
pub struct CandleData {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub tick_volume: f64,
}

impl CandleData {
    pub fn to_candle_item(&self) -> CandleItem {
        CandleItem {
            o: self.open,
            h: self.high,
            l: self.low,
            c: self.close,
            v: self.tick_volume,
            ts: self.time * 1000,
        }
    }
}

/// 终端返回码转中文可读信息
pub fn retcode_message(retcode: i32) -> String {
    match retcode {
        10009 => "订单执行成功".to_string(),
        10013 => "无效请求".to_string(),
        10014 => "无效手数".to_string(),
        10015 => "无效价格".to_string(),
        10016 => "无效止损止盈".to_string(),
        10017 => "交易被禁用".to_string(),
        10018 => "市场已关闭".to_string(),
        10019 => "资金不足".to_string(),
        10020 => "价格已变动".to_string(),
        10021 => "无报价".to_string(),
        10026 => "自动交易被禁用".to_string(),
        10027 => "终端拒绝修改".to_string(),
        10030 => "无效成交类型".to_string(),
        other => format!("未知返回码: {}", other),
    }
}

/// 下单成功的返回码
pub const TRADE_RETCODE_DONE: i32 = 10009;
