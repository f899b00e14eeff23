//! MT5终端桥接层
//!
//! 所有行情与下单都走同一个终端桥接会话。该会话不支持并发调用，
//! 并且可能在任意时刻掉线，因此本模块只定义客户端与抽象接口，
//! 串行化统一由 `trading::coordinator` 负责。

pub mod client;
pub mod model;

pub use client::Mt5Client;
pub use model::{AccountInfo, OrderResult, PositionInfo, Quote, SymbolInfo};

use async_trait::async_trait;
use thiserror::Error;

use crate::trading::strategy::Direction;
use crate::CandleItem;

/// MT5桥接错误
#[derive(Error, Debug)]
pub enum Mt5Error {
    /// 终端连接已断开（致命，持有方必须停止使用该会话）
    #[error("MT5终端连接已断开")]
    ConnectionLost,

    /// 桥接返回的业务错误
    #[error("MT5桥接错误 [{code}]: {msg}")]
    Api { code: i32, msg: String },

    /// 下单被终端拒绝
    #[error("订单被拒绝 [{retcode}]: {msg}")]
    OrderRejected { retcode: i32, msg: String },

    /// HTTP传输错误
    #[error("MT5桥接请求失败: {0}")]
    Http(String),

    /// 响应解析错误
    #[error("MT5响应解析失败: {0}")]
    Decode(String),
}

/// 行情与执行通道的统一接口
///
/// services层依赖该接口，`Mt5Client` 为生产实现，测试注入mock。
/// 所有方法都可能阻塞在终端IPC上，调用方必须经由资源协调器。
#[async_trait]
pub trait MarketExecutor: Send + Sync {
    /// 通道名称
    fn name(&self) -> &'static str;

    /// 当前买卖报价
    async fn quote(&self, symbol: &str) -> Result<Quote, Mt5Error>;

    /// 最近N根K线（按时间升序）
    async fn candles(
        &self,
        symbol: &str,
        timeframe: &str,
        count: usize,
    ) -> Result<Vec<CandleItem>, Mt5Error>;

    /// 品种合约信息（点值、最小跳动、手数限制）
    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, Mt5Error>;

    /// 账户信息（余额/净值）
    async fn account_info(&self) -> Result<AccountInfo, Mt5Error>;

    /// 市价下单，止损止盈为绝对价格
    async fn submit_order(
        &self,
        symbol: &str,
        direction: Direction,
        volume: f64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> Result<OrderResult, Mt5Error>;

    /// 按ticket平仓
    async fn close_position(&self, ticket: i64) -> Result<OrderResult, Mt5Error>;

    /// 当前全部持仓
    async fn open_positions(&self) -> Result<Vec<PositionInfo>, Mt5Error>;
}
