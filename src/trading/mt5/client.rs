use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::model::{
    retcode_message, AccountInfo, CandleData, OrderResult, PositionInfo, Quote, SymbolInfo,
    TRADE_RETCODE_DONE,
};
use super::{MarketExecutor, Mt5Error};
use crate::app_config::env::{env_or_default, env_parse_or};
use crate::trading::strategy::Direction;
use crate::CandleItem;

/// 桥接统一响应格式
#[derive(Deserialize)]
struct BridgeResponse<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
    error: Option<BridgeError>,
}

#[derive(Deserialize)]
struct BridgeError {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    msg: String,
}

/// MT5终端HTTP桥接客户端
///
/// 终端侧跑一个本地桥接进程，暴露REST接口转发到终端IPC。
/// 注意：终端本身不支持并发调用，本客户端不加锁，
/// 串行化由上层资源协调器保证。
pub struct Mt5Client {
    client: Client,
    base_url: String,
}

impl Mt5Client {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Mt5Client { client, base_url }
    }

    /// 从环境变量构造，默认指向本机桥接端口
    pub fn from_env() -> Self {
        let base_url = env_or_default("MT5_BRIDGE_URL", "http://127.0.0.1:5001");
        let timeout_secs: u64 = env_parse_or("MT5_HTTP_TIMEOUT_SECS", 15);
        Mt5Client::new(base_url, Duration::from_secs(timeout_secs))
    }

    async fn send_request<T: for<'a> Deserialize<'a>>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, Mt5Error> {
        let url = format!("{}{}", self.base_url, path);
        let mut request_builder = self.client.request(method, &url);
        if let Some(body) = body {
            request_builder = request_builder.json(&body);
        }

        let response = request_builder.send().await.map_err(|e| {
            // 连接级别失败视为终端掉线，不做透明重试
            if e.is_connect() || e.is_timeout() {
                Mt5Error::ConnectionLost
            } else {
                Mt5Error::Http(e.to_string())
            }
        })?;

        let status_code = response.status();
        let response_body = response
            .text()
            .await
            .map_err(|e| Mt5Error::Http(e.to_string()))?;
        debug!("path:{},mt5_response: {}", path, response_body);

        if status_code != StatusCode::OK {
            return Err(Mt5Error::Http(format!(
                "HTTP {}: {}",
                status_code, response_body
            )));
        }

        let envelope: BridgeResponse<T> = serde_json::from_str(&response_body)
            .map_err(|e| Mt5Error::Decode(e.to_string()))?;
        if !envelope.success {
            let err = envelope.error.unwrap_or(BridgeError {
                code: -1,
                msg: "未知错误".to_string(),
            });
            // 桥接层报告终端会话失效
            if err.code == -10004 || err.msg.contains("not connected") {
                return Err(Mt5Error::ConnectionLost);
            }
            return Err(Mt5Error::Api {
                code: err.code,
                msg: err.msg,
            });
        }
        envelope
            .data
            .ok_or_else(|| Mt5Error::Decode("响应缺少data字段".to_string()))
    }
}

#[async_trait]
impl MarketExecutor for Mt5Client {
    fn name(&self) -> &'static str {
        "mt5"
    }

    async fn quote(&self, symbol: &str) -> Result<Quote, Mt5Error> {
        self.send_request(Method::GET, &format!("/quote/{}", symbol), None)
            .await
    }

    async fn candles(
        &self,
        symbol: &str,
        timeframe: &str,
        count: usize,
    ) -> Result<Vec<CandleItem>, Mt5Error> {
        let data: Vec<CandleData> = self
            .send_request(
                Method::GET,
                &format!("/candles/{}?timeframe={}&count={}", symbol, timeframe, count),
                None,
            )
            .await?;
        Ok(data.iter().map(CandleData::to_candle_item).collect())
    }

    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, Mt5Error> {
        self.send_request(Method::GET, &format!("/symbol_info/{}", symbol), None)
            .await
    }

    async fn account_info(&self) -> Result<AccountInfo, Mt5Error> {
        self.send_request(Method::GET, "/account", None).await
    }

    async fn submit_order(
        &self,
        symbol: &str,
        direction: Direction,
        volume: f64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> Result<OrderResult, Mt5Error> {
        let body = json!({
            "symbol": symbol,
            "type": direction.as_str(),
            "volume": volume,
            "sl": stop_loss,
            "tp": take_profit,
        });
        let mut result: OrderResult = self
            .send_request(Method::POST, "/order", Some(body))
            .await?;
        result.message = retcode_message(result.retcode);
        if result.retcode != TRADE_RETCODE_DONE {
            warn!(
                "下单被拒绝 symbol={} retcode={} msg={}",
                symbol, result.retcode, result.message
            );
            return Err(Mt5Error::OrderRejected {
                retcode: result.retcode,
                msg: result.message,
            });
        }
        Ok(result)
    }

    async fn close_position(&self, ticket: i64) -> Result<OrderResult, Mt5Error> {
        let body = json!({ "ticket": ticket });
        let mut result: OrderResult = self
            .send_request(Method::POST, "/close", Some(body))
            .await?;
        result.message = retcode_message(result.retcode);
        if result.retcode != TRADE_RETCODE_DONE {
            return Err(Mt5Error::OrderRejected {
                retcode: result.retcode,
                msg: result.message,
            });
        }
        Ok(result)
    }

    async fn open_positions(&self) -> Result<Vec<PositionInfo>, Mt5Error> {
        self.send_request(Method::GET, "/positions", None).await
    }
}
