//! 自然语言 -> 策略翻译
//!
//! 翻译方是外部协作服务（OpenAI兼容的chat接口）。返回的策略
//! 先过validate再交出去，翻译出来的垃圾绝不会流到实盘。

use std::env;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::app_config::env::env_or_default;
use crate::error::AppError;
use crate::trading::strategy::Strategy;

const STRATEGY_PARSER_SYSTEM: &str = r#"You are a trading strategy parser. The user will describe a trading strategy in natural language. You must convert it to a structured JSON format.

Output ONLY valid JSON with this schema:
{
  "name": "strategy name",
  "symbol": "EURUSD",
  "rules": [
    {
      "name": "rule name",
      "timeframe": "1h",
      "direction": "buy",
      "entry_conditions": [
        {
          "indicator": "RSI",
          "parameter": "value",
          "operator": ">|<|crosses_above|crosses_below|==",
          "value": 30,
          "description": "RSI is above 30"
        }
      ],
      "exit_conditions": [],
      "stop_loss_pips": 50,
      "take_profit_pips": 100,
      "risk_percent": 1.0,
      "description": "human readable rule description"
    }
  ],
  "ai_explanation": "A clear explanation of what this strategy does and when it triggers"
}

Available indicators: RSI, MACD (parameters: line, signal, histogram), EMA_{period}, SMA_{period}, Bollinger (parameters: upper, middle, lower, width), ATR, Stochastic (parameters: K, D), Volume (parameters: OBV, ratio).

If the user mentions a timeframe, use it. Default to 1h if not specified.
If the user doesn't mention stop loss / take profit, leave them as null.
Be precise with operator selection: "crosses above" is different from "is above"."#;

/// 翻译接口，测试注入假实现
#[async_trait]
pub trait StrategyTranslator: Send + Sync {
    async fn translate(&self, description: &str, symbol: &str) -> Result<Strategy, AppError>;
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

/// OpenAI兼容接口的翻译客户端
pub struct LlmTranslator {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl LlmTranslator {
    pub fn from_env() -> Result<Self, AppError> {
        let api_key = env::var("LLM_API_KEY")
            .map_err(|_| AppError::Config("缺少LLM_API_KEY".to_string()))?;
        Ok(LlmTranslator {
            client: Client::new(),
            api_url: env_or_default(
                "LLM_API_URL",
                "https://api.groq.com/openai/v1/chat/completions",
            ),
            api_key,
            model: env_or_default("LLM_MODEL", "llama-3.3-70b-versatile"),
        })
    }
}

#[async_trait]
impl StrategyTranslator for LlmTranslator {
    async fn translate(&self, description: &str, symbol: &str) -> Result<Strategy, AppError> {
        let user_prompt = format!("Symbol: {}\n\nStrategy description: {}", symbol, description);
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": STRATEGY_PARSER_SYSTEM},
                {"role": "user", "content": user_prompt},
            ],
            "max_tokens": 4096,
            "response_format": {"type": "json_object"},
        });

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Translator(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AppError::Translator(e.to_string()))?;
        if !status.is_success() {
            warn!("翻译服务返回 {}: {}", status, text);
            return Err(AppError::Translator(format!("HTTP {}", status)));
        }

        let chat: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| AppError::Translator(format!("响应解析失败: {}", e)))?;
        let content = chat
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| AppError::Translator("响应无choices".to_string()))?;
        debug!("translator_response: {}", content);

        let mut strategy = parse_strategy_json(content, symbol)?;
        strategy.raw_description = description.to_string();
        strategy.validate()?;
        Ok(strategy)
    }
}

/// 容忍模型在JSON前后夹带说明文字，截取首尾花括号之间再解析
fn parse_strategy_json(content: &str, symbol: &str) -> Result<Strategy, AppError> {
    let parsed: Result<Strategy, _> = serde_json::from_str(content);
    let mut strategy = match parsed {
        Ok(s) => s,
        Err(_) => {
            let start = content.find('{');
            let end = content.rfind('}');
            match (start, end) {
                (Some(s), Some(e)) if e > s => serde_json::from_str(&content[s..=e])
                    .map_err(|err| {
                        AppError::Translator(format!("翻译结果不是合法策略JSON: {}", err))
                    })?,
                _ => {
                    return Err(AppError::Translator(
                        "翻译结果中找不到JSON".to_string(),
                    ))
                }
            }
        }
    };
    if strategy.symbol.is_empty() {
        strategy.symbol = symbol.to_string();
    }
    Ok(strategy)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "name": "rsi rebound",
        "symbol": "",
        "rules": [{
            "name": "r1",
            "timeframe": "1h",
            "direction": "buy",
            "entry_conditions": [
                {"indicator": "RSI", "parameter": "value", "operator": "<", "value": 30, "description": ""}
            ],
            "exit_conditions": [],
            "stop_loss_pips": 20,
            "take_profit_pips": 40,
            "risk_percent": 1.0
        }],
        "ai_explanation": "buys oversold dips"
    }"#;

    #[test]
    fn test_parse_plain_json() {
        let s = parse_strategy_json(VALID, "EURUSD").unwrap();
        assert_eq!(s.symbol, "EURUSD");
        assert_eq!(s.rules.len(), 1);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_parse_json_wrapped_in_prose() {
        let wrapped = format!("Here is your strategy:\n{}\nHope this helps!", VALID);
        let s = parse_strategy_json(&wrapped, "EURUSD").unwrap();
        assert_eq!(s.rules.len(), 1);
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(parse_strategy_json("no json here", "EURUSD").is_err());
    }

    #[test]
    fn test_invalid_strategy_rejected_after_parse() {
        // 无止损也无出场条件的规则必须被validate拦下
        let bad = r#"{
            "name": "bad",
            "symbol": "EURUSD",
            "rules": [{
                "name": "r1",
                "timeframe": "1h",
                "entry_conditions": [
                    {"indicator": "RSI", "operator": "<", "value": 30}
                ]
            }]
        }"#;
        let s = parse_strategy_json(bad, "EURUSD").unwrap();
        assert!(s.validate().is_err());
    }
}
