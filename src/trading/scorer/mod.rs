//! 进场质量评估与方向预测（可选协作方）
//!
//! 这些都是顾问角色：模型不在位时一律放行/中立，
//! 绝不因为评估器缺席而阻塞交易主流程。

use anyhow::Result;
use async_trait::async_trait;

use crate::trading::indicator::SnapshotRow;
use crate::trading::strategy::Direction;

/// 没有模型时的默认门槛，与进场评分比较
pub const DEFAULT_SCORE_THRESHOLD: f64 = 0.55;

/// 方向预测结果
#[derive(Debug, Clone)]
pub struct DirectionForecast {
    /// None表示不给出方向
    pub direction: Option<Direction>,
    /// 0.0~1.0
    pub confidence: f64,
}

impl DirectionForecast {
    pub fn neutral() -> Self {
        DirectionForecast {
            direction: None,
            confidence: 0.5,
        }
    }
}

/// 进场质量评分器，返回0.0~1.0
#[async_trait]
pub trait EntryScorer: Send + Sync {
    async fn score_entry(
        &self,
        symbol: &str,
        direction: Direction,
        snapshot: &SnapshotRow,
    ) -> Result<f64>;
}

/// 方向预测器
#[async_trait]
pub trait DirectionPredictor: Send + Sync {
    async fn predict_direction(
        &self,
        symbol: &str,
        snapshot: &SnapshotRow,
    ) -> Result<DirectionForecast>;
}

/// 无模型时的评分器：全部放行
pub struct AlwaysPass;

#[async_trait]
impl EntryScorer for AlwaysPass {
    async fn score_entry(&self, _: &str, _: Direction, _: &SnapshotRow) -> Result<f64> {
        Ok(1.0)
    }
}

/// 无模型时的预测器：中立
pub struct Neutral;

#[async_trait]
impl DirectionPredictor for Neutral {
    async fn predict_direction(&self, _: &str, _: &SnapshotRow) -> Result<DirectionForecast> {
        Ok(DirectionForecast::neutral())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_always_pass_clears_threshold() {
        let scorer = AlwaysPass;
        let score = scorer
            .score_entry("EURUSD", Direction::Buy, &SnapshotRow::new())
            .await
            .unwrap();
        assert!(score >= DEFAULT_SCORE_THRESHOLD);
    }

    #[tokio::test]
    async fn test_neutral_gives_no_direction() {
        let predictor = Neutral;
        let forecast = predictor
            .predict_direction("EURUSD", &SnapshotRow::new())
            .await
            .unwrap();
        assert!(forecast.direction.is_none());
        assert_eq!(forecast.confidence, 0.5);
    }
}
