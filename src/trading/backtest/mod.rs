//! 回测引擎
//!
//! 对增强后的K线序列做一次前向扫描。规则列表顺序即优先级，
//! 空仓时逐条检查进场条件，首个全部命中的规则开仓；持仓期间
//! 止损止盈每根都查（资金保护不受min_bars限制），策略出场
//! 条件要等满min_bars_in_trade才生效。

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AppError;
use crate::time_util;
use crate::trading::indicator::{IndicatorSeries, SnapshotRow};
use crate::trading::strategy::{all_conditions_met, Direction, Strategy, StrategyRule};

/// 点值换算：形式化为万分之一价（FX口径），实盘路径用品种point
const PIP_SCALE: f64 = 10_000.0;

/// 平仓原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    StrategyExit,
    /// 持仓被外部人工/终端侧关闭
    External,
    /// 停止指令触发的强制平仓
    ForcedStop,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::StrategyExit => "strategy_exit",
            ExitReason::External => "external",
            ExitReason::ForcedStop => "forced_stop",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 一笔已平仓交易
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_time: String,
    pub exit_time: String,
    pub direction: Direction,
    pub pnl_pips: f64,
    pub profit: f64,
    pub exit_reason: ExitReason,
    pub rule_index: usize,
    pub indicators_at_entry: SnapshotRow,
    pub indicators_at_exit: SnapshotRow,
    pub bars_held: usize,
}

/// 汇总统计，全部由成交推导，绝不手工填写
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestStats {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    /// 百分比
    pub win_rate: f64,
    pub total_profit: f64,
    pub profit_factor: f64,
    /// 百分比
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub best_trade: f64,
    pub worst_trade: f64,
    pub final_balance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub trades: Vec<TradeRecord>,
    pub equity_curve: Vec<f64>,
    pub stats: BacktestStats,
}

// 进场时固化下来的规则参数
struct ActivePosition<'a> {
    rule: &'a StrategyRule,
    rule_index: usize,
    entry_price: f64,
    entry_index: usize,
    direction: Direction,
    effective_sl_pips: Option<f64>,
    effective_tp_pips: Option<f64>,
}

/// 对单个策略跑一次回测
///
/// 扫描从 `max(warmup, 1)` 开始。序列走完仍未平仓的头寸
/// 不强制结算，只有已平仓交易进入账本。
pub fn run_backtest(
    series: &IndicatorSeries,
    strategy: &Strategy,
    initial_balance: f64,
) -> Result<BacktestResult, AppError> {
    strategy.validate()?;

    let mut balance = initial_balance;
    let mut equity_curve = vec![balance];
    let mut trades: Vec<TradeRecord> = Vec::new();
    let mut position: Option<ActivePosition> = None;

    let start = series.warmup().max(1);
    for i in start..series.len() {
        let row = series.snapshot(i);
        let prev_row = series.snapshot(i - 1);

        match position.take() {
            None => {
                // 首个命中的规则胜出
                for (idx, rule) in strategy.rules.iter().enumerate() {
                    if !all_conditions_met(&row, Some(&prev_row), &rule.entry_conditions) {
                        continue;
                    }
                    let entry_price = match row.get("close") {
                        Some(p) => *p,
                        None => break,
                    };
                    let atr_val = row.get("ATR_14").copied().unwrap_or(0.0);
                    let effective_sl_pips = match rule.stop_loss_atr_multiplier {
                        Some(mult) if mult > 0.0 && atr_val > 0.0 => {
                            Some(atr_val * mult * PIP_SCALE)
                        }
                        _ => rule.stop_loss_pips,
                    };
                    let effective_tp_pips = match rule.take_profit_atr_multiplier {
                        Some(mult) if mult > 0.0 && atr_val > 0.0 => {
                            Some(atr_val * mult * PIP_SCALE)
                        }
                        _ => rule.take_profit_pips,
                    };
                    debug!(
                        "开仓 rule={} direction={} price={} sl_pips={:?} tp_pips={:?}",
                        rule.name, rule.direction, entry_price, effective_sl_pips, effective_tp_pips
                    );
                    position = Some(ActivePosition {
                        rule,
                        rule_index: idx,
                        entry_price,
                        entry_index: i,
                        direction: rule.direction,
                        effective_sl_pips,
                        effective_tp_pips,
                    });
                    break;
                }
            }
            Some(active) => {
                let current_price = match row.get("close") {
                    Some(p) => *p,
                    None => {
                        position = Some(active);
                        equity_curve.push(balance);
                        continue;
                    }
                };
                let pnl_pips = match active.direction {
                    Direction::Buy => (current_price - active.entry_price) * PIP_SCALE,
                    Direction::Sell => (active.entry_price - current_price) * PIP_SCALE,
                };

                let mut exit_reason: Option<ExitReason> = None;

                // 止损止盈每根都查，不受min_bars限制；止盈后查并覆盖
                if let Some(sl) = active.effective_sl_pips {
                    if sl > 0.0 && pnl_pips <= -sl {
                        exit_reason = Some(ExitReason::StopLoss);
                    }
                }
                if let Some(tp) = active.effective_tp_pips {
                    if tp > 0.0 && pnl_pips >= tp {
                        exit_reason = Some(ExitReason::TakeProfit);
                    }
                }

                let bars_held = i - active.entry_index;
                let min_bars = active.rule.min_bars_in_trade.unwrap_or(0) as usize;
                if exit_reason.is_none()
                    && bars_held >= min_bars
                    && all_conditions_met(&row, Some(&prev_row), &active.rule.exit_conditions)
                {
                    exit_reason = Some(ExitReason::StrategyExit);
                }

                match exit_reason {
                    Some(reason) => {
                        let risk_amount = balance * (active.rule.risk_percent / 100.0);
                        let profit = match active.effective_sl_pips {
                            Some(sl) if sl > 0.0 => risk_amount * (pnl_pips / sl),
                            _ => risk_amount * (pnl_pips / 100.0),
                        };
                        balance += profit;
                        trades.push(TradeRecord {
                            entry_price: active.entry_price,
                            exit_price: current_price,
                            entry_time: bar_time(series, active.entry_index),
                            exit_time: bar_time(series, i),
                            direction: active.direction,
                            pnl_pips: round2(pnl_pips),
                            profit: round2(profit),
                            exit_reason: reason,
                            rule_index: active.rule_index,
                            indicators_at_entry: series.snapshot(active.entry_index),
                            indicators_at_exit: row.clone(),
                            bars_held,
                        });
                    }
                    None => position = Some(active),
                }
            }
        }

        equity_curve.push(balance);
    }

    let stats = calculate_stats(&trades, initial_balance, balance, &equity_curve);
    Ok(BacktestResult {
        trades,
        equity_curve,
        stats,
    })
}

fn bar_time(series: &IndicatorSeries, i: usize) -> String {
    series
        .candle(i)
        .and_then(|c| time_util::mill_time_to_datetime(c.ts).ok())
        .unwrap_or_default()
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

pub fn calculate_stats(
    trades: &[TradeRecord],
    initial_balance: f64,
    final_balance: f64,
    equity_curve: &[f64],
) -> BacktestStats {
    if trades.is_empty() {
        return BacktestStats {
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            win_rate: 0.0,
            total_profit: 0.0,
            profit_factor: 0.0,
            max_drawdown: 0.0,
            sharpe_ratio: 0.0,
            avg_win: 0.0,
            avg_loss: 0.0,
            best_trade: 0.0,
            worst_trade: 0.0,
            final_balance: initial_balance,
        };
    }

    let profits: Vec<f64> = trades.iter().map(|t| t.profit).collect();
    let wins: Vec<f64> = profits.iter().copied().filter(|p| *p > 0.0).collect();
    let losses: Vec<f64> = profits.iter().copied().filter(|p| *p <= 0.0).collect();

    let gross_profit: f64 = wins.iter().sum();
    // 没有亏损时用极小分母兜底，避免无穷大
    let gross_loss = if losses.is_empty() {
        0.0001
    } else {
        losses.iter().sum::<f64>().abs()
    };

    let mut peak = initial_balance;
    let mut max_dd: f64 = 0.0;
    for &eq in equity_curve {
        if eq > peak {
            peak = eq;
        }
        let dd = (peak - eq) / peak * 100.0;
        if dd > max_dd {
            max_dd = dd;
        }
    }

    let sharpe = if equity_curve.len() > 1 {
        let returns: Vec<f64> = equity_curve
            .windows(2)
            .map(|w| (w[1] - w[0]) / w[0])
            .collect();
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
        let std = var.sqrt();
        if std > 0.0 {
            mean / std * 252f64.sqrt()
        } else {
            0.0
        }
    } else {
        0.0
    };

    BacktestStats {
        total_trades: trades.len(),
        winning_trades: wins.len(),
        losing_trades: losses.len(),
        win_rate: round1(wins.len() as f64 / trades.len() as f64 * 100.0),
        total_profit: round2(final_balance - initial_balance),
        profit_factor: round2(gross_profit / gross_loss),
        max_drawdown: round2(max_dd),
        sharpe_ratio: round2(sharpe),
        avg_win: if wins.is_empty() {
            0.0
        } else {
            round2(gross_profit / wins.len() as f64)
        },
        avg_loss: if losses.is_empty() {
            0.0
        } else {
            round2(losses.iter().sum::<f64>() / losses.len() as f64)
        },
        best_trade: round2(profits.iter().cloned().fold(f64::MIN, f64::max)),
        worst_trade: round2(profits.iter().cloned().fold(f64::MAX, f64::min)),
        final_balance: round2(final_balance),
    }
}
