//! 条件求值器
//!
//! 求值是保守的：未知列、NaN、缺前一根，任何一处拿不到数
//! 都判false，绝不让一个坏条件放行一笔交易。

use crate::trading::indicator::SnapshotRow;

use super::{IndicatorCondition, Operator, TargetValue};

const EQ_EPSILON: f64 = 1e-8;

/// (indicator, parameter) -> 规范列名
///
/// 带下划线的指标名视为直接列引用（如 "EMA_50"），
/// 都不匹配时回退为 `{indicator}_{parameter}` 拼接。
pub fn resolve_column(indicator: &str, parameter: &str) -> String {
    match (indicator, parameter) {
        ("RSI", "value") => "RSI_14".to_string(),
        ("MACD", "line") => "MACD_line".to_string(),
        ("MACD", "signal") => "MACD_signal".to_string(),
        ("MACD", "histogram") => "MACD_histogram".to_string(),
        ("EMA", "value") => "EMA_50".to_string(),
        ("SMA", "value") => "SMA_20".to_string(),
        ("Bollinger", "upper") => "BB_upper".to_string(),
        ("Bollinger", "middle") => "BB_middle".to_string(),
        ("Bollinger", "lower") => "BB_lower".to_string(),
        ("Bollinger", "width") => "BB_width".to_string(),
        ("ATR", "value") => "ATR_14".to_string(),
        ("Stochastic", "K") => "Stoch_K".to_string(),
        ("Stochastic", "D") => "Stoch_D".to_string(),
        ("ADX", "value") => "ADX_14".to_string(),
        ("ADX", "DI_plus") => "DI_plus".to_string(),
        ("ADX", "DI_minus") => "DI_minus".to_string(),
        ("Volume", "OBV") => "OBV".to_string(),
        ("Volume", "ratio") => "Volume_ratio".to_string(),
        // 聪明钱族
        ("LiqSweep", "bull") => "Liq_sweep_bull".to_string(),
        ("LiqSweep", "bear") => "Liq_sweep_bear".to_string(),
        ("LiqSweep", "swing_high") => "Swing_high".to_string(),
        ("LiqSweep", "swing_low") => "Swing_low".to_string(),
        ("AVWAP", "high") => "AVWAP_high".to_string(),
        ("AVWAP", "low") => "AVWAP_low".to_string(),
        ("VolumeDelta", "delta") => "Volume_delta".to_string(),
        ("VolumeDelta", "cumulative") => "Cumulative_delta".to_string(),
        ("VolumeDelta", "sma") => "Delta_SMA_14".to_string(),
        ("VolumeDelta", "value") => "Volume_delta".to_string(),
        ("VolumeProfile", "poc") => "VP_POC".to_string(),
        ("VolumeProfile", "vah") => "VP_VAH".to_string(),
        ("VolumeProfile", "val") => "VP_VAL".to_string(),
        ("VolumeProfile", "position") => "VP_position".to_string(),
        ("VolumeProfile", "value") => "VP_POC".to_string(),
        _ => {
            if matches!(indicator, "open" | "high" | "low" | "close" | "volume") {
                return indicator.to_string();
            }
            if indicator.contains('_') {
                return indicator.to_string();
            }
            format!("{}_{}", indicator, parameter)
        }
    }
}

/// 解析条件右值：先查列，查不到再按数字字面量解析
fn resolve_target(row: &SnapshotRow, value: &TargetValue) -> Option<f64> {
    match value {
        TargetValue::Number(n) => Some(*n),
        TargetValue::Signal(s) => {
            let target_col = resolve_column(s, "value");
            if let Some(v) = row.get(&target_col) {
                Some(*v)
            } else {
                s.parse::<f64>().ok()
            }
        }
    }
}

/// 取前一根上的右值，信号引用缺列时回退到当前目标值
fn resolve_prev_target(
    prev_row: &SnapshotRow,
    value: &TargetValue,
    current_target: f64,
) -> f64 {
    match value {
        TargetValue::Number(_) => current_target,
        TargetValue::Signal(s) => {
            let target_col = resolve_column(s, "value");
            prev_row.get(&target_col).copied().unwrap_or(current_target)
        }
    }
}

/// 对一根K线求值单个条件
pub fn evaluate_condition(
    row: &SnapshotRow,
    prev_row: Option<&SnapshotRow>,
    cond: &IndicatorCondition,
) -> bool {
    let col = resolve_column(&cond.indicator, &cond.parameter);
    let current_val = match row.get(&col) {
        Some(v) if v.is_finite() => *v,
        _ => return false,
    };

    let target_num = match resolve_target(row, &cond.value) {
        Some(v) if v.is_finite() => v,
        _ => return false,
    };

    match cond.operator {
        Operator::Gt => current_val > target_num,
        Operator::Lt => current_val < target_num,
        Operator::Eq => (current_val - target_num).abs() < EQ_EPSILON,
        Operator::CrossesAbove => {
            let prev_row = match prev_row {
                Some(p) => p,
                None => return false,
            };
            let prev_val = match prev_row.get(&col) {
                Some(v) if v.is_finite() => *v,
                _ => return false,
            };
            let prev_target = resolve_prev_target(prev_row, &cond.value, target_num);
            prev_val <= prev_target && current_val > target_num
        }
        Operator::CrossesBelow => {
            let prev_row = match prev_row {
                Some(p) => p,
                None => return false,
            };
            let prev_val = match prev_row.get(&col) {
                Some(v) if v.is_finite() => *v,
                _ => return false,
            };
            let prev_target = resolve_prev_target(prev_row, &cond.value, target_num);
            prev_val >= prev_target && current_val < target_num
        }
    }
}

/// 条件组整体求值：全真才真，空条件组为假（由调用方决定语义的除外）
pub fn all_conditions_met(
    row: &SnapshotRow,
    prev_row: Option<&SnapshotRow>,
    conditions: &[IndicatorCondition],
) -> bool {
    !conditions.is_empty()
        && conditions
            .iter()
            .all(|c| evaluate_condition(row, prev_row, c))
}
