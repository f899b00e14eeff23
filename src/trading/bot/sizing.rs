//! 手数计算
//!
//! 按账户净值的风险比例反推手数：止损距离换算成单手亏损额，
//! 风险额除以它得到手数，向下取整到volume_step再夹进
//! [volume_min, volume_max]。

use tracing::warn;

use crate::trading::mt5::SymbolInfo;

/// 风险比例定手数，退化输入一律退回volume_min
pub fn lot_for_risk(
    equity: f64,
    risk_percent: f64,
    stop_distance_price: f64,
    info: &SymbolInfo,
) -> f64 {
    if equity <= 0.0
        || risk_percent <= 0.0
        || stop_distance_price <= 0.0
        || info.trade_tick_size <= 0.0
        || info.trade_tick_value <= 0.0
    {
        warn!(
            "手数计算输入退化 symbol={} equity={} stop_distance={}，退回最小手数",
            info.symbol, equity, stop_distance_price
        );
        return info.volume_min;
    }

    let risk_amount = equity * risk_percent / 100.0;
    let loss_per_lot = stop_distance_price / info.trade_tick_size * info.trade_tick_value;
    if loss_per_lot <= 0.0 {
        return info.volume_min;
    }

    let mut lots = risk_amount / loss_per_lot;
    if info.volume_step > 0.0 {
        lots = (lots / info.volume_step).floor() * info.volume_step;
    }
    lots.clamp(info.volume_min, info.volume_max)
}
