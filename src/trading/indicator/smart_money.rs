//! 聪明钱指标族：流动性扫荡、锚定VWAP、成交量差额、成交量分布
//!
//! 这些列都从OHLCV近似订单流，列名同样是对外契约：
//! `Swing_high/Swing_low` `Liq_sweep_bull/bear` `AVWAP_high/low`
//! `Volume_delta` `Cumulative_delta` `Delta_SMA_14`
//! `VP_POC` `VP_VAH` `VP_VAL` `VP_position`

use crate::CandleItem;

/// 流动性扫荡输出，摆动位与扫荡标记(0/1)各一列
pub(crate) struct SweepColumns {
    pub swing_high: Vec<f64>,
    pub swing_low: Vec<f64>,
    pub bull: Vec<f64>,
    pub bear: Vec<f64>,
}

/// 摆动高低点处的流动性扫荡
///
/// 多头扫荡 = 下影刺破摆动低点又收回其上，空头对称。
/// 影线至少要刺破 `wick_threshold * ATR` 才算数。
pub(crate) fn liquidity_sweep(
    candles: &[CandleItem],
    atr: &[f64],
    lookback: usize,
    wick_threshold: f64,
) -> SweepColumns {
    let n = candles.len();
    let mut out = SweepColumns {
        swing_high: vec![f64::NAN; n],
        swing_low: vec![f64::NAN; n],
        bull: vec![0.0; n],
        bear: vec![0.0; n],
    };
    if n <= lookback || lookback == 0 {
        return out;
    }

    let half = lookback / 2;
    let center_lo = half / 2;
    let center_hi = lookback - half / 2 - 1;
    let mut current_high = f64::NAN;
    let mut current_low = f64::NAN;

    for i in lookback..n {
        let window = &candles[i - lookback..i];

        // 摆动位必须落在窗口中段，贴边的极值不算
        let (max_idx, max_val) = window
            .iter()
            .enumerate()
            .fold((0, f64::MIN), |acc, (j, c)| {
                if c.h > acc.1 {
                    (j, c.h)
                } else {
                    acc
                }
            });
        if (center_lo..=center_hi).contains(&max_idx) {
            current_high = max_val;
        }
        let (min_idx, min_val) = window
            .iter()
            .enumerate()
            .fold((0, f64::MAX), |acc, (j, c)| {
                if c.l < acc.1 {
                    (j, c.l)
                } else {
                    acc
                }
            });
        if (center_lo..=center_hi).contains(&min_idx) {
            current_low = min_val;
        }

        out.swing_high[i] = current_high;
        out.swing_low[i] = current_low;

        let atr_i = atr.get(i).copied().unwrap_or(f64::NAN);
        let min_wick = wick_threshold * if atr_i.is_finite() { atr_i } else { 0.001 };

        if current_low.is_finite()
            && candles[i].l < current_low - min_wick
            && candles[i].c > current_low
        {
            out.bull[i] = 1.0;
        }
        if current_high.is_finite()
            && candles[i].h > current_high + min_wick
            && candles[i].c < current_high
        {
            out.bear[i] = 1.0;
        }
    }
    out
}

/// 锚定VWAP：摆动位每刷新一次，累计量价就从头来
pub(crate) fn anchored_vwap(
    candles: &[CandleItem],
    swing_high: &[f64],
    swing_low: &[f64],
) -> (Vec<f64>, Vec<f64>) {
    let n = candles.len();
    let mut avwap_high = vec![f64::NAN; n];
    let mut avwap_low = vec![f64::NAN; n];

    let mut prev_high = f64::NAN;
    let mut prev_low = f64::NAN;
    let mut sum_tpv_h = 0.0;
    let mut sum_vol_h = 0.0;
    let mut sum_tpv_l = 0.0;
    let mut sum_vol_l = 0.0;

    for i in 0..n {
        let c = &candles[i];
        let tp = (c.h + c.l + c.c) / 3.0;
        let vol = c.v.max(1.0);

        if swing_high[i].is_finite() && swing_high[i] != prev_high {
            prev_high = swing_high[i];
            sum_tpv_h = 0.0;
            sum_vol_h = 0.0;
        }
        if swing_low[i].is_finite() && swing_low[i] != prev_low {
            prev_low = swing_low[i];
            sum_tpv_l = 0.0;
            sum_vol_l = 0.0;
        }

        if prev_high.is_finite() {
            sum_tpv_h += tp * vol;
            sum_vol_h += vol;
            avwap_high[i] = sum_tpv_h / sum_vol_h;
        }
        if prev_low.is_finite() {
            sum_tpv_l += tp * vol;
            sum_vol_l += vol;
            avwap_low[i] = sum_tpv_l / sum_vol_l;
        }
    }
    (avwap_high, avwap_low)
}

/// 从K线形态近似买卖量拆分
///
/// 阳线按收盘在区间内的位置分买量，阴线对称，十字星对半。
/// delta = 买量 - 卖量，另给累计值和SMA平滑。
pub(crate) fn volume_delta(
    candles: &[CandleItem],
    sma_period: usize,
) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let n = candles.len();
    let mut delta = vec![0.0; n];
    let mut cumulative = vec![0.0; n];
    let mut running = 0.0;

    for (i, c) in candles.iter().enumerate() {
        let range = c.h - c.l;
        let buy_vol = if range > f64::EPSILON {
            if c.c >= c.o {
                c.v * (c.c - c.l) / range
            } else {
                c.v - c.v * (c.h - c.c) / range
            }
        } else {
            c.v * 0.5
        };
        delta[i] = buy_vol - (c.v - buy_vol);
        running += delta[i];
        cumulative[i] = running;
    }

    let mut delta_sma = vec![f64::NAN; n];
    for i in 0..n {
        if i + 1 >= sma_period {
            let window = &delta[i + 1 - sma_period..=i];
            delta_sma[i] = window.iter().sum::<f64>() / sma_period as f64;
        }
    }
    (delta, cumulative, delta_sma)
}

/// 滚动成交量分布：POC与价值区上下沿
///
/// 每根K线的量按价格桶重叠比例摊开，POC取量最大的桶，
/// 价值区从POC向两侧扩张到覆盖 `value_area_pct` 的总量。
/// position = (close - POC) / ATR，给条件一个归一化的口径。
pub(crate) fn volume_profile(
    candles: &[CandleItem],
    atr: &[f64],
    lookback: usize,
    num_levels: usize,
    value_area_pct: f64,
) -> (Vec<f64>, Vec<f64>, Vec<f64>, Vec<f64>) {
    let n = candles.len();
    let mut poc = vec![f64::NAN; n];
    let mut vah = vec![f64::NAN; n];
    let mut val = vec![f64::NAN; n];
    let mut position = vec![f64::NAN; n];
    if n <= lookback || num_levels == 0 {
        return (poc, vah, val, position);
    }

    for i in lookback..n {
        let window = &candles[i - lookback..=i];
        let price_min = window.iter().map(|c| c.l).fold(f64::MAX, f64::min);
        let price_max = window.iter().map(|c| c.h).fold(f64::MIN, f64::max);
        let atr_i = atr.get(i).copied().unwrap_or(f64::NAN);
        let atr_safe = if atr_i.is_finite() && atr_i > 0.0 {
            atr_i
        } else {
            0.001
        };

        if price_max - price_min < 1e-10 {
            poc[i] = price_min;
            vah[i] = price_max;
            val[i] = price_min;
            position[i] = (candles[i].c - price_min) / atr_safe;
            continue;
        }

        let bucket = (price_max - price_min) / num_levels as f64;
        let mut vol_at_level = vec![0.0; num_levels];
        for c in window {
            if c.v <= 0.0 {
                continue;
            }
            let bar_range = c.h - c.l;
            for k in 0..num_levels {
                let edge_lo = price_min + bucket * k as f64;
                let edge_hi = edge_lo + bucket;
                let overlap_lo = c.l.max(edge_lo);
                let overlap_hi = c.h.min(edge_hi);
                if overlap_hi > overlap_lo {
                    let frac = if bar_range > 0.0 {
                        (overlap_hi - overlap_lo) / bar_range
                    } else {
                        1.0 / num_levels as f64
                    };
                    vol_at_level[k] += c.v * frac;
                }
            }
        }

        let poc_idx = vol_at_level
            .iter()
            .enumerate()
            .fold((0, f64::MIN), |acc, (k, &v)| if v > acc.1 { (k, v) } else { acc })
            .0;
        let mid = |k: usize| price_min + bucket * (k as f64 + 0.5);
        poc[i] = mid(poc_idx);

        let total_vol: f64 = vol_at_level.iter().sum();
        if total_vol <= 0.0 {
            vah[i] = price_max;
            val[i] = price_min;
        } else {
            let target = total_vol * value_area_pct;
            let mut accumulated = vol_at_level[poc_idx];
            let mut lo = poc_idx;
            let mut hi = poc_idx;
            while accumulated < target && (lo > 0 || hi < num_levels - 1) {
                let up = if hi < num_levels - 1 {
                    vol_at_level[hi + 1]
                } else {
                    f64::MIN
                };
                let down = if lo > 0 { vol_at_level[lo - 1] } else { f64::MIN };
                if up >= down {
                    hi += 1;
                    accumulated += vol_at_level[hi];
                } else {
                    lo -= 1;
                    accumulated += vol_at_level[lo];
                }
            }
            vah[i] = mid(hi);
            val[i] = mid(lo);
        }
        position[i] = (candles[i].c - poc[i]) / atr_safe;
    }
    (poc, vah, val, position)
}
