use anyhow::{anyhow, Result};
use ta::indicators::{
    AverageTrueRange, BollingerBands, ExponentialMovingAverage,
    MovingAverageConvergenceDivergence, OnBalanceVolume, RelativeStrengthIndex,
    SimpleMovingAverage,
};
use ta::{DataItem, Next};

use super::series::IndicatorSeries;
use super::smart_money;
use crate::CandleItem;

const EMA_PERIODS: [usize; 7] = [8, 9, 14, 21, 34, 50, 100];
const RSI_PERIOD: usize = 14;
const ATR_PERIOD: usize = 14;
const ADX_PERIOD: usize = 14;
const SMA_PERIOD: usize = 20;
const BB_PERIOD: usize = 20;
const STOCH_PERIOD: usize = 14;
const STOCH_SMOOTH: usize = 3;
const VOLUME_SMA_PERIOD: usize = 20;
const SWEEP_LOOKBACK: usize = 20;
const SWEEP_WICK_THRESHOLD: f64 = 0.3;
const DELTA_SMA_PERIOD: usize = 14;
const VP_LOOKBACK: usize = 100;
const VP_NUM_LEVELS: usize = 50;
const VP_VALUE_AREA_PCT: f64 = 0.70;

/// 把K线序列增强为带全套指标列的序列
///
/// 列名是对外契约，策略条件按这些名字解析：
/// `RSI_14` `MACD_line/signal/histogram(_prev)` `EMA_{8,9,14,21,34,50,100}`
/// `SMA_20` `BB_upper/middle/lower/width` `ATR_14` `Stoch_K/D`
/// `ADX_14` `DI_plus/minus` `OBV` `Volume_SMA_20` `Volume_ratio`
/// 外加聪明钱族，见 `smart_money` 模块头
pub fn enrich(candles: &[CandleItem]) -> Result<IndicatorSeries> {
    if candles.is_empty() {
        return Err(anyhow!("K线序列为空，无法计算指标"));
    }
    let n = candles.len();

    let items: Vec<DataItem> = candles
        .iter()
        .map(|c| {
            DataItem::builder()
                .open(c.o)
                .high(c.h)
                .low(c.l)
                .close(c.c)
                .volume(c.v)
                .build()
                .map_err(|e| anyhow!("非法K线 ts={}: {:?}", c.ts, e))
        })
        .collect::<Result<_>>()?;

    let mut series = IndicatorSeries::new(candles.to_vec());

    // RSI
    let mut rsi = RelativeStrengthIndex::new(RSI_PERIOD)?;
    let rsi_col: Vec<f64> = candles.iter().map(|c| rsi.next(c.c)).collect();
    series.insert_column(&format!("RSI_{}", RSI_PERIOD), rsi_col, RSI_PERIOD);

    // MACD 12/26/9
    let mut macd = MovingAverageConvergenceDivergence::new(12, 26, 9)?;
    let mut macd_line = Vec::with_capacity(n);
    let mut macd_signal = Vec::with_capacity(n);
    let mut macd_hist = Vec::with_capacity(n);
    for c in candles {
        let out = macd.next(c.c);
        macd_line.push(out.macd);
        macd_signal.push(out.signal);
        macd_hist.push(out.histogram);
    }
    let macd_hist_prev = shift_one(&macd_hist);
    series.insert_column("MACD_line", macd_line, 26);
    series.insert_column("MACD_signal", macd_signal.clone(), 34);
    series.insert_column("MACD_histogram", macd_hist, 34);
    series.insert_column("MACD_histogram_prev", macd_hist_prev, 35);

    // 多周期EMA
    for period in EMA_PERIODS {
        let mut ema = ExponentialMovingAverage::new(period)?;
        let col: Vec<f64> = candles.iter().map(|c| ema.next(c.c)).collect();
        series.insert_column(&format!("EMA_{}", period), col, period);
    }

    // SMA
    let mut sma = SimpleMovingAverage::new(SMA_PERIOD)?;
    let sma_col: Vec<f64> = candles.iter().map(|c| sma.next(c.c)).collect();
    series.insert_column(&format!("SMA_{}", SMA_PERIOD), sma_col, SMA_PERIOD);

    // 布林带，width与原始口径一致：(上轨-下轨)/中轨*100
    let mut bb = BollingerBands::new(BB_PERIOD, 2.0)?;
    let mut bb_upper = Vec::with_capacity(n);
    let mut bb_middle = Vec::with_capacity(n);
    let mut bb_lower = Vec::with_capacity(n);
    let mut bb_width = Vec::with_capacity(n);
    for c in candles {
        let out = bb.next(c.c);
        bb_upper.push(out.upper);
        bb_middle.push(out.average);
        bb_lower.push(out.lower);
        bb_width.push(if out.average.abs() > f64::EPSILON {
            (out.upper - out.lower) / out.average * 100.0
        } else {
            f64::NAN
        });
    }
    series.insert_column("BB_upper", bb_upper, BB_PERIOD);
    series.insert_column("BB_middle", bb_middle, BB_PERIOD);
    series.insert_column("BB_lower", bb_lower, BB_PERIOD);
    series.insert_column("BB_width", bb_width, BB_PERIOD);

    // ATR
    let mut atr = AverageTrueRange::new(ATR_PERIOD)?;
    let atr_col: Vec<f64> = items.iter().map(|item| atr.next(item)).collect();
    series.insert_column(&format!("ATR_{}", ATR_PERIOD), atr_col, ATR_PERIOD);

    // 随机指标：K为period内相对位置，D为K的SMA平滑
    let (stoch_k, stoch_d) = stochastic(candles, STOCH_PERIOD, STOCH_SMOOTH);
    series.insert_column("Stoch_K", stoch_k, STOCH_PERIOD);
    series.insert_column("Stoch_D", stoch_d, STOCH_PERIOD + STOCH_SMOOTH - 1);

    // ADX族，Wilder平滑
    let (adx_col, di_plus, di_minus) = adx(candles, ADX_PERIOD);
    series.insert_column("DI_plus", di_plus, ADX_PERIOD);
    series.insert_column("DI_minus", di_minus, ADX_PERIOD);
    series.insert_column(&format!("ADX_{}", ADX_PERIOD), adx_col, 2 * ADX_PERIOD - 1);

    // 成交量族
    let mut obv = OnBalanceVolume::new();
    let obv_col: Vec<f64> = items.iter().map(|item| obv.next(item)).collect();
    series.insert_column("OBV", obv_col, 1);

    let mut vol_sma = SimpleMovingAverage::new(VOLUME_SMA_PERIOD)?;
    let vol_sma_col: Vec<f64> = candles.iter().map(|c| vol_sma.next(c.v)).collect();
    let vol_ratio: Vec<f64> = candles
        .iter()
        .zip(vol_sma_col.iter())
        .map(|(c, sma)| if *sma > 0.0 { c.v / sma } else { f64::NAN })
        .collect();
    series.insert_column("Volume_SMA_20", vol_sma_col, VOLUME_SMA_PERIOD);
    series.insert_column("Volume_ratio", vol_ratio, VOLUME_SMA_PERIOD);

    // 聪明钱族都以预热后的ATR做刻度
    let atr_vals = series
        .column(&format!("ATR_{}", ATR_PERIOD))
        .map(|c| c.to_vec())
        .unwrap_or_else(|| vec![f64::NAN; n]);

    let sweep =
        smart_money::liquidity_sweep(candles, &atr_vals, SWEEP_LOOKBACK, SWEEP_WICK_THRESHOLD);
    let (avwap_high, avwap_low) =
        smart_money::anchored_vwap(candles, &sweep.swing_high, &sweep.swing_low);
    series.insert_column("Swing_high", sweep.swing_high, SWEEP_LOOKBACK);
    series.insert_column("Swing_low", sweep.swing_low, SWEEP_LOOKBACK);
    series.insert_column("Liq_sweep_bull", sweep.bull, SWEEP_LOOKBACK);
    series.insert_column("Liq_sweep_bear", sweep.bear, SWEEP_LOOKBACK);
    series.insert_column("AVWAP_high", avwap_high, SWEEP_LOOKBACK);
    series.insert_column("AVWAP_low", avwap_low, SWEEP_LOOKBACK);

    let (delta, cumulative, delta_sma) = smart_money::volume_delta(candles, DELTA_SMA_PERIOD);
    series.insert_column("Volume_delta", delta, 1);
    series.insert_column("Cumulative_delta", cumulative, 1);
    series.insert_column(
        &format!("Delta_SMA_{}", DELTA_SMA_PERIOD),
        delta_sma,
        DELTA_SMA_PERIOD,
    );

    let (vp_poc, vp_vah, vp_val, vp_position) = smart_money::volume_profile(
        candles,
        &atr_vals,
        VP_LOOKBACK,
        VP_NUM_LEVELS,
        VP_VALUE_AREA_PCT,
    );
    series.insert_column("VP_POC", vp_poc, VP_LOOKBACK);
    series.insert_column("VP_VAH", vp_vah, VP_LOOKBACK);
    series.insert_column("VP_VAL", vp_val, VP_LOOKBACK);
    series.insert_column("VP_position", vp_position, VP_LOOKBACK);

    Ok(series)
}

fn shift_one(values: &[f64]) -> Vec<f64> {
    let mut shifted = Vec::with_capacity(values.len());
    shifted.push(f64::NAN);
    shifted.extend_from_slice(&values[..values.len().saturating_sub(1)]);
    shifted
}

/// 滚动高低点随机指标，区间塌缩时K取50
fn stochastic(candles: &[CandleItem], period: usize, smooth: usize) -> (Vec<f64>, Vec<f64>) {
    let n = candles.len();
    let mut k_col = vec![f64::NAN; n];
    for i in 0..n {
        let start = (i + 1).saturating_sub(period);
        let window = &candles[start..=i];
        let highest = window.iter().map(|c| c.h).fold(f64::MIN, f64::max);
        let lowest = window.iter().map(|c| c.l).fold(f64::MAX, f64::min);
        let range = highest - lowest;
        k_col[i] = if range > f64::EPSILON {
            (candles[i].c - lowest) / range * 100.0
        } else {
            50.0
        };
    }
    let mut d_col = vec![f64::NAN; n];
    for i in 0..n {
        let start = (i + 1).saturating_sub(smooth);
        let window = &k_col[start..=i];
        d_col[i] = window.iter().sum::<f64>() / window.len() as f64;
    }
    (k_col, d_col)
}

/// ADX/DI，Wilder递推平滑，首个平滑值取前period个之和
fn adx(candles: &[CandleItem], period: usize) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let n = candles.len();
    let mut adx_col = vec![f64::NAN; n];
    let mut di_plus = vec![f64::NAN; n];
    let mut di_minus = vec![f64::NAN; n];
    if n < period + 1 || period == 0 {
        return (adx_col, di_plus, di_minus);
    }

    let mut tr = vec![0.0; n];
    let mut dm_plus = vec![0.0; n];
    let mut dm_minus = vec![0.0; n];
    for i in 1..n {
        let c = &candles[i];
        let p = &candles[i - 1];
        tr[i] = (c.h - c.l).max((c.h - p.c).abs()).max((c.l - p.c).abs());
        let up = c.h - p.h;
        let down = p.l - c.l;
        dm_plus[i] = if up > down && up > 0.0 { up } else { 0.0 };
        dm_minus[i] = if down > up && down > 0.0 { down } else { 0.0 };
    }

    let p = period as f64;
    let mut s_tr: f64 = tr[1..=period].iter().sum();
    let mut s_plus: f64 = dm_plus[1..=period].iter().sum();
    let mut s_minus: f64 = dm_minus[1..=period].iter().sum();
    let mut dx = vec![f64::NAN; n];
    for i in period..n {
        if i > period {
            s_tr = s_tr - s_tr / p + tr[i];
            s_plus = s_plus - s_plus / p + dm_plus[i];
            s_minus = s_minus - s_minus / p + dm_minus[i];
        }
        if s_tr > f64::EPSILON {
            di_plus[i] = 100.0 * s_plus / s_tr;
            di_minus[i] = 100.0 * s_minus / s_tr;
            let di_sum = di_plus[i] + di_minus[i];
            dx[i] = if di_sum > f64::EPSILON {
                100.0 * (di_plus[i] - di_minus[i]).abs() / di_sum
            } else {
                0.0
            };
        }
    }

    let first = 2 * period - 1;
    if n > first {
        let mut a: f64 =
            dx[period..2 * period].iter().filter(|v| v.is_finite()).sum::<f64>() / p;
        adx_col[first] = a;
        for i in (first + 1)..n {
            let d = if dx[i].is_finite() { dx[i] } else { 0.0 };
            a = (a * (p - 1.0) + d) / p;
            adx_col[i] = a;
        }
    }
    (adx_col, di_plus, di_minus)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn make_candles(closes: &[f64]) -> Vec<CandleItem> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| CandleItem {
                o: c,
                h: c + 0.5,
                l: c - 0.5,
                c,
                v: 100.0,
                ts: i as i64 * 60_000,
            })
            .collect()
    }

    #[test]
    fn test_sma_after_warmup() {
        let closes: Vec<f64> = (1..=120).map(|i| i as f64).collect();
        let series = enrich(&make_candles(&closes)).unwrap();
        assert!(series.value("SMA_20", 18).unwrap().is_nan());
        // 下标20覆盖收盘价2..=21
        assert_relative_eq!(series.value("SMA_20", 20).unwrap(), 11.5, epsilon = 1e-9);
    }

    #[test]
    fn test_volume_ratio_constant_volume() {
        let closes: Vec<f64> = (1..=120).map(|i| i as f64).collect();
        let series = enrich(&make_candles(&closes)).unwrap();
        assert_relative_eq!(series.value("Volume_ratio", 110).unwrap(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_warmup_is_longest_period() {
        let closes: Vec<f64> = (1..=120).map(|i| i as f64).collect();
        let series = enrich(&make_candles(&closes)).unwrap();
        assert_eq!(series.warmup(), 100);
    }

    #[test]
    fn test_stoch_bounds() {
        let closes: Vec<f64> = (1..=120).map(|i| (i as f64 * 0.37).sin() * 10.0 + 100.0).collect();
        let series = enrich(&make_candles(&closes)).unwrap();
        for i in 20..120 {
            let k = series.value("Stoch_K", i).unwrap();
            assert!((0.0..=100.0).contains(&k), "K越界: {}", k);
        }
    }

    #[test]
    fn test_adx_in_strong_uptrend() {
        let closes: Vec<f64> = (1..=120).map(|i| i as f64).collect();
        let series = enrich(&make_candles(&closes)).unwrap();
        let i = 119;
        let di_p = series.value("DI_plus", i).unwrap();
        let di_m = series.value("DI_minus", i).unwrap();
        let adx = series.value("ADX_14", i).unwrap();
        assert!(di_p > di_m, "单边上行时DI_plus应占优: {} vs {}", di_p, di_m);
        assert!((0.0..=100.0).contains(&adx), "ADX越界: {}", adx);
        assert!(adx > 25.0, "单边趋势下ADX应走高: {}", adx);
    }

    #[test]
    fn test_smart_money_columns_present_after_warmup() {
        let closes: Vec<f64> = (1..=150)
            .map(|i| (i as f64 * 0.37).sin() * 10.0 + 100.0)
            .collect();
        let series = enrich(&make_candles(&closes)).unwrap();
        let i = 149;
        for name in [
            "Swing_high",
            "Swing_low",
            "AVWAP_high",
            "AVWAP_low",
            "Volume_delta",
            "Cumulative_delta",
            "Delta_SMA_14",
            "VP_POC",
            "VP_VAH",
            "VP_VAL",
            "VP_position",
        ] {
            let v = series.value(name, i).unwrap();
            assert!(v.is_finite(), "{} 在预热后仍为NaN", name);
        }
        let bull = series.value("Liq_sweep_bull", i).unwrap();
        assert!(bull == 0.0 || bull == 1.0);
    }

    #[test]
    fn test_empty_input_rejected() {
        assert!(enrich(&[]).is_err());
    }
}
