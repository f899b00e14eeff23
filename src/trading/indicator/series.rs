use std::collections::HashMap;

use crate::CandleItem;

/// 某根K线上的指标快照，NaN值在生成时就被剔除
pub type SnapshotRow = HashMap<String, f64>;

/// K线序列及其对齐的指标列
///
/// 每一列与candles等长，预热期内的值为NaN。
/// 消费方通过 `snapshot` 拿到去NaN后的行视图，
/// 缺失的列在条件求值时一律按false处理。
#[derive(Debug, Clone)]
pub struct IndicatorSeries {
    candles: Vec<CandleItem>,
    columns: HashMap<String, Vec<f64>>,
    warmup: usize,
}

impl IndicatorSeries {
    pub fn new(candles: Vec<CandleItem>) -> Self {
        IndicatorSeries {
            candles,
            columns: HashMap::new(),
            warmup: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// 全序列的预热条数，模拟从这之后开始
    pub fn warmup(&self) -> usize {
        self.warmup
    }

    pub fn candles(&self) -> &[CandleItem] {
        &self.candles
    }

    pub fn candle(&self, i: usize) -> Option<&CandleItem> {
        self.candles.get(i)
    }

    /// 写入一列，预热期内的值覆盖为NaN
    pub(crate) fn insert_column(&mut self, name: &str, mut values: Vec<f64>, warmup_bars: usize) {
        debug_assert_eq!(values.len(), self.candles.len());
        let mask = warmup_bars.min(values.len());
        for v in values.iter_mut().take(mask) {
            *v = f64::NAN;
        }
        if warmup_bars > self.warmup {
            self.warmup = warmup_bars;
        }
        self.columns.insert(name.to_string(), values);
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(|v| v.as_slice())
    }

    /// 取某一列第i根的值，原始OHLCV列名直接从K线取
    pub fn value(&self, name: &str, i: usize) -> Option<f64> {
        let candle = self.candles.get(i)?;
        match name {
            "open" => Some(candle.o),
            "high" => Some(candle.h),
            "low" => Some(candle.l),
            "close" => Some(candle.c),
            "volume" => Some(candle.v),
            _ => self.columns.get(name).and_then(|col| col.get(i)).copied(),
        }
    }

    /// 第i根K线的完整快照，剔除NaN
    pub fn snapshot(&self, i: usize) -> SnapshotRow {
        let mut row = SnapshotRow::new();
        let candle = match self.candles.get(i) {
            Some(c) => c,
            None => return row,
        };
        row.insert("open".to_string(), candle.o);
        row.insert("high".to_string(), candle.h);
        row.insert("low".to_string(), candle.l);
        row.insert("close".to_string(), candle.c);
        row.insert("volume".to_string(), candle.v);
        for (name, col) in &self.columns {
            if let Some(v) = col.get(i) {
                if v.is_finite() {
                    row.insert(name.clone(), *v);
                }
            }
        }
        row
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.keys().map(|s| s.as_str()).collect()
    }
}
