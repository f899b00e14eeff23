//! 单品种控制循环
//!
//! 一个循环 = 一个tokio任务。每个tick：观察停止标志，
//! 空仓则评估进场，持仓则对账终端持仓、推进bars_held、
//! 评估出场。所有终端访问都经资源协调器排队。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::registry::{BotHandle, BotRegistry};
use super::sizing::lot_for_risk;
use super::state::{BotState, BotStatus, OpenPosition};
use crate::error::AppError;
use crate::time_util;
use crate::trading::backtest::ExitReason;
use crate::trading::coordinator::ResourceCoordinator;
use crate::trading::indicator::{self, SnapshotRow};
use crate::trading::model::order::algo_trade::AlgoTradeEntity;
use crate::trading::model::{TradeClose, TradeStore};
use crate::trading::mt5::{MarketExecutor, SymbolInfo};
use crate::trading::scorer::{
    DirectionForecast, DirectionPredictor, EntryScorer, DEFAULT_SCORE_THRESHOLD,
};
use crate::trading::strategy::{all_conditions_met, Direction, Strategy, StrategyRule};

/// 外部平仓归类的相对价差容差
const EXTERNAL_CLOSE_TOLERANCE: f64 = 1e-3;

/// 循环启动参数
pub struct BotConfig {
    pub strategy: Strategy,
    pub tick_interval: Duration,
    pub candle_count: usize,
}

impl BotConfig {
    pub fn new(strategy: Strategy) -> Self {
        BotConfig {
            strategy,
            tick_interval: Duration::from_secs(5),
            candle_count: 300,
        }
    }
}

/// 校验、注册、起任务。注册失败（重复启动）不会spawn任何东西。
pub fn spawn_bot(
    registry: Arc<BotRegistry>,
    coordinator: Arc<ResourceCoordinator>,
    store: Arc<dyn TradeStore>,
    scorer: Arc<dyn EntryScorer>,
    predictor: Arc<dyn DirectionPredictor>,
    config: BotConfig,
) -> Result<(), AppError> {
    config.strategy.validate()?;
    let symbol = config.strategy.symbol.clone();
    let stop_flag = Arc::new(AtomicBool::new(false));
    let (status_tx, status_rx) = watch::channel(BotStatus::new(&symbol, &config.strategy.name));

    registry.register(
        &symbol,
        BotHandle {
            stop_flag: stop_flag.clone(),
            status_rx,
        },
    )?;

    let bot = SymbolBot {
        symbol,
        strategy: config.strategy,
        tick_interval: config.tick_interval,
        candle_count: config.candle_count,
        coordinator,
        store,
        scorer,
        predictor,
        registry,
        stop_flag,
        status_tx,
        state: BotState::Watching,
        position: None,
        symbol_info: None,
    };
    tokio::spawn(bot.run());
    Ok(())
}

pub struct SymbolBot {
    symbol: String,
    strategy: Strategy,
    tick_interval: Duration,
    candle_count: usize,
    coordinator: Arc<ResourceCoordinator>,
    store: Arc<dyn TradeStore>,
    scorer: Arc<dyn EntryScorer>,
    predictor: Arc<dyn DirectionPredictor>,
    registry: Arc<BotRegistry>,
    stop_flag: Arc<AtomicBool>,
    status_tx: watch::Sender<BotStatus>,
    state: BotState,
    position: Option<OpenPosition>,
    // 开仓时缓存，平仓估算盈亏用
    symbol_info: Option<SymbolInfo>,
}

impl SymbolBot {
    pub async fn run(mut self) {
        info!(
            "交易循环启动 symbol={} strategy={}",
            self.symbol, self.strategy.name
        );

        match self.reconcile_startup().await {
            Ok(()) => {}
            Err(AppError::ConnectionLost) => {
                error!("启动对账失败，连接已断开 symbol={}", self.symbol);
                self.shutdown();
                return;
            }
            Err(e) => warn!("启动对账失败，按空仓继续 symbol={}: {}", self.symbol, e),
        }

        let mut ticker = tokio::time::interval(self.tick_interval);
        loop {
            ticker.tick().await;

            // 停止标志只在tick边界观察
            if self.stop_flag.load(Ordering::SeqCst) {
                self.set_state(BotState::Stopping);
                if let Err(e) = self.forced_close().await {
                    error!("强制平仓失败 symbol={}: {}", self.symbol, e);
                }
                break;
            }

            match self.tick().await {
                Ok(()) => {}
                Err(AppError::ConnectionLost) => {
                    error!("提供方连接断开，循环终止 symbol={}", self.symbol);
                    break;
                }
                Err(e) => warn!("tick失败，下个tick重试 symbol={}: {}", self.symbol, e),
            }
        }

        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.state = BotState::Stopped;
        self.publish_status();
        self.registry.deregister(&self.symbol);
        info!("交易循环已退出 symbol={}", self.symbol);
    }

    /// 启动对账：终端上已有本品种持仓则接管，不盲目开新仓
    async fn reconcile_startup(&mut self) -> Result<(), AppError> {
        let positions = self.coordinator.open_positions().await?;
        if let Some(p) = positions.into_iter().find(|p| p.symbol == self.symbol) {
            info!(
                "接管已有持仓 symbol={} ticket={} volume={}",
                self.symbol, p.ticket, p.volume
            );
            let direction = if p.position_type == "sell" {
                Direction::Sell
            } else {
                Direction::Buy
            };
            // 上一轮运行留下的open记录按ticket找回，否则账本里会永远挂着open
            let record = match self.store.open_trades(&self.symbol).await {
                Ok(rows) => rows.into_iter().find(|r| r.mt5_ticket == Some(p.ticket)),
                Err(e) => {
                    warn!("查询未平仓记录失败 symbol={}: {}", self.symbol, e);
                    None
                }
            };
            if let Some(r) = &record {
                info!(
                    "恢复账本关联 symbol={} ticket={} record_id={}",
                    self.symbol, p.ticket, r.id
                );
            }
            self.position = Some(OpenPosition {
                ticket: p.ticket,
                direction,
                volume: p.volume,
                entry_price: p.price_open,
                entry_time: time_util::mill_time_to_datetime(p.time * 1000)
                    .unwrap_or_else(|_| time_util::now_iso()),
                sl_price: (p.sl > 0.0)
                    .then_some(p.sl)
                    .or_else(|| record.as_ref().and_then(|r| r.sl_price)),
                tp_price: (p.tp > 0.0)
                    .then_some(p.tp)
                    .or_else(|| record.as_ref().and_then(|r| r.tp_price)),
                atr_at_entry: record.as_ref().and_then(|r| r.atr_at_entry),
                bars_held: 0,
                record_id: record.as_ref().map(|r| r.id.clone()),
                last_candle_ts: 0,
                rule_index: record
                    .as_ref()
                    .map(|r| r.rule_index.max(0) as usize)
                    .unwrap_or(0),
            });
            self.state = BotState::InPosition;
            match self.coordinator.symbol_info(&self.symbol).await {
                Ok(info) => self.symbol_info = Some(info),
                Err(e) => warn!("拉取品种信息失败 symbol={}: {}", self.symbol, e),
            }
        }
        self.publish_status();
        Ok(())
    }

    async fn tick(&mut self) -> Result<(), AppError> {
        match self.state {
            BotState::Watching => self.tick_watching().await,
            BotState::InPosition => self.tick_in_position().await,
            BotState::Stopping | BotState::Stopped => Ok(()),
        }
    }

    /// 空仓：每个规则在自己的周期上求值，按规则顺序找首个命中
    async fn tick_watching(&mut self) -> Result<(), AppError> {
        // 同周期的规则共享一次K线拉取
        let mut series_by_tf: HashMap<String, indicator::IndicatorSeries> = HashMap::new();
        for rule in &self.strategy.rules {
            if series_by_tf.contains_key(&rule.timeframe) {
                continue;
            }
            let candles = self
                .coordinator
                .candles(&self.symbol, &rule.timeframe, self.candle_count)
                .await?;
            let series =
                indicator::enrich(&candles).map_err(|e| AppError::Transient(e.to_string()))?;
            if series.len() < series.warmup().max(1) + 2 {
                return Err(AppError::Transient(format!(
                    "K线不足以覆盖预热期 symbol={} timeframe={} len={}",
                    self.symbol,
                    rule.timeframe,
                    series.len()
                )));
            }
            series_by_tf.insert(rule.timeframe.clone(), series);
        }

        let mut hit: Option<usize> = None;
        for (idx, rule) in self.strategy.rules.iter().enumerate() {
            let series = match series_by_tf.get(&rule.timeframe) {
                Some(s) => s,
                None => continue,
            };
            let i = series.len() - 1;
            let row = series.snapshot(i);
            let prev = series.snapshot(i - 1);
            if all_conditions_met(&row, Some(&prev), &rule.entry_conditions) {
                hit = Some(idx);
                break;
            }
        }
        let idx = match hit {
            Some(idx) => idx,
            None => return Ok(()),
        };
        let rule = self.strategy.rules[idx].clone();
        let series = match series_by_tf.get(&rule.timeframe) {
            Some(s) => s,
            None => return Ok(()),
        };
        let i = series.len() - 1;
        let row = series.snapshot(i);

        // 顾问门槛：评分与方向预测都只劝退，不叫停循环
        let score = match self
            .scorer
            .score_entry(&self.symbol, rule.direction, &row)
            .await
        {
            Ok(s) => s,
            Err(e) => {
                warn!("进场评分失败，按放行处理 symbol={}: {}", self.symbol, e);
                1.0
            }
        };
        if score < DEFAULT_SCORE_THRESHOLD {
            info!(
                "评分未过门槛，跳过进场 symbol={} rule={} score={:.2}",
                self.symbol, rule.name, score
            );
            return Ok(());
        }
        let forecast = match self.predictor.predict_direction(&self.symbol, &row).await {
            Ok(f) => f,
            Err(e) => {
                warn!("方向预测失败，按中立处理 symbol={}: {}", self.symbol, e);
                DirectionForecast::neutral()
            }
        };
        if let Some(pred) = forecast.direction {
            if pred == rule.direction.opposite() && forecast.confidence >= DEFAULT_SCORE_THRESHOLD {
                info!(
                    "方向预测与规则相反，跳过进场 symbol={} rule={} pred={} conf={:.2}",
                    self.symbol, rule.name, pred, forecast.confidence
                );
                return Ok(());
            }
        }

        let atr_val = row.get("ATR_14").copied();
        let candle_ts = series.candle(i).map(|c| c.ts).unwrap_or(0);
        self.open_position(idx, rule, atr_val, score, &forecast, &row, candle_ts)
            .await
    }

    /// 下单序列在一次门锁内完成：报价、账户、品种信息、手数、下单
    #[allow(clippy::too_many_arguments)]
    async fn open_position(
        &mut self,
        rule_index: usize,
        rule: StrategyRule,
        atr_val: Option<f64>,
        score: f64,
        forecast: &DirectionForecast,
        entry_row: &SnapshotRow,
        candle_ts: i64,
    ) -> Result<(), AppError> {
        let symbol = self.symbol.clone();
        let direction = rule.direction;
        let risk_percent = rule.risk_percent;
        let sl_pips = rule.stop_loss_pips;
        let tp_pips = rule.take_profit_pips;
        let sl_mult = rule.stop_loss_atr_multiplier;
        let tp_mult = rule.take_profit_atr_multiplier;

        let (order, info, sl_price, tp_price, volume) = self
            .coordinator
            .execute(move |ex: &dyn MarketExecutor| {
                Box::pin(async move {
                    let info = ex.symbol_info(&symbol).await?;
                    let account = ex.account_info().await?;
                    let q = ex.quote(&symbol).await?;
                    let ref_price = match direction {
                        Direction::Buy => q.ask,
                        Direction::Sell => q.bid,
                    };
                    // 5位报价下1 pip = 10 point
                    let pip_size = info.point * 10.0;
                    let sl_distance = match (sl_mult, atr_val) {
                        (Some(m), Some(atr)) if m > 0.0 && atr > 0.0 => Some(atr * m),
                        _ => sl_pips.map(|p| p * pip_size),
                    };
                    let tp_distance = match (tp_mult, atr_val) {
                        (Some(m), Some(atr)) if m > 0.0 && atr > 0.0 => Some(atr * m),
                        _ => tp_pips.map(|p| p * pip_size),
                    };
                    let sl_price = sl_distance.map(|d| match direction {
                        Direction::Buy => ref_price - d,
                        Direction::Sell => ref_price + d,
                    });
                    let tp_price = tp_distance.map(|d| match direction {
                        Direction::Buy => ref_price + d,
                        Direction::Sell => ref_price - d,
                    });
                    let volume = match sl_distance {
                        Some(d) => lot_for_risk(account.equity, risk_percent, d, &info),
                        None => info.volume_min,
                    };
                    let order = ex
                        .submit_order(&symbol, direction, volume, sl_price, tp_price)
                        .await?;
                    Ok((order, info, sl_price, tp_price, volume))
                })
            })
            .await?;

        let entry_price = order.price;
        info!(
            "已开仓 symbol={} rule={} direction={} ticket={} volume={} price={} sl={:?} tp={:?}",
            self.symbol, rule.name, direction, order.order_id, volume, entry_price, sl_price, tp_price
        );

        let now = time_util::now_iso();
        let entity = AlgoTradeEntity {
            id: Uuid::new_v4().to_string(),
            strategy_id: self.strategy.id.clone(),
            strategy_name: self.strategy.name.clone(),
            rule_index: rule_index as i64,
            rule_name: rule.name.clone(),
            symbol: self.symbol.clone(),
            timeframe: rule.timeframe.clone(),
            direction: direction.as_str().to_string(),
            volume,
            entry_price,
            entry_time: now.clone(),
            sl_price,
            tp_price,
            sl_atr_mult: sl_mult,
            tp_atr_mult: tp_mult,
            atr_at_entry: atr_val,
            entry_indicators: serde_json::to_string(entry_row)
                .unwrap_or_else(|_| "{}".to_string()),
            exit_price: None,
            exit_time: None,
            exit_indicators: None,
            exit_reason: None,
            bars_held: None,
            profit: None,
            mt5_ticket: Some(order.order_id),
            ml_confidence: Some(score),
            lstm_direction: forecast.direction.map(|d| d.as_str().to_string()),
            lstm_confidence: Some(forecast.confidence),
            status: "open".to_string(),
            created_at: now.clone(),
            updated_at: now.clone(),
        };
        let record_id = match self.store.open_trade(entity).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("开仓记录落库失败 symbol={}: {}", self.symbol, e);
                None
            }
        };

        self.symbol_info = Some(info);
        self.position = Some(OpenPosition {
            ticket: order.order_id,
            direction,
            volume,
            entry_price,
            entry_time: now,
            sl_price,
            tp_price,
            atr_at_entry: atr_val,
            bars_held: 0,
            record_id,
            last_candle_ts: candle_ts,
            rule_index,
        });
        self.set_state(BotState::InPosition);
        Ok(())
    }

    /// 持仓：先对账终端持仓，再推进bars_held与出场条件
    async fn tick_in_position(&mut self) -> Result<(), AppError> {
        let pos = match self.position.clone() {
            Some(p) => p,
            None => {
                self.set_state(BotState::Watching);
                return Ok(());
            }
        };

        let positions = self.coordinator.open_positions().await?;
        if !positions.iter().any(|p| p.ticket == pos.ticket) {
            // ticket消失 = 被终端侧/人工关闭，按最新价归类
            let quote = self.coordinator.quote(&self.symbol).await?;
            let last_price = match pos.direction {
                Direction::Buy => quote.bid,
                Direction::Sell => quote.ask,
            };
            let reason = classify_external_close(last_price, pos.sl_price, pos.tp_price);
            info!(
                "持仓被外部关闭 symbol={} ticket={} last_price={} 归类={}",
                self.symbol, pos.ticket, last_price, reason
            );
            self.finalize_trade(&pos, last_price, reason, None).await;
            self.position = None;
            self.set_state(BotState::Watching);
            return Ok(());
        }

        let rule = self
            .strategy
            .rules
            .get(pos.rule_index)
            .cloned()
            .unwrap_or_else(|| self.strategy.rules[0].clone());
        let candles = self
            .coordinator
            .candles(&self.symbol, &rule.timeframe, self.candle_count)
            .await?;
        let series =
            indicator::enrich(&candles).map_err(|e| AppError::Transient(e.to_string()))?;
        if series.len() < 2 {
            return Err(AppError::Transient("K线不足".to_string()));
        }
        let i = series.len() - 1;
        let last_ts = series.candle(i).map(|c| c.ts).unwrap_or(0);

        if let Some(p) = self.position.as_mut() {
            if last_ts != p.last_candle_ts {
                p.bars_held += 1;
                p.last_candle_ts = last_ts;
            }
        }
        let pos = match self.position.clone() {
            Some(p) => p,
            None => return Ok(()),
        };

        let row = series.snapshot(i);
        let prev = series.snapshot(i - 1);
        let min_bars = rule.min_bars_in_trade.unwrap_or(0) as usize;
        if pos.bars_held >= min_bars
            && all_conditions_met(&row, Some(&prev), &rule.exit_conditions)
        {
            let ticket = pos.ticket;
            let order = self
                .coordinator
                .execute(move |ex: &dyn MarketExecutor| {
                    Box::pin(async move { ex.close_position(ticket).await })
                })
                .await?;
            let exit_price = if order.price > 0.0 {
                order.price
            } else {
                row.get("close").copied().unwrap_or(pos.entry_price)
            };
            info!(
                "策略出场平仓 symbol={} ticket={} price={} bars_held={}",
                self.symbol, ticket, exit_price, pos.bars_held
            );
            self.finalize_trade(&pos, exit_price, ExitReason::StrategyExit, Some(&row))
                .await;
            self.position = None;
            self.set_state(BotState::Watching);
            return Ok(());
        }

        self.publish_status();
        Ok(())
    }

    /// 停止指令下的强制平仓
    async fn forced_close(&mut self) -> Result<(), AppError> {
        let pos = match self.position.take() {
            Some(p) => p,
            None => return Ok(()),
        };
        info!(
            "停止指令，强制平仓 symbol={} ticket={}",
            self.symbol, pos.ticket
        );
        let ticket = pos.ticket;
        let order = self
            .coordinator
            .execute(move |ex: &dyn MarketExecutor| {
                Box::pin(async move { ex.close_position(ticket).await })
            })
            .await?;
        let exit_price = if order.price > 0.0 {
            order.price
        } else {
            pos.entry_price
        };
        self.finalize_trade(&pos, exit_price, ExitReason::ForcedStop, None)
            .await;
        Ok(())
    }

    /// 补全账本记录；没有对应账本记录的持仓跳过
    async fn finalize_trade(
        &self,
        pos: &OpenPosition,
        exit_price: f64,
        reason: ExitReason,
        exit_row: Option<&SnapshotRow>,
    ) {
        let record_id = match &pos.record_id {
            Some(id) => id.clone(),
            None => return,
        };
        let close = TradeClose {
            exit_price,
            exit_time: time_util::now_iso(),
            exit_indicators: exit_row
                .and_then(|r| serde_json::to_string(r).ok())
                .unwrap_or_else(|| "{}".to_string()),
            exit_reason: reason.as_str().to_string(),
            bars_held: pos.bars_held as i64,
            profit: self.estimate_profit(pos, exit_price),
        };
        if let Err(e) = self.store.close_trade(&record_id, close).await {
            warn!(
                "平仓记录落库失败 symbol={} id={}: {}",
                self.symbol, record_id, e
            );
        }
    }

    fn estimate_profit(&self, pos: &OpenPosition, exit_price: f64) -> Option<f64> {
        let info = self.symbol_info.as_ref()?;
        if info.trade_tick_size <= 0.0 {
            return None;
        }
        let diff = match pos.direction {
            Direction::Buy => exit_price - pos.entry_price,
            Direction::Sell => pos.entry_price - exit_price,
        };
        Some(diff / info.trade_tick_size * info.trade_tick_value * pos.volume)
    }

    fn set_state(&mut self, state: BotState) {
        self.state = state;
        self.publish_status();
    }

    fn publish_status(&self) {
        let status = BotStatus {
            symbol: self.symbol.clone(),
            strategy_name: self.strategy.name.clone(),
            state: self.state,
            ticket: self.position.as_ref().map(|p| p.ticket),
            entry_price: self.position.as_ref().map(|p| p.entry_price),
            bars_held: self.position.as_ref().map(|p| p.bars_held).unwrap_or(0),
            updated_at: time_util::now_iso(),
        };
        let _ = self.status_tx.send(status);
    }
}

/// ticket消失后按最新价归类平仓原因：价格贴着止损算止损，
/// 贴着止盈算止盈，都不贴算外部干预
pub fn classify_external_close(
    last_price: f64,
    sl_price: Option<f64>,
    tp_price: Option<f64>,
) -> ExitReason {
    let near = |target: f64| {
        (last_price - target).abs() <= target.abs().max(f64::EPSILON) * EXTERNAL_CLOSE_TOLERANCE
    };
    if let Some(sl) = sl_price {
        if sl > 0.0 && near(sl) {
            return ExitReason::StopLoss;
        }
    }
    if let Some(tp) = tp_price {
        if tp > 0.0 && near(tp) {
            return ExitReason::TakeProfit;
        }
    }
    ExitReason::External
}
