//! 控制循环行为测试：用脚本化的mock执行通道驱动真实循环。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;

use masst_trader::time_util;
use masst_trader::trading::bot::{spawn_bot, BotConfig, BotRegistry, BotState};
use masst_trader::trading::model::order::algo_trade::AlgoTradeEntity;
use masst_trader::trading::coordinator::ResourceCoordinator;
use masst_trader::trading::model::{MemoryTradeStore, TradeStore};
use masst_trader::trading::mt5::{
    AccountInfo, MarketExecutor, Mt5Error, OrderResult, PositionInfo, Quote, SymbolInfo,
};
use masst_trader::trading::scorer::{AlwaysPass, Neutral};
use masst_trader::trading::strategy::{
    Direction, IndicatorCondition, Operator, Strategy, StrategyRule, TargetValue,
};
use masst_trader::CandleItem;

/// 脚本化的执行通道：固定K线与报价，持仓簿在内存里维护。
/// 顺带统计并发调用数，用来验证协调器确实把访问串行化了。
struct MockExecutor {
    candles: Vec<CandleItem>,
    // 按周期定制的K线，没配的周期回落到candles
    tf_candles: Mutex<HashMap<String, Vec<CandleItem>>>,
    bid: f64,
    ask: f64,
    positions: Mutex<Vec<PositionInfo>>,
    closed_tickets: Mutex<Vec<i64>>,
    next_ticket: AtomicI64,
    disconnected: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    call_delay: Duration,
}

impl MockExecutor {
    fn new(candles: Vec<CandleItem>) -> Self {
        MockExecutor {
            candles,
            tf_candles: Mutex::new(HashMap::new()),
            bid: 1.1000,
            ask: 1.1002,
            positions: Mutex::new(Vec::new()),
            closed_tickets: Mutex::new(Vec::new()),
            next_ticket: AtomicI64::new(1000),
            disconnected: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            call_delay: Duration::from_millis(2),
        }
    }

    fn set_candles_for(&self, timeframe: &str, candles: Vec<CandleItem>) {
        self.tf_candles
            .lock()
            .unwrap()
            .insert(timeframe.to_string(), candles);
    }

    fn seed_position(&self, ticket: i64, symbol: &str) {
        self.positions.lock().unwrap().push(PositionInfo {
            ticket,
            symbol: symbol.to_string(),
            position_type: "buy".to_string(),
            volume: 0.1,
            price_open: 1.0950,
            price_current: 1.1000,
            sl: 0.0,
            tp: 0.0,
            profit: 0.0,
            time: 1_700_000_000,
        });
    }

    fn closed(&self) -> Vec<i64> {
        self.closed_tickets.lock().unwrap().clone()
    }

    async fn enter(&self) -> Result<(), Mt5Error> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(Mt5Error::ConnectionLost);
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.call_delay).await;
        Ok(())
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl MarketExecutor for MockExecutor {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn quote(&self, symbol: &str) -> Result<Quote, Mt5Error> {
        self.enter().await?;
        self.leave();
        Ok(Quote {
            symbol: symbol.to_string(),
            bid: self.bid,
            ask: self.ask,
            time: 1_700_000_000_000,
        })
    }

    async fn candles(
        &self,
        _symbol: &str,
        timeframe: &str,
        _count: usize,
    ) -> Result<Vec<CandleItem>, Mt5Error> {
        self.enter().await?;
        self.leave();
        if let Some(custom) = self.tf_candles.lock().unwrap().get(timeframe) {
            return Ok(custom.clone());
        }
        Ok(self.candles.clone())
    }

    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, Mt5Error> {
        self.enter().await?;
        self.leave();
        Ok(SymbolInfo {
            symbol: symbol.to_string(),
            point: 0.00001,
            digits: 5,
            volume_min: 0.01,
            volume_max: 100.0,
            volume_step: 0.01,
            trade_tick_value: 1.0,
            trade_tick_size: 0.00001,
            spread: 2,
        })
    }

    async fn account_info(&self) -> Result<AccountInfo, Mt5Error> {
        self.enter().await?;
        self.leave();
        Ok(AccountInfo {
            balance: 10_000.0,
            equity: 10_000.0,
            margin_free: 10_000.0,
            currency: "USD".to_string(),
        })
    }

    async fn submit_order(
        &self,
        symbol: &str,
        direction: Direction,
        volume: f64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> Result<OrderResult, Mt5Error> {
        self.enter().await?;
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        let price = match direction {
            Direction::Buy => self.ask,
            Direction::Sell => self.bid,
        };
        self.positions.lock().unwrap().push(PositionInfo {
            ticket,
            symbol: symbol.to_string(),
            position_type: direction.as_str().to_string(),
            volume,
            price_open: price,
            price_current: price,
            sl: stop_loss.unwrap_or(0.0),
            tp: take_profit.unwrap_or(0.0),
            profit: 0.0,
            time: 1_700_000_000,
        });
        self.leave();
        Ok(OrderResult {
            retcode: 10009,
            order_id: ticket,
            deal: ticket,
            volume,
            price,
            comment: "Request executed".to_string(),
            success: true,
            message: String::new(),
        })
    }

    async fn close_position(&self, ticket: i64) -> Result<OrderResult, Mt5Error> {
        self.enter().await?;
        self.positions.lock().unwrap().retain(|p| p.ticket != ticket);
        self.closed_tickets.lock().unwrap().push(ticket);
        self.leave();
        Ok(OrderResult {
            retcode: 10009,
            order_id: ticket,
            deal: ticket,
            volume: 0.0,
            price: self.bid,
            comment: "Request executed".to_string(),
            success: true,
            message: String::new(),
        })
    }

    async fn open_positions(&self) -> Result<Vec<PositionInfo>, Mt5Error> {
        self.enter().await?;
        self.leave();
        Ok(self.positions.lock().unwrap().clone())
    }
}

/// 预热期之上的平缓序列，保证指标流水线能算满
fn make_candles(n: usize) -> Vec<CandleItem> {
    (0..n)
        .map(|i| {
            let base = 1.1 + 0.001 * ((i as f64) * 0.3).sin();
            CandleItem {
                o: base,
                h: base + 0.0005,
                l: base - 0.0005,
                c: base + 0.0001,
                v: 1_000.0,
                ts: (i as i64) * 60_000,
            }
        })
        .collect()
}

fn cond(indicator: &str, operator: Operator, value: f64) -> IndicatorCondition {
    IndicatorCondition {
        indicator: indicator.to_string(),
        parameter: "value".to_string(),
        operator,
        value: TargetValue::Number(value),
        description: String::new(),
    }
}

/// 进出场条件都恒真（close > 0），循环每个tick都会动作
fn always_trade_strategy(symbol: &str) -> Strategy {
    Strategy {
        id: Some("s-test".to_string()),
        name: "always-trade".to_string(),
        symbol: symbol.to_string(),
        rules: vec![StrategyRule {
            name: "r1".to_string(),
            timeframe: "1m".to_string(),
            direction: Direction::Buy,
            entry_conditions: vec![cond("close", Operator::Gt, 0.0)],
            exit_conditions: vec![cond("close", Operator::Gt, 0.0)],
            stop_loss_pips: Some(20.0),
            take_profit_pips: Some(40.0),
            stop_loss_atr_multiplier: None,
            take_profit_atr_multiplier: None,
            min_bars_in_trade: None,
            additional_timeframes: None,
            risk_percent: 1.0,
            description: String::new(),
        }],
        raw_description: String::new(),
        ai_explanation: String::new(),
        created_at: None,
    }
}

/// 上一轮运行留下的开仓记录
fn open_ledger_stub(symbol: &str, ticket: i64) -> AlgoTradeEntity {
    AlgoTradeEntity {
        id: "rec-restart".to_string(),
        strategy_id: Some("s-test".to_string()),
        strategy_name: "always-trade".to_string(),
        rule_index: 0,
        rule_name: "r1".to_string(),
        symbol: symbol.to_string(),
        timeframe: "1m".to_string(),
        direction: "buy".to_string(),
        volume: 0.1,
        entry_price: 1.0950,
        entry_time: time_util::now_iso(),
        sl_price: Some(1.0850),
        tp_price: Some(1.1100),
        sl_atr_mult: None,
        tp_atr_mult: None,
        atr_at_entry: Some(0.0008),
        entry_indicators: "{}".to_string(),
        exit_price: None,
        exit_time: None,
        exit_indicators: None,
        exit_reason: None,
        bars_held: None,
        profit: None,
        mt5_ticket: Some(ticket),
        ml_confidence: None,
        lstm_direction: None,
        lstm_confidence: None,
        status: "open".to_string(),
        created_at: time_util::now_iso(),
        updated_at: time_util::now_iso(),
    }
}

fn shifted_candles(candles: &[CandleItem], delta: f64) -> Vec<CandleItem> {
    candles
        .iter()
        .map(|c| CandleItem {
            o: c.o + delta,
            h: c.h + delta,
            l: c.l + delta,
            c: c.c + delta,
            v: c.v,
            ts: c.ts,
        })
        .collect()
}

fn fast_config(strategy: Strategy) -> BotConfig {
    let mut config = BotConfig::new(strategy);
    config.tick_interval = Duration::from_millis(10);
    config
}

async fn wait_until<F: Fn() -> bool>(cond: F, what: &str) {
    timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("等待超时: {}", what));
}

#[tokio::test]
async fn test_entry_then_strategy_exit_lands_in_ledger() {
    let mock = Arc::new(MockExecutor::new(make_candles(150)));
    let coordinator = ResourceCoordinator::new(mock.clone());
    let registry = BotRegistry::new();
    let store = Arc::new(MemoryTradeStore::new());

    spawn_bot(
        registry.clone(),
        coordinator,
        store.clone() as Arc<dyn TradeStore>,
        Arc::new(AlwaysPass),
        Arc::new(Neutral),
        fast_config(always_trade_strategy("EURUSD")),
    )
    .unwrap();

    // 恒真出场条件：开仓后下一个tick就按策略出场
    let s = store.clone();
    wait_until(
        || s.all().iter().any(|t| t.status == "closed"),
        "账本出现已平仓记录",
    )
    .await;

    let closed: Vec<_> = store
        .all()
        .into_iter()
        .filter(|t| t.status == "closed")
        .collect();
    let trade = &closed[0];
    assert_eq!(trade.symbol, "EURUSD");
    assert_eq!(trade.direction, "buy");
    assert_eq!(trade.exit_reason.as_deref(), Some("strategy_exit"));
    assert!(trade.mt5_ticket.is_some());
    assert!(trade.sl_price.is_some());
    assert!(trade.exit_price.is_some());

    registry.stop("EURUSD").unwrap();
    let r = registry.clone();
    wait_until(|| r.count() == 0, "循环注销").await;
    // 停止后终端上不留持仓
    assert!(mock.open_positions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_double_start_exactly_one_rejected() {
    let mock = Arc::new(MockExecutor::new(make_candles(150)));
    let coordinator = ResourceCoordinator::new(mock);
    let registry = BotRegistry::new();
    let store: Arc<dyn TradeStore> = Arc::new(MemoryTradeStore::new());

    let first = spawn_bot(
        registry.clone(),
        coordinator.clone(),
        store.clone(),
        Arc::new(AlwaysPass),
        Arc::new(Neutral),
        fast_config(always_trade_strategy("GBPUSD")),
    );
    let second = spawn_bot(
        registry.clone(),
        coordinator,
        store,
        Arc::new(AlwaysPass),
        Arc::new(Neutral),
        fast_config(always_trade_strategy("GBPUSD")),
    );
    assert!(first.is_ok());
    assert!(matches!(
        second,
        Err(masst_trader::error::AppError::AlreadyRunning(_))
    ));
    assert_eq!(registry.count(), 1);

    registry.stop("GBPUSD").unwrap();
    let r = registry.clone();
    wait_until(|| r.count() == 0, "循环注销").await;
}

#[tokio::test]
async fn test_stop_forces_close_of_adopted_position() {
    let mock = Arc::new(MockExecutor::new(make_candles(150)));
    // 终端上已有持仓，启动对账应接管它
    mock.seed_position(77, "USDJPY");
    let coordinator = ResourceCoordinator::new(mock.clone());
    let registry = BotRegistry::new();
    let store = Arc::new(MemoryTradeStore::new());

    // 进场条件恒假，循环只会守着接管的仓位
    let mut strategy = always_trade_strategy("USDJPY");
    strategy.rules[0].entry_conditions = vec![cond("close", Operator::Lt, 0.0)];
    strategy.rules[0].exit_conditions = vec![cond("close", Operator::Lt, 0.0)];

    spawn_bot(
        registry.clone(),
        coordinator,
        store.clone() as Arc<dyn TradeStore>,
        Arc::new(AlwaysPass),
        Arc::new(Neutral),
        fast_config(strategy),
    )
    .unwrap();

    let r = registry.clone();
    wait_until(
        || {
            r.status("USDJPY")
                .map(|s| s.state == BotState::InPosition && s.ticket == Some(77))
                .unwrap_or(false)
        },
        "接管已有持仓",
    )
    .await;

    registry.stop("USDJPY").unwrap();
    let r = registry.clone();
    wait_until(|| r.count() == 0, "循环注销").await;

    assert!(mock.closed().contains(&77));
    // 账本里没有匹配记录，接管的持仓不落库
    assert!(store.all().is_empty());
}

#[tokio::test]
async fn test_restart_recovers_ledger_record_for_existing_position() {
    let mock = Arc::new(MockExecutor::new(make_candles(150)));
    mock.seed_position(77, "USDJPY");
    let coordinator = ResourceCoordinator::new(mock.clone());
    let registry = BotRegistry::new();
    let store = Arc::new(MemoryTradeStore::new());
    // 上一轮进程留下的open记录，ticket与终端持仓一致
    store
        .open_trade(open_ledger_stub("USDJPY", 77))
        .await
        .unwrap();

    let mut strategy = always_trade_strategy("USDJPY");
    strategy.rules[0].entry_conditions = vec![cond("close", Operator::Lt, 0.0)];
    strategy.rules[0].exit_conditions = vec![cond("close", Operator::Lt, 0.0)];

    spawn_bot(
        registry.clone(),
        coordinator,
        store.clone() as Arc<dyn TradeStore>,
        Arc::new(AlwaysPass),
        Arc::new(Neutral),
        fast_config(strategy),
    )
    .unwrap();

    let r = registry.clone();
    wait_until(
        || {
            r.status("USDJPY")
                .map(|s| s.state == BotState::InPosition && s.ticket == Some(77))
                .unwrap_or(false)
        },
        "接管已有持仓",
    )
    .await;

    // 终端侧人工平仓，ticket消失
    mock.positions.lock().unwrap().clear();

    // 重启接管的持仓也要补全账本，不能让open记录挂死
    let s = store.clone();
    wait_until(
        || s.all().iter().any(|t| t.status == "closed"),
        "重启接管的记录被补全",
    )
    .await;
    let all = store.all();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, "rec-restart");
    assert_eq!(all[0].exit_reason.as_deref(), Some("external"));
    assert!(all[0].exit_price.is_some());

    registry.stop("USDJPY").unwrap();
    let r = registry.clone();
    wait_until(|| r.count() == 0, "循环注销").await;
}

#[tokio::test]
async fn test_rules_evaluate_on_their_own_timeframe() {
    let mock = Arc::new(MockExecutor::new(make_candles(150)));
    // 1h序列价位在1.1附近，5m序列整体抬到10.1附近
    mock.set_candles_for("5m", shifted_candles(&make_candles(150), 9.0));
    let coordinator = ResourceCoordinator::new(mock.clone());
    let registry = BotRegistry::new();
    let store = Arc::new(MemoryTradeStore::new());

    // 两条规则进场条件相同，只有5m序列满足 close > 5
    let mut strategy = always_trade_strategy("EURUSD");
    strategy.rules[0].timeframe = "1h".to_string();
    strategy.rules[0].entry_conditions = vec![cond("close", Operator::Gt, 5.0)];
    strategy.rules[0].exit_conditions = vec![cond("close", Operator::Lt, 0.0)];
    let mut second = strategy.rules[0].clone();
    second.name = "r2".to_string();
    second.timeframe = "5m".to_string();
    strategy.rules.push(second);

    spawn_bot(
        registry.clone(),
        coordinator,
        store.clone() as Arc<dyn TradeStore>,
        Arc::new(AlwaysPass),
        Arc::new(Neutral),
        fast_config(strategy),
    )
    .unwrap();

    // 第二条规则必须在自己的周期上命中，而不是借用第一条的序列
    let s = store.clone();
    wait_until(
        || s.all().iter().any(|t| t.rule_name == "r2"),
        "第二条规则在自己的周期上进场",
    )
    .await;
    let trade = store
        .all()
        .into_iter()
        .find(|t| t.rule_name == "r2")
        .unwrap();
    assert_eq!(trade.timeframe, "5m");
    assert_eq!(trade.rule_index, 1);

    registry.stop("EURUSD").unwrap();
    let r = registry.clone();
    wait_until(|| r.count() == 0, "循环注销").await;
}

#[tokio::test]
async fn test_connection_lost_kills_loop() {
    let mock = Arc::new(MockExecutor::new(make_candles(150)));
    mock.disconnected.store(true, Ordering::SeqCst);
    let coordinator = ResourceCoordinator::new(mock);
    let registry = BotRegistry::new();

    spawn_bot(
        registry.clone(),
        coordinator,
        Arc::new(MemoryTradeStore::new()),
        Arc::new(AlwaysPass),
        Arc::new(Neutral),
        fast_config(always_trade_strategy("EURUSD")),
    )
    .unwrap();

    // 连接断开是致命错误，循环必须自行退出并注销
    let r = registry.clone();
    wait_until(|| r.count() == 0, "循环因断连退出").await;
    assert!(!registry.is_running("EURUSD"));
}

#[tokio::test]
async fn test_coordinator_serializes_terminal_access() {
    let mock = Arc::new(MockExecutor::new(make_candles(10)));
    let coordinator = ResourceCoordinator::new(mock.clone());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let c = coordinator.clone();
        handles.push(tokio::spawn(async move {
            c.quote("EURUSD").await.unwrap();
            c.account_info().await.unwrap();
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    // 不可重入通道：任何时刻最多一个调用在终端上
    assert_eq!(mock.max_in_flight.load(Ordering::SeqCst), 1);
}
