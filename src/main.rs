use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tokio::time::Instant;
use tracing::{error, info};

use masst_trader::app_config::env::env_is_true;
use masst_trader::socket::run_quote_stream;
use masst_trader::trading::backtest;
use masst_trader::trading::bot::{spawn_bot, BotConfig, BotRegistry};
use masst_trader::trading::coordinator::{OffloadPool, ResourceCoordinator};
use masst_trader::trading::indicator;
use masst_trader::trading::model::strategy::back_test_log::{BackTestLog, BackTestLogModel};
use masst_trader::trading::model::strategy::strategy_store::{StrategyEntity, StrategyEntityModel};
use masst_trader::trading::model::{DbTradeStore, TradeStore};
use masst_trader::trading::mt5::{MarketExecutor, Mt5Client};
use masst_trader::trading::scorer::{AlwaysPass, DirectionPredictor, EntryScorer, Neutral};
use masst_trader::trading::strategy::Strategy;
use masst_trader::trading::translator::{LlmTranslator, StrategyTranslator};

#[derive(Parser)]
#[command(name = "masst_trader", about = "规则化交易策略引擎")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 启动实盘循环（附带行情推送服务）
    Run {
        /// 策略id，多个用逗号分隔
        #[arg(long)]
        strategy_ids: String,
        /// 行情推送服务监听地址
        #[arg(long, default_value = "127.0.0.1:9002")]
        stream_addr: String,
        /// tick间隔（秒）
        #[arg(long, default_value_t = 5)]
        tick_secs: u64,
    },
    /// 对库里的策略跑回测并落库
    Backtest {
        #[arg(long)]
        strategy_id: String,
        /// 时间周期，缺省用策略首条规则的周期
        #[arg(long)]
        timeframe: Option<String>,
        /// 拉取的K线数量
        #[arg(long, default_value_t = 1000)]
        count: usize,
        #[arg(long, default_value_t = 10_000.0)]
        balance: f64,
    },
    /// 自然语言描述翻译成策略并入库
    Translate {
        #[arg(long)]
        description: String,
        #[arg(long)]
        symbol: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    masst_trader::app_init().await?;
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            strategy_ids,
            stream_addr,
            tick_secs,
        } => run_live(&strategy_ids, stream_addr, tick_secs).await,
        Command::Backtest {
            strategy_id,
            timeframe,
            count,
            balance,
        } => run_backtest_cmd(&strategy_id, timeframe, count, balance).await,
        Command::Translate {
            description,
            symbol,
        } => translate_cmd(&description, &symbol).await,
    }
}

async fn load_strategy(id: &str) -> anyhow::Result<Strategy> {
    let entity = StrategyEntityModel::new()
        .await
        .get(id)
        .await?
        .ok_or_else(|| anyhow!("策略不存在: {}", id))?;
    entity.to_strategy()
}

async fn run_live(strategy_ids: &str, stream_addr: String, tick_secs: u64) -> anyhow::Result<()> {
    let executor: Arc<dyn MarketExecutor> = Arc::new(Mt5Client::from_env());
    let coordinator = ResourceCoordinator::new(executor);
    let registry = BotRegistry::new();
    let store: Arc<dyn TradeStore> = Arc::new(DbTradeStore);
    let scorer: Arc<dyn EntryScorer> = Arc::new(AlwaysPass);
    let predictor: Arc<dyn DirectionPredictor> = Arc::new(Neutral);

    for id in strategy_ids.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let strategy = load_strategy(id).await?;
        let mut config = BotConfig::new(strategy);
        config.tick_interval = Duration::from_secs(tick_secs);
        spawn_bot(
            registry.clone(),
            coordinator.clone(),
            store.clone(),
            scorer.clone(),
            predictor.clone(),
            config,
        )?;
    }

    if env_is_true("IS_OPEN_QUOTE_STREAM", true) {
        let pool = Arc::new(OffloadPool::new(30));
        let stream_coordinator = coordinator.clone();
        tokio::spawn(async move {
            if let Err(e) = run_quote_stream(&stream_addr, stream_coordinator, pool).await {
                error!("行情推送服务退出: {}", e);
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("收到退出信号，停止所有交易循环");
    registry.stop_all();

    // 等所有循环平仓并自行注销
    let deadline = Instant::now() + Duration::from_secs(30);
    while registry.count() > 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    if registry.count() > 0 {
        error!("部分循环未在超时内退出: {:?}", registry.running());
    }
    Ok(())
}

async fn run_backtest_cmd(
    strategy_id: &str,
    timeframe: Option<String>,
    count: usize,
    balance: f64,
) -> anyhow::Result<()> {
    let strategy = load_strategy(strategy_id).await?;
    let timeframe = timeframe
        .or_else(|| strategy.rules.first().map(|r| r.timeframe.clone()))
        .ok_or_else(|| anyhow!("策略没有时间周期"))?;

    let executor: Arc<dyn MarketExecutor> = Arc::new(Mt5Client::from_env());
    let coordinator = ResourceCoordinator::new(executor);
    let candles = coordinator
        .candles(&strategy.symbol, &timeframe, count)
        .await?;
    let series = indicator::enrich(&candles)?;

    let result = backtest::run_backtest(&series, &strategy, balance)?;
    println!("{}", serde_json::to_string_pretty(&result.stats)?);

    let log = BackTestLog::from_result(&strategy, &result, balance)?;
    BackTestLogModel::new().await.add(&log).await?;
    info!("回测已落库 id={} trades={}", log.id, result.trades.len());
    Ok(())
}

async fn translate_cmd(description: &str, symbol: &str) -> anyhow::Result<()> {
    let translator = LlmTranslator::from_env()?;
    let strategy = translator.translate(description, symbol).await?;
    let entity = StrategyEntity::from_strategy(&strategy)?;
    StrategyEntityModel::new().await.add(&entity).await?;
    println!("{}", serde_json::to_string_pretty(&strategy)?);
    info!("策略已入库 id={} name={}", entity.id, entity.name);
    Ok(())
}
