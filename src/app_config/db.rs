use once_cell::sync::OnceCell;
use rbatis::RBatis;
use rbdc_sqlite::driver::SqliteDriver;
use tracing::info;

use super::env::env_or_default;

static DB_CLIENT: OnceCell<RBatis> = OnceCell::new();

pub async fn init_db() -> &'static RBatis {
    let rb = RBatis::new();
    let db_url = env_or_default("DB_URL", "sqlite://data/masst_trader.db");
    rb.link(SqliteDriver {}, &db_url)
        .await
        .expect("Failed to connect db");

    ensure_schema(&rb).await;

    DB_CLIENT.set(rb).expect("Failed to set DB_CLIENT");
    DB_CLIENT.get().expect("DB_CLIENT is not initialized")
}

pub fn get_db_client() -> &'static RBatis {
    DB_CLIENT.get().expect("DB_CLIENT is not initialized")
}

/// 幂等建表：策略、回测、自动交易记录
async fn ensure_schema(rb: &RBatis) {
    let ddl = [
        r#"CREATE TABLE IF NOT EXISTS strategies (
            id              TEXT PRIMARY KEY,
            name            TEXT NOT NULL,
            symbol          TEXT NOT NULL,
            rules           TEXT NOT NULL,
            raw_description TEXT NOT NULL,
            ai_explanation  TEXT NOT NULL DEFAULT '',
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS backtests (
            id              TEXT PRIMARY KEY,
            strategy_id     TEXT NOT NULL,
            strategy_name   TEXT NOT NULL,
            symbol          TEXT NOT NULL,
            initial_balance REAL NOT NULL,
            risk_percent    REAL NOT NULL,
            stats           TEXT NOT NULL,
            trades          TEXT NOT NULL,
            equity_curve    TEXT NOT NULL,
            created_at      TEXT NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS algo_trades (
            id                TEXT PRIMARY KEY,
            strategy_id       TEXT,
            strategy_name     TEXT NOT NULL,
            rule_index        INTEGER NOT NULL DEFAULT 0,
            rule_name         TEXT NOT NULL DEFAULT '',
            symbol            TEXT NOT NULL,
            timeframe         TEXT NOT NULL,
            direction         TEXT NOT NULL,
            volume            REAL NOT NULL,
            entry_price       REAL NOT NULL,
            entry_time        TEXT NOT NULL,
            sl_price          REAL,
            tp_price          REAL,
            sl_atr_mult       REAL,
            tp_atr_mult       REAL,
            atr_at_entry      REAL,
            entry_indicators  TEXT NOT NULL DEFAULT '{}',
            exit_price        REAL,
            exit_time         TEXT,
            exit_indicators   TEXT DEFAULT '{}',
            exit_reason       TEXT,
            bars_held         INTEGER,
            profit            REAL,
            mt5_ticket        INTEGER,
            ml_confidence     REAL,
            lstm_direction    TEXT,
            lstm_confidence   REAL,
            status            TEXT NOT NULL DEFAULT 'open',
            created_at        TEXT NOT NULL,
            updated_at        TEXT NOT NULL
        )"#,
    ];
    for sql in ddl {
        if let Err(e) = rb.exec(sql, vec![]).await {
            panic!("建表失败: {}", e);
        }
    }
    info!("数据库schema初始化完成");
}
