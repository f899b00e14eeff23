#![allow(dead_code)]
#![allow(unused_imports)]

pub mod app_config;
pub mod error;
pub mod socket;
pub mod time_util;
pub mod trading;

use anyhow::anyhow;
use dotenv::dotenv;

/// 单根K线数据
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CandleItem {
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub v: f64,
    pub ts: i64,
}

impl CandleItem {
    pub fn builder() -> CandleItemBuilder {
        CandleItemBuilder::new()
    }

    pub fn ts(&self) -> i64 {
        self.ts
    }

    pub fn o(&self) -> f64 {
        self.o
    }

    pub fn h(&self) -> f64 {
        self.h
    }

    pub fn l(&self) -> f64 {
        self.l
    }

    pub fn c(&self) -> f64 {
        self.c
    }

    pub fn v(&self) -> f64 {
        self.v
    }
}

pub struct CandleItemBuilder {
    o: Option<f64>,
    h: Option<f64>,
    l: Option<f64>,
    c: Option<f64>,
    v: Option<f64>,
    ts: Option<i64>,
}

impl CandleItemBuilder {
    pub fn new() -> Self {
        Self {
            o: None,
            h: None,
            l: None,
            c: None,
            v: None,
            ts: None,
        }
    }

    pub fn ts(mut self, val: i64) -> Self {
        self.ts = Some(val);
        self
    }

    pub fn o(mut self, val: f64) -> Self {
        self.o = Some(val);
        self
    }

    pub fn h(mut self, val: f64) -> Self {
        self.h = Some(val);
        self
    }

    pub fn l(mut self, val: f64) -> Self {
        self.l = Some(val);
        self
    }

    pub fn c(mut self, val: f64) -> Self {
        self.c = Some(val);
        self
    }

    pub fn v(mut self, val: f64) -> Self {
        self.v = Some(val);
        self
    }

    pub fn build(self) -> anyhow::Result<CandleItem> {
        match (self.o, self.h, self.l, self.c, self.v, self.ts) {
            (Some(o), Some(h), Some(l), Some(c), Some(v), Some(ts)) => {
                Ok(CandleItem { o, h, l, c, v, ts })
            }
            _ => Err(anyhow!("candle builder缺少必要字段")),
        }
    }
}

/// 应用初始化：加载环境变量、日志、数据库
pub async fn app_init() -> anyhow::Result<()> {
    dotenv().ok();
    app_config::log::setup_logging().await?;
    app_config::db::init_db().await;
    Ok(())
}
