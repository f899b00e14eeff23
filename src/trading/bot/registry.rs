//! 循环实例注册中心
//!
//! 同一品种同一时刻只允许一个循环。注册在锁内完成，
//! 两个并发启动必定恰好一个成功。注册中心从不直接杀任务，
//! 停止只是置标志，循环自己在tick边界观察并体面退出，
//! 退出前自行注销。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::{info, warn};

use super::state::BotStatus;
use crate::error::AppError;

/// 注册中心持有的循环句柄，没有JoinHandle：循环自己管退出
pub struct BotHandle {
    pub stop_flag: Arc<AtomicBool>,
    pub status_rx: watch::Receiver<BotStatus>,
}

#[derive(Default)]
pub struct BotRegistry {
    bots: Mutex<HashMap<String, BotHandle>>,
}

impl BotRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(BotRegistry {
            bots: Mutex::new(HashMap::new()),
        })
    }

    /// 锁内注册，已存在则拒绝
    pub fn register(&self, symbol: &str, handle: BotHandle) -> Result<(), AppError> {
        let mut bots = self.bots.lock().expect("Mutex poisoned");
        if bots.contains_key(symbol) {
            warn!("重复启动被拒绝 symbol={}", symbol);
            return Err(AppError::AlreadyRunning(symbol.to_string()));
        }
        bots.insert(symbol.to_string(), handle);
        info!("循环已注册 symbol={}", symbol);
        Ok(())
    }

    /// 循环退出时自行调用
    pub fn deregister(&self, symbol: &str) {
        let removed = self
            .bots
            .lock()
            .expect("Mutex poisoned")
            .remove(symbol)
            .is_some();
        if removed {
            info!("循环已注销 symbol={}", symbol);
        }
    }

    /// 请求停止：只置标志，不等待
    pub fn stop(&self, symbol: &str) -> Result<(), AppError> {
        let bots = self.bots.lock().expect("Mutex poisoned");
        match bots.get(symbol) {
            Some(handle) => {
                handle.stop_flag.store(true, Ordering::SeqCst);
                info!("已发出停止指令 symbol={}", symbol);
                Ok(())
            }
            None => Err(AppError::NotRunning(symbol.to_string())),
        }
    }

    /// 给所有在跑的循环发停止指令
    pub fn stop_all(&self) {
        let bots = self.bots.lock().expect("Mutex poisoned");
        for (symbol, handle) in bots.iter() {
            handle.stop_flag.store(true, Ordering::SeqCst);
            info!("已发出停止指令 symbol={}", symbol);
        }
    }

    /// 最近一次发布的状态快照
    pub fn status(&self, symbol: &str) -> Option<BotStatus> {
        let bots = self.bots.lock().expect("Mutex poisoned");
        bots.get(symbol).map(|h| h.status_rx.borrow().clone())
    }

    pub fn running(&self) -> Vec<String> {
        let bots = self.bots.lock().expect("Mutex poisoned");
        bots.keys().cloned().collect()
    }

    pub fn is_running(&self, symbol: &str) -> bool {
        self.bots
            .lock()
            .expect("Mutex poisoned")
            .contains_key(symbol)
    }

    pub fn count(&self) -> usize {
        self.bots.lock().expect("Mutex poisoned").len()
    }
}
