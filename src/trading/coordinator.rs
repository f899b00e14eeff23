//! 执行通道资源协调器
//!
//! MT5终端会话不可重入：同一时刻只能有一个调用在飞行中，
//! 否则终端侧会串话。所有实例共享一个协调器，通过tokio的
//! 公平Mutex排队，先到先得，不会饿死等待方。

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{Mutex, Semaphore};
use tracing::debug;

use super::mt5::model::{AccountInfo, PositionInfo, Quote, SymbolInfo};
use super::mt5::{MarketExecutor, Mt5Error};
use crate::CandleItem;

/// 串行化终端会话访问的协调器
pub struct ResourceCoordinator {
    executor: Arc<dyn MarketExecutor>,
    // 门锁本身不保护数据，只保证同一时刻只有一个调用持有会话
    gate: Mutex<()>,
}

impl ResourceCoordinator {
    pub fn new(executor: Arc<dyn MarketExecutor>) -> Arc<Self> {
        Arc::new(ResourceCoordinator {
            executor,
            gate: Mutex::new(()),
        })
    }

    /// 通道名称（不需要排队）
    pub fn channel_name(&self) -> &'static str {
        self.executor.name()
    }

    /// 在门锁内执行一段对终端的访问
    ///
    /// 闭包持有期间整个执行通道被独占，适合下单这类多步调用
    /// 必须连续完成的场景。只把真正需要终端的步骤放进来，
    /// 计算放在外面。
    pub async fn execute<T, F>(&self, op: F) -> Result<T, Mt5Error>
    where
        F: for<'a> FnOnce(&'a dyn MarketExecutor) -> BoxFuture<'a, Result<T, Mt5Error>>,
    {
        let _guard = self.gate.lock().await;
        debug!("channel={} 获得执行通道", self.executor.name());
        op(self.executor.as_ref()).await
    }

    // 单步调用的便捷封装，同样走门锁排队

    pub async fn quote(&self, symbol: &str) -> Result<Quote, Mt5Error> {
        let _guard = self.gate.lock().await;
        self.executor.quote(symbol).await
    }

    pub async fn candles(
        &self,
        symbol: &str,
        timeframe: &str,
        count: usize,
    ) -> Result<Vec<CandleItem>, Mt5Error> {
        let _guard = self.gate.lock().await;
        self.executor.candles(symbol, timeframe, count).await
    }

    pub async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, Mt5Error> {
        let _guard = self.gate.lock().await;
        self.executor.symbol_info(symbol).await
    }

    pub async fn account_info(&self) -> Result<AccountInfo, Mt5Error> {
        let _guard = self.gate.lock().await;
        self.executor.account_info().await
    }

    pub async fn open_positions(&self) -> Result<Vec<PositionInfo>, Mt5Error> {
        let _guard = self.gate.lock().await;
        self.executor.open_positions().await
    }
}

/// 有界后台任务池
///
/// 推送类订阅者处理慢时不能阻塞行情主流程，饱和时直接丢弃，
/// 用信号量限制同时在飞的转发任务数。
pub struct OffloadPool {
    semaphore: Arc<Semaphore>,
}

impl OffloadPool {
    pub fn new(max_concurrent: usize) -> Self {
        OffloadPool {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// 尝试投递一个后台任务，池满返回false并丢弃
    pub fn try_spawn<F>(&self, fut: F) -> bool
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => {
                tokio::spawn(async move {
                    fut.await;
                    drop(permit);
                });
                true
            }
            Err(_) => {
                debug!("后台任务池已满，丢弃本次投递");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_offload_pool_rejects_when_full() {
        let pool = OffloadPool::new(1);
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        assert!(pool.try_spawn(async move {
            let _ = rx.await;
        }));
        // 第一个任务还挂着，池满
        assert!(!pool.try_spawn(async {}));
        let _ = tx.send(());
    }

    #[tokio::test]
    async fn test_offload_pool_releases_permit() {
        let pool = OffloadPool::new(1);
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        assert!(pool.try_spawn(async move {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        // 等第一个任务结束释放许可
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(pool.try_spawn(async {}));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
