//! 实盘控制循环
//!
//! 每个品种一个独立任务：注册中心负责生命周期（同品种只允许
//! 一个循环），runner按tick拉行情、评估规则、经由资源协调器
//! 下单平仓。状态机只有四档，外部只能看watch快照。

pub mod registry;
pub mod runner;
pub mod sizing;
pub mod state;

pub use registry::{BotHandle, BotRegistry};
pub use runner::{spawn_bot, BotConfig, SymbolBot};
pub use sizing::lot_for_risk;
pub use state::{BotState, BotStatus, OpenPosition};
