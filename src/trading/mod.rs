pub mod backtest;
pub mod bot;
pub mod coordinator;
pub mod indicator;
pub mod model;
pub mod mt5;
pub mod scorer;
pub mod strategy;
pub mod translator;
