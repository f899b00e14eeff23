pub mod algo_trade;
