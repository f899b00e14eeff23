pub mod back_test_log;
pub mod strategy_store;
