pub mod price_stream;

pub use price_stream::run_quote_stream;
