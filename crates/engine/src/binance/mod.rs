//! Binance public market data. Order placement is out of scope; the engine
//! trades through an `ExecutionGateway`.

pub mod stream;

pub use stream::BinanceStream;
