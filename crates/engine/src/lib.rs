pub mod binance;
pub mod executor;
pub mod journal;
pub mod lifecycle;
pub mod reconcile;

pub use binance::BinanceStream;
pub use executor::{ExecutionCoordinator, ExecutionResult};
pub use journal::{TradeJournal, TradeRecord};
pub use lifecycle::{Engine, EngineHandle, EngineSettings, SymbolEvaluator};
pub use reconcile::{Discrepancy, ReconcileReport};
