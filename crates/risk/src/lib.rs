pub mod admission;
pub mod config;
pub mod ledger;
pub mod lifecycle;
pub mod manager;
pub mod modes;

pub use admission::{AdmissionController, PortfolioLimits, MAX_OPEN_POSITIONS};
pub use config::{RiskConfig, RiskFileConfig};
pub use ledger::{FillOutcome, PortfolioLedger, Reservation};
pub use lifecycle::{close_quantity, evaluate, PriceTick, TickOutcome};
pub use manager::{OpenOutcome, RiskManager};
pub use modes::{Mode, ModeConfig, ModeRegistry, StopPolicy};
