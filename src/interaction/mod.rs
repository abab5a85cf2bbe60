//! The interpolation / spreading pipeline.

pub mod config;
pub mod interaction_base;
pub mod quadrature;
pub mod transaction;

pub use config::InteractionConfig;
pub use interaction_base::{HandlerEntry, InteractionBase};
pub use quadrature::{Quadrature, QuadratureFamily};
pub use transaction::{Operation, OverlapData, Transaction, TransactionState};
