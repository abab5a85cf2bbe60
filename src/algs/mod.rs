//! Communication layer: communicators, wire encoding, collectives and
//! precomputed exchange plans.

pub mod collective;
pub mod communicator;
pub mod exchange;
pub mod wire;

pub use communicator::{CommTag, Communicator, LocalComm, NoComm};
pub use exchange::{CommRequest, Direction, ExchangePlan, PendingExchange};
