//! Ledger entities, value objects and the ports the application layer depends on.
//!
//! Nothing in here performs I/O. Transition methods on the entities check
//! their preconditions and leave the entity untouched when they fail.

pub mod alert;
pub mod booking;
pub mod event;
pub mod ledger;
pub mod money;
pub mod order;
pub mod payout;
pub mod ports;
pub mod settlement;
pub mod tip;
