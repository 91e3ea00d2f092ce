//! OBD-II Poller
//!
//! Resolves the command catalog once, then repeatedly queries every command,
//! normalizes the answers into one record per cycle and appends it to the
//! JSON Lines log until asked to stop.

mod catalog;
mod controller;
mod cycle;
mod error;

#[cfg(test)]
mod testing;

pub use catalog::{resolve, Catalog, CatalogEntry, CatalogSource};
pub use controller::{LoopState, PollLoop, PollerConfig, RunSummary};
pub use cycle::{execute_cycle, CycleReport, FieldOutcome};
pub use error::PollError;
