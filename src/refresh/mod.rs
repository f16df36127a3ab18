//! Refresh cycles: the single-flight controller and its records.

pub mod controller;
pub mod cycle;

pub use controller::{Gateways, RefreshController};
pub use cycle::{CycleResult, CycleStatus, RefreshCycle, RefreshStatus, Stage, Trigger};
