//! Refresh scheduling.
//!
//! A fixed-interval tick loop drives the refresh controller; a
//! [`SchedulerHandle`] exposes pause, resume and refresh-now to the binary
//! and the host bridge.

pub mod policy;
pub mod runner;

pub use policy::{ExponentialBackoff, FixedCadence, RetryPolicy};
pub use runner::{Scheduler, SchedulerHandle};
