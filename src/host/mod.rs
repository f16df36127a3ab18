//! Host-facing command channel for menu-bar and tray shells.

pub mod contract;
pub mod handler;
pub mod stdio;

pub use contract::{CommandEnvelope, CommandName, EventEnvelope, ResponseEnvelope};
pub use handler::HostCommandRouter;
pub use stdio::{run_bridge, run_stdio_bridge};
