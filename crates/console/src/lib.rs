//! Operator console for the HarveStar arm.
//!
//! The arm itself sits behind a small HTTP backend. Operators think in their
//! own frame (x across the bench, y away from them) while the firmware has x
//! and y swapped; everything in this crate speaks the operator frame except
//! the bytes that go over the wire.

pub mod config;
pub mod console;
pub mod dispatcher;
pub mod history;
pub mod replay;
pub mod simulator;
pub mod trail;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::{ConfigBuilder, ConsoleConfig};
pub use console::Console;
pub use transport::{ArmTransport, HttpArm, TransportError};
