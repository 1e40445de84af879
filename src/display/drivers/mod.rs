// src/display/drivers/mod.rs
//! Concrete display sinks.

pub mod headless;
pub mod terminal;

pub use headless::{HeadlessMonitor, HeadlessSink};
pub use terminal::TerminalSink;
