// src/display/mod.rs
//! Display output.
//!
//! - DisplaySink: what every output medium implements (terminal, headless)
//! - PrioritySender: sink decorator that flushes on its own real-time thread
//! - FrameSink: where the compositor hands finished frames

pub mod driver;
pub mod drivers;
pub mod sender;

pub use driver::{stage_frame, DisplaySink, FrameSink};
pub use drivers::{HeadlessMonitor, HeadlessSink, TerminalSink};
pub use sender::{PrioritySender, SenderHandle, SenderStats};
