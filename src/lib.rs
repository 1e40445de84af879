// src/lib.rs
//! FlaschenTaschen display server.
//!
//! Network clients draw into independent, z-ordered layers of a shared
//! pixel grid. The layers are merged into one frame (layer 0 on top) and
//! handed to a priority sender, which flushes the latest frame to the
//! display from its own real-time thread.

pub mod color;
pub mod composite;
pub mod config;
pub mod display;
pub mod frame;
pub mod lifecycle;
pub mod orchestrator;
pub mod servers;
