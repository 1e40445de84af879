// src/display/driver.rs
//! `DisplaySink` - the minimal interface every output medium implements.
//!
//! A sink stages single-pixel writes and flushes one committed frame on
//! `send()`. Concrete sinks live in `display::drivers`; the priority sender in
//! `display::sender` is itself a sink that decorates another one.
//!
//! ## Contract
//! - `width()`/`height()` never change for the lifetime of the sink.
//! - `set_pixel` accepts any coordinates and silently drops writes outside
//!   `[0,width) x [0,height)`. It never fails.
//! - `send` is the only operation allowed to block on I/O.

use crate::color::Color;
use crate::frame::Frame;
use anyhow::Result;

/// An output medium that accepts pixel writes and frame flushes.
pub trait DisplaySink: Send {
    fn width(&self) -> usize;
    fn height(&self) -> usize;

    /// Stages one pixel. Out-of-range coordinates are a no-op.
    fn set_pixel(&mut self, x: i32, y: i32, color: Color);

    /// Flushes the staged pixels as one frame. May block on the medium.
    ///
    /// Errors are reported but callers treat output as best-effort.
    fn send(&mut self) -> Result<()>;
}

impl<S: DisplaySink + ?Sized> DisplaySink for Box<S> {
    fn width(&self) -> usize {
        (**self).width()
    }

    fn height(&self) -> usize {
        (**self).height()
    }

    fn set_pixel(&mut self, x: i32, y: i32, color: Color) {
        (**self).set_pixel(x, y, color)
    }

    fn send(&mut self) -> Result<()> {
        (**self).send()
    }
}

/// Thread-safe hand-off point for composited frames.
///
/// `submit` is called with the shared layer lock held. Implementations must
/// return promptly and never wait on hardware.
pub trait FrameSink: Send + Sync {
    fn submit(&self, frame: Frame);
}

/// Stages every pixel of `frame` into `sink` without flushing.
pub fn stage_frame(sink: &mut dyn DisplaySink, frame: &Frame) {
    for (x, y, color) in frame.iter() {
        sink.set_pixel(x, y, color);
    }
}
