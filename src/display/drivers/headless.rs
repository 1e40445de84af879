// src/display/drivers/headless.rs

//! Headless in-memory display sink.
//!
//! Keeps the staged pixels in a `Frame` and, on `send()`, publishes a copy to
//! a shared monitor. An optional flush delay stands in for a slow hardware
//! bus. Used by `--backend headless`, the speed test and the test suites.

use crate::color::Color;
use crate::display::driver::DisplaySink;
use crate::frame::Frame;
use anyhow::Result;
use log::trace;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Default)]
struct Flushed {
    count: u64,
    last: Option<Frame>,
}

/// Read-only view of what a `HeadlessSink` has flushed, usable from other
/// threads after the sink itself has been moved away.
#[derive(Debug, Clone, Default)]
pub struct HeadlessMonitor {
    flushed: Arc<Mutex<Flushed>>,
}

impl HeadlessMonitor {
    pub fn flush_count(&self) -> u64 {
        self.flushed.lock().count
    }

    pub fn last_frame(&self) -> Option<Frame> {
        self.flushed.lock().last.clone()
    }
}

pub struct HeadlessSink {
    staging: Frame,
    flush_delay: Duration,
    monitor: HeadlessMonitor,
}

impl HeadlessSink {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            staging: Frame::new(width, height),
            flush_delay: Duration::ZERO,
            monitor: HeadlessMonitor::default(),
        }
    }

    /// Makes every `send()` take at least `delay`.
    pub fn with_flush_delay(mut self, delay: Duration) -> Self {
        self.flush_delay = delay;
        self
    }

    pub fn monitor(&self) -> HeadlessMonitor {
        self.monitor.clone()
    }
}

impl DisplaySink for HeadlessSink {
    fn width(&self) -> usize {
        self.staging.width()
    }

    fn height(&self) -> usize {
        self.staging.height()
    }

    fn set_pixel(&mut self, x: i32, y: i32, color: Color) {
        self.staging.set(x, y, color);
    }

    fn send(&mut self) -> Result<()> {
        if !self.flush_delay.is_zero() {
            thread::sleep(self.flush_delay);
        }
        let mut flushed = self.monitor.flushed.lock();
        flushed.count += 1;
        flushed.last = Some(self.staging.clone());
        trace!("HeadlessSink: flushed frame #{}", flushed.count);
        Ok(())
    }
}
