// src/composite/compositor.rs
//! Compositor - turns the shared layer state into frames for the output.
//!
//! Locking discipline:
//! - Writes and merges happen with the `SharedLayers` guard held.
//! - The merged frame is handed to the `FrameSink` before the guard is
//!   released, so frames reach the sink in merge order. `FrameSink::submit`
//!   only swaps a slot; hardware I/O happens on the sender's own thread.
//!
//! The `GarbageCollector` is a background thread that wakes on a fixed tick,
//! takes the same lock, and clears layers nobody has written for longer than
//! the timeout. Producers that vanish without saying goodbye simply age out.

use super::{LayerStack, SharedLayers};
use crate::color::Color;
use crate::display::FrameSink;
use crate::frame::Frame;

use anyhow::{Context, Result};
use log::*;
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Cheap to clone; every protocol thread gets its own copy.
#[derive(Clone)]
pub struct Compositor {
    layers: SharedLayers,
    output: Arc<dyn FrameSink>,
    width: usize,
    height: usize,
}

impl Compositor {
    pub fn new(layers: SharedLayers, output: Arc<dyn FrameSink>) -> Self {
        let (width, height) = {
            let stack = layers.lock();
            (stack.width(), stack.height())
        };
        Compositor {
            layers,
            output,
            width,
            height,
        }
    }

    pub fn layers(&self) -> &SharedLayers {
        &self.layers
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Runs `apply` with the layer lock held and returns its result.
    ///
    /// Everything a single wire message changes should go through one call so
    /// a concurrent merge sees all of it or none of it.
    pub fn update<R>(&self, apply: impl FnOnce(&mut LayerStack) -> R) -> R {
        let mut stack = self.layers.lock();
        apply(&mut stack)
    }

    /// Locks, writes one pixel, unlocks. Does not present.
    pub fn set_pixel(&self, layer: usize, x: i32, y: i32, color: Color) {
        self.layers.lock().set_pixel(layer, x, y, color);
    }

    /// Locks, replaces one layer, unlocks. Does not present.
    pub fn write_frame(&self, layer: usize, frame: &Frame) {
        self.layers.lock().write_frame(layer, frame);
    }

    /// Merges and submits under the lock.
    ///
    /// A merge that sees newer layer state can never be overtaken by an
    /// older one on its way to the sink.
    pub fn present(&self) {
        let stack = self.layers.lock();
        self.output.submit(stack.merge());
    }

    /// Starts the reaper. Layers idle for longer than `timeout` are cleared on
    /// the next tick; the display is refreshed whenever something expired.
    pub fn start_garbage_collection(
        &self,
        timeout: Duration,
        tick: Duration,
    ) -> Result<GarbageCollector> {
        GarbageCollector::spawn(self.clone(), timeout, tick)
    }
}

/// Handle to the reaper thread. Dropping it stops and joins the thread.
pub struct GarbageCollector {
    stop_tx: Option<Sender<()>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl GarbageCollector {
    fn spawn(compositor: Compositor, timeout: Duration, tick: Duration) -> Result<Self> {
        let (stop_tx, stop_rx) = channel::<()>();

        let thread_handle = thread::Builder::new()
            .name("ft-layer-gc".to_string())
            .spawn(move || {
                info!(
                    "GarbageCollector: Started (timeout {:?}, tick {:?})",
                    timeout, tick
                );
                loop {
                    match stop_rx.recv_timeout(tick) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    let expired = compositor
                        .layers
                        .lock()
                        .expire_idle(Instant::now(), timeout);
                    if expired > 0 {
                        compositor.present();
                    }
                }
                debug!("GarbageCollector: Thread exiting");
            })
            .context("Failed to spawn layer garbage collection thread")?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            thread_handle: Some(thread_handle),
        })
    }
}

impl Drop for GarbageCollector {
    fn drop(&mut self) {
        self.stop_tx.take();
        if let Some(handle) = self.thread_handle.take() {
            if let Err(e) = handle.join() {
                error!("GarbageCollector thread panicked: {:?}", e);
            }
        }
    }
}
