// src/composite/mod.rs

//! Layer composition.
//!
//! A fixed number of independent layers share the display's dimensions.
//! Each cell of a layer is either defined (`Some(color)`) or transparent
//! (`None`). Merging scans layers in ascending index order for every output
//! coordinate: the first defined cell wins, so layer 0 is the topmost and a
//! lower index always beats a higher one. Coordinates no layer defines come
//! out black.
//!
//! All layer state sits behind one coarse lock, the `SharedLayers` handle the
//! orchestrator creates and hands to every producer, the reaper and the
//! compositor. Holding the guard is what makes a write or a merge atomic.

pub mod compositor;

pub use compositor::{Compositor, GarbageCollector};

use crate::color::Color;
use crate::frame::{index_in, Frame};
use log::{debug, info};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Output color where no layer defines a pixel.
pub const BACKGROUND: Color = Color::BLACK;

/// The lock every producer, the reaper and the compositor share.
pub type SharedLayers = Arc<Mutex<LayerStack>>;

#[derive(Debug, Clone)]
struct Layer {
    cells: Vec<Option<Color>>,
    last_update: Instant,
    /// Set by any write, reset by `clear`.
    occupied: bool,
}

impl Layer {
    fn new(cell_count: usize, now: Instant) -> Self {
        Layer {
            cells: vec![None; cell_count],
            last_update: now,
            occupied: false,
        }
    }

    fn clear(&mut self) {
        self.cells.fill(None);
        self.occupied = false;
    }
}

#[derive(Debug, Clone)]
pub struct LayerStack {
    width: usize,
    height: usize,
    layers: Vec<Layer>,
}

impl LayerStack {
    /// Creates `layer_count` all-transparent layers of `width x height`.
    pub fn new(width: usize, height: usize, layer_count: usize) -> Self {
        let now = Instant::now();
        LayerStack {
            width,
            height,
            layers: (0..layer_count)
                .map(|_| Layer::new(width * height, now))
                .collect(),
        }
    }

    /// Wraps the stack in the shared lock.
    pub fn into_shared(self) -> SharedLayers {
        Arc::new(Mutex::new(self))
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Defines one cell of `layer` and refreshes the layer's timestamp.
    ///
    /// An unknown layer or out-of-range coordinate leaves everything as is,
    /// timestamp included.
    pub fn set_pixel(&mut self, layer: usize, x: i32, y: i32, color: Color) {
        let Some(index) = index_in(self.width, self.height, x, y) else {
            return;
        };
        let Some(target) = self.layers.get_mut(layer) else {
            return;
        };
        target.cells[index] = Some(color);
        target.occupied = true;
        target.last_update = Instant::now();
    }

    /// Replaces every cell of `layer` with `frame`, all defined.
    ///
    /// Ignored if the layer is unknown or the frame size differs from the
    /// stack's.
    pub fn write_frame(&mut self, layer: usize, frame: &Frame) {
        if !frame.same_size(self.width, self.height) {
            debug!(
                "LayerStack: Ignoring {}x{} frame for {}x{} layers",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            );
            return;
        }
        let Some(target) = self.layers.get_mut(layer) else {
            return;
        };
        for (cell, color) in target.cells.iter_mut().zip(frame.pixels()) {
            *cell = Some(*color);
        }
        target.occupied = true;
        target.last_update = Instant::now();
    }

    /// Makes every cell of `layer` transparent.
    pub fn clear_layer(&mut self, layer: usize) {
        if let Some(target) = self.layers.get_mut(layer) {
            target.clear();
        }
    }

    /// True if `layer` defines no cell (or does not exist).
    pub fn is_layer_empty(&self, layer: usize) -> bool {
        self.layers.get(layer).map_or(true, |l| !l.occupied)
    }

    /// The defined color of one layer cell, if any.
    pub fn layer_pixel(&self, layer: usize, x: i32, y: i32) -> Option<Color> {
        let index = index_in(self.width, self.height, x, y)?;
        self.layers.get(layer)?.cells[index]
    }

    /// Computes the merged frame from the current layer state.
    pub fn merge(&self) -> Frame {
        let mut frame = Frame::new(self.width, self.height);
        self.merge_into(&mut frame);
        frame
    }

    /// Like `merge`, reusing `out`'s allocation when the size matches.
    pub fn merge_into(&self, out: &mut Frame) {
        if !out.same_size(self.width, self.height) {
            *out = Frame::new(self.width, self.height);
        }
        let occupied: Vec<&Layer> = self.layers.iter().filter(|l| l.occupied).collect();
        for (index, pixel) in out.pixels_mut().iter_mut().enumerate() {
            *pixel = occupied
                .iter()
                .find_map(|layer| layer.cells[index])
                .unwrap_or(BACKGROUND);
        }
    }

    /// Clears every occupied layer idle for longer than `timeout` as of `now`.
    ///
    /// Returns how many layers were cleared.
    pub fn expire_idle(&mut self, now: Instant, timeout: Duration) -> usize {
        let mut expired = 0;
        for (index, layer) in self.layers.iter_mut().enumerate() {
            if !layer.occupied {
                continue;
            }
            let idle = now.saturating_duration_since(layer.last_update);
            if idle > timeout {
                info!(
                    "LayerStack: Layer {} idle for {:.1}s; clearing",
                    index,
                    idle.as_secs_f64()
                );
                layer.clear();
                expired += 1;
            }
        }
        expired
    }
}

#[cfg(test)]
mod tests;
