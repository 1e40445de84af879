// src/frame.rs

//! `Frame` is a fully-defined grid of colors.
//!
//! It is what a merge produces, what the priority sender keeps in its pending
//! slot, and what bulk layer writes carry. Every cell has a color; frames have
//! no notion of transparency.

use crate::color::Color;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: usize,
    height: usize,
    pixels: Vec<Color>,
}

impl Frame {
    /// Creates an all-black frame.
    pub fn new(width: usize, height: usize) -> Self {
        Self::filled(width, height, Color::BLACK)
    }

    pub fn filled(width: usize, height: usize, color: Color) -> Self {
        Frame {
            width,
            height,
            pixels: vec![color; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[Color] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [Color] {
        &mut self.pixels
    }

    /// Maps signed coordinates to a row-major index, or `None` when outside
    /// `[0,width) x [0,height)`.
    pub fn index_of(&self, x: i32, y: i32) -> Option<usize> {
        index_in(self.width, self.height, x, y)
    }

    pub fn get(&self, x: i32, y: i32) -> Option<Color> {
        self.index_of(x, y).map(|i| self.pixels[i])
    }

    /// Sets one pixel. Out-of-range coordinates are ignored.
    pub fn set(&mut self, x: i32, y: i32, color: Color) {
        if let Some(i) = self.index_of(x, y) {
            self.pixels[i] = color;
        }
    }

    /// Iterates `(x, y, color)` in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (i32, i32, Color)> + '_ {
        let width = self.width.max(1);
        self.pixels
            .iter()
            .enumerate()
            .map(move |(i, c)| ((i % width) as i32, (i / width) as i32, *c))
    }

    pub fn same_size(&self, width: usize, height: usize) -> bool {
        self.width == width && self.height == height
    }
}

/// Shared bounds check for every grid in the crate.
pub(crate) fn index_in(width: usize, height: usize, x: i32, y: i32) -> Option<usize> {
    if x < 0 || y < 0 {
        return None;
    }
    let (x, y) = (x as usize, y as usize);
    if x >= width || y >= height {
        return None;
    }
    Some(y * width + x)
}
