// src/display/drivers/terminal.rs

//! Truecolor terminal sink.
//!
//! The whole screen is one pre-rendered escape-sequence buffer. Each character
//! cell carries two vertically stacked pixels: the upper one as the foreground
//! color and the lower one as the background color of a half-block glyph.
//! Every pixel's color digits sit at a fixed byte offset that is computed once,
//! so `set_pixel` only overwrites eleven bytes in place and `send` is a single
//! `write_all` of the buffer.

use crate::color::Color;
use crate::display::driver::DisplaySink;
use crate::frame::index_in;

use anyhow::{Context, Result};
use log::{debug, warn};
use once_cell::sync::Lazy;
use std::io::{self, Write};
use std::time::{Duration, Instant};

const SCREEN_CLEAR: &[u8] = b"\x1bc";
const SCREEN_PREFIX: &str = "\x1b[48;2;0;0;0m";
const SCREEN_POSTFIX: &str = "\x1b[0m";
const CURSOR_OFF: &[u8] = b"\x1b[?25l";
const CURSOR_ON: &[u8] = b"\x1b[?25h";

// Upper half filled: foreground paints the top pixel, background the bottom.
const PIXEL_CHARACTER: &str = "\u{2580}";
const TOP_PIXEL_COLOR: &str = "\x1b[38;2;";
const BOTTOM_PIXEL_COLOR: &str = "\x1b[48;2;";

/// `rrr;ggg;bbb` - three zero-padded decimal channels.
const COLOR_DIGITS_LEN: usize = 11;
const BLACK_DIGITS: &str = "000;000;000";

const FPS_PLACEHOLDER: &[u8] = b"___________";
const FPS_MIN_INTERVAL: Duration = Duration::from_micros(500);
const FPS_MAX_INTERVAL: Duration = Duration::from_secs(10);

/// One black character cell, as laid out in the buffer.
static BLACK_CELL: Lazy<String> = Lazy::new(|| {
    format!(
        "{}{}m{}{}m{}",
        TOP_PIXEL_COLOR, BLACK_DIGITS, BOTTOM_PIXEL_COLOR, BLACK_DIGITS, PIXEL_CHARACTER
    )
});

pub struct TerminalSink<W: Write + Send = io::Stdout> {
    out: W,
    width: usize,
    height: usize,
    buffer: Vec<u8>,
    /// Byte offset of each pixel's color digits, row-major.
    digit_offsets: Vec<usize>,
    fps_offset: usize,
    started: bool,
    last_send: Option<Instant>,
}

impl TerminalSink<io::Stdout> {
    pub fn stdout(width: usize, height: usize) -> Self {
        Self::new(io::stdout(), width, height)
    }
}

impl<W: Write + Send> TerminalSink<W> {
    /// Builds the screen buffer for a `width x height` pixel display.
    ///
    /// The height is rounded up to the next even number, since each text row
    /// holds two pixel rows.
    pub fn new(out: W, width: usize, height: usize) -> Self {
        let height = (height + 1) & !1;
        let text_rows = height / 2;
        let cell_len = BLACK_CELL.len();

        let mut buffer =
            Vec::with_capacity(SCREEN_PREFIX.len() + text_rows * (width * cell_len + 1) + 64);
        buffer.extend_from_slice(SCREEN_PREFIX.as_bytes());
        let initial_offset = buffer.len();
        for _ in 0..text_rows {
            for _ in 0..width {
                buffer.extend_from_slice(BLACK_CELL.as_bytes());
            }
            buffer.push(b'\n');
        }
        buffer.extend_from_slice(SCREEN_POSTFIX.as_bytes());

        let fps_offset = buffer.len();
        buffer.extend_from_slice(FPS_PLACEHOLDER);
        buffer.extend_from_slice(b"\n\n");
        // Back to the top so the next frame overdraws this one.
        buffer.extend_from_slice(format!("\x1b[{}A", text_rows + 2).as_bytes());

        let lower_pixel_offset = COLOR_DIGITS_LEN + 1 + BOTTOM_PIXEL_COLOR.len();
        let digit_offsets = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| {
                let text_row = y / 2;
                initial_offset
                    + (width * text_row + x) * cell_len
                    + TOP_PIXEL_COLOR.len()
                    + (y % 2) * lower_pixel_offset
                    + text_row // one newline per text row
            })
            .collect();

        debug!(
            "TerminalSink: {}x{} pixels, {} byte screen buffer",
            width,
            height,
            buffer.len()
        );

        TerminalSink {
            out,
            width,
            height,
            buffer,
            digit_offsets,
            fps_offset,
            started: false,
            last_send: None,
        }
    }

    /// The escape-sequence buffer exactly as the next `send` would write it
    /// (minus the frame-rate readout, which `send` refreshes).
    pub fn screen_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Byte offset of the color digits for pixel `(x, y)`.
    pub fn digit_offset(&self, x: i32, y: i32) -> Option<usize> {
        index_in(self.width, self.height, x, y).map(|i| self.digit_offsets[i])
    }

    fn update_fps(&mut self, now: Instant) {
        let region = &mut self.buffer[self.fps_offset..self.fps_offset + FPS_PLACEHOLDER.len()];
        let interval = self.last_send.map(|last| now.saturating_duration_since(last));
        match interval {
            Some(d) if d > FPS_MIN_INTERVAL && d < FPS_MAX_INTERVAL => {
                let text = format!("{:7.1} fps", 1.0 / d.as_secs_f64());
                let text = text.as_bytes();
                let n = text.len().min(region.len());
                region[..n].copy_from_slice(&text[..n]);
                region[n..].fill(b' ');
            }
            _ => region.copy_from_slice(FPS_PLACEHOLDER),
        }
        self.last_send = Some(now);
    }
}

fn write_color_digits(dst: &mut [u8], color: Color) {
    for (digits, value) in dst.chunks_mut(4).zip([color.r, color.g, color.b]) {
        digits[0] = b'0' + value / 100;
        digits[1] = b'0' + value / 10 % 10;
        digits[2] = b'0' + value % 10;
    }
}

impl<W: Write + Send> DisplaySink for TerminalSink<W> {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn set_pixel(&mut self, x: i32, y: i32, color: Color) {
        if let Some(offset) = self.digit_offset(x, y) {
            write_color_digits(&mut self.buffer[offset..offset + COLOR_DIGITS_LEN], color);
        }
    }

    fn send(&mut self) -> Result<()> {
        if !self.started {
            self.out
                .write_all(SCREEN_CLEAR)
                .and_then(|_| self.out.write_all(CURSOR_OFF))
                .context("TerminalSink: Failed to prepare screen")?;
            self.started = true;
        }
        self.update_fps(Instant::now());
        self.out
            .write_all(&self.buffer)
            .context("TerminalSink: Failed to write frame")?;
        self.out
            .flush()
            .context("TerminalSink: Failed to flush frame")
    }
}

impl<W: Write + Send> Drop for TerminalSink<W> {
    fn drop(&mut self) {
        if !self.started {
            return;
        }
        let restored = self
            .out
            .write_all(SCREEN_CLEAR)
            .and_then(|_| self.out.write_all(CURSOR_ON))
            .and_then(|_| self.out.flush());
        if let Err(e) = restored {
            warn!("TerminalSink: Failed to restore terminal on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests;
