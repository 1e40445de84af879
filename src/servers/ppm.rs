// src/servers/ppm.rs

//! Binary PPM (`P6`) datagrams as sent by FlaschenTaschen clients.
//!
//! ```text
//! P6
//! #FT: <x> <y> <z>        optional; offset and layer
//! <width> <height>
//! 255
//! <width*height*3 RGB bytes>
//! <x> <y> <z>             optional footer; overrides the #FT: comment
//! ```
//!
//! Header tokens are separated by whitespace and `#` comments. Exactly one
//! whitespace byte separates the maxval from the pixel data.

use crate::color::Color;
use std::fmt;

/// Where an image lands: pixel offset plus target layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Offset {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Offset {
    /// Overwrites the components given in `text`, in x, y, z order.
    /// Parsing stops at the first token that isn't an integer.
    fn apply(&mut self, text: &str) {
        let slots = [&mut self.x, &mut self.y, &mut self.z];
        for (slot, token) in slots.into_iter().zip(text.split_whitespace()) {
            match token.parse::<i32>() {
                Ok(value) => *slot = value,
                Err(_) => break,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PpmError {
    /// Does not start with `P6`.
    BadMagic,
    /// A header field is missing or not a number.
    BadHeader(&'static str),
    /// Only 8-bit samples are supported.
    UnsupportedMaxval(u32),
    /// Fewer pixel bytes than the header announced.
    Truncated { expected: usize, got: usize },
}

impl fmt::Display for PpmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PpmError::BadMagic => write!(f, "not a binary PPM (expected P6)"),
            PpmError::BadHeader(field) => write!(f, "missing or invalid {} in PPM header", field),
            PpmError::UnsupportedMaxval(max) => write!(f, "unsupported PPM maxval {}", max),
            PpmError::Truncated { expected, got } => {
                write!(f, "PPM pixel data truncated: expected {} bytes, got {}", expected, got)
            }
        }
    }
}

impl std::error::Error for PpmError {}

/// A parsed datagram borrowing its pixel bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PpmImage<'a> {
    pub width: usize,
    pub height: usize,
    pub offset: Offset,
    rgb: &'a [u8],
}

impl<'a> PpmImage<'a> {
    /// Target layer. Negative `z` maps to a layer that doesn't exist, which
    /// the layer stack ignores.
    pub fn layer(&self) -> usize {
        usize::try_from(self.offset.z).unwrap_or(usize::MAX)
    }

    /// Image pixels in row-major order, positioned by the offset.
    ///
    /// Pixels whose position does not fit in an `i32` are skipped; they could
    /// never land on the display anyway.
    pub fn pixels(&self) -> impl Iterator<Item = (i32, i32, Color)> + '_ {
        let width = self.width.max(1);
        let Offset { x: dx, y: dy, .. } = self.offset;
        self.rgb.chunks_exact(3).enumerate().filter_map(move |(i, rgb)| {
            let x = i32::try_from(i % width).ok()?.checked_add(dx)?;
            let y = i32::try_from(i / width).ok()?.checked_add(dy)?;
            Some((x, y, Color::new(rgb[0], rgb[1], rgb[2])))
        })
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Skips whitespace and comments, picking up `#FT:` offsets on the way.
    fn skip_filler(&mut self, offset: &mut Offset) {
        while let Some(&byte) = self.data.get(self.pos) {
            if byte.is_ascii_whitespace() {
                self.pos += 1;
            } else if byte == b'#' {
                let rest = &self.data[self.pos..];
                let end = rest.iter().position(|&b| b == b'\n').unwrap_or(rest.len());
                let comment = String::from_utf8_lossy(&rest[..end]);
                if let Some(spec) = comment.strip_prefix("#FT:") {
                    offset.apply(spec);
                }
                self.pos += end;
            } else {
                break;
            }
        }
    }

    fn number(&mut self, offset: &mut Offset, field: &'static str) -> Result<u32, PpmError> {
        self.skip_filler(offset);
        let start = self.pos;
        while self.data.get(self.pos).is_some_and(u8::is_ascii_digit) {
            self.pos += 1;
        }
        std::str::from_utf8(&self.data[start..self.pos])
            .ok()
            .and_then(|digits| digits.parse().ok())
            .ok_or(PpmError::BadHeader(field))
    }
}

/// Parses one datagram.
pub fn parse(datagram: &[u8]) -> Result<PpmImage<'_>, PpmError> {
    if !datagram.starts_with(b"P6") {
        return Err(PpmError::BadMagic);
    }
    let mut offset = Offset::default();
    let mut reader = Reader {
        data: datagram,
        pos: 2,
    };

    let width = reader.number(&mut offset, "width")? as usize;
    let height = reader.number(&mut offset, "height")? as usize;
    let maxval = reader.number(&mut offset, "maxval")?;
    if maxval == 0 || maxval > 255 {
        return Err(PpmError::UnsupportedMaxval(maxval));
    }
    match datagram.get(reader.pos) {
        Some(byte) if byte.is_ascii_whitespace() => reader.pos += 1,
        _ => return Err(PpmError::BadHeader("separator after maxval")),
    }

    let expected = width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(3))
        .ok_or(PpmError::BadHeader("dimensions"))?;
    let body = &datagram[reader.pos..];
    if body.len() < expected {
        return Err(PpmError::Truncated {
            expected,
            got: body.len(),
        });
    }
    let (rgb, footer) = body.split_at(expected);
    offset.apply(&String::from_utf8_lossy(footer));

    Ok(PpmImage {
        width,
        height,
        offset,
        rgb,
    })
}
