// src/servers/opc.rs

//! OpenPixelControl TCP front-end.
//!
//! Each message is `channel:u8 command:u8 length:u16be` followed by `length`
//! data bytes. Only command 0 (set pixel colours) is acted on: pixel `i` goes
//! to `(i % width, i / width)` on the configured layer. Every connection gets
//! its own thread and messages on it are applied in order.

use crate::color::Color;
use crate::composite::Compositor;
use crate::frame::Frame;
use anyhow::{Context, Result};
use log::*;
use std::fmt;
use std::io::{self, Read};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};

pub const CMD_SET_PIXEL_COLOURS: u8 = 0;

const HEADER_LEN: usize = 4;

#[derive(Debug)]
pub enum OpcError {
    Io(io::Error),
    /// The peer hung up in the middle of a message.
    Truncated { expected: usize, got: usize },
}

impl fmt::Display for OpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpcError::Io(e) => write!(f, "OPC connection error: {}", e),
            OpcError::Truncated { expected, got } => {
                write!(f, "OPC message truncated: expected {} bytes, got {}", expected, got)
            }
        }
    }
}

impl std::error::Error for OpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OpcError::Io(e) => Some(e),
            OpcError::Truncated { .. } => None,
        }
    }
}

impl From<io::Error> for OpcError {
    fn from(e: io::Error) -> Self {
        OpcError::Io(e)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpcMessage {
    pub channel: u8,
    pub command: u8,
    pub data: Vec<u8>,
}

impl OpcMessage {
    /// Reads the next message. `Ok(None)` on a clean end of stream.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Option<Self>, OpcError> {
        let mut header = [0u8; HEADER_LEN];
        let got = read_full(reader, &mut header)?;
        if got == 0 {
            return Ok(None);
        }
        if got < HEADER_LEN {
            return Err(OpcError::Truncated {
                expected: HEADER_LEN,
                got,
            });
        }
        let len = u16::from_be_bytes([header[2], header[3]]) as usize;
        let mut data = vec![0u8; len];
        let got = read_full(reader, &mut data)?;
        if got < len {
            return Err(OpcError::Truncated { expected: len, got });
        }
        Ok(Some(OpcMessage {
            channel: header[0],
            command: header[1],
            data,
        }))
    }

    /// The RGB triplets of a set-pixel-colours message.
    pub fn colors(&self) -> impl Iterator<Item = Color> + '_ {
        self.data.chunks_exact(3).filter_map(Color::from_rgb_bytes)
    }
}

/// Like `read_exact`, but reports how much arrived before end of stream.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

pub struct OpcServer {
    listener: TcpListener,
}

impl OpcServer {
    pub fn bind(port: u16) -> Result<Self> {
        Self::bind_addr(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
    }

    pub fn bind_addr(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .with_context(|| format!("OpcServer: Failed to bind {}", addr))?;
        info!("OpcServer: Listening on {}", listener.local_addr()?);
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("OpcServer: local_addr() failed")
    }

    /// Accepts connections on a background thread, drawing into `layer`.
    pub fn run_thread(self, compositor: Compositor, layer: usize) -> Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("ft-opc".to_string())
            .spawn(move || self.accept_loop(compositor, layer))
            .context("Failed to spawn OPC server thread")
    }

    fn accept_loop(self, compositor: Compositor, layer: usize) {
        for stream in self.listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("OpcServer: accept() failed: {}", e);
                    continue;
                }
            };
            let peer = stream
                .peer_addr()
                .map_or_else(|_| "unknown peer".to_string(), |a| a.to_string());
            let compositor = compositor.clone();
            let spawned = thread::Builder::new()
                .name("ft-opc-conn".to_string())
                .spawn(move || {
                    info!("OpcServer: Connection from {}", peer);
                    match serve_connection(stream, &compositor, layer) {
                        Ok(messages) => {
                            info!("OpcServer: {} closed after {} messages", peer, messages)
                        }
                        Err(e) => warn!("OpcServer: {}: {}", peer, e),
                    }
                });
            if let Err(e) = spawned {
                error!("OpcServer: Failed to spawn connection thread: {}", e);
            }
        }
    }
}

/// Serves one client until it disconnects. Returns the number of messages.
pub fn serve_connection(
    mut stream: TcpStream,
    compositor: &Compositor,
    layer: usize,
) -> Result<u64, OpcError> {
    let _ = stream.set_nodelay(true);
    let mut messages = 0;
    while let Some(message) = OpcMessage::read_from(&mut stream)? {
        apply_message(compositor, layer, &message);
        messages += 1;
    }
    Ok(messages)
}

/// Draws one message into `layer` and presents.
pub fn apply_message(compositor: &Compositor, layer: usize, message: &OpcMessage) {
    if message.command != CMD_SET_PIXEL_COLOURS {
        trace!("OpcServer: Ignoring command {}", message.command);
        return;
    }
    let (width, height) = (compositor.width(), compositor.height());
    let pixel_count = message.data.len() / 3;

    if width > 0 && pixel_count >= width * height {
        let mut frame = Frame::new(width, height);
        for (pixel, color) in frame.pixels_mut().iter_mut().zip(message.colors()) {
            *pixel = color;
        }
        compositor.write_frame(layer, &frame);
    } else {
        let width = width.max(1);
        compositor.update(|stack| {
            for (i, color) in message.colors().enumerate() {
                stack.set_pixel(layer, (i % width) as i32, (i / width) as i32, color);
            }
        });
    }
    compositor.present();
}
