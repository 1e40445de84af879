// src/servers/mod.rs
//! Network front-ends.
//!
//! Each front-end decodes its wire format into layer writes on a
//! `Compositor` and presents after every complete message:
//! - `udp`: FlaschenTaschen PPM datagrams, always on
//! - `opc`: OpenPixelControl over TCP
//! - `pixel_pusher`: PixelPusher discovery and strip data over UDP
//!
//! Sockets are bound up front, before the process detaches, so that a port
//! already in use is reported on the terminal.

pub mod interface;
pub mod opc;
pub mod pixel_pusher;
pub mod ppm;
pub mod udp;

pub use opc::OpcServer;
pub use pixel_pusher::PixelPusherServer;
pub use udp::UdpServer;
