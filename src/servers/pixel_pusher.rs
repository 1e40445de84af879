// src/servers/pixel_pusher.rs

//! PixelPusher front-end.
//!
//! The server pretends to be one PixelPusher controller with `height` strips
//! of `width` pixels each. A discovery packet is broadcast once per second so
//! clients can find it; they then send pixel data as UDP packets:
//!
//! ```text
//! sequence:u32, then repeated { strip:u8, width * RGB }
//! ```
//!
//! Strip `s` is row `y = s` of the configured layer.

use super::interface::{wait_for_interface, InterfaceInfo};
use crate::color::Color;
use crate::composite::Compositor;
use crate::config::Config;
use anyhow::{Context, Result};
use log::*;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Leading bytes (after the sequence number) of a command packet.
pub const COMMAND_MAGIC: [u8; 16] = [
    0x40, 0x09, 0x2d, 0xa6, 0x15, 0xa5, 0xdd, 0xe5, 0x6a, 0x9d, 0x4d, 0x5a, 0xcf, 0x09, 0xaf, 0x50,
];

const DEVICE_TYPE_PIXELPUSHER: u8 = 2;
const PROTOCOL_VERSION: u8 = 1;
const VENDOR_ID: u16 = 3;
const HARDWARE_REVISION: u16 = 3;
const SOFTWARE_REVISION: u16 = 122;
const LINK_SPEED: u32 = 10_000_000;
/// Usable payload of one Ethernet frame.
const MAX_PACKET_PAYLOAD: usize = 1460;
const SEQUENCE_LEN: usize = 4;
const DISCOVERY_INTERVAL: Duration = Duration::from_secs(1);
const MAX_DATAGRAM: usize = 65535;

/// The controller announcement broadcast on the discovery port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryPacket {
    pub mac: [u8; 6],
    pub ip: Ipv4Addr,
    pub strips: u8,
    pub pixels_per_strip: u16,
    /// Minimum interval between data packets, in microseconds.
    pub update_period_us: u32,
    pub data_port: u16,
}

impl DiscoveryPacket {
    pub fn new(interface: &InterfaceInfo, width: usize, height: usize, data_port: u16) -> Self {
        DiscoveryPacket {
            mac: interface.mac,
            ip: interface.ipv4.unwrap_or(Ipv4Addr::UNSPECIFIED),
            strips: height.min(u8::MAX as usize) as u8,
            pixels_per_strip: width.min(u16::MAX as usize) as u16,
            update_period_us: 1000,
            data_port,
        }
    }

    /// How many strip records fit in one data packet.
    pub fn max_strips_per_packet(&self) -> u8 {
        let record = 1 + 3 * self.pixels_per_strip as usize;
        let fit = (MAX_PACKET_PAYLOAD - SEQUENCE_LEN) / record;
        fit.clamp(1, self.strips.max(1) as usize) as u8
    }

    /// Serializes the little-endian wire layout: device header, controller
    /// fields, per-strip flags padded to four bytes, then extended fields.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(96);
        // Device header.
        out.extend_from_slice(&self.mac);
        out.extend_from_slice(&self.ip.octets());
        out.push(DEVICE_TYPE_PIXELPUSHER);
        out.push(PROTOCOL_VERSION);
        out.extend_from_slice(&VENDOR_ID.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // product id
        out.extend_from_slice(&HARDWARE_REVISION.to_le_bytes());
        out.extend_from_slice(&SOFTWARE_REVISION.to_le_bytes());
        out.extend_from_slice(&LINK_SPEED.to_le_bytes());

        // Controller.
        out.push(self.strips);
        out.push(self.max_strips_per_packet());
        out.extend_from_slice(&self.pixels_per_strip.to_le_bytes());
        out.extend_from_slice(&self.update_period_us.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // power total
        out.extend_from_slice(&0u32.to_le_bytes()); // delta sequence
        out.extend_from_slice(&0i32.to_le_bytes()); // controller ordinal
        out.extend_from_slice(&0i32.to_le_bytes()); // group ordinal
        out.extend_from_slice(&0u16.to_le_bytes()); // artnet universe
        out.extend_from_slice(&0u16.to_le_bytes()); // artnet channel
        out.extend_from_slice(&self.data_port.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());

        let flag_bytes = (self.strips as usize).max(8);
        out.resize(out.len() + flag_bytes, 0);
        while out.len() % 4 != 0 {
            out.push(0);
        }

        out.extend_from_slice(&0u32.to_le_bytes()); // pusher flags
        out.extend_from_slice(&0u32.to_le_bytes()); // segments
        out.extend_from_slice(&0u32.to_le_bytes()); // power domain
        out.extend_from_slice(&[0; 4]); // last driven ip
        out.extend_from_slice(&0u16.to_le_bytes()); // last driven port
        out
    }
}

/// Applies one data packet to `layer` and presents.
///
/// Returns the number of strip records drawn; command packets and packets
/// without a complete record draw nothing and don't present.
pub fn apply_packet(compositor: &Compositor, layer: usize, packet: &[u8]) -> usize {
    let Some(body) = packet.get(SEQUENCE_LEN..) else {
        return 0;
    };
    if body.starts_with(&COMMAND_MAGIC) {
        debug!("PixelPusher: Ignoring command packet");
        return 0;
    }
    let width = compositor.width();
    let record_len = 1 + 3 * width;
    let records = compositor.update(|stack| {
        let mut records = 0;
        for record in body.chunks_exact(record_len) {
            let y = record[0] as i32;
            let colors = record[1..].chunks_exact(3).filter_map(Color::from_rgb_bytes);
            for (x, color) in colors.enumerate() {
                stack.set_pixel(layer, x as i32, y, color);
            }
            records += 1;
        }
        records
    });
    if records > 0 {
        compositor.present();
    }
    records
}

pub struct PixelPusherServer {
    data_socket: UdpSocket,
    discovery_socket: UdpSocket,
    discovery_target: SocketAddr,
    packet: DiscoveryPacket,
}

/// Threads started by `PixelPusherServer::run_thread`.
pub struct PixelPusherThreads {
    pub discovery: JoinHandle<()>,
    pub receiver: JoinHandle<()>,
}

impl PixelPusherServer {
    /// Waits for the configured interface, then binds the data socket.
    pub fn init(config: &Config) -> Result<Self> {
        let network = &config.network;
        let interface =
            wait_for_interface(&network.interface, config.interface_wait(), Duration::from_secs(1))?;
        let target = SocketAddr::V4(SocketAddrV4::new(
            interface.broadcast_or_global(),
            network.pixel_pusher_discovery_port,
        ));
        Self::bind(
            &interface,
            config.width,
            config.height,
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, network.pixel_pusher_data_port)),
            target,
        )
    }

    pub fn bind(
        interface: &InterfaceInfo,
        width: usize,
        height: usize,
        data_addr: SocketAddr,
        discovery_target: SocketAddr,
    ) -> Result<Self> {
        let data_socket = UdpSocket::bind(data_addr)
            .with_context(|| format!("PixelPusher: Failed to bind data socket {}", data_addr))?;
        let data_port = data_socket.local_addr()?.port();

        let discovery_socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .context("PixelPusher: Failed to create discovery socket")?;
        discovery_socket
            .set_broadcast(true)
            .context("PixelPusher: Failed to enable broadcast")?;

        let packet = DiscoveryPacket::new(interface, width, height, data_port);
        info!(
            "PixelPusher: {} strips x {} pixels on port {}, announcing to {}",
            packet.strips, packet.pixels_per_strip, data_port, discovery_target
        );
        Ok(Self {
            data_socket,
            discovery_socket,
            discovery_target,
            packet,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.data_socket
            .local_addr()
            .context("PixelPusher: local_addr() failed")
    }

    pub fn discovery_packet(&self) -> &DiscoveryPacket {
        &self.packet
    }

    /// Starts the discovery broadcaster and the data receiver.
    pub fn run_thread(self, compositor: Compositor, layer: usize) -> Result<PixelPusherThreads> {
        let PixelPusherServer {
            data_socket,
            discovery_socket,
            discovery_target,
            packet,
        } = self;

        let announcement = packet.to_bytes();
        let discovery = thread::Builder::new()
            .name("ft-pp-discovery".to_string())
            .spawn(move || broadcast_loop(discovery_socket, discovery_target, announcement))
            .context("Failed to spawn PixelPusher discovery thread")?;

        let receiver = thread::Builder::new()
            .name("ft-pixel-pusher".to_string())
            .spawn(move || receive_loop(data_socket, compositor, layer))
            .context("Failed to spawn PixelPusher receiver thread")?;

        Ok(PixelPusherThreads {
            discovery,
            receiver,
        })
    }
}

fn broadcast_loop(socket: UdpSocket, target: SocketAddr, announcement: Vec<u8>) {
    let mut failing = false;
    loop {
        match socket.send_to(&announcement, target) {
            Ok(_) if failing => {
                info!("PixelPusher: Discovery broadcast recovered");
                failing = false;
            }
            Ok(_) => {}
            Err(e) if !failing => {
                warn!("PixelPusher: Discovery broadcast to {} failed: {}", target, e);
                failing = true;
            }
            Err(_) => {}
        }
        thread::sleep(DISCOVERY_INTERVAL);
    }
}

fn receive_loop(socket: UdpSocket, compositor: Compositor, layer: usize) {
    let mut buffer = vec![0u8; MAX_DATAGRAM];
    loop {
        match socket.recv_from(&mut buffer) {
            Ok((len, peer)) => {
                if apply_packet(&compositor, layer, &buffer[..len]) == 0 {
                    trace!("PixelPusher: Nothing drawn from {} byte packet from {}", len, peer);
                }
            }
            Err(e) => {
                error!("PixelPusher: recv_from() failed: {}", e);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composite::LayerStack;
    use crate::display::FrameSink;
    use crate::frame::Frame;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use test_log::test;

    #[derive(Default)]
    struct Counting(Mutex<u32>);

    impl FrameSink for Counting {
        fn submit(&self, _frame: Frame) {
            *self.0.lock() += 1;
        }
    }

    #[test]
    fn it_should_advertise_rows_as_strips() {
        let interface = InterfaceInfo {
            name: "eth0".to_string(),
            ipv4: Some(Ipv4Addr::new(10, 0, 0, 7)),
            broadcast: Some(Ipv4Addr::new(10, 0, 0, 255)),
            mac: [1, 2, 3, 4, 5, 6],
        };
        let packet = DiscoveryPacket::new(&interface, 45, 35, 9897);
        let bytes = packet.to_bytes();

        assert_eq!(&bytes[0..6], &[1, 2, 3, 4, 5, 6]);
        assert_eq!(&bytes[6..10], &[10, 0, 0, 7]);
        assert_eq!(bytes[10], DEVICE_TYPE_PIXELPUSHER);
        assert_eq!(u16::from_le_bytes([bytes[18], bytes[19]]), SOFTWARE_REVISION);
        assert_eq!(bytes[24], 35);
        // 1456 / (1 + 45 * 3) = 10 strips per packet.
        assert_eq!(bytes[25], 10);
        assert_eq!(u16::from_le_bytes([bytes[26], bytes[27]]), 45);
        assert_eq!(u16::from_le_bytes([bytes[52], bytes[53]]), 9897);
        assert_eq!(bytes.len() % 2, 0);
    }

    #[test]
    fn it_should_send_at_least_one_strip_per_packet() {
        let packet = DiscoveryPacket::new(&InterfaceInfo::default(), 1000, 2, 1);
        assert_eq!(packet.max_strips_per_packet(), 1);
    }

    #[test]
    fn it_should_draw_strips_as_rows() {
        let sink = Arc::new(Counting::default());
        let compositor = Compositor::new(LayerStack::new(2, 3, 4).into_shared(), sink.clone());
        let mut packet = vec![0, 0, 0, 1];
        packet.extend_from_slice(&[2, 255, 0, 0, 0, 255, 0]);
        packet.extend_from_slice(&[0, 0, 0, 255, 9, 9, 9]);

        assert_eq!(apply_packet(&compositor, 3, &packet), 2);

        let stack = compositor.layers().lock();
        assert_eq!(stack.layer_pixel(3, 0, 2), Some(Color::RED));
        assert_eq!(stack.layer_pixel(3, 1, 2), Some(Color::GREEN));
        assert_eq!(stack.layer_pixel(3, 0, 0), Some(Color::BLUE));
        assert_eq!(stack.layer_pixel(3, 0, 1), None);
        assert_eq!(*sink.0.lock(), 1);
    }

    #[test]
    fn it_should_ignore_command_packets() {
        let sink = Arc::new(Counting::default());
        let compositor = Compositor::new(LayerStack::new(8, 8, 1).into_shared(), sink.clone());
        let mut packet = vec![0, 0, 0, 9];
        packet.extend_from_slice(&COMMAND_MAGIC);
        packet.resize(4 + 25 * 3, 0);

        assert_eq!(apply_packet(&compositor, 0, &packet), 0);
        assert_eq!(apply_packet(&compositor, 0, &[1, 2]), 0);
        assert!(compositor.layers().lock().is_layer_empty(0));
        assert_eq!(*sink.0.lock(), 0);
    }

    #[test]
    fn it_should_announce_itself_to_the_discovery_target() {
        let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
        listener
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let server = PixelPusherServer::bind(
            &InterfaceInfo::default(),
            4,
            2,
            "127.0.0.1:0".parse().unwrap(),
            listener.local_addr().unwrap(),
        )
        .unwrap();
        let expected = server.discovery_packet().to_bytes();
        let compositor = Compositor::new(
            LayerStack::new(4, 2, 1).into_shared(),
            Arc::new(Counting::default()),
        );

        let _threads = server.run_thread(compositor, 0).unwrap();

        let mut buffer = [0u8; 512];
        let (len, _) = listener.recv_from(&mut buffer).unwrap();
        assert_eq!(&buffer[..len], expected.as_slice());
    }
}
