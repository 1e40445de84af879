// src/servers/udp.rs

//! FlaschenTaschen UDP front-end. One PPM image per datagram.

use super::ppm;
use crate::composite::Compositor;
use anyhow::{Context, Result};
use log::*;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

/// Largest possible UDP payload.
const MAX_DATAGRAM: usize = 65535;

pub struct UdpServer {
    socket: UdpSocket,
}

impl UdpServer {
    /// Binds on all interfaces. Done before daemonizing so a busy port is
    /// reported on the terminal.
    pub fn bind(port: u16) -> Result<Self> {
        Self::bind_addr(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
    }

    pub fn bind_addr(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .with_context(|| format!("UdpServer: Failed to bind {}", addr))?;
        info!("UdpServer: Listening on {}", socket.local_addr()?);
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .context("UdpServer: local_addr() failed")
    }

    /// Serves datagrams forever. Only returns on a socket error.
    pub fn run_blocking(self, compositor: &Compositor) -> Result<()> {
        let mut buffer = vec![0u8; MAX_DATAGRAM];
        loop {
            let (len, peer) = self
                .socket
                .recv_from(&mut buffer)
                .context("UdpServer: recv_from() failed")?;
            if !handle_datagram(compositor, &buffer[..len]) {
                debug!("UdpServer: Discarded {} byte datagram from {}", len, peer);
            }
        }
    }
}

/// Applies one datagram and presents. Returns false if it was discarded.
pub fn handle_datagram(compositor: &Compositor, datagram: &[u8]) -> bool {
    let image = match ppm::parse(datagram) {
        Ok(image) => image,
        Err(e) => {
            debug!("UdpServer: {}", e);
            return false;
        }
    };
    let layer = image.layer();
    trace!(
        "UdpServer: {}x{} image at {:?}",
        image.width,
        image.height,
        image.offset
    );
    compositor.update(|stack| {
        for (x, y, color) in image.pixels() {
            stack.set_pixel(layer, x, y, color);
        }
    });
    compositor.present();
    true
}
