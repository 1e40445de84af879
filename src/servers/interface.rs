// src/servers/interface.rs

//! Network interface lookup for PixelPusher discovery.

use anyhow::{anyhow, Context, Result};
use log::*;
use nix::ifaddrs::getifaddrs;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::thread;
use std::time::{Duration, Instant};

/// What discovery needs to know about the interface it advertises on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InterfaceInfo {
    pub name: String,
    pub ipv4: Option<Ipv4Addr>,
    pub broadcast: Option<Ipv4Addr>,
    pub mac: [u8; 6],
}

impl InterfaceInfo {
    /// Where discovery packets go: the interface broadcast address, or the
    /// limited broadcast address if the interface has none.
    pub fn broadcast_or_global(&self) -> Ipv4Addr {
        self.broadcast.unwrap_or(Ipv4Addr::BROADCAST)
    }
}

/// Snapshot of `name`'s addresses. `None` if no such interface exists.
pub fn lookup(name: &str) -> Result<Option<InterfaceInfo>> {
    let mut found: Option<InterfaceInfo> = None;
    for ifaddr in getifaddrs().context("getifaddrs() failed")? {
        if ifaddr.interface_name != name {
            continue;
        }
        let info = found.get_or_insert_with(|| InterfaceInfo {
            name: name.to_string(),
            ..InterfaceInfo::default()
        });
        let Some(address) = ifaddr.address else {
            continue;
        };
        if let Some(sin) = address.as_sockaddr_in() {
            info.ipv4 = Some(*SocketAddrV4::from(*sin).ip());
            info.broadcast = ifaddr
                .broadcast
                .as_ref()
                .and_then(|b| b.as_sockaddr_in())
                .map(|b| *SocketAddrV4::from(*b).ip());
        } else if let Some(mac) = address.as_link_addr().and_then(|link| link.addr()) {
            info.mac = mac;
        }
    }
    Ok(found)
}

/// Polls until `name` has an IPv4 address, for at most `limit`.
///
/// An empty name means "don't wait" and yields an unbound interface that
/// broadcasts to 255.255.255.255.
pub fn wait_for_interface(name: &str, limit: Duration, poll: Duration) -> Result<InterfaceInfo> {
    if name.is_empty() {
        return Ok(InterfaceInfo::default());
    }
    let deadline = Instant::now() + limit;
    let mut announced = false;
    loop {
        match lookup(name)? {
            Some(info) if info.ipv4.is_some() => {
                info!(
                    "Interface: {} is up at {}",
                    name,
                    info.ipv4.map_or_else(String::new, |ip| ip.to_string())
                );
                return Ok(info);
            }
            _ if !announced => {
                info!("Interface: Waiting for {} to get an IPv4 address", name);
                announced = true;
            }
            _ => {}
        }
        if Instant::now() >= deadline {
            return Err(anyhow!(
                "Interface {} did not come up within {:?}",
                name,
                limit
            ));
        }
        thread::sleep(poll);
    }
}
