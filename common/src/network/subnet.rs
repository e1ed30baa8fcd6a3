//! # Subnet Enumeration
//!
//! Expands a client address into every address of its containing /24.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use pnet::ipnetwork::Ipv4Network;
use thiserror::Error;

pub const SUBNET_PREFIX: u8 = 24;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid client address: {0}")]
    Invalid(String),
    #[error("{0} is not an IPv4 address")]
    NotIpv4(IpAddr),
}

/// Parses a bare IPv4 address or an `ip:port` pair, as found in a request's
/// remote address.
pub fn parse_client(s: &str) -> Result<Ipv4Addr, AddressError> {
    let s = s.trim();
    let ip: IpAddr = match s.parse::<IpAddr>() {
        Ok(ip) => ip,
        Err(_) => s
            .parse::<SocketAddr>()
            .map(|sa| sa.ip())
            .map_err(|_| AddressError::Invalid(s.to_string()))?,
    };
    match ip {
        IpAddr::V4(v4) => Ok(v4),
        IpAddr::V6(v6) => v6.to_ipv4_mapped().ok_or(AddressError::NotIpv4(ip)),
    }
}

/// Returns the /24 network that contains `client`.
pub fn containing_network(client: Ipv4Addr) -> Result<Ipv4Network, AddressError> {
    let network = Ipv4Network::new(client, SUBNET_PREFIX)
        .map_err(|e| AddressError::Invalid(e.to_string()))?;
    Ipv4Network::new(network.network(), SUBNET_PREFIX)
        .map_err(|e| AddressError::Invalid(e.to_string()))
}

/// Lists every address of the client's /24, network and broadcast included,
/// in ascending order.
pub fn enumerate(client: &str) -> Result<Vec<Ipv4Addr>, AddressError> {
    let client: Ipv4Addr = parse_client(client)?;
    let network: Ipv4Network = containing_network(client)?;

    let mut addrs: Vec<Ipv4Addr> = Vec::with_capacity(network.size() as usize);
    let mut octets: [u8; 4] = network.network().octets();
    loop {
        let current = Ipv4Addr::from(octets);
        if !network.contains(current) {
            break;
        }
        addrs.push(current);
        if !increment(&mut octets) {
            break;
        }
    }
    Ok(addrs)
}

/// Adds one to the address, carrying from the least-significant byte.
/// Returns `false` when the address wrapped around.
fn increment(octets: &mut [u8; 4]) -> bool {
    for byte in octets.iter_mut().rev() {
        *byte = byte.wrapping_add(1);
        if *byte > 0 {
            return true;
        }
    }
    false
}
