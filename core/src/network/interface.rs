//! Capture device resolution.

use std::net::Ipv4Addr;

use latprobe_common::config::ANY_DEVICE;
use latprobe_protocols::LinkType;
use pnet::datalink::{self, NetworkInterface};
use pnet::ipnetwork::IpNetwork;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("capture device '{0}' does not exist")]
    NotFound(String),
    #[error("capture device '{0}' is down")]
    Down(String),
    #[error("no usable interface found for the '{ANY_DEVICE}' wildcard")]
    NoneUsable,
    #[error("capture device '{0}' has no ipv4 address")]
    NoIpv4(String),
}

/// A resolved interface plus the framing it delivers.
#[derive(Debug, Clone)]
pub struct CaptureDevice {
    pub interface: NetworkInterface,
    pub link: LinkType,
}

impl CaptureDevice {
    pub fn name(&self) -> &str {
        &self.interface.name
    }

    /// First IPv4 address bound to the device.
    pub fn ipv4(&self) -> Result<Ipv4Addr, DeviceError> {
        first_ipv4(&self.interface).ok_or_else(|| DeviceError::NoIpv4(self.interface.name.clone()))
    }
}

/// Looks `name` up among the system's interfaces.
///
/// The wildcard `any` picks the first interface that is up, not loopback and
/// carries an IPv4 address.
pub fn resolve_device(name: &str) -> Result<CaptureDevice, DeviceError> {
    select_device(datalink::interfaces(), name)
}

pub fn list_devices() -> Vec<NetworkInterface> {
    datalink::interfaces()
}

fn select_device(interfaces: Vec<NetworkInterface>, name: &str) -> Result<CaptureDevice, DeviceError> {
    let interface = if name == ANY_DEVICE {
        interfaces
            .into_iter()
            .find(|i| i.is_up() && !i.is_loopback() && first_ipv4(i).is_some())
            .ok_or(DeviceError::NoneUsable)?
    } else {
        let interface = interfaces
            .into_iter()
            .find(|i| i.name == name)
            .ok_or_else(|| DeviceError::NotFound(name.to_string()))?;
        if !interface.is_up() {
            return Err(DeviceError::Down(name.to_string()));
        }
        interface
    };

    let link = link_type(&interface);
    Ok(CaptureDevice { interface, link })
}

fn link_type(interface: &NetworkInterface) -> LinkType {
    if interface.mac.is_none() || interface.is_point_to_point() {
        LinkType::RawIp
    } else {
        LinkType::Ethernet
    }
}

fn first_ipv4(interface: &NetworkInterface) -> Option<Ipv4Addr> {
    interface.ips.iter().find_map(|net| match net {
        IpNetwork::V4(v4) => Some(v4.ip()),
        IpNetwork::V6(_) => None,
    })
}
