//! Peer identity on the Speedwire bus.

use std::net::IpAddr;
use std::sync::OnceLock;

use bytes::BufMut;
use network_interface::{NetworkInterface, NetworkInterfaceConfig};

use crate::error::{check_len, ProtoError};

/// SusyID used for requests originating from this library.
pub const LOCAL_SUSY_ID: u16 = 120;

/// Serial used when no non-loopback IPv4 interface exists.
const FALLBACK_SERIAL: u32 = 123_456_789;

/// `(susy_id, serial)` pair naming a device on the bus.
///
/// Serialized little-endian inside DeviceData bodies and big-endian
/// inside meter broadcasts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DeviceId {
    pub susy_id: u16,
    pub serial: u32,
}

impl DeviceId {
    /// Destination for requests to a peer whose identity is not yet known.
    pub const BROADCAST: DeviceId = DeviceId {
        susy_id: 0xFFFF,
        serial: 0xFFFF_FFFF,
    };

    /// True until the peer has been identified.
    pub fn is_unknown(&self) -> bool {
        self.susy_id == 0 && self.serial == 0
    }

    pub(crate) fn write_le(&self, buf: &mut Vec<u8>) {
        buf.put_u16_le(self.susy_id);
        buf.put_u32_le(self.serial);
    }

    pub(crate) fn write_be(&self, buf: &mut Vec<u8>) {
        buf.put_u16(self.susy_id);
        buf.put_u32(self.serial);
    }

    pub(crate) fn read_le(data: &[u8]) -> Result<Self, ProtoError> {
        check_len(data, 6)?;
        Ok(DeviceId {
            susy_id: u16::from_le_bytes([data[0], data[1]]),
            serial: u32::from_le_bytes([data[2], data[3], data[4], data[5]]),
        })
    }

    pub(crate) fn read_be(data: &[u8]) -> Result<Self, ProtoError> {
        check_len(data, 6)?;
        Ok(DeviceId {
            susy_id: u16::from_be_bytes([data[0], data[1]]),
            serial: u32::from_be_bytes([data[2], data[3], data[4], data[5]]),
        })
    }
}

static LOCAL_ID: OnceLock<DeviceId> = OnceLock::new();

/// Identity stamped as the source of every request built by this process.
///
/// The serial is taken from the first non-loopback IPv4 address at first
/// use; hosts with only loopback fall back to a fixed serial.
pub fn local_device_id() -> DeviceId {
    *LOCAL_ID.get_or_init(|| DeviceId {
        susy_id: LOCAL_SUSY_ID,
        serial: first_ipv4_serial().unwrap_or(FALLBACK_SERIAL),
    })
}

fn first_ipv4_serial() -> Option<u32> {
    let interfaces = NetworkInterface::show().ok()?;
    for interface in interfaces {
        for addr in &interface.addr {
            if let IpAddr::V4(ip) = addr.ip() {
                if !ip.is_loopback() {
                    return Some(u32::from(ip));
                }
            }
        }
    }
    None
}
