//! # speedwire-proto
//!
//! Wire codec for the SMA Speedwire LAN protocol spoken by photovoltaic
//! inverters and energy meters.
//!
//! The protocol is layered:
//!   1. An outer envelope: `"SMA\0"` magic followed by big-endian
//!      tag-length-value entries ([`packet`]).
//!   2. The Net2 sub-protocol inside the `0x0010` entry, carrying either
//!      an inverter request/response ([`device_data`]) or an unsolicited
//!      energy meter broadcast ([`meter`]).
//!
//! The codec is pure: no sockets, no async, no global state apart from
//! the packet-ID counter and the lazily derived local device identity
//! ([`device_id`]). All decoders are total over arbitrary input; they
//! return [`ProtoError`], never panic.
//!
//! Endianness is mixed by design: the envelope and meter broadcasts are
//! big-endian, DeviceData bodies are little-endian.

pub mod device_data;
pub mod device_id;
pub mod error;
pub mod meter;
pub mod packet;

pub use device_data::{DeviceData, RawValue, ResponseValue};
pub use device_id::DeviceId;
pub use error::ProtoError;
pub use meter::{MeasuredData, MeterFrame, ObisId};
pub use packet::{Net2Content, Packet, PacketEntry};
