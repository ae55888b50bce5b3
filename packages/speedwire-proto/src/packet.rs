//! The outer Speedwire envelope.
//!
//! A datagram is the `"SMA\0"` magic followed by big-endian
//! `(length, tag, payload)` entries and a 4-byte zero terminator.
//! Unknown tags survive a decode/encode cycle byte-identically; unknown
//! Net2 sub-protocols decode to [`Net2Content::Unknown`] so unrelated
//! multicast traffic never fails the receive path.

use std::net::Ipv4Addr;

use bytes::BufMut;

use crate::device_data::{DeviceData, DEVICE_DATA_PROTOCOL_ID};
use crate::error::{check_len, ProtoError};
use crate::meter::{MeterFrame, METER_PROTOCOL_ID};

/// Magic at the start of every envelope.
pub const MAGIC: [u8; 4] = *b"SMA\0";

pub const GROUP_TAG: u16 = 0x02A0;
pub const NET2_TAG: u16 = 0x0010;
pub const DISCOVERY_REQUEST_TAG: u16 = 0x0020;
pub const DISCOVERY_IP_TAG: u16 = 0x0030;

/// Group carried ahead of session traffic.
pub const GROUP_SESSION: u32 = 0x0000_0001;
/// Group used in discovery broadcasts.
pub const GROUP_BROADCAST: u32 = 0xFFFF_FFFF;

/// Payload of a Net2 entry, keyed by its 16 bit protocol ID.
#[derive(Debug, Clone, PartialEq)]
pub enum Net2Content {
    DeviceData(DeviceData),
    MeterFrame(MeterFrame),
    /// Sub-protocol this library does not speak; the payload is dropped.
    Unknown(u16),
}

impl Net2Content {
    pub fn protocol_id(&self) -> u16 {
        match self {
            Net2Content::DeviceData(_) => DEVICE_DATA_PROTOCOL_ID,
            Net2Content::MeterFrame(_) => METER_PROTOCOL_ID,
            Net2Content::Unknown(id) => *id,
        }
    }

    fn bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u16(self.protocol_id());
        match self {
            Net2Content::DeviceData(data) => buf.extend_from_slice(&data.bytes()),
            Net2Content::MeterFrame(frame) => buf.extend_from_slice(&frame.bytes()),
            Net2Content::Unknown(_) => {}
        }
        buf
    }

    fn read(data: &[u8]) -> Result<Self, ProtoError> {
        check_len(data, 2)?;
        let id = u16::from_be_bytes([data[0], data[1]]);
        match id {
            DEVICE_DATA_PROTOCOL_ID => Ok(Net2Content::DeviceData(DeviceData::read(&data[2..])?)),
            METER_PROTOCOL_ID => Ok(Net2Content::MeterFrame(MeterFrame::read(&data[2..])?)),
            _ => Ok(Net2Content::Unknown(id)),
        }
    }
}

/// One tag-length-value entry of an envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum PacketEntry {
    Group(u32),
    Net2(Net2Content),
    DiscoveryRequest,
    DiscoveryIp(Ipv4Addr),
    /// Tag this library does not know; preserved verbatim.
    Unknown { tag: u16, data: Vec<u8> },
}

impl PacketEntry {
    pub fn tag(&self) -> u16 {
        match self {
            PacketEntry::Group(_) => GROUP_TAG,
            PacketEntry::Net2(_) => NET2_TAG,
            PacketEntry::DiscoveryRequest => DISCOVERY_REQUEST_TAG,
            PacketEntry::DiscoveryIp(_) => DISCOVERY_IP_TAG,
            PacketEntry::Unknown { tag, .. } => *tag,
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            PacketEntry::Group(group) => group.to_be_bytes().to_vec(),
            PacketEntry::Net2(content) => content.bytes(),
            PacketEntry::DiscoveryRequest => Vec::new(),
            PacketEntry::DiscoveryIp(ip) => ip.octets().to_vec(),
            PacketEntry::Unknown { data, .. } => data.clone(),
        }
    }

    fn read(tag: u16, data: &[u8]) -> Result<Self, ProtoError> {
        match tag {
            GROUP_TAG => {
                check_len(data, 4)?;
                Ok(PacketEntry::Group(u32::from_be_bytes(
                    data[0..4].try_into().unwrap(),
                )))
            }
            NET2_TAG => Ok(PacketEntry::Net2(Net2Content::read(data)?)),
            DISCOVERY_REQUEST_TAG => Ok(PacketEntry::DiscoveryRequest),
            DISCOVERY_IP_TAG => {
                check_len(data, 4)?;
                Ok(PacketEntry::DiscoveryIp(Ipv4Addr::new(
                    data[0], data[1], data[2], data[3],
                )))
            }
            _ => Ok(PacketEntry::Unknown {
                tag,
                data: data.to_vec(),
            }),
        }
    }
}

/// A decoded envelope: an ordered list of entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Packet {
    entries: Vec<PacketEntry>,
}

impl Packet {
    pub fn new() -> Self {
        Packet::default()
    }

    /// Discovery broadcast: the all-groups entry plus an empty request.
    pub fn discovery_request() -> Self {
        let mut packet = Packet::new();
        packet.add_entry(PacketEntry::Group(GROUP_BROADCAST));
        packet.add_entry(PacketEntry::DiscoveryRequest);
        packet
    }

    /// Session envelope wrapping one Net2 sub-packet.
    pub fn session(content: Net2Content) -> Self {
        let mut packet = Packet::new();
        packet.add_entry(PacketEntry::Group(GROUP_SESSION));
        packet.add_entry(PacketEntry::Net2(content));
        packet
    }

    pub fn add_entry(&mut self, entry: PacketEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[PacketEntry] {
        &self.entries
    }

    /// First entry with the given tag.
    pub fn entry(&self, tag: u16) -> Option<&PacketEntry> {
        self.entries.iter().find(|e| e.tag() == tag)
    }

    /// Content of the first Net2 entry, if any.
    pub fn net2(&self) -> Option<&Net2Content> {
        self.entries.iter().find_map(|e| match e {
            PacketEntry::Net2(content) => Some(content),
            _ => None,
        })
    }

    pub fn device_data(&self) -> Option<&DeviceData> {
        match self.net2() {
            Some(Net2Content::DeviceData(data)) => Some(data),
            _ => None,
        }
    }

    pub fn meter_frame(&self) -> Option<&MeterFrame> {
        match self.net2() {
            Some(Net2Content::MeterFrame(frame)) => Some(frame),
            _ => None,
        }
    }

    pub fn bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC);
        for entry in &self.entries {
            let payload = entry.payload();
            buf.put_u16(payload.len() as u16);
            buf.put_u16(entry.tag());
            buf.extend_from_slice(&payload);
        }
        // zero-length terminator entry
        buf.extend_from_slice(&[0, 0, 0, 0]);
        buf
    }

    pub fn read(data: &[u8]) -> Result<Self, ProtoError> {
        check_len(data, 20)?;
        if data[0..4] != MAGIC {
            return Err(ProtoError::InvalidMagic {
                found: String::from_utf8_lossy(&data[0..3]).into_owned(),
            });
        }

        let mut packet = Packet::new();
        let mut index = 4;
        while data.len() - index >= 4 {
            let length = u16::from_be_bytes([data[index], data[index + 1]]) as usize;
            let tag = u16::from_be_bytes([data[index + 2], data[index + 3]]);
            index += 4;

            if length == 0 {
                break;
            }
            check_len(data, index + length)?;
            packet.add_entry(PacketEntry::read(tag, &data[index..index + length])?);
            index += length;
        }
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_id::DeviceId;

    #[test]
    fn group_entry_decodes() {
        let packet = Packet::read(&[
            0x53, 0x4D, 0x41, 0x00, // header
            0x00, 0x08, 0x12, 0x34, // unknown entry
            0x12, 0x34, 0x56, 0x78, //
            0x12, 0x34, 0x56, 0x78, //
            0x00, 0x04, 0x02, 0xA0, // group entry
            0x12, 0x34, 0x56, 0x78, //
            0x00, 0x00, 0x00, 0x00, // terminator
        ])
        .unwrap();

        assert_eq!(packet.entries().len(), 2);
        assert_eq!(packet.entry(GROUP_TAG), Some(&PacketEntry::Group(0x1234_5678)));
        assert!(packet.entry(0x1234).is_some());
    }

    #[test]
    fn bad_magic_names_the_header() {
        let err = Packet::read(&[
            0x52, 0x4D, 0x41, 0x00, // "RMA\0"
            0x00, 0x08, 0x12, 0x34, //
            0x12, 0x34, 0x56, 0x78, //
            0x12, 0x34, 0x56, 0x78, //
            0x00, 0x00, 0x00, 0x00, //
        ])
        .unwrap_err();

        assert_eq!(
            err,
            ProtoError::InvalidMagic {
                found: "RMA".into()
            }
        );
    }

    #[test]
    fn short_datagram_is_rejected() {
        assert_eq!(
            Packet::read(&[0x12, 0x34]),
            Err(ProtoError::TooShort { len: 2, need: 20 })
        );
    }

    #[test]
    fn unknown_entries_survive_round_trip() {
        let mut packet = Packet::new();
        packet.add_entry(PacketEntry::Unknown {
            tag: 0x1234,
            data: vec![0x12, 0x34, 0x56, 0x78, 0x12, 0x34, 0x56, 0x78],
        });
        packet.add_entry(PacketEntry::Group(0x1234_5678));

        let bytes = packet.bytes();
        assert_eq!(
            bytes,
            [
                0x53, 0x4D, 0x41, 0x00, // header
                0x00, 0x08, 0x12, 0x34, // unknown entry
                0x12, 0x34, 0x56, 0x78, //
                0x12, 0x34, 0x56, 0x78, //
                0x00, 0x04, 0x02, 0xA0, // group entry
                0x12, 0x34, 0x56, 0x78, //
                0x00, 0x00, 0x00, 0x00, // terminator
            ]
        );

        let decoded = Packet::read(&bytes).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.bytes(), bytes);
    }

    #[test]
    fn discovery_request_layout() {
        let packet = Packet::discovery_request();
        let decoded = Packet::read(&packet.bytes()).unwrap();

        assert_eq!(
            decoded.entries(),
            [
                PacketEntry::Group(GROUP_BROADCAST),
                PacketEntry::DiscoveryRequest,
            ]
        );
    }

    #[test]
    fn discovery_ip_entry() {
        let entry = PacketEntry::read(DISCOVERY_IP_TAG, &[192, 168, 2, 123]).unwrap();
        assert_eq!(entry, PacketEntry::DiscoveryIp(Ipv4Addr::new(192, 168, 2, 123)));
        assert_eq!(entry.payload(), [192, 168, 2, 123]);
    }

    #[test]
    fn unknown_net2_protocol_is_ignored() {
        let mut buf = vec![
            0x53, 0x4D, 0x41, 0x00, // header
            0x00, 0x08, 0x00, 0x10, // net2 entry
            0x61, 0x81, // unrelated sub-protocol
            0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, // payload (dropped)
        ];
        buf.extend_from_slice(&[0, 0, 0, 0]);

        let packet = Packet::read(&buf).unwrap();
        assert_eq!(packet.net2(), Some(&Net2Content::Unknown(0x6181)));
        assert_eq!(packet.device_data(), None);
    }

    #[test]
    fn session_envelope_round_trip() {
        let mut request = DeviceData::request(0xA0);
        request.destination = DeviceId::BROADCAST;
        request.parameters = vec![0, 0];

        let packet = Packet::session(Net2Content::DeviceData(request));
        let decoded = Packet::read(&packet.bytes()).unwrap();

        assert_eq!(decoded, packet);
        assert_eq!(decoded.entry(GROUP_TAG), Some(&PacketEntry::Group(GROUP_SESSION)));
        assert!(decoded.device_data().is_some());
    }

    #[test]
    fn meter_broadcast_round_trip() {
        use crate::meter::{MeasuredData, MeterFrame, ObisId};
        use crate::RawValue;

        let frame = MeterFrame {
            device: DeviceId {
                susy_id: 349,
                serial: 3_002_468_311,
            },
            ticker_ms: 123_456,
            values: vec![MeasuredData {
                obis: ObisId {
                    channel: 0,
                    value_index: 1,
                    kind: 4,
                    tariff: 0,
                },
                value: RawValue::U32(1000),
            }],
        };

        let packet = Packet::session(Net2Content::MeterFrame(frame));
        assert_eq!(Packet::read(&packet.bytes()).unwrap(), packet);
    }
}
