//! DeviceData sub-packet, the request/response half of Net2.
//!
//! Inverter queries and their replies share one packed little-endian
//! record. A request is marked by bit 15 of the packet ID on the wire;
//! the bit is cleared again on decode so matching compares plain IDs.
//! Replies to value queries (`command == 0x01`) carry a run of
//! [`ResponseValue`] records packed to the end of the frame.

use std::sync::atomic::{AtomicU32, Ordering};

use bytes::BufMut;

use crate::device_id::{local_device_id, DeviceId};
use crate::error::{check_len, ProtoError};

/// Net2 protocol ID of DeviceData sub-packets.
pub const DEVICE_DATA_PROTOCOL_ID: u16 = 0x6065;

/// Response status: the requested selector has no data on this device.
pub const STATUS_NO_DATA: u16 = 0x15;

/// Command of a value-bearing response.
pub const COMMAND_VALUES: u8 = 0x01;

/// Bit 15 of the wire packet ID marks a request.
const REQUEST_BIT: u16 = 0x8000;

// Counter for packet IDs, advanced for every new logical request.
// Resends of one request keep their ID; only the low byte goes on the wire.
static PACKET_ID_COUNTER: AtomicU32 = AtomicU32::new(0);

fn next_packet_id() -> u16 {
    let id = PACKET_ID_COUNTER.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
    (id & 0xFF) as u16
}

/// One decoded reading inside a [`ResponseValue`].
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    U32(u32),
    I32(i32),
    U64(u64),
    Text(String),
}

impl RawValue {
    /// Numeric readings widened to `f64`; `None` for text.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RawValue::U32(v) => Some(*v as f64),
            RawValue::I32(v) => Some(*v as f64),
            RawValue::U64(v) => Some(*v as f64),
            RawValue::Text(_) => None,
        }
    }
}

/// One value record of a DeviceData response.
///
/// The payload layout depends on `kind` and, for the energy counter
/// object `0x5400`, on the enclosing object selector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseValue {
    pub class: u8,
    pub code: u16,
    pub kind: u8,
    pub timestamp: u32,
    pub values: Vec<RawValue>,
}

impl ResponseValue {
    const KIND_TEXT: u8 = 0x10;
    const KIND_ATTRIBUTES: u8 = 0x08;
    const KIND_UNSIGNED: u8 = 0x00;
    const KIND_SIGNED: u8 = 0x40;

    const OBJECT_COUNTER: u16 = 0x5400;

    const ATTRIBUTE_END: u32 = 0x00FF_FFFE;
    const UNSIGNED_END: u32 = 0xFFFF_FFFF;
    const SIGNED_END: i32 = i32::MIN;

    fn record_len(&self, object: u16) -> usize {
        if self.kind == Self::KIND_TEXT || self.kind == Self::KIND_ATTRIBUTES {
            40
        } else if object == Self::OBJECT_COUNTER {
            16
        } else if self.kind == Self::KIND_UNSIGNED || self.kind == Self::KIND_SIGNED {
            8 + 5 * 4
        } else {
            8
        }
    }

    /// Append the wire form to `buf`. The enclosing object selector
    /// decides whether this record is a 64 bit counter.
    pub fn write(&self, object: u16, buf: &mut Vec<u8>) {
        let len = self.record_len(object);
        let start = buf.len();
        buf.resize(start + len, 0);

        buf[start] = self.class;
        buf[start + 1..start + 3].copy_from_slice(&self.code.to_le_bytes());
        buf[start + 3] = self.kind;
        buf[start + 4..start + 8].copy_from_slice(&self.timestamp.to_le_bytes());

        let body = &mut buf[start + 8..start + len];
        if self.values.is_empty() {
            return;
        }

        if self.kind == Self::KIND_TEXT {
            if let RawValue::Text(s) = &self.values[0] {
                let bytes = s.as_bytes();
                let n = bytes.len().min(32);
                body[..n].copy_from_slice(&bytes[..n]);
            }
        } else if self.kind == Self::KIND_ATTRIBUTES {
            let mut index = 0;
            for value in self.values.iter().take(8) {
                let RawValue::U32(v) = value else { break };
                let tagged = (v & 0x00FF_FFFF) | 0x0100_0000;
                body[index..index + 4].copy_from_slice(&tagged.to_le_bytes());
                index += 4;
            }
            if self.values.len() < 8 {
                body[index..index + 4].copy_from_slice(&Self::ATTRIBUTE_END.to_le_bytes());
            }
        } else if object == Self::OBJECT_COUNTER {
            if let RawValue::U64(v) = &self.values[0] {
                body.copy_from_slice(&v.to_le_bytes());
            }
        } else if self.kind == Self::KIND_UNSIGNED {
            let mut index = 0;
            for value in self.values.iter().take(5) {
                let RawValue::U32(v) = value else { break };
                body[index..index + 4].copy_from_slice(&v.to_le_bytes());
                index += 4;
            }
            if self.values.len() < 5 {
                body[index..index + 4].copy_from_slice(&Self::UNSIGNED_END.to_le_bytes());
            }
        } else if self.kind == Self::KIND_SIGNED {
            let mut index = 0;
            for value in self.values.iter().take(5) {
                let RawValue::I32(v) = value else { break };
                body[index..index + 4].copy_from_slice(&v.to_le_bytes());
                index += 4;
            }
            if self.values.len() < 5 {
                body[index..index + 4].copy_from_slice(&Self::SIGNED_END.to_le_bytes());
            }
        }
    }

    /// Decode one record from the start of `data`; returns the record and
    /// the number of bytes it occupies on the wire.
    pub fn read(data: &[u8], object: u16) -> Result<(Self, usize), ProtoError> {
        check_len(data, 8)?;

        let mut value = ResponseValue {
            class: data[0],
            code: u16::from_le_bytes([data[1], data[2]]),
            kind: data[3],
            timestamp: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
            values: Vec::new(),
        };

        if value.kind == Self::KIND_TEXT {
            check_len(data, 40)?;
            let text = String::from_utf8_lossy(&data[8..40])
                .trim_matches('\0')
                .to_string();
            value.values.push(RawValue::Text(text));
            return Ok((value, 40));
        }

        if value.kind == Self::KIND_ATTRIBUTES {
            for slot in data[8..data.len().min(40)].chunks_exact(4) {
                let v = u32::from_le_bytes([slot[0], slot[1], slot[2], slot[3]]);
                if v == Self::ATTRIBUTE_END {
                    break;
                }
                if v >> 24 == 1 {
                    value.values.push(RawValue::U32(v & 0x00FF_FFFF));
                }
            }
            return Ok((value, 40));
        }

        if object == Self::OBJECT_COUNTER {
            check_len(data, 16)?;
            let v = u64::from_le_bytes(data[8..16].try_into().unwrap());
            value.values.push(RawValue::U64(v));
            return Ok((value, 16));
        }

        if value.kind == Self::KIND_UNSIGNED || value.kind == Self::KIND_SIGNED {
            for slot in data[8..data.len().min(28)].chunks_exact(4) {
                let v = u32::from_le_bytes([slot[0], slot[1], slot[2], slot[3]]);
                if value.kind == Self::KIND_SIGNED {
                    if v as i32 == Self::SIGNED_END {
                        break;
                    }
                    value.values.push(RawValue::I32(v as i32));
                } else {
                    if v == Self::UNSIGNED_END {
                        break;
                    }
                    value.values.push(RawValue::U32(v));
                }
            }
            return Ok((value, 8 + 5 * 4));
        }

        Ok((value, 8))
    }
}

/// DeviceData request/response record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceData {
    pub control: u8,
    pub destination: DeviceId,
    pub job_number: u8,
    pub source: DeviceId,
    pub status: u16,
    pub packet_count: u16,
    pub packet_id: u16,
    pub command: u8,
    pub object: u16,
    pub parameters: Vec<u32>,

    /// Value records of a response (`command == 0x01`).
    pub response_values: Vec<ResponseValue>,

    /// Trailing raw payload of a request (e.g. the login password field).
    pub data: Vec<u8>,
}

impl DeviceData {
    /// New request with a fresh packet ID and this process as source.
    ///
    /// Resends of the same logical request must reuse the returned
    /// record (and thus its ID); distinct requests call this again.
    pub fn request(control: u8) -> Self {
        DeviceData {
            control,
            source: local_device_id(),
            packet_id: next_packet_id(),
            ..Default::default()
        }
    }

    /// True for a value-bearing response.
    pub fn has_values(&self) -> bool {
        self.command == COMMAND_VALUES
    }

    /// Encode to the wire form. The length prefix counts 4-byte words.
    pub fn bytes(&self) -> Vec<u8> {
        let len = 28 + 4 * self.parameters.len() + self.data.len();
        let mut buf = Vec::with_capacity(len);

        buf.put_u8((len / 4) as u8);
        buf.put_u8(self.control);
        self.destination.write_le(&mut buf);
        buf.put_u8(0);
        buf.put_u8(self.job_number);
        self.source.write_le(&mut buf);
        buf.put_u8(0);
        buf.put_u8(self.job_number);
        buf.put_u16_le(self.status);
        buf.put_u16_le(self.packet_count);
        buf.put_u16_le(self.packet_id | REQUEST_BIT);
        buf.put_u8(self.command);
        buf.put_u8(self.parameters.len() as u8);
        buf.put_u16_le(self.object);
        for param in &self.parameters {
            buf.put_u32_le(*param);
        }
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Decode a DeviceData body. The word-length prefix must match the
    /// buffer size exactly.
    pub fn read(data: &[u8]) -> Result<Self, ProtoError> {
        check_len(data, 30)?;

        let declared = data[0] as usize * 4;
        if declared != data.len() {
            return Err(ProtoError::SizeMismatch {
                declared,
                actual: data.len(),
            });
        }

        let mut packet = DeviceData {
            control: data[1],
            destination: DeviceId::read_le(&data[2..8])?,
            // data[8] unknown
            job_number: data[9],
            source: DeviceId::read_le(&data[10..16])?,
            // data[16] unknown, data[17] repeats the job number
            status: u16::from_le_bytes([data[18], data[19]]),
            packet_count: u16::from_le_bytes([data[20], data[21]]),
            packet_id: u16::from_le_bytes([data[22], data[23]]) & !REQUEST_BIT,
            command: data[24],
            object: u16::from_le_bytes([data[26], data[27]]),
            ..Default::default()
        };

        let parameter_count = data[25] as usize;
        let mut index = 28;
        packet.parameters.reserve(parameter_count);
        for _ in 0..parameter_count {
            check_len(data, index + 4)?;
            packet.parameters.push(u32::from_le_bytes(
                data[index..index + 4].try_into().unwrap(),
            ));
            index += 4;
        }

        if !packet.has_values() {
            // Requests keep any trailing payload verbatim.
            packet.data = data[index..].to_vec();
            return Ok(packet);
        }

        while data.len().saturating_sub(index) >= 8 {
            let (value, used) = ResponseValue::read(&data[index..], packet.object)?;
            packet.response_values.push(value);
            index += used;
        }
        Ok(packet)
    }
}
