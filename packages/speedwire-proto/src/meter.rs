//! MeterFrame sub-packet, the unsolicited energy meter broadcast.
//!
//! Meters push one frame per second to the multicast group. Everything
//! here is big-endian, unlike the DeviceData side. Each measurement is a
//! 4-byte OBIS identifier followed by a u32 reading, widened to u64 for
//! energy counters (`kind == 8`).

use std::fmt;

use bytes::BufMut;

use crate::device_data::RawValue;
use crate::device_id::DeviceId;
use crate::error::{check_len, ProtoError};

/// Net2 protocol ID of meter broadcast frames.
pub const METER_PROTOCOL_ID: u16 = 0x6069;

/// Measurement kind of 64 bit energy counters.
const KIND_COUNTER: u8 = 8;

/// OBIS identifier of one meter measurement, displayed as `"C:V.T.Tr"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ObisId {
    pub channel: u8,
    pub value_index: u8,
    pub kind: u8,
    pub tariff: u8,
}

impl ObisId {
    fn write(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.channel);
        buf.put_u8(self.value_index);
        buf.put_u8(self.kind);
        buf.put_u8(self.tariff);
    }

    fn read(data: &[u8]) -> Result<Self, ProtoError> {
        check_len(data, 4)?;
        Ok(ObisId {
            channel: data[0],
            value_index: data[1],
            kind: data[2],
            tariff: data[3],
        })
    }
}

impl fmt::Display for ObisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}.{}.{}",
            self.channel, self.value_index, self.kind, self.tariff
        )
    }
}

/// One reading of a meter broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasuredData {
    pub obis: ObisId,
    pub value: RawValue,
}

impl MeasuredData {
    fn write(&self, buf: &mut Vec<u8>) {
        self.obis.write(buf);
        if self.obis.kind == KIND_COUNTER {
            let v = match self.value {
                RawValue::U64(v) => v,
                RawValue::U32(v) => v as u64,
                _ => 0,
            };
            buf.put_u64(v);
        } else {
            let v = match self.value {
                RawValue::U32(v) => v,
                RawValue::U64(v) => v as u32,
                _ => 0,
            };
            buf.put_u32(v);
        }
    }

    /// Decode one measurement; returns the reading and its wire size.
    fn read(data: &[u8]) -> Result<(Self, usize), ProtoError> {
        let obis = ObisId::read(data)?;
        if obis.kind == KIND_COUNTER {
            check_len(data, 12)?;
            let value = RawValue::U64(u64::from_be_bytes(data[4..12].try_into().unwrap()));
            Ok((MeasuredData { obis, value }, 12))
        } else {
            check_len(data, 8)?;
            let value = RawValue::U32(u32::from_be_bytes(data[4..8].try_into().unwrap()));
            Ok((MeasuredData { obis, value }, 8))
        }
    }
}

/// Broadcast frame of an energy meter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeterFrame {
    /// Identity of the sending meter.
    pub device: DeviceId,
    /// Measurement time in milliseconds, overflowing.
    pub ticker_ms: u32,
    pub values: Vec<MeasuredData>,
}

impl MeterFrame {
    pub fn bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(10 + 8 * self.values.len());
        self.device.write_be(&mut buf);
        buf.put_u32(self.ticker_ms);
        for value in &self.values {
            value.write(&mut buf);
        }
        buf
    }

    pub fn read(data: &[u8]) -> Result<Self, ProtoError> {
        check_len(data, 10)?;

        let mut frame = MeterFrame {
            device: DeviceId::read_be(&data[0..6])?,
            ticker_ms: u32::from_be_bytes(data[6..10].try_into().unwrap()),
            values: Vec::new(),
        };

        let mut index = 10;
        while data.len() - index >= 8 {
            let (value, used) = MeasuredData::read(&data[index..])?;
            frame.values.push(value);
            index += used;
        }
        Ok(frame)
    }
}
