//! # MAVLink v1 Framing
//!
//! ```text
//! 0xFE | len | seq | sysid | compid | msgid | payload[len] | crc_lo | crc_hi
//! ```
//!
//! The checksum is CRC-16/MCRF4XX over everything after the start byte, then
//! seeded with the message's `CRC_EXTRA` byte. Payload fields are
//! little-endian and appear in wire order (largest types first), which is
//! the order listed in each `MessageSpec`.

use std::sync::Arc;

use bytes::{Buf, BufMut};

use crate::errors::{ConfigurationError, ProtocolError};
use crate::schema::{RecordSchema, SchemaOptions};

use super::Numeric;

pub const START_BYTE: u8 = 0xFE;
pub const HEADER_LEN: usize = 6;
pub const CHECKSUM_LEN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
}

impl WireType {
    pub fn size(self) -> usize {
        match self {
            WireType::U8 => 1,
            WireType::I16 | WireType::U16 => 2,
            WireType::I32 | WireType::U32 | WireType::F32 => 4,
        }
    }

    fn read(self, buf: &mut &[u8]) -> Numeric {
        match self {
            WireType::U8 => Numeric::Int(i64::from(buf.get_u8())),
            WireType::I16 => Numeric::Int(i64::from(buf.get_i16_le())),
            WireType::U16 => Numeric::Int(i64::from(buf.get_u16_le())),
            WireType::I32 => Numeric::Int(i64::from(buf.get_i32_le())),
            WireType::U32 => Numeric::Int(i64::from(buf.get_u32_le())),
            WireType::F32 => Numeric::Float(f64::from(buf.get_f32_le())),
        }
    }

    fn write(self, value: Numeric, out: &mut Vec<u8>) {
        match self {
            WireType::U8 => out.put_u8(value.as_f64() as u8),
            WireType::I16 => out.put_i16_le(value.as_f64() as i16),
            WireType::U16 => out.put_u16_le(value.as_f64() as u16),
            WireType::I32 => out.put_i32_le(value.as_f64() as i32),
            WireType::U32 => out.put_u32_le(value.as_f64() as u32),
            WireType::F32 => out.put_f32_le(value.as_f64() as f32),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireField {
    pub name: &'static str,
    pub wire: WireType,
    pub unit: &'static str,
}

const fn field(name: &'static str, wire: WireType, unit: &'static str) -> WireField {
    WireField { name, wire, unit }
}

/// Static description of one message id.
#[derive(Debug, PartialEq, Eq)]
pub struct MessageSpec {
    pub id: u8,
    pub name: &'static str,
    pub crc_extra: u8,
    pub fields: &'static [WireField],
}

impl MessageSpec {
    pub fn payload_len(&self) -> usize {
        self.fields.iter().map(|f| f.wire.size()).sum()
    }

    /// Output schema: `time` followed by every payload field.
    pub fn schema(&self, options: &SchemaOptions) -> Result<Arc<RecordSchema>, ConfigurationError> {
        let mut builder = RecordSchema::builder(self.name).time("time");
        for f in self.fields {
            builder = match f.wire {
                WireType::F32 => builder.float(f.name, f.unit),
                _ => builder.int(f.name),
            };
        }
        builder.build(options).map(Arc::new)
    }
}

pub static HEARTBEAT: MessageSpec = MessageSpec {
    id: 0,
    name: "HEARTBEAT",
    crc_extra: 50,
    fields: &[
        field("custom_mode", WireType::U32, ""),
        field("type", WireType::U8, ""),
        field("autopilot", WireType::U8, ""),
        field("base_mode", WireType::U8, ""),
        field("system_status", WireType::U8, ""),
        field("mavlink_version", WireType::U8, ""),
    ],
};

pub static ATTITUDE: MessageSpec = MessageSpec {
    id: 30,
    name: "ATTITUDE",
    crc_extra: 39,
    fields: &[
        field("time_boot_ms", WireType::U32, "ms"),
        field("roll", WireType::F32, "rad"),
        field("pitch", WireType::F32, "rad"),
        field("yaw", WireType::F32, "rad"),
        field("rollspeed", WireType::F32, "rad/s"),
        field("pitchspeed", WireType::F32, "rad/s"),
        field("yawspeed", WireType::F32, "rad/s"),
    ],
};

pub static GLOBAL_POSITION_INT: MessageSpec = MessageSpec {
    id: 33,
    name: "GLOBAL_POSITION_INT",
    crc_extra: 104,
    fields: &[
        field("time_boot_ms", WireType::U32, "ms"),
        field("lat", WireType::I32, "degE7"),
        field("lon", WireType::I32, "degE7"),
        field("alt", WireType::I32, "mm"),
        field("relative_alt", WireType::I32, "mm"),
        field("vx", WireType::I16, "cm/s"),
        field("vy", WireType::I16, "cm/s"),
        field("vz", WireType::I16, "cm/s"),
        field("hdg", WireType::U16, "cdeg"),
    ],
};

pub static RPM: MessageSpec = MessageSpec {
    id: 226,
    name: "RPM",
    crc_extra: 207,
    fields: &[field("rpm1", WireType::F32, "rpm"), field("rpm2", WireType::F32, "rpm")],
};

pub static MESSAGES: [&MessageSpec; 4] = [&HEARTBEAT, &ATTITUDE, &GLOBAL_POSITION_INT, &RPM];

pub fn spec_for_id(id: u8) -> Option<&'static MessageSpec> {
    MESSAGES.iter().copied().find(|m| m.id == id)
}

pub fn spec_for_name(name: &str) -> Option<&'static MessageSpec> {
    MESSAGES.iter().copied().find(|m| m.name.eq_ignore_ascii_case(name))
}

/// CRC-16/MCRF4XX accumulation step.
fn crc_accumulate(byte: u8, crc: u16) -> u16 {
    let mut tmp = byte ^ (crc & 0xFF) as u8;
    tmp ^= tmp << 4;
    let tmp = u16::from(tmp);
    (crc >> 8) ^ (tmp << 8) ^ (tmp << 3) ^ (tmp >> 4)
}

pub fn crc_x25(bytes: &[u8], crc_extra: u8) -> u16 {
    let crc = bytes.iter().fold(0xFFFF, |crc, b| crc_accumulate(*b, crc));
    crc_accumulate(crc_extra, crc)
}

/// One decoded, checksum-verified message.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    pub spec: &'static MessageSpec,
    pub sysid: u8,
    pub compid: u8,
    pub seq: u8,
    /// One value per `spec.fields`, same order.
    pub values: Vec<Numeric>,
}

impl DecodedMessage {
    pub fn value(&self, name: &str) -> Option<Numeric> {
        self.spec
            .fields
            .iter()
            .position(|f| f.name == name)
            .and_then(|i| self.values.get(i).copied())
    }
}

/// Outcome of looking at the front of a receive buffer.
#[derive(Debug)]
pub enum Parsed {
    /// More bytes are needed.
    Incomplete,
    Frame { consumed: usize, message: DecodedMessage },
    /// A well-formed frame with an id outside the table.
    Skip(usize),
    /// Bad data; drop `discard` bytes before trying again.
    Invalid { error: ProtocolError, discard: usize },
}

/// Tries to cut one frame off the front of `buf`.
pub fn parse_frame(buf: &[u8]) -> Parsed {
    let Some(&first) = buf.first() else {
        return Parsed::Incomplete;
    };
    if first != START_BYTE {
        let discard = buf.iter().position(|b| *b == START_BYTE).unwrap_or(buf.len());
        return Parsed::Invalid {
            error: ProtocolError::BadStartByte {
                expected: START_BYTE,
                found: first,
            },
            discard,
        };
    }
    if buf.len() < HEADER_LEN {
        return Parsed::Incomplete;
    }

    let len = usize::from(buf[1]);
    let frame_len = HEADER_LEN + len + CHECKSUM_LEN;
    let msg_id = buf[5];
    let spec = spec_for_id(msg_id);

    // A known id with the wrong length can be rejected before the rest arrives.
    if let Some(spec) = spec {
        if spec.payload_len() != len {
            return Parsed::Invalid {
                error: ProtocolError::LengthMismatch {
                    msg_id,
                    expected: spec.payload_len(),
                    actual: len,
                },
                discard: 1,
            };
        }
    }
    if buf.len() < frame_len {
        return Parsed::Incomplete;
    }
    let Some(spec) = spec else {
        return Parsed::Skip(frame_len);
    };

    let computed = crc_x25(&buf[1..HEADER_LEN + len], spec.crc_extra);
    let received = u16::from_le_bytes([buf[HEADER_LEN + len], buf[HEADER_LEN + len + 1]]);
    if computed != received {
        return Parsed::Invalid {
            error: ProtocolError::Checksum {
                msg_id,
                computed,
                received,
            },
            discard: 1,
        };
    }

    let mut payload = &buf[HEADER_LEN..HEADER_LEN + len];
    let values = spec.fields.iter().map(|f| f.wire.read(&mut payload)).collect();
    Parsed::Frame {
        consumed: frame_len,
        message: DecodedMessage {
            spec,
            seq: buf[2],
            sysid: buf[3],
            compid: buf[4],
            values,
        },
    }
}

/// Encodes one frame. `values` must line up with `spec.fields`.
pub fn encode_frame(spec: &MessageSpec, seq: u8, sysid: u8, compid: u8, values: &[Numeric]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + spec.payload_len() + CHECKSUM_LEN);
    out.put_u8(START_BYTE);
    out.put_u8(spec.payload_len() as u8);
    out.put_u8(seq);
    out.put_u8(sysid);
    out.put_u8(compid);
    out.put_u8(spec.id);
    for (f, v) in spec.fields.iter().zip(values) {
        f.wire.write(*v, &mut out);
    }
    let crc = crc_x25(&out[1..], spec.crc_extra);
    out.put_u16_le(crc);
    out
}
