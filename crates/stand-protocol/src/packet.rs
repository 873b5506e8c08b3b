//! Packet model and wire enums.
//!
//! A packet is a 9-byte big-endian header followed by a payload whose shape
//! is fixed by the type code. The header length field counts the whole
//! packet, header included.

use std::fmt;

/// Wire protocol version carried in every header.
pub const PROTOCOL_VERSION: u8 = 2;

/// Header size in bytes; also the minimum packet size.
pub const HEADER_LEN: usize = 9;

/// Largest packet the framing layer will accept (the length field is u16).
pub const MAX_PACKET_LEN: usize = 65_535;

// ---------------------------------------------------------------------------
// PacketType
// ---------------------------------------------------------------------------

/// Packet type codes.
///
/// 0x00–0x08 are server→device, 0x10–0x14 device→server. The codec accepts
/// either direction; sessions enforce who may send what.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Estop = 0x00,
    Discovery = 0x01,
    TimeSync = 0x02,
    Control = 0x03,
    StatusRequest = 0x04,
    StreamStart = 0x05,
    StreamStop = 0x06,
    GetSingle = 0x07,
    Heartbeat = 0x08,
    Config = 0x10,
    Data = 0x11,
    Status = 0x12,
    Ack = 0x13,
    Nack = 0x14,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Estop),
            0x01 => Some(Self::Discovery),
            0x02 => Some(Self::TimeSync),
            0x03 => Some(Self::Control),
            0x04 => Some(Self::StatusRequest),
            0x05 => Some(Self::StreamStart),
            0x06 => Some(Self::StreamStop),
            0x07 => Some(Self::GetSingle),
            0x08 => Some(Self::Heartbeat),
            0x10 => Some(Self::Config),
            0x11 => Some(Self::Data),
            0x12 => Some(Self::Status),
            0x13 => Some(Self::Ack),
            0x14 => Some(Self::Nack),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

// ---------------------------------------------------------------------------
// DeviceStatus
// ---------------------------------------------------------------------------

/// Device-reported operational state (STATUS payload).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceStatus {
    Inactive = 0,
    Active = 1,
    Error = 2,
    Calibrating = 3,
}

impl DeviceStatus {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Inactive),
            1 => Some(Self::Active),
            2 => Some(Self::Error),
            3 => Some(Self::Calibrating),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inactive => write!(f, "INACTIVE"),
            Self::Active => write!(f, "ACTIVE"),
            Self::Error => write!(f, "ERROR"),
            Self::Calibrating => write!(f, "CALIBRATING"),
        }
    }
}

// ---------------------------------------------------------------------------
// ControlState
// ---------------------------------------------------------------------------

/// Commanded or reported state of a solenoid/actuator channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlState {
    Closed = 0x00,
    Open = 0x01,
    Error = 0xFF,
}

impl ControlState {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Closed),
            0x01 => Some(Self::Open),
            0xFF => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

// ---------------------------------------------------------------------------
// Unit
// ---------------------------------------------------------------------------

/// Physical unit of a sensor reading.
///
/// Codes 0x00–0x0F are the physical units grouped temperature → pressure →
/// force → mass → electrical; 0xFF is a dimensionless channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Unit {
    Celsius = 0x00,
    Fahrenheit = 0x01,
    Kelvin = 0x02,
    Pascal = 0x03,
    Kilopascal = 0x04,
    Psi = 0x05,
    Bar = 0x06,
    Millibar = 0x07,
    Newton = 0x08,
    Kilonewton = 0x09,
    PoundForce = 0x0A,
    Kilogram = 0x0B,
    Gram = 0x0C,
    Pound = 0x0D,
    Volt = 0x0E,
    Ampere = 0x0F,
    Unitless = 0xFF,
}

impl Unit {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Celsius),
            0x01 => Some(Self::Fahrenheit),
            0x02 => Some(Self::Kelvin),
            0x03 => Some(Self::Pascal),
            0x04 => Some(Self::Kilopascal),
            0x05 => Some(Self::Psi),
            0x06 => Some(Self::Bar),
            0x07 => Some(Self::Millibar),
            0x08 => Some(Self::Newton),
            0x09 => Some(Self::Kilonewton),
            0x0A => Some(Self::PoundForce),
            0x0B => Some(Self::Kilogram),
            0x0C => Some(Self::Gram),
            0x0D => Some(Self::Pound),
            0x0E => Some(Self::Volt),
            0x0F => Some(Self::Ampere),
            0xFF => Some(Self::Unitless),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Display label used in data events and CSV headers.
    pub fn label(self) -> &'static str {
        match self {
            Self::Celsius => "°C",
            Self::Fahrenheit => "°F",
            Self::Kelvin => "K",
            Self::Pascal => "Pa",
            Self::Kilopascal => "kPa",
            Self::Psi => "psi",
            Self::Bar => "bar",
            Self::Millibar => "mbar",
            Self::Newton => "N",
            Self::Kilonewton => "kN",
            Self::PoundForce => "lbf",
            Self::Kilogram => "kg",
            Self::Gram => "g",
            Self::Pound => "lb",
            Self::Volt => "V",
            Self::Ampere => "A",
            Self::Unitless => "",
        }
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Error codes carried in ACK/NACK payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    None = 0,
    UnknownType = 1,
    InvalidId = 2,
    HardwareFault = 3,
    Busy = 4,
    NotStreaming = 5,
    InvalidParam = 6,
}

impl ErrorCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::UnknownType),
            2 => Some(Self::InvalidId),
            3 => Some(Self::HardwareFault),
            4 => Some(Self::Busy),
            5 => Some(Self::NotStreaming),
            6 => Some(Self::InvalidParam),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "NONE"),
            Self::UnknownType => write!(f, "UNKNOWN_TYPE"),
            Self::InvalidId => write!(f, "INVALID_ID"),
            Self::HardwareFault => write!(f, "HARDWARE_FAULT"),
            Self::Busy => write!(f, "BUSY"),
            Self::NotStreaming => write!(f, "NOT_STREAMING"),
            Self::InvalidParam => write!(f, "INVALID_PARAM"),
        }
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// One sensor reading inside a DATA batch: 6 bytes on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Index into the device's sensor table (assigned at CONFIG time).
    pub sensor_id: u8,
    pub unit: Unit,
    pub value: f32,
}

/// Wire size of one [`Reading`].
pub const READING_LEN: usize = 6;

// ---------------------------------------------------------------------------
// Body / Packet
// ---------------------------------------------------------------------------

/// Typed packet payload; the variant fixes the wire type code.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Estop,
    Discovery,
    /// Header-only; the header timestamp carries the sender's monotonic ms.
    TimeSync,
    Control {
        cmd_id: u8,
        state: ControlState,
    },
    StatusRequest,
    StreamStart {
        freq_hz: u16,
    },
    StreamStop,
    GetSingle,
    Heartbeat,
    /// Raw JSON bytes; shape validation happens in [`crate::device_config`].
    Config {
        json: Vec<u8>,
    },
    Data {
        readings: Vec<Reading>,
    },
    Status {
        status: DeviceStatus,
    },
    Ack {
        ack_type: PacketType,
        ack_seq: u8,
        error: ErrorCode,
    },
    Nack {
        nack_type: PacketType,
        nack_seq: u8,
        error: ErrorCode,
    },
}

impl Body {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Body::Estop => PacketType::Estop,
            Body::Discovery => PacketType::Discovery,
            Body::TimeSync => PacketType::TimeSync,
            Body::Control { .. } => PacketType::Control,
            Body::StatusRequest => PacketType::StatusRequest,
            Body::StreamStart { .. } => PacketType::StreamStart,
            Body::StreamStop => PacketType::StreamStop,
            Body::GetSingle => PacketType::GetSingle,
            Body::Heartbeat => PacketType::Heartbeat,
            Body::Config { .. } => PacketType::Config,
            Body::Data { .. } => PacketType::Data,
            Body::Status { .. } => PacketType::Status,
            Body::Ack { .. } => PacketType::Ack,
            Body::Nack { .. } => PacketType::Nack,
        }
    }

    /// Total packet size on the wire, header included.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN
            + match self {
                Body::Estop
                | Body::Discovery
                | Body::TimeSync
                | Body::StatusRequest
                | Body::StreamStop
                | Body::GetSingle
                | Body::Heartbeat => 0,
                Body::Control { .. } | Body::StreamStart { .. } => 2,
                Body::Config { json } => 4 + json.len(),
                Body::Data { readings } => 1 + READING_LEN * readings.len(),
                Body::Status { .. } => 1,
                Body::Ack { .. } | Body::Nack { .. } => 3,
            }
    }
}

/// A decoded packet: the header fields that carry information plus the body.
///
/// The type code and length are derived from the body, so a `Packet` cannot
/// express a header inconsistent with its payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub version: u8,
    pub sequence: u8,
    /// Milliseconds since the sender's epoch (device boot or server start),
    /// wrapping at 32 bits.
    pub timestamp: u32,
    pub body: Body,
}

impl Packet {
    /// Build a current-version packet.
    pub fn new(sequence: u8, timestamp: u32, body: Body) -> Self {
        Packet {
            version: PROTOCOL_VERSION,
            sequence,
            timestamp,
            body,
        }
    }

    pub fn packet_type(&self) -> PacketType {
        self.body.packet_type()
    }
}
