//! Wire protocol for the test-stand device link.
//!
//! Everything in this crate is pure: byte slices in, typed packets out, and
//! back again. Socket handling, timers, and session state live in the server
//! service; keeping the codec I/O-free makes every wire rule unit-testable
//! against literal byte vectors.
//!
//! Layout:
//! - [`packet`] -- header/body model and the wire enums
//! - [`codec`] -- strict big-endian encode/decode
//! - [`frame`] -- incremental packet framing over the header length field
//! - [`device_config`] -- the CONFIG handshake JSON

pub mod codec;
pub mod device_config;
pub mod frame;
pub mod packet;

pub use codec::{CodecError, decode, encode};
pub use device_config::{ControlDef, DeviceConfig, DeviceConfigError, SensorCategory, SensorDef};
pub use frame::{FrameBuffer, FrameError};
pub use packet::{
    Body, ControlState, DeviceStatus, ErrorCode, HEADER_LEN, MAX_PACKET_LEN, PROTOCOL_VERSION,
    Packet, PacketType, Reading, Unit,
};
