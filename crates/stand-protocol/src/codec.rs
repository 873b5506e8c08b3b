//! Strict encode/decode between packets and wire bytes.
//!
//! All multi-byte integers and the 32-bit float are big-endian. `decode`
//! rejects anything whose length field, payload size, or enum-valued bytes
//! are off; a codec error is fatal to the connection that produced it.

use crate::packet::{
    Body, ControlState, DeviceStatus, ErrorCode, HEADER_LEN, Packet, PacketType, READING_LEN,
    Reading, Unit,
};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("packet truncated: {0} bytes, header needs {HEADER_LEN}")]
    Truncated(usize),
    #[error("header length {header} does not match buffer size {actual}")]
    LengthMismatch { header: u16, actual: usize },
    #[error("unknown packet type 0x{0:02X}")]
    UnknownType(u8),
    #[error("wrong length {actual} for {packet_type:?} (expected {expected})")]
    WrongLength {
        packet_type: PacketType,
        expected: usize,
        actual: usize,
    },
    #[error("invalid {field} value 0x{value:02X}")]
    InvalidValue { field: &'static str, value: u8 },
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// Encode a packet into exactly `packet.body.wire_len()` bytes.
///
/// The header length field is always consistent with the returned buffer.
pub fn encode(packet: &Packet) -> Vec<u8> {
    let len = packet.body.wire_len();
    debug_assert!(len <= u16::MAX as usize, "body exceeds wire length field");
    let mut out = Vec::with_capacity(len);
    out.push(packet.version);
    out.push(packet.packet_type().as_u8());
    out.push(packet.sequence);
    out.extend_from_slice(&(len as u16).to_be_bytes());
    out.extend_from_slice(&packet.timestamp.to_be_bytes());

    match &packet.body {
        Body::Estop
        | Body::Discovery
        | Body::TimeSync
        | Body::StatusRequest
        | Body::StreamStop
        | Body::GetSingle
        | Body::Heartbeat => {}
        Body::Control { cmd_id, state } => {
            out.push(*cmd_id);
            out.push(state.as_u8());
        }
        Body::StreamStart { freq_hz } => {
            out.extend_from_slice(&freq_hz.to_be_bytes());
        }
        Body::Config { json } => {
            out.extend_from_slice(&(json.len() as u32).to_be_bytes());
            out.extend_from_slice(json);
        }
        Body::Data { readings } => {
            debug_assert!(readings.len() <= u8::MAX as usize, "DATA count is a u8");
            out.push(readings.len() as u8);
            for r in readings {
                out.push(r.sensor_id);
                out.push(r.unit.as_u8());
                out.extend_from_slice(&r.value.to_be_bytes());
            }
        }
        Body::Status { status } => {
            out.push(*status as u8);
        }
        Body::Ack {
            ack_type,
            ack_seq,
            error,
        } => {
            out.push(ack_type.as_u8());
            out.push(*ack_seq);
            out.push(error.as_u8());
        }
        Body::Nack {
            nack_type,
            nack_seq,
            error,
        } => {
            out.push(nack_type.as_u8());
            out.push(*nack_seq);
            out.push(error.as_u8());
        }
    }

    debug_assert_eq!(out.len(), len);
    out
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Decode one complete packet from `bytes`.
///
/// The buffer must hold exactly one packet: the framing layer is responsible
/// for segmentation, so any length disagreement here is an error, not a
/// partial read.
pub fn decode(bytes: &[u8]) -> Result<Packet, CodecError> {
    if bytes.len() < HEADER_LEN {
        return Err(CodecError::Truncated(bytes.len()));
    }
    let version = bytes[0];
    let type_code = bytes[1];
    let sequence = bytes[2];
    let header_len = u16::from_be_bytes([bytes[3], bytes[4]]);
    let timestamp = u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);

    if header_len as usize != bytes.len() {
        return Err(CodecError::LengthMismatch {
            header: header_len,
            actual: bytes.len(),
        });
    }

    let packet_type =
        PacketType::from_u8(type_code).ok_or(CodecError::UnknownType(type_code))?;
    let payload = &bytes[HEADER_LEN..];

    let body = match packet_type {
        PacketType::Estop => fixed(packet_type, payload, 0, Body::Estop)?,
        PacketType::Discovery => fixed(packet_type, payload, 0, Body::Discovery)?,
        PacketType::TimeSync => fixed(packet_type, payload, 0, Body::TimeSync)?,
        PacketType::StatusRequest => fixed(packet_type, payload, 0, Body::StatusRequest)?,
        PacketType::StreamStop => fixed(packet_type, payload, 0, Body::StreamStop)?,
        PacketType::GetSingle => fixed(packet_type, payload, 0, Body::GetSingle)?,
        PacketType::Heartbeat => fixed(packet_type, payload, 0, Body::Heartbeat)?,
        PacketType::Control => {
            expect_len(packet_type, payload, 2)?;
            let state = ControlState::from_u8(payload[1]).ok_or(CodecError::InvalidValue {
                field: "cmd_state",
                value: payload[1],
            })?;
            Body::Control {
                cmd_id: payload[0],
                state,
            }
        }
        PacketType::StreamStart => {
            expect_len(packet_type, payload, 2)?;
            Body::StreamStart {
                freq_hz: u16::from_be_bytes([payload[0], payload[1]]),
            }
        }
        PacketType::Config => {
            if payload.len() < 4 {
                return Err(CodecError::WrongLength {
                    packet_type,
                    expected: 4,
                    actual: payload.len(),
                });
            }
            let json_len =
                u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
            if payload.len() - 4 != json_len {
                return Err(CodecError::WrongLength {
                    packet_type,
                    expected: 4 + json_len,
                    actual: payload.len(),
                });
            }
            Body::Config {
                json: payload[4..].to_vec(),
            }
        }
        PacketType::Data => {
            if payload.is_empty() {
                return Err(CodecError::WrongLength {
                    packet_type,
                    expected: 1,
                    actual: 0,
                });
            }
            let count = payload[0] as usize;
            // Empty batch (count == 0) is a valid no-op.
            expect_len(packet_type, payload, 1 + count * READING_LEN)?;
            let mut readings = Vec::with_capacity(count);
            for chunk in payload[1..].chunks_exact(READING_LEN) {
                let unit = Unit::from_u8(chunk[1]).ok_or(CodecError::InvalidValue {
                    field: "unit",
                    value: chunk[1],
                })?;
                readings.push(Reading {
                    sensor_id: chunk[0],
                    unit,
                    value: f32::from_be_bytes([chunk[2], chunk[3], chunk[4], chunk[5]]),
                });
            }
            Body::Data { readings }
        }
        PacketType::Status => {
            expect_len(packet_type, payload, 1)?;
            let status = DeviceStatus::from_u8(payload[0]).ok_or(CodecError::InvalidValue {
                field: "status",
                value: payload[0],
            })?;
            Body::Status { status }
        }
        PacketType::Ack | PacketType::Nack => {
            expect_len(packet_type, payload, 3)?;
            let acked_type =
                PacketType::from_u8(payload[0]).ok_or(CodecError::InvalidValue {
                    field: "ack_type",
                    value: payload[0],
                })?;
            let error = ErrorCode::from_u8(payload[2]).ok_or(CodecError::InvalidValue {
                field: "error_code",
                value: payload[2],
            })?;
            if packet_type == PacketType::Ack {
                Body::Ack {
                    ack_type: acked_type,
                    ack_seq: payload[1],
                    error,
                }
            } else {
                Body::Nack {
                    nack_type: acked_type,
                    nack_seq: payload[1],
                    error,
                }
            }
        }
    };

    Ok(Packet {
        version,
        sequence,
        timestamp,
        body,
    })
}

fn expect_len(
    packet_type: PacketType,
    payload: &[u8],
    expected: usize,
) -> Result<(), CodecError> {
    if payload.len() == expected {
        Ok(())
    } else {
        Err(CodecError::WrongLength {
            packet_type,
            expected,
            actual: payload.len(),
        })
    }
}

fn fixed(
    packet_type: PacketType,
    payload: &[u8],
    expected: usize,
    body: Body,
) -> Result<Body, CodecError> {
    expect_len(packet_type, payload, expected)?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(body: Body) {
        let packet = Packet::new(0x2A, 0x0102_0304, body);
        let bytes = encode(&packet);
        assert_eq!(
            u16::from_be_bytes([bytes[3], bytes[4]]) as usize,
            bytes.len(),
            "header length must equal buffer size"
        );
        assert_eq!(decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn round_trips_every_packet_type() {
        round_trip(Body::Estop);
        round_trip(Body::Discovery);
        round_trip(Body::TimeSync);
        round_trip(Body::Control {
            cmd_id: 3,
            state: ControlState::Open,
        });
        round_trip(Body::StatusRequest);
        round_trip(Body::StreamStart { freq_hz: 1000 });
        round_trip(Body::StreamStop);
        round_trip(Body::GetSingle);
        round_trip(Body::Heartbeat);
        round_trip(Body::Config {
            json: br#"{"deviceName":"D"}"#.to_vec(),
        });
        round_trip(Body::Data {
            readings: vec![
                Reading {
                    sensor_id: 0,
                    unit: Unit::Psi,
                    value: 38.6,
                },
                Reading {
                    sensor_id: 7,
                    unit: Unit::Celsius,
                    value: -40.25,
                },
            ],
        });
        round_trip(Body::Data { readings: vec![] });
        round_trip(Body::Status {
            status: DeviceStatus::Calibrating,
        });
        round_trip(Body::Ack {
            ack_type: PacketType::Config,
            ack_seq: 0,
            error: ErrorCode::None,
        });
        round_trip(Body::Nack {
            nack_type: PacketType::Control,
            nack_seq: 9,
            error: ErrorCode::InvalidId,
        });
    }

    #[test]
    fn config_wire_bytes_match_handshake_example() {
        // 18-byte JSON payload → length 31 (0x1F).
        let packet = Packet::new(
            0x00,
            0,
            Body::Config {
                json: br#"{"deviceName":"D"}"#.to_vec(),
            },
        );
        let bytes = encode(&packet);
        assert_eq!(
            &bytes[..13],
            &[
                0x02, 0x10, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x12
            ]
        );
        assert_eq!(&bytes[13..], br#"{"deviceName":"D"}"#);
    }

    #[test]
    fn data_wire_bytes_match_stream_example() {
        // Two PSI readings: 38.6 and 145.2.
        let packet = Packet::new(
            0x07,
            0x0000_1234,
            Body::Data {
                readings: vec![
                    Reading {
                        sensor_id: 0,
                        unit: Unit::Psi,
                        value: 38.6,
                    },
                    Reading {
                        sensor_id: 1,
                        unit: Unit::Psi,
                        value: 145.2,
                    },
                ],
            },
        );
        let bytes = encode(&packet);
        assert_eq!(bytes.len(), 0x16);
        assert_eq!(bytes[1], 0x11);
        assert_eq!(bytes[9], 0x02);
        assert_eq!(&bytes[10..16], &[0x00, 0x05, 0x42, 0x1A, 0x66, 0x66]);
        assert_eq!(&bytes[16..22], &[0x01, 0x05, 0x43, 0x11, 0x33, 0x33]);
    }

    #[test]
    fn nack_wire_bytes_match_control_example() {
        let packet = Packet::new(
            0x0B,
            1,
            Body::Nack {
                nack_type: PacketType::Control,
                nack_seq: 0x51,
                error: ErrorCode::InvalidId,
            },
        );
        let bytes = encode(&packet);
        assert_eq!(bytes.len(), 0x0C);
        assert_eq!(&bytes[9..], &[0x03, 0x51, 0x02]);
    }

    #[test]
    fn rejects_truncated_header() {
        assert_eq!(
            decode(&[0x02, 0x00, 0x00]),
            Err(CodecError::Truncated(3))
        );
    }

    #[test]
    fn rejects_header_length_disagreeing_with_buffer() {
        let mut bytes = encode(&Packet::new(0, 0, Body::Heartbeat));
        bytes.push(0xAA);
        assert_eq!(
            decode(&bytes),
            Err(CodecError::LengthMismatch {
                header: 9,
                actual: 10
            })
        );
    }

    #[test]
    fn rejects_unknown_type() {
        let mut bytes = encode(&Packet::new(0, 0, Body::Heartbeat));
        bytes[1] = 0x0C;
        assert_eq!(decode(&bytes), Err(CodecError::UnknownType(0x0C)));
    }

    #[test]
    fn rejects_oversized_fixed_packet() {
        // A 17-byte TIMESYNC (the u64-payload variant) is not this protocol.
        let mut bytes = vec![0x02, 0x02, 0x00, 0x00, 0x11, 0, 0, 0, 0];
        bytes.extend_from_slice(&[0u8; 8]);
        assert_eq!(
            decode(&bytes),
            Err(CodecError::WrongLength {
                packet_type: PacketType::TimeSync,
                expected: 0,
                actual: 8
            })
        );
    }

    #[test]
    fn rejects_data_count_disagreeing_with_length() {
        // count says 2 but only one reading is present.
        let packet = Packet::new(
            0,
            0,
            Body::Data {
                readings: vec![Reading {
                    sensor_id: 0,
                    unit: Unit::Psi,
                    value: 1.0,
                }],
            },
        );
        let mut bytes = encode(&packet);
        bytes[9] = 0x02;
        assert!(matches!(
            decode(&bytes),
            Err(CodecError::WrongLength {
                packet_type: PacketType::Data,
                ..
            })
        ));
    }

    #[test]
    fn rejects_config_json_len_disagreeing_with_length() {
        let packet = Packet::new(
            0,
            0,
            Body::Config {
                json: b"{}".to_vec(),
            },
        );
        let mut bytes = encode(&packet);
        // Claim a 3-byte JSON inside a 2-byte payload.
        bytes[12] = 0x03;
        assert!(matches!(
            decode(&bytes),
            Err(CodecError::WrongLength {
                packet_type: PacketType::Config,
                ..
            })
        ));
    }

    #[test]
    fn rejects_out_of_domain_enum_bytes() {
        let mut status = encode(&Packet::new(
            0,
            0,
            Body::Status {
                status: DeviceStatus::Active,
            },
        ));
        status[9] = 0x04;
        assert_eq!(
            decode(&status),
            Err(CodecError::InvalidValue {
                field: "status",
                value: 0x04
            })
        );

        let mut data = encode(&Packet::new(
            0,
            0,
            Body::Data {
                readings: vec![Reading {
                    sensor_id: 0,
                    unit: Unit::Psi,
                    value: 1.0,
                }],
            },
        ));
        data[11] = 0x20;
        assert_eq!(
            decode(&data),
            Err(CodecError::InvalidValue {
                field: "unit",
                value: 0x20
            })
        );
    }

    #[test]
    fn empty_data_batch_is_accepted() {
        let bytes = encode(&Packet::new(5, 77, Body::Data { readings: vec![] }));
        assert_eq!(bytes.len(), 10);
        let packet = decode(&bytes).unwrap();
        assert_eq!(packet.body, Body::Data { readings: vec![] });
    }
}
