//! Bit-exact serialization and syntactic validation of the ten HTTP/2 frame
//! types (spec.md §4.2). Frame-codec concerns stop at "is this frame
//! well-formed on its own"; cross-frame concerns (header-block interleave,
//! abuse-rate counters, stream-state legality) live in [`crate::connection`].

pub mod flags;
pub mod settings;

use crate::error::{ErrorType, FrameDecodeError, Http2Error};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use flags::{
    ContinuationFlags, DataFlags, HeadersFlags, PingFlags, PushPromiseFlags, SettingsFlags,
};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};
use settings::SettingsRecord;

pub type StreamId = u32;

/// https://httpwg.org/specs/rfc7540.html#FrameTypes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum FrameType {
    Data = 0x0,
    Headers = 0x1,
    Priority = 0x2,
    ResetStream = 0x3,
    Settings = 0x4,
    PushPromise = 0x5,
    Ping = 0x6,
    GoAway = 0x7,
    WindowUpdate = 0x8,
    Continuation = 0x9,
}

pub const FRAME_HEADER_LEN: usize = 9;

/// The 9-byte frame header, parsed ahead of the type-specific payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,
    pub raw_type: u8,
    pub flags: u8,
    pub stream_id: StreamId,
}

impl FrameHeader {
    pub fn parse(buf: &[u8]) -> Result<Self, FrameDecodeError> {
        if buf.len() < FRAME_HEADER_LEN {
            return Err(FrameDecodeError::PayloadTooShort);
        }
        let length = u32::from_be_bytes([0, buf[0], buf[1], buf[2]]);
        let raw_type = buf[3];
        let flags = buf[4];
        let stream_id = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]) & 0x7fff_ffff;
        Ok(Self { length, raw_type, flags, stream_id })
    }

    pub fn write(&self, out: &mut BytesMut) {
        out.put_u8((self.length >> 16) as u8);
        out.put_u8((self.length >> 8) as u8);
        out.put_u8(self.length as u8);
        out.put_u8(self.raw_type);
        out.put_u8(self.flags);
        out.put_u32(self.stream_id & 0x7fff_ffff);
    }

    pub fn frame_type(&self) -> Option<FrameType> {
        FrameType::from_u8(self.raw_type)
    }
}

/// Weight and dependency fields carried by HEADERS (with PRIORITY flag) and
/// PRIORITY frames (spec.md §4.5's tree consumes these).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Priority {
    pub exclusive: bool,
    pub dependency: StreamId,
    /// Wire weight is 0..=255 meaning actual weight 1..=256; stored as the wire byte.
    pub weight: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data {
        stream_id: StreamId,
        end_stream: bool,
        data: Bytes,
    },
    Headers {
        stream_id: StreamId,
        end_stream: bool,
        end_headers: bool,
        priority: Option<Priority>,
        fragment: Bytes,
    },
    Priority {
        stream_id: StreamId,
        priority: Priority,
    },
    ResetStream {
        stream_id: StreamId,
        error: ErrorType,
    },
    Settings {
        ack: bool,
        records: Vec<SettingsRecord>,
    },
    PushPromise {
        stream_id: StreamId,
        end_headers: bool,
        promised_stream_id: StreamId,
        fragment: Bytes,
    },
    Ping {
        ack: bool,
        data: [u8; 8],
    },
    GoAway {
        last_stream_id: StreamId,
        error: ErrorType,
        debug_data: Bytes,
    },
    WindowUpdate {
        stream_id: StreamId,
        increment: u32,
    },
    Continuation {
        stream_id: StreamId,
        end_headers: bool,
        fragment: Bytes,
    },
    /// An unrecognized frame type; must be silently discarded (spec.md §4.2).
    Unknown {
        raw_type: u8,
        stream_id: StreamId,
    },
}

fn error_type_from_u32(v: u32) -> Result<ErrorType, FrameDecodeError> {
    ErrorType::from_u32(v).ok_or(FrameDecodeError::UnknownErrorType(v))
}

fn strip_padding(mut payload: Bytes, padded: bool) -> Result<(Bytes, usize), FrameDecodeError> {
    if !padded {
        return Ok((payload, 0));
    }
    if payload.is_empty() {
        return Err(FrameDecodeError::PayloadTooShort);
    }
    let pad_len = payload[0] as usize;
    payload.advance(1);
    if pad_len > payload.len() {
        return Err(FrameDecodeError::Protocol(Http2Error::connection(
            ErrorType::ProtocolError,
        )));
    }
    let content_len = payload.len() - pad_len;
    Ok((payload.split_to(content_len), pad_len))
}

impl Frame {
    pub fn frame_type(&self) -> Option<FrameType> {
        Some(match self {
            Frame::Data { .. } => FrameType::Data,
            Frame::Headers { .. } => FrameType::Headers,
            Frame::Priority { .. } => FrameType::Priority,
            Frame::ResetStream { .. } => FrameType::ResetStream,
            Frame::Settings { .. } => FrameType::Settings,
            Frame::PushPromise { .. } => FrameType::PushPromise,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::GoAway { .. } => FrameType::GoAway,
            Frame::WindowUpdate { .. } => FrameType::WindowUpdate,
            Frame::Continuation { .. } => FrameType::Continuation,
            Frame::Unknown { .. } => return None,
        })
    }

    pub fn stream_id(&self) -> StreamId {
        match self {
            Frame::Data { stream_id, .. }
            | Frame::Headers { stream_id, .. }
            | Frame::Priority { stream_id, .. }
            | Frame::ResetStream { stream_id, .. }
            | Frame::PushPromise { stream_id, .. }
            | Frame::WindowUpdate { stream_id, .. }
            | Frame::Continuation { stream_id, .. }
            | Frame::Unknown { stream_id, .. } => *stream_id,
            Frame::Settings { .. } | Frame::Ping { .. } | Frame::GoAway { .. } => 0,
        }
    }

    /// Parses a frame given its already-read header and payload bytes.
    ///
    /// `client_parity_required` enforces the HEADERS-on-an-ingress-server
    /// rule from spec.md §4.2 (stream ids opened by a client must be odd);
    /// pass `false` when parsing as a client.
    pub fn parse(
        header: FrameHeader,
        payload: Bytes,
        client_parity_required: bool,
    ) -> Result<Frame, FrameDecodeError> {
        let stream_id = header.stream_id;
        let Some(ty) = header.frame_type() else {
            return Ok(Frame::Unknown { raw_type: header.raw_type, stream_id });
        };

        match ty {
            FrameType::Data => {
                if stream_id == 0 {
                    return Err(FrameDecodeError::ZeroStreamId);
                }
                let flags = DataFlags::from_bits_truncate(header.flags);
                let (data, _pad) = strip_padding(payload, flags.contains(DataFlags::PADDED))?;
                Ok(Frame::Data { stream_id, end_stream: flags.contains(DataFlags::END_STREAM), data })
            }
            FrameType::Headers => {
                if stream_id == 0 {
                    return Err(FrameDecodeError::ZeroStreamId);
                }
                if client_parity_required && stream_id % 2 == 0 {
                    return Err(FrameDecodeError::Protocol(Http2Error::connection(
                        ErrorType::ProtocolError,
                    )));
                }
                let flags = HeadersFlags::from_bits_truncate(header.flags);
                let (mut rest, _pad) = strip_padding(payload, flags.contains(HeadersFlags::PADDED))?;
                let priority = if flags.contains(HeadersFlags::PRIORITY) {
                    if rest.len() < 5 {
                        return Err(FrameDecodeError::PayloadTooShort);
                    }
                    let raw = rest.get_u32();
                    let weight = rest.get_u8();
                    Some(Priority {
                        exclusive: raw & 0x8000_0000 != 0,
                        dependency: raw & 0x7fff_ffff,
                        weight,
                    })
                } else {
                    None
                };
                Ok(Frame::Headers {
                    stream_id,
                    end_stream: flags.contains(HeadersFlags::END_STREAM),
                    end_headers: flags.contains(HeadersFlags::END_HEADERS),
                    priority,
                    fragment: rest,
                })
            }
            FrameType::Priority => {
                if header.length != 5 {
                    return Err(FrameDecodeError::InvalidLength(header.length));
                }
                if stream_id == 0 {
                    return Err(FrameDecodeError::ZeroStreamId);
                }
                if payload.len() != 5 {
                    return Err(FrameDecodeError::PayloadTooShort);
                }
                let mut p = payload;
                let raw = p.get_u32();
                let weight = p.get_u8();
                let dependency = raw & 0x7fff_ffff;
                if dependency == stream_id {
                    return Err(FrameDecodeError::Protocol(Http2Error::stream(
                        ErrorType::ProtocolError,
                    )));
                }
                Ok(Frame::Priority {
                    stream_id,
                    priority: Priority { exclusive: raw & 0x8000_0000 != 0, dependency, weight },
                })
            }
            FrameType::ResetStream => {
                if header.length != 4 {
                    return Err(FrameDecodeError::InvalidLength(header.length));
                }
                if stream_id == 0 {
                    return Err(FrameDecodeError::ZeroStreamId);
                }
                if payload.len() != 4 {
                    return Err(FrameDecodeError::PayloadTooShort);
                }
                let error = error_type_from_u32(u32::from_be_bytes(payload[0..4].try_into().unwrap()))?;
                Ok(Frame::ResetStream { stream_id, error })
            }
            FrameType::Settings => {
                if stream_id != 0 {
                    return Err(FrameDecodeError::Protocol(Http2Error::connection(
                        ErrorType::ProtocolError,
                    )));
                }
                let flags = SettingsFlags::from_bits_truncate(header.flags);
                let ack = flags.contains(SettingsFlags::ACK);
                if ack {
                    if header.length != 0 {
                        return Err(FrameDecodeError::Protocol(Http2Error::connection(
                            ErrorType::FrameSizeError,
                        )));
                    }
                    return Ok(Frame::Settings { ack: true, records: Vec::new() });
                }
                if payload.len() % 6 != 0 {
                    return Err(FrameDecodeError::Protocol(Http2Error::connection(
                        ErrorType::FrameSizeError,
                    )));
                }
                let mut records = Vec::with_capacity(payload.len() / 6);
                for chunk in payload.chunks(6) {
                    let id = u16::from_be_bytes([chunk[0], chunk[1]]);
                    let value = u32::from_be_bytes(chunk[2..6].try_into().unwrap());
                    if let Some(parameter) = settings::SettingsParameter::from_u16(id) {
                        records.push(SettingsRecord { parameter, value });
                    }
                    // unknown settings identifiers are ignored, per RFC 7540 §6.5.2
                }
                Ok(Frame::Settings { ack: false, records })
            }
            FrameType::PushPromise => {
                // spec.md §4.2: any receipt on the server side is a protocol error.
                // We still parse it syntactically so callers can classify and react.
                if stream_id == 0 {
                    return Err(FrameDecodeError::ZeroStreamId);
                }
                let flags = PushPromiseFlags::from_bits_truncate(header.flags);
                let (mut rest, _pad) =
                    strip_padding(payload, flags.contains(PushPromiseFlags::PADDED))?;
                if rest.len() < 4 {
                    return Err(FrameDecodeError::PayloadTooShort);
                }
                let promised_stream_id = rest.get_u32() & 0x7fff_ffff;
                Ok(Frame::PushPromise {
                    stream_id,
                    end_headers: flags.contains(PushPromiseFlags::END_HEADERS),
                    promised_stream_id,
                    fragment: rest,
                })
            }
            FrameType::Ping => {
                if header.length != 8 {
                    return Err(FrameDecodeError::InvalidLength(header.length));
                }
                if stream_id != 0 {
                    return Err(FrameDecodeError::Protocol(Http2Error::connection(
                        ErrorType::ProtocolError,
                    )));
                }
                if payload.len() != 8 {
                    return Err(FrameDecodeError::PayloadTooShort);
                }
                let flags = PingFlags::from_bits_truncate(header.flags);
                let mut data = [0u8; 8];
                data.copy_from_slice(&payload[0..8]);
                Ok(Frame::Ping { ack: flags.contains(PingFlags::ACK), data })
            }
            FrameType::GoAway => {
                if stream_id != 0 {
                    return Err(FrameDecodeError::Protocol(Http2Error::connection(
                        ErrorType::ProtocolError,
                    )));
                }
                if payload.len() < 8 {
                    return Err(FrameDecodeError::PayloadTooShort);
                }
                let mut p = payload;
                let last_stream_id = p.get_u32() & 0x7fff_ffff;
                let error = error_type_from_u32(p.get_u32())?;
                Ok(Frame::GoAway { last_stream_id, error, debug_data: p })
            }
            FrameType::WindowUpdate => {
                if header.length != 4 {
                    return Err(FrameDecodeError::InvalidLength(header.length));
                }
                if payload.len() != 4 {
                    return Err(FrameDecodeError::PayloadTooShort);
                }
                let increment = u32::from_be_bytes(payload[0..4].try_into().unwrap()) & 0x7fff_ffff;
                if increment == 0 {
                    let class = if stream_id == 0 {
                        crate::error::ErrorClass::Connection
                    } else {
                        crate::error::ErrorClass::Stream
                    };
                    return Err(FrameDecodeError::Protocol(Http2Error {
                        class,
                        code: ErrorType::ProtocolError,
                    }));
                }
                Ok(Frame::WindowUpdate { stream_id, increment })
            }
            FrameType::Continuation => {
                if stream_id == 0 {
                    return Err(FrameDecodeError::ZeroStreamId);
                }
                let flags = ContinuationFlags::from_bits_truncate(header.flags);
                Ok(Frame::Continuation {
                    stream_id,
                    end_headers: flags.contains(ContinuationFlags::END_HEADERS),
                    fragment: payload,
                })
            }
        }
    }

    /// Serializes the 9-byte header plus payload into `out`. No padding is
    /// ever emitted; we pad on receipt tolerance only, not on send.
    pub fn write_into(&self, out: &mut BytesMut) {
        match self {
            Frame::Data { stream_id, end_stream, data } => {
                let flags = if *end_stream { DataFlags::END_STREAM.bits() } else { 0 };
                FrameHeader {
                    length: data.len() as u32,
                    raw_type: FrameType::Data.to_u8().unwrap(),
                    flags,
                    stream_id: *stream_id,
                }
                .write(out);
                out.extend_from_slice(data);
            }
            Frame::Headers { stream_id, end_stream, end_headers, priority, fragment } => {
                let mut flags = 0u8;
                if *end_stream {
                    flags |= HeadersFlags::END_STREAM.bits();
                }
                if *end_headers {
                    flags |= HeadersFlags::END_HEADERS.bits();
                }
                if priority.is_some() {
                    flags |= HeadersFlags::PRIORITY.bits();
                }
                let prio_len = if priority.is_some() { 5 } else { 0 };
                FrameHeader {
                    length: (prio_len + fragment.len()) as u32,
                    raw_type: FrameType::Headers.to_u8().unwrap(),
                    flags,
                    stream_id: *stream_id,
                }
                .write(out);
                if let Some(p) = priority {
                    let dep = p.dependency & 0x7fff_ffff | if p.exclusive { 0x8000_0000 } else { 0 };
                    out.put_u32(dep);
                    out.put_u8(p.weight);
                }
                out.extend_from_slice(fragment);
            }
            Frame::Priority { stream_id, priority } => {
                FrameHeader {
                    length: 5,
                    raw_type: FrameType::Priority.to_u8().unwrap(),
                    flags: 0,
                    stream_id: *stream_id,
                }
                .write(out);
                let dep = priority.dependency & 0x7fff_ffff
                    | if priority.exclusive { 0x8000_0000 } else { 0 };
                out.put_u32(dep);
                out.put_u8(priority.weight);
            }
            Frame::ResetStream { stream_id, error } => {
                FrameHeader {
                    length: 4,
                    raw_type: FrameType::ResetStream.to_u8().unwrap(),
                    flags: 0,
                    stream_id: *stream_id,
                }
                .write(out);
                out.put_u32(error.to_u32().unwrap());
            }
            Frame::Settings { ack, records } => {
                let flags = if *ack { SettingsFlags::ACK.bits() } else { 0 };
                FrameHeader {
                    length: (records.len() * 6) as u32,
                    raw_type: FrameType::Settings.to_u8().unwrap(),
                    flags,
                    stream_id: 0,
                }
                .write(out);
                for record in records {
                    out.put_u16(record.parameter.to_u16().unwrap());
                    out.put_u32(record.value);
                }
            }
            Frame::PushPromise { stream_id, end_headers, promised_stream_id, fragment } => {
                let flags = if *end_headers { PushPromiseFlags::END_HEADERS.bits() } else { 0 };
                FrameHeader {
                    length: (4 + fragment.len()) as u32,
                    raw_type: FrameType::PushPromise.to_u8().unwrap(),
                    flags,
                    stream_id: *stream_id,
                }
                .write(out);
                out.put_u32(promised_stream_id & 0x7fff_ffff);
                out.extend_from_slice(fragment);
            }
            Frame::Ping { ack, data } => {
                let flags = if *ack { PingFlags::ACK.bits() } else { 0 };
                FrameHeader {
                    length: 8,
                    raw_type: FrameType::Ping.to_u8().unwrap(),
                    flags,
                    stream_id: 0,
                }
                .write(out);
                out.extend_from_slice(data);
            }
            Frame::GoAway { last_stream_id, error, debug_data } => {
                FrameHeader {
                    length: (8 + debug_data.len()) as u32,
                    raw_type: FrameType::GoAway.to_u8().unwrap(),
                    flags: 0,
                    stream_id: 0,
                }
                .write(out);
                out.put_u32(last_stream_id & 0x7fff_ffff);
                out.put_u32(error.to_u32().unwrap());
                out.extend_from_slice(debug_data);
            }
            Frame::WindowUpdate { stream_id, increment } => {
                FrameHeader {
                    length: 4,
                    raw_type: FrameType::WindowUpdate.to_u8().unwrap(),
                    flags: 0,
                    stream_id: *stream_id,
                }
                .write(out);
                out.put_u32(increment & 0x7fff_ffff);
            }
            Frame::Continuation { stream_id, end_headers, fragment } => {
                let flags = if *end_headers { ContinuationFlags::END_HEADERS.bits() } else { 0 };
                FrameHeader {
                    length: fragment.len() as u32,
                    raw_type: FrameType::Continuation.to_u8().unwrap(),
                    flags,
                    stream_id: *stream_id,
                }
                .write(out);
                out.extend_from_slice(fragment);
            }
            Frame::Unknown { .. } => {
                // never constructed for outbound use
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: Frame, client_parity_required: bool) -> Frame {
        let mut buf = BytesMut::new();
        frame.write_into(&mut buf);
        let header = FrameHeader::parse(&buf[0..FRAME_HEADER_LEN]).unwrap();
        let payload = Bytes::copy_from_slice(&buf[FRAME_HEADER_LEN..]);
        Frame::parse(header, payload, client_parity_required).unwrap()
    }

    #[test]
    fn data_roundtrip() {
        let frame = Frame::Data { stream_id: 1, end_stream: true, data: Bytes::from_static(b"hi") };
        assert_eq!(roundtrip(frame.clone(), false), frame);
    }

    #[test]
    fn headers_roundtrip_with_priority() {
        let frame = Frame::Headers {
            stream_id: 3,
            end_stream: false,
            end_headers: true,
            priority: Some(Priority { exclusive: true, dependency: 1, weight: 15 }),
            fragment: Bytes::from_static(b"\x82"),
        };
        assert_eq!(roundtrip(frame.clone(), true), frame);
    }

    #[test]
    fn priority_rejects_self_dependency() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0, 0, 5, 2, 0, 0, 0, 0, 1]);
        buf.extend_from_slice(&1u32.to_be_bytes());
        buf.put_u8(0);
        let header = FrameHeader::parse(&buf[0..9]).unwrap();
        let payload = Bytes::copy_from_slice(&buf[9..]);
        let err = Frame::parse(header, payload, false).unwrap_err();
        match err {
            FrameDecodeError::Protocol(e) => assert_eq!(e.code, ErrorType::ProtocolError),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn window_update_zero_increment_is_protocol_error() {
        // scenario 4 from spec.md §8: stream 0, zero increment.
        let bytes: &[u8] = &[0, 0, 4, 8, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let header = FrameHeader::parse(&bytes[0..9]).unwrap();
        let payload = Bytes::copy_from_slice(&bytes[9..]);
        let err = Frame::parse(header, payload, false).unwrap_err();
        match err {
            FrameDecodeError::Protocol(e) => {
                assert_eq!(e.code, ErrorType::ProtocolError);
                assert_eq!(e.class, crate::error::ErrorClass::Connection);
            }
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn ping_ack_echoes_opaque_data() {
        // scenario 5 from spec.md §8.
        let bytes: &[u8] =
            &[0, 0, 8, 6, 0, 0, 0, 0, 0, 0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE, 0xBA, 0xBE];
        let header = FrameHeader::parse(&bytes[0..9]).unwrap();
        let payload = Bytes::copy_from_slice(&bytes[9..]);
        let frame = Frame::parse(header, payload, false).unwrap();
        match frame {
            Frame::Ping { ack, data } => {
                assert!(!ack);
                assert_eq!(data, [0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE, 0xBA, 0xBE]);
            }
            _ => panic!("wrong frame"),
        }
    }

    #[test]
    fn settings_ack_must_be_empty() {
        let bytes: &[u8] = &[0, 0, 6, 4, 1, 0, 0, 0, 0, 0, 1, 0, 0, 0, 1];
        let header = FrameHeader::parse(&bytes[0..9]).unwrap();
        let payload = Bytes::copy_from_slice(&bytes[9..]);
        let err = Frame::parse(header, payload, false).unwrap_err();
        match err {
            FrameDecodeError::Protocol(e) => assert_eq!(e.code, ErrorType::FrameSizeError),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn padded_priority_headers_parses_priority_after_padding() {
        // Open question in spec.md §9: PADDED + PRIORITY together on HEADERS.
        let mut payload = BytesMut::new();
        payload.put_u8(2); // pad length
        payload.put_u32(0x8000_0001); // exclusive dependency on stream 1
        payload.put_u8(42); // weight
        payload.extend_from_slice(b"\x82"); // header block fragment
        payload.extend_from_slice(&[0, 0]); // padding

        let flags = (HeadersFlags::PADDED | HeadersFlags::PRIORITY | HeadersFlags::END_HEADERS).bits();
        let header = FrameHeader { length: payload.len() as u32, raw_type: 1, flags, stream_id: 3 };
        let frame = Frame::parse(header, payload.freeze(), false).unwrap();
        match frame {
            Frame::Headers { priority, fragment, .. } => {
                let p = priority.unwrap();
                assert!(p.exclusive);
                assert_eq!(p.dependency, 1);
                assert_eq!(p.weight, 42);
                assert_eq!(&fragment[..], b"\x82");
            }
            _ => panic!("wrong frame"),
        }
    }

    #[test]
    fn unknown_frame_type_is_discarded_not_errored() {
        let header = FrameHeader { length: 0, raw_type: 0xff, flags: 0, stream_id: 7 };
        let frame = Frame::parse(header, Bytes::new(), false).unwrap();
        assert!(matches!(frame, Frame::Unknown { raw_type: 0xff, stream_id: 7 }));
    }
}
