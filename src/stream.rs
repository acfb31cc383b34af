//! Per-exchange state machine (spec.md §4.4). Tracks RFC 7540 §5.1 state
//! transitions, accumulates header blocks split across HEADERS/CONTINUATION,
//! detects and validates trailers, and enforces content-length.

use crate::error::{ErrorType, Http2Error, Http2Result};
use crate::window::Window;
use bytes::{Bytes, BytesMut};

/// Headers that are connection-specific in HTTP/1.1 and forbidden in an
/// HTTP/2 header block (invariant I6).
const CONNECTION_SPECIFIC_HEADERS: &[&str] =
    &["connection", "keep-alive", "proxy-connection", "transfer-encoding", "upgrade"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

/// Which header-opening frame type is currently being continued, so a
/// CONTINUATION's END_HEADERS can be routed back to the right completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuing {
    Headers,
    PushPromise,
}

#[derive(Debug)]
pub struct Stream {
    pub id: u32,
    state: StreamState,
    pub window: Window,
    continuing: Option<Continuing>,
    header_block: BytesMut,

    pub receive_end_stream: bool,
    pub send_end_stream: bool,
    /// Set once a leading header block (with or without END_STREAM) has been
    /// decoded; a later HEADERS frame on this stream is then a trailer.
    pub trailing_header_is_possible: bool,
    pub expect_send_trailer: bool,
    pub expect_receive_trailer: bool,
    pub is_outbound: bool,
    pub is_tunneling: bool,

    body_bytes_received: u64,
    content_length: Option<u64>,
    /// True once any non-trailer DATA has arrived; used to distinguish a
    /// leading HEADERS-only request/response from one followed by trailers.
    received_any_data: bool,
}

impl Stream {
    pub fn new(id: u32, peer_window: i64, local_window: i64, is_outbound: bool) -> Self {
        Self {
            id,
            state: StreamState::Idle,
            window: Window::new(peer_window, local_window),
            continuing: None,
            header_block: BytesMut::with_capacity(4096),
            receive_end_stream: false,
            send_end_stream: false,
            trailing_header_is_possible: false,
            expect_send_trailer: false,
            expect_receive_trailer: false,
            is_outbound,
            is_tunneling: false,
            body_bytes_received: 0,
            content_length: None,
            received_any_data: false,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }

    pub fn continuing(&self) -> Option<Continuing> {
        self.continuing
    }

    // -- RFC 7540 §5.1 state transitions -----------------------------------

    pub fn on_push_promise(&mut self, recv: bool) -> Http2Result<()> {
        if self.state != StreamState::Idle {
            return Err(Http2Error::connection(ErrorType::ProtocolError));
        }
        self.state = if recv { StreamState::ReservedRemote } else { StreamState::ReservedLocal };
        Ok(())
    }

    pub fn on_headers(&mut self, recv: bool, end_headers: bool, end_stream: bool) -> Http2Result<()> {
        if !end_headers {
            self.continuing = Some(Continuing::Headers);
            return Ok(());
        }
        self.continuing = None;
        self.apply_headers_transition(recv, end_stream)
    }

    pub fn on_continuation_end_headers(&mut self, recv: bool, end_stream: bool) -> Http2Result<()> {
        let was_continuing_headers = self.continuing == Some(Continuing::Headers);
        self.continuing = None;
        if was_continuing_headers {
            self.apply_headers_transition(recv, end_stream)
        } else {
            // PUSH_PROMISE continuation: no state change of its own beyond
            // what on_push_promise already did.
            Ok(())
        }
    }

    fn apply_headers_transition(&mut self, recv: bool, end_stream: bool) -> Http2Result<()> {
        match self.state {
            StreamState::Idle => {
                self.state = if end_stream && recv {
                    StreamState::HalfClosedRemote
                } else {
                    StreamState::Open
                };
            }
            StreamState::ReservedLocal if !recv => {
                self.state = StreamState::HalfClosedRemote;
            }
            StreamState::ReservedRemote if recv => {
                self.state = StreamState::HalfClosedLocal;
            }
            StreamState::Open => {
                self.apply_end_stream(recv, end_stream);
            }
            StreamState::HalfClosedRemote if !recv && end_stream => {
                self.state = StreamState::Closed;
            }
            StreamState::HalfClosedLocal if recv && end_stream => {
                self.state = StreamState::Closed;
            }
            StreamState::Closed => {
                return Err(Http2Error::stream(ErrorType::StreamClosed));
            }
            _ => return Err(Http2Error::connection(ErrorType::ProtocolError)),
        }
        if end_stream {
            if recv {
                self.receive_end_stream = true;
            } else {
                self.send_end_stream = true;
            }
        }
        Ok(())
    }

    pub fn on_data(&mut self, recv: bool, len: u64, end_stream: bool) -> Http2Result<()> {
        if self.state != StreamState::Open
            && !(recv && self.state == StreamState::HalfClosedLocal)
            && (recv || self.state != StreamState::HalfClosedRemote)
        {
            return Err(Http2Error::stream(ErrorType::StreamClosed));
        }
        if recv {
            self.body_bytes_received += len;
            self.received_any_data = true;
            if let Some(expected) = self.content_length {
                if end_stream && self.body_bytes_received != expected {
                    return Err(Http2Error::stream(ErrorType::ProtocolError));
                }
            }
        }
        if self.state == StreamState::Open {
            self.apply_end_stream(recv, end_stream);
        } else if end_stream {
            self.state = StreamState::Closed;
        }
        if end_stream {
            if recv {
                self.receive_end_stream = true;
            } else {
                self.send_end_stream = true;
            }
        }
        Ok(())
    }

    fn apply_end_stream(&mut self, recv: bool, end_stream: bool) {
        if !end_stream {
            return;
        }
        self.state = if recv { StreamState::HalfClosedRemote } else { StreamState::HalfClosedLocal };
    }

    pub fn on_rst_stream(&mut self) -> Http2Result<()> {
        if self.state == StreamState::Idle {
            return Err(Http2Error::connection(ErrorType::ProtocolError));
        }
        self.state = StreamState::Closed;
        Ok(())
    }

    // -- Header-block accumulation (spec.md §4.4) --------------------------

    pub fn append_header_fragment(&mut self, fragment: &[u8]) {
        self.header_block.extend_from_slice(fragment);
    }

    /// Drains the accumulated header-block bytes for HPACK decoding. Must
    /// only be called once END_HEADERS has been seen.
    pub fn take_header_block(&mut self) -> Bytes {
        std::mem::take(&mut self.header_block).freeze()
    }

    /// Whether a just-decoded HEADERS block on this stream is a trailer
    /// rather than the leading request/response headers: some DATA must
    /// already have arrived without END_STREAM, and no leading headers
    /// decode has itself used this path yet for the current direction.
    pub fn is_trailer_block(&self) -> bool {
        self.trailing_header_is_possible && self.received_any_data
    }

    pub fn mark_leading_headers_decoded(&mut self) {
        self.trailing_header_is_possible = true;
    }

    /// Validates a just-decoded leading header block: pseudo-headers must
    /// precede regular headers (I5) and no connection-specific header may
    /// be present (I6). Also extracts `content-length` for later validation.
    pub fn validate_and_ingest_headers(&mut self, headers: &[(String, String)]) -> Http2Result<()> {
        let mut seen_regular = false;
        for (name, value) in headers {
            let is_pseudo = name.starts_with(':');
            if is_pseudo && seen_regular {
                return Err(Http2Error::stream(ErrorType::ProtocolError));
            }
            if !is_pseudo {
                seen_regular = true;
                if CONNECTION_SPECIFIC_HEADERS.contains(&name.as_str()) {
                    return Err(Http2Error::stream(ErrorType::ProtocolError));
                }
                if name == "content-length" {
                    self.content_length = value.parse::<u64>().ok();
                }
            }
        }
        Ok(())
    }

    /// A trailer block must carry END_STREAM (spec.md §4.4 "Trailers"). When
    /// it does, the stream is ending on this header block rather than a DATA
    /// frame, so this is also the only place left to check the running body
    /// size against a declared `content-length` (spec.md §4.4: "the running
    /// sum of DATA-payload bytes … must equal that value at END_STREAM").
    pub fn validate_trailer(&self, end_stream: bool) -> Http2Result<()> {
        if !end_stream {
            return Err(Http2Error::stream(ErrorType::ProtocolError));
        }
        if let Some(expected) = self.content_length {
            if self.body_bytes_received != expected {
                return Err(Http2Error::stream(ErrorType::ProtocolError));
            }
        }
        Ok(())
    }

    pub fn body_bytes_received(&self) -> u64 {
        self.body_bytes_received
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> Stream {
        Stream::new(1, 65_535, 65_535, false)
    }

    #[test]
    fn idle_to_open_on_recv_headers_without_end_stream() {
        let mut s = stream();
        s.on_headers(true, true, false).unwrap();
        assert_eq!(s.state(), StreamState::Open);
    }

    #[test]
    fn idle_to_half_closed_remote_on_recv_headers_with_end_stream() {
        let mut s = stream();
        s.on_headers(true, true, true).unwrap();
        assert_eq!(s.state(), StreamState::HalfClosedRemote);
    }

    #[test]
    fn open_to_half_closed_local_on_send_end_stream() {
        let mut s = stream();
        s.on_headers(true, true, false).unwrap();
        s.on_data(false, 0, true).unwrap();
        assert_eq!(s.state(), StreamState::HalfClosedLocal);
    }

    #[test]
    fn half_closed_remote_closes_on_send_end_stream() {
        let mut s = stream();
        s.on_headers(true, true, true).unwrap();
        s.on_data(false, 0, true).unwrap();
        assert_eq!(s.state(), StreamState::Closed);
    }

    #[test]
    fn rst_stream_on_idle_is_connection_error() {
        let mut s = stream();
        let err = s.on_rst_stream().unwrap_err();
        assert!(err.is_connection_error());
    }

    #[test]
    fn continuation_without_end_headers_defers_transition() {
        let mut s = stream();
        s.on_headers(true, false, false).unwrap();
        assert_eq!(s.state(), StreamState::Idle);
        assert_eq!(s.continuing(), Some(Continuing::Headers));
        s.on_continuation_end_headers(true, false).unwrap();
        assert_eq!(s.state(), StreamState::Open);
    }

    #[test]
    fn pseudo_header_after_regular_header_is_rejected() {
        let mut s = stream();
        let headers = vec![
            ("content-type".to_string(), "text/plain".to_string()),
            (":path".to_string(), "/".to_string()),
        ];
        assert!(s.validate_and_ingest_headers(&headers).is_err());
    }

    #[test]
    fn connection_specific_header_is_rejected() {
        let mut s = stream();
        let headers = vec![("connection".to_string(), "keep-alive".to_string())];
        assert!(s.validate_and_ingest_headers(&headers).is_err());
    }

    #[test]
    fn content_length_mismatch_at_end_stream_is_stream_error() {
        let mut s = stream();
        s.on_headers(true, true, false).unwrap();
        let headers = vec![("content-length".to_string(), "10".to_string())];
        s.validate_and_ingest_headers(&headers).unwrap();
        assert!(s.on_data(true, 3, true).is_err());
    }

    #[test]
    fn content_length_match_at_end_stream_succeeds() {
        let mut s = stream();
        s.on_headers(true, true, false).unwrap();
        let headers = vec![("content-length".to_string(), "10".to_string())];
        s.validate_and_ingest_headers(&headers).unwrap();
        s.on_data(true, 6, false).unwrap();
        s.on_data(true, 4, true).unwrap();
        assert_eq!(s.body_bytes_received(), 10);
    }

    #[test]
    fn trailer_without_end_stream_is_rejected() {
        let s = stream();
        assert!(s.validate_trailer(false).is_err());
        assert!(s.validate_trailer(true).is_ok());
    }
}
