//! End-to-end scenarios driving [`ConnectionState`] with constructed frame
//! sequences, no transport involved. Mirrors spec.md §8's request/response,
//! flow-control, priority, and shutdown scenarios.

use bytes::Bytes;
use http2_engine::config::Http2ConnectionConfig;
use http2_engine::connection::{ConnectionEvent, ConnectionState};
use http2_engine::error::ErrorType;
use http2_engine::frame::{Frame, Priority};
use http2_engine::hpack;
use std::time::Duration;

fn server() -> ConnectionState {
    ConnectionState::new(Http2ConnectionConfig::default(), true)
}

fn encode(pairs: &[(&str, &str)]) -> Bytes {
    let mut encoder = hpack::Encoder::new();
    encoder.encode(pairs.iter().map(|(k, v)| (k.as_bytes(), v.as_bytes())))
}

fn request_headers(stream_id: u32, end_stream: bool) -> Frame {
    Frame::Headers {
        stream_id,
        end_stream,
        end_headers: true,
        priority: None,
        fragment: encode(&[(":method", "GET"), (":scheme", "https"), (":path", "/"), (":authority", "example.com")]),
    }
}

#[test]
fn full_request_response_round_trip() {
    let mut conn = server();
    let _ = conn.opening_frames();

    let (_out, events) = conn.handle_frame(request_headers(1, false), false, Duration::ZERO);
    assert!(matches!(events.as_slice(), [ConnectionEvent::HeadersReceived { stream_id: 1, end_stream: false, .. }]));

    let (_out, events) = conn.handle_frame(
        Frame::Data { stream_id: 1, end_stream: true, data: Bytes::from_static(b"hello") },
        false,
        Duration::from_secs(1),
    );
    assert!(matches!(
        events.as_slice(),
        [ConnectionEvent::DataReceived { stream_id: 1, end_stream: true, .. }]
    ));
    // remote side is closed but the stream stays live until the local
    // (response) side also closes.
    assert_eq!(conn.live_stream_count(), 1);
}

#[test]
fn trailers_are_reported_separately_from_leading_headers() {
    let mut conn = server();
    let (_out, events) = conn.handle_frame(request_headers(1, false), false, Duration::ZERO);
    assert!(matches!(events.as_slice(), [ConnectionEvent::HeadersReceived { .. }]));

    let (_out, events) = conn.handle_frame(
        Frame::Data { stream_id: 1, end_stream: false, data: Bytes::from_static(b"body") },
        false,
        Duration::ZERO,
    );
    assert!(matches!(events.as_slice(), [ConnectionEvent::DataReceived { end_stream: false, .. }]));

    let trailer = Frame::Headers {
        stream_id: 1,
        end_stream: true,
        end_headers: true,
        priority: None,
        fragment: encode(&[("x-checksum", "abc123")]),
    };
    let (_out, events) = conn.handle_frame(trailer, false, Duration::ZERO);
    assert!(matches!(
        events.as_slice(),
        [ConnectionEvent::TrailersReceived { stream_id: 1, .. }]
    ));
}

#[test]
fn settings_handshake_acks_peer_and_gets_acked_locally() {
    // scenario 3 from spec.md §8 (preface bytes themselves are a transport
    // concern handled by `Socket::write_preface`; this is the SETTINGS half).
    let mut conn = server();
    let opening = conn.opening_frames();
    assert!(matches!(opening.first(), Some(Frame::Settings { ack: false, .. })));

    let peer_settings = Frame::Settings { ack: false, records: Vec::new() };
    let (out, _events) = conn.handle_frame(peer_settings, false, Duration::ZERO);
    assert!(matches!(out.as_slice(), [Frame::Settings { ack: true, .. }]));

    let (out, _events) = conn.handle_frame(Frame::Settings { ack: true, records: Vec::new() }, false, Duration::ZERO);
    assert!(out.is_empty());
}

#[test]
fn session_window_update_grows_peer_budget() {
    let mut conn = server();
    let before = Frame::WindowUpdate { stream_id: 0, increment: 100 };
    let (out, _events) = conn.handle_frame(before, false, Duration::ZERO);
    assert!(out.is_empty());
}

#[test]
fn priority_reprioritizes_streams_for_the_scheduler() {
    let mut conn = server();
    let _ = conn.handle_frame(request_headers(1, false), false, Duration::ZERO);
    let _ = conn.handle_frame(request_headers(3, false), false, Duration::ZERO);

    assert!(conn.next_stream_to_send().is_some());

    let reprioritize = Frame::Priority { stream_id: 3, priority: Priority { exclusive: true, dependency: 0, weight: 255 } };
    let (out, _events) = conn.handle_frame(reprioritize, false, Duration::ZERO);
    assert!(out.is_empty());
}

#[test]
fn excessive_ping_rate_is_enhance_your_calm() {
    let mut conn = server();
    let mut last_out = Vec::new();
    for i in 0..200 {
        let (out, _events) = conn.handle_frame(Frame::Ping { ack: false, data: [0; 8] }, false, Duration::from_millis(i));
        last_out = out;
    }
    assert!(matches!(last_out.as_slice(), [Frame::GoAway { error: ErrorType::EnhanceYourCalm, .. }]));
}

#[test]
fn rst_stream_on_unknown_stream_does_not_panic_and_still_notifies() {
    let mut conn = server();
    let (out, events) = conn.handle_frame(Frame::ResetStream { stream_id: 41, error: ErrorType::Cancel }, false, Duration::ZERO);
    assert!(out.is_empty());
    assert!(matches!(events.as_slice(), [ConnectionEvent::StreamReset { stream_id: 41, .. }]));
}

#[test]
fn graceful_shutdown_sends_two_goaways() {
    let mut conn = server();
    let first = conn.begin_graceful_shutdown();
    assert!(matches!(first, Frame::GoAway { error: ErrorType::NoError, .. }));
    let second = conn.finish_graceful_shutdown();
    assert!(matches!(second, Frame::GoAway { error: ErrorType::NoError, .. }));
}

#[test]
fn content_length_mismatch_caught_at_trailer_not_just_at_data_end_stream() {
    let mut conn = server();
    let headers = Frame::Headers {
        stream_id: 1,
        end_stream: false,
        end_headers: true,
        priority: None,
        fragment: encode(&[
            (":method", "POST"),
            (":scheme", "https"),
            (":path", "/"),
            (":authority", "example.com"),
            ("content-length", "10"),
        ]),
    };
    let (_out, events) = conn.handle_frame(headers, false, Duration::ZERO);
    assert!(matches!(events.as_slice(), [ConnectionEvent::HeadersReceived { .. }]));

    let (_out, events) = conn.handle_frame(
        Frame::Data { stream_id: 1, end_stream: false, data: Bytes::from_static(b"short!") },
        false,
        Duration::ZERO,
    );
    assert!(matches!(events.as_slice(), [ConnectionEvent::DataReceived { end_stream: false, .. }]));

    let trailer = Frame::Headers {
        stream_id: 1,
        end_stream: true,
        end_headers: true,
        priority: None,
        fragment: encode(&[("x-checksum", "abc123")]),
    };
    let (out, _events) = conn.handle_frame(trailer, false, Duration::ZERO);
    assert!(matches!(
        out.as_slice(),
        [Frame::ResetStream { stream_id: 1, error: ErrorType::ProtocolError }]
    ));
}

#[test]
fn data_after_end_stream_resets_with_stream_closed() {
    // scenario 6 from spec.md §8.
    let mut conn = server();
    let (_out, events) = conn.handle_frame(request_headers(1, true), false, Duration::ZERO);
    assert!(matches!(events.as_slice(), [ConnectionEvent::HeadersReceived { stream_id: 1, end_stream: true, .. }]));

    let (out, _events) = conn.handle_frame(
        Frame::Data { stream_id: 1, end_stream: false, data: Bytes::from_static(b"A") },
        false,
        Duration::ZERO,
    );
    assert!(matches!(
        out.as_slice(),
        [Frame::ResetStream { stream_id: 1, error: ErrorType::StreamClosed }]
    ));
}

#[test]
fn goaway_from_peer_is_surfaced_as_event() {
    let mut conn = server();
    let (out, events) = conn.handle_frame(
        Frame::GoAway { last_stream_id: 7, error: ErrorType::NoError, debug_data: Bytes::new() },
        false,
        Duration::ZERO,
    );
    assert!(out.is_empty());
    assert!(matches!(
        events.as_slice(),
        [ConnectionEvent::PeerGoingAway { last_stream_id: 7, .. }]
    ));
}
