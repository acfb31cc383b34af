//! Connection state machine (spec.md §4.3): frame dispatch, SETTINGS
//! negotiation, session window accounting, concurrent-stream throttling,
//! abuse counters, and graceful shutdown. Owns the HPACK tables and the
//! dependency tree; nothing here touches the transport directly (spec.md
//! §1 "Out of scope").

use crate::config::Http2ConnectionConfig;
use crate::dependency_tree::DependencyTree;
use crate::error::{ErrorType, Http2Error, Http2Result};
use crate::frame::settings::{default_settings, SettingsMap, SettingsParameter, SettingsRecord};
use crate::frame::{Frame, StreamId};
use crate::frequency_counter::FrequencyCounter;
use crate::hpack;
use crate::stream::{Continuing, Stream};
use crate::window::Window;
use bytes::Bytes;
use dashmap::DashMap;
use log::{debug, trace, warn};
use std::collections::VecDeque;
use std::time::Duration;

/// Up-calls surfaced to the caller; the actual transaction state machine
/// lives outside this crate (spec.md §1, §6).
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    HeadersReceived {
        stream_id: u32,
        headers: Vec<(String, String)>,
        end_stream: bool,
        from_early_data: bool,
    },
    TrailersReceived {
        stream_id: u32,
        trailers: Vec<(String, String)>,
    },
    DataReceived {
        stream_id: u32,
        data: Bytes,
        end_stream: bool,
    },
    StreamReset {
        stream_id: u32,
        error: ErrorType,
    },
    PeerGoingAway {
        last_stream_id: u32,
        error: ErrorType,
    },
}

#[derive(Debug, Default)]
struct AbuseCounters {
    settings_frames: FrequencyCounter,
    ping_frames: FrequencyCounter,
    priority_frames: FrequencyCounter,
    rst_stream_frames: FrequencyCounter,
    continuation_frames: FrequencyCounter,
    empty_frames: FrequencyCounter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShutdownStage {
    Running,
    FirstGoAwaySent,
    SecondGoAwaySent,
}

/// Frame types permitted while a frame was delivered over 0-RTT early data
/// (spec.md §4.3 "Early-data filter").
fn allowed_in_early_data(frame: &Frame) -> bool {
    matches!(
        frame,
        Frame::Headers { .. }
            | Frame::Priority { .. }
            | Frame::Settings { .. }
            | Frame::Ping { .. }
            | Frame::WindowUpdate { .. }
            | Frame::Continuation { .. }
    )
}

/// Per-record validation of an inbound SETTINGS value (spec.md §4.2, the
/// original's `http2_settings_parameter_is_valid` in
/// `proxy/http2/HTTP2.cc`). Unknown parameters are accepted (and ignored by
/// being stored without further meaning) per RFC 7540 §6.5.2.
fn validate_settings_record(record: &SettingsRecord) -> Http2Result<()> {
    match record.parameter {
        SettingsParameter::EnablePush if record.value > 1 => {
            Err(Http2Error::connection(ErrorType::ProtocolError))
        }
        SettingsParameter::MaxFrameSize if !(16_384..=16_777_215).contains(&record.value) => {
            Err(Http2Error::connection(ErrorType::ProtocolError))
        }
        SettingsParameter::InitialWindowSize if record.value as i64 > crate::window::U31_MAX => {
            Err(Http2Error::connection(ErrorType::FlowControlError))
        }
        _ => Ok(()),
    }
}

pub struct ConnectionState {
    pub config: Http2ConnectionConfig,
    is_server: bool,

    streams: DashMap<u32, Stream>,
    dependency_tree: DependencyTree,

    hpack_encoder: hpack::Encoder,
    hpack_decoder: hpack::Decoder,

    local_settings: SettingsMap,
    acknowledged_local_settings: SettingsMap,
    peer_settings: SettingsMap,
    pending_settings_acks: VecDeque<SettingsMap>,

    session_window: Window,
    latest_peer_stream_id_seen: u32,

    /// The stream whose header block is still open, and which kind of
    /// header-opening frame started it (invariant I3).
    continued_stream_id: Option<u32>,
    continuing_kind: Option<Continuing>,

    abuse: AbuseCounters,
    live_stream_count: u32,
    throttled: bool,

    shutdown_stage: ShutdownStage,
    last_window_update_increments: VecDeque<u32>,
    last_sent_goaway_stream_id: Option<u32>,
}

/// Outcome of attempting to produce one outbound DATA frame for a stream,
/// grounded on the original's `Http2SendDataFrameResult` (spec.md §9,
/// "Supplemented from `Http2ConnectionState.{h,cc}`").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendDataOutcome {
    /// Flow control (stream- or session-scoped) has no budget right now.
    NoWindow,
    /// The caller had nothing left to send for this stream.
    NoPayload,
    /// A frame was produced and flow-control budgets were debited.
    Done,
}

impl ConnectionState {
    pub fn new(config: Http2ConnectionConfig, is_server: bool) -> Self {
        let max_concurrent = config.inbound.max_concurrent_streams;
        let session_target =
            config.inbound.flow_control_policy.initial_session_window(
                config.inbound.initial_window_size,
                max_concurrent,
            );
        Self {
            dependency_tree: DependencyTree::new(max_concurrent),
            streams: DashMap::new(),
            hpack_encoder: hpack::Encoder::new(),
            hpack_decoder: hpack::Decoder::new(),
            local_settings: default_settings(),
            acknowledged_local_settings: default_settings(),
            peer_settings: default_settings(),
            pending_settings_acks: VecDeque::new(),
            session_window: Window::new(65_535, session_target),
            latest_peer_stream_id_seen: 0,
            continued_stream_id: None,
            continuing_kind: None,
            abuse: AbuseCounters::default(),
            live_stream_count: 0,
            throttled: false,
            shutdown_stage: ShutdownStage::Running,
            last_window_update_increments: VecDeque::with_capacity(5),
            last_sent_goaway_stream_id: None,
            config,
            is_server,
        }
    }

    /// Step 1-3 of SETTINGS negotiation (spec.md §4.3): synthesize our
    /// opening SETTINGS from config, force ENABLE_PUSH off, and (for a
    /// dynamic session-window policy) follow with an initial WINDOW_UPDATE.
    pub fn opening_frames(&mut self) -> Vec<Frame> {
        let mut settings = self.local_settings;
        settings[SettingsParameter::EnablePush] = 0;
        settings[SettingsParameter::MaxConcurrentStreams] = self.advertised_max_concurrent_streams();
        settings[SettingsParameter::InitialWindowSize] = self.config.inbound.initial_window_size;
        settings[SettingsParameter::MaxFrameSize] = self.config.max_frame_size;
        settings[SettingsParameter::HeaderTableSize] = self.config.header_table_size;
        settings[SettingsParameter::MaxHeaderListSize] = self.config.max_header_list_size;
        self.local_settings = settings;

        let mut out = vec![Frame::Settings {
            ack: false,
            records: crate::frame::settings::records_from_map(&settings),
        }];
        self.pending_settings_acks.push_back(settings);

        let target = self.session_window.local_available();
        if target != 65_535 {
            let increment = (target - 65_535).max(0) as u32;
            if increment > 0 {
                out.push(Frame::WindowUpdate { stream_id: 0, increment });
            }
        }
        out
    }

    fn advertised_max_concurrent_streams(&self) -> u32 {
        if self.throttled {
            self.config.inbound.min_concurrent_streams
        } else {
            self.config.inbound.max_concurrent_streams
        }
    }

    fn update_throttle(&mut self) {
        let threshold = self.config.inbound.max_active_streams;
        if threshold == 0 {
            return;
        }
        let should_throttle = self.live_stream_count >= threshold;
        if should_throttle != self.throttled {
            self.throttled = should_throttle;
            debug!(
                "concurrent-stream throttling {} (live={}, threshold={})",
                if should_throttle { "engaged" } else { "released" },
                self.live_stream_count,
                threshold
            );
        }
    }

    /// Dispatch a single inbound frame, producing outbound frames and
    /// up-calls. Connection-class errors fold into a GOAWAY instead of
    /// propagating; stream-class errors fold into a RST_STREAM.
    pub fn handle_frame(&mut self, frame: Frame, from_early_data: bool, now: Duration) -> (Vec<Frame>, Vec<ConnectionEvent>) {
        if from_early_data && !allowed_in_early_data(&frame) {
            return (Vec::new(), Vec::new());
        }

        if let Some(continued) = self.continued_stream_id {
            let stays_on_continued = matches!(
                &frame,
                Frame::Continuation { stream_id, .. } if *stream_id == continued
            );
            if !stays_on_continued {
                return self.fatal(Http2Error::connection(ErrorType::ProtocolError), 0);
            }
        }

        let stream_id = frame.stream_id();
        let mut out = Vec::new();
        let mut events = Vec::new();
        let result = match &frame {
            Frame::Data { .. } => self.on_data(frame, now, &mut out, &mut events),
            Frame::Headers { .. } => self.on_headers(frame, from_early_data, &mut out, &mut events),
            Frame::Priority { .. } => self.on_priority(frame, now, &mut out),
            Frame::ResetStream { .. } => self.on_reset_stream(frame, now, &mut out, &mut events),
            Frame::Settings { .. } => self.on_settings(frame, now, &mut out),
            Frame::PushPromise { .. } => {
                if self.is_server {
                    Err(Http2Error::connection(ErrorType::ProtocolError))
                } else {
                    Ok(())
                }
            }
            Frame::Ping { .. } => self.on_ping(frame, now, &mut out),
            Frame::GoAway { .. } => self.on_goaway(frame, &mut events),
            Frame::WindowUpdate { .. } => self.on_window_update(frame, &mut out),
            Frame::Continuation { .. } => self.on_continuation(frame, now, &mut out, &mut events),
            Frame::Unknown { .. } => Ok(()),
        };

        if let Err(err) = result {
            let (fatal_out, fatal_events) = self.fatal(err, stream_id);
            out.extend(fatal_out);
            events.extend(fatal_events);
        }
        (out, events)
    }

    fn fatal(&mut self, err: Http2Error, stream_id: StreamId) -> (Vec<Frame>, Vec<ConnectionEvent>) {
        if err.is_connection_error() {
            warn!("connection-fatal error: {:?}", err.code);
            // last_stream_id is monotonically non-decreasing across
            // successive GOAWAYs (spec.md §5) outside the intentional
            // max-then-actual sequence of a graceful shutdown.
            let last_stream_id = self
                .latest_peer_stream_id_seen
                .max(self.last_sent_goaway_stream_id.unwrap_or(0));
            self.last_sent_goaway_stream_id = Some(last_stream_id);
            let goaway = Frame::GoAway { last_stream_id, error: err.code, debug_data: Bytes::new() };
            self.shutdown_stage = ShutdownStage::SecondGoAwaySent;
            (vec![goaway], Vec::new())
        } else {
            trace!("stream-fatal error on stream {}: {:?}", stream_id, err.code);
            if stream_id == 0 {
                return (Vec::new(), Vec::new());
            }
            let was_already_closed = self.streams.get_mut(&stream_id).map(|mut stream| {
                let was_already_closed = stream.is_closed();
                let _ = stream.on_rst_stream();
                was_already_closed
            });
            if was_already_closed == Some(false) {
                self.live_stream_count = self.live_stream_count.saturating_sub(1);
                self.update_throttle();
            }
            (vec![Frame::ResetStream { stream_id, error: err.code }], Vec::new())
        }
    }

    // -- DATA --------------------------------------------------------------

    fn on_data(&mut self, frame: Frame, now: Duration, out: &mut Vec<Frame>, events: &mut Vec<ConnectionEvent>) -> Http2Result<()> {
        let Frame::Data { stream_id, end_stream, data } = frame else { unreachable!() };
        if data.is_empty() {
            self.abuse.empty_frames.increment(now, 1);
            if self.abuse.empty_frames.get_count(now) > self.config.abuse.max_empty_frames_per_minute {
                return Err(Http2Error::connection(ErrorType::EnhanceYourCalm));
            }
        }
        let mut stream = self
            .streams
            .get_mut(&stream_id)
            .ok_or_else(|| Http2Error::stream(ErrorType::StreamClosed))?;
        stream.window.consume_local(data.len() as i64);
        stream.on_data(true, data.len() as u64, end_stream)?;
        let closed = stream.is_closed();
        drop(stream);
        self.session_window.consume_local(data.len() as i64);

        if closed {
            self.live_stream_count = self.live_stream_count.saturating_sub(1);
            self.update_throttle();
        }
        events.push(ConnectionEvent::DataReceived { stream_id, data, end_stream });

        if self.session_window.local_available() < (self.session_window_target() / 2) {
            let top_up = self.session_window_target() - self.session_window.local_available();
            self.session_window.replenish_local(top_up);
            out.push(Frame::WindowUpdate { stream_id: 0, increment: top_up as u32 });
        }
        Ok(())
    }

    fn session_window_target(&self) -> i64 {
        self.config
            .inbound
            .flow_control_policy
            .initial_session_window(self.config.inbound.initial_window_size, self.config.inbound.max_concurrent_streams)
    }

    // -- HEADERS -------------------------------------------------------------

    fn on_headers(&mut self, frame: Frame, from_early_data: bool, out: &mut Vec<Frame>, events: &mut Vec<ConnectionEvent>) -> Http2Result<()> {
        let Frame::Headers { stream_id, end_stream, end_headers, priority, fragment } = frame else { unreachable!() };

        if self.is_server && stream_id % 2 == 0 {
            return Err(Http2Error::connection(ErrorType::ProtocolError));
        }

        let is_new = !self.streams.contains_key(&stream_id);
        if is_new {
            if stream_id <= self.latest_peer_stream_id_seen {
                return Err(Http2Error::connection(ErrorType::ProtocolError));
            }
            if matches!(self.shutdown_stage, ShutdownStage::SecondGoAwaySent) {
                return Err(Http2Error::stream(ErrorType::RefusedStream));
            }
            self.latest_peer_stream_id_seen = stream_id;
            let stream_window_target = self.config.inbound.flow_control_policy.stream_window(
                self.config.inbound.initial_window_size,
                self.session_window_target(),
                self.live_stream_count,
            );
            self.streams.insert(
                stream_id,
                Stream::new(stream_id, self.config.outbound.initial_window_size as i64, stream_window_target, false),
            );
            self.live_stream_count += 1;
            self.update_throttle();
            if self.config.stream_priority_enabled {
                self.dependency_tree.activate(stream_id);
            }
        }

        if let Some(p) = priority {
            if p.dependency == stream_id {
                // RFC 7540 §5.3.1 / I7: a stream cannot depend on itself.
                return Err(Http2Error::stream(ErrorType::ProtocolError));
            }
            if self.config.stream_priority_enabled {
                self.dependency_tree.set_priority(stream_id, p.dependency, p.exclusive, p.weight as u16 + 1);
            }
        }

        let mut stream = self.streams.get_mut(&stream_id).expect("just inserted or existing");
        let is_trailer = stream.is_trailer_block();
        stream.append_header_fragment(&fragment);

        if !end_headers {
            self.continued_stream_id = Some(stream_id);
            self.continuing_kind = Some(Continuing::Headers);
            stream.on_headers(true, false, end_stream)?;
            return Ok(());
        }

        stream.on_headers(true, true, end_stream)?;
        let block = stream.take_header_block();
        drop(stream);

        let headers = self.decode_header_block(block)?;

        let mut stream = self.streams.get_mut(&stream_id).expect("stream present");
        if is_trailer {
            stream.validate_trailer(end_stream)?;
            drop(stream);
            events.push(ConnectionEvent::TrailersReceived { stream_id, trailers: headers });
        } else {
            stream.validate_and_ingest_headers(&headers)?;
            stream.mark_leading_headers_decoded();
            drop(stream);
            events.push(ConnectionEvent::HeadersReceived { stream_id, headers, end_stream, from_early_data });
        }

        let _ = out;
        Ok(())
    }

    fn on_continuation(&mut self, frame: Frame, now: Duration, out: &mut Vec<Frame>, events: &mut Vec<ConnectionEvent>) -> Http2Result<()> {
        let Frame::Continuation { stream_id, end_headers, fragment } = frame else { unreachable!() };
        self.abuse.continuation_frames.increment(now, 1);
        if self.abuse.continuation_frames.get_count(now) > self.config.abuse.max_continuation_frames_per_minute {
            return Err(Http2Error::connection(ErrorType::EnhanceYourCalm));
        }
        let mut stream = self
            .streams
            .get_mut(&stream_id)
            .ok_or_else(|| Http2Error::connection(ErrorType::ProtocolError))?;
        stream.append_header_fragment(&fragment);
        if !end_headers {
            return Ok(());
        }
        self.continued_stream_id = None;
        self.continuing_kind = None;

        let is_trailer = stream.is_trailer_block();
        let block = stream.take_header_block();
        let end_stream = matches!(stream.continuing(), Some(Continuing::Headers)) || stream.receive_end_stream;
        stream.on_continuation_end_headers(true, end_stream)?;
        drop(stream);

        let headers = self.decode_header_block(block)?;
        let mut stream = self.streams.get_mut(&stream_id).expect("stream present");
        if is_trailer {
            stream.validate_trailer(end_stream)?;
            drop(stream);
            events.push(ConnectionEvent::TrailersReceived { stream_id, trailers: headers });
        } else {
            stream.validate_and_ingest_headers(&headers)?;
            stream.mark_leading_headers_decoded();
            drop(stream);
            events.push(ConnectionEvent::HeadersReceived { stream_id, headers, end_stream, from_early_data: false });
        }
        let _ = out;
        Ok(())
    }

    fn decode_header_block(&mut self, block: Bytes) -> Http2Result<Vec<(String, String)>> {
        let mut headers = Vec::new();
        let max_header_list_size = self.config.max_header_list_size as u64;
        self.hpack_decoder
            .decode_with_cb(block, max_header_list_size, |name, value| {
                headers.push((String::from_utf8_lossy(&name).into_owned(), String::from_utf8_lossy(&value).into_owned()));
            })
            .map_err(Http2Error::from)?;
        Ok(headers)
    }

    // -- PRIORITY ------------------------------------------------------------

    fn on_priority(&mut self, frame: Frame, now: Duration, _out: &mut [Frame]) -> Http2Result<()> {
        let Frame::Priority { stream_id, priority } = frame else { unreachable!() };
        self.abuse.priority_frames.increment(now, 1);
        if self.abuse.priority_frames.get_count(now) > self.config.abuse.max_priority_frames_per_minute {
            return Err(Http2Error::connection(ErrorType::EnhanceYourCalm));
        }
        if self.config.stream_priority_enabled {
            self.dependency_tree.set_priority(stream_id, priority.dependency, priority.exclusive, priority.weight as u16 + 1);
        }
        Ok(())
    }

    // -- RST_STREAM ------------------------------------------------------------

    fn on_reset_stream(&mut self, frame: Frame, now: Duration, _out: &mut [Frame], events: &mut Vec<ConnectionEvent>) -> Http2Result<()> {
        let Frame::ResetStream { stream_id, error } = frame else { unreachable!() };
        self.abuse.rst_stream_frames.increment(now, 1);
        if self.abuse.rst_stream_frames.get_count(now) > self.config.abuse.max_rst_stream_frames_per_minute {
            return Err(Http2Error::connection(ErrorType::EnhanceYourCalm));
        }
        if let Some(mut stream) = self.streams.get_mut(&stream_id) {
            stream.on_rst_stream()?;
        }
        if self.config.stream_priority_enabled {
            self.dependency_tree.remove_stream(stream_id);
        }
        events.push(ConnectionEvent::StreamReset { stream_id, error });
        Ok(())
    }

    // -- SETTINGS ------------------------------------------------------------

    fn on_settings(&mut self, frame: Frame, now: Duration, out: &mut Vec<Frame>) -> Http2Result<()> {
        let Frame::Settings { ack, records } = frame else { unreachable!() };
        if ack {
            if let Some(acked) = self.pending_settings_acks.pop_front() {
                let delta = acked[SettingsParameter::InitialWindowSize] as i64
                    - self.acknowledged_local_settings[SettingsParameter::InitialWindowSize] as i64;
                self.acknowledged_local_settings = acked;
                if delta != 0 {
                    for mut entry in self.streams.iter_mut() {
                        entry.window.shift_local(delta);
                    }
                }
            }
            return Ok(());
        }

        self.abuse.settings_frames.increment(now, 1);
        if self.abuse.settings_frames.get_count(now) > self.config.abuse.max_settings_frames_per_minute {
            return Err(Http2Error::connection(ErrorType::EnhanceYourCalm));
        }
        if records.len() as u32 > self.config.abuse.max_settings_per_frame {
            return Err(Http2Error::connection(ErrorType::EnhanceYourCalm));
        }

        for record in &records {
            validate_settings_record(record)?;
            let old = self.peer_settings[record.parameter];
            self.peer_settings[record.parameter] = record.value;
            if record.parameter == SettingsParameter::InitialWindowSize {
                let delta = record.value as i64 - old as i64;
                for mut entry in self.streams.iter_mut() {
                    entry.window.shift_peer(delta);
                }
            }
            if record.parameter == SettingsParameter::HeaderTableSize {
                let clamped = self.config.clamp_header_table_size(record.value);
                self.hpack_encoder.set_max_size(clamped as usize);
            }
        }

        out.push(Frame::Settings { ack: true, records: Vec::new() });
        Ok(())
    }

    // -- PING ------------------------------------------------------------------

    fn on_ping(&mut self, frame: Frame, now: Duration, out: &mut Vec<Frame>) -> Http2Result<()> {
        let Frame::Ping { ack, data } = frame else { unreachable!() };
        if ack {
            return Ok(());
        }
        self.abuse.ping_frames.increment(now, 1);
        if self.abuse.ping_frames.get_count(now) > self.config.abuse.max_ping_frames_per_minute {
            return Err(Http2Error::connection(ErrorType::EnhanceYourCalm));
        }
        out.push(Frame::Ping { ack: true, data });
        Ok(())
    }

    // -- GOAWAY ------------------------------------------------------------------

    fn on_goaway(&mut self, frame: Frame, events: &mut Vec<ConnectionEvent>) -> Http2Result<()> {
        let Frame::GoAway { last_stream_id, error, .. } = frame else { unreachable!() };
        events.push(ConnectionEvent::PeerGoingAway { last_stream_id, error });
        Ok(())
    }

    // -- WINDOW_UPDATE ------------------------------------------------------------

    fn on_window_update(&mut self, frame: Frame, _out: &mut [Frame]) -> Http2Result<()> {
        let Frame::WindowUpdate { stream_id, increment } = frame else { unreachable!() };
        if stream_id == 0 {
            self.session_window.grow_peer(increment, true)?;
        } else {
            self.track_window_update_rate(increment)?;
            let mut stream = self
                .streams
                .get_mut(&stream_id)
                .ok_or_else(|| Http2Error::stream(ErrorType::StreamClosed))?;
            stream.window.grow_peer(increment, false)?;
        }
        Ok(())
    }

    fn track_window_update_rate(&mut self, increment: u32) -> Http2Result<()> {
        if self.last_window_update_increments.len() == 5 {
            self.last_window_update_increments.pop_front();
        }
        self.last_window_update_increments.push_back(increment);
        if self.last_window_update_increments.len() == 5 {
            let avg: u64 = self.last_window_update_increments.iter().map(|&v| v as u64).sum::<u64>() / 5;
            if (avg as u32) < self.config.abuse.min_avg_window_update {
                return Err(Http2Error::connection(ErrorType::EnhanceYourCalm));
            }
        }
        Ok(())
    }

    // -- Scheduler -----------------------------------------------------------

    /// Which stream the dependency-tree scheduler would drain next.
    pub fn next_stream_to_send(&self) -> Option<u32> {
        if self.config.stream_priority_enabled {
            self.dependency_tree.top()
        } else {
            None
        }
    }

    pub fn record_bytes_sent(&mut self, stream_id: u32, len: u64) {
        if self.config.stream_priority_enabled {
            self.dependency_tree.record_sent(stream_id, len);
        }
    }

    /// Produce at most one outbound DATA frame for `stream_id` out of
    /// `payload`, debiting both the stream's and the session's peer window
    /// and recording the send against the dependency tree. `payload` is
    /// drained by the amount actually sent. Grounded on the original's
    /// `send_a_data_frame` (spec.md §9).
    pub fn send_data_frame(&mut self, stream_id: u32, payload: &mut Bytes, end_stream_when_exhausted: bool) -> (SendDataOutcome, Option<Frame>) {
        if payload.is_empty() {
            return (SendDataOutcome::NoPayload, None);
        }
        let Some(mut stream) = self.streams.get_mut(&stream_id) else {
            return (SendDataOutcome::NoWindow, None);
        };
        let budget = stream
            .window
            .peer_available()
            .min(self.session_window.peer_available())
            .min(self.config.max_frame_size as i64)
            .min(payload.len() as i64);
        if budget <= 0 {
            return (SendDataOutcome::NoWindow, None);
        }
        let chunk = payload.split_to(budget as usize);
        stream.window.consume_peer(budget).expect("budget already bounded by peer_available");
        drop(stream);
        self.session_window.consume_peer(budget).expect("budget already bounded by peer_available");
        self.record_bytes_sent(stream_id, budget as u64);

        let end_stream = end_stream_when_exhausted && payload.is_empty();
        (SendDataOutcome::Done, Some(Frame::Data { stream_id, end_stream, data: chunk }))
    }

    // -- Graceful shutdown ------------------------------------------------------

    /// First stage of graceful shutdown (spec.md §4.3): GOAWAY with the
    /// maximum stream id and NO_ERROR, still accepting frames on existing
    /// streams.
    pub fn begin_graceful_shutdown(&mut self) -> Frame {
        self.shutdown_stage = ShutdownStage::FirstGoAwaySent;
        let last_stream_id = u32::MAX >> 1;
        self.last_sent_goaway_stream_id = Some(last_stream_id);
        Frame::GoAway { last_stream_id, error: ErrorType::NoError, debug_data: Bytes::new() }
    }

    /// Second stage, sent after at least one round-trip past the first.
    /// The actual latest-accepted stream id is intentionally lower than the
    /// placeholder the first GOAWAY sent — the exception the monotonic
    /// last_stream_id invariant (spec.md §5) carves out for this sequence.
    pub fn finish_graceful_shutdown(&mut self) -> Frame {
        self.shutdown_stage = ShutdownStage::SecondGoAwaySent;
        self.last_sent_goaway_stream_id = Some(self.latest_peer_stream_id_seen);
        Frame::GoAway { last_stream_id: self.latest_peer_stream_id_seen, error: ErrorType::NoError, debug_data: Bytes::new() }
    }

    pub fn live_stream_count(&self) -> u32 {
        self.live_stream_count
    }

    pub fn has_stream(&self, stream_id: u32) -> bool {
        self.streams.contains_key(&stream_id)
    }

    pub fn peer_settings(&self) -> &SettingsMap {
        &self.peer_settings
    }

    pub fn acknowledged_local_settings(&self) -> &SettingsMap {
        &self.acknowledged_local_settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::flags::DataFlags;

    fn server() -> ConnectionState {
        ConnectionState::new(Http2ConnectionConfig::default(), true)
    }

    fn minimal_headers(stream_id: u32, end_stream: bool) -> Frame {
        let mut encoder = hpack::Encoder::new();
        let block = encoder.encode(
            [(":method", "GET"), (":scheme", "https"), (":path", "/"), (":authority", "example.com")]
                .into_iter()
                .map(|(k, v)| (k.as_bytes(), v.as_bytes())),
        );
        Frame::Headers { stream_id, end_stream, end_headers: true, priority: None, fragment: block }
    }

    #[test]
    fn new_stream_opens_on_headers_and_emits_event() {
        let mut conn = server();
        let (_out, events) = conn.handle_frame(minimal_headers(1, false), false, Duration::ZERO);
        assert!(matches!(events.as_slice(), [ConnectionEvent::HeadersReceived { stream_id: 1, end_stream: false, .. }]));
        assert_eq!(conn.live_stream_count(), 1);
    }

    #[test]
    fn even_stream_id_from_client_is_protocol_error() {
        let mut conn = server();
        let (out, _events) = conn.handle_frame(minimal_headers(2, true), false, Duration::ZERO);
        assert!(matches!(out.as_slice(), [Frame::GoAway { error: ErrorType::ProtocolError, .. }]));
    }

    #[test]
    fn settings_ack_promotes_pending_snapshot() {
        let mut conn = server();
        let _ = conn.opening_frames();
        let (out, _events) = conn.handle_frame(Frame::Settings { ack: true, records: Vec::new() }, false, Duration::ZERO);
        assert!(out.is_empty());
        assert_eq!(
            conn.acknowledged_local_settings()[SettingsParameter::MaxFrameSize],
            conn.config.max_frame_size
        );
    }

    #[test]
    fn peer_settings_reply_with_ack() {
        let mut conn = server();
        let settings = Frame::Settings {
            ack: false,
            records: vec![crate::frame::settings::SettingsRecord { parameter: SettingsParameter::EnablePush, value: 0 }],
        };
        let (out, _events) = conn.handle_frame(settings, false, Duration::ZERO);
        assert!(matches!(out.as_slice(), [Frame::Settings { ack: true, records }] if records.is_empty()));
        assert_eq!(conn.peer_settings()[SettingsParameter::EnablePush], 0);
    }

    #[test]
    fn settings_with_enable_push_other_than_bool_is_protocol_error() {
        let mut conn = server();
        let settings = Frame::Settings {
            ack: false,
            records: vec![crate::frame::settings::SettingsRecord { parameter: SettingsParameter::EnablePush, value: 2 }],
        };
        let (out, _events) = conn.handle_frame(settings, false, Duration::ZERO);
        assert!(matches!(out.as_slice(), [Frame::GoAway { error: ErrorType::ProtocolError, .. }]));
    }

    #[test]
    fn settings_with_out_of_range_max_frame_size_is_protocol_error() {
        let mut conn = server();
        let settings = Frame::Settings {
            ack: false,
            records: vec![crate::frame::settings::SettingsRecord { parameter: SettingsParameter::MaxFrameSize, value: 1 }],
        };
        let (out, _events) = conn.handle_frame(settings, false, Duration::ZERO);
        assert!(matches!(out.as_slice(), [Frame::GoAway { error: ErrorType::ProtocolError, .. }]));
    }

    #[test]
    fn settings_with_oversize_initial_window_is_flow_control_error() {
        let mut conn = server();
        let settings = Frame::Settings {
            ack: false,
            records: vec![crate::frame::settings::SettingsRecord {
                parameter: SettingsParameter::InitialWindowSize,
                value: (crate::window::U31_MAX + 1) as u32,
            }],
        };
        let (out, _events) = conn.handle_frame(settings, false, Duration::ZERO);
        assert!(matches!(out.as_slice(), [Frame::GoAway { error: ErrorType::FlowControlError, .. }]));
    }

    #[test]
    fn self_dependent_priority_on_headers_is_stream_error_not_a_hang() {
        let mut conn = server();
        let mut encoder = hpack::Encoder::new();
        let block = encoder.encode(
            [(":method", "GET"), (":scheme", "https"), (":path", "/"), (":authority", "example.com")]
                .into_iter()
                .map(|(k, v)| (k.as_bytes(), v.as_bytes())),
        );
        let frame = Frame::Headers {
            stream_id: 1,
            end_stream: true,
            end_headers: true,
            priority: Some(crate::frame::Priority { exclusive: false, dependency: 1, weight: 15 }),
            fragment: block,
        };
        let (out, _events) = conn.handle_frame(frame, false, Duration::ZERO);
        assert!(matches!(out.as_slice(), [Frame::ResetStream { stream_id: 1, error: ErrorType::ProtocolError }]));
    }

    #[test]
    fn ping_without_ack_is_echoed() {
        let mut conn = server();
        let (out, _events) = conn.handle_frame(Frame::Ping { ack: false, data: [1; 8] }, false, Duration::ZERO);
        assert!(matches!(out.as_slice(), [Frame::Ping { ack: true, data: [1, 1, 1, 1, 1, 1, 1, 1] }]));
    }

    #[test]
    fn window_update_zero_is_rejected_by_frame_layer_not_here() {
        // zero increments never reach ConnectionState; they are rejected at
        // frame-parse time (see frame::tests::window_update_zero_increment_is_protocol_error).
    }

    #[test]
    fn data_on_unknown_stream_is_stream_error_not_fatal() {
        let mut conn = server();
        let (out, events) = conn.handle_frame(
            Frame::Data { stream_id: 99, end_stream: true, data: Bytes::from_static(b"x") },
            false,
            Duration::ZERO,
        );
        assert!(matches!(
            out.as_slice(),
            [Frame::ResetStream { stream_id: 99, error: ErrorType::StreamClosed }]
        ));
        assert!(events.is_empty());
    }

    #[test]
    fn header_interleave_with_other_stream_is_connection_error() {
        let mut conn = server();
        let opening = Frame::Headers { stream_id: 1, end_stream: false, end_headers: false, priority: None, fragment: Bytes::from_static(b"\x82") };
        let _ = conn.handle_frame(opening, false, Duration::ZERO);
        let interleaved = Frame::Data { stream_id: 1, end_stream: false, data: Bytes::new() };
        let (out, _events) = conn.handle_frame(interleaved, false, Duration::ZERO);
        assert!(matches!(out.as_slice(), [Frame::GoAway { error: ErrorType::ProtocolError, .. }]));
        let _ = DataFlags::END_STREAM;
    }

    #[test]
    fn send_data_frame_drains_payload_and_debits_both_windows() {
        let mut conn = server();
        let _ = conn.handle_frame(minimal_headers(1, false), false, Duration::ZERO);

        let mut payload = Bytes::from_static(b"hello world");
        let (outcome, frame) = conn.send_data_frame(1, &mut payload, true);
        assert_eq!(outcome, SendDataOutcome::Done);
        assert!(matches!(frame, Some(Frame::Data { stream_id: 1, end_stream: true, .. })));
        assert!(payload.is_empty());
    }

    #[test]
    fn send_data_frame_reports_no_window_once_peer_window_is_exhausted() {
        let mut conn = server();
        let _ = conn.handle_frame(minimal_headers(1, false), false, Duration::ZERO);

        // Default outbound initial window is 65,535 bytes; drain it in
        // max_frame_size-sized chunks.
        let mut first = Bytes::from(vec![b'x'; 65_535]);
        loop {
            let (outcome, _frame) = conn.send_data_frame(1, &mut first, false);
            match outcome {
                SendDataOutcome::Done => continue,
                SendDataOutcome::NoPayload => break,
                SendDataOutcome::NoWindow => panic!("exhausted window before payload was fully sent"),
            }
        }

        let mut second = Bytes::from_static(b"more");
        let (outcome, frame) = conn.send_data_frame(1, &mut second, false);
        assert_eq!(outcome, SendDataOutcome::NoWindow);
        assert!(frame.is_none());
    }

    #[test]
    fn send_data_frame_with_empty_payload_is_no_payload() {
        let mut conn = server();
        let _ = conn.handle_frame(minimal_headers(1, false), false, Duration::ZERO);
        let mut payload = Bytes::new();
        let (outcome, frame) = conn.send_data_frame(1, &mut payload, true);
        assert_eq!(outcome, SendDataOutcome::NoPayload);
        assert!(frame.is_none());
    }

    #[test]
    fn fatal_goaway_after_graceful_shutdown_does_not_regress_last_stream_id() {
        let mut conn = server();
        let _ = conn.handle_frame(minimal_headers(5, true), false, Duration::ZERO);
        let first = conn.begin_graceful_shutdown();
        let Frame::GoAway { last_stream_id: first_id, .. } = first else { panic!("expected GOAWAY") };
        assert_eq!(first_id, u32::MAX >> 1);

        // An even stream id from the client is a connection-fatal protocol
        // error; its "natural" last_stream_id (5) is far below the
        // placeholder the graceful shutdown already announced.
        let (out, _events) = conn.handle_frame(minimal_headers(2, true), false, Duration::ZERO);
        let Some(Frame::GoAway { last_stream_id: second_id, .. }) = out.into_iter().next() else {
            panic!("expected a fatal GOAWAY");
        };
        assert!(second_id >= first_id);
    }
}
