//! Flow-control window accounting (spec.md §3 "Windows", §4.3 flow-control
//! policies). Each scope (session or stream) tracks a signed peer window
//! (bytes we may still send) and a signed local window (bytes we will still
//! accept), both bounded to 31 bits.

use crate::error::{ErrorType, Http2Error};

pub const U31_MAX: i64 = (1i64 << 31) - 1;
pub const DEFAULT_SESSION_WINDOW: i64 = 65_535;

/// One direction's flow-control counter pair for a single scope (session or stream).
#[derive(Debug, Clone, Copy)]
pub struct Window {
    /// Bytes we are still permitted to send before the peer tops us up.
    peer: i64,
    /// Bytes we have advertised we will still accept.
    local: i64,
}

impl Window {
    pub fn new(peer_initial: i64, local_initial: i64) -> Self {
        Self { peer: peer_initial, local: local_initial }
    }

    pub fn peer_available(&self) -> i64 {
        self.peer
    }

    pub fn local_available(&self) -> i64 {
        self.local
    }

    /// We are about to send `len` bytes of DATA payload.
    pub fn consume_peer(&mut self, len: i64) -> Result<(), Http2Error> {
        if len > self.peer {
            return Err(Http2Error::stream(ErrorType::FlowControlError));
        }
        self.peer -= len;
        Ok(())
    }

    /// The peer sent us a WINDOW_UPDATE increasing our send allowance.
    /// `err_class` lets the caller say whether this is a stream or session
    /// scope, so the right RST_STREAM/GOAWAY shape results on overflow.
    pub fn grow_peer(&mut self, increment: u32, connection_scope: bool) -> Result<(), Http2Error> {
        let new_value = self.peer + increment as i64;
        if new_value > U31_MAX {
            return Err(if connection_scope {
                Http2Error::connection(ErrorType::FlowControlError)
            } else {
                Http2Error::stream(ErrorType::FlowControlError)
            });
        }
        self.peer = new_value;
        Ok(())
    }

    /// `INITIAL_WINDOW_SIZE` changed by `delta` (signed); every open stream's
    /// peer window shifts by the same amount, possibly negative (spec.md §3).
    pub fn shift_peer(&mut self, delta: i64) {
        self.peer += delta;
    }

    /// We received `len` bytes of DATA payload, consuming local window.
    pub fn consume_local(&mut self, len: i64) {
        self.local -= len;
    }

    /// We are about to send a WINDOW_UPDATE restoring `increment` bytes of
    /// local (inbound) window.
    pub fn replenish_local(&mut self, increment: i64) {
        self.local += increment;
    }

    pub fn shift_local(&mut self, delta: i64) {
        self.local += delta;
    }
}

/// The three flow-control policies spec.md §4.3 describes, selected once at
/// connection construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControlPolicy {
    StaticSessionAndStaticStream,
    LargeSessionAndStaticStream,
    LargeSessionAndDynamicStream,
}

impl FlowControlPolicy {
    pub fn initial_session_window(&self, initial_window_size: u32, max_concurrent_streams: u32) -> i64 {
        match self {
            FlowControlPolicy::StaticSessionAndStaticStream => initial_window_size as i64,
            FlowControlPolicy::LargeSessionAndStaticStream
            | FlowControlPolicy::LargeSessionAndDynamicStream => {
                initial_window_size as i64 * max_concurrent_streams.max(1) as i64
            }
        }
    }

    /// For the dynamic-stream policy, recomputed every time a stream is
    /// added: `target_session_window / (current_stream_count + 1)`.
    pub fn stream_window(
        &self,
        initial_window_size: u32,
        target_session_window: i64,
        current_stream_count: u32,
    ) -> i64 {
        match self {
            FlowControlPolicy::StaticSessionAndStaticStream
            | FlowControlPolicy::LargeSessionAndStaticStream => initial_window_size as i64,
            FlowControlPolicy::LargeSessionAndDynamicStream => {
                target_session_window / (current_stream_count as i64 + 1)
            }
        }
    }
}
