//! The out-of-scope external collaborator (spec.md §6): the HTTP
//! transaction state machine that consumes decoded headers and produces
//! responses, and the VIO-style adapters a stream exposes to it. This crate
//! only defines the boundary; no transaction logic lives here.

use bytes::Bytes;
use std::collections::HashMap;

/// VIO-style read/write/timeout events signalled up to the transaction
/// (spec.md §4.4 "Read/write adapters", §6 up-calls).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VioEvent {
    ReadReady,
    ReadComplete,
    WriteReady,
    WriteComplete,
    Eos,
    Timeout,
}

/// A decoded, ordered header block: pseudo-headers first (I5), then regular
/// headers, duplicates preserved in arrival order.
pub type DecodedHeaderBlock = Vec<(String, String)>;

/// Down-calls a transaction state machine issues against a stream (spec.md
/// §6 "From the transaction state machine").
pub trait StreamIo {
    /// Register as the consumer of up to `nbytes` of inbound body.
    fn do_io_read(&mut self, nbytes: usize);
    /// Register as the producer of outbound body bytes.
    fn do_io_write(&mut self, data: Bytes, end_stream: bool);
    /// The transaction has advanced; the stream should re-check windows and
    /// schedule more work.
    fn reenable(&mut self);
    fn set_active_timeout(&mut self, timeout: std::time::Duration);
    fn cancel_active_timeout(&mut self);
    fn set_inactivity_timeout(&mut self, timeout: std::time::Duration);
    fn cancel_inactivity_timeout(&mut self);
}

/// Up-calls a stream issues against the transaction it drives (spec.md §6
/// "To the transaction state machine").
pub trait TransactionHandler {
    fn new_transaction(&mut self, from_early_data: bool);
    /// The stream finished decoding a leading (non-trailer) header block and
    /// asks the transaction to process it and begin producing a response.
    fn send_headers(&mut self, headers: DecodedHeaderBlock);
    /// Trailer fields, delivered separately from the leading headers.
    fn send_trailers(&mut self, trailers: HashMap<String, String>);
    fn signal_read_event(&mut self, kind: VioEvent);
    fn signal_write_event(&mut self, kind: VioEvent, call_update: bool);
    fn set_rx_error_code(&mut self, err: crate::error::ErrorType);
    fn set_tx_error_code(&mut self, err: crate::error::ErrorType);
}
