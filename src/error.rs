use num_derive::{FromPrimitive, ToPrimitive};

/// https://httpwg.org/specs/rfc7540.html#ErrorCodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum ErrorType {
    /// The associated condition is not a result of an error. For example, a GOAWAY might include this code to indicate graceful shutdown of a connection.
    NoError = 0x0,
    /// The endpoint detected an unspecific protocol error. This error is for use when a more specific error code is not available.
    ProtocolError = 0x1,
    /// The endpoint encountered an unexpected internal error.
    InternalError = 0x2,
    /// The endpoint detected that its peer violated the flow-control protocol.
    FlowControlError = 0x3,
    /// The endpoint sent a SETTINGS frame but did not receive a response in a timely manner.
    SettingsTimeout = 0x4,
    /// The endpoint received a frame after a stream was half-closed.
    StreamClosed = 0x5,
    /// The endpoint received a frame with an invalid size.
    FrameSizeError = 0x6,
    /// The endpoint refused the stream prior to performing any application processing.
    RefusedStream = 0x7,
    /// Used by the endpoint to indicate that the stream is no longer needed.
    Cancel = 0x8,
    /// The endpoint is unable to maintain the header compression context for the connection.
    CompressionError = 0x9,
    /// The connection established in response to a CONNECT request was reset or abnormally closed.
    ConnectError = 0xa,
    /// The endpoint detected that its peer is exhibiting a behavior that might be generating excessive load.
    EnhanceYourCalm = 0xb,
    /// The underlying transport has properties that do not meet minimum security requirements.
    InadequateSecurity = 0xc,
    /// The endpoint requires that HTTP/1.1 be used instead of HTTP/2.
    Http11Required = 0xd,
}

/// Whether an error tears down the whole connection or just resets one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// GOAWAY + half-close-local + scheduled finalization.
    Connection,
    /// RST_STREAM on the offending stream only; the connection continues.
    Stream,
}

/// A protocol-level fault raised while dispatching a frame or decoding headers.
///
/// Carries the classification spec.md §4.3/§7 requires dispatch handlers to
/// return: connection-class faults trigger GOAWAY, stream-class faults
/// trigger RST_STREAM.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{code:?} ({class:?})")]
pub struct Http2Error {
    pub class: ErrorClass,
    pub code: ErrorType,
}

impl Http2Error {
    pub const fn connection(code: ErrorType) -> Self {
        Self { class: ErrorClass::Connection, code }
    }

    pub const fn stream(code: ErrorType) -> Self {
        Self { class: ErrorClass::Stream, code }
    }

    pub fn is_connection_error(&self) -> bool {
        self.class == ErrorClass::Connection
    }
}

pub type Http2Result<T> = Result<T, Http2Error>;

#[derive(thiserror::Error, Debug)]
pub enum FrameDecodeError {
    #[error("unknown frame type")]
    UnknownType,
    #[error("payload is shorter than expected")]
    PayloadTooShort,
    #[error("unexpected 0 stream ID")]
    ZeroStreamId,
    #[error("unexpected 0 window increment")]
    ZeroWindowIncrement,
    #[error("unknown error type: {0}")]
    UnknownErrorType(u32),
    #[error("frame of invalid length {0} for its type")]
    InvalidLength(u32),
    #[error(transparent)]
    Protocol(#[from] Http2Error),
}

impl From<FrameDecodeError> for Http2Error {
    fn from(err: FrameDecodeError) -> Self {
        match err {
            FrameDecodeError::Protocol(e) => e,
            FrameDecodeError::InvalidLength(_) => {
                Http2Error::connection(ErrorType::FrameSizeError)
            }
            FrameDecodeError::ZeroStreamId | FrameDecodeError::ZeroWindowIncrement => {
                Http2Error::connection(ErrorType::ProtocolError)
            }
            FrameDecodeError::UnknownType | FrameDecodeError::UnknownErrorType(_) => {
                Http2Error::connection(ErrorType::ProtocolError)
            }
            FrameDecodeError::PayloadTooShort => Http2Error::connection(ErrorType::FrameSizeError),
        }
    }
}

/// HPACK-layer decode faults. A `COMPRESSION_ERROR` of any kind is always
/// connection-fatal per spec.md §4.1; `SizeExceeded` is reported separately
/// so callers may downgrade it to `ENHANCE_YOUR_CALM` instead.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HpackError {
    #[error("integer encoding overflowed 32 bits")]
    IntegerOverflow,
    #[error("unexpected end of header block")]
    UnexpectedEob,
    #[error("index {0} is out of range")]
    InvalidIndex(usize),
    #[error("dynamic table size update after a field representation")]
    LateTableSizeUpdate,
    #[error("table size update exceeds the negotiated maximum")]
    TableSizeTooLarge,
    #[error("Huffman-coded string did not end on a byte boundary with valid padding")]
    InvalidHuffmanPadding,
    #[error("decoded header list exceeds the configured maximum size")]
    SizeExceeded,
}

impl HpackError {
    /// SIZE_EXCEEDED is its own class (spec.md §4.1); everything else is COMPRESSION_ERROR.
    pub fn is_size_exceeded(&self) -> bool {
        matches!(self, HpackError::SizeExceeded)
    }
}

impl From<HpackError> for Http2Error {
    fn from(err: HpackError) -> Self {
        if err.is_size_exceeded() {
            Http2Error::connection(ErrorType::EnhanceYourCalm)
        } else {
            Http2Error::connection(ErrorType::CompressionError)
        }
    }
}
