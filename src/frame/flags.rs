use bitflags::bitflags;

bitflags! {
    /// https://httpwg.org/specs/rfc7540.html#DATA
    #[repr(transparent)]
    pub struct DataFlags: u8 {
        const END_STREAM = 0x1;
        const PADDED = 0x8;
    }

    /// https://httpwg.org/specs/rfc7540.html#HEADERS
    #[repr(transparent)]
    pub struct HeadersFlags: u8 {
        const END_STREAM = 0x1;
        const END_HEADERS = 0x4;
        const PADDED = 0x8;
        const PRIORITY = 0x20;
    }

    /// https://httpwg.org/specs/rfc7540.html#SETTINGS
    #[repr(transparent)]
    pub struct SettingsFlags: u8 {
        const ACK = 0x1;
    }

    /// https://httpwg.org/specs/rfc7540.html#PUSH_PROMISE
    #[repr(transparent)]
    pub struct PushPromiseFlags: u8 {
        const END_HEADERS = 0x4;
        const PADDED = 0x8;
    }

    /// https://httpwg.org/specs/rfc7540.html#PING
    #[repr(transparent)]
    pub struct PingFlags: u8 {
        const ACK = 0x1;
    }

    /// https://httpwg.org/specs/rfc7540.html#CONTINUATION
    #[repr(transparent)]
    pub struct ContinuationFlags: u8 {
        const END_HEADERS = 0x4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::From)]
pub enum Flags {
    Data(DataFlags),
    Headers(HeadersFlags),
    Settings(SettingsFlags),
    PushPromise(PushPromiseFlags),
    Ping(PingFlags),
    Continuation(ContinuationFlags),
    None,
}

impl Flags {
    pub fn end_headers(self) -> bool {
        match self {
            Flags::Headers(f) => f.contains(HeadersFlags::END_HEADERS),
            Flags::PushPromise(f) => f.contains(PushPromiseFlags::END_HEADERS),
            Flags::Continuation(f) => f.contains(ContinuationFlags::END_HEADERS),
            _ => false,
        }
    }

    pub fn end_stream(self) -> bool {
        match self {
            Flags::Data(f) => f.contains(DataFlags::END_STREAM),
            Flags::Headers(f) => f.contains(HeadersFlags::END_STREAM),
            _ => false,
        }
    }
}
