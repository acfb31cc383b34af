use enum_map::{enum_map, Enum, EnumMap};
use num_derive::{FromPrimitive, ToPrimitive};

/// https://httpwg.org/specs/rfc7540.html#SettingValues
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive, Enum)]
#[repr(u16)]
#[non_exhaustive]
pub enum SettingsParameter {
    /// Maximum size of the header compression table used to decode header blocks, in octets.
    HeaderTableSize = 0x1,
    /// 0 or 1: whether the sender will accept server push.
    EnablePush = 0x2,
    /// Maximum number of concurrent streams the sender will allow the peer to open.
    MaxConcurrentStreams = 0x3,
    /// Sender's initial flow-control window size for new streams, in octets.
    InitialWindowSize = 0x4,
    /// Largest frame payload the sender is willing to receive, in octets.
    MaxFrameSize = 0x5,
    /// Advisory maximum size of an uncompressed header list the sender will accept.
    MaxHeaderListSize = 0x6,
}

pub type SettingsMap = EnumMap<SettingsParameter, u32>;

/// RFC 7540 §6.5.2 default values, applied before any SETTINGS frame exchange.
pub fn default_settings() -> SettingsMap {
    enum_map! {
        SettingsParameter::HeaderTableSize => 4096,
        SettingsParameter::EnablePush => 1,
        SettingsParameter::MaxConcurrentStreams => u32::MAX,
        SettingsParameter::InitialWindowSize => 65_535,
        SettingsParameter::MaxFrameSize => 16_384,
        SettingsParameter::MaxHeaderListSize => u32::MAX,
    }
}

/// One 6-octet (id, value) record within a SETTINGS frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingsRecord {
    pub parameter: SettingsParameter,
    pub value: u32,
}

/// Flattens a settings snapshot into the records an outbound SETTINGS frame carries.
pub fn records_from_map(map: &SettingsMap) -> Vec<SettingsRecord> {
    map.iter().map(|(parameter, &value)| SettingsRecord { parameter, value }).collect()
}
