//! Runtime configuration surface (spec.md §6 "Config surface"). An immutable
//! snapshot consumed at connection construction; nothing here is mutated
//! once a connection is live.

use crate::window::FlowControlPolicy;
use std::time::Duration;

/// Timer settings for a connection (spec.md §6, §5 "Timers").
#[derive(Debug, Clone, Copy)]
pub struct TimerConfig {
    pub incomplete_header_timeout_in: Duration,
    pub no_activity_timeout_in: Duration,
    pub no_activity_timeout_out: Duration,
    pub active_timeout_in: Duration,
    pub zombie_timeout_in: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            incomplete_header_timeout_in: Duration::from_secs(10),
            no_activity_timeout_in: Duration::from_secs(120),
            no_activity_timeout_out: Duration::from_secs(120),
            active_timeout_in: Duration::from_secs(900),
            zombie_timeout_in: Duration::from_secs(2),
        }
    }
}

/// Abuse-mitigation thresholds, each checked against a one-minute
/// [`crate::frequency_counter::FrequencyCounter`] (spec.md §4.3 "Abuse counters").
#[derive(Debug, Clone, Copy)]
pub struct AbuseThresholds {
    pub max_settings_per_frame: u32,
    pub max_settings_frames_per_minute: u64,
    pub max_ping_frames_per_minute: u64,
    pub max_priority_frames_per_minute: u64,
    pub max_rst_stream_frames_per_minute: u64,
    pub max_continuation_frames_per_minute: u64,
    pub max_empty_frames_per_minute: u64,
    /// Minimum average of the last 5 WINDOW_UPDATE increments; below this
    /// triggers ENHANCE_YOUR_CALM.
    pub min_avg_window_update: u32,
}

impl Default for AbuseThresholds {
    fn default() -> Self {
        Self {
            max_settings_per_frame: 32,
            max_settings_frames_per_minute: 60,
            max_ping_frames_per_minute: 60,
            max_priority_frames_per_minute: 240,
            max_rst_stream_frames_per_minute: 200,
            max_continuation_frames_per_minute: 120,
            max_empty_frames_per_minute: 120,
            min_avg_window_update: 512,
        }
    }
}

/// Directional concurrency and window configuration (spec.md §6).
#[derive(Debug, Clone, Copy)]
pub struct DirectionalConfig {
    pub max_concurrent_streams: u32,
    pub min_concurrent_streams: u32,
    /// Live-stream-count trigger for throttling down to `min_concurrent_streams`; 0 disables.
    pub max_active_streams: u32,
    pub initial_window_size: u32,
    pub flow_control_policy: FlowControlPolicy,
}

impl Default for DirectionalConfig {
    fn default() -> Self {
        Self {
            max_concurrent_streams: 100,
            min_concurrent_streams: 10,
            max_active_streams: 0,
            initial_window_size: 65_535,
            flow_control_policy: FlowControlPolicy::StaticSessionAndStaticStream,
        }
    }
}

/// The full configuration surface for one connection, covering advertised
/// SETTINGS values, flow-control policy selection, abuse thresholds, and
/// timers.
#[derive(Debug, Clone)]
pub struct Http2ConnectionConfig {
    pub inbound: DirectionalConfig,
    pub outbound: DirectionalConfig,
    pub max_frame_size: u32,
    pub header_table_size: u32,
    /// Upper bound we will honor for the peer's advertised HEADER_TABLE_SIZE.
    pub header_table_size_limit: u32,
    pub max_header_list_size: u32,
    pub stream_priority_enabled: bool,
    pub abuse: AbuseThresholds,
    pub timers: TimerConfig,
}

impl Default for Http2ConnectionConfig {
    fn default() -> Self {
        Self {
            inbound: DirectionalConfig::default(),
            outbound: DirectionalConfig::default(),
            max_frame_size: 16_384,
            header_table_size: 4_096,
            header_table_size_limit: 64 * 1024,
            max_header_list_size: 1 << 20,
            stream_priority_enabled: true,
            abuse: AbuseThresholds::default(),
            timers: TimerConfig::default(),
        }
    }
}

impl Http2ConnectionConfig {
    /// Bound we will accept for the peer's HEADER_TABLE_SIZE, per §4.1 "The
    /// maximum is bounded by `min(peer's HEADER_TABLE_SIZE, 64 KiB)`".
    pub fn clamp_header_table_size(&self, peer_value: u32) -> u32 {
        peer_value.min(self.header_table_size_limit)
    }
}
