//! One tokio task per connection owns the connection state machine
//! (spec.md §5): the HPACK tables, dependency tree, and settings snapshots
//! inside [`ConnectionState`] are never shared behind an `Arc<Mutex<_>>` —
//! they live in this task's local state and are reached only through the
//! channels below.

use crate::config::TimerConfig;
use crate::connection::{ConnectionEvent, ConnectionState};
use crate::error::ErrorType;
use crate::frame::Frame;
use crate::timers::{StreamTimers, TimerKind};
use crate::wake::WakeSlot;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

enum ActorCommand {
    Inbound { frame: Frame, from_early_data: bool },
    BeginShutdown,
}

/// A handle to a running connection task. Cloning shares the same task.
#[derive(Clone)]
pub struct ConnectionHandle {
    commands: mpsc::Sender<ActorCommand>,
    wake: Arc<WakeSlot>,
}

impl ConnectionHandle {
    /// Hand an inbound frame to the connection task and coalesce a wake-up
    /// (spec.md §5: "at most one outstanding cross-thread hop").
    pub async fn deliver(&self, frame: Frame, from_early_data: bool) -> bool {
        let sent = self.commands.send(ActorCommand::Inbound { frame, from_early_data }).await.is_ok();
        self.wake.wake();
        sent
    }

    pub async fn begin_shutdown(&self) -> bool {
        let sent = self.commands.send(ActorCommand::BeginShutdown).await.is_ok();
        self.wake.wake();
        sent
    }
}

fn frame_stream_id(frame: &Frame) -> u32 {
    match frame {
        Frame::Data { stream_id, .. }
        | Frame::Headers { stream_id, .. }
        | Frame::Priority { stream_id, .. }
        | Frame::ResetStream { stream_id, .. }
        | Frame::PushPromise { stream_id, .. }
        | Frame::WindowUpdate { stream_id, .. }
        | Frame::Continuation { stream_id, .. } => *stream_id,
        Frame::Settings { .. } | Frame::Ping { .. } | Frame::GoAway { .. } | Frame::Unknown { .. } => 0,
    }
}

/// Spawn the connection task. `outbound` receives frames to write to the
/// socket; `events` receives up-calls for the transaction-handler
/// collaborator (spec.md §6).
pub fn spawn(
    mut conn: ConnectionState,
    timer_config: TimerConfig,
    outbound: mpsc::Sender<Frame>,
    events: mpsc::Sender<ConnectionEvent>,
) -> ConnectionHandle {
    let (commands_tx, mut commands_rx) = mpsc::channel(64);
    let wake = Arc::new(WakeSlot::new());
    let task_wake = wake.clone();

    tokio::spawn(async move {
        let mut timers: HashMap<u32, StreamTimers> = HashMap::new();
        let start = tokio::time::Instant::now();

        loop {
            let next_fire = timers.values().filter_map(|t| t.next_deadline()).map(|(_, d)| d).min();

            tokio::select! {
                biased;

                _ = task_wake.waited() => {}

                maybe_cmd = commands_rx.recv() => {
                    let Some(cmd) = maybe_cmd else { break };
                    if !handle_command(&mut conn, &mut timers, &timer_config, start, cmd, &outbound, &events).await {
                        break;
                    }
                }

                _ = sleep_until_or_pending(next_fire) => {
                    if !fire_expired_timers(&mut timers, &outbound).await {
                        break;
                    }
                }
            }
        }
    });

    ConnectionHandle { commands: commands_tx, wake }
}

async fn sleep_until_or_pending(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

async fn handle_command(
    conn: &mut ConnectionState,
    timers: &mut HashMap<u32, StreamTimers>,
    timer_config: &TimerConfig,
    start: Instant,
    cmd: ActorCommand,
    outbound: &mpsc::Sender<Frame>,
    events: &mpsc::Sender<ConnectionEvent>,
) -> bool {
    match cmd {
        ActorCommand::Inbound { frame, from_early_data } => {
            let stream_id = frame_stream_id(&frame);
            let now = tokio::time::Instant::now().saturating_duration_since(start);
            let (out, evs) = conn.handle_frame(frame, from_early_data, now);

            if stream_id != 0 {
                let t = timers.entry(stream_id).or_default();
                t.set_inactive(Instant::now() + timer_config.no_activity_timeout_in);
                if !conn.has_stream(stream_id) {
                    t.cancel_inactive();
                    t.cancel_active();
                    t.set_zombie(Instant::now() + timer_config.zombie_timeout_in);
                }
            }

            for f in out {
                if outbound.send(f).await.is_err() {
                    return false;
                }
            }
            for e in evs {
                if events.send(e).await.is_err() {
                    return false;
                }
            }
            true
        }
        ActorCommand::BeginShutdown => {
            let goaway = conn.begin_graceful_shutdown();
            outbound.send(goaway).await.is_ok()
        }
    }
}

/// Reacts to whichever per-stream timers have passed their deadline:
/// inactivity/active timeouts reset the stream, a zombie timeout finally
/// drops its timer bookkeeping (spec.md §5 "Cancellation").
async fn fire_expired_timers(timers: &mut HashMap<u32, StreamTimers>, outbound: &mpsc::Sender<Frame>) -> bool {
    let now = Instant::now();
    let mut fired = Vec::new();
    for (&stream_id, t) in timers.iter_mut() {
        if let Some((kind, deadline)) = t.next_deadline() {
            if deadline <= now {
                t.clear(kind);
                fired.push((stream_id, kind));
            }
        }
    }
    for (stream_id, kind) in fired {
        match kind {
            TimerKind::Inactive | TimerKind::Active => {
                let rst = Frame::ResetStream { stream_id, error: ErrorType::NoError };
                if outbound.send(rst).await.is_err() {
                    return false;
                }
            }
            TimerKind::Zombie => {
                timers.remove(&stream_id);
            }
            TimerKind::Retransmit => {}
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Http2ConnectionConfig;
    use crate::hpack;

    fn headers_frame(stream_id: u32, end_stream: bool) -> Frame {
        let mut encoder = hpack::Encoder::new();
        let block = encoder.encode(
            [(":method", "GET"), (":scheme", "https"), (":path", "/"), (":authority", "example.com")]
                .into_iter()
                .map(|(k, v)| (k.as_bytes(), v.as_bytes())),
        );
        Frame::Headers { stream_id, end_stream, end_headers: true, priority: None, fragment: block }
    }

    #[tokio::test]
    async fn delivered_frame_surfaces_as_event() {
        let conn = ConnectionState::new(Http2ConnectionConfig::default(), true);
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let (ev_tx, mut ev_rx) = mpsc::channel(16);
        let handle = spawn(conn, TimerConfig::default(), out_tx, ev_tx);

        assert!(handle.deliver(headers_frame(1, true), false).await);
        let event = tokio::time::timeout(std::time::Duration::from_secs(1), ev_rx.recv())
            .await
            .expect("actor should have produced an event")
            .expect("channel should still be open");
        assert!(matches!(event, ConnectionEvent::HeadersReceived { stream_id: 1, .. }));
        let _ = out_rx.try_recv();
    }

    #[tokio::test]
    async fn begin_shutdown_emits_goaway_on_outbound_channel() {
        let conn = ConnectionState::new(Http2ConnectionConfig::default(), true);
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let (ev_tx, _ev_rx) = mpsc::channel(16);
        let handle = spawn(conn, TimerConfig::default(), out_tx, ev_tx);

        assert!(handle.begin_shutdown().await);
        let frame = tokio::time::timeout(std::time::Duration::from_secs(1), out_rx.recv())
            .await
            .expect("actor should have produced a GOAWAY")
            .expect("channel should still be open");
        assert!(matches!(frame, Frame::GoAway { error: ErrorType::NoError, .. }));
    }
}
