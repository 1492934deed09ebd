use std::time::Duration;

use mtc_shdr::{Command, MAX_LINE_BYTES, ShdrLine, parse_line, pong_line};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::clients::ClientRegistry;
use crate::events::{AdapterEvent, ClientId, EventBus};

#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    /// Read timeout; also the interval announced in PONG.
    pub heartbeat: Duration,
    /// Consecutive silent intervals tolerated before the socket is closed.
    pub max_missed: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            heartbeat: mtc_shdr::DEFAULT_HEARTBEAT,
            max_missed: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeartbeatState {
    Connected,
    AwaitingPing,
    PingReceived,
    PongSent,
}

#[derive(Debug)]
enum CloseReason {
    Cancelled,
    Eof,
    Missed(u32),
    Io(std::io::Error),
    Oversized,
}

/// Answers PINGs on one agent connection until it goes quiet, closes, or is
/// cancelled. Always unregisters the client and emits `AgentDisconnected`
/// exactly once on return.
pub async fn run_heartbeat<R>(
    client: ClientId,
    mut reader: R,
    registry: &ClientRegistry,
    events: &EventBus,
    config: HeartbeatConfig,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut state = HeartbeatState::Connected;
    let mut missed = 0u32;
    let mut buf = [0u8; 4096];
    let mut pending: Vec<u8> = Vec::new();

    let reason = loop {
        if matches!(state, HeartbeatState::Connected | HeartbeatState::PongSent) {
            state = HeartbeatState::AwaitingPing;
            trace!(%client, ?state, "heartbeat state");
        }

        let read = tokio::select! {
            _ = cancel.cancelled() => break CloseReason::Cancelled,
            read = tokio::time::timeout(config.heartbeat, reader.read(&mut buf)) => read,
        };

        let n = match read {
            Err(_) => {
                missed += 1;
                warn!(%client, missed, max = config.max_missed, "no heartbeat from agent");
                if missed >= config.max_missed {
                    break CloseReason::Missed(missed);
                }
                continue;
            }
            Ok(Ok(0)) => break CloseReason::Eof,
            Ok(Ok(n)) => n,
            Ok(Err(e)) => break CloseReason::Io(e),
        };

        missed = 0;
        pending.extend_from_slice(&buf[..n]);

        while let Some(end) = pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = pending.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw);

            match parse_line(&line) {
                Ok(ShdrLine::Command(Command::Ping)) => {
                    state = HeartbeatState::PingReceived;
                    events.emit(AdapterEvent::PingReceived { client });

                    let pong = [pong_line(config.heartbeat)];
                    if let Err(e) = registry.send_to(client, &pong).await {
                        warn!(%client, error = %e, "failed to send pong");
                        continue;
                    }
                    state = HeartbeatState::PongSent;
                    events.emit(AdapterEvent::PongSent { client });
                }
                Ok(other) => debug!(%client, line = ?other, "ignoring agent line"),
                Err(e) => debug!(%client, error = %e, "ignoring agent line"),
            }
        }

        if pending.len() > MAX_LINE_BYTES {
            break CloseReason::Oversized;
        }
    };

    match &reason {
        CloseReason::Cancelled => debug!(%client, "heartbeat cancelled"),
        CloseReason::Eof => info!(%client, "agent closed connection"),
        CloseReason::Missed(missed) => info!(%client, missed, "closing silent agent connection"),
        CloseReason::Io(e) => warn!(%client, error = %e, "agent connection failed"),
        CloseReason::Oversized => warn!(%client, "agent sent an oversized line"),
    }

    registry.unregister(client);
    events.emit(AdapterEvent::AgentDisconnected { client });
}
