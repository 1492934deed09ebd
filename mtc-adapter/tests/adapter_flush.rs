mod common;

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use std::time::Duration;

use common::{LINE_TIMEOUT, connect};
use mtc_adapter::{
    AdapterEvent, AdapterMode, AdapterOptions, ClientId, SendError, ShdrAdapter,
};
use mtc_core::*;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader, ReadBuf};
use tokio_util::sync::CancellationToken;

/// Accepts a fixed number of writes, then fails like a reset socket.
struct FailAfter {
    writes_left: usize,
}

impl AsyncWrite for FailAfter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.writes_left == 0 {
            return Poll::Ready(Err(io::ErrorKind::ConnectionReset.into()));
        }
        self.writes_left -= 1;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl AsyncRead for FailAfter {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

fn dummy_options() -> AdapterOptions {
    AdapterOptions {
        multiline_assets: false,
        ..AdapterOptions::default()
    }
}

#[tokio::test]
async fn repeated_value_is_sent_once() -> Result<(), SendError> {
    let adapter = ShdrAdapter::new(dummy_options());
    let mut agent = connect(&adapter).await;

    assert!(adapter.add_data_item(DataItem::new("temp", 72.5)));
    assert!(!adapter.add_data_item(DataItem::new("temp", 72.5)));
    assert_eq!(adapter.send_changed().await?, 1);
    assert_eq!(agent.next_unstamped().await, "temp|72.5");

    assert_eq!(adapter.send_changed().await?, 0);

    assert!(adapter.add_data_item(DataItem::new("temp", 80.1)));
    assert_eq!(adapter.send_changed().await?, 1);
    assert_eq!(agent.next_unstamped().await, "temp|80.1");

    agent.assert_silent().await;
    Ok(())
}

#[tokio::test]
async fn new_agent_receives_last_state() -> Result<(), SendError> {
    let adapter = ShdrAdapter::new(dummy_options());

    // nobody connected yet; still counts as delivered
    adapter.send_data_item(DataItem::new("temp", 72.5)).await?;
    adapter
        .send_asset(Asset::new("P1", "Part", "<Part id=\"P1\"/>"))
        .await?;

    let mut agent = connect(&adapter).await;
    assert_eq!(agent.next_unstamped().await, "temp|72.5");
    assert_eq!(agent.next_unstamped().await, "@ASSET@|P1|Part|<Part id=\"P1\"/>");
    agent.assert_silent().await;

    Ok(())
}

#[tokio::test]
async fn failed_flush_is_retried() -> Result<(), SendError> {
    let adapter = ShdrAdapter::new(dummy_options());
    adapter.add_data_item(DataItem::new("temp", 1.0));

    // the replay write succeeds, the flush does not
    adapter
        .connect_client(
            ClientId::new(),
            None,
            Box::new(FailAfter { writes_left: 1 }),
            CancellationToken::new(),
        )
        .await
        .expect("replay written");

    let err = adapter.send_changed().await.unwrap_err();
    assert_eq!((err.failed, err.attempted), (1, 1));
    assert_eq!(adapter.client_count(), 0);

    // nothing was promoted, so a new agent sees no replay
    let mut agent = connect(&adapter).await;
    agent.assert_silent().await;

    assert_eq!(adapter.send_changed().await?, 1);
    assert_eq!(agent.next_unstamped().await, "temp|1");
    Ok(())
}

#[tokio::test]
async fn buffer_refuses_past_limit() -> Result<(), SendError> {
    let adapter = ShdrAdapter::new(AdapterOptions {
        mode: AdapterMode::Buffer,
        buffer_limit: 2,
        ..dummy_options()
    });

    assert!(adapter.add_data_item(DataItem::new("a", 1.0)));
    assert!(adapter.add_data_item(DataItem::new("b", 2.0)));
    assert!(!adapter.add_data_item(DataItem::new("c", 3.0)));

    assert_eq!(adapter.flush().await?, 2);
    assert_eq!(adapter.queued(), 0);
    assert!(adapter.add_data_item(DataItem::new("c", 3.0)));
    Ok(())
}

#[tokio::test]
async fn buffer_keeps_every_distinct_sample() -> Result<(), SendError> {
    let adapter = ShdrAdapter::new(AdapterOptions {
        mode: AdapterMode::Buffer,
        ..dummy_options()
    });
    let mut agent = connect(&adapter).await;

    adapter.add_data_item(DataItem::new("temp", 1.0).at(Timestamp(1_700_000_000_000_000)));
    adapter.add_data_item(DataItem::new("temp", 1.0).at(Timestamp(1_700_000_001_000_000)));
    adapter.add_data_item(DataItem::new("temp", 2.0).at(Timestamp(1_700_000_002_000_000)));

    assert_eq!(adapter.send_buffer().await?, 3);
    assert_eq!(agent.next_line().await, "2023-11-14T22:13:20.000000Z|temp|1");
    assert_eq!(agent.next_line().await, "2023-11-14T22:13:21.000000Z|temp|1");
    assert_eq!(agent.next_line().await, "2023-11-14T22:13:22.000000Z|temp|2");
    Ok(())
}

#[tokio::test]
async fn conditions_and_removals_reach_agent() -> Result<(), SendError> {
    let adapter = ShdrAdapter::new(dummy_options());
    let mut agent = connect(&adapter).await;

    adapter.add_fault_state("system", FaultState::fault("F1", "overheat"), Timestamp::UNSET);
    adapter.send_changed().await?;
    assert_eq!(agent.next_unstamped().await, "system|FAULT|F1|||overheat");

    adapter.send_asset(Asset::new("T1", "CuttingTool", "<CuttingTool/>")).await?;
    assert_eq!(
        agent.next_unstamped().await,
        "@ASSET@|T1|CuttingTool|<CuttingTool/>"
    );

    adapter
        .remove_all_assets(Some("CuttingTool"), Timestamp::UNSET)
        .await?;
    assert_eq!(
        agent.next_unstamped().await,
        "@REMOVE_ALL_ASSETS@|CuttingTool"
    );

    // the removed asset is no longer replayed
    let mut late = connect(&adapter).await;
    assert_eq!(late.next_unstamped().await, "system|FAULT|F1|||overheat");
    late.assert_silent().await;
    Ok(())
}

#[tokio::test]
async fn send_last_restamps_state() -> Result<(), SendError> {
    let adapter = ShdrAdapter::new(dummy_options());
    adapter.add_data_item(DataItem::new("mode", "AUTOMATIC"));
    adapter.send_changed().await?;

    let mut agent = connect(&adapter).await;
    assert_eq!(agent.next_unstamped().await, "mode|AUTOMATIC");

    adapter.send_last(Timestamp(1_700_000_000_000_000)).await?;
    assert_eq!(
        agent.next_line().await,
        "2023-11-14T22:13:20.000000Z|mode|AUTOMATIC"
    );
    Ok(())
}

#[tokio::test]
async fn timestamps_can_be_suppressed() -> Result<(), SendError> {
    let adapter = ShdrAdapter::new(AdapterOptions {
        output_timestamps: false,
        ..dummy_options()
    });
    let mut agent = connect(&adapter).await;

    adapter.add_data_item(DataItem::new("temp", 5.0).at(Timestamp(1_700_000_000_000_000)));
    adapter.send_changed().await?;
    assert_eq!(agent.next_line().await, "temp|5");
    Ok(())
}

#[tokio::test]
async fn immediate_send_replaces_current_value() -> Result<(), SendError> {
    let adapter = ShdrAdapter::new(dummy_options());
    let mut agent = connect(&adapter).await;

    assert!(adapter.add_data_item(DataItem::new("temp", 1.0)));
    adapter.send_changed().await?;
    assert_eq!(agent.next_unstamped().await, "temp|1");

    adapter.send_data_item(DataItem::new("temp", 2.0)).await?;
    assert_eq!(agent.next_unstamped().await, "temp|2");

    // the slot now holds 2, so 1 is a change again
    assert!(adapter.add_data_item(DataItem::new("temp", 1.0)));
    assert!(!adapter.add_data_item(DataItem::new("temp", 1.0)));
    assert_eq!(adapter.send_changed().await?, 1);
    assert_eq!(agent.next_unstamped().await, "temp|1");
    Ok(())
}

#[tokio::test]
async fn agent_connecting_mid_flush_gets_the_batch() -> Result<(), SendError> {
    let adapter = ShdrAdapter::new(dummy_options());

    // a slow agent whose buffer fills before the flush's line fits
    let (slow, slow_side) = tokio::io::duplex(32);
    adapter
        .connect_client(ClientId::new(), None, Box::new(slow_side), CancellationToken::new())
        .await
        .expect("replay written");

    adapter.add_data_item(DataItem::new("temp", 72.5).at(Timestamp(1_700_000_000_000_000)));
    let flushing = tokio::spawn({
        let adapter = adapter.clone();
        async move { adapter.send_changed().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!flushing.is_finished());

    let (late, late_side) = tokio::io::duplex(1024);
    let connecting = tokio::spawn({
        let adapter = adapter.clone();
        async move {
            adapter
                .connect_client(ClientId::new(), None, Box::new(late_side), CancellationToken::new())
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut slow = BufReader::new(slow).lines();
    assert_eq!(slow.next_line().await.unwrap().as_deref(), Some("* shdrVersion: 2"));
    assert_eq!(
        slow.next_line().await.unwrap().as_deref(),
        Some("2023-11-14T22:13:20.000000Z|temp|72.5")
    );
    assert_eq!(flushing.await.expect("flush task")?, 1);
    connecting.await.expect("connect task").expect("replay written");

    let mut late = BufReader::new(late).lines();
    let mut received = Vec::new();
    while let Ok(Ok(Some(line))) = tokio::time::timeout(LINE_TIMEOUT, late.next_line()).await {
        let done = line.ends_with("temp|72.5");
        received.push(line);
        if done {
            break;
        }
    }
    assert_eq!(
        received,
        vec!["* shdrVersion: 2", "2023-11-14T22:13:20.000000Z|temp|72.5"]
    );
    Ok(())
}

#[tokio::test]
async fn failed_replay_is_never_announced() {
    let adapter = ShdrAdapter::new(dummy_options());
    let mut events = adapter.subscribe();

    adapter
        .serve_connection(FailAfter { writes_left: 0 }, None, CancellationToken::new())
        .await;

    assert_eq!(adapter.client_count(), 0);
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(
                event,
                AdapterEvent::AgentConnected { .. } | AdapterEvent::AgentDisconnected { .. }
            ),
            "unexpected {event:?}"
        );
    }
}
