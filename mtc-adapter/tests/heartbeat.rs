mod common;

use std::error::Error;
use std::time::Duration;

use common::connect;
use mtc_adapter::{AdapterEvent, ShdrAdapter};
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;

fn count_disconnects(events: &mut tokio::sync::broadcast::Receiver<AdapterEvent>) -> usize {
    let mut count = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, AdapterEvent::AgentDisconnected { .. }) {
            count += 1;
        }
    }
    count
}

#[tokio::test(start_paused = true)]
async fn one_missed_ping_is_tolerated() -> Result<(), Box<dyn Error>> {
    let adapter = ShdrAdapter::default();
    let mut events = adapter.subscribe();
    let mut agent = connect(&adapter).await;
    let start = Instant::now();

    // one heartbeat interval passes in silence
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(adapter.client_count(), 1);

    agent.writer.write_all(b"* PING\n").await?;
    assert_eq!(agent.next_line().await, "* PONG 10000");

    // then two in a row
    let closed_at = loop {
        if let AdapterEvent::AgentDisconnected { .. } = events.recv().await? {
            break start.elapsed();
        }
    };
    assert!(closed_at >= Duration::from_secs(30), "closed after {closed_at:?}");
    assert_eq!(adapter.client_count(), 0);

    // the adapter hung up
    assert!(agent.lines.next_line().await?.is_none());

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(count_disconnects(&mut events), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn regular_pings_keep_connection_open() -> Result<(), Box<dyn Error>> {
    let adapter = ShdrAdapter::default();
    let mut events = adapter.subscribe();
    let mut agent = connect(&adapter).await;

    for _ in 0..6 {
        tokio::time::sleep(Duration::from_secs(9)).await;
        agent.writer.write_all(b"* PING\n").await?;
        assert_eq!(agent.next_line().await, "* PONG 10000");
    }

    assert_eq!(adapter.client_count(), 1);
    assert_eq!(count_disconnects(&mut events), 0);
    Ok(())
}

#[tokio::test]
async fn agent_hangup_disconnects_once() -> Result<(), Box<dyn Error>> {
    let adapter = ShdrAdapter::default();
    let mut events = adapter.subscribe();
    let agent = connect(&adapter).await;

    drop(agent.writer);
    drop(agent.lines);
    agent.task.await?;

    assert_eq!(adapter.client_count(), 0);
    assert_eq!(count_disconnects(&mut events), 1);
    Ok(())
}

#[tokio::test]
async fn cancelling_closes_connection() -> Result<(), Box<dyn Error>> {
    let adapter = ShdrAdapter::default();
    let mut agent = connect(&adapter).await;

    agent.cancel.cancel();
    assert!(agent.lines.next_line().await?.is_none());
    assert_eq!(adapter.client_count(), 0);
    Ok(())
}
