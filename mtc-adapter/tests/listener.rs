mod common;

use std::error::Error;
use std::time::Duration;

use common::{LINE_TIMEOUT, unstamped};
use mtc_adapter::{AdapterRuntime, ShdrAdapter};
use mtc_core::DataItem;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;

async fn next(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> Result<String, Box<dyn Error>> {
    let line = tokio::time::timeout(LINE_TIMEOUT, lines.next_line())
        .await??
        .ok_or("connection closed")?;
    Ok(line)
}

#[tokio::test]
async fn runtime_serves_agents_over_tcp() -> Result<(), Box<dyn Error>> {
    let adapter = ShdrAdapter::default();
    let runtime = AdapterRuntime::start(
        adapter.clone(),
        "127.0.0.1:0".parse()?,
        Duration::from_millis(20),
    )
    .await?;

    let stream = TcpStream::connect(runtime.local_addr()).await?;
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    assert_eq!(next(&mut lines).await?, "* shdrVersion: 2");

    writer.write_all(b"* PING\n").await?;
    assert_eq!(next(&mut lines).await?, "* PONG 10000");

    // picked up by the interval flush
    adapter.add_data_item(DataItem::new("execution", "ACTIVE"));
    assert_eq!(unstamped(&next(&mut lines).await?), "execution|ACTIVE");

    runtime.stop().await;
    assert_eq!(unstamped(&next(&mut lines).await?), "execution|UNAVAILABLE");
    assert!(lines.next_line().await?.is_none());

    // stopping again is a no-op
    runtime.stop().await;
    Ok(())
}

#[tokio::test]
async fn each_agent_gets_every_line() -> Result<(), Box<dyn Error>> {
    let adapter = ShdrAdapter::default();
    let runtime = AdapterRuntime::start(
        adapter.clone(),
        "127.0.0.1:0".parse()?,
        Duration::from_millis(20),
    )
    .await?;

    let mut agents = Vec::new();
    for _ in 0..3 {
        let stream = TcpStream::connect(runtime.local_addr()).await?;
        let (reader, writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();
        assert_eq!(next(&mut lines).await?, "* shdrVersion: 2");
        agents.push((lines, writer));
    }

    adapter.send_data_item(DataItem::new("Sspeed", 1200.0)).await?;
    for (lines, _) in agents.iter_mut() {
        assert_eq!(unstamped(&next(lines).await?), "Sspeed|1200");
    }

    runtime.stop().await;
    Ok(())
}
