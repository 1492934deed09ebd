#![allow(dead_code)]

use std::time::Duration;

use mtc_adapter::ShdrAdapter;
use mtc_core::Timestamp;
use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const LINE_TIMEOUT: Duration = Duration::from_secs(1);

/// The agent end of an in-memory connection to an adapter.
pub struct TestAgent {
    pub lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    pub writer: WriteHalf<DuplexStream>,
    pub cancel: CancellationToken,
    pub task: JoinHandle<()>,
}

impl TestAgent {
    pub async fn next_line(&mut self) -> String {
        tokio::time::timeout(LINE_TIMEOUT, self.lines.next_line())
            .await
            .expect("line within timeout")
            .expect("readable stream")
            .expect("stream still open")
    }

    /// Next line with its timestamp checked and stripped.
    pub async fn next_unstamped(&mut self) -> String {
        unstamped(&self.next_line().await).to_owned()
    }

    pub async fn assert_silent(&mut self) {
        let read = tokio::time::timeout(Duration::from_millis(50), self.lines.next_line()).await;
        assert!(read.is_err(), "unexpected line: {read:?}");
    }
}

/// Connects an agent and consumes the version announcement.
pub async fn connect(adapter: &ShdrAdapter) -> TestAgent {
    let (agent, adapter_side) = tokio::io::duplex(64 * 1024);
    let cancel = CancellationToken::new();

    let served = adapter.clone();
    let token = cancel.clone();
    let task = tokio::spawn(async move {
        served.serve_connection(adapter_side, None, token).await;
    });

    let (reader, writer) = tokio::io::split(agent);
    let mut agent = TestAgent {
        lines: BufReader::new(reader).lines(),
        writer,
        cancel,
        task,
    };
    assert_eq!(agent.next_line().await, "* shdrVersion: 2");
    agent
}

/// Strips a leading timestamp, asserting it is present and valid.
pub fn unstamped(line: &str) -> &str {
    let (stamp, rest) = line.split_once('|').expect("stamped line");
    assert!(Timestamp::parse(stamp).is_some(), "bad timestamp in {line:?}");
    rest
}
