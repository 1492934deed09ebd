use mtc_core::{Asset, Device, Timestamp};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::message::{Body, ShdrLine, parse_line};
use crate::{FramingError, ParseError};

pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024; // 4 MB

/// A complete protocol unit: a single line, or an assembled asset/device
/// whose body may have spanned many lines.
#[derive(Debug, Clone, PartialEq)]
pub enum ShdrRecord {
    Line(ShdrLine),
    Asset(Asset),
    Device(Device),
}

pub type RecordResult = Result<ShdrRecord, ParseError>;

#[derive(Debug)]
enum Header {
    Asset {
        timestamp: Timestamp,
        asset_id: String,
        asset_type: String,
    },
    Device {
        timestamp: Timestamp,
        uuid: String,
    },
}

#[derive(Debug)]
struct PendingBlock {
    header: Header,
    marker: String,
    lines: Vec<String>,
}

impl PendingBlock {
    fn finish(self) -> ShdrRecord {
        let payload = self.lines.join("\n");
        match self.header {
            Header::Asset {
                timestamp,
                asset_id,
                asset_type,
            } => ShdrRecord::Asset(Asset::new(asset_id, asset_type, payload).at(timestamp)),
            Header::Device { timestamp, uuid } => {
                ShdrRecord::Device(Device::new(uuid, payload).at(timestamp))
            }
        }
    }
}

/// Line-at-a-time state machine for multi-line framing.
///
/// While a block is open every line is buffered verbatim, with no SHDR
/// parsing, until a line equal to the block's marker arrives.
#[derive(Debug, Default)]
pub struct MultilineAssembler {
    pending: Option<PendingBlock>,
}

impl MultilineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Feeds one line without its `\n`. Returns a record once one is complete.
    pub fn push(&mut self, line: &str) -> Option<RecordResult> {
        if let Some(block) = self.pending.as_mut() {
            if line.trim_end_matches('\r') == block.marker {
                return self.pending.take().map(|block| Ok(block.finish()));
            }
            block.lines.push(line.to_owned());
            return None;
        }

        let parsed = match parse_line(line) {
            Ok(parsed) => parsed,
            Err(e) => return Some(Err(e)),
        };

        match parsed {
            ShdrLine::Asset {
                timestamp,
                asset_id,
                asset_type,
                body,
            } => match body {
                Body::Inline(xml) => Some(Ok(ShdrRecord::Asset(
                    Asset::new(asset_id, asset_type, xml).at(timestamp),
                ))),
                Body::Multiline { marker } => {
                    self.open(
                        Header::Asset {
                            timestamp,
                            asset_id,
                            asset_type,
                        },
                        marker,
                    );
                    None
                }
            },
            ShdrLine::Device {
                timestamp,
                uuid,
                body,
            } => match body {
                Body::Inline(payload) => Some(Ok(ShdrRecord::Device(
                    Device::new(uuid, payload).at(timestamp),
                ))),
                Body::Multiline { marker } => {
                    self.open(Header::Device { timestamp, uuid }, marker);
                    None
                }
            },
            other => Some(Ok(ShdrRecord::Line(other))),
        }
    }

    fn open(&mut self, header: Header, marker: String) {
        self.pending = Some(PendingBlock {
            header,
            marker,
            lines: Vec::new(),
        });
    }

    /// Called at end of stream; an open block is a framing error.
    pub fn finish(&mut self) -> Result<(), FramingError> {
        match self.pending.take() {
            Some(block) => Err(FramingError::Unterminated {
                marker: block.marker,
            }),
            None => Ok(()),
        }
    }
}

/// Reads newline-terminated SHDR from a byte stream.
pub struct ShdrReader<R> {
    reader: BufReader<R>,
    assembler: MultilineAssembler,
    buf: Vec<u8>,
}

impl<R> ShdrReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            assembler: MultilineAssembler::new(),
            buf: Vec::with_capacity(1024),
        }
    }

    /// Next record, `Ok(None)` at a clean end of stream.
    ///
    /// The inner `Result` carries per-line decode failures, which callers
    /// skip; the outer one is connection-fatal.
    ///
    /// Cancel safe: a partially read line stays buffered and is completed by
    /// the next call.
    pub async fn next_record(&mut self) -> Result<Option<RecordResult>, FramingError> {
        loop {
            let n = self.reader.read_until(b'\n', &mut self.buf).await?;
            if n == 0 && self.buf.is_empty() {
                self.assembler.finish()?;
                return Ok(None);
            }

            if self.buf.len() > MAX_LINE_BYTES {
                return Err(FramingError::LineTooLong(MAX_LINE_BYTES));
            }

            let bytes = std::mem::take(&mut self.buf);
            let raw = String::from_utf8_lossy(&bytes);
            let line = raw.strip_suffix('\n').unwrap_or(&raw);

            if !self.assembler.is_pending() && line.trim().is_empty() {
                continue;
            }

            if let Some(record) = self.assembler.push(line) {
                return Ok(Some(record));
            }
        }
    }
}

/// Writes each line followed by `\n` in one buffer, then flushes.
pub async fn write_lines<W>(w: &mut W, lines: &[String]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut bytes = Vec::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
    for line in lines {
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
    }

    w.write_all(&bytes).await?;
    w.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::encode_asset;
    use crate::message::Command;

    #[test]
    fn assembles_multiline_asset() {
        let xml = "<CuttingTool>\r\n  <Life>|</Life>\n\n</CuttingTool>\n";
        let lines = encode_asset(&Asset::new("T1", "CuttingTool", xml), true);

        let mut assembler = MultilineAssembler::new();
        let mut records = Vec::new();
        for line in &lines {
            if let Some(record) = assembler.push(line) {
                records.push(record);
            }
        }

        assert_eq!(
            records,
            vec![Ok(ShdrRecord::Asset(Asset::new("T1", "CuttingTool", xml)))]
        );
        assert!(assembler.finish().is_ok());
    }

    #[test]
    fn body_lines_are_not_parsed() {
        let mut assembler = MultilineAssembler::new();
        assert!(assembler.push("@DEVICE@|dev-1|--multiline--XYZ").is_none());
        assert!(assembler.push("* PING").is_none());
        assert!(assembler.push("--multiline--OTHER").is_none());
        let record = assembler.push("--multiline--XYZ");
        assert_eq!(
            record,
            Some(Ok(ShdrRecord::Device(Device::new(
                "dev-1",
                "* PING\n--multiline--OTHER"
            ))))
        );
    }

    #[test]
    fn unterminated_block_is_fatal() {
        let mut assembler = MultilineAssembler::new();
        assembler.push("@ASSET@|T1|CuttingTool|--multiline--XYZ");
        assembler.push("<CuttingTool/>");
        assert!(matches!(
            assembler.finish(),
            Err(FramingError::Unterminated { ref marker }) if marker == "--multiline--XYZ"
        ));
    }

    #[tokio::test]
    async fn reader_skips_blank_lines_and_reports_bad_ones() {
        let input: &[u8] = b"* PING\r\n\n@BOGUS@|x\n@ASSET@|T1|Part|<Part/>\n";
        let mut reader = ShdrReader::new(input);

        let first = reader.next_record().await.unwrap().unwrap();
        assert_eq!(first, Ok(ShdrRecord::Line(ShdrLine::Command(Command::Ping))));

        let second = reader.next_record().await.unwrap().unwrap();
        assert!(second.is_err());

        let third = reader.next_record().await.unwrap().unwrap();
        assert_eq!(third, Ok(ShdrRecord::Asset(Asset::new("T1", "Part", "<Part/>"))));

        assert!(reader.next_record().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reader_fails_on_unterminated_block() {
        let input: &[u8] = b"@ASSET@|T1|Part|--multiline--Q\n<Part/>\n";
        let mut reader = ShdrReader::new(input);
        assert!(matches!(
            reader.next_record().await,
            Err(FramingError::Unterminated { .. })
        ));
    }

    #[tokio::test]
    async fn write_lines_terminates_each_line() {
        let mut out = Vec::new();
        write_lines(&mut out, &["a|1".to_owned(), "b|2".to_owned()])
            .await
            .unwrap();
        assert_eq!(out, b"a|1\nb|2\n");
    }
}
