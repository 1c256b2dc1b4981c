//! pcap file reader for offline replay
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use linkwatch::pcap::PcapReader;
//!
//! fn count_frames() -> linkwatch::Result<()> {
//!     let mut reader = PcapReader::open("physical.pcap")?;
//!     println!("link type {}", reader.info().link_type);
//!
//!     while let Some(record) = reader.read_next_record()? {
//!         println!("{} bytes at {}", record.data.len(), record.timestamp);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Records are streamed through a fixed buffer that grows only when a single
//! record does not fit in it.

use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::{Path, PathBuf};

use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{LegacyPcapReader, PcapBlockOwned, PcapError};
use tracing::{debug, trace};

use crate::types::Timestamp;
use crate::{LinkwatchError, Result};

const INITIAL_BUFFER_SIZE: usize = 65_536;
const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;
const SUPPORTED_MAJOR_VERSION: u16 = 2;

/// Nanosecond magic, as read in either byte order
const MAGIC_NANOS: [u32; 2] = [0xa1b2_3c4d, 0x4d3c_b2a1];

/// Ethernet II frames
pub const LINKTYPE_ETHERNET: i32 = 1;
/// Raw IPv4/IPv6 packets with no link header
pub const LINKTYPE_RAW: i32 = 101;

type ByteSource = Box<dyn Read + Send>;

/// Resolution of the record timestamp fraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampPrecision {
    Micros,
    Nanos,
}

/// What the global header says about the capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureInfo {
    pub version_major: u16,
    pub version_minor: u16,
    pub snaplen: u32,
    pub link_type: i32,
    pub precision: TimestampPrecision,
}

/// One captured record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcapRecord {
    pub data: Vec<u8>,
    pub timestamp: Timestamp,
    /// Length on the wire, which may exceed `data.len()` if the capture was sliced
    pub original_len: u32,
}

enum Block {
    Header(CaptureInfo),
    Record { ts_sec: u32, ts_frac: u32, original_len: u32, data: Vec<u8> },
    Skipped,
}

/// Block stream over a `pcap_parser` reader, refilling and growing its buffer.
struct Blocks {
    inner: LegacyPcapReader<ByteSource>,
    buffer_size: usize,
}

impl Blocks {
    /// Next block, or `None` at a clean end of file. Errors are rendered to text
    /// since the parser's error borrows its buffer.
    fn next_block(&mut self) -> std::result::Result<Option<Block>, String> {
        loop {
            match self.inner.next() {
                Ok((offset, block)) => {
                    let owned = match block {
                        PcapBlockOwned::LegacyHeader(header) => Block::Header(CaptureInfo {
                            version_major: header.version_major,
                            version_minor: header.version_minor,
                            snaplen: header.snaplen,
                            link_type: header.network.0,
                            precision: if MAGIC_NANOS.contains(&header.magic_number) {
                                TimestampPrecision::Nanos
                            } else {
                                TimestampPrecision::Micros
                            },
                        }),
                        PcapBlockOwned::Legacy(packet) => Block::Record {
                            ts_sec: packet.ts_sec,
                            ts_frac: packet.ts_usec,
                            original_len: packet.origlen,
                            data: packet.data.to_vec(),
                        },
                        PcapBlockOwned::NG(_) => Block::Skipped,
                    };
                    self.inner.consume(offset);
                    return Ok(Some(owned));
                }
                Err(PcapError::Eof) => return Ok(None),
                Err(PcapError::Incomplete(_)) => {
                    let buffered = self.inner.data().len();
                    self.inner.refill().map_err(|e| format!("read failed: {e:?}"))?;
                    if self.inner.data().len() > buffered {
                        continue;
                    }
                    if self.inner.reader_exhausted() {
                        return Err(format!("record cut short by end of file ({buffered} bytes left)"));
                    }
                    self.grow()?;
                }
                Err(e) => return Err(format!("{e:?}")),
            }
        }
    }

    /// Double the buffer for a record larger than it.
    fn grow(&mut self) -> std::result::Result<(), String> {
        let new_size = self.buffer_size.saturating_mul(2);
        if new_size > MAX_BUFFER_SIZE || !self.inner.grow(new_size) {
            return Err(format!("record larger than {} bytes", self.buffer_size));
        }
        debug!("Grew pcap read buffer to {} bytes", new_size);
        self.buffer_size = new_size;
        Ok(())
    }
}

/// Sequential reader over a classic pcap file
pub struct PcapReader {
    blocks: Blocks,
    path: PathBuf,
    info: CaptureInfo,
    records_read: usize,
}

impl PcapReader {
    /// Open a pcap file for reading
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).map_err(|e| LinkwatchError::file_error(path.to_path_buf(), e))?;

        Self::from_source(Box::new(BufReader::new(file)), path.to_path_buf())
    }

    /// Create a reader over in-memory bytes
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        Self::from_source(Box::new(Cursor::new(data)), PathBuf::from("<memory>"))
    }

    fn from_source(source: ByteSource, path: PathBuf) -> Result<Self> {
        let header_error =
            |details: String| LinkwatchError::capture_format(format!("{} header", path.display()), details);

        let inner = LegacyPcapReader::new(INITIAL_BUFFER_SIZE, source)
            .map_err(|e| header_error(format!("not a classic pcap file: {e:?}")))?;
        let mut blocks = Blocks { inner, buffer_size: INITIAL_BUFFER_SIZE };

        let info = match blocks.next_block().map_err(header_error)? {
            Some(Block::Header(info)) => info,
            _ => return Err(header_error("missing global header".to_string())),
        };
        if info.version_major != SUPPORTED_MAJOR_VERSION {
            return Err(header_error(format!(
                "unsupported version {}.{} (expected {}.x)",
                info.version_major, info.version_minor, SUPPORTED_MAJOR_VERSION
            )));
        }

        debug!(
            "Parsed pcap header: version={}.{}, {:?}, snaplen={}, link_type={}",
            info.version_major, info.version_minor, info.precision, info.snaplen, info.link_type
        );

        Ok(Self { blocks, path, info, records_read: 0 })
    }

    pub fn info(&self) -> &CaptureInfo {
        &self.info
    }

    /// Number of records returned so far
    pub fn records_read(&self) -> usize {
        self.records_read
    }

    /// Get the file path this reader was opened from
    pub fn file_path(&self) -> &Path {
        &self.path
    }

    /// Read the next record.
    ///
    /// Returns `Ok(None)` at a clean end of file. A record cut short by the end
    /// of the file is an error.
    pub fn read_next_record(&mut self) -> Result<Option<PcapRecord>> {
        loop {
            let context = || format!("{} record {}", self.path.display(), self.records_read);
            let block = self
                .blocks
                .next_block()
                .map_err(|details| LinkwatchError::capture_format(context(), details))?;

            let (ts_sec, ts_frac, original_len, data) = match block {
                None => return Ok(None),
                Some(Block::Record { ts_sec, ts_frac, original_len, data }) => {
                    (ts_sec, ts_frac, original_len, data)
                }
                Some(Block::Header(_) | Block::Skipped) => {
                    trace!("Skipping non-record block in {}", self.path.display());
                    continue;
                }
            };

            let timestamp = record_timestamp(ts_sec, ts_frac, self.info.precision).ok_or_else(|| {
                LinkwatchError::capture_format(
                    context(),
                    format!("invalid timestamp {ts_sec}.{ts_frac}"),
                )
            })?;

            self.records_read += 1;
            return Ok(Some(PcapRecord { data, timestamp, original_len }));
        }
    }
}

impl Iterator for PcapReader {
    type Item = Result<PcapRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next_record().transpose()
    }
}

/// Record timestamp in local time.
///
/// Returns `None` if the fraction is out of range for the precision.
fn record_timestamp(ts_sec: u32, ts_frac: u32, precision: TimestampPrecision) -> Option<Timestamp> {
    let nanos = match precision {
        TimestampPrecision::Micros if ts_frac < 1_000_000 => ts_frac * 1_000,
        TimestampPrecision::Nanos if ts_frac < 1_000_000_000 => ts_frac,
        _ => return None,
    };
    chrono::DateTime::from_timestamp(i64::from(ts_sec), nanos)
        .map(|utc| utc.with_timezone(&chrono::Local))
}
