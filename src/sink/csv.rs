//! CSV sink writing one append-only file per layer

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::RecordSink;
use crate::config::OutputConfig;
use crate::types::ether_type::format_ether_type;
use crate::types::{LinkRecord, NetworkRecord, TransportRecord, format_timestamp};
use crate::{LinkwatchError, Result};

pub const LINK_HEADER: [&str; 5] = ["Timestamp", "SrcMAC", "DstMAC", "EtherType", "PacketLength"];

pub const NETWORK_HEADER: [&str; 6] =
    ["Timestamp", "ProtocolName", "SrcIP", "DstIP", "ProtocolID", "PacketLength"];

pub const TRANSPORT_HEADER: [&str; 7] =
    ["Timestamp", "ProtocolName", "SrcIP", "SrcPort", "DstIP", "DstPort", "PacketLength"];

/// One CSV file opened for append.
struct CsvFile {
    path: PathBuf,
    writer: ::csv::Writer<File>,
}

impl CsvFile {
    /// Open `path` for append, writing `header` only if the file is empty.
    fn open(path: PathBuf, header: &[&str]) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| LinkwatchError::file_error(path.clone(), e))?;
        let existing = file
            .metadata()
            .map_err(|e| LinkwatchError::file_error(path.clone(), e))?
            .len();

        let writer = ::csv::WriterBuilder::new().has_headers(false).from_writer(file);
        let mut csv_file = Self { path, writer };

        if existing == 0 {
            csv_file.append(header)?;
            debug!("Wrote header to {}", csv_file.path.display());
        } else {
            debug!("Appending to {} ({} bytes)", csv_file.path.display(), existing);
        }

        Ok(csv_file)
    }

    /// Write one row and flush it to the file.
    fn append<I, T>(&mut self, row: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.writer.write_record(row).map_err(|source| self.write_error(source))?;
        self.flush()
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(|e| self.write_error(e.into()))
    }

    fn write_error(&self, source: ::csv::Error) -> LinkwatchError {
        LinkwatchError::SinkWrite { path: self.path.clone(), source }
    }
}

/// Reference sink: `layer2.csv`, `layer3.csv` and `layer4.csv`.
///
/// Rows are flushed as they are written, so a crash loses at most the row in
/// flight.
pub struct CsvSink {
    link: CsvFile,
    network: CsvFile,
    transport: CsvFile,
}

impl CsvSink {
    /// Create the output directory if needed and open the three files.
    pub fn create(output: &OutputConfig) -> Result<Self> {
        std::fs::create_dir_all(&output.directory)
            .map_err(|e| LinkwatchError::file_error(output.directory.clone(), e))?;

        let sink = Self {
            link: CsvFile::open(output.link_path(), &LINK_HEADER)?,
            network: CsvFile::open(output.network_path(), &NETWORK_HEADER)?,
            transport: CsvFile::open(output.transport_path(), &TRANSPORT_HEADER)?,
        };

        info!("Writing records to {}", output.directory.display());
        Ok(sink)
    }

    /// Paths of the link, network and transport files
    pub fn paths(&self) -> [&Path; 3] {
        [&self.link.path, &self.network.path, &self.transport.path]
    }
}

impl RecordSink for CsvSink {
    fn write_link(&mut self, record: &LinkRecord) -> Result<()> {
        self.link.append([
            format_timestamp(&record.timestamp),
            record.source_mac.to_string(),
            record.dest_mac.to_string(),
            format_ether_type(record.ether_type),
            record.frame_length.to_string(),
        ])
    }

    fn write_network(&mut self, record: &NetworkRecord) -> Result<()> {
        self.network.append([
            format_timestamp(&record.timestamp),
            record.protocol.to_string(),
            record.source_addr.to_string(),
            record.dest_addr.to_string(),
            record.protocol_id.to_string(),
            record.frame_length.to_string(),
        ])
    }

    fn write_transport(&mut self, record: &TransportRecord) -> Result<()> {
        self.transport.append([
            format_timestamp(&record.timestamp),
            record.protocol.to_string(),
            record.source_addr.to_string(),
            record.source_port.to_string(),
            record.dest_addr.to_string(),
            record.dest_port.to_string(),
            record.frame_length.to_string(),
        ])
    }

    fn flush(&mut self) -> Result<()> {
        self.link.flush()?;
        self.network.flush()?;
        self.transport.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fixed_timestamp;
    use crate::types::{MacAddr, NetworkProtocol, TransportProtocol};
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    fn output(dir: &Path) -> OutputConfig {
        OutputConfig { directory: dir.join("out"), ..OutputConfig::default() }
    }

    fn link() -> LinkRecord {
        LinkRecord {
            timestamp: fixed_timestamp(),
            source_mac: MacAddr([0x02, 0x42, 0xac, 0x11, 0x00, 0x02]),
            dest_mac: MacAddr::BROADCAST,
            ether_type: 0x0800,
            frame_length: 98,
        }
    }

    #[test]
    fn writes_headers_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::create(&output(dir.path())).unwrap();
        let ts = format_timestamp(&fixed_timestamp());

        sink.write_link(&link()).unwrap();
        sink.write_network(&NetworkRecord {
            timestamp: fixed_timestamp(),
            source_addr: IpAddr::V6(Ipv6Addr::LOCALHOST),
            dest_addr: IpAddr::V6("ff02::1".parse().unwrap()),
            protocol: NetworkProtocol::Ipv6,
            protocol_id: 58,
            frame_length: 70,
        })
        .unwrap();
        sink.write_transport(&TransportRecord {
            timestamp: fixed_timestamp(),
            source_addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            dest_addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            source_port: 5353,
            dest_port: 53,
            protocol: TransportProtocol::Udp,
            frame_length: 74,
        })
        .unwrap();

        let [link_path, network_path, transport_path] = sink.paths().map(Path::to_path_buf);
        drop(sink);

        assert_eq!(
            std::fs::read_to_string(link_path).unwrap(),
            format!(
                "Timestamp,SrcMAC,DstMAC,EtherType,PacketLength\n{ts},02:42:ac:11:00:02,ff:ff:ff:ff:ff:ff,0x0800,98\n"
            )
        );
        assert_eq!(
            std::fs::read_to_string(network_path).unwrap(),
            format!(
                "Timestamp,ProtocolName,SrcIP,DstIP,ProtocolID,PacketLength\n{ts},IPv6,::1,ff02::1,58,70\n"
            )
        );
        assert_eq!(
            std::fs::read_to_string(transport_path).unwrap(),
            format!(
                "Timestamp,ProtocolName,SrcIP,SrcPort,DstIP,DstPort,PacketLength\n{ts},UDP,10.0.0.1,5353,10.0.0.2,53,74\n"
            )
        );
    }

    #[test]
    fn reopening_appends_without_second_header() {
        let dir = tempfile::tempdir().unwrap();
        let config = output(dir.path());

        for _ in 0..2 {
            let mut sink = CsvSink::create(&config).unwrap();
            sink.write_link(&link()).unwrap();
            sink.flush().unwrap();
        }

        let contents = std::fs::read_to_string(config.link_path()).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], LINK_HEADER.join(","));
        assert_eq!(contents.matches("Timestamp").count(), 1);
    }

    #[test]
    fn unwritable_directory_is_a_file_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let config = OutputConfig { directory: blocker, ..OutputConfig::default() };
        assert!(matches!(CsvSink::create(&config), Err(LinkwatchError::File { .. })));
    }
}
