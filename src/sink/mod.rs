//! Record sinks
//!
//! A sink receives the three record kinds produced for correlated tunnel
//! traffic. Records arrive one at a time, in decode order, and are never
//! revisited. A failed write loses that one record; the pipeline logs the
//! error and keeps going.

mod csv;

pub use self::csv::{CsvSink, LINK_HEADER, NETWORK_HEADER, TRANSPORT_HEADER};

use crate::Result;
use crate::types::{LinkRecord, NetworkRecord, TransportRecord};

/// Append-only destination for decoded records
pub trait RecordSink: Send + 'static {
    fn write_link(&mut self, record: &LinkRecord) -> Result<()>;

    fn write_network(&mut self, record: &NetworkRecord) -> Result<()>;

    fn write_transport(&mut self, record: &TransportRecord) -> Result<()>;

    /// Flush buffered output. Called once more when the pipeline shuts down.
    fn flush(&mut self) -> Result<()>;
}

impl<S: RecordSink + ?Sized> RecordSink for Box<S> {
    fn write_link(&mut self, record: &LinkRecord) -> Result<()> {
        (**self).write_link(record)
    }

    fn write_network(&mut self, record: &NetworkRecord) -> Result<()> {
        (**self).write_network(record)
    }

    fn write_transport(&mut self, record: &TransportRecord) -> Result<()> {
        (**self).write_transport(record)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}
