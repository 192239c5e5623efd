/* Driver framework: the DataDriver operation contract, the RecordSink
 * drivers emit through, and the driver factory used by the public
 * registration API. */
pub mod can;
pub mod counter;
pub mod file;
pub mod gps;
pub mod iio;
pub mod nop;
pub mod obd;

use std::os::fd::OwnedFd;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;

use crate::config::InitArg;
use crate::error::{Error, Result};
use crate::record::{DataId, DataRequest, DevId, Period, Record, Timestamp};
use crate::schema::{FieldFmt, SchemaEntry};

/* Maximum device name length in bytes, including the trailing NUL a C
 * consumer would expect. */
pub const DEVICE_NAME_MAX: usize = 32;

/* How one data id is produced. Push data arrives whenever the driver's
 * descriptor signals readable; pull data is produced only in response to
 * an explicit `next`. */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedMode {
    Push,
    Pull,
}

/* One data id a driver advertises: scheduling mode, the finite set of
 * supported periods (`ON_DEMAND` appears exactly for pull data) and the
 * payload layout. */
#[derive(Debug, Clone)]
pub struct DataDesc {
    pub id: DataId,
    pub name: String,
    pub sched: SchedMode,
    pub periods: Vec<Period>,
    pub fmt: Vec<FieldFmt>,
}

/* The channel through which driver operations emit records.
 *
 * Operations that may produce data (`parse`, `next`, `start`) receive a
 * sink bound to the driver's device id; the op gate routes everything
 * pushed here to the subscribed queues after the operation returns,
 * before the next operation on the same driver can run. This is the
 * explicit capability handed to driver code in place of any implicit
 * "currently active driver" lookup. */
pub struct RecordSink {
    dev_id: DevId,
    records: Vec<Record>,
}

impl RecordSink {
    pub(crate) fn new(dev_id: DevId) -> Self {
        Self {
            dev_id,
            records: Vec::new(),
        }
    }

    /* Emit one record, stamped now. */
    pub fn push(&mut self, data_id: DataId, data: impl Into<Box<[u8]>>) {
        self.push_at(data_id, Timestamp::now(), data);
    }

    /* Emit one record with a driver-chosen timestamp. */
    pub fn push_at(&mut self, data_id: DataId, timestamp: Timestamp, data: impl Into<Box<[u8]>>) {
        self.records.push(Record {
            data_id,
            dev_id: self.dev_id,
            timestamp,
            data: data.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn take(&mut self) -> Vec<Record> {
        std::mem::take(&mut self.records)
    }
}

/* The universal driver interface.
 *
 * The core guarantees that at most one operation is in flight per driver
 * at any time, so implementations never need their own locking around
 * device state. Construction plays the role of `init` (no I/O may be
 * started there); `Drop` plays the role of `destroy`. */
#[async_trait]
pub trait DataDriver: Send {
    /* Device name for consumers and logging; at most
     * `DEVICE_NAME_MAX - 1` bytes. */
    fn device_name(&self) -> &str;

    /* Every data id this driver can produce. Cached by the registry at
     * registration time. */
    fn datadesc(&self) -> &[DataDesc];

    /* Reconcile the driver to the union of current requests. Called
     * whenever the active-data set changes while the driver is running,
     * and once right after `start`. */
    async fn setdata(&mut self, requests: &[DataRequest]) -> Result<()>;

    /* Consume some prefix of `buf`, emitting records into `sink`.
     * Returns the number of bytes consumed; the multiplexer keeps the
     * unconsumed tail and presents it again with the next read. */
    async fn parse(&mut self, buf: &[u8], sink: &mut RecordSink) -> Result<usize>;

    /* Begin producing. Returns the readable descriptor the multiplexer
     * will poll; ownership of the descriptor transfers to the core. */
    async fn start(&mut self, sink: &mut RecordSink) -> Result<OwnedFd>;

    /* Pull mode: cause one unit of `id` to become readable (or emit it
     * directly into `sink`). */
    async fn next(&mut self, id: DataId, sink: &mut RecordSink) -> Result<()> {
        let _ = (id, sink);
        Err(Error::DriverUnsupported)
    }

    /* Stop producing and release device resources. The polled
     * descriptor is closed by the core. */
    async fn stop(&mut self) -> Result<()>;
}

/* The driver kinds the public registration API knows about. */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    Can,
    Gps,
    Iio,
    Obd,
    File,
    Counter,
    Nop,
}

impl FromStr for DriverKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "can" => Ok(DriverKind::Can),
            "gps" => Ok(DriverKind::Gps),
            "iio" => Ok(DriverKind::Iio),
            "obd" => Ok(DriverKind::Obd),
            "file" => Ok(DriverKind::File),
            "counter" => Ok(DriverKind::Counter),
            "nop" => Ok(DriverKind::Nop),
            other => Err(Error::InvalidString(format!("unknown driver kind '{other}'"))),
        }
    }
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DriverKind::Can => "can",
            DriverKind::Gps => "gps",
            DriverKind::Iio => "iio",
            DriverKind::Obd => "obd",
            DriverKind::File => "file",
            DriverKind::Counter => "counter",
            DriverKind::Nop => "nop",
        };
        f.write_str(name)
    }
}

/* Instantiate a driver of the given kind. `schema` is the parsed schema
 * file for schema-driven kinds (can, iio, obd); the others carry
 * well-known formats. */
pub fn create_driver(
    kind: DriverKind,
    path: &Path,
    schema: &[SchemaEntry],
    args: &[InitArg],
) -> Result<Box<dyn DataDriver>> {
    match kind {
        DriverKind::Can => Ok(Box::new(can::CanDriver::new(path, schema)?)),
        DriverKind::Gps => Ok(Box::new(gps::GpsDriver::new(path))),
        DriverKind::Iio => Ok(Box::new(iio::IioDriver::new(path, schema)?)),
        DriverKind::Obd => Ok(Box::new(obd::ObdDriver::new(path, schema)?)),
        DriverKind::File => Ok(Box::new(file::FileDriver::new(path))),
        DriverKind::Counter => Ok(Box::new(counter::CounterDriver::new(args)?)),
        DriverKind::Nop => Ok(Box::new(nop::NopDriver::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            DriverKind::Can,
            DriverKind::Gps,
            DriverKind::Iio,
            DriverKind::Obd,
            DriverKind::File,
            DriverKind::Counter,
            DriverKind::Nop,
        ] {
            assert_eq!(kind.to_string().parse::<DriverKind>().unwrap(), kind);
        }
        assert!("hidraw".parse::<DriverKind>().is_err());
    }

    #[test]
    fn test_sink_collects_in_order() {
        let mut sink = RecordSink::new(3);
        sink.push(DataId(1), vec![1u8]);
        sink.push(DataId(2), vec![2u8]);
        let records = sink.take();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].data_id, DataId(1));
        assert_eq!(records[0].dev_id, 3);
        assert_eq!(&*records[1].data, &[2u8]);
        assert!(sink.is_empty());
    }
}
