/* Industrial-I/O driver: reads a kernel IIO buffer character device
 * (`/dev/iio:deviceN`) and cuts the byte stream into fixed-size scan
 * records. The schema describes the enabled scan elements; their summed
 * size is the scan stride. */

use std::fs::File;
use std::os::fd::OwnedFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nix::libc;

use crate::driver::{DataDesc, DataDriver, RecordSink, SchedMode};
use crate::error::{Error, Result};
use crate::record::{DataRequest, Period};
use crate::schema::SchemaEntry;

const IIO_PERIODS: [Period; 4] = [1_000_000, 10_000_000, 100_000_000, 1_000_000_000];

pub struct IioDriver {
    path: PathBuf,
    name: String,
    stride: usize,
    descs: Vec<DataDesc>,
}

impl IioDriver {
    /* One schema entry per device: a scan has exactly one layout. */
    pub fn new(path: &Path, schema: &[SchemaEntry]) -> Result<Self> {
        let [entry] = schema else {
            return Err(Error::InvalidVal(
                "iio driver needs exactly one schema entry describing the scan layout".to_string(),
            ));
        };
        if entry.size == 0 {
            return Err(Error::InvalidVal(
                "iio scan layout must have a fixed size".to_string(),
            ));
        }
        let descs = vec![DataDesc {
            id: entry.id,
            name: entry.name.clone(),
            sched: SchedMode::Push,
            periods: IIO_PERIODS.to_vec(),
            fmt: entry.fmt.clone(),
        }];
        Ok(Self {
            path: path.to_path_buf(),
            name: entry.name.clone(),
            stride: entry.size,
            descs,
        })
    }
}

#[async_trait]
impl DataDriver for IioDriver {
    fn device_name(&self) -> &str {
        &self.name
    }

    fn datadesc(&self) -> &[DataDesc] {
        &self.descs
    }

    async fn setdata(&mut self, _requests: &[DataRequest]) -> Result<()> {
        Ok(())
    }

    async fn parse(&mut self, buf: &[u8], sink: &mut RecordSink) -> Result<usize> {
        let whole = buf.len() - buf.len() % self.stride;
        for scan in buf[..whole].chunks_exact(self.stride) {
            sink.push(self.descs[0].id, scan.to_vec());
        }
        Ok(whole)
    }

    async fn start(&mut self, _sink: &mut RecordSink) -> Result<OwnedFd> {
        let dev = File::options()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.path)?;
        Ok(OwnedFd::from(dev))
    }

    async fn stop(&mut self) -> Result<()> {
        Ok(())
    }
}
