/* File driver: streams a regular file's bytes as records.
 *
 * Regular files cannot be watched by the readiness reactor, so `start`
 * spawns a feeder thread that copies the file into a pipe and hands the
 * pipe's read end to the multiplexer. The feeder closing its end signals
 * end-of-stream. `parse` forwards each chunk as one record, so the
 * concatenation of all record payloads reproduces the file exactly. */

use std::fs::File;
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nix::unistd;
use tracing::{debug, warn};

use crate::driver::{DataDesc, DataDriver, RecordSink, SchedMode};
use crate::error::Result;
use crate::record::{DataId, DataRequest, Period};
use crate::schema::{FieldFmt, FmtType, Unit};

/* Nominal delivery period; the stream actually runs as fast as the
 * consumer drains it. */
const FILE_PERIOD: Period = 1_000_000;

pub struct FileDriver {
    path: PathBuf,
    descs: Vec<DataDesc>,
}

impl FileDriver {
    pub fn new(path: &Path) -> Self {
        let descs = vec![DataDesc {
            id: DataId::FILE,
            name: "file".to_string(),
            sched: SchedMode::Push,
            periods: vec![FILE_PERIOD],
            fmt: vec![FieldFmt {
                name: "data".to_string(),
                unit: Unit::None,
                ty: FmtType::Bytes,
                offset: 0,
                size: 0,
            }],
        }];
        Self {
            path: path.to_path_buf(),
            descs,
        }
    }
}

#[async_trait]
impl DataDriver for FileDriver {
    fn device_name(&self) -> &str {
        "file"
    }

    fn datadesc(&self) -> &[DataDesc] {
        &self.descs
    }

    async fn setdata(&mut self, _requests: &[DataRequest]) -> Result<()> {
        Ok(())
    }

    async fn parse(&mut self, buf: &[u8], sink: &mut RecordSink) -> Result<usize> {
        sink.push(DataId::FILE, buf.to_vec());
        Ok(buf.len())
    }

    async fn start(&mut self, _sink: &mut RecordSink) -> Result<OwnedFd> {
        let mut src = File::open(&self.path)?;
        let (rd, wr) = unistd::pipe()?;
        let path = self.path.clone();

        /* The thread ends when the file is exhausted (EOF reaches the
         * read end) or when the core closes the read end and the write
         * fails with EPIPE. */
        std::thread::spawn(move || {
            let mut dst = File::from(wr);
            match std::io::copy(&mut src, &mut dst) {
                Ok(n) => debug!("file driver streamed {} bytes from {}", n, path.display()),
                Err(err) => warn!("file driver feeder for {}: {}", path.display(), err),
            }
        });

        Ok(rd)
    }

    async fn stop(&mut self) -> Result<()> {
        /* Nothing held here; the feeder exits on its own once the read
         * end goes away. */
        Ok(())
    }
}
