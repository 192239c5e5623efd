/* Counter driver: a pull-mode test driver backed by a self-pipe.
 *
 * Each `next` writes the current count to the pipe's write end; the
 * multiplexer sees the read end become readable and hands the bytes back
 * to `parse`, which cuts them into one record per value. The data path
 * is therefore identical to a real device's, minus the hardware. */

use std::os::fd::OwnedFd;

use anyhow::anyhow;
use async_trait::async_trait;
use nix::unistd;

use crate::config::InitArg;
use crate::driver::{DataDesc, DataDriver, RecordSink, SchedMode};
use crate::error::{Error, Result};
use crate::record::{DataId, DataRequest, ON_DEMAND};
use crate::schema::{FieldFmt, FmtType, Unit};

const COUNT_SIZE: usize = 8;

pub struct CounterDriver {
    count: u64,
    pipe_wr: Option<OwnedFd>,
    descs: Vec<DataDesc>,
}

impl CounterDriver {
    /* Optional first argument: the starting count. */
    pub fn new(args: &[InitArg]) -> Result<Self> {
        let count = match args.first() {
            Some(arg) => arg.as_u64()?,
            None => 0,
        };
        let descs = vec![DataDesc {
            id: DataId::COUNTER,
            name: "counter".to_string(),
            sched: SchedMode::Pull,
            periods: vec![ON_DEMAND],
            fmt: vec![FieldFmt {
                name: "count".to_string(),
                unit: Unit::None,
                ty: FmtType::Uint64,
                offset: 0,
                size: COUNT_SIZE,
            }],
        }];
        Ok(Self {
            count,
            pipe_wr: None,
            descs,
        })
    }
}

#[async_trait]
impl DataDriver for CounterDriver {
    fn device_name(&self) -> &str {
        "counter"
    }

    fn datadesc(&self) -> &[DataDesc] {
        &self.descs
    }

    async fn setdata(&mut self, _requests: &[DataRequest]) -> Result<()> {
        Ok(())
    }

    async fn parse(&mut self, buf: &[u8], sink: &mut RecordSink) -> Result<usize> {
        let whole = buf.len() - buf.len() % COUNT_SIZE;
        for value in buf[..whole].chunks_exact(COUNT_SIZE) {
            sink.push(DataId::COUNTER, value.to_vec());
        }
        Ok(whole)
    }

    async fn start(&mut self, _sink: &mut RecordSink) -> Result<OwnedFd> {
        let (rd, wr) = unistd::pipe()?;
        self.pipe_wr = Some(wr);
        Ok(rd)
    }

    async fn next(&mut self, id: DataId, _sink: &mut RecordSink) -> Result<()> {
        if id != DataId::COUNTER {
            return Err(Error::DataIdDoesNotExist(id));
        }
        let wr = self
            .pipe_wr
            .as_ref()
            .ok_or_else(|| Error::DriverFail(anyhow!("counter driver is not started")))?;
        unistd::write(wr, &self.count.to_le_bytes())?;
        self.count += 1;
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.pipe_wr = None;
        Ok(())
    }
}
