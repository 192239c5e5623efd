/* No-op driver: advertises two pull data ids and never produces a byte.
 * The polled descriptor is the read end of a pipe whose write end is
 * held open and never written, so the multiplexer never sees it
 * readable. Exists to exercise the registration and context lifecycle. */

use std::os::fd::OwnedFd;

use async_trait::async_trait;
use nix::unistd;
use tracing::warn;

use crate::driver::{DataDesc, DataDriver, RecordSink, SchedMode};
use crate::error::Result;
use crate::record::{DataId, DataRequest, ON_DEMAND};

pub struct NopDriver {
    pipe_wr: Option<OwnedFd>,
    descs: Vec<DataDesc>,
}

impl NopDriver {
    pub fn new() -> Self {
        let descs = [(DataId::NOP1, "nop1"), (DataId::NOP2, "nop2")]
            .into_iter()
            .map(|(id, name)| DataDesc {
                id,
                name: name.to_string(),
                sched: SchedMode::Pull,
                periods: vec![ON_DEMAND],
                fmt: Vec::new(),
            })
            .collect();
        Self {
            pipe_wr: None,
            descs,
        }
    }
}

impl Default for NopDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataDriver for NopDriver {
    fn device_name(&self) -> &str {
        "nop"
    }

    fn datadesc(&self) -> &[DataDesc] {
        &self.descs
    }

    async fn setdata(&mut self, _requests: &[DataRequest]) -> Result<()> {
        Ok(())
    }

    async fn parse(&mut self, buf: &[u8], _sink: &mut RecordSink) -> Result<usize> {
        /* Nothing ever writes to the pipe. */
        warn!("nop driver asked to parse {} bytes", buf.len());
        Ok(buf.len())
    }

    async fn start(&mut self, _sink: &mut RecordSink) -> Result<OwnedFd> {
        let (rd, wr) = unistd::pipe()?;
        self.pipe_wr = Some(wr);
        Ok(rd)
    }

    async fn next(&mut self, _id: DataId, _sink: &mut RecordSink) -> Result<()> {
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.pipe_wr = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lifecycle() {
        let mut drv = NopDriver::new();
        assert_eq!(drv.datadesc().len(), 2);
        let mut sink = RecordSink::new(0);
        let _rd = drv.start(&mut sink).await.unwrap();
        drv.next(DataId::NOP1, &mut sink).await.unwrap();
        assert!(sink.is_empty());
        drv.stop().await.unwrap();
    }
}
