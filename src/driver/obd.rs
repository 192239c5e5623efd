/* OBD-II driver: mode-01 PID polling over raw SocketCAN.
 *
 * Pull-mode: `next` broadcasts a single-frame service-01 request to the
 * functional address 0x7DF; the ECU answers on one of the physical
 * response ids (0x7E8..0x7EF), and `parse` turns each response into a
 * record. The schema assigns one data id per PID; the PID is the low
 * byte of the data id. */

use std::os::fd::{AsRawFd, OwnedFd};
use std::path::Path;

use anyhow::anyhow;
use async_trait::async_trait;
use nix::libc;
use nix::unistd;
use tracing::debug;

use crate::driver::can::{apply_filters, encode_frame, open_raw_socket};
use crate::driver::{DataDesc, DataDriver, RecordSink, SchedMode};
use crate::error::{Error, Result};
use crate::record::{DataId, DataRequest, ON_DEMAND};
use crate::schema::SchemaEntry;

const FRAME_SIZE: usize = std::mem::size_of::<libc::can_frame>();
const FRAME_DATA_OFF: usize = 8;

/* Functional broadcast address for service requests. */
const OBD_REQUEST_ID: u32 = 0x7DF;
/* Physical ECU response id range. */
const OBD_RESPONSE_BASE: u32 = 0x7E8;
const OBD_RESPONSE_COUNT: u32 = 8;

const SERVICE_SHOW_CURRENT: u8 = 0x01;
const SERVICE_RESPONSE_OFFSET: u8 = 0x40;

pub struct ObdDriver {
    iface: String,
    socket: Option<OwnedFd>,
    descs: Vec<DataDesc>,
}

impl ObdDriver {
    pub fn new(path: &Path, schema: &[SchemaEntry]) -> Result<Self> {
        let iface = path
            .to_str()
            .ok_or_else(|| Error::InvalidString(format!("{}", path.display())))?
            .to_string();
        if schema.is_empty() {
            return Err(Error::InvalidVal(
                "obd driver needs a schema assigning data ids to PIDs".to_string(),
            ));
        }
        let descs = schema
            .iter()
            .map(|entry| DataDesc {
                id: entry.id,
                name: entry.name.clone(),
                sched: SchedMode::Pull,
                periods: vec![ON_DEMAND],
                fmt: entry.fmt.clone(),
            })
            .collect();
        Ok(Self {
            iface,
            socket: None,
            descs,
        })
    }

    fn pid_of(&self, id: DataId) -> Option<u8> {
        self.descs
            .iter()
            .find(|d| d.id == id)
            .map(|d| (d.id.0 & 0xff) as u8)
    }

    fn id_for_pid(&self, pid: u8) -> Option<DataId> {
        self.descs
            .iter()
            .map(|d| d.id)
            .find(|id| (id.0 & 0xff) as u8 == pid)
    }
}

#[async_trait]
impl DataDriver for ObdDriver {
    fn device_name(&self) -> &str {
        &self.iface
    }

    fn datadesc(&self) -> &[DataDesc] {
        &self.descs
    }

    async fn setdata(&mut self, _requests: &[DataRequest]) -> Result<()> {
        Ok(())
    }

    async fn parse(&mut self, buf: &[u8], sink: &mut RecordSink) -> Result<usize> {
        let mut consumed = 0;
        while buf.len() - consumed >= FRAME_SIZE {
            let frame = &buf[consumed..consumed + FRAME_SIZE];
            consumed += FRAME_SIZE;

            let raw_id = u32::from_ne_bytes(frame[..4].try_into().unwrap());
            let arb_id = raw_id & libc::CAN_SFF_MASK;
            if !(OBD_RESPONSE_BASE..OBD_RESPONSE_BASE + OBD_RESPONSE_COUNT).contains(&arb_id) {
                continue;
            }

            /* ISO-TP single frame: [len, service|0x40, pid, A, B, C, D]. */
            let data = &frame[FRAME_DATA_OFF..];
            let len = (frame[4] as usize).min(FRAME_SIZE - FRAME_DATA_OFF);
            if len < 3 || data[1] != (SERVICE_SHOW_CURRENT | SERVICE_RESPONSE_OFFSET) {
                continue;
            }
            let pid = data[2];
            let Some(data_id) = self.id_for_pid(pid) else {
                debug!("response for unrequested PID {pid:#04x}");
                continue;
            };
            let payload_len = (data[0] as usize).saturating_sub(2).min(len - 3);
            sink.push(data_id, data[3..3 + payload_len].to_vec());
        }
        Ok(consumed)
    }

    async fn start(&mut self, _sink: &mut RecordSink) -> Result<OwnedFd> {
        let socket = open_raw_socket(&self.iface)?;
        let responses: Vec<u32> =
            (OBD_RESPONSE_BASE..OBD_RESPONSE_BASE + OBD_RESPONSE_COUNT).collect();
        apply_filters(socket.as_raw_fd(), &responses)?;
        let polled = socket.try_clone()?;
        self.socket = Some(socket);
        Ok(polled)
    }

    async fn next(&mut self, id: DataId, _sink: &mut RecordSink) -> Result<()> {
        let pid = self.pid_of(id).ok_or(Error::DataIdDoesNotExist(id))?;
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| Error::DriverFail(anyhow!("obd driver is not started")))?;
        let frame = encode_frame(OBD_REQUEST_ID, &[0x02, SERVICE_SHOW_CURRENT, pid, 0, 0, 0, 0, 0]);
        unistd::write(socket, &frame)?;
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.socket = None;
        Ok(())
    }
}
