/* Raw SocketCAN driver.
 *
 * The schema maps CAN arbitration ids to data ids one-to-one: a schema
 * entry with id 0x123 describes the payload of frames with arbitration
 * id 0x123. `setdata` reconciles the kernel-side receive filter to the
 * currently active set, so unwanted traffic never crosses the socket. */

use std::ffi::CString;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;

use async_trait::async_trait;
use nix::libc;
use tracing::debug;

use crate::driver::{DataDesc, DataDriver, RecordSink, SchedMode};
use crate::error::{Error, Result};
use crate::record::{DataId, DataRequest, Period};
use crate::schema::SchemaEntry;

/* One classic CAN frame on the wire: id, length, padding, 8 data bytes. */
const FRAME_SIZE: usize = std::mem::size_of::<libc::can_frame>();
const FRAME_DATA_OFF: usize = 8;

/* Supported sampling periods for every CAN data id. The bus delivers
 * frames at its own pace; the period is the consumer's downsampling
 * hint. */
const CAN_PERIODS: [Period; 3] = [10_000_000, 100_000_000, 1_000_000_000];

pub struct CanDriver {
    iface: String,
    socket: Option<OwnedFd>,
    active: Vec<u32>,
    descs: Vec<DataDesc>,
}

impl CanDriver {
    pub fn new(path: &Path, schema: &[SchemaEntry]) -> Result<Self> {
        let iface = path
            .to_str()
            .ok_or_else(|| Error::InvalidString(format!("{}", path.display())))?
            .to_string();
        if schema.is_empty() {
            return Err(Error::InvalidVal(
                "can driver needs a schema mapping arbitration ids".to_string(),
            ));
        }
        let descs = schema
            .iter()
            .map(|entry| DataDesc {
                id: entry.id,
                name: entry.name.clone(),
                sched: SchedMode::Push,
                periods: CAN_PERIODS.to_vec(),
                fmt: entry.fmt.clone(),
            })
            .collect();
        Ok(Self {
            iface,
            socket: None,
            active: Vec::new(),
            descs,
        })
    }

    fn knows(&self, id: DataId) -> bool {
        self.descs.iter().any(|d| d.id == id)
    }
}

#[async_trait]
impl DataDriver for CanDriver {
    fn device_name(&self) -> &str {
        &self.iface
    }

    fn datadesc(&self) -> &[DataDesc] {
        &self.descs
    }

    async fn setdata(&mut self, requests: &[DataRequest]) -> Result<()> {
        self.active = requests.iter().map(|r| r.id.0).collect();
        if let Some(socket) = &self.socket {
            apply_filters(socket.as_raw_fd(), &self.active)?;
        }
        Ok(())
    }

    async fn parse(&mut self, buf: &[u8], sink: &mut RecordSink) -> Result<usize> {
        let mut consumed = 0;
        while buf.len() - consumed >= FRAME_SIZE {
            let frame = &buf[consumed..consumed + FRAME_SIZE];
            consumed += FRAME_SIZE;

            let raw_id = u32::from_ne_bytes(frame[..4].try_into().unwrap());
            if raw_id & (libc::CAN_RTR_FLAG | libc::CAN_ERR_FLAG) != 0 {
                continue;
            }
            let arb_id = if raw_id & libc::CAN_EFF_FLAG != 0 {
                raw_id & libc::CAN_EFF_MASK
            } else {
                raw_id & libc::CAN_SFF_MASK
            };
            let data_id = DataId(arb_id);
            if !self.knows(data_id) {
                debug!("dropping frame with unmapped arbitration id {:#x}", arb_id);
                continue;
            }
            let len = (frame[4] as usize).min(FRAME_SIZE - FRAME_DATA_OFF);
            sink.push(data_id, frame[FRAME_DATA_OFF..FRAME_DATA_OFF + len].to_vec());
        }
        Ok(consumed)
    }

    async fn start(&mut self, _sink: &mut RecordSink) -> Result<OwnedFd> {
        let socket = open_raw_socket(&self.iface)?;
        apply_filters(socket.as_raw_fd(), &self.active)?;
        /* The multiplexer polls its own descriptor; the driver keeps this
         * one so setdata can keep adjusting the kernel filter. */
        let polled = socket.try_clone()?;
        self.socket = Some(socket);
        Ok(polled)
    }

    async fn stop(&mut self) -> Result<()> {
        self.socket = None;
        Ok(())
    }
}

/* Open a raw CAN socket bound to `iface`. */
pub(crate) fn open_raw_socket(iface: &str) -> Result<OwnedFd> {
    /* SAFETY: plain socket(2) call; the return value is checked before
     * being wrapped, and the wrap takes sole ownership of the fd. */
    let fd = unsafe { libc::socket(libc::PF_CAN, libc::SOCK_RAW | libc::SOCK_CLOEXEC, libc::CAN_RAW) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    let socket = unsafe { OwnedFd::from_raw_fd(fd) };

    let name = CString::new(iface).map_err(|_| Error::InvalidString(iface.to_string()))?;
    /* SAFETY: `name` is a valid NUL-terminated string for the duration
     * of the call. */
    let ifindex = unsafe { libc::if_nametoindex(name.as_ptr()) };
    if ifindex == 0 {
        return Err(std::io::Error::last_os_error().into());
    }

    let mut addr: libc::sockaddr_can = unsafe { std::mem::zeroed() };
    addr.can_family = libc::AF_CAN as libc::sa_family_t;
    addr.can_ifindex = ifindex as libc::c_int;
    /* SAFETY: `addr` is a properly initialized sockaddr_can and the
     * length matches its size. */
    let rc = unsafe {
        libc::bind(
            socket.as_raw_fd(),
            std::ptr::from_ref(&addr).cast::<libc::sockaddr>(),
            std::mem::size_of::<libc::sockaddr_can>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(socket)
}

/* Install a receive filter for exactly `ids`. An empty set installs a
 * zero-length filter list, which receives nothing. */
pub(crate) fn apply_filters(fd: RawFd, ids: &[u32]) -> Result<()> {
    let filters: Vec<libc::can_filter> = ids
        .iter()
        .map(|&id| libc::can_filter {
            can_id: id,
            can_mask: if id > libc::CAN_SFF_MASK {
                libc::CAN_EFF_MASK | libc::CAN_EFF_FLAG
            } else {
                libc::CAN_SFF_MASK
            },
        })
        .collect();
    /* SAFETY: the pointer and length describe the live `filters` vector;
     * the kernel copies the array before setsockopt returns. */
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_CAN_RAW,
            libc::CAN_RAW_FILTER,
            filters.as_ptr().cast::<libc::c_void>(),
            std::mem::size_of_val(filters.as_slice()) as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

/* Serialize one classic CAN frame the way the kernel lays it out. */
pub(crate) fn encode_frame(arb_id: u32, data: &[u8]) -> [u8; FRAME_SIZE] {
    let mut frame = [0u8; FRAME_SIZE];
    frame[..4].copy_from_slice(&arb_id.to_ne_bytes());
    let len = data.len().min(FRAME_SIZE - FRAME_DATA_OFF);
    frame[4] = len as u8;
    frame[FRAME_DATA_OFF..FRAME_DATA_OFF + len].copy_from_slice(&data[..len]);
    frame
}
