/* Core data model: data/device identifiers, sampling periods, timestamps
 * and the record type every driver emits and every consumer receives. */

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/* Opaque 32-bit identifier for one kind of data (a GPS fix, one CAN
 * arbitration id, ...). Unique across the whole system: at most one
 * registered driver may provide a given data id. */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataId(pub u32);

impl DataId {
    /* Well-known ids for the built-in drivers. User schemas assign their
     * own ids outside this reserved range. */
    pub const COUNTER: DataId = DataId(0x8000_0001);
    pub const NOP1: DataId = DataId(0x8000_0002);
    pub const NOP2: DataId = DataId(0x8000_0003);
    pub const FILE: DataId = DataId(0x8000_0004);
    pub const GPS_FIX: DataId = DataId(0x8000_0010);
}

impl fmt::Display for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/* Device id assigned by the registry at driver registration; stable for
 * the lifetime of that registration. */
pub type DevId = u8;

/* Sampling period in nanoseconds. `ON_DEMAND` (zero) marks pull data
 * that is produced only in response to an explicit `next`. */
pub type Period = u64;

pub const ON_DEMAND: Period = 0;

/* One entry of a consumer's request list: which data, at which period. */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRequest {
    pub id: DataId,
    pub period: Period,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    pub sec: i64,
    pub nsec: i64,
}

impl Timestamp {
    pub fn now() -> Self {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            sec: elapsed.as_secs() as i64,
            nsec: i64::from(elapsed.subsec_nanos()),
        }
    }
}

/* One sensor reading. The payload layout is described by the owning
 * driver's format list; records are shared across consumer queues as
 * `Arc<Record>`, so the payload is immutable once emitted. */
#[derive(Debug, Clone)]
pub struct Record {
    pub data_id: DataId,
    pub dev_id: DevId,
    pub timestamp: Timestamp,
    pub data: Box<[u8]>,
}

impl Record {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}
