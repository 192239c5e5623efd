/* Library-wide error taxonomy. */
/*                                                                 */
/* Using explicit variants instead of opaque strings lets callers  */
/* take structured recovery actions: a `PeriodUnsupported` is a    */
/* caller bug to fix, an `Io` may be retried, a `DriverFail` is    */
/* surfaced and never retried by the core.                         */

use std::path::PathBuf;

use thiserror::Error;

use crate::record::{DataId, DevId, Period};

#[derive(Debug, Error)]
pub enum Error {
    #[error("a driver is already registered at {0}")]
    AlreadyRegistered(PathBuf),

    #[error("no driver is registered at {0}")]
    NotRegistered(PathBuf),

    #[error("the driver at {0} still has active data")]
    DriverInUse(PathBuf),

    #[error("no free device ids remain")]
    MissingDeviceIds,

    #[error("data id {0} is already provided by another driver")]
    ConflictingDrivers(DataId),

    #[error("the request list is empty")]
    NoDataRequested,

    #[error("data id {0} is not provided by any registered driver")]
    DataIdDoesNotExist(DataId),

    #[error("the context is already started")]
    CtxActive,

    #[error("the context is not started")]
    CtxNotActive,

    #[error("the context has no record callback")]
    MissingCallback,

    #[error("period {period} ns is not supported for data id {id}")]
    PeriodUnsupported { id: DataId, period: Period },

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("queue capacity must be at least 1")]
    QueueTooSmall,

    #[error("invalid string: {0}")]
    InvalidString(String),

    #[error("the driver does not support this operation")]
    DriverUnsupported,

    #[error("driver failure: {0:#}")]
    DriverFail(anyhow::Error),

    #[error("invalid value: {0}")]
    InvalidVal(String),

    #[error("a blocked read was interrupted")]
    Interrupted,

    #[error("device id {0} does not exist")]
    DevDoesNotExist(DevId),

    #[error("the request list exceeds the per-context limit")]
    TooMuchDataRequested,

    #[error("the request list names a data id more than once")]
    DuplicateDataRequested,
}

impl From<nix::Error> for Error {
    fn from(errno: nix::Error) -> Self {
        Error::Io(std::io::Error::from(errno))
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::DriverFail(err)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::InvalidVal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
