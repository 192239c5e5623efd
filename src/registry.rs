/* Driver registry — the table of registered drivers, the data id reverse
 * index, and the reference counting that decides when a driver starts
 * and stops producing.
 *
 * Each driver record carries two locks. `state` guards the active-data
 * bookkeeping; `ops` is the op gate: holding it is the exclusive right
 * to call into the driver, so driver implementations never see two
 * operations in flight. `state` is always taken before `ops`. */

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::driver::{DEVICE_NAME_MAX, DataDesc, DataDriver, RecordSink, SchedMode};
use crate::error::{Error, Result};
use crate::mux::Mux;
use crate::queue::RecordQueue;
use crate::record::{DataId, DataRequest, DevId, ON_DEMAND, Period};

/* Active-data bookkeeping: for each data id, one period entry per
 * requesting context. The refcount is the number of entries; the
 * effective period is their minimum (on-demand, zero, dominates). */
#[derive(Default)]
pub(crate) struct DriverState {
    active: BTreeMap<DataId, Vec<Period>>,
    started: bool,
}

impl DriverState {
    /* The reconciled request list handed to `setdata`. */
    fn request_list(&self) -> Vec<DataRequest> {
        self.active
            .iter()
            .map(|(&id, periods)| DataRequest {
                id,
                period: *periods.iter().min().expect("active entry with no periods"),
            })
            .collect()
    }

    fn remove(&mut self, id: DataId, period: Period) {
        let periods = self
            .active
            .get_mut(&id)
            .expect("unref of a data id with no references");
        let pos = periods
            .iter()
            .position(|&p| p == period)
            .expect("unref of a period that was never referenced");
        periods.remove(pos);
        if periods.is_empty() {
            self.active.remove(&id);
        }
    }
}

/* One registered driver. */
pub(crate) struct Driver {
    pub(crate) path: PathBuf,
    pub(crate) dev_id: DevId,
    pub(crate) device_name: String,
    pub(crate) descs: Vec<DataDesc>,
    pub(crate) state: Mutex<DriverState>,
    pub(crate) ops: Mutex<Box<dyn DataDriver>>,
}

impl Driver {
    /* Add one reference per request, starting the driver on the
     * empty-to-non-empty transition and reconciling it via `setdata`.
     * On failure every refcount change made here is rolled back. */
    pub(crate) async fn add_refs(
        self: &Arc<Self>,
        mux: &Mux,
        queue: &Arc<RecordQueue>,
        reqs: &[DataRequest],
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        for req in reqs {
            state.active.entry(req.id).or_default().push(req.period);
            /* Subscribe before start so records a push driver emits
             * while starting are routed, not dropped. */
            mux.subscribe(self.dev_id, req.id, queue);
        }

        match self.reconcile(&mut state, mux).await {
            Ok(()) => Ok(()),
            Err(err) => {
                for req in reqs {
                    mux.unsubscribe(self.dev_id, req.id, queue);
                    state.remove(req.id, req.period);
                }
                if state.active.is_empty() {
                    if state.started {
                        self.halt(&mut state, mux).await;
                    }
                } else if state.started {
                    /* Other requesters remain; put the driver back on
                     * their reconciled set. */
                    let requests = state.request_list();
                    if let Err(err) = self.ops.lock().await.setdata(&requests).await {
                        warn!("driver {}: setdata rollback failed: {}", self.path.display(), err);
                    }
                }
                Err(err)
            }
        }
    }

    /* Drop one reference per request, stopping the driver when its
     * active set empties. */
    pub(crate) async fn remove_refs(
        self: &Arc<Self>,
        mux: &Mux,
        queue: &Arc<RecordQueue>,
        reqs: &[DataRequest],
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        for req in reqs {
            mux.unsubscribe(self.dev_id, req.id, queue);
            state.remove(req.id, req.period);
        }
        if state.active.is_empty() {
            if state.started {
                self.halt(&mut state, mux).await;
            }
            Ok(())
        } else {
            let requests = state.request_list();
            self.ops.lock().await.setdata(&requests).await
        }
    }

    /* Issue one pull-mode `next` under the op gate, routing anything the
     * driver emits synchronously. */
    pub(crate) async fn issue_next(&self, id: DataId, mux: &Mux) -> Result<()> {
        let mut ops = self.ops.lock().await;
        let mut sink = RecordSink::new(self.dev_id);
        let result = ops.next(id, &mut sink).await;
        if !sink.is_empty() {
            mux.dispatch(sink.take());
        }
        drop(ops);
        result
    }

    /* Start if needed, then reconcile the driver to the current set. */
    async fn reconcile(self: &Arc<Self>, state: &mut DriverState, mux: &Mux) -> Result<()> {
        if !state.started && !state.active.is_empty() {
            let mut ops = self.ops.lock().await;
            let mut sink = RecordSink::new(self.dev_id);
            let fd = ops.start(&mut sink).await?;
            if !sink.is_empty() {
                mux.dispatch(sink.take());
            }
            drop(ops);
            mux.watch(self.dev_id, fd, Arc::clone(self));
            state.started = true;
            debug!("driver {} started", self.path.display());
        }
        if state.started {
            let requests = state.request_list();
            self.ops.lock().await.setdata(&requests).await?;
        }
        Ok(())
    }

    /* Stop the driver and drop its descriptor from the poll set. */
    async fn halt(&self, state: &mut DriverState, mux: &Mux) {
        let mut ops = self.ops.lock().await;
        if let Err(err) = ops.stop().await {
            warn!("driver {}: stop failed: {}", self.path.display(), err);
        }
        drop(ops);
        mux.unwatch(self.dev_id);
        state.started = false;
        debug!("driver {} stopped", self.path.display());
    }

    #[cfg(test)]
    pub(crate) async fn active_snapshot(&self) -> Vec<(DataId, usize, Period)> {
        let state = self.state.lock().await;
        state
            .active
            .iter()
            .map(|(&id, periods)| {
                (
                    id,
                    periods.len(),
                    *periods.iter().min().expect("active entry with no periods"),
                )
            })
            .collect()
    }

    #[cfg(test)]
    pub(crate) async fn is_started(&self) -> bool {
        self.state.lock().await.started
    }
}

/* One advertised data id, annotated with its device, as reported by the
 * datadesc snapshot. */
#[derive(Debug, Clone)]
pub struct DeviceData {
    pub dev_id: DevId,
    pub device_name: String,
    pub desc: DataDesc,
}

struct RegistryInner {
    drivers: HashMap<PathBuf, Arc<Driver>>,
    by_data: HashMap<DataId, Arc<Driver>>,
}

pub(crate) struct Registry {
    inner: Mutex<RegistryInner>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                drivers: HashMap::new(),
                by_data: HashMap::new(),
            }),
        }
    }

    /* Register a driver instance under `path`. Every check runs before
     * any table is touched, so a failed registration leaves the registry
     * exactly as it was. */
    pub(crate) async fn register(&self, path: &Path, ops: Box<dyn DataDriver>) -> Result<DevId> {
        let mut inner = self.inner.lock().await;
        if inner.drivers.contains_key(path) {
            return Err(Error::AlreadyRegistered(path.to_path_buf()));
        }

        let device_name = ops.device_name().to_string();
        if device_name.is_empty() || device_name.len() >= DEVICE_NAME_MAX {
            return Err(Error::InvalidString(device_name));
        }

        let descs = ops.datadesc().to_vec();
        if descs.is_empty() {
            return Err(Error::InvalidVal(format!(
                "driver at {} advertises no data",
                path.display()
            )));
        }
        let mut seen = HashSet::new();
        for desc in &descs {
            if !seen.insert(desc.id) {
                return Err(Error::InvalidVal(format!(
                    "driver at {} advertises data id {} twice",
                    path.display(),
                    desc.id
                )));
            }
            if desc.periods.is_empty() {
                return Err(Error::InvalidVal(format!(
                    "data id {} supports no periods",
                    desc.id
                )));
            }
            let has_on_demand = desc.periods.contains(&ON_DEMAND);
            let coherent = match desc.sched {
                SchedMode::Pull => has_on_demand,
                SchedMode::Push => !has_on_demand,
            };
            if !coherent {
                return Err(Error::InvalidVal(format!(
                    "data id {}: period set does not match its scheduling mode",
                    desc.id
                )));
            }
            /* One producer per data id, system-wide. */
            if inner.by_data.contains_key(&desc.id) {
                return Err(Error::ConflictingDrivers(desc.id));
            }
        }

        let dev_id = alloc_dev_id(&inner.drivers)?;
        let driver = Arc::new(Driver {
            path: path.to_path_buf(),
            dev_id,
            device_name,
            descs,
            state: Mutex::new(DriverState::default()),
            ops: Mutex::new(ops),
        });
        for desc in &driver.descs {
            inner.by_data.insert(desc.id, Arc::clone(&driver));
        }
        inner.drivers.insert(path.to_path_buf(), driver);
        info!("registered driver at {} as dev {}", path.display(), dev_id);
        Ok(dev_id)
    }

    /* Unregister the driver at `path`. Refused while any context still
     * references its data. */
    pub(crate) async fn unregister(&self, path: &Path) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let driver = inner
            .drivers
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotRegistered(path.to_path_buf()))?;
        if !driver.state.lock().await.active.is_empty() {
            return Err(Error::DriverInUse(path.to_path_buf()));
        }
        for desc in &driver.descs {
            inner.by_data.remove(&desc.id);
        }
        inner.drivers.remove(path);
        info!("unregistered driver at {}", path.display());
        Ok(())
    }

    pub(crate) async fn driver_for(&self, id: DataId) -> Result<Arc<Driver>> {
        self.inner
            .lock()
            .await
            .by_data
            .get(&id)
            .cloned()
            .ok_or(Error::DataIdDoesNotExist(id))
    }

    pub(crate) async fn device_name(&self, dev_id: DevId) -> Result<String> {
        self.inner
            .lock()
            .await
            .drivers
            .values()
            .find(|d| d.dev_id == dev_id)
            .map(|d| d.device_name.clone())
            .ok_or(Error::DevDoesNotExist(dev_id))
    }

    /* Snapshot of everything currently advertised, ordered by device id
     * then data id. */
    pub(crate) async fn snapshot(&self) -> Vec<DeviceData> {
        let inner = self.inner.lock().await;
        let mut out: Vec<DeviceData> = inner
            .drivers
            .values()
            .flat_map(|driver| {
                driver.descs.iter().map(|desc| DeviceData {
                    dev_id: driver.dev_id,
                    device_name: driver.device_name.clone(),
                    desc: desc.clone(),
                })
            })
            .collect();
        out.sort_by_key(|d| (d.dev_id, d.desc.id));
        out
    }
}

/* Smallest device id no registered driver holds. Ids free up only when
 * their driver is unregistered. */
fn alloc_dev_id(drivers: &HashMap<PathBuf, Arc<Driver>>) -> Result<DevId> {
    let used: HashSet<DevId> = drivers.values().map(|d| d.dev_id).collect();
    (0..=DevId::MAX)
        .find(|id| !used.contains(id))
        .ok_or(Error::MissingDeviceIds)
}
