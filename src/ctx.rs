/* Consumer contexts — the per-consumer lifecycle around one queue, one
 * request list and one callback.
 *
 * State machine: idle → active → idle (stop), any number of times. Each
 * `start` resets the sequence numbers, references every owning driver,
 * and subscribes the context's queue; `stop` interrupts the queue first
 * so a blocked `read` observes `Interrupted` instead of hanging, then
 * releases the driver references and drains what was left behind. */

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use crate::Hound;
use crate::error::{Error, Result};
use crate::queue::{QueuedRecord, RecordQueue};
use crate::record::{DataId, DataRequest, ON_DEMAND, Record};
use crate::registry::Driver;

/* Upper bound on the request list length of one context. */
pub const MAX_DATA_REQ: usize = 1000;

/* Invoked once per delivered record, outside any queue lock. The second
 * argument is the record's per-context sequence number. */
pub type RecordCallback = Box<dyn Fn(&Record, u64) + Send + Sync>;

/* Everything needed to allocate a context. */
pub struct ContextRequest {
    pub queue_len: usize,
    pub callback: Option<RecordCallback>,
    pub requests: Vec<DataRequest>,
}

enum CtxState {
    Idle,
    Active(Vec<(Arc<Driver>, Vec<DataRequest>)>),
}

pub struct Context {
    hound: Hound,
    requests: Vec<DataRequest>,
    pull_ids: Vec<DataId>,
    callback: RecordCallback,
    queue: Arc<RecordQueue>,
    state: Mutex<CtxState>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("requests", &self.requests)
            .field("pull_ids", &self.pull_ids)
            .finish_non_exhaustive()
    }
}

impl Context {
    /* Validate a request and build the context. Nothing is referenced
     * yet; that happens at `start`. */
    pub(crate) async fn new(hound: Hound, request: ContextRequest) -> Result<Self> {
        if request.queue_len == 0 {
            return Err(Error::QueueTooSmall);
        }
        if request.requests.is_empty() {
            return Err(Error::NoDataRequested);
        }
        if request.requests.len() > MAX_DATA_REQ {
            return Err(Error::TooMuchDataRequested);
        }
        let mut seen = std::collections::HashSet::new();
        for req in &request.requests {
            if !seen.insert(req.id) {
                return Err(Error::DuplicateDataRequested);
            }
        }
        let callback = request.callback.ok_or(Error::MissingCallback)?;

        /* Every id must have an owner and every period must be in that
         * owner's supported set. */
        for req in &request.requests {
            let driver = hound.registry().driver_for(req.id).await?;
            let desc = driver
                .descs
                .iter()
                .find(|d| d.id == req.id)
                .expect("reverse index points at a driver without the data id");
            if !desc.periods.contains(&req.period) {
                return Err(Error::PeriodUnsupported {
                    id: req.id,
                    period: req.period,
                });
            }
        }

        let pull_ids = request
            .requests
            .iter()
            .filter(|r| r.period == ON_DEMAND)
            .map(|r| r.id)
            .collect();
        let queue = Arc::new(RecordQueue::new(request.queue_len));

        Ok(Self {
            hound,
            requests: request.requests,
            pull_ids,
            callback,
            queue,
            state: Mutex::new(CtxState::Idle),
        })
    }

    /* Reference every owning driver and begin receiving. A failure on
     * any driver rolls back the references taken so far. */
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if matches!(*state, CtxState::Active(_)) {
            return Err(Error::CtxActive);
        }

        self.queue.clear_interrupt();
        self.queue.reset_seqno();

        /* Group the request list per owning driver; ids may have moved
         * since allocation, so resolve them afresh. */
        let mut groups: Vec<(Arc<Driver>, Vec<DataRequest>)> = Vec::new();
        for req in &self.requests {
            let driver = self.hound.registry().driver_for(req.id).await?;
            match groups.iter().position(|(d, _)| d.dev_id == driver.dev_id) {
                Some(pos) => groups[pos].1.push(*req),
                None => groups.push((driver, vec![*req])),
            }
        }

        for idx in 0..groups.len() {
            let (driver, reqs) = &groups[idx];
            if let Err(err) = driver
                .add_refs(self.hound.mux(), &self.queue, reqs)
                .await
            {
                for (done, done_reqs) in &groups[..idx] {
                    if let Err(undo) = done
                        .remove_refs(self.hound.mux(), &self.queue, done_reqs)
                        .await
                    {
                        warn!(
                            "rollback unref failed for driver {}: {}",
                            done.path.display(),
                            undo
                        );
                    }
                }
                return Err(err);
            }
        }

        *state = CtxState::Active(groups);
        Ok(())
    }

    /* Interrupt, release driver references, drain the queue. */
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let CtxState::Active(groups) = std::mem::replace(&mut *state, CtxState::Idle) else {
            return Err(Error::CtxNotActive);
        };

        self.queue.interrupt();
        for (driver, reqs) in &groups {
            if let Err(err) = driver
                .remove_refs(self.hound.mux(), &self.queue, reqs)
                .await
            {
                warn!("unref failed for driver {}: {}", driver.path.display(), err);
            }
        }
        self.queue.drain();
        Ok(())
    }

    /* Deliver exactly `n` records, blocking as needed. Each blocking
     * round first nudges every pull-mode data id with one `next`, so a
     * plain `read` on an all-pull context makes progress on its own;
     * `next` failures are logged and the already-available data still
     * drains. A concurrent `stop` surfaces as `Error::Interrupted`. */
    pub async fn read(&self, n: usize) -> Result<usize> {
        self.ensure_active().await?;
        let mut delivered = 0;
        while delivered < n {
            self.kick_pull().await;
            let batch = self.queue.pop(n - delivered).await?;
            delivered += self.deliver(&batch);
        }
        Ok(delivered)
    }

    /* Deliver whatever is already queued, up to `n`. */
    pub async fn read_nowait(&self, n: usize) -> Result<usize> {
        self.ensure_active().await?;
        let batch = self.queue.pop_nowait(n);
        Ok(self.deliver(&batch))
    }

    /* Deliver everything currently queued. */
    pub async fn read_all_nowait(&self) -> Result<usize> {
        self.read_nowait(usize::MAX).await
    }

    /* Deliver whole records within a byte budget; returns (records,
     * bytes). A head record larger than the whole budget yields (0, 0)
     * and stays queued. */
    pub async fn read_bytes_nowait(&self, max_bytes: usize) -> Result<(usize, usize)> {
        self.ensure_active().await?;
        let (batch, bytes) = self.queue.pop_bytes_nowait(max_bytes);
        Ok((self.deliver(&batch), bytes))
    }

    /* Issue `n` `next` calls for every pull-mode data id in the request
     * list. The records land in the queue asynchronously; pick them up
     * with `read` or `read_nowait`. */
    pub async fn next(&self, n: usize) -> Result<()> {
        self.ensure_active().await?;
        for id in &self.pull_ids {
            let driver = self.hound.registry().driver_for(*id).await?;
            for _ in 0..n {
                driver.issue_next(*id, self.hound.mux()).await?;
            }
        }
        Ok(())
    }

    pub async fn queue_length(&self) -> usize {
        self.queue.len()
    }

    pub async fn max_queue_length(&self) -> usize {
        self.queue.capacity()
    }

    /* Replace the queue's backing store with a new capacity. `flush`
     * additionally drops everything outstanding; without it only the
     * oldest records are dropped, and only until the remainder fits.
     * Valid in any context state. */
    pub async fn resize_queue(&self, queue_len: usize, flush: bool) -> Result<()> {
        if queue_len == 0 {
            return Err(Error::QueueTooSmall);
        }
        self.queue.resize(queue_len, flush);
        Ok(())
    }

    async fn ensure_active(&self) -> Result<()> {
        match *self.state.lock().await {
            CtxState::Active(_) => Ok(()),
            CtxState::Idle => Err(Error::CtxNotActive),
        }
    }

    /* One best-effort `next` per pull-mode id. */
    async fn kick_pull(&self) {
        for id in &self.pull_ids {
            match self.hound.registry().driver_for(*id).await {
                Ok(driver) => {
                    if let Err(err) = driver.issue_next(*id, self.hound.mux()).await {
                        warn!("next failed for data id {}: {}", id, err);
                    }
                }
                Err(err) => warn!("pull data id {} vanished: {}", id, err),
            }
        }
    }

    fn deliver(&self, batch: &[QueuedRecord]) -> usize {
        for slot in batch {
            (self.callback)(&slot.record, slot.seqno);
        }
        batch.len()
    }
}

impl Drop for Context {
    /* Best-effort cleanup for a context dropped while active. The
     * driver unrefs are async, so they are handed to the runtime; a
     * context dropped outside a runtime leaks its references. */
    fn drop(&mut self) {
        let Ok(mut state) = self.state.try_lock() else {
            return;
        };
        let CtxState::Active(groups) = std::mem::replace(&mut *state, CtxState::Idle) else {
            return;
        };
        self.queue.interrupt();
        let mux = self.hound.mux().clone();
        let queue = Arc::clone(&self.queue);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    for (driver, reqs) in &groups {
                        if let Err(err) = driver.remove_refs(&mux, &queue, reqs).await {
                            warn!(
                                "unref on drop failed for driver {}: {}",
                                driver.path.display(),
                                err
                            );
                        }
                    }
                });
            }
            Err(_) => warn!("context dropped while active outside a runtime; driver references leak"),
        }
    }
}
