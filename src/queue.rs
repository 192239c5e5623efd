/* Bounded record queue — the per-consumer FIFO between the multiplexer
 * and a context.
 *
 * The ring holds refcounted records (`Arc<Record>`); fanning a record out
 * to several queues clones the `Arc`, and the payload is released when the
 * last queue (or consumer) drops its reference. Sequence numbers are
 * assigned at push time, per queue, monotonically from zero; a record
 * dropped by the overflow policy still consumes its seqno.
 *
 * The overflow policy is drop-oldest: a full queue discards its head so
 * fresh sensor data is kept at the cost of bounded loss. */

use std::collections::VecDeque;
use std::pin::pin;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::warn;

use crate::error::{Error, Result};
use crate::record::Record;

/* One queue slot: the per-queue sequence number plus the shared record. */
#[derive(Debug, Clone)]
pub struct QueuedRecord {
    pub seqno: u64,
    pub record: Arc<Record>,
}

struct Inner {
    ring: VecDeque<QueuedRecord>,
    capacity: usize,
    next_seqno: u64,
    interrupted: bool,
}

pub(crate) struct RecordQueue {
    inner: Mutex<Inner>,
    not_empty: Notify,
}

impl RecordQueue {
    /* `capacity` must be validated (>= 1) by the caller. */
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                ring: VecDeque::with_capacity(capacity),
                capacity,
                next_seqno: 0,
                interrupted: false,
            }),
            not_empty: Notify::new(),
        }
    }

    /* Append a record, dropping the oldest entry when full. */
    pub(crate) fn push(&self, record: Arc<Record>) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.ring.len() == inner.capacity {
                if let Some(dropped) = inner.ring.pop_front() {
                    warn!(
                        "queue full ({}), dropping oldest record (seqno {}, data id {})",
                        inner.capacity, dropped.seqno, dropped.record.data_id
                    );
                }
            }
            let seqno = inner.next_seqno;
            inner.next_seqno += 1;
            inner.ring.push_back(QueuedRecord { seqno, record });
        }
        self.not_empty.notify_one();
    }

    /* Pop up to `max` records, waiting until at least one is present.
     * Returns `Error::Interrupted` if the queue is interrupted while
     * (or before) waiting. */
    pub(crate) async fn pop(&self, max: usize) -> Result<Vec<QueuedRecord>> {
        loop {
            /* Register for a wakeup before checking the predicate so a
             * push or interrupt between the check and the await is not
             * lost. */
            let mut notified = pin!(self.not_empty.notified());
            notified.as_mut().enable();
            {
                let mut inner = self.inner.lock().unwrap();
                if inner.interrupted {
                    return Err(Error::Interrupted);
                }
                if !inner.ring.is_empty() {
                    let take = max.min(inner.ring.len());
                    return Ok(inner.ring.drain(..take).collect());
                }
            }
            notified.await;
        }
    }

    /* Pop up to `max` records without waiting; empty queue yields an
     * empty batch. */
    pub(crate) fn pop_nowait(&self, max: usize) -> Vec<QueuedRecord> {
        let mut inner = self.inner.lock().unwrap();
        let take = max.min(inner.ring.len());
        inner.ring.drain(..take).collect()
    }

    /* Pop whole records while their cumulative payload size stays within
     * `max_bytes`. Records are never split: if the head record alone
     * exceeds the remaining budget, it stays queued. Returns the batch
     * and the total payload bytes taken. */
    pub(crate) fn pop_bytes_nowait(&self, max_bytes: usize) -> (Vec<QueuedRecord>, usize) {
        let mut inner = self.inner.lock().unwrap();
        let mut taken = Vec::new();
        let mut total = 0usize;
        while let Some(head) = inner.ring.front() {
            let size = head.record.size();
            if total + size > max_bytes {
                break;
            }
            total += size;
            taken.push(inner.ring.pop_front().unwrap());
        }
        (taken, total)
    }

    /* Rebuild the ring with a new capacity. `flush` drops everything
     * outstanding; otherwise the oldest records are dropped until the
     * remainder fits. */
    pub(crate) fn resize(&self, capacity: usize, flush: bool) {
        let mut inner = self.inner.lock().unwrap();
        if flush {
            inner.ring.clear();
        } else {
            while inner.ring.len() > capacity {
                inner.ring.pop_front();
            }
        }
        inner.capacity = capacity;
    }

    /* Raise the interrupt flag and wake every blocked pop. */
    pub(crate) fn interrupt(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.interrupted = true;
        }
        self.not_empty.notify_waiters();
    }

    pub(crate) fn clear_interrupt(&self) {
        self.inner.lock().unwrap().interrupted = false;
    }

    /* Restart the per-queue sequence at zero (a new start cycle). */
    pub(crate) fn reset_seqno(&self) {
        self.inner.lock().unwrap().next_seqno = 0;
    }

    /* Release everything currently queued (teardown). */
    pub(crate) fn drain(&self) {
        self.inner.lock().unwrap().ring.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap().ring.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.inner.lock().unwrap().capacity
    }
}
