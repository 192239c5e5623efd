/* I/O multiplexer — one task drives every active driver descriptor.
 *
 * Ownership is split in two:
 *
 *   - the subscription table (device id → interested queues) is shared
 *     between user tasks and the poller under a plain mutex, so records
 *     emitted from *any* driver operation (parse on the poller, next or
 *     start on a user task) fan out through the same path;
 *   - the descriptor watch table is owned exclusively by the poller task
 *     and mutated through a command channel. The channel doubles as the
 *     wakeup primitive: a watch/unwatch command parks the readiness scan
 *     and the loop re-reads its tables before blocking again.
 *
 * A readable descriptor is read once per loop turn; the bytes are
 * appended to the per-descriptor carry buffer and handed to the owning
 * driver's `parse` under its op gate. Records are routed to subscribed
 * queues before the gate is released, which keeps per-driver emission
 * order intact all the way into each queue. */

use std::collections::HashMap;
use std::future::poll_fn;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::{Arc, Mutex};
use std::task::Poll;

use nix::libc;
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::driver::RecordSink;
use crate::error::Result;
use crate::queue::RecordQueue;
use crate::record::{DataId, DevId, Record};
use crate::registry::Driver;

const READ_CHUNK: usize = 4096;

/* One queue's interest in one data id of a device. */
struct Subscription {
    data_id: DataId,
    queue: Arc<RecordQueue>,
}

type SubTable = Mutex<HashMap<DevId, Vec<Subscription>>>;

enum MuxCmd {
    Watch {
        dev: DevId,
        fd: OwnedFd,
        driver: Arc<Driver>,
    },
    Unwatch {
        dev: DevId,
    },
}

/* Handle used by the registry and contexts. Cheap to clone. */
#[derive(Clone)]
pub(crate) struct Mux {
    subs: Arc<SubTable>,
    cmd_tx: mpsc::UnboundedSender<MuxCmd>,
}

impl Mux {
    /* Spawn the poller task. Must be called from within a tokio
     * runtime; the poller exits when the last handle is dropped. */
    pub(crate) fn spawn() -> Self {
        let subs: Arc<SubTable> = Arc::new(Mutex::new(HashMap::new()));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let poller = Poller {
            cmd_rx,
            subs: Arc::clone(&subs),
            watched: HashMap::new(),
        };
        tokio::spawn(poller.run());
        Self { subs, cmd_tx }
    }

    /* Put a started driver's descriptor under the poller's watch. */
    pub(crate) fn watch(&self, dev: DevId, fd: OwnedFd, driver: Arc<Driver>) {
        let _ = self.cmd_tx.send(MuxCmd::Watch { dev, fd, driver });
    }

    pub(crate) fn unwatch(&self, dev: DevId) {
        let _ = self.cmd_tx.send(MuxCmd::Unwatch { dev });
    }

    /* Register a queue's interest in (dev, data_id). */
    pub(crate) fn subscribe(&self, dev: DevId, data_id: DataId, queue: &Arc<RecordQueue>) {
        let mut subs = self.subs.lock().unwrap();
        subs.entry(dev).or_default().push(Subscription {
            data_id,
            queue: Arc::clone(queue),
        });
    }

    /* Drop one matching interest entry (same data id, same queue). */
    pub(crate) fn unsubscribe(&self, dev: DevId, data_id: DataId, queue: &Arc<RecordQueue>) {
        let mut subs = self.subs.lock().unwrap();
        if let Some(list) = subs.get_mut(&dev) {
            if let Some(pos) = list
                .iter()
                .position(|s| s.data_id == data_id && Arc::ptr_eq(&s.queue, queue))
            {
                list.remove(pos);
            }
            if list.is_empty() {
                subs.remove(&dev);
            }
        }
    }

    /* Fan records out to every queue subscribed to their data id. Called
     * under the emitting driver's op gate. */
    pub(crate) fn dispatch(&self, records: Vec<Record>) {
        dispatch_into(&self.subs, records);
    }
}

fn dispatch_into(subs: &SubTable, records: Vec<Record>) {
    let subs = subs.lock().unwrap();
    for record in records {
        let Some(list) = subs.get(&record.dev_id) else {
            continue;
        };
        let record = Arc::new(record);
        for sub in list.iter().filter(|s| s.data_id == record.data_id) {
            sub.queue.push(Arc::clone(&record));
        }
    }
}

/* One watched descriptor. */
struct Watched {
    afd: AsyncFd<OwnedFd>,
    driver: Arc<Driver>,
    /* Unconsumed tail from previous parse calls. */
    pending: Vec<u8>,
    eof: bool,
}

enum Turn {
    Cmd(MuxCmd),
    Closed,
    /* Every descriptor the readiness scan found readable, plus those
     * whose readiness poll itself failed. */
    Io {
        ready: Vec<DevId>,
        failed: Vec<DevId>,
    },
}

struct Poller {
    cmd_rx: mpsc::UnboundedReceiver<MuxCmd>,
    subs: Arc<SubTable>,
    watched: HashMap<DevId, Watched>,
}

impl Poller {
    async fn run(mut self) {
        debug!("multiplexer started");
        loop {
            let turn = poll_fn(|cx| {
                match self.cmd_rx.poll_recv(cx) {
                    Poll::Ready(Some(cmd)) => return Poll::Ready(Turn::Cmd(cmd)),
                    Poll::Ready(None) => return Poll::Ready(Turn::Closed),
                    Poll::Pending => {}
                }
                /* Scan every descriptor so all of them have a waker
                 * registered and a busy one cannot starve the rest. */
                let mut ready = Vec::new();
                let mut failed = Vec::new();
                for (dev, watched) in &self.watched {
                    if watched.eof {
                        continue;
                    }
                    match watched.afd.poll_read_ready(cx) {
                        /* Readiness is left uncleared on purpose: the
                         * service step reads until the descriptor would
                         * block and clears it there. */
                        Poll::Ready(Ok(_guard)) => ready.push(*dev),
                        Poll::Ready(Err(err)) => {
                            warn!("readiness poll failed for dev {}: {}", dev, err);
                            failed.push(*dev);
                        }
                        Poll::Pending => {}
                    }
                }
                if ready.is_empty() && failed.is_empty() {
                    Poll::Pending
                } else {
                    Poll::Ready(Turn::Io { ready, failed })
                }
            })
            .await;

            match turn {
                Turn::Cmd(MuxCmd::Watch { dev, fd, driver }) => self.add_watch(dev, fd, driver),
                Turn::Cmd(MuxCmd::Unwatch { dev }) => {
                    self.watched.remove(&dev);
                    debug!("dev {} dropped from the poll set", dev);
                }
                Turn::Closed => break,
                Turn::Io { ready, failed } => {
                    for dev in failed {
                        if let Some(watched) = self.watched.get_mut(&dev) {
                            watched.eof = true;
                        }
                    }
                    for dev in ready {
                        self.service(dev).await;
                    }
                }
            }
        }
        debug!("multiplexer exited");
    }

    fn add_watch(&mut self, dev: DevId, fd: OwnedFd, driver: Arc<Driver>) {
        if let Err(err) = set_nonblocking(fd.as_raw_fd()) {
            warn!("cannot watch dev {}: {}", dev, err);
            return;
        }
        match AsyncFd::new(fd) {
            Ok(afd) => {
                debug!("dev {} added to the poll set", dev);
                self.watched.insert(
                    dev,
                    Watched {
                        afd,
                        driver,
                        pending: Vec::new(),
                        eof: false,
                    },
                );
            }
            Err(err) => warn!("cannot watch dev {}: {}", dev, err),
        }
    }

    /* One read + parse round on a readable descriptor. */
    async fn service(&mut self, dev: DevId) {
        let Some(watched) = self.watched.get_mut(&dev) else {
            return;
        };

        let mut chunk = [0u8; READ_CHUNK];
        let read = loop {
            let mut guard = match watched.afd.readable().await {
                Ok(guard) => guard,
                Err(err) => {
                    warn!("dev {} readiness lost: {}", dev, err);
                    watched.eof = true;
                    return;
                }
            };
            match guard.try_io(|afd| {
                nix::unistd::read(afd.get_ref().as_raw_fd(), &mut chunk)
                    .map_err(std::io::Error::from)
            }) {
                Ok(result) => break result,
                /* Stale readiness; cleared by try_io, go back to the
                 * main loop. */
                Err(_would_block) => return,
            }
        };

        match read {
            Ok(0) => {
                debug!("dev {} reached end of stream", dev);
                watched.eof = true;
                if !watched.pending.is_empty() {
                    warn!(
                        "dev {} left {} unparsed bytes at end of stream",
                        dev,
                        watched.pending.len()
                    );
                }
                return;
            }
            Ok(n) => watched.pending.extend_from_slice(&chunk[..n]),
            Err(err) => {
                warn!("read failed on dev {}: {}", dev, err);
                watched.eof = true;
                return;
            }
        }

        let driver = Arc::clone(&watched.driver);
        let mut ops = driver.ops.lock().await;
        let mut sink = RecordSink::new(dev);
        match ops.parse(&watched.pending, &mut sink).await {
            Ok(consumed) => {
                if consumed > watched.pending.len() {
                    warn!(
                        "driver for dev {} claimed {} consumed bytes of {}",
                        dev,
                        consumed,
                        watched.pending.len()
                    );
                }
                let consumed = consumed.min(watched.pending.len());
                watched.pending.drain(..consumed);
            }
            Err(err) => {
                /* The core never retries a failed parse; the bytes that
                 * provoked it are discarded. */
                warn!("parse failed on dev {}: {}", dev, err);
                watched.pending.clear();
            }
        }
        if !sink.is_empty() {
            dispatch_into(&self.subs, sink.take());
        }
        drop(ops);
    }
}

fn set_nonblocking(fd: RawFd) -> Result<()> {
    /* SAFETY: fcntl on a descriptor we own; no pointers involved. */
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}
