/* hound — multi-sensor record collection.
 *
 * The library coordinates a set of registered drivers (CAN, OBD-II, GPS,
 * IIO, files, test drivers) and any number of consumer contexts. Each
 * context names the data ids it wants and at which period; the core
 * reference-counts those requests per driver, starts and stops drivers on
 * demand, polls every active descriptor from one multiplexer task, parses
 * raw bytes into typed records and fans them out to each interested
 * context's bounded queue.
 *
 * Entry point: [`Hound`]. Typical use:
 *
 *   let hound = Hound::new();
 *   hound.register_driver(DriverKind::Counter, "/dev/counter0".as_ref(),
 *                         None, None, &[InitArg::Uint64(5)]).await?;
 *   let ctx = hound.alloc_ctx(ContextRequest { ... }).await?;
 *   ctx.start().await?;
 *   ctx.read(10).await?;
 *   ctx.stop().await?;
 *
 * `Hound::new` must be called from within a tokio runtime; the
 * multiplexer runs as a task of that runtime. */

pub mod config;
mod ctx;
pub mod driver;
mod error;
mod mux;
mod queue;
mod record;
mod registry;
pub mod schema;

use std::path::Path;
use std::sync::Arc;

pub use crate::config::{DriverSpec, InitArg, apply_config, load_config, parse_config};
pub use crate::ctx::{Context, ContextRequest, MAX_DATA_REQ, RecordCallback};
pub use crate::driver::{
    DEVICE_NAME_MAX, DataDesc, DataDriver, DriverKind, RecordSink, SchedMode, create_driver,
};
pub use crate::error::{Error, Result};
pub use crate::record::{DataId, DataRequest, DevId, ON_DEMAND, Period, Record, Timestamp};
pub use crate::registry::DeviceData;
pub use crate::schema::{FieldFmt, FieldValue, FmtType, SchemaEntry, Unit};

use crate::mux::Mux;
use crate::registry::Registry;

struct HoundInner {
    registry: Registry,
    mux: Mux,
}

/* The library handle: the driver registry plus the multiplexer. Cheap to
 * clone; contexts keep their own clone, and the multiplexer task exits
 * when the last handle (and last context) is gone. */
#[derive(Clone)]
pub struct Hound {
    inner: Arc<HoundInner>,
}

impl Hound {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HoundInner {
                registry: Registry::new(),
                mux: Mux::spawn(),
            }),
        }
    }

    /* Build and register one of the known driver kinds. `schema_base`
     * plus `schema_file` locate the YAML schema for schema-driven kinds;
     * both may be omitted for the kinds that carry well-known formats. */
    pub async fn register_driver(
        &self,
        kind: DriverKind,
        path: &Path,
        schema_base: Option<&Path>,
        schema_file: Option<&str>,
        args: &[InitArg],
    ) -> Result<DevId> {
        let schema = match (schema_base, schema_file) {
            (Some(base), Some(file)) => schema::load_schema(base, file)?,
            _ => Vec::new(),
        };
        let ops = driver::create_driver(kind, path, &schema, args)?;
        self.register(path, ops).await
    }

    /* Register a custom driver implementation under `path`. */
    pub async fn register(&self, path: &Path, ops: Box<dyn DataDriver>) -> Result<DevId> {
        self.inner.registry.register(path, ops).await
    }

    /* Remove a registered driver. Refused while any context still
     * references its data. */
    pub async fn unregister_driver(&self, path: &Path) -> Result<()> {
        self.inner.registry.unregister(path).await
    }

    /* Snapshot of every data id currently advertised, annotated with
     * its device. */
    pub async fn datadesc(&self) -> Vec<DeviceData> {
        self.inner.registry.snapshot().await
    }

    pub async fn device_name(&self, dev_id: DevId) -> Result<String> {
        self.inner.registry.device_name(dev_id).await
    }

    /* Allocate a consumer context. The request is validated here; driver
     * references are only taken at `Context::start`. */
    pub async fn alloc_ctx(&self, request: ContextRequest) -> Result<Context> {
        Context::new(self.clone(), request).await
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub(crate) fn mux(&self) -> &Mux {
        &self.inner.mux
    }
}

impl Default for Hound {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::OwnedFd;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use async_trait::async_trait;

    fn request(id: DataId, period: Period) -> DataRequest {
        DataRequest { id, period }
    }

    /* Collect (seqno, payload) pairs from the callback. */
    fn collecting_callback(
        sink: Arc<StdMutex<Vec<(u64, Vec<u8>)>>>,
    ) -> Option<RecordCallback> {
        Some(Box::new(move |rec: &Record, seqno: u64| {
            sink.lock().unwrap().push((seqno, rec.data.to_vec()));
        }))
    }

    fn noop_callback() -> Option<RecordCallback> {
        Some(Box::new(|_rec: &Record, _seqno: u64| {}))
    }

    async fn wait_for_queue(ctx: &Context, want: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while ctx.queue_length().await < want {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("queue did not fill in time");
    }

    #[tokio::test]
    async fn test_counter_pipeline_delivers_in_order() {
        let hound = Hound::new();
        hound
            .register_driver(
                DriverKind::Counter,
                Path::new("/dev/counter0"),
                None,
                None,
                &[InitArg::Uint64(5)],
            )
            .await
            .unwrap();

        let collected = Arc::new(StdMutex::new(Vec::new()));
        let ctx = hound
            .alloc_ctx(ContextRequest {
                queue_len: 100,
                callback: collecting_callback(Arc::clone(&collected)),
                requests: vec![request(DataId::COUNTER, ON_DEMAND)],
            })
            .await
            .unwrap();

        ctx.start().await.unwrap();
        ctx.next(10).await.unwrap();
        let got = tokio::time::timeout(Duration::from_secs(5), ctx.read(10))
            .await
            .expect("read timed out")
            .unwrap();
        assert_eq!(got, 10);

        let collected = collected.lock().unwrap();
        for (i, (seqno, data)) in collected.iter().take(10).enumerate() {
            assert_eq!(*seqno, i as u64);
            let value = u64::from_le_bytes(data[..].try_into().unwrap());
            assert_eq!(value, 5 + i as u64);
        }

        ctx.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        tmp.write_all(&payload).unwrap();
        tmp.flush().unwrap();

        let hound = Hound::new();
        hound
            .register_driver(DriverKind::File, tmp.path(), None, None, &[])
            .await
            .unwrap();
        let period = hound
            .datadesc()
            .await
            .iter()
            .find(|d| d.desc.id == DataId::FILE)
            .expect("file data id not advertised")
            .desc
            .periods[0];

        let collected = Arc::new(StdMutex::new(Vec::new()));
        let ctx = hound
            .alloc_ctx(ContextRequest {
                queue_len: 64,
                callback: collecting_callback(Arc::clone(&collected)),
                requests: vec![request(DataId::FILE, period)],
            })
            .await
            .unwrap();
        ctx.start().await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let bytes: usize = collected.lock().unwrap().iter().map(|(_, d)| d.len()).sum();
                if bytes >= payload.len() {
                    break;
                }
                ctx.read(1).await.unwrap();
            }
        })
        .await
        .expect("file stream did not complete");

        let streamed: Vec<u8> = collected
            .lock()
            .unwrap()
            .iter()
            .flat_map(|(_, d)| d.clone())
            .collect();
        assert_eq!(streamed, payload);
        ctx.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_nop_lifecycle() {
        let hound = Hound::new();
        let path = Path::new("/dev/nop0");
        hound
            .register_driver(DriverKind::Nop, path, None, None, &[])
            .await
            .unwrap();

        let ctx = hound
            .alloc_ctx(ContextRequest {
                queue_len: 8,
                callback: noop_callback(),
                requests: vec![
                    request(DataId::NOP1, ON_DEMAND),
                    request(DataId::NOP2, ON_DEMAND),
                ],
            })
            .await
            .unwrap();

        ctx.start().await.unwrap();
        assert_eq!(ctx.queue_length().await, 0);
        assert_eq!(ctx.max_queue_length().await, 8);
        ctx.stop().await.unwrap();
        drop(ctx);
        hound.unregister_driver(path).await.unwrap();
        assert!(hound.datadesc().await.is_empty());
    }

    #[tokio::test]
    async fn test_conflicting_drivers() {
        let hound = Hound::new();
        hound
            .register_driver(DriverKind::Counter, Path::new("/dev/c0"), None, None, &[])
            .await
            .unwrap();
        let err = hound
            .register_driver(DriverKind::Counter, Path::new("/dev/c1"), None, None, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConflictingDrivers(id) if id == DataId::COUNTER));
    }

    #[tokio::test]
    async fn test_stop_interrupts_blocked_read() {
        let hound = Hound::new();
        hound
            .register_driver(DriverKind::Nop, Path::new("/dev/nop0"), None, None, &[])
            .await
            .unwrap();
        let ctx = Arc::new(
            hound
                .alloc_ctx(ContextRequest {
                    queue_len: 8,
                    callback: noop_callback(),
                    requests: vec![request(DataId::NOP1, ON_DEMAND)],
                })
                .await
                .unwrap(),
        );
        ctx.start().await.unwrap();

        let reader = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { ctx.read(1).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        ctx.stop().await.unwrap();

        let res = tokio::time::timeout(Duration::from_secs(2), reader)
            .await
            .expect("blocked read did not return after stop")
            .unwrap();
        assert!(matches!(res, Err(Error::Interrupted)));
    }

    #[tokio::test]
    async fn test_seqno_resets_per_start_cycle() {
        let hound = Hound::new();
        hound
            .register_driver(
                DriverKind::Counter,
                Path::new("/dev/counter0"),
                None,
                None,
                &[],
            )
            .await
            .unwrap();

        let collected = Arc::new(StdMutex::new(Vec::new()));
        let ctx = hound
            .alloc_ctx(ContextRequest {
                queue_len: 16,
                callback: collecting_callback(Arc::clone(&collected)),
                requests: vec![request(DataId::COUNTER, ON_DEMAND)],
            })
            .await
            .unwrap();

        ctx.start().await.unwrap();
        ctx.next(3).await.unwrap();
        ctx.read(3).await.unwrap();
        ctx.stop().await.unwrap();

        ctx.start().await.unwrap();
        ctx.next(2).await.unwrap();
        ctx.read(2).await.unwrap();
        ctx.stop().await.unwrap();

        let seqnos: Vec<u64> = collected.lock().unwrap().iter().map(|(s, _)| *s).collect();
        assert_eq!(seqnos, vec![0, 1, 2, 0, 1]);
    }

    #[tokio::test]
    async fn test_byte_bounded_and_drain_reads() {
        let hound = Hound::new();
        hound
            .register_driver(
                DriverKind::Counter,
                Path::new("/dev/counter0"),
                None,
                None,
                &[],
            )
            .await
            .unwrap();
        let ctx = hound
            .alloc_ctx(ContextRequest {
                queue_len: 16,
                callback: noop_callback(),
                requests: vec![request(DataId::COUNTER, ON_DEMAND)],
            })
            .await
            .unwrap();
        ctx.start().await.unwrap();
        ctx.next(3).await.unwrap();
        wait_for_queue(&ctx, 3).await;

        /* Counter records are 8 bytes each; 20 bytes fits two. */
        assert_eq!(ctx.read_bytes_nowait(20).await.unwrap(), (2, 16));
        /* A budget smaller than the head record takes nothing. */
        assert_eq!(ctx.read_bytes_nowait(7).await.unwrap(), (0, 0));
        assert_eq!(ctx.read_all_nowait().await.unwrap(), 1);
        assert_eq!(ctx.read_nowait(4).await.unwrap(), 0);
        ctx.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_resize_queue_through_context() {
        let hound = Hound::new();
        hound
            .register_driver(
                DriverKind::Counter,
                Path::new("/dev/counter0"),
                None,
                None,
                &[],
            )
            .await
            .unwrap();
        let collected = Arc::new(StdMutex::new(Vec::new()));
        let ctx = hound
            .alloc_ctx(ContextRequest {
                queue_len: 8,
                callback: collecting_callback(Arc::clone(&collected)),
                requests: vec![request(DataId::COUNTER, ON_DEMAND)],
            })
            .await
            .unwrap();
        ctx.start().await.unwrap();

        assert!(matches!(
            ctx.resize_queue(0, false).await,
            Err(Error::QueueTooSmall)
        ));

        /* Shrinking without flush keeps the newest records. */
        ctx.next(6).await.unwrap();
        wait_for_queue(&ctx, 6).await;
        ctx.resize_queue(2, false).await.unwrap();
        assert_eq!(ctx.queue_length().await, 2);
        assert_eq!(ctx.max_queue_length().await, 2);
        assert_eq!(ctx.read_all_nowait().await.unwrap(), 2);
        {
            let values: Vec<u64> = collected
                .lock()
                .unwrap()
                .iter()
                .map(|(_, d)| u64::from_le_bytes(d[..].try_into().unwrap()))
                .collect();
            assert_eq!(values, vec![4, 5]);
        }

        /* Growing with flush drops whatever was outstanding. */
        ctx.next(2).await.unwrap();
        wait_for_queue(&ctx, 2).await;
        ctx.resize_queue(4, true).await.unwrap();
        assert_eq!(ctx.queue_length().await, 0);
        assert_eq!(ctx.max_queue_length().await, 4);

        ctx.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_alloc_ctx_boundaries() {
        let hound = Hound::new();
        hound
            .register_driver(
                DriverKind::Counter,
                Path::new("/dev/counter0"),
                None,
                None,
                &[],
            )
            .await
            .unwrap();
        let valid = || vec![request(DataId::COUNTER, ON_DEMAND)];

        let err = hound
            .alloc_ctx(ContextRequest {
                queue_len: 0,
                callback: noop_callback(),
                requests: valid(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::QueueTooSmall));

        let err = hound
            .alloc_ctx(ContextRequest {
                queue_len: 4,
                callback: noop_callback(),
                requests: Vec::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoDataRequested));

        let err = hound
            .alloc_ctx(ContextRequest {
                queue_len: 4,
                callback: noop_callback(),
                requests: vec![request(DataId(1), 0); MAX_DATA_REQ + 1],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TooMuchDataRequested));

        let err = hound
            .alloc_ctx(ContextRequest {
                queue_len: 4,
                callback: noop_callback(),
                requests: vec![
                    request(DataId::COUNTER, ON_DEMAND),
                    request(DataId::COUNTER, ON_DEMAND),
                ],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateDataRequested));

        let err = hound
            .alloc_ctx(ContextRequest {
                queue_len: 4,
                callback: None,
                requests: valid(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingCallback));

        let err = hound
            .alloc_ctx(ContextRequest {
                queue_len: 4,
                callback: noop_callback(),
                requests: vec![request(DataId(0xdead), 0)],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DataIdDoesNotExist(_)));

        let err = hound
            .alloc_ctx(ContextRequest {
                queue_len: 4,
                callback: noop_callback(),
                requests: vec![request(DataId::COUNTER, 123)],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PeriodUnsupported { .. }));

        /* Double start / stop of an idle context. */
        let ctx = hound
            .alloc_ctx(ContextRequest {
                queue_len: 4,
                callback: noop_callback(),
                requests: valid(),
            })
            .await
            .unwrap();
        assert!(matches!(ctx.stop().await, Err(Error::CtxNotActive)));
        assert!(matches!(ctx.read_nowait(1).await, Err(Error::CtxNotActive)));
        ctx.start().await.unwrap();
        assert!(matches!(ctx.start().await, Err(Error::CtxActive)));
        ctx.stop().await.unwrap();
    }

    /* Push test driver with two supported periods, logging every
     * `setdata` so tests can observe period reconciliation. */
    struct TwoRateDriver {
        descs: Vec<DataDesc>,
        setdata_log: Arc<StdMutex<Vec<Vec<DataRequest>>>>,
        pipe_wr: Option<OwnedFd>,
    }

    const TWO_RATE_ID: DataId = DataId(0x42);

    impl TwoRateDriver {
        fn new(log: Arc<StdMutex<Vec<Vec<DataRequest>>>>) -> Self {
            Self {
                descs: vec![DataDesc {
                    id: TWO_RATE_ID,
                    name: "two_rate".to_string(),
                    sched: SchedMode::Push,
                    periods: vec![10, 20],
                    fmt: Vec::new(),
                }],
                setdata_log: log,
                pipe_wr: None,
            }
        }
    }

    #[async_trait]
    impl DataDriver for TwoRateDriver {
        fn device_name(&self) -> &str {
            "two-rate"
        }

        fn datadesc(&self) -> &[DataDesc] {
            &self.descs
        }

        async fn setdata(&mut self, requests: &[DataRequest]) -> Result<()> {
            self.setdata_log.lock().unwrap().push(requests.to_vec());
            Ok(())
        }

        async fn parse(&mut self, buf: &[u8], sink: &mut RecordSink) -> Result<usize> {
            for byte in buf {
                sink.push(TWO_RATE_ID, vec![*byte]);
            }
            Ok(buf.len())
        }

        async fn start(&mut self, _sink: &mut RecordSink) -> Result<OwnedFd> {
            let (rd, wr) = nix::unistd::pipe()?;
            self.pipe_wr = Some(wr);
            Ok(rd)
        }

        async fn stop(&mut self) -> Result<()> {
            self.pipe_wr = None;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_effective_period_is_minimum_over_subscribers() {
        let hound = Hound::new();
        let log = Arc::new(StdMutex::new(Vec::new()));
        hound
            .register(
                Path::new("/dev/two-rate0"),
                Box::new(TwoRateDriver::new(Arc::clone(&log))),
            )
            .await
            .unwrap();

        let slow = hound
            .alloc_ctx(ContextRequest {
                queue_len: 4,
                callback: noop_callback(),
                requests: vec![request(TWO_RATE_ID, 20)],
            })
            .await
            .unwrap();
        let fast = hound
            .alloc_ctx(ContextRequest {
                queue_len: 4,
                callback: noop_callback(),
                requests: vec![request(TWO_RATE_ID, 10)],
            })
            .await
            .unwrap();

        slow.start().await.unwrap();
        assert_eq!(
            log.lock().unwrap().last().unwrap(),
            &vec![request(TWO_RATE_ID, 20)]
        );

        fast.start().await.unwrap();
        assert_eq!(
            log.lock().unwrap().last().unwrap(),
            &vec![request(TWO_RATE_ID, 10)]
        );

        /* The registry tracks both subscribers. */
        let driver = hound.registry().driver_for(TWO_RATE_ID).await.unwrap();
        assert_eq!(driver.active_snapshot().await, vec![(TWO_RATE_ID, 2, 10)]);

        fast.stop().await.unwrap();
        assert_eq!(
            log.lock().unwrap().last().unwrap(),
            &vec![request(TWO_RATE_ID, 20)]
        );
        assert_eq!(driver.active_snapshot().await, vec![(TWO_RATE_ID, 1, 20)]);

        slow.stop().await.unwrap();
        assert!(!driver.is_started().await);
    }

    /* Driver whose start always fails, for rollback coverage. */
    struct BrokenDriver {
        descs: Vec<DataDesc>,
    }

    const BROKEN_ID: DataId = DataId(0x43);

    impl BrokenDriver {
        fn new() -> Self {
            Self {
                descs: vec![DataDesc {
                    id: BROKEN_ID,
                    name: "broken".to_string(),
                    sched: SchedMode::Push,
                    periods: vec![5],
                    fmt: Vec::new(),
                }],
            }
        }
    }

    #[async_trait]
    impl DataDriver for BrokenDriver {
        fn device_name(&self) -> &str {
            "broken"
        }

        fn datadesc(&self) -> &[DataDesc] {
            &self.descs
        }

        async fn setdata(&mut self, _requests: &[DataRequest]) -> Result<()> {
            Ok(())
        }

        async fn parse(&mut self, _buf: &[u8], _sink: &mut RecordSink) -> Result<usize> {
            Ok(0)
        }

        async fn start(&mut self, _sink: &mut RecordSink) -> Result<OwnedFd> {
            Err(Error::DriverFail(anyhow::anyhow!("no hardware attached")))
        }

        async fn stop(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_start_rolls_back_all_references() {
        let hound = Hound::new();
        hound
            .register_driver(
                DriverKind::Counter,
                Path::new("/dev/counter0"),
                None,
                None,
                &[],
            )
            .await
            .unwrap();
        hound
            .register(Path::new("/dev/broken0"), Box::new(BrokenDriver::new()))
            .await
            .unwrap();

        let ctx = hound
            .alloc_ctx(ContextRequest {
                queue_len: 4,
                callback: noop_callback(),
                requests: vec![
                    request(DataId::COUNTER, ON_DEMAND),
                    request(BROKEN_ID, 5),
                ],
            })
            .await
            .unwrap();

        assert!(matches!(ctx.start().await, Err(Error::DriverFail(_))));

        /* The counter driver's references from the failed start must be
         * gone, and the context must still be startable after the broken
         * driver goes away. */
        let counter = hound.registry().driver_for(DataId::COUNTER).await.unwrap();
        assert!(counter.active_snapshot().await.is_empty());
        assert!(!counter.is_started().await);
        assert!(matches!(ctx.read_nowait(1).await, Err(Error::CtxNotActive)));
    }

    #[tokio::test]
    async fn test_two_contexts_share_one_driver() {
        let hound = Hound::new();
        hound
            .register_driver(
                DriverKind::Counter,
                Path::new("/dev/counter0"),
                None,
                None,
                &[],
            )
            .await
            .unwrap();

        let a_records = Arc::new(StdMutex::new(Vec::new()));
        let b_records = Arc::new(StdMutex::new(Vec::new()));
        let ctx_a = hound
            .alloc_ctx(ContextRequest {
                queue_len: 16,
                callback: collecting_callback(Arc::clone(&a_records)),
                requests: vec![request(DataId::COUNTER, ON_DEMAND)],
            })
            .await
            .unwrap();
        let ctx_b = hound
            .alloc_ctx(ContextRequest {
                queue_len: 16,
                callback: collecting_callback(Arc::clone(&b_records)),
                requests: vec![request(DataId::COUNTER, ON_DEMAND)],
            })
            .await
            .unwrap();

        ctx_a.start().await.unwrap();
        ctx_b.start().await.unwrap();

        let driver = hound.registry().driver_for(DataId::COUNTER).await.unwrap();
        assert_eq!(driver.active_snapshot().await, vec![(DataId::COUNTER, 2, 0)]);

        /* One pull feeds both queues. */
        ctx_a.next(2).await.unwrap();
        wait_for_queue(&ctx_a, 2).await;
        wait_for_queue(&ctx_b, 2).await;

        /* Detaching one context keeps the driver running for the other. */
        ctx_a.stop().await.unwrap();
        assert_eq!(driver.active_snapshot().await, vec![(DataId::COUNTER, 1, 0)]);
        assert!(driver.is_started().await);

        ctx_b.read_nowait(2).await.unwrap();
        assert_eq!(b_records.lock().unwrap().len(), 2);
        ctx_b.stop().await.unwrap();
        assert!(!driver.is_started().await);
    }
}
