//! Write-ahead log writer with group commit
//!
//! One WalWriter owns one log file for its whole life: open writes the
//! header and an OPEN record, producers append through it concurrently,
//! close quiesces and releases the file. The file is never reopened for
//! append.
//!
//! Durability is amortized. Producers stream their records into the cipher
//! stream under the append mutex, enqueue a work item, and get back an
//! OpHandle. A dedicated sync worker drains the queue and issues ONE
//! durable sync for the whole drained batch, then resolves every handle
//! with that batch's outcome. Hundreds of producers cost one sync.
//!
//! Two locks, deliberately separate: the append mutex serializes the byte
//! stream; the close mutex guards the open/closing/closed phase so that
//! enqueueing new work never waits behind an in-flight sync.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};
use uuid::Uuid;

use crate::codec::{self, LogKey, LogValue, Mutation, TabletExtent};
use crate::config::WalConfig;
use crate::crypto::{CipherStream, CryptoModule, CryptoRegistry};
use crate::error::{WalError, WalResult};
use crate::sink::{BlockSink, BlockStore, VolumeChooser};

/// One log_many group: mutations for a single tablet under one sequence.
#[derive(Debug, Clone)]
pub struct MutationBatch {
    pub tablet_id: i32,
    pub sequence: i64,
    pub mutations: Vec<Mutation>,
}

/// Writer lifecycle. `open()` constructs straight into Open; there is no
/// observable "new" phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Closing,
    Closed,
}

struct WorkState {
    done: bool,
    error: Option<WalError>,
}

/// A single-shot completion signal plus its outcome slot.
struct WorkItem {
    state: Mutex<WorkState>,
    cond: Condvar,
    sentinel: bool,
}

impl WorkItem {
    fn new(sentinel: bool) -> Self {
        Self {
            state: Mutex::new(WorkState {
                done: false,
                error: None,
            }),
            cond: Condvar::new(),
            sentinel,
        }
    }

    fn complete(&self, result: WalResult<()>) {
        let mut state = self.state.lock();
        if state.done {
            return;
        }
        state.done = true;
        state.error = result.err();
        self.cond.notify_all();
    }

    fn wait(&self) -> WalResult<()> {
        let mut state = self.state.lock();
        while !state.done {
            self.cond.wait(&mut state);
        }
        match &state.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

/// Completion handle for one append operation.
///
/// wait() blocks until the sync worker has resolved the batch containing
/// this operation and reports the outcome that applied to these bytes.
/// There is no timeout; abandoning the handle does not unqueue the work,
/// and the bytes may still become durable afterwards.
pub struct OpHandle {
    item: Arc<WorkItem>,
}

impl OpHandle {
    pub fn wait(&self) -> WalResult<()> {
        self.item.wait()
    }
}

struct WorkQueue {
    items: VecDeque<Arc<WorkItem>>,
    /// Set when the sync worker drains its final batch; later enqueues
    /// resolve immediately with LogClosed instead of hanging forever.
    dead: bool,
}

struct Shared {
    queue: Mutex<WorkQueue>,
    queue_cond: Condvar,
    /// The close mutex of the two-lock design
    phase: Mutex<Phase>,
    sink: Arc<dyn BlockSink>,
    use_sync_to_disk: bool,
}

impl Shared {
    /// Strongest durable-sync primitive the sink offers.
    fn sync_once(&self) -> WalResult<()> {
        if self.use_sync_to_disk {
            self.sink.sync_to_disk()
        } else {
            self.sink.flush_to_peers()
        }
    }
}

/// The dedicated sync worker. One iteration = one group commit.
fn sync_loop(shared: Arc<Shared>) {
    loop {
        let (batch, last) = {
            let mut queue = shared.queue.lock();
            while queue.items.is_empty() {
                shared.queue_cond.wait(&mut queue);
            }
            let batch: Vec<Arc<WorkItem>> = queue.items.drain(..).collect();
            let last = batch.iter().any(|item| item.sentinel);
            if last {
                queue.dead = true;
            }
            (batch, last)
        };

        let outcome = {
            let phase = shared.phase.lock();
            if *phase != Phase::Closed {
                // Closing still syncs: close() is parked on the sentinel and
                // the sink stays open until the worker exits, so followers
                // drained alongside the sentinel resolve with the truth
                shared.sync_once()
            } else {
                Err(WalError::LogClosed)
            }
        };

        match &outcome {
            Ok(()) => debug!("group sync covered {} appends", batch.len()),
            Err(e) => warn!("group sync failed {} appends: {}", batch.len(), e),
        }

        for item in &batch {
            if !item.sentinel {
                item.complete(outcome.clone());
            }
        }

        if last {
            // Sentinel resolves after every follower, releasing close()
            for item in &batch {
                if item.sentinel {
                    item.complete(Ok(()));
                }
            }
            return;
        }
    }
}

/// Append-only, optionally-encrypted log writer over a block sink.
///
/// Thread-safe; all methods take &self and may be called from any thread.
pub struct WalWriter {
    session_id: String,
    path: String,
    /// The append mutex of the two-lock design
    stream: Mutex<Box<dyn CipherStream>>,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WalWriter {
    /// Allocate a fresh log file for this tablet server and make it live:
    /// header, OPEN record, one durable sync, then return.
    ///
    /// The file lands at `{volume}/{server_tag}/{uuid}` with the volume
    /// picked by `chooser`; the uuid doubles as the writer session id. If
    /// anything fails after the file exists, the partial file is closed
    /// before the error propagates; no retry happens at this layer.
    pub fn open(
        store: &dyn BlockStore,
        chooser: &dyn VolumeChooser,
        registry: &CryptoRegistry,
        config: &WalConfig,
        tserver_address: &str,
    ) -> WalResult<WalWriter> {
        config
            .validate()
            .map_err(|reason| WalError::InvalidConfig { reason })?;
        let module = registry.get(&config.crypto_module)?;

        let volume = chooser.choose(&config.volumes);
        let server_tag = tserver_address.replace(':', "+");
        let session_id = Uuid::new_v4().to_string();
        let path = format!("{}/{}/{}", volume, server_tag, session_id);

        let replication = if config.replication != 0 {
            config.replication
        } else {
            store.default_replication(&path)
        };
        let mut block_size = config.derived_block_size();
        if block_size == 0 {
            block_size = store.default_block_size();
        }

        let sink = store.create(&path, replication, block_size, config.sync_mode)?;

        match Self::finish_open(sink.clone(), module, config, session_id, path) {
            Ok(writer) => Ok(writer),
            Err(e) => {
                // Partial open: release the file, surface the one error
                let _ = sink.close();
                Err(e)
            }
        }
    }

    fn finish_open(
        sink: Arc<dyn BlockSink>,
        module: Arc<dyn CryptoModule>,
        config: &WalConfig,
        session_id: String,
        path: String,
    ) -> WalResult<WalWriter> {
        let params = module.init_params()?;
        sink.append(&codec::encode_file_header(module.name(), params.as_bytes()))?;

        let mut stream = module.wrap_writer(sink.clone(), &params)?;
        stream.write(&codec::encode_record(
            &LogKey::open(session_id.as_str()),
            &LogValue::empty(),
        ))?;
        stream.flush()?;

        let use_sync_to_disk = config.sync_mode && sink.supports_sync_to_disk();
        if config.sync_mode && !use_sync_to_disk {
            warn!(
                "sink for {} has no sync-to-disk; durability degrades to peer OS buffers",
                path
            );
        }

        let shared = Arc::new(Shared {
            queue: Mutex::new(WorkQueue {
                items: VecDeque::new(),
                dead: false,
            }),
            queue_cond: Condvar::new(),
            phase: Mutex::new(Phase::Open),
            sink,
            use_sync_to_disk,
        });

        // The OPEN record must be durable before open() returns
        shared.sync_once()?;

        let worker = thread::Builder::new()
            .name("tessera-wal-sync".to_string())
            .spawn({
                let shared = Arc::clone(&shared);
                move || sync_loop(shared)
            })
            .map_err(|e| WalError::Io {
                path: None,
                kind: std::io::ErrorKind::Other,
                message: format!("Failed to spawn sync worker: {}", e),
            })?;

        info!("opened write-ahead log {}", path);
        Ok(WalWriter {
            session_id,
            path,
            stream: Mutex::new(stream),
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Writer session identifier; equals the uuid component of path().
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Store path of the log file this writer owns.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Append mutation batches for any number of tablets. Returns a handle
    /// that resolves once the records are durable (or with the error that
    /// kept them from becoming durable).
    pub fn log_many(&self, batches: Vec<MutationBatch>) -> WalResult<OpHandle> {
        let records: Vec<(LogKey, LogValue)> = batches
            .into_iter()
            .map(|b| {
                (
                    LogKey::many_mutations(b.sequence, b.tablet_id),
                    LogValue::new(b.mutations),
                )
            })
            .collect();
        self.append(&records)
    }

    /// Record a tablet definition and sync it durably before returning.
    ///
    /// Not batched: later records referencing this tablet must find the
    /// definition already durable, so this blocks on its own handle.
    pub fn define_tablet(
        &self,
        sequence: i64,
        tablet_id: i32,
        extent: TabletExtent,
    ) -> WalResult<()> {
        let handle = self.append(&[(
            LogKey::define_tablet(sequence, tablet_id, extent),
            LogValue::empty(),
        )])?;
        handle.wait()
    }

    /// Record that a compaction began writing `filename`.
    pub fn compaction_start(
        &self,
        sequence: i64,
        tablet_id: i32,
        filename: &str,
    ) -> WalResult<OpHandle> {
        self.append(&[(
            LogKey::compaction_start(sequence, tablet_id, filename),
            LogValue::empty(),
        )])
    }

    /// Record that the tablet's most recent compaction is complete.
    pub fn compaction_finish(&self, sequence: i64, tablet_id: i32) -> WalResult<OpHandle> {
        self.append(&[(
            LogKey::compaction_finish(sequence, tablet_id),
            LogValue::empty(),
        )])
    }

    /// Stream records under the append mutex, then enqueue one work item.
    ///
    /// Producer order in the file is append-mutex acquisition order. A sink
    /// failure here (including LogClosed from a racing close) fails only
    /// this call; the pipeline keeps draining for everyone else.
    fn append(&self, records: &[(LogKey, LogValue)]) -> WalResult<OpHandle> {
        {
            let phase = self.shared.phase.lock();
            if *phase != Phase::Open {
                return Err(WalError::LogClosed);
            }
        }

        {
            let mut stream = self.stream.lock();
            for (key, value) in records {
                stream.write(&codec::encode_record(key, value))?;
            }
            stream.flush()?;
        }

        let item = Arc::new(WorkItem::new(false));
        self.enqueue(Arc::clone(&item));
        Ok(OpHandle { item })
    }

    fn enqueue(&self, item: Arc<WorkItem>) {
        {
            let mut queue = self.shared.queue.lock();
            if queue.dead {
                drop(queue);
                item.complete(Err(WalError::LogClosed));
                return;
            }
            queue.items.push_back(item);
        }
        self.shared.queue_cond.notify_one();
    }

    /// Quiesce the pipeline, resolve all outstanding handles, and close the
    /// underlying file exactly once. Open -> Closing -> Closed; any append
    /// arriving from Closing onwards fails LogClosed.
    pub fn close(&self) -> WalResult<()> {
        {
            let mut phase = self.shared.phase.lock();
            if *phase != Phase::Open {
                return Err(WalError::LogClosed);
            }
            *phase = Phase::Closing;
        }

        let sentinel = Arc::new(WorkItem::new(true));
        self.enqueue(Arc::clone(&sentinel));
        sentinel.wait()?;

        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }

        let finish_result = self.stream.lock().finish();
        let close_result = self.shared.sink.close();

        {
            let mut phase = self.shared.phase.lock();
            *phase = Phase::Closed;
        }

        info!("closed write-ahead log {}", self.path);
        finish_result.and(close_result)
    }
}

impl Drop for WalWriter {
    fn drop(&mut self) {
        let still_open = { *self.shared.phase.lock() == Phase::Open };
        if still_open {
            if let Err(e) = self.close() {
                warn!("closing write-ahead log {} on drop: {}", self.path, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::NULL_CRYPTO_NAME;
    use crate::sink::BlockReader;
    use hashbrown::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// In-memory block store that counts durable syncs.
    struct MemoryStore {
        files: Mutex<HashMap<String, Arc<Mutex<Vec<u8>>>>>,
        syncs: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
        fail_sync: Arc<AtomicBool>,
        fail_append: Arc<AtomicBool>,
    }

    impl MemoryStore {
        fn new() -> Self {
            Self {
                files: Mutex::new(HashMap::new()),
                syncs: Arc::new(AtomicUsize::new(0)),
                closes: Arc::new(AtomicUsize::new(0)),
                fail_sync: Arc::new(AtomicBool::new(false)),
                fail_append: Arc::new(AtomicBool::new(false)),
            }
        }

        fn only_path(&self) -> String {
            let files = self.files.lock();
            assert_eq!(files.len(), 1);
            files.keys().next().unwrap().clone()
        }
    }

    impl BlockStore for MemoryStore {
        fn create(
            &self,
            path: &str,
            _replication: u16,
            _block_size: u64,
            _sync_mode: bool,
        ) -> WalResult<Arc<dyn BlockSink>> {
            let data = Arc::new(Mutex::new(Vec::new()));
            self.files.lock().insert(path.to_string(), data.clone());
            Ok(Arc::new(MemorySink {
                data,
                syncs: self.syncs.clone(),
                closes: self.closes.clone(),
                fail_sync: self.fail_sync.clone(),
                fail_append: self.fail_append.clone(),
                closed: AtomicBool::new(false),
            }))
        }

        fn open_for_read(&self, path: &str) -> WalResult<Box<dyn BlockReader>> {
            let files = self.files.lock();
            let data = files.get(path).expect("no such file").lock().clone();
            Ok(Box::new(MemoryReader { data }))
        }

        fn default_replication(&self, _path: &str) -> u16 {
            3
        }

        fn default_block_size(&self) -> u64 {
            64 * 1024 * 1024
        }
    }

    struct MemorySink {
        data: Arc<Mutex<Vec<u8>>>,
        syncs: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
        fail_sync: Arc<AtomicBool>,
        fail_append: Arc<AtomicBool>,
        closed: AtomicBool,
    }

    impl BlockSink for MemorySink {
        fn append(&self, buf: &[u8]) -> WalResult<()> {
            if self.closed.load(Ordering::Acquire) {
                return Err(WalError::LogClosed);
            }
            if self.fail_append.load(Ordering::Acquire) {
                return Err(WalError::Io {
                    path: None,
                    kind: std::io::ErrorKind::Other,
                    message: "injected append failure".to_string(),
                });
            }
            self.data.lock().extend_from_slice(buf);
            Ok(())
        }

        fn flush_to_peers(&self) -> WalResult<()> {
            Ok(())
        }

        fn sync_to_disk(&self) -> WalResult<()> {
            if self.fail_sync.load(Ordering::Acquire) {
                return Err(WalError::Io {
                    path: None,
                    kind: std::io::ErrorKind::Other,
                    message: "injected sync failure".to_string(),
                });
            }
            self.syncs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn supports_sync_to_disk(&self) -> bool {
            true
        }

        fn close(&self) -> WalResult<()> {
            if !self.closed.swap(true, Ordering::AcqRel) {
                self.closes.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    struct MemoryReader {
        data: Vec<u8>,
    }

    impl BlockReader for MemoryReader {
        fn read_at(&self, offset: u64, buf: &mut [u8]) -> WalResult<usize> {
            let offset = offset as usize;
            if offset >= self.data.len() {
                return Ok(0);
            }
            let n = (self.data.len() - offset).min(buf.len());
            buf[..n].copy_from_slice(&self.data[offset..offset + n]);
            Ok(n)
        }

        fn len(&self) -> u64 {
            self.data.len() as u64
        }
    }

    struct FirstVolume;

    impl VolumeChooser for FirstVolume {
        fn choose(&self, candidates: &[String]) -> String {
            candidates[0].clone()
        }
    }

    fn test_config() -> WalConfig {
        WalConfig {
            volumes: vec!["vol1".to_string(), "vol2".to_string()],
            crypto_module: NULL_CRYPTO_NAME.to_string(),
            ..WalConfig::default()
        }
    }

    fn open_writer(store: &MemoryStore) -> WalWriter {
        let registry = CryptoRegistry::new();
        WalWriter::open(store, &FirstVolume, &registry, &test_config(), "host1:9997").unwrap()
    }

    fn read_records(store: &MemoryStore) -> Vec<(LogKey, LogValue)> {
        let registry = CryptoRegistry::new();
        let mut reader =
            crate::reader::open_for_read(store, &registry, &store.only_path()).unwrap();
        let mut records = Vec::new();
        while let Some(record) = reader.next_record().unwrap() {
            records.push(record);
        }
        records
    }

    #[test]
    fn test_open_places_file_and_syncs() {
        let store = MemoryStore::new();
        let writer = open_writer(&store);

        let path = store.only_path();
        assert!(path.starts_with("vol1/host1+9997/"));
        assert!(path.ends_with(writer.session_id()));
        assert_eq!(store.syncs.load(Ordering::SeqCst), 1);

        writer.close().unwrap();
    }

    #[test]
    fn test_open_then_close_yields_one_open_record() {
        let store = MemoryStore::new();
        let writer = open_writer(&store);
        let session = writer.session_id().to_string();
        writer.close().unwrap();

        let records = read_records(&store);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0.event, codec::LogEvent::Open);
        assert_eq!(records[0].0.session_id.as_deref(), Some(session.as_str()));
    }

    #[test]
    fn test_log_many_is_durable_when_handle_resolves() {
        let store = MemoryStore::new();
        let writer = open_writer(&store);

        let handle = writer
            .log_many(vec![MutationBatch {
                tablet_id: 3,
                sequence: 1,
                mutations: vec![Mutation::new(&b"r"[..]).put("cf", "cq", b"v")],
            }])
            .unwrap();
        handle.wait().unwrap();

        assert!(store.syncs.load(Ordering::SeqCst) >= 2); // open + batch
        writer.close().unwrap();

        let records = read_records(&store);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].0.event, codec::LogEvent::ManyMutations);
        assert_eq!(records[1].1.mutations[0].row, b"r");
    }

    #[test]
    fn test_group_commit_amortizes_syncs() {
        let store = MemoryStore::new();
        let writer = Arc::new(open_writer(&store));
        let producers = 32;

        let mut threads = Vec::new();
        for i in 0..producers {
            let writer = Arc::clone(&writer);
            threads.push(thread::spawn(move || {
                let handle = writer
                    .log_many(vec![MutationBatch {
                        tablet_id: 3,
                        sequence: i as i64,
                        mutations: vec![Mutation::new(&b"r"[..]).put("cf", "cq", b"v")],
                    }])
                    .unwrap();
                handle.wait().unwrap();
            }));
        }
        for t in threads {
            t.join().unwrap();
        }

        // One sync for open, then at most one per producer; batching should
        // usually do far better but may not on an unloaded machine.
        let syncs = store.syncs.load(Ordering::SeqCst);
        assert!(syncs <= producers + 1, "{} syncs for {} producers", syncs, producers);

        writer.close().unwrap();
        let records = read_records(&store);
        assert_eq!(records.len(), producers + 1); // OPEN + one per producer
    }

    #[test]
    fn test_close_races_with_producers() {
        let store = MemoryStore::new();
        let writer = Arc::new(open_writer(&store));

        let mut threads = Vec::new();
        for _ in 0..4 {
            let writer = Arc::clone(&writer);
            threads.push(thread::spawn(move || {
                let mut seq = 0i64;
                loop {
                    seq += 1;
                    match writer.log_many(vec![MutationBatch {
                        tablet_id: 1,
                        sequence: seq,
                        mutations: vec![Mutation::new(&b"r"[..]).put("cf", "cq", b"v")],
                    }]) {
                        Ok(handle) => match handle.wait() {
                            Ok(()) => {}
                            Err(WalError::LogClosed) => break,
                            Err(e) => panic!("unexpected handle outcome: {}", e),
                        },
                        Err(WalError::LogClosed) => break,
                        Err(e) => panic!("unexpected append error: {}", e),
                    }
                }
            }));
        }

        thread::sleep(Duration::from_millis(50));
        writer.close().unwrap();

        // Every producer observed either success or log-closed; no hangs
        for t in threads {
            t.join().unwrap();
        }

        assert!(matches!(
            writer.log_many(vec![]),
            Err(WalError::LogClosed)
        ));
        assert!(matches!(writer.close(), Err(WalError::LogClosed)));
    }

    #[test]
    fn test_define_tablet_synced_before_return() {
        let store = MemoryStore::new();
        let writer = open_writer(&store);

        let before = store.syncs.load(Ordering::SeqCst);
        writer
            .define_tablet(1, 7, TabletExtent::new("t1", None, None))
            .unwrap();
        assert!(store.syncs.load(Ordering::SeqCst) > before);

        writer.close().unwrap();
        let records = read_records(&store);
        assert_eq!(records[1].0.event, codec::LogEvent::DefineTablet);
        assert_eq!(records[1].0.extent.as_ref().unwrap().table_id, "t1");
    }

    #[test]
    fn test_compaction_handles_resolve() {
        let store = MemoryStore::new();
        let writer = open_writer(&store);

        let start = writer.compaction_start(5, 7, "vol1/t7/f0001.rf").unwrap();
        let finish = writer.compaction_finish(6, 7).unwrap();
        start.wait().unwrap();
        finish.wait().unwrap();

        writer.close().unwrap();
        let records = read_records(&store);
        assert_eq!(records[1].0.filename.as_deref(), Some("vol1/t7/f0001.rf"));
        assert_eq!(records[2].0.event, codec::LogEvent::CompactionFinish);
    }

    #[test]
    fn test_sync_failure_lands_on_every_handle_without_poisoning() {
        let store = MemoryStore::new();
        let writer = open_writer(&store);

        store.fail_sync.store(true, Ordering::Release);
        let doomed = writer
            .log_many(vec![MutationBatch {
                tablet_id: 1,
                sequence: 1,
                mutations: vec![Mutation::new(&b"r"[..]).put("cf", "cq", b"v")],
            }])
            .unwrap();
        assert!(matches!(doomed.wait(), Err(WalError::Io { .. })));

        // Pipeline keeps going once the sink recovers
        store.fail_sync.store(false, Ordering::Release);
        let healthy = writer
            .log_many(vec![MutationBatch {
                tablet_id: 1,
                sequence: 2,
                mutations: vec![Mutation::new(&b"r2"[..]).put("cf", "cq", b"v")],
            }])
            .unwrap();
        healthy.wait().unwrap();

        writer.close().unwrap();
    }

    #[test]
    fn test_failed_open_closes_partial_file() {
        let store = MemoryStore::new();
        store.fail_append.store(true, Ordering::Release);

        let registry = CryptoRegistry::new();
        let result =
            WalWriter::open(&store, &FirstVolume, &registry, &test_config(), "host1:9997");
        assert!(result.is_err());

        // The partial file was closed before the error propagated
        assert_eq!(store.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_crypto_module_rejected_before_file_creation() {
        let store = MemoryStore::new();
        let registry = CryptoRegistry::new();
        let mut config = test_config();
        config.crypto_module = "tessera.crypto.Missing".to_string();

        let result = WalWriter::open(&store, &FirstVolume, &registry, &config, "host1:9997");
        assert!(matches!(result, Err(WalError::UnknownCryptoModule { .. })));
        assert!(store.files.lock().is_empty());
    }

    #[test]
    fn test_producer_order_matches_file_order() {
        let store = MemoryStore::new();
        let writer = open_writer(&store);

        // Sequential producers: completion of one happens-before the next
        for seq in 1..=8i64 {
            let handle = writer
                .log_many(vec![MutationBatch {
                    tablet_id: 1,
                    sequence: seq,
                    mutations: vec![Mutation::new(format!("r{}", seq).into_bytes())],
                }])
                .unwrap();
            handle.wait().unwrap();
        }

        writer.close().unwrap();
        let records = read_records(&store);
        let sequences: Vec<i64> = records[1..].iter().map(|(k, _)| k.sequence).collect();
        assert_eq!(sequences, (1..=8).collect::<Vec<_>>());
    }
}
