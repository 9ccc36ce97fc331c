use super::{Batch, IndexLayout};
use crate::dataset::Dataset;
use crate::error::DataError;
use crate::feature_set::FeatureScheme;
use crossbeam::channel::{bounded, select, unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error("all {0} batch buffers are held by the consumer, release one first")]
    BuffersExhausted(usize),

    #[error("epoch {0} still has batches to deliver")]
    EpochInProgress(u64),

    #[error("the loader has been shut down")]
    ShutDown,

    #[error("a worker thread stopped unexpectedly")]
    WorkerLost,
}

#[derive(Clone, Debug)]
pub struct LoaderConfig {
    pub path: PathBuf,
    pub scheme: FeatureScheme,
    pub batch_size: usize,
    pub threads: usize,
    /// Batch buffers in the ring, bounds how far workers run ahead
    pub prefetch: usize,
    pub shuffle: bool,
    /// Seed of the epoch permutations, OS entropy when unset
    pub seed: Option<u64>,
    pub layout: IndexLayout,
    /// Largest dataset whose read order is permuted in memory
    pub max_index_records: u64,
}

impl LoaderConfig {
    pub fn new(path: impl Into<PathBuf>, scheme: FeatureScheme, batch_size: usize) -> Self {
        LoaderConfig {
            path: path.into(),
            scheme,
            batch_size,
            threads: 4,
            prefetch: 16,
            shuffle: false,
            seed: None,
            layout: IndexLayout::Pairs,
            max_index_records: 1 << 31,
        }
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn layout(mut self, layout: IndexLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn max_index_records(mut self, max_index_records: u64) -> Self {
        self.max_index_records = max_index_records;
        self
    }

    fn validate(&self) -> Result<(), DataError> {
        for (name, value) in [
            ("batch_size", self.batch_size),
            ("threads", self.threads),
            ("prefetch", self.prefetch),
        ] {
            if value == 0 {
                return Err(DataError::Config(format!("{} must be at least 1", name)));
            }
        }
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LoaderState {
    /// No epoch started yet
    Idle,
    /// Workers are filling batches of the current epoch
    Prefetching,
    /// Every batch of the current epoch has been delivered
    EndOfEpoch,
    /// A record failed to decode, the epoch was cancelled
    Failed,
    ShutDown,
}

pub enum NextBatch {
    Batch(BatchGuard),
    EndOfEpoch,
}

/// A delivered batch. Its buffer goes back to the ring on release or drop.
pub struct BatchGuard {
    batch: Option<Box<Batch>>,
    window: u64,
    free: Sender<Box<Batch>>,
    held: Arc<AtomicUsize>,
}

impl BatchGuard {
    /// Position of the batch within its epoch
    pub fn window(&self) -> u64 {
        self.window
    }

    pub fn release(self) {}
}

impl Deref for BatchGuard {
    type Target = Batch;

    fn deref(&self) -> &Batch {
        // only taken in drop
        self.batch.as_deref().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        if let Some(batch) = self.batch.take() {
            self.held.fetch_sub(1, Ordering::SeqCst);
            // the ring may be gone after a shutdown
            let _ = self.free.send(batch);
        }
    }
}

/// Windows of the current epoch, claimed in order by workers holding a buffer
struct EpochPlan {
    generation: u64,
    order: Option<Arc<Vec<u64>>>,
    next_window: u64,
    num_windows: u64,
}

struct Shared {
    dataset: Dataset,
    scheme: FeatureScheme,
    batch_size: usize,
    plan: Mutex<EpochPlan>,
    work_ready: Condvar,
    cancelled: AtomicBool,
}

struct Filled {
    generation: u64,
    window: u64,
    batch: Box<Batch>,
    outcome: Result<(), DataError>,
}

/// Decodes a dataset into batches on a pool of worker threads.
///
/// A fixed ring of `prefetch` buffers circulates between the free channel,
/// the workers, the reorder queue and the consumer. Workers take a free
/// buffer before claiming the next window, so windows are claimed in order
/// and the window the consumer waits for is always being worked on.
/// Batches are delivered in window order.
pub struct BatchLoader {
    shared: Arc<Shared>,
    config: LoaderConfig,
    state: LoaderState,

    epoch: u64,
    generation: u64,
    num_windows: u64,
    next_deliver: u64,
    order: Option<Arc<Vec<u64>>>,
    warned_no_index: bool,

    free_tx: Sender<Box<Batch>>,
    done_rx: Receiver<Filled>,
    stop_tx: Option<Sender<()>>,
    pending: BTreeMap<u64, Filled>,
    held: Arc<AtomicUsize>,
    workers: Vec<JoinHandle<()>>,
}

const WORKER_POLL: Duration = Duration::from_millis(100);

impl BatchLoader {
    pub fn open(config: LoaderConfig) -> Result<BatchLoader, LoaderError> {
        config.validate()?;
        let dataset = Dataset::open(&config.path)?;
        let num_windows = dataset.len().div_ceil(config.batch_size as u64);

        info!(
            "Loading {} records from {} as {} batches of {} ({} threads, {} buffers)",
            dataset.len(),
            config.path.display(),
            num_windows,
            config.batch_size,
            config.threads,
            config.prefetch
        );

        let shared = Arc::new(Shared {
            dataset,
            scheme: config.scheme,
            batch_size: config.batch_size,
            plan: Mutex::new(EpochPlan {
                generation: 0,
                order: None,
                next_window: 0,
                num_windows: 0,
            }),
            work_ready: Condvar::new(),
            cancelled: AtomicBool::new(false),
        });

        let (free_tx, free_rx) = bounded(config.prefetch);
        for _ in 0..config.prefetch {
            let batch = Batch::for_scheme(&config.scheme, config.layout, config.batch_size);
            // capacity matches the number of buffers
            let _ = free_tx.send(Box::new(batch));
        }
        let (done_tx, done_rx) = unbounded();
        let (stop_tx, stop_rx) = bounded::<()>(0);

        let mut workers = Vec::with_capacity(config.threads);
        for i in 0..config.threads {
            let shared = shared.clone();
            let free_rx = free_rx.clone();
            let done_tx = done_tx.clone();
            let stop_rx = stop_rx.clone();

            let handle = std::thread::Builder::new()
                .name(format!("batch-worker-{}", i))
                .spawn(move || worker(shared, free_rx, done_tx, stop_rx))
                .map_err(|e| DataError::resource("spawn a worker for", &config.path, e))?;
            workers.push(handle);
        }

        Ok(BatchLoader {
            shared,
            config,
            state: LoaderState::Idle,
            epoch: 0,
            generation: 0,
            num_windows,
            next_deliver: 0,
            order: None,
            warned_no_index: false,
            free_tx,
            done_rx,
            stop_tx: Some(stop_tx),
            pending: BTreeMap::new(),
            held: Arc::new(AtomicUsize::new(0)),
            workers,
        })
    }

    pub fn state(&self) -> LoaderState {
        self.state
    }

    /// Index of the current epoch, counting from 0
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn num_records(&self) -> u64 {
        self.shared.dataset.len()
    }

    /// Batches per epoch, the last one may be partial
    pub fn num_batches(&self) -> u64 {
        self.num_windows
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Blocks until the next batch of the epoch is ready.
    /// The first call starts epoch 0 if [`BatchLoader::begin_epoch`] was not called.
    pub fn take_next_batch(&mut self) -> Result<NextBatch, LoaderError> {
        match self.state {
            LoaderState::ShutDown => return Err(LoaderError::ShutDown),
            LoaderState::Idle => self.start_epoch(false),
            LoaderState::EndOfEpoch | LoaderState::Failed => return Ok(NextBatch::EndOfEpoch),
            LoaderState::Prefetching => {}
        }

        if self.next_deliver == self.num_windows {
            info!("End of epoch {}", self.epoch);
            self.state = LoaderState::EndOfEpoch;
            return Ok(NextBatch::EndOfEpoch);
        }

        let held = self.held.load(Ordering::SeqCst);
        if held >= self.config.prefetch {
            return Err(LoaderError::BuffersExhausted(held));
        }

        loop {
            if let Some(filled) = self.pending.remove(&self.next_deliver) {
                return self.deliver(filled);
            }

            match self.done_rx.recv_timeout(WORKER_POLL) {
                Ok(filled) if filled.generation == self.generation => {
                    self.pending.insert(filled.window, filled);
                }
                Ok(stale) => self.recycle(stale.batch),
                Err(RecvTimeoutError::Timeout) => {
                    if self.workers.iter().any(|handle| handle.is_finished()) {
                        return Err(self.fail(LoaderError::WorkerLost));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(self.fail(LoaderError::WorkerLost));
                }
            }
        }
    }

    /// Starts the next epoch, drawing a new permutation if `reshuffle` is set
    /// and the loader shuffles. Fails while batches of the current epoch remain.
    pub fn begin_epoch(&mut self, reshuffle: bool) -> Result<(), LoaderError> {
        match self.state {
            LoaderState::ShutDown => return Err(LoaderError::ShutDown),
            LoaderState::Prefetching if self.next_deliver < self.num_windows => {
                return Err(LoaderError::EpochInProgress(self.epoch))
            }
            LoaderState::Idle => {}
            _ => self.epoch += 1,
        }
        self.start_epoch(reshuffle);
        Ok(())
    }

    fn start_epoch(&mut self, reshuffle: bool) {
        for (_, filled) in std::mem::take(&mut self.pending) {
            self.recycle(filled.batch);
        }

        let order = self.epoch_order(reshuffle);
        self.generation += 1;
        self.next_deliver = 0;
        {
            let mut plan = self.shared.plan.lock();
            plan.generation = self.generation;
            plan.order = order;
            plan.next_window = 0;
            plan.num_windows = self.num_windows;
        }
        self.shared.work_ready.notify_all();

        debug!("epoch {} started (generation {})", self.epoch, self.generation);
        self.state = LoaderState::Prefetching;
    }

    fn epoch_order(&mut self, reshuffle: bool) -> Option<Arc<Vec<u64>>> {
        if !self.config.shuffle {
            return None;
        }

        let len = self.shared.dataset.len();
        if len > self.config.max_index_records {
            if !self.warned_no_index {
                warn!(
                    "{} records do not fit an in-memory index (max {}), reading in file order",
                    len, self.config.max_index_records
                );
                self.warned_no_index = true;
            }
            return None;
        }

        if self.order.is_none() || reshuffle {
            let mut rng = match self.config.seed {
                Some(seed) => ChaCha8Rng::seed_from_u64(seed.wrapping_add(self.epoch)),
                None => ChaCha8Rng::from_entropy(),
            };
            let mut order: Vec<u64> = (0..len).collect();
            order.shuffle(&mut rng);
            self.order = Some(Arc::new(order));
        }
        self.order.clone()
    }

    fn deliver(&mut self, filled: Filled) -> Result<NextBatch, LoaderError> {
        match filled.outcome {
            Ok(()) => {
                self.next_deliver += 1;
                self.held.fetch_add(1, Ordering::SeqCst);
                Ok(NextBatch::Batch(BatchGuard {
                    batch: Some(filled.batch),
                    window: filled.window,
                    free: self.free_tx.clone(),
                    held: self.held.clone(),
                }))
            }
            Err(err) => {
                self.recycle(filled.batch);
                warn!("epoch {} failed: {}", self.epoch, err);
                Err(self.fail(LoaderError::Data(err)))
            }
        }
    }

    /// Cancels the windows left in the epoch and enters the failed state
    fn fail(&mut self, err: LoaderError) -> LoaderError {
        {
            let mut plan = self.shared.plan.lock();
            plan.next_window = plan.num_windows;
        }
        for (_, filled) in std::mem::take(&mut self.pending) {
            self.recycle(filled.batch);
        }
        self.state = LoaderState::Failed;
        err
    }

    fn recycle(&self, batch: Box<Batch>) {
        let _ = self.free_tx.send(batch);
    }

    /// Stops and joins the workers. Batches still held stay valid.
    pub fn shutdown(&mut self) -> Result<(), LoaderError> {
        if self.state == LoaderState::ShutDown {
            return Ok(());
        }
        self.state = LoaderState::ShutDown;

        self.shared.cancelled.store(true, Ordering::SeqCst);
        self.stop_tx.take();
        {
            let _plan = self.shared.plan.lock();
            self.shared.work_ready.notify_all();
        }

        let mut lost = false;
        for handle in self.workers.drain(..) {
            lost |= handle.join().is_err();
        }
        self.pending.clear();
        debug!("batch loader shut down");

        if lost {
            Err(LoaderError::WorkerLost)
        } else {
            Ok(())
        }
    }
}

impl Drop for BatchLoader {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

fn worker(
    shared: Arc<Shared>,
    free_rx: Receiver<Box<Batch>>,
    done_tx: Sender<Filled>,
    stop_rx: Receiver<()>,
) {
    debug!("worker started");

    loop {
        // acquire a buffer before claiming a window
        let batch = select! {
            recv(free_rx) -> batch => batch.ok(),
            recv(stop_rx) -> _ => None,
        };
        let Some(mut batch) = batch else {
            break;
        };

        let claim = {
            let mut plan = shared.plan.lock();
            loop {
                if shared.cancelled.load(Ordering::SeqCst) {
                    break None;
                }
                if plan.next_window < plan.num_windows {
                    let window = plan.next_window;
                    plan.next_window += 1;
                    break Some((plan.generation, window, plan.order.clone()));
                }
                shared.work_ready.wait(&mut plan);
            }
        };
        let Some((generation, window, order)) = claim else {
            break;
        };

        let outcome = fill_window(&shared, &mut batch, window, order.as_deref().map(Vec::as_slice));
        if shared.cancelled.load(Ordering::SeqCst) {
            break;
        }

        let filled = Filled {
            generation,
            window,
            batch,
            outcome,
        };
        if done_tx.send(filled).is_err() {
            break;
        }
    }

    debug!("worker finished");
}

/// Decodes the records of one window into the batch
fn fill_window(
    shared: &Shared,
    batch: &mut Batch,
    window: u64,
    order: Option<&[u64]>,
) -> Result<(), DataError> {
    batch.clear();

    let start = window * shared.batch_size as u64;
    let end = (start + shared.batch_size as u64).min(shared.dataset.len());
    for position in start..end {
        let index = match order {
            Some(order) => order[position as usize],
            None => position,
        };
        let record = shared.dataset.get(index)?;
        batch.push(&record, &shared.scheme);

        if position % 1024 == 0 && shared.cancelled.load(Ordering::Relaxed) {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::test_util::write_numbered;
    use crate::error::Location;
    use crate::feature_set::Board768;
    use crate::record::RECORD_SIZE;
    use std::path::Path;

    fn config(path: &Path, batch_size: usize) -> LoaderConfig {
        LoaderConfig::new(path, Board768.into(), batch_size)
            .threads(3)
            .prefetch(4)
    }

    /// Evals of every batch until the end of the epoch
    fn drain_epoch(loader: &mut BatchLoader) -> Vec<Vec<i32>> {
        let mut batches = vec![];
        loop {
            match loader.take_next_batch().unwrap() {
                NextBatch::Batch(batch) => batches.push(stm_evals_to_white(&batch)),
                NextBatch::EndOfEpoch => return batches,
            }
        }
    }

    /// Records are numbered by eval; undo the side to move flip
    fn stm_evals_to_white(batch: &Batch) -> Vec<i32> {
        batch.cp().iter().map(|&cp| (cp as i32).abs()).collect()
    }

    #[test]
    fn test_sequential_epoch_with_partial_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        write_numbered(&path, 0..100);

        let mut loader = BatchLoader::open(config(&path, 32)).unwrap();
        assert_eq!(loader.state(), LoaderState::Idle);
        assert_eq!(loader.num_batches(), 4);

        let batches = drain_epoch(&mut loader);
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![32, 32, 32, 4]);
        assert_eq!(batches.concat(), (0..100).collect::<Vec<i32>>());
        assert_eq!(loader.state(), LoaderState::EndOfEpoch);

        // stays at the end until a new epoch begins
        assert!(matches!(loader.take_next_batch().unwrap(), NextBatch::EndOfEpoch));
        loader.begin_epoch(false).unwrap();
        assert_eq!(loader.epoch(), 1);
        assert_eq!(drain_epoch(&mut loader).concat(), (0..100).collect::<Vec<i32>>());

        loader.shutdown().unwrap();
        assert_eq!(loader.state(), LoaderState::ShutDown);
        assert!(matches!(loader.take_next_batch(), Err(LoaderError::ShutDown)));
    }

    #[test]
    fn test_reshuffle_keeps_the_multiset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        write_numbered(&path, 0..100);

        let mut loader = BatchLoader::open(config(&path, 10).shuffle(true).seed(5)).unwrap();
        let first = drain_epoch(&mut loader).concat();
        loader.begin_epoch(true).unwrap();
        let second = drain_epoch(&mut loader).concat();
        loader.begin_epoch(false).unwrap();
        let third = drain_epoch(&mut loader).concat();

        assert_ne!(first, (0..100).collect::<Vec<i32>>());
        assert_ne!(first, second);
        assert_eq!(second, third);

        let mut sorted = second.clone();
        sorted.sort();
        assert_eq!(sorted, (0..100).collect::<Vec<i32>>());
    }

    #[test]
    fn test_too_large_for_an_index_reads_in_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        write_numbered(&path, 0..50);

        let config = config(&path, 8).shuffle(true).seed(1).max_index_records(10);
        let mut loader = BatchLoader::open(config).unwrap();
        assert_eq!(drain_epoch(&mut loader).concat(), (0..50).collect::<Vec<i32>>());
    }

    #[test]
    fn test_begin_epoch_while_batches_remain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        write_numbered(&path, 0..40);

        let mut loader = BatchLoader::open(config(&path, 8)).unwrap();
        let NextBatch::Batch(batch) = loader.take_next_batch().unwrap() else {
            panic!("expected a batch");
        };
        assert_eq!(batch.window(), 0);
        batch.release();

        assert!(matches!(
            loader.begin_epoch(true),
            Err(LoaderError::EpochInProgress(0))
        ));
    }

    #[test]
    fn test_holding_every_buffer_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        write_numbered(&path, 0..100);

        let mut loader = BatchLoader::open(config(&path, 4).prefetch(2)).unwrap();
        let mut held = vec![];
        for _ in 0..2 {
            match loader.take_next_batch().unwrap() {
                NextBatch::Batch(batch) => held.push(batch),
                NextBatch::EndOfEpoch => panic!("epoch ended early"),
            }
        }
        assert!(matches!(
            loader.take_next_batch(),
            Err(LoaderError::BuffersExhausted(2))
        ));

        held.pop();
        let NextBatch::Batch(batch) = loader.take_next_batch().unwrap() else {
            panic!("expected a batch");
        };
        assert_eq!(batch.window(), 2);
    }

    #[test]
    fn test_decode_error_fails_the_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        write_numbered(&path, 0..64);

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[37 * RECORD_SIZE + 30] = 9; // WDL code of record 37
        std::fs::write(&path, bytes).unwrap();

        let mut loader = BatchLoader::open(config(&path, 16)).unwrap();
        for _ in 0..2 {
            assert!(matches!(loader.take_next_batch().unwrap(), NextBatch::Batch(_)));
        }
        match loader.take_next_batch() {
            Err(LoaderError::Data(err)) => {
                assert_eq!(err.location(), Some(&Location::Record(37)))
            }
            _ => panic!("expected a decode error"),
        }
        assert_eq!(loader.state(), LoaderState::Failed);
        assert!(matches!(loader.take_next_batch().unwrap(), NextBatch::EndOfEpoch));

        // the next epoch starts over and fails at the same record
        loader.begin_epoch(false).unwrap();
        let NextBatch::Batch(batch) = loader.take_next_batch().unwrap() else {
            panic!("expected a batch");
        };
        assert_eq!(batch.window(), 0);
        assert_eq!(stm_evals_to_white(&batch), (0..16).collect::<Vec<i32>>());
    }

    #[test]
    fn test_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        write_numbered(&path, 0..4);

        assert!(matches!(
            BatchLoader::open(config(&path, 0)),
            Err(LoaderError::Data(DataError::Config(_)))
        ));
        assert!(matches!(
            BatchLoader::open(config(&path, 4).threads(0)),
            Err(LoaderError::Data(DataError::Config(_)))
        ));
    }
}
