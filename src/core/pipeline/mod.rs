//! Background pipelines: worker pools and per-submission batches.
//!
//! Each pipeline owns a fixed [`WorkerPool`]. Every submission becomes a
//! [`Batch`] with its own event channel, so two batches never share a
//! progress counter. Completion order across entities is unspecified.
//!
//! # Events
//!
//! For each entity a worker sends one [`PipelineEvent::ItemCompleted`]
//! followed by [`PipelineEvent::Progress`]. The last item also sends
//! [`PipelineEvent::BatchDone`].

pub mod metadata;
pub mod thumbnail;

pub use metadata::MetadataPipeline;
pub use thumbnail::{CacheInfo, ThumbnailOutcome, ThumbnailPipeline};

use crate::core::entity::MediaEntity;
use crate::error::{Error, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, trace};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How long [`WorkerPool::shutdown`] waits for in-flight jobs by default.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed set of named threads fed from one unbounded queue.
pub struct WorkerPool {
    name: &'static str,
    sender: Mutex<Option<Sender<Job>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    stopping: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(name: &'static str, threads: usize) -> Result<Self> {
        let (tx, rx) = unbounded::<Job>();
        let stopping = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::new();

        for worker_id in 0..threads.max(1) {
            let rx = rx.clone();
            let stopping = Arc::clone(&stopping);
            let handle = thread::Builder::new()
                .name(format!("stockshot-{}-{}", name, worker_id))
                .spawn(move || {
                    trace!("{} worker {} started", name, worker_id);
                    while let Ok(job) = rx.recv() {
                        // queued work is dropped once shutdown starts
                        if stopping.load(Ordering::Relaxed) {
                            continue;
                        }
                        job();
                    }
                    trace!("{} worker {} stopped", name, worker_id);
                })
                .map_err(|e| Error::Worker(format!("cannot spawn {} worker: {}", name, e)))?;
            handles.push(handle);
        }

        debug!("{} pool: {} threads", name, handles.len());
        Ok(Self { name, sender: Mutex::new(Some(tx)), handles: Mutex::new(handles), stopping })
    }

    /// Queue `f`; never blocks.
    pub fn execute<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        let Some(sender) = guard.as_ref() else {
            return Err(Error::Worker(format!("{} pool is shut down", self.name)));
        };
        sender.send(Box::new(f)).map_err(|e| Error::Worker(format!("{} queue closed: {}", self.name, e)))
    }

    #[must_use]
    pub fn threads(&self) -> usize {
        self.handles.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Stop accepting work, drop what is still queued and wait up to
    /// `grace` for running jobs. Returns whether every thread finished.
    pub fn shutdown(&self, grace: Duration) -> bool {
        self.stopping.store(true, Ordering::SeqCst);
        self.sender.lock().unwrap_or_else(|e| e.into_inner()).take();

        let handles = std::mem::take(&mut *self.handles.lock().unwrap_or_else(|e| e.into_inner()));
        let count = handles.len();
        let deadline = Instant::now() + grace;
        for handle in handles {
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    info!("{} pool: shutdown grace elapsed, leaving workers behind", self.name);
                    return false;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let _ = handle.join();
        }
        debug!("{} pool: {} workers stopped", self.name, count);
        true
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.sender.lock().unwrap_or_else(|e| e.into_inner()).is_some() {
            self.shutdown(SHUTDOWN_GRACE);
        }
    }
}

/// Notification from a running batch.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent<R> {
    Progress { done: usize, total: usize },
    /// One entity finished; the error is rendered to text.
    ItemCompleted { entity: PathBuf, outcome: std::result::Result<R, String> },
    BatchDone { total: usize, succeeded: usize, failed: usize },
}

/// Collected results of a finished batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport<R> {
    pub total: usize,
    pub succeeded: Vec<(PathBuf, R)>,
    pub failed: Vec<(PathBuf, String)>,
}

impl<R> BatchReport<R> {
    /// Whether every submitted entity reported back.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.succeeded.len() + self.failed.len() == self.total
    }
}

/// Handle to one submission.
pub struct Batch<R> {
    id: u64,
    total: usize,
    events: Receiver<PipelineEvent<R>>,
}

impl<R> std::fmt::Debug for Batch<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch").field("id", &self.id).field("total", &self.total).finish()
    }
}

static NEXT_BATCH: AtomicU64 = AtomicU64::new(1);

impl<R> Batch<R> {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }

    /// Raw event stream; ends when the batch is done or abandoned.
    #[must_use]
    pub fn events(&self) -> &Receiver<PipelineEvent<R>> {
        &self.events
    }

    /// Block until every item has reported, or until the workers dropped
    /// the remaining items (shutdown).
    pub fn wait(self) -> BatchReport<R> {
        self.wait_with(|_| {})
    }

    /// [`Batch::wait`], passing each event to `on_event` first.
    pub fn wait_with(self, mut on_event: impl FnMut(&PipelineEvent<R>)) -> BatchReport<R> {
        let mut report = BatchReport { total: self.total, succeeded: Vec::new(), failed: Vec::new() };
        while let Ok(event) = self.events.recv() {
            on_event(&event);
            match event {
                PipelineEvent::ItemCompleted { entity, outcome: Ok(r) } => report.succeeded.push((entity, r)),
                PipelineEvent::ItemCompleted { entity, outcome: Err(e) } => report.failed.push((entity, e)),
                PipelineEvent::Progress { .. } => {}
                PipelineEvent::BatchDone { .. } => break,
            }
        }
        report
    }
}

/// Per-batch counters shared by the jobs of one submission.
struct Tracker<R> {
    total: usize,
    /// Held while sending progress so events stay in order
    done: Mutex<usize>,
    succeeded: AtomicUsize,
    events: Sender<PipelineEvent<R>>,
}

impl<R> Tracker<R> {
    fn finish(&self, entity: PathBuf, outcome: Result<R>) {
        if outcome.is_ok() {
            self.succeeded.fetch_add(1, Ordering::SeqCst);
        }
        let outcome = outcome.map_err(|e| e.to_string());
        // a dropped receiver only means nobody is listening
        let _ = self.events.send(PipelineEvent::ItemCompleted { entity, outcome });
        let mut done = self.done.lock().unwrap_or_else(|e| e.into_inner());
        *done += 1;
        let _ = self.events.send(PipelineEvent::Progress { done: *done, total: self.total });
        if *done == self.total {
            let succeeded = self.succeeded.load(Ordering::SeqCst);
            let _ = self.events.send(PipelineEvent::BatchDone {
                total: self.total,
                succeeded,
                failed: self.total - succeeded,
            });
        }
    }
}

/// Run `work` for each entity on `pool`, reporting through a new batch.
pub(crate) fn submit<R, W>(pool: &WorkerPool, entities: Vec<MediaEntity>, work: W) -> Result<Batch<R>>
where
    R: Send + 'static,
    W: Fn(&MediaEntity) -> Result<R> + Send + Sync + 'static,
{
    let (tx, rx) = unbounded();
    let total = entities.len();
    let batch = Batch { id: NEXT_BATCH.fetch_add(1, Ordering::Relaxed), total, events: rx };
    if total == 0 {
        let _ = tx.send(PipelineEvent::BatchDone { total: 0, succeeded: 0, failed: 0 });
        return Ok(batch);
    }

    let tracker = Arc::new(Tracker { total, done: Mutex::new(0), succeeded: AtomicUsize::new(0), events: tx });
    let work = Arc::new(work);
    for entity in entities {
        let tracker = Arc::clone(&tracker);
        let work = Arc::clone(&work);
        pool.execute(move || {
            let outcome = work(&entity);
            if let Err(e) = &outcome {
                error!("{} failed: {}", entity.path.display(), e);
            }
            tracker.finish(entity.path, outcome);
        })?;
    }
    debug!("Batch {} queued: {} entities", batch.id, total);
    Ok(batch)
}
