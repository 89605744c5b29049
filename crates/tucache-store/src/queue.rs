//! Bounded work queue and the background threads that drain it

use crossbeam_channel::{bounded, select, tick, Receiver, Sender, TryRecvError, TrySendError};
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::store::Store;
use crate::unit::UnitRequest;

/// Callback run after a job finishes, on the worker thread
pub type OnDone = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    static BACKGROUND: Cell<bool> = const { Cell::new(false) };
}

/// Mark the current thread as one of the cache's own threads. Enqueueing from
/// such a thread never blocks.
pub(crate) fn mark_background() {
    BACKGROUND.with(|b| b.set(true));
}

fn on_background_thread() -> bool {
    BACKGROUND.with(|b| b.get())
}

/// What a job does with its unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Build the unit if it is missing or stale
    Parse,
    /// Refresh the cached unit in place; never builds one
    Reparse,
}

/// A pending job
pub struct WorkItem {
    pub request: UnitRequest,
    /// Run once the job completed, whether or not it produced a unit. Not
    /// run if the job is discarded before a worker picks it up.
    pub on_done: Option<OnDone>,
    pub(crate) kind: JobKind,
}

impl WorkItem {
    pub fn new(request: UnitRequest) -> Self {
        Self {
            request,
            on_done: None,
            kind: JobKind::Parse,
        }
    }

    pub fn on_done<F>(mut self, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_done = Some(Box::new(callback));
        self
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub(crate) fn with_kind(mut self, kind: JobKind) -> Self {
        self.kind = kind;
        self
    }
}

impl std::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItem")
            .field("request", &self.request)
            .field("kind", &self.kind)
            .field("on_done", &self.on_done.is_some())
            .finish()
    }
}

/// Sending side of the bounded job channel
#[derive(Debug)]
pub(crate) struct WorkQueue {
    sender: Sender<WorkItem>,
}

impl WorkQueue {
    pub(crate) fn bounded(capacity: usize) -> (Self, Receiver<WorkItem>) {
        let (sender, receiver) = bounded(capacity);
        (Self { sender }, receiver)
    }

    /// Queue a job, blocking while the queue is full.
    ///
    /// On the cache's own threads a full queue rejects the job instead, since
    /// the thread that would block may be the only one draining the queue.
    /// A rejected job is handed back.
    pub(crate) fn enqueue(&self, item: WorkItem) -> Result<(), WorkItem> {
        let result = if on_background_thread() {
            self.sender.try_send(item).map_err(|e| match e {
                TrySendError::Full(item) => {
                    warn!(
                        "Work queue full, dropping job for {}",
                        item.request.path.display()
                    );
                    item
                }
                TrySendError::Disconnected(item) => item,
            })
        } else {
            self.sender.send(item).map_err(|e| e.into_inner())
        };

        result.map_err(|item| {
            debug!("Job for {} was not queued", item.request.path.display());
            item
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.sender.len()
    }
}

/// Workers plus the optional refresh ticker.
///
/// Dropping the pool stops every thread. Jobs still in the queue are
/// discarded; jobs already running finish first.
pub(crate) struct WorkerPool {
    shutdown: Option<Sender<()>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub(crate) fn spawn(
        store: Arc<Store>,
        jobs: Receiver<WorkItem>,
        workers: usize,
        refresh_interval: Option<Duration>,
    ) -> std::io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let mut pool = Self {
            shutdown: Some(shutdown_tx),
            handles: Vec::with_capacity(workers + 1),
        };

        for i in 0..workers {
            let store = Arc::clone(&store);
            let jobs = jobs.clone();
            let shutdown = shutdown_rx.clone();
            let handle = thread::Builder::new()
                .name(format!("tucache-worker-{}", i))
                .spawn(move || worker_loop(&store, &jobs, &shutdown))?;
            pool.handles.push(handle);
        }

        if let Some(interval) = refresh_interval {
            let shutdown = shutdown_rx.clone();
            let handle = thread::Builder::new()
                .name("tucache-refresh".into())
                .spawn(move || refresh_loop(&store, interval, &shutdown))?;
            pool.handles.push(handle);
        }

        Ok(pool)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Disconnecting the shutdown channel wakes every thread
        self.shutdown.take();

        let current = thread::current().id();
        for handle in self.handles.drain(..) {
            if handle.thread().id() == current {
                // Dropped from a job callback; the thread exits on its own
                continue;
            }
            if handle.join().is_err() {
                error!("Background thread panicked during shutdown");
            }
        }
    }
}

fn worker_loop(store: &Store, jobs: &Receiver<WorkItem>, shutdown: &Receiver<()>) {
    mark_background();
    loop {
        select! {
            recv(jobs) -> msg => match msg {
                // Queued jobs are discarded once shutdown has started
                Ok(_) if shutting_down(shutdown) => break,
                Ok(item) => run_job(store, item),
                Err(_) => break,
            },
            recv(shutdown) -> _ => break,
        }
    }
    debug!("{} stopped", thread::current().name().unwrap_or("worker"));
}

fn shutting_down(shutdown: &Receiver<()>) -> bool {
    matches!(shutdown.try_recv(), Err(TryRecvError::Disconnected))
}

fn run_job(store: &Store, item: WorkItem) {
    let path = item.request.path.clone();
    if panic::catch_unwind(AssertUnwindSafe(|| store.run(item))).is_err() {
        error!("Job for {} panicked", path.display());
    }
}

fn refresh_loop(store: &Store, interval: Duration, shutdown: &Receiver<()>) {
    mark_background();
    let ticker = tick(interval);
    loop {
        select! {
            recv(ticker) -> _ => {
                let queued = store.refresh_all();
                debug!("Periodic refresh queued {} units", queued);
            }
            recv(shutdown) -> _ => break,
        }
    }
}
