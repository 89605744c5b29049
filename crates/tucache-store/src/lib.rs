//! tucache Store
//!
//! A live cache of parsed translation units keyed by source path, so that
//! repeated completion requests against a file reuse its parse.
//!
//! - A missing unit is parsed synchronously on first access.
//! - Asking for a unit with different options evicts the cached one, queues
//!   a rebuild on the background workers and hands back the stale unit for
//!   that one call.
//! - At most one parse per path is queued or running at any time.
//! - Workers can refresh cached units in place, on request or periodically.
//!
//! ```no_run
//! use tucache_core::config::Config;
//! use tucache_store::{TranslationUnitCache, UnitRequest, UnsavedFiles};
//!
//! let cache = TranslationUnitCache::from_config(&Config::default())?;
//! let request = UnitRequest::new("src/main.c", ["-std=c11", "-Iinclude"]);
//! if let Some(unit) = cache.get_unit(&request, &UnsavedFiles::new()) {
//!     println!("{} diagnostics", unit.lock().diagnostics().len());
//! }
//! # Ok::<(), tucache_core::Error>(())
//! ```

mod completion;
mod orchestrator;
mod queue;
mod store;
mod unit;

pub use completion::translate;
pub use queue::{JobKind, OnDone, WorkItem};
pub use store::CacheStats;
pub use unit::{LockedUnit, UnitHandle, UnitRequest, UnsavedFiles};

use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tucache_core::config::Config;
use tucache_core::{CompleteAtArgs, CompletionResult, Result};
use tucache_parser::{get_engine, ParseEngine};

use crate::queue::{WorkQueue, WorkerPool};
use crate::store::Store;

/// The translation-unit cache.
///
/// Construct one per process and share it by reference (or `Arc`). Dropping
/// it stops the background threads.
pub struct TranslationUnitCache {
    store: Arc<Store>,
    _workers: WorkerPool,
}

impl TranslationUnitCache {
    /// Create a cache around `engine`
    pub fn new(engine: Box<dyn ParseEngine>, config: &Config) -> Result<Self> {
        config.validate()?;
        let (queue, jobs) = WorkQueue::bounded(config.cache.queue_len);
        let store = Arc::new(Store::new(engine, config.parser.parse_flags(), queue));
        let workers = WorkerPool::spawn(
            Arc::clone(&store),
            jobs,
            config.cache.workers,
            config.cache.refresh_interval(),
        )?;

        info!(
            "Translation unit cache ready ({} engine, {} workers, queue of {})",
            store.engine.name(),
            config.cache.workers,
            config.cache.queue_len
        );
        Ok(Self {
            store,
            _workers: workers,
        })
    }

    /// Create a cache with the engine selected by the configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let engine = get_engine(&config.parser)?;
        Self::new(engine, config)
    }

    /// Get the unit for a request, building it on first access.
    ///
    /// Returns `None` when the parse fails or another job for the path is
    /// under way; that job builds this request before it finishes. If the
    /// cached unit was built with other options it is evicted, a rebuild is
    /// queued and the stale unit is returned.
    ///
    /// Called from a job callback while the queue is full, the rebuild is
    /// dropped with a warning. The entry stays evicted, so the next call
    /// parses synchronously.
    ///
    /// `unsaved` is accepted but not honored.
    pub fn get_unit(
        &self,
        request: &UnitRequest,
        unsaved: &UnsavedFiles,
    ) -> Option<Arc<UnitHandle>> {
        self.store.get_unit(request, unsaved)
    }

    /// Complete at a cursor position in a saved file
    pub fn complete_at(&self, args: &CompleteAtArgs) -> Result<CompletionResult> {
        self.store.complete_at(args)
    }

    /// Queue a background parse, unless the path is cached or already being
    /// parsed. A request for a path that is being parsed is built by the
    /// running job once it is done. Blocks while the queue is full. Returns
    /// whether a new job was queued.
    pub fn add_ex(&self, item: WorkItem) -> bool {
        self.store.add_ex(item)
    }

    /// Queue a background refresh of the path's cached unit. Nothing is
    /// queued for a path without a unit.
    pub fn add_reparse(&self, item: WorkItem) -> bool {
        self.store.add_reparse(item)
    }

    /// Queue a refresh of every cached unit; returns how many were queued
    pub fn refresh_all(&self) -> usize {
        self.store.refresh_all()
    }

    /// The cached unit for `path`, without building or invalidating anything
    pub fn peek(&self, path: &Path) -> Option<Arc<UnitHandle>> {
        self.store.peek(path)
    }

    /// Whether a parse of `path` is queued or running
    pub fn is_parsing(&self, path: &Path) -> bool {
        self.store.is_parsing(path)
    }

    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }

    pub fn engine_name(&self) -> &str {
        self.store.engine.name()
    }

    /// In-memory buffers are not supported; completion needs saved files
    pub fn supports_unsaved_files(&self) -> bool {
        false
    }
}

impl std::fmt::Debug for TranslationUnitCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationUnitCache")
            .field("engine", &self.engine_name())
            .field("stats", &self.stats())
            .finish()
    }
}
