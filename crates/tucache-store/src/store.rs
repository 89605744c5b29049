//! The path -> unit map and the decision whether to reuse, build or rebuild

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use tucache_core::ParseFlags;
use tucache_parser::ParseEngine;

use crate::queue::{WorkItem, WorkQueue};
use crate::unit::{UnitHandle, UnitRequest, UnsavedFiles};

/// Guarded by the store lock
#[derive(Default)]
pub(crate) struct StoreState {
    pub(crate) units: HashMap<PathBuf, Arc<UnitHandle>>,
    /// Paths with a parse queued or running
    pub(crate) parsing: HashSet<PathBuf>,
    /// Latest request that arrived while the path's marker was held. The
    /// marker owner builds it before letting go of the marker.
    pub(crate) pending: HashMap<PathBuf, UnitRequest>,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) parses: AtomicU64,
    pub(crate) reparses: AtomicU64,
    pub(crate) invalidations: AtomicU64,
    pub(crate) failures: AtomicU64,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Units currently cached
    pub units: usize,
    /// Paths with a parse queued or running
    pub parsing: usize,
    /// Jobs waiting in the queue
    pub queued: usize,
    /// Engine parse calls
    pub parses: u64,
    /// In-place refreshes
    pub reparses: u64,
    /// Entries evicted because their options changed
    pub invalidations: u64,
    /// Failed parses and refreshes
    pub failures: u64,
}

pub(crate) struct Store {
    pub(crate) engine: Box<dyn ParseEngine>,
    pub(crate) flags: ParseFlags,
    pub(crate) state: Mutex<StoreState>,
    pub(crate) queue: WorkQueue,
    pub(crate) counters: Counters,
}

impl Store {
    pub(crate) fn new(engine: Box<dyn ParseEngine>, flags: ParseFlags, queue: WorkQueue) -> Self {
        Self {
            engine,
            flags,
            state: Mutex::new(StoreState::default()),
            queue,
            counters: Counters::default(),
        }
    }

    /// Look up the unit for a request, building it on first access.
    ///
    /// - Missing: parsed synchronously, outside the store lock. If a job for
    ///   the path is already under way the result is `None` and the request
    ///   is left for that job to build; query again once it finished.
    /// - Built with other options: evicted, a rebuild is queued and the stale
    ///   handle is returned for this one call.
    /// - Otherwise the cached handle is returned as is.
    pub(crate) fn get_unit(
        &self,
        request: &UnitRequest,
        unsaved: &UnsavedFiles,
    ) -> Option<Arc<UnitHandle>> {
        if !unsaved.is_empty() {
            warn!(
                "Ignoring {} unsaved files for {}; unsaved contents are not supported",
                unsaved.len(),
                request.path.display()
            );
        }

        let mut state = self.state.lock();
        let Some(existing) = state.units.get(&request.path).cloned() else {
            if !state.parsing.insert(request.path.clone()) {
                debug!("{} is already being parsed", request.path.display());
                state
                    .pending
                    .insert(request.path.clone(), request.clone());
                return None;
            }
            drop(state);

            let mut marker = ParsingMarker::new(self, &request.path);
            let handle = self.compile(request);
            if let Some(next) = marker.settle() {
                // Rebuilt in the background; the queued job takes the marker
                marker.hand_off();
                self.submit(WorkItem::new(next));
            }
            return handle;
        };

        if existing.matches(&request.options, request.options_script.as_deref()) {
            return Some(existing);
        }

        state.units.remove(&request.path);
        drop(state);
        Counters::bump(&self.counters.invalidations);

        debug!(
            "Options change detected. Will recompile {}",
            request.path.display()
        );
        self.add_ex(WorkItem::new(request.clone()));
        Some(existing)
    }

    /// Run the engine and store the result. The caller owns the parsing
    /// marker for the path.
    pub(crate) fn compile(&self, request: &UnitRequest) -> Option<Arc<UnitHandle>> {
        debug!(
            "Will compile file {} with the following options:\n{:?}",
            request.path.display(),
            request.options
        );
        Counters::bump(&self.counters.parses);

        match self
            .engine
            .parse(&request.path, &request.options, self.flags)
        {
            Ok(unit) => {
                let handle = Arc::new(UnitHandle::new(request, unit));
                let replaced = self
                    .state
                    .lock()
                    .units
                    .insert(request.path.clone(), Arc::clone(&handle));
                if replaced.is_some() {
                    debug!("Replaced cached unit for {}", request.path.display());
                }
                Some(handle)
            }
            Err(e) => {
                Counters::bump(&self.counters.failures);
                warn!("Failed to compile {}: {}", request.path.display(), e);
                None
            }
        }
    }

    /// Drop the entry for `handle`'s path, unless it was already replaced
    pub(crate) fn evict_if_current(&self, handle: &Arc<UnitHandle>) {
        let mut state = self.state.lock();
        let current = state
            .units
            .get(handle.path())
            .is_some_and(|h| Arc::ptr_eq(h, handle));
        if current {
            let evicted = state.units.remove(handle.path());
            drop(state);
            drop(evicted);
        }
    }

    pub(crate) fn peek(&self, path: &Path) -> Option<Arc<UnitHandle>> {
        self.state.lock().units.get(path).cloned()
    }

    pub(crate) fn is_parsing(&self, path: &Path) -> bool {
        self.state.lock().parsing.contains(path)
    }

    pub(crate) fn stats(&self) -> CacheStats {
        let (units, parsing) = {
            let state = self.state.lock();
            (state.units.len(), state.parsing.len())
        };
        CacheStats {
            units,
            parsing,
            queued: self.queue.len(),
            parses: self.counters.parses.load(Ordering::Relaxed),
            reparses: self.counters.reparses.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }
}

/// Clears a path's parsing marker when dropped, also on unwind
pub(crate) struct ParsingMarker<'a> {
    store: &'a Store,
    path: &'a Path,
    armed: bool,
}

impl<'a> ParsingMarker<'a> {
    /// Take over a marker that is already set
    pub(crate) fn new(store: &'a Store, path: &'a Path) -> Self {
        Self {
            store,
            path,
            armed: true,
        }
    }

    /// Clear the marker, unless a request the cached unit does not satisfy
    /// arrived while it was held. That request is returned and the marker
    /// stays set.
    pub(crate) fn settle(&mut self) -> Option<UnitRequest> {
        if !self.armed {
            return None;
        }
        let mut state = self.store.state.lock();
        if let Some(request) = state.pending.remove(self.path) {
            let satisfied = state.units.get(self.path).is_some_and(|h| {
                h.matches(&request.options, request.options_script.as_deref())
            });
            if !satisfied {
                return Some(request);
            }
        }
        state.parsing.remove(self.path);
        self.armed = false;
        None
    }

    /// Leave the marker set for the job that takes it over
    pub(crate) fn hand_off(mut self) {
        self.armed = false;
    }
}

impl Drop for ParsingMarker<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.store.state.lock();
            state.parsing.remove(self.path);
            state.pending.remove(self.path);
        }
    }
}
