//! Running parse jobs and admitting new ones
//!
//! A path's parsing marker is set when its job is admitted and cleared when
//! the job finishes, so at most one job per path is queued or running.
//! Requests that arrive while the marker is held are recorded, and the job
//! builds the latest of them before it lets go of the marker.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::queue::{JobKind, WorkItem};
use crate::store::{Counters, ParsingMarker, Store};
use crate::unit::{UnitHandle, UnitRequest};

impl Store {
    /// Execute a job taken off the queue
    pub(crate) fn run(&self, item: WorkItem) {
        let WorkItem {
            request,
            on_done,
            kind,
        } = item;

        {
            let mut marker = ParsingMarker::new(self, &request.path);
            match kind {
                JobKind::Parse => {
                    self.parse(&request);
                }
                JobKind::Reparse => self.reparse(&request),
            }
            while let Some(next) = marker.settle() {
                debug!(
                    "Options for {} changed while it was busy, rebuilding",
                    next.path.display()
                );
                self.parse(&next);
            }
        }

        if let Some(on_done) = on_done {
            on_done();
        }
    }

    /// Get the unit for `request`, building it when missing or stale
    pub(crate) fn parse(&self, request: &UnitRequest) -> Option<Arc<UnitHandle>> {
        debug!("Parsing {}", request.path.display());
        let result = self.load(request);
        debug!("Parsing {} done", request.path.display());
        result
    }

    fn load(&self, request: &UnitRequest) -> Option<Arc<UnitHandle>> {
        let mut state = self.state.lock();
        if let Some(existing) = state.units.get(&request.path) {
            if existing.matches(&request.options, request.options_script.as_deref()) {
                return Some(Arc::clone(existing));
            }
            // This job owns the marker, so it rebuilds the stale entry itself
            let stale = state.units.remove(&request.path);
            drop(state);
            drop(stale);
            Counters::bump(&self.counters.invalidations);
        } else {
            drop(state);
        }

        self.compile(request)
    }

    /// Refresh the cached unit in place; a unit that fails to refresh is
    /// evicted.
    ///
    /// Never builds a unit. If the entry is gone or was built with other
    /// options there is nothing to refresh.
    pub(crate) fn reparse(&self, request: &UnitRequest) {
        let handle = match self.peek(&request.path) {
            Some(h) if h.matches(&request.options, request.options_script.as_deref()) => h,
            _ => {
                debug!("{} is no longer cached as requested", request.path.display());
                return;
            }
        };

        let result = {
            let mut unit = handle.lock();
            debug!("Reparsing {}", request.path.display());
            let result = unit.reparse(self.flags);
            debug!("Reparsing {} done", request.path.display());
            result
        };
        Counters::bump(&self.counters.reparses);

        if let Err(e) = result {
            Counters::bump(&self.counters.failures);
            warn!("Failed to reparse {}: {}", request.path.display(), e);
            self.evict_if_current(&handle);
        }
    }

    /// Queue a parse unless the path is cached or already being parsed.
    ///
    /// If a job for the path is under way the request is left for that job
    /// to build once it is done. Returns whether a new job was queued.
    pub(crate) fn add_ex(&self, item: WorkItem) -> bool {
        {
            let mut state = self.state.lock();
            let path = &item.request.path;
            if state.units.contains_key(path) {
                return false;
            }
            if state.parsing.contains(path) {
                state.pending.insert(path.clone(), item.request.clone());
                return false;
            }
            state.parsing.insert(path.clone());
        }
        self.submit(item.with_kind(JobKind::Parse))
    }

    /// Queue a refresh of a cached unit unless the path is already being
    /// parsed
    pub(crate) fn add_reparse(&self, item: WorkItem) -> bool {
        {
            let mut state = self.state.lock();
            let path = &item.request.path;
            if !state.units.contains_key(path) || !state.parsing.insert(path.clone()) {
                return false;
            }
        }
        self.submit(item.with_kind(JobKind::Reparse))
    }

    /// Queue a refresh of every cached unit with its own options.
    ///
    /// Returns how many refreshes were queued.
    pub(crate) fn refresh_all(&self) -> usize {
        let requests: Vec<UnitRequest> = self
            .state
            .lock()
            .units
            .values()
            .map(|handle| handle.request())
            .collect();

        requests
            .into_iter()
            .filter(|request| self.add_reparse(WorkItem::new(request.clone())))
            .count()
    }

    /// Enqueue outside the store lock. The caller has set the marker; it is
    /// released if the job is rejected.
    pub(crate) fn submit(&self, item: WorkItem) -> bool {
        let path = item.request.path.clone();
        match self.queue.enqueue(item) {
            Ok(()) => true,
            Err(_rejected) => {
                let mut state = self.state.lock();
                state.parsing.remove(&path);
                state.pending.remove(&path);
                false
            }
        }
    }
}
