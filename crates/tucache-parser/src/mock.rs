//! Scripted engine for tests
//!
//! Counts every engine call, can fail or block parses on demand, and records
//! when units are dropped so disposal can be observed.

use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tucache_core::{CompletionCandidate, Diagnostic, Error, ParseFlags, Result};

use crate::{ParseEngine, TranslationUnit};

/// Counters shared by the engine and every unit it built
#[derive(Debug, Default)]
pub struct MockStats {
    pub parses: AtomicUsize,
    pub reparses: AtomicUsize,
    pub completions: AtomicUsize,
    pub disposed: AtomicUsize,
    /// Parses currently running, per path
    in_flight: Mutex<HashMap<PathBuf, usize>>,
    /// Highest number of simultaneous parses seen for any single path
    pub max_in_flight_per_path: AtomicUsize,
}

#[derive(Debug, Default)]
struct GateState {
    closed: bool,
    waiting: usize,
}

/// Blocks parses while closed
#[derive(Debug, Default)]
struct Gate {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl Gate {
    fn pass(&self) {
        let mut state = self.state.lock();
        state.waiting += 1;
        self.cond.notify_all();
        while state.closed {
            self.cond.wait(&mut state);
        }
        state.waiting -= 1;
    }
}

#[derive(Debug, Default)]
struct Script {
    failing: HashSet<PathBuf>,
    failing_reparse: bool,
    candidates: Vec<CompletionCandidate>,
}

/// In-memory engine with scripted behavior
#[derive(Debug, Default, Clone)]
pub struct MockEngine {
    stats: Arc<MockStats>,
    script: Arc<Mutex<Script>>,
    gate: Arc<Gate>,
    next_id: Arc<AtomicU64>,
    calls: Arc<Mutex<Vec<(PathBuf, Vec<String>)>>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &MockStats {
        &self.stats
    }

    pub fn parses(&self) -> usize {
        self.stats.parses.load(Ordering::SeqCst)
    }

    pub fn reparses(&self) -> usize {
        self.stats.reparses.load(Ordering::SeqCst)
    }

    pub fn completions(&self) -> usize {
        self.stats.completions.load(Ordering::SeqCst)
    }

    pub fn disposed(&self) -> usize {
        self.stats.disposed.load(Ordering::SeqCst)
    }

    /// Every `(path, options)` the engine was asked to parse, in call order
    pub fn calls(&self) -> Vec<(PathBuf, Vec<String>)> {
        self.calls.lock().clone()
    }

    /// Make parses of `path` fail
    pub fn fail_on(&self, path: impl Into<PathBuf>) {
        self.script.lock().failing.insert(path.into());
    }

    /// Let parses of `path` succeed again
    pub fn succeed_on(&self, path: &Path) {
        self.script.lock().failing.remove(path);
    }

    /// Make every reparse fail
    pub fn fail_reparses(&self, fail: bool) {
        self.script.lock().failing_reparse = fail;
    }

    /// Candidates returned by every completion
    pub fn set_candidates(&self, candidates: Vec<CompletionCandidate>) {
        self.script.lock().candidates = candidates;
    }

    /// Block all parses until [`MockEngine::open_gate`]
    pub fn close_gate(&self) {
        self.gate.state.lock().closed = true;
    }

    pub fn open_gate(&self) {
        let mut state = self.gate.state.lock();
        state.closed = false;
        self.gate.cond.notify_all();
    }

    /// Wait until `n` parses are blocked on the gate
    pub fn wait_for_blocked(&self, n: usize) {
        let mut state = self.gate.state.lock();
        while state.waiting < n {
            self.gate.cond.wait(&mut state);
        }
    }

    fn enter(&self, path: &Path) {
        let mut in_flight = self.stats.in_flight.lock();
        let count = in_flight.entry(path.to_path_buf()).or_insert(0);
        *count += 1;
        self.stats
            .max_in_flight_per_path
            .fetch_max(*count, Ordering::SeqCst);
    }

    fn leave(&self, path: &Path) {
        let mut in_flight = self.stats.in_flight.lock();
        if let Some(count) = in_flight.get_mut(path) {
            *count -= 1;
        }
    }
}

impl ParseEngine for MockEngine {
    fn parse(
        &self,
        path: &Path,
        options: &[String],
        _flags: ParseFlags,
    ) -> Result<Box<dyn TranslationUnit>> {
        self.stats.parses.fetch_add(1, Ordering::SeqCst);
        self.calls
            .lock()
            .push((path.to_path_buf(), options.to_vec()));

        self.enter(path);
        self.gate.pass();
        self.leave(path);

        if self.script.lock().failing.contains(path) {
            return Err(Error::Parse(format!("scripted failure for {}", path.display())));
        }

        Ok(Box::new(MockUnit {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            path: path.to_path_buf(),
            options: options.to_vec(),
            stats: Arc::clone(&self.stats),
            script: Arc::clone(&self.script),
        }))
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn is_available(&self) -> bool {
        true
    }
}

/// Unit built by [`MockEngine`]
#[derive(Debug)]
pub struct MockUnit {
    pub id: u64,
    pub path: PathBuf,
    pub options: Vec<String>,
    stats: Arc<MockStats>,
    script: Arc<Mutex<Script>>,
}

impl TranslationUnit for MockUnit {
    fn reparse(&mut self, _flags: ParseFlags) -> Result<()> {
        self.stats.reparses.fetch_add(1, Ordering::SeqCst);
        if self.script.lock().failing_reparse {
            return Err(Error::Parse(format!(
                "scripted reparse failure for {}",
                self.path.display()
            )));
        }
        Ok(())
    }

    fn complete_at(
        &mut self,
        _path: &Path,
        _line: u32,
        _column: u32,
        _flags: ParseFlags,
    ) -> Result<Vec<CompletionCandidate>> {
        self.stats.completions.fetch_add(1, Ordering::SeqCst);
        Ok(self.script.lock().candidates.clone())
    }

    fn diagnostics(&self) -> &[Diagnostic] {
        &[]
    }
}

impl Drop for MockUnit {
    fn drop(&mut self) {
        self.stats.disposed.fetch_add(1, Ordering::SeqCst);
    }
}
