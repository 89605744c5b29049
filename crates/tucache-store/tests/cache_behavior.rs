//! Concurrency and invalidation behavior of the translation-unit cache
//!
//! Driven by the scripted mock engine, whose gate holds parses open so that
//! in-flight states can be observed.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::unbounded;
use tucache_core::config::Config;
use tucache_core::{
    ChunkKind, CompleteAtArgs, CompletionCandidate, CompletionChunk, CursorKind, Error,
};
use tucache_parser::mock::MockEngine;
use tucache_store::{TranslationUnitCache, UnitRequest, UnsavedFiles, WorkItem};

const TIMEOUT: Duration = Duration::from_secs(5);

fn cache_with(engine: &MockEngine, config: Config) -> TranslationUnitCache {
    TranslationUnitCache::new(Box::new(engine.clone()), &config).unwrap()
}

fn cache(engine: &MockEngine) -> TranslationUnitCache {
    cache_with(engine, Config::default())
}

fn no_unsaved() -> UnsavedFiles {
    UnsavedFiles::new()
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let start = Instant::now();
    while !condition() {
        assert!(start.elapsed() < TIMEOUT, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(5));
    }
}

fn wait_idle(cache: &TranslationUnitCache, path: &str) {
    wait_until("parse to finish", || !cache.is_parsing(Path::new(path)));
}

#[test]
fn test_option_change_scenario() {
    let engine = MockEngine::new();
    let cache = cache(&engine);
    let o1 = UnitRequest::new("a.cc", ["-std=c++11"]);
    let o2 = UnitRequest::new("a.cc", ["-std=c++17"]);

    // First access parses synchronously
    let h1 = cache.get_unit(&o1, &no_unsaved()).unwrap();
    assert_eq!(h1.options(), ["-std=c++11".to_string()]);
    assert_eq!(engine.parses(), 1);

    // Option change: stale handle back, entry evicted, rebuild queued
    engine.close_gate();
    let stale = cache.get_unit(&o2, &no_unsaved()).unwrap();
    assert!(Arc::ptr_eq(&stale, &h1));
    assert!(cache.peek(Path::new("a.cc")).is_none());
    assert!(cache.is_parsing(Path::new("a.cc")));

    // While the rebuild runs the path has no unit to offer
    engine.wait_for_blocked(1);
    assert!(cache.get_unit(&o2, &no_unsaved()).is_none());

    engine.open_gate();
    wait_idle(&cache, "a.cc");

    let h2 = cache.get_unit(&o2, &no_unsaved()).unwrap();
    assert!(!Arc::ptr_eq(&h1, &h2));
    assert_eq!(h2.options(), ["-std=c++17".to_string()]);
    assert!(Arc::ptr_eq(&cache.peek(Path::new("a.cc")).unwrap(), &h2));
    assert_eq!(engine.parses(), 2);
    assert_eq!(cache.stats().invalidations, 1);

    // The stale unit lives until its last holder lets go
    assert_eq!(engine.disposed(), 0);
    drop(stale);
    drop(h1);
    assert_eq!(engine.disposed(), 1);
}

#[test]
fn test_reordered_options_invalidate() {
    let engine = MockEngine::new();
    let cache = cache(&engine);

    let h1 = cache
        .get_unit(&UnitRequest::new("a.cc", ["-I.", "-DX"]), &no_unsaved())
        .unwrap();
    let returned = cache
        .get_unit(&UnitRequest::new("a.cc", ["-DX", "-I."]), &no_unsaved())
        .unwrap();

    assert!(Arc::ptr_eq(&h1, &returned));
    wait_idle(&cache, "a.cc");
    assert_eq!(engine.parses(), 2);
    assert_eq!(
        cache.peek(Path::new("a.cc")).unwrap().options(),
        ["-DX".to_string(), "-I.".to_string()]
    );
}

#[test]
fn test_script_change_invalidates() {
    let engine = MockEngine::new();
    let cache = cache(&engine);
    let request = UnitRequest::new("a.cc", ["-O2"]);

    cache.get_unit(&request, &no_unsaved()).unwrap();
    cache
        .get_unit(&request.clone().with_script("flags.py"), &no_unsaved())
        .unwrap();
    wait_idle(&cache, "a.cc");

    let current = cache.peek(Path::new("a.cc")).unwrap();
    assert_eq!(current.options_script(), Some("flags.py"));
    assert_eq!(engine.parses(), 2);
}

#[test]
fn test_unchanged_options_reuse_handle() {
    let engine = MockEngine::new();
    let cache = cache(&engine);
    let request = UnitRequest::new("a.cc", ["-std=c++11"]).with_script("flags.py");

    let first = cache.get_unit(&request, &no_unsaved()).unwrap();
    for _ in 0..5 {
        let again = cache.get_unit(&request, &no_unsaved()).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
    }

    assert_eq!(engine.parses(), 1);
    assert_eq!(cache.stats().queued, 0);
    assert!(!cache.is_parsing(Path::new("a.cc")));
}

#[test]
fn test_failed_parse_is_absent_and_retryable() {
    let engine = MockEngine::new();
    let cache = cache(&engine);
    let request = UnitRequest::new("broken.cc", ["-std=c++11"]);
    engine.fail_on("broken.cc");

    assert!(cache.get_unit(&request, &no_unsaved()).is_none());
    assert!(cache.peek(Path::new("broken.cc")).is_none());
    assert!(!cache.is_parsing(Path::new("broken.cc")));
    assert_eq!(cache.stats().failures, 1);

    engine.succeed_on(Path::new("broken.cc"));
    assert!(cache.get_unit(&request, &no_unsaved()).is_some());
    assert_eq!(engine.parses(), 2);
}

#[test]
fn test_failed_background_parse_clears_marker() {
    let engine = MockEngine::new();
    let cache = cache(&engine);
    engine.fail_on("broken.cc");

    let (tx, rx) = unbounded();
    let item = WorkItem::new(UnitRequest::new("broken.cc", ["-g"])).on_done(move || {
        tx.send(()).unwrap();
    });
    assert!(cache.add_ex(item));

    rx.recv_timeout(TIMEOUT).unwrap();
    wait_idle(&cache, "broken.cc");
    assert!(cache.peek(Path::new("broken.cc")).is_none());
}

#[test]
fn test_concurrent_add_ex_queues_one_job() {
    let engine = MockEngine::new();
    let cache = Arc::new(cache_with(&engine, {
        let mut config = Config::default();
        config.cache.workers = 4;
        config
    }));
    let request = UnitRequest::new("a.cc", ["-O2"]);

    engine.close_gate();
    assert!(cache.add_ex(WorkItem::new(request.clone())));
    engine.wait_for_blocked(1);

    let admitted: usize = thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let request = request.clone();
                s.spawn(move || cache.add_ex(WorkItem::new(request)) as usize)
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    });
    assert_eq!(admitted, 0);

    engine.open_gate();
    wait_idle(&cache, "a.cc");

    assert_eq!(engine.parses(), 1);
    assert_eq!(
        engine
            .stats()
            .max_in_flight_per_path
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );
    assert!(cache.peek(Path::new("a.cc")).is_some());
}

#[test]
fn test_concurrent_first_access_parses_once() {
    let engine = MockEngine::new();
    let cache = cache(&engine);
    let request = UnitRequest::new("a.cc", ["-O2"]);

    engine.close_gate();
    thread::scope(|s| {
        let first = s.spawn(|| cache.get_unit(&request, &no_unsaved()));
        engine.wait_for_blocked(1);

        // A second caller neither waits nor starts another parse
        assert!(cache.get_unit(&request, &no_unsaved()).is_none());
        assert!(!cache.add_ex(WorkItem::new(request.clone())));

        engine.open_gate();
        assert!(first.join().unwrap().is_some());
    });

    assert_eq!(engine.parses(), 1);
}

#[test]
fn test_changed_options_twice_queue_one_rebuild() {
    let engine = MockEngine::new();
    let cache = cache(&engine);
    let o1 = UnitRequest::new("a.cc", ["-std=c++11"]);
    let o2 = UnitRequest::new("a.cc", ["-std=c++17"]);

    cache.get_unit(&o1, &no_unsaved()).unwrap();
    engine.close_gate();
    assert!(cache.get_unit(&o2, &no_unsaved()).is_some());
    assert!(cache.get_unit(&o2, &no_unsaved()).is_none());
    assert!(!cache.add_ex(WorkItem::new(o2.clone())));

    engine.open_gate();
    wait_idle(&cache, "a.cc");
    assert_eq!(engine.parses(), 2);
}

#[test]
fn test_full_queue_blocks_submitter() {
    let engine = MockEngine::new();
    let cache = cache_with(&engine, {
        let mut config = Config::default();
        config.cache.queue_len = 1;
        config
    });

    engine.close_gate();
    assert!(cache.add_ex(WorkItem::new(UnitRequest::new("a.c", ["-g"]))));
    engine.wait_for_blocked(1);
    assert!(cache.add_ex(WorkItem::new(UnitRequest::new("b.c", ["-g"]))));
    assert_eq!(cache.stats().queued, 1);

    thread::scope(|s| {
        let blocked =
            s.spawn(|| cache.add_ex(WorkItem::new(UnitRequest::new("c.c", ["-g"]))));
        thread::sleep(Duration::from_millis(50));
        assert!(!blocked.is_finished());

        engine.open_gate();
        assert!(blocked.join().unwrap());
    });

    for path in ["a.c", "b.c", "c.c"] {
        wait_idle(&cache, path);
    }
    assert_eq!(cache.stats().units, 3);
}

#[test]
fn test_refresh_keeps_identity() {
    let engine = MockEngine::new();
    let cache = cache(&engine);
    let request = UnitRequest::new("a.cc", ["-O2"]);
    let handle = cache.get_unit(&request, &no_unsaved()).unwrap();

    let (tx, rx) = unbounded();
    assert!(cache.add_reparse(WorkItem::new(request).on_done(move || tx.send(()).unwrap())));
    rx.recv_timeout(TIMEOUT).unwrap();

    assert_eq!(engine.reparses(), 1);
    assert_eq!(engine.parses(), 1);
    assert!(Arc::ptr_eq(&handle, &cache.peek(Path::new("a.cc")).unwrap()));
    assert_eq!(cache.stats().reparses, 1);
}

#[test]
fn test_failed_refresh_evicts() {
    let engine = MockEngine::new();
    let cache = cache(&engine);
    let request = UnitRequest::new("a.cc", ["-O2"]);
    cache.get_unit(&request, &no_unsaved()).unwrap();
    engine.fail_reparses(true);

    let (tx, rx) = unbounded();
    assert!(cache.add_reparse(WorkItem::new(request).on_done(move || tx.send(()).unwrap())));
    rx.recv_timeout(TIMEOUT).unwrap();

    assert!(cache.peek(Path::new("a.cc")).is_none());
}

#[test]
fn test_option_change_while_refresh_queued() {
    let engine = MockEngine::new();
    let cache = cache(&engine);
    let o1 = UnitRequest::new("a.cc", ["-std=c++11"]);
    let o2 = UnitRequest::new("a.cc", ["-std=c++17"]);
    let h1 = cache.get_unit(&o1, &no_unsaved()).unwrap();

    // Keep the only worker busy so the refresh stays queued
    engine.close_gate();
    assert!(cache.add_ex(WorkItem::new(UnitRequest::new("b.cc", ["-g"]))));
    engine.wait_for_blocked(1);
    assert_eq!(cache.refresh_all(), 1);

    let stale = cache.get_unit(&o2, &no_unsaved()).unwrap();
    assert!(Arc::ptr_eq(&stale, &h1));
    assert!(cache.is_parsing(Path::new("a.cc")));

    engine.open_gate();
    wait_idle(&cache, "a.cc");
    wait_idle(&cache, "b.cc");

    let current = cache.peek(Path::new("a.cc")).unwrap();
    assert_eq!(current.options(), ["-std=c++17".to_string()]);
    assert_eq!(engine.reparses(), 0);
    assert_eq!(engine.parses(), 3);
}

#[test]
fn test_option_change_while_refresh_running() {
    let engine = MockEngine::new();
    let cache = cache(&engine);
    let o1 = UnitRequest::new("a.cc", ["-std=c++11"]);
    let o2 = UnitRequest::new("a.cc", ["-std=c++17"]);
    let h1 = cache.get_unit(&o1, &no_unsaved()).unwrap();

    // The refresh blocks on the unit lock held here
    let locked = h1.lock();
    assert!(cache.add_reparse(WorkItem::new(o1)));
    thread::sleep(Duration::from_millis(20));

    let stale = cache.get_unit(&o2, &no_unsaved()).unwrap();
    assert!(Arc::ptr_eq(&stale, &h1));
    drop(locked);

    wait_idle(&cache, "a.cc");
    let current = cache.peek(Path::new("a.cc")).unwrap();
    assert_eq!(current.options(), ["-std=c++17".to_string()]);
    assert_eq!(engine.parses(), 2);
}

#[test]
fn test_rebuild_from_callback_on_full_queue_falls_back_to_sync_parse() {
    let engine = MockEngine::new();
    let cache = Arc::new(cache_with(&engine, {
        let mut config = Config::default();
        config.cache.queue_len = 1;
        config
    }));
    let o1 = UnitRequest::new("a.cc", ["-std=c++11"]);
    let o2 = UnitRequest::new("a.cc", ["-std=c++17"]);
    cache.get_unit(&o1, &no_unsaved()).unwrap();

    let (tx, rx) = unbounded();
    let inner = Arc::clone(&cache);
    let request = o2.clone();
    let item = WorkItem::new(UnitRequest::new("b.cc", ["-g"])).on_done(move || {
        let stale = inner.get_unit(&request, &no_unsaved());
        tx.send((
            stale.map(|h| h.options().to_vec()),
            inner.peek(Path::new("a.cc")).is_none(),
            inner.is_parsing(Path::new("a.cc")),
        ))
        .unwrap();
    });

    engine.close_gate();
    assert!(cache.add_ex(item));
    engine.wait_for_blocked(1);
    // Fills the queue while the only worker is busy
    assert!(cache.add_ex(WorkItem::new(UnitRequest::new("c.cc", ["-g"]))));
    engine.open_gate();

    let (stale, evicted, parsing) = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(stale, Some(vec!["-std=c++11".to_string()]));
    assert!(evicted);
    assert!(!parsing);

    wait_idle(&cache, "c.cc");
    let rebuilt = cache.get_unit(&o2, &no_unsaved()).unwrap();
    assert_eq!(rebuilt.options(), ["-std=c++17".to_string()]);
}

#[test]
fn test_refresh_all() {
    let engine = MockEngine::new();
    let cache = cache(&engine);
    for path in ["a.c", "b.c"] {
        cache
            .get_unit(&UnitRequest::new(path, ["-g"]), &no_unsaved())
            .unwrap();
    }

    assert_eq!(cache.refresh_all(), 2);
    wait_until("refreshes", || engine.reparses() == 2);
    for path in ["a.c", "b.c"] {
        wait_idle(&cache, path);
    }
    assert_eq!(engine.parses(), 2);
}

#[test]
fn test_periodic_refresh() {
    let engine = MockEngine::new();
    let mut config = Config::default();
    config.cache.refresh_interval_ms = Some(10);
    let cache = cache_with(&engine, config);

    cache
        .get_unit(&UnitRequest::new("a.c", ["-g"]), &no_unsaved())
        .unwrap();
    wait_until("periodic refresh", || engine.reparses() >= 2);
}

#[test]
fn test_callback_may_resubmit_from_worker() {
    let engine = MockEngine::new();
    let cache = Arc::new(cache(&engine));
    let (tx, rx) = unbounded();

    let inner = Arc::clone(&cache);
    let item = WorkItem::new(UnitRequest::new("a.c", ["-g"])).on_done(move || {
        let queued = inner.add_ex(WorkItem::new(UnitRequest::new("b.c", ["-g"])));
        tx.send(queued).unwrap();
    });
    assert!(cache.add_ex(item));

    assert!(rx.recv_timeout(TIMEOUT).unwrap());
    wait_until("follow-up parse", || cache.peek(Path::new("b.c")).is_some());
}

#[test]
fn test_unsaved_content_rejected() {
    let engine = MockEngine::new();
    let cache = cache(&engine);
    cache
        .get_unit(&UnitRequest::new("a.cc", ["-g"]), &no_unsaved())
        .unwrap();

    let mut args = CompleteAtArgs::new("a.cc", 1, 1);
    args.location.file.contents = "int main() {}".into();

    assert!(matches!(cache.complete_at(&args), Err(Error::Unsupported(_))));
    assert_eq!(engine.completions(), 0);
    assert!(!cache.supports_unsaved_files());
}

#[test]
fn test_unsaved_files_are_ignored_by_get_unit() {
    let engine = MockEngine::new();
    let cache = cache(&engine);
    let mut unsaved = UnsavedFiles::new();
    unsaved.insert("a.cc".into(), "int x;".into());

    assert!(cache
        .get_unit(&UnitRequest::new("a.cc", ["-g"]), &unsaved)
        .is_some());
    assert_eq!(engine.parses(), 1);
}

#[test]
fn test_complete_at_translates_candidates() {
    let engine = MockEngine::new();
    engine.set_candidates(vec![
        CompletionCandidate {
            cursor_kind: CursorKind::FunctionDecl,
            chunks: vec![
                CompletionChunk::new(ChunkKind::ResultType, "void"),
                CompletionChunk::new(ChunkKind::TypedText, "reset"),
                CompletionChunk::new(ChunkKind::LeftParen, "("),
                CompletionChunk::new(ChunkKind::RightParen, ")"),
            ],
        },
        CompletionCandidate {
            cursor_kind: CursorKind::StructDecl,
            chunks: vec![CompletionChunk::new(ChunkKind::TypedText, "point")],
        },
    ]);
    let cache = cache(&engine);

    let empty = cache.complete_at(&CompleteAtArgs::new("a.cc", 1, 1)).unwrap();
    assert!(empty.is_empty());
    assert_eq!(engine.completions(), 0);

    cache
        .get_unit(&UnitRequest::new("a.cc", ["-g"]), &no_unsaved())
        .unwrap();
    let result = cache.complete_at(&CompleteAtArgs::new("a.cc", 1, 1)).unwrap();

    assert_eq!(result.methods.len(), 1);
    assert_eq!(result.methods[0].name, "reset");
    assert_eq!(result.types.len(), 1);
    assert_eq!(result.types[0].name, "point");
}

#[test]
fn test_drop_stops_workers() {
    let engine = MockEngine::new();
    let cache = cache_with(&engine, {
        let mut config = Config::default();
        config.cache.workers = 3;
        config.cache.refresh_interval_ms = Some(1000);
        config
    });
    cache
        .get_unit(&UnitRequest::new("a.c", ["-g"]), &no_unsaved())
        .unwrap();

    drop(cache);
    assert_eq!(engine.disposed(), 1);
}

#[test]
fn test_invalid_config_rejected() {
    let engine = MockEngine::new();
    let mut config = Config::default();
    config.cache.workers = 0;

    assert!(matches!(
        TranslationUnitCache::new(Box::new(engine), &config),
        Err(Error::Config(_))
    ));
}
