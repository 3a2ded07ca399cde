//! Cache decorator: hits, misses, self-healing replay and write budget.

mod common;

use bytes::Bytes;
use common::{EventLog, Recorder, Reply, ScriptedTransport, bytes_task, fast_config, number_task};
use fetchcore::cache::{CacheStore, CachedDownloader, FjallCacheStore, MemoryCacheStore, NullCacheStore};
use fetchcore::callback::DownloadCallback;
use fetchcore::humanize::ByteSize;
use fetchcore::task::{MemoryTask, TaskExt};
use fetchcore::{DownloadError, DownloadTask, Downloader, DownloaderService, Locator};
use std::sync::Arc;
use tempfile::TempDir;

type Cached<S> = CachedDownloader<Downloader<ScriptedTransport>, S>;

fn cached_over<S: CacheStore>(transport: ScriptedTransport, store: &Arc<S>, budget: u64) -> Cached<S> {
    let upstream = Downloader::new(transport, &fast_config()).unwrap();
    CachedDownloader::new(upstream, Arc::clone(store), ByteSize(budget))
}

fn number_recorder(name: &str, log: &EventLog) -> Option<Arc<dyn DownloadCallback<u32>>> {
    Some(Recorder::new(name, log))
}

#[tokio::test]
async fn test_second_download_served_from_cache() {
    let store = Arc::new(MemoryCacheStore::new());
    let cached = cached_over(ScriptedTransport::new().serve("A", Reply::body("1234")), &store, 1024);
    let log = EventLog::new();

    let first = cached.download(number_task("A"), number_recorder("first", &log)).unwrap();
    assert_eq!(first.await.unwrap(), 1234);
    assert_eq!(store.get(&Locator::new("A")).unwrap(), Some(Bytes::from_static(b"1234")));

    // Cache hits complete before `download` returns.
    let second = cached.download(number_task("A"), number_recorder("second", &log)).unwrap();
    assert!(second.is_done());
    assert_eq!(log.events(), vec!["first:done", "second:done"]);
    assert_eq!(second.await.unwrap(), 1234);

    assert_eq!(cached.upstream().transport().opened("A"), 1);
}

#[tokio::test]
async fn test_corrupt_entry_evicted_and_refetched() {
    let store = Arc::new(MemoryCacheStore::new());
    store.put(&Locator::new("A"), Bytes::from_static(b"garbage")).unwrap();
    let cached = cached_over(ScriptedTransport::new().serve("A", Reply::body("1234")), &store, 1024);
    let log = EventLog::new();

    let handle = cached.download(number_task("A"), number_recorder("dl", &log)).unwrap();

    assert_eq!(handle.await.unwrap(), 1234);
    assert_eq!(log.events(), vec!["dl:done"]);
    assert_eq!(store.get(&Locator::new("A")).unwrap(), Some(Bytes::from_static(b"1234")));
    assert_eq!(cached.upstream().transport().opened("A"), 1);
}

#[tokio::test]
async fn test_corrupt_entry_with_failing_upstream_reports_upstream_error() {
    let store = Arc::new(MemoryCacheStore::new());
    store.put(&Locator::new("A"), Bytes::from_static(b"garbage")).unwrap();
    let cached = cached_over(ScriptedTransport::new(), &store, 1024);

    let result = cached.download_with_tries(number_task("A"), None, 1).unwrap().await;

    assert!(matches!(result, Err(DownloadError::HttpStatus { status: 404, .. })));
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_non_cacheable_tasks_bypass_store() {
    let store = Arc::new(MemoryCacheStore::new());
    let cached = cached_over(ScriptedTransport::new().serve("mem://a", Reply::body("fresh")), &store, 1024);
    store.put(&Locator::new("mem://a"), Bytes::from_static(b"stale")).unwrap();

    let value = cached.download(bytes_task("mem://a"), None).unwrap().await.unwrap();

    assert_eq!(value, Bytes::from_static(b"fresh"));
    assert_eq!(store.get(&Locator::new("mem://a")).unwrap(), Some(Bytes::from_static(b"stale")));
}

#[tokio::test]
async fn test_failed_download_leaves_no_entry() {
    let store = Arc::new(MemoryCacheStore::new());
    let transport = ScriptedTransport::new()
        .script("A", vec![Reply::body("not a number")])
        .serve("A", Reply::reset());
    let cached = cached_over(transport, &store, 1024);

    let result = cached.download_with_tries(number_task("A"), None, 2).unwrap().await;

    assert!(result.is_err());
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_body_over_budget_downloaded_but_not_cached() {
    let store = Arc::new(MemoryCacheStore::new());
    let transport = ScriptedTransport::new().serve("mem://big", Reply::body("0123456789abcdef"));
    let cached = cached_over(transport, &store, 8);
    let task: Arc<dyn DownloadTask<Bytes>> = Arc::new(MemoryTask::new("mem://big").cacheable());

    let value = cached.download(Arc::clone(&task), None).unwrap().await.unwrap();
    assert_eq!(value.len(), 16);
    assert!(store.is_empty());

    cached.download(task, None).unwrap().await.unwrap();
    assert_eq!(cached.upstream().transport().opened("mem://big"), 2);
}

#[tokio::test]
async fn test_concurrent_misses_both_resolve() {
    let store = Arc::new(MemoryCacheStore::new());
    let transport = ScriptedTransport::new().serve("A", Reply::after(20, Reply::body("1234")));
    let cached = cached_over(transport, &store, 1024);

    let first = cached.download(number_task("A"), None).unwrap();
    let second = cached.download(number_task("A"), None).unwrap();

    assert_eq!(first.await.unwrap(), 1234);
    assert_eq!(second.await.unwrap(), 1234);
    assert_eq!(store.get(&Locator::new("A")).unwrap(), Some(Bytes::from_static(b"1234")));
}

#[tokio::test]
async fn test_null_store_always_goes_upstream() {
    let store = Arc::new(NullCacheStore);
    let cached = cached_over(ScriptedTransport::new().serve("A", Reply::body("1234")), &store, 1024);

    for _ in 0..2 {
        assert_eq!(cached.download(number_task("A"), None).unwrap().await.unwrap(), 1234);
    }
    assert_eq!(cached.upstream().transport().opened("A"), 2);
}

#[tokio::test]
async fn test_disk_cache_survives_restart() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("cache");

    {
        let store = Arc::new(FjallCacheStore::open(&path, "downloads").unwrap());
        let cached = cached_over(ScriptedTransport::new().serve("A", Reply::body("1234")), &store, 1024);

        assert_eq!(cached.download(number_task("A"), None).unwrap().await.unwrap(), 1234);
        cached.shutdown().unwrap();
        cached.upstream().drained().await;
    }

    let store = Arc::new(FjallCacheStore::open(&path, "downloads").unwrap());
    let cached = cached_over(ScriptedTransport::new(), &store, 1024);

    let handle = cached.download(number_task("A"), None).unwrap();
    assert!(handle.is_done());
    assert_eq!(handle.await.unwrap(), 1234);
    assert_eq!(cached.upstream().transport().total_opened(), 0);
}

#[tokio::test]
async fn test_cache_metrics_counted() {
    let store = Arc::new(MemoryCacheStore::new());
    store.put(&Locator::new("B"), Bytes::from_static(b"oops")).unwrap();
    let transport = ScriptedTransport::new()
        .serve("A", Reply::body("1"))
        .serve("B", Reply::body("2"));
    let cached = cached_over(transport, &store, 1024);
    let metrics = Arc::clone(cached.upstream().metrics());
    let cached = cached.with_metrics(Arc::clone(&metrics));

    cached.download(number_task("A"), None).unwrap().await.unwrap();
    cached.download(number_task("A"), None).unwrap().await.unwrap();
    cached.download(number_task("B"), None).unwrap().await.unwrap();

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.cache_misses, 1);
    assert_eq!(snapshot.cache_hits, 1);
    assert_eq!(snapshot.cache_evictions, 1);
    assert_eq!(snapshot.downloads_started, 2);
}

#[tokio::test]
async fn test_panicking_replay_evicted_and_refetched() {
    let store = Arc::new(MemoryCacheStore::new());
    store.put(&Locator::new("A"), Bytes::from_static(b"poison")).unwrap();
    let cached = cached_over(ScriptedTransport::new().serve("A", Reply::body("1234")), &store, 1024);
    let log = EventLog::new();

    let task: Arc<dyn DownloadTask<u32>> = Arc::new(
        MemoryTask::new("A")
            .map(|bytes| {
                if bytes.as_ref() == b"poison" {
                    panic!("cannot decode cached body");
                }
                std::str::from_utf8(&bytes)
                    .ok()
                    .and_then(|s| s.parse::<u32>().ok())
                    .ok_or_else(|| DownloadError::session("body is not a number"))
            })
            .cacheable(),
    );
    let handle = cached.download(task, number_recorder("dl", &log)).unwrap();

    assert_eq!(handle.await.unwrap(), 1234);
    assert_eq!(log.events(), vec!["dl:done"]);
    assert_eq!(store.get(&Locator::new("A")).unwrap(), Some(Bytes::from_static(b"1234")));
    assert_eq!(cached.upstream().transport().opened("A"), 1);
}
