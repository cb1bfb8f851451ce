//! End-to-end coalescing behavior across service instances.
//!
//! Each simulated "process" is its own `Service` (own latency estimate) over
//! a shared store and locker, the way several servers share one cache.
//!
//! Run with: cargo test --test coalescing

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use thumbcache::error::{ErrorKind, ErrorResponse, ThumbnailError};
use thumbcache::imaging::Letterbox;
use thumbcache::locker::{FileLocker, LockOptions, MemoryLocker};
use thumbcache::service::{
    CoalescingSettings, Downloader, Lock, LockError, Locker, Outcome, Service, Store, StoreError,
    Transformation,
};
use thumbcache::store::{FsStore, MemoryStore};

const URL: &str = "http://example.com/flower.jpg";

// =========================================================================
// Fakes
// =========================================================================

struct StaticDownloader(Result<Vec<u8>, ErrorKind>);

impl Downloader for StaticDownloader {
    fn download(&self, _locator: &str) -> Result<Vec<u8>, ThumbnailError> {
        self.0.clone().map_err(ThumbnailError::new)
    }
}

/// Sleeps, then returns a fixed result. Counts every invocation.
struct SlowTransformation {
    delay: Duration,
    calls: AtomicUsize,
}

impl SlowTransformation {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transformation for SlowTransformation {
    fn fingerprint(&self, _data: &[u8]) -> String {
        "slow_100_100".to_string()
    }

    fn perform(&self, data: &[u8]) -> Result<Vec<u8>, ThumbnailError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        let mut out = b"thumb of ".to_vec();
        out.extend_from_slice(data);
        Ok(out)
    }
}

struct PanickingTransformation;

impl Transformation for PanickingTransformation {
    fn fingerprint(&self, _data: &[u8]) -> String {
        "slow_100_100".to_string()
    }

    fn perform(&self, _data: &[u8]) -> Result<Vec<u8>, ThumbnailError> {
        panic!("decoder bug");
    }
}

/// A lock service that is down: every acquisition fails.
struct BrokenLocker;

struct BrokenLock;

impl Lock for BrokenLock {
    fn lock(&mut self) -> Result<(), LockError> {
        Err(LockError::Backend("connection refused".into()))
    }

    fn unlock(&mut self) -> bool {
        false
    }

    fn extend(&mut self) -> bool {
        false
    }
}

impl Locker for BrokenLocker {
    fn new_lock(&self, _name: &str) -> Box<dyn Lock> {
        Box::new(BrokenLock)
    }
}

/// Reads always miss and writes always fail.
struct ReadOnlyStore;

impl Store for ReadOnlyStore {
    fn get(&self, _key: &str) -> Option<Vec<u8>> {
        None
    }

    fn set(&self, _key: &str, _data: &[u8]) -> Result<(), StoreError> {
        Err(StoreError::Backend("read-only".into()))
    }
}

// =========================================================================
// Helpers
// =========================================================================

fn source_jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 90])
    });
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, image::ImageFormat::Jpeg)
        .unwrap();
    buf.into_inner()
}

fn polling_settings() -> CoalescingSettings {
    CoalescingSettings {
        poll_tries: 40,
        max_attempts: 2,
        default_poll_interval: Duration::from_millis(20),
        latency_window: Duration::from_secs(60),
    }
}

fn single_try_locks() -> LockOptions {
    LockOptions {
        tries: 1,
        ..LockOptions::default()
    }
}

fn service(
    download: Result<Vec<u8>, ErrorKind>,
    store: Arc<dyn Store>,
    locker: Arc<dyn Locker>,
    settings: CoalescingSettings,
) -> Service {
    Service::new(Arc::new(StaticDownloader(download)), store, locker, settings)
}

/// Fire `n` simultaneous requests, one service instance each, and collect outcomes.
fn stampede(
    n: usize,
    store: Arc<dyn Store>,
    locker: Arc<dyn Locker>,
    transformation: Arc<SlowTransformation>,
) -> Vec<(Vec<u8>, Outcome)> {
    let barrier = Arc::new(Barrier::new(n));
    let handles: Vec<_> = (0..n)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            let store = Arc::clone(&store);
            let locker = Arc::clone(&locker);
            let transformation = Arc::clone(&transformation);
            thread::spawn(move || {
                let svc = service(Ok(b"flower".to_vec()), store, locker, polling_settings());
                barrier.wait();
                let thumb = svc.perform_detailed(URL, transformation.as_ref()).unwrap();
                (thumb.bytes, thumb.outcome)
            })
        })
        .collect();

    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

// =========================================================================
// Coalescing
// =========================================================================

#[test]
fn concurrent_requests_compute_once_in_memory() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let locker: Arc<dyn Locker> = Arc::new(MemoryLocker::new(single_try_locks()));
    let transformation = Arc::new(SlowTransformation::new(Duration::from_millis(150)));

    let results = stampede(8, store, locker, Arc::clone(&transformation));

    assert_eq!(transformation.calls(), 1);
    assert_eq!(
        results.iter().filter(|(_, o)| *o == Outcome::Computed).count(),
        1
    );
    for (bytes, _) in &results {
        assert_eq!(bytes, b"thumb of flower");
    }
}

#[test]
fn concurrent_requests_compute_once_on_filesystem() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store: Arc<dyn Store> = Arc::new(FsStore::open(tmp.path().join("store")).unwrap());
    let locker: Arc<dyn Locker> =
        Arc::new(FileLocker::open(tmp.path().join("locks"), single_try_locks()).unwrap());
    let transformation = Arc::new(SlowTransformation::new(Duration::from_millis(150)));

    let results = stampede(6, store, locker, Arc::clone(&transformation));

    assert_eq!(transformation.calls(), 1);
    assert!(results.iter().all(|(bytes, _)| bytes == b"thumb of flower"));
}

#[test]
fn broken_locker_degrades_to_unlocked_computation() {
    let settings = CoalescingSettings {
        poll_tries: 1,
        default_poll_interval: Duration::from_millis(1),
        ..CoalescingSettings::default()
    };
    let svc = service(
        Ok(b"flower".to_vec()),
        Arc::new(MemoryStore::new()),
        Arc::new(BrokenLocker),
        settings,
    );
    let transformation = SlowTransformation::new(Duration::ZERO);

    let thumb = svc.perform_detailed(URL, &transformation).unwrap();

    assert_eq!(thumb.outcome, Outcome::ComputedUnlocked);
    assert_eq!(thumb.bytes, b"thumb of flower");
    assert_eq!(transformation.calls(), 1);
}

#[test]
fn panicking_holder_frees_the_lock_for_the_next_request() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let locker: Arc<dyn Locker> = Arc::new(MemoryLocker::new(single_try_locks()));
    let settings = CoalescingSettings {
        poll_tries: 1,
        default_poll_interval: Duration::from_millis(1),
        ..CoalescingSettings::default()
    };

    let first = service(
        Ok(b"flower".to_vec()),
        Arc::clone(&store),
        Arc::clone(&locker),
        settings,
    );
    let crashed = thread::spawn(move || first.perform(URL, &PanickingTransformation)).join();
    assert!(crashed.is_err());

    let second = service(Ok(b"flower".to_vec()), store, locker, settings);
    let thumb = second
        .perform_detailed(URL, &SlowTransformation::new(Duration::ZERO))
        .unwrap();
    // Acquired the lock on the first attempt instead of waiting out the lease
    assert_eq!(thumb.outcome, Outcome::Computed);
}

// =========================================================================
// Caching with the real transformation
// =========================================================================

#[test]
fn second_request_is_served_from_store() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let locker: Arc<dyn Locker> = Arc::new(MemoryLocker::new(LockOptions::default()));
    let svc = service(
        Ok(source_jpeg(400, 300)),
        store,
        locker,
        CoalescingSettings::default(),
    );
    let letterbox = Letterbox::new(200, 200);

    let first = svc.perform_detailed(URL, &letterbox).unwrap();
    let second = svc.perform_detailed(URL, &letterbox).unwrap();

    assert_eq!(first.outcome, Outcome::Computed);
    assert_eq!(second.outcome, Outcome::Cached);
    assert_eq!(first.bytes, second.bytes);
    assert_eq!(first.fingerprint, second.fingerprint);
    assert!(first.fingerprint.ends_with("_200_200"));

    let img = image::load_from_memory(&first.bytes).unwrap();
    assert_eq!((img.width(), img.height()), (200, 200));
}

#[test]
fn different_sizes_are_cached_separately() {
    let store = Arc::new(MemoryStore::new());
    let svc = service(
        Ok(source_jpeg(400, 300)),
        store.clone(),
        Arc::new(MemoryLocker::new(LockOptions::default())),
        CoalescingSettings::default(),
    );

    svc.perform(URL, &Letterbox::new(200, 200)).unwrap();
    svc.perform(URL, &Letterbox::new(100, 100)).unwrap();

    assert_eq!(store.len(), 2);
}

#[test]
fn store_write_failure_still_serves_and_recomputes_next_time() {
    let settings = CoalescingSettings {
        poll_tries: 1,
        default_poll_interval: Duration::from_millis(1),
        ..CoalescingSettings::default()
    };
    let svc = service(
        Ok(b"flower".to_vec()),
        Arc::new(ReadOnlyStore),
        Arc::new(MemoryLocker::new(single_try_locks())),
        settings,
    );
    let transformation = SlowTransformation::new(Duration::ZERO);

    let first = svc.perform_detailed(URL, &transformation).unwrap();
    assert_eq!(first.bytes, b"thumb of flower");
    assert_eq!(first.outcome, Outcome::Computed);

    // The first lease was extended, not released, and nothing was stored:
    // the next request cannot lock, finds nothing, and computes without it.
    let second = svc.perform_detailed(URL, &transformation).unwrap();
    assert_eq!(second.outcome, Outcome::ComputedUnlocked);
    assert_eq!(transformation.calls(), 2);
}

// =========================================================================
// Errors at the boundary
// =========================================================================

#[test]
fn undecodable_source_renders_as_unsupported_content_type() {
    let svc = service(
        Ok(b"GIF89a but not really".to_vec()),
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryLocker::new(LockOptions::default())),
        CoalescingSettings::default(),
    );

    let err = svc.perform(URL, &Letterbox::new(50, 50)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedContentType);

    let response = ErrorResponse::from_error(&err);
    assert_eq!(response.status, 400);
    assert_eq!(
        response.body,
        r#"{"Error":"Content type is not supported, supported formats: jpeg, gif, png"}"#
    );
}

#[test]
fn unreachable_source_renders_as_404() {
    let svc = service(
        Err(ErrorKind::ResourceUnreachable),
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryLocker::new(LockOptions::default())),
        CoalescingSettings::default(),
    );

    let err = svc.perform(URL, &Letterbox::new(50, 50)).unwrap_err();
    let response = ErrorResponse::from_error(&err);
    assert_eq!(response.status, 404);
    assert_eq!(response.body, r#"{"Error":"Unable to access specified url"}"#);
}
