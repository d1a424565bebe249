//! Writing transforms to persistent stores.

use daft::{
    compute, naive_dft, write_to_store, ArrayStore, BlockCache, CacheConfig, CancelToken,
    Complex64, Daft, DaftError, DaftResult, DatasetSource, FftKernel, MemoryStore, MmapStore,
    RustFftKernel,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};
use tracing_test::traced_test;

fn random_signal(n: usize, seed: u64) -> Vec<Complex64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| Complex64::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)))
        .collect()
}

fn read_all(store: &dyn ArrayStore, name: &str) -> Vec<Complex64> {
    let len = store.dataset_len(name).unwrap();
    store.read_slice(name, 0, len as usize).unwrap()
}

#[test]
fn test_memory_store_matches_in_memory_compute() {
    let signal = random_signal(512, 1);
    let store = MemoryStore::new();
    let cache = BlockCache::new(CacheConfig::default());

    let written = write_to_store(&signal, &store, "spectrum", 32, &cache).unwrap();
    assert_eq!(written, 512);

    let in_memory = compute(&signal, 32, &cache).unwrap();
    assert_eq!(read_all(&store, "spectrum"), in_memory);
    assert!(!store.contains("spectrum.partial"));
}

#[test]
fn test_mmap_store_matches_in_memory_compute() {
    let dir = tempfile::tempdir().unwrap();
    let store = MmapStore::open(dir.path()).unwrap();
    let signal = random_signal(256, 2);
    let cache = BlockCache::new(CacheConfig::default());

    write_to_store(&signal, &store, "spectrum", 16, &cache).unwrap();
    let stored = read_all(&store, "spectrum");
    let expected = naive_dft(&signal);
    for (a, e) in stored.iter().zip(&expected) {
        assert!((a - e).norm() < 1e-9);
    }
    assert!(!store.contains("spectrum.partial"));

    // Reopening sees the finished dataset.
    drop(store);
    let reopened = MmapStore::open(dir.path()).unwrap();
    assert_eq!(read_all(&reopened, "spectrum"), stored);
}

#[test]
fn test_existing_dataset_is_replaced() {
    let store = MemoryStore::new();
    store.create_dataset("spectrum", 3).unwrap();

    let signal = random_signal(64, 3);
    let cache = BlockCache::new(CacheConfig::default());
    write_to_store(&signal, &store, "spectrum", 8, &cache).unwrap();
    assert_eq!(store.dataset_len("spectrum").unwrap(), 64);
}

#[test]
fn test_failed_write_leaves_nothing_behind() {
    let dir = tempfile::tempdir().unwrap();
    let store = MmapStore::open(dir.path()).unwrap();
    let mut signal = random_signal(128, 4);
    signal[77] = Complex64::new(f64::NAN, 0.0);
    let cache = BlockCache::new(CacheConfig::default());

    let err = write_to_store(&signal, &store, "spectrum", 16, &cache).unwrap_err();
    assert!(matches!(err, DaftError::Compute(_)));
    assert!(!store.contains("spectrum"));
    assert!(!store.contains("spectrum.partial"));
}

#[test]
fn test_failed_write_keeps_previous_dataset() {
    let store = MemoryStore::new();
    let cache = BlockCache::new(CacheConfig::default());
    let good = random_signal(64, 5);
    write_to_store(&good, &store, "spectrum", 8, &cache).unwrap();
    let before = read_all(&store, "spectrum");

    let mut bad = good.clone();
    bad[0].im = f64::INFINITY;
    assert!(write_to_store(&bad, &store, "spectrum", 8, &cache).is_err());
    assert_eq!(read_all(&store, "spectrum"), before);
    assert!(!store.contains("spectrum.partial"));
}

#[test]
fn test_unsupported_length_creates_no_dataset() {
    let store = MemoryStore::new();
    let cache = BlockCache::new(CacheConfig::default());
    let signal = random_signal(100, 6);
    assert!(matches!(
        write_to_store(&signal, &store, "spectrum", 7, &cache),
        Err(DaftError::UnsupportedLength { .. })
    ));
    assert!(store.dataset_names().is_empty());
}

#[test]
fn test_cancelled_transform_returns_cancelled() {
    let store = MemoryStore::new();
    let cache = BlockCache::new(CacheConfig::default());
    let signal = random_signal(256, 7);

    let token = CancelToken::new();
    token.cancel();
    let daft = Daft::new().with_chunksize(16).with_cancel_token(token);

    let err = daft
        .write_to_store(&signal, &store, "spectrum", &cache)
        .unwrap_err();
    assert!(matches!(err, DaftError::Cancelled));
    assert!(store.dataset_names().is_empty());
}

/// Kernel that stops after `after` blocks until the run has been cancelled.
struct StallingKernel {
    inner: RustFftKernel,
    calls: AtomicUsize,
    after: usize,
    reached: Arc<Barrier>,
    token: CancelToken,
}

impl FftKernel for StallingKernel {
    fn name(&self) -> &'static str {
        "stalling"
    }

    fn fft(&self, values: Vec<Complex64>) -> DaftResult<Vec<Complex64>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
            self.reached.wait();
            let deadline = Instant::now() + Duration::from_secs(10);
            while !self.token.is_cancelled() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        self.inner.fft(values)
    }
}

#[test]
fn test_cancel_during_run_then_reuse_cache() {
    let store = MemoryStore::new();
    let cache = BlockCache::new(CacheConfig::default());
    let token = CancelToken::new();
    let reached = Arc::new(Barrier::new(2));
    let kernel = Arc::new(StallingKernel {
        inner: RustFftKernel::default(),
        calls: AtomicUsize::new(0),
        after: 4,
        reached: reached.clone(),
        token: token.clone(),
    });
    let daft = Daft::new()
        .with_chunksize(16)
        .with_workers(1)
        .with_kernel(kernel.clone())
        .with_cancel_token(token.clone());

    let first = random_signal(256, 12);
    let result = std::thread::scope(|scope| {
        scope.spawn(|| {
            reached.wait();
            token.cancel();
        });
        daft.write_to_store(&first, &store, "spectrum", &cache)
    });

    assert!(matches!(result, Err(DaftError::Cancelled)));
    assert_eq!(kernel.calls.load(Ordering::SeqCst), 4);
    assert!(store.dataset_names().is_empty());
    assert_eq!(cache.stats().resident_blocks, 0);

    let second = random_signal(256, 13);
    let daft = Daft::new().with_chunksize(16).with_workers(1);
    daft.write_to_store(&second, &store, "spectrum", &cache)
        .unwrap();
    let expected = naive_dft(&second);
    for (a, e) in read_all(&store, "spectrum").iter().zip(&expected) {
        assert!((a - e).norm() < 1e-9);
    }
}

#[test]
fn test_failed_run_does_not_leak_into_next_run() {
    let cache = BlockCache::new(CacheConfig::with_budget(4 * 8 * 16));
    let daft = Daft::new().with_chunksize(8).with_workers(1);

    let mut bad = random_signal(64, 14);
    bad[63] = Complex64::new(f64::NAN, 0.0);
    assert!(matches!(
        daft.compute(&bad, &cache),
        Err(DaftError::Compute(_))
    ));

    let good = random_signal(64, 15);
    let out = daft.compute(&good, &cache).unwrap();
    let expected = naive_dft(&good);
    for (a, e) in out.iter().zip(&expected) {
        assert!((a - e).norm() < 1e-9);
    }
}

#[test]
fn test_stored_input_matches_in_memory_input() {
    let store = MemoryStore::new();
    let signal = random_signal(128, 8);
    store.create_dataset("signal", 128).unwrap();
    store.write_slice("signal", 0, &signal).unwrap();

    let cache = BlockCache::new(CacheConfig::default());
    let source = DatasetSource::open(&store, "signal").unwrap();
    let daft = Daft::new().with_chunksize(16);
    daft.write_to_store(&source, &store, "spectrum", &cache)
        .unwrap();

    assert_eq!(
        read_all(&store, "spectrum"),
        daft.compute(&signal, &cache).unwrap()
    );
}

#[test]
fn test_spill_tier_serves_evicted_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let spill = Arc::new(MmapStore::open(dir.path().join("spill")).unwrap());
    let signal = random_signal(256, 9);

    // Two leaf-sized blocks resident at most.
    let cache = BlockCache::with_spill(CacheConfig::with_budget(2 * 16 * 16), spill.clone());
    let out = compute(&signal, 16, &cache).unwrap();

    let expected = naive_dft(&signal);
    for (a, e) in out.iter().zip(&expected) {
        assert!((a - e).norm() < 1e-9);
    }
    let stats = cache.stats();
    assert!(stats.spills > 0);
    assert!(stats.spill_reads > 0);
}

#[test]
#[traced_test]
fn test_write_logs_completion() {
    let store = MemoryStore::new();
    let cache = BlockCache::new(CacheConfig::default());
    let signal = random_signal(32, 10);
    write_to_store(&signal, &store, "spectrum", 8, &cache).unwrap();

    assert!(logs_contain("Transform written"));
}
