//! LRU block cache with single-flight computation and an optional spill tier.

use daft_store::ArrayStore;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::{block_bytes, Block, BlockKey, CacheConfig, CacheError};

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests served from resident memory.
    pub hits: u64,
    /// Requests that ran the compute closure.
    pub misses: u64,
    /// Blocks pushed out to make room.
    pub evictions: u64,
    /// Evicted blocks written to the spill tier.
    pub spills: u64,
    /// Requests served by reading a spilled block back.
    pub spill_reads: u64,
    pub resident_blocks: usize,
    pub resident_bytes: usize,
}

struct Entry {
    block: Block,
    tick: u64,
}

/// Everything guarded by the cache lock.
#[derive(Default)]
struct CacheState {
    entries: HashMap<BlockKey, Entry>,
    /// Recency order: smallest tick is evicted first.
    lru: BTreeMap<u64, BlockKey>,
    /// Keys currently being computed or loaded by some caller.
    pending: HashSet<BlockKey>,
    /// Keys whose only copy lives in the spill tier.
    spilled: HashSet<BlockKey>,
    resident_bytes: usize,
    tick: u64,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn touch(&mut self, key: &BlockKey) -> Option<Block> {
        let tick = self.next_tick();
        let entry = self.entries.get_mut(key)?;
        self.lru.remove(&entry.tick);
        entry.tick = tick;
        self.lru.insert(tick, *key);
        Some(Arc::clone(&entry.block))
    }

    fn remove(&mut self, key: &BlockKey) -> Option<Block> {
        let entry = self.entries.remove(key)?;
        self.lru.remove(&entry.tick);
        self.resident_bytes -= block_bytes(&entry.block);
        Some(entry.block)
    }
}

/// Bounded cache of computed blocks.
///
/// Handles are passed explicitly to every computation; there is no global
/// instance, so budgets and lifetimes stay under the caller's control.
pub struct BlockCache {
    config: CacheConfig,
    state: Mutex<CacheState>,
    /// Signalled whenever a pending key is released.
    ready: Condvar,
    spill: Option<Arc<dyn ArrayStore>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    spills: AtomicU64,
    spill_reads: AtomicU64,
}

impl std::fmt::Debug for BlockCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockCache")
            .field("config", &self.config)
            .field("spill", &self.spill.is_some())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Releases a pending key when the computing caller finishes or unwinds.
struct PendingGuard<'a> {
    cache: &'a BlockCache,
    key: BlockKey,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.cache.state.lock().pending.remove(&self.key);
        self.cache.ready.notify_all();
    }
}

impl BlockCache {
    /// Memory-only cache: evicted blocks are dropped and recomputed on demand.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CacheState::default()),
            ready: Condvar::new(),
            spill: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            spills: AtomicU64::new(0),
            spill_reads: AtomicU64::new(0),
        }
    }

    /// Cache whose evicted blocks are written to `spill`.
    pub fn with_spill(config: CacheConfig, spill: Arc<dyn ArrayStore>) -> Self {
        let mut cache = Self::new(config);
        cache.spill = Some(spill);
        cache
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn has_spill(&self) -> bool {
        self.spill.is_some()
    }

    /// Whether the block is resident or spilled.
    pub fn contains(&self, key: &BlockKey) -> bool {
        let state = self.state.lock();
        state.entries.contains_key(key) || state.spilled.contains(key)
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            spills: self.spills.load(Ordering::Relaxed),
            spill_reads: self.spill_reads.load(Ordering::Relaxed),
            resident_blocks: state.entries.len(),
            resident_bytes: state.resident_bytes,
        }
    }

    /// Return the cached block for `key`, or run `compute` and cache its result.
    ///
    /// Only one caller computes a given key at a time; concurrent callers for
    /// the same key block until it is available. Errors from `compute` are
    /// returned unchanged and nothing is cached.
    pub fn get_or_compute<E, F>(&self, key: BlockKey, compute: F) -> Result<Block, E>
    where
        F: FnOnce() -> Result<Block, E>,
        E: From<CacheError>,
    {
        let from_spill = {
            let mut state = self.state.lock();
            loop {
                if let Some(block) = state.touch(&key) {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    trace!(?key, "Cache hit");
                    return Ok(block);
                }
                if state.pending.contains(&key) {
                    self.ready.wait(&mut state);
                    continue;
                }
                break;
            }
            state.pending.insert(key);
            state.spilled.contains(&key)
        };
        let _pending = PendingGuard { cache: self, key };

        let block = if from_spill {
            self.load_spilled(&key)?
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(?key, "Cache miss");
            compute()?
        };

        let mut state = self.state.lock();
        self.admit(&mut state, key, Arc::clone(&block))?;
        Ok(block)
    }

    /// [`get_or_compute`](Self::get_or_compute) for two blocks that are
    /// always produced together.
    ///
    /// `compute` returns the blocks for `(first, second)`. The pair is
    /// single-flight under `first`: callers asking for either key wait for a
    /// computation already in progress instead of starting their own. Returns
    /// the block for `second` when `want_second` is set, otherwise for
    /// `first`; the other block is cached for its own caller.
    pub fn get_or_compute_pair<E, F>(
        &self,
        first: BlockKey,
        second: BlockKey,
        want_second: bool,
        compute: F,
    ) -> Result<Block, E>
    where
        F: FnOnce() -> Result<(Block, Block), E>,
        E: From<CacheError>,
    {
        let wanted = if want_second { second } else { first };
        let from_spill = {
            let mut state = self.state.lock();
            loop {
                if let Some(block) = state.touch(&wanted) {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    trace!(key = ?wanted, "Cache hit");
                    return Ok(block);
                }
                if state.pending.contains(&first) {
                    self.ready.wait(&mut state);
                    continue;
                }
                break;
            }
            state.pending.insert(first);
            state.spilled.contains(&wanted)
        };
        let _pending = PendingGuard { cache: self, key: first };

        if from_spill {
            let block = self.load_spilled(&wanted)?;
            let mut state = self.state.lock();
            self.admit(&mut state, wanted, Arc::clone(&block))?;
            return Ok(block);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        trace!(key = ?wanted, "Cache miss");
        let (low, high) = compute()?;
        let (block, other, other_key) = if want_second {
            (high, low, first)
        } else {
            (low, high, second)
        };

        let mut state = self.state.lock();
        if state.spilled.remove(&other_key) {
            self.remove_spilled(&other_key);
        }
        self.admit(&mut state, other_key, other)?;
        self.admit(&mut state, wanted, Arc::clone(&block))?;
        Ok(block)
    }

    /// Store a block produced outside of [`get_or_compute`](Self::get_or_compute).
    pub fn insert(&self, key: BlockKey, block: Block) -> Result<(), CacheError> {
        let mut state = self.state.lock();
        if state.spilled.remove(&key) {
            self.remove_spilled(&key);
        }
        self.admit(&mut state, key, block)?;
        drop(state);
        self.ready.notify_all();
        Ok(())
    }

    /// Drop a block that has been consumed, from memory and the spill tier.
    pub fn discard(&self, key: &BlockKey) {
        let mut state = self.state.lock();
        state.remove(key);
        if state.spilled.remove(key) {
            self.remove_spilled(key);
        }
    }

    /// Make room for and insert a block. Caller holds the state lock.
    fn admit(
        &self,
        state: &mut CacheState,
        key: BlockKey,
        block: Block,
    ) -> Result<(), CacheError> {
        let needed = block_bytes(&block);
        if needed > self.config.budget_bytes {
            return Err(CacheError::Exhausted {
                needed,
                budget: self.config.budget_bytes,
            });
        }

        state.remove(&key);
        while state.resident_bytes + needed > self.config.budget_bytes {
            if !self.evict_lru(state)? {
                break;
            }
        }

        let tick = state.next_tick();
        state.lru.insert(tick, key);
        state.entries.insert(key, Entry { block, tick });
        state.resident_bytes += needed;
        Ok(())
    }

    /// Evict the least recently used block. Returns `false` when empty.
    fn evict_lru(&self, state: &mut CacheState) -> Result<bool, CacheError> {
        let Some((_, victim)) = state.lru.pop_first() else {
            return Ok(false);
        };
        let Some(entry) = state.entries.remove(&victim) else {
            return Ok(true);
        };
        state.resident_bytes -= block_bytes(&entry.block);
        self.evictions.fetch_add(1, Ordering::Relaxed);

        match &self.spill {
            Some(spill) => {
                let name = victim.spill_name();
                spill.create_dataset(&name, entry.block.len() as u64)?;
                spill.write_slice(&name, 0, &entry.block)?;
                state.spilled.insert(victim);
                self.spills.fetch_add(1, Ordering::Relaxed);
                debug!(key = ?victim, dataset = %name, "Spilled evicted block");
            }
            None => {
                trace!(key = ?victim, "Evicted block without spill tier");
            }
        }
        Ok(true)
    }

    fn load_spilled(&self, key: &BlockKey) -> Result<Block, CacheError> {
        let Some(spill) = &self.spill else {
            return Err(CacheError::Spill(daft_store::StoreError::NotFound(
                key.spill_name(),
            )));
        };
        let name = key.spill_name();
        let len = spill.dataset_len(&name)?;
        let values = spill.read_slice(&name, 0, len as usize)?;
        spill.remove_dataset(&name)?;
        self.state.lock().spilled.remove(key);
        self.spill_reads.fetch_add(1, Ordering::Relaxed);
        trace!(?key, "Loaded spilled block");
        Ok(Arc::from(values))
    }

    fn remove_spilled(&self, key: &BlockKey) {
        if let Some(spill) = &self.spill {
            if let Err(e) = spill.remove_dataset(&key.spill_name()) {
                warn!(?key, error = %e, "Failed to remove spilled block");
            }
        }
    }
}

impl Drop for BlockCache {
    fn drop(&mut self) {
        let spilled: Vec<BlockKey> = self.state.get_mut().spilled.drain().collect();
        for key in &spilled {
            self.remove_spilled(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daft_store::{Complex64, MemoryStore};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn block(value: f64, len: usize) -> Block {
        Arc::from(vec![Complex64::new(value, -value); len])
    }

    fn key(chunk: u64) -> BlockKey {
        BlockKey::new(0, 1, 64, chunk)
    }

    /// Budget holding exactly `blocks` blocks of `len` elements.
    fn budget(blocks: usize, len: usize) -> CacheConfig {
        CacheConfig::with_budget(blocks * len * 16)
    }

    #[test]
    fn test_compute_once_then_hit() {
        let cache = BlockCache::new(budget(4, 8));
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let b = cache
                .get_or_compute(key(0), || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, CacheError>(block(1.0, 8))
                })
                .unwrap();
            assert_eq!(b[0], Complex64::new(1.0, -1.0));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (2, 1));
    }

    #[test]
    fn test_lru_evicts_least_recent() {
        let cache = BlockCache::new(budget(2, 8));
        cache.insert(key(0), block(0.0, 8)).unwrap();
        cache.insert(key(1), block(1.0, 8)).unwrap();

        // Refresh key 0 so key 1 becomes the eviction victim.
        cache
            .get_or_compute(key(0), || -> Result<Block, CacheError> {
                panic!("key 0 must be resident")
            })
            .unwrap();
        cache.insert(key(2), block(2.0, 8)).unwrap();

        assert!(cache.contains(&key(0)));
        assert!(!cache.contains(&key(1)));
        assert!(cache.contains(&key(2)));
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.stats().resident_bytes, 2 * 8 * 16);
    }

    #[test]
    fn test_oversized_block_is_exhaustion() {
        let cache = BlockCache::new(budget(1, 8));
        let err = cache.insert(key(0), block(0.0, 9)).unwrap_err();
        assert!(matches!(
            err,
            CacheError::Exhausted {
                needed: 144,
                budget: 128
            }
        ));
    }

    #[test]
    fn test_failed_compute_is_not_cached() {
        let cache = BlockCache::new(budget(2, 8));
        let first: Result<Block, CacheError> = cache.get_or_compute(key(0), || {
            Err(CacheError::Exhausted {
                needed: 0,
                budget: 0,
            })
        });
        assert!(first.is_err());
        assert!(!cache.contains(&key(0)));

        let second = cache
            .get_or_compute(key(0), || Ok::<_, CacheError>(block(3.0, 8)))
            .unwrap();
        assert_eq!(second[0].re, 3.0);
    }

    #[test]
    fn test_single_flight_under_contention() {
        let cache = BlockCache::new(budget(4, 8));
        let calls = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let b = cache
                        .get_or_compute(key(7), || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(Duration::from_millis(50));
                            Ok::<_, CacheError>(block(7.0, 8))
                        })
                        .unwrap();
                    assert_eq!(b[0].re, 7.0);
                });
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_spill_roundtrip() {
        let spill = Arc::new(MemoryStore::new());
        let cache = BlockCache::with_spill(budget(1, 8), spill.clone());

        cache.insert(key(0), block(10.0, 8)).unwrap();
        cache.insert(key(1), block(11.0, 8)).unwrap();
        assert!(spill.contains(&key(0).spill_name()));
        assert!(cache.contains(&key(0)));

        let restored = cache
            .get_or_compute(key(0), || -> Result<Block, CacheError> {
                panic!("spilled block must be read back, not recomputed")
            })
            .unwrap();
        assert_eq!(restored[3], Complex64::new(10.0, -10.0));

        let stats = cache.stats();
        assert_eq!(stats.spill_reads, 1);
        // Reading key 0 back evicted key 1 in turn.
        assert_eq!(stats.spills, 2);
        assert!(!spill.contains(&key(0).spill_name()));
        assert!(spill.contains(&key(1).spill_name()));
    }

    #[test]
    fn test_discard_and_drop_clean_spill_tier() {
        let spill = Arc::new(MemoryStore::new());
        {
            let cache = BlockCache::with_spill(budget(1, 4), spill.clone());
            cache.insert(key(0), block(0.0, 4)).unwrap();
            cache.insert(key(1), block(1.0, 4)).unwrap();
            cache.insert(key(2), block(2.0, 4)).unwrap();
            assert_eq!(spill.dataset_names().len(), 2);

            cache.discard(&key(0));
            assert_eq!(spill.dataset_names().len(), 1);
            assert!(!cache.contains(&key(0)));
        }
        assert!(spill.dataset_names().is_empty());
    }

    #[test]
    fn test_memory_only_eviction_forces_recompute() {
        let cache = BlockCache::new(budget(1, 4));
        let calls = AtomicUsize::new(0);
        let compute = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, CacheError>(block(5.0, 4))
        };

        cache.get_or_compute(key(0), compute).unwrap();
        cache.insert(key(1), block(1.0, 4)).unwrap();
        cache.get_or_compute(key(0), compute).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().spills, 0);
    }

    #[test]
    fn test_pair_computed_once_for_both_halves() {
        let cache = BlockCache::new(budget(4, 8));
        let calls = AtomicUsize::new(0);
        let pair = || {
            calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            Ok::<_, CacheError>((block(1.0, 8), block(2.0, 8)))
        };

        let cache = &cache;
        std::thread::scope(|scope| {
            for i in 0..8 {
                let want_second = i % 2 == 1;
                scope.spawn(move || {
                    let b = cache
                        .get_or_compute_pair(key(0), key(1), want_second, pair)
                        .unwrap();
                    assert_eq!(b[0].re, if want_second { 2.0 } else { 1.0 });
                });
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.contains(&key(0)));
        assert!(cache.contains(&key(1)));
        assert_eq!(cache.stats().resident_blocks, 2);
    }

    #[test]
    fn test_pair_replaces_stale_sibling() {
        let spill = Arc::new(MemoryStore::new());
        let cache = BlockCache::with_spill(budget(2, 4), spill.clone());
        cache.insert(key(1), block(9.0, 4)).unwrap();
        cache.insert(key(5), block(5.0, 4)).unwrap();
        cache.insert(key(6), block(6.0, 4)).unwrap();
        assert!(spill.contains(&key(1).spill_name()));

        let low = cache
            .get_or_compute_pair(key(0), key(1), false, || {
                Ok::<_, CacheError>((block(1.0, 4), block(2.0, 4)))
            })
            .unwrap();
        assert_eq!(low[0].re, 1.0);
        assert!(!spill.contains(&key(1).spill_name()));

        let high = cache
            .get_or_compute(key(1), || -> Result<Block, CacheError> {
                panic!("sibling must be resident")
            })
            .unwrap();
        assert_eq!(high[0].re, 2.0);
    }
}
