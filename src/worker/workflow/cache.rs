//! The sticky execution cache: suspended workflow runs kept on this worker so history can be
//! applied incrementally instead of replayed from the start.

use crate::worker::workflow::WorkflowContext;
use lru::LruCache;
use std::{num::NonZeroUsize, sync::Arc};

/// Capacity used when the host never calls [set_sticky_cache_size].
pub const DEFAULT_STICKY_CACHE_SIZE: usize = 10_000;

/// Bounded LRU of [WorkflowContext]s keyed by run id.
///
/// Must live inside a Tokio runtime: evictions run the entry's teardown on a spawned task so the
/// evicting caller is never blocked on another run's mutex.
pub struct StickyCache {
    runs: parking_lot::Mutex<LruCache<String, Arc<WorkflowContext>>>,
}

impl StickyCache {
    pub fn new(max_size: usize) -> Self {
        // A zero-capacity LRU is useless; sticky-disabled workers simply never insert.
        let cap = NonZeroUsize::new(max_size.max(1)).expect("LRU size is guaranteed positive");
        Self {
            runs: parking_lot::Mutex::new(LruCache::new(cap)),
        }
    }

    pub fn get(&self, run_id: &str) -> Option<Arc<WorkflowContext>> {
        self.runs.lock().get(run_id).cloned()
    }

    /// Insert unless the run is already cached, returning whichever context is authoritative
    /// afterwards. Overflowing the capacity evicts the least-recently-used run and triggers its
    /// eviction callback.
    pub fn put_if_not_exist(
        &self,
        run_id: String,
        context: Arc<WorkflowContext>,
    ) -> Arc<WorkflowContext> {
        let evicted = {
            let mut runs = self.runs.lock();
            if let Some(existing) = runs.get(&run_id) {
                return existing.clone();
            }
            let evicted = if runs.len() == runs.cap().get() {
                runs.pop_lru().map(|(_, ctx)| ctx)
            } else {
                None
            };
            runs.put(run_id, context.clone());
            evicted
        };
        if let Some(ctx) = evicted {
            spawn_eviction(ctx);
        }
        context
    }

    /// Voluntary removal: completed and errored runs leave silently, with no eviction callback
    /// and no reset-stickiness request.
    pub fn delete(&self, run_id: &str) {
        self.runs.lock().pop(run_id);
    }

    pub fn size(&self) -> usize {
        self.runs.lock().len()
    }

    /// Evict everything, with callbacks. Used when a worker shuts down so the server stops
    /// routing decision tasks to a sticky queue nobody polls.
    pub fn clear(&self) {
        let drained: Vec<_> = {
            let mut runs = self.runs.lock();
            let mut drained = vec![];
            while let Some((_, ctx)) = runs.pop_lru() {
                drained.push(ctx);
            }
            drained
        };
        for ctx in drained {
            spawn_eviction(ctx);
        }
    }
}

/// The callback must not run under the cache lock, and must not make the evicting task wait on
/// the entry's mutex (another pass may hold it for a long time).
fn spawn_eviction(context: Arc<WorkflowContext>) {
    tokio::spawn(async move {
        debug!(run_id = %context.run_id(), "Evicting workflow run from sticky cache");
        context.on_eviction().await;
    });
}

struct ProcessCacheSlot {
    size: usize,
    cache: Option<Arc<StickyCache>>,
}

lazy_static::lazy_static! {
    static ref PROCESS_CACHE: parking_lot::Mutex<ProcessCacheSlot> =
        parking_lot::Mutex::new(ProcessCacheSlot {
            size: DEFAULT_STICKY_CACHE_SIZE,
            cache: None,
        });
}

/// Set the process-wide sticky cache capacity. The cache is shared between all workers in the
/// process, so this must be called before any worker starts.
///
/// # Panics
/// Panics if the cache has already been created; resizing a live cache is a programming error.
pub fn set_sticky_cache_size(size: usize) {
    let mut slot = PROCESS_CACHE.lock();
    if slot.cache.is_some() {
        panic!("sticky cache already created, set the cache size before any worker starts");
    }
    slot.size = size;
}

/// The process-wide sticky cache, created on first use with the configured size. Initialization
/// is idempotent and safe against concurrent worker startup.
pub fn sticky_cache() -> Arc<StickyCache> {
    let mut slot = PROCESS_CACHE.lock();
    if let Some(cache) = &slot.cache {
        return cache.clone();
    }
    let cache = Arc::new(StickyCache::new(slot.size));
    slot.cache = Some(cache.clone());
    cache
}
