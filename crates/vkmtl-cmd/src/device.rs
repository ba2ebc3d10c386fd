//! Device-wide state shared by every command buffer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use hashbrown::HashSet;
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::config::DeviceConfig;
use crate::limits::{
    DESCRIPTOR_SIZE, MAX_OCCLUSION_QUERIES, OCCLUSION_RESULT_STRIDE, SAMPLER_TABLE_ENTRIES,
};
use crate::memory::{lock, AllocError, Bo, MemoryAllocator};
use crate::native::{EventId, FenceId, HeapId};
use crate::pipeline::LibraryPipelines;

/// User memory heaps every encoder must declare resident, plus a hash of the set.
#[derive(Debug)]
struct UserHeapCache {
    heaps: Vec<HeapId>,
    members: HashSet<HeapId>,
    hash: u64,
}

impl UserHeapCache {
    fn new() -> Self {
        let mut cache = Self {
            heaps: Vec::new(),
            members: HashSet::new(),
            hash: 0,
        };
        cache.rehash();
        cache
    }

    fn rehash(&mut self) {
        let bytes: Vec<u8> = self.heaps.iter().flat_map(|h| h.0.to_le_bytes()).collect();
        self.hash = xxh3_64(&bytes);
    }
}

/// State behind the device mutex.
#[derive(Debug)]
struct Shared {
    user_heaps: UserHeapCache,
    /// Free slots of the occlusion visibility buffer.
    free_occlusion_slots: Vec<u16>,
}

pub struct Device {
    allocator: Arc<dyn MemoryAllocator>,
    config: DeviceConfig,
    library: LibraryPipelines,
    sampler_table: Bo,
    null_descriptor: Bo,
    occlusion_results: Bo,
    shared: Mutex<Shared>,
    next_fence: AtomicU64,
    next_event: AtomicU64,
    lost: AtomicBool,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("config", &self.config)
            .field("sampler_table", &self.sampler_table)
            .field("null_descriptor", &self.null_descriptor)
            .field("occlusion_results", &self.occlusion_results)
            .field("lost", &self.is_lost())
            .finish_non_exhaustive()
    }
}

impl Device {
    pub fn new(
        allocator: Arc<dyn MemoryAllocator>,
        config: DeviceConfig,
    ) -> Result<Arc<Self>, AllocError> {
        Self::with_library(allocator, config, LibraryPipelines::default())
    }

    pub fn with_library(
        allocator: Arc<dyn MemoryAllocator>,
        config: DeviceConfig,
        library: LibraryPipelines,
    ) -> Result<Arc<Self>, AllocError> {
        let sampler_table = allocator.allocate(
            (SAMPLER_TABLE_ENTRIES * DESCRIPTOR_SIZE as usize) as u64,
            u64::from(DESCRIPTOR_SIZE),
        )?;
        let null_descriptor = match allocator.allocate(u64::from(DESCRIPTOR_SIZE), 16) {
            Ok(bo) => bo,
            Err(err) => {
                allocator.free(&sampler_table);
                return Err(err);
            }
        };
        let occlusion_results = match allocator.allocate(
            u64::from(MAX_OCCLUSION_QUERIES) * OCCLUSION_RESULT_STRIDE,
            OCCLUSION_RESULT_STRIDE,
        ) {
            Ok(bo) => bo,
            Err(err) => {
                allocator.free(&null_descriptor);
                allocator.free(&sampler_table);
                return Err(err);
            }
        };

        debug!(
            sampler_table = ?sampler_table.buffer,
            occlusion_results = ?occlusion_results.buffer,
            "device created"
        );
        Ok(Arc::new(Self {
            allocator,
            config,
            library,
            sampler_table,
            null_descriptor,
            occlusion_results,
            shared: Mutex::new(Shared {
                user_heaps: UserHeapCache::new(),
                // Popped from the back, so slot 0 goes first.
                free_occlusion_slots: (0..MAX_OCCLUSION_QUERIES as u16).rev().collect(),
            }),
            next_fence: AtomicU64::new(1),
            next_event: AtomicU64::new(1),
            lost: AtomicBool::new(false),
        }))
    }

    pub fn allocator(&self) -> &Arc<dyn MemoryAllocator> {
        &self.allocator
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn library(&self) -> &LibraryPipelines {
        &self.library
    }

    /// Read-only sampler table every encoder binds at argument index 1.
    pub fn sampler_table(&self) -> &Bo {
        &self.sampler_table
    }

    /// Zeroed buffer vertex fetches of out-of-range attributes read from.
    pub fn null_descriptor(&self) -> &Bo {
        &self.null_descriptor
    }

    /// Visibility result buffer shared by all render passes.
    pub fn occlusion_results(&self) -> &Bo {
        &self.occlusion_results
    }

    pub fn new_fence(&self) -> FenceId {
        FenceId(self.next_fence.fetch_add(1, Ordering::Relaxed))
    }

    pub fn new_event(&self) -> EventId {
        EventId(self.next_event.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a heap backing user allocations. Adding a heap twice is a no-op.
    pub fn add_user_heap(&self, heap: HeapId) {
        let mut shared = lock(&self.shared);
        let cache = &mut shared.user_heaps;
        if cache.members.insert(heap) {
            cache.heaps.push(heap);
            cache.rehash();
            debug!(?heap, hash = cache.hash, "user heap added");
        }
    }

    pub fn remove_user_heap(&self, heap: HeapId) {
        let mut shared = lock(&self.shared);
        let cache = &mut shared.user_heaps;
        if cache.members.remove(&heap) {
            if let Some(pos) = cache.heaps.iter().position(|h| *h == heap) {
                cache.heaps.swap_remove(pos);
            }
            cache.rehash();
            debug!(?heap, hash = cache.hash, "user heap removed");
        }
    }

    pub fn user_heap_hash(&self) -> u64 {
        lock(&self.shared).user_heaps.hash
    }

    /// Current heap list and its hash, unless the hash equals `last_seen`.
    pub fn user_heaps_if_changed(&self, last_seen: Option<u64>) -> Option<(u64, Vec<HeapId>)> {
        let shared = lock(&self.shared);
        let cache = &shared.user_heaps;
        if last_seen == Some(cache.hash) {
            return None;
        }
        Some((cache.hash, cache.heaps.clone()))
    }

    pub(crate) fn allocate_occlusion_slots(&self, count: u32) -> Result<Vec<u16>, AllocError> {
        let mut shared = lock(&self.shared);
        let free = shared.free_occlusion_slots.len();
        if count as usize > free {
            return Err(AllocError::OutOfDeviceMemory {
                requested: u64::from(count) * OCCLUSION_RESULT_STRIDE,
                available: free as u64 * OCCLUSION_RESULT_STRIDE,
            });
        }
        let start = free - count as usize;
        let mut slots = shared.free_occlusion_slots.split_off(start);
        slots.reverse();
        Ok(slots)
    }

    pub(crate) fn release_occlusion_slots(&self, slots: &[u16]) {
        let mut shared = lock(&self.shared);
        shared.free_occlusion_slots.extend(slots.iter().rev().copied());
    }

    /// Device address of an occlusion slot's 64-bit result.
    pub fn occlusion_result_address(&self, slot: u16) -> u64 {
        self.occlusion_results.gpu_address + u64::from(slot) * OCCLUSION_RESULT_STRIDE
    }

    /// Record that the device was lost; every later recording and submission fails.
    pub fn mark_lost(&self) {
        if !self.lost.swap(true, Ordering::AcqRel) {
            warn!("device lost");
        }
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.allocator.free(&self.occlusion_results);
        self.allocator.free(&self.null_descriptor);
        self.allocator.free(&self.sampler_table);
    }
}
