use std::sync::Arc;

use tracing::trace;

use crate::error::RecordError;
use crate::memory::{Bo, MemoryAllocator};
use crate::stats::RecordStats;

/// Scratch device memory owned by one command buffer.
///
/// Every allocation stays alive until [`ScratchMemory::release_all`], which runs at reset and
/// when the command buffer is dropped.
pub(crate) struct ScratchMemory {
    allocator: Arc<dyn MemoryAllocator>,
    bos: Vec<Bo>,
}

impl ScratchMemory {
    pub fn new(allocator: Arc<dyn MemoryAllocator>) -> Self {
        Self {
            allocator,
            bos: Vec::new(),
        }
    }

    pub fn allocate(
        &mut self,
        size: u64,
        align: u64,
        stats: &mut RecordStats,
    ) -> Result<Bo, RecordError> {
        self.bos
            .try_reserve(1)
            .map_err(|_| RecordError::OutOfHostMemory("scratch allocation list"))?;
        let bo = self.allocator.allocate(size, align)?;
        trace!(buffer = ?bo.buffer, size, align, "scratch allocation");
        self.bos.push(bo);
        RecordStats::inc(&mut stats.scratch_allocations);
        stats.scratch_bytes = stats.scratch_bytes.saturating_add(size);
        Ok(bo)
    }

    /// Allocate exactly `data.len()` bytes and copy `data` in.
    pub fn upload(
        &mut self,
        data: &[u8],
        align: u64,
        stats: &mut RecordStats,
    ) -> Result<Bo, RecordError> {
        let bo = self.allocate(data.len() as u64, align, stats)?;
        self.write(&bo, 0, data)?;
        Ok(bo)
    }

    pub fn write(&self, bo: &Bo, offset: u64, data: &[u8]) -> Result<(), RecordError> {
        self.allocator.write(bo, offset, data)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.bos.len()
    }

    pub fn buffers(&self) -> &[Bo] {
        &self.bos
    }

    pub fn release_all(&mut self) {
        for bo in self.bos.drain(..) {
            self.allocator.free(&bo);
        }
    }
}

impl Drop for ScratchMemory {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::SystemAllocator;

    #[test]
    fn release_all_frees_every_allocation() {
        let allocator = Arc::new(SystemAllocator::new());
        let mut scratch = ScratchMemory::new(allocator.clone());
        let mut stats = RecordStats::default();
        scratch.allocate(64, 16, &mut stats).unwrap();
        let bo = scratch.upload(&[1, 2, 3], 4, &mut stats).unwrap();
        assert_eq!(allocator.read(&bo), Some(vec![1, 2, 3]));
        assert_eq!(scratch.len(), 2);
        assert_eq!(stats.scratch_allocations, 2);
        assert_eq!(stats.scratch_bytes, 67);

        scratch.release_all();
        assert_eq!(scratch.len(), 0);
        assert_eq!(allocator.live_allocations(), 0);
    }

    #[test]
    fn drop_releases_memory() {
        let allocator = Arc::new(SystemAllocator::new());
        {
            let mut scratch = ScratchMemory::new(allocator.clone());
            scratch
                .allocate(8, 8, &mut RecordStats::default())
                .unwrap();
        }
        assert_eq!(allocator.live_allocations(), 0);
    }

    #[test]
    fn exhaustion_maps_to_device_memory_error() {
        let allocator = Arc::new(SystemAllocator::with_budget(16));
        let mut scratch = ScratchMemory::new(allocator);
        let err = scratch
            .allocate(32, 16, &mut RecordStats::default())
            .unwrap_err();
        assert!(matches!(err, RecordError::OutOfDeviceMemory(_)), "{err:?}");
    }
}
