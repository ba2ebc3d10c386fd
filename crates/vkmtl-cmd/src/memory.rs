//! Device memory allocator interface plus a host-backed implementation.
//!
//! Every scratch buffer the engine creates (root tables, push-descriptor shadows, emulation
//! outputs, immediate-write uploads) comes from a [`MemoryAllocator`]. Allocations are
//! exclusively owned by the command buffer that requested them and are freed exactly once.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::native::BufferId;

/// A device allocation: native buffer handle plus its GPU virtual address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Bo {
    pub buffer: BufferId,
    pub gpu_address: u64,
    pub size: u64,
}

impl Bo {
    /// GPU address one past the end of the allocation.
    pub fn end_address(&self) -> u64 {
        self.gpu_address + self.size
    }

    pub fn contains_address(&self, address: u64) -> bool {
        address >= self.gpu_address && address < self.end_address()
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AllocError {
    #[error("device memory exhausted: requested {requested} bytes with {available} available")]
    OutOfDeviceMemory { requested: u64, available: u64 },
    #[error("host memory exhausted")]
    HostExhausted,
    #[error("invalid alignment {0}; must be a non-zero power of two")]
    InvalidAlignment(u64),
    #[error("write of {len} bytes at offset {offset} overflows allocation of {size} bytes")]
    OutOfBounds { offset: u64, len: u64, size: u64 },
    #[error("unknown buffer {0:?}")]
    UnknownBuffer(BufferId),
}

/// Allocator collaborator used for every scratch buffer.
pub trait MemoryAllocator: Send + Sync {
    fn allocate(&self, size: u64, align: u64) -> Result<Bo, AllocError>;

    /// Copy `data` into the host mapping of `bo` at `offset`.
    fn write(&self, bo: &Bo, offset: u64, data: &[u8]) -> Result<(), AllocError>;

    fn free(&self, bo: &Bo);
}

/// Smallest multiple of `alignment` not below `value`; clamps to the largest representable
/// multiple when that would overflow.
pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    let last_multiple = u64::MAX - u64::MAX % alignment;
    value
        .div_ceil(alignment)
        .checked_mul(alignment)
        .unwrap_or(last_multiple)
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// First GPU address handed out by [`SystemAllocator`]; keeps zero free as the null address.
const BASE_GPU_ADDRESS: u64 = 0x1_0000_0000;

#[derive(Debug)]
struct Allocation {
    gpu_address: u64,
    bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct SystemAllocatorInner {
    next_buffer: u64,
    next_address: u64,
    live_bytes: u64,
    total_allocations: u64,
    allocations: HashMap<BufferId, Allocation>,
}

/// Host-memory allocator that models a flat GPU address space.
///
/// Useful as the device memory of tests and tools: contents can be read back by handle or by
/// GPU address, and an optional byte budget makes device memory exhaustion reproducible.
#[derive(Debug)]
pub struct SystemAllocator {
    budget: Option<u64>,
    inner: Mutex<SystemAllocatorInner>,
}

impl Default for SystemAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemAllocator {
    pub fn new() -> Self {
        Self {
            budget: None,
            inner: Mutex::new(SystemAllocatorInner {
                next_buffer: 1,
                next_address: BASE_GPU_ADDRESS,
                ..SystemAllocatorInner::default()
            }),
        }
    }

    /// Allocator that fails once more than `bytes` are live at the same time.
    pub fn with_budget(bytes: u64) -> Self {
        Self {
            budget: Some(bytes),
            ..Self::new()
        }
    }

    /// Contents of a live allocation.
    pub fn read(&self, bo: &Bo) -> Option<Vec<u8>> {
        lock(&self.inner)
            .allocations
            .get(&bo.buffer)
            .map(|a| a.bytes.clone())
    }

    /// `len` bytes starting at GPU address `address`, if they lie inside one live allocation.
    pub fn read_address(&self, address: u64, len: usize) -> Option<Vec<u8>> {
        let inner = lock(&self.inner);
        inner.allocations.values().find_map(|a| {
            let start = address.checked_sub(a.gpu_address)? as usize;
            let end = start.checked_add(len)?;
            a.bytes.get(start..end).map(<[u8]>::to_vec)
        })
    }

    /// Live allocation whose address range contains `address`.
    pub fn lookup_address(&self, address: u64) -> Option<Bo> {
        let inner = lock(&self.inner);
        inner.allocations.iter().find_map(|(buffer, a)| {
            let bo = Bo {
                buffer: *buffer,
                gpu_address: a.gpu_address,
                size: a.bytes.len() as u64,
            };
            bo.contains_address(address).then_some(bo)
        })
    }

    pub fn is_live(&self, buffer: BufferId) -> bool {
        lock(&self.inner).allocations.contains_key(&buffer)
    }

    pub fn live_allocations(&self) -> usize {
        lock(&self.inner).allocations.len()
    }

    pub fn live_bytes(&self) -> u64 {
        lock(&self.inner).live_bytes
    }

    /// Number of successful allocations over the allocator's lifetime.
    pub fn total_allocations(&self) -> u64 {
        lock(&self.inner).total_allocations
    }
}

impl MemoryAllocator for SystemAllocator {
    fn allocate(&self, size: u64, align: u64) -> Result<Bo, AllocError> {
        if align == 0 || !align.is_power_of_two() {
            return Err(AllocError::InvalidAlignment(align));
        }

        let mut inner = lock(&self.inner);
        if let Some(budget) = self.budget {
            let available = budget.saturating_sub(inner.live_bytes);
            if size > available {
                return Err(AllocError::OutOfDeviceMemory {
                    requested: size,
                    available,
                });
            }
        }
        let len = usize::try_from(size).map_err(|_| AllocError::HostExhausted)?;
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|_| AllocError::HostExhausted)?;
        bytes.resize(len, 0);

        let gpu_address = align_up(inner.next_address, align);
        // Keep a guard gap so adjacent allocations never share an address.
        inner.next_address = align_up(gpu_address + size.max(1), 256);

        let buffer = BufferId(inner.next_buffer);
        inner.next_buffer += 1;
        inner.live_bytes += size;
        inner.total_allocations += 1;
        inner
            .allocations
            .insert(buffer, Allocation { gpu_address, bytes });

        Ok(Bo {
            buffer,
            gpu_address,
            size,
        })
    }

    fn write(&self, bo: &Bo, offset: u64, data: &[u8]) -> Result<(), AllocError> {
        let mut inner = lock(&self.inner);
        let allocation = inner
            .allocations
            .get_mut(&bo.buffer)
            .ok_or(AllocError::UnknownBuffer(bo.buffer))?;
        let size = allocation.bytes.len() as u64;
        let len = data.len() as u64;
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= size)
            .ok_or(AllocError::OutOfBounds { offset, len, size })?;
        allocation.bytes[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    fn free(&self, bo: &Bo) {
        let mut inner = lock(&self.inner);
        if let Some(allocation) = inner.allocations.remove(&bo.buffer) {
            inner.live_bytes -= allocation.bytes.len() as u64;
        } else {
            tracing::warn!(buffer = ?bo.buffer, "free of unknown buffer");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_multiple() {
        for (value, alignment, aligned) in [
            (0, 4, 0),
            (1, 4, 4),
            (4, 4, 4),
            (5, 4, 8),
            (255, 256, 256),
            (BASE_GPU_ADDRESS + 1, 256, BASE_GPU_ADDRESS + 256),
            (7, 1, 7),
        ] {
            assert_eq!(align_up(value, alignment), aligned, "{value} to {alignment}");
        }
    }

    #[test]
    fn align_up_clamps_instead_of_wrapping() {
        assert_eq!(align_up(u64::MAX, 16), u64::MAX - 15);
        assert_eq!(align_up(u64::MAX - 20, 16), u64::MAX - 15);
        assert_eq!(align_up(u64::MAX, 1), u64::MAX);
    }

    #[test]
    fn allocations_respect_alignment_and_do_not_overlap() {
        let alloc = SystemAllocator::new();
        let a = alloc.allocate(3, 8).unwrap();
        let b = alloc.allocate(100, 64).unwrap();
        assert_eq!(a.gpu_address % 8, 0);
        assert_eq!(b.gpu_address % 64, 0);
        assert!(a.end_address() <= b.gpu_address);
        assert_ne!(a.buffer, b.buffer);
        assert_eq!(alloc.live_allocations(), 2);
        assert_eq!(alloc.live_bytes(), 103);
    }

    #[test]
    fn write_and_read_back_by_address() {
        let alloc = SystemAllocator::new();
        let bo = alloc.allocate(16, 16).unwrap();
        alloc.write(&bo, 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(
            alloc.read_address(bo.gpu_address + 4, 4),
            Some(vec![1, 2, 3, 4])
        );
        assert_eq!(alloc.lookup_address(bo.gpu_address + 15), Some(bo));
        assert_eq!(alloc.lookup_address(bo.gpu_address + 16), None);
    }

    #[test]
    fn out_of_bounds_write_is_rejected() {
        let alloc = SystemAllocator::new();
        let bo = alloc.allocate(8, 4).unwrap();
        let err = alloc.write(&bo, 6, &[0; 4]).unwrap_err();
        assert_eq!(
            err,
            AllocError::OutOfBounds {
                offset: 6,
                len: 4,
                size: 8
            }
        );
    }

    #[test]
    fn budget_is_enforced_on_live_bytes() {
        let alloc = SystemAllocator::with_budget(64);
        let a = alloc.allocate(48, 16).unwrap();
        assert!(matches!(
            alloc.allocate(32, 16),
            Err(AllocError::OutOfDeviceMemory {
                requested: 32,
                available: 16
            })
        ));
        alloc.free(&a);
        assert!(alloc.allocate(32, 16).is_ok());
    }

    #[test]
    fn invalid_alignment_is_rejected() {
        let alloc = SystemAllocator::new();
        assert_eq!(alloc.allocate(4, 3), Err(AllocError::InvalidAlignment(3)));
        assert_eq!(alloc.allocate(4, 0), Err(AllocError::InvalidAlignment(0)));
    }
}
