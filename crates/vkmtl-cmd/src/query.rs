use std::sync::Arc;

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

use crate::device::Device;
use crate::memory::{AllocError, Bo};

/// Size of one availability word.
pub const AVAILABILITY_STRIDE: u64 = 8;

bitflags! {
    /// How `copy_query_pool_results` writes each query.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct QueryResultFlags: u32 {
        /// Results are 64-bit; 32-bit otherwise.
        const RESULT_64 = 1 << 0;
        const WAIT = 1 << 1;
        /// Follow each result with its availability word.
        const WITH_AVAILABILITY = 1 << 2;
        const PARTIAL = 1 << 3;
    }
}

/// Push block of the library `copy_query` kernel; one thread per query.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CopyQueryParams {
    pub availability: u64,
    /// Base of the device visibility buffer.
    pub results: u64,
    /// The pool's `u16` slot per query.
    pub indices: u64,
    pub dst_addr: u64,
    pub dst_stride: u64,
    pub first_query: u32,
    pub flags: u32,
    pub reports_per_query: u16,
    pub _pad: [u16; 3],
}

const _: [(); 56] = [(); core::mem::size_of::<CopyQueryParams>()];

/// Occlusion queries backed by slots of the device visibility buffer.
///
/// Results land in the device-wide visibility buffer at each query's slot. Availability is a
/// separate 64-bit word per query, set to 1 when the query ends and back to 0 on reset. The
/// pool's slot numbers follow the availability words in the same allocation so the result copy
/// kernel can find each query's result.
pub struct OcclusionQueryPool {
    device: Arc<Device>,
    slots: Vec<u16>,
    availability: Bo,
}

impl std::fmt::Debug for OcclusionQueryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OcclusionQueryPool")
            .field("slots", &self.slots)
            .field("availability", &self.availability)
            .finish()
    }
}

impl OcclusionQueryPool {
    pub fn new(device: Arc<Device>, query_count: u32) -> Result<Self, AllocError> {
        let slots = device.allocate_occlusion_slots(query_count)?;
        let indices_offset = u64::from(query_count) * AVAILABILITY_STRIDE;
        let size = (indices_offset + u64::from(query_count) * 2).max(AVAILABILITY_STRIDE);
        let availability = match device.allocator().allocate(size, AVAILABILITY_STRIDE) {
            Ok(bo) => bo,
            Err(err) => {
                device.release_occlusion_slots(&slots);
                return Err(err);
            }
        };
        let indices: Vec<u8> = slots.iter().flat_map(|slot| slot.to_le_bytes()).collect();
        if let Err(err) = device
            .allocator()
            .write(&availability, indices_offset, &indices)
        {
            device.allocator().free(&availability);
            device.release_occlusion_slots(&slots);
            return Err(err);
        }
        Ok(Self {
            device,
            slots,
            availability,
        })
    }

    pub fn query_count(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Slot of `query` in the device visibility buffer.
    pub fn slot(&self, query: u32) -> u16 {
        self.slots[query as usize]
    }

    /// Device address of the 64-bit result of `query`.
    pub fn result_address(&self, query: u32) -> u64 {
        self.device.occlusion_result_address(self.slot(query))
    }

    pub fn availability(&self) -> &Bo {
        &self.availability
    }

    pub fn availability_address(&self, query: u32) -> u64 {
        assert!(query < self.query_count(), "query {query} out of range");
        self.availability.gpu_address + u64::from(query) * AVAILABILITY_STRIDE
    }

    /// Device address of the pool's `u16` slot numbers.
    pub fn indices_address(&self) -> u64 {
        self.availability.gpu_address + u64::from(self.query_count()) * AVAILABILITY_STRIDE
    }

    /// Panics unless `first..first + count` lies inside the pool.
    pub(crate) fn check_range(&self, first: u32, count: u32) {
        assert!(
            first
                .checked_add(count)
                .is_some_and(|end| end <= self.query_count()),
            "queries {first}..{first}+{count} out of range for pool of {}",
            self.query_count()
        );
    }
}

impl Drop for OcclusionQueryPool {
    fn drop(&mut self) {
        self.device.allocator().free(&self.availability);
        self.device.release_occlusion_slots(&self.slots);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::memory::SystemAllocator;

    #[test]
    fn pool_slots_and_addresses() {
        let allocator = Arc::new(SystemAllocator::new());
        let device = Device::new(allocator.clone(), DeviceConfig::default()).unwrap();
        let pool = OcclusionQueryPool::new(device.clone(), 4).unwrap();
        assert_eq!(pool.query_count(), 4);
        assert_eq!(pool.slot(3), 3);
        assert_eq!(
            pool.result_address(1),
            device.occlusion_results().gpu_address + 8
        );
        assert_eq!(
            pool.availability_address(2),
            pool.availability().gpu_address + 16
        );

        let second = OcclusionQueryPool::new(device.clone(), 2).unwrap();
        assert_eq!(second.slot(0), 4);
        drop(second);
        drop(pool);
        assert_eq!(allocator.live_allocations(), 3);
        let third = OcclusionQueryPool::new(device, 1).unwrap();
        assert_eq!(third.slot(0), 0);
    }

    #[test]
    fn slot_numbers_follow_availability() {
        let allocator = Arc::new(SystemAllocator::new());
        let device = Device::new(allocator.clone(), DeviceConfig::default()).unwrap();
        let _first = OcclusionQueryPool::new(device.clone(), 2).unwrap();
        let pool = OcclusionQueryPool::new(device, 3).unwrap();
        assert_eq!(pool.indices_address(), pool.availability().gpu_address + 24);
        let bytes = allocator.read_address(pool.indices_address(), 6).unwrap();
        assert_eq!(bytes, vec![2, 0, 3, 0, 4, 0]);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn wrapping_query_range_panics() {
        let allocator = Arc::new(SystemAllocator::new());
        let device = Device::new(allocator, DeviceConfig::default()).unwrap();
        let pool = OcclusionQueryPool::new(device, 4).unwrap();
        pool.check_range(2, u32::MAX);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn availability_of_missing_query_panics() {
        let allocator = Arc::new(SystemAllocator::new());
        let device = Device::new(allocator, DeviceConfig::default()).unwrap();
        let pool = OcclusionQueryPool::new(device, 1).unwrap();
        pool.availability_address(1);
    }
}
