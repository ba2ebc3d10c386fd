use std::fmt;
use std::sync::Arc;

use crate::descriptor::layout::{DescriptorSetLayout, DescriptorType};
use crate::descriptor::write::{DescriptorTarget, DescriptorWrite};
use crate::limits::{DESCRIPTOR_SIZE, PUSH_DESCRIPTOR_SET_SIZE};
use crate::memory::{AllocError, Bo, MemoryAllocator};
use crate::native::BufferId;
use crate::root_table::BufferAddress;

/// Copy of `count` descriptors from one set binding to another.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorCopy {
    pub src_binding: u32,
    pub src_array_element: u32,
    pub dst_binding: u32,
    pub dst_array_element: u32,
    pub count: u32,
}

/// A descriptor set: device memory laid out by its layout plus the CPU-side dynamic buffers.
///
/// Sets are written before they are bound and are shared with command buffers through `Arc`;
/// the device memory is released when the last reference drops.
pub struct DescriptorSet {
    allocator: Arc<dyn MemoryAllocator>,
    layout: Arc<DescriptorSetLayout>,
    bo: Option<Bo>,
    data: Vec<u8>,
    dynamic_buffers: Vec<BufferAddress>,
}

impl fmt::Debug for DescriptorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorSet")
            .field("bo", &self.bo)
            .field("size", &self.data.len())
            .field("dynamic_buffers", &self.dynamic_buffers.len())
            .finish_non_exhaustive()
    }
}

impl DescriptorSet {
    /// Allocate descriptor memory for `layout`. Empty layouts get no backing buffer.
    pub fn new(
        allocator: Arc<dyn MemoryAllocator>,
        layout: Arc<DescriptorSetLayout>,
    ) -> Result<Self, AllocError> {
        let size = layout.size();
        let bo = if size > 0 {
            Some(allocator.allocate(u64::from(size), u64::from(DESCRIPTOR_SIZE))?)
        } else {
            None
        };
        Ok(Self {
            dynamic_buffers: vec![BufferAddress::NULL; usize::from(layout.dynamic_buffer_count())],
            data: vec![0; size as usize],
            allocator,
            layout,
            bo,
        })
    }

    pub fn write(&mut self, writes: &[DescriptorWrite]) -> Result<(), AllocError> {
        let mut target = DescriptorTarget {
            layout: &self.layout,
            data: &mut self.data,
            dynamic_buffers: &mut self.dynamic_buffers,
        };
        for write in writes {
            target.write(write);
        }
        self.upload()
    }

    /// Copy descriptors out of `src` into this set.
    pub fn copy_from(&mut self, src: &DescriptorSet, copy: &DescriptorCopy) -> Result<(), AllocError> {
        let src_binding = src
            .layout
            .binding(copy.src_binding)
            .unwrap_or_else(|| panic!("copy from unknown binding {}", copy.src_binding));
        let dst_binding = self
            .layout
            .binding(copy.dst_binding)
            .unwrap_or_else(|| panic!("copy to unknown binding {}", copy.dst_binding));
        assert_eq!(src_binding.ty, dst_binding.ty, "descriptor copy type mismatch");

        if src_binding.ty.is_dynamic() {
            let src_start = usize::from(src_binding.dynamic_buffer_index) + copy.src_array_element as usize;
            let dst_start = usize::from(dst_binding.dynamic_buffer_index) + copy.dst_array_element as usize;
            let count = copy.count as usize;
            self.dynamic_buffers[dst_start..dst_start + count]
                .copy_from_slice(&src.dynamic_buffers[src_start..src_start + count]);
            return Ok(());
        }

        let (src_offset, dst_offset, len) = if src_binding.ty == DescriptorType::InlineUniformBlock {
            (
                src_binding.offset + copy.src_array_element,
                dst_binding.offset + copy.dst_array_element,
                copy.count,
            )
        } else {
            (
                src_binding.offset + copy.src_array_element * src_binding.stride,
                dst_binding.offset + copy.dst_array_element * dst_binding.stride,
                copy.count * src_binding.stride,
            )
        };
        let (src_offset, dst_offset, len) = (src_offset as usize, dst_offset as usize, len as usize);
        self.data[dst_offset..dst_offset + len]
            .copy_from_slice(&src.data[src_offset..src_offset + len]);
        self.upload()
    }

    fn upload(&self) -> Result<(), AllocError> {
        match &self.bo {
            Some(bo) => self.allocator.write(bo, 0, &self.data),
            None => Ok(()),
        }
    }

    pub fn layout(&self) -> &Arc<DescriptorSetLayout> {
        &self.layout
    }

    /// Device address and size of the set's descriptor memory.
    pub fn address(&self) -> BufferAddress {
        match &self.bo {
            Some(bo) => BufferAddress {
                base_addr: bo.gpu_address,
                size: bo.size as u32,
                zero: 0,
            },
            None => BufferAddress::NULL,
        }
    }

    /// Buffer that must be resident while shaders read this set.
    pub fn buffer(&self) -> Option<BufferId> {
        self.bo.map(|bo| bo.buffer)
    }

    pub fn dynamic_buffers(&self) -> &[BufferAddress] {
        &self.dynamic_buffers
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for DescriptorSet {
    fn drop(&mut self) {
        if let Some(bo) = self.bo.take() {
            self.allocator.free(&bo);
        }
    }
}

/// CPU shadow of a push-descriptor set.
///
/// The shadow is copied into fresh scratch memory every time it is flushed; `buffer` remembers
/// the latest copy so it can be made resident.
#[derive(Clone, Debug)]
pub struct PushDescriptorSet {
    layout: Arc<DescriptorSetLayout>,
    data: Box<[u8; PUSH_DESCRIPTOR_SET_SIZE]>,
    buffer: Option<BufferId>,
}

impl PushDescriptorSet {
    /// Empty shadow; all-zero bytes encode null descriptors of every type.
    pub fn new(layout: Arc<DescriptorSetLayout>) -> Self {
        assert!(layout.is_push_descriptor(), "layout is not a push descriptor layout");
        Self {
            layout,
            data: Box::new([0; PUSH_DESCRIPTOR_SET_SIZE]),
            buffer: None,
        }
    }

    pub fn write(&mut self, layout: Arc<DescriptorSetLayout>, writes: &[DescriptorWrite]) {
        assert!(layout.is_push_descriptor(), "layout is not a push descriptor layout");
        self.layout = layout;
        let mut target = DescriptorTarget {
            layout: &self.layout,
            data: &mut self.data[..],
            dynamic_buffers: &mut [],
        };
        for write in writes {
            target.write(write);
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..]
    }

    pub fn buffer(&self) -> Option<BufferId> {
        self.buffer
    }

    pub(crate) fn set_buffer(&mut self, buffer: BufferId) {
        self.buffer = Some(buffer);
    }
}
