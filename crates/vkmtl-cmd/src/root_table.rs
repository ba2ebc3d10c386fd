//! Root descriptor table: the fixed-size blob every shader reads its bindings from.
//!
//! The table is uploaded whole into fresh scratch memory whenever it is dirty and bound at
//! argument index 0 of the encoder. All updates are sub-range writes into the in-memory copy.

use bytemuck::{Pod, Zeroable};

use crate::limits::{
    MAX_DYNAMIC_BUFFERS, MAX_PUSH_SIZE, MAX_SETS, MAX_VERTEX_ATTRIBS, MAX_VERTEX_BUFFERS,
};

/// Device address + size pair as shaders consume it.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct BufferAddress {
    pub base_addr: u64,
    pub size: u32,
    pub zero: u32,
}

impl BufferAddress {
    pub const NULL: Self = Self {
        base_addr: 0,
        size: 0,
        zero: 0,
    };

    /// Window shifted by a dynamic offset. The range size is part of the binding and stays put.
    pub fn offset_by(self, offset: u32) -> Self {
        if self.base_addr == 0 {
            return self;
        }
        Self {
            base_addr: self.base_addr + u64::from(offset),
            ..self
        }
    }
}

/// Graphics-only scalars.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct DrawRootParams {
    pub buffer_strides: [u32; MAX_VERTEX_BUFFERS],
    /// Per-attribute vertex fetch base address.
    pub attrib_base: [u64; MAX_VERTEX_ATTRIBS],
    /// Per-attribute highest fetchable vertex index.
    pub attrib_clamps: [u32; MAX_VERTEX_ATTRIBS],
    pub blend_constant: [f32; 4],
    pub draw_id: u32,
    pub _pad: u32,
}

/// Compute-only scalars.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ComputeRootParams {
    pub base_group: [u32; 3],
    pub _pad: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct RootDescriptorTable {
    pub draw: DrawRootParams,
    pub cs: ComputeRootParams,
    pub push: [u8; MAX_PUSH_SIZE],
    /// Device address of each bound set's descriptor memory.
    pub sets: [u64; MAX_SETS],
    pub dynamic_buffers: [BufferAddress; MAX_DYNAMIC_BUFFERS],
    /// Index into `dynamic_buffers` of each set's first dynamic buffer.
    pub set_dynamic_buffer_start: [u8; MAX_SETS],
}

const _: [(); 536] = [(); core::mem::size_of::<DrawRootParams>()];
const _: [(); 16] = [(); core::mem::size_of::<ComputeRootParams>()];
const _: [(); 2120] = [(); core::mem::size_of::<RootDescriptorTable>()];

impl Default for RootDescriptorTable {
    fn default() -> Self {
        Zeroable::zeroed()
    }
}

impl RootDescriptorTable {
    pub const SIZE_BYTES: u64 = core::mem::size_of::<Self>() as u64;

    /// Required alignment of the uploaded table.
    pub const UPLOAD_ALIGN: u64 = 8;

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Copy `data` into the push-constant block at `offset`.
    ///
    /// Panics when the range exceeds the block, which the source API forbids.
    pub fn write_push_constants(&mut self, offset: u32, data: &[u8]) {
        let start = offset as usize;
        let end = start + data.len();
        assert!(
            end <= MAX_PUSH_SIZE,
            "push constant range {start}..{end} exceeds {MAX_PUSH_SIZE} bytes"
        );
        self.push[start..end].copy_from_slice(data);
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytemuck::try_pod_read_unaligned(bytes).ok()
    }
}
