use bytemuck::{Pod, Zeroable};

/// Arguments of a non-indexed indirect draw.
///
/// Layout: `vertex_count, instance_count, first_vertex, first_instance` (16 bytes, 4-byte
/// aligned). Source and native APIs agree on this layout, so user indirect buffers are consumed
/// in place.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndirectArgs {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

/// Arguments of an indexed indirect draw.
///
/// Layout: `index_count, instance_count, first_index, base_vertex (i32), first_instance`
/// (20 bytes, 4-byte aligned). Emulation output buffers start with one of these.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndexedIndirectArgs {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub first_instance: u32,
}

/// Threadgroup counts of an indirect dispatch.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DispatchIndirectArgs {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

const _: [(); 16] = [(); core::mem::size_of::<DrawIndirectArgs>()];
const _: [(); 20] = [(); core::mem::size_of::<DrawIndexedIndirectArgs>()];
const _: [(); 12] = [(); core::mem::size_of::<DispatchIndirectArgs>()];

impl DrawIndirectArgs {
    pub const SIZE_BYTES: u64 = core::mem::size_of::<Self>() as u64;

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

impl DrawIndexedIndirectArgs {
    pub const SIZE_BYTES: u64 = core::mem::size_of::<Self>() as u64;
    pub const ALIGN_BYTES: u64 = core::mem::align_of::<Self>() as u64;

    /// Returns `(size, alignment)` in bytes for the argument struct.
    #[inline]
    pub const fn layout() -> (u64, u64) {
        (Self::SIZE_BYTES, Self::ALIGN_BYTES)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

impl DispatchIndirectArgs {
    pub const SIZE_BYTES: u64 = core::mem::size_of::<Self>() as u64;
}
