//! Fixed capacities shared by the trackers and the root descriptor table.
//!
//! Shaders index the root table with these same constants, so changing any of them changes the
//! table layout.

/// Maximum number of descriptor sets bound to one bind point.
pub const MAX_SETS: usize = 32;

/// Size of the push-constant block in bytes.
pub const MAX_PUSH_SIZE: usize = 256;

/// Maximum number of dynamic uniform/storage buffers across all bound sets.
pub const MAX_DYNAMIC_BUFFERS: usize = 64;

pub const MAX_VERTEX_BUFFERS: usize = 32;
pub const MAX_VERTEX_ATTRIBS: usize = 32;

/// Maximum number of color attachments in a render pass.
pub const MAX_RTS: usize = 8;

pub const MAX_VIEWPORTS: usize = 16;

/// Maximum number of descriptors in a push-descriptor set layout.
pub const MAX_PUSH_DESCRIPTORS: usize = 32;

/// Size in bytes of one encoded (non-inline) descriptor.
pub const DESCRIPTOR_SIZE: u32 = 16;

/// Alignment required for buffers bound as uniform data, including push-descriptor shadows.
pub const MIN_UBO_ALIGNMENT: u64 = 16;

/// Size of the shadow buffer backing a push-descriptor set.
pub const PUSH_DESCRIPTOR_SET_SIZE: usize = MAX_PUSH_DESCRIPTORS * DESCRIPTOR_SIZE as usize;

/// Default tile size of the native rasterizer; render areas aligned to it can use clear loads.
pub const DEFAULT_TILE_SIZE: u32 = 32;

/// Stride between occlusion query slots in the device visibility buffer.
pub const OCCLUSION_RESULT_STRIDE: u64 = 8;

/// Maximum number of occlusion queries the device visibility buffer holds.
pub const MAX_OCCLUSION_QUERIES: u32 = 4096;

/// Entries in the device sampler table bound at argument index 1 of every encoder.
pub const SAMPLER_TABLE_ENTRIES: usize = 1024;
