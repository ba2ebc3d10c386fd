//! Per-bind-point state trackers owned by a command buffer.

pub mod compute;
pub mod dynamic;
pub mod gfx;

pub use compute::ComputeState;
pub use dynamic::{
    DepthBias, DynamicDirty, DynamicState, FaceCull, FrontFace, Rect2D, StencilFaces, ViewportDesc,
};
pub use gfx::{
    AddrRange, AttachmentView, ClearRect, ClearValue, GfxDirty, GraphicsState, IndexBinding,
    OcclusionState, RenderingAttachment, RenderingFlags, RenderingInfo, VertexBufferBinding,
    VertexBufferState,
};
