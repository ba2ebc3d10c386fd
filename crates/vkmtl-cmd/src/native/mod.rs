//! Backend-agnostic native command stream.
//!
//! The engine never talks to a native graphics API directly. Each command buffer records two
//! [`CommandStream`]s (main and pre-pass) of [`NativeCmd`] values, which a backend lowers by
//! replaying them in order. Every handle in this module is an opaque id owned by a collaborator.

mod validate;

pub use validate::{validate_stream, StreamError, StreamMetrics, StreamRole};

use bitflags::bitflags;

/// Native buffer handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

/// Native memory heap handle (backing store of user allocations).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapId(pub u64);

/// Single-use fence: updated once by one encoder, waited on by the next.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FenceId(pub u64);

/// Monotonically valued event shared by the two streams of a command buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(pub u64);

/// Compiled render or compute pipeline handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PipelineId(pub u32);

/// Compiled depth/stencil state object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DepthStencilStateId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureId(pub u64);

bitflags! {
    /// Access a residency declaration grants to the current encoder.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ResourceUsage: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EncoderKind {
    Render,
    Compute,
    Blit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoadAction {
    DontCare,
    Load,
    Clear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreAction {
    DontCare,
    Store,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorAttachmentDescriptor {
    pub texture: TextureId,
    pub load: LoadAction,
    pub store: StoreAction,
    pub clear_color: [f32; 4],
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepthAttachmentDescriptor {
    pub texture: TextureId,
    pub load: LoadAction,
    pub store: StoreAction,
    pub clear_depth: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StencilAttachmentDescriptor {
    pub texture: TextureId,
    pub load: LoadAction,
    pub store: StoreAction,
    pub clear_stencil: u32,
}

/// Native render pass descriptor.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderPassDescriptor {
    pub color_attachments: Vec<Option<ColorAttachmentDescriptor>>,
    pub depth_attachment: Option<DepthAttachmentDescriptor>,
    pub stencil_attachment: Option<StencilAttachmentDescriptor>,
    pub render_target_width: u32,
    pub render_target_height: u32,
    pub render_target_array_length: u32,
    pub default_raster_sample_count: u32,
    pub visibility_result_buffer: Option<BufferId>,
}

impl RenderPassDescriptor {
    /// Rewrite every attachment's load action to [`LoadAction::Load`].
    pub fn force_load(&mut self) {
        for color in self.color_attachments.iter_mut().flatten() {
            color.load = LoadAction::Load;
        }
        if let Some(depth) = &mut self.depth_attachment {
            depth.load = LoadAction::Load;
        }
        if let Some(stencil) = &mut self.stencil_attachment {
            stencil.load = LoadAction::Load;
        }
    }

    pub fn load_actions(&self) -> impl Iterator<Item = LoadAction> + '_ {
        self.color_attachments
            .iter()
            .flatten()
            .map(|c| c.load)
            .chain(self.depth_attachment.iter().map(|d| d.load))
            .chain(self.stencil_attachment.iter().map(|s| s.load))
    }

    pub fn store_actions(&self) -> impl Iterator<Item = StoreAction> + '_ {
        self.color_attachments
            .iter()
            .flatten()
            .map(|c| c.store)
            .chain(self.depth_attachment.iter().map(|d| d.store))
            .chain(self.stencil_attachment.iter().map(|s| s.store))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ScissorRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl ScissorRect {
    pub const EMPTY: Self = Self {
        x: 0,
        y: 0,
        width: 0,
        height: 0,
    };
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Viewport {
    pub origin_x: f32,
    pub origin_y: f32,
    pub width: f32,
    pub height: f32,
    pub znear: f32,
    pub zfar: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Point,
    Line,
    LineStrip,
    Triangle,
    TriangleStrip,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexType {
    U16,
    U32,
}

impl IndexType {
    pub const fn size_bytes(self) -> u32 {
        match self {
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }

    /// Smallest index type used for a generated buffer of `count` indices.
    pub const fn for_index_count(count: u32) -> Self {
        if count <= u16::MAX as u32 {
            IndexType::U16
        } else {
            IndexType::U32
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    Back,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Winding {
    Clockwise,
    CounterClockwise,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DepthClipMode {
    Clip,
    Clamp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VisibilityResultMode {
    Disabled,
    Boolean,
    Counting,
}

/// One attachment cleared by [`NativeCmd::ClearAttachments`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClearAttachment {
    Color { index: u32, value: [f32; 4] },
    DepthStencil {
        depth: Option<f32>,
        stencil: Option<u32>,
    },
}

bitflags! {
    /// Which plane of a depth/stencil texture a buffer copy moves.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct BlitOption: u8 {
        const DEPTH_FROM_DEPTH_STENCIL = 1 << 0;
        const STENCIL_FROM_DEPTH_STENCIL = 1 << 1;
    }
}

/// Texels of one array slice and mip level of a texture; sizes and origins are in texels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureRegion {
    pub texture: TextureId,
    pub slice: u32,
    pub level: u32,
    pub origin: [u32; 3],
    pub size: [u32; 3],
}

/// Linear layout of texels in a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferImageLayout {
    pub buffer: BufferId,
    pub offset: u64,
    pub bytes_per_row: u64,
    /// Zero for copies of a single depth slice.
    pub bytes_per_image: u64,
}

/// A single recorded native operation.
#[derive(Clone, Debug, PartialEq)]
pub enum NativeCmd {
    BeginRenderEncoder(Box<RenderPassDescriptor>),
    BeginComputeEncoder,
    BeginBlitEncoder,
    EndEncoding,

    UpdateFence(FenceId),
    WaitForFence(FenceId),
    SignalEvent { event: EventId, value: u64 },
    WaitForEvent { event: EventId, value: u64 },

    UseResource { buffer: BufferId, usage: ResourceUsage },
    UseHeaps(Vec<HeapId>),

    SetVertexBuffer { buffer: BufferId, offset: u64, index: u32 },
    SetFragmentBuffer { buffer: BufferId, offset: u64, index: u32 },
    SetComputeBuffer { buffer: BufferId, offset: u64, index: u32 },
    SetComputeBytes { bytes: Vec<u8>, index: u32 },
    SetRenderPipeline(PipelineId),
    SetComputePipeline(PipelineId),

    SetVertexAmplification(Vec<u32>),
    SetScissorRects(Vec<ScissorRect>),
    SetViewports(Vec<Viewport>),
    SetCullMode(CullMode),
    SetFrontFacing(Winding),
    SetDepthBias { constant: f32, slope: f32, clamp: f32 },
    SetDepthClipMode(DepthClipMode),
    SetStencilReferences { front: u32, back: u32 },
    SetDepthStencilState(DepthStencilStateId),
    SetVisibilityResultMode { mode: VisibilityResultMode, offset: u64 },

    Draw {
        primitive: PrimitiveType,
        vertex_start: u32,
        vertex_count: u32,
        instance_count: u32,
        base_instance: u32,
    },
    DrawIndexed {
        primitive: PrimitiveType,
        index_count: u32,
        index_type: IndexType,
        index_buffer: BufferId,
        index_offset: u64,
        instance_count: u32,
        base_vertex: i32,
        base_instance: u32,
    },
    DrawIndirect {
        primitive: PrimitiveType,
        indirect_buffer: BufferId,
        indirect_offset: u64,
    },
    DrawIndexedIndirect {
        primitive: PrimitiveType,
        index_type: IndexType,
        index_buffer: BufferId,
        index_offset: u64,
        indirect_buffer: BufferId,
        indirect_offset: u64,
    },
    ClearAttachments {
        attachments: Vec<ClearAttachment>,
        rect: ScissorRect,
        base_layer: u32,
        layer_count: u32,
    },

    Dispatch {
        threadgroups: [u32; 3],
        threads_per_threadgroup: [u32; 3],
    },
    DispatchIndirect {
        indirect_buffer: BufferId,
        indirect_offset: u64,
        threads_per_threadgroup: [u32; 3],
    },

    ResolveTexture { source: TextureId, destination: TextureId },
    CopyBufferToBuffer {
        source: BufferId,
        source_offset: u64,
        destination: BufferId,
        destination_offset: u64,
        size: u64,
    },
    FillBuffer { buffer: BufferId, offset: u64, size: u64, value: u8 },
    CopyBufferToTexture {
        source: BufferImageLayout,
        destination: TextureRegion,
        options: BlitOption,
    },
    CopyTextureToBuffer {
        source: TextureRegion,
        destination: BufferImageLayout,
        options: BlitOption,
    },
    /// `source.size` texels from `source` to the same extent at `destination_origin`.
    CopyTextureToTexture {
        source: TextureRegion,
        destination: TextureId,
        destination_slice: u32,
        destination_level: u32,
        destination_origin: [u32; 3],
    },
}

impl NativeCmd {
    /// Encoder kind this command must be recorded into, if any.
    pub fn required_encoder(&self) -> Option<EncoderKind> {
        use NativeCmd::*;
        match self {
            SetVertexBuffer { .. }
            | SetFragmentBuffer { .. }
            | SetRenderPipeline(_)
            | SetVertexAmplification(_)
            | SetScissorRects(_)
            | SetViewports(_)
            | SetCullMode(_)
            | SetFrontFacing(_)
            | SetDepthBias { .. }
            | SetDepthClipMode(_)
            | SetStencilReferences { .. }
            | SetDepthStencilState(_)
            | SetVisibilityResultMode { .. }
            | Draw { .. }
            | DrawIndexed { .. }
            | DrawIndirect { .. }
            | DrawIndexedIndirect { .. }
            | ClearAttachments { .. } => Some(EncoderKind::Render),
            SetComputeBuffer { .. }
            | SetComputeBytes { .. }
            | SetComputePipeline(_)
            | Dispatch { .. }
            | DispatchIndirect { .. } => Some(EncoderKind::Compute),
            ResolveTexture { .. }
            | CopyBufferToBuffer { .. }
            | FillBuffer { .. }
            | CopyBufferToTexture { .. }
            | CopyTextureToBuffer { .. }
            | CopyTextureToTexture { .. } => Some(EncoderKind::Blit),
            _ => None,
        }
    }

    pub fn is_transfer(&self) -> bool {
        matches!(
            self,
            NativeCmd::CopyBufferToBuffer { .. }
                | NativeCmd::FillBuffer { .. }
                | NativeCmd::CopyBufferToTexture { .. }
                | NativeCmd::CopyTextureToBuffer { .. }
                | NativeCmd::CopyTextureToTexture { .. }
        )
    }

    pub fn is_draw(&self) -> bool {
        matches!(
            self,
            NativeCmd::Draw { .. }
                | NativeCmd::DrawIndexed { .. }
                | NativeCmd::DrawIndirect { .. }
                | NativeCmd::DrawIndexedIndirect { .. }
        )
    }
}

/// Ordered list of native commands destined for one native command buffer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CommandStream {
    cmds: Vec<NativeCmd>,
}

impl CommandStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, cmd: NativeCmd) {
        self.cmds.push(cmd);
    }

    pub fn commands(&self) -> &[NativeCmd] {
        &self.cmds
    }

    pub fn len(&self) -> usize {
        self.cmds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cmds.is_empty()
    }

    pub fn clear(&mut self) {
        self.cmds.clear();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NativeCmd> {
        self.cmds.iter()
    }

    pub fn count(&self, mut pred: impl FnMut(&NativeCmd) -> bool) -> usize {
        self.cmds.iter().filter(|c| pred(c)).count()
    }
}

impl<'a> IntoIterator for &'a CommandStream {
    type Item = &'a NativeCmd;
    type IntoIter = std::slice::Iter<'a, NativeCmd>;

    fn into_iter(self) -> Self::IntoIter {
        self.cmds.iter()
    }
}
