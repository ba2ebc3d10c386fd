use std::sync::Arc;

use bitflags::bitflags;

use crate::descriptor::DescriptorState;
use crate::limits::MAX_VERTEX_BUFFERS;
use crate::memory::Bo;
use crate::native::{
    BufferId, DepthStencilStateId, IndexType, LoadAction, PrimitiveType, RenderPassDescriptor,
    TextureId, VisibilityResultMode,
};
use crate::pipeline::GraphicsPipeline;
use crate::state::dynamic::{DynamicState, Rect2D};
use crate::topology::PrimitiveTopology;

bitflags! {
    /// Graphics state changed since the last draw flush that dynamic state does not cover.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct GfxDirty: u32 {
        const VB = 1 << 0;
        const OCCLUSION = 1 << 1;
        /// Provoking vertex convention of the bound pipeline.
        const PROVOKING = 1 << 2;
        const PIPELINE = 1 << 3;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct RenderingFlags: u32 {
        /// The pass continues in a later `begin_rendering`; skip resolves at its end.
        const SUSPENDING = 1 << 0;
        /// The pass continues an earlier suspended one; load everything, clear nothing.
        const RESUMING = 1 << 1;
    }
}

/// Render target as the render pass sees it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttachmentView {
    pub texture: TextureId,
    /// Extent of the view's mip level.
    pub width: u32,
    pub height: u32,
    pub samples: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderingAttachment {
    pub view: AttachmentView,
    pub load: LoadAction,
    pub clear: ClearValue,
    /// Single-sample texture the attachment resolves into at the end of the pass.
    pub resolve: Option<TextureId>,
}

impl RenderingAttachment {
    pub fn clears(&self) -> bool {
        self.load == LoadAction::Clear
    }
}

/// Arguments of `begin_rendering`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderingInfo {
    pub flags: RenderingFlags,
    pub render_area: Rect2D,
    pub layer_count: u32,
    pub view_mask: u32,
    pub color_attachments: Vec<Option<RenderingAttachment>>,
    pub depth_attachment: Option<RenderingAttachment>,
    pub stencil_attachment: Option<RenderingAttachment>,
}

impl RenderingInfo {
    pub fn attachments(&self) -> impl Iterator<Item = &RenderingAttachment> + '_ {
        self.color_attachments
            .iter()
            .flatten()
            .chain(self.depth_attachment.iter())
            .chain(self.stencil_attachment.iter())
    }

    pub fn has_depth_or_stencil(&self) -> bool {
        self.depth_attachment.is_some() || self.stencil_attachment.is_some()
    }
}

/// Region of `clear_attachments`: a rectangle over a range of framebuffer layers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClearRect {
    pub rect: Rect2D,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

/// Bound index buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexBinding {
    pub bo: Bo,
    pub offset: u64,
    pub index_type: IndexType,
    /// All-ones value of `index_type`.
    pub restart: u32,
}

impl IndexBinding {
    pub fn new(bo: Bo, offset: u64, index_type: IndexType) -> Self {
        let restart = match index_type {
            IndexType::U16 => u32::from(u16::MAX),
            IndexType::U32 => u32::MAX,
        };
        Self {
            bo,
            offset,
            index_type,
            restart,
        }
    }

    /// Indices that fit between `offset` and the end of the buffer.
    pub fn max_index_count(&self) -> u32 {
        let bytes = self.bo.size.saturating_sub(self.offset);
        (bytes / u64::from(self.index_type.size_bytes())).min(u64::from(u32::MAX)) as u32
    }

    pub fn address(&self) -> u64 {
        self.bo.gpu_address + self.offset
    }
}

/// Vertex buffer binding argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexBufferBinding {
    pub bo: Bo,
    pub offset: u64,
    /// Bound size; `None` binds through the end of the buffer.
    pub size: Option<u64>,
}

/// Device address range of a bound vertex buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AddrRange {
    pub addr: u64,
    pub range: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VertexBufferState {
    pub ranges: [AddrRange; MAX_VERTEX_BUFFERS],
    pub buffers: [Option<BufferId>; MAX_VERTEX_BUFFERS],
    /// Largest vertex count any bound attribute can fetch; sizes emulated non-indexed draws.
    pub max_vertices: u32,
}

impl Default for VertexBufferState {
    fn default() -> Self {
        Self {
            ranges: [AddrRange::default(); MAX_VERTEX_BUFFERS],
            buffers: [None; MAX_VERTEX_BUFFERS],
            max_vertices: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OcclusionState {
    pub mode: VisibilityResultMode,
    /// Slot of the active query in the device visibility buffer.
    pub index: u16,
}

impl Default for OcclusionState {
    fn default() -> Self {
        Self {
            mode: VisibilityResultMode::Disabled,
            index: 0,
        }
    }
}

/// Everything a draw depends on.
#[derive(Debug)]
pub struct GraphicsState {
    pub render: RenderingInfo,
    pub descriptors: DescriptorState,
    pub dynamic: DynamicState,
    pub pipeline: Option<Arc<GraphicsPipeline>>,
    pub depth_stencil_state: Option<DepthStencilStateId>,
    pub is_depth_stencil_dynamic: bool,
    /// Descriptor the current pass restarts with after a barrier; all loads are `Load`.
    pub render_pass_descriptor: Option<RenderPassDescriptor>,
    pub is_cull_front_and_back: bool,
    pub restart_disabled: bool,
    /// Emulated draws put the provoking vertex first in each output primitive.
    pub flatshade_first: bool,
    pub topology: PrimitiveTopology,
    pub primitive_type: PrimitiveType,
    pub index: Option<IndexBinding>,
    pub vb: VertexBufferState,
    pub occlusion: OcclusionState,
    pub dirty: GfxDirty,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            render: RenderingInfo::default(),
            descriptors: DescriptorState::default(),
            dynamic: DynamicState::default(),
            pipeline: None,
            depth_stencil_state: None,
            is_depth_stencil_dynamic: false,
            render_pass_descriptor: None,
            is_cull_front_and_back: false,
            restart_disabled: true,
            flatshade_first: true,
            topology: PrimitiveTopology::TriangleList,
            primitive_type: PrimitiveType::Triangle,
            index: None,
            vb: VertexBufferState::default(),
            occlusion: OcclusionState::default(),
            dirty: GfxDirty::all(),
        }
    }
}

impl GraphicsState {
    /// Force the next flush to re-emit every piece of graphics state.
    pub fn dirty_all(&mut self) {
        self.dynamic.dirty_all();
        self.dirty = GfxDirty::all();
        self.descriptors.root_dirty = true;
        self.descriptors.invalidate_residency();
    }

    pub fn is_fully_dirty(&self) -> bool {
        self.dirty == GfxDirty::all()
            && self.dynamic.dirty == crate::state::DynamicDirty::all()
            && self.descriptors.is_fully_dirty()
    }

    pub fn bind_pipeline(&mut self, pipeline: Arc<GraphicsPipeline>) {
        match pipeline.depth_stencil {
            Some(state) => {
                self.depth_stencil_state = Some(state);
                self.is_depth_stencil_dynamic = false;
            }
            None => {
                if !self.is_depth_stencil_dynamic {
                    self.depth_stencil_state = None;
                }
                self.is_depth_stencil_dynamic = true;
            }
        }
        self.pipeline = Some(pipeline);
        self.dirty |= GfxDirty::PIPELINE | GfxDirty::VB | GfxDirty::PROVOKING;
    }

    /// Whether indexed draws must go through the index rewriting kernel because restart is
    /// always on natively for strips but disabled here, and the all-ones index of a narrow
    /// type must become an ordinary vertex.
    pub fn requires_index_widening(&self) -> bool {
        let narrow = self
            .index
            .is_some_and(|index| index.index_type.size_bytes() < 4);
        self.topology.native_restart_always_on() && self.restart_disabled && narrow
    }

    pub fn requires_fan_unroll(&self) -> bool {
        self.topology == PrimitiveTopology::TriangleFan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::PipelineLayout;
    use crate::native::PipelineId;

    fn bo(size: u64) -> Bo {
        Bo {
            buffer: BufferId(7),
            gpu_address: 0x10_0000,
            size,
        }
    }

    #[test]
    fn index_binding_restart_and_capacity() {
        let index = IndexBinding::new(bo(1000), 200, IndexType::U16);
        assert_eq!(index.restart, 0xffff);
        assert_eq!(index.max_index_count(), 400);
        assert_eq!(index.address(), 0x10_0000 + 200);
        assert_eq!(IndexBinding::new(bo(8), 0, IndexType::U32).restart, u32::MAX);
    }

    #[test]
    fn widening_only_for_narrow_strips_without_restart() {
        let mut gfx = GraphicsState::default();
        gfx.index = Some(IndexBinding::new(bo(64), 0, IndexType::U16));
        gfx.topology = PrimitiveTopology::TriangleStrip;
        gfx.restart_disabled = true;
        assert!(gfx.requires_index_widening());

        gfx.restart_disabled = false;
        assert!(!gfx.requires_index_widening());

        gfx.restart_disabled = true;
        gfx.topology = PrimitiveTopology::TriangleList;
        assert!(!gfx.requires_index_widening());

        gfx.topology = PrimitiveTopology::LineStrip;
        gfx.index = Some(IndexBinding::new(bo(64), 0, IndexType::U32));
        assert!(!gfx.requires_index_widening());
    }

    #[test]
    fn dynamic_pipeline_keeps_dynamic_depth_stencil() {
        let layout = Arc::new(PipelineLayout::new(Vec::new(), 0));
        let mut gfx = GraphicsState::default();
        gfx.bind_pipeline(Arc::new(GraphicsPipeline::new(PipelineId(1), layout.clone())));
        assert!(gfx.is_depth_stencil_dynamic);
        gfx.depth_stencil_state = Some(DepthStencilStateId(3));
        gfx.bind_pipeline(Arc::new(GraphicsPipeline::new(PipelineId(2), layout.clone())));
        assert_eq!(gfx.depth_stencil_state, Some(DepthStencilStateId(3)));

        gfx.bind_pipeline(Arc::new(
            GraphicsPipeline::new(PipelineId(3), layout).with_depth_stencil(DepthStencilStateId(9)),
        ));
        assert!(!gfx.is_depth_stencil_dynamic);
        assert_eq!(gfx.depth_stencil_state, Some(DepthStencilStateId(9)));
    }

    #[test]
    fn binding_a_pipeline_dirties_its_provoking_vertex() {
        let layout = Arc::new(PipelineLayout::new(Vec::new(), 0));
        let mut gfx = GraphicsState::default();
        gfx.dirty = GfxDirty::empty();
        gfx.bind_pipeline(Arc::new(
            GraphicsPipeline::new(PipelineId(1), layout).with_provoking_vertex_last(),
        ));
        assert!(gfx.dirty.contains(GfxDirty::PROVOKING | GfxDirty::PIPELINE));
        // Applied at draw flush, not at bind.
        assert!(gfx.flatshade_first);
    }

    #[test]
    fn dirty_all_marks_everything() {
        let mut gfx = GraphicsState::default();
        gfx.dirty = GfxDirty::empty();
        gfx.dynamic.dirty = crate::state::DynamicDirty::empty();
        gfx.descriptors.root_dirty = false;
        gfx.descriptors.sets_not_resident = 0;
        assert!(!gfx.is_fully_dirty());
        gfx.dirty_all();
        assert!(gfx.is_fully_dirty());
    }
}
