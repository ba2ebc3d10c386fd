//! Compiled pipeline metadata the recorder needs at bind and flush time.
//!
//! Shader compilation itself is a collaborator; these structs carry only the handles and the
//! handful of properties the command stream depends on.

use std::sync::Arc;

use crate::descriptor::PipelineLayout;
use crate::limits::MAX_VERTEX_ATTRIBS;
use crate::native::{DepthStencilStateId, PipelineId};

/// One vertex attribute as the vertex shader fetches it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexAttribute {
    pub binding: u32,
    /// Byte offset inside the vertex.
    pub offset: u32,
    /// Size in bytes of one element of the attribute's format.
    pub element_size: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GraphicsPipeline {
    pub id: PipelineId,
    pub layout: Arc<PipelineLayout>,
    /// Attributes indexed by attribute slot; `None` for slots the shader never reads.
    pub attributes: Vec<Option<VertexAttribute>>,
    /// Static depth/stencil state; `None` when the state is dynamic.
    pub depth_stencil: Option<DepthStencilStateId>,
    /// Flat-shaded attributes come from the first vertex of a primitive rather than the last.
    pub provoking_vertex_first: bool,
}

impl GraphicsPipeline {
    pub fn new(id: PipelineId, layout: Arc<PipelineLayout>) -> Self {
        Self {
            id,
            layout,
            attributes: Vec::new(),
            depth_stencil: None,
            provoking_vertex_first: true,
        }
    }

    pub fn with_attributes(mut self, attributes: Vec<Option<VertexAttribute>>) -> Self {
        assert!(
            attributes.len() <= MAX_VERTEX_ATTRIBS,
            "{} vertex attributes exceed {MAX_VERTEX_ATTRIBS}",
            attributes.len()
        );
        self.attributes = attributes;
        self
    }

    pub fn with_depth_stencil(mut self, state: DepthStencilStateId) -> Self {
        self.depth_stencil = Some(state);
        self
    }

    pub fn with_provoking_vertex_last(mut self) -> Self {
        self.provoking_vertex_first = false;
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ComputePipeline {
    pub id: PipelineId,
    pub layout: Arc<PipelineLayout>,
    /// Threads per threadgroup.
    pub local_size: [u32; 3],
}

impl ComputePipeline {
    pub fn new(id: PipelineId, layout: Arc<PipelineLayout>, local_size: [u32; 3]) -> Self {
        assert!(local_size.iter().all(|n| *n > 0), "empty compute local size");
        Self {
            id,
            layout,
            local_size,
        }
    }
}

/// Internal compute kernels the recorder dispatches on its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LibraryPipelines {
    /// Applies queued `(address, value)` 64-bit writes; one thread per write.
    pub imm_write: PipelineId,
    /// Rewrites an index stream into a list topology and fills the indirect draw.
    pub triangle_fan: PipelineId,
    /// Copies occlusion query results into a user buffer; one thread per query.
    pub copy_query: PipelineId,
}

impl Default for LibraryPipelines {
    fn default() -> Self {
        Self {
            imm_write: PipelineId(0xffff_0001),
            triangle_fan: PipelineId(0xffff_0002),
            copy_query: PipelineId(0xffff_0003),
        }
    }
}

/// Pipeline argument of [`crate::CommandBuffer::bind_pipeline`]; the variant picks the bind point.
#[derive(Clone, Debug)]
pub enum PipelineBinding {
    Graphics(Arc<GraphicsPipeline>),
    Compute(Arc<ComputePipeline>),
}

impl From<Arc<GraphicsPipeline>> for PipelineBinding {
    fn from(pipeline: Arc<GraphicsPipeline>) -> Self {
        PipelineBinding::Graphics(pipeline)
    }
}

impl From<Arc<ComputePipeline>> for PipelineBinding {
    fn from(pipeline: Arc<ComputePipeline>) -> Self {
        PipelineBinding::Compute(pipeline)
    }
}
