use std::sync::Arc;

use crate::descriptor::DescriptorState;
use crate::pipeline::ComputePipeline;
use crate::state::gfx::GfxDirty;

/// Everything a dispatch depends on.
#[derive(Debug)]
pub struct ComputeState {
    pub descriptors: DescriptorState,
    pub pipeline: Option<Arc<ComputePipeline>>,
    /// Only `PIPELINE` is meaningful for compute.
    pub dirty: GfxDirty,
    /// Encoder the pipeline and residency were last declared to.
    pub(crate) encoder_generation: Option<u64>,
}

impl Default for ComputeState {
    fn default() -> Self {
        Self {
            descriptors: DescriptorState::default(),
            pipeline: None,
            dirty: GfxDirty::PIPELINE,
            encoder_generation: None,
        }
    }
}

impl ComputeState {
    pub fn bind_pipeline(&mut self, pipeline: Arc<ComputePipeline>) {
        self.pipeline = Some(pipeline);
        self.dirty |= GfxDirty::PIPELINE;
    }

    /// Threads per threadgroup of the bound pipeline.
    pub fn local_size(&self) -> [u32; 3] {
        self.pipeline
            .as_ref()
            .map_or([1, 1, 1], |pipeline| pipeline.local_size)
    }

    /// Re-declare everything to a freshly opened compute encoder.
    pub(crate) fn enter_encoder(&mut self, generation: u64) {
        if self.encoder_generation != Some(generation) {
            self.encoder_generation = Some(generation);
            self.dirty |= GfxDirty::PIPELINE;
            self.descriptors.root_dirty = true;
            self.descriptors.invalidate_residency();
        }
    }

    pub fn is_fully_dirty(&self) -> bool {
        self.dirty.contains(GfxDirty::PIPELINE) && self.descriptors.is_fully_dirty()
    }
}
