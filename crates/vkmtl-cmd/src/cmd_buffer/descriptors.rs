use std::sync::Arc;

use bitflags::bitflags;

use super::{BindPoint, CommandBuffer};
use crate::descriptor::{DescriptorSet, DescriptorState, DescriptorWrite, PipelineLayout};

bitflags! {
    /// Shader stages a push-constant range is visible to.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        const VERTEX = 1 << 0;
        const FRAGMENT = 1 << 1;
        const COMPUTE = 1 << 2;
        const ALL_GRAPHICS = Self::VERTEX.bits() | Self::FRAGMENT.bits();
    }
}

impl CommandBuffer {
    fn descriptors_mut(&mut self, bind_point: BindPoint) -> &mut DescriptorState {
        match bind_point {
            BindPoint::Graphics => &mut self.gfx.descriptors,
            BindPoint::Compute => &mut self.cs.descriptors,
        }
    }

    pub fn bind_descriptor_sets(
        &mut self,
        bind_point: BindPoint,
        layout: &PipelineLayout,
        first_set: u32,
        sets: &[Option<Arc<DescriptorSet>>],
        dynamic_offsets: &[u32],
    ) {
        self.guarded("bind_descriptor_sets", |cb| {
            cb.descriptors_mut(bind_point)
                .bind_sets(layout, first_set, sets, dynamic_offsets);
            Ok(())
        });
    }

    pub fn push_descriptor_set(
        &mut self,
        bind_point: BindPoint,
        layout: &PipelineLayout,
        set: u32,
        writes: &[DescriptorWrite],
    ) {
        self.guarded("push_descriptor_set", |cb| {
            cb.descriptors_mut(bind_point).push(layout, set, writes);
            Ok(())
        });
    }

    pub fn push_constants(&mut self, stages: ShaderStages, offset: u32, data: &[u8]) {
        self.guarded("push_constants", |cb| {
            if stages.intersects(ShaderStages::ALL_GRAPHICS) {
                cb.gfx.descriptors.push_constants(offset, data);
            }
            if stages.contains(ShaderStages::COMPUTE) {
                cb.cs.descriptors.push_constants(offset, data);
            }
            Ok(())
        });
    }
}
