//! Descriptor sets, push descriptors and the per-bind-point tracker that binds them.

pub mod layout;
pub mod set;
pub mod state;
pub mod write;

pub use layout::{
    BindingLayout, DescriptorSetLayout, DescriptorSetLayoutBinding, DescriptorType, PipelineLayout,
};
pub use set::{DescriptorCopy, DescriptorSet, PushDescriptorSet};
pub use state::DescriptorState;
pub use write::{
    DescriptorBufferInfo, DescriptorImageInfo, DescriptorPayload, DescriptorWrite, ImageViewIds,
    SamplerInfo,
};
