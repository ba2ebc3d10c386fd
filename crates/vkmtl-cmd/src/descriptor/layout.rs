use std::sync::Arc;

use crate::descriptor::write::SamplerInfo;
use crate::limits::{
    DESCRIPTOR_SIZE, MAX_DYNAMIC_BUFFERS, MAX_PUSH_DESCRIPTORS, MAX_PUSH_SIZE, MAX_SETS,
    PUSH_DESCRIPTOR_SET_SIZE,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    Sampler,
    CombinedImageSampler,
    SampledImage,
    StorageImage,
    UniformTexelBuffer,
    StorageTexelBuffer,
    UniformBuffer,
    StorageBuffer,
    UniformBufferDynamic,
    StorageBufferDynamic,
    InputAttachment,
    InlineUniformBlock,
}

impl DescriptorType {
    pub fn is_dynamic(self) -> bool {
        matches!(
            self,
            DescriptorType::UniformBufferDynamic | DescriptorType::StorageBufferDynamic
        )
    }

    /// Bytes one array element occupies in descriptor memory.
    ///
    /// Dynamic buffers live in the set's dynamic-buffer array instead, and inline uniform
    /// blocks are addressed byte by byte.
    pub fn stride(self) -> u32 {
        match self {
            DescriptorType::UniformBufferDynamic | DescriptorType::StorageBufferDynamic => 0,
            DescriptorType::InlineUniformBlock => 1,
            _ => DESCRIPTOR_SIZE,
        }
    }

    pub fn uses_sampler(self) -> bool {
        matches!(
            self,
            DescriptorType::Sampler | DescriptorType::CombinedImageSampler
        )
    }
}

/// Creation-time description of one binding.
#[derive(Clone, Debug, PartialEq)]
pub struct DescriptorSetLayoutBinding {
    pub binding: u32,
    pub ty: DescriptorType,
    /// Array size, or the block size in bytes for inline uniform blocks.
    pub count: u32,
    pub immutable_samplers: Option<Vec<SamplerInfo>>,
}

impl DescriptorSetLayoutBinding {
    pub fn new(binding: u32, ty: DescriptorType, count: u32) -> Self {
        Self {
            binding,
            ty,
            count,
            immutable_samplers: None,
        }
    }
}

/// Resolved placement of one binding inside descriptor memory.
#[derive(Clone, Debug, PartialEq)]
pub struct BindingLayout {
    pub ty: DescriptorType,
    pub offset: u32,
    pub stride: u32,
    pub array_size: u32,
    /// First slot in the set's dynamic-buffer array; only meaningful for dynamic buffers.
    pub dynamic_buffer_index: u8,
    pub immutable_samplers: Option<Vec<SamplerInfo>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DescriptorSetLayout {
    bindings: Vec<Option<BindingLayout>>,
    size: u32,
    descriptor_count: u32,
    dynamic_buffer_count: u8,
    push_descriptor: bool,
}

impl DescriptorSetLayout {
    /// Lay out `bindings` in binding-number order.
    ///
    /// Panics on layouts the source API rejects at creation: duplicate binding numbers, too many
    /// dynamic buffers, or a push-descriptor layout with dynamic buffers or more descriptors than
    /// a push shadow holds.
    pub fn new(bindings: &[DescriptorSetLayoutBinding], push_descriptor: bool) -> Self {
        let mut sorted: Vec<&DescriptorSetLayoutBinding> = bindings.iter().collect();
        sorted.sort_by_key(|b| b.binding);
        assert!(
            sorted.windows(2).all(|w| w[0].binding != w[1].binding),
            "duplicate binding numbers in descriptor set layout"
        );

        let slots = sorted.last().map_or(0, |b| b.binding as usize + 1);
        let mut out: Vec<Option<BindingLayout>> = vec![None; slots];
        let mut offset = 0u32;
        let mut descriptor_count = 0u32;
        let mut dynamic_buffer_count = 0u32;

        for b in sorted {
            let stride = b.ty.stride();
            let mut dynamic_buffer_index = 0u8;
            if b.ty.is_dynamic() {
                dynamic_buffer_index = dynamic_buffer_count as u8;
                dynamic_buffer_count += b.count;
            } else {
                // Keep every binding's first descriptor aligned like a full descriptor.
                offset = offset.next_multiple_of(DESCRIPTOR_SIZE);
            }
            if let Some(samplers) = &b.immutable_samplers {
                assert!(b.ty.uses_sampler(), "immutable samplers on {:?}", b.ty);
                assert_eq!(samplers.len() as u32, b.count, "immutable sampler count");
            }
            out[b.binding as usize] = Some(BindingLayout {
                ty: b.ty,
                offset,
                stride,
                array_size: b.count,
                dynamic_buffer_index,
                immutable_samplers: b.immutable_samplers.clone(),
            });
            offset += stride * b.count;
            descriptor_count += if b.ty == DescriptorType::InlineUniformBlock {
                1
            } else {
                b.count
            };
        }

        assert!(
            dynamic_buffer_count as usize <= MAX_DYNAMIC_BUFFERS,
            "{dynamic_buffer_count} dynamic buffers exceed {MAX_DYNAMIC_BUFFERS}"
        );
        if push_descriptor {
            assert_eq!(dynamic_buffer_count, 0, "push descriptor layout with dynamic buffers");
            assert!(
                descriptor_count as usize <= MAX_PUSH_DESCRIPTORS
                    && offset as usize <= PUSH_DESCRIPTOR_SET_SIZE,
                "push descriptor layout needs {offset} bytes"
            );
        }

        Self {
            bindings: out,
            size: offset,
            descriptor_count,
            dynamic_buffer_count: dynamic_buffer_count as u8,
            push_descriptor,
        }
    }

    pub fn binding(&self, binding: u32) -> Option<&BindingLayout> {
        self.bindings.get(binding as usize).and_then(Option::as_ref)
    }

    /// Bytes of descriptor memory a set with this layout needs.
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn descriptor_count(&self) -> u32 {
        self.descriptor_count
    }

    pub fn dynamic_buffer_count(&self) -> u8 {
        self.dynamic_buffer_count
    }

    pub fn is_push_descriptor(&self) -> bool {
        self.push_descriptor
    }
}

/// Per-set layouts plus the push-constant range of a pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineLayout {
    set_layouts: Vec<Option<Arc<DescriptorSetLayout>>>,
    push_constant_size: u32,
}

impl PipelineLayout {
    pub fn new(set_layouts: Vec<Option<Arc<DescriptorSetLayout>>>, push_constant_size: u32) -> Self {
        assert!(set_layouts.len() <= MAX_SETS, "too many set layouts");
        assert!(push_constant_size as usize <= MAX_PUSH_SIZE, "push constant range too large");
        Self {
            set_layouts,
            push_constant_size,
        }
    }

    pub fn set_layout(&self, set: u32) -> Option<&Arc<DescriptorSetLayout>> {
        self.set_layouts.get(set as usize).and_then(Option::as_ref)
    }

    pub fn set_count(&self) -> u32 {
        self.set_layouts.len() as u32
    }

    pub fn push_constant_size(&self) -> u32 {
        self.push_constant_size
    }
}
