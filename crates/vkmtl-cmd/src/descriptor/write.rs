//! Per-type descriptor encoders shared by real descriptor sets and push-descriptor shadows.

use bytemuck::{Pod, Zeroable};
use half::f16;

use crate::descriptor::layout::{BindingLayout, DescriptorSetLayout, DescriptorType};
use crate::root_table::BufferAddress;

/// Sampler state as the device sampler table exposes it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplerInfo {
    /// Slot in the device sampler table.
    pub index: u16,
    pub lod_bias: f32,
    pub min_lod: f32,
    pub max_lod: f32,
}

/// Resource ids of one image view, one per way a shader can access it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImageViewIds {
    pub sampled: u64,
    pub storage: u64,
    pub input_attachment: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DescriptorImageInfo {
    pub view: Option<ImageViewIds>,
    pub sampler: Option<SamplerInfo>,
}

/// A buffer range; `address == 0` is a null descriptor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DescriptorBufferInfo {
    pub address: u64,
    pub range: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DescriptorPayload {
    Images(Vec<DescriptorImageInfo>),
    /// Texel buffer view resource ids; `None` is a null descriptor.
    TexelBuffers(Vec<Option<u64>>),
    Buffers(Vec<DescriptorBufferInfo>),
    InlineUniform(Vec<u8>),
}

/// One descriptor update, addressing `binding[array_element..]`.
///
/// For inline uniform blocks `array_element` is a byte offset into the block.
#[derive(Clone, Debug, PartialEq)]
pub struct DescriptorWrite {
    pub binding: u32,
    pub array_element: u32,
    pub ty: DescriptorType,
    pub payload: DescriptorPayload,
}

/// Encoded sampled image / sampler / combined image sampler / input attachment.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SampledImageDescriptor {
    pub image_resource_id: u64,
    pub sampler_index: u16,
    pub lod_bias: u16,
    pub lod_min: u16,
    pub lod_max: u16,
}

/// Encoded storage image or texel buffer: a bare resource id.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ResourceIdDescriptor {
    pub resource_id: u64,
    pub _pad: u64,
}

const _: [(); 16] = [(); core::mem::size_of::<SampledImageDescriptor>()];
const _: [(); 16] = [(); core::mem::size_of::<ResourceIdDescriptor>()];
const _: [(); 16] = [(); core::mem::size_of::<BufferAddress>()];

impl SampledImageDescriptor {
    pub fn lod_bias(&self) -> f32 {
        f16::from_bits(self.lod_bias).to_f32()
    }

    pub fn lod_min(&self) -> f32 {
        f16::from_bits(self.lod_min).to_f32()
    }

    pub fn lod_max(&self) -> f32 {
        f16::from_bits(self.lod_max).to_f32()
    }
}

pub fn encode_sampled_image(
    ty: DescriptorType,
    info: &DescriptorImageInfo,
    immutable_sampler: Option<&SamplerInfo>,
) -> SampledImageDescriptor {
    let mut desc = SampledImageDescriptor::default();
    if ty != DescriptorType::Sampler {
        if let Some(view) = &info.view {
            desc.image_resource_id = if ty == DescriptorType::InputAttachment {
                view.input_attachment
            } else {
                view.sampled
            };
        }
    }
    if ty.uses_sampler() {
        if let Some(sampler) = immutable_sampler.or(info.sampler.as_ref()) {
            desc.sampler_index = sampler.index;
            desc.lod_bias = f16::from_f32(sampler.lod_bias).to_bits();
            desc.lod_min = f16::from_f32(sampler.min_lod).to_bits();
            desc.lod_max = f16::from_f32(sampler.max_lod).to_bits();
        }
    }
    desc
}

pub fn encode_storage_image(info: &DescriptorImageInfo) -> ResourceIdDescriptor {
    ResourceIdDescriptor {
        resource_id: info.view.map_or(0, |v| v.storage),
        _pad: 0,
    }
}

pub fn encode_texel_buffer(view: Option<u64>) -> ResourceIdDescriptor {
    ResourceIdDescriptor {
        resource_id: view.unwrap_or(0),
        _pad: 0,
    }
}

pub fn encode_buffer(info: &DescriptorBufferInfo) -> BufferAddress {
    if info.address == 0 {
        return BufferAddress::NULL;
    }
    assert!(info.range <= u64::from(u32::MAX), "buffer range too large");
    BufferAddress {
        base_addr: info.address,
        size: info.range as u32,
        zero: 0,
    }
}

/// Target of a descriptor write: the set's memory plus its dynamic-buffer array.
pub(crate) struct DescriptorTarget<'a> {
    pub layout: &'a DescriptorSetLayout,
    pub data: &'a mut [u8],
    pub dynamic_buffers: &'a mut [BufferAddress],
}

impl DescriptorTarget<'_> {
    fn binding(&self, binding: u32, ty: DescriptorType) -> BindingLayout {
        let layout = self
            .layout
            .binding(binding)
            .unwrap_or_else(|| panic!("write to unknown binding {binding}"))
            .clone();
        assert_eq!(layout.ty, ty, "descriptor type mismatch for binding {binding}");
        layout
    }

    fn put(&mut self, binding: &BindingLayout, element: u32, bytes: &[u8]) {
        assert!(element < binding.array_size, "array element {element} out of range");
        let offset = (binding.offset + element * binding.stride) as usize;
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Apply one write. Contract violations (wrong type, out-of-range element) panic.
    pub fn write(&mut self, write: &DescriptorWrite) {
        let binding = self.binding(write.binding, write.ty);
        let first = write.array_element;

        match (&write.payload, write.ty) {
            (
                DescriptorPayload::Images(infos),
                DescriptorType::Sampler
                | DescriptorType::CombinedImageSampler
                | DescriptorType::SampledImage
                | DescriptorType::InputAttachment,
            ) => {
                for (j, info) in infos.iter().enumerate() {
                    let element = first + j as u32;
                    let immutable = binding
                        .immutable_samplers
                        .as_ref()
                        .and_then(|s| s.get(element as usize));
                    let desc = encode_sampled_image(write.ty, info, immutable);
                    self.put(&binding, element, bytemuck::bytes_of(&desc));
                }
            }
            (DescriptorPayload::Images(infos), DescriptorType::StorageImage) => {
                for (j, info) in infos.iter().enumerate() {
                    let desc = encode_storage_image(info);
                    self.put(&binding, first + j as u32, bytemuck::bytes_of(&desc));
                }
            }
            (
                DescriptorPayload::TexelBuffers(views),
                DescriptorType::UniformTexelBuffer | DescriptorType::StorageTexelBuffer,
            ) => {
                for (j, view) in views.iter().enumerate() {
                    let desc = encode_texel_buffer(*view);
                    self.put(&binding, first + j as u32, bytemuck::bytes_of(&desc));
                }
            }
            (
                DescriptorPayload::Buffers(infos),
                DescriptorType::UniformBuffer | DescriptorType::StorageBuffer,
            ) => {
                for (j, info) in infos.iter().enumerate() {
                    let desc = encode_buffer(info);
                    self.put(&binding, first + j as u32, bytemuck::bytes_of(&desc));
                }
            }
            (
                DescriptorPayload::Buffers(infos),
                DescriptorType::UniformBufferDynamic | DescriptorType::StorageBufferDynamic,
            ) => {
                for (j, info) in infos.iter().enumerate() {
                    let element = first + j as u32;
                    assert!(element < binding.array_size, "array element {element} out of range");
                    let index = binding.dynamic_buffer_index as usize + element as usize;
                    self.dynamic_buffers[index] = encode_buffer(info);
                }
            }
            (DescriptorPayload::InlineUniform(bytes), DescriptorType::InlineUniformBlock) => {
                let end = first as usize + bytes.len();
                assert!(end <= binding.array_size as usize, "inline uniform write overflows block");
                let offset = binding.offset as usize + first as usize;
                self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
            }
            (payload, ty) => panic!("payload {payload:?} does not match descriptor type {ty:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::layout::DescriptorSetLayoutBinding;
    use pretty_assertions::assert_eq;

    const SAMPLER: SamplerInfo = SamplerInfo {
        index: 7,
        lod_bias: 0.5,
        min_lod: 0.0,
        max_lod: 12.0,
    };

    const VIEW: ImageViewIds = ImageViewIds {
        sampled: 0x100,
        storage: 0x200,
        input_attachment: 0x300,
    };

    #[test]
    fn combined_image_sampler_encodes_view_and_half_float_lods() {
        let info = DescriptorImageInfo {
            view: Some(VIEW),
            sampler: Some(SAMPLER),
        };
        let desc = encode_sampled_image(DescriptorType::CombinedImageSampler, &info, None);
        assert_eq!(desc.image_resource_id, 0x100);
        assert_eq!(desc.sampler_index, 7);
        assert_eq!(desc.lod_bias(), 0.5);
        assert_eq!(desc.lod_max(), 12.0);
    }

    #[test]
    fn sampler_only_writes_ignore_the_view_and_prefer_immutable_samplers() {
        let info = DescriptorImageInfo {
            view: Some(VIEW),
            sampler: Some(SAMPLER),
        };
        let immutable = SamplerInfo { index: 3, ..SAMPLER };
        let desc = encode_sampled_image(DescriptorType::Sampler, &info, Some(&immutable));
        assert_eq!(desc.image_resource_id, 0);
        assert_eq!(desc.sampler_index, 3);
    }

    #[test]
    fn input_attachments_use_their_own_resource_id() {
        let info = DescriptorImageInfo {
            view: Some(VIEW),
            sampler: None,
        };
        let desc = encode_sampled_image(DescriptorType::InputAttachment, &info, None);
        assert_eq!(desc.image_resource_id, 0x300);
        assert_eq!(encode_storage_image(&info).resource_id, 0x200);
    }

    #[test]
    fn null_buffer_encodes_as_zero() {
        assert_eq!(
            encode_buffer(&DescriptorBufferInfo::default()),
            BufferAddress::NULL
        );
    }

    #[test]
    fn target_routes_dynamic_buffers_out_of_descriptor_memory() {
        let layout = DescriptorSetLayout::new(
            &[
                DescriptorSetLayoutBinding::new(0, DescriptorType::UniformBuffer, 2),
                DescriptorSetLayoutBinding::new(1, DescriptorType::UniformBufferDynamic, 2),
                DescriptorSetLayoutBinding::new(2, DescriptorType::InlineUniformBlock, 8),
            ],
            false,
        );
        let mut data = vec![0u8; layout.size() as usize];
        let mut dynamic = vec![BufferAddress::NULL; 2];
        let mut target = DescriptorTarget {
            layout: &layout,
            data: &mut data,
            dynamic_buffers: &mut dynamic,
        };
        target.write(&DescriptorWrite {
            binding: 0,
            array_element: 1,
            ty: DescriptorType::UniformBuffer,
            payload: DescriptorPayload::Buffers(vec![DescriptorBufferInfo {
                address: 0x4000,
                range: 64,
            }]),
        });
        target.write(&DescriptorWrite {
            binding: 1,
            array_element: 1,
            ty: DescriptorType::UniformBufferDynamic,
            payload: DescriptorPayload::Buffers(vec![DescriptorBufferInfo {
                address: 0x8000,
                range: 32,
            }]),
        });
        target.write(&DescriptorWrite {
            binding: 2,
            array_element: 4,
            ty: DescriptorType::InlineUniformBlock,
            payload: DescriptorPayload::InlineUniform(vec![0xaa, 0xbb]),
        });

        let second: BufferAddress = bytemuck::pod_read_unaligned(&data[16..32]);
        assert_eq!(second.base_addr, 0x4000);
        assert_eq!(second.size, 64);
        assert_eq!(&data[..16], &[0u8; 16]);
        assert_eq!(dynamic[1].base_addr, 0x8000);
        assert_eq!(dynamic[0], BufferAddress::NULL);
        assert_eq!(&data[36..38], &[0xaa, 0xbb]);
    }

    #[test]
    #[should_panic(expected = "descriptor type mismatch")]
    fn mismatched_type_panics() {
        let layout = DescriptorSetLayout::new(
            &[DescriptorSetLayoutBinding::new(0, DescriptorType::StorageImage, 1)],
            false,
        );
        let mut data = vec![0u8; layout.size() as usize];
        let mut target = DescriptorTarget {
            layout: &layout,
            data: &mut data,
            dynamic_buffers: &mut [],
        };
        target.write(&DescriptorWrite {
            binding: 0,
            array_element: 0,
            ty: DescriptorType::SampledImage,
            payload: DescriptorPayload::Images(vec![DescriptorImageInfo::default()]),
        });
    }
}
