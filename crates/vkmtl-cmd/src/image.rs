//! The slice of image metadata transfer commands need.
//!
//! Image creation and memory binding belong to a collaborator; a recorded copy only needs the
//! native texture, its dimensions and how texels are laid out when linearized into a buffer.

use crate::native::{BlitOption, TextureId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageType {
    D1,
    D2,
    D3,
}

/// Block of texels stored together; 1x1 for uncompressed formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TexelBlock {
    pub bytes: u32,
    pub width: u32,
    pub height: u32,
}

impl TexelBlock {
    pub const fn texel(bytes: u32) -> Self {
        Self {
            bytes,
            width: 1,
            height: 1,
        }
    }

    /// Blocks needed to cover `extent` texels.
    pub fn blocks(&self, extent: [u32; 3]) -> [u32; 3] {
        [
            extent[0].div_ceil(self.width),
            extent[1].div_ceil(self.height),
            extent[2],
        ]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Color(TexelBlock),
    /// `depth_bytes` is 0 for stencil-only formats.
    DepthStencil { depth_bytes: u32, stencil: bool },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageAspect {
    Color,
    Depth,
    Stencil,
}

impl ImageFormat {
    /// Layout of `aspect` when copied to or from a buffer.
    pub fn block(&self, aspect: ImageAspect) -> TexelBlock {
        match (self, aspect) {
            (ImageFormat::Color(block), ImageAspect::Color) => *block,
            (ImageFormat::DepthStencil { depth_bytes, .. }, ImageAspect::Depth) => {
                TexelBlock::texel(*depth_bytes)
            }
            (ImageFormat::DepthStencil { stencil: true, .. }, ImageAspect::Stencil) => {
                TexelBlock::texel(1)
            }
            (format, aspect) => panic!("{format:?} has no {aspect:?} aspect"),
        }
    }

    /// Native option selecting one plane of a combined depth/stencil texture.
    pub fn blit_option(&self, aspect: ImageAspect) -> BlitOption {
        match (self, aspect) {
            (ImageFormat::DepthStencil { stencil: true, .. }, ImageAspect::Depth) => {
                BlitOption::DEPTH_FROM_DEPTH_STENCIL
            }
            (ImageFormat::DepthStencil { depth_bytes, .. }, ImageAspect::Stencil)
                if *depth_bytes > 0 =>
            {
                BlitOption::STENCIL_FROM_DEPTH_STENCIL
            }
            _ => BlitOption::empty(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Image {
    pub texture: TextureId,
    pub ty: ImageType,
    /// Texels of mip level 0.
    pub extent: [u32; 3],
    pub mip_levels: u32,
    pub array_layers: u32,
    pub format: ImageFormat,
}

impl Image {
    pub fn new(texture: TextureId, ty: ImageType, extent: [u32; 3], format: ImageFormat) -> Self {
        Self {
            texture,
            ty,
            extent,
            mip_levels: 1,
            array_layers: 1,
            format,
        }
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    pub fn with_array_layers(mut self, array_layers: u32) -> Self {
        assert!(
            self.ty != ImageType::D3 || array_layers == 1,
            "3D images have a single layer"
        );
        self.array_layers = array_layers;
        self
    }

    pub fn is_3d(&self) -> bool {
        self.ty == ImageType::D3
    }
}

/// Layers of one mip level of one aspect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageSubresourceLayers {
    pub aspect: ImageAspect,
    pub mip_level: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

impl ImageSubresourceLayers {
    pub fn color(mip_level: u32, base_array_layer: u32, layer_count: u32) -> Self {
        Self {
            aspect: ImageAspect::Color,
            mip_level,
            base_array_layer,
            layer_count,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferCopy {
    pub src_offset: u64,
    pub dst_offset: u64,
    pub size: u64,
}

/// Texels of an image and their linear layout in a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferImageCopy {
    pub buffer_offset: u64,
    /// Texels per buffer row; 0 means tightly packed to `image_extent`.
    pub buffer_row_length: u32,
    /// Rows per buffer image; 0 means tightly packed to `image_extent`.
    pub buffer_image_height: u32,
    pub image_subresource: ImageSubresourceLayers,
    pub image_offset: [u32; 3],
    pub image_extent: [u32; 3],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageCopy {
    pub src_subresource: ImageSubresourceLayers,
    pub src_offset: [u32; 3],
    pub dst_subresource: ImageSubresourceLayers,
    pub dst_offset: [u32; 3],
    /// Texels of the source.
    pub extent: [u32; 3],
}
