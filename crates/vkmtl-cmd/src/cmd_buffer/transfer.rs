//! Buffer and image copies, fills and inline updates, all recorded into blit encoders.

use tracing::{debug, trace};

use super::CommandBuffer;
use crate::error::RecordError;
use crate::image::{BufferCopy, BufferImageCopy, Image, ImageCopy, ImageSubresourceLayers};
use crate::memory::Bo;
use crate::native::{BlitOption, BufferImageLayout, EncoderKind, NativeCmd, TextureRegion};
use crate::stats::RecordStats;

/// Largest `update_buffer` payload.
pub const MAX_UPDATE_BYTES: usize = 65536;

/// Bytes of the repeated pattern a multi-byte fill copies from.
const FILL_PATTERN_BYTES: u64 = 4096;

/// Linear size of the texels a buffer/image copy moves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct LinearLayout {
    bytes_per_row: u64,
    /// Bytes of one 2D slice.
    bytes_per_image: u64,
}

fn linear_layout(image: &Image, region: &BufferImageCopy) -> LinearLayout {
    let block = image.format.block(region.image_subresource.aspect);
    let width = match region.buffer_row_length {
        0 => region.image_extent[0],
        n => n,
    };
    let height = match region.buffer_image_height {
        0 => region.image_extent[1],
        n => n,
    };
    let [blocks_wide, blocks_high, _] = block.blocks([width, height, 1]);
    let bytes_per_row = u64::from(blocks_wide) * u64::from(block.bytes);
    LinearLayout {
        bytes_per_row,
        bytes_per_image: bytes_per_row * u64::from(blocks_high),
    }
}

/// Layers of `subresource` for a copy that may pair a 3D image with a layered one.
fn layer_count(image: &Image, subresource: &ImageSubresourceLayers, depth: u32) -> u32 {
    if image.is_3d() {
        depth
    } else {
        subresource.layer_count
    }
}

/// Slice and origin of the `layer`th 2D copy of a region. `layer` walks the depth slices of a
/// 3D image; a 3D image paired with another 3D image is copied in one piece with `layer` 0.
fn copy_origin(
    image: &Image,
    subresource: &ImageSubresourceLayers,
    offset: [u32; 3],
    layer: u32,
) -> (u32, [u32; 3]) {
    if image.is_3d() {
        (0, [offset[0], offset[1], offset[2] + layer])
    } else {
        (subresource.base_array_layer + layer, offset)
    }
}

fn check_subresource(image: &Image, subresource: &ImageSubresourceLayers) {
    assert!(
        subresource.mip_level < image.mip_levels,
        "mip level {} out of range",
        subresource.mip_level
    );
    assert!(
        subresource
            .base_array_layer
            .checked_add(subresource.layer_count)
            .is_some_and(|end| end <= image.array_layers),
        "layers {}..+{} out of range",
        subresource.base_array_layer,
        subresource.layer_count
    );
}

impl CommandBuffer {
    /// Make a blit encoder the open one for a transfer command.
    ///
    /// Panics when a render pass is active.
    fn begin_transfer(&mut self) -> Result<(), RecordError> {
        assert_ne!(
            self.enc.kind(),
            Some(EncoderKind::Render),
            "transfer command inside a render pass"
        );
        self.enc.blit()
    }

    fn push_transfer(&mut self, cmd: NativeCmd) {
        trace!(?cmd, "transfer");
        self.enc.main.push(cmd);
        RecordStats::inc(&mut self.enc.stats.transfers);
    }

    pub fn copy_buffer(&mut self, source: Bo, destination: Bo, regions: &[BufferCopy]) {
        self.guarded("copy_buffer", |cb| {
            cb.begin_transfer()?;
            for region in regions {
                assert!(
                    region.src_offset + region.size <= source.size
                        && region.dst_offset + region.size <= destination.size,
                    "copy of {} bytes out of range",
                    region.size
                );
                cb.push_transfer(NativeCmd::CopyBufferToBuffer {
                    source: source.buffer,
                    source_offset: region.src_offset,
                    destination: destination.buffer,
                    destination_offset: region.dst_offset,
                    size: region.size,
                });
            }
            Ok(())
        });
    }

    /// Fill `size` bytes at `offset` with repetitions of `data`; `None` fills to the end of the
    /// buffer, rounded down to whole words.
    pub fn fill_buffer(&mut self, buffer: Bo, offset: u64, size: Option<u64>, data: u32) {
        self.guarded("fill_buffer", |cb| {
            assert_eq!(offset % 4, 0, "fill offset {offset} is not word aligned");
            let available = buffer.size.saturating_sub(offset);
            let size = size.unwrap_or(available & !3);
            assert_eq!(size % 4, 0, "fill size {size} is not a whole number of words");
            assert!(size <= available, "fill of {size} bytes out of range");
            if size == 0 {
                return Ok(());
            }
            cb.begin_transfer()?;

            let bytes = data.to_le_bytes();
            if bytes.iter().all(|b| *b == bytes[0]) {
                cb.push_transfer(NativeCmd::FillBuffer {
                    buffer: buffer.buffer,
                    offset,
                    size,
                    value: bytes[0],
                });
                return Ok(());
            }

            // The native fill repeats a single byte; wider patterns are copied from scratch.
            let chunk = size.min(FILL_PATTERN_BYTES);
            let pattern: Vec<u8> = bytes.iter().copied().cycle().take(chunk as usize).collect();
            let source = cb.enc.scratch.upload(&pattern, 4, &mut cb.enc.stats)?;
            let mut done = 0;
            while done < size {
                let len = chunk.min(size - done);
                cb.push_transfer(NativeCmd::CopyBufferToBuffer {
                    source: source.buffer,
                    source_offset: 0,
                    destination: buffer.buffer,
                    destination_offset: offset + done,
                    size: len,
                });
                done += len;
            }
            debug!(size, chunk, "patterned fill through scratch copies");
            Ok(())
        });
    }

    /// Write `data` to `buffer` at `offset` in command order.
    pub fn update_buffer(&mut self, buffer: Bo, offset: u64, data: &[u8]) {
        self.guarded("update_buffer", |cb| {
            let len = data.len() as u64;
            assert!(
                data.len() <= MAX_UPDATE_BYTES,
                "update of {len} bytes exceeds {MAX_UPDATE_BYTES}"
            );
            assert!(
                offset % 4 == 0 && len % 4 == 0,
                "update offset and size must be word aligned"
            );
            assert!(
                offset.checked_add(len).is_some_and(|end| end <= buffer.size),
                "update of {len} bytes out of range"
            );
            if data.is_empty() {
                return Ok(());
            }
            cb.begin_transfer()?;
            let source = cb.enc.scratch.upload(data, 4, &mut cb.enc.stats)?;
            cb.push_transfer(NativeCmd::CopyBufferToBuffer {
                source: source.buffer,
                source_offset: 0,
                destination: buffer.buffer,
                destination_offset: offset,
                size: len,
            });
            Ok(())
        });
    }

    pub fn copy_buffer_to_image(
        &mut self,
        source: Bo,
        destination: &Image,
        regions: &[BufferImageCopy],
    ) {
        self.guarded("copy_buffer_to_image", |cb| {
            cb.begin_transfer()?;
            for region in regions {
                let copies = buffer_image_copies(&source, destination, region);
                for (buffer, texture, options) in copies {
                    cb.push_transfer(NativeCmd::CopyBufferToTexture {
                        source: buffer,
                        destination: texture,
                        options,
                    });
                }
            }
            Ok(())
        });
    }

    pub fn copy_image_to_buffer(
        &mut self,
        source: &Image,
        destination: Bo,
        regions: &[BufferImageCopy],
    ) {
        self.guarded("copy_image_to_buffer", |cb| {
            cb.begin_transfer()?;
            for region in regions {
                let copies = buffer_image_copies(&destination, source, region);
                for (buffer, texture, options) in copies {
                    cb.push_transfer(NativeCmd::CopyTextureToBuffer {
                        source: texture,
                        destination: buffer,
                        options,
                    });
                }
            }
            Ok(())
        });
    }

    /// Copy texels between images of size-compatible formats.
    ///
    /// A 3D image pairs its depth slices with the layers of a layered image. Formats with
    /// different block shapes go through a scratch buffer, since the native texture copy needs
    /// matching formats.
    pub fn copy_image(&mut self, source: &Image, destination: &Image, regions: &[ImageCopy]) {
        self.guarded("copy_image", |cb| {
            cb.begin_transfer()?;
            for region in regions {
                cb.copy_image_region(source, destination, region)?;
            }
            Ok(())
        });
    }

    fn copy_image_region(
        &mut self,
        source: &Image,
        destination: &Image,
        region: &ImageCopy,
    ) -> Result<(), RecordError> {
        check_subresource(source, &region.src_subresource);
        check_subresource(destination, &region.dst_subresource);
        let src_block = source.format.block(region.src_subresource.aspect);
        let dst_block = destination.format.block(region.dst_subresource.aspect);
        assert_eq!(
            src_block.bytes, dst_block.bytes,
            "image copy between formats of different block size"
        );

        let src_layers = layer_count(source, &region.src_subresource, region.extent[2]);
        let dst_layers = layer_count(destination, &region.dst_subresource, region.extent[2]);
        assert_eq!(src_layers, dst_layers, "image copy layer counts differ");
        // Depth-to-depth copies move the whole box at once.
        let (layers, depth) = if source.is_3d() && destination.is_3d() {
            (1, region.extent[2])
        } else {
            (src_layers, 1)
        };

        if src_block == dst_block {
            for layer in 0..layers {
                let (src_slice, src_origin) =
                    copy_origin(source, &region.src_subresource, region.src_offset, layer);
                let (dst_slice, dst_origin) =
                    copy_origin(destination, &region.dst_subresource, region.dst_offset, layer);
                self.push_transfer(NativeCmd::CopyTextureToTexture {
                    source: TextureRegion {
                        texture: source.texture,
                        slice: src_slice,
                        level: region.src_subresource.mip_level,
                        origin: src_origin,
                        size: [region.extent[0], region.extent[1], depth],
                    },
                    destination: destination.texture,
                    destination_slice: dst_slice,
                    destination_level: region.dst_subresource.mip_level,
                    destination_origin: dst_origin,
                });
            }
            return Ok(());
        }

        let [blocks_wide, blocks_high, _] = src_block.blocks(region.extent);
        let bytes_per_row = u64::from(blocks_wide) * u64::from(src_block.bytes);
        let bytes_per_image = bytes_per_row * u64::from(blocks_high);
        let layer_bytes = bytes_per_image * u64::from(depth);
        let staging = self.enc.scratch.allocate(
            layer_bytes * u64::from(layers),
            u64::from(src_block.bytes).max(4),
            &mut self.enc.stats,
        )?;
        let dst_extent = [
            blocks_wide * dst_block.width,
            blocks_high * dst_block.height,
            depth,
        ];
        for layer in 0..layers {
            let (src_slice, src_origin) =
                copy_origin(source, &region.src_subresource, region.src_offset, layer);
            let (dst_slice, dst_origin) =
                copy_origin(destination, &region.dst_subresource, region.dst_offset, layer);
            let linear = BufferImageLayout {
                buffer: staging.buffer,
                offset: u64::from(layer) * layer_bytes,
                bytes_per_row,
                bytes_per_image: if depth > 1 { bytes_per_image } else { 0 },
            };
            self.push_transfer(NativeCmd::CopyTextureToBuffer {
                source: TextureRegion {
                    texture: source.texture,
                    slice: src_slice,
                    level: region.src_subresource.mip_level,
                    origin: src_origin,
                    size: [region.extent[0], region.extent[1], depth],
                },
                destination: linear,
                options: BlitOption::empty(),
            });
            self.push_transfer(NativeCmd::CopyBufferToTexture {
                source: linear,
                destination: TextureRegion {
                    texture: destination.texture,
                    slice: dst_slice,
                    level: region.dst_subresource.mip_level,
                    origin: dst_origin,
                    size: dst_extent,
                },
                options: BlitOption::empty(),
            });
        }
        debug!(layers, ?src_block, ?dst_block, "image copy reinterpreted through scratch");
        Ok(())
    }
}

/// One native copy per array layer of `region`, each advancing through the buffer by a slice.
fn buffer_image_copies(
    buffer: &Bo,
    image: &Image,
    region: &BufferImageCopy,
) -> Vec<(BufferImageLayout, TextureRegion, BlitOption)> {
    let subresource = &region.image_subresource;
    check_subresource(image, subresource);
    let layout = linear_layout(image, region);
    let options = image.format.blit_option(subresource.aspect);
    let depth = region.image_extent[2];
    let bytes_per_image = if image.extent[2] == 1 {
        0
    } else {
        layout.bytes_per_image
    };
    let slice_bytes = layout.bytes_per_image * u64::from(depth);
    let end = region.buffer_offset + slice_bytes * u64::from(subresource.layer_count);
    assert!(end <= buffer.size, "buffer image copy reads past the buffer");

    (0..subresource.layer_count)
        .map(|layer| {
            (
                BufferImageLayout {
                    buffer: buffer.buffer,
                    offset: region.buffer_offset + u64::from(layer) * slice_bytes,
                    bytes_per_row: layout.bytes_per_row,
                    bytes_per_image,
                },
                TextureRegion {
                    texture: image.texture,
                    slice: subresource.base_array_layer + layer,
                    level: subresource.mip_level,
                    origin: region.image_offset,
                    size: region.image_extent,
                },
                options,
            )
        })
        .collect()
}
