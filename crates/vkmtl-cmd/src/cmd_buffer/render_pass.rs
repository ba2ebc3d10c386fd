use tracing::debug;

use super::CommandBuffer;
use crate::error::RecordError;
use crate::native::{
    ClearAttachment, ColorAttachmentDescriptor, DepthAttachmentDescriptor, EncoderKind,
    LoadAction, NativeCmd, RenderPassDescriptor, StencilAttachmentDescriptor, StoreAction,
    TextureId,
};
use crate::state::{ClearRect, ClearValue, RenderingAttachment, RenderingFlags, RenderingInfo};
use crate::stats::RecordStats;

fn clear_color(attachment: &RenderingAttachment) -> [f32; 4] {
    match attachment.clear {
        ClearValue::Color(color) => color,
        ClearValue::DepthStencil { .. } => [0.0; 4],
    }
}

fn clear_depth(attachment: &RenderingAttachment) -> f32 {
    match attachment.clear {
        ClearValue::DepthStencil { depth, .. } => depth,
        ClearValue::Color(_) => 0.0,
    }
}

fn clear_stencil(attachment: &RenderingAttachment) -> u32 {
    match attachment.clear {
        ClearValue::DepthStencil { stencil, .. } => stencil,
        ClearValue::Color(_) => 0,
    }
}

/// Mask with one bit per layer of a `layer_count`-layer framebuffer.
fn layers_mask(layer_count: u32) -> u32 {
    if layer_count >= 32 {
        u32::MAX
    } else {
        (1 << layer_count) - 1
    }
}

impl CommandBuffer {
    pub fn begin_rendering(&mut self, info: RenderingInfo) {
        self.guarded("begin_rendering", |cb| cb.begin_rendering_inner(info));
    }

    fn begin_rendering_inner(&mut self, info: RenderingInfo) -> Result<(), RecordError> {
        let config = *self.device.config();
        let area = info.render_area;

        let mut width = 0;
        let mut height = 0;
        let mut samples = 0;
        for attachment in info.attachments() {
            width = width.max(attachment.view.width);
            height = height.max(attachment.view.height);
            samples = samples.max(attachment.view.samples);
        }
        if width == 0 || height == 0 {
            // Attachment-less pass: the render area is the framebuffer.
            width = area.x.max(0) as u32 + area.width;
            height = area.y.max(0) as u32 + area.height;
            samples = 1;
        }

        let is_whole = area.x == 0
            && area.y == 0
            && area.width == width
            && area.height == height
            && (info.view_mask == 0 || info.view_mask == layers_mask(info.layer_count));
        let tile_aligned = is_whole
            || ((area.x as u32 | area.y as u32 | area.width | area.height) & config.tile_mask())
                == 0;
        let any_clear = info.attachments().any(RenderingAttachment::clears);
        let resuming = info.flags.contains(RenderingFlags::RESUMING);
        let force_load =
            !tile_aligned || (!is_whole && any_clear) || resuming || config.force_attachment_load;
        let load = |attachment: &RenderingAttachment| {
            if force_load {
                LoadAction::Load
            } else {
                attachment.load
            }
        };

        let desc = RenderPassDescriptor {
            color_attachments: info
                .color_attachments
                .iter()
                .map(|attachment| {
                    attachment.as_ref().map(|a| ColorAttachmentDescriptor {
                        texture: a.view.texture,
                        load: load(a),
                        store: StoreAction::Store,
                        clear_color: clear_color(a),
                    })
                })
                .collect(),
            depth_attachment: info.depth_attachment.as_ref().map(|a| DepthAttachmentDescriptor {
                texture: a.view.texture,
                load: load(a),
                store: StoreAction::Store,
                clear_depth: clear_depth(a),
            }),
            stencil_attachment: info
                .stencil_attachment
                .as_ref()
                .map(|a| StencilAttachmentDescriptor {
                    texture: a.view.texture,
                    load: load(a),
                    store: StoreAction::Store,
                    clear_stencil: clear_stencil(a),
                }),
            render_target_width: width,
            render_target_height: height,
            render_target_array_length: (if info.view_mask != 0 {
                32 - info.view_mask.leading_zeros()
            } else {
                info.layer_count
            })
            .max(1),
            default_raster_sample_count: samples.max(1),
            visibility_result_buffer: Some(self.device.occlusion_results().buffer),
        };

        debug!(
            ?area,
            width,
            height,
            is_whole,
            tile_aligned,
            force_load,
            "render pass started"
        );
        self.enc.start_render(desc.clone(), info.view_mask)?;
        let mut saved = desc;
        saved.force_load();
        self.gfx.render_pass_descriptor = Some(saved);
        self.gfx.dirty_all();

        if !resuming && force_load && any_clear {
            let mut attachments: Vec<ClearAttachment> = info
                .color_attachments
                .iter()
                .enumerate()
                .filter_map(|(index, attachment)| {
                    let attachment = attachment.as_ref().filter(|a| a.clears())?;
                    Some(ClearAttachment::Color {
                        index: index as u32,
                        value: clear_color(attachment),
                    })
                })
                .collect();
            let depth = info
                .depth_attachment
                .as_ref()
                .filter(|a| a.clears())
                .map(clear_depth);
            let stencil = info
                .stencil_attachment
                .as_ref()
                .filter(|a| a.clears())
                .map(clear_stencil);
            if depth.is_some() || stencil.is_some() {
                attachments.push(ClearAttachment::DepthStencil { depth, stencil });
            }
            self.enc.main.push(NativeCmd::ClearAttachments {
                attachments,
                rect: area.clamp_to(&area),
                base_layer: 0,
                layer_count: if info.view_mask != 0 {
                    1
                } else {
                    info.layer_count
                },
            });
        }

        self.gfx.render = info;
        Ok(())
    }

    pub fn end_rendering(&mut self) {
        self.guarded("end_rendering", |cb| {
            cb.enc.signal_fence_and_end()?;
            cb.gfx.render_pass_descriptor = None;
            let info = std::mem::take(&mut cb.gfx.render);
            if info.flags.contains(RenderingFlags::SUSPENDING) {
                return Ok(());
            }

            let resolves: Vec<(TextureId, TextureId)> = info
                .attachments()
                .filter_map(|a| a.resolve.map(|resolve| (a.view.texture, resolve)))
                .collect();
            if resolves.is_empty() {
                return Ok(());
            }
            cb.enc.blit()?;
            debug!(count = resolves.len(), "resolving attachments");
            for (source, destination) in resolves {
                cb.enc.main.push(NativeCmd::ResolveTexture {
                    source,
                    destination,
                });
            }
            Ok(())
        });
    }

    /// Clear regions of the current pass's attachments.
    ///
    /// Attachments the pass does not have are skipped. Under multiview the rectangles' layers
    /// are ignored and every view of the pass is cleared. Panics outside a render pass.
    pub fn clear_attachments(&mut self, attachments: &[ClearAttachment], rects: &[ClearRect]) {
        self.guarded("clear_attachments", |cb| {
            assert_eq!(
                cb.enc.kind(),
                Some(EncoderKind::Render),
                "clear_attachments outside a render pass"
            );
            let info = &cb.gfx.render;
            let attachments: Vec<ClearAttachment> = attachments
                .iter()
                .filter_map(|attachment| match *attachment {
                    ClearAttachment::Color { index, .. } => info
                        .color_attachments
                        .get(index as usize)
                        .is_some_and(Option::is_some)
                        .then_some(*attachment),
                    ClearAttachment::DepthStencil { depth, stencil } => {
                        let depth = depth.filter(|_| info.depth_attachment.is_some());
                        let stencil = stencil.filter(|_| info.stencil_attachment.is_some());
                        (depth.is_some() || stencil.is_some())
                            .then_some(ClearAttachment::DepthStencil { depth, stencil })
                    }
                })
                .collect();
            if attachments.is_empty() || rects.is_empty() {
                return Ok(());
            }

            let area = info.render_area;
            let view_mask = info.view_mask;
            let views: Vec<u32> = (0..32).filter(|bit| view_mask & (1 << bit) != 0).collect();
            let main = &mut cb.enc.main;
            if !views.is_empty() {
                main.push(NativeCmd::SetVertexAmplification(vec![0]));
            }
            for rect in rects {
                let layers: Vec<(u32, u32)> = if views.is_empty() {
                    vec![(rect.base_array_layer, rect.layer_count)]
                } else {
                    views.iter().map(|view| (*view, 1)).collect()
                };
                for (base_layer, layer_count) in layers {
                    main.push(NativeCmd::ClearAttachments {
                        attachments: attachments.clone(),
                        rect: rect.rect.clamp_to(&area),
                        base_layer,
                        layer_count,
                    });
                }
            }
            if !views.is_empty() {
                main.push(NativeCmd::SetVertexAmplification(views));
            }
            // Clears are drawn with pipeline state of their own.
            cb.gfx.dirty_all();
            debug!(attachments = attachments.len(), rects = rects.len(), "attachments cleared");
            Ok(())
        });
    }

    /// Order everything recorded so far before everything recorded after.
    ///
    /// An interrupted render pass restarts with every attachment loaded.
    pub fn pipeline_barrier(&mut self) {
        self.guarded("pipeline_barrier", |cb| {
            let last = cb.enc.barrier()?;
            if last != Some(EncoderKind::Render) {
                return Ok(());
            }
            let Some(desc) = cb.gfx.render_pass_descriptor.clone() else {
                return Ok(());
            };
            cb.enc.start_render(desc, cb.gfx.render.view_mask)?;
            cb.gfx.dirty_all();
            RecordStats::inc(&mut cb.enc.stats.barrier_restarts);
            debug!("render pass restarted after barrier");
            Ok(())
        });
    }
}
