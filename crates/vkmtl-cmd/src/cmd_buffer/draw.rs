use tracing::trace;

use super::CommandBuffer;
use crate::emulation::{emit_unsupported_topology, EmulatedDraw};
use crate::error::RecordError;
use crate::indirect::{DrawIndexedIndirectArgs, DrawIndirectArgs};
use crate::limits::{MAX_VERTEX_BUFFERS, OCCLUSION_RESULT_STRIDE};
use crate::memory::Bo;
use crate::native::{
    BufferId, DepthClipMode, DepthStencilStateId, EncoderKind, IndexType, NativeCmd,
    ResourceUsage, ScissorRect, Viewport,
};
use crate::pipeline::PipelineBinding;
use crate::state::{
    AddrRange, DepthBias, DynamicDirty, DynamicState, FaceCull, FrontFace, GfxDirty,
    IndexBinding, Rect2D, StencilFaces, VertexBufferBinding, ViewportDesc,
};
use crate::stats::RecordStats;
use crate::topology::PrimitiveTopology;

impl CommandBuffer {
    pub fn bind_pipeline(&mut self, pipeline: impl Into<PipelineBinding>) {
        let pipeline = pipeline.into();
        self.guarded("bind_pipeline", |cb| {
            match pipeline {
                PipelineBinding::Graphics(pipeline) => cb.gfx.bind_pipeline(pipeline),
                PipelineBinding::Compute(pipeline) => cb.cs.bind_pipeline(pipeline),
            }
            Ok(())
        });
    }

    pub fn bind_vertex_buffers(&mut self, first_binding: u32, bindings: &[VertexBufferBinding]) {
        self.guarded("bind_vertex_buffers", |cb| {
            let first = first_binding as usize;
            assert!(
                first + bindings.len() <= MAX_VERTEX_BUFFERS,
                "vertex buffer binding {} out of range",
                first + bindings.len()
            );
            for (i, binding) in bindings.iter().enumerate() {
                let available = binding.bo.size.saturating_sub(binding.offset);
                let range = binding.size.map_or(available, |size| size.min(available));
                cb.gfx.vb.ranges[first + i] = AddrRange {
                    addr: binding.bo.gpu_address + binding.offset,
                    range,
                };
                cb.gfx.vb.buffers[first + i] = Some(binding.bo.buffer);
            }
            cb.gfx.dirty |= GfxDirty::VB;
            Ok(())
        });
    }

    pub fn bind_index_buffer(&mut self, bo: Bo, offset: u64, index_type: IndexType) {
        self.guarded("bind_index_buffer", |cb| {
            cb.gfx.index = Some(IndexBinding::new(bo, offset, index_type));
            Ok(())
        });
    }

    pub fn set_viewports(&mut self, first: u32, viewports: &[ViewportDesc]) {
        self.guarded("set_viewports", |cb| {
            cb.gfx.dynamic.set_viewports(first, viewports);
            Ok(())
        });
    }

    pub fn set_scissors(&mut self, first: u32, scissors: &[Rect2D]) {
        self.guarded("set_scissors", |cb| {
            cb.gfx.dynamic.set_scissors(first, scissors);
            Ok(())
        });
    }

    pub fn set_vertex_binding_strides(&mut self, first_binding: u32, strides: &[u32]) {
        self.guarded("set_vertex_binding_strides", |cb| {
            cb.gfx
                .dynamic
                .set_vertex_binding_strides(first_binding, strides);
            Ok(())
        });
    }

    pub fn set_cull_mode(&mut self, cull_mode: FaceCull) {
        self.set_dynamic("set_cull_mode", DynamicDirty::CULL_MODE, |d| {
            d.cull_mode = cull_mode
        });
    }

    pub fn set_front_face(&mut self, front_face: FrontFace) {
        self.set_dynamic("set_front_face", DynamicDirty::FRONT_FACE, |d| {
            d.front_face = front_face
        });
    }

    pub fn set_primitive_topology(&mut self, topology: PrimitiveTopology) {
        self.set_dynamic("set_primitive_topology", DynamicDirty::PRIMITIVE_TOPOLOGY, |d| {
            d.topology = topology
        });
    }

    pub fn set_primitive_restart_enable(&mut self, enable: bool) {
        self.set_dynamic(
            "set_primitive_restart_enable",
            DynamicDirty::PRIMITIVE_RESTART,
            |d| d.primitive_restart = enable,
        );
    }

    pub fn set_rasterizer_discard_enable(&mut self, enable: bool) {
        self.set_dynamic(
            "set_rasterizer_discard_enable",
            DynamicDirty::RASTERIZER_DISCARD,
            |d| d.rasterizer_discard = enable,
        );
    }

    pub fn set_depth_bias(&mut self, bias: DepthBias) {
        self.set_dynamic("set_depth_bias", DynamicDirty::DEPTH_BIAS, |d| {
            d.depth_bias = bias
        });
    }

    pub fn set_depth_clamp_enable(&mut self, enable: bool) {
        self.set_dynamic("set_depth_clamp_enable", DynamicDirty::DEPTH_CLAMP, |d| {
            d.depth_clamp = enable
        });
    }

    /// Depth/stencil state used while the bound pipeline leaves it dynamic.
    pub fn set_depth_stencil_state(&mut self, state: DepthStencilStateId) {
        self.set_dynamic("set_depth_stencil_state", DynamicDirty::DEPTH_STENCIL, |d| {
            d.depth_stencil = Some(state)
        });
    }

    pub fn set_stencil_reference(&mut self, faces: StencilFaces, reference: u32) {
        self.guarded("set_stencil_reference", |cb| {
            cb.gfx.dynamic.set_stencil_reference(faces, reference);
            Ok(())
        });
    }

    pub fn set_blend_constants(&mut self, constants: [f32; 4]) {
        self.set_dynamic("set_blend_constants", DynamicDirty::BLEND_CONSTANTS, |d| {
            d.blend_constants = constants
        });
    }

    fn set_dynamic(
        &mut self,
        op: &'static str,
        dirty: DynamicDirty,
        f: impl FnOnce(&mut DynamicState),
    ) {
        self.guarded(op, |cb| {
            f(&mut cb.gfx.dynamic);
            cb.gfx.dynamic.dirty |= dirty;
            Ok(())
        });
    }

    /// Emit every piece of graphics state the next draw depends on.
    ///
    /// Panics when no graphics pipeline is bound or no render pass is active.
    pub(crate) fn flush_draw_state(&mut self) -> Result<(), RecordError> {
        let Some(pipeline) = self.gfx.pipeline.clone() else {
            panic!("draw with no graphics pipeline bound");
        };
        assert_eq!(
            self.enc.kind(),
            Some(EncoderKind::Render),
            "draw outside a render pass"
        );

        let device = &self.device;
        let gfx = &mut self.gfx;
        let enc = &mut self.enc;
        let mut dirty = gfx.dynamic.dirty;

        if dirty.contains(DynamicDirty::VI_BINDING_STRIDES) {
            for binding in 0..MAX_VERTEX_BUFFERS {
                if gfx.dynamic.vi_bindings_valid & (1 << binding) != 0 {
                    gfx.descriptors.root.draw.buffer_strides[binding] =
                        gfx.dynamic.vi_binding_strides[binding];
                }
            }
            gfx.descriptors.root_dirty = true;
            // Clamps are derived from strides.
            gfx.dirty |= GfxDirty::VB;
        }

        if dirty.contains(DynamicDirty::RASTERIZER_DISCARD) {
            if gfx.dynamic.rasterizer_discard {
                enc.main
                    .push(NativeCmd::SetScissorRects(vec![ScissorRect::EMPTY]));
            } else {
                dirty |= DynamicDirty::SCISSORS | DynamicDirty::VIEWPORTS;
            }
        }

        if dirty.contains(DynamicDirty::CULL_MODE) {
            gfx.is_cull_front_and_back = gfx.dynamic.cull_mode == FaceCull::FrontAndBack;
            match gfx.dynamic.cull_mode.native() {
                Some(mode) => {
                    enc.main.push(NativeCmd::SetCullMode(mode));
                    dirty |= DynamicDirty::SCISSORS | DynamicDirty::VIEWPORTS;
                }
                // Nothing can be drawn; an empty scissor drops every fragment.
                None => enc
                    .main
                    .push(NativeCmd::SetScissorRects(vec![ScissorRect::EMPTY])),
            }
        }

        if dirty.contains(DynamicDirty::PRIMITIVE_TOPOLOGY) {
            gfx.topology = gfx.dynamic.topology;
            gfx.primitive_type = gfx.topology.native_primitive();
        }
        if dirty.contains(DynamicDirty::PRIMITIVE_RESTART) {
            gfx.restart_disabled = !gfx.dynamic.primitive_restart;
        }

        let culled = gfx.dynamic.rasterizer_discard || gfx.is_cull_front_and_back;
        if !culled && dirty.intersects(DynamicDirty::SCISSORS | DynamicDirty::VIEWPORTS) {
            let area = gfx.render.render_area;
            let mut scissors: Vec<ScissorRect> = gfx
                .dynamic
                .scissors
                .iter()
                .map(|scissor| scissor.clamp_to(&area))
                .collect();
            if scissors.is_empty() {
                scissors.push(ScissorRect::EMPTY);
            }
            enc.main.push(NativeCmd::SetScissorRects(scissors));

            let mut viewports: Vec<Viewport> = gfx
                .dynamic
                .viewports
                .iter()
                .map(ViewportDesc::to_native)
                .collect();
            if viewports.is_empty() {
                viewports.push(Viewport::default());
            }
            enc.main.push(NativeCmd::SetViewports(viewports));
        }

        if dirty.contains(DynamicDirty::DEPTH_STENCIL)
            && gfx.is_depth_stencil_dynamic
            && gfx.render.has_depth_or_stencil()
        {
            if let Some(state) = gfx.dynamic.depth_stencil {
                gfx.depth_stencil_state = Some(state);
                enc.main.push(NativeCmd::SetDepthStencilState(state));
            }
        }

        if dirty.contains(DynamicDirty::FRONT_FACE) {
            enc.main
                .push(NativeCmd::SetFrontFacing(gfx.dynamic.front_face.native()));
        }
        if dirty.contains(DynamicDirty::DEPTH_BIAS) {
            let bias = gfx.dynamic.depth_bias;
            enc.main.push(NativeCmd::SetDepthBias {
                constant: bias.constant,
                slope: bias.slope,
                clamp: bias.clamp,
            });
        }
        if dirty.contains(DynamicDirty::DEPTH_CLAMP) {
            let mode = if gfx.dynamic.depth_clamp {
                DepthClipMode::Clamp
            } else {
                DepthClipMode::Clip
            };
            enc.main.push(NativeCmd::SetDepthClipMode(mode));
        }
        if dirty.contains(DynamicDirty::STENCIL_REFERENCE) {
            let [front, back] = gfx.dynamic.stencil_reference;
            enc.main
                .push(NativeCmd::SetStencilReferences { front, back });
        }
        if dirty.contains(DynamicDirty::BLEND_CONSTANTS) {
            gfx.descriptors.root.draw.blend_constant = gfx.dynamic.blend_constants;
            gfx.descriptors.root_dirty = true;
        }

        if gfx.dirty.contains(GfxDirty::VB) {
            let mut declared: Vec<BufferId> = Vec::new();
            for buffer in gfx.vb.buffers.iter().flatten() {
                if !declared.contains(buffer) {
                    enc.main.push(NativeCmd::UseResource {
                        buffer: *buffer,
                        usage: ResourceUsage::READ,
                    });
                    declared.push(*buffer);
                    RecordStats::inc(&mut enc.stats.residency_declarations);
                }
            }

            let root = &mut gfx.descriptors.root.draw;
            for (slot, attribute) in pipeline.attributes.iter().enumerate() {
                let Some(attribute) = attribute else {
                    continue;
                };
                let binding = attribute.binding as usize;
                let range = gfx.vb.ranges[binding];
                let stride = root.buffer_strides[binding];
                let offset = u64::from(attribute.offset);
                let element_size = u64::from(attribute.element_size);
                if gfx.vb.buffers[binding].is_some() && range.range >= offset + element_size {
                    root.attrib_base[slot] = range.addr + offset;
                    root.attrib_clamps[slot] = if stride == 0 {
                        u32::MAX
                    } else {
                        ((range.range - offset - element_size) / u64::from(stride))
                            .min(u64::from(u32::MAX)) as u32
                    };
                } else {
                    root.attrib_base[slot] = device.null_descriptor().gpu_address;
                    root.attrib_clamps[slot] = 0;
                }
            }

            gfx.vb.max_vertices = (0..MAX_VERTEX_BUFFERS)
                .filter(|&b| gfx.vb.buffers[b].is_some() && root.buffer_strides[b] != 0)
                .map(|b| {
                    (gfx.vb.ranges[b].range / u64::from(root.buffer_strides[b]))
                        .min(u64::from(u32::MAX)) as u32
                })
                .max()
                .unwrap_or(0);
            gfx.descriptors.root_dirty = true;
        }

        if gfx.dirty.contains(GfxDirty::PROVOKING) {
            gfx.flatshade_first = pipeline.provoking_vertex_first;
        }

        if gfx.dirty.contains(GfxDirty::PIPELINE) {
            enc.main.push(NativeCmd::SetRenderPipeline(pipeline.id));
            if let Some(state) = gfx.depth_stencil_state {
                enc.main.push(NativeCmd::SetDepthStencilState(state));
            }
        }

        gfx.descriptors
            .flush(&mut enc.main, &mut enc.scratch, &mut enc.stats)?;
        enc.declare_heaps();

        if let Some(root) = gfx.descriptors.root_buffer {
            enc.main.push(NativeCmd::SetVertexBuffer {
                buffer: root.buffer,
                offset: 0,
                index: 0,
            });
            enc.main.push(NativeCmd::SetFragmentBuffer {
                buffer: root.buffer,
                offset: 0,
                index: 0,
            });
        }

        if gfx.dirty.contains(GfxDirty::OCCLUSION) {
            enc.main.push(NativeCmd::SetVisibilityResultMode {
                mode: gfx.occlusion.mode,
                offset: u64::from(gfx.occlusion.index) * OCCLUSION_RESULT_STRIDE,
            });
        }

        trace!(
            dynamic = ?gfx.dynamic.dirty,
            graphics = ?gfx.dirty,
            topology = %gfx.topology,
            "draw state flushed"
        );
        gfx.dirty = GfxDirty::empty();
        gfx.dynamic.dirty = DynamicDirty::empty();
        Ok(())
    }

    /// `count` is the vertex or index count of a direct draw; `None` for indirect ones.
    fn emulate_draw(
        &mut self,
        indexed: bool,
        count: Option<u32>,
        indirect_buffer: BufferId,
        indirect_address: u64,
    ) -> Result<(), RecordError> {
        let draw = EmulatedDraw {
            topology: self.gfx.topology,
            index: if indexed { self.gfx.index } else { None },
            widen: indexed && self.gfx.requires_index_widening(),
            count,
            max_vertices: self.gfx.vb.max_vertices,
            flatshade_first: self.gfx.flatshade_first,
            indirect_buffer,
            indirect_address,
        };
        emit_unsupported_topology(&mut self.enc, &draw)
    }

    fn bound_index(&self) -> IndexBinding {
        match self.gfx.index {
            Some(index) => index,
            None => panic!("indexed draw with no index buffer bound"),
        }
    }

    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        self.guarded("draw", |cb| {
            cb.flush_draw_state()?;
            if cb.gfx.requires_fan_unroll() {
                let args = DrawIndirectArgs {
                    vertex_count,
                    instance_count,
                    first_vertex,
                    first_instance,
                };
                let bo = cb.enc.scratch.upload(args.as_bytes(), 4, &mut cb.enc.stats)?;
                return cb.emulate_draw(false, Some(vertex_count), bo.buffer, bo.gpu_address);
            }
            cb.enc.main.push(NativeCmd::Draw {
                primitive: cb.gfx.primitive_type,
                vertex_start: first_vertex,
                vertex_count,
                instance_count,
                base_instance: first_instance,
            });
            RecordStats::inc(&mut cb.enc.stats.draws);
            Ok(())
        });
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.guarded("draw_indexed", |cb| {
            let index = cb.bound_index();
            cb.flush_draw_state()?;
            if cb.gfx.requires_fan_unroll() || cb.gfx.requires_index_widening() {
                let args = DrawIndexedIndirectArgs {
                    index_count,
                    instance_count,
                    first_index,
                    base_vertex: vertex_offset,
                    first_instance,
                };
                let bo = cb.enc.scratch.upload(
                    args.as_bytes(),
                    DrawIndexedIndirectArgs::ALIGN_BYTES,
                    &mut cb.enc.stats,
                )?;
                return cb.emulate_draw(true, Some(index_count), bo.buffer, bo.gpu_address);
            }
            cb.enc.main.push(NativeCmd::DrawIndexed {
                primitive: cb.gfx.primitive_type,
                index_count,
                index_type: index.index_type,
                index_buffer: index.bo.buffer,
                index_offset: u64::from(first_index) * u64::from(index.index_type.size_bytes())
                    + index.offset,
                instance_count,
                base_vertex: vertex_offset,
                base_instance: first_instance,
            });
            RecordStats::inc(&mut cb.enc.stats.draws);
            Ok(())
        });
    }

    /// `draw_count` draws whose arguments are read from `buffer` at `offset + i * stride`.
    pub fn draw_indirect(&mut self, buffer: Bo, offset: u64, draw_count: u32, stride: u32) {
        self.guarded("draw_indirect", |cb| {
            cb.draw_indirect_loop(false, buffer, offset, draw_count, stride)
        });
    }

    pub fn draw_indexed_indirect(&mut self, buffer: Bo, offset: u64, draw_count: u32, stride: u32) {
        self.guarded("draw_indexed_indirect", |cb| {
            cb.bound_index();
            cb.draw_indirect_loop(true, buffer, offset, draw_count, stride)
        });
    }

    fn draw_indirect_loop(
        &mut self,
        indexed: bool,
        buffer: Bo,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) -> Result<(), RecordError> {
        let multi = draw_count > 1;
        for i in 0..draw_count {
            if multi {
                self.gfx.descriptors.root.draw.draw_id = i;
                self.gfx.descriptors.root_dirty = true;
            }
            self.flush_draw_state()?;

            let args_offset = offset + u64::from(i) * u64::from(stride);
            let emulate = self.gfx.requires_fan_unroll()
                || (indexed && self.gfx.requires_index_widening());
            if emulate {
                self.emulate_draw(
                    indexed,
                    None,
                    buffer.buffer,
                    buffer.gpu_address + args_offset,
                )?;
                continue;
            }
            let cmd = if indexed {
                let index = self.bound_index();
                NativeCmd::DrawIndexedIndirect {
                    primitive: self.gfx.primitive_type,
                    index_type: index.index_type,
                    index_buffer: index.bo.buffer,
                    index_offset: index.offset,
                    indirect_buffer: buffer.buffer,
                    indirect_offset: args_offset,
                }
            } else {
                NativeCmd::DrawIndirect {
                    primitive: self.gfx.primitive_type,
                    indirect_buffer: buffer.buffer,
                    indirect_offset: args_offset,
                }
            };
            self.enc.main.push(cmd);
            RecordStats::inc(&mut self.enc.stats.draws);
        }
        if multi {
            self.gfx.descriptors.root.draw.draw_id = 0;
            self.gfx.descriptors.root_dirty = true;
        }
        Ok(())
    }
}
