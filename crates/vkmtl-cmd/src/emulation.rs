//! Draws the native API cannot express, rewritten into indexed list draws by a compute kernel.
//!
//! The kernel runs on the pre-pass stream before the render pass that consumes its output. It
//! reads the draw's indirect arguments and indices, writes the decomposed index list plus a
//! fresh [`DrawIndexedIndirectArgs`] into one output buffer, and the main stream draws from
//! that buffer indirectly.

use bytemuck::{Pod, Zeroable};
use tracing::debug;

use crate::encoder::EncoderManager;
use crate::error::RecordError;
use crate::indirect::DrawIndexedIndirectArgs;
use crate::native::{BufferId, IndexType, NativeCmd, ResourceUsage};
use crate::state::IndexBinding;
use crate::stats::RecordStats;
use crate::topology::PrimitiveTopology;

/// Byte offset of the generated indices inside the output buffer.
pub const OUTPUT_INDEX_OFFSET: u64 = DrawIndexedIndirectArgs::SIZE_BYTES;

/// Push block of the library `triangle_fan` kernel.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[allow(non_snake_case)]
pub struct TriangleFanParams {
    /// Address of the input indices; 0 for non-indexed draws.
    pub index_buffer: u64,
    pub out_ptr: u64,
    /// Address of the draw's indirect arguments.
    pub in_draw: u64,
    /// Address the rewritten indirect arguments go to.
    pub out_draw: u64,
    pub restart_index: u32,
    /// Indices readable from `index_buffer`.
    pub index_buffer_size_el: u32,
    pub in_el_size_B: u32,
    pub out_el_size_B: u32,
    pub flatshade_first: u32,
    pub mode: u32,
}

const _: [(); 56] = [(); core::mem::size_of::<TriangleFanParams>()];

/// Topology code the kernel switches on.
pub fn kernel_mode(topology: PrimitiveTopology) -> u32 {
    match topology {
        PrimitiveTopology::PointList => 0,
        PrimitiveTopology::LineList => 1,
        PrimitiveTopology::LineStrip => 3,
        PrimitiveTopology::TriangleList => 4,
        PrimitiveTopology::TriangleStrip => 5,
        PrimitiveTopology::TriangleFan => 6,
    }
}

/// Draw being rewritten.
#[derive(Clone, Copy, Debug)]
pub(crate) struct EmulatedDraw {
    pub topology: PrimitiveTopology,
    /// Bound index buffer for indexed draws.
    pub index: Option<IndexBinding>,
    /// Rewrite narrow indices as 32-bit so the all-ones value stops being a restart.
    pub widen: bool,
    /// Vertex or index count of a direct draw. Indirect draws leave it unset and are sized
    /// for the most the bound buffers can feed.
    pub count: Option<u32>,
    /// Vertex count the bound vertex buffers can feed.
    pub max_vertices: u32,
    /// Flat-shaded attributes come from the first vertex of each primitive.
    pub flatshade_first: bool,
    pub indirect_buffer: BufferId,
    pub indirect_address: u64,
}

/// Record the rewrite kernel on the pre-pass stream and the indirect draw on the main stream.
pub(crate) fn emit_unsupported_topology(
    enc: &mut EncoderManager,
    draw: &EmulatedDraw,
) -> Result<(), RecordError> {
    let (readable, in_count, in_el, out_type, restart) = match &draw.index {
        Some(index) => {
            let in_el = index.index_type.size_bytes();
            let (out_type, restart) = if draw.widen {
                (IndexType::U32, u32::MAX)
            } else {
                (index.index_type, index.restart)
            };
            let readable = index.max_index_count();
            let in_count = draw.count.unwrap_or(readable);
            (readable, in_count, in_el, out_type, restart)
        }
        None => {
            let in_count = draw.count.unwrap_or(draw.max_vertices);
            (
                in_count,
                in_count,
                0,
                IndexType::for_index_count(in_count),
                u32::MAX,
            )
        }
    };
    let out_el = out_type.size_bytes();
    let out_count = draw.topology.decomposed_index_count(in_count);
    let size = OUTPUT_INDEX_OFFSET + u64::from(out_count) * u64::from(out_el);
    let output = enc
        .scratch
        .allocate(size, DrawIndexedIndirectArgs::ALIGN_BYTES, &mut enc.stats)?;

    let params = TriangleFanParams {
        index_buffer: draw.index.map_or(0, |index| index.address()),
        out_ptr: output.gpu_address + OUTPUT_INDEX_OFFSET,
        in_draw: draw.indirect_address,
        out_draw: output.gpu_address,
        restart_index: restart,
        index_buffer_size_el: readable,
        in_el_size_B: in_el,
        out_el_size_B: out_el,
        flatshade_first: u32::from(draw.flatshade_first),
        mode: kernel_mode(draw.topology),
    };
    let kernel = enc.device().library().triangle_fan;

    let pre = enc.pre_compute();
    if let Some(index) = &draw.index {
        pre.push(NativeCmd::UseResource {
            buffer: index.bo.buffer,
            usage: ResourceUsage::READ,
        });
    }
    pre.push(NativeCmd::UseResource {
        buffer: draw.indirect_buffer,
        usage: ResourceUsage::READ,
    });
    pre.push(NativeCmd::UseResource {
        buffer: output.buffer,
        usage: ResourceUsage::WRITE,
    });
    pre.push(NativeCmd::SetComputePipeline(kernel));
    pre.push(NativeCmd::SetComputeBytes {
        bytes: bytemuck::bytes_of(&params).to_vec(),
        index: 0,
    });
    pre.push(NativeCmd::Dispatch {
        threadgroups: [1, 1, 1],
        threads_per_threadgroup: [1, 1, 1],
    });

    enc.main.push(NativeCmd::DrawIndexedIndirect {
        primitive: draw.topology.decomposed_primitive(),
        index_type: out_type,
        index_buffer: output.buffer,
        index_offset: OUTPUT_INDEX_OFFSET,
        indirect_buffer: output.buffer,
        indirect_offset: 0,
    });
    RecordStats::inc(&mut enc.stats.emulated_draws);
    debug!(
        topology = %draw.topology,
        indexed = draw.index.is_some(),
        widen = draw.widen,
        out_count,
        ?out_type,
        "emulated draw"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::DeviceConfig;
    use crate::device::Device;
    use crate::memory::{Bo, SystemAllocator};
    use crate::native::{PrimitiveType, RenderPassDescriptor};

    fn render_manager() -> EncoderManager {
        let device = Device::new(Arc::new(SystemAllocator::new()), DeviceConfig::default()).unwrap();
        let mut enc = EncoderManager::new(device);
        enc.start_render(RenderPassDescriptor::default(), 0).unwrap();
        enc
    }

    fn pushed_params(enc: &EncoderManager) -> TriangleFanParams {
        enc.pre
            .iter()
            .find_map(|c| match c {
                NativeCmd::SetComputeBytes { bytes, .. } => {
                    Some(bytemuck::pod_read_unaligned(bytes))
                }
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn indirect_fan_sizes_output_from_vertex_buffers() {
        let mut enc = render_manager();
        let draw = EmulatedDraw {
            topology: PrimitiveTopology::TriangleFan,
            index: None,
            widen: false,
            count: None,
            max_vertices: 10,
            flatshade_first: true,
            indirect_buffer: BufferId(77),
            indirect_address: 0x5000,
        };
        emit_unsupported_topology(&mut enc, &draw).unwrap();

        let output = enc.scratch.buffers()[0];
        assert_eq!(output.size, 20 + 24 * 2);
        let params = pushed_params(&enc);
        assert_eq!(params.out_draw, output.gpu_address);
        assert_eq!(params.out_ptr, output.gpu_address + 20);
        assert_eq!(params.in_draw, 0x5000);
        assert_eq!(params.index_buffer, 0);
        assert_eq!(params.out_el_size_B, 2);
        assert_eq!(params.restart_index, u32::MAX);
        assert_eq!(params.mode, 6);

        assert_eq!(
            enc.main.commands().last(),
            Some(&NativeCmd::DrawIndexedIndirect {
                primitive: PrimitiveType::Triangle,
                index_type: IndexType::U16,
                index_buffer: output.buffer,
                index_offset: 20,
                indirect_buffer: output.buffer,
                indirect_offset: 0,
            })
        );
        assert_eq!(
            enc.pre.count(|c| matches!(c, NativeCmd::UseResource { .. })),
            2
        );
        assert_eq!(enc.stats.emulated_draws, 1);
    }

    #[test]
    fn large_vertex_counts_use_32_bit_output() {
        let mut enc = render_manager();
        let draw = EmulatedDraw {
            topology: PrimitiveTopology::TriangleFan,
            index: None,
            widen: false,
            count: None,
            max_vertices: 70_000,
            flatshade_first: true,
            indirect_buffer: BufferId(1),
            indirect_address: 0x100,
        };
        emit_unsupported_topology(&mut enc, &draw).unwrap();
        assert_eq!(pushed_params(&enc).out_el_size_B, 4);
    }

    #[test]
    fn widened_strip_outputs_32_bit_list() {
        let mut enc = render_manager();
        let index_bo = Bo {
            buffer: BufferId(40),
            gpu_address: 0x9000,
            size: 64,
        };
        let draw = EmulatedDraw {
            topology: PrimitiveTopology::TriangleStrip,
            index: Some(IndexBinding::new(index_bo, 8, IndexType::U16)),
            widen: true,
            count: None,
            max_vertices: 0,
            flatshade_first: true,
            indirect_buffer: BufferId(41),
            indirect_address: 0xa000,
        };
        emit_unsupported_topology(&mut enc, &draw).unwrap();

        let params = pushed_params(&enc);
        assert_eq!(params.index_buffer, 0x9008);
        assert_eq!(params.index_buffer_size_el, 28);
        assert_eq!(params.in_el_size_B, 2);
        assert_eq!(params.out_el_size_B, 4);
        assert_eq!(params.restart_index, u32::MAX);
        assert_eq!(enc.scratch.buffers()[0].size, 20 + 26 * 3 * 4);
        assert!(enc.pre.iter().any(|c| *c
            == NativeCmd::UseResource {
                buffer: BufferId(40),
                usage: ResourceUsage::READ
            }));
    }

    #[test]
    fn indexed_fan_keeps_index_width_and_restart() {
        let mut enc = render_manager();
        let index_bo = Bo {
            buffer: BufferId(40),
            gpu_address: 0x9000,
            size: 400,
        };
        let draw = EmulatedDraw {
            topology: PrimitiveTopology::TriangleFan,
            index: Some(IndexBinding::new(index_bo, 0, IndexType::U32)),
            widen: false,
            count: None,
            max_vertices: 0,
            flatshade_first: true,
            indirect_buffer: BufferId(41),
            indirect_address: 0xa000,
        };
        emit_unsupported_topology(&mut enc, &draw).unwrap();
        let params = pushed_params(&enc);
        assert_eq!(params.restart_index, u32::MAX);
        assert_eq!(params.out_el_size_B, 4);
        assert_eq!(params.index_buffer_size_el, 100);
        assert_eq!(params.flatshade_first, 1);
    }

    #[test]
    fn direct_draws_size_output_from_their_own_count() {
        let mut enc = render_manager();
        let draw = EmulatedDraw {
            topology: PrimitiveTopology::TriangleFan,
            index: None,
            widen: false,
            count: Some(5),
            max_vertices: 70_000,
            flatshade_first: false,
            indirect_buffer: BufferId(1),
            indirect_address: 0x100,
        };
        emit_unsupported_topology(&mut enc, &draw).unwrap();
        let params = pushed_params(&enc);
        assert_eq!(params.out_el_size_B, 2);
        assert_eq!(params.flatshade_first, 0);
        assert_eq!(enc.scratch.buffers()[0].size, 20 + 9 * 2);
    }

    #[test]
    fn indexed_direct_draw_reads_whole_buffer_but_writes_its_count() {
        let mut enc = render_manager();
        let index_bo = Bo {
            buffer: BufferId(40),
            gpu_address: 0x9000,
            size: 4000,
        };
        let draw = EmulatedDraw {
            topology: PrimitiveTopology::TriangleFan,
            index: Some(IndexBinding::new(index_bo, 0, IndexType::U32)),
            widen: false,
            count: Some(6),
            max_vertices: 0,
            flatshade_first: true,
            indirect_buffer: BufferId(41),
            indirect_address: 0xa000,
        };
        emit_unsupported_topology(&mut enc, &draw).unwrap();
        assert_eq!(pushed_params(&enc).index_buffer_size_el, 1000);
        assert_eq!(enc.scratch.buffers()[0].size, 20 + 12 * 4);
    }
}
