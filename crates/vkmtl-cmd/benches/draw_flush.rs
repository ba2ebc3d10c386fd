#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
use std::sync::Arc;

#[cfg(not(target_arch = "wasm32"))]
use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
#[cfg(not(target_arch = "wasm32"))]
use vkmtl_cmd::descriptor::PipelineLayout;
#[cfg(not(target_arch = "wasm32"))]
use vkmtl_cmd::native::{LoadAction, PipelineId, TextureId};
#[cfg(not(target_arch = "wasm32"))]
use vkmtl_cmd::state::{
    AttachmentView, ClearValue, Rect2D, RenderingAttachment, RenderingFlags, RenderingInfo,
};
#[cfg(not(target_arch = "wasm32"))]
use vkmtl_cmd::{
    CommandBuffer, Device, DeviceConfig, GraphicsPipeline, ShaderStages, SystemAllocator,
};

#[cfg(not(target_arch = "wasm32"))]
const DRAWS: u32 = 256;

#[cfg(not(target_arch = "wasm32"))]
fn pass() -> RenderingInfo {
    RenderingInfo {
        flags: RenderingFlags::empty(),
        render_area: Rect2D::new(0, 0, 256, 256),
        layer_count: 1,
        view_mask: 0,
        color_attachments: vec![Some(RenderingAttachment {
            view: AttachmentView {
                texture: TextureId(1),
                width: 256,
                height: 256,
                samples: 1,
            },
            load: LoadAction::Clear,
            clear: ClearValue::Color([0.0; 4]),
            resolve: None,
        })],
        depth_attachment: None,
        stencil_attachment: None,
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn recording(device: &Arc<Device>) -> CommandBuffer {
    let mut cb = CommandBuffer::new(device.clone());
    cb.begin();
    cb.bind_pipeline(Arc::new(GraphicsPipeline::new(
        PipelineId(1),
        Arc::new(PipelineLayout::new(Vec::new(), 16)),
    )));
    cb.begin_rendering(pass());
    cb.set_scissors(0, &[Rect2D::new(0, 0, 256, 256)]);
    cb
}

#[cfg(not(target_arch = "wasm32"))]
fn bench_draw_flush(c: &mut Criterion) {
    let device = Device::new(
        Arc::new(SystemAllocator::new()),
        DeviceConfig {
            validate_streams: false,
            ..DeviceConfig::default()
        },
    )
    .unwrap();

    let mut group = c.benchmark_group("draw_flush");
    group.throughput(criterion::Throughput::Elements(u64::from(DRAWS)));

    group.bench_function(BenchmarkId::new("clean_state", DRAWS), |b| {
        b.iter_batched(
            || recording(&device),
            |mut cb| {
                for i in 0..DRAWS {
                    cb.draw(3, 1, black_box(i * 3), 0);
                }
                cb
            },
            BatchSize::SmallInput,
        )
    });

    group.bench_function(BenchmarkId::new("push_constants_each_draw", DRAWS), |b| {
        b.iter_batched(
            || recording(&device),
            |mut cb| {
                for i in 0..DRAWS {
                    cb.push_constants(ShaderStages::VERTEX, 0, &i.to_le_bytes());
                    cb.draw(3, 1, 0, 0);
                }
                cb
            },
            BatchSize::SmallInput,
        )
    });

    group.bench_function(BenchmarkId::new("barrier_every_16", DRAWS), |b| {
        b.iter_batched(
            || recording(&device),
            |mut cb| {
                for i in 0..DRAWS {
                    if i % 16 == 15 {
                        cb.pipeline_barrier();
                    }
                    cb.draw(3, 1, 0, 0);
                }
                cb
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

#[cfg(not(target_arch = "wasm32"))]
criterion_group!(benches, bench_draw_flush);
#[cfg(not(target_arch = "wasm32"))]
criterion_main!(benches);
