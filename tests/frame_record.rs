mod harness;

use std::sync::Arc;

use anyhow::{Context, Result};
use pretty_assertions::assert_eq;
use vkmtl_cmd::descriptor::{
    DescriptorBufferInfo, DescriptorPayload, DescriptorSet, DescriptorSetLayout,
    DescriptorSetLayoutBinding, DescriptorType, DescriptorWrite, PipelineLayout,
};
use vkmtl_cmd::native::{
    IndexType, LoadAction, NativeCmd, PipelineId, ResourceUsage, StreamRole, TextureId,
};
use vkmtl_cmd::state::{
    AttachmentView, ClearValue, Rect2D, RenderingAttachment, RenderingFlags, RenderingInfo,
    ViewportDesc,
};
use vkmtl_cmd::topology::PrimitiveTopology;
use vkmtl_cmd::{
    BindPoint, ComputePipeline, GraphicsPipeline, ImmWriteParams, OcclusionQueryPool,
    TriangleFanParams,
};

use harness::{compute_params, Fixture};

const SIZE: u32 = 128;

fn pass(load: LoadAction) -> RenderingInfo {
    RenderingInfo {
        flags: RenderingFlags::empty(),
        render_area: Rect2D::new(0, 0, SIZE, SIZE),
        layer_count: 1,
        view_mask: 0,
        color_attachments: vec![Some(RenderingAttachment {
            view: AttachmentView {
                texture: TextureId(40),
                width: SIZE,
                height: SIZE,
                samples: 1,
            },
            load,
            clear: ClearValue::Color([0.0, 0.0, 0.0, 1.0]),
            resolve: None,
        })],
        depth_attachment: None,
        stencil_attachment: None,
    }
}

fn viewport() -> ViewportDesc {
    ViewportDesc {
        x: 0.0,
        y: 0.0,
        width: SIZE as f32,
        height: SIZE as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

fn uniform_write(binding: u32, ty: DescriptorType, address: u64, range: u64) -> DescriptorWrite {
    DescriptorWrite {
        binding,
        array_element: 0,
        ty,
        payload: DescriptorPayload::Buffers(vec![DescriptorBufferInfo { address, range }]),
    }
}

#[test]
fn bound_set_and_push_descriptors_share_one_root_upload() -> Result<()> {
    let mut fx = Fixture::new()?;
    let uniforms = fx.buffer(1024)?;
    let pushed = fx.buffer(256)?;

    let set_layout = Arc::new(DescriptorSetLayout::new(
        &[
            DescriptorSetLayoutBinding::new(0, DescriptorType::UniformBuffer, 1),
            DescriptorSetLayoutBinding::new(1, DescriptorType::UniformBufferDynamic, 1),
        ],
        false,
    ));
    let push_layout = Arc::new(DescriptorSetLayout::new(
        &[DescriptorSetLayoutBinding::new(0, DescriptorType::UniformBuffer, 1)],
        true,
    ));
    let layout = Arc::new(PipelineLayout::new(
        vec![Some(set_layout.clone()), Some(push_layout)],
        16,
    ));

    let mut set = DescriptorSet::new(fx.allocator.clone(), set_layout).context("creating set")?;
    set.write(&[
        uniform_write(0, DescriptorType::UniformBuffer, uniforms.gpu_address, 256),
        uniform_write(1, DescriptorType::UniformBufferDynamic, uniforms.gpu_address, 256),
    ])?;
    let set = Arc::new(set);

    let mut cb = fx.command_buffer();
    cb.bind_pipeline(Arc::new(GraphicsPipeline::new(PipelineId(1), layout.clone())));
    cb.bind_descriptor_sets(BindPoint::Graphics, &layout, 0, &[Some(set.clone())], &[512]);
    cb.push_descriptor_set(
        BindPoint::Graphics,
        &layout,
        1,
        &[uniform_write(0, DescriptorType::UniformBuffer, pushed.gpu_address, 64)],
    );
    cb.begin_rendering(pass(LoadAction::Clear));
    cb.set_viewports(0, &[viewport()]);
    cb.set_scissors(0, &[Rect2D::new(0, 0, SIZE, SIZE)]);
    cb.draw(3, 1, 0, 0);
    cb.draw(3, 1, 3, 0);
    cb.end_rendering();
    let submitted = fx.finish(&mut cb)?;

    assert_eq!(cb.stats().root_uploads, 1);
    assert_eq!(cb.stats().push_descriptor_uploads, 1);
    assert_eq!(submitted.main.draws, 2);

    let roots = fx.root_tables(&cb)?;
    assert_eq!(roots.len(), 1);
    let root = &roots[0];
    assert_eq!(root.sets[0], set.address().base_addr);
    assert_eq!(root.dynamic_buffers[0].base_addr, uniforms.gpu_address + 512);
    assert_eq!(root.dynamic_buffers[0].size, 256);
    assert_eq!(root.set_dynamic_buffer_start[..3], [0, 1, 1]);

    // The push shadow lives in scratch memory and holds the pushed buffer's address.
    let shadow = fx
        .allocator
        .lookup_address(root.sets[1])
        .context("push shadow not allocated")?;
    assert_eq!(fx.read_u64s(root.sets[1], 1)?, vec![pushed.gpu_address]);

    let resident: Vec<_> = cb
        .main_stream()
        .iter()
        .filter_map(|c| match c {
            NativeCmd::UseResource { buffer, usage } if *usage == ResourceUsage::READ => {
                Some(*buffer)
            }
            _ => None,
        })
        .collect();
    assert!(resident.contains(&set.buffer().context("set has no memory")?));
    assert!(resident.contains(&shadow.buffer));
    assert_eq!(resident.len(), 2);
    Ok(())
}

#[test]
fn frame_with_compute_fan_emulation_and_occlusion_query() -> Result<()> {
    let mut fx = Fixture::new()?;
    let pool = OcclusionQueryPool::new(fx.device.clone(), 1)?;
    let indices = fx.buffer(32)?;
    let library = *fx.device.library();

    let mut cb = fx.command_buffer();
    cb.reset_query_pool(&pool, 0, 1);

    cb.bind_pipeline(Arc::new(ComputePipeline::new(
        PipelineId(20),
        Arc::new(PipelineLayout::new(Vec::new(), 0)),
        [64, 1, 1],
    )));
    cb.dispatch(4, 1, 1);
    cb.pipeline_barrier();

    cb.bind_pipeline(Arc::new(GraphicsPipeline::new(
        PipelineId(21),
        Arc::new(PipelineLayout::new(Vec::new(), 0)),
    )));
    cb.bind_index_buffer(indices, 0, IndexType::U16);
    cb.set_primitive_topology(PrimitiveTopology::TriangleFan);
    cb.begin_rendering(pass(LoadAction::Clear));
    cb.set_viewports(0, &[viewport()]);
    cb.set_scissors(0, &[Rect2D::new(0, 0, SIZE, SIZE)]);
    cb.begin_occlusion_query(&pool, 0, false);
    cb.draw_indexed(12, 1, 0, 0, 0);
    cb.end_occlusion_query(&pool, 0);
    cb.end_rendering();
    let submitted = fx.finish(&mut cb)?;

    // Query reset, user dispatch, availability write.
    assert_eq!(submitted.main.compute_encoders, 3);
    assert_eq!(submitted.main.render_encoders, 1);
    assert_eq!(submitted.main.fences as usize, cb.fences().len());
    assert_eq!(submitted.pre.dispatches, 1);
    assert!(submitted.pre.max_signaled_value >= submitted.main.max_waited_value);

    let fans: Vec<TriangleFanParams> = compute_params(cb.pre_stream(), library.triangle_fan);
    assert_eq!(fans.len(), 1);
    let fan = fans[0];
    assert_eq!(fan.index_buffer, indices.gpu_address);
    assert_eq!(fan.index_buffer_size_el, 16);
    assert_eq!(fan.in_el_size_B, 2);
    // Restart is disabled, so 0xffff must survive as a real index.
    assert_eq!(fan.out_el_size_B, 4);
    assert_eq!(fan.restart_index, u32::MAX);
    assert_eq!(fan.mode, vkmtl_cmd::kernel_mode(PrimitiveTopology::TriangleFan));
    assert_eq!(fan.out_ptr, fan.out_draw + vkmtl_cmd::OUTPUT_INDEX_OFFSET);
    assert_eq!(fx.read_u64s(fan.in_draw, 1)?, vec![12 | (1 << 32)]);

    let writes: Vec<ImmWriteParams> = compute_params(cb.main_stream(), library.imm_write);
    assert_eq!(writes.iter().map(|w| w.count).collect::<Vec<_>>(), vec![2, 1]);
    let availability = fx.read_u64s(writes[1].buffer_address, 2)?;
    assert_eq!(availability, vec![pool.availability_address(0), 1]);

    let committed = &fx.queue.backend().committed;
    assert_eq!(
        committed.iter().map(|s| s.role).collect::<Vec<_>>(),
        vec![StreamRole::PrePass, StreamRole::Main]
    );
    Ok(())
}

#[test]
fn barriers_inside_a_pass_keep_contents() -> Result<()> {
    let mut fx = Fixture::new()?;
    let mut cb = fx.command_buffer();
    cb.bind_pipeline(Arc::new(GraphicsPipeline::new(
        PipelineId(1),
        Arc::new(PipelineLayout::new(Vec::new(), 0)),
    )));
    cb.begin_rendering(pass(LoadAction::Clear));
    cb.set_viewports(0, &[viewport()]);
    cb.set_scissors(0, &[Rect2D::new(0, 0, SIZE, SIZE)]);
    for _ in 0..3 {
        cb.draw(3, 1, 0, 0);
        cb.pipeline_barrier();
    }
    cb.end_rendering();
    let submitted = fx.finish(&mut cb)?;

    assert_eq!(submitted.main.render_encoders, 4);
    assert_eq!(cb.stats().barrier_restarts, 3);
    let loads: Vec<Vec<LoadAction>> = cb
        .main_stream()
        .iter()
        .filter_map(|c| match c {
            NativeCmd::BeginRenderEncoder(desc) => Some(desc.load_actions().collect()),
            _ => None,
        })
        .collect();
    assert_eq!(loads[0], vec![LoadAction::Clear]);
    assert!(loads[1..].iter().all(|l| l == &vec![LoadAction::Load]));
    // Each restarted encoder sees the viewport and scissor again.
    assert_eq!(
        cb.main_stream()
            .count(|c| matches!(c, NativeCmd::SetViewports(_))),
        3
    );
    Ok(())
}
