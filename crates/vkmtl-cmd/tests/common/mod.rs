//! Shared helpers for `vkmtl-cmd` integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use vkmtl_cmd::native::{LoadAction, PipelineId, TextureId};
use vkmtl_cmd::state::{
    AttachmentView, ClearValue, Rect2D, RenderingAttachment, RenderingFlags, RenderingInfo,
    ViewportDesc,
};
use vkmtl_cmd::{CommandBuffer, Device, DeviceConfig, GraphicsPipeline, SystemAllocator};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn validating_config() -> DeviceConfig {
    DeviceConfig {
        validate_streams: true,
        ..DeviceConfig::default()
    }
}

pub fn device() -> (Arc<SystemAllocator>, Arc<Device>) {
    init_tracing();
    let allocator = Arc::new(SystemAllocator::new());
    let device = Device::new(allocator.clone(), validating_config()).unwrap();
    (allocator, device)
}

pub fn pipeline_layout() -> Arc<vkmtl_cmd::descriptor::PipelineLayout> {
    Arc::new(vkmtl_cmd::descriptor::PipelineLayout::new(Vec::new(), 0))
}

pub fn graphics_pipeline(id: u32) -> Arc<GraphicsPipeline> {
    Arc::new(GraphicsPipeline::new(PipelineId(id), pipeline_layout()))
}

pub fn color_pass(width: u32, height: u32, load: LoadAction) -> RenderingInfo {
    RenderingInfo {
        flags: RenderingFlags::empty(),
        render_area: Rect2D::new(0, 0, width, height),
        layer_count: 1,
        view_mask: 0,
        color_attachments: vec![Some(RenderingAttachment {
            view: AttachmentView {
                texture: TextureId(1),
                width,
                height,
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

pub fn full_viewport(width: u32, height: u32) -> ViewportDesc {
    ViewportDesc {
        x: 0.0,
        y: 0.0,
        width: width as f32,
        height: height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Record a single pass with one triangle draw and end the command buffer.
pub fn record_triangle(device: &Arc<Device>) -> CommandBuffer {
    let mut cb = CommandBuffer::new(device.clone());
    cb.begin();
    cb.bind_pipeline(graphics_pipeline(1));
    cb.begin_rendering(color_pass(64, 64, LoadAction::Clear));
    cb.set_viewports(0, &[full_viewport(64, 64)]);
    cb.set_scissors(0, &[Rect2D::new(0, 0, 64, 64)]);
    cb.draw(3, 1, 0, 0);
    cb.end_rendering();
    cb.end().unwrap();
    cb
}
