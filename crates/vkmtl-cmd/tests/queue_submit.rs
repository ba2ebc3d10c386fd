mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use vkmtl_cmd::native::{validate_stream, LoadAction, StreamRole};
use vkmtl_cmd::state::{Rect2D, VertexBufferBinding};
use vkmtl_cmd::topology::PrimitiveTopology;
use vkmtl_cmd::{
    CommandBuffer, Device, GraphicsPipeline, MemoryAllocator, Queue, QueueError, RecordError,
    RecordingBackend, SystemAllocator,
};
use vkmtl_cmd::pipeline::VertexAttribute;

use common::{color_pass, device, full_viewport, record_triangle, validating_config};

fn record_fan(device: &Arc<Device>, allocator: &SystemAllocator) -> CommandBuffer {
    let vertices = allocator.allocate(12 * 8, 16).unwrap();
    let pipeline = GraphicsPipeline::new(vkmtl_cmd::native::PipelineId(2), common::pipeline_layout())
        .with_attributes(vec![Some(VertexAttribute {
            binding: 0,
            offset: 0,
            element_size: 12,
        })]);

    let mut cb = CommandBuffer::new(device.clone());
    cb.begin();
    cb.bind_pipeline(Arc::new(pipeline));
    cb.bind_vertex_buffers(
        0,
        &[VertexBufferBinding {
            bo: vertices,
            offset: 0,
            size: None,
        }],
    );
    cb.set_vertex_binding_strides(0, &[12]);
    cb.set_primitive_topology(PrimitiveTopology::TriangleFan);
    cb.begin_rendering(color_pass(64, 64, LoadAction::Load));
    cb.set_viewports(0, &[full_viewport(64, 64)]);
    cb.set_scissors(0, &[Rect2D::new(0, 0, 64, 64)]);
    cb.draw(8, 1, 0, 0);
    cb.end_rendering();
    cb.end().unwrap();
    cb
}

#[test]
fn pre_pass_stream_is_committed_first() {
    let (allocator, device) = device();
    let cb = record_fan(&device, &allocator);
    let mut queue = Queue::new(device.clone(), RecordingBackend::new());
    queue.submit(&[&cb]).unwrap();

    let committed = &queue.backend().committed;
    assert_eq!(committed.len(), 2);
    assert_eq!(committed[0].role, StreamRole::PrePass);
    assert_eq!(committed[1].role, StreamRole::Main);
    assert!(committed.iter().all(|s| s.event == cb.event()));
    assert_eq!(queue.submitted(), 1);

    let pre = validate_stream(&committed[0].stream, StreamRole::PrePass).unwrap();
    let main = validate_stream(&committed[1].stream, StreamRole::Main).unwrap();
    assert_eq!(pre.dispatches, 1);
    assert_eq!(main.draws, 1);
    // Every value the main stream waits for is eventually signaled by the pre-pass stream.
    assert!(pre.max_signaled_value >= main.max_waited_value);
}

#[test]
fn command_buffers_commit_in_submission_order() {
    let (_, device) = device();
    let first = record_triangle(&device);
    let second = record_triangle(&device);
    assert_ne!(first.event(), second.event());

    let mut queue = Queue::new(device, RecordingBackend::new());
    queue.submit(&[&first, &second]).unwrap();

    let events: Vec<_> = queue.backend().committed.iter().map(|s| s.event).collect();
    assert_eq!(
        events,
        vec![first.event(), first.event(), second.event(), second.event()]
    );
    assert_eq!(queue.submitted(), 2);
}

#[test]
fn recording_command_buffer_is_rejected() {
    let (_, device) = device();
    let ready = record_triangle(&device);
    let mut recording = CommandBuffer::new(device.clone());
    recording.begin();

    let mut queue = Queue::new(device, RecordingBackend::new());
    let err = queue.submit(&[&ready, &recording]).unwrap_err();
    assert!(matches!(err, QueueError::NotExecutable("recording")));
    // Nothing is committed when any command buffer of the batch is rejected.
    assert!(queue.backend().committed.is_empty());
    assert_eq!(queue.submitted(), 0);
}

#[test]
fn failed_command_buffer_reports_its_error() {
    common::init_tracing();
    let device_bytes = 1024 * 16 + 16 + 4096 * 8;
    let allocator = Arc::new(SystemAllocator::with_budget(device_bytes));
    let device = Device::new(allocator, validating_config()).unwrap();

    let mut cb = CommandBuffer::new(device.clone());
    cb.begin();
    cb.bind_pipeline(common::graphics_pipeline(1));
    cb.begin_rendering(color_pass(64, 64, LoadAction::Load));
    cb.draw(3, 1, 0, 0);
    assert!(cb.end().is_err());

    let mut queue = Queue::new(device, RecordingBackend::new());
    let err = queue.submit(&[&cb]).unwrap_err();
    assert!(matches!(
        err,
        QueueError::Record(RecordError::OutOfDeviceMemory(_))
    ));
}

#[test]
fn backend_device_loss_marks_device_lost() {
    let (_, device) = device();
    let cb = record_triangle(&device);
    let mut queue = Queue::new(device.clone(), RecordingBackend::new());
    queue.backend_mut().lose_device = true;

    assert!(matches!(queue.submit(&[&cb]), Err(QueueError::DeviceLost)));
    assert!(device.is_lost());
    assert!(matches!(queue.submit(&[&cb]), Err(QueueError::DeviceLost)));

    let mut next = CommandBuffer::new(device);
    next.begin();
    next.dispatch(1, 1, 1);
    assert_eq!(next.end(), Err(RecordError::DeviceLost));
}
