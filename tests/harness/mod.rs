#![allow(dead_code)]

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use bytemuck::Pod;
use vkmtl_cmd::native::{
    validate_stream, CommandStream, NativeCmd, PipelineId, StreamMetrics, StreamRole,
};
use vkmtl_cmd::root_table::RootDescriptorTable;
use vkmtl_cmd::{
    Bo, CommandBuffer, Device, DeviceConfig, MemoryAllocator, Queue, RecordingBackend,
    SystemAllocator,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
}

/// Device, queue and a readable allocator shared by one scenario.
pub struct Fixture {
    pub allocator: Arc<SystemAllocator>,
    pub device: Arc<Device>,
    pub queue: Queue<RecordingBackend>,
}

/// Validator metrics of both streams of a submitted command buffer.
#[derive(Clone, Copy, Debug)]
pub struct Submitted {
    pub pre: StreamMetrics,
    pub main: StreamMetrics,
}

impl Fixture {
    pub fn new() -> Result<Self> {
        init_tracing();
        let allocator = Arc::new(SystemAllocator::new());
        let device = Device::new(
            allocator.clone(),
            DeviceConfig {
                validate_streams: true,
                ..DeviceConfig::default()
            },
        )
        .context("creating device")?;
        let queue = Queue::new(device.clone(), RecordingBackend::new());
        Ok(Self {
            allocator,
            device,
            queue,
        })
    }

    /// Command buffer that is already recording.
    pub fn command_buffer(&self) -> CommandBuffer {
        let mut cb = CommandBuffer::new(self.device.clone());
        cb.begin();
        cb
    }

    pub fn buffer(&self, size: u64) -> Result<Bo> {
        self.allocator
            .allocate(size, 256)
            .with_context(|| format!("allocating {size} byte buffer"))
    }

    /// End `cb`, validate both streams and submit it.
    pub fn finish(&mut self, cb: &mut CommandBuffer) -> Result<Submitted> {
        cb.end().context("ending command buffer")?;
        let pre = validate_stream(cb.pre_stream(), StreamRole::PrePass)
            .context("validating pre-pass stream")?;
        let main =
            validate_stream(cb.main_stream(), StreamRole::Main).context("validating main stream")?;
        self.queue.submit(&[cb]).context("submitting")?;
        Ok(Submitted { pre, main })
    }

    /// Root tables `cb` uploaded, in upload order.
    pub fn root_tables(&self, cb: &CommandBuffer) -> Result<Vec<RootDescriptorTable>> {
        cb.scratch_buffers()
            .iter()
            .filter(|bo| bo.size == RootDescriptorTable::SIZE_BYTES)
            .map(|bo| {
                let bytes = self
                    .allocator
                    .read(bo)
                    .ok_or_else(|| anyhow!("root table {:?} was freed", bo.buffer))?;
                RootDescriptorTable::from_bytes(&bytes)
                    .ok_or_else(|| anyhow!("root table {:?} has the wrong size", bo.buffer))
            })
            .collect()
    }

    pub fn read_u64s(&self, address: u64, count: usize) -> Result<Vec<u64>> {
        let bytes = self
            .allocator
            .read_address(address, count * 8)
            .ok_or_else(|| anyhow!("no allocation backs {address:#x}"))?;
        Ok(bytes
            .chunks_exact(8)
            .map(|chunk| u64::from_le_bytes(chunk.try_into().expect("8-byte chunk")))
            .collect())
    }
}

/// Push blocks bound right after each `SetComputePipeline(pipeline)` in `stream`.
pub fn compute_params<T: Pod>(stream: &CommandStream, pipeline: PipelineId) -> Vec<T> {
    let mut bound = false;
    let mut out = Vec::new();
    for cmd in stream.iter() {
        match cmd {
            NativeCmd::SetComputePipeline(id) => bound = *id == pipeline,
            NativeCmd::SetComputeBytes { bytes, index: 0 } if bound => {
                out.push(bytemuck::pod_read_unaligned(bytes));
            }
            _ => {}
        }
    }
    out
}
