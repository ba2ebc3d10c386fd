//! Encoder lifecycle of one command buffer.
//!
//! The main stream holds at most one open encoder. Every encoder ends by updating a fence that
//! the next encoder waits on, so work on the main stream executes in recording order. The
//! pre-pass stream runs compute work that render passes consume (emulated index buffers); it
//! is ordered against the main stream with a single monotonically valued event:
//!
//! ```text
//! main: Signal(a) Wait(a+1) [render pass] ... Signal(b) Wait(b+1) [render pass]
//! pre:                         Signal(a-1) Wait(b) [compute] Signal(b+1)
//! ```
//!
//! Each render pass start lets any pre-pass work of the pass run (`Signal(a)`) and then waits
//! for it to finish (`Wait(a+1)`). The pre-pass encoder of a pass first catches up with the
//! previous pass, waits for the pass to start, and signals completion when the main encoder of
//! the pass ends. `end()` signals the final value on the pre-pass stream so the main stream
//! never waits for a pass that recorded no pre-pass work.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use tracing::{debug, trace};

use crate::device::Device;
use crate::error::RecordError;
use crate::native::{
    BufferId, CommandStream, EncoderKind, EventId, FenceId, NativeCmd, RenderPassDescriptor,
    ResourceUsage,
};
use crate::query::CopyQueryParams;
use crate::scratch::ScratchMemory;
use crate::stats::RecordStats;

/// Argument index of the device sampler table in every encoder.
pub const SAMPLER_TABLE_INDEX: u32 = 1;

/// Push block of the library `imm_write` kernel.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ImmWriteParams {
    /// Device address of the `(address, value)` pairs.
    pub buffer_address: u64,
    pub count: u32,
    pub _pad: u32,
}

const _: [(); 16] = [(); core::mem::size_of::<ImmWriteParams>()];

/// Query result copy waiting for the open encoder to end.
#[derive(Clone, Copy, Debug)]
struct QueuedQueryCopy {
    params: CopyQueryParams,
    query_count: u32,
    /// Destination first, then the buffers the kernel reads.
    buffers: [BufferId; 3],
}

pub(crate) struct EncoderManager {
    device: Arc<Device>,
    pub(crate) main: CommandStream,
    pub(crate) pre: CommandStream,
    pub(crate) scratch: ScratchMemory,
    pub(crate) stats: RecordStats,
    main_kind: Option<EncoderKind>,
    pre_open: bool,
    event: EventId,
    event_value: u64,
    signal_value_pre_gfx: u64,
    wait_value_pre_gfx: u64,
    last_fence: Option<FenceId>,
    wait_fence: bool,
    fences: Vec<FenceId>,
    /// Heap set hash last declared to the open encoder.
    heap_hash: Option<u64>,
    /// Bumped for every encoder opened on the main stream.
    generation: u64,
    imm_writes: Vec<[u64; 2]>,
    imm_buffers: Vec<BufferId>,
    query_copies: Vec<QueuedQueryCopy>,
}

impl std::fmt::Debug for EncoderManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderManager")
            .field("main_kind", &self.main_kind)
            .field("pre_open", &self.pre_open)
            .field("event", &self.event)
            .field("event_value", &self.event_value)
            .field("fences", &self.fences.len())
            .field("pending_writes", &self.imm_writes.len())
            .finish_non_exhaustive()
    }
}

impl EncoderManager {
    pub fn new(device: Arc<Device>) -> Self {
        let event = device.new_event();
        let scratch = ScratchMemory::new(device.allocator().clone());
        Self {
            device,
            main: CommandStream::new(),
            pre: CommandStream::new(),
            scratch,
            stats: RecordStats::default(),
            main_kind: None,
            pre_open: false,
            event,
            event_value: 0,
            signal_value_pre_gfx: 0,
            wait_value_pre_gfx: 0,
            last_fence: None,
            wait_fence: false,
            fences: Vec::new(),
            heap_hash: None,
            generation: 0,
            imm_writes: Vec::new(),
            imm_buffers: Vec::new(),
            query_copies: Vec::new(),
        }
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn kind(&self) -> Option<EncoderKind> {
        self.main_kind
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn event(&self) -> EventId {
        self.event
    }

    pub fn event_value(&self) -> u64 {
        self.event_value
    }

    pub fn fences(&self) -> &[FenceId] {
        &self.fences
    }

    pub fn pending_writes(&self) -> usize {
        self.imm_writes.len() + self.query_copies.len()
    }

    fn begin_main(&mut self, kind: EncoderKind) {
        self.main_kind = Some(kind);
        self.generation += 1;
        if self.wait_fence {
            if let Some(fence) = self.last_fence {
                self.main.push(NativeCmd::WaitForFence(fence));
            }
            self.wait_fence = false;
        }
        self.heap_hash = None;
        debug!(?kind, generation = self.generation, "encoder started");
    }

    /// Open a render encoder for `desc`, ending whatever encoder is open.
    ///
    /// Panics when a render encoder is already open.
    pub fn start_render(
        &mut self,
        desc: RenderPassDescriptor,
        view_mask: u32,
    ) -> Result<(), RecordError> {
        assert_ne!(
            self.main_kind,
            Some(EncoderKind::Render),
            "render encoder started while another is open"
        );
        self.signal_fence_and_end()?;

        self.signal_value_pre_gfx = self.event_value;
        self.event_value += 1;
        self.main.push(NativeCmd::SignalEvent {
            event: self.event,
            value: self.event_value,
        });
        self.wait_value_pre_gfx = self.event_value;
        self.event_value += 1;
        self.main.push(NativeCmd::WaitForEvent {
            event: self.event,
            value: self.event_value,
        });

        self.main.push(NativeCmd::BeginRenderEncoder(Box::new(desc)));
        self.begin_main(EncoderKind::Render);

        let amplification = if view_mask == 0 {
            vec![0]
        } else {
            (0..32).filter(|bit| view_mask & (1 << bit) != 0).collect()
        };
        self.main.push(NativeCmd::SetVertexAmplification(amplification));

        let sampler_table = self.device.sampler_table().buffer;
        self.main.push(NativeCmd::SetVertexBuffer {
            buffer: sampler_table,
            offset: 0,
            index: SAMPLER_TABLE_INDEX,
        });
        self.main.push(NativeCmd::SetFragmentBuffer {
            buffer: sampler_table,
            offset: 0,
            index: SAMPLER_TABLE_INDEX,
        });
        Ok(())
    }

    /// Make a compute encoder the open one, reusing it when it already is.
    pub fn compute(&mut self) -> Result<(), RecordError> {
        if self.main_kind == Some(EncoderKind::Compute) {
            return Ok(());
        }
        self.signal_fence_and_end()?;
        self.main.push(NativeCmd::BeginComputeEncoder);
        self.begin_main(EncoderKind::Compute);
        self.main.push(NativeCmd::SetComputeBuffer {
            buffer: self.device.sampler_table().buffer,
            offset: 0,
            index: SAMPLER_TABLE_INDEX,
        });
        Ok(())
    }

    /// Make a blit encoder the open one, reusing it when it already is.
    pub fn blit(&mut self) -> Result<(), RecordError> {
        if self.main_kind == Some(EncoderKind::Blit) {
            return Ok(());
        }
        self.signal_fence_and_end()?;
        self.main.push(NativeCmd::BeginBlitEncoder);
        self.begin_main(EncoderKind::Blit);
        Ok(())
    }

    /// Compute encoder of the pre-pass stream, opened on first use within a render pass.
    pub fn pre_compute(&mut self) -> &mut CommandStream {
        debug_assert_eq!(self.main_kind, Some(EncoderKind::Render));
        if !self.pre_open {
            self.pre.push(NativeCmd::SignalEvent {
                event: self.event,
                value: self.signal_value_pre_gfx,
            });
            self.pre.push(NativeCmd::WaitForEvent {
                event: self.event,
                value: self.wait_value_pre_gfx,
            });
            self.pre.push(NativeCmd::BeginComputeEncoder);
            self.pre_open = true;
            debug!(wait_value = self.wait_value_pre_gfx, "pre-pass encoder started");
        }
        &mut self.pre
    }

    /// End the open pre-pass and main encoders, publishing a fence from the main one.
    ///
    /// Queued immediate writes are flushed right after, through an encoder of their own.
    pub fn signal_fence_and_end(&mut self) -> Result<(), RecordError> {
        if self.pre_open {
            self.pre.push(NativeCmd::EndEncoding);
            self.pre.push(NativeCmd::SignalEvent {
                event: self.event,
                value: self.event_value,
            });
            self.pre_open = false;
        }

        let Some(kind) = self.main_kind.take() else {
            return Ok(());
        };
        let fence = self.device.new_fence();
        self.main.push(NativeCmd::UpdateFence(fence));
        self.main.push(NativeCmd::EndEncoding);
        self.last_fence = Some(fence);
        self.wait_fence = true;
        self.fences.push(fence);
        RecordStats::inc(&mut self.stats.fences);
        debug!(?kind, ?fence, "encoder ended");

        self.upload_queued_writes()
    }

    /// Queue a 64-bit write of `value` to `address`, which lies inside `buffer`.
    pub fn write_immediate(&mut self, address: u64, value: u64, buffer: BufferId) {
        self.imm_writes.push([address, value]);
        if !self.imm_buffers.contains(&buffer) {
            self.imm_buffers.push(buffer);
        }
        trace!(address, value, ?buffer, "immediate write queued");
    }

    /// Queue a copy of `query_count` query results; it runs after the queued immediate writes
    /// so availability set by earlier query ends is visible to it.
    pub fn copy_query_results(
        &mut self,
        params: CopyQueryParams,
        query_count: u32,
        destination: BufferId,
        sources: [BufferId; 2],
    ) {
        self.query_copies.push(QueuedQueryCopy {
            params,
            query_count,
            buffers: [destination, sources[0], sources[1]],
        });
        trace!(query_count, ?destination, "query result copy queued");
    }

    /// Flush queued immediate writes as one `imm_write` dispatch, then the queued query result
    /// copies as one `copy_query` dispatch each, all in a compute encoder of their own.
    pub fn upload_queued_writes(&mut self) -> Result<(), RecordError> {
        if self.imm_writes.is_empty() && self.query_copies.is_empty() {
            return Ok(());
        }
        self.compute()?;
        if !self.imm_writes.is_empty() {
            self.dispatch_immediate_writes()?;
        }
        let library = *self.device.library();
        for copy in std::mem::take(&mut self.query_copies) {
            let [destination, availability, results] = copy.buffers;
            self.main.push(NativeCmd::UseResource {
                buffer: destination,
                usage: ResourceUsage::WRITE,
            });
            for buffer in [availability, results] {
                self.main.push(NativeCmd::UseResource {
                    buffer,
                    usage: ResourceUsage::READ,
                });
            }
            self.main.push(NativeCmd::SetComputePipeline(library.copy_query));
            self.main.push(NativeCmd::SetComputeBytes {
                bytes: bytemuck::bytes_of(&copy.params).to_vec(),
                index: 0,
            });
            self.main.push(NativeCmd::Dispatch {
                threadgroups: [copy.query_count, 1, 1],
                threads_per_threadgroup: [1, 1, 1],
            });
            debug!(queries = copy.query_count, ?destination, "query results copied");
        }
        self.signal_fence_and_end()
    }

    fn dispatch_immediate_writes(&mut self) -> Result<(), RecordError> {
        let count = self.imm_writes.len() as u32;
        let bo = self
            .scratch
            .upload(bytemuck::cast_slice(&self.imm_writes), 8, &mut self.stats)?;
        self.main.push(NativeCmd::UseResource {
            buffer: bo.buffer,
            usage: ResourceUsage::READ,
        });
        for buffer in self.imm_buffers.drain(..) {
            self.main.push(NativeCmd::UseResource {
                buffer,
                usage: ResourceUsage::READ | ResourceUsage::WRITE,
            });
        }
        let params = ImmWriteParams {
            buffer_address: bo.gpu_address,
            count,
            _pad: 0,
        };
        self.main
            .push(NativeCmd::SetComputePipeline(self.device.library().imm_write));
        self.main.push(NativeCmd::SetComputeBytes {
            bytes: bytemuck::bytes_of(&params).to_vec(),
            index: 0,
        });
        self.main.push(NativeCmd::Dispatch {
            threadgroups: [count, 1, 1],
            threads_per_threadgroup: [1, 1, 1],
        });
        self.imm_writes.clear();
        RecordStats::inc(&mut self.stats.immediate_write_flushes);
        debug!(count, buffer = ?bo.buffer, "immediate writes flushed");
        Ok(())
    }

    /// Declare the device's user heaps to the open encoder when they changed since it last saw
    /// them.
    pub fn declare_heaps(&mut self) {
        if let Some((hash, heaps)) = self.device.user_heaps_if_changed(self.heap_hash) {
            if !heaps.is_empty() {
                self.main.push(NativeCmd::UseHeaps(heaps));
                RecordStats::inc(&mut self.stats.heap_declarations);
            }
            self.heap_hash = Some(hash);
        }
    }

    /// End the open encoder for a barrier and return its kind.
    pub fn barrier(&mut self) -> Result<Option<EncoderKind>, RecordError> {
        let last = self.main_kind;
        self.signal_fence_and_end()?;
        Ok(last)
    }

    /// Close both streams.
    pub fn end(&mut self) -> Result<(), RecordError> {
        self.signal_fence_and_end()?;
        self.upload_queued_writes()?;
        self.pre.push(NativeCmd::SignalEvent {
            event: self.event,
            value: self.event_value,
        });
        Ok(())
    }

    /// Drop everything recorded and release scratch memory.
    pub fn reset(&mut self) {
        self.main.clear();
        self.pre.clear();
        self.scratch.release_all();
        self.stats = RecordStats::default();
        self.main_kind = None;
        self.pre_open = false;
        // Event values only move forward, so a reused command buffer gets a fresh event.
        self.event = self.device.new_event();
        self.event_value = 0;
        self.signal_value_pre_gfx = 0;
        self.wait_value_pre_gfx = 0;
        self.last_fence = None;
        self.wait_fence = false;
        self.fences.clear();
        self.heap_hash = None;
        self.imm_writes.clear();
        self.imm_buffers.clear();
        self.query_copies.clear();
    }
}
