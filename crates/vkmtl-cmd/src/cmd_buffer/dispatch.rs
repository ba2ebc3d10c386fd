use tracing::trace;

use super::CommandBuffer;
use crate::error::RecordError;
use crate::memory::Bo;
use crate::native::{EncoderKind, NativeCmd};
use crate::state::GfxDirty;
use crate::stats::RecordStats;

impl CommandBuffer {
    /// Emit every piece of compute state the next dispatch depends on.
    ///
    /// Panics when no compute pipeline is bound or a render pass is active.
    pub(crate) fn flush_compute(&mut self) -> Result<(), RecordError> {
        let Some(pipeline) = self.cs.pipeline.clone() else {
            panic!("dispatch with no compute pipeline bound");
        };
        assert_ne!(
            self.enc.kind(),
            Some(EncoderKind::Render),
            "dispatch inside a render pass"
        );
        self.enc.compute()?;

        let cs = &mut self.cs;
        let enc = &mut self.enc;
        cs.enter_encoder(enc.generation());

        if cs.dirty.contains(GfxDirty::PIPELINE) {
            enc.main.push(NativeCmd::SetComputePipeline(pipeline.id));
        }
        cs.descriptors
            .flush(&mut enc.main, &mut enc.scratch, &mut enc.stats)?;
        enc.declare_heaps();
        if let Some(root) = cs.descriptors.root_buffer {
            enc.main.push(NativeCmd::SetComputeBuffer {
                buffer: root.buffer,
                offset: 0,
                index: 0,
            });
        }
        trace!(pipeline = ?pipeline.id, "compute state flushed");
        cs.dirty = GfxDirty::empty();
        Ok(())
    }

    fn set_base_group(&mut self, base: [u32; 3]) {
        let root = &mut self.cs.descriptors.root;
        if root.cs.base_group != base {
            root.cs.base_group = base;
            self.cs.descriptors.root_dirty = true;
        }
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.dispatch_base([0, 0, 0], [x, y, z]);
    }

    /// Dispatch `counts` workgroups whose ids start at `base`.
    pub fn dispatch_base(&mut self, base: [u32; 3], counts: [u32; 3]) {
        self.guarded("dispatch", |cb| {
            cb.set_base_group(base);
            cb.flush_compute()?;
            cb.enc.main.push(NativeCmd::Dispatch {
                threadgroups: counts,
                threads_per_threadgroup: cb.cs.local_size(),
            });
            RecordStats::inc(&mut cb.enc.stats.dispatches);
            Ok(())
        });
    }

    /// Dispatch with workgroup counts read from `buffer` at `offset`.
    pub fn dispatch_indirect(&mut self, buffer: Bo, offset: u64) {
        self.guarded("dispatch_indirect", |cb| {
            cb.set_base_group([0, 0, 0]);
            cb.flush_compute()?;
            cb.enc.main.push(NativeCmd::DispatchIndirect {
                indirect_buffer: buffer.buffer,
                indirect_offset: offset,
                threads_per_threadgroup: cb.cs.local_size(),
            });
            RecordStats::inc(&mut cb.enc.stats.dispatches);
            Ok(())
        });
    }
}
