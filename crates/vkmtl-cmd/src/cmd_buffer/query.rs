use tracing::debug;

use super::CommandBuffer;
use crate::memory::Bo;
use crate::native::VisibilityResultMode;
use crate::query::{CopyQueryParams, OcclusionQueryPool, QueryResultFlags};
use crate::state::{GfxDirty, OcclusionState};

impl CommandBuffer {
    /// Start counting samples for `query`; `precise` asks for a sample count instead of a
    /// boolean.
    pub fn begin_occlusion_query(&mut self, pool: &OcclusionQueryPool, query: u32, precise: bool) {
        self.guarded("begin_occlusion_query", |cb| {
            cb.gfx.occlusion = OcclusionState {
                mode: if precise {
                    VisibilityResultMode::Counting
                } else {
                    VisibilityResultMode::Boolean
                },
                index: pool.slot(query),
            };
            cb.gfx.dirty |= GfxDirty::OCCLUSION;
            Ok(())
        });
    }

    pub fn end_occlusion_query(&mut self, pool: &OcclusionQueryPool, query: u32) {
        self.guarded("end_occlusion_query", |cb| {
            cb.gfx.occlusion.mode = VisibilityResultMode::Disabled;
            cb.gfx.dirty |= GfxDirty::OCCLUSION;
            cb.enc.write_immediate(
                pool.availability_address(query),
                1,
                pool.availability().buffer,
            );
            Ok(())
        });
    }

    /// Zero the results and availability of `first..first + count`.
    ///
    /// Panics when the range does not fit in the pool.
    pub fn reset_query_pool(&mut self, pool: &OcclusionQueryPool, first: u32, count: u32) {
        self.guarded("reset_query_pool", |cb| {
            pool.check_range(first, count);
            let results = cb.device.occlusion_results().buffer;
            for query in first..first + count {
                cb.enc.write_immediate(pool.result_address(query), 0, results);
                let availability = pool.availability_address(query);
                cb.enc
                    .write_immediate(availability, 0, pool.availability().buffer);
            }
            if cb.enc.kind().is_none() {
                cb.enc.upload_queued_writes()?;
            }
            Ok(())
        });
    }

    /// Copy the results of `first..first + count` into `destination` at `offset`, one query
    /// every `stride` bytes.
    ///
    /// The copy runs after the immediate writes already queued, so it sees every query ended
    /// or reset before it. Panics when the range does not fit in the pool.
    #[allow(clippy::too_many_arguments)]
    pub fn copy_query_pool_results(
        &mut self,
        pool: &OcclusionQueryPool,
        first: u32,
        count: u32,
        destination: Bo,
        offset: u64,
        stride: u64,
        flags: QueryResultFlags,
    ) {
        self.guarded("copy_query_pool_results", |cb| {
            pool.check_range(first, count);
            if count == 0 {
                return Ok(());
            }
            let results = cb.device.occlusion_results();
            let params = CopyQueryParams {
                availability: pool.availability().gpu_address,
                results: results.gpu_address,
                indices: pool.indices_address(),
                dst_addr: destination.gpu_address + offset,
                dst_stride: stride,
                first_query: first,
                flags: flags.bits(),
                reports_per_query: 1,
                _pad: [0; 3],
            };
            cb.enc.copy_query_results(
                params,
                count,
                destination.buffer,
                [pool.availability().buffer, results.buffer],
            );
            debug!(first, count, ?flags, "query result copy recorded");
            if cb.enc.kind().is_none() {
                cb.enc.upload_queued_writes()?;
            }
            Ok(())
        });
    }
}
