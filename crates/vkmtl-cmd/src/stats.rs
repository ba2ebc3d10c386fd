/// Per-command-buffer recording counters, reset together with the command buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecordStats {
    pub scratch_allocations: u64,
    pub scratch_bytes: u64,
    pub root_uploads: u64,
    pub push_descriptor_uploads: u64,
    pub residency_declarations: u64,
    pub heap_declarations: u64,
    pub fences: u64,
    pub draws: u64,
    pub dispatches: u64,
    pub transfers: u64,
    pub emulated_draws: u64,
    pub barrier_restarts: u64,
    pub immediate_write_flushes: u64,
}

impl RecordStats {
    pub(crate) fn inc(counter: &mut u64) {
        *counter = counter.saturating_add(1);
    }
}
