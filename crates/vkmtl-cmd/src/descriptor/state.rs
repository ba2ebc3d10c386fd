//! Per-bind-point descriptor tracking: bound sets, push shadows and the root table.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::descriptor::layout::PipelineLayout;
use crate::descriptor::set::{DescriptorSet, PushDescriptorSet};
use crate::descriptor::write::DescriptorWrite;
use crate::error::RecordError;
use crate::limits::{MAX_DYNAMIC_BUFFERS, MAX_SETS, MIN_UBO_ALIGNMENT, PUSH_DESCRIPTOR_SET_SIZE};
use crate::memory::Bo;
use crate::native::{CommandStream, NativeCmd, ResourceUsage};
use crate::root_table::RootDescriptorTable;
use crate::scratch::ScratchMemory;
use crate::stats::RecordStats;

const ALL_SETS: u32 = u32::MAX;

fn set_bit(set: usize) -> u32 {
    1 << set
}

fn bits(mask: u32) -> impl Iterator<Item = usize> {
    (0..MAX_SETS).filter(move |i| mask & (1 << i) != 0)
}

/// Descriptor bindings of one bind point plus the root table that publishes them to shaders.
pub struct DescriptorState {
    pub root: RootDescriptorTable,
    pub root_dirty: bool,
    /// Scratch copy of the root table the next draw/dispatch binds.
    pub root_buffer: Option<Bo>,
    pub sets: [Option<Arc<DescriptorSet>>; MAX_SETS],
    pub set_sizes: [u32; MAX_SETS],
    pub push: [Option<Box<PushDescriptorSet>>; MAX_SETS],
    pub push_dirty: u32,
    pub sets_not_resident: u32,
}

impl Default for DescriptorState {
    fn default() -> Self {
        Self {
            root: RootDescriptorTable::default(),
            root_dirty: true,
            root_buffer: None,
            sets: std::array::from_fn(|_| None),
            set_sizes: [0; MAX_SETS],
            push: std::array::from_fn(|_| None),
            push_dirty: 0,
            sets_not_resident: ALL_SETS,
        }
    }
}

impl std::fmt::Debug for DescriptorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorState")
            .field("root_dirty", &self.root_dirty)
            .field("root_buffer", &self.root_buffer)
            .field("push_dirty", &format_args!("{:#010x}", self.push_dirty))
            .field("sets_not_resident", &format_args!("{:#010x}", self.sets_not_resident))
            .finish_non_exhaustive()
    }
}

impl DescriptorState {
    /// Bind `sets` to slots `first..first + sets.len()`.
    ///
    /// Dynamic buffers of each bound set are copied into the root table, shifted by the next
    /// entries of `dynamic_offsets`. Slots past the range get their dynamic-buffer start
    /// recomputed so later partial binds land after this range's dynamic buffers.
    pub fn bind_sets(
        &mut self,
        layout: &PipelineLayout,
        first: u32,
        sets: &[Option<Arc<DescriptorSet>>],
        dynamic_offsets: &[u32],
    ) {
        let first = first as usize;
        assert!(first + sets.len() <= MAX_SETS, "binding sets {first}+{} past {MAX_SETS}", sets.len());

        let mut dyn_start = usize::from(self.root.set_dynamic_buffer_start[first]);
        let mut next_dyn_offset = 0usize;
        for (i, set) in sets.iter().enumerate() {
            let s = first + i;
            self.root.set_dynamic_buffer_start[s] = dyn_start as u8;

            let changed = match (&self.sets[s], set) {
                (Some(old), Some(new)) => !Arc::ptr_eq(old, new),
                (None, None) => false,
                _ => true,
            };
            if changed {
                self.sets[s] = set.clone();
                match set {
                    Some(set) => {
                        let addr = set.address();
                        self.root.sets[s] = addr.base_addr;
                        self.set_sizes[s] = addr.size;
                        self.sets_not_resident |= set_bit(s);
                        self.push_dirty &= !set_bit(s);
                    }
                    None => {
                        self.root.sets[s] = 0;
                        self.set_sizes[s] = 0;
                    }
                }
            }

            let Some(set_layout) = layout.set_layout(s as u32) else {
                continue;
            };
            let count = usize::from(set_layout.dynamic_buffer_count());
            if let Some(set) = set {
                assert!(
                    next_dyn_offset + count <= dynamic_offsets.len(),
                    "missing dynamic offsets for set {s}"
                );
                for (j, buffer) in set.dynamic_buffers().iter().take(count).enumerate() {
                    self.root.dynamic_buffers[dyn_start + j] =
                        buffer.offset_by(dynamic_offsets[next_dyn_offset + j]);
                }
                next_dyn_offset += count;
            }
            dyn_start += count;
            assert!(dyn_start <= MAX_DYNAMIC_BUFFERS, "dynamic buffers overflow the root table");
        }

        for start in &mut self.root.set_dynamic_buffer_start[first + sets.len()..] {
            *start = dyn_start as u8;
        }
        self.root_dirty = true;
    }

    /// Write `writes` into the push shadow of slot `set`, creating the shadow on first use.
    pub fn push(&mut self, layout: &PipelineLayout, set: u32, writes: &[DescriptorWrite]) {
        let s = set as usize;
        assert!(s < MAX_SETS, "push descriptor set {s} out of range");
        let set_layout = layout
            .set_layout(set)
            .unwrap_or_else(|| panic!("push descriptors into set {set} with no layout"))
            .clone();

        let shadow = self.push[s]
            .get_or_insert_with(|| Box::new(PushDescriptorSet::new(set_layout.clone())));
        shadow.write(set_layout, writes);

        self.sets[s] = None;
        self.push_dirty |= set_bit(s);
        self.sets_not_resident |= set_bit(s);
    }

    pub fn push_constants(&mut self, offset: u32, data: &[u8]) {
        self.root.write_push_constants(offset, data);
        self.root_dirty = true;
    }

    /// Copy every dirty push shadow into fresh scratch memory and point the root table at it.
    pub(crate) fn flush_push(
        &mut self,
        scratch: &mut ScratchMemory,
        stats: &mut RecordStats,
    ) -> Result<(), RecordError> {
        if self.push_dirty == 0 {
            return Ok(());
        }
        for s in bits(self.push_dirty) {
            let Some(shadow) = self.push[s].as_mut() else {
                continue;
            };
            let bo = scratch.upload(shadow.data(), MIN_UBO_ALIGNMENT, stats)?;
            shadow.set_buffer(bo.buffer);
            self.root.sets[s] = bo.gpu_address;
            self.set_sizes[s] = PUSH_DESCRIPTOR_SET_SIZE as u32;
            RecordStats::inc(&mut stats.push_descriptor_uploads);
            trace!(set = s, buffer = ?bo.buffer, "push descriptors uploaded");
        }
        self.root_dirty = true;
        self.push_dirty = 0;
        Ok(())
    }

    /// Declare the descriptor memory of every not-yet-resident slot to the open encoder.
    pub(crate) fn make_resident(&mut self, stream: &mut CommandStream, stats: &mut RecordStats) {
        for s in bits(self.sets_not_resident) {
            let buffer = match (&self.sets[s], &self.push[s]) {
                (Some(set), _) => set.buffer(),
                (None, Some(shadow)) => shadow.buffer(),
                (None, None) => None,
            };
            // Empty sets have no backing memory.
            if let Some(buffer) = buffer {
                stream.push(NativeCmd::UseResource {
                    buffer,
                    usage: ResourceUsage::READ,
                });
                RecordStats::inc(&mut stats.residency_declarations);
            }
        }
        self.sets_not_resident = 0;
    }

    /// Upload the root table when it changed since the last upload.
    pub(crate) fn flush_root(
        &mut self,
        scratch: &mut ScratchMemory,
        stats: &mut RecordStats,
    ) -> Result<(), RecordError> {
        if !self.root_dirty {
            return Ok(());
        }
        let bo = scratch.upload(self.root.as_bytes(), RootDescriptorTable::UPLOAD_ALIGN, stats)?;
        debug!(buffer = ?bo.buffer, address = bo.gpu_address, "root table uploaded");
        self.root_buffer = Some(bo);
        self.root_dirty = false;
        RecordStats::inc(&mut stats.root_uploads);
        Ok(())
    }

    /// Push flush, then residency, then root upload.
    pub(crate) fn flush(
        &mut self,
        stream: &mut CommandStream,
        scratch: &mut ScratchMemory,
        stats: &mut RecordStats,
    ) -> Result<(), RecordError> {
        self.flush_push(scratch, stats)?;
        self.make_resident(stream, stats);
        self.flush_root(scratch, stats)
    }

    /// Mark everything as needing re-declaration after a new encoder was opened.
    pub(crate) fn invalidate_residency(&mut self) {
        self.sets_not_resident = ALL_SETS;
    }

    /// Drop every binding and return to the freshly created state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_fully_dirty(&self) -> bool {
        self.root_dirty && self.sets_not_resident == ALL_SETS
    }
}
