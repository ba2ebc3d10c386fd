//! The recorded command buffer.
//!
//! Entrypoints only mutate the trackers in [`crate::state`]; native commands are produced when
//! a draw or dispatch flushes them, when a render pass starts or ends, and at barriers.

mod descriptors;
mod dispatch;
mod draw;
mod query;
mod render_pass;
mod transfer;

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

pub use descriptors::ShaderStages;
pub use transfer::MAX_UPDATE_BYTES;

use crate::device::Device;
use crate::encoder::EncoderManager;
use crate::error::RecordError;
use crate::memory::Bo;
use crate::native::{
    validate_stream, BufferId, CommandStream, EncoderKind, EventId, FenceId, StreamRole,
};
use crate::state::{ComputeState, GraphicsState};
use crate::stats::RecordStats;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindPoint {
    Graphics,
    Compute,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandBufferState {
    Initial,
    Recording,
    Executable,
    /// `end()` failed; only `reset()` or `begin()` leave this state.
    Invalid,
}

impl fmt::Display for CommandBufferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CommandBufferState {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandBufferState::Initial => "initial",
            CommandBufferState::Recording => "recording",
            CommandBufferState::Executable => "executable",
            CommandBufferState::Invalid => "invalid",
        }
    }
}

pub struct CommandBuffer {
    device: Arc<Device>,
    state: CommandBufferState,
    enc: EncoderManager,
    gfx: GraphicsState,
    cs: ComputeState,
    /// First recording failure; every later call is skipped until reset.
    error: Option<RecordError>,
}

impl fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("state", &self.state)
            .field("encoder", &self.enc)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl CommandBuffer {
    pub fn new(device: Arc<Device>) -> Self {
        Self {
            enc: EncoderManager::new(device.clone()),
            device,
            state: CommandBufferState::Initial,
            gfx: GraphicsState::default(),
            cs: ComputeState::default(),
            error: None,
        }
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    /// Sticky recording error, if any.
    pub fn error(&self) -> Option<&RecordError> {
        self.error.as_ref()
    }

    pub fn stats(&self) -> &RecordStats {
        &self.enc.stats
    }

    pub fn main_stream(&self) -> &CommandStream {
        &self.enc.main
    }

    pub fn pre_stream(&self) -> &CommandStream {
        &self.enc.pre
    }

    pub fn fences(&self) -> &[FenceId] {
        self.enc.fences()
    }

    /// Event ordering the pre-pass stream against the main stream.
    pub fn event(&self) -> EventId {
        self.enc.event()
    }

    /// Kind of the encoder open on the main stream.
    pub fn encoder_kind(&self) -> Option<EncoderKind> {
        self.enc.kind()
    }

    /// Scratch allocations currently owned, in allocation order.
    pub fn scratch_buffers(&self) -> &[Bo] {
        self.enc.scratch.buffers()
    }

    pub fn graphics_state(&self) -> &GraphicsState {
        &self.gfx
    }

    pub fn compute_state(&self) -> &ComputeState {
        &self.cs
    }

    /// Start recording. Beginning an executable or invalid command buffer resets it first.
    pub fn begin(&mut self) {
        assert_ne!(
            self.state,
            CommandBufferState::Recording,
            "begin() on a command buffer that is already recording"
        );
        if self.state != CommandBufferState::Initial {
            self.reset();
        }
        self.state = CommandBufferState::Recording;
        debug!("command buffer recording");
    }

    /// Finish recording: close every open encoder and signal the final pre-pass value.
    ///
    /// Returns the sticky error when recording failed.
    pub fn end(&mut self) -> Result<(), RecordError> {
        self.expect_recording("end");
        if self.error.is_none() {
            if let Err(err) = self.enc.end() {
                self.set_error("end", err);
            }
        }
        if let Some(err) = self.error.clone() {
            self.state = CommandBufferState::Invalid;
            return Err(err);
        }
        if self.device.config().validate_streams {
            self.validate_streams();
        }
        self.state = CommandBufferState::Executable;
        debug!(
            main = self.enc.main.len(),
            pre = self.enc.pre.len(),
            fences = self.enc.fences().len(),
            "command buffer executable"
        );
        Ok(())
    }

    /// Drop everything recorded, release scratch memory and mark all state dirty.
    pub fn reset(&mut self) {
        self.enc.reset();
        self.gfx = GraphicsState::default();
        self.cs = ComputeState::default();
        self.error = None;
        self.state = CommandBufferState::Initial;
    }

    /// Queue a 64-bit write of `value` to `address` inside `buffer`, performed on the device
    /// after the current encoder finishes.
    pub fn write_immediate(&mut self, address: u64, value: u64, buffer: BufferId) {
        self.guarded("write_immediate", |cb| {
            cb.enc.write_immediate(address, value, buffer);
            Ok(())
        });
    }

    fn validate_streams(&self) {
        if let Err(err) = validate_stream(&self.enc.main, StreamRole::Main) {
            panic!("recorded main stream is malformed: {err}");
        }
        if let Err(err) = validate_stream(&self.enc.pre, StreamRole::PrePass) {
            panic!("recorded pre-pass stream is malformed: {err}");
        }
    }

    fn expect_recording(&self, op: &'static str) {
        assert_eq!(
            self.state,
            CommandBufferState::Recording,
            "{op} on a command buffer that is not recording"
        );
    }

    fn set_error(&mut self, op: &'static str, err: RecordError) {
        warn!(op, error = %err, "command buffer entered error state");
        self.error = Some(err);
    }

    /// Run a recording operation unless the command buffer already failed.
    fn guarded(
        &mut self,
        op: &'static str,
        f: impl FnOnce(&mut Self) -> Result<(), RecordError>,
    ) {
        self.expect_recording(op);
        if let Some(err) = &self.error {
            warn!(op, error = %err, "skipped: command buffer is in error state");
            return;
        }
        if self.device.is_lost() {
            self.set_error(op, RecordError::DeviceLost);
            return;
        }
        if let Err(err) = f(self) {
            self.set_error(op, err);
        }
    }
}
