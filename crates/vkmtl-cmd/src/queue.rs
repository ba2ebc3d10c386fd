//! Submission of finished command buffers to a native queue backend.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::cmd_buffer::{CommandBuffer, CommandBufferState};
use crate::device::Device;
use crate::error::QueueError;
use crate::native::{CommandStream, EventId, FenceId, StreamRole};

/// Both streams of one executable command buffer, in the order they must be committed.
#[derive(Clone, Copy, Debug)]
pub struct Submission<'a> {
    pub pre: &'a CommandStream,
    pub main: &'a CommandStream,
    pub event: EventId,
    pub fences: &'a [FenceId],
}

impl<'a> Submission<'a> {
    /// Streams in commit order: the pre-pass stream goes first so the main stream's event waits
    /// can be satisfied.
    pub fn streams(&self) -> [(StreamRole, &'a CommandStream); 2] {
        [(StreamRole::PrePass, self.pre), (StreamRole::Main, self.main)]
    }
}

impl CommandBuffer {
    /// Streams to commit for this command buffer.
    ///
    /// Panics unless the command buffer is executable.
    pub fn submission(&self) -> Submission<'_> {
        assert_eq!(
            self.state(),
            CommandBufferState::Executable,
            "submitting a command buffer that is not executable"
        );
        Submission {
            pre: self.pre_stream(),
            main: self.main_stream(),
            event: self.event(),
            fences: self.fences(),
        }
    }
}

/// Native queue that commits recorded streams.
pub trait QueueBackend {
    /// Commit the streams of one command buffer. Returning [`QueueError::DeviceLost`] marks the
    /// device lost.
    fn commit(&mut self, submission: &Submission<'_>) -> Result<(), QueueError>;
}

pub struct Queue<B: QueueBackend> {
    device: Arc<Device>,
    backend: B,
    submitted: u64,
}

impl<B: QueueBackend> Queue<B> {
    pub fn new(device: Arc<Device>, backend: B) -> Self {
        Self {
            device,
            backend,
            submitted: 0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Command buffers committed so far.
    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    pub fn submit(&mut self, command_buffers: &[&CommandBuffer]) -> Result<(), QueueError> {
        if self.device.is_lost() {
            return Err(QueueError::DeviceLost);
        }
        for cb in command_buffers {
            if let Some(err) = cb.error() {
                return Err(QueueError::Record(err.clone()));
            }
            if cb.state() != CommandBufferState::Executable {
                return Err(QueueError::NotExecutable(cb.state().as_str()));
            }
        }

        for cb in command_buffers {
            let submission = cb.submission();
            match self.backend.commit(&submission) {
                Ok(()) => {}
                Err(QueueError::DeviceLost) => {
                    warn!("queue reported device loss");
                    self.device.mark_lost();
                    return Err(QueueError::DeviceLost);
                }
                Err(err) => return Err(err),
            }
            self.submitted += 1;
            debug!(
                pre = submission.pre.len(),
                main = submission.main.len(),
                fences = submission.fences.len(),
                "command buffer submitted"
            );
        }
        Ok(())
    }
}

/// One committed stream as a [`RecordingBackend`] saw it.
#[derive(Clone, Debug, PartialEq)]
pub struct CommittedStream {
    pub role: StreamRole,
    pub event: EventId,
    pub stream: CommandStream,
}

/// Backend that keeps a copy of every committed stream, in commit order.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    pub committed: Vec<CommittedStream>,
    /// Report device loss on the next commit.
    pub lose_device: bool,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl QueueBackend for RecordingBackend {
    fn commit(&mut self, submission: &Submission<'_>) -> Result<(), QueueError> {
        if self.lose_device {
            return Err(QueueError::DeviceLost);
        }
        for (role, stream) in submission.streams() {
            self.committed.push(CommittedStream {
                role,
                event: submission.event,
                stream: stream.clone(),
            });
        }
        Ok(())
    }
}
