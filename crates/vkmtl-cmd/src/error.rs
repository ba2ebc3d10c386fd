use thiserror::Error;

use crate::memory::AllocError;

/// Recording failure stored as the sticky error of a command buffer.
///
/// Once a command buffer holds one of these every further recording call is a no-op until
/// [`crate::CommandBuffer::reset`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("out of host memory while recording {0}")]
    OutOfHostMemory(&'static str),
    #[error("out of device memory: {0}")]
    OutOfDeviceMemory(#[source] AllocError),
    #[error("device lost")]
    DeviceLost,
}

impl From<AllocError> for RecordError {
    fn from(err: AllocError) -> Self {
        match err {
            AllocError::HostExhausted => RecordError::OutOfHostMemory("scratch allocation"),
            other => RecordError::OutOfDeviceMemory(other),
        }
    }
}

/// Failure while submitting recorded command buffers to a queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("command buffer is not executable (state: {0})")]
    NotExecutable(&'static str),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error("device lost")]
    DeviceLost,
}
