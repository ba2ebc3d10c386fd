use std::collections::HashSet;

use thiserror::Error;

use super::{CommandStream, EncoderKind, FenceId, NativeCmd};

/// Which stream of a command buffer is being validated.
///
/// The pre-pass stream is ordered against the main stream with events only, so its encoders
/// don't have to publish a fence before ending.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamRole {
    Main,
    PrePass,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamMetrics {
    pub commands: usize,
    pub render_encoders: u32,
    pub compute_encoders: u32,
    pub blit_encoders: u32,
    pub fences: u32,
    pub draws: u32,
    pub dispatches: u32,
    /// Copies and fills recorded into blit encoders.
    pub transfers: u32,
    pub residency_declarations: u32,
    pub event_signals: u32,
    pub event_waits: u32,
    /// Highest value signaled on any event.
    pub max_signaled_value: u64,
    /// Highest value waited for on any event.
    pub max_waited_value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("command {index}: encoder started while {open:?} encoder is open")]
    NestedEncoder { index: usize, open: EncoderKind },
    #[error("command {index}: EndEncoding with no open encoder")]
    UnexpectedEndEncoding { index: usize },
    #[error("command {index}: {kind:?} encoder ended without updating a fence")]
    MissingFence { index: usize, kind: EncoderKind },
    #[error("command {index}: requires an open {required:?} encoder")]
    CommandOutsideEncoder { index: usize, required: EncoderKind },
    #[error("command {index}: requires a {required:?} encoder but {open:?} is open")]
    WrongEncoder {
        index: usize,
        required: EncoderKind,
        open: EncoderKind,
    },
    #[error("command {index}: event commands must be recorded between encoders")]
    EncoderlessCommandInsideEncoder { index: usize },
    #[error("command {index}: wait on {fence:?} which was never updated")]
    UnknownFence { index: usize, fence: FenceId },
    #[error("stream ends with an open {0:?} encoder")]
    UnterminatedEncoder(EncoderKind),
}

/// Replay `stream` and check the encoder/synchronization invariants the engine promises.
///
/// Checks performed:
/// - at most one encoder is open at a time;
/// - every encoder of the main stream updates a fence before it ends;
/// - encoder-specific commands only appear inside an encoder of the right kind;
/// - residency declarations and fence waits happen inside an encoder, events between them;
/// - fence waits refer to a fence updated earlier in the same stream;
/// - the stream ends with no encoder open.
pub fn validate_stream(
    stream: &CommandStream,
    role: StreamRole,
) -> Result<StreamMetrics, StreamError> {
    let mut metrics = StreamMetrics {
        commands: stream.len(),
        ..StreamMetrics::default()
    };
    let mut open: Option<EncoderKind> = None;
    let mut fenced = false;
    let mut updated: HashSet<FenceId> = HashSet::new();

    for (index, cmd) in stream.iter().enumerate() {
        let begins = match cmd {
            NativeCmd::BeginRenderEncoder(_) => Some(EncoderKind::Render),
            NativeCmd::BeginComputeEncoder => Some(EncoderKind::Compute),
            NativeCmd::BeginBlitEncoder => Some(EncoderKind::Blit),
            _ => None,
        };
        if let Some(kind) = begins {
            if let Some(open) = open {
                return Err(StreamError::NestedEncoder { index, open });
            }
            match kind {
                EncoderKind::Render => metrics.render_encoders += 1,
                EncoderKind::Compute => metrics.compute_encoders += 1,
                EncoderKind::Blit => metrics.blit_encoders += 1,
            }
            open = Some(kind);
            fenced = false;
            continue;
        }

        match cmd {
            NativeCmd::EndEncoding => {
                let Some(kind) = open.take() else {
                    return Err(StreamError::UnexpectedEndEncoding { index });
                };
                if role == StreamRole::Main && !fenced {
                    return Err(StreamError::MissingFence { index, kind });
                }
            }
            NativeCmd::UpdateFence(fence) => {
                if open.is_none() {
                    return Err(StreamError::CommandOutsideEncoder {
                        index,
                        required: EncoderKind::Render,
                    });
                }
                fenced = true;
                updated.insert(*fence);
                metrics.fences += 1;
            }
            NativeCmd::WaitForFence(fence) => {
                if open.is_none() {
                    return Err(StreamError::CommandOutsideEncoder {
                        index,
                        required: EncoderKind::Render,
                    });
                }
                if !updated.contains(fence) {
                    return Err(StreamError::UnknownFence {
                        index,
                        fence: *fence,
                    });
                }
            }
            NativeCmd::SignalEvent { value, .. } => {
                if open.is_some() {
                    return Err(StreamError::EncoderlessCommandInsideEncoder { index });
                }
                metrics.event_signals += 1;
                metrics.max_signaled_value = metrics.max_signaled_value.max(*value);
            }
            NativeCmd::WaitForEvent { value, .. } => {
                if open.is_some() {
                    return Err(StreamError::EncoderlessCommandInsideEncoder { index });
                }
                metrics.event_waits += 1;
                metrics.max_waited_value = metrics.max_waited_value.max(*value);
            }
            NativeCmd::UseResource { .. } | NativeCmd::UseHeaps(_) => {
                if open.is_none() {
                    return Err(StreamError::CommandOutsideEncoder {
                        index,
                        required: EncoderKind::Render,
                    });
                }
                metrics.residency_declarations += 1;
            }
            other => {
                if let Some(required) = other.required_encoder() {
                    match open {
                        None => return Err(StreamError::CommandOutsideEncoder { index, required }),
                        Some(kind) if kind != required => {
                            return Err(StreamError::WrongEncoder {
                                index,
                                required,
                                open: kind,
                            })
                        }
                        Some(_) => {}
                    }
                }
                if other.is_draw() {
                    metrics.draws += 1;
                }
                if other.is_transfer() {
                    metrics.transfers += 1;
                }
                if matches!(
                    other,
                    NativeCmd::Dispatch { .. } | NativeCmd::DispatchIndirect { .. }
                ) {
                    metrics.dispatches += 1;
                }
            }
        }
    }

    if let Some(kind) = open {
        return Err(StreamError::UnterminatedEncoder(kind));
    }
    Ok(metrics)
}
