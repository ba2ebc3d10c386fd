//! `vkmtl-cmd` records an explicit bind-then-draw command-buffer API into the deferred
//! encoder model of a different native graphics API.
//!
//! Currently this crate provides:
//! - Descriptor sets, push descriptors and the root descriptor table shaders read their
//!   bindings from (see [`descriptor`] and [`root_table`]).
//! - Per-bind-point state trackers with dirty tracking (see [`state`]).
//! - An encoder lifecycle that fences every encoder and orders a pre-pass compute stream
//!   against the main stream with an event.
//! - Compute-based emulation of triangle fans and of strips whose primitive restart is
//!   disabled.
//! - A backend-agnostic native command stream plus a validator (see [`native`]).

mod emulation;
mod encoder;
mod scratch;

pub mod cmd_buffer;
pub mod config;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod image;
pub mod indirect;
pub mod limits;
pub mod memory;
pub mod native;
pub mod pipeline;
pub mod query;
pub mod queue;
pub mod root_table;
pub mod state;
pub mod stats;
pub mod topology;

pub use cmd_buffer::{BindPoint, CommandBuffer, CommandBufferState, ShaderStages};
pub use config::DeviceConfig;
pub use device::Device;
pub use emulation::{kernel_mode, TriangleFanParams, OUTPUT_INDEX_OFFSET};
pub use encoder::{ImmWriteParams, SAMPLER_TABLE_INDEX};
pub use error::{QueueError, RecordError};
pub use memory::{AllocError, Bo, MemoryAllocator, SystemAllocator};
pub use pipeline::{ComputePipeline, GraphicsPipeline, LibraryPipelines, PipelineBinding};
pub use query::{CopyQueryParams, OcclusionQueryPool, QueryResultFlags};
pub use queue::{CommittedStream, Queue, QueueBackend, RecordingBackend, Submission};
pub use stats::RecordStats;
pub use topology::PrimitiveTopology;
