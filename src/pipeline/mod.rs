//! Pipeline coordination: supervisor, resource guard, handoff channel.

mod guard;
mod handoff;
mod supervisor;

pub use guard::{
    GuardError, GuardTransition, MemoryReading, MemorySampler, ResourceGuard, SystemMemorySampler,
};
pub use handoff::{HandoffError, HandoffReceiver, HandoffSender, handoff_channel};
pub use supervisor::{Collaborators, PipelineConfig, PipelineError, RunReport, Supervisor};
