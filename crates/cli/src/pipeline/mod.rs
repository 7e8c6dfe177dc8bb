//! Stream orchestration module.

mod listener;
mod orchestrator;
mod stats;

pub use listener::{ChannelListener, StreamEvent};
pub use orchestrator::{FaultPlan, Pipeline, PipelineConfig};
pub use stats::PipelineStats;
