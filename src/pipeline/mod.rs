//! Pipeline lifecycle and phase transitions.

pub mod committer;
pub mod legacy;
pub mod service;

pub use committer::{PhaseAdvanced, PipelineLocks, TransitionCommitter};
pub use legacy::LegacyPhase;
pub use service::{
    DataDrivenAdvancer, DataDrivenOptions, LegacyAdvancer, PhaseAdvancer, PipelineService,
    PipelineStatus,
};
