//! Data-driven phase execution for multi-phase software-delivery pipelines.
//!
//! A pipeline walks an epic through role-bound phases (pm, architect, ba,
//! developer, qa, commit). In data-driven mode each phase is executed by an
//! LLM: the role prompt is assembled, the model is called, its output is
//! parsed into an artifact and the pipeline is advanced atomically.

pub mod config;
pub mod errors;
pub mod execution;
pub mod logging;
pub mod pipeline;
pub mod store;
