//! Application layer - load engines, orchestration and task wiring

pub mod catalog;
pub mod context;
pub mod load_pipeline;
pub mod orchestrator;
pub mod upsert_engine;

pub use catalog::DateWindow;
pub use context::AppContext;
pub use load_pipeline::{LoadPipeline, PipelineError};
pub use orchestrator::{RunOutcome, TaskOrchestrator, TaskSpec};
pub use upsert_engine::UpsertEngine;
