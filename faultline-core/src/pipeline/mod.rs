//! Event processing pipeline
//!
//! Enrichment and filtering stages applied to every submitted event before it
//! reaches the submission queue.
//!
//! ## Module Structure
//!
//! - [`engine`]: Plugin trait, pipeline context and the pipeline driver
//! - [`plugins`]: Built-in stages and their collaborator traits

pub mod engine;
pub mod plugins;

pub use engine::{CapturedException, ContextData, Pipeline, PipelineContext, Plugin};
pub use plugins::{
    create_default_pipeline, Collaborators, DuplicateCheckerPlugin, EnvironmentInfoCollector,
    ErrorParser, ModuleCollector, RequestInfoCollector, SourceChainParser,
};
