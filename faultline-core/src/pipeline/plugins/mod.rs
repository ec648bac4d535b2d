//! Built-in pipeline plugins
//!
//! Plugins with more than a handful of rules live in their own subdirectory.
//!
//! ## Built-in Plugins
//!
//! | Priority | Plugin | Name |
//! |---|---|---|
//! | 10 | [`defaults::ConfigurationDefaultsPlugin`] | `core.configuration_defaults` |
//! | 20 | [`reference_id::ReferenceIdPlugin`] | `core.reference_id` |
//! | 30 | [`error::ErrorPlugin`] | `core.error` |
//! | 40 | [`duplicate::DuplicateCheckerPlugin`] | `core.duplicate_checker` |
//! | 45 | [`exclusion::EventExclusionPlugin`] | `core.event_exclusion` |
//! | 50 | [`environment::ModuleInfoPlugin`] | `core.module_info` |
//! | 70 | [`environment::RequestInfoPlugin`] | `core.request_info` |
//! | 80 | [`environment::EnvironmentInfoPlugin`] | `core.environment_info` |
//! | 100 | [`submission_method::SubmissionMethodPlugin`] | `core.submission_method` |
//!
//! Use [`create_default_pipeline`] to get a pipeline with all of them.

pub mod defaults;
pub mod duplicate;
pub mod environment;
pub mod error;
pub mod exclusion;
pub mod reference_id;
pub mod submission_method;

use std::sync::Arc;

use super::Pipeline;
use crate::config::Config;
use crate::settings::SettingsManager;

pub use duplicate::DuplicateCheckerPlugin;
pub use environment::{EnvironmentInfoCollector, ModuleCollector, RequestInfoCollector};
pub use error::{ErrorParser, SourceChainParser};

/// Host-specific collaborators consulted by the built-in plugins.
///
/// Every field is optional. A missing collector leaves its data key unset; a
/// missing error parser makes exception submissions fail.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub error_parser: Option<Arc<dyn ErrorParser>>,
    pub module_collector: Option<Arc<dyn ModuleCollector>>,
    pub request_collector: Option<Arc<dyn RequestInfoCollector>>,
    pub environment_collector: Option<Arc<dyn EnvironmentInfoCollector>>,
}

impl Collaborators {
    /// Collaborators with [`SourceChainParser`] as the error parser.
    pub fn with_source_chain_parser() -> Self {
        Self::default().with_error_parser(Arc::new(SourceChainParser))
    }

    pub fn with_error_parser(mut self, parser: Arc<dyn ErrorParser>) -> Self {
        self.error_parser = Some(parser);
        self
    }

    pub fn with_module_collector(mut self, collector: Arc<dyn ModuleCollector>) -> Self {
        self.module_collector = Some(collector);
        self
    }

    pub fn with_request_collector(mut self, collector: Arc<dyn RequestInfoCollector>) -> Self {
        self.request_collector = Some(collector);
        self
    }

    pub fn with_environment_collector(
        mut self,
        collector: Arc<dyn EnvironmentInfoCollector>,
    ) -> Self {
        self.environment_collector = Some(collector);
        self
    }
}

/// Create a pipeline with all built-in plugins registered.
///
/// The duplicate checker is passed in rather than built here because its
/// owner also drives its flush timer.
///
/// ```rust,ignore
/// let pipeline = create_default_pipeline(&config, settings, duplicates, &collaborators);
/// println!("Registered plugins: {:?}", pipeline.plugin_names());
/// ```
pub fn create_default_pipeline(
    config: &Config,
    settings: Arc<SettingsManager>,
    duplicates: Arc<DuplicateCheckerPlugin>,
    collaborators: &Collaborators,
) -> Pipeline {
    let pipeline = Pipeline::new();
    pipeline.add_plugin(Arc::new(defaults::ConfigurationDefaultsPlugin::new(
        config.default_tags.clone(),
        config.default_data.clone(),
    )));
    pipeline.add_plugin(Arc::new(reference_id::ReferenceIdPlugin));
    pipeline.add_plugin(Arc::new(error::ErrorPlugin::new(
        collaborators.error_parser.clone(),
    )));
    pipeline.add_plugin(duplicates);
    pipeline.add_plugin(Arc::new(exclusion::EventExclusionPlugin::new(settings)));
    pipeline.add_plugin(Arc::new(environment::ModuleInfoPlugin::new(
        collaborators.module_collector.clone(),
    )));
    pipeline.add_plugin(Arc::new(environment::RequestInfoPlugin::new(
        collaborators.request_collector.clone(),
    )));
    pipeline.add_plugin(Arc::new(environment::EnvironmentInfoPlugin::new(
        collaborators.environment_collector.clone(),
    )));
    pipeline.add_plugin(Arc::new(submission_method::SubmissionMethodPlugin));
    pipeline
}
