//! Host information collectors
//!
//! The core does not know how to inspect the host process, the current
//! request or the loaded modules. Embedders provide collectors; plugins store
//! whatever they return under a well-known data key, never replacing a value
//! the event already carries.

use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;
use crate::pipeline::{PipelineContext, Plugin};
use crate::types::data_keys;

/// Describes the modules loaded into the host process.
pub trait ModuleCollector: Send + Sync {
    fn collect(&self, ctx: &PipelineContext) -> Option<Value>;
}

/// Describes the request being served when the event was raised.
pub trait RequestInfoCollector: Send + Sync {
    fn collect(&self, ctx: &PipelineContext) -> Option<Value>;
}

/// Describes the machine and runtime.
pub trait EnvironmentInfoCollector: Send + Sync {
    fn collect(&self, ctx: &PipelineContext) -> Option<Value>;
}

fn store_collected(ctx: &mut PipelineContext, key: &str, collected: Option<Value>) {
    match collected {
        Some(value) if !value.is_null() => {
            ctx.event.data.insert(key.to_string(), value);
        }
        _ => {}
    }
}

/// Stores [`ModuleCollector`] output under `@modules`.
pub struct ModuleInfoPlugin {
    collector: Option<Arc<dyn ModuleCollector>>,
}

impl ModuleInfoPlugin {
    pub fn new(collector: Option<Arc<dyn ModuleCollector>>) -> Self {
        Self { collector }
    }
}

impl Plugin for ModuleInfoPlugin {
    fn name(&self) -> &str {
        "core.module_info"
    }

    fn priority(&self) -> i32 {
        50
    }

    fn run(&self, ctx: &mut PipelineContext) -> Result<()> {
        let Some(collector) = &self.collector else {
            return Ok(());
        };
        if ctx.event.data.contains_key(data_keys::MODULES) {
            return Ok(());
        }
        let collected = collector.collect(ctx);
        store_collected(ctx, data_keys::MODULES, collected);
        Ok(())
    }
}

/// Stores [`RequestInfoCollector`] output under `@request`.
pub struct RequestInfoPlugin {
    collector: Option<Arc<dyn RequestInfoCollector>>,
}

impl RequestInfoPlugin {
    pub fn new(collector: Option<Arc<dyn RequestInfoCollector>>) -> Self {
        Self { collector }
    }
}

impl Plugin for RequestInfoPlugin {
    fn name(&self) -> &str {
        "core.request_info"
    }

    fn priority(&self) -> i32 {
        70
    }

    fn run(&self, ctx: &mut PipelineContext) -> Result<()> {
        let Some(collector) = &self.collector else {
            return Ok(());
        };
        if ctx.event.data.contains_key(data_keys::REQUEST) {
            return Ok(());
        }
        let collected = collector.collect(ctx);
        store_collected(ctx, data_keys::REQUEST, collected);
        Ok(())
    }
}

/// Stores [`EnvironmentInfoCollector`] output under `@environment`.
pub struct EnvironmentInfoPlugin {
    collector: Option<Arc<dyn EnvironmentInfoCollector>>,
}

impl EnvironmentInfoPlugin {
    pub fn new(collector: Option<Arc<dyn EnvironmentInfoCollector>>) -> Self {
        Self { collector }
    }
}

impl Plugin for EnvironmentInfoPlugin {
    fn name(&self) -> &str {
        "core.environment_info"
    }

    fn priority(&self) -> i32 {
        80
    }

    fn run(&self, ctx: &mut PipelineContext) -> Result<()> {
        let Some(collector) = &self.collector else {
            return Ok(());
        };
        if ctx.event.data.contains_key(data_keys::ENVIRONMENT) {
            return Ok(());
        }
        let collected = collector.collect(ctx);
        store_collected(ctx, data_keys::ENVIRONMENT, collected);
        Ok(())
    }
}
