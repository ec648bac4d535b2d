//! Configured default tags and data

use serde_json::{Map, Value};

use crate::error::Result;
use crate::pipeline::{PipelineContext, Plugin};

/// Adds [`Config::default_tags`](crate::Config::default_tags) and
/// [`Config::default_data`](crate::Config::default_data) to every event.
/// Keys already present on the event win.
pub struct ConfigurationDefaultsPlugin {
    tags: Vec<String>,
    data: Map<String, Value>,
}

impl ConfigurationDefaultsPlugin {
    pub fn new(tags: Vec<String>, data: Map<String, Value>) -> Self {
        Self { tags, data }
    }
}

impl Plugin for ConfigurationDefaultsPlugin {
    fn name(&self) -> &str {
        "core.configuration_defaults"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn run(&self, ctx: &mut PipelineContext) -> Result<()> {
        ctx.event.add_tags(&self.tags);

        for (key, value) in &self.data {
            if value.is_null() || ctx.event.data.contains_key(key) {
                continue;
            }
            ctx.event.data.insert(key.clone(), value.clone());
        }

        Ok(())
    }
}
