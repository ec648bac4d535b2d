use serde_json::Value;

use crate::error::Result;
use crate::pipeline::{PipelineContext, Plugin};
use crate::types::data_keys;

/// Records how an event was captured ("onerror", "unhandledrejection", ...)
/// under `@submission_method`.
pub struct SubmissionMethodPlugin;

impl Plugin for SubmissionMethodPlugin {
    fn name(&self) -> &str {
        "core.submission_method"
    }

    fn priority(&self) -> i32 {
        100
    }

    fn run(&self, ctx: &mut PipelineContext) -> Result<()> {
        if let Some(method) = ctx
            .data
            .submission_method
            .as_deref()
            .filter(|m| !m.is_empty())
        {
            ctx.event.set_property(
                data_keys::SUBMISSION_METHOD,
                Value::String(method.to_string()),
            );
        }
        Ok(())
    }
}
