//! Reference ids for error events

use crate::error::Result;
use crate::pipeline::{PipelineContext, Plugin};
use crate::types::event_types;

/// Length of generated reference ids.
pub const REFERENCE_ID_LENGTH: usize = 10;

/// Gives error events without a reference id a short random one, so users can
/// quote it back when reporting a problem.
pub struct ReferenceIdPlugin;

impl Plugin for ReferenceIdPlugin {
    fn name(&self) -> &str {
        "core.reference_id"
    }

    fn priority(&self) -> i32 {
        20
    }

    fn run(&self, ctx: &mut PipelineContext) -> Result<()> {
        let has_reference = ctx
            .event
            .reference_id
            .as_deref()
            .is_some_and(|r| !r.is_empty());

        if !has_reference && ctx.event.type_str() == event_types::ERROR {
            let mut id = uuid::Uuid::new_v4().simple().to_string();
            id.truncate(REFERENCE_ID_LENGTH);
            ctx.event.reference_id = Some(id);
        }

        Ok(())
    }
}
