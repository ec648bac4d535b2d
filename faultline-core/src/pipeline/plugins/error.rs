//! Exception parsing
//!
//! Turns the exception carried by a [`PipelineContext`] into the structured
//! `@error` chain stored on the event.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::pipeline::{CapturedException, PipelineContext, Plugin};
use crate::types::{data_keys, event_types, InnerError};

/// Converts a captured exception into an [`InnerError`] chain.
pub trait ErrorParser: Send + Sync {
    fn parse(&self, ctx: &PipelineContext, exception: &CapturedException) -> Result<InnerError>;
}

/// Parser that walks [`std::error::Error::source`].
///
/// The outermost level carries the concrete type name captured at
/// submission; causes only carry their messages. No stack traces.
#[derive(Debug, Default, Clone, Copy)]
pub struct SourceChainParser;

impl ErrorParser for SourceChainParser {
    fn parse(&self, _ctx: &PipelineContext, exception: &CapturedException) -> Result<InnerError> {
        let mut messages = Vec::new();
        let root: &(dyn std::error::Error + 'static) = &*exception.error;
        let mut current = Some(root);
        while let Some(err) = current {
            messages.push(err.to_string());
            current = err.source();
        }

        let chain = messages.into_iter().rev().fold(None::<InnerError>, |inner, message| {
            Some(InnerError {
                message: Some(message),
                inner: inner.map(Box::new),
                ..Default::default()
            })
        });

        let mut error = chain.ok_or_else(|| Error::plugin("core.error", "empty error chain"))?;
        error.error_type = Some(exception.type_name.to_string());
        Ok(error)
    }
}

/// Parses the context exception into `@error`.
pub struct ErrorPlugin {
    parser: Option<Arc<dyn ErrorParser>>,
}

impl ErrorPlugin {
    pub fn new(parser: Option<Arc<dyn ErrorParser>>) -> Self {
        Self { parser }
    }
}

impl Plugin for ErrorPlugin {
    fn name(&self) -> &str {
        "core.error"
    }

    fn priority(&self) -> i32 {
        30
    }

    fn run(&self, ctx: &mut PipelineContext) -> Result<()> {
        let Some(exception) = ctx.data.exception.clone() else {
            return Ok(());
        };

        if ctx.event.type_str().is_empty() {
            ctx.event.event_type = Some(event_types::ERROR.to_string());
        }

        // Already parsed, e.g. by a host integration
        if ctx.event.data.contains_key(data_keys::ERROR) {
            return Ok(());
        }

        let parser = self
            .parser
            .as_ref()
            .ok_or_else(|| Error::plugin(self.name(), "no error parser configured"))?;

        let error = parser.parse(ctx, &exception)?;
        ctx.event.set_error(&error)?;
        Ok(())
    }
}
