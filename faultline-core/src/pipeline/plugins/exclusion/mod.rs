//! Settings-driven event exclusion
//!
//! Settings keys of the form `@@<type>:<source>` decide whether events are
//! kept:
//!
//! - `log` events: the value is a minimum level (`@@log:app.db = Warn`).
//!   Events below it are dropped.
//! - everything else: the value is a boolean toggle (`@@404:/favicon.ico = false`).
//!   Error events are matched by the error type at every level of their
//!   `@error` chain.
//!
//! `<source>` may start and/or end with `*`. Keys match case-insensitively.
//! Lookup order is the exact key, then wildcard keys (longest literal text first, then alphabetically),
//! then `@@<type>:*`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::pipeline::{PipelineContext, Plugin};
use crate::settings::SettingsManager;
use crate::types::event_types;

/// Prefix shared by every exclusion setting.
pub const KEY_PREFIX: &str = "@@";

/// Rank of the `off` level. Events at this rank are always dropped.
const LEVEL_OFF: i32 = 6;

/// Minimum level used when no setting applies.
const DEFAULT_MIN_LEVEL: &str = "Trace";

/// Rank of a log level name, -1 when unrecognized.
pub fn log_level_rank(level: &str) -> i32 {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" | "true" | "1" | "yes" => 0,
        "debug" => 1,
        "info" => 2,
        "warn" => 3,
        "error" => 4,
        "fatal" => 5,
        "off" | "false" | "0" | "no" => LEVEL_OFF,
        _ => -1,
    }
}

/// Parse a boolean setting, falling back to `default` for anything else.
pub fn to_bool(value: &str, default: bool) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => true,
        "false" | "no" | "0" => false,
        _ => default,
    }
}

/// Case-insensitive match supporting a leading and/or trailing `*`.
pub fn is_match(input: &str, pattern: &str) -> bool {
    let input = input.trim().to_lowercase();
    let pattern = pattern.trim().to_lowercase();

    if pattern == "*" {
        return true;
    }

    let leading = pattern.starts_with('*');
    let trailing = pattern.len() > 1 && pattern.ends_with('*');
    let start = usize::from(leading);
    let end = pattern.len() - usize::from(trailing);
    let literal = &pattern[start..end];

    match (leading, trailing) {
        (true, true) => input.contains(literal),
        (true, false) => input.ends_with(literal),
        (false, true) => input.starts_with(literal),
        (false, false) => input == literal,
    }
}

/// Resolve the setting for `event_type` and `source`.
pub fn type_and_source_setting<'a>(
    settings: &'a HashMap<String, String>,
    event_type: &str,
    source: &str,
) -> Option<&'a str> {
    let prefix = format!("{KEY_PREFIX}{event_type}:");

    let mut exact: Option<(&String, &str)> = None;
    let mut candidates: Vec<(&String, &str, &String)> = Vec::new();
    for (key, value) in settings {
        let Some(head) = key.get(..prefix.len()) else {
            continue;
        };
        if !head.eq_ignore_ascii_case(&prefix) {
            continue;
        }
        let pattern = &key[prefix.len()..];
        if !pattern.contains('*') {
            // Exact keys compare case-insensitively, like wildcards
            if !value.is_empty()
                && pattern.trim().eq_ignore_ascii_case(source.trim())
                && exact.map_or(true, |(k, _)| key < k)
            {
                exact = Some((key, value.as_str()));
            }
        } else if is_match(source, pattern) {
            candidates.push((key, pattern, value));
        }
    }

    if let Some((_, value)) = exact {
        return Some(value);
    }

    candidates.sort_by(|(a_key, a_pattern, _), (b_key, b_pattern, _)| {
        literal_len(b_pattern)
            .cmp(&literal_len(a_pattern))
            .then_with(|| a_key.cmp(b_key))
    });

    candidates
        .into_iter()
        .map(|(_, _, value)| value.as_str())
        .next()
}

fn literal_len(pattern: &str) -> usize {
    pattern.trim().trim_matches('*').len()
}

/// Minimum log level rank for `source`.
pub fn min_log_level(settings: &HashMap<String, String>, source: &str) -> i32 {
    let source = if source.is_empty() { "*" } else { source };
    log_level_rank(
        type_and_source_setting(settings, event_types::LOG, source).unwrap_or(DEFAULT_MIN_LEVEL),
    )
}

/// Whether an event of `event_type` from `source` is enabled.
pub fn is_enabled(settings: &HashMap<String, String>, event_type: &str, source: &str) -> bool {
    type_and_source_setting(settings, event_type, source)
        .map_or(true, |value| to_bool(value, true))
}

/// Drops events excluded by the merged settings.
pub struct EventExclusionPlugin {
    settings: Arc<SettingsManager>,
}

impl EventExclusionPlugin {
    pub fn new(settings: Arc<SettingsManager>) -> Self {
        Self { settings }
    }
}

impl Plugin for EventExclusionPlugin {
    fn name(&self) -> &str {
        "core.event_exclusion"
    }

    fn priority(&self) -> i32 {
        45
    }

    fn run(&self, ctx: &mut PipelineContext) -> Result<()> {
        let event_type = ctx.event.type_str();
        if event_type.is_empty() {
            return Ok(());
        }

        let settings = self.settings.snapshot();
        let source = ctx.event.source_str();

        let excluded = match event_type {
            event_types::LOG => {
                let min_level = min_log_level(&settings, source);
                let level = log_level_rank(ctx.event.level().unwrap_or(""));
                level >= 0 && (level >= LEVEL_OFF || level < min_level)
            }
            event_types::ERROR => ctx.event.error().is_some_and(|error| {
                error.chain().any(|level| {
                    let error_type = level.error_type.as_deref().unwrap_or("");
                    !is_enabled(&settings, event_types::ERROR, error_type)
                })
            }),
            other => !is_enabled(&settings, other, source),
        };

        if excluded {
            tracing::info!(
                event_type = %event_type,
                source = %source,
                "Cancelling event from excluded source"
            );
            ctx.cancel();
        }

        Ok(())
    }
}
