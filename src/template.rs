//! Reference substitution for task descriptions.
//!
//! A task description may embed references to the outputs of tasks that ran
//! earlier in the same turn:
//!
//! - `{{step_1}}`: the whole output of the execution for `step_1`
//! - `{{step_1.results.0.title}}`: a path into a structured output, where
//!   segments address JSON object fields or array indices
//!
//! The grammar is deliberately strict. Anything between `{{` and `}}` that is
//! not `id(.segment)*`, any id without a successful execution on record, and
//! any path that does not exist in the referenced output is an
//! [`Error::UnresolvedReference`], a planner defect, never a silent no-op.

use regex::Regex;
use std::sync::OnceLock;

use crate::core::execution::Execution;
use crate::core::task::TaskId;
use crate::error::{Error, Result};

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{([^{}]*)\}\}").expect("hard-coded pattern"))
}

fn inner_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_\-]+(?:\.[A-Za-z0-9_\-]+)*$").expect("hard-coded pattern")
    })
}

/// Substitute every `{{...}}` reference in `description` with the referenced
/// execution output.
///
/// `task_id` is the task being resolved; it is only used to attribute errors.
pub fn resolve_references(
    task_id: &TaskId,
    description: &str,
    executions: &[Execution],
) -> Result<String> {
    let mut resolved = String::with_capacity(description.len());
    let mut last_end = 0;

    for captures in reference_pattern().captures_iter(description) {
        let whole = captures.get(0).ok_or_else(|| Error::UnresolvedReference {
            task: task_id.clone(),
            reference: description.to_string(),
        })?;
        let inner = captures
            .get(1)
            .map(|m| m.as_str().trim())
            .unwrap_or_default();

        let value = lookup(task_id, inner, executions)?;

        resolved.push_str(&description[last_end..whole.start()]);
        resolved.push_str(&render(&value));
        last_end = whole.end();
    }
    resolved.push_str(&description[last_end..]);

    Ok(resolved)
}

/// Resolve one reference body (`id` or `id.path`) to a value.
fn lookup(task_id: &TaskId, inner: &str, executions: &[Execution]) -> Result<serde_json::Value> {
    if !inner_pattern().is_match(inner) {
        return Err(Error::UnresolvedReference {
            task: task_id.clone(),
            reference: inner.to_string(),
        });
    }

    let mut segments = inner.split('.');
    let ref_id = segments.next().unwrap_or_default();

    let execution = executions
        .iter()
        .find(|e| e.success && e.task_id.as_str() == ref_id)
        .ok_or_else(|| Error::UnresolvedReference {
            task: task_id.clone(),
            reference: inner.to_string(),
        })?;

    let mut value = &execution.output;
    for segment in segments {
        value = match value {
            serde_json::Value::Object(map) => map.get(segment),
            serde_json::Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get(index)),
            _ => None,
        }
        .ok_or_else(|| Error::UnresolvedReference {
            task: task_id.clone(),
            reference: inner.to_string(),
        })?;
    }

    Ok(value.clone())
}

/// Render a resolved value for inline substitution.
///
/// Strings are inserted verbatim; everything else keeps its JSON form.
fn render(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
