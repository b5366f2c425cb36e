//! Input safety — task and worker ID validation.
//!
//! IDs flow into tracker CLI invocations and prompt text, so they are checked
//! before any store access. A task ID is `<prefix>-<id>[.<n>]`: a letters-only
//! prefix, an alphanumeric id, and an optional numeric subtask index. The id
//! is at least three characters long, and the id plus subtask digits at least
//! four, so `perles-abc.1` and `perles-abcd` pass while `perles-abc` and
//! `perles-ab.1` do not.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::InputError;

/// Minimum length of the id between the hyphen and the subtask dot.
const MIN_BASE_LEN: usize = 3;

/// Minimum combined length of the id and the subtask digits.
const MIN_SUFFIX_LEN: usize = 4;

static TASK_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z]+-(?P<base>[A-Za-z0-9]+)(?:\.(?P<sub>[0-9]+))?$")
        .expect("task ID pattern is valid")
});

static WORKER_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").expect("worker ID pattern is valid")
});

/// Characters with meaning to a shell.
const SHELL_METACHARACTERS: &[char] = &[
    ';', '$', '`', '|', '&', '>', '<', '(', ')', '{', '}', '\'', '"', '\\', '*', '?', '!',
];

/// Validate a task ID.
pub fn validate_task_id(task_id: &str) -> Result<(), InputError> {
    let reject = |reason: &str| {
        Err(InputError::InvalidTaskId {
            task_id: task_id.to_string(),
            reason: reason.to_string(),
        })
    };

    if task_id.is_empty() {
        return reject("must not be empty");
    }
    if task_id.starts_with("--") {
        return reject("must not start with --");
    }
    if task_id.chars().any(char::is_whitespace) {
        return reject("must not contain whitespace");
    }
    if task_id.contains(SHELL_METACHARACTERS) {
        return reject("must not contain shell metacharacters");
    }
    if task_id.contains("..") || task_id.contains('/') {
        return reject("must not contain path sequences");
    }
    let Some(caps) = TASK_ID.captures(task_id) else {
        return reject("expected <prefix>-<id> or <prefix>-<id>.<n>");
    };

    let base = caps.name("base").map_or(0, |m| m.len());
    let sub = caps.name("sub").map_or(0, |m| m.len());
    if base < MIN_BASE_LEN || base + sub < MIN_SUFFIX_LEN {
        return reject("id after prefix is too short");
    }

    Ok(())
}

/// Validate a worker ID.
pub fn validate_worker_id(worker_id: &str) -> Result<(), InputError> {
    if worker_id.is_empty() {
        return Err(InputError::MissingField { field: "worker_id" });
    }
    if !WORKER_ID.is_match(worker_id) {
        return Err(InputError::InvalidWorkerId {
            worker_id: worker_id.to_string(),
            reason: "expected letters, digits, '-' or '_'".to_string(),
        });
    }
    Ok(())
}

/// Require a non-blank free-text argument.
pub fn require_text(field: &'static str, value: &str) -> Result<(), InputError> {
    if value.trim().is_empty() {
        return Err(InputError::MissingField { field });
    }
    Ok(())
}
