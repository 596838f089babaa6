use crate::constants::limits::{MAX_NAME_BYTES, MAX_PATH_BYTES};
use crate::errors::OpError;

pub fn join(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

pub fn parent(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => trimmed[..idx].to_string(),
    }
}

pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Collapses `.`/`..` segments and duplicate slashes of an absolute path.
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Checks a single entry name typed by the operator.
pub fn validate_name(raw: &str) -> Result<String, OpError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(OpError::validation("Name must not be empty"));
    }
    if name == "." || name == ".." {
        return Err(OpError::validation("Name must not be . or .."));
    }
    if name.contains('/') {
        return Err(OpError::validation("Name must not contain '/'"));
    }
    if name.starts_with('-') {
        return Err(OpError::validation("Name must not start with '-'"));
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(OpError::validation("Name must not contain control characters"));
    }
    if name.len() > MAX_NAME_BYTES {
        return Err(OpError::validation(format!(
            "Name is longer than {} bytes",
            MAX_NAME_BYTES
        )));
    }
    Ok(name.to_string())
}

/// Resolves a destination typed by the operator against `cwd`.
pub fn resolve_destination(cwd: &str, raw: &str) -> Result<String, OpError> {
    let input = raw.trim();
    if input.is_empty() {
        return Err(OpError::validation("Destination path must not be empty"));
    }
    if input.chars().any(|c| c.is_control()) {
        return Err(OpError::validation(
            "Destination path must not contain control characters",
        ));
    }
    if input.len() > MAX_PATH_BYTES {
        return Err(OpError::validation("Destination path is too long"));
    }
    let absolute = if input.starts_with('/') {
        input.to_string()
    } else if input == "~" || input.starts_with("~/") {
        return Err(OpError::validation("Use an absolute path instead of ~")
            .with_hint("Example: /home/deploy/backups"));
    } else {
        join(cwd, input)
    };
    Ok(normalize(&absolute))
}
