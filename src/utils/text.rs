pub fn truncate_utf8_prefix(value: &str, max_bytes: usize) -> String {
    if max_bytes == 0 {
        return String::new();
    }
    if value.len() <= max_bytes {
        return value.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

pub fn truncate_utf8_suffix(value: &str, max_bytes: usize) -> String {
    if max_bytes == 0 {
        return String::new();
    }
    let bytes = value.as_bytes();
    if bytes.len() <= max_bytes {
        return value.to_string();
    }
    let mut start = bytes.len().saturating_sub(max_bytes);
    while start < bytes.len() && !value.is_char_boundary(start) {
        start += 1;
    }
    value[start..].to_string()
}

/// Keeps the tail of command output, which is where installers print the
/// actual failure, and marks the cut.
pub fn tail_for_display(value: &str, max_bytes: usize) -> String {
    let trimmed = value.trim();
    if trimmed.len() <= max_bytes {
        return trimmed.to_string();
    }
    format!("…{}", truncate_utf8_suffix(trimmed, max_bytes))
}

/// Lossy UTF-8 decoding of captured command output.
pub fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
