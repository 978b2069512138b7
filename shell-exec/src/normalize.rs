//! Output normalization.
//!
//! Every line is trimmed, then blank lines at either end are dropped.
//! Interior blank lines survive.

/// Normalize raw process output.
pub fn normalize(raw: &str) -> String {
    let lines: Vec<&str> = raw.lines().map(str::trim).collect();
    let start = lines.iter().position(|l| !l.is_empty());
    let end = lines.iter().rposition(|l| !l.is_empty());
    match (start, end) {
        (Some(start), Some(end)) => lines.get(start..=end).unwrap_or_default().join("\n"),
        _ => String::new(),
    }
}

/// Decode captured bytes (lossy UTF-8) and normalize them.
pub fn normalize_bytes(raw: &[u8]) -> String {
    normalize(&String::from_utf8_lossy(raw))
}
