//! Human-readable and JSON rendering of results.

use std::fmt::Write as _;

use shell_exec::{CommandResult, Summary};

use crate::error::RunnerResult;

/// Render one result as an indented text block.
pub fn render(result: &CommandResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "command: {}", result.display_command());
    let _ = writeln!(out, "pid:     {}", display_or_dash(result.pid));
    let _ = writeln!(out, "outcome: {}", result.outcome);
    let _ = writeln!(
        out,
        "runtime: {}",
        result
            .runtime
            .map(|d| format!("{:.3}s", d.as_secs_f64()))
            .unwrap_or_else(|| "-".to_string())
    );
    write_body(&mut out, "stdout", result.stdout_lines());
    write_body(&mut out, "stderr", result.stderr_lines());
    out
}

/// Render a batch; blocks are separated by a blank line and numbered.
pub fn render_batch<'a>(results: impl IntoIterator<Item = &'a CommandResult>) -> String {
    results
        .into_iter()
        .enumerate()
        .map(|(i, result)| format!("[{i}]\n{}", render(result)))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_summary(summary: &Summary) -> String {
    let total =
        summary.completed + summary.not_found + summary.timed_out + summary.internal_errors;
    format!(
        "{total} commands: {} completed, {} not found, {} timed out, {} internal errors",
        summary.completed, summary.not_found, summary.timed_out, summary.internal_errors
    )
}

pub fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> RunnerResult<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn write_body<'a>(out: &mut String, label: &str, lines: impl Iterator<Item = &'a str>) {
    let mut lines = lines.peekable();
    if lines.peek().is_none() {
        return;
    }
    let _ = writeln!(out, "{label}:");
    for line in lines {
        let _ = writeln!(out, "  {line}");
    }
}

fn display_or_dash<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}
