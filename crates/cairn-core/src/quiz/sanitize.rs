//! Cleanup of quiz completions before JSON parsing.

/// Extract the outermost JSON array from a completion.
///
/// Models wrap arrays in markdown fences or surround them with prose. Fence
/// lines are dropped first, then the span from the first `[` to the last `]`
/// is taken. Returns `None` when no such span exists; the caller falls
/// through to the next strategy.
pub fn extract_json_array(text: &str) -> Option<String> {
    let defenced = strip_code_fences(text);
    let start = defenced.find('[')?;
    let end = defenced.rfind(']')?;
    if end < start {
        return None;
    }
    Some(defenced[start..=end].to_string())
}

/// Remove markdown fence lines, keeping their contents.
fn strip_code_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}
