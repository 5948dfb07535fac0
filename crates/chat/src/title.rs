//! Session title cleanup.

const MAX_TITLE_CHARS: usize = 100;

/// Normalises a summarised title: first non-blank line, surrounding quotes stripped,
/// capped at 100 characters. Returns `None` when nothing usable remains.
pub fn clean_title(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|line| !line.is_empty())?;

    let unquoted = line
        .trim_matches(|ch: char| matches!(ch, '"' | '\'' | '`' | '“' | '”' | '‘' | '’' | '*'))
        .trim();
    let unquoted = unquoted
        .strip_prefix("Title:")
        .map(str::trim)
        .unwrap_or(unquoted);

    if unquoted.is_empty() {
        return None;
    }

    if unquoted.chars().count() > MAX_TITLE_CHARS {
        let truncated = unquoted
            .chars()
            .take(MAX_TITLE_CHARS - 3)
            .collect::<String>();
        return Some(format!("{}...", truncated.trim_end()));
    }

    Some(unquoted.to_string())
}
