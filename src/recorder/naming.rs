use chrono::{DateTime, Local};

/// Longest normalized title kept in an artifact name
pub const MAX_TITLE_LEN: usize = 40;

/// Name used when a title normalizes to nothing
pub const FALLBACK_TITLE: &str = "tab";

/// Make a tab title safe for use in a file name
///
/// Runs of non-alphanumeric characters collapse to one `_`, leading and
/// trailing `_` are trimmed, and the result is cut to `MAX_TITLE_LEN`
/// characters. Truncation happens last, so the result may end in `_`.
pub fn normalize_title(title: &str) -> String {
    let mut normalized = String::with_capacity(title.len());
    let mut in_gap = false;

    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            normalized.push(c);
            in_gap = false;
        } else if !in_gap {
            normalized.push('_');
            in_gap = true;
        }
    }

    let trimmed = normalized.trim_matches('_');
    if trimmed.is_empty() {
        return FALLBACK_TITLE.to_string();
    }

    trimmed.chars().take(MAX_TITLE_LEN).collect()
}

/// `yyyy.mm.dd.hh.mm` in local time
pub fn timestamp(at: DateTime<Local>) -> String {
    at.format("%Y.%m.%d.%H.%M").to_string()
}

/// `<normalized-title>_<timestamp>.<ext>`
pub fn artifact_filename(title: &str, at: DateTime<Local>, extension: &str) -> String {
    format!("{}_{}.{}", normalize_title(title), timestamp(at), extension)
}
