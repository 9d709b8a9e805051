// Integration tests for artifact naming

use chrono::{Local, TimeZone};
use tab_recorder::recorder::naming::{
    artifact_filename, normalize_title, timestamp, FALLBACK_TITLE, MAX_TITLE_LEN,
};

#[test]
fn test_normalize_collapses_punctuation_runs() {
    assert_eq!(normalize_title("My Tab! #1"), "My_Tab_1");
    assert_eq!(normalize_title("  Weekly sync -- notes  "), "Weekly_sync_notes");
}

#[test]
fn test_normalize_keeps_ascii_alphanumerics_only() {
    assert_eq!(normalize_title("Réunion: équipe"), "R_union_quipe");
    assert_eq!(normalize_title("abc123XYZ"), "abc123XYZ");
}

#[test]
fn test_normalize_truncates_long_titles() {
    let title = "a".repeat(100);
    let normalized = normalize_title(&title);
    assert_eq!(normalized.len(), MAX_TITLE_LEN);

    // Truncation happens after trimming, so a trailing separator can survive
    let title = format!("{} tail", "b".repeat(39));
    assert_eq!(normalize_title(&title), format!("{}_", "b".repeat(39)));
}

#[test]
fn test_normalize_empty_falls_back() {
    assert_eq!(normalize_title(""), FALLBACK_TITLE);
    assert_eq!(normalize_title("!!! ???"), FALLBACK_TITLE);
}

#[test]
fn test_timestamp_format() {
    let at = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 42).unwrap();
    assert_eq!(timestamp(at), "2024.03.07.09.05");
}

#[test]
fn test_artifact_filename() {
    let at = Local.with_ymd_and_hms(2024, 12, 31, 23, 59, 0).unwrap();
    assert_eq!(artifact_filename("My Tab! #1", at, "png"), "My_Tab_1_2024.12.31.23.59.png");
    assert_eq!(artifact_filename("", at, "webm"), "tab_2024.12.31.23.59.webm");
}
