//! Integration tests for the on-disk schedule store and the example document
//! shipped in `data/schedule.example.json`.

use chrono::{DateTime, TimeZone, Utc};
use rouse_rules::RestingState;
use rouse_schedule::{OccurrenceSource, ScheduleDocument, ScheduleStore, StoreStatus};

fn example_path() -> std::path::PathBuf {
    let manifest = std::path::Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest.join("../../data/schedule.example.json")
}

fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

const DAILY_SEVEN: &str = r#"{
    "timezone": "UTC",
    "rrule_sets": [{"rrules": [{"freq": "daily", "dtstart": {"hour": 7}}],
                    "parameters": {"name": "weekday"}}]
}"#;

const DAILY_EIGHT: &str = r#"{
    "timezone": "UTC",
    "rrule_sets": [{"rrules": [{"freq": "daily", "dtstart": {"hour": 8}}],
                    "parameters": {"name": "weekday"}}]
}"#;

// ── Example document ────────────────────────────────────────

#[test]
fn example_document_parses() {
    let raw = std::fs::read_to_string(example_path()).unwrap();
    let doc: ScheduleDocument = serde_json::from_str(&raw).unwrap();
    assert_eq!(doc.timezone.as_deref(), Some("Europe/Berlin"));
    assert_eq!(doc.rrule_sets.len(), 2);
    assert_eq!(doc.exceptions.include.len(), 1);
    assert_eq!(doc.exceptions.exclude.len(), 1);
}

#[test]
fn example_document_skips_holidays() {
    let store = ScheduleStore::new(example_path());
    assert!(store.refresh());
    assert_eq!(store.status(), StoreStatus::Ready);

    // Christmas Eve is excluded document-wide, Christmas Day by the rule-set.
    let next = store.next_occurrence(at(2024, 12, 24, 0, 0)).unwrap();
    assert_eq!(next.name(), Some("weekday"));
    // 06:45 CET
    assert_eq!(next.at, at(2024, 12, 26, 5, 45));
}

#[test]
fn example_document_upcoming() {
    let store = ScheduleStore::new(example_path());
    store.refresh();

    let upcoming = store.upcoming(at(2024, 12, 24, 0, 0), 7);
    let names: Vec<_> = upcoming.iter().map(|o| o.name().unwrap()).collect();
    // The last Sunday of the month (29th) is removed by the exclusion rule.
    assert_eq!(
        names,
        vec![
            "weekday",
            "weekday",
            "weekend",
            "weekday",
            "weekday",
            "new-years-eve",
            "weekday"
        ]
    );
    assert_eq!(upcoming[2].at, at(2024, 12, 28, 8, 0));
    assert_eq!(upcoming[5].at, at(2024, 12, 31, 9, 30));
    assert_eq!(upcoming[5].source, OccurrenceSource::Inclusion);
    assert_eq!(
        upcoming[5].parameters.settings.snooze_state,
        Some(RestingState::On)
    );
}

// ── Content-addressed reload ────────────────────────────────

#[test]
fn reload_only_on_content_change() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("schedule.json");
    let store = ScheduleStore::new(&path);

    std::fs::write(&path, DAILY_SEVEN).unwrap();
    assert!(store.refresh());
    let first_hash = store.content_hash().unwrap();
    assert!(!store.refresh());
    assert_eq!(store.content_hash().unwrap(), first_hash);

    std::fs::write(&path, DAILY_EIGHT).unwrap();
    assert!(store.refresh());
    assert_ne!(store.content_hash().unwrap(), first_hash);
    assert_eq!(
        store.next_occurrence(at(2024, 5, 14, 0, 0)).unwrap().at,
        at(2024, 5, 14, 8, 0)
    );
}

#[test]
fn malformed_document_keeps_last_good_rules() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("schedule.json");
    let store = ScheduleStore::new(&path);

    std::fs::write(&path, DAILY_SEVEN).unwrap();
    store.refresh();

    std::fs::write(&path, "{ not json").unwrap();
    assert!(!store.refresh());
    assert!(matches!(store.status(), StoreStatus::Degraded { .. }));
    assert_eq!(
        store.next_occurrence(at(2024, 5, 14, 0, 0)).unwrap().at,
        at(2024, 5, 14, 7, 0)
    );

    // Same broken bytes again: no reparse, still degraded.
    assert!(!store.refresh());
    assert!(matches!(store.status(), StoreStatus::Degraded { .. }));

    std::fs::write(&path, DAILY_EIGHT).unwrap();
    assert!(store.refresh());
    assert_eq!(store.status(), StoreStatus::Ready);
}

#[test]
fn unreadable_file_reports_no_occurrences_until_restored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("schedule.json");
    let store = ScheduleStore::new(&path);

    std::fs::write(&path, DAILY_SEVEN).unwrap();
    store.refresh();

    std::fs::remove_file(&path).unwrap();
    assert!(!store.refresh());
    assert!(matches!(store.status(), StoreStatus::Unavailable { .. }));
    assert!(store.next_occurrence(at(2024, 5, 14, 0, 0)).is_none());

    // Restoring identical content reuses the cached rules.
    std::fs::write(&path, DAILY_SEVEN).unwrap();
    assert!(!store.refresh());
    assert_eq!(store.status(), StoreStatus::Ready);
    assert!(store.next_occurrence(at(2024, 5, 14, 0, 0)).is_some());
}
