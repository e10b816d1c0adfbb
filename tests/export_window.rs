use chrono::{DateTime, Duration, TimeZone, Utc};
use wqmon::config::TrackedKey;
use wqmon::registry::DatasetRegistry;
use wqmon::render::{self, SeriesStats};
use wqmon::store::HistoryStore;
use wqmon::viewport::{Track, ViewportController};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 15, 12, 0, 0).unwrap()
}

fn keys() -> Vec<TrackedKey> {
    vec![
        TrackedKey::new("ai1", "Suspended Solids", "mg/L"),
        TrackedKey::new("ai2", "Turbidity", "NTU"),
    ]
}

#[test]
fn brushed_window_exports_only_visible_samples() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(dir.path()).unwrap();

    // One sample per hour over the last 48 hours, ai2 every other hour
    for h in 0..48 {
        let at = now() - Duration::hours(h);
        store.append("ai1", at, h as f64).unwrap();
        if h % 2 == 0 {
            store.append("ai2", at, 100.0 + h as f64).unwrap();
        }
    }
    // Outside retention
    store.append("ai1", now() - Duration::hours(60), -1.0).unwrap();

    let (registry, report) = DatasetRegistry::load(&keys(), 48, &store, now());
    assert_eq!(report.samples, 48 + 24);

    // Keep the newest quarter of the window: the last 12 hours
    let mut viewport = ViewportController::new(48, Track::new(96.0), now());
    assert!(viewport.on_drag_start(0.5));
    viewport.on_drag_move(72.5);
    assert!(viewport.on_drag_end());
    let window = viewport.current_viewport();
    assert_eq!(window.min, now() - Duration::hours(12));
    assert_eq!(window.max, now());

    let csv = render::export_csv(&registry, window).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines[0], "Timestamp,Suspended Solids,Turbidity");
    // Hours 12 down to 0, inclusive on both ends
    assert_eq!(lines.len(), 1 + 13);
    assert_eq!(lines[1], "2026-10-15T00:00:00.000Z,12,112");
    assert_eq!(lines[2], "2026-10-15T01:00:00.000Z,11,");
    assert_eq!(lines[13], "2026-10-15T12:00:00.000Z,0,100");

    let cards = render::compute_cards(&registry, window);
    assert_eq!(
        cards[0].stats,
        SeriesStats::Summary {
            min: 0.0,
            max: 12.0,
            avg: 6.0,
            count: 13
        }
    );
}

#[test]
fn cleared_history_exports_header_only() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(dir.path()).unwrap();
    store.append("ai1", now() - Duration::minutes(5), 1.0).unwrap();
    store.clear_all().unwrap();

    let (registry, _) = DatasetRegistry::load(&keys(), 48, &store, now());
    let viewport = ViewportController::new(48, Track::new(80.0), now());
    let csv = render::export_csv(&registry, viewport.current_viewport()).unwrap();
    assert_eq!(csv, "Timestamp,Suspended Solids,Turbidity\n");

    let table = render::build_table(&registry, viewport.current_viewport());
    assert!(table.rows.is_empty());
    assert_eq!(table.columns.len(), 2);
}
