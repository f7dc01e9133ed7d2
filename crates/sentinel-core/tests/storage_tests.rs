use sentinel_core::storage::models::*;
use sentinel_core::storage::Database;

fn entry(seq: i64, path: &str) -> CheckpointEntryRow {
    CheckpointEntryRow {
        seq,
        original_path: path.to_string(),
        change_kind: "delete".to_string(),
        blob_path: format!("/backups/cp/{}.blob", seq),
        size: 100,
        checksum: -42,
        modified_ns: 1_700_000_000_000_000_000,
        accessed_ns: 1_700_000_000_000_000_000,
        mode: Some(0o644),
        readonly: false,
        artifact_path: None,
        applied: false,
        restored: false,
    }
}

fn checkpoint(id: &str, created_at: i64) -> CheckpointRow {
    CheckpointRow {
        id: id.to_string(),
        created_at,
        action_kind: "cleanup".to_string(),
        description: "test".to_string(),
        state: "committed".to_string(),
        total_bytes: 200,
        blob_dir: format!("/backups/{}", id),
    }
}

#[test]
fn test_schema_version_is_set() {
    let db = Database::open_in_memory().unwrap();
    assert_eq!(db.schema_version().unwrap(), 1);
}

#[test]
fn test_rule_crud_and_match_counts() {
    let db = Database::open_in_memory().unwrap();
    let a = db.insert_rule("a", "{}", 5, true).unwrap();
    let b = db.insert_rule("b", "{}", 10, false).unwrap();
    assert!(a < b);

    db.add_rule_matches(&[(a, 3), (b, 1)]).unwrap();
    db.add_rule_matches(&[(a, 2)]).unwrap();
    assert!(db.set_rule_enabled(b, true).unwrap());
    assert!(db.update_rule(a, "a2", "{\"x\":1}", 7, true).unwrap());

    let rows = db.list_rules().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].name, "a2");
    assert_eq!(rows[0].priority, 7);
    assert_eq!(rows[0].match_count, 5);
    assert!(rows[1].enabled);

    assert!(db.delete_rule(a).unwrap());
    assert!(!db.delete_rule(a).unwrap());
    assert_eq!(db.list_rules().unwrap().len(), 1);
}

#[test]
fn test_learning_outcome_ids_are_unique() {
    let db = Database::open_in_memory().unwrap();
    assert!(db.load_learning_profile().unwrap().is_none());

    db.record_learning_outcome("e1", "cleanup", true, "2024-01-01T00:00:00Z", "{\"v\":1}")
        .unwrap();
    assert_eq!(db.load_learning_profile().unwrap().as_deref(), Some("{\"v\":1}"));

    // The second insert of the same id fails and leaves the profile untouched.
    assert!(db
        .record_learning_outcome("e1", "cleanup", true, "2024-01-01T00:00:00Z", "{\"v\":2}")
        .is_err());
    assert_eq!(db.load_learning_profile().unwrap().as_deref(), Some("{\"v\":1}"));
    assert_eq!(db.learning_outcome_ids().unwrap(), vec!["e1".to_string()]);
}

#[test]
fn test_checkpoint_round_trip_and_entry_flags() {
    let db = Database::open_in_memory().unwrap();
    db.insert_checkpoint(&checkpoint("cp", 1_000), &[entry(0, "/d/a"), entry(1, "/d/b")])
        .unwrap();

    db.mark_entry_applied("cp", 0, Some("/d/Archive/a")).unwrap();
    db.mark_entry_restored("cp", 1).unwrap();

    let row = db.get_checkpoint("cp").unwrap().unwrap();
    assert_eq!(row.total_bytes, 200);
    let entries = db.get_checkpoint_entries("cp").unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].checksum, -42);
    assert!(entries[0].applied);
    assert_eq!(entries[0].artifact_path.as_deref(), Some("/d/Archive/a"));
    assert!(entries[1].restored);
    assert_eq!(entries[1].mode, Some(0o644));

    assert!(db.get_checkpoint("missing").unwrap().is_none());
}

#[test]
fn test_checkpoint_listing_filters_and_orders() {
    let db = Database::open_in_memory().unwrap();
    db.insert_checkpoint(&checkpoint("old", 1_000), &[entry(0, "/a")]).unwrap();
    db.insert_checkpoint(&checkpoint("new", 5_000), &[entry(0, "/b")]).unwrap();
    db.insert_checkpoint(&checkpoint("gone", 3_000), &[entry(0, "/c")]).unwrap();
    assert!(db.set_checkpoint_state("gone", "reverted").unwrap());

    let all: Vec<String> = db.list_checkpoints(&[], 10).unwrap().into_iter().map(|r| r.id).collect();
    assert_eq!(all, vec!["new", "gone", "old"]);

    let committed: Vec<String> = db
        .list_checkpoints(&["committed"], 10)
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(committed, vec!["new", "old"]);

    let stale = db.checkpoints_older_than("committed", 4_000).unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].id, "old");
}

#[test]
fn test_meta_values_overwrite() {
    let db = Database::open_in_memory().unwrap();
    assert!(db.get_meta("k").unwrap().is_none());
    db.set_meta("k", "1").unwrap();
    db.set_meta("k", "2").unwrap();
    assert_eq!(db.get_meta("k").unwrap().as_deref(), Some("2"));
}
