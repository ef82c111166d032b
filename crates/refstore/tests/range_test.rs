//! Cursor scans: every bound type, empty ranges, raw views and
//! duplicate-key tables.

use refstore::prelude::*;
use tempfile::TempDir;

fn setup() -> (TempDir, Environment, Table<String, u32>) {
    let dir = tempfile::tempdir().unwrap();
    let env = Environment::open(
        EnvironmentConfig::new(dir.path()).with_max_size_bytes(16 * 1024 * 1024),
    )
    .unwrap();
    let table = env
        .open_table("letters", StringSerde::new(), U32Serde, TableOptions::new())
        .unwrap();
    table
        .put_all(["a", "b", "c", "d", "e"].iter().zip(1u32..).map(|(k, v)| (k.to_string(), v)))
        .unwrap();
    (dir, env, table)
}

fn k(key: &str) -> String {
    key.to_string()
}

fn keys(env: &Environment, table: &Table<String, u32>, range: KeyRange<String>) -> Vec<String> {
    let txn = env.begin_read().unwrap();
    table
        .range(&txn, &range)
        .unwrap()
        .map(|e| e.unwrap().0)
        .collect()
}

#[test]
fn test_every_range_type() {
    let (_dir, env, table) = setup();

    assert_eq!(keys(&env, &table, KeyRange::all()), ["a", "b", "c", "d", "e"]);
    assert_eq!(keys(&env, &table, KeyRange::closed(k("b"), k("d"))), ["b", "c", "d"]);
    assert_eq!(keys(&env, &table, KeyRange::closed_open(k("b"), k("d"))), ["b", "c"]);
    assert_eq!(keys(&env, &table, KeyRange::open(k("b"), k("d"))), ["c"]);
    assert_eq!(keys(&env, &table, KeyRange::open_closed(k("b"), k("d"))), ["c", "d"]);
    assert_eq!(keys(&env, &table, KeyRange::at_least(k("c"))), ["c", "d", "e"]);
    assert_eq!(keys(&env, &table, KeyRange::greater_than(k("c"))), ["d", "e"]);
    assert_eq!(keys(&env, &table, KeyRange::at_most(k("b"))), ["a", "b"]);
    assert_eq!(keys(&env, &table, KeyRange::less_than(k("b"))), ["a"]);
}

#[test]
fn test_bounds_between_stored_keys() {
    let (_dir, env, table) = setup();

    assert_eq!(keys(&env, &table, KeyRange::closed(k("bb"), k("dd"))), ["c", "d"]);
    assert_eq!(keys(&env, &table, KeyRange::greater_than(k("bb"))), ["c", "d", "e"]);
    assert_eq!(keys(&env, &table, KeyRange::at_most(k("cc"))), ["a", "b", "c"]);
}

#[test]
fn test_empty_ranges() {
    let (_dir, env, table) = setup();

    assert!(keys(&env, &table, KeyRange::at_least(k("f"))).is_empty());
    assert!(keys(&env, &table, KeyRange::less_than(k("a"))).is_empty());
    assert!(keys(&env, &table, KeyRange::open(k("b"), k("c"))).is_empty());
    // Start past stop yields nothing rather than an error
    assert!(keys(&env, &table, KeyRange::closed(k("d"), k("b"))).is_empty());
}

#[test]
fn test_range_values_and_raw_views() {
    let (_dir, env, table) = setup();
    let txn = env.begin_read().unwrap();

    let pairs: Vec<(String, u32)> = table
        .range(&txn, &KeyRange::closed("a".to_string(), "c".to_string()))
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(pairs, vec![("a".into(), 1), ("b".into(), 2), ("c".into(), 3)]);

    let mut raw = table
        .range_bytes(&txn, &KeyRange::at_least("d".to_string()))
        .unwrap();
    let first = raw.next().unwrap().unwrap();
    assert_eq!(first.key().unwrap(), b"d");
    assert_eq!(first.value().unwrap(), &4u32.to_be_bytes());
    let kept = first.copy_out().unwrap();

    let second = raw.next().unwrap().unwrap();
    assert_eq!(second.key().unwrap(), b"e");
    assert!(first.key().unwrap_err().is_stale_view());
    assert_eq!(kept, (b"d".to_vec(), 4u32.to_be_bytes().to_vec()));
    assert!(raw.next().is_none());
    assert!(raw.next().is_none());
}

#[test]
fn test_switch_to_raw_mid_scan() {
    let (_dir, env, table) = setup();
    let txn = env.begin_read().unwrap();

    let mut typed = table.range(&txn, &KeyRange::all()).unwrap();
    assert_eq!(typed.next().unwrap().unwrap().0, "a");
    let rest: Vec<Vec<u8>> = typed
        .into_raw()
        .map(|e| e.unwrap().key().unwrap().to_vec())
        .collect();
    assert_eq!(rest, vec![b"b".to_vec(), b"c".to_vec(), b"d".to_vec(), b"e".to_vec()]);
}

#[test]
fn test_duplicate_key_table() {
    let dir = tempfile::tempdir().unwrap();
    let env = Environment::open(EnvironmentConfig::new(dir.path())).unwrap();
    let tags = env
        .open_table(
            "tags",
            StringSerde::new(),
            StringSerde::new(),
            TableOptions::new().with_duplicates(),
        )
        .unwrap();

    let mut txn = env.begin_write().unwrap();
    for (k, v) in [("fruit", "pear"), ("fruit", "apple"), ("veg", "leek"), ("fruit", "fig")] {
        let outcome = tags.put(&mut txn, &k.to_string(), &v.to_string(), false).unwrap();
        assert_eq!(outcome, PutOutcome::Inserted);
    }
    let again = tags
        .put(&mut txn, &"fruit".to_string(), &"fig".to_string(), false)
        .unwrap();
    assert_eq!(again, PutOutcome::Duplicate);
    txn.commit().unwrap();

    let txn = env.begin_read().unwrap();
    assert_eq!(tags.count(&txn).unwrap(), 4);
    // First value in sort order
    assert_eq!(tags.get(&txn, &"fruit".to_string()).unwrap(), Some("apple".into()));
    let fruit: Vec<String> = tags
        .range(&txn, &KeyRange::closed("fruit".to_string(), "fruit".to_string()))
        .unwrap()
        .map(|e| e.unwrap().1)
        .collect();
    assert_eq!(fruit, vec!["apple", "fig", "pear"]);
    drop(txn);

    let mut txn = env.begin_write().unwrap();
    assert!(tags
        .delete_entry(&mut txn, &"fruit".to_string(), &"fig".to_string())
        .unwrap());
    let err = tags
        .update_value(&mut txn, &"veg".to_string(), |v| v.push(b'!'))
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidState(_)));
    txn.commit().unwrap();
    assert_eq!(tags.entry_count().unwrap(), 3);

    assert!(tags.remove(&"fruit".to_string()).unwrap());
    assert_eq!(tags.entry_count().unwrap(), 1);

    // Removing the last value removes the key
    let mut txn = env.begin_write().unwrap();
    assert!(tags
        .delete_entry(&mut txn, &"veg".to_string(), &"leek".to_string())
        .unwrap());
    assert!(!tags.exists(&txn, &"veg".to_string()).unwrap());
    txn.commit().unwrap();
    assert_eq!(tags.entry_count().unwrap(), 0);
}
