use std::collections::BTreeMap;

use ensemble::persistence::store::{Store, STORE_FILE};
use ensemble::AppError;
use serde_json::json;

#[test]
fn missing_file_opens_empty() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = Store::open_at(temp.path().join("config")).expect("open");
    assert!(store.is_open());
    assert!(store.is_empty());
}

#[test]
fn write_then_reopen_reads_entries() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path().join("config");

    let mut store = Store::open_at(&dir).expect("open");
    store.set("volume", json!(0.8));
    store.set("preset", json!("warm pad"));
    store.write().expect("write");
    store.close().expect("close");
    assert!(!store.is_open());
    assert!(dir.join(STORE_FILE).exists());

    let reopened = Store::open_at(&dir).expect("reopen");
    assert_eq!(reopened.get("volume"), Some(&json!(0.8)));
    assert_eq!(
        reopened.keys().cloned().collect::<Vec<_>>(),
        vec!["preset", "volume"]
    );
}

#[test]
fn close_writes_dirty_entries() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path().join("config");

    let mut store = Store::open_at(&dir).expect("open");
    store.set("k", json!(1));
    store.close().expect("close");

    let reopened = Store::open_at(&dir).expect("reopen");
    assert_eq!(reopened.get("k"), Some(&json!(1)));
}

#[test]
fn opening_twice_is_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut store = Store::open_at(temp.path()).expect("open");
    let err = store.open(temp.path()).expect_err("double open");
    assert!(matches!(err, AppError::Store(_)));
    assert!(store.is_open(), "failed reopen leaves the store open");
}

#[test]
fn close_is_idempotent_and_allows_reopen() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut store = Store::open_at(temp.path()).expect("open");
    store.close().expect("close");
    store.close().expect("second close is a no-op");
    store.open(temp.path()).expect("reopen after close");
}

#[test]
fn writing_closed_store_fails() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut store = Store::open_at(temp.path()).expect("open");
    store.close().expect("close");
    assert!(matches!(store.write(), Err(AppError::Store(_))));
}

#[test]
fn empty_store_removes_its_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path().join("config");
    let mut store = Store::open_at(&dir).expect("open");
    store.set("k", json!(true));
    store.write().expect("write");
    assert!(dir.join(STORE_FILE).exists());

    store.replace(BTreeMap::new());
    store.write().expect("write empty");
    assert!(!dir.join(STORE_FILE).exists());
}

#[test]
fn corrupt_file_is_a_store_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::write(temp.path().join(STORE_FILE), "{not json").expect("write");
    assert!(matches!(
        Store::open_at(temp.path()),
        Err(AppError::Store(_))
    ));
}
