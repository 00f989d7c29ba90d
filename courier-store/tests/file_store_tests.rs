#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::PathBuf;

use courier_common::{DeliveryStatus, EmailRecord, MailId, OutgoingMessage, Submission};
use courier_store::{ChangeKind, FileRecordStore, RecordFilter, RecordStore, StoreError};

fn record(id: &str, attempts: u32, status: DeliveryStatus) -> EmailRecord {
    let submission = Submission::new(
        MailId::new(id).unwrap(),
        OutgoingMessage::new("a@x.com", "b@x.com", "Hi", "<p>hi</p>").unwrap(),
    )
    .with_user_id("user-1")
    .with_others(serde_json::json!({ "campaign": "welcome" }));

    let mut record = EmailRecord::first_failure(&submission, "SMTP 550", 5);
    record.attempts = attempts;
    record.status = status;
    record
}

fn open_store() -> (tempfile::TempDir, FileRecordStore) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let store = FileRecordStore::new(dir.path().join("records")).expect("Invalid path");
    store.init().expect("Failed to init store");
    (dir, store)
}

#[test]
fn test_path_validation_rejects_parent_dir() {
    let err = FileRecordStore::new(PathBuf::from("/var/lib/../etc/courier")).unwrap_err();
    assert!(err.to_string().contains("cannot contain '..'"));
}

#[test]
fn test_path_validation_rejects_relative_paths() {
    let err = FileRecordStore::new(PathBuf::from("relative/path")).unwrap_err();
    assert!(err.to_string().contains("must be absolute"));
}

#[test]
#[cfg(unix)]
fn test_path_validation_rejects_unix_system_directories() {
    for path in ["/etc/courier", "/bin/records", "/proc/mail", "/dev/records"] {
        let err = FileRecordStore::new(PathBuf::from(path)).unwrap_err();
        assert!(
            err.to_string().contains("system directory"),
            "Wrong error for path {path}"
        );
    }
}

#[test]
fn test_init_removes_orphaned_temp_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("records");
    std::fs::create_dir_all(&path).unwrap();
    std::fs::write(path.join(".tmp_6d31.json"), b"{").unwrap();

    let store = FileRecordStore::new(&path).unwrap();
    store.init().unwrap();

    assert!(!path.join(".tmp_6d31.json").exists());
}

#[tokio::test]
async fn test_insert_persists_across_instances() {
    let (dir, store) = open_store();
    let inserted = store
        .insert(record("m1", 1, DeliveryStatus::Retry))
        .await
        .unwrap();
    assert_eq!(inserted.version, 1);

    let reopened = FileRecordStore::new(dir.path().join("records")).unwrap();
    let found = reopened
        .find_by_id(&inserted.mail_id)
        .await
        .unwrap()
        .expect("Record should be persisted");

    assert_eq!(found, inserted);
    assert_eq!(found.user_id.as_deref(), Some("user-1"));
    assert_eq!(found.others, Some(serde_json::json!({ "campaign": "welcome" })));
}

#[tokio::test]
async fn test_duplicate_insert_is_rejected() {
    let (_dir, store) = open_store();
    store
        .insert(record("m1", 1, DeliveryStatus::Retry))
        .await
        .unwrap();

    let err = store
        .insert(record("m1", 1, DeliveryStatus::Retry))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists(_)));
}

#[tokio::test]
async fn test_save_with_stale_version_conflicts() {
    let (_dir, store) = open_store();
    let mut current = store
        .insert(record("m1", 1, DeliveryStatus::Retry))
        .await
        .unwrap();
    let stale = current.clone();

    current.record_failure("SMTP 421", 5);
    let saved = store.save(&current).await.unwrap();
    assert_eq!(saved.version, 2);
    assert_eq!(saved.attempts, 2);

    let err = store.save(&stale).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict { .. }));

    let stored = store.find_by_id(&current.mail_id).await.unwrap().unwrap();
    assert_eq!(stored.attempts, 2);
}

#[tokio::test]
async fn test_find_many_applies_retry_filter() {
    let (_dir, store) = open_store();
    store
        .insert(record("retry", 2, DeliveryStatus::Retry))
        .await
        .unwrap();
    store
        .insert(record("failed", 5, DeliveryStatus::Failed))
        .await
        .unwrap();
    store
        .insert(record("sent", 3, DeliveryStatus::Sent))
        .await
        .unwrap();
    store
        .insert(record("capped", 5, DeliveryStatus::Retry))
        .await
        .unwrap();

    let due = store.find_many(&RecordFilter::retryable(5)).await.unwrap();
    let ids: Vec<_> = due.iter().map(|r| r.mail_id.as_str()).collect();
    assert_eq!(ids, vec!["retry"]);

    let all = store.find_many(&RecordFilter::all()).await.unwrap();
    assert_eq!(all.len(), 4);
}

#[tokio::test]
async fn test_find_many_skips_corrupt_files() {
    let (dir, store) = open_store();
    store
        .insert(record("good", 1, DeliveryStatus::Retry))
        .await
        .unwrap();
    let corrupt = format!("{}.json", hex::encode("bad"));
    std::fs::write(dir.path().join("records").join(corrupt), b"not json").unwrap();

    let all = store.find_many(&RecordFilter::all()).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].mail_id.as_str(), "good");
}

#[tokio::test]
async fn test_writes_publish_change_events() {
    let (_dir, store) = open_store();
    let mut feed = store.subscribe();

    let mut inserted = store
        .insert(record("m1", 1, DeliveryStatus::Retry))
        .await
        .unwrap();
    inserted.record_success();
    store.save(&inserted).await.unwrap();

    let first = feed.recv().await.unwrap();
    assert_eq!(first.kind, ChangeKind::Insert);
    assert_eq!(first.id.as_str(), "m1");

    let second = feed.recv().await.unwrap();
    assert_eq!(second.kind, ChangeKind::Update);
    assert_eq!(
        second.document.map(|d| d.status),
        Some(DeliveryStatus::Sent)
    );
}

#[tokio::test]
async fn test_connectivity_tracks_directory() {
    let (dir, store) = open_store();
    assert!(store.is_connected().await);

    std::fs::remove_dir_all(dir.path().join("records")).unwrap();
    assert!(!store.is_connected().await);
}
