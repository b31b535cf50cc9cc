//! Integration tests for the synd-send daemon binary

use assert_cmd::Command;
use libsyndicast::{ContentSlot, Database, DestinationId, WorkerId, WorkerRegistration};
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Write a minimal config pointing at a database inside the temp dir.
fn setup_test_env(transport_command: Option<&str>) -> (TempDir, String, String) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    let db_path = temp_dir.path().join("test.db");

    let mut config_content = format!(
        r#"
[database]
path = "{}"
"#,
        db_path.display().to_string().replace('\\', "/")
    );
    if let Some(command) = transport_command {
        config_content.push_str(&format!(
            r#"
[transport]
command = "{}"
"#,
            command
        ));
    }
    fs::write(&config_path, config_content).unwrap();

    (
        temp_dir,
        config_path.to_str().unwrap().to_string(),
        db_path.to_str().unwrap().to_string(),
    )
}

async fn seed_worker_and_slot(db_path: &str) -> String {
    let db = Database::new(db_path).await.unwrap();
    let reg = WorkerRegistration {
        id: WorkerId(1),
        handle: "cred-1".to_string(),
        hourly_limit: None,
        daily_limit: None,
    };
    db.upsert_worker(&reg, 1_000_000).await.unwrap();

    let slot = ContentSlot::new(
        "owner-1".to_string(),
        "hello from the daemon test".to_string(),
        vec![DestinationId::from("dest-a")],
        3600,
    );
    db.create_slot(&slot).await.unwrap();
    slot.id.as_str().to_string()
}

#[tokio::test]
async fn test_once_with_empty_database_exits_cleanly() {
    let (_temp, config_path, db_path) = setup_test_env(Some("cat"));
    // Initialize the database so the daemon finds an empty, migrated store.
    let _db = Database::new(&db_path).await.unwrap();

    let mut cmd = Command::cargo_bin("synd-send").unwrap();
    cmd.arg("--once")
        .arg("--config")
        .arg(&config_path)
        .assert()
        .success()
        .stderr(predicate::str::contains("processed due slots once"));
}

#[tokio::test]
async fn test_once_delivers_due_slot_through_exec_transport() {
    // `cat` echoes the content back, so the receipt is the content itself.
    let (_temp, config_path, db_path) = setup_test_env(Some("cat"));
    let slot_id = seed_worker_and_slot(&db_path).await;

    let mut cmd = Command::cargo_bin("synd-send").unwrap();
    cmd.arg("--once")
        .arg("--config")
        .arg(&config_path)
        .assert()
        .success();

    let db = Database::new(&db_path).await.unwrap();
    let attempts = db.recent_attempts(10).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert!(attempts[0].success);
    assert_eq!(attempts[0].slot_id.as_str(), slot_id);

    // The slot clock advanced, so it is no longer due.
    let slot = db.get_slot(&attempts[0].slot_id).await.unwrap().unwrap();
    assert!(slot.last_sent_at.is_some());
}

#[tokio::test]
async fn test_missing_transport_command_is_a_config_error() {
    let (_temp, config_path, db_path) = setup_test_env(None);
    let _db = Database::new(&db_path).await.unwrap();

    let mut cmd = Command::cargo_bin("synd-send").unwrap();
    cmd.arg("--once")
        .arg("--config")
        .arg(&config_path)
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("transport.command"));
}
