//! Integration tests for the synd-status binary

use assert_cmd::Command;
use libsyndicast::{ContentSlot, Database, DestinationId};
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Write a minimal config pointing at a database inside the temp dir.
fn setup_test_env() -> (TempDir, String, String) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    let db_path = temp_dir.path().join("test.db");

    let config_content = format!(
        r#"
[database]
path = "{}"
"#,
        db_path.display().to_string().replace('\\', "/")
    );
    fs::write(&config_path, config_content).unwrap();

    (
        temp_dir,
        config_path.to_str().unwrap().to_string(),
        db_path.to_str().unwrap().to_string(),
    )
}

async fn seed_slot(db_path: &str) -> String {
    let db = Database::new(db_path).await.unwrap();
    let slot = ContentSlot::new(
        "owner-1".to_string(),
        "status test content".to_string(),
        vec![DestinationId::from("dest-a")],
        3600,
    );
    db.create_slot(&slot).await.unwrap();
    slot.id.as_str().to_string()
}

fn status_cmd(config_path: &str) -> Command {
    let mut cmd = Command::cargo_bin("synd-status").unwrap();
    cmd.env("SYNDICAST_CONFIG", config_path);
    cmd
}

#[tokio::test]
async fn test_slots_json_on_empty_database() {
    let (_temp, config_path, db_path) = setup_test_env();
    let _db = Database::new(&db_path).await.unwrap();

    status_cmd(&config_path)
        .args(["slots", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}

#[tokio::test]
async fn test_slots_text_output_lists_created_slot() {
    let (_temp, config_path, db_path) = setup_test_env();
    let slot_id = seed_slot(&db_path).await;

    status_cmd(&config_path)
        .arg("slots")
        .assert()
        .success()
        .stdout(predicate::str::contains(&slot_id))
        .stdout(predicate::str::contains("due"));
}

#[tokio::test]
async fn test_pause_and_resume_round_trip() {
    let (_temp, config_path, db_path) = setup_test_env();
    let slot_id = seed_slot(&db_path).await;

    status_cmd(&config_path)
        .args(["pause", &slot_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("paused"));

    status_cmd(&config_path)
        .arg("slots")
        .assert()
        .success()
        .stdout(predicate::str::contains("paused"));

    status_cmd(&config_path)
        .args(["resume", &slot_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("resumed"));
}

#[tokio::test]
async fn test_pause_unknown_slot_is_invalid_input() {
    let (_temp, config_path, db_path) = setup_test_env();
    let _db = Database::new(&db_path).await.unwrap();

    status_cmd(&config_path)
        .args(["pause", "no-such-slot"])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("no such slot"));
}

#[tokio::test]
async fn test_invalid_format_is_rejected() {
    let (_temp, config_path, db_path) = setup_test_env();
    let _db = Database::new(&db_path).await.unwrap();

    status_cmd(&config_path)
        .args(["slots", "--format", "yaml"])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("Invalid format"));
}
