//! Integration tests for cadence-queue list and show

use assert_cmd::Command;
use libcadence::{Checkback, Database, MetricsSnapshot, ScheduledPost, TargetPlatform};
use libcadence::types::MetricValues;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn setup_test_env() -> (TempDir, String, String) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    let db_path = temp_dir.path().join("posts.db");

    fs::write(
        &config_path,
        format!(
            "[database]\npath = \"{}\"\n",
            db_path.to_string_lossy().replace('\\', "\\\\")
        ),
    )
    .unwrap();

    (
        temp_dir,
        config_path.to_string_lossy().to_string(),
        db_path.to_string_lossy().to_string(),
    )
}

fn queue(config_path: &str) -> Command {
    let mut cmd = Command::cargo_bin("cadence-queue").unwrap();
    cmd.env("CADENCE_CONFIG", config_path).env_remove("CADENCE_DB_PATH");
    cmd
}

/// One pending post and one published post with a snapshot
async fn seed(db_path: &str) -> (String, String) {
    let db = Database::new(db_path).await.unwrap();
    let now = chrono::Utc::now().timestamp();

    let pending = ScheduledPost::new(
        "Pending caption".to_string(),
        TargetPlatform::Instagram,
        now + 3600,
    );
    db.create_post(&pending).await.unwrap();

    let published = ScheduledPost::new(
        "Published caption".to_string(),
        TargetPlatform::Tiktok,
        now - 7200,
    );
    db.create_post(&published).await.unwrap();
    let claimed = db.claim_post(&published.id, now - 7200).await.unwrap().unwrap();
    let claimed_at = claimed.claimed_at.unwrap();
    db.mark_published(&published.id, claimed_at, "ext-42", now - 7200, now - 3600)
        .await
        .unwrap();
    db.insert_snapshot(&MetricsSnapshot::new(
        published.id.clone(),
        Checkback::OneHour,
        now - 3600,
        MetricValues {
            views: 1500,
            likes: 120,
            comments: 8,
            shares: 3,
        },
    ))
    .await
    .unwrap();

    (pending.id, published.id)
}

#[tokio::test]
async fn test_list_text() {
    let (_temp_dir, config_path, db_path) = setup_test_env();
    let (pending_id, published_id) = seed(&db_path).await;

    queue(&config_path)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains(&pending_id))
        .stdout(predicate::str::contains(&published_id))
        .stdout(predicate::str::contains("Pending caption"));
}

#[tokio::test]
async fn test_list_filters_by_status() {
    let (_temp_dir, config_path, db_path) = setup_test_env();
    let (pending_id, published_id) = seed(&db_path).await;

    queue(&config_path)
        .args(["list", "--status", "published"])
        .assert()
        .success()
        .stdout(predicate::str::contains(&published_id))
        .stdout(predicate::str::contains(&pending_id).not());
}

#[tokio::test]
async fn test_list_json() {
    let (_temp_dir, config_path, db_path) = setup_test_env();
    let (pending_id, _) = seed(&db_path).await;

    let output = queue(&config_path)
        .args(["list", "--status", "pending", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let posts = json.as_array().unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0]["id"], pending_id.as_str());
    assert_eq!(posts[0]["platform"], "instagram");
    assert_eq!(posts[0]["status"], "pending");
}

#[test]
fn test_list_empty_queue() {
    let (_temp_dir, config_path, _db_path) = setup_test_env();

    queue(&config_path)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn test_list_rejects_bad_format_and_status() {
    let (_temp_dir, config_path, _db_path) = setup_test_env();

    queue(&config_path)
        .args(["list", "--format", "yaml"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Invalid format"));

    queue(&config_path)
        .args(["list", "--status", "queued"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Unknown post status"));
}

#[tokio::test]
async fn test_show_published_post_with_metrics() {
    let (_temp_dir, config_path, db_path) = setup_test_env();
    let (_, published_id) = seed(&db_path).await;

    queue(&config_path)
        .args(["show", &published_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("ext-42"))
        .stdout(predicate::str::contains("views=1500"));

    let output = queue(&config_path)
        .args(["show", &published_id, "--format", "json"])
        .output()
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["status"], "published");
    assert_eq!(json["snapshots"][0]["checkback"], "1h");
    assert_eq!(json["snapshots"][0]["likes"], 120);
}

#[test]
fn test_show_missing_post() {
    let (_temp_dir, config_path, _db_path) = setup_test_env();

    queue(&config_path)
        .args(["show", &uuid::Uuid::new_v4().to_string()])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Not found"));
}
