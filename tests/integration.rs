//! CLI integration tests driving the compiled `bookforge` binary with
//! memory store backends and a scratch SQLite registry.
//!
//! The memory graph/vector stores live and die with each process, so these
//! tests assert on the registry-backed behavior that survives across
//! invocations (skip decisions, version records, stats) and on command
//! output shapes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn bookforge_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("bookforge");
    path
}

fn chapter_json(textbook: &str, number: u32, text_suffix: &str) -> String {
    format!(
        r#"{{
  "textbook_id": "{textbook}",
  "number": {number},
  "title": "Chapter {number}",
  "sections": [
    {{
      "number": "{number}.1",
      "title": "First Section",
      "paragraphs": [
        {{ "number": "{number}.1.1", "text": "Opening paragraph {text_suffix}", "page": 1, "bounds": [0, 0, 100, 20] }},
        {{ "number": "{number}.1.2", "text": "Closing paragraph {text_suffix}", "page": 2, "bounds": [0, 0, 100, 20] }}
      ],
      "children": []
    }}
  ]
}}"#
    )
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let chapters_dir = root.join("chapters");
    fs::create_dir_all(&chapters_dir).unwrap();
    fs::write(
        chapters_dir.join("ch1.json"),
        chapter_json("physics", 1, "about units."),
    )
    .unwrap();
    fs::write(
        chapters_dir.join("ch2.json"),
        chapter_json("physics", 2, "about motion."),
    )
    .unwrap();

    let config_content = format!(
        r#"[metadata]
path = "{}/data/bookforge.sqlite"

[graph]
backend = "memory"

[vector]
backend = "memory"

[embedding]
provider = "ngram"
dims = 64

[ingestion]
workers = 2

[versioning]
prefix = "version"
keep_count = 5
"#,
        root.display()
    );

    let config_path = config_dir.join("bookforge.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_bookforge(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = bookforge_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run bookforge binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_bookforge(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_bookforge(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_bookforge(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_directory() {
    let (tmp, config_path) = setup_test_env();

    run_bookforge(&config_path, &["init"]);
    let chapters = tmp.path().join("chapters");
    let (stdout, stderr, success) =
        run_bookforge(&config_path, &["ingest", chapters.to_str().unwrap()]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("written:  2"));
    assert!(stdout.contains("units:    4 ok, 0 failed"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_reingest_skips_unchanged() {
    let (tmp, config_path) = setup_test_env();

    run_bookforge(&config_path, &["init"]);
    let chapters = tmp.path().join("chapters");
    run_bookforge(&config_path, &["ingest", chapters.to_str().unwrap()]);

    // second run: fingerprints match the registry, nothing is re-written
    let (stdout, _, success) =
        run_bookforge(&config_path, &["ingest", chapters.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("skipped:  2"));
    assert!(stdout.contains("written:  0"));

    // a changed chapter is re-written and bumps its version
    fs::write(
        tmp.path().join("chapters/ch1.json"),
        chapter_json("physics", 1, "about revised units."),
    )
    .unwrap();
    let (stdout, _, success) =
        run_bookforge(&config_path, &["ingest", chapters.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("written:  1"));
    assert!(stdout.contains("skipped:  1"));
    assert!(stdout.contains("v2"));
}

#[test]
fn test_ingest_dry_run_writes_nothing() {
    let (tmp, config_path) = setup_test_env();

    run_bookforge(&config_path, &["init"]);
    let chapters = tmp.path().join("chapters");
    let (stdout, _, success) = run_bookforge(
        &config_path,
        &["ingest", chapters.to_str().unwrap(), "--dry-run"],
    );
    assert!(success);
    assert!(stdout.contains("(dry-run)"));
    assert!(stdout.contains("2 units"));

    // a real ingest afterwards still writes both chapters
    let (stdout, _, _) = run_bookforge(&config_path, &["ingest", chapters.to_str().unwrap()]);
    assert!(stdout.contains("written:  2"));
}

#[test]
fn test_version_lifecycle_across_processes() {
    let (tmp, config_path) = setup_test_env();

    run_bookforge(&config_path, &["init"]);
    let chapters = tmp.path().join("chapters");
    run_bookforge(&config_path, &["ingest", chapters.to_str().unwrap()]);

    let (stdout, stderr, success) =
        run_bookforge(&config_path, &["version", "create", "-d", "nightly"]);
    assert!(success, "create failed: {stderr}");
    let version_id = stdout
        .lines()
        .find_map(|l| l.strip_prefix("created version "))
        .expect("version id in output")
        .trim()
        .to_string();
    assert!(version_id.starts_with("version_"));
    assert!(stdout.contains("status:       pending"));

    let (stdout, _, success) = run_bookforge(&config_path, &["version", "commit", &version_id]);
    assert!(success);
    assert!(stdout.contains("committed"));

    let (stdout, _, success) = run_bookforge(&config_path, &["version", "list"]);
    assert!(success);
    assert!(stdout.contains(&version_id));
    assert!(stdout.contains("committed"));

    // the operation log survives in the registry
    let (stdout, _, success) =
        run_bookforge(&config_path, &["version", "list", "--log", &version_id]);
    assert!(success);
    assert!(stdout.contains("create_version"));
}

#[test]
fn test_rollback_of_committed_fails() {
    let (tmp, config_path) = setup_test_env();

    run_bookforge(&config_path, &["init"]);
    let chapters = tmp.path().join("chapters");
    run_bookforge(&config_path, &["ingest", chapters.to_str().unwrap()]);

    let (stdout, _, _) = run_bookforge(&config_path, &["version", "create", "-d", "keeper"]);
    let version_id = stdout
        .lines()
        .find_map(|l| l.strip_prefix("created version "))
        .unwrap()
        .trim()
        .to_string();
    run_bookforge(&config_path, &["version", "commit", &version_id]);

    let (_, stderr, success) =
        run_bookforge(&config_path, &["version", "rollback", &version_id]);
    assert!(!success);
    assert!(stderr.contains("state machine violation"));
}

#[test]
fn test_stats_reports_corpus() {
    let (tmp, config_path) = setup_test_env();

    run_bookforge(&config_path, &["init"]);
    let chapters = tmp.path().join("chapters");
    run_bookforge(&config_path, &["ingest", chapters.to_str().unwrap()]);

    let (stdout, _, success) = run_bookforge(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Chapters:   2"));
    assert!(stdout.contains("Units:      4"));
    assert!(stdout.contains("physics: 2 chapters, 4 units"));
}

#[test]
fn test_baseline_is_idempotent_across_processes() {
    let (tmp, config_path) = setup_test_env();

    run_bookforge(&config_path, &["init"]);
    let chapters = tmp.path().join("chapters");
    run_bookforge(&config_path, &["ingest", chapters.to_str().unwrap()]);

    let (stdout1, _, success1) = run_bookforge(&config_path, &["version", "baseline"]);
    assert!(success1);
    let (stdout2, _, success2) = run_bookforge(&config_path, &["version", "baseline"]);
    assert!(success2);

    let id1 = stdout1
        .lines()
        .find_map(|l| l.strip_prefix("baseline version: "))
        .unwrap();
    let id2 = stdout2
        .lines()
        .find_map(|l| l.strip_prefix("baseline version: "))
        .unwrap();
    assert_eq!(id1, id2);
    assert!(id1.starts_with("v1_baseline_"));
}

#[test]
fn test_rejects_bad_config() {
    let (tmp, _config_path) = setup_test_env();
    let bad = tmp.path().join("config/bad.toml");
    fs::write(
        &bad,
        r#"[metadata]
path = "x.sqlite"

[graph]
backend = "nonsense"

[vector]
backend = "memory"
"#,
    )
    .unwrap();

    let binary = bookforge_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(bad.to_str().unwrap())
        .arg("stats")
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unknown graph backend"));
}
