use assert_cmd::cargo_bin;
use std::process::Command;
use tempfile::tempdir;

mod common;

#[test]
fn test_bulk_script() {
    let dir = tempdir().unwrap();
    let script = dir.path().join("bulk.jsonl");
    common::generate_script(&script, 1_000).expect("Failed to generate script");

    let output = Command::new(cargo_bin!("shoutout"))
        .arg(&script)
        .env("RUST_LOG", "warn")
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success(), "Binary failed to process bulk script");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let paid = stdout.lines().filter(|l| l.contains(",APPROVED,PAID,")).count();
    assert_eq!(paid, 1_000);
}

#[cfg(feature = "storage-rocksdb")]
#[test]
fn test_bulk_script_db() {
    let dir = tempdir().unwrap();
    let script = dir.path().join("bulk.jsonl");
    common::generate_script(&script, 200).expect("Failed to generate script");

    let output = Command::new(cargo_bin!("shoutout"))
        .arg(&script)
        .arg("--db-path")
        .arg(dir.path().join("db"))
        .env("RUST_LOG", "warn")
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success(), "Binary failed to process bulk script");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.lines().filter(|l| l.contains(",APPROVED,PAID,")).count(), 200);
}
