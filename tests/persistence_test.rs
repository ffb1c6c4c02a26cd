#![cfg(feature = "storage-rocksdb")]

use assert_cmd::cargo_bin;
use std::io::Write;
use std::process::Command;
use tempfile::{NamedTempFile, tempdir};

fn script(lines: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
    file
}

#[test]
fn test_rocksdb_persistence_recovery() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    // 1. First run: order paid and accepted
    let first = script(&[
        r#"{"action":"checkout","order_number":"SO-1","customer_id":"fan-1","celebrity_id":"celeb-1","amount":"299.00","recipient_name":"Sam"}"#,
        r#"{"action":"payment_succeeded","order_number":"SO-1","event_id":"evt_pay_1"}"#,
        r#"{"action":"accept","order_number":"SO-1","celebrity_id":"celeb-1"}"#,
    ]);
    let output1 = Command::new(cargo_bin!("shoutout"))
        .arg(first.path())
        .arg("--db-path")
        .arg(&db_path)
        .output()
        .expect("Failed to execute command");
    assert!(output1.status.success());
    let stdout1 = String::from_utf8_lossy(&output1.stdout);
    assert!(stdout1.contains("SO-1,CONFIRMED,SUCCEEDED,,PENDING,299.00,,,usd,CONFIRMED,0,0.00"));

    // 2. Second run: replayed payment is a duplicate, the order carries on
    let second = script(&[
        r#"{"action":"register_payout_account","celebrity_id":"celeb-1","account_id":"acct_1"}"#,
        r#"{"action":"payment_succeeded","order_number":"SO-1","event_id":"evt_pay_1"}"#,
        r#"{"action":"deliver","order_number":"SO-1","celebrity_id":"celeb-1","video_url":"https://cdn/v.mp4"}"#,
        r#"{"action":"approve","order_number":"SO-1","customer_id":"fan-1"}"#,
        r#"{"action":"transfer_paid","order_number":"SO-1"}"#,
    ]);
    let output2 = Command::new(cargo_bin!("shoutout"))
        .arg(second.path())
        .arg("--db-path")
        .arg(&db_path)
        .output()
        .expect("Failed to execute command");
    assert!(output2.status.success());
    let stdout2 = String::from_utf8_lossy(&output2.stdout);
    let stderr2 = String::from_utf8_lossy(&output2.stderr);
    assert!(!stderr2.contains("Error"), "{stderr2}");
    assert!(stdout2.contains(
        "SO-1,COMPLETED,SUCCEEDED,APPROVED,PAID,299.00,59.80,239.20,usd,COMPLETED,0,239.20"
    ));
}

#[test]
fn test_duplicate_order_number_across_runs() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");
    let checkout = script(&[
        r#"{"action":"checkout","order_number":"SO-1","customer_id":"fan-1","celebrity_id":"celeb-1","amount":"10.00","recipient_name":"Sam"}"#,
    ]);

    for expect_error in [false, true] {
        let output = Command::new(cargo_bin!("shoutout"))
            .arg(checkout.path())
            .arg("--db-path")
            .arg(&db_path)
            .output()
            .expect("Failed to execute command");
        assert!(output.status.success());
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert_eq!(stderr.contains("already exists"), expect_error);
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert_eq!(stdout.matches("SO-1,").count(), 1);
    }
}
