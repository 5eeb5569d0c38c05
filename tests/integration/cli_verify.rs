#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

const PAGE_SIZE: usize = 1024;

fn seed(name: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join(format!("{name}.gin"));
    cargo_bin_cmd!("gincheck")
        .args(["seed-demo", "--page-size", "1024", "--entries", "300", "--salt", "7"])
        .arg(&path)
        .assert()
        .success();
    (dir, path)
}

fn verify_json(path: &Path, extra: &[&str]) -> (Option<i32>, Value) {
    let output = cargo_bin_cmd!("gincheck")
        .args(["--format", "json", "verify"])
        .args(extra)
        .arg(path)
        .output()
        .expect("run gincheck");
    let json = serde_json::from_slice(&output.stdout).expect("valid json");
    (output.status.code(), json)
}

#[test]
fn help_lists_subcommands() {
    let output = cargo_bin_cmd!("gincheck")
        .arg("--help")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    for command in ["verify", "seed-demo", "inspect"] {
        assert!(text.contains(command), "{text}");
    }
}

#[test]
fn seeded_index_verifies() {
    let (_dir, path) = seed("clean");
    let (code, json) = verify_json(&path, &[]);
    assert_eq!(code, Some(0));
    assert_eq!(json["relation"], "clean");
    assert_eq!(json["skipped"], false);
    assert!(json["counts"]["posting_trees"].as_u64().unwrap_or(0) > 0);
    assert!(json["counts"]["entry_tuples"].as_u64().unwrap_or(0) >= 300);

    let (code, json) = verify_json(&path, &["--no-postings"]);
    assert_eq!(code, Some(0));
    assert_eq!(json["counts"]["posting_trees"], 0);
}

#[test]
fn text_output_lists_sections() {
    let (_dir, path) = seed("text");
    let output = cargo_bin_cmd!("gincheck")
        .args(["--color", "never", "verify"])
        .arg(&path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    assert!(text.contains("Entry tree"), "{text}");
    assert!(text.contains("Posting data"), "{text}");
    assert!(text.contains("index \"text\" verified"), "{text}");
}

#[test]
fn flipped_byte_exits_with_corruption_status() {
    let (_dir, path) = seed("flipped");
    let mut bytes = fs::read(&path).expect("read index");
    // Inside the root page's opaque area, covered by the checksum.
    bytes[PAGE_SIZE + 40] ^= 0xff;
    fs::write(&path, &bytes).expect("write index");

    let (code, json) = verify_json(&path, &[]);
    assert_eq!(code, Some(2));
    assert_eq!(json["corrupted"], true);
    assert_eq!(json["block"], 1);
    let message = json["message"].as_str().expect("message");
    assert!(message.contains("checksum"), "{message}");

    cargo_bin_cmd!("gincheck")
        .args(["--color", "never", "verify"])
        .arg(&path)
        .assert()
        .code(2);
}

#[test]
fn seed_demo_refuses_to_overwrite() {
    let (_dir, path) = seed("twice");
    cargo_bin_cmd!("gincheck")
        .args(["seed-demo", "--page-size", "1024"])
        .arg(&path)
        .assert()
        .failure()
        .code(1);
}

#[test]
fn missing_file_is_an_error_not_corruption() {
    let dir = TempDir::new().expect("tempdir");
    cargo_bin_cmd!("gincheck")
        .arg("verify")
        .arg(dir.path().join("absent.gin"))
        .assert()
        .code(1);
}

#[test]
fn inspect_decodes_metapage_and_root() {
    let (_dir, path) = seed("inspect");
    let output = cargo_bin_cmd!("gincheck")
        .args(["--color", "never", "inspect", "--page", "0"])
        .arg(&path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    assert!(text.contains("Meta"), "{text}");
    assert!(text.contains("key types"), "{text}");

    let output = cargo_bin_cmd!("gincheck")
        .args(["--format", "json", "inspect", "--page", "1", "--dump-bytes", "64"])
        .arg(&path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["page"], 1);
    assert_eq!(json["kind"], "Entry");
    assert_eq!(json["salt"], 7);
    assert_eq!(json["hex"].as_array().map(Vec::len), Some(2));
}
