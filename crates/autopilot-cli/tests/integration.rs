#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

fn autopilot(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("autopilot").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("AUTOPILOT_CONFIG")
        .env_remove("AUTOPILOT_SIGNING_KEY")
        .env_remove("RUST_LOG");
    cmd
}

fn init_config(dir: &TempDir) {
    autopilot(dir)
        .args(["config", "init", "--agent-id", "agent-1"])
        .assert()
        .success();
}

const MANIFEST: &str = r#"{
  "jobId": "job-1",
  "assignmentId": "asg-1",
  "bidId": "bid-1",
  "agentId": "agent-1",
  "deliverableUrl": "https://files.example/job-1.tar.gz",
  "artifactHash": "abc123",
  "createdAt": "2026-03-01T12:00:00.000Z",
  "metadata": {"lang": "rust", "Size": 3}
}"#;

const MANIFEST_REORDERED: &str = r#"{
  "metadata": {"Size": 3, "lang": "rust"},
  "createdAt": "2026-03-01T12:00:00.000Z",
  "artifactHash": "abc123",
  "deliverableUrl": "https://files.example/job-1.tar.gz",
  "agentId": "agent-1",
  "bidId": "bid-1",
  "assignmentId": "asg-1",
  "jobId": "job-1"
}"#;

fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn stdout_of(cmd: &mut Command) -> String {
    let out = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(out).unwrap().trim().to_string()
}

// ---------------------------------------------------------------------------
// autopilot manifest
// ---------------------------------------------------------------------------

#[test]
fn canonical_form_ignores_key_order() {
    let dir = TempDir::new().unwrap();
    write(&dir, "a.json", MANIFEST);
    write(&dir, "b.json", MANIFEST_REORDERED);

    let a = stdout_of(autopilot(&dir).args(["manifest", "canonicalize", "a.json"]));
    let b = stdout_of(autopilot(&dir).args(["manifest", "canonicalize", "b.json"]));

    assert_eq!(a, b);
    assert!(!a.contains(' '), "canonical form has no whitespace: {a}");
    assert!(a.starts_with(r#"{"agentId":"agent-1","artifactHash":"abc123""#));
}

#[test]
fn hash_is_stable_hex() {
    let dir = TempDir::new().unwrap();
    write(&dir, "m.json", MANIFEST);
    write(&dir, "r.json", MANIFEST_REORDERED);

    let first = stdout_of(autopilot(&dir).args(["manifest", "hash", "m.json"]));
    let second = stdout_of(autopilot(&dir).args(["manifest", "hash", "r.json"]));

    assert_eq!(first, second);
    assert_eq!(first.len(), 64);
    assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn sign_then_verify_round_trip() {
    let dir = TempDir::new().unwrap();
    write(&dir, "m.json", MANIFEST);

    let signed = stdout_of(
        autopilot(&dir)
            .args(["manifest", "sign", "m.json", "--signer-id", "worker-7"])
            .env("AUTOPILOT_SIGNING_KEY", "secret"),
    );
    let envelope: serde_json::Value = serde_json::from_str(&signed).unwrap();
    assert_eq!(envelope["signature"]["algorithm"], "hmac-sha256");
    assert_eq!(envelope["signature"]["signerId"], "worker-7");
    write(&dir, "signed.json", &signed);

    autopilot(&dir)
        .args(["manifest", "verify", "signed.json"])
        .env("AUTOPILOT_SIGNING_KEY", "secret")
        .assert()
        .success()
        .stdout(predicate::str::contains("valid"));

    autopilot(&dir)
        .args(["manifest", "verify", "signed.json", "--signing-key", "other"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("invalid"));
}

#[test]
fn verify_rejects_tampered_manifest() {
    let dir = TempDir::new().unwrap();
    write(&dir, "m.json", MANIFEST);
    let signed = stdout_of(
        autopilot(&dir)
            .args(["manifest", "sign", "m.json"])
            .env("AUTOPILOT_SIGNING_KEY", "secret"),
    );
    let mut envelope: serde_json::Value = serde_json::from_str(&signed).unwrap();
    envelope["manifest"]["deliverableUrl"] = "https://evil.example/x".into();
    write(&dir, "tampered.json", &envelope.to_string());

    autopilot(&dir)
        .args(["manifest", "verify", "tampered.json", "--signing-key", "secret"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("signature does not match"));
}

#[test]
fn sign_requires_a_key() {
    let dir = TempDir::new().unwrap();
    write(&dir, "m.json", MANIFEST);
    autopilot(&dir)
        .args(["manifest", "sign", "m.json"])
        .assert()
        .failure();
}

#[test]
fn commit_depends_on_signer_id() {
    let dir = TempDir::new().unwrap();
    write(&dir, "m.json", MANIFEST);

    let run = |signer: &str| {
        stdout_of(
            autopilot(&dir)
                .args(["manifest", "commit", "m.json", "--signer-id", signer])
                .env("AUTOPILOT_SIGNING_KEY", "secret"),
        )
    };

    assert_eq!(run("a"), run("a"));
    assert_ne!(run("a"), run("b"));
    assert_eq!(run("a").len(), 64);
}

#[test]
fn bytewise_key_order_from_config() {
    let dir = TempDir::new().unwrap();
    write(&dir, "m.json", MANIFEST);
    write(&dir, "autopilot.yaml", "agent_id: agent-1\nkey_order: bytewise\n");

    let canonical = stdout_of(autopilot(&dir).args(["manifest", "canonicalize", "m.json"]));

    // Bytewise puts "Size" before "lang"; collated order does not.
    assert!(canonical.contains(r#""metadata":{"Size":3,"lang":"rust"}"#), "{canonical}");
}

#[test]
fn malformed_manifest_reports_file() {
    let dir = TempDir::new().unwrap();
    write(&dir, "bad.json", "{\"jobId\": 1");
    autopilot(&dir)
        .args(["manifest", "hash", "bad.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("bad.json"));
}

// ---------------------------------------------------------------------------
// autopilot config
// ---------------------------------------------------------------------------

#[test]
fn config_init_writes_defaults() {
    let dir = TempDir::new().unwrap();
    init_config(&dir);

    let yaml = std::fs::read_to_string(dir.path().join("autopilot.yaml")).unwrap();
    let value: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(value["agent_id"].as_str(), Some("agent-1"));
    assert_eq!(value["tick_interval_secs"].as_u64(), Some(120));

    autopilot(&dir)
        .args(["config", "init", "--agent-id", "again"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn config_validate_clean() {
    let dir = TempDir::new().unwrap();
    init_config(&dir);
    autopilot(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid"));
}

#[test]
fn config_validate_reports_errors() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "autopilot.yaml",
        "agent_id: ''\ntick_interval_secs: 0\nsettlement:\n  near_price_usd: -1\n",
    );
    autopilot(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("[error] agent_id must not be empty"))
        .stdout(predicate::str::contains("tick_interval_secs"));
}

#[test]
fn config_show_json() {
    let dir = TempDir::new().unwrap();
    init_config(&dir);
    let out = stdout_of(autopilot(&dir).args(["config", "show", "--json"]));
    let value: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(value["store"]["backend"], "json");
    assert_eq!(value["policy"]["fail_closed"], false);
}

#[test]
fn missing_config_is_reported() {
    let dir = TempDir::new().unwrap();
    autopilot(&dir)
        .args(["config", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("config not found"));
}

// ---------------------------------------------------------------------------
// autopilot state
// ---------------------------------------------------------------------------

fn seed_state(dir: &TempDir) {
    std::fs::create_dir_all(dir.path().join(".autopilot")).unwrap();
    write(
        dir,
        ".autopilot/state.json",
        r#"{
  "autopilot:bid-marker:job-b": "2026-03-02T00:00:00.000Z",
  "autopilot:bid-marker:job-a": "2026-03-01T00:00:00.000Z",
  "autopilot:settlement-cursor": "2026-02-28T00:00:00.000Z",
  "autopilot:submit-state:job-a:bid-1": {"attempts": 2}
}"#,
    );
}

#[test]
fn state_keys_filters_by_prefix() {
    let dir = TempDir::new().unwrap();
    init_config(&dir);
    seed_state(&dir);

    let out = stdout_of(autopilot(&dir).args(["state", "keys", "autopilot:bid-marker:"]));
    assert_eq!(
        out.lines().collect::<Vec<_>>(),
        vec!["autopilot:bid-marker:job-a", "autopilot:bid-marker:job-b"]
    );

    let all = stdout_of(autopilot(&dir).args(["state", "keys", "--json"]));
    let keys: Vec<String> = serde_json::from_str(&all).unwrap();
    assert_eq!(keys.len(), 4);
}

#[test]
fn state_get_and_del() {
    let dir = TempDir::new().unwrap();
    init_config(&dir);
    seed_state(&dir);

    let out = stdout_of(autopilot(&dir).args(["state", "get", "autopilot:submit-state:job-a:bid-1"]));
    let value: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(value["attempts"], 2);

    autopilot(&dir)
        .args(["state", "del", "autopilot:settlement-cursor"])
        .assert()
        .success();
    autopilot(&dir)
        .args(["state", "get", "autopilot:settlement-cursor"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("key not found"));
}

#[test]
fn state_markers_table() {
    let dir = TempDir::new().unwrap();
    init_config(&dir);
    seed_state(&dir);

    autopilot(&dir)
        .args(["state", "markers"])
        .assert()
        .success()
        .stdout(predicate::str::contains("JOB"))
        .stdout(predicate::str::contains("job-a  2026-03-01T00:00:00.000Z"));
}

#[test]
fn state_markers_empty_store() {
    let dir = TempDir::new().unwrap();
    init_config(&dir);
    autopilot(&dir)
        .args(["state", "markers"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No bid markers."));
    assert!(!dir.path().join(".autopilot/state.json").exists());
}

#[test]
fn state_works_with_sqlite_backend() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "autopilot.yaml",
        "agent_id: agent-1\nstore:\n  backend: sqlite\n  path: state.db\n",
    );
    autopilot(&dir)
        .args(["state", "keys"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
    assert!(dir.path().join("state.db").exists());
}
