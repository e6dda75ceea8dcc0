use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn save_flag_writes_config_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.yaml");

    Command::new(env!("CARGO_BIN_EXE_fotolenta"))
        .arg("--save-init-data")
        .arg("query_id=abc&user=%7B%7D")
        .arg("--user-id")
        .arg("42")
        .arg("--config-file")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Saved credentials to"));

    let contents = std::fs::read_to_string(&path).expect("config written");
    assert!(contents.contains("query_id=abc&user=%7B%7D"));
    assert!(contents.contains("42"));
}

#[test]
fn save_flag_rejects_empty_payload() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.yaml");

    Command::new(env!("CARGO_BIN_EXE_fotolenta"))
        .arg("--save-init-data")
        .arg("   ")
        .arg("--config-file")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("init_data"));

    assert!(!path.exists());
}

#[test]
fn save_flag_preserves_existing_settings() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.yaml");
    std::fs::write(
        &path,
        "api:\n  base_url: \"https://photo.example.net\"\n",
    )
    .expect("seed config");

    Command::new(env!("CARGO_BIN_EXE_fotolenta"))
        .arg("--save-init-data")
        .arg("query_id=fresh")
        .arg("--config-file")
        .arg(&path)
        .assert()
        .success();

    let contents = std::fs::read_to_string(&path).expect("config written");
    assert!(contents.contains("https://photo.example.net"));
    assert!(contents.contains("query_id=fresh"));
}
