use std::process::Command;

#[test]
fn init_creates_valid_toml() {
    let dir = tempfile::tempdir().unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_duckgate"))
        .arg("init")
        .current_dir(dir.path())
        .output()
        .unwrap();

    assert!(
        output.status.success(),
        "duckgate init failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let config_path = dir.path().join(".duckgate.toml");
    assert!(config_path.exists(), ".duckgate.toml should exist");

    let content = std::fs::read_to_string(&config_path).unwrap();
    assert!(content.contains("[pipeline]"));
    assert!(content.contains("[[backends]]"));

    // The generated file must load through the same path the CLI uses.
    let _value: toml::Value = toml::from_str(&content).unwrap();
    let config = duckgate_core::DuckgateConfig::load(Some(&config_path), dir.path()).unwrap();
    assert_eq!(config.pipeline.block_on, duckgate_core::BlockOn::Critical);
    assert_eq!(config.backends.len(), 1);
    assert_eq!(config.embedding.provider, "local");
}

#[test]
fn init_refuses_if_exists() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".duckgate.toml"), "# existing").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_duckgate"))
        .arg("init")
        .current_dir(dir.path())
        .output()
        .unwrap();

    assert!(!output.status.success());
    let content = std::fs::read_to_string(dir.path().join(".duckgate.toml")).unwrap();
    assert_eq!(content, "# existing");
}

#[test]
fn scan_exits_zero_for_empty_diff() {
    let dir = tempfile::tempdir().unwrap();
    let patch = dir.path().join("empty.patch");
    std::fs::write(&patch, "").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_duckgate"))
        .args(["scan", "--no-cache", "--file"])
        .arg(&patch)
        .env("OPENAI_API_KEY", "sk-test")
        .current_dir(dir.path())
        .output()
        .unwrap();

    assert!(
        output.status.success(),
        "scan failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("duckgate: 0 units, no findings"));
}
