use assert_cmd::Command;
use predicates::prelude::*;

fn cli() -> Command {
    let mut cmd = Command::cargo_bin("beinvest-extract").expect("binary built");
    cmd.env_remove("ANTHROPIC_API_KEY")
        .env_remove("OPENAI_API_KEY")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_brokers_lists_bundled_definitions() {
    cli()
        .args([
            "brokers",
            "--config",
            concat!(env!("CARGO_MANIFEST_DIR"), "/data/brokers.yaml"),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Bolero"))
        .stdout(predicate::str::contains("Keytrade Bank"))
        .stdout(predicate::str::contains("instruction"));
}

#[test]
fn test_cache_clear_reports_removed_entries() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("a.json"), "{}").expect("write");
    std::fs::write(dir.path().join("b.json"), "{}").expect("write");

    cli()
        .args(["cache", "clear", "--cache-dir"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 2 entries"));

    assert!(!dir.path().join("a.json").exists());
}

#[test]
fn test_extract_missing_input_fails() {
    cli()
        .args(["extract", "--broker", "Bolero", "--input", "/nonexistent/fees.txt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("input file does not exist"));
}

#[test]
fn test_extract_without_credentials_is_unavailable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("bolero.txt");
    std::fs::write(&input, "ETF trades: flat EUR 15 per order").expect("write");

    cli()
        .args(["extract", "--broker", "Bolero", "--no-cache", "--input"])
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("extraction unavailable"))
        .stderr(predicate::str::contains("openai"));
}
