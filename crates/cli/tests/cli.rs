use assert_cmd::Command;

fn shelf() -> Command {
    let mut cmd = Command::cargo_bin("shelf").unwrap();
    // Keep local config files and env overrides out of the way.
    cmd.env("SHELF_CONFIG_DIR", env!("CARGO_MANIFEST_DIR"))
        .env("SHELF_ENV", "local")
        .env_remove("SHELF_CIRCULATION__LOAN_PERIOD_DAYS")
        .env_remove("SHELF_CIRCULATION__FINE_PER_DAY");
    cmd
}

#[test]
fn fine_after_twenty_days_is_twelve() {
    let output = shelf()
        .args([
            "fine",
            "--issued",
            "2025-01-01T00:00:00Z",
            "--at",
            "2025-01-21T00:00:00Z",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8(output.stdout).unwrap().trim(), "12");
}

#[test]
fn fine_honours_configured_rate() {
    let output = shelf()
        .env("SHELF_CIRCULATION__FINE_PER_DAY", "5")
        .args([
            "fine",
            "--issued",
            "2025-01-01T00:00:00Z",
            "--at",
            "2025-01-21T00:00:00Z",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8(output.stdout).unwrap().trim(), "30");
}

#[test]
fn fine_rejects_malformed_dates() {
    shelf()
        .args(["fine", "--issued", "last tuesday"])
        .assert()
        .failure();
}

#[test]
fn audit_of_a_fresh_memory_store_is_clean() {
    shelf()
        .env("SHELF_DATABASE__BACKEND", "memory")
        .arg("audit")
        .assert()
        .success();
}
