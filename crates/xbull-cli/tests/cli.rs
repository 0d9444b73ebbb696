use assert_cmd::Command;

/// Run `xbull` with a config path that does not exist, so the user's own
/// `~/.xbull/config.toml` never leaks into the test.
fn xbull(dir: &tempfile::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("xbull").unwrap();
    cmd.arg("--config")
        .arg(dir.path().join("config.toml"))
        .args(["--watchdog-ms", "20"]);
    cmd
}

fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn stderr(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

#[test]
fn url_prints_popup_url() {
    let dir = tempfile::tempdir().unwrap();
    let assert = xbull(&dir).arg("url").assert().success();
    let url = stdout(assert.get_output());
    assert!(url.starts_with("https://wallet.xbull.app/connect?public="), "{url}");
    assert!(url.contains("&session="), "{url}");
}

#[test]
fn connect_returns_wallet_address() {
    let dir = tempfile::tempdir().unwrap();
    let assert = xbull(&dir)
        .args(["connect", "--address", "GTESTADDRESS"])
        .assert()
        .success();
    assert_eq!(stdout(assert.get_output()), "GTESTADDRESS");
}

#[test]
fn rejected_connect_reports_wallet_rejection() {
    let dir = tempfile::tempdir().unwrap();
    let assert = xbull(&dir).args(["connect", "--reject"]).assert().failure();
    assert!(stderr(assert.get_output()).contains("Request rejected from the wallet"));
}

#[test]
fn sign_through_popup() {
    let dir = tempfile::tempdir().unwrap();
    let assert = xbull(&dir)
        .args(["sign", "--xdr", "AAAA", "--public-key", "GSIGNER"])
        .assert()
        .success();
    assert_eq!(stdout(assert.get_output()), "AAAA:signed-by:GSIGNER");
}

#[test]
fn abandoned_sign_is_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let assert = xbull(&dir)
        .args(["sign", "--xdr", "AAAA", "--abandon"])
        .assert()
        .failure();
    assert!(stderr(assert.get_output()).contains("cancelled"));
}

#[test]
fn extension_target_uses_the_bridge() {
    let dir = tempfile::tempdir().unwrap();
    let assert = xbull(&dir)
        .args(["--target", "extension", "connect", "--address", "GEXT"])
        .assert()
        .success();
    assert_eq!(stdout(assert.get_output()), "GEXT");

    let assert = xbull(&dir)
        .args(["--target", "extension", "connect", "--reject"])
        .assert()
        .failure();
    assert!(stderr(assert.get_output()).contains("User declined access"));
}

#[test]
fn invalid_wallet_url_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let assert = xbull(&dir)
        .args(["--wallet-url", "nowhere", "url"])
        .assert()
        .failure();
    assert!(stderr(assert.get_output()).contains("config error"));
}
