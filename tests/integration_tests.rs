//! Integration tests for nftsync
//!
//! These tests drive whole apply/commit cycles through the mock nft script
//! (`tests/mock_nft.sh`), which echoes its input and needs no privileges:
//! ```bash
//! cargo test --test integration_tests
//! ```
//!
//! Scripts containing `mock-fail` make the mock exit 1, and scripts containing
//! `mock-sleep` make it hang.

#![allow(clippy::uninlined_format_args)]

use nftsync::core::description::TableDescription;
use nftsync::core::probe;
use nftsync::core::script::update_script;
use nftsync::{ChainType, Error, Family, Hook, Nft, NftConfig, Policy, Table};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

/// Get the path to the mock nft script
fn get_mock_nft_path() -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("mock_nft.sh");
    path
}

fn mock_config() -> NftConfig {
    NftConfig::new(get_mock_nft_path().to_string_lossy())
}

fn mock_nft() -> Nft {
    Nft::locate(&mock_config()).unwrap()
}

/// Points the process-wide probe at the mock.
///
/// Every test in this file that uses the probe enables the same mock, so the
/// memoized result is the same whichever test gets there first.
fn enable_mock() {
    assert!(probe::enable_with(&mock_config()));
}

/// Table T/ip with base chain F (filter, forward, priority 10) holding `counter`.
fn forward_table() -> Table {
    let mut table = Table::new(Family::IPv4, "T");
    table
        .base_chain("F", ChainType::Filter, Hook::Forward, 10)
        .unwrap()
        .append_rule(0, "counter")
        .unwrap();
    table
}

#[test]
fn test_mock_nft_script_exists() {
    let mock_path = get_mock_nft_path();
    assert!(
        mock_path.exists(),
        "Mock nft script should exist at {:?}",
        mock_path
    );

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = std::fs::metadata(&mock_path).unwrap();
        let permissions = metadata.permissions();
        assert!(
            permissions.mode() & 0o111 != 0,
            "Mock script should be executable"
        );
    }
}

#[tokio::test]
async fn test_apply_then_delete_chain() {
    let nft = mock_nft();
    let mut table = forward_table();

    let report = table.apply_with(&nft).await.unwrap();
    let script = &report.script;
    let declare = script.find("table ip T {").unwrap();
    let flush_table = script.find("flush table ip T").unwrap();
    let flush_chain = script.find("flush chain ip T F").unwrap();
    let populate = script.find("\t\tcounter").unwrap();
    assert!(declare < flush_table && flush_table < flush_chain && flush_chain < populate);
    assert!(script.contains("type filter hook forward priority 10; policy accept;"));
    assert!(!table.has_pending_changes());

    table.delete_chain("F").unwrap();
    let report = table.apply_with(&nft).await.unwrap();
    assert!(report.script.contains("delete chain ip T F\n"));
    assert!(!report.script.contains("chain F {"));
    assert!(table.pending_chain_deletions().is_empty());
}

#[tokio::test]
async fn test_failed_apply_resends_superset() {
    let nft = mock_nft();
    let mut table = forward_table();
    table
        .chain_mut("F")
        .unwrap()
        .append_rule(5, "mock-fail")
        .unwrap();
    table.interface_vmap("ifaces").add_element("eth0", "accept").unwrap();

    let err = table.apply_with(&nft).await.unwrap_err();
    let failure = err.apply_failure().expect("apply failure details");
    assert!(failure.stderr.contains("syntax error"));
    assert!(failure.numbered_script.contains("flush table ip T"));

    // Fix the bad rule and make one more change; nothing from before is lost
    let chain = table.chain_mut("F").unwrap();
    chain.delete_rule(5, "mock-fail").unwrap();
    chain.set_policy(Policy::Drop).unwrap();

    let report = table.apply_with(&nft).await.unwrap();
    assert!(report.script.contains("flush table ip T"));
    assert!(report.script.contains("\t\tcounter"));
    assert!(report.script.contains("policy drop;"));
    assert!(report.script.contains("add element ip T ifaces { eth0 : accept }"));
    assert!(!table.has_pending_changes());
}

#[tokio::test]
async fn test_reload_after_failure() {
    let nft = mock_nft();
    let mut table = forward_table();
    table.prefix_set("blocked").add_element("mock-fail").unwrap();
    assert!(table.apply_with(&nft).await.is_err());

    table.set_mut("blocked").unwrap().delete_element("mock-fail").unwrap();
    table.set_mut("blocked").unwrap().add_element("198.51.100.0/24").unwrap();

    let report = table.reload_with(&nft).await.unwrap();
    assert!(report.script.starts_with("table ip T {}\ndelete table ip T\n"));
    assert!(report.script.contains("elements = { 198.51.100.0/24 }"));
    assert!(!report.script.contains("mock-fail"));
    assert!(!table.has_pending_changes());

    // Nothing left to do
    assert_eq!(update_script(&table), "table ip T {\n}\n");
}

#[tokio::test]
async fn test_apply_until_cancelled() {
    enable_mock();
    let mut table = forward_table();
    table.get_or_create_chain("slow").append_rule(0, "mock-sleep").unwrap();

    let err = table
        .apply_until(tokio::time::sleep(Duration::from_millis(200)))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert!(table.is_newly_declared());
    assert!(table.chain("slow").unwrap().is_dirty());
}

#[tokio::test]
async fn test_apply_until_completes() {
    enable_mock();
    let mut table = forward_table();

    let report = table
        .apply_until(std::future::pending::<()>())
        .await
        .unwrap();
    assert_eq!(report.stdout, report.script);
    assert!(!table.has_pending_changes());
}

#[tokio::test]
async fn test_apply_with_timeout() {
    enable_mock();
    let mut table = forward_table();
    table.interface_vmap("m").add_element("mock-sleep", "drop").unwrap();

    let err = table
        .apply_with_timeout(Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TimedOut(_)));
    assert!(table.has_pending_changes());

    table.vmap_mut("m").unwrap().delete_element("mock-sleep").unwrap();
    table
        .apply_with_timeout(Duration::from_secs(10))
        .await
        .unwrap();
    assert!(!table.has_pending_changes());
}

#[tokio::test]
async fn test_description_file_apply() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(
        br#"{
            "family": "ip6",
            "name": "containers",
            "chains": [
                {
                    "name": "forward",
                    "base": { "type": "filter", "hook": "forward", "priority": 0, "policy": "drop" },
                    "rules": [
                        { "group": 10, "rule": "iifname vmap @ifaces" },
                        { "group": 0, "rule": "ct state established,related accept" }
                    ]
                },
                { "name": "isolate", "rules": [ { "rule": "drop" } ] }
            ],
            "vmaps": [ { "name": "ifaces", "elements": { "br0": "jump isolate" } } ],
            "sets": [ { "name": "trusted", "elements": [ "2001:db8::/32" ] } ]
        }"#,
    )
    .unwrap();

    let description = TableDescription::load(file.path()).await.unwrap();
    let mut table = description.build().unwrap();
    let report = table.apply_with(&mock_nft()).await.unwrap();

    let script = &report.script;
    assert!(script.contains("policy drop;"));
    assert!(
        script.find("ct state established,related accept").unwrap()
            < script.find("iifname vmap @ifaces").unwrap()
    );
    assert!(script.contains("type ipv6_addr"));
    assert!(script.contains("add element ip6 containers ifaces { br0 : jump isolate }"));
    assert!(script.contains("add element ip6 containers trusted { 2001:db8::/32 }"));
}

#[test]
fn test_cli_render_numbered() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(br#"{ "family": "ip", "name": "T" }"#).unwrap();

    let output = std::process::Command::new(env!("CARGO_BIN_EXE_nftsync"))
        .arg("render")
        .arg(file.path())
        .arg("--numbered")
        .env("RUST_LOG", "off")
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "1:\ttable ip T {\n2:\t}\n3:\tflush table ip T\n"
    );
}

#[test]
fn test_cli_render_rejects_bad_description() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(br#"{ "family": "inet", "name": "T" }"#).unwrap();

    let output = std::process::Command::new(env!("CARGO_BIN_EXE_nftsync"))
        .arg("render")
        .arg(file.path())
        .env("RUST_LOG", "off")
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error:"));
}

#[test]
fn test_cli_apply_failure_prints_script_once() {
    let home = tempfile::tempdir().unwrap();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(
        br#"{ "family": "ip", "name": "T", "chains": [ { "name": "c", "rules": [ { "rule": "mock-fail" } ] } ] }"#,
    )
    .unwrap();

    let output = std::process::Command::new(env!("CARGO_BIN_EXE_nftsync"))
        .arg("apply")
        .arg(file.path())
        .env("NFTSYNC_NFT", get_mock_nft_path())
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("XDG_STATE_HOME", home.path().join("state"))
        .env_remove("RUST_LOG")
        .output()
        .unwrap();
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("nft rejected a rule or element"));
    assert_eq!(stderr.matches(":\t\t\tmock-fail").count(), 1, "{stderr}");
}
