mod common;

use std::path::PathBuf;

use keepass_bridge::config::{BridgeConfig, CONFIG_ENV, HOST_ENV};
use keepass_bridge::transport::{MAX_FROM_HOST, MAX_TO_HOST};
use keepass_bridge::BridgeError;
use serial_test::serial;

#[test]
fn defaults_match_browser_limits() {
    let cfg = BridgeConfig::default();
    assert_eq!(cfg.limits.max_outgoing_bytes, MAX_TO_HOST);
    assert_eq!(cfg.limits.max_incoming_bytes, MAX_FROM_HOST);
    assert_eq!(cfg.host.program, None);
    assert!(cfg.host.args.is_empty());
    assert_eq!(cfg.log.level, "warn");
    assert_eq!(cfg.log.format, "text");
}

#[test]
fn partial_file_overrides_only_named_keys() {
    let cfg = BridgeConfig::from_toml(
        r#"
        [host]
        program = "/opt/keepass/host"
        args = ["--db", "main.kdbx"]

        [limits]
        max_incoming_bytes = 4096
        "#,
    )
    .unwrap();
    assert_eq!(cfg.host.program, Some(PathBuf::from("/opt/keepass/host")));
    assert_eq!(cfg.host.args, vec!["--db", "main.kdbx"]);
    assert_eq!(cfg.limits.max_incoming_bytes, 4096);
    assert_eq!(cfg.limits.max_outgoing_bytes, MAX_TO_HOST);
    assert_eq!(cfg.log.level, "warn");
}

#[test]
fn unknown_keys_are_rejected() {
    let err = BridgeConfig::from_toml("[limits]\nmax_bytes = 3\n").expect_err("typo");
    assert!(matches!(err, BridgeError::Config(_)));
}

#[test]
fn zero_limit_is_rejected() {
    let err = BridgeConfig::from_toml("[limits]\nmax_outgoing_bytes = 0\n").expect_err("zero");
    assert!(matches!(err, BridgeError::Config(_)));
}

#[test]
fn connector_requires_a_program() {
    let err = BridgeConfig::default().connector().expect_err("no program");
    assert!(matches!(err, BridgeError::Config(_)));
}

#[test]
fn load_reports_missing_file() {
    let td = tempfile::tempdir().unwrap();
    let err = BridgeConfig::load(&td.path().join("absent.toml")).expect_err("missing");
    assert!(err.to_string().contains("absent.toml"));
}

#[test]
#[serial]
fn from_env_reads_file_then_host_override() {
    let td = tempfile::tempdir().unwrap();
    let path = td.path().join("bridge.toml");
    std::fs::write(
        &path,
        "[host]\nprogram = \"/from/file\"\n\n[log]\nlevel = \"debug\"\n",
    )
    .unwrap();

    {
        let _env = common::EnvGuard::set(&[(CONFIG_ENV, path.to_string_lossy().to_string())]);
        let _unset = common::EnvGuard::unset(&[HOST_ENV]);
        let cfg = BridgeConfig::from_env().unwrap();
        assert_eq!(cfg.host.program, Some(PathBuf::from("/from/file")));
        assert_eq!(cfg.log.level, "debug");
    }

    let _env = common::EnvGuard::set(&[
        (CONFIG_ENV, path.to_string_lossy().to_string()),
        (HOST_ENV, "/from/env".to_string()),
    ]);
    let cfg = BridgeConfig::from_env().unwrap();
    assert_eq!(cfg.host.program, Some(PathBuf::from("/from/env")));
}

#[test]
#[serial]
fn from_env_without_vars_uses_defaults() {
    let _env = common::EnvGuard::unset(&[CONFIG_ENV, HOST_ENV]);
    assert_eq!(BridgeConfig::from_env().unwrap(), BridgeConfig::default());
}
