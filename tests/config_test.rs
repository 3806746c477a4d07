use pkom_bridge::config::{Config, Mode, RangePolicy};
use serial_test::serial;
use std::path::PathBuf;

const ENV_VARS: &[&str] = &["MQTT_HOST", "MQTT_PORT", "DATABASE_URL", "PKOM_PASSWORD"];

fn clear_env() {
    for v in ENV_VARS {
        std::env::remove_var(v);
    }
}

fn write_temp(contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("pkom-bridge-{}.yaml", uuid::Uuid::new_v4()));
    std::fs::write(&path, contents).unwrap();
    path
}

const LIVE: &str = r#"
mode: live
device:
  id: "abc123"
  user: "owner@example.org"
  password: "$(PKOM_PASSWORD)"
mqtt:
  host: "broker.local"
  qos: 1
setpoints:
  out_of_range: clamp
"#;

#[test]
#[serial]
fn test_config_loading() {
    clear_env();
    std::env::set_var("PKOM_PASSWORD", "hunter2");
    let path = write_temp(LIVE);

    let cfg = Config::load(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    clear_env();

    assert_eq!(cfg.mode, Mode::Live);
    assert_eq!(cfg.poll_interval_secs, 60);
    assert_eq!(cfg.reconnect_backoff_secs, 10);
    assert_eq!(cfg.snapshot_every_ticks, 60);
    assert_eq!(cfg.device.password, "hunter2");
    assert_eq!(cfg.device.host(), "abc123.remote.lscontrol.dk");
    let mqtt = cfg.mqtt.unwrap();
    assert_eq!(mqtt.port, 1883);
    assert_eq!(mqtt.qos, 1);
    assert_eq!(mqtt.prefix, "pkom4");
    assert_eq!(cfg.setpoints.out_of_range, RangePolicy::Clamp);
}

#[test]
#[serial]
fn test_env_overrides() {
    clear_env();
    std::env::set_var("PKOM_PASSWORD", "x");
    std::env::set_var("MQTT_HOST", "mqtt.override");
    std::env::set_var("MQTT_PORT", "8883");

    let cfg = Config::parse(LIVE).unwrap();
    clear_env();

    let mqtt = cfg.mqtt.unwrap();
    assert_eq!(mqtt.host, "mqtt.override");
    assert_eq!(mqtt.port, 8883);
}

#[test]
#[serial]
fn test_archive_mode_from_database_url() {
    clear_env();
    std::env::set_var("DATABASE_URL", "postgres://hp@localhost/hp");
    let raw = r#"
mode: archive
device: { id: "abc123", user: "u", password: "p" }
"#;
    let cfg = Config::parse(raw).unwrap();
    clear_env();

    assert_eq!(cfg.mode, Mode::Archive);
    let ts = cfg.timescale.unwrap();
    assert_eq!(ts.url, "postgres://hp@localhost/hp");
    assert_eq!(ts.table, "heatpump_measurements");
    assert_eq!(cfg.setpoints.out_of_range, RangePolicy::Reject);
}

#[test]
#[serial]
fn test_invalid_configs_are_rejected() {
    clear_env();
    let no_sink = "mode: archive\ndevice: { id: a, user: u, password: p }\n";
    assert!(Config::parse(no_sink).is_err());

    let zero_interval =
        "mode: live\npoll_interval_secs: 0\ndevice: { id: a, user: u, password: p }\nmqtt: { host: h }\n";
    assert!(Config::parse(zero_interval).is_err());

    std::env::set_var("MQTT_PORT", "not-a-port");
    let live = "mode: live\ndevice: { id: a, user: u, password: p }\nmqtt: { host: h }\n";
    assert!(Config::parse(live).is_err());
    clear_env();
}
