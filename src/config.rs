use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mode: Mode,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_reconnect_backoff")]
    pub reconnect_backoff_secs: u64,
    /// Every n-th tick the archive re-emits all points, changed or not.
    #[serde(default = "default_snapshot_every")]
    pub snapshot_every_ticks: u64,
    pub device: DeviceConfig,
    pub mqtt: Option<MqttConfig>,
    pub timescale: Option<TimescaleConfig>,
    #[serde(default)]
    pub setpoints: SetpointConfig,
}

fn default_poll_interval() -> u64 {
    60
}
fn default_reconnect_backoff() -> u64 {
    10
}
fn default_snapshot_every() -> u64 {
    60
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Republish everything to MQTT every tick and accept setpoint writes.
    Live,
    /// Store changed values in TimescaleDB.
    Archive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device id; `.remote.lscontrol.dk` is appended when it has no domain.
    pub id: String,
    pub user: String,
    pub password: String,
    /// Directory holding the Nabto client library
    #[serde(default = "default_library_dir")]
    pub library_dir: String,
    #[serde(default = "default_home_dir")]
    pub home_dir: String,
    /// RPC interface definition (XML)
    #[serde(default = "default_interface_file")]
    pub interface_file: String,
}

fn default_library_dir() -> String {
    "libs".into()
}
fn default_home_dir() -> String {
    ".home".into()
}
fn default_interface_file() -> String {
    "unabto_queries.xml".into()
}

impl DeviceConfig {
    pub fn host(&self) -> String {
        if self.id.contains('.') {
            self.id.clone()
        } else {
            format!("{}.remote.lscontrol.dk", self.id)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: Option<u64>,
    pub clean_session: Option<bool>,
    /// 0, 1 or 2; used for outgoing publishes
    #[serde(default)]
    pub qos: u8,
    /// Topic prefix, without trailing slash
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_mqtt_port() -> u16 {
    1883
}
fn default_prefix() -> String {
    "pkom4".into()
}

impl MqttConfig {
    fn with_host(host: String) -> Self {
        Self {
            host,
            port: default_mqtt_port(),
            username: None,
            password: None,
            keep_alive_secs: None,
            clean_session: None,
            qos: 0,
            prefix: default_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimescaleConfig {
    pub url: String,
    #[serde(default = "default_table")]
    pub table: String,
    pub max_connections: Option<u32>,
}

fn default_table() -> String {
    "heatpump_measurements".into()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangePolicy {
    /// Refuse writes outside the setpoint's limits.
    #[default]
    Reject,
    /// Write the nearest limit instead.
    Clamp,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetpointConfig {
    #[serde(default)]
    pub out_of_range: RangePolicy,
}

impl Config {
    /// Load YAML from disk, substitute $(VAR)/${VAR} with env vars, then parse.
    /// Afterwards MQTT_HOST, MQTT_PORT and DATABASE_URL override the file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, anyhow::Error> {
        let expanded = expand_env_placeholders(raw)?;
        let mut cfg: Self = serde_yaml::from_str(&expanded)?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) -> Result<(), anyhow::Error> {
        if let Ok(host) = std::env::var("MQTT_HOST") {
            match self.mqtt.as_mut() {
                Some(m) => m.host = host,
                None => self.mqtt = Some(MqttConfig::with_host(host)),
            }
        }
        if let Ok(port) = std::env::var("MQTT_PORT") {
            let port: u16 = port
                .parse()
                .with_context(|| format!("invalid MQTT_PORT: {port}"))?;
            if let Some(m) = self.mqtt.as_mut() {
                m.port = port;
            }
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            match self.timescale.as_mut() {
                Some(t) => t.url = url,
                None => {
                    self.timescale = Some(TimescaleConfig {
                        url,
                        table: default_table(),
                        max_connections: None,
                    })
                }
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        match self.mode {
            Mode::Live => anyhow::ensure!(
                self.mqtt.is_some(),
                "live mode needs an `mqtt` section (or MQTT_HOST)"
            ),
            Mode::Archive => anyhow::ensure!(
                self.timescale.is_some(),
                "archive mode needs a `timescale` section (or DATABASE_URL)"
            ),
        }
        anyhow::ensure!(self.poll_interval_secs > 0, "poll_interval_secs must be > 0");
        anyhow::ensure!(
            self.reconnect_backoff_secs > 0,
            "reconnect_backoff_secs must be > 0"
        );
        anyhow::ensure!(
            self.snapshot_every_ticks > 0,
            "snapshot_every_ticks must be > 0"
        );
        Ok(())
    }
}

/// Expand $(VAR) and ${VAR} placeholders using environment variables.
/// "$$" becomes a literal "$".
fn expand_env_placeholders(input: &str) -> Result<String, anyhow::Error> {
    let mut out = String::with_capacity(input.len());
    let mut it = input.chars().peekable();

    while let Some(c) = it.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let close = match it.peek().copied() {
            Some('$') => {
                it.next();
                out.push('$');
                continue;
            }
            Some('(') => ')',
            Some('{') => '}',
            _ => {
                out.push('$');
                continue;
            }
        };
        it.next();
        let var = read_until(&mut it, close)
            .with_context(|| format!("unterminated env placeholder: missing '{close}'"))?;
        let val = std::env::var(&var)
            .with_context(|| format!("missing environment variable: {}", var))?;
        out.push_str(&val);
    }

    Ok(out)
}

/// Read characters until `end`, consuming the delimiter.
fn read_until<I>(it: &mut std::iter::Peekable<I>, end: char) -> Option<String>
where
    I: Iterator<Item = char>,
{
    let mut buf = String::new();
    for ch in it.by_ref() {
        if ch == end {
            return Some(buf);
        }
        buf.push(ch);
    }
    None
}
