//! Live mode: republish every value to MQTT on each tick and apply setpoint
//! writes requested on `<prefix>/<path>/set`.

use crate::collect::{collect, TickData};
use crate::config::RangePolicy;
use crate::device::Connector;
use crate::error::{AppError, Result};
use crate::heatpump::HeatPump;
use crate::mqtt::{Publisher, SetRequest};
use crate::registry::Registry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Topic path → setpoint name.
pub const SETPOINT_TOPICS: &[(&str, &str)] = &[
    ("setting/water/temperature", "HotWater.Temperature"),
    ("setting/water/e-heating", "HotWater.E.Heating"),
    ("setting/water/fast-heating", "HotWater.Fast.Heating"),
    ("setting/ventilation/temperature/normal", "Temperature.Normal"),
    ("setting/ventilation/temperature/cooling", "Temperature.ActiveCooling"),
    ("setting/operating-mode", "OperatingMode"),
];

/// Topic path → datapoint name.
pub const DATAPOINT_TOPICS: &[(&str, &str)] = &[
    ("energy", "Energy.Total"),
    ("energy/cooling", "Energy.Cooling"),
    ("energy/heating", "Energy.Heating"),
    ("energy/water", "Energy.HotWater"),
    ("energy/ventilation", "Energy.Ventilation"),
    ("power/heat-pump", "Power.HeatPump"),
    ("power/water", "Power.HotWater"),
    ("power/ventilation", "Power.Ventilation"),
    ("water/temperature/center", "Temperature.Water.Center"),
    ("water/temperature/bottom", "Temperature.Water.Bottom"),
    ("ventilation/temperature/room", "Temperature.Room"),
    ("ventilation/temperature/supply", "Temperature.Air.Supply"),
    ("ventilation/temperature/extract", "Temperature.Air.Extract"),
    ("ventilation/temperature/outdoor", "Temperature.Air.Outdoor"),
    ("ventilation/temperature/exhaust", "Temperature.Air.Exhaust"),
    ("ventilation/level", "Ventilation.Level"),
    ("ventilation/volume/supply", "Ventilation.Supply"),
    ("ventilation/volume/extract", "Ventilation.Extract"),
    ("co2", "CO2"),
    ("status", "StatusBits"),
];

pub const POWER_TOPIC: &str = "power";

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub payload: String,
}

pub fn topic(prefix: &str, path: &str) -> String {
    format!("{prefix}/{path}")
}

/// Topics the bridge subscribes to for setpoint writes.
pub fn set_topics(prefix: &str) -> Vec<String> {
    SETPOINT_TOPICS
        .iter()
        .map(|(path, _)| format!("{}/set", topic(prefix, path)))
        .collect()
}

/// Resolves `<prefix>/<path>/set` to the setpoint it controls.
pub fn setpoint_for_set_topic(prefix: &str, topic: &str) -> Option<&'static str> {
    let path = topic
        .strip_prefix(prefix)?
        .strip_prefix('/')?
        .strip_suffix("/set")?;
    SETPOINT_TOPICS
        .iter()
        .find(|(p, _)| *p == path)
        .map(|(_, name)| *name)
}

/// Parses a text-encoded number from a set request.
pub fn parse_set_payload(payload: &[u8]) -> Result<f64> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| AppError::Other(anyhow::anyhow!("payload is not utf-8: {e}")))?
        .trim();
    let value: f64 = text
        .parse()
        .map_err(|e| AppError::Other(anyhow::anyhow!("payload {text:?} is not a number: {e}")))?;
    if !value.is_finite() {
        return Err(AppError::Other(anyhow::anyhow!(
            "payload {text:?} is not a finite number"
        )));
    }
    Ok(value)
}

/// Everything published for one tick, setpoints first. The status bitmask is
/// published raw and as individual flags.
pub fn tick_messages(prefix: &str, tick: &TickData) -> Vec<Message> {
    let setpoints: HashMap<&str, f64> = tick.setpoints.iter().map(|r| (r.name, r.value)).collect();
    let datapoints: HashMap<&str, f64> =
        tick.datapoints.iter().map(|r| (r.name, r.value)).collect();
    let mut out = Vec::with_capacity(tick.point_count());
    let mut push = |path: &str, payload: String| {
        out.push(Message {
            topic: topic(prefix, path),
            payload,
        })
    };

    for (path, name) in SETPOINT_TOPICS {
        if let Some(v) = setpoints.get(name) {
            push(*path, v.to_string());
        }
    }
    for (path, name) in DATAPOINT_TOPICS {
        let Some(v) = datapoints.get(name) else {
            continue;
        };
        if *path == "status" {
            for f in &tick.status {
                push(f.bit.path, f.value.to_string());
            }
        }
        push(*path, v.to_string());
    }
    push(POWER_TOPIC, tick.power.value.to_string());
    out
}

pub struct LiveBridge<C, P> {
    connector: C,
    registry: Arc<Registry>,
    publisher: P,
    prefix: String,
    range_policy: RangePolicy,
    poll_interval: Duration,
    backoff: Duration,
}

impl<C: Connector, P: Publisher> LiveBridge<C, P> {
    pub fn new(
        connector: C,
        registry: Arc<Registry>,
        publisher: P,
        prefix: String,
        range_policy: RangePolicy,
        poll_interval: Duration,
        backoff: Duration,
    ) -> Self {
        Self {
            connector,
            registry,
            publisher,
            prefix,
            range_policy,
            poll_interval,
            backoff,
        }
    }

    /// Runs until the process is stopped. Set requests are drained between
    /// ticks, so the device session is never used by two callers at once.
    /// After a device failure the next read waits for the next scheduled tick.
    pub async fn run(&self, mut requests: mpsc::Receiver<SetRequest>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            info!("connecting to device");
            let mut pump = HeatPump::connect(
                &self.connector,
                Arc::clone(&self.registry),
                self.range_policy,
                self.backoff,
            )
            .await;

            loop {
                let outcome = tokio::select! {
                    _ = ticker.tick() => self.tick(&mut pump).await,
                    Some(req) = requests.recv() => self.handle_set(&mut pump, req).await,
                };
                if let Err(e) = outcome {
                    if e.is_device_failure() {
                        warn!(error = %e, "device failure; reconnecting");
                        break;
                    }
                    warn!(error = %e, "tick failed");
                }
            }
        }
    }

    async fn tick(&self, pump: &mut HeatPump<C::Session>) -> Result<()> {
        let data = collect(pump).await?;
        data.warn_on_malfunction();
        let messages = tick_messages(&self.prefix, &data);
        let total = messages.len();
        let mut failed = 0usize;
        for m in messages {
            if let Err(e) = self.publisher.publish(&m.topic, m.payload).await {
                failed += 1;
                debug!(topic = %m.topic, error = %e, "publish failed");
            }
        }
        if failed > 0 {
            return Err(AppError::Mqtt(format!("{failed} of {total} publishes failed")));
        }
        info!(published = total, "tick complete");
        Ok(())
    }

    /// Applies one set request. Only device failures are returned; bad
    /// requests and rejected writes are logged.
    async fn handle_set(&self, pump: &mut HeatPump<C::Session>, req: SetRequest) -> Result<()> {
        let Some(name) = setpoint_for_set_topic(&self.prefix, &req.topic) else {
            debug!(topic = %req.topic, "ignoring message on unknown topic");
            return Ok(());
        };
        let value = match parse_set_payload(&req.payload) {
            Ok(v) => v,
            Err(e) => {
                warn!(topic = %req.topic, error = %e, "invalid set request");
                return Ok(());
            }
        };
        info!(topic = %req.topic, setpoint = %name, value, "set request");
        match pump.write_setpoint(name, value).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_device_failure() => {
                error!(setpoint = %name, error = %e, "setpoint write failed");
                Err(e)
            }
            Err(e) => {
                error!(setpoint = %name, error = %e, "setpoint write rejected");
                Ok(())
            }
        }
    }
}
