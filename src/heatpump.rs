//! Reading and writing named points through one device session.

use crate::config::RangePolicy;
use crate::device::{self, Connector, Session};
use crate::error::{AppError, Result};
use crate::registry::{Namespace, PointDefinition, Registry, RAW_MAX, RAW_MIN};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// One point's value in engineering units, with the raw value it came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaledReading {
    pub name: &'static str,
    pub raw: i64,
    pub value: f64,
}

impl ScaledReading {
    fn new(def: &PointDefinition, raw: i64) -> Self {
        Self {
            name: def.name,
            raw,
            value: def.to_engineering(raw),
        }
    }
}

/// Owns the device session; all reads and writes go through here.
pub struct HeatPump<S> {
    session: S,
    registry: Arc<Registry>,
    range_policy: RangePolicy,
}

impl<S: Session> HeatPump<S> {
    pub fn new(session: S, registry: Arc<Registry>, range_policy: RangePolicy) -> Self {
        Self {
            session,
            registry,
            range_policy,
        }
    }

    /// Opens a session and checks it answers a ping, retrying every `backoff`
    /// until both succeed.
    pub async fn connect<C>(
        connector: &C,
        registry: Arc<Registry>,
        range_policy: RangePolicy,
        backoff: Duration,
    ) -> Self
    where
        C: Connector<Session = S>,
    {
        loop {
            match connector.open_session().await {
                Ok(session) => {
                    let mut pump = Self::new(session, Arc::clone(&registry), range_policy);
                    match pump.ping().await {
                        Ok(response) => {
                            info!(%response, "device session established");
                            return pump;
                        }
                        Err(e) => warn!(error = %e, "device did not answer ping"),
                    }
                }
                Err(e) => warn!(error = %e, "cannot open device session"),
            }
            info!("retrying device connection in {}s", backoff.as_secs());
            tokio::time::sleep(backoff).await;
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub async fn ping(&mut self) -> Result<Value> {
        device::ping(&mut self.session).await
    }

    pub async fn read_one(&mut self, namespace: Namespace, name: &str) -> Result<ScaledReading> {
        let def = *self.registry.lookup(namespace, name)?;
        let raw = device::read_values(&mut self.session, namespace, def.read, 1)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NoData(name.to_string()))?;
        Ok(ScaledReading::new(&def, raw))
    }

    /// Reads all `names` in one round trip. The result is in the order of `names`.
    pub async fn read_many(
        &mut self,
        namespace: Namespace,
        names: &[&str],
    ) -> Result<Vec<ScaledReading>> {
        let defs = names
            .iter()
            .map(|n| self.registry.lookup(namespace, n).copied())
            .collect::<Result<Vec<_>>>()?;
        let addresses: Vec<_> = defs.iter().map(|d| d.read).collect();
        let raw = device::read_list(&mut self.session, namespace, &addresses).await?;
        Ok(defs
            .iter()
            .zip(raw)
            .map(|(def, raw)| ScaledReading::new(def, raw))
            .collect())
    }

    pub async fn read_datapoint(&mut self, name: &str) -> Result<ScaledReading> {
        self.read_one(Namespace::Datapoint, name).await
    }

    pub async fn read_datapoints(&mut self, names: &[&str]) -> Result<Vec<ScaledReading>> {
        self.read_many(Namespace::Datapoint, names).await
    }

    pub async fn read_setpoint(&mut self, name: &str) -> Result<ScaledReading> {
        self.read_one(Namespace::Setpoint, name).await
    }

    pub async fn read_setpoints(&mut self, names: &[&str]) -> Result<Vec<ScaledReading>> {
        self.read_many(Namespace::Setpoint, names).await
    }

    /// Reads every point of a namespace in dictionary order.
    pub async fn read_all(&mut self, namespace: Namespace) -> Result<Vec<ScaledReading>> {
        let names: Vec<&'static str> = self
            .registry
            .points(namespace)
            .iter()
            .map(|p| p.name)
            .collect();
        self.read_many(namespace, &names).await
    }

    /// Writes a setpoint given in engineering units and returns the raw value
    /// sent. The write is not retried on failure.
    pub async fn write_setpoint(&mut self, name: &str, value: f64) -> Result<i64> {
        let def = *self.registry.setpoint(name)?;
        if !value.is_finite() {
            return Err(AppError::Other(anyhow::anyhow!(
                "{name}: {value} is not a finite number"
            )));
        }
        let value = match def.limits {
            Some(l) if value < l.min || value > l.max => match self.range_policy {
                RangePolicy::Reject => {
                    return Err(AppError::OutOfRange {
                        name: name.to_string(),
                        value,
                        min: l.min,
                        max: l.max,
                    })
                }
                RangePolicy::Clamp => {
                    let clamped = value.clamp(l.min, l.max);
                    warn!(setpoint = %name, requested = value, clamped, "setpoint clamped to limits");
                    clamped
                }
            },
            _ => value,
        };
        let raw = def.to_raw(value).ok_or_else(|| AppError::OutOfRange {
            name: name.to_string(),
            value,
            min: def.to_engineering(RAW_MIN),
            max: def.to_engineering(RAW_MAX),
        })?;
        let at = def.write_address();
        device::write_value(&mut self.session, at, raw).await?;
        info!(setpoint = %name, value, raw, address = at.address, obj = at.obj, "setpoint written");
        Ok(raw)
    }
}
