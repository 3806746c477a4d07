//! One poll of the unit: every setpoint and datapoint plus the values
//! derived from them.

use crate::device::Session;
use crate::error::Result;
use crate::heatpump::{HeatPump, ScaledReading};
use crate::power::{total_power, DerivedAggregate};
use crate::registry::{Namespace, PointKind, Registry};
use crate::status::{
    decompose, describe_malfunction, StatusBitFact, MALFUNCTION, STATUS_BITS,
};
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct TickData {
    pub setpoints: Vec<ScaledReading>,
    pub datapoints: Vec<ScaledReading>,
    pub status: Vec<StatusBitFact>,
    pub power: DerivedAggregate,
}

impl TickData {
    /// Builds a tick from raw readings, adding the status flags and power total.
    pub fn derive(
        registry: &Registry,
        setpoints: Vec<ScaledReading>,
        datapoints: Vec<ScaledReading>,
    ) -> Self {
        let status = datapoints
            .iter()
            .filter(|r| {
                registry
                    .datapoint(r.name)
                    .is_ok_and(|d| d.kind == PointKind::StatusBits)
            })
            .flat_map(|r| decompose(r.raw, STATUS_BITS))
            .collect();
        let power = total_power(registry, &datapoints);
        Self {
            setpoints,
            datapoints,
            status,
            power,
        }
    }

    /// Non-zero malfunction code read this tick.
    pub fn malfunction(&self) -> Option<i64> {
        self.datapoints
            .iter()
            .find(|r| r.name == MALFUNCTION)
            .map(|r| r.raw)
            .filter(|&code| code != 0)
    }

    /// Logs the malfunction code, decoded where known.
    pub fn warn_on_malfunction(&self) {
        if let Some(code) = self.malfunction() {
            match describe_malfunction(code) {
                Some(text) => warn!(code, "heat pump malfunction: {text}"),
                None => warn!(code, "heat pump malfunction"),
            }
        }
    }

    /// Number of values in the tick, the power total included.
    pub fn point_count(&self) -> usize {
        self.setpoints.len() + self.datapoints.len() + self.status.len() + 1
    }
}

/// Reads both namespaces, one batched call each.
pub async fn collect<S: Session>(pump: &mut HeatPump<S>) -> Result<TickData> {
    let setpoints = pump.read_all(Namespace::Setpoint).await?;
    let datapoints = pump.read_all(Namespace::Datapoint).await?;
    Ok(TickData::derive(pump.registry(), setpoints, datapoints))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_derive_adds_status_and_power() {
        let registry = Registry::builtin().unwrap();
        let dp = |name: &'static str, raw: i64| {
            let def = registry.datapoint(name).unwrap();
            ScaledReading {
                name,
                raw,
                value: def.to_engineering(raw),
            }
        };
        let datapoints = vec![
            dp("StatusBits", 0x0205),
            dp("Power.HeatPump", 1000),
            dp("Power.HotWater", 55),
            dp("Temperature.Room", 2100),
        ];
        let tick = TickData::derive(&registry, Vec::new(), datapoints);

        assert_eq!(tick.power.value, 105.5);
        let on: Vec<&str> = tick
            .status
            .iter()
            .filter(|f| f.value == 1)
            .map(|f| f.bit.name)
            .collect();
        assert_eq!(on, vec!["Status.Water", "Status.Heating", "Status.FastHeating"]);
        assert_eq!(tick.status.len(), STATUS_BITS.len());
        assert_eq!(tick.point_count(), 4 + STATUS_BITS.len() + 1);
    }

    #[test]
    fn test_malfunction_code() {
        let registry = Registry::builtin().unwrap();
        let reading = |raw: i64| ScaledReading {
            name: MALFUNCTION,
            raw,
            value: raw as f64,
        };
        let tick = TickData::derive(&registry, Vec::new(), vec![reading(256)]);
        assert_eq!(tick.malfunction(), Some(256));

        let tick = TickData::derive(&registry, Vec::new(), vec![reading(0)]);
        assert_eq!(tick.malfunction(), None);

        let tick = TickData::derive(&registry, Vec::new(), Vec::new());
        assert_eq!(tick.malfunction(), None);
    }
}
