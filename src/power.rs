use crate::heatpump::ScaledReading;
use crate::registry::{PointKind, Registry};

pub const TOTAL_POWER: &str = "Power.Total";

/// A value computed from several readings of the same tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedAggregate {
    pub name: &'static str,
    pub value: f64,
}

/// Sums the readings whose datapoint is tagged as a power component.
pub fn total_power(registry: &Registry, readings: &[ScaledReading]) -> DerivedAggregate {
    let value = readings
        .iter()
        .filter(|r| {
            registry
                .datapoint(r.name)
                .is_ok_and(|d| d.kind == PointKind::PowerComponent)
        })
        .map(|r| r.value)
        .sum();
    DerivedAggregate {
        name: TOTAL_POWER,
        value,
    }
}
