//! Data dictionary for the heat pump unit.
//!
//! Maps symbolic point names to raw `(address, obj)` pairs and the scale that
//! turns a raw register value into its engineering unit. Datapoints and
//! setpoints live in separate namespaces; setpoints may be written through a
//! different address than they are read from.

use crate::error::{AppError, Result};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Datapoint,
    Setpoint,
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Namespace::Datapoint => f.write_str("datapoint"),
            Namespace::Setpoint => f.write_str("setpoint"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub address: u16,
    pub obj: u8,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointKind {
    Measurement,
    /// Raw bitmask, decomposed into status flags.
    StatusBits,
    /// Summed into the total power figure.
    PowerComponent,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointDefinition {
    pub name: &'static str,
    pub read: Address,
    pub write: Option<Address>,
    pub scale: f64,
    pub limits: Option<Limits>,
    pub kind: PointKind,
}

impl PointDefinition {
    pub const fn datapoint(name: &'static str, address: u16, obj: u8, scale: f64) -> Self {
        Self {
            name,
            read: Address { address, obj },
            write: None,
            scale,
            limits: None,
            kind: PointKind::Measurement,
        }
    }

    pub const fn setpoint(
        name: &'static str,
        read: (u16, u8),
        write: (u16, u8),
        scale: f64,
    ) -> Self {
        Self {
            name,
            read: Address {
                address: read.0,
                obj: read.1,
            },
            write: Some(Address {
                address: write.0,
                obj: write.1,
            }),
            scale,
            limits: None,
            kind: PointKind::Measurement,
        }
    }

    pub const fn kind(mut self, kind: PointKind) -> Self {
        self.kind = kind;
        self
    }

    pub const fn limits(mut self, min: f64, max: f64) -> Self {
        self.limits = Some(Limits { min, max });
        self
    }

    /// Address used for writes; falls back to the read address.
    pub fn write_address(&self) -> Address {
        self.write.unwrap_or(self.read)
    }

    /// Scales a raw register value into engineering units.
    pub fn to_engineering(&self, raw: i64) -> f64 {
        match self.divisor() {
            Some(d) => raw as f64 / d,
            None => raw as f64 * self.scale,
        }
    }

    /// Inverse of [`to_engineering`](Self::to_engineering), rounded to the
    /// nearest raw step. `None` when the result does not fit a register.
    pub fn to_raw(&self, value: f64) -> Option<i64> {
        let raw = match self.divisor() {
            Some(d) => value * d,
            None => value / self.scale,
        }
        .round();
        (RAW_MIN as f64..=RAW_MAX as f64)
            .contains(&raw)
            .then_some(raw as i64)
    }

    // Decimal fractions like 0.01 are not exact in binary; dividing by the
    // integral reciprocal keeps 2115 * 0.01 printing as 21.15.
    fn divisor(&self) -> Option<f64> {
        let d = self.scale.recip();
        let rounded = d.round();
        ((d - rounded).abs() < 1e-9 && rounded >= 1.0).then_some(rounded)
    }
}

/// Registers hold signed 32-bit values.
pub const RAW_MIN: i64 = i32::MIN as i64;
pub const RAW_MAX: i64 = i32::MAX as i64;

pub const DATAPOINTS: &[PointDefinition] = &[
    PointDefinition::datapoint("StatusBits", 152, 1, 1.0).kind(PointKind::StatusBits),
    PointDefinition::datapoint("Malfunction", 34, 0, 1.0),
    PointDefinition::datapoint("CO2", 153, 1, 1.0),
    PointDefinition::datapoint("Humidity", 154, 1, 1.0),
    PointDefinition::datapoint("SCOP", 44, 0, 0.01),
    PointDefinition::datapoint("HP.COP", 45, 0, 0.01),
    PointDefinition::datapoint("HP.HeatingPower", 37, 0, 1.0),
    PointDefinition::datapoint("Energy.Total", 65, 0, 1.0),
    PointDefinition::datapoint("Energy.Heating", 64, 0, 1.0),
    PointDefinition::datapoint("Energy.Cooling", 27, 0, 1.0),
    PointDefinition::datapoint("Energy.HotWater", 38, 0, 1.0),
    PointDefinition::datapoint("Energy.Ventilation", 29, 0, 1.0),
    PointDefinition::datapoint("Power.HeatPump", 25, 0, 0.1).kind(PointKind::PowerComponent),
    PointDefinition::datapoint("Power.HotWater", 24, 0, 0.1).kind(PointKind::PowerComponent),
    PointDefinition::datapoint("Power.Ventilation", 26, 0, 0.1).kind(PointKind::PowerComponent),
    PointDefinition::datapoint("Temperature.Room", 19, 0, 0.01),
    PointDefinition::datapoint("Temperature.Air.Supply", 1, 1, 0.01),
    PointDefinition::datapoint("Temperature.Air.Extract", 6, 1, 0.01),
    PointDefinition::datapoint("Temperature.Air.Outdoor", 2, 1, 0.01),
    PointDefinition::datapoint("Temperature.Air.Exhaust", 3, 1, 0.01),
    PointDefinition::datapoint("Temperature.Water.Center", 12, 1, 0.01),
    PointDefinition::datapoint("Temperature.Water.Bottom", 13, 1, 0.01),
    PointDefinition::datapoint("Ventilation.Level", 41, 1, 1.0),
    PointDefinition::datapoint("Ventilation.Supply", 22, 0, 0.1),
    PointDefinition::datapoint("Ventilation.Extract", 23, 0, 0.1),
];

pub const SETPOINTS: &[PointDefinition] = &[
    PointDefinition::setpoint("OperatingMode", (0, 0), (0, 0), 1.0).limits(0.0, 4.0),
    PointDefinition::setpoint("Temperature.Normal", (1, 0), (1, 0), 0.01).limits(15.0, 30.0),
    PointDefinition::setpoint("Temperature.ActiveCooling", (3, 0), (3, 0), 0.01)
        .limits(15.0, 30.0),
    PointDefinition::setpoint("HotWater.Temperature", (15, 1), (15, 0), 0.01).limits(40.0, 60.0),
    PointDefinition::setpoint("HotWater.E.Heating", (21, 1), (21, 0), 1.0).limits(0.0, 1.0),
    PointDefinition::setpoint("HotWater.Fast.Heating", (22, 1), (22, 0), 1.0).limits(0.0, 1.0),
    PointDefinition::setpoint("Ventilation.Balance", (45, 0), (45, 0), 1.0).limits(50.0, 150.0),
    // Filter change countdown in days, raw value in two-hour steps.
    PointDefinition::setpoint("FilterChange", (46, 0), (46, 0), 1.0 / 12.0)
        .limits(0.0, 365.0),
];

#[derive(Debug, Default)]
struct Table {
    points: Vec<PointDefinition>,
    index: HashMap<&'static str, usize>,
}

impl Table {
    fn build(namespace: Namespace, points: &[PointDefinition]) -> Result<Self> {
        let mut table = Table::default();
        for p in points {
            if p.scale == 0.0 || !p.scale.is_finite() {
                return Err(AppError::Config(format!(
                    "{namespace} '{}' has invalid scale {}",
                    p.name, p.scale
                )));
            }
            if let Some(l) = p.limits {
                if l.min > l.max {
                    return Err(AppError::Config(format!(
                        "{namespace} '{}' has inverted limits [{}, {}]",
                        p.name, l.min, l.max
                    )));
                }
            }
            if table.index.insert(p.name, table.points.len()).is_some() {
                return Err(AppError::Config(format!(
                    "duplicate {namespace} '{}'",
                    p.name
                )));
            }
            table.points.push(*p);
        }
        Ok(table)
    }
}

/// Immutable registry of point definitions, built once at startup.
#[derive(Debug)]
pub struct Registry {
    datapoints: Table,
    setpoints: Table,
}

impl Registry {
    pub fn new(datapoints: &[PointDefinition], setpoints: &[PointDefinition]) -> Result<Self> {
        Ok(Self {
            datapoints: Table::build(Namespace::Datapoint, datapoints)?,
            setpoints: Table::build(Namespace::Setpoint, setpoints)?,
        })
    }

    /// The unit's built-in dictionary.
    pub fn builtin() -> Result<Self> {
        Self::new(DATAPOINTS, SETPOINTS)
    }

    pub fn lookup(&self, namespace: Namespace, name: &str) -> Result<&PointDefinition> {
        let table = self.table(namespace);
        table
            .index
            .get(name)
            .map(|&i| &table.points[i])
            .ok_or_else(|| AppError::UnknownPoint {
                namespace,
                name: name.to_string(),
            })
    }

    pub fn datapoint(&self, name: &str) -> Result<&PointDefinition> {
        self.lookup(Namespace::Datapoint, name)
    }

    pub fn setpoint(&self, name: &str) -> Result<&PointDefinition> {
        self.lookup(Namespace::Setpoint, name)
    }

    /// Definitions in table order.
    pub fn points(&self, namespace: Namespace) -> &[PointDefinition] {
        &self.table(namespace).points
    }

    fn table(&self, namespace: Namespace) -> &Table {
        match namespace {
            Namespace::Datapoint => &self.datapoints,
            Namespace::Setpoint => &self.setpoints,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_builtin_dictionary_is_consistent() {
        let registry = Registry::builtin().unwrap();
        for ns in [Namespace::Datapoint, Namespace::Setpoint] {
            for p in registry.points(ns) {
                assert!(p.scale != 0.0, "{} has zero scale", p.name);
                assert_eq!(registry.lookup(ns, p.name).unwrap().read, p.read);
            }
        }
        assert_eq!(registry.points(Namespace::Datapoint).len(), DATAPOINTS.len());
        assert_eq!(registry.points(Namespace::Setpoint).len(), SETPOINTS.len());
    }

    #[test]
    fn test_unknown_name_is_lookup_failure() {
        let registry = Registry::builtin().unwrap();
        let err = registry.datapoint("Temperature.Sauna").unwrap_err();
        assert!(matches!(
            err,
            AppError::UnknownPoint {
                namespace: Namespace::Datapoint,
                ..
            }
        ));
        // namespaces are separate
        assert!(registry.setpoint("Temperature.Room").is_err());
        assert!(registry.datapoint("OperatingMode").is_err());
    }

    #[test]
    fn test_duplicate_and_zero_scale_rejected() {
        let dup = [
            PointDefinition::datapoint("A", 1, 0, 1.0),
            PointDefinition::datapoint("A", 2, 0, 1.0),
        ];
        assert!(matches!(
            Registry::new(&dup, &[]),
            Err(AppError::Config(_))
        ));

        let zero = [PointDefinition::datapoint("B", 1, 0, 0.0)];
        assert!(matches!(
            Registry::new(&zero, &[]),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_scaling() {
        let registry = Registry::builtin().unwrap();
        let room = registry.datapoint("Temperature.Room").unwrap();
        assert_eq!(room.to_engineering(2115), 21.15);
        assert_eq!(room.to_engineering(-450), -4.5);
        assert_eq!(room.to_raw(21.15), Some(2115));

        let power = registry.datapoint("Power.HeatPump").unwrap();
        assert_eq!(power.to_engineering(1234), 123.4);

        let filter = registry.setpoint("FilterChange").unwrap();
        assert_eq!(filter.to_engineering(1080), 90.0);
        assert_eq!(filter.to_raw(90.0), Some(1080));
    }

    #[test]
    fn test_to_raw_refuses_values_beyond_register_width() {
        let unlimited = PointDefinition::setpoint("Counter", (50, 0), (50, 0), 1.0);
        assert_eq!(unlimited.to_raw(RAW_MAX as f64), Some(RAW_MAX));
        assert_eq!(unlimited.to_raw(RAW_MIN as f64), Some(RAW_MIN));
        assert_eq!(unlimited.to_raw(1e15), None);
        assert_eq!(unlimited.to_raw(-1e15), None);
        assert_eq!(unlimited.to_raw(f64::NAN), None);

        let filter = PointDefinition::setpoint("FilterChange", (46, 0), (46, 0), 1.0 / 12.0);
        assert_eq!(filter.to_raw(1e15), None);
    }

    #[test]
    fn test_write_address_may_differ() {
        let registry = Registry::builtin().unwrap();
        let hw = registry.setpoint("HotWater.Temperature").unwrap();
        assert_eq!(hw.read, Address { address: 15, obj: 1 });
        assert_eq!(hw.write_address(), Address { address: 15, obj: 0 });

        let dp = registry.datapoint("CO2").unwrap();
        assert_eq!(dp.write_address(), dp.read);
    }
}
