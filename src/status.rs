//! Splits the unit's status bitmask into independent on/off facts.

/// One flag inside the `StatusBits` datapoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusBit {
    pub mask: u16,
    pub name: &'static str,
    /// Topic path used when publishing to MQTT
    pub path: &'static str,
}

pub const STATUS_BITS: &[StatusBit] = &[
    StatusBit { mask: 0x0001, name: "Status.Water", path: "status/water" },
    StatusBit { mask: 0x0004, name: "Status.Heating", path: "status/heating" },
    StatusBit { mask: 0x0008, name: "Status.Cooling", path: "status/cooling" },
    StatusBit { mask: 0x0040, name: "Status.Legionella", path: "status/legionella" },
    StatusBit { mask: 0x0100, name: "Status.EBooster", path: "status/e-booster" },
    StatusBit { mask: 0x0200, name: "Status.FastHeating", path: "status/fast-heating" },
    StatusBit { mask: 0x2000, name: "Status.Defrost", path: "status/defrost" },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusBitFact {
    pub bit: StatusBit,
    pub value: u8,
}

/// Evaluates every entry of `bits` against the low 16 bits of `raw`.
/// Masks may overlap; each entry is judged on its own.
pub fn decompose(raw: i64, bits: &[StatusBit]) -> Vec<StatusBitFact> {
    let word = (raw & 0xffff) as u16;
    bits.iter()
        .map(|&bit| StatusBitFact {
            bit,
            value: u8::from(word & bit.mask != 0),
        })
        .collect()
}

/// Datapoint carrying the unit's malfunction code; 0 means none.
pub const MALFUNCTION: &str = "Malfunction";

/// Text for a malfunction code. `None` for 0 and for codes without a known meaning.
pub fn describe_malfunction(code: i64) -> Option<&'static str> {
    match code {
        256 => Some("defrost time exceeded"),
        16384 => Some("4-way valve error"),
        _ => None,
    }
}
