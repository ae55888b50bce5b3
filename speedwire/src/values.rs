//! The value catalog: what can be read, and how to ask for it.
//!
//! Two static tables drive decoding. The inverter table keys on the
//! `(code, class)` pair of a response record and also yields the
//! request descriptor `(object, start, end)` used to ask for the value.
//! The meter table keys on the textual OBIS identifier of a broadcast
//! reading. A non-zero factor means the integer reading is widened to
//! `f64` and scaled.

use std::collections::HashMap;
use std::sync::OnceLock;

use serde::Serialize;
use tracing::debug;

use speedwire_proto::{MeterFrame, RawValue, ResponseValue};

/// Semantic identifier of a measurable quantity.
///
/// Serializes to the snake_case names used by existing dashboards
/// (`active_power_plus_l1`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueId {
    ActivePowerMax,
    ActivePowerMinus,
    ActivePowerMinusL1,
    ActivePowerMinusL2,
    ActivePowerMinusL3,
    ActivePowerPlus,
    ActivePowerPlusL1,
    ActivePowerPlusL2,
    ActivePowerPlusL3,
    ApparentPowerMinus,
    ApparentPowerMinusL1,
    ApparentPowerMinusL2,
    ApparentPowerMinusL3,
    ApparentPowerPlus,
    ApparentPowerPlusL1,
    ApparentPowerPlusL2,
    ApparentPowerPlusL3,
    ReactivePowerMinus,
    ReactivePowerMinusL1,
    ReactivePowerMinusL2,
    ReactivePowerMinusL3,
    ReactivePowerPlus,
    ReactivePowerPlusL1,
    ReactivePowerPlusL2,
    ReactivePowerPlusL3,
    PowerS1,
    PowerS2,
    PowerFactor,
    PowerFactorL1,
    PowerFactorL2,
    PowerFactorL3,
    ActiveEnergyMinus,
    ActiveEnergyMinusL1,
    ActiveEnergyMinusL2,
    ActiveEnergyMinusL3,
    ActiveEnergyPlus,
    ActiveEnergyPlusL1,
    ActiveEnergyPlusL2,
    ActiveEnergyPlusL3,
    ActiveEnergyPlusToday,
    ApparentEnergyMinus,
    ApparentEnergyMinusL1,
    ApparentEnergyMinusL2,
    ApparentEnergyMinusL3,
    ApparentEnergyPlus,
    ApparentEnergyPlusL1,
    ApparentEnergyPlusL2,
    ApparentEnergyPlusL3,
    ReactiveEnergyMinus,
    ReactiveEnergyMinusL1,
    ReactiveEnergyMinusL2,
    ReactiveEnergyMinusL3,
    ReactiveEnergyPlus,
    ReactiveEnergyPlusL1,
    ReactiveEnergyPlusL2,
    ReactiveEnergyPlusL3,
    CurrentL1,
    CurrentL2,
    CurrentL3,
    CurrentS1,
    CurrentS2,
    VoltageL1,
    VoltageL2,
    VoltageL3,
    VoltageS1,
    VoltageS2,
    TimeFeed,
    TimeOperating,
    UtilityFrequency,
    BatteryCharge,
    BatteryTemperature,
    DeviceClass,
    DeviceGridRelay,
    DeviceName,
    DeviceStatus,
    DeviceTemperature,
    DeviceType,
    SoftwareVersion,
}

/// A decoded reading, scaled if the catalog defines a factor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    U32(u32),
    I32(i32),
    U64(u64),
    F64(f64),
    Text(String),
}

impl Value {
    /// Apply the catalog factor to a raw wire reading.
    pub fn from_raw(raw: &RawValue, factor: f64) -> Value {
        if factor != 0.0 {
            if let Some(v) = raw.as_f64() {
                return Value::F64(v * factor);
            }
        }
        match raw {
            RawValue::U32(v) => Value::U32(*v),
            RawValue::I32(v) => Value::I32(*v),
            RawValue::U64(v) => Value::U64(*v),
            RawValue::Text(s) => Value::Text(s.clone()),
        }
    }

    /// Numeric readings widened to `f64`; `None` for text.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::U32(v) => Some(*v as f64),
            Value::I32(v) => Some(*v as f64),
            Value::U64(v) => Some(*v as f64),
            Value::F64(v) => Some(*v),
            Value::Text(_) => None,
        }
    }
}

/// Kind of physical quantity behind a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Quantity {
    Power,
    Energy,
    Current,
    Voltage,
    Temperature,
}

/// Catalog metadata of one [`ValueId`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ValueInfo {
    pub description: &'static str,
    pub unit: &'static str,
    pub quantity: Option<Quantity>,
}

/// The `(object, start, end)` triple selecting a range of inverter
/// values; one request returns every catalog entry sharing the triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestDescriptor {
    pub object: u16,
    pub start: u32,
    pub end: u32,
}

struct InverterDef {
    object: u16,
    start: u32,
    end: u32,
    /// 0 matches any class.
    class: u8,
    code: u16,
    id: ValueId,
    factor: f64,
}

impl InverterDef {
    fn descriptor(&self) -> RequestDescriptor {
        RequestDescriptor {
            object: self.object,
            start: self.start,
            end: self.end,
        }
    }
}

const fn inv(
    object: u16,
    start: u32,
    end: u32,
    class: u8,
    code: u16,
    id: ValueId,
    factor: f64,
) -> InverterDef {
    InverterDef {
        object,
        start,
        end,
        class,
        code,
        id,
        factor,
    }
}

#[rustfmt::skip]
static INVERTER_VALUES: [InverterDef; 30] = [
    inv(0x5100, 0x0026_3F00, 0x0026_3FFF, 0x00, 0x263F, ValueId::ActivePowerPlus, 0.0),
    inv(0x5100, 0x0029_5A00, 0x0029_5AFF, 0x00, 0x295A, ValueId::BatteryCharge, 0.0),
    inv(0x5100, 0x0041_1E00, 0x0041_20FF, 0x00, 0x411E, ValueId::ActivePowerMax, 0.0),
    inv(0x5100, 0x0046_4000, 0x0046_42FF, 0x00, 0x4640, ValueId::ActivePowerPlusL1, 0.0),
    inv(0x5100, 0x0046_4000, 0x0046_42FF, 0x00, 0x4641, ValueId::ActivePowerPlusL2, 0.0),
    inv(0x5100, 0x0046_4000, 0x0046_42FF, 0x00, 0x4642, ValueId::ActivePowerPlusL3, 0.0),
    inv(0x5100, 0x0046_4800, 0x0046_55FF, 0x00, 0x4648, ValueId::VoltageL1, 0.01),
    inv(0x5100, 0x0046_4800, 0x0046_55FF, 0x00, 0x4649, ValueId::VoltageL2, 0.01),
    inv(0x5100, 0x0046_4800, 0x0046_55FF, 0x00, 0x464A, ValueId::VoltageL3, 0.01),
    inv(0x5100, 0x0046_4800, 0x0046_55FF, 0x00, 0x4653, ValueId::CurrentL1, 0.001),
    inv(0x5100, 0x0046_4800, 0x0046_55FF, 0x00, 0x4654, ValueId::CurrentL2, 0.001),
    inv(0x5100, 0x0046_4800, 0x0046_55FF, 0x00, 0x4655, ValueId::CurrentL3, 0.001),
    inv(0x5100, 0x0046_5700, 0x0046_57FF, 0x00, 0x4657, ValueId::UtilityFrequency, 0.01),
    inv(0x5100, 0x0049_1E00, 0x0049_5DFF, 0x00, 0x495B, ValueId::BatteryTemperature, 0.1),

    inv(0x5180, 0x0021_4800, 0x0021_48FF, 0x00, 0x2148, ValueId::DeviceStatus, 0.0),
    inv(0x5180, 0x0041_6400, 0x0041_64FF, 0x00, 0x4164, ValueId::DeviceGridRelay, 0.0),

    inv(0x5200, 0x0023_7700, 0x0023_77FF, 0x00, 0x2377, ValueId::DeviceTemperature, 0.01),

    inv(0x5380, 0x0025_1E00, 0x0025_1EFF, 0x01, 0x251E, ValueId::PowerS1, 0.0),
    inv(0x5380, 0x0025_1E00, 0x0025_1EFF, 0x02, 0x251E, ValueId::PowerS2, 0.0),
    inv(0x5380, 0x0045_1F00, 0x0045_21FF, 0x01, 0x451F, ValueId::VoltageS1, 0.01),
    inv(0x5380, 0x0045_1F00, 0x0045_21FF, 0x02, 0x451F, ValueId::VoltageS2, 0.01),
    inv(0x5380, 0x0045_1F00, 0x0045_21FF, 0x01, 0x4521, ValueId::CurrentS1, 0.001),
    inv(0x5380, 0x0045_1F00, 0x0045_21FF, 0x02, 0x4521, ValueId::CurrentS2, 0.001),

    inv(0x5400, 0x0026_0100, 0x0026_22FF, 0x00, 0x2601, ValueId::ActiveEnergyPlus, 3600.0),
    inv(0x5400, 0x0026_0100, 0x0026_22FF, 0x00, 0x2622, ValueId::ActiveEnergyPlusToday, 3600.0),
    inv(0x5400, 0x0046_2E00, 0x0046_2FFF, 0x00, 0x462E, ValueId::TimeOperating, 0.0),
    inv(0x5400, 0x0046_2E00, 0x0046_2FFF, 0x00, 0x462F, ValueId::TimeFeed, 0.0),

    inv(0x5800, 0x0082_1E00, 0x0082_20FF, 0x00, 0x821E, ValueId::DeviceName, 0.0),
    inv(0x5800, 0x0082_1E00, 0x0082_20FF, 0x00, 0x821F, ValueId::DeviceClass, 0.0),
    inv(0x5800, 0x0082_1E00, 0x0082_20FF, 0x00, 0x8220, ValueId::DeviceType, 0.0),
];

struct MeterDef {
    obis: &'static str,
    id: ValueId,
    factor: f64,
}

const fn met(obis: &'static str, id: ValueId, factor: f64) -> MeterDef {
    MeterDef { obis, id, factor }
}

#[rustfmt::skip]
static METER_VALUES: [MeterDef; 60] = [
    met("0:1.4.0", ValueId::ActivePowerPlus, 0.1),
    met("0:1.8.0", ValueId::ActiveEnergyPlus, 0.0),
    met("0:2.4.0", ValueId::ActivePowerMinus, 0.1),
    met("0:2.8.0", ValueId::ActiveEnergyMinus, 0.0),
    met("0:3.4.0", ValueId::ReactivePowerPlus, 0.1),
    met("0:3.8.0", ValueId::ReactiveEnergyPlus, 0.0),
    met("0:4.4.0", ValueId::ReactivePowerMinus, 0.1),
    met("0:4.8.0", ValueId::ReactiveEnergyMinus, 0.0),
    met("0:9.4.0", ValueId::ApparentPowerPlus, 0.1),
    met("0:9.8.0", ValueId::ApparentEnergyPlus, 0.0),
    met("0:10.4.0", ValueId::ApparentPowerMinus, 0.1),
    met("0:10.8.0", ValueId::ApparentEnergyMinus, 0.0),
    met("0:13.4.0", ValueId::PowerFactor, 0.001),
    met("0:14.4.0", ValueId::UtilityFrequency, 0.001),

    met("0:21.4.0", ValueId::ActivePowerPlusL1, 0.1),
    met("0:21.8.0", ValueId::ActiveEnergyPlusL1, 0.0),
    met("0:22.4.0", ValueId::ActivePowerMinusL1, 0.1),
    met("0:22.8.0", ValueId::ActiveEnergyMinusL1, 0.0),
    met("0:23.4.0", ValueId::ReactivePowerPlusL1, 0.1),
    met("0:23.8.0", ValueId::ReactiveEnergyPlusL1, 0.0),
    met("0:24.4.0", ValueId::ReactivePowerMinusL1, 0.1),
    met("0:24.8.0", ValueId::ReactiveEnergyMinusL1, 0.0),
    met("0:29.4.0", ValueId::ApparentPowerPlusL1, 0.1),
    met("0:29.8.0", ValueId::ApparentEnergyPlusL1, 0.0),
    met("0:30.4.0", ValueId::ApparentPowerMinusL1, 0.1),
    met("0:30.8.0", ValueId::ApparentEnergyMinusL1, 0.0),
    met("0:31.4.0", ValueId::CurrentL1, 0.001),
    met("0:32.4.0", ValueId::VoltageL1, 0.001),
    met("0:33.4.0", ValueId::PowerFactorL1, 0.001),

    met("0:41.4.0", ValueId::ActivePowerPlusL2, 0.1),
    met("0:41.8.0", ValueId::ActiveEnergyPlusL2, 0.0),
    met("0:42.4.0", ValueId::ActivePowerMinusL2, 0.1),
    met("0:42.8.0", ValueId::ActiveEnergyMinusL2, 0.0),
    met("0:43.4.0", ValueId::ReactivePowerPlusL2, 0.1),
    met("0:43.8.0", ValueId::ReactiveEnergyPlusL2, 0.0),
    met("0:44.4.0", ValueId::ReactivePowerMinusL2, 0.1),
    met("0:44.8.0", ValueId::ReactiveEnergyMinusL2, 0.0),
    met("0:49.4.0", ValueId::ApparentPowerPlusL2, 0.1),
    met("0:49.8.0", ValueId::ApparentEnergyPlusL2, 0.0),
    met("0:50.4.0", ValueId::ApparentPowerMinusL2, 0.1),
    met("0:50.8.0", ValueId::ApparentEnergyMinusL2, 0.0),
    met("0:51.4.0", ValueId::CurrentL2, 0.001),
    met("0:52.4.0", ValueId::VoltageL2, 0.001),
    met("0:53.4.0", ValueId::PowerFactorL2, 0.001),

    met("0:61.4.0", ValueId::ActivePowerPlusL3, 0.1),
    met("0:61.8.0", ValueId::ActiveEnergyPlusL3, 0.0),
    met("0:62.4.0", ValueId::ActivePowerMinusL3, 0.1),
    met("0:62.8.0", ValueId::ActiveEnergyMinusL3, 0.0),
    met("0:63.4.0", ValueId::ReactivePowerPlusL3, 0.1),
    met("0:63.8.0", ValueId::ReactiveEnergyPlusL3, 0.0),
    met("0:64.4.0", ValueId::ReactivePowerMinusL3, 0.1),
    met("0:64.8.0", ValueId::ReactiveEnergyMinusL3, 0.0),
    met("0:69.4.0", ValueId::ApparentPowerPlusL3, 0.1),
    met("0:69.8.0", ValueId::ApparentEnergyPlusL3, 0.0),
    met("0:70.4.0", ValueId::ApparentPowerMinusL3, 0.1),
    met("0:70.8.0", ValueId::ApparentEnergyMinusL3, 0.0),
    met("0:71.4.0", ValueId::CurrentL3, 0.001),
    met("0:72.4.0", ValueId::VoltageL3, 0.001),
    met("0:73.4.0", ValueId::PowerFactorL3, 0.001),

    met("144:0.0.0", ValueId::SoftwareVersion, 0.0),
];

fn response_key(code: u16, class: u8) -> u32 {
    ((code as u32) << 16) | class as u32
}

fn inverter_lookup() -> &'static HashMap<u32, &'static InverterDef> {
    static MAP: OnceLock<HashMap<u32, &'static InverterDef>> = OnceLock::new();
    MAP.get_or_init(|| {
        INVERTER_VALUES
            .iter()
            .map(|def| (response_key(def.code, def.class), def))
            .collect()
    })
}

fn meter_lookup() -> &'static HashMap<&'static str, &'static MeterDef> {
    static MAP: OnceLock<HashMap<&'static str, &'static MeterDef>> = OnceLock::new();
    MAP.get_or_init(|| METER_VALUES.iter().map(|def| (def.obis, def)).collect())
}

fn inverter_def(code: u16, class: u8) -> Option<&'static InverterDef> {
    let map = inverter_lookup();
    map.get(&response_key(code, class))
        .or_else(|| map.get(&response_key(code, 0)))
        .copied()
}

/// All distinct request descriptors, first-seen order. Walking them
/// yields every value an inverter offers.
pub fn all_request_descriptors() -> &'static [RequestDescriptor] {
    static LIST: OnceLock<Vec<RequestDescriptor>> = OnceLock::new();
    LIST.get_or_init(|| {
        let mut list: Vec<RequestDescriptor> = Vec::new();
        for def in &INVERTER_VALUES {
            let descriptor = def.descriptor();
            if !list.contains(&descriptor) {
                list.push(descriptor);
            }
        }
        list
    })
}

/// Descriptor to request for a single inverter value.
pub fn request_for(id: ValueId) -> Option<RequestDescriptor> {
    INVERTER_VALUES
        .iter()
        .find(|def| def.id == id)
        .map(InverterDef::descriptor)
}

/// Inverter response lookup, falling back to the any-class entry.
pub fn lookup_inverter(code: u16, class: u8) -> Option<ValueId> {
    inverter_def(code, class).map(|def| def.id)
}

/// Meter reading lookup by textual OBIS identifier.
pub fn lookup_meter(obis: &str) -> Option<(ValueId, f64)> {
    meter_lookup().get(obis).map(|def| (def.id, def.factor))
}

/// Decode the records of an inverter response into catalog values.
/// Unknown `(code, class)` pairs and empty records are skipped.
pub fn parse_inverter_values(values: &[ResponseValue]) -> HashMap<ValueId, Value> {
    let mut data = HashMap::with_capacity(values.len());
    for value in values {
        let Some(first) = value.values.first() else {
            continue;
        };
        let Some(def) = inverter_def(value.code, value.class) else {
            continue;
        };
        data.insert(def.id, Value::from_raw(first, def.factor));
    }
    data
}

/// Decode a meter broadcast into catalog values. Readings with OBIS
/// identifiers the catalog does not know are dropped.
pub fn convert_meter_frame(frame: &MeterFrame) -> HashMap<ValueId, Value> {
    let mut data = HashMap::with_capacity(frame.values.len());
    for measured in &frame.values {
        let obis = measured.obis.to_string();
        match lookup_meter(&obis) {
            Some((id, factor)) => {
                data.insert(id, Value::from_raw(&measured.value, factor));
            }
            None => debug!("unknown OBIS identifier {obis}, dropping reading"),
        }
    }
    data
}

/// Description, unit and quantity kind of a value.
#[rustfmt::skip]
pub fn info(id: ValueId) -> ValueInfo {
    use Quantity::*;

    fn i(description: &'static str, unit: &'static str, quantity: Option<Quantity>) -> ValueInfo {
        ValueInfo { description, unit, quantity }
    }

    match id {
        ValueId::ActivePowerMax => i("Maximum active power (AC)", "W", Some(Power)),
        ValueId::ActivePowerMinus => i("Active power - (AC)", "W", Some(Power)),
        ValueId::ActivePowerMinusL1 => i("Active power - L1 (AC)", "W", Some(Power)),
        ValueId::ActivePowerMinusL2 => i("Active power - L2 (AC)", "W", Some(Power)),
        ValueId::ActivePowerMinusL3 => i("Active power - L3 (AC)", "W", Some(Power)),
        ValueId::ActivePowerPlus => i("Active power + (AC)", "W", Some(Power)),
        ValueId::ActivePowerPlusL1 => i("Active power + L1 (AC)", "W", Some(Power)),
        ValueId::ActivePowerPlusL2 => i("Active power + L2 (AC)", "W", Some(Power)),
        ValueId::ActivePowerPlusL3 => i("Active power + L3 (AC)", "W", Some(Power)),
        ValueId::ApparentPowerMinus => i("Apparent power - (AC)", "VA", Some(Power)),
        ValueId::ApparentPowerMinusL1 => i("Apparent power - L1 (AC)", "VA", Some(Power)),
        ValueId::ApparentPowerMinusL2 => i("Apparent power - L2 (AC)", "VA", Some(Power)),
        ValueId::ApparentPowerMinusL3 => i("Apparent power - L3 (AC)", "VA", Some(Power)),
        ValueId::ApparentPowerPlus => i("Apparent power + (AC)", "VA", Some(Power)),
        ValueId::ApparentPowerPlusL1 => i("Apparent power + L1 (AC)", "VA", Some(Power)),
        ValueId::ApparentPowerPlusL2 => i("Apparent power + L2 (AC)", "VA", Some(Power)),
        ValueId::ApparentPowerPlusL3 => i("Apparent power + L3 (AC)", "VA", Some(Power)),
        ValueId::ReactivePowerMinus => i("Reactive power - (AC)", "var", Some(Power)),
        ValueId::ReactivePowerMinusL1 => i("Reactive power - L1 (AC)", "var", Some(Power)),
        ValueId::ReactivePowerMinusL2 => i("Reactive power - L2 (AC)", "var", Some(Power)),
        ValueId::ReactivePowerMinusL3 => i("Reactive power - L3 (AC)", "var", Some(Power)),
        ValueId::ReactivePowerPlus => i("Reactive power + (AC)", "var", Some(Power)),
        ValueId::ReactivePowerPlusL1 => i("Reactive power + L1 (AC)", "var", Some(Power)),
        ValueId::ReactivePowerPlusL2 => i("Reactive power + L2 (AC)", "var", Some(Power)),
        ValueId::ReactivePowerPlusL3 => i("Reactive power + L3 (AC)", "var", Some(Power)),
        ValueId::PowerS1 => i("Power String 1 (DC)", "W", Some(Power)),
        ValueId::PowerS2 => i("Power String 2 (DC)", "W", Some(Power)),
        ValueId::PowerFactor => i("Power Factor (AC)", "", None),
        ValueId::PowerFactorL1 => i("Power Factor L1 (AC)", "", None),
        ValueId::PowerFactorL2 => i("Power Factor L2 (AC)", "", None),
        ValueId::PowerFactorL3 => i("Power Factor L3 (AC)", "", None),
        ValueId::ActiveEnergyMinus => i("Active Energy - (AC)", "Ws", Some(Energy)),
        ValueId::ActiveEnergyMinusL1 => i("Active Energy - L1 (AC)", "Ws", Some(Energy)),
        ValueId::ActiveEnergyMinusL2 => i("Active Energy - L2 (AC)", "Ws", Some(Energy)),
        ValueId::ActiveEnergyMinusL3 => i("Active Energy - L3 (AC)", "Ws", Some(Energy)),
        ValueId::ActiveEnergyPlus => i("Active Energy + (AC)", "Ws", Some(Energy)),
        ValueId::ActiveEnergyPlusL1 => i("Active Energy + L1 (AC)", "Ws", Some(Energy)),
        ValueId::ActiveEnergyPlusL2 => i("Active Energy + L2 (AC)", "Ws", Some(Energy)),
        ValueId::ActiveEnergyPlusL3 => i("Active Energy + L3 (AC)", "Ws", Some(Energy)),
        ValueId::ActiveEnergyPlusToday => i("Active Energy + today (AC)", "Ws", Some(Energy)),
        ValueId::ApparentEnergyMinus => i("Apparent Energy - (AC)", "VAs", Some(Energy)),
        ValueId::ApparentEnergyMinusL1 => i("Apparent Energy - L1 (AC)", "VAs", Some(Energy)),
        ValueId::ApparentEnergyMinusL2 => i("Apparent Energy - L2 (AC)", "VAs", Some(Energy)),
        ValueId::ApparentEnergyMinusL3 => i("Apparent Energy - L3 (AC)", "VAs", Some(Energy)),
        ValueId::ApparentEnergyPlus => i("Apparent Energy + (AC)", "VAs", Some(Energy)),
        ValueId::ApparentEnergyPlusL1 => i("Apparent Energy + L1 (AC)", "VAs", Some(Energy)),
        ValueId::ApparentEnergyPlusL2 => i("Apparent Energy + L2 (AC)", "VAs", Some(Energy)),
        ValueId::ApparentEnergyPlusL3 => i("Apparent Energy + L3 (AC)", "VAs", Some(Energy)),
        ValueId::ReactiveEnergyMinus => i("Reactive Energy - (AC)", "vars", Some(Energy)),
        ValueId::ReactiveEnergyMinusL1 => i("Reactive Energy - L1 (AC)", "vars", Some(Energy)),
        ValueId::ReactiveEnergyMinusL2 => i("Reactive Energy - L2 (AC)", "vars", Some(Energy)),
        ValueId::ReactiveEnergyMinusL3 => i("Reactive Energy - L3 (AC)", "vars", Some(Energy)),
        ValueId::ReactiveEnergyPlus => i("Reactive Energy + (AC)", "vars", Some(Energy)),
        ValueId::ReactiveEnergyPlusL1 => i("Reactive Energy + L1 (AC)", "vars", Some(Energy)),
        ValueId::ReactiveEnergyPlusL2 => i("Reactive Energy + L2 (AC)", "vars", Some(Energy)),
        ValueId::ReactiveEnergyPlusL3 => i("Reactive Energy + L3 (AC)", "vars", Some(Energy)),
        ValueId::CurrentL1 => i("Current L1 (AC)", "A", Some(Current)),
        ValueId::CurrentL2 => i("Current L2 (AC)", "A", Some(Current)),
        ValueId::CurrentL3 => i("Current L3 (AC)", "A", Some(Current)),
        ValueId::CurrentS1 => i("Current String 1 (DC)", "A", Some(Current)),
        ValueId::CurrentS2 => i("Current String 2 (DC)", "A", Some(Current)),
        ValueId::VoltageL1 => i("Voltage L1 (AC)", "V", Some(Voltage)),
        ValueId::VoltageL2 => i("Voltage L2 (AC)", "V", Some(Voltage)),
        ValueId::VoltageL3 => i("Voltage L3 (AC)", "V", Some(Voltage)),
        ValueId::VoltageS1 => i("Voltage String 1 (DC)", "V", Some(Voltage)),
        ValueId::VoltageS2 => i("Voltage String 2 (DC)", "V", Some(Voltage)),
        ValueId::TimeFeed => i("Feed in time", "s", None),
        ValueId::TimeOperating => i("Operation time", "s", None),
        ValueId::UtilityFrequency => i("Utility frequency", "Hz", None),
        ValueId::BatteryCharge => i("Charge state of battery", "%", None),
        ValueId::BatteryTemperature => i("Temperature of battery", "°C", Some(Temperature)),
        ValueId::DeviceClass => i("ID of device class", "", None),
        ValueId::DeviceGridRelay => i("Status of grid relay", "", None),
        ValueId::DeviceName => i("Name of device", "", None),
        ValueId::DeviceStatus => i("Status of device", "", None),
        ValueId::DeviceTemperature => i("Temperature of device", "°C", Some(Temperature)),
        ValueId::DeviceType => i("ID of device type", "", None),
        ValueId::SoftwareVersion => i("Software version of device", "", None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use speedwire_proto::{DeviceId, MeasuredData, ObisId};

    #[test]
    fn inverter_keys_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for def in &INVERTER_VALUES {
            assert!(
                seen.insert(response_key(def.code, def.class)),
                "duplicate (code, class) for {:?}",
                def.id
            );
        }
    }

    #[test]
    fn meter_keys_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for def in &METER_VALUES {
            assert!(seen.insert(def.obis), "duplicate OBIS {}", def.obis);
        }
    }

    #[test]
    fn every_catalog_entry_has_info() {
        for def in &INVERTER_VALUES {
            assert!(!info(def.id).description.is_empty());
        }
        for def in &METER_VALUES {
            assert!(!info(def.id).description.is_empty());
        }
    }

    #[test]
    fn descriptors_are_deduplicated_and_cover_the_table() {
        let descriptors = all_request_descriptors();

        let mut seen = std::collections::HashSet::new();
        for descriptor in descriptors {
            assert!(seen.insert(*descriptor), "duplicate {descriptor:?}");
        }

        // Walking all descriptors must hit every inverter value.
        for def in &INVERTER_VALUES {
            assert!(
                descriptors.contains(&def.descriptor()),
                "{:?} unreachable",
                def.id
            );
        }
    }

    #[test]
    fn class_lookup_falls_back_to_any_class() {
        // Exact class match.
        assert_eq!(lookup_inverter(0x251E, 0x01), Some(ValueId::PowerS1));
        // 0x263F only has an any-class entry; class 7 still resolves.
        assert_eq!(lookup_inverter(0x263F, 0x07), Some(ValueId::ActivePowerPlus));
        // No entry at all.
        assert_eq!(lookup_inverter(0x0001, 0x00), None);
    }

    #[test]
    fn request_for_device_name() {
        assert_eq!(
            request_for(ValueId::DeviceName),
            Some(RequestDescriptor {
                object: 0x5800,
                start: 0x0082_1E00,
                end: 0x0082_20FF,
            })
        );
    }

    #[test]
    fn meter_reading_is_scaled() {
        let frame = MeterFrame {
            device: DeviceId {
                susy_id: 349,
                serial: 3_001_234_567,
            },
            ticker_ms: 1000,
            values: vec![
                MeasuredData {
                    obis: ObisId {
                        channel: 0,
                        value_index: 1,
                        kind: 4,
                        tariff: 0,
                    },
                    value: RawValue::U32(1000),
                },
                MeasuredData {
                    // Not in the catalog: dropped.
                    obis: ObisId {
                        channel: 7,
                        value_index: 7,
                        kind: 7,
                        tariff: 7,
                    },
                    value: RawValue::U32(1),
                },
            ],
        };

        let values = convert_meter_frame(&frame);
        assert_eq!(values.len(), 1);
        assert_eq!(values.get(&ValueId::ActivePowerPlus), Some(&Value::F64(100.0)));
    }

    #[test]
    fn energy_counters_keep_integer_form_without_factor() {
        let (id, factor) = lookup_meter("0:1.8.0").unwrap();
        assert_eq!(id, ValueId::ActiveEnergyPlus);
        assert_eq!(factor, 0.0);
        assert_eq!(
            Value::from_raw(&RawValue::U64(123_456), factor),
            Value::U64(123_456)
        );
    }

    #[test]
    fn inverter_response_parsing_applies_factors() {
        let values = vec![
            ResponseValue {
                class: 0x00,
                code: 0x4648,
                kind: 0x00,
                timestamp: 0,
                values: vec![RawValue::U32(23000)],
            },
            ResponseValue {
                class: 0x00,
                code: 0x263F,
                kind: 0x00,
                timestamp: 0,
                values: vec![RawValue::U32(4200)],
            },
            // Empty record: skipped.
            ResponseValue {
                class: 0x00,
                code: 0x4649,
                kind: 0x00,
                timestamp: 0,
                values: vec![],
            },
        ];

        let parsed = parse_inverter_values(&values);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.get(&ValueId::VoltageL1), Some(&Value::F64(230.0)));
        assert_eq!(parsed.get(&ValueId::ActivePowerPlus), Some(&Value::U32(4200)));
    }

    #[test]
    fn value_ids_serialize_to_snake_case() {
        assert_eq!(
            serde_json::to_string(&ValueId::ActivePowerPlusL1).unwrap(),
            "\"active_power_plus_l1\""
        );
        assert_eq!(
            serde_json::to_string(&ValueId::SoftwareVersion).unwrap(),
            "\"software_version\""
        );
    }
}
