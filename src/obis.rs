//! OBIS code table of the Belgian eMUCS-P1 v2.1.1 telegram.

use serde_derive::Serialize;

/// How the value groups after an OBIS code have to be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValueShape {
    /// Literal text
    OpaqueText,
    /// Text sent as hex encoded bytes
    HexText,
    /// `value*unit`
    Measurement,
    /// `(timestamp)(value*unit)`
    TimestampedMeasurement,
    /// `(rows)(id)(id)` followed by `(timestamp)(timestamp)(value*unit)` triples
    PeakTable,
    /// `YYMMDDhhmmssX`
    ProtocolTimestamp,
    /// Breaker state 0=off, 1=on, 2=ready for reconnect
    StatusCode,
    /// M-Bus device type, 003=gas, 007=water
    DeviceTypeCode,
}

/// Typed slot in the live reading set that a decoded line feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LiveField {
    TimeNow,
    ActiveRate,
    KwhDayPlus,
    KwhNightPlus,
    KwhDayMin,
    KwhNightMin,
    KwPlus,
    KwMin,
    GridVoltage,
    MonthPeak,
    QuarterPeak,
    GasMeter,
    WaterMeter,
}

/// Static description of one OBIS code
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldDefinition {
    pub obis: &'static str,
    pub name: &'static str,
    pub shape: ValueShape,
    pub description: &'static str,
    pub live: Option<LiveField>,
}

/// Grid configuration, `230` or `400`
pub const GRID_CONFIG: &str = "1-0:94.32.1";
/// Main electricity breaker
pub const MAIN_BREAKER: &str = "0-0:96.3.10";
/// Per phase voltages, checked against the grid configuration
pub const PHASE_VOLTAGES: [&str; 3] = ["1-0:32.7.0", "1-0:52.7.0", "1-0:72.7.0"];

const fn field(
    obis: &'static str,
    name: &'static str,
    shape: ValueShape,
    description: &'static str,
) -> FieldDefinition {
    FieldDefinition {
        obis,
        name,
        shape,
        description,
        live: None,
    }
}

const fn live(
    obis: &'static str,
    name: &'static str,
    shape: ValueShape,
    description: &'static str,
    slot: LiveField,
) -> FieldDefinition {
    FieldDefinition {
        obis,
        name,
        shape,
        description,
        live: Some(slot),
    }
}

use ValueShape::*;

pub static FIELDS: &[FieldDefinition] = &[
    field("0-0:96.1.4", "version", OpaqueText, "Version major.minor (current is 50221)"),
    live("0-0:1.0.0", "time_now", ProtocolTimestamp, "Timestamp current time", LiveField::TimeNow),
    field("0-0:96.13.0", "message", OpaqueText, "Text Message, max 1024 chars"),
    live("0-0:96.14.0", "active_rate", OpaqueText, "Current rate (1=day,2=night)", LiveField::ActiveRate),
    live("1-0:1.8.1", "kwh_day_plus", Measurement, "Rate 1 (day) - total consumption", LiveField::KwhDayPlus),
    live("1-0:1.8.2", "kwh_night_plus", Measurement, "Rate 2 (night) - total consumption", LiveField::KwhNightPlus),
    live("1-0:2.8.1", "kwh_day_min", Measurement, "Rate 1 (day) - total production", LiveField::KwhDayMin),
    live("1-0:2.8.2", "kwh_night_min", Measurement, "Rate 2 (night) - total production", LiveField::KwhNightMin),
    live("1-0:1.7.0", "kw_plus", Measurement, "All phases current consumption", LiveField::KwPlus),
    live("1-0:2.7.0", "kw_min", Measurement, "All phases current production", LiveField::KwMin),
    field("1-0:21.7.0", "l1_plus", Measurement, "L1 consumption"),
    field("1-0:41.7.0", "l2_plus", Measurement, "L2 consumption"),
    field("1-0:61.7.0", "l3_plus", Measurement, "L3 consumption"),
    field("1-0:22.7.0", "l1_min", Measurement, "L1 production"),
    field("1-0:42.7.0", "l2_min", Measurement, "L2 production"),
    field("1-0:62.7.0", "l3_min", Measurement, "L3 production"),
    field("1-0:32.7.0", "v_l1", Measurement, "L1 voltage"),
    field("1-0:52.7.0", "v_l2", Measurement, "L2 voltage"),
    field("1-0:72.7.0", "v_l3", Measurement, "L3 voltage"),
    field("1-0:31.7.0", "a_l1", Measurement, "L1 current"),
    field("1-0:51.7.0", "a_l2", Measurement, "L2 current"),
    field("1-0:71.7.0", "a_l3", Measurement, "L3 current"),
    live("1-0:94.32.1", "v_grid", OpaqueText, "Grid Config: 230=3x230V, 400=3x400V", LiveField::GridVoltage),
    field("0-0:17.0.0", "kw_limit", Measurement, "Max power, 99.999 = deactivated"),
    field("1-0:31.4.0", "a_limit", Measurement, "Max current, 999.99 = deactivated"),
    live("1-0:1.6.0", "month_peak", TimestampedMeasurement, "Current Month Peak:Time/Power", LiveField::MonthPeak),
    field("0-0:98.1.0", "months_peak_past", PeakTable, "Past Months (13) Peak:Time/Power"),
    live("1-0:1.4.0", "quarter_peak", Measurement, "Quarter Hour Average Power", LiveField::QuarterPeak),
    field("0-1:24.1.0", "dev_bus_1", DeviceTypeCode, "Device Type Bus 1 (gas=3, water=7, ..)"),
    field("0-2:24.1.0", "dev_bus_2", DeviceTypeCode, "Device Type Bus 2 (gas=3, water=7, ..)"),
    field("0-3:24.1.0", "dev_bus_3", DeviceTypeCode, "Device Type Bus 3 (gas=3, water=7, ..)"),
    field("0-4:24.1.0", "dev_bus_4", DeviceTypeCode, "Device Type Bus 4 (gas=3, water=7, ..)"),
    field("0-0:96.1.2", "ean_electr", HexText, "EAN code Electricity"),
    field("0-1:96.1.2", "ean_bus_1", HexText, "EAN code Bus 1"),
    field("0-2:96.1.2", "ean_bus_2", HexText, "EAN code Bus 2"),
    field("0-3:96.1.2", "ean_bus_3", HexText, "EAN code Bus 3"),
    field("0-4:96.1.2", "ean_bus_4", HexText, "EAN code Bus 4"),
    field("0-0:96.1.1", "meter_electr", HexText, "Meter Serial Electricity"),
    field("0-1:96.1.1", "meter_bus_1", HexText, "Meter Serial Bus 1"),
    field("0-2:96.1.1", "meter_bus_2", HexText, "Meter Serial Bus 2"),
    field("0-3:96.1.1", "meter_bus_3", HexText, "Meter Serial Bus 3"),
    field("0-4:96.1.1", "meter_bus_4", HexText, "Meter Serial Bus 4"),
    live("0-1:24.2.3", "gas_meter", TimestampedMeasurement, "Gas consumption / capture time, Bus 1", LiveField::GasMeter),
    live("0-2:24.2.3", "gas_meter", TimestampedMeasurement, "Gas consumption / capture time, Bus 2", LiveField::GasMeter),
    live("0-3:24.2.3", "gas_meter", TimestampedMeasurement, "Gas consumption / capture time, Bus 3", LiveField::GasMeter),
    live("0-4:24.2.3", "gas_meter", TimestampedMeasurement, "Gas consumption / capture time, Bus 4", LiveField::GasMeter),
    live("0-1:24.2.1", "water_meter", TimestampedMeasurement, "Water consumption / capture time, Bus 1", LiveField::WaterMeter),
    live("0-2:24.2.1", "water_meter", TimestampedMeasurement, "Water consumption / capture time, Bus 2", LiveField::WaterMeter),
    live("0-3:24.2.1", "water_meter", TimestampedMeasurement, "Water consumption / capture time, Bus 3", LiveField::WaterMeter),
    live("0-4:24.2.1", "water_meter", TimestampedMeasurement, "Water consumption / capture time, Bus 4", LiveField::WaterMeter),
    field("0-0:96.3.10", "breaker_0", StatusCode, "Electricity: 0=OFF, 1=ON, 2=Ready Reconnect"),
    field("0-1:96.3.10", "breaker_1", StatusCode, "Virtual Relay Bus 1, 0=OFF, 1=ON"),
    field("0-2:96.3.10", "breaker_2", StatusCode, "Virtual Relay Bus 2, 0=OFF, 1=ON"),
    field("0-3:96.3.10", "breaker_3", StatusCode, "Virtual Relay Bus 3, 0=OFF, 1=ON"),
    field("0-4:96.3.10", "breaker_4", StatusCode, "Virtual Relay Bus 4, 0=OFF, 1=ON"),
    field("0-1:24.4.0", "gas_breaker_1", StatusCode, "Gas Valve Bus 1, 0=OFF, 1=ON, 2=Ready Reconnect"),
    field("0-2:24.4.0", "gas_breaker_2", StatusCode, "Gas Valve Bus 2, 0=OFF, 1=ON, 2=Ready Reconnect"),
    field("0-3:24.4.0", "gas_breaker_3", StatusCode, "Gas Valve Bus 3, 0=OFF, 1=ON, 2=Ready Reconnect"),
    field("0-4:24.4.0", "gas_breaker_4", StatusCode, "Gas Valve Bus 4, 0=OFF, 1=ON, 2=Ready Reconnect"),
];

/// Finds the definition of an OBIS code
pub fn lookup(obis: &str) -> Option<&'static FieldDefinition> {
    FIELDS.iter().find(|f| f.obis == obis)
}

/// All OBIS codes that carry the given field name, in table order
pub fn by_name(name: &str) -> impl Iterator<Item = &'static FieldDefinition> + '_ {
    FIELDS.iter().filter(move |f| f.name == name)
}

/// Bus number encoded in the OBIS channel (`0-N:...`)
pub fn bus_number(obis: &str) -> Option<u8> {
    obis.split_once(':')
        .and_then(|(medium_channel, _)| medium_channel.split_once('-'))
        .and_then(|(_, channel)| channel.parse().ok())
}
