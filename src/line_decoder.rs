//! Decodes the lines of a validated telegram into typed readings.
//!
//! Decoding never fails a telegram: a line that cannot be understood is
//! passed through as a warning row and the remaining lines still apply.

use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error, warn};

use crate::obis::{self, FieldDefinition, ValueShape, GRID_CONFIG, MAIN_BREAKER, PHASE_VOLTAGES};
use crate::readings::{
    CurrentReadings, Device, PeakRow, PeakTable, Quantity, Reading, ReadingRegistry, Timestamped,
};
use crate::telegram::Telegram;
use crate::timestamp::{format_timestamp, parse_timestamp};

/// How a display row should be highlighted by a renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Normal,
    /// Header and trailer lines
    Notice,
    /// Something in the telegram was not understood
    Warning,
    /// The meter reports a condition that needs attention
    Alert,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayValue {
    pub text: String,
    pub severity: Severity,
}

impl DisplayValue {
    fn normal(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            severity: Severity::Normal,
        }
    }

    fn with(severity: Severity, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            severity,
        }
    }
}

/// One row of the telegram table: `(obis, field name, description, value)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedLine {
    pub obis: String,
    pub name: String,
    pub description: String,
    pub display: DisplayValue,
}

impl DecodedLine {
    fn marker(line: &str) -> Self {
        Self {
            obis: "-".into(),
            name: "-".into(),
            description: "-".into(),
            display: DisplayValue::with(Severity::Notice, line),
        }
    }

    fn unknown(obis: &str, description: String, line: &str) -> Self {
        Self {
            obis: obis.into(),
            name: String::new(),
            description,
            display: DisplayValue::with(Severity::Warning, line),
        }
    }

    pub fn is_warning(&self) -> bool {
        self.display.severity == Severity::Warning
    }
}

/// Holds the readings of the telegram being decoded and the devices seen on
/// the M-Bus channels.
#[derive(Debug, Default)]
pub struct TelegramDecoder {
    registry: ReadingRegistry,
    buses: BTreeMap<u8, Device>,
}

impl TelegramDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Readings of the last decoded telegram
    pub fn registry(&self) -> &ReadingRegistry {
        &self.registry
    }

    /// Bus number to device type, as announced by the meter
    pub fn buses(&self) -> &BTreeMap<u8, Device> {
        &self.buses
    }

    /// Decodes all lines of a validated telegram. The registry is replaced,
    /// not merged, so it only ever holds values of this telegram.
    pub fn decode_telegram(
        &mut self,
        telegram: &Telegram,
        live: &mut CurrentReadings,
    ) -> Vec<DecodedLine> {
        self.registry.clear();
        telegram
            .lines()
            .map(|line| self.decode_line(&line, live))
            .collect()
    }

    /// Decodes one line, updating the registry and the live reading slot
    pub fn decode_line(&mut self, line: &str, live: &mut CurrentReadings) -> DecodedLine {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('/') || line.starts_with('!') {
            return DecodedLine::marker(line);
        }
        let Some(open) = line.find('(') else {
            warn!(line, "No OBIS code in line");
            return DecodedLine::unknown("-", "?? No OBIS code in line".into(), line);
        };
        let code = &line[..open];
        let Some(def) = obis::lookup(code) else {
            warn!(obis = code, "OBIS code not recognised");
            return DecodedLine::unknown(code, format!("?? OBIS code {code} not recognised"), line);
        };

        let groups = value_groups(line);
        match self.decode_value(def, &groups) {
            Ok((reading, display)) => {
                if let Some(slot) = def.live {
                    live.apply(slot, &reading);
                }
                self.registry.insert(def.obis, reading);
                DecodedLine {
                    obis: def.obis.into(),
                    name: def.name.into(),
                    description: def.description.into(),
                    display,
                }
            }
            Err(reason) => {
                warn!(obis = def.obis, %reason, line, "Cannot decode value");
                DecodedLine {
                    obis: def.obis.into(),
                    name: def.name.into(),
                    description: def.description.into(),
                    display: DisplayValue::with(Severity::Warning, format!("?? {reason}: {line}")),
                }
            }
        }
    }

    fn decode_value(
        &mut self,
        def: &FieldDefinition,
        groups: &[&str],
    ) -> Result<(Reading, DisplayValue), String> {
        let first = *groups.first().ok_or("no value in line")?;
        match def.shape {
            ValueShape::OpaqueText => {
                if def.obis == GRID_CONFIG && first != "230" && first != "400" {
                    error!(obis = def.obis, value = first, "Grid expecting 230 or 400");
                }
                Ok((Reading::Text(first.into()), DisplayValue::normal(first)))
            }
            ValueShape::HexText => {
                let text = decode_hex_text(first).ok_or_else(|| format!("invalid hex `{first}`"))?;
                let display = DisplayValue::normal(text.as_str());
                Ok((Reading::Text(text), display))
            }
            ValueShape::Measurement => self.decode_measurement(def, first),
            ValueShape::TimestampedMeasurement => {
                let reading = decode_timestamped(groups)?;
                let display = DisplayValue::normal(format!(
                    "{} {} {}",
                    format_timestamp(&reading.time),
                    reading.value,
                    reading.unit
                ));
                Ok((Reading::Timestamped(reading), display))
            }
            ValueShape::PeakTable => {
                let table = decode_peak_table(def, groups)?;
                let display = DisplayValue::normal(format!("see table, month peaks ={}", table.lines));
                Ok((Reading::PeakTable(table), display))
            }
            ValueShape::ProtocolTimestamp => {
                let time = parse_timestamp(first);
                Ok((Reading::Timestamp(time), DisplayValue::normal(format_timestamp(&time))))
            }
            ValueShape::StatusCode => {
                let state: u8 = first
                    .parse()
                    .map_err(|_| format!("invalid status `{first}`"))?;
                if state == 2 {
                    let mut text = format!("!! Reconnect={state}");
                    if def.obis == MAIN_BREAKER {
                        text.push_str(" press yellow button 5s");
                    }
                    warn!(obis = def.obis, "Breaker is ready for manual reconnect");
                    return Ok((Reading::Status(state), DisplayValue::with(Severity::Alert, text)));
                }
                Ok((Reading::Status(state), DisplayValue::normal(state.to_string())))
            }
            ValueShape::DeviceTypeCode => {
                let device = match first {
                    "003" => Device::Gas,
                    "007" => Device::Water,
                    other => {
                        warn!(obis = def.obis, device_type = other, "Unknown device type");
                        return Ok((
                            Reading::UnknownDevice(other.into()),
                            DisplayValue::with(Severity::Warning, format!("?? device type: {other}")),
                        ));
                    }
                };
                if let Some(bus) = obis::bus_number(def.obis) {
                    debug!(bus, %device, "Registered bus device");
                    self.buses.insert(bus, device);
                }
                Ok((Reading::Device(device), DisplayValue::normal(format!("{first} -> {device}"))))
            }
        }
    }

    fn decode_measurement(
        &self,
        def: &FieldDefinition,
        text: &str,
    ) -> Result<(Reading, DisplayValue), String> {
        let quantity = Quantity::parse(text).ok_or_else(|| format!("invalid number `{text}`"))?;
        let raw_value = text.split_once('*').map_or(text, |(value, _)| value);
        let shown = format!("{raw_value} {}", quantity.unit);

        let three_phase = self.registry.text(GRID_CONFIG) == Some("400");
        if three_phase && PHASE_VOLTAGES.contains(&def.obis) && quantity.value.as_f64() < 200.0 {
            let msg = format!("!! PHASE DEACTIVE {shown}");
            error!(obis = def.obis, "{msg}");
            return Ok((Reading::Quantity(quantity), DisplayValue::with(Severity::Alert, msg)));
        }
        Ok((Reading::Quantity(quantity), DisplayValue::normal(shown)))
    }
}

/// Contents of every `(...)` group after the OBIS code
fn value_groups(line: &str) -> Vec<&str> {
    let mut groups = Vec::new();
    let mut rest = line;
    while let Some(open) = rest.find('(') {
        let after = &rest[open + 1..];
        let Some(close) = after.find(')') else {
            break;
        };
        groups.push(&after[..close]);
        rest = &after[close + 1..];
    }
    groups
}

fn decode_hex_text(hex: &str) -> Option<String> {
    if hex.len() % 2 != 0 {
        return None;
    }
    let bytes: Option<Vec<u8>> = (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect();
    String::from_utf8(bytes?).ok()
}

fn decode_timestamped(groups: &[&str]) -> Result<Timestamped, String> {
    let [time, value, ..] = groups else {
        return Err("expecting timestamp and value".into());
    };
    let quantity = Quantity::parse(value).ok_or_else(|| format!("invalid number `{value}`"))?;
    Ok(Timestamped {
        time: parse_timestamp(time),
        value: quantity.value,
        unit: quantity.unit,
    })
}

fn decode_peak_table(def: &FieldDefinition, groups: &[&str]) -> Result<PeakTable, String> {
    let lines: usize = groups[0]
        .parse()
        .map_err(|_| format!("invalid row count `{}`", groups[0]))?;
    let ids: Vec<String> = groups[1..]
        .iter()
        .take_while(|g| g.contains(':'))
        .map(|g| g.to_string())
        .collect();
    for id in &ids {
        let timestamped = obis::lookup(id)
            .map(|d| d.shape == ValueShape::TimestampedMeasurement)
            .unwrap_or(false);
        if !timestamped {
            warn!(obis = def.obis, id = id.as_str(), "Expecting timestamped measurement columns");
        }
    }

    let rows = &groups[1 + ids.len()..];
    if rows.len() % 3 != 0 {
        warn!(obis = def.obis, extra = rows.len() % 3, "Incomplete peak table row ignored");
    }
    let mut table = BTreeMap::new();
    for row in rows.chunks_exact(3) {
        let Some(quantity) = Quantity::parse(row[2]) else {
            warn!(obis = def.obis, value = row[2], "Invalid peak value ignored");
            continue;
        };
        table.insert(
            parse_timestamp(row[0]),
            PeakRow {
                peak_time: parse_timestamp(row[1]),
                value: quantity.value,
                unit: quantity.unit,
            },
        );
    }
    if table.len() != lines {
        debug!(obis = def.obis, lines, rows = table.len(), "Peak table row count differs");
    }
    Ok(PeakTable { lines, ids, table })
}
