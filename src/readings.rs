//! Decoded telegram values, the per-telegram registry and the live reading set.

use chrono::NaiveDateTime;
use serde_derive::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::obis::LiveField;

/// A number as written by the meter: integer unless it contains a `.`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Numeric {
    Int(i64),
    Float(f64),
}

impl Numeric {
    pub fn parse(text: &str) -> Option<Self> {
        if text.contains('.') {
            text.parse().ok().map(Numeric::Float)
        } else {
            text.parse().ok().map(Numeric::Int)
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Numeric::Int(v) => v as f64,
            Numeric::Float(v) => v,
        }
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Numeric::Int(v) => write!(f, "{v}"),
            Numeric::Float(v) => write!(f, "{v}"),
        }
    }
}

/// `value*unit`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: Numeric,
    pub unit: String,
}

impl Quantity {
    /// Splits `000123.456*kWh` into its number and unit
    pub fn parse(text: &str) -> Option<Self> {
        let (value, unit) = text.split_once('*').unwrap_or((text, ""));
        Some(Self {
            value: Numeric::parse(value)?,
            unit: unit.to_string(),
        })
    }
}

/// A quantity with the time the meter captured it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timestamped {
    pub time: NaiveDateTime,
    pub value: Numeric,
    pub unit: String,
}

/// One row of the historical monthly peak table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakRow {
    pub peak_time: NaiveDateTime,
    pub value: Numeric,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakTable {
    pub lines: usize,
    pub ids: Vec<String>,
    pub table: BTreeMap<NaiveDateTime, PeakRow>,
}

/// Device found on one of the M-Bus channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Gas,
    Water,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Gas => write!(f, "gas"),
            Device::Water => write!(f, "water"),
        }
    }
}

/// Decoded value of one telegram line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Reading {
    Text(String),
    Quantity(Quantity),
    Timestamped(Timestamped),
    PeakTable(PeakTable),
    Timestamp(NaiveDateTime),
    Status(u8),
    Device(Device),
    /// Device type code that is not known
    UnknownDevice(String),
}

/// Latest decoded value per OBIS code, scoped to the telegram being processed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadingRegistry {
    values: HashMap<String, Reading>,
}

impl ReadingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets the previous telegram
    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn insert(&mut self, obis: &str, reading: Reading) {
        self.values.insert(obis.to_string(), reading);
    }

    pub fn get(&self, obis: &str) -> Option<&Reading> {
        self.values.get(obis)
    }

    /// Text value of an OBIS code, if it decoded as text
    pub fn text(&self, obis: &str) -> Option<&str> {
        match self.values.get(obis) {
            Some(Reading::Text(text)) => Some(text),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// The live values the ledger works from.
///
/// Every line whose field has a [`LiveField`] slot updates exactly one member
/// here. Values persist across telegrams until the meter reports a new one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrentReadings {
    pub time_now: Option<NaiveDateTime>,
    pub active_rate: Option<String>,
    pub kwh_day_plus: f64,
    pub kwh_night_plus: f64,
    pub kwh_day_min: f64,
    pub kwh_night_min: f64,
    pub kw_plus: f64,
    pub kw_min: f64,
    pub v_grid: Option<String>,
    pub month_peak: Option<Timestamped>,
    pub quarter_peak: f64,
    pub gas_meter: Option<Timestamped>,
    pub water_meter: Option<Timestamped>,
}

impl CurrentReadings {
    /// Stores a decoded reading in its slot. Readings of the wrong kind for
    /// the slot are ignored.
    pub fn apply(&mut self, slot: LiveField, reading: &Reading) {
        match (slot, reading) {
            (LiveField::TimeNow, Reading::Timestamp(time)) => self.time_now = Some(*time),
            (LiveField::ActiveRate, Reading::Text(rate)) => self.active_rate = Some(rate.clone()),
            (LiveField::GridVoltage, Reading::Text(grid)) => self.v_grid = Some(grid.clone()),
            (LiveField::KwhDayPlus, Reading::Quantity(q)) => self.kwh_day_plus = q.value.as_f64(),
            (LiveField::KwhNightPlus, Reading::Quantity(q)) => {
                self.kwh_night_plus = q.value.as_f64()
            }
            (LiveField::KwhDayMin, Reading::Quantity(q)) => self.kwh_day_min = q.value.as_f64(),
            (LiveField::KwhNightMin, Reading::Quantity(q)) => self.kwh_night_min = q.value.as_f64(),
            (LiveField::KwPlus, Reading::Quantity(q)) => self.kw_plus = q.value.as_f64(),
            (LiveField::KwMin, Reading::Quantity(q)) => self.kw_min = q.value.as_f64(),
            (LiveField::QuarterPeak, Reading::Quantity(q)) => self.quarter_peak = q.value.as_f64(),
            (LiveField::MonthPeak, Reading::Timestamped(t)) => self.month_peak = Some(t.clone()),
            (LiveField::GasMeter, Reading::Timestamped(t)) => self.gas_meter = Some(t.clone()),
            (LiveField::WaterMeter, Reading::Timestamped(t)) => self.water_meter = Some(t.clone()),
            _ => {}
        }
    }

    /// Current tariff period reported by the meter, day unless it says `2`
    pub fn is_night_rate(&self) -> bool {
        self.active_rate
            .as_deref()
            .and_then(|rate| rate.trim().parse::<u32>().ok())
            == Some(2)
    }

    pub fn gas_m3(&self) -> f64 {
        self.gas_meter.as_ref().map_or(0.0, |m| m.value.as_f64())
    }

    pub fn water_m3(&self) -> f64 {
        self.water_meter.as_ref().map_or(0.0, |m| m.value.as_f64())
    }

    pub fn month_peak_kw(&self) -> f64 {
        self.month_peak.as_ref().map_or(0.0, |m| m.value.as_f64())
    }

    /// JSON value of a live slot, addressed by its field name
    pub fn field(&self, name: &str) -> Option<serde_json::Value> {
        let value = match name {
            "time_now" => serde_json::to_value(self.time_now?),
            "active_rate" => serde_json::to_value(self.active_rate.as_ref()?),
            "kwh_day_plus" => serde_json::to_value(self.kwh_day_plus),
            "kwh_night_plus" => serde_json::to_value(self.kwh_night_plus),
            "kwh_day_min" => serde_json::to_value(self.kwh_day_min),
            "kwh_night_min" => serde_json::to_value(self.kwh_night_min),
            "kw_plus" => serde_json::to_value(self.kw_plus),
            "kw_min" => serde_json::to_value(self.kw_min),
            "v_grid" => serde_json::to_value(self.v_grid.as_ref()?),
            "month_peak" => serde_json::to_value(self.month_peak.as_ref()?),
            "quarter_peak" => serde_json::to_value(self.quarter_peak),
            "gas_meter" => serde_json::to_value(self.gas_meter.as_ref()?),
            "water_meter" => serde_json::to_value(self.water_meter.as_ref()?),
            _ => return None,
        };
        value.ok()
    }
}
