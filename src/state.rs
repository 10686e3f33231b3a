//! The persisted ledger: meter mirrors, usage per period, day peaks and the
//! values the next tick needs to compute deltas and forecasts.

use chrono::NaiveDateTime;
use serde_derive::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};

pub const ROW_COUNT: usize = 14;

/// Row labels of a [`Cumulative`], in storage order
pub const ROW_LABELS: [&str; ROW_COUNT] = [
    "+Day",
    "-Day",
    "+Night",
    "-Night",
    "Σ kWh",
    "+€ Day",
    "-€ Day",
    "+€ Night",
    "-€ Night",
    "Σ € kWh",
    "m3 Gas",
    "Σ € Gas",
    "m3 Water",
    "Σ € Water",
];

pub const ROW_NET_KWH: usize = 4;
/// First monetary row; rows `ROW_EURO..ROW_EURO + 4` price the four raw counters
pub const ROW_EURO: usize = 5;
pub const ROW_NET_EURO: usize = 9;
pub const ROW_GAS_M3: usize = 10;
pub const ROW_GAS_EURO: usize = 11;
pub const ROW_WATER_M3: usize = 12;
pub const ROW_WATER_EURO: usize = 13;

/// Fixed order vector of counters and their cost
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cumulative(pub [f64; ROW_COUNT]);

impl Cumulative {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn add(&mut self, other: &Cumulative) {
        for (total, delta) in self.0.iter_mut().zip(other.0.iter()) {
            *total += delta;
        }
    }

    /// `(label, value)` pairs in row order
    pub fn rows(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        ROW_LABELS.iter().copied().zip(self.0.iter().copied())
    }
}

impl Index<usize> for Cumulative {
    type Output = f64;

    fn index(&self, row: usize) -> &f64 {
        &self.0[row]
    }
}

impl IndexMut<usize> for Cumulative {
    fn index_mut(&mut self, row: usize) -> &mut f64 {
        &mut self.0[row]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "Day-3")]
    Day3,
    #[serde(rename = "Day-2")]
    Day2,
    #[serde(rename = "Day-1")]
    Day1,
    Today,
    Week,
    Month,
    Year,
}

impl Period {
    pub const ALL: [Period; 7] = [
        Period::Day3,
        Period::Day2,
        Period::Day1,
        Period::Today,
        Period::Week,
        Period::Month,
        Period::Year,
    ];

    /// History columns are only ever copied at day rollover
    pub fn is_history(self) -> bool {
        matches!(self, Period::Day3 | Period::Day2 | Period::Day1)
    }

    pub fn label(self) -> &'static str {
        match self {
            Period::Day3 => "Day-3",
            Period::Day2 => "Day-2",
            Period::Day1 => "Day-1",
            Period::Today => "Today",
            Period::Week => "Week",
            Period::Month => "Month",
            Period::Year => "Year",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Accumulated deltas per period
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageBuckets {
    #[serde(rename = "Day-3")]
    pub day_3: Cumulative,
    #[serde(rename = "Day-2")]
    pub day_2: Cumulative,
    #[serde(rename = "Day-1")]
    pub day_1: Cumulative,
    #[serde(rename = "Today")]
    pub today: Cumulative,
    #[serde(rename = "Week")]
    pub week: Cumulative,
    #[serde(rename = "Month")]
    pub month: Cumulative,
    #[serde(rename = "Year")]
    pub year: Cumulative,
}

impl UsageBuckets {
    pub fn get(&self, period: Period) -> &Cumulative {
        match period {
            Period::Day3 => &self.day_3,
            Period::Day2 => &self.day_2,
            Period::Day1 => &self.day_1,
            Period::Today => &self.today,
            Period::Week => &self.week,
            Period::Month => &self.month,
            Period::Year => &self.year,
        }
    }

    pub fn get_mut(&mut self, period: Period) -> &mut Cumulative {
        match period {
            Period::Day3 => &mut self.day_3,
            Period::Day2 => &mut self.day_2,
            Period::Day1 => &mut self.day_1,
            Period::Today => &mut self.today,
            Period::Week => &mut self.week,
            Period::Month => &mut self.month,
            Period::Year => &mut self.year,
        }
    }

    /// Moves every day one column back and clears today
    pub fn shift_days(&mut self) {
        self.day_3 = self.day_2;
        self.day_2 = self.day_1;
        self.day_1 = self.today;
        self.today = Cumulative::zero();
    }
}

/// Highest quarter-hour forecast recorded for one day
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DayPeak {
    pub value: f64,
    pub time: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DayPeaks {
    #[serde(rename = "Day-3")]
    pub day_3: DayPeak,
    #[serde(rename = "Day-2")]
    pub day_2: DayPeak,
    #[serde(rename = "Day-1")]
    pub day_1: DayPeak,
    #[serde(rename = "Today")]
    pub today: DayPeak,
}

impl DayPeaks {
    pub fn shift_days(&mut self) {
        self.day_3 = self.day_2;
        self.day_2 = self.day_1;
        self.day_1 = self.today;
        self.today = DayPeak::default();
    }
}

/// Last applied electricity counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ElectricityMirror {
    #[serde(rename = "+Day")]
    pub plus_day: f64,
    #[serde(rename = "-Day")]
    pub min_day: f64,
    #[serde(rename = "+Night")]
    pub plus_night: f64,
    #[serde(rename = "-Night")]
    pub min_night: f64,
}

/// Last applied gas or water register
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeMirror {
    pub value: f64,
    pub time: Option<NaiveDateTime>,
    pub unit: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeterMirrors {
    #[serde(rename = "Electricity")]
    pub electricity: ElectricityMirror,
    #[serde(rename = "Gas")]
    pub gas: VolumeMirror,
    #[serde(rename = "Water")]
    pub water: VolumeMirror,
}

/// Everything the ledger persists between runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    pub meters: MeterMirrors,
    pub usage: UsageBuckets,
    pub day_peak: DayPeaks,
    /// Counters of the last tick, `None` until the first observation
    pub cumulative: Option<Cumulative>,
    pub observed_time: Option<NaiveDateTime>,
    pub quarter_peak: f64,
    pub prev_quarter_peak: f64,
    pub peak_forecast: f64,
    pub start_time: NaiveDateTime,
}

impl EngineState {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            meters: MeterMirrors::default(),
            usage: UsageBuckets::default(),
            day_peak: DayPeaks::default(),
            cumulative: None,
            observed_time: None,
            quarter_peak: 0.0,
            prev_quarter_peak: 0.0,
            peak_forecast: 0.0,
            start_time: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_shift_days() {
        let mut usage = UsageBuckets::default();
        usage.today[0] = 3.0;
        usage.day_1[0] = 2.0;
        usage.day_2[0] = 1.0;
        usage.shift_days();
        assert_eq!(usage.day_3[0], 1.0);
        assert_eq!(usage.day_2[0], 2.0);
        assert_eq!(usage.day_1[0], 3.0);
        assert_eq!(usage.today, Cumulative::zero());
    }

    #[test]
    fn test_period_access() {
        let mut usage = UsageBuckets::default();
        usage.get_mut(Period::Week)[ROW_GAS_M3] = 1.5;
        assert_eq!(usage.week[ROW_GAS_M3], 1.5);
        assert_eq!(Period::ALL.iter().filter(|p| p.is_history()).count(), 3);
    }

    #[test]
    fn test_state_json_layout() {
        let now = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        let value = serde_json::to_value(EngineState::new(now)).unwrap();
        assert_eq!(value["usage"]["Day-3"].as_array().unwrap().len(), ROW_COUNT);
        assert!(value["meters"]["Electricity"]["+Day"].is_number());
        assert!(value["cumulative"].is_null());
    }

    #[test]
    fn test_rows_are_labelled() {
        let mut c = Cumulative::zero();
        c[ROW_WATER_EURO] = 2.0;
        let last = c.rows().last().unwrap();
        assert_eq!(last, ("Σ € Water", 2.0));
    }
}
