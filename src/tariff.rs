use serde_derive::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{MeterError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DayNight {
    #[serde(rename = "Day")]
    pub day: f64,
    #[serde(rename = "Night")]
    pub night: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElectricityRates {
    #[serde(rename = "+")]
    pub consumed: DayNight,
    #[serde(rename = "-")]
    pub produced: DayNight,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeRate {
    #[serde(rename = "+")]
    pub consumed: f64,
}

/// Prices per unit, read once from `rates.json`:
///
/// ```json
/// {"Electricity": {"+": {"Day": 0.40, "Night": 0.30}, "-": {"Day": 0.05, "Night": 0.04}},
///  "Gas": {"+": 1.20}, "Water": {"+": 4.50}}
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tariffs {
    #[serde(rename = "Electricity")]
    pub electricity: ElectricityRates,
    #[serde(rename = "Gas")]
    pub gas: VolumeRate,
    #[serde(rename = "Water")]
    pub water: VolumeRate,
}

impl Tariffs {
    /// Loads the tariff file. Any missing or non-finite rate is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let fail = |reason: String| MeterError::Tariff {
            path: path.to_path_buf(),
            reason,
        };
        let text = fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
        let tariffs: Tariffs = serde_json::from_str(&text).map_err(|e| fail(e.to_string()))?;
        if let Some((name, _)) = tariffs.rates().into_iter().find(|(_, v)| !v.is_finite()) {
            return Err(fail(format!("rate {name} is not a number")));
        }
        Ok(tariffs)
    }

    /// Electricity rates in counter order `+Day, -Day, +Night, -Night`
    pub fn electricity_by_counter(&self) -> [f64; 4] {
        let e = &self.electricity;
        [e.consumed.day, e.produced.day, e.consumed.night, e.produced.night]
    }

    fn rates(&self) -> [(&'static str, f64); 6] {
        let [plus_day, min_day, plus_night, min_night] = self.electricity_by_counter();
        [
            ("+Day", plus_day),
            ("-Day", min_day),
            ("+Night", plus_night),
            ("-Night", min_night),
            ("Gas", self.gas.consumed),
            ("Water", self.water.consumed),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const RATES: &str = r#"{"Electricity": {"+": {"Day": 0.40, "Night": 0.30}, "-": {"Day": 0.05, "Night": 0.04}},
        "Gas": {"+": 1.20}, "Water": {"+": 4.50}}"#;

    fn write_rates(text: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_rates() {
        let file = write_rates(RATES);
        let tariffs = Tariffs::load(file.path()).unwrap();
        assert_eq!(tariffs.electricity.consumed.day, 0.40);
        assert_eq!(tariffs.electricity.produced.night, 0.04);
        assert_eq!(tariffs.gas.consumed, 1.20);
        assert_eq!(tariffs.electricity_by_counter(), [0.40, 0.05, 0.30, 0.04]);
    }

    #[test]
    fn test_missing_rate_is_error() {
        let file = write_rates(r#"{"Electricity": {"+": {"Day": 0.40}}, "Gas": {"+": 1}, "Water": {"+": 1}}"#);
        let err = Tariffs::load(file.path()).unwrap_err();
        assert!(matches!(err, MeterError::Tariff { .. }));
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Tariffs::load(dir.path().join("rates.json")).unwrap_err();
        assert!(err.to_string().contains("rates.json"));
    }

    #[test]
    fn test_rates_serialize_with_file_names() {
        let file = write_rates(RATES);
        let tariffs = Tariffs::load(file.path()).unwrap();
        let value = serde_json::to_value(tariffs).unwrap();
        assert_eq!(value["Electricity"]["-"]["Day"], serde_json::json!(0.05));
        assert_eq!(value["Water"]["+"], serde_json::json!(4.5));
    }
}
