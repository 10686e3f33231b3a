use chrono::NaiveDateTime;
use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::line_decoder::DecodedLine;
use crate::obis;
use crate::peak_forecaster::ForecastOutcome;
use crate::readings::{CurrentReadings, Device, ReadingRegistry};
use crate::state::{DayPeaks, EngineState, UsageBuckets};

/// Read-only view of the meter after the last accepted telegram
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterSnapshot {
    pub table: Vec<DecodedLine>,
    pub readings: ReadingRegistry,
    pub live: CurrentReadings,
    pub state: EngineState,
    pub forecast: ForecastOutcome,
    pub buses: BTreeMap<u8, Device>,
}

impl MeterSnapshot {
    /// Snapshot before the first telegram arrives
    pub fn from_state(state: EngineState) -> Self {
        Self {
            table: Vec::new(),
            readings: ReadingRegistry::new(),
            live: CurrentReadings::default(),
            state,
            forecast: ForecastOutcome::default(),
            buses: BTreeMap::new(),
        }
    }

    pub fn usage(&self) -> &UsageBuckets {
        &self.state.usage
    }

    pub fn day_peak(&self) -> &DayPeaks {
        &self.state.day_peak
    }

    pub fn observed_time(&self) -> Option<NaiveDateTime> {
        self.state.observed_time
    }

    /// Value of a field by name: live slots first, then any reading of the
    /// last telegram carrying that name.
    pub fn lookup(&self, field: &str) -> Option<serde_json::Value> {
        self.live.field(field).or_else(|| {
            obis::by_name(field)
                .find_map(|def| self.readings.get(def.obis))
                .and_then(|reading| serde_json::to_value(reading).ok())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readings::Reading;
    use chrono::NaiveDate;
    use serde_json::json;

    fn snapshot() -> MeterSnapshot {
        let now = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        MeterSnapshot::from_state(EngineState::new(now))
    }

    #[test]
    fn test_lookup_live_field() {
        let mut snap = snapshot();
        snap.live.kw_plus = 0.75;
        assert_eq!(snap.lookup("kw_plus"), Some(json!(0.75)));
    }

    #[test]
    fn test_lookup_registry_by_name() {
        let mut snap = snapshot();
        snap.readings.insert("0-0:96.3.10", Reading::Status(1));
        assert_eq!(
            snap.lookup("breaker_0"),
            Some(json!({"kind": "status", "value": 1}))
        );
        assert_eq!(snap.lookup("breaker_1"), None);
        assert_eq!(snap.lookup("no_such_field"), None);
    }
}
