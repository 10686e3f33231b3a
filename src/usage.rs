//! Turns consecutive meter readings into usage and cost per period.

use chrono::{Datelike, NaiveDateTime, Weekday};
use tracing::{debug, error, info};

use crate::readings::CurrentReadings;
use crate::state::{
    Cumulative, ElectricityMirror, EngineState, Period, VolumeMirror, ROW_EURO, ROW_GAS_EURO,
    ROW_GAS_M3, ROW_NET_EURO, ROW_NET_KWH, ROW_WATER_EURO, ROW_WATER_M3,
};
use crate::state_store::DayArchive;
use crate::tariff::Tariffs;

/// What happened on one accepted tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickOutcome {
    pub observed: NaiveDateTime,
    /// Observed time of the previous tick, `None` on the first observation
    pub previous: Option<NaiveDateTime>,
    pub day_rolled: bool,
}

/// Difference between two register values, allowing for the register
/// wrapping around at the next power of ten of the old value.
pub fn flip_delta(old: f64, new: f64) -> f64 {
    if new.abs() < old.abs() {
        let digits = format!("{}", old.abs().trunc() as u64).len() as i32;
        10f64.powi(digits) + new - old
    } else {
        new - old
    }
}

/// Per row difference between two snapshots. The four raw electricity
/// registers and their cost use the wraparound correction.
pub fn delta(old: &Cumulative, new: &Cumulative, tariffs: &Tariffs) -> Cumulative {
    let mut d = Cumulative::zero();
    for (row, value) in d.0.iter_mut().enumerate() {
        *value = new[row] - old[row];
    }
    for (row, rate) in tariffs.electricity_by_counter().into_iter().enumerate() {
        let raw = flip_delta(old[row], new[row]);
        d[row] = raw;
        d[ROW_EURO + row] = raw * rate;
    }
    d
}

pub struct UsageEngine {
    tariffs: Tariffs,
    week_end: Weekday,
}

impl UsageEngine {
    /// `week_end` is the last day of the week; `Week` resets after it
    pub fn new(tariffs: Tariffs, week_end: Weekday) -> Self {
        Self { tariffs, week_end }
    }

    pub fn tariffs(&self) -> &Tariffs {
        &self.tariffs
    }

    /// Counters and their cost for the current live readings
    pub fn cumulative(&self, live: &CurrentReadings) -> Cumulative {
        let counters = [
            live.kwh_day_plus,
            live.kwh_day_min,
            live.kwh_night_plus,
            live.kwh_night_min,
        ];
        let rates = self.tariffs.electricity_by_counter();
        let mut c = Cumulative::zero();
        for row in 0..counters.len() {
            c[row] = counters[row];
            c[ROW_EURO + row] = counters[row] * rates[row];
        }
        c[ROW_NET_KWH] = c[0] - c[1] + c[2] - c[3];
        c[ROW_NET_EURO] = c[ROW_EURO] - c[ROW_EURO + 1] + c[ROW_EURO + 2] - c[ROW_EURO + 3];
        c[ROW_GAS_M3] = live.gas_m3();
        c[ROW_GAS_EURO] = live.gas_m3() * self.tariffs.gas.consumed;
        c[ROW_WATER_M3] = live.water_m3();
        c[ROW_WATER_EURO] = live.water_m3() * self.tariffs.water.consumed;
        c
    }

    /// Applies one tick to the ledger. Returns `None` until the meter has
    /// reported its clock.
    pub fn update(
        &self,
        state: &mut EngineState,
        live: &CurrentReadings,
        archive: &dyn DayArchive,
    ) -> Option<TickOutcome> {
        let observed = live.time_now?;
        update_mirrors(state, live);

        let now = self.cumulative(live);
        let mut day_rolled = false;
        let previous = match (state.cumulative, state.observed_time) {
            (Some(prev_cumul), Some(prev_time)) => {
                let d = delta(&prev_cumul, &now, &self.tariffs);
                if prev_time.date() != observed.date() {
                    self.roll_over(state, prev_time, observed, archive);
                    day_rolled = true;
                }
                for period in Period::ALL.into_iter().filter(|p| !p.is_history()) {
                    state.usage.get_mut(period).add(&d);
                }
                Some(prev_time)
            }
            _ => {
                debug!(%observed, "First observation, counters become the baseline");
                state.quarter_peak = 0.0;
                None
            }
        };

        state.observed_time = Some(observed);
        state.cumulative = Some(now);
        state.prev_quarter_peak = state.quarter_peak;
        state.quarter_peak = live.quarter_peak;

        Some(TickOutcome {
            observed,
            previous,
            day_rolled,
        })
    }

    fn roll_over(
        &self,
        state: &mut EngineState,
        prev: NaiveDateTime,
        now: NaiveDateTime,
        archive: &dyn DayArchive,
    ) {
        info!(day = %prev.date(), "Day ended, archiving usage");
        if let Err(e) = archive.archive_day(state) {
            error!(error = %e, "Cannot archive day usage");
        }
        state.usage.shift_days();
        state.day_peak.shift_days();

        if prev.weekday() == self.week_end {
            info!("Week ended");
            state.usage.week = Cumulative::zero();
        }
        if prev.month() != now.month() || prev.year() != now.year() {
            info!("Month ended");
            state.usage.month = Cumulative::zero();
        }
        if prev.year() != now.year() {
            info!("Year ended");
            state.usage.year = Cumulative::zero();
        }
    }
}

fn update_mirrors(state: &mut EngineState, live: &CurrentReadings) {
    state.meters.electricity = ElectricityMirror {
        plus_day: live.kwh_day_plus,
        min_day: live.kwh_day_min,
        plus_night: live.kwh_night_plus,
        min_night: live.kwh_night_min,
    };
    if let Some(gas) = &live.gas_meter {
        state.meters.gas = VolumeMirror {
            value: gas.value.as_f64(),
            time: Some(gas.time),
            unit: gas.unit.clone(),
        };
    }
    if let Some(water) = &live.water_meter {
        state.meters.water = VolumeMirror {
            value: water.value.as_f64(),
            time: Some(water.time),
            unit: water.unit.clone(),
        };
    }
}
