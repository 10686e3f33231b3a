//! Extrapolates the running quarter-hour average to the end of the quarter
//! and tracks the highest quarter of the day.

use chrono::{Duration, NaiveDateTime, Timelike};
use serde_derive::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::state::{DayPeak, EngineState};
use crate::usage::TickOutcome;

/// Length of a capacity tariff quarter
pub const QUARTER_SECONDS: i64 = 900;
/// A forecast that jumps by this much early in a quarter is ignored
const DAMPING_KW: f64 = 1.0;
const DAMPING_SECONDS: i64 = 5;
/// Seconds before the end of the quarter at which the day peak is taken
const CLOSING_SECONDS: i64 = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastOutcome {
    pub forecast: f64,
    /// Month peak minus forecast
    pub gap: f64,
    pub within_budget: bool,
    /// A new day peak was recorded on this tick
    pub day_peak_updated: bool,
}

/// Seconds elapsed in the current quarter
pub fn quarter_elapsed(time: &NaiveDateTime) -> i64 {
    i64::from(time.minute() % 15) * 60 + i64::from(time.second())
}

/// Updates the stored forecast and today's peak after a ledger tick.
/// `month_peak` is the peak the meter reports for the running month.
pub fn update_forecast(
    state: &mut EngineState,
    tick: &TickOutcome,
    month_peak: f64,
) -> ForecastOutcome {
    let current = state.quarter_peak;
    let clock_done = quarter_elapsed(&tick.observed);
    let mut day_peak_updated = false;

    match tick.previous {
        None => state.peak_forecast = current,
        Some(previous) => {
            let clock_step = (tick.observed - previous).num_seconds();
            let peak_step = current - state.prev_quarter_peak;
            let forecast = if clock_step > 0 {
                current + peak_step / clock_step as f64 * (QUARTER_SECONDS - clock_done) as f64
            } else {
                current
            };

            if clock_done > DAMPING_SECONDS || (forecast - state.peak_forecast).abs() < DAMPING_KW {
                state.peak_forecast = forecast;
            } else {
                debug!(forecast, stored = state.peak_forecast, "Forecast jump at quarter start ignored");
            }

            if QUARTER_SECONDS - clock_done < CLOSING_SECONDS
                && state.peak_forecast > state.day_peak.today.value
            {
                let quarter_start = tick.observed - Duration::seconds(clock_done);
                info!(peak = state.peak_forecast, %quarter_start, "New day peak");
                state.day_peak.today = DayPeak {
                    value: state.peak_forecast,
                    time: Some(quarter_start),
                };
                day_peak_updated = true;
            }
        }
    }

    let gap = month_peak - state.peak_forecast;
    ForecastOutcome {
        forecast: state.peak_forecast,
        gap,
        within_budget: gap >= 0.0,
        day_peak_updated,
    }
}
