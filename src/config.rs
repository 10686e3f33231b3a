//! Runtime settings, read once from the environment.

use chrono::Weekday;
use reqwest::Url;
use std::env;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use tracing::info;

use crate::error::{MeterError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub serial_port: String,
    pub baud_rate: u32,
    pub state_file: PathBuf,
    pub history_dir: PathBuf,
    pub tariff_file: PathBuf,
    /// Last day of the week; `Week` usage resets after it
    pub week_end: Weekday,
    pub relay_destinations: Vec<Url>,
    pub relay_listen: Option<SocketAddr>,
    /// Empty accepts every remote address
    pub relay_remote_ips: Vec<IpAddr>,
    pub log_json: bool,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the settings from any key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let or = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let baud_rate = or("P1_BAUD_RATE", "115200");
        let week_end = or("P1_WEEK_END", "Sun");
        Ok(Self {
            serial_port: or("P1_SERIAL_PORT", "/dev/ttyUSB0"),
            baud_rate: parse("P1_BAUD_RATE", &baud_rate)?,
            state_file: or("P1_STATE_FILE", "data.json").into(),
            history_dir: or("P1_HISTORY_DIR", "./history/").into(),
            tariff_file: or("P1_TARIFF_FILE", "rates.json").into(),
            week_end: parse("P1_WEEK_END", &week_end)?,
            relay_destinations: parse_list("RELAY_DESTINATIONS", var("RELAY_DESTINATIONS"))?,
            relay_listen: var("RELAY_LISTEN")
                .map(|v| parse("RELAY_LISTEN", &v))
                .transpose()?,
            relay_remote_ips: parse_list("RELAY_REMOTE_IPS", var("RELAY_REMOTE_IPS"))?,
            log_json: parse_bool_safe(var("P1_LOG_JSON")),
        })
    }

    pub fn log(&self) {
        info!(
            serial_port = %self.serial_port,
            baud_rate = self.baud_rate,
            state_file = %self.state_file.display(),
            history_dir = %self.history_dir.display(),
            tariff_file = %self.tariff_file.display(),
            week_end = %self.week_end,
            "Meter settings"
        );
        info!(
            destinations = self.relay_destinations.len(),
            listen = ?self.relay_listen,
            remote_ips = ?self.relay_remote_ips,
            "Relay settings"
        );
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| MeterError::Config(format!("{key}={value}: {e}")))
}

fn parse_list<T>(key: &str, value: Option<String>) -> Result<Vec<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .unwrap_or_default()
        .split(',')
        .filter(|item| !item.trim().is_empty())
        .map(|item| parse(key, item))
        .collect()
}

fn parse_bool_safe(val: Option<String>) -> bool {
    val.unwrap_or_default()
        .to_ascii_lowercase()
        .parse()
        .unwrap_or_default()
}
