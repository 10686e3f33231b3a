use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc::Receiver, watch};
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checksum;
use crate::error::MeterError;
use crate::line_decoder::TelegramDecoder;
use crate::peak_forecaster::{update_forecast, ForecastOutcome};
use crate::readings::CurrentReadings;
use crate::relay_publisher::RelayPublisher;
use crate::snapshot::MeterSnapshot;
use crate::state::EngineState;
use crate::state_store::{save_logged, DayArchive, StateStore};
use crate::telegram::{Telegram, TelegramCodec};
use crate::usage::UsageEngine;

/// The single consumer of one meter's byte stream. Owns the ledger state;
/// everybody else sees it through the snapshot watch.
pub struct MeterPipeline<S> {
    codec: TelegramCodec,
    buffer: BytesMut,
    decoder: TelegramDecoder,
    live: CurrentReadings,
    engine: UsageEngine,
    state: EngineState,
    store: S,
    forecast: ForecastOutcome,
    snapshots: watch::Sender<MeterSnapshot>,
    relay: Option<RelayPublisher>,
}

impl<S> MeterPipeline<S>
where
    S: StateStore + DayArchive,
{
    pub fn new(
        engine: UsageEngine,
        store: S,
        state: EngineState,
        relay: Option<RelayPublisher>,
    ) -> (Self, watch::Receiver<MeterSnapshot>) {
        let (snapshots, receiver) = watch::channel(MeterSnapshot::from_state(state.clone()));
        let pipeline = Self {
            codec: TelegramCodec::new(),
            buffer: BytesMut::new(),
            decoder: TelegramDecoder::new(),
            live: CurrentReadings::default(),
            engine,
            state,
            store,
            forecast: ForecastOutcome::default(),
            snapshots,
            relay,
        };
        (pipeline, receiver)
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn live(&self) -> &CurrentReadings {
        &self.live
    }

    pub fn subscribe(&self) -> watch::Receiver<MeterSnapshot> {
        self.snapshots.subscribe()
    }

    /// Feeds raw serial bytes. Returns the number of telegrams accepted.
    pub fn push_bytes(&mut self, chunk: &[u8]) -> usize {
        self.buffer.extend_from_slice(chunk);
        let mut accepted = 0;
        loop {
            match self.codec.decode(&mut self.buffer) {
                Ok(Some(telegram)) => {
                    if self.process_telegram(&telegram) {
                        accepted += 1;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Framing failed");
                    break;
                }
            }
        }
        accepted
    }

    /// Validates, decodes and accounts one framed telegram. A telegram with
    /// a bad checksum leaves every reading untouched.
    pub fn process_telegram(&mut self, telegram: &Telegram) -> bool {
        match checksum::validate(telegram.as_bytes()) {
            Ok(()) => {}
            Err(MeterError::ChecksumMismatch { .. }) => return false,
            Err(e) => {
                warn!(error = %e, "Telegram rejected");
                return false;
            }
        }

        let table = self.decoder.decode_telegram(telegram, &mut self.live);
        if let Some(tick) = self.engine.update(&mut self.state, &self.live, &self.store) {
            self.forecast = update_forecast(&mut self.state, &tick, self.live.month_peak_kw());
            if self.forecast.day_peak_updated {
                debug!(peak = self.state.day_peak.today.value, "Persisting new day peak");
            }
            // Forecast and day peak are part of the persisted state
            save_logged(&self.store, &self.state);
        } else {
            debug!("No meter time in telegram yet, ledger not updated");
        }

        let snapshot = MeterSnapshot {
            table,
            readings: self.decoder.registry().clone(),
            live: self.live.clone(),
            state: self.state.clone(),
            forecast: self.forecast,
            buses: self.decoder.buses().clone(),
        };
        self.snapshots.send_replace(snapshot);

        if let Some(relay) = &self.relay {
            match serde_json::to_value(&self.state) {
                Ok(payload) => {
                    relay.publish(&payload);
                }
                Err(e) => warn!(error = %e, "Cannot encode relay payload"),
            }
        }
        true
    }

    /// Consumes serial chunks until the stream ends or the token is
    /// cancelled, then saves the state one last time.
    pub async fn run(mut self, mut chunks: Receiver<Bytes>, cancel: CancellationToken) -> EngineState {
        info!("Meter pipeline started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Meter pipeline cancelled");
                    break;
                }
                chunk = chunks.recv() => match chunk {
                    Some(chunk) => {
                        self.push_bytes(&chunk);
                    }
                    None => {
                        info!("Serial stream ended");
                        break;
                    }
                },
            }
        }
        save_logged(&self.store, &self.state);
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::crc16;
    use crate::error::Result;
    use crate::tariff::{DayNight, ElectricityRates, Tariffs, VolumeRate};
    use chrono::{NaiveDate, Weekday};
    use std::sync::{Arc, Mutex};

    /// Keeps saves and archives in memory
    #[derive(Clone, Default)]
    struct MemoryStore {
        saved: Arc<Mutex<Vec<EngineState>>>,
        archived: Arc<Mutex<Vec<EngineState>>>,
    }

    impl StateStore for MemoryStore {
        fn load(&self) -> Result<Option<EngineState>> {
            Ok(self.saved.lock().unwrap().last().cloned())
        }

        fn save(&self, state: &EngineState) -> Result<()> {
            self.saved.lock().unwrap().push(state.clone());
            Ok(())
        }
    }

    impl DayArchive for MemoryStore {
        fn archive_day(&self, state: &EngineState) -> Result<()> {
            self.archived.lock().unwrap().push(state.clone());
            Ok(())
        }
    }

    fn tariffs() -> Tariffs {
        Tariffs {
            electricity: ElectricityRates {
                consumed: DayNight { day: 0.40, night: 0.30 },
                produced: DayNight { day: 0.05, night: 0.04 },
            },
            gas: VolumeRate { consumed: 1.0 },
            water: VolumeRate { consumed: 1.0 },
        }
    }

    fn telegram(time: &str, day_plus: &str) -> Vec<u8> {
        telegram_with_peak(time, day_plus, "00.500")
    }

    fn telegram_with_peak(time: &str, day_plus: &str, quarter_peak: &str) -> Vec<u8> {
        let body = format!(
            "/FLU5\\253769484_A\r\n\r\n0-0:1.0.0({time})\r\n1-0:1.8.1({day_plus}*kWh)\r\n1-0:1.4.0({quarter_peak}*kW)\r\n!"
        );
        let crc = crc16(body.as_bytes());
        format!("{body}{crc:04X}\r\n").into_bytes()
    }

    fn pipeline(store: MemoryStore) -> (MeterPipeline<MemoryStore>, watch::Receiver<MeterSnapshot>) {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        MeterPipeline::new(
            UsageEngine::new(tariffs(), Weekday::Sun),
            store,
            EngineState::new(start),
            None,
        )
    }

    #[test]
    fn test_telegrams_update_ledger_and_snapshot() {
        let store = MemoryStore::default();
        let (mut pipeline, snapshots) = pipeline(store.clone());
        assert_eq!(pipeline.push_bytes(&telegram("240110120000W", "000100.000")), 1);
        assert_eq!(pipeline.push_bytes(&telegram("240110120010W", "000100.500")), 1);

        assert_eq!(pipeline.state().usage.today[0], 0.5);
        assert_eq!(pipeline.live().quarter_peak, 0.5);
        let snapshot = snapshots.borrow();
        assert_eq!(snapshot.table.len(), 5);
        assert_eq!(snapshot.state, *pipeline.state());
        assert!(store.saved.lock().unwrap().len() >= 2);
    }

    #[test]
    fn test_saved_state_includes_forecast() {
        let store = MemoryStore::default();
        let (mut pipeline, _snapshots) = pipeline(store.clone());
        pipeline.push_bytes(&telegram_with_peak("240110120500W", "000100.000", "00.500"));
        pipeline.push_bytes(&telegram_with_peak("240110120510W", "000100.000", "00.600"));

        assert!(pipeline.state().peak_forecast > 0.6);
        assert_eq!(store.load().unwrap().as_ref(), Some(pipeline.state()));
    }

    #[test]
    fn test_bad_checksum_changes_nothing() {
        let (mut pipeline, _snapshots) = pipeline(MemoryStore::default());
        let mut bytes = telegram("240110120000W", "000100.000");
        let pos = bytes.windows(7).position(|w| w == b"100.000").unwrap();
        bytes[pos] = b'9';
        assert_eq!(pipeline.push_bytes(&bytes), 0);
        assert_eq!(*pipeline.live(), CurrentReadings::default());
        assert_eq!(pipeline.state().observed_time, None);
    }

    #[tokio::test]
    async fn test_run_saves_on_stream_end() {
        let store = MemoryStore::default();
        let (pipeline, _snapshots) = pipeline(store.clone());
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(pipeline.run(rx, cancel));

        for chunk in telegram("240110120000W", "000100.000").chunks(9) {
            tx.send(Bytes::copy_from_slice(chunk)).await.unwrap();
        }
        drop(tx);
        let state = task.await.unwrap();
        assert!(state.observed_time.is_some());
        assert_eq!(store.saved.lock().unwrap().last(), Some(&state));
    }

    #[tokio::test]
    async fn test_cancel_stops_pipeline() {
        let (pipeline, _snapshots) = pipeline(MemoryStore::default());
        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(pipeline.run(rx, cancel.clone()));
        cancel.cancel();
        let state = task.await.unwrap();
        assert_eq!(state.observed_time, None);
    }
}
