use axum::body::{to_bytes, Body};
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime, Weekday};
use p1_digital_meter::checksum::crc16;
use p1_digital_meter::relay_publisher::RetryPolicy;
use p1_digital_meter::relay_server::{router, RelayContext};
use p1_digital_meter::serial_reader::chunk_channel;
use p1_digital_meter::state::{ROW_EURO, ROW_GAS_M3};
use p1_digital_meter::tariff::{DayNight, ElectricityRates, VolumeRate};
use p1_digital_meter::{
    EngineState, JsonFileStore, MeterPipeline, RelayPublisher, SerialReader, Severity, StateStore,
    Tariffs, UsageEngine,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

fn tariffs() -> Tariffs {
    Tariffs {
        electricity: ElectricityRates {
            consumed: DayNight { day: 0.40, night: 0.30 },
            produced: DayNight { day: 0.05, night: 0.04 },
        },
        gas: VolumeRate { consumed: 1.25 },
        water: VolumeRate { consumed: 4.0 },
    }
}

fn start_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

/// Meter values that change between telegrams
struct Frame<'a> {
    time: &'a str,
    day_plus: &'a str,
    gas: &'a str,
    extra: &'a [&'a str],
}

impl<'a> Frame<'a> {
    fn new(time: &'a str, day_plus: &'a str) -> Self {
        Self {
            time,
            day_plus,
            gas: "00112.500",
            extra: &[],
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut lines = vec![
            "/FLU5\\253769484_A".to_string(),
            String::new(),
            "0-0:96.1.4(50217)".to_string(),
            "0-0:96.1.1(3153414733313031303231363035)".to_string(),
            format!("0-0:1.0.0({})", self.time),
        ];
        lines.extend(self.extra.iter().map(|l| l.to_string()));
        lines.extend(
            [
                format!("1-0:1.8.1({}*kWh)", self.day_plus),
                "1-0:1.8.2(000050.000*kWh)".to_string(),
                "1-0:2.8.1(000010.000*kWh)".to_string(),
                "1-0:2.8.2(000005.000*kWh)".to_string(),
                "0-0:96.14.0(0001)".to_string(),
                "1-0:1.4.0(00.500*kW)".to_string(),
                "1-0:1.6.0(240105183000W)(03.120*kW)".to_string(),
                "0-0:98.1.0(2)(1-0:1.6.0)(1-0:1.6.0)(231201000000W)(231112190000W)(04.329*kW)(240101000000W)(231206184500W)(05.156*kW)".to_string(),
                "1-0:1.7.0(00.300*kW)".to_string(),
                "1-0:2.7.0(00.000*kW)".to_string(),
                "1-0:32.7.0(231.2*V)".to_string(),
                "1-0:31.7.0(002.00*A)".to_string(),
                "0-0:96.3.10(1)".to_string(),
                "0-0:17.0.0(999.9*kW)".to_string(),
                "0-0:96.13.0()".to_string(),
                "0-1:24.1.0(003)".to_string(),
                "0-1:96.1.1(37464C4F32313139303333373331)".to_string(),
                "0-1:24.4.0(1)".to_string(),
                format!("0-1:24.2.3(240110115500W)({}*m3)", self.gas),
            ]
            .into_iter(),
        );
        let mut body = lines.join("\r\n");
        body.push_str("\r\n!");
        let crc = crc16(body.as_bytes());
        format!("{body}{crc:04X}\r\n").into_bytes()
    }
}

struct Meter {
    _dir: TempDir,
    store: JsonFileStore,
    history: std::path::PathBuf,
    pipeline: MeterPipeline<JsonFileStore>,
}

fn meter(week_end: Weekday) -> Meter {
    let dir = TempDir::new().unwrap();
    let history = dir.path().join("history");
    let store = JsonFileStore::new(dir.path().join("data.json"), &history);
    let (pipeline, _) = MeterPipeline::new(
        UsageEngine::new(tariffs(), week_end),
        store.clone(),
        EngineState::new(start_time()),
        None,
    );
    Meter {
        _dir: dir,
        store,
        history,
        pipeline,
    }
}

fn feed(meter: &mut Meter, frames: &[Frame]) -> usize {
    frames
        .iter()
        .map(|f| meter.pipeline.push_bytes(&f.to_bytes()))
        .sum()
}

#[test]
fn test_consumption_is_priced_into_today() {
    let mut meter = meter(Weekday::Sun);
    let accepted = feed(
        &mut meter,
        &[
            Frame::new("240110120000W", "000100.000"),
            Frame::new("240110120010W", "000100.500"),
        ],
    );
    assert_eq!(accepted, 2);

    let state = meter.pipeline.state();
    assert_eq!(state.usage.today[0], 0.5);
    assert_eq!(state.usage.today[ROW_EURO], 0.2);
    assert_eq!(state.usage.today[ROW_GAS_M3], 0.0);
    assert_eq!(state.meters.gas.value, 112.5);
    assert_eq!(meter.store.load().unwrap().as_ref(), Some(state));
}

#[test]
fn test_unknown_obis_code_does_not_block_telegram() {
    let mut meter = meter(Weekday::Sun);
    let mut snapshots = meter.pipeline.subscribe();
    let mut frame = Frame::new("240110120000W", "000100.000");
    frame.extra = &["9-9:99.99.99(123)"];
    assert_eq!(feed(&mut meter, &[frame]), 1);

    let snapshot = snapshots.borrow_and_update();
    let unknown: Vec<_> = snapshot
        .table
        .iter()
        .filter(|line| line.display.severity == Severity::Warning)
        .collect();
    assert_eq!(unknown.len(), 1);
    assert!(unknown[0].description.contains("not recognised"));
    assert_eq!(snapshot.live.kwh_day_plus, 100.0);
    assert_eq!(snapshot.lookup("meter_bus_1"), Some(json!({"kind": "text", "value": "7FLO2119033731"})));
    assert!(snapshot.readings.get("9-9:99.99.99").is_none());
}

#[test]
fn test_chunk_size_does_not_change_result() {
    let mut stream = b"\r\nnoise from a half telegram\r\n!1234\r\n".to_vec();
    for (time, value) in [
        ("240110120000W", "000100.000"),
        ("240110120010W", "000100.250"),
        ("240110120020W", "000101.000"),
    ] {
        stream.extend_from_slice(&Frame::new(time, value).to_bytes());
    }

    let mut reference = meter(Weekday::Sun);
    assert_eq!(reference.pipeline.push_bytes(&stream), 3);

    for chunk_size in [1, 5, 17, 64, 1024] {
        let mut chunked = meter(Weekday::Sun);
        let accepted: usize = stream
            .chunks(chunk_size)
            .map(|chunk| chunked.pipeline.push_bytes(chunk))
            .sum();
        assert_eq!(accepted, 3);
        assert_eq!(chunked.pipeline.state(), reference.pipeline.state());
    }
}

#[test]
fn test_counter_wraparound() {
    let mut meter = meter(Weekday::Sun);
    feed(
        &mut meter,
        &[
            Frame::new("240110120000W", "9999"),
            Frame::new("240110120010W", "3"),
        ],
    );
    assert_eq!(meter.pipeline.state().usage.today[0], 4.0);
}

#[test]
fn test_day_rollover_archives_and_shifts() {
    let mut meter = meter(Weekday::Sun);
    feed(
        &mut meter,
        &[
            Frame::new("240103235940W", "000100.000"),
            Frame::new("240103235950W", "000101.000"),
        ],
    );
    let today_before = meter.pipeline.state().usage.today;

    let mut next = Frame::new("240104000005W", "000101.000");
    next.gas = "00113.500";
    feed(&mut meter, &[next]);

    let state = meter.pipeline.state();
    assert_eq!(state.usage.day_1, today_before);
    assert_eq!(state.usage.today[0], 0.0);
    assert_eq!(state.usage.today[ROW_GAS_M3], 1.0);
    assert_eq!(state.usage.week[0], 1.0);
    assert!(meter.history.join("01-03_data.json").exists());
}

#[test]
fn test_week_resets_only_after_last_weekday() {
    // Wednesday into Thursday keeps the week
    let mut midweek = meter(Weekday::Sun);
    feed(
        &mut midweek,
        &[
            Frame::new("240103235000W", "000100.000"),
            Frame::new("240103235900W", "000102.000"),
            Frame::new("240104000100W", "000102.000"),
        ],
    );
    assert_eq!(midweek.pipeline.state().usage.week[0], 2.0);

    // Sunday into Monday clears it
    let mut weekend = meter(Weekday::Sun);
    feed(
        &mut weekend,
        &[
            Frame::new("240107235000W", "000100.000"),
            Frame::new("240107235900W", "000102.000"),
            Frame::new("240108000100W", "000102.000"),
        ],
    );
    assert_eq!(weekend.pipeline.state().usage.week[0], 0.0);
    assert_eq!(weekend.pipeline.state().usage.day_1[0], 2.0);
}

#[tokio::test]
async fn test_serial_to_relay() {
    let mut relay_server = mockito::Server::new_async().await;
    let relay_mock = relay_server
        .mock("POST", "/relay")
        .match_body(mockito::Matcher::PartialJson(json!({"type": "dm", "cmd": "data"})))
        .with_status(200)
        .expect_at_least(1)
        .create_async()
        .await;

    let cancel = CancellationToken::new();
    let destination = format!("{}/relay", relay_server.url()).parse().unwrap();
    let (publisher, links) = RelayPublisher::new(&[destination]);
    for link in links {
        link.spawn(reqwest::Client::new(), RetryPolicy::default(), cancel.clone());
    }

    let dir = TempDir::new().unwrap();
    let store = JsonFileStore::new(dir.path().join("data.json"), dir.path().join("history"));
    let (pipeline, snapshots) = MeterPipeline::new(
        UsageEngine::new(tariffs(), Weekday::Sun),
        store.clone(),
        EngineState::new(start_time()),
        Some(publisher),
    );

    let telegram = Frame::new("240110120000W", "000100.000").to_bytes();
    let (head, tail) = telegram.split_at(100);
    let serial = tokio_test::io::Builder::new().read(head).read(tail).build();
    let (chunk_tx, chunk_rx) = chunk_channel();
    let reader = SerialReader::new(serial, chunk_tx, cancel.clone()).spawn();

    let state = pipeline.run(chunk_rx, cancel.clone()).await;
    reader.await.unwrap();
    assert_eq!(store.load().unwrap(), Some(state));

    let app = router(RelayContext::new(snapshots, tariffs(), vec![]))
        .layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 50000))));
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/relay")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"type": "dm", "cmd": "ask", "field": "kwh_day_plus"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value =
        serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap()).unwrap();
    assert_eq!(body["value"], json!(100.0));

    for _ in 0..200 {
        if relay_mock.matched_async().await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    relay_mock.assert_async().await;
    cancel.cancel();
}

#[test]
fn test_bad_checksum_is_dropped() {
    let mut meter = meter(Weekday::Sun);
    let mut bytes = Frame::new("240110120000W", "000100.000").to_bytes();
    let len = bytes.len();
    // corrupt the last trailer digit
    bytes[len - 3] = if bytes[len - 3] == b'0' { b'1' } else { b'0' };
    assert_eq!(meter.pipeline.push_bytes(&bytes), 0);
    assert_eq!(meter.pipeline.state().observed_time, None);

    let good = Bytes::from(Frame::new("240110120000W", "000100.000").to_bytes());
    assert_eq!(meter.pipeline.push_bytes(&good), 1);
}
