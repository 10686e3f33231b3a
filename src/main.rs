use anyhow::Context;
use chrono::Local;
use p1_digital_meter::relay_publisher::RetryPolicy;
use p1_digital_meter::relay_server::{self, RelayContext};
use p1_digital_meter::serial_reader::{chunk_channel, open_serial};
use p1_digital_meter::state_store::restore_or_init;
use p1_digital_meter::{
    JsonFileStore, MeterPipeline, RelayPublisher, SerialReader, Settings, Tariffs, UsageEngine,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env().context("Invalid configuration")?;
    init_tracing(settings.log_json);

    info!("Starting P1 digital meter");
    settings.log();

    let tariffs = Tariffs::load(&settings.tariff_file).context("Cannot start without tariffs")?;
    let store = JsonFileStore::new(&settings.state_file, &settings.history_dir);
    let state = restore_or_init(&store, Local::now().naive_local());
    let cancel = CancellationToken::new();

    let relay = if settings.relay_destinations.is_empty() {
        None
    } else {
        let client = reqwest::Client::builder()
            .build()
            .context("Cannot create relay client")?;
        let (publisher, links) = RelayPublisher::new(&settings.relay_destinations);
        for link in links {
            link.spawn(client.clone(), RetryPolicy::default(), cancel.clone());
        }
        Some(publisher)
    };

    let engine = UsageEngine::new(tariffs, settings.week_end);
    let (pipeline, snapshots) = MeterPipeline::new(engine, store, state, relay);

    if let Some(addr) = settings.relay_listen {
        let ctx = RelayContext::new(snapshots, tariffs, settings.relay_remote_ips.clone());
        let server_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = relay_server::serve(addr, ctx, server_cancel).await {
                error!(error = %e, "Relay server stopped");
            }
        });
    }

    let port = open_serial(&settings.serial_port, settings.baud_rate)
        .with_context(|| format!("Cannot open serial port {}", settings.serial_port))?;
    let (chunk_tx, chunk_rx) = chunk_channel();
    let reader = SerialReader::new(port, chunk_tx, cancel.clone()).spawn();

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutting down");
                signal_cancel.cancel();
            }
            Err(e) => error!(error = %e, "Cannot listen for shutdown signal"),
        }
    });

    pipeline.run(chunk_rx, cancel.clone()).await;
    cancel.cancel();
    reader.await.context("Serial reader task failed")?;
    info!("P1 digital meter stopped");
    Ok(())
}
