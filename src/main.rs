use pkom_bridge::archive::{ArchiveBridge, Archiver};
use pkom_bridge::config::{Config, Mode};
use pkom_bridge::live::{self, LiveBridge};
use pkom_bridge::nabto::NabtoConnector;
use pkom_bridge::registry::{Namespace, Registry};
use pkom_bridge::{mqtt, timescale};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let cfg_path =
        std::env::var("APP_CONFIG").unwrap_or_else(|_| "config/config.example.yaml".into());
    let cfg = Config::load(&cfg_path)?;
    info!(mode = ?cfg.mode, poll_interval_secs = cfg.poll_interval_secs, "loaded config");

    let registry = Arc::new(Registry::builtin()?);
    info!(
        datapoints = registry.points(Namespace::Datapoint).len(),
        setpoints = registry.points(Namespace::Setpoint).len(),
        "point dictionary loaded"
    );
    let connector = NabtoConnector::new(&cfg.device)?;

    let poll_interval = Duration::from_secs(cfg.poll_interval_secs);
    let backoff = Duration::from_secs(cfg.reconnect_backoff_secs);
    let range_policy = cfg.setpoints.out_of_range;

    let run = async {
        match cfg.mode {
            Mode::Live => {
                let mqtt_cfg = cfg
                    .mqtt
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("live mode needs an `mqtt` section"))?;
                let (client, eventloop) = mqtt::new(mqtt::build_options(mqtt_cfg));
                let (tx, rx) = mpsc::channel(32);
                mqtt::spawn_event_loop(
                    client.clone(),
                    eventloop,
                    live::set_topics(&mqtt_cfg.prefix),
                    tx,
                    backoff,
                );
                info!(host = %mqtt_cfg.host, port = mqtt_cfg.port, prefix = %mqtt_cfg.prefix, "starting live bridge");
                LiveBridge::new(
                    connector,
                    Arc::clone(&registry),
                    mqtt::MqttPublisher::new(client, mqtt::qos(mqtt_cfg.qos)),
                    mqtt_cfg.prefix.clone(),
                    range_policy,
                    poll_interval,
                    backoff,
                )
                .run(rx)
                .await;
            }
            Mode::Archive => {
                let ts_cfg = cfg
                    .timescale
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("archive mode needs a `timescale` section"))?;
                let sink = timescale::open_sink(ts_cfg, backoff).await?;
                info!(table = %ts_cfg.table, "connected to TimescaleDB");

                let mut archiver = Archiver::new(cfg.snapshot_every_ticks);
                ArchiveBridge::new(
                    connector,
                    Arc::clone(&registry),
                    sink,
                    range_policy,
                    poll_interval,
                    backoff,
                )
                .run(&mut archiver)
                .await;
            }
        }
        Ok::<(), anyhow::Error>(())
    };

    tokio::select! {
        res = run => res?,
        _ = tokio::signal::ctrl_c() => info!("shutdown requested"),
    }

    Ok(())
}
