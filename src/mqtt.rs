use crate::config::MqttConfig;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

// Use the MQTT v5 API surface only
use rumqttc::v5 as mqtt5;
use rumqttc::Transport;

pub type MqttOptions = mqtt5::MqttOptions;
pub type AsyncClient = mqtt5::AsyncClient;
pub type EventLoop = mqtt5::EventLoop;
pub type QoS = mqtt5::mqttbytes::QoS;

/// An inbound publish on one of the `.../set` topics.
#[derive(Debug, Clone, PartialEq)]
pub struct SetRequest {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Outgoing side of the broker connection.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: String) -> Result<()>;
}

/// Publishes through a rumqttc client with a fixed QoS, never retained.
pub struct MqttPublisher {
    client: AsyncClient,
    qos: QoS,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient, qos: QoS) -> Self {
        Self { client, qos }
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: String) -> Result<()> {
        self.client
            .publish(topic, self.qos, false, payload)
            .await
            .map_err(|e| AppError::Mqtt(e.to_string()))
    }
}

pub fn build_options(cfg: &MqttConfig) -> MqttOptions {
    let client_id = format!("pkom-bridge-{}", Uuid::new_v4());
    let mut opts = MqttOptions::new(client_id, cfg.host.clone(), cfg.port);
    opts.set_keep_alive(Duration::from_secs(cfg.keep_alive_secs.unwrap_or(60)));
    opts.set_clean_start(cfg.clean_session.unwrap_or(true));
    if let (Some(u), Some(p)) = (&cfg.username, &cfg.password) {
        opts.set_credentials(u.clone(), p.clone());
    }
    if cfg.port == 8883 {
        opts.set_transport(Transport::tls_with_default_config());
    }
    opts
}

pub fn new(options: MqttOptions) -> (AsyncClient, EventLoop) {
    mqtt5::AsyncClient::new(options, 64)
}

pub fn qos(v: u8) -> QoS {
    match v {
        2 => QoS::ExactlyOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::AtMostOnce,
    }
}

/// Drives the MQTT event loop on its own task.
///
/// Every ConnAck (re)subscribes `set_topics`; inbound publishes are handed to
/// the poll loop through `tx`. Requests arriving while the channel is full are
/// dropped so the event loop never waits on the poll loop.
pub fn spawn_event_loop(
    client: AsyncClient,
    mut eventloop: EventLoop,
    set_topics: Vec<String>,
    tx: mpsc::Sender<SetRequest>,
    backoff: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(mqtt5::Event::Incoming(mqtt5::Incoming::ConnAck(_))) => {
                    info!("connected to MQTT broker");
                    for t in &set_topics {
                        if let Err(e) = client.try_subscribe(t.clone(), QoS::AtLeastOnce) {
                            warn!(topic = %t, error = %e, "subscribe failed");
                        }
                    }
                    debug!(count = set_topics.len(), "subscribed to set topics");
                }
                Ok(mqtt5::Event::Incoming(mqtt5::Incoming::Publish(p))) => {
                    let topic = match std::str::from_utf8(&p.topic) {
                        Ok(s) => s.to_string(),
                        Err(_) => {
                            warn!(topic = ?p.topic, "non-utf8 topic; skipping message");
                            continue;
                        }
                    };
                    let req = SetRequest {
                        topic,
                        payload: p.payload.to_vec(),
                    };
                    if let Err(e) = tx.try_send(req) {
                        warn!(error = %e, "set request dropped");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("mqtt error: {e}; reconnecting in {}s", backoff.as_secs());
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    })
}
