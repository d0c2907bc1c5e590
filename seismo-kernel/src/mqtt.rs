use crate::config::MqttConf;
use crate::health::HealthTracker;
use crate::liveness::LivenessTracker;
use crate::models::InboundMessage;
use crate::pipeline::IngestPipeline;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, Incoming, MqttOptions, QoS};
use std::time::Duration;
use tokio::task;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("subscription to {0} rejected")]
    Rejected(String),
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
}

/// Côté "abonnement" du client MQTT, seul besoin du suivi de vivacité
pub trait Subscriber {
    fn request_subscription(&self, filter: &str) -> Result<(), TransportError>;
}

impl Subscriber for AsyncClient {
    fn request_subscription(&self, filter: &str) -> Result<(), TransportError> {
        if filter.is_empty() {
            return Err(TransportError::Rejected(filter.to_string()));
        }
        // non bloquant : la requête part au prochain poll() de l'eventloop
        self.try_subscribe(filter, QoS::AtLeastOnce)?;
        Ok(())
    }
}

pub fn mqtt_options(cfg: &MqttConf) -> MqttOptions {
    let mut opts = MqttOptions::new(&cfg.client_id, &cfg.host, cfg.port);
    opts.set_keep_alive(Duration::from_secs(cfg.keep_alive_secs.max(5)));
    opts.set_clean_session(true);
    if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
        opts.set_credentials(user, pass);
    }
    opts
}

/// Traduit les événements rumqttc en appels vivacité / pipeline
#[derive(Clone)]
pub struct TransportBridge {
    liveness: LivenessTracker,
    pipeline: IngestPipeline,
    health: HealthTracker,
}

impl TransportBridge {
    pub fn new(liveness: LivenessTracker, pipeline: IngestPipeline, health: HealthTracker) -> Self {
        Self { liveness, pipeline, health }
    }

    pub fn on_event<S: Subscriber>(&self, event: Event, subscriber: &S) {
        match event {
            Event::Incoming(Incoming::ConnAck(ack)) => {
                if ack.code == ConnectReturnCode::Success {
                    info!(session_present = ack.session_present, "connected to broker");
                    self.liveness.on_transport_connect(subscriber);
                } else {
                    warn!(code = ?ack.code, "broker refused connection");
                }
            }
            Event::Incoming(Incoming::Publish(p)) => {
                let payload = match String::from_utf8(p.payload.to_vec()) {
                    Ok(txt) => txt,
                    Err(e) => {
                        warn!(topic = %p.topic, "non UTF-8 payload, decoding lossily");
                        String::from_utf8_lossy(e.as_bytes()).into_owned()
                    }
                };
                self.pipeline.handle(InboundMessage::new(p.topic, payload));
            }
            Event::Incoming(Incoming::Disconnect) => self.on_connection_lost(),
            Event::Incoming(Incoming::SubAck(ack)) => debug!(pkid = ack.pkid, "subscription acknowledged"),
            _ => {}
        }
    }

    pub fn on_connection_lost(&self) {
        if self.liveness.on_transport_disconnect() {
            warn!("broker connection lost");
        }
        self.health.increment_reconnects();
    }
}

/// Lance la boucle MQTT. rumqttc se reconnecte au poll() suivant une erreur ;
/// on attend `reconnect_delay_secs` entre deux tentatives.
pub fn spawn_mqtt_listener(cfg: &MqttConf, bridge: TransportBridge) -> AsyncClient {
    let (client, mut eventloop) = AsyncClient::new(mqtt_options(cfg), 10);
    let delay = Duration::from_secs(cfg.reconnect_delay_secs);
    let loop_client = client.clone();
    info!(host = %cfg.host, port = cfg.port, "starting MQTT listener");

    task::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(event) => bridge.on_event(event, &loop_client),
                Err(e) => {
                    warn!(error = %e, "MQTT error");
                    bridge.on_connection_lost();
                    tokio::time::sleep(delay).await;
                }
            }
        }
    });

    client
}
