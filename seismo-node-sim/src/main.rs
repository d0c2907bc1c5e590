//! Seismo node simulator - stands in for a remote sensor node.
//!
//! Connects with a retained `OFFLINE` last will on the status topic, publishes a
//! retained `ONLINE` on every (re)connect, then loops: seismic reading, battery
//! report, heartbeat, generic log line.

use rumqttc::{AsyncClient, Event, Incoming, LastWill, MqttOptions, QoS};
use tokio::time::{sleep, Duration};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct SimConfig {
    node_id: String,
    host: String,
    port: u16,
    interval_secs: u64,
    seismic_prefix: String,
    generic_prefix: String,
    status_topic: String,
}

impl SimConfig {
    fn from_env() -> Self {
        let var = |k: &str, d: &str| std::env::var(k).unwrap_or_else(|_| d.to_string());
        Self {
            node_id: var("SIM_NODE_ID", "node-1"),
            host: var("SIM_BROKER_HOST", "localhost"),
            port: var("SIM_BROKER_PORT", "1883").parse().unwrap_or(1883),
            interval_secs: var("SIM_INTERVAL_SECS", "5").parse().unwrap_or(5),
            seismic_prefix: var("SIM_SEISMIC_PREFIX", "seismic"),
            generic_prefix: var("SIM_GENERIC_PREFIX", "logs"),
            status_topic: var("SIM_STATUS_TOPIC", "seismic/status"),
        }
    }

    fn seismic_topic(&self) -> String {
        format!("{}/{}", self.seismic_prefix, self.node_id)
    }

    fn generic_topic(&self) -> String {
        format!("{}/{}", self.generic_prefix, self.node_id)
    }
}

/// Magnitude pseudo-sinusoïdale, toujours positive
fn seismic_reading(tick: u64) -> String {
    let m = 0.5 + 0.4 * ((tick as f64) * 0.7).sin();
    format!("{m:.2}")
}

/// Batterie qui se décharge lentement jusqu'à 11.0V
fn battery_report(tick: u64) -> String {
    let volts = (12.6 - tick as f64 * 0.01).max(11.0);
    format!("{volts:.2}V,OK")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cfg = SimConfig::from_env();

    let mut opts = MqttOptions::new(format!("seismo-sim-{}", cfg.node_id), &cfg.host, cfg.port);
    opts.set_keep_alive(Duration::from_secs(15));
    opts.set_last_will(LastWill::new(&cfg.status_topic, "OFFLINE", QoS::AtLeastOnce, true));
    let (client, mut eventloop) = AsyncClient::new(opts, 10);

    // Boucle d'événements : ONLINE retained à chaque ConnAck
    let status_client = client.clone();
    let status_topic = cfg.status_topic.clone();
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!(topic = %status_topic, "connected, announcing ONLINE");
                    if let Err(e) = status_client.try_publish(&status_topic, QoS::AtLeastOnce, true, "ONLINE") {
                        warn!(error = %e, "failed to announce status");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "MQTT loop error");
                    sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });

    let seismic_topic = cfg.seismic_topic();
    let generic_topic = cfg.generic_topic();
    let mut tick: u64 = 0;
    loop {
        let batch = [
            (&seismic_topic, seismic_reading(tick)),
            (&seismic_topic, battery_report(tick)),
            (&seismic_topic, format!("heartbeat {tick}")),
            (&generic_topic, format!("sample {tick} published")),
        ];
        for (topic, payload) in batch {
            if let Err(e) = client.publish(topic.as_str(), QoS::AtLeastOnce, false, payload).await {
                warn!(topic = %topic, error = %e, "publish failed");
            }
        }
        tick += 1;
        sleep(Duration::from_secs(cfg.interval_secs.max(1))).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn battery_report_is_a_clean_voltage_field() {
        assert_eq!(battery_report(0), "12.60V,OK");
        assert_eq!(battery_report(10), "12.50V,OK");
        assert_eq!(battery_report(100_000), "11.00V,OK");
    }

    #[test]
    fn seismic_reading_has_no_unit() {
        for tick in 0..50 {
            let r = seismic_reading(tick);
            let v: f64 = r.parse().unwrap();
            assert!((0.0..=1.0).contains(&v), "{r}");
        }
    }

    #[test]
    fn topics_follow_namespaces() {
        let cfg = SimConfig {
            node_id: "n9".into(),
            host: "localhost".into(),
            port: 1883,
            interval_secs: 5,
            seismic_prefix: "seismic".into(),
            generic_prefix: "logs".into(),
            status_topic: "seismic/status".into(),
        };
        assert_eq!(cfg.seismic_topic(), "seismic/n9");
        assert_eq!(cfg.generic_topic(), "logs/n9");
    }
}
