use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct KernelConfig {
    pub mqtt: MqttConf,
    pub topics: TopicsConf,
    pub storage: StorageConf,
    pub http: HttpConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub reconnect_delay_secs: u64,
    pub username: Option<String>,
    #[serde(skip_serializing)] // jamais réécrit sur disque
    pub password: Option<String>,
}

/// Espaces de noms MQTT surveillés par le kernel
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TopicsConf {
    pub generic_prefix: String,
    pub seismic_prefix: String,
    /// Sous-topic réservé du nœud critique (ONLINE / OFFLINE, retained)
    pub status_topic: String,
    pub heartbeat_marker: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConf {
    pub data_dir: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub max_query_limit: usize,
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "seismo-kernel".into(),
            keep_alive_secs: 15,
            reconnect_delay_secs: 2,
            username: None,
            password: None,
        }
    }
}

impl Default for TopicsConf {
    fn default() -> Self {
        Self {
            generic_prefix: "logs".into(),
            seismic_prefix: "seismic".into(),
            status_topic: "seismic/status".into(),
            heartbeat_marker: "heartbeat".into(),
        }
    }
}

impl TopicsConf {
    /// Filtres d'abonnement, à réémettre à chaque (re)connexion
    pub fn subscription_filters(&self) -> Vec<String> {
        vec![
            format!("{}/#", self.generic_prefix),
            format!("{}/#", self.seismic_prefix),
        ]
    }
}

impl Default for StorageConf {
    fn default() -> Self {
        Self { data_dir: PathBuf::from("./data") }
    }
}

impl Default for HttpConf {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".into(),
            api_key: None,
            max_query_limit: 1000,
        }
    }
}

impl KernelConfig {
    /// Les secrets viennent de l'environnement et écrasent le YAML
    fn apply_env_overrides(&mut self) {
        if let Ok(user) = std::env::var("SEISMO_MQTT_USERNAME") {
            self.mqtt.username = Some(user);
        }
        if let Ok(pass) = std::env::var("SEISMO_MQTT_PASSWORD") {
            self.mqtt.password = Some(pass);
        }
        if let Ok(key) = std::env::var("SEISMO_API_KEY") {
            self.http.api_key = Some(key);
        }
    }
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("SEISMO_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    let mut cfg = load_config_from(&path).await;
    cfg.apply_env_overrides();
    cfg
}

async fn load_config_from(path: &str) -> KernelConfig {
    if !Path::new(path).exists() {
        warn!(path, "no config file, using defaults");
        return KernelConfig::default();
    }
    let txt = fs::read_to_string(path).await.unwrap_or_default();
    if txt.trim().is_empty() {
        return KernelConfig::default();
    }
    match serde_yaml::from_str(&txt) {
        Ok(cfg) => {
            info!(path, "config loaded");
            cfg
        }
        Err(e) => {
            warn!(path, error = %e, "invalid config, using defaults");
            KernelConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let cfg: KernelConfig = serde_yaml::from_str(
            "mqtt:\n  host: broker.lan\ntopics:\n  seismic_prefix: quake\n  status_topic: quake/status\n",
        )
        .unwrap();
        assert_eq!(cfg.mqtt.host, "broker.lan");
        assert_eq!(cfg.mqtt.port, 1883);
        assert_eq!(cfg.topics.seismic_prefix, "quake");
        assert_eq!(cfg.topics.generic_prefix, "logs");
        assert_eq!(cfg.http.max_query_limit, 1000);
    }

    #[test]
    fn subscription_filters_cover_both_namespaces() {
        let topics = TopicsConf::default();
        assert_eq!(topics.subscription_filters(), vec!["logs/#", "seismic/#"]);
    }

    #[tokio::test]
    async fn missing_or_invalid_file_falls_back_to_defaults() {
        let cfg = load_config_from("/nonexistent/kernel.yaml").await;
        assert_eq!(cfg.topics.status_topic, "seismic/status");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kernel.yaml");
        std::fs::write(&path, "mqtt: [not, a, map").unwrap();
        let cfg = load_config_from(path.to_str().unwrap()).await;
        assert_eq!(cfg.mqtt.client_id, "seismo-kernel");
    }
}
