/**
 * SEISMO KERNEL - Point d'entrée du serveur d'ingestion
 *
 * RÔLE : bootstrap config -> stores -> pipeline -> MQTT -> HTTP.
 *
 * FLUX : message MQTT -> pipeline -> {vivacité, classifieur}
 *                                 -> {diffusion WebSocket, routeur de persistance}
 */

mod broadcast;
mod classifier;
mod config;
mod health;
mod http;
mod liveness;
mod models;
mod mqtt;
mod pipeline;
mod ports;
mod router;
mod state;

use crate::broadcast::ObserverHub;
use crate::classifier::Classifier;
use crate::config::load_config;
use crate::health::HealthTracker;
use crate::http::AppState;
use crate::liveness::LivenessTracker;
use crate::mqtt::TransportBridge;
use crate::pipeline::IngestPipeline;
use crate::ports::StoreSet;
use crate::router::PersistenceRouter;

use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env optionnel
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cfg = load_config().await;

    // stores : live (purgeable), archive (jamais purgée), battery
    let stores = StoreSet::open(&cfg.storage.data_dir, cfg.http.max_query_limit)
        .with_context(|| format!("failed to open stores in {:?}", cfg.storage.data_dir))?;
    info!(tables = stores.list_table_info().len(), dir = ?cfg.storage.data_dir, "stores ready");

    let health = HealthTracker::new();
    let hub = ObserverHub::new();
    let liveness = LivenessTracker::new(
        hub.clone(),
        cfg.topics.status_topic.clone(),
        cfg.topics.subscription_filters(),
    );
    let classifier = Classifier::new(&cfg.topics).context("invalid voltage pattern")?;
    let router = PersistenceRouter::spawn(&stores, health.clone());
    let pipeline = IngestPipeline::new(liveness.clone(), classifier, hub.clone(), router, health.clone());

    // MQTT : les abonnements sont émis à chaque ConnAck
    let bridge = TransportBridge::new(liveness.clone(), pipeline, health.clone());
    let _mqtt_client = mqtt::spawn_mqtt_listener(&cfg.mqtt, bridge);

    let app_state = AppState {
        stores,
        liveness,
        hub,
        health,
        api_key: cfg.http.api_key.as_deref().map(Arc::from),
        max_query_limit: cfg.http.max_query_limit,
    };
    let app = http::build_router(app_state);

    let listener = TcpListener::bind(&cfg.http.bind)
        .await
        .with_context(|| format!("failed to bind {}", cfg.http.bind))?;
    info!(addr = %cfg.http.bind, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
