/**
 * API HTTP SEISMO - Lecture des logs, purge admin, WebSocket temps réel
 *
 * ROUTES :
 * - GET    /health            -> "ok"
 * - GET    /system/health     -> compteurs du kernel
 * - GET    /logs/{table}      -> generic | seismic | battery (store live)
 * - GET    /archive/{table}   -> generic | seismic (store archive)
 * - DELETE /logs              -> purge live + battery (header x-api-key requis)
 * - GET    /ws                -> observateur temps réel
 *
 * SÉCURITÉ :
 * Seule la purge est protégée. Sans clé configurée elle est refusée.
 */

use crate::broadcast::{Observer, ObserverHub};
use crate::health::{HealthTracker, KernelHealth};
use crate::liveness::LivenessTracker;
use crate::ports::{StoreSet, StoredRow};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const DEFAULT_LIMIT: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub stores: StoreSet,
    pub liveness: LivenessTracker,
    pub hub: ObserverHub,
    pub health: HealthTracker,
    pub api_key: Option<Arc<str>>,
    pub max_query_limit: usize,
}

#[derive(Debug, Deserialize)]
struct LimitParams {
    limit: Option<usize>,
}

impl LimitParams {
    fn bounded(&self, max: usize) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, max.max(1))
    }
}

async fn require_api_key(
    State(app): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = app.api_key.as_deref().filter(|k| !k.is_empty()) else {
        warn!("SEISMO_API_KEY not set - admin access denied");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        warn!(path = %req.uri().path(), "rejected admin request");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    let admin = Router::new()
        .route("/logs", delete(reset_logs))
        .route_layer(middleware::from_fn_with_state(app_state.clone(), require_api_key));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/logs/{table}", get(read_live))
        .route("/archive/{table}", get(read_archive))
        .route("/ws", get(ws_upgrade))
        .merge(admin)
        .with_state(app_state)
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    let status = app.liveness.current_state().transport;
    Json(app.health.get_health(status, &app.hub))
}

// GET /logs/{table}
async fn read_live(
    State(app): State<AppState>,
    Path(table): Path<String>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<StoredRow>>, StatusCode> {
    let t = app.stores.live(&table).ok_or(StatusCode::NOT_FOUND)?;
    t.read(params.bounded(app.max_query_limit))
        .map(Json)
        .map_err(|e| {
            error!(table = %table, error = %e, "read failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

// GET /archive/{table}
async fn read_archive(
    State(app): State<AppState>,
    Path(table): Path<String>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<StoredRow>>, StatusCode> {
    let t = app.stores.archive(&table).ok_or(StatusCode::NOT_FOUND)?;
    t.read(params.bounded(app.max_query_limit))
        .map(Json)
        .map_err(|e| {
            error!(table = %table, error = %e, "archive read failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

// DELETE /logs
async fn reset_logs(State(app): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    match app.stores.clear_live() {
        Ok(()) => {
            info!("live and battery tables cleared");
            (StatusCode::OK, Json(serde_json::json!({ "status": "cleared" })))
        }
        Err(e) => {
            error!(error = %e, "reset failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "status": "error", "msg": e.to_string() })),
            )
        }
    }
}

// GET /ws
async fn ws_upgrade(State(app): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| observer_session(socket, app))
}

async fn observer_session(socket: WebSocket, app: AppState) {
    let (sink, stream) = socket.split();
    run_observer(sink, stream, app).await;
}

/// Session d'observation : replay + événements vers `sink` jusqu'à fermeture
/// côté client, ou jusqu'à ce que le hub lâche l'observateur (file pleine).
async fn run_observer<Si, St, E>(mut sink: Si, mut stream: St, app: AppState)
where
    Si: Sink<Message> + Unpin,
    St: Stream<Item = Result<Message, E>> + Unpin,
{
    let id = Uuid::new_v4();
    let (observer, mut events) = Observer::channel(id);
    app.liveness.attach(observer);

    let send_task = async {
        while let Some(ev) = events.recv().await {
            let txt = match serde_json::to_string(&ev) {
                Ok(txt) => txt,
                Err(e) => {
                    warn!(error = %e, "event serialization failed");
                    continue;
                }
            };
            if sink.send(Message::Text(txt.into())).await.is_err() {
                break;
            }
        }
    };

    // Les messages entrants sont ignorés, on attend juste la fermeture
    let recv_task = async {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    };

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    app.hub.detach(&id);
    debug!(observer = %id, "observer session closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClassifiedRecord, NodeStatus};
    use axum::body::{to_bytes, Body};
    use axum::http::Request as HttpRequest;
    use time::macros::datetime;
    use tower::ServiceExt;

    fn app_state(dir: &std::path::Path, api_key: Option<&str>) -> AppState {
        let hub = ObserverHub::new();
        AppState {
            stores: StoreSet::open(dir, 100).unwrap(),
            liveness: LivenessTracker::new(hub.clone(), "seismic/status", vec![]),
            hub,
            health: HealthTracker::new(),
            api_key: api_key.map(Arc::from),
            max_query_limit: 2,
        }
    }

    fn seismic(text: &str) -> ClassifiedRecord {
        ClassifiedRecord::Seismic {
            node_id: "n1".into(),
            text: text.into(),
            timestamp: datetime!(2024-05-01 12:00:00 UTC),
        }
    }

    async fn send(app: Router, method: &str, uri: &str, key: Option<&str>) -> (StatusCode, serde_json::Value) {
        let mut req = HttpRequest::builder().method(method).uri(uri);
        if let Some(k) = key {
            req = req.header("x-api-key", k);
        }
        let resp = app.oneshot(req.body(Body::empty()).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn read_endpoints_clamp_limit_and_reject_unknown_tables() {
        let dir = tempfile::tempdir().unwrap();
        let state = app_state(dir.path(), None);
        for i in 0..3 {
            state.stores.live_seismic.append(&seismic(&i.to_string())).unwrap();
        }
        let app = build_router(state);

        let (status, json) = send(app.clone(), "GET", "/logs/seismic?limit=50", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json.as_array().unwrap().len(), 2);
        assert_eq!(json[0]["id"], 3);

        let (status, _) = send(app.clone(), "GET", "/archive/battery", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, json) = send(app, "GET", "/archive/seismic", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(json.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reset_requires_matching_key_and_spares_archive() {
        let dir = tempfile::tempdir().unwrap();
        let state = app_state(dir.path(), Some("s3cret"));
        state.stores.live_seismic.append(&seismic("a")).unwrap();
        state.stores.archive_seismic.append(&seismic("a")).unwrap();
        let stores = state.stores.clone();
        let app = build_router(state);

        let (status, _) = send(app.clone(), "DELETE", "/logs", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = send(app.clone(), "DELETE", "/logs", Some("wrong")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(stores.live_seismic.read(10).unwrap().len(), 1);

        let (status, json) = send(app, "DELETE", "/logs", Some("s3cret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "cleared");
        assert!(stores.live_seismic.read(10).unwrap().is_empty());
        assert_eq!(stores.archive_seismic.read(10).unwrap().len(), 1);
        assert_eq!(stores.live_seismic.append(&seismic("b")).unwrap(), 1);
    }

    async fn next_json(rx: &mut futures::channel::mpsc::UnboundedReceiver<Message>) -> serde_json::Value {
        match rx.next().await {
            Some(Message::Text(txt)) => serde_json::from_str(txt.as_str()).unwrap(),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn observer_session_forwards_events_and_detaches_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let state = app_state(dir.path(), None);
        let hub = state.hub.clone();
        let (out_tx, mut out_rx) = futures::channel::mpsc::unbounded::<Message>();
        let (in_tx, in_rx) = futures::channel::mpsc::unbounded::<Result<Message, axum::Error>>();
        let session = tokio::spawn(run_observer(out_tx, in_rx, state));

        let replay = next_json(&mut out_rx).await;
        assert_eq!(replay["event"], "transport_status");
        assert_eq!(replay["status"], "DISCONNECTED");
        assert_eq!(next_json(&mut out_rx).await["event"], "node_status");
        assert_eq!(hub.observer_count(), 1);

        hub.broadcast_node(NodeStatus::Offline);
        let live = next_json(&mut out_rx).await;
        assert_eq!(live["event"], "node_status");
        assert_eq!(live["status"], "OFFLINE");

        in_tx.unbounded_send(Ok(Message::Close(None))).unwrap();
        session.await.unwrap();
        assert_eq!(hub.observer_count(), 0);
    }

    #[tokio::test]
    async fn observer_session_ends_when_client_is_already_gone() {
        let dir = tempfile::tempdir().unwrap();
        let state = app_state(dir.path(), None);
        let hub = state.hub.clone();
        let closed = futures::stream::iter(vec![Ok::<_, axum::Error>(Message::Close(None))]);
        run_observer(futures::sink::drain(), closed, state).await;
        assert_eq!(hub.observer_count(), 0);
    }

    #[tokio::test]
    async fn reset_is_denied_without_configured_key() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(app_state(dir.path(), None));
        let (status, _) = send(app.clone(), "DELETE", "/logs", Some("")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, json) = send(app, "GET", "/system/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["mqtt_status"], "DISCONNECTED");
    }
}
