use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Message brut reçu du broker, consommé immédiatement par le pipeline
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
    pub received_at: OffsetDateTime,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Enregistrement produit par le classifieur (aussi la forme stockée en JSONL)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassifiedRecord {
    Generic {
        topic: String,
        value: String,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
    },
    Seismic {
        node_id: String,
        text: String,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
    },
    Battery {
        node_id: String,
        voltage: String,
        raw_message: String,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
    },
}

impl ClassifiedRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            ClassifiedRecord::Generic { .. } => "generic",
            ClassifiedRecord::Seismic { .. } => "seismic",
            ClassifiedRecord::Battery { .. } => "battery",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransportStatus {
    Disconnected,
    Online,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Unknown,
    Online,
    Offline,
}

impl NodeStatus {
    /// Seules les sentinelles exactes font changer l'état
    pub fn from_sentinel(payload: &str) -> Option<Self> {
        match payload {
            "ONLINE" => Some(NodeStatus::Online),
            "OFFLINE" => Some(NodeStatus::Offline),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LivenessState {
    pub transport: TransportStatus,
    pub node: NodeStatus,
}

impl Default for LivenessState {
    fn default() -> Self {
        Self {
            transport: TransportStatus::Disconnected,
            node: NodeStatus::Unknown,
        }
    }
}

/// Événements poussés aux observateurs (sérialisés tels quels sur le WebSocket)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ObserverEvent {
    Message {
        topic: String,
        value: String,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
    },
    TransportStatus { status: TransportStatus },
    NodeStatus { status: NodeStatus },
}
