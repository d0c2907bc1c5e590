/**
 * FAN-OUT TEMPS RÉEL - Diffusion des événements vers les observateurs
 *
 * RÔLE :
 * Chaque observateur (session WebSocket) possède un canal borné. Le hub
 * pousse les événements avec try_send, sans jamais attendre : un observateur
 * lent ne retarde ni la persistance ni le message suivant.
 *
 * FONCTIONNEMENT :
 * - attach() est idempotent : même id = remplacement, jamais de doublon
 * - un envoi échoué (récepteur fermé ou file pleine) retire l'observateur,
 *   ce qui ferme sa session
 * - au rattachement on rejoue uniquement l'état de vivacité, pas l'historique
 */

use crate::models::{LivenessState, NodeStatus, ObserverEvent, TransportStatus};
use crate::state::{new_state, Shared};
use std::collections::HashMap;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

pub type ObserverId = Uuid;

/// Événements en attente tolérés par observateur avant déconnexion
pub const OBSERVER_QUEUE: usize = 1024;

#[derive(Debug, Clone)]
pub struct Observer {
    pub id: ObserverId,
    tx: mpsc::Sender<ObserverEvent>,
}

impl Observer {
    /// Crée un observateur et le récepteur à brancher sur la session
    pub fn channel(id: ObserverId) -> (Self, mpsc::Receiver<ObserverEvent>) {
        Self::bounded(id, OBSERVER_QUEUE)
    }

    /// La capacité couvre au moins le replay des deux statuts
    pub fn bounded(id: ObserverId, capacity: usize) -> (Self, mpsc::Receiver<ObserverEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(2));
        (Self { id, tx }, rx)
    }

    /// true si l'observateur est toujours joignable
    fn deliver(&self, ev: ObserverEvent) -> bool {
        match self.tx.try_send(ev) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(observer = %self.id, "observer queue full, disconnecting");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(observer = %self.id, "dropping closed observer");
                false
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct ObserverHub {
    observers: Shared<HashMap<ObserverId, Observer>>,
}

impl ObserverHub {
    pub fn new() -> Self {
        Self { observers: new_state(HashMap::new()) }
    }

    /// Rattache un observateur et lui rejoue les deux statuts en cache.
    /// L'appelant doit tenir le verrou de vivacité (voir LivenessTracker::attach).
    pub fn attach(&self, observer: Observer, liveness: LivenessState) {
        let mut observers = self.observers.lock();
        let replay = [
            ObserverEvent::TransportStatus { status: liveness.transport },
            ObserverEvent::NodeStatus { status: liveness.node },
        ];
        for ev in replay {
            if !observer.deliver(ev) {
                observers.remove(&observer.id);
                return;
            }
        }
        debug!(observer = %observer.id, "observer attached");
        observers.insert(observer.id, observer);
    }

    pub fn detach(&self, id: &ObserverId) {
        if self.observers.lock().remove(id).is_some() {
            debug!(observer = %id, "observer detached");
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    pub fn broadcast_message(&self, topic: &str, value: &str, timestamp: OffsetDateTime) {
        self.send_all(ObserverEvent::Message {
            topic: topic.to_string(),
            value: value.to_string(),
            timestamp,
        });
    }

    pub fn broadcast_transport(&self, status: TransportStatus) {
        self.send_all(ObserverEvent::TransportStatus { status });
    }

    pub fn broadcast_node(&self, status: NodeStatus) {
        self.send_all(ObserverEvent::NodeStatus { status });
    }

    fn send_all(&self, ev: ObserverEvent) {
        let mut observers = self.observers.lock();
        observers.retain(|_, obs| obs.deliver(ev.clone()));
    }
}
