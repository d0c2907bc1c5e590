/**
 * SUIVI DE VIVACITÉ - Statut du broker MQTT et du nœud critique
 *
 * RÔLE :
 * Seul propriétaire de `LivenessState`. Le statut du nœud critique arrive par
 * last will / message retained : il n'est livré qu'une fois, donc on le
 * diffuse immédiatement et on le rejoue à chaque nouvel observateur.
 *
 * CONCURRENCE :
 * Mutation + diffusion se font sous le même verrou, rattachement + replay
 * aussi. Un observateur ne peut donc ni rater ni voir dans le désordre une
 * transition de statut.
 */

use crate::broadcast::{Observer, ObserverHub};
use crate::models::{LivenessState, NodeStatus, TransportStatus};
use crate::mqtt::Subscriber;
use crate::state::{new_state, Shared};
use tracing::{info, warn};

#[derive(Clone)]
pub struct LivenessTracker {
    state: Shared<LivenessState>,
    hub: ObserverHub,
    status_topic: String,
    subscriptions: Vec<String>,
}

impl LivenessTracker {
    pub fn new(hub: ObserverHub, status_topic: impl Into<String>, subscriptions: Vec<String>) -> Self {
        Self {
            state: new_state(LivenessState::default()),
            hub,
            status_topic: status_topic.into(),
            subscriptions,
        }
    }

    /// (Re)connexion : les abonnements ne survivent pas à une reconnexion
    /// côté broker, on les réémet systématiquement.
    pub fn on_transport_connect<S: Subscriber>(&self, subscriber: &S) {
        let mut state = self.state.lock();
        state.transport = TransportStatus::Online;
        for filter in &self.subscriptions {
            match subscriber.request_subscription(filter) {
                Ok(()) => info!(filter = %filter, "subscription requested"),
                Err(e) => warn!(filter = %filter, error = %e, "subscription request failed"),
            }
        }
        self.hub.broadcast_transport(TransportStatus::Online);
    }

    /// Retourne true si le statut a effectivement changé
    pub fn on_transport_disconnect(&self) -> bool {
        let mut state = self.state.lock();
        if state.transport == TransportStatus::Disconnected {
            return false;
        }
        state.transport = TransportStatus::Disconnected;
        self.hub.broadcast_transport(TransportStatus::Disconnected);
        true
    }

    pub fn on_message(&self, topic: &str, payload: &str) -> Option<NodeStatus> {
        if topic != self.status_topic {
            return None;
        }
        let status = NodeStatus::from_sentinel(payload)?;
        let mut state = self.state.lock();
        state.node = status;
        self.hub.broadcast_node(status);
        info!(?status, "critical node status updated");
        Some(status)
    }

    pub fn attach(&self, observer: Observer) {
        let state = self.state.lock();
        self.hub.attach(observer, *state);
    }

    pub fn current_state(&self) -> LivenessState {
        *self.state.lock()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::ObserverEvent;
    use crate::mqtt::TransportError;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    /// Double de test du client MQTT : enregistre les filtres demandés
    #[derive(Default)]
    pub(crate) struct RecordingSubscriber {
        pub filters: Mutex<Vec<String>>,
        pub reject: bool,
    }

    impl Subscriber for RecordingSubscriber {
        fn request_subscription(&self, filter: &str) -> Result<(), TransportError> {
            if self.reject {
                return Err(TransportError::Rejected(filter.to_string()));
            }
            self.filters.lock().push(filter.to_string());
            Ok(())
        }
    }

    fn tracker() -> (LivenessTracker, ObserverHub) {
        let hub = ObserverHub::new();
        let t = LivenessTracker::new(
            hub.clone(),
            "seismic/status",
            vec!["logs/#".into(), "seismic/#".into()],
        );
        (t, hub)
    }

    fn drain(rx: &mut mpsc::Receiver<ObserverEvent>) -> Vec<ObserverEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[test]
    fn starts_disconnected_and_unknown() {
        let (t, _) = tracker();
        assert_eq!(t.current_state(), LivenessState::default());
        assert_eq!(t.current_state().node, NodeStatus::Unknown);
    }

    #[test]
    fn node_status_is_broadcast_then_replayed_to_late_observers() {
        let (t, _) = tracker();
        let (early, mut early_rx) = Observer::channel(Uuid::new_v4());
        t.attach(early);
        drain(&mut early_rx);

        assert_eq!(t.on_message("seismic/status", "ONLINE"), Some(NodeStatus::Online));
        assert_eq!(
            drain(&mut early_rx),
            vec![ObserverEvent::NodeStatus { status: NodeStatus::Online }]
        );

        let (late, mut late_rx) = Observer::channel(Uuid::new_v4());
        t.attach(late);
        assert_eq!(
            drain(&mut late_rx),
            vec![
                ObserverEvent::TransportStatus { status: TransportStatus::Disconnected },
                ObserverEvent::NodeStatus { status: NodeStatus::Online },
            ]
        );
    }

    #[test]
    fn non_sentinel_payloads_leave_state_untouched() {
        let (t, hub) = tracker();
        let (obs, mut rx) = Observer::channel(Uuid::new_v4());
        t.attach(obs);
        drain(&mut rx);

        assert_eq!(t.on_message("seismic/status", "online"), None);
        assert_eq!(t.on_message("seismic/status", "ONLINE "), None);
        assert_eq!(t.on_message("seismic/node-1", "ONLINE"), None);
        assert_eq!(t.current_state().node, NodeStatus::Unknown);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(hub.observer_count(), 1);
    }

    #[test]
    fn reconnect_resubscribes_and_rebroadcasts() {
        let (t, _) = tracker();
        let (obs, mut rx) = Observer::channel(Uuid::new_v4());
        t.attach(obs);
        drain(&mut rx);
        let sub = RecordingSubscriber::default();

        t.on_transport_connect(&sub);
        assert!(t.on_transport_disconnect());
        assert!(!t.on_transport_disconnect());
        t.on_transport_connect(&sub);

        assert_eq!(t.current_state().transport, TransportStatus::Online);
        assert_eq!(
            *sub.filters.lock(),
            vec!["logs/#", "seismic/#", "logs/#", "seismic/#"]
        );
        assert_eq!(
            drain(&mut rx),
            vec![
                ObserverEvent::TransportStatus { status: TransportStatus::Online },
                ObserverEvent::TransportStatus { status: TransportStatus::Disconnected },
                ObserverEvent::TransportStatus { status: TransportStatus::Online },
            ]
        );
    }

    #[test]
    fn rejected_subscription_still_marks_online() {
        let (t, _) = tracker();
        let sub = RecordingSubscriber { reject: true, ..Default::default() };
        t.on_transport_connect(&sub);
        assert_eq!(t.current_state().transport, TransportStatus::Online);
    }
}
