/**
 * PIPELINE D'INGESTION - Orchestration d'un message MQTT
 *
 * Ordre fixe pour chaque message, traité entièrement avant le suivant :
 *   1. vivacité  (statut du nœud critique si topic réservé)
 *   2. classification
 *   3. diffusion aux observateurs (toujours, même si rien n'est persisté)
 *   4. persistance (asynchrone, ne bloque pas le message suivant)
 *
 * La diffusion passe avant la persistance : un store en panne ne cache
 * jamais les données aux observateurs.
 */

use crate::broadcast::ObserverHub;
use crate::classifier::{Classification, Classifier};
use crate::health::HealthTracker;
use crate::liveness::LivenessTracker;
use crate::models::InboundMessage;
use crate::router::PersistenceRouter;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct IngestPipeline {
    liveness: LivenessTracker,
    classifier: Arc<Classifier>,
    hub: ObserverHub,
    router: PersistenceRouter,
    health: HealthTracker,
}

impl IngestPipeline {
    pub fn new(
        liveness: LivenessTracker,
        classifier: Classifier,
        hub: ObserverHub,
        router: PersistenceRouter,
        health: HealthTracker,
    ) -> Self {
        Self { liveness, classifier: Arc::new(classifier), hub, router, health }
    }

    /// Retourne le nombre d'enregistrements envoyés au routeur
    pub fn handle(&self, msg: InboundMessage) -> usize {
        self.health.record_ingested();

        self.liveness.on_message(&msg.topic, &msg.payload);

        let classification = self.classifier.classify(&msg.topic, &msg.payload, msg.received_at);

        self.hub.broadcast_message(&msg.topic, &msg.payload, msg.received_at);

        match classification {
            Classification::Discard(reason) => {
                self.health.record_discarded();
                debug!(topic = %msg.topic, ?reason, "not persisted");
                0
            }
            Classification::Records(records) => {
                let count = records.len();
                for record in records {
                    self.router.persist(record);
                }
                count
            }
        }
    }
}
