/**
 * ROUTEUR DE PERSISTANCE - Envoi des enregistrements vers les bonnes tables
 *
 * ROUTAGE :
 * - Generic -> live.generic + archive.generic
 * - Seismic -> live.seismic + archive.seismic
 * - Battery -> battery.battery uniquement
 *
 * Chaque table a sa propre tâche d'écriture alimentée par un canal non borné :
 * persist() ne bloque jamais, l'ordre d'arrivée est conservé par table, et un
 * échec sur une table n'affecte pas sa jumelle. Pas de retry.
 */

use crate::health::HealthTracker;
use crate::models::ClassifiedRecord;
use crate::ports::{SharedTable, StoreSet};
use tokio::sync::mpsc;
use tokio::task;
use tracing::debug;

#[derive(Clone)]
struct TableWriter {
    name: String,
    tx: mpsc::UnboundedSender<ClassifiedRecord>,
}

impl TableWriter {
    fn spawn(table: SharedTable, health: HealthTracker) -> Self {
        let name = table.info().qualified_name();
        let (tx, mut rx) = mpsc::unbounded_channel::<ClassifiedRecord>();
        let task_name = name.clone();

        task::spawn(async move {
            while let Some(record) = rx.recv().await {
                let t = table.clone();
                match task::spawn_blocking(move || t.append(&record)).await {
                    Ok(Ok(id)) => {
                        health.record_persisted();
                        debug!(table = %task_name, id, "row persisted");
                    }
                    Ok(Err(e)) => health.record_persist_failure(&task_name, &e),
                    Err(e) => health.record_persist_failure(&task_name, &e),
                }
            }
            debug!(table = %task_name, "writer stopped");
        });

        Self { name, tx }
    }

    fn submit(&self, record: ClassifiedRecord, health: &HealthTracker) {
        if let Err(e) = self.tx.send(record) {
            health.record_persist_failure(&self.name, &e);
        }
    }
}

#[derive(Clone)]
pub struct PersistenceRouter {
    live_generic: TableWriter,
    live_seismic: TableWriter,
    archive_generic: TableWriter,
    archive_seismic: TableWriter,
    battery: TableWriter,
    health: HealthTracker,
}

impl PersistenceRouter {
    /// Doit être appelé dans un runtime tokio (lance les tâches d'écriture)
    pub fn spawn(stores: &StoreSet, health: HealthTracker) -> Self {
        let writer = |t: &SharedTable| TableWriter::spawn(t.clone(), health.clone());
        Self {
            live_generic: writer(&stores.live_generic),
            live_seismic: writer(&stores.live_seismic),
            archive_generic: writer(&stores.archive_generic),
            archive_seismic: writer(&stores.archive_seismic),
            battery: writer(&stores.battery),
            health,
        }
    }

    pub fn persist(&self, record: ClassifiedRecord) {
        match &record {
            ClassifiedRecord::Generic { .. } => {
                self.archive_generic.submit(record.clone(), &self.health);
                self.live_generic.submit(record, &self.health);
            }
            ClassifiedRecord::Seismic { .. } => {
                self.archive_seismic.submit(record.clone(), &self.health);
                self.live_seismic.submit(record, &self.health);
            }
            ClassifiedRecord::Battery { .. } => {
                self.battery.submit(record, &self.health);
            }
        }
    }
}
