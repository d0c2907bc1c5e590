/**
 * DATA PORTS - Tables de logs append-only du kernel
 *
 * RÔLE :
 * Abstraction "table de log ordonnée" derrière laquelle vivent les trois
 * stores : live (purgeable), archive (jamais purgée) et battery.
 *
 * FONCTIONNEMENT :
 * - LogTable trait = append / read / clear / info, commun à toutes les tables
 * - StoredRow = id monotone attribué par la table + enregistrement classifié
 * - StoreSet = le catalogue des cinq tables, ouvert une fois au démarrage
 *
 * INVARIANTS :
 * - une ligne n'est jamais modifiée, seulement ajoutée
 * - seul clear() supprime, et il remet la séquence d'id à 1
 * - une table d'archive refuse clear()
 */

pub mod jsonl;

use crate::models::ClassifiedRecord;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

pub use jsonl::JsonlTable;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Table {table} does not accept {kind} records")]
    WrongTable { table: String, kind: &'static str },
    #[error("Permission denied: {0} is append-only")]
    PermissionDenied(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRow {
    pub id: u64,
    #[serde(flatten)]
    pub record: ClassifiedRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableInfo {
    /// live, archive ou battery
    pub store: String,
    /// generic, seismic ou battery (= ClassifiedRecord::kind)
    pub name: String,
    pub prunable: bool,
}

impl TableInfo {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.store, self.name)
    }
}

pub trait LogTable: Send + Sync {
    /// Ajoute une ligne, retourne l'id attribué
    fn append(&self, record: &ClassifiedRecord) -> Result<u64, StoreError>;

    /// Les `limit` lignes les plus récentes, plus récente en tête
    fn read(&self, limit: usize) -> Result<Vec<StoredRow>, StoreError>;

    /// Vide la table et remet la séquence à zéro
    fn clear(&self) -> Result<(), StoreError> {
        Err(StoreError::PermissionDenied(self.info().qualified_name()))
    }

    fn info(&self) -> TableInfo;
}

pub type SharedTable = Arc<dyn LogTable>;

/// Les cinq tables du kernel
#[derive(Clone)]
pub struct StoreSet {
    pub live_generic: SharedTable,
    pub live_seismic: SharedTable,
    pub archive_generic: SharedTable,
    pub archive_seismic: SharedTable,
    pub battery: SharedTable,
}

impl StoreSet {
    /// Ouvre (ou crée) `<data_dir>/{live,archive,battery}/<table>.jsonl`
    pub fn open(data_dir: &Path, cache_rows: usize) -> Result<Self, StoreError> {
        let open = |store: &str, name: &str, prunable: bool| -> Result<SharedTable, StoreError> {
            let table: SharedTable =
                Arc::new(JsonlTable::open(data_dir.join(store), store, name, prunable, cache_rows)?);
            Ok(table)
        };
        Ok(Self {
            live_generic: open("live", "generic", true)?,
            live_seismic: open("live", "seismic", true)?,
            archive_generic: open("archive", "generic", false)?,
            archive_seismic: open("archive", "seismic", false)?,
            battery: open("battery", "battery", true)?,
        })
    }

    /// Tables lisibles via /logs/{table}
    pub fn live(&self, name: &str) -> Option<&SharedTable> {
        match name {
            "generic" => Some(&self.live_generic),
            "seismic" => Some(&self.live_seismic),
            "battery" => Some(&self.battery),
            _ => None,
        }
    }

    /// Tables lisibles via /archive/{table}
    pub fn archive(&self, name: &str) -> Option<&SharedTable> {
        match name {
            "generic" => Some(&self.archive_generic),
            "seismic" => Some(&self.archive_seismic),
            _ => None,
        }
    }

    /// Purge administrative : live + battery, l'archive n'est jamais ciblée.
    /// Toutes les tables sont tentées, la première erreur est retournée.
    pub fn clear_live(&self) -> Result<(), StoreError> {
        let mut first_err = None;
        for table in [&self.live_generic, &self.live_seismic, &self.battery] {
            if let Err(e) = table.clear() {
                warn!(table = %table.info().qualified_name(), error = %e, "clear failed");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn list_table_info(&self) -> Vec<TableInfo> {
        [
            &self.live_generic,
            &self.live_seismic,
            &self.archive_generic,
            &self.archive_seismic,
            &self.battery,
        ]
        .iter()
        .map(|t| t.info())
        .collect()
    }
}
