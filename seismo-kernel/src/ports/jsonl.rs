/**
 * TABLE JSONL - Implémentation fichier de LogTable
 *
 * FONCTIONNEMENT :
 * - Une ligne JSON par enregistrement, ajoutée en fin de fichier (jamais réécrite)
 * - Une écriture ratée est annulée (troncature à la longueur d'avant) ; un
 *   fragment sans fin de ligne trouvé à l'ouverture est retiré
 * - Séquence d'id restaurée au démarrage depuis le plus grand id lu
 * - Cache mémoire borné des dernières lignes pour les lectures
 * - clear() tronque le fichier et remet la séquence à 1 (tables purgeables)
 */

use super::{LogTable, StoreError, StoredRow, TableInfo};
use crate::models::ClassifiedRecord;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

struct TableInner {
    next_id: u64,
    /// Dernières lignes, plus ancienne en tête
    recent: VecDeque<StoredRow>,
}

pub struct JsonlTable {
    info: TableInfo,
    storage_path: PathBuf,
    cache_rows: usize,
    inner: Mutex<TableInner>,
}

impl JsonlTable {
    pub fn open(
        dir: impl AsRef<Path>,
        store: &str,
        name: &str,
        prunable: bool,
        cache_rows: usize,
    ) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let table = Self {
            info: TableInfo { store: store.to_string(), name: name.to_string(), prunable },
            storage_path: dir.join(format!("{name}.jsonl")),
            cache_rows: cache_rows.max(1),
            inner: Mutex::new(TableInner { next_id: 1, recent: VecDeque::new() }),
        };
        table.load_from_disk()?;
        Ok(table)
    }

    fn load_from_disk(&self) -> Result<(), StoreError> {
        if !self.storage_path.exists() {
            File::create(&self.storage_path)?;
            return Ok(());
        }

        let bytes = fs::read(&self.storage_path)?;
        let complete = bytes.iter().rposition(|b| *b == b'\n').map_or(0, |pos| pos + 1);
        if complete < bytes.len() {
            warn!(
                table = %self.info.qualified_name(),
                bytes = bytes.len() - complete,
                "dropping unterminated trailing row"
            );
            OpenOptions::new().write(true).open(&self.storage_path)?.set_len(complete as u64)?;
        }

        let mut inner = self.inner.lock();
        let mut loaded = 0usize;
        for (lineno, line) in bytes[..complete].split(|b| *b == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<StoredRow>(line) {
                Ok(row) => {
                    inner.next_id = inner.next_id.max(row.id + 1);
                    push_bounded(&mut inner.recent, row, self.cache_rows);
                    loaded += 1;
                }
                Err(e) => warn!(
                    table = %self.info.qualified_name(),
                    line = lineno + 1,
                    error = %e,
                    "skipping unreadable row"
                ),
            }
        }
        info!(table = %self.info.qualified_name(), rows = loaded, next_id = inner.next_id, "table opened");
        Ok(())
    }
}

/// Écrit la ligne entière ou rien : en cas d'échec `rollback` retire le fragment
fn write_or_rollback<W: Write>(
    w: &mut W,
    line: &[u8],
    rollback: impl FnOnce(&mut W) -> io::Result<()>,
) -> io::Result<()> {
    if let Err(e) = w.write_all(line) {
        if let Err(rb) = rollback(w) {
            warn!(error = %rb, "rollback of partial row failed");
        }
        return Err(e);
    }
    Ok(())
}

fn push_bounded(recent: &mut VecDeque<StoredRow>, row: StoredRow, cap: usize) {
    if recent.len() == cap {
        recent.pop_front();
    }
    recent.push_back(row);
}

impl LogTable for JsonlTable {
    fn append(&self, record: &ClassifiedRecord) -> Result<u64, StoreError> {
        if record.kind() != self.info.name {
            return Err(StoreError::WrongTable {
                table: self.info.qualified_name(),
                kind: record.kind(),
            });
        }

        // Le verrou couvre l'écriture : les id restent dans l'ordre du fichier
        let mut inner = self.inner.lock();
        let row = StoredRow { id: inner.next_id, record: record.clone() };
        let mut line = serde_json::to_string(&row)?;
        line.push('\n');

        let mut file = OpenOptions::new().append(true).create(true).open(&self.storage_path)?;
        let len = file.metadata()?.len();
        write_or_rollback(&mut file, line.as_bytes(), |f| f.set_len(len))?;

        inner.next_id += 1;
        let id = row.id;
        push_bounded(&mut inner.recent, row, self.cache_rows);
        Ok(id)
    }

    fn read(&self, limit: usize) -> Result<Vec<StoredRow>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner.recent.iter().rev().take(limit).cloned().collect())
    }

    fn clear(&self) -> Result<(), StoreError> {
        if !self.info.prunable {
            return Err(StoreError::PermissionDenied(self.info.qualified_name()));
        }
        let mut inner = self.inner.lock();
        File::create(&self.storage_path)?;
        inner.recent.clear();
        inner.next_id = 1;
        info!(table = %self.info.qualified_name(), "table cleared");
        Ok(())
    }

    fn info(&self) -> TableInfo {
        self.info.clone()
    }
}
