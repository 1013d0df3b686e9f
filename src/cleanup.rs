//! Limpieza tras un recorrido: borra lo que el recorrido no vio.
//!
//! Orden: directorios obsoletos (en cascada), después ficheros obsoletos cuyo
//! directorio sobrevivió y, por último, hashtags sin ningún fichero.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::identity::NodeId;
use crate::store::GraphStore;

/// Recuento de nodos eliminados por la limpieza.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub directories_removed: usize,
    pub files_removed: usize,
    pub tags_removed: usize,
}

impl std::fmt::Display for CleanupReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} directorios, {} ficheros y {} hashtags eliminados",
            self.directories_removed, self.files_removed, self.tags_removed
        )
    }
}

/// Elimina todo nodo con `last_checked < walk_timestamp`, salvo los ficheros de
/// `protected`: se vieron en disco pero no se pudo actualizar su `last_checked`.
///
/// Cualquier error del almacén interrumpe la limpieza: es preferible dejar
/// nodos obsoletos hasta el siguiente recorrido que borrar a ciegas.
pub async fn cleanup(
    store: &dyn GraphStore,
    walk_timestamp: DateTime<Utc>,
    protected: &HashSet<NodeId>,
) -> Result<CleanupReport, StoreError> {
    let mut report = CleanupReport::default();

    // 1) Directorios: el borrado en cascada se lleva sus subárboles y ficheros.
    for dir_id in store.find_stale_directories(walk_timestamp).await? {
        let removed = store.delete_directory(&dir_id).await?;
        debug!("Directorio obsoleto {dir_id}: {removed:?}");
        report.directories_removed += removed.directories;
        report.files_removed += removed.files;
    }

    // 2) Ficheros desaparecidos de directorios que siguen existiendo.
    for file_id in store.find_stale_files(walk_timestamp).await? {
        if protected.contains(&file_id) {
            debug!("Fichero {file_id} conservado: visto en disco");
            continue;
        }
        if store.delete_file(&file_id).await? {
            report.files_removed += 1;
        }
    }

    // 3) Hashtags huérfanos, cuando ya se han borrado todas las relaciones HAS_TAG.
    let orphans = store.prune_orphan_tags().await?;
    if !orphans.is_empty() {
        debug!("Hashtags huérfanos eliminados: {orphans:?}");
    }
    report.tags_removed = orphans.len();

    info!("Limpieza completada: {report}.");
    Ok(report)
}
