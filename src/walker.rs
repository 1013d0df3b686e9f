//! Recorrido incremental de un árbol de directorios hacia el grafo.
//!
//! Un recorrido estampa un único `walk_timestamp`, visita los directorios de
//! arriba abajo (cada padre se inserta y enlaza antes que sus hijos), decide
//! por fichero si está sin cambios, es nuevo o se ha modificado, y al final
//! entrega el timestamp a la limpieza para borrar lo que no se vio.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::{
    analysis::{classify_mime, ContentAnalysis},
    app_state::Status,
    cleanup::{cleanup, CleanupReport},
    error::{AnalysisError, CrawlError, StoreError},
    identity::NodeId,
    models::{DirectoryNode, DriveNode, FileNode, NodeRef},
    store::GraphStore,
};

/// Resumen de los resultados de un recorrido.
#[derive(Debug, Default, Clone, Serialize)]
pub struct WalkReport {
    pub walk_id: String,
    pub walk_timestamp: Option<DateTime<Utc>>,
    pub directories: u32,
    pub files_created: u32,
    pub files_updated: u32,
    pub files_unchanged: u32,
    pub files_failed: u32,
    pub cleanup: CleanupReport,
}

impl std::fmt::Display for WalkReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Resumen: {} directorios, {} ficheros nuevos, {} actualizados, {} sin cambios, {} con error. Limpieza: {}.",
            self.directories,
            self.files_created,
            self.files_updated,
            self.files_unchanged,
            self.files_failed,
            self.cleanup
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Si está definido, la raíz cuelga de un nodo (:Drive) con esta etiqueta.
    pub drive_label: Option<String>,
}

enum FileOutcome {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug, Error)]
enum FileError {
    #[error("no se pudieron leer los metadatos: {0}")]
    Stat(#[source] std::io::Error),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Metadatos de `stat` que se guardan en el nodo (:File).
struct FileStat {
    size_bytes: i64,
    owner: String,
    modified_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl FileStat {
    fn read(path: &Path) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let modified_at: DateTime<Utc> = metadata.modified()?.into();
        let created_at = metadata
            .created()
            .map(DateTime::<Utc>::from)
            .unwrap_or(modified_at);
        Ok(Self {
            size_bytes: metadata.len() as i64,
            owner: owner_of(&metadata),
            modified_at,
            created_at,
        })
    }
}

#[cfg(unix)]
fn owner_of(metadata: &std::fs::Metadata) -> String {
    use std::os::unix::fs::MetadataExt;
    metadata.uid().to_string()
}

#[cfg(not(unix))]
fn owner_of(_metadata: &std::fs::Metadata) -> String {
    String::new()
}

fn entry_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// `modified_at` provisional de un fichero nuevo aún sin confirmar.
fn pending_modified_at() -> DateTime<Utc> {
    DateTime::<Utc>::from(std::time::UNIX_EPOCH)
}

fn set_status(status: &Mutex<Status>, message: String, progress: f32) {
    let mut status = status.lock().unwrap_or_else(PoisonError::into_inner);
    status.message = message;
    status.progress = progress;
}

/// Comprueba las precondiciones y devuelve la raíz canónica (absoluta).
fn check_root(root: &Path) -> Result<PathBuf, CrawlError> {
    if !root.exists() {
        return Err(CrawlError::PathNotFound(root.to_path_buf()));
    }
    let root = std::fs::canonicalize(root).map_err(|source| CrawlError::Io {
        path: root.to_path_buf(),
        source,
    })?;
    if !root.is_dir() {
        return Err(CrawlError::NotADirectory(root));
    }
    let mut entries = std::fs::read_dir(&root).map_err(|source| CrawlError::Io {
        path: root.clone(),
        source,
    })?;
    if entries.next().is_none() {
        return Err(CrawlError::EmptyRoot(root));
    }
    Ok(root)
}

/// Motor de sincronización. Un `Walker` no debe ejecutar dos recorridos a la
/// vez contra el mismo almacén: quien lo invoca es responsable de serializarlos.
pub struct Walker {
    store: Arc<dyn GraphStore>,
    analysis: Arc<dyn ContentAnalysis>,
    options: WalkOptions,
    last_stamp: Mutex<Option<DateTime<Utc>>>,
}

impl Walker {
    pub fn new(
        store: Arc<dyn GraphStore>,
        analysis: Arc<dyn ContentAnalysis>,
        options: WalkOptions,
    ) -> Self {
        Self {
            store,
            analysis,
            options,
            last_stamp: Mutex::new(None),
        }
    }

    /// Recorre `root` completo, sincroniza el grafo y ejecuta la limpieza.
    pub async fn walk(&self, root: &Path, status: Arc<Mutex<Status>>) -> Result<WalkReport, CrawlError> {
        let walk_id = Uuid::new_v4();
        let span = info_span!("walk", walk_id = %walk_id);
        self.walk_inner(root, status, walk_id).instrument(span).await
    }

    async fn walk_inner(
        &self,
        root: &Path,
        status: Arc<Mutex<Status>>,
        walk_id: Uuid,
    ) -> Result<WalkReport, CrawlError> {
        let root = check_root(root)?;
        let walk_timestamp = self.next_stamp();
        info!("Iniciando recorrido de {} ({walk_timestamp})", root.display());

        let mut report = WalkReport {
            walk_id: walk_id.to_string(),
            walk_timestamp: Some(walk_timestamp),
            ..WalkReport::default()
        };

        match self.sync_tree(&root, walk_timestamp, &status, &mut report).await {
            Ok(()) => {
                info!("Recorrido de {} completado. {report}", root.display());
                Ok(report)
            }
            Err(err) => {
                error!("Recorrido de {} abortado ({err}). Parcial: {report}", root.display());
                Err(err)
            }
        }
    }

    async fn sync_tree(
        &self,
        root: &Path,
        walk_timestamp: DateTime<Utc>,
        status: &Mutex<Status>,
        report: &mut WalkReport,
    ) -> Result<(), CrawlError> {
        let drive_id = match &self.options.drive_label {
            Some(label) => {
                let drive = DriveNode {
                    id: NodeId::for_drive(label),
                    label: label.clone(),
                };
                self.store.upsert_drive(&drive).await?;
                Some(drive.id)
            }
            None => None,
        };

        // walkdir entrega cada directorio antes que su contenido.
        let entries: Vec<_> = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!("No se pudo leer una entrada del árbol: {err}");
                    None
                }
            })
            .collect();

        let total = entries.len() as f32;
        // Ficheros vistos en disco cuyo `last_checked` no se pudo actualizar.
        let mut protected = HashSet::new();

        for (index, entry) in entries.iter().enumerate() {
            let path = entry.path();
            let progress = (index + 1) as f32 / total;
            let file_type = entry.file_type();

            if file_type.is_dir() {
                let is_root = entry.depth() == 0;
                self.visit_directory(path, is_root, walk_timestamp, drive_id.as_ref())
                    .await?;
                report.directories += 1;
                continue;
            }

            if !file_type.is_file() {
                debug!("Ignorando entrada que no es fichero ni directorio: {}", path.display());
                continue;
            }

            set_status(
                status,
                format!("[{}/{}] Procesando: {}...", index + 1, total as u32, entry_name(path)),
                progress,
            );

            let Some(dir_path) = path.parent() else {
                continue;
            };
            let dir_id = NodeId::for_path(dir_path);
            let file_id = NodeId::for_path(path);

            match self.visit_file(path, &file_id, &dir_id, walk_timestamp).await {
                Ok(FileOutcome::Created) => report.files_created += 1,
                Ok(FileOutcome::Updated) => report.files_updated += 1,
                Ok(FileOutcome::Unchanged) => report.files_unchanged += 1,
                Err(FileError::Store(err)) if err.is_unavailable() => return Err(err.into()),
                Err(err) => {
                    report.files_failed += 1;
                    warn!("Omitido {}: {err}", path.display());
                    set_status(
                        status,
                        format!("ERROR en {}: {}", path.display(), err),
                        progress,
                    );
                    // Lo que ya estaba en el grafo se conserva tal cual hasta el próximo recorrido.
                    if let Err(err) = self.store.touch_file(&file_id, walk_timestamp).await {
                        if err.is_unavailable() {
                            return Err(err.into());
                        }
                        warn!("No se pudo marcar {} como visto: {err}", path.display());
                        protected.insert(file_id);
                    }
                }
            }
        }

        // Nunca limpiar contra una conexión rota: se borrarían nodos válidos.
        self.store.ping().await?;
        set_status(status, "Eliminando nodos obsoletos...".to_string(), 1.0);
        report.cleanup = cleanup(self.store.as_ref(), walk_timestamp, &protected).await?;
        Ok(())
    }

    async fn visit_directory(
        &self,
        path: &Path,
        is_root: bool,
        walk_timestamp: DateTime<Utc>,
        drive_id: Option<&NodeId>,
    ) -> Result<(), StoreError> {
        let dir_id = NodeId::for_path(path);
        let parent_id = if is_root {
            None
        } else {
            path.parent().map(NodeId::for_path)
        };

        self.store
            .upsert_directory(&DirectoryNode {
                id: dir_id.clone(),
                parent_id: parent_id.clone(),
                name: entry_name(path),
                last_checked: walk_timestamp,
            })
            .await?;

        let child = NodeRef::directory(&dir_id);
        match (&parent_id, drive_id) {
            (Some(parent), _) => {
                self.store
                    .link_contains(&NodeRef::directory(parent), &child)
                    .await?
            }
            (None, Some(drive)) => self.store.link_contains(&NodeRef::drive(drive), &child).await?,
            (None, None) => {}
        }
        debug!("Directorio sincronizado: {}", path.display());
        Ok(())
    }

    async fn visit_file(
        &self,
        path: &Path,
        file_id: &NodeId,
        dir_id: &NodeId,
        walk_timestamp: DateTime<Utc>,
    ) -> Result<FileOutcome, FileError> {
        let stat = FileStat::read(path).map_err(FileError::Stat)?;
        let existing = self.store.get_file(file_id).await?;

        if let Some(record) = &existing {
            if record.file.modified_at == stat.modified_at {
                self.store.touch_file(file_id, walk_timestamp).await?;
                return Ok(FileOutcome::Unchanged);
            }
        }

        // El tipo MIME sólo se calcula para ficheros nuevos.
        let mime_type = match &existing {
            Some(record) => record.file.mime_type.clone(),
            None => classify_mime(path),
        };
        debug!("Analizando {} ({mime_type})", path.display());
        let analysis = self.analysis.analyse(path, &mime_type).await?;

        let node = FileNode {
            id: file_id.clone(),
            dir_id: dir_id.clone(),
            name: entry_name(path),
            extension: path
                .extension()
                .map(|e| e.to_string_lossy().to_string())
                .unwrap_or_default(),
            size_bytes: stat.size_bytes,
            owner: stat.owner,
            modified_at: stat.modified_at,
            created_at: stat.created_at,
            mime_type,
            token_count: analysis.token_count,
            summary: analysis.summary,
            embedding: analysis.embedding,
            last_checked: walk_timestamp,
        };
        let is_new = existing.is_none();
        if let Err(err) = self.write_file(&node, &analysis.hashtags, is_new).await {
            if is_new && !err.is_unavailable() {
                // Un fichero nuevo a medio escribir se retira del grafo.
                if let Err(cleanup_err) = self.store.delete_file(file_id).await {
                    warn!("No se pudo retirar {}: {cleanup_err}", path.display());
                }
            }
            return Err(err.into());
        }

        Ok(if existing.is_some() {
            FileOutcome::Updated
        } else {
            FileOutcome::Created
        })
    }

    /// Guarda el nodo, sus hashtags y su relación con el directorio.
    ///
    /// El `modified_at` real se escribe al final: si algo falla antes, el nodo
    /// conserva el anterior (o uno provisional si es nuevo) y el siguiente
    /// recorrido vuelve a procesarlo en lugar de tomar el camino rápido.
    async fn write_file(
        &self,
        node: &FileNode,
        hashtags: &[String],
        is_new: bool,
    ) -> Result<(), StoreError> {
        if is_new {
            let pending = FileNode {
                modified_at: pending_modified_at(),
                ..node.clone()
            };
            self.store.upsert_file(&pending).await?;
        } else {
            self.store.clear_file_tags(&node.id).await?;
        }
        for tag in hashtags {
            self.store.link_has_tag(&node.id, tag).await?;
        }
        self.store
            .link_contains(&NodeRef::directory(&node.dir_id), &NodeRef::file(&node.id))
            .await?;
        self.store.upsert_file(node).await
    }

    /// Timestamp del recorrido, estrictamente creciente dentro del proceso.
    fn next_stamp(&self) -> DateTime<Utc> {
        let now = Utc::now();
        let mut last = self.last_stamp.lock().unwrap_or_else(PoisonError::into_inner);
        let stamp = match *last {
            Some(prev) if now <= prev => prev + Duration::microseconds(1),
            _ => now,
        };
        *last = Some(stamp);
        stamp
    }
}
