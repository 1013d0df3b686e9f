//! Puerto del almacén de grafo.
//!
//! El recorrido y la limpieza sólo hablan con este trait; `neo4j_client`
//! lo implementa contra Neo4j. Cada operación es una unidad transaccional
//! y todos los upserts son idempotentes por identificador.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::identity::NodeId;
use crate::models::{
    CascadeCount, DirectoryNode, DriveNode, FileNode, FileRecord, GraphStats, NodeRef, TaggedFile,
};

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Comprueba que el almacén responde.
    async fn ping(&self) -> StoreResult<()>;

    async fn upsert_drive(&self, drive: &DriveNode) -> StoreResult<()>;

    /// Crea o actualiza el directorio; en caso de existir sobrescribe todos sus campos.
    async fn upsert_directory(&self, dir: &DirectoryNode) -> StoreResult<()>;

    /// Crea o actualiza el fichero; en caso de existir sobrescribe todos sus campos.
    async fn upsert_file(&self, file: &FileNode) -> StoreResult<()>;

    /// Relación `CONTAINS` idempotente. No hace nada si falta alguno de los extremos.
    async fn link_contains(&self, parent: &NodeRef, child: &NodeRef) -> StoreResult<()>;

    /// Relación `HAS_TAG`, creando el hashtag si aún no existe.
    async fn link_has_tag(&self, file_id: &NodeId, tag: &str) -> StoreResult<()>;

    /// Elimina todas las relaciones `HAS_TAG` del fichero (los hashtags quedan).
    async fn clear_file_tags(&self, file_id: &NodeId) -> StoreResult<()>;

    async fn get_file(&self, file_id: &NodeId) -> StoreResult<Option<FileRecord>>;

    /// Actualiza sólo `last_checked`.
    async fn touch_file(&self, file_id: &NodeId, last_checked: DateTime<Utc>) -> StoreResult<()>;

    async fn find_stale_directories(&self, before: DateTime<Utc>) -> StoreResult<Vec<NodeId>>;

    async fn find_stale_files(&self, before: DateTime<Utc>) -> StoreResult<Vec<NodeId>>;

    /// Borra el directorio y todo lo alcanzable desde él por `CONTAINS`.
    async fn delete_directory(&self, dir_id: &NodeId) -> StoreResult<CascadeCount>;

    /// Devuelve `true` si el fichero existía.
    async fn delete_file(&self, file_id: &NodeId) -> StoreResult<bool>;

    /// Borra y devuelve los hashtags sin ninguna relación `HAS_TAG` entrante.
    async fn prune_orphan_tags(&self) -> StoreResult<Vec<String>>;

    // ---------------------------------------------------------------------
    // MANTENIMIENTO
    // ---------------------------------------------------------------------

    /// Crea las relaciones padre→hijo que falten a partir de `parent_id`.
    async fn repair_directory_links(&self) -> StoreResult<usize>;

    /// Directorios no raíz sin relación `CONTAINS` entrante.
    async fn find_unlinked_directories(&self) -> StoreResult<Vec<NodeId>>;

    async fn count_nodes(&self) -> StoreResult<GraphStats>;

    /// Borra todos los nodos y relaciones.
    async fn wipe(&self) -> StoreResult<()>;

    // ---------------------------------------------------------------------
    // CONSULTAS
    // ---------------------------------------------------------------------

    /// Todos los hashtags, ordenados.
    async fn list_hashtags(&self) -> StoreResult<Vec<String>>;

    /// Hasta `limit` ficheros con alguno de `tags`, cada uno con todos sus hashtags.
    async fn find_tagged_files(&self, tags: &[String], limit: usize) -> StoreResult<Vec<TaggedFile>>;
}
