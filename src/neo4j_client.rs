//! Adaptador Neo4j del puerto `GraphStore`.
//!
//! Los instantes se guardan como enteros (nanosegundos desde epoch) para que
//! la comparación de `modified_at` sea exacta y la de `last_checked` barata.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use neo4rs::{query, Graph, Query};
use tracing::{debug, info};
use url::Url;

use crate::config::AppConfig;
use crate::error::StoreError;
use crate::identity::NodeId;
use crate::models::{
    CascadeCount, DirectoryNode, DriveNode, FileNode, FileRecord, GraphStats, NodeRef, TaggedFile,
};
use crate::store::{GraphStore, StoreResult};

pub async fn connect_from_config(cfg: &AppConfig) -> Result<Graph> {
    let url = Url::parse(&cfg.neo4j_uri)?;
    let host = url.host_str().unwrap_or("localhost");
    let port = url.port().unwrap_or(7687);
    let addr = format!("{host}:{port}");

    info!("Conectando a Neo4j en {addr}...");
    let graph = Graph::new(&addr, &cfg.neo4j_user, &cfg.neo4j_password).await?;
    info!("Conexión a Neo4j OK");
    Ok(graph)
}

/// Crea constraints de unicidad para :Drive, :Directory, :File y :Hashtag,
/// más índices sobre `last_checked` para las consultas de limpieza.
pub async fn ensure_schema(graph: &Graph) -> Result<()> {
    let statements = [
        "CREATE CONSTRAINT drive_id IF NOT EXISTS
         FOR (d:Drive)
         REQUIRE d.id IS UNIQUE",
        "CREATE CONSTRAINT directory_id IF NOT EXISTS
         FOR (d:Directory)
         REQUIRE d.id IS UNIQUE",
        "CREATE CONSTRAINT file_id IF NOT EXISTS
         FOR (f:File)
         REQUIRE f.id IS UNIQUE",
        "CREATE CONSTRAINT hashtag_tag IF NOT EXISTS
         FOR (t:Hashtag)
         REQUIRE t.tag IS UNIQUE",
        "CREATE INDEX directory_last_checked IF NOT EXISTS
         FOR (d:Directory) ON (d.last_checked)",
        "CREATE INDEX file_last_checked IF NOT EXISTS
         FOR (f:File) ON (f.last_checked)",
    ];

    for stmt in statements {
        graph.run(query(stmt)).await?;
    }

    info!("Esquema de Neo4j asegurado (constraints e índices creados).");
    Ok(())
}

impl From<neo4rs::Error> for StoreError {
    fn from(err: neo4rs::Error) -> Self {
        match &err {
            neo4rs::Error::IOError { .. } | neo4rs::Error::ConnectionError { .. } => {
                StoreError::Unavailable(err.to_string())
            }
            _ => StoreError::Query(err.to_string()),
        }
    }
}

fn to_nanos(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

fn from_nanos(nanos: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(nanos)
}

/// `GraphStore` sobre una conexión (pool) de neo4rs.
#[derive(Clone)]
pub struct Neo4jStore {
    graph: Arc<Graph>,
}

impl Neo4jStore {
    pub fn new(graph: Arc<Graph>) -> Self {
        Self { graph }
    }

    async fn run(&self, q: Query) -> StoreResult<()> {
        self.graph.run(q).await?;
        Ok(())
    }

    /// Ejecuta una consulta que devuelve una columna `id` por fila.
    async fn collect_ids(&self, q: Query) -> StoreResult<Vec<NodeId>> {
        let mut cursor = self.graph.execute(q).await?;
        let mut ids = Vec::new();
        while let Some(row) = cursor.next().await? {
            let id: String = row
                .get("id")
                .ok_or_else(|| StoreError::Query("falta la columna 'id'".to_string()))?;
            ids.push(NodeId::from_stored(id));
        }
        Ok(ids)
    }
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn ping(&self) -> StoreResult<()> {
        self.run(query("RETURN 1")).await
    }

    async fn upsert_drive(&self, drive: &DriveNode) -> StoreResult<()> {
        self.run(
            query("MERGE (d:Drive {id: $id}) SET d.label = $label")
                .param("id", drive.id.as_str())
                .param("label", drive.label.clone()),
        )
        .await
    }

    async fn upsert_directory(&self, dir: &DirectoryNode) -> StoreResult<()> {
        // neo4rs no acepta parámetros nulos: la raíz borra la propiedad en su lugar.
        let q = match &dir.parent_id {
            Some(parent) => query(
                "MERGE (d:Directory {id: $id})
                 SET d.parent_id = $parent_id, d.name = $name, d.last_checked = $last_checked",
            )
            .param("parent_id", parent.as_str()),
            None => query(
                "MERGE (d:Directory {id: $id})
                 SET d.name = $name, d.last_checked = $last_checked
                 REMOVE d.parent_id",
            ),
        };
        self.run(
            q.param("id", dir.id.as_str())
                .param("name", dir.name.clone())
                .param("last_checked", to_nanos(dir.last_checked)),
        )
        .await
    }

    async fn upsert_file(&self, file: &FileNode) -> StoreResult<()> {
        self.run(
            query(
                "MERGE (f:File {id: $id})
                 SET f.dir_id = $dir_id, f.name = $name, f.extension = $extension,
                     f.size_bytes = $size_bytes, f.owner = $owner,
                     f.modified_at = $modified_at, f.created_at = $created_at,
                     f.mime_type = $mime_type, f.token_count = $token_count,
                     f.summary = $summary, f.embedding = $embedding,
                     f.last_checked = $last_checked",
            )
            .param("id", file.id.as_str())
            .param("dir_id", file.dir_id.as_str())
            .param("name", file.name.clone())
            .param("extension", file.extension.clone())
            .param("size_bytes", file.size_bytes)
            .param("owner", file.owner.clone())
            .param("modified_at", to_nanos(file.modified_at))
            .param("created_at", to_nanos(file.created_at))
            .param("mime_type", file.mime_type.clone())
            .param("token_count", file.token_count)
            .param("summary", file.summary.clone())
            .param("embedding", file.embedding.clone())
            .param("last_checked", to_nanos(file.last_checked)),
        )
        .await
    }

    async fn link_contains(&self, parent: &NodeRef, child: &NodeRef) -> StoreResult<()> {
        let cypher = format!(
            "MATCH (p:{} {{id: $parent_id}}), (c:{} {{id: $child_id}}) MERGE (p)-[:CONTAINS]->(c)",
            parent.kind.label(),
            child.kind.label()
        );
        self.run(
            query(&cypher)
                .param("parent_id", parent.id.as_str())
                .param("child_id", child.id.as_str()),
        )
        .await
    }

    async fn link_has_tag(&self, file_id: &NodeId, tag: &str) -> StoreResult<()> {
        self.run(
            query(
                "MATCH (f:File {id: $file_id})
                 MERGE (t:Hashtag {tag: $tag})
                 MERGE (f)-[:HAS_TAG]->(t)",
            )
            .param("file_id", file_id.as_str())
            .param("tag", tag),
        )
        .await
    }

    async fn clear_file_tags(&self, file_id: &NodeId) -> StoreResult<()> {
        self.run(
            query("MATCH (:File {id: $file_id})-[r:HAS_TAG]->(:Hashtag) DELETE r")
                .param("file_id", file_id.as_str()),
        )
        .await
    }

    async fn get_file(&self, file_id: &NodeId) -> StoreResult<Option<FileRecord>> {
        let mut cursor = self
            .graph
            .execute(
                query(
                    "MATCH (f:File {id: $id})
                     OPTIONAL MATCH (f)-[:HAS_TAG]->(t:Hashtag)
                     WITH f, collect(t.tag) AS hashtags
                     RETURN f.dir_id AS dir_id, f.name AS name, f.extension AS extension,
                            f.size_bytes AS size_bytes, f.owner AS owner,
                            f.modified_at AS modified_at, f.created_at AS created_at,
                            f.mime_type AS mime_type, f.token_count AS token_count,
                            f.summary AS summary, f.embedding AS embedding,
                            f.last_checked AS last_checked, hashtags",
                )
                .param("id", file_id.as_str()),
            )
            .await?;

        let Some(row) = cursor.next().await? else {
            return Ok(None);
        };

        let dir_id: String = row
            .get("dir_id")
            .ok_or_else(|| StoreError::Query(format!("fichero {file_id} sin dir_id")))?;
        let modified_at: i64 = row
            .get("modified_at")
            .ok_or_else(|| StoreError::Query(format!("fichero {file_id} sin modified_at")))?;

        let file = FileNode {
            id: file_id.clone(),
            dir_id: NodeId::from_stored(dir_id),
            name: row.get("name").unwrap_or_default(),
            extension: row.get("extension").unwrap_or_default(),
            size_bytes: row.get("size_bytes").unwrap_or_default(),
            owner: row.get("owner").unwrap_or_default(),
            modified_at: from_nanos(modified_at),
            created_at: from_nanos(row.get("created_at").unwrap_or_default()),
            mime_type: row.get("mime_type").unwrap_or_default(),
            token_count: row.get("token_count").unwrap_or_default(),
            summary: row.get("summary").unwrap_or_default(),
            embedding: row.get("embedding").unwrap_or_default(),
            last_checked: from_nanos(row.get("last_checked").unwrap_or_default()),
        };
        let hashtags: Vec<String> = row.get("hashtags").unwrap_or_default();

        Ok(Some(FileRecord { file, hashtags }))
    }

    async fn touch_file(&self, file_id: &NodeId, last_checked: DateTime<Utc>) -> StoreResult<()> {
        self.run(
            query("MATCH (f:File {id: $id}) SET f.last_checked = $last_checked")
                .param("id", file_id.as_str())
                .param("last_checked", to_nanos(last_checked)),
        )
        .await
    }

    async fn find_stale_directories(&self, before: DateTime<Utc>) -> StoreResult<Vec<NodeId>> {
        self.collect_ids(
            query("MATCH (d:Directory) WHERE d.last_checked < $before RETURN d.id AS id")
                .param("before", to_nanos(before)),
        )
        .await
    }

    async fn find_stale_files(&self, before: DateTime<Utc>) -> StoreResult<Vec<NodeId>> {
        self.collect_ids(
            query("MATCH (f:File) WHERE f.last_checked < $before RETURN f.id AS id")
                .param("before", to_nanos(before)),
        )
        .await
    }

    async fn delete_directory(&self, dir_id: &NodeId) -> StoreResult<CascadeCount> {
        let mut cursor = self
            .graph
            .execute(
                query(
                    "MATCH (d:Directory {id: $id})
                     OPTIONAL MATCH (d)-[:CONTAINS*]->(n)
                     WITH d, collect(DISTINCT n) AS descendants
                     WITH d, [x IN descendants WHERE x:Directory] AS dirs,
                             [x IN descendants WHERE x:File] AS files
                     FOREACH (x IN dirs | DETACH DELETE x)
                     FOREACH (x IN files | DETACH DELETE x)
                     DETACH DELETE d
                     RETURN size(dirs) AS dirs, size(files) AS files",
                )
                .param("id", dir_id.as_str()),
            )
            .await?;

        let mut count = CascadeCount::default();
        if let Some(row) = cursor.next().await? {
            let dirs: i64 = row.get("dirs").unwrap_or_default();
            let files: i64 = row.get("files").unwrap_or_default();
            count.directories = dirs as usize + 1;
            count.files = files as usize;
        }
        debug!("Directorio {dir_id} borrado en cascada: {count:?}");
        Ok(count)
    }

    async fn delete_file(&self, file_id: &NodeId) -> StoreResult<bool> {
        let mut cursor = self
            .graph
            .execute(
                query("MATCH (f:File {id: $id}) DETACH DELETE f RETURN count(*) AS removed")
                    .param("id", file_id.as_str()),
            )
            .await?;
        let removed: i64 = match cursor.next().await? {
            Some(row) => row.get("removed").unwrap_or_default(),
            None => 0,
        };
        Ok(removed > 0)
    }

    async fn prune_orphan_tags(&self) -> StoreResult<Vec<String>> {
        let mut cursor = self
            .graph
            .execute(query(
                "MATCH (t:Hashtag) WHERE NOT EXISTS { ()-[:HAS_TAG]->(t) }
                 WITH t, t.tag AS tag
                 DETACH DELETE t
                 RETURN tag",
            ))
            .await?;
        let mut tags = Vec::new();
        while let Some(row) = cursor.next().await? {
            if let Some(tag) = row.get::<String>("tag") {
                tags.push(tag);
            }
        }
        Ok(tags)
    }

    async fn repair_directory_links(&self) -> StoreResult<usize> {
        let mut cursor = self
            .graph
            .execute(query(
                "MATCH (child:Directory) WHERE child.parent_id IS NOT NULL
                 MATCH (parent:Directory {id: child.parent_id})
                 WHERE NOT EXISTS { (parent)-[:CONTAINS]->(child) }
                 MERGE (parent)-[:CONTAINS]->(child)
                 RETURN count(*) AS created",
            ))
            .await?;
        let created: i64 = match cursor.next().await? {
            Some(row) => row.get("created").unwrap_or_default(),
            None => 0,
        };
        Ok(created as usize)
    }

    async fn find_unlinked_directories(&self) -> StoreResult<Vec<NodeId>> {
        self.collect_ids(query(
            "MATCH (d:Directory)
             WHERE d.parent_id IS NOT NULL AND NOT EXISTS { ()-[:CONTAINS]->(d) }
             RETURN d.id AS id",
        ))
        .await
    }

    async fn count_nodes(&self) -> StoreResult<GraphStats> {
        let mut cursor = self
            .graph
            .execute(query(
                "MATCH (n) WHERE n:Drive OR n:Directory OR n:File OR n:Hashtag
                 RETURN labels(n)[0] AS label, count(*) AS total",
            ))
            .await?;
        let mut stats = GraphStats::default();
        while let Some(row) = cursor.next().await? {
            let label: String = row.get("label").unwrap_or_default();
            let total: i64 = row.get("total").unwrap_or_default();
            match label.as_str() {
                "Drive" => stats.drives = total,
                "Directory" => stats.directories = total,
                "File" => stats.files = total,
                "Hashtag" => stats.hashtags = total,
                _ => {}
            }
        }
        Ok(stats)
    }

    async fn wipe(&self) -> StoreResult<()> {
        self.run(query("MATCH (n) DETACH DELETE n")).await?;
        info!("Base de datos vaciada.");
        Ok(())
    }

    async fn list_hashtags(&self) -> StoreResult<Vec<String>> {
        let mut cursor = self
            .graph
            .execute(query("MATCH (t:Hashtag) RETURN t.tag AS tag ORDER BY tag"))
            .await?;
        let mut tags = Vec::new();
        while let Some(row) = cursor.next().await? {
            if let Some(tag) = row.get::<String>("tag") {
                tags.push(tag);
            }
        }
        Ok(tags)
    }

    async fn find_tagged_files(&self, tags: &[String], limit: usize) -> StoreResult<Vec<TaggedFile>> {
        let mut cursor = self
            .graph
            .execute(
                query(
                    "MATCH (f:File)-[:HAS_TAG]->(t:Hashtag) WHERE t.tag IN $tags
                     WITH DISTINCT f ORDER BY f.id LIMIT $limit
                     OPTIONAL MATCH (f)-[:HAS_TAG]->(other:Hashtag)
                     WITH f, other ORDER BY other.tag
                     RETURN f.id AS id, f.name AS name, f.summary AS summary,
                            collect(other.tag) AS hashtags
                     ORDER BY id",
                )
                .param("tags", tags.to_vec())
                .param("limit", limit as i64),
            )
            .await?;

        let mut files = Vec::new();
        while let Some(row) = cursor.next().await? {
            let id: String = row
                .get("id")
                .ok_or_else(|| StoreError::Query("falta la columna 'id'".to_string()))?;
            files.push(TaggedFile {
                id: NodeId::from_stored(id),
                name: row.get("name").unwrap_or_default(),
                summary: row.get("summary").unwrap_or_default(),
                hashtags: row.get("hashtags").unwrap_or_default(),
            });
        }
        Ok(files)
    }
}
