//! Modelos de dominio: nodos del grafo que refleja el sistema de archivos.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

use crate::identity::NodeId;

/// Etiquetas de los nodos que pueden participar en una relación `CONTAINS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Drive,
    Directory,
    File,
}

impl NodeKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Drive => "Drive",
            Self::Directory => "Directory",
            Self::File => "File",
        }
    }
}

/// Extremo tipado de una relación: etiqueta + id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeRef {
    pub kind: NodeKind,
    pub id: NodeId,
}

impl NodeRef {
    pub fn drive(id: &NodeId) -> Self {
        Self { kind: NodeKind::Drive, id: id.clone() }
    }

    pub fn directory(id: &NodeId) -> Self {
        Self { kind: NodeKind::Directory, id: id.clone() }
    }

    pub fn file(id: &NodeId) -> Self {
        Self { kind: NodeKind::File, id: id.clone() }
    }
}

/// Representa un nodo (:Drive) en Neo4j.
#[derive(Debug, Clone, PartialEq)]
pub struct DriveNode {
    pub id: NodeId,
    pub label: String,
}

/// Representa un nodo (:Directory). `parent_id` sólo es `None` en la raíz
/// de un recorrido.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryNode {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub name: String,
    pub last_checked: DateTime<Utc>,
}

/// Representa un nodo (:File) con sus metadatos y el resultado del análisis.
#[derive(Debug, Clone, PartialEq)]
pub struct FileNode {
    pub id: NodeId,
    pub dir_id: NodeId,
    pub name: String,
    pub extension: String,
    pub size_bytes: i64,
    pub owner: String,
    pub modified_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub mime_type: String,
    pub token_count: i64,
    pub summary: String,
    pub embedding: Vec<f64>,
    pub last_checked: DateTime<Utc>,
}

/// Un fichero tal y como está guardado, junto con sus hashtags actuales.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub file: FileNode,
    pub hashtags: Vec<String>,
}

/// Resultado del puerto de análisis de contenido.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileAnalysis {
    pub token_count: i64,
    pub summary: String,
    pub embedding: Vec<f64>,
    pub hashtags: Vec<String>,
}

impl FileAnalysis {
    /// Análisis omitido (tipo MIME no soportado o contenido vacío).
    pub fn skipped() -> Self {
        Self::default()
    }
}

/// Lo que eliminó un borrado en cascada de directorio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CascadeCount {
    pub directories: usize,
    pub files: usize,
}

/// Recuento de nodos por etiqueta.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub drives: i64,
    pub directories: i64,
    pub files: i64,
    pub hashtags: i64,
}

/// Fichero recuperado por sus hashtags para responder preguntas.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaggedFile {
    pub id: NodeId,
    pub name: String,
    pub summary: String,
    pub hashtags: Vec<String>,
}

/// Nodo del árbol que la API devuelve para navegar por el disco local.
#[derive(Debug, Clone, Serialize)]
pub struct FileTreeNode {
    pub path: PathBuf,
    pub name: String,
    pub is_dir: bool,
    pub children: Vec<FileTreeNode>,
}
