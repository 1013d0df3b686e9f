//! Identificadores estables para los nodos del grafo.
//!
//! El id de un directorio o fichero es una función pura de su ruta absoluta:
//! los primeros 128 bits del SHA-256 de la ruta normalizada, en hexadecimal.
//! No depende de ningún hash aleatorizado por proceso, así que la misma ruta
//! produce el mismo id entre ejecuciones y el MERGE del grafo nunca duplica.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Longitud (en bytes) del prefijo del digest que se conserva.
const ID_BYTES: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Id de una entrada del sistema de archivos (directorio o fichero).
    pub fn for_path(path: &Path) -> Self {
        let normalized = normalize(path);
        Self::digest(normalized.to_string_lossy().as_bytes())
    }

    /// Id de una unidad. Usa un espacio de nombres propio para no colisionar
    /// nunca con una ruta que casualmente coincida con la etiqueta.
    pub fn for_drive(label: &str) -> Self {
        Self::digest(format!("drive:{label}").as_bytes())
    }

    /// Reconstruye un id leído del almacén.
    pub fn from_stored(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn digest(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let hash = hasher.finalize();
        Self(hex::encode(&hash[..ID_BYTES]))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalización léxica: elimina separadores redundantes y componentes `.`.
/// No resuelve `..` ni enlaces simbólicos (eso requeriría E/S).
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}
