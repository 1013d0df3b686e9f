//! Tipos de error del dominio: almacén, análisis de contenido y recorrido.

use std::path::PathBuf;
use thiserror::Error;

/// Fallo del almacén de grafo.
///
/// `Unavailable` indica que no se puede hablar con la base de datos: el
/// recorrido en curso se aborta y la limpieza no se ejecuta. `Query` es un
/// fallo de una operación concreta y sólo afecta a la entrada que la lanzó.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("almacén de grafo no disponible: {0}")]
    Unavailable(String),
    #[error("consulta al almacén fallida: {0}")]
    Query(String),
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Fallo al analizar el contenido de un fichero. Nunca aborta el recorrido.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("el contenido no es texto UTF-8 válido: {0}")]
    Decode(String),
    #[error("fallo en la conversión del documento: {0}")]
    Conversion(String),
    #[error("fallo del modelo de lenguaje: {0}")]
    Model(String),
    #[error("error de E/S leyendo el contenido: {0}")]
    Io(#[from] std::io::Error),
}

/// Fallo que impide (o interrumpe) un recorrido completo.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("la ruta no existe: {}", .0.display())]
    PathNotFound(PathBuf),
    #[error("la ruta no es un directorio: {}", .0.display())]
    NotADirectory(PathBuf),
    #[error("el directorio raíz está vacío: {}", .0.display())]
    EmptyRoot(PathBuf),
    #[error("error de E/S en {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CrawlError {
    /// Errores de precondición: el recorrido ni siquiera empezó.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::PathNotFound(_) | Self::NotADirectory(_) | Self::EmptyRoot(_)
        )
    }
}
