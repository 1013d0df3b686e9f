//! Puerto de análisis de contenido.
//!
//! Dado un fichero y su tipo MIME devuelve `(tokens, resumen, embedding, hashtags)`.
//! La política de despacho es:
//!   - `text/*`: se lee el fichero directamente.
//!   - tipos de la lista `CONVERTIBLE_MIME_TYPES`: se extrae el texto con un
//!     `DocumentConverter` antes de analizar.
//!   - cualquier otro tipo: análisis omitido, `(0, "", [], [])`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use mime_guess::MimeGuess;
use tracing::{debug, warn};

use crate::converter::DocumentConverter;
use crate::error::AnalysisError;
use crate::models::FileAnalysis;

/// Resumen que se guarda cuando el texto supera el umbral de tokens.
pub const TOO_LONG_SUMMARY: &str = "[DOCUMENTO DEMASIADO LARGO PARA RESUMIR]";

/// Tipos binarios/ofimáticos/imagen cuyo texto se obtiene por conversión.
pub const CONVERTIBLE_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "image/jpeg",
    "image/png",
    "image/bmp",
    "image/tiff",
    "image/heif",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MimeCategory {
    Text,
    Convertible,
    Unsupported,
}

pub fn categorise(mime_type: &str) -> MimeCategory {
    if mime_type.starts_with("text/") {
        MimeCategory::Text
    } else if CONVERTIBLE_MIME_TYPES.contains(&mime_type) {
        MimeCategory::Convertible
    } else {
        MimeCategory::Unsupported
    }
}

/// Tipo MIME por extensión; `application/octet-stream` si no se reconoce.
pub fn classify_mime(path: &Path) -> String {
    MimeGuess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// De dónde sale el texto a analizar: exactamente una de las dos fuentes.
#[derive(Debug, Clone)]
pub enum ContentSource {
    FromPath(PathBuf),
    FromText(String),
}

// ---------------------------------------------------------------------
// TOKENIZACIÓN
// ---------------------------------------------------------------------

static CL100K_BASE: OnceLock<Option<tiktoken_rs::CoreBPE>> = OnceLock::new();

/// Cuenta tokens con cl100k_base. Si el BPE no se puede inicializar se usa
/// una estimación de ~4 caracteres por token.
pub fn count_tokens(text: &str) -> usize {
    let bpe = CL100K_BASE.get_or_init(|| match tiktoken_rs::cl100k_base() {
        Ok(bpe) => Some(bpe),
        Err(e) => {
            warn!("No se pudo inicializar cl100k_base ({e}); se estimarán los tokens.");
            None
        }
    });
    match bpe {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => text.chars().count().div_ceil(4),
    }
}

/// Extrae los hashtags de la respuesta del modelo: palabras que empiezan por
/// `#`, sin el `#` ni la puntuación final, sin repetir y en orden de aparición.
pub fn extract_hashtags(raw: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for word in raw.split_whitespace() {
        let Some(tag) = word.strip_prefix('#') else {
            continue;
        };
        let tag = tag.trim_end_matches(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-'));
        if !tag.is_empty() && !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }
    tags
}

// ---------------------------------------------------------------------
// PUERTOS
// ---------------------------------------------------------------------

/// Servicios de lenguaje que consume el análisis (resumen, embedding, hashtags).
#[async_trait]
pub trait ContentModel: Send + Sync {
    async fn summarise(&self, text: &str) -> anyhow::Result<String>;
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f64>>;
    async fn hashtags(&self, text: &str) -> anyhow::Result<Vec<String>>;
}

/// Puerto que usa el recorrido para analizar un fichero.
#[async_trait]
pub trait ContentAnalysis: Send + Sync {
    async fn analyse(&self, path: &Path, mime_type: &str) -> Result<FileAnalysis, AnalysisError>;

    /// `true` si analizar este tipo implica llamar a un modelo.
    fn calls_model(&self, mime_type: &str) -> bool {
        categorise(mime_type) != MimeCategory::Unsupported
    }
}

/// Implementación del análisis: conversión + tokenización + LLM.
pub struct MetaAnalyser {
    model: Arc<dyn ContentModel>,
    converter: Arc<dyn DocumentConverter>,
    token_limit: usize,
}

impl MetaAnalyser {
    pub fn new(
        model: Arc<dyn ContentModel>,
        converter: Arc<dyn DocumentConverter>,
        token_limit: usize,
    ) -> Self {
        Self {
            model,
            converter,
            token_limit,
        }
    }

    /// Categoría efectiva: un tipo convertible que el conversor configurado
    /// no admite se trata como no soportado.
    pub fn category(&self, mime_type: &str) -> MimeCategory {
        match categorise(mime_type) {
            MimeCategory::Convertible if !self.converter.supports(mime_type) => {
                MimeCategory::Unsupported
            }
            category => category,
        }
    }

    pub async fn analyse_content(&self, source: ContentSource) -> Result<FileAnalysis, AnalysisError> {
        let content = match source {
            ContentSource::FromPath(path) => {
                let bytes = tokio::fs::read(&path).await?;
                String::from_utf8(bytes).map_err(|e| {
                    AnalysisError::Decode(format!("{}: {}", path.display(), e.utf8_error()))
                })?
            }
            ContentSource::FromText(text) => text,
        };

        if content.trim().is_empty() {
            return Ok(FileAnalysis::skipped());
        }

        let token_count = count_tokens(&content);
        if token_count >= self.token_limit {
            debug!("Texto de {token_count} tokens supera el límite de {}", self.token_limit);
            return Ok(FileAnalysis {
                token_count: token_count as i64,
                summary: TOO_LONG_SUMMARY.to_string(),
                embedding: Vec::new(),
                hashtags: Vec::new(),
            });
        }

        let summary = self
            .model
            .summarise(&content)
            .await
            .map_err(|e| AnalysisError::Model(format!("resumen: {e:#}")))?;
        let embedding = self
            .model
            .embed(&summary)
            .await
            .map_err(|e| AnalysisError::Model(format!("embedding: {e:#}")))?;
        let hashtags = self
            .model
            .hashtags(&content)
            .await
            .map_err(|e| AnalysisError::Model(format!("hashtags: {e:#}")))?;

        Ok(FileAnalysis {
            token_count: token_count as i64,
            summary,
            embedding,
            hashtags,
        })
    }
}

#[async_trait]
impl ContentAnalysis for MetaAnalyser {
    async fn analyse(&self, path: &Path, mime_type: &str) -> Result<FileAnalysis, AnalysisError> {
        let source = match self.category(mime_type) {
            MimeCategory::Text => ContentSource::FromPath(path.to_path_buf()),
            MimeCategory::Convertible => {
                let text = self
                    .converter
                    .convert(path, mime_type)
                    .await
                    .map_err(|e| AnalysisError::Conversion(format!("{e:#}")))?;
                ContentSource::FromText(text)
            }
            MimeCategory::Unsupported => return Ok(FileAnalysis::skipped()),
        };
        self.analyse_content(source).await
    }

    fn calls_model(&self, mime_type: &str) -> bool {
        self.category(mime_type) != MimeCategory::Unsupported
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::LocalConverter;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingModel {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ContentModel for CountingModel {
        async fn summarise(&self, text: &str) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("resumen de {} caracteres", text.len()))
        }

        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f64>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![0.25, 0.5])
        }

        async fn hashtags(&self, _text: &str) -> anyhow::Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(extract_hashtags("#finance #q3"))
        }
    }

    struct FixedConverter(&'static str);

    #[async_trait]
    impl DocumentConverter for FixedConverter {
        async fn convert(&self, _path: &Path, _mime_type: &str) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct BrokenConverter;

    #[async_trait]
    impl DocumentConverter for BrokenConverter {
        async fn convert(&self, _path: &Path, _mime_type: &str) -> anyhow::Result<String> {
            anyhow::bail!("servicio caído")
        }
    }

    fn analyser(model: Arc<CountingModel>, limit: usize) -> MetaAnalyser {
        MetaAnalyser::new(model, Arc::new(FixedConverter("texto convertido")), limit)
    }

    #[test]
    fn categorise_follows_dispatch_policy() {
        assert_eq!(categorise("text/plain"), MimeCategory::Text);
        assert_eq!(categorise("text/html"), MimeCategory::Text);
        assert_eq!(categorise("application/pdf"), MimeCategory::Convertible);
        assert_eq!(categorise("image/png"), MimeCategory::Convertible);
        assert_eq!(categorise("application/zip"), MimeCategory::Unsupported);
        assert_eq!(categorise("application/octet-stream"), MimeCategory::Unsupported);
    }

    #[test]
    fn classify_mime_uses_extension() {
        assert_eq!(classify_mime(Path::new("/x/notes.txt")), "text/plain");
        assert_eq!(classify_mime(Path::new("/x/report.pdf")), "application/pdf");
        assert_eq!(classify_mime(Path::new("/x/blob")), "application/octet-stream");
    }

    #[test]
    fn extract_hashtags_strips_and_dedupes() {
        let raw = "Here you go: #Finance, #budget #Finance #q3. not-a-tag # #";
        assert_eq!(extract_hashtags(raw), vec!["Finance", "budget", "q3"]);
        assert!(extract_hashtags("sin etiquetas").is_empty());
    }

    #[test]
    fn count_tokens_is_positive_for_text() {
        assert_eq!(count_tokens(""), 0);
        assert!(count_tokens("Hello, world! This is a test.") > 0);
    }

    #[tokio::test]
    async fn text_file_is_summarised_embedded_and_tagged() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("notes.txt");
        std::fs::write(&path, "Quarterly budget review for the finance team.").unwrap();

        let model = Arc::new(CountingModel::default());
        let result = analyser(model.clone(), 50_000)
            .analyse(&path, "text/plain")
            .await
            .unwrap();

        assert!(result.token_count > 0);
        assert!(result.summary.starts_with("resumen de"));
        assert_eq!(result.embedding, vec![0.25, 0.5]);
        assert_eq!(result.hashtags, vec!["finance", "q3"]);
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn long_text_short_circuits_without_model_calls() {
        let model = Arc::new(CountingModel::default());
        let text = "palabra ".repeat(200);
        let result = analyser(model.clone(), 10)
            .analyse_content(ContentSource::FromText(text))
            .await
            .unwrap();

        assert_eq!(result.summary, TOO_LONG_SUMMARY);
        assert!(result.token_count >= 10);
        assert!(result.embedding.is_empty());
        assert!(result.hashtags.is_empty());
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unsupported_mime_is_skipped() {
        let model = Arc::new(CountingModel::default());
        let result = analyser(model.clone(), 50_000)
            .analyse(Path::new("/does/not/matter.zip"), "application/zip")
            .await
            .unwrap();
        assert_eq!(result, FileAnalysis::skipped());
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn convertible_mime_goes_through_converter() {
        let model = Arc::new(CountingModel::default());
        let result = analyser(model.clone(), 50_000)
            .analyse(Path::new("/does/not/matter.pdf"), "application/pdf")
            .await
            .unwrap();
        assert_eq!(result.summary, "resumen de 16 caracteres");
    }

    #[tokio::test]
    async fn types_the_converter_cannot_handle_are_skipped() {
        let model = Arc::new(CountingModel::default());
        let analyser = MetaAnalyser::new(model.clone(), Arc::new(LocalConverter), 50_000);

        for (path, mime) in [
            ("/x/photo.png", "image/png"),
            (
                "/x/sheet.xlsx",
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            ),
        ] {
            assert_eq!(analyser.category(mime), MimeCategory::Unsupported);
            assert!(!analyser.calls_model(mime));
            let result = analyser.analyse(Path::new(path), mime).await.unwrap();
            assert_eq!(result, FileAnalysis::skipped());
        }

        assert!(analyser.calls_model("application/pdf"));
        assert!(analyser.calls_model("text/plain"));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn conversion_failure_is_reported() {
        let analyser = MetaAnalyser::new(
            Arc::new(CountingModel::default()),
            Arc::new(BrokenConverter),
            50_000,
        );
        let err = analyser
            .analyse(Path::new("/x/scan.png"), "image/png")
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Conversion(_)));
    }

    #[tokio::test]
    async fn invalid_utf8_is_a_decode_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("latin1.txt");
        std::fs::write(&path, [0x66, 0x6f, 0xff, 0xfe, 0x6f]).unwrap();

        let err = analyser(Arc::new(CountingModel::default()), 50_000)
            .analyse(&path, "text/plain")
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Decode(_)));
    }

    #[tokio::test]
    async fn empty_text_skips_model() {
        let model = Arc::new(CountingModel::default());
        let result = analyser(model.clone(), 50_000)
            .analyse_content(ContentSource::FromText("   \n".to_string()))
            .await
            .unwrap();
        assert_eq!(result, FileAnalysis::skipped());
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }
}
