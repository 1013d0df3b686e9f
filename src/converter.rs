//! Conversión de documentos binarios (PDF, ofimática, imágenes) a texto.
//!
//! Sin servicio remoto configurado sólo se extraen PDFs localmente con
//! `pdf-extract`. Con Azure Document Intelligence configurado todos los tipos
//! convertibles pasan por el modelo `prebuilt-layout`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::analysis::CONVERTIBLE_MIME_TYPES;
use crate::config::ConverterConfig;

#[async_trait]
pub trait DocumentConverter: Send + Sync {
    async fn convert(&self, path: &Path, mime_type: &str) -> Result<String>;

    /// Tipos que este conversor sabe convertir.
    fn supports(&self, mime_type: &str) -> bool {
        CONVERTIBLE_MIME_TYPES.contains(&mime_type)
    }
}

/// Extracción local: sólo PDF.
#[derive(Debug, Default, Clone)]
pub struct LocalConverter;

#[async_trait]
impl DocumentConverter for LocalConverter {
    async fn convert(&self, path: &Path, mime_type: &str) -> Result<String> {
        if mime_type != "application/pdf" {
            bail!("No hay conversor configurado para '{mime_type}' (defina AZURE_DOC_ENDPOINT)");
        }
        let path: PathBuf = path.to_path_buf();
        let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text(&path))
            .await
            .context("La tarea de extracción de PDF terminó de forma inesperada")?
            .map_err(|e| anyhow!("No se pudo extraer texto del PDF: {e}"))?;
        Ok(text)
    }

    fn supports(&self, mime_type: &str) -> bool {
        mime_type == "application/pdf"
    }
}

const API_VERSION: &str = "2024-11-30";
const MAX_POLLS: usize = 60;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeOperation {
    status: String,
    analyze_result: Option<AnalyzeResult>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResult {
    #[serde(default)]
    content: String,
}

/// Cliente de Azure AI Document Intelligence (envío + sondeo del resultado).
#[derive(Debug, Clone)]
pub struct AzureDocumentConverter {
    client: reqwest::Client,
    endpoint: Url,
    api_key: String,
    poll_interval: Duration,
}

impl AzureDocumentConverter {
    pub fn from_config(cfg: &ConverterConfig) -> Result<Self> {
        let endpoint = Url::parse(&cfg.endpoint)
            .with_context(|| format!("AZURE_DOC_ENDPOINT inválido: {}", cfg.endpoint))?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key: cfg.api_key.clone(),
            poll_interval: Duration::from_secs(2),
        })
    }

    fn analyze_url(&self) -> Result<Url> {
        let mut url = self
            .endpoint
            .join("documentintelligence/documentModels/prebuilt-layout:analyze")?;
        url.query_pairs_mut().append_pair("api-version", API_VERSION);
        Ok(url)
    }
}

#[async_trait]
impl DocumentConverter for AzureDocumentConverter {
    async fn convert(&self, path: &Path, mime_type: &str) -> Result<String> {
        let body = tokio::fs::read(path)
            .await
            .with_context(|| format!("No se pudo leer {}", path.display()))?;

        let response = self
            .client
            .post(self.analyze_url()?)
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await?
            .error_for_status()?;

        let operation = response
            .headers()
            .get("operation-location")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| anyhow!("Respuesta sin cabecera Operation-Location"))?
            .to_string();
        debug!("Conversión de {} ({mime_type}) en curso: {operation}", path.display());

        for _ in 0..MAX_POLLS {
            tokio::time::sleep(self.poll_interval).await;
            let op: AnalyzeOperation = self
                .client
                .get(&operation)
                .header("Ocp-Apim-Subscription-Key", &self.api_key)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            match op.status.as_str() {
                "succeeded" => {
                    return Ok(op.analyze_result.map(|r| r.content).unwrap_or_default());
                }
                "failed" => bail!("El servicio de conversión falló: {:?}", op.error),
                _ => continue,
            }
        }
        bail!(
            "La conversión de {} no terminó tras {MAX_POLLS} sondeos",
            path.display()
        )
    }
}
