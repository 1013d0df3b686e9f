//! Carga y gestión de configuración de la aplicación (Neo4j + LLM + recorrido).

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

#[derive(Clone, Debug)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Servicio remoto de conversión de documentos (Azure Document Intelligence).
#[derive(Clone, Debug)]
pub struct ConverterConfig {
    pub endpoint: String,
    pub api_key: String,
}

/// Límite de llamadas al LLM por ventana fija. `max_calls == 0` lo desactiva.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub max_calls: u32,
    pub window: Duration,
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub server_addr: String,

    pub llm_provider: LlmProvider,
    pub llm_embedding_model: String,
    pub llm_chat_model: String,

    /// Raíz preseleccionada; si existe se lanza un recorrido al arrancar.
    pub crawl_root: Option<PathBuf>,
    /// Etiqueta de la unidad que contiene la raíz del recorrido.
    pub drive_label: Option<String>,
    /// Umbral (tokens cl100k) por encima del cual no se resume el documento.
    pub token_limit: usize,
    pub rate_limit: RateLimitConfig,
    pub converter: Option<ConverterConfig>,
    pub verbose: bool,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let neo4j_uri = env::var("NEO4J_URI")
            .map_err(|_| anyhow!("Falta NEO4J_URI en el entorno"))?;
        let neo4j_user = env::var("NEO4J_USER")
            .map_err(|_| anyhow!("Falta NEO4J_USER en el entorno"))?;
        let neo4j_password = env::var("NEO4J_PASSWORD")
            .map_err(|_| anyhow!("Falta NEO4J_PASSWORD en el entorno"))?;

        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3322".to_string());

        let llm_provider_str =
            env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;

        let llm_embedding_model = env::var("LLM_EMBEDDING_MODEL")
            .unwrap_or_else(|_| "text-embedding-3-small".to_string());
        let llm_chat_model =
            env::var("LLM_CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let crawl_root = non_empty_var("CRAWL_ROOT").map(PathBuf::from);
        let drive_label = non_empty_var("DRIVE_LABEL");

        let token_limit = parse_var("ANALYSIS_TOKEN_LIMIT", 50_000)?;
        let rate_limit = RateLimitConfig {
            max_calls: parse_var("LLM_RATE_LIMIT_CALLS", 8)?,
            window: Duration::from_secs(parse_var("LLM_RATE_LIMIT_WINDOW_SECS", 60)?),
        };

        let converter = match (non_empty_var("AZURE_DOC_ENDPOINT"), non_empty_var("AZURE_DOC_KEY")) {
            (Some(endpoint), Some(api_key)) => Some(ConverterConfig { endpoint, api_key }),
            (Some(_), None) => return Err(anyhow!("AZURE_DOC_ENDPOINT definido sin AZURE_DOC_KEY")),
            _ => None,
        };

        let verbose = non_empty_var("CRAWLER_VERBOSE")
            .map(|v| parse_bool(&v))
            .unwrap_or(false);

        Ok(Self {
            neo4j_uri,
            neo4j_user,
            neo4j_password,
            server_addr,
            llm_provider,
            llm_embedding_model,
            llm_chat_model,
            crawl_root,
            drive_label,
            token_limit,
            rate_limit,
            converter,
            verbose,
        })
    }

    /// Filtro de logs por defecto cuando `RUST_LOG` no está definido.
    pub fn default_log_filter(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match non_empty_var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Valor inválido para {key}: '{raw}'")),
        None => Ok(default),
    }
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "true" | "1" | "t" | "yes")
}
