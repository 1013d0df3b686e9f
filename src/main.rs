// Módulos de la aplicación
mod analysis;
mod api;
mod ask;
mod app_state;
mod cleanup;
mod config;
mod converter;
mod error;
mod identity;
mod llm;
#[cfg(test)]
mod memory_store;
mod models;
mod neo4j_client;
mod rate_limit;
mod store;
mod walker;

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use axum::Router;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::analysis::{ContentAnalysis, MetaAnalyser};
use crate::app_state::{AppState, Status};
use crate::converter::{AzureDocumentConverter, DocumentConverter, LocalConverter};
use crate::neo4j_client::Neo4jStore;
use crate::rate_limit::RateLimitedAnalysis;
use crate::store::GraphStore;
use crate::walker::{WalkOptions, Walker};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Cargar .env y configuración
    dotenvy::dotenv().ok();
    let cfg = config::AppConfig::from_env().context("Error al cargar la configuración")?;

    // 2. Logging: RUST_LOG manda; si no, CRAWLER_VERBOSE decide el nivel
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.default_log_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // 3. Conectar a Neo4j y asegurar esquemas
    let graph = neo4j_client::connect_from_config(&cfg)
        .await
        .context("Error conectando a Neo4j")?;
    neo4j_client::ensure_schema(&graph)
        .await
        .context("Error asegurando el esquema de Neo4j")?;
    let store: Arc<dyn GraphStore> = Arc::new(Neo4jStore::new(Arc::new(graph)));

    let stats = store.count_nodes().await?;
    info!(
        "📊 Grafo actual: {} unidades, {} directorios, {} ficheros, {} hashtags",
        stats.drives, stats.directories, stats.files, stats.hashtags
    );

    // 4. Análisis de contenido: LLM + conversor + límite de llamadas
    let llm_manager =
        Arc::new(llm::LlmManager::from_config(&cfg).context("Error inicializando LLM Manager")?);
    let converter: Arc<dyn DocumentConverter> = match &cfg.converter {
        Some(conv) => {
            info!("Conversión de documentos con Azure Document Intelligence ({})", conv.endpoint);
            Arc::new(AzureDocumentConverter::from_config(conv)?)
        }
        None => {
            info!("Conversión de documentos local (sólo PDF)");
            Arc::new(LocalConverter)
        }
    };
    let analyser: Arc<dyn ContentAnalysis> = Arc::new(MetaAnalyser::new(
        llm_manager.clone(),
        converter,
        cfg.token_limit,
    ));
    let analyser = RateLimitedAnalysis::wrap(analyser, &cfg.rate_limit);

    let walker = Arc::new(Walker::new(
        store.clone(),
        analyser,
        WalkOptions {
            drive_label: cfg.drive_label.clone(),
        },
    ));

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 5. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        store,
        walker,
        answerer: llm_manager,
        status: Arc::new(Mutex::new(Status::ready())),
        current_dir: Arc::new(Mutex::new(cfg.crawl_root.clone())),
        shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
    };

    // 6. Router de la API
    let app = Router::new().merge(api::create_router(app_state.clone())).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    // 7. Recorrido inicial si hay raíz preconfigurada
    if let Some(root) = &cfg.crawl_root {
        if api::start_walk(&app_state, root.clone()) {
            info!("🔎 Recorrido inicial de {}", root.display());
        } else {
            warn!("No se pudo iniciar el recorrido inicial de {}", root.display());
        }
    }

    // 8. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {server_addr}"))?;
    info!("🚀 Servidor escuchando en http://{}", server_addr);

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
