use std::path::{Path, PathBuf};
use std::sync::PoisonError;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::spawn;
use tracing::{error, info, warn};
use url::Url;

use crate::{
    app_state::{AppState, Status},
    ask::{self, Answer},
    models::{FileTreeNode, GraphStats},
};

/// Ficheros de contexto como máximo por pregunta.
const ASK_FILE_LIMIT: usize = 20;

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(code: StatusCode, message: impl Into<String>) -> ApiError {
    (code, Json(json!({ "error": message.into() })))
}

#[derive(Deserialize)]
pub struct SelectDirPayload {
    path: String,
}

#[derive(Deserialize)]
pub struct AskPayload {
    question: String,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/list-directory", post(list_directory_handler))
        .route("/api/select-directory", post(select_directory_handler))
        .route("/api/walk", post(walk_handler))
        .route("/api/status", get(status_handler))
        .route("/api/neo4j-info", get(neo4j_info_handler))
        .route("/api/graph-stats", get(graph_stats_handler))
        .route("/api/repair-directory-links", post(repair_links_handler))
        .route("/api/wipe", post(wipe_handler))
        .route("/api/ask", post(ask_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

/// Lanza un recorrido en segundo plano. Devuelve `false` si ya hay uno en curso.
pub fn start_walk(state: &AppState, root: PathBuf) -> bool {
    {
        let mut status = state.status.lock().unwrap_or_else(PoisonError::into_inner);
        if status.is_busy {
            return false;
        }
        status.is_busy = true;
        status.message = format!("Iniciando recorrido de {}...", root.display());
        status.progress = 0.0;
    }

    let state = state.clone();
    spawn(async move {
        let result = state.walker.walk(&root, state.status.clone()).await;

        let mut status = state.status.lock().unwrap_or_else(PoisonError::into_inner);
        status.is_busy = false;
        status.progress = 0.0;
        match result {
            Ok(report) => {
                status.message = format!("¡Recorrido completado! {report}");
                status.last_report = Some(report);
            }
            Err(err) if err.is_precondition() => {
                warn!("Recorrido no iniciado: {err}");
                status.message = format!("Recorrido no iniciado: {err}");
            }
            Err(err) => {
                error!("Error en el recorrido: {err}");
                status.message = format!("Error en el recorrido: {err}");
            }
        }
    });
    true
}

// --- Handlers ---

#[axum::debug_handler]
async fn list_directory_handler(
    Json(payload): Json<SelectDirPayload>,
) -> Result<Json<FileTreeNode>, ApiError> {
    let path = if payload.path.is_empty() {
        dirs::home_dir().ok_or_else(|| {
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "No se pudo determinar el directorio home del usuario.",
            )
        })?
    } else {
        PathBuf::from(&payload.path)
    };

    if !path.is_dir() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "La ruta proporcionada no es un directorio válido.",
        ));
    }

    build_file_tree(&path).map(Json).map_err(|e| {
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Error al leer el directorio: {e}"),
        )
    })
}

#[axum::debug_handler]
async fn select_directory_handler(
    State(state): State<AppState>,
    Json(payload): Json<SelectDirPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let path = PathBuf::from(&payload.path);
    if !path.is_dir() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "La ruta proporcionada no es un directorio válido.",
        ));
    }

    *state.current_dir.lock().unwrap_or_else(PoisonError::into_inner) = Some(path);
    Ok((StatusCode::OK, Json(json!({ "message": "Directorio fijado para el recorrido." }))))
}

#[axum::debug_handler]
async fn walk_handler(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let root_dir = state
        .current_dir
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Primero debe seleccionar un directorio."))?;

    if !start_walk(&state, root_dir) {
        return Err(api_error(StatusCode::CONFLICT, "Ya hay un recorrido en curso."));
    }
    Ok(StatusCode::ACCEPTED)
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    Json(state.status.lock().unwrap_or_else(PoisonError::into_inner).clone())
}

fn browser_url(neo4j_uri: &str) -> String {
    // neo4j:// y bolt:// no admiten cambiar el esquema a http: se reconstruye.
    Url::parse(neo4j_uri)
        .ok()
        .and_then(|url| url.host_str().map(|host| format!("http://{host}:7474/")))
        .unwrap_or_else(|| "http://localhost:7474".to_string())
}

#[axum::debug_handler]
async fn neo4j_info_handler(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let browser_url = browser_url(&state.config.neo4j_uri);

    match state.store.ping().await {
        Ok(()) => Ok(Json(json!({ "status": "ok", "browser_url": browser_url }))),
        Err(e) => {
            error!("Error en el health check de Neo4j: {e}");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

#[axum::debug_handler]
async fn graph_stats_handler(State(state): State<AppState>) -> Result<Json<GraphStats>, ApiError> {
    state.store.count_nodes().await.map(Json).map_err(|e| {
        error!("Error contando nodos: {e}");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })
}

#[axum::debug_handler]
async fn repair_links_handler(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let internal = |e: crate::error::StoreError| {
        error!("Error reparando relaciones de directorios: {e}");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    };

    let repaired = state.store.repair_directory_links().await.map_err(internal)?;
    let unlinked = state.store.find_unlinked_directories().await.map_err(internal)?;
    info!("Relaciones reparadas: {repaired}; directorios sin padre: {}", unlinked.len());

    Ok(Json(json!({ "repaired": repaired, "unlinked": unlinked })))
}

#[axum::debug_handler]
async fn wipe_handler(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    if state.status.lock().unwrap_or_else(PoisonError::into_inner).is_busy {
        return Err(api_error(
            StatusCode::CONFLICT,
            "No se puede vaciar la base de datos durante un recorrido.",
        ));
    }

    state.store.wipe().await.map_err(|e| {
        error!("Error vaciando la base de datos: {e}");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    warn!("🧹 Base de datos vaciada por petición de la API.");
    Ok((StatusCode::OK, Json(json!({ "message": "Base de datos vaciada." }))))
}

#[axum::debug_handler]
async fn ask_handler(
    State(state): State<AppState>,
    Json(payload): Json<AskPayload>,
) -> Result<Json<Answer>, ApiError> {
    if payload.question.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "La pregunta está vacía."));
    }

    ask::ask(
        state.store.as_ref(),
        state.answerer.as_ref(),
        &payload.question,
        ASK_FILE_LIMIT,
    )
    .await
    .map(Json)
    .map_err(|e| {
        error!("Error respondiendo la pregunta: {e:#}");
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Error al procesar la pregunta: {e}"),
        )
    })
}

// --- Handler de Apagado y Utilidades ---

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state
        .shutdown_sender
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
    {
        let _ = sender.send(());
    }
    StatusCode::OK
}

/// Un nivel del árbol: directorios primero, después por nombre.
fn build_file_tree(path: &Path) -> std::io::Result<FileTreeNode> {
    let metadata = std::fs::metadata(path)?;
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string());

    let is_dir = metadata.is_dir();
    let mut children = Vec::new();

    if is_dir {
        let mut entries: Vec<_> = std::fs::read_dir(path)?.filter_map(Result::ok).collect();

        entries.sort_by(|a, b| {
            let a_is_dir = a.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
            let b_is_dir = b.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
            b_is_dir.cmp(&a_is_dir).then_with(|| a.file_name().cmp(&b.file_name()))
        });

        for entry in entries {
            if let Ok(entry_meta) = entry.metadata() {
                children.push(FileTreeNode {
                    path: entry.path(),
                    name: entry.file_name().to_string_lossy().to_string(),
                    is_dir: entry_meta.is_dir(),
                    children: Vec::new(),
                });
            }
        }
    }

    Ok(FileTreeNode {
        path: path.to_path_buf(),
        name,
        is_dir,
        children,
    })
}
