use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

use crate::{
    ask::AnswerModel,
    config::AppConfig,
    store::GraphStore,
    walker::{WalkReport, Walker},
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn GraphStore>,
    pub walker: Arc<Walker>,
    pub answerer: Arc<dyn AnswerModel>,
    pub status: Arc<Mutex<Status>>,
    pub current_dir: Arc<Mutex<Option<PathBuf>>>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Status {
    pub is_busy: bool,
    pub message: String,
    pub progress: f32, // Valor entre 0.0 y 1.0
    pub last_report: Option<WalkReport>,
}

impl Status {
    pub fn ready() -> Self {
        Self {
            message: "Servidor listo.".to_string(),
            ..Self::default()
        }
    }
}
