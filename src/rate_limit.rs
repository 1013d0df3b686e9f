//! Limitador de llamadas al LLM como decorador del puerto de análisis.
//!
//! Ventana fija: como mucho `max_calls` análisis por ventana; la llamada que
//! excede el cupo espera a que la ventana actual expire.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::info;

use crate::analysis::ContentAnalysis;
use crate::config::RateLimitConfig;
use crate::error::AnalysisError;
use crate::models::FileAnalysis;

struct Window {
    started: Instant,
    calls: u32,
}

pub struct FixedWindowLimiter {
    max_calls: u32,
    window: Duration,
    state: Mutex<Window>,
}

impl FixedWindowLimiter {
    pub fn new(max_calls: u32, window: Duration) -> Self {
        Self {
            max_calls,
            window,
            state: Mutex::new(Window {
                started: Instant::now(),
                calls: 0,
            }),
        }
    }

    /// Reserva un hueco en la ventana, esperando si está agotada.
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;
        let elapsed = state.started.elapsed();
        if elapsed >= self.window {
            state.started = Instant::now();
            state.calls = 0;
        } else if state.calls >= self.max_calls {
            let wait = self.window - elapsed;
            info!("Límite de {} llamadas al LLM alcanzado; esperando {:?}", self.max_calls, wait);
            tokio::time::sleep(wait).await;
            state.started = Instant::now();
            state.calls = 0;
        }
        state.calls += 1;
    }
}

/// Envuelve un `ContentAnalysis` y limita sólo los análisis que llaman a un modelo.
pub struct RateLimitedAnalysis {
    inner: Arc<dyn ContentAnalysis>,
    limiter: FixedWindowLimiter,
}

impl RateLimitedAnalysis {
    pub fn new(inner: Arc<dyn ContentAnalysis>, limiter: FixedWindowLimiter) -> Self {
        Self { inner, limiter }
    }

    /// Aplica el límite configurado, o devuelve el analizador tal cual si está desactivado.
    pub fn wrap(inner: Arc<dyn ContentAnalysis>, cfg: &RateLimitConfig) -> Arc<dyn ContentAnalysis> {
        if cfg.max_calls == 0 {
            return inner;
        }
        Arc::new(Self::new(
            inner,
            FixedWindowLimiter::new(cfg.max_calls, cfg.window),
        ))
    }
}

#[async_trait]
impl ContentAnalysis for RateLimitedAnalysis {
    async fn analyse(&self, path: &Path, mime_type: &str) -> Result<FileAnalysis, AnalysisError> {
        if self.inner.calls_model(mime_type) {
            self.limiter.acquire().await;
        }
        self.inner.analyse(path, mime_type).await
    }

    fn calls_model(&self, mime_type: &str) -> bool {
        self.inner.calls_model(mime_type)
    }
}
