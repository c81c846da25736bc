//! HTTP trigger surface.
//!
//! `/scrape-jobs` runs the pipeline once per request on a blocking thread.
//! Runs never overlap: a trigger that arrives while one is in flight gets
//! 409 instead of queueing behind it.

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::error::SetupError;
use crate::ingest::RunSummary;

/// Builds a fresh pipeline and runs it to completion.
pub type RunFn = dyn Fn() -> Result<RunSummary, SetupError> + Send + Sync;

#[derive(Clone)]
pub struct AppState {
    run: Arc<RunFn>,
    gate: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(run: Arc<RunFn>) -> Self {
        Self {
            run,
            gate: Arc::new(Mutex::new(())),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/scrape-jobs", get(trigger_scrape).post(trigger_scrape))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, "Trigger server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("Server error")
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn trigger_scrape(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let Ok(guard) = state.gate.clone().try_lock_owned() else {
        return error_response(StatusCode::CONFLICT, "A scrape run is already in progress".to_string());
    };

    // Held until the run ends, even if the caller hangs up
    let run = state.run.clone();
    let task = tokio::task::spawn_blocking(move || {
        let _guard = guard;
        run()
    });
    match task.await {
        Ok(Ok(summary)) => (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "message": "Job scraping completed",
                "timestamp": Utc::now().to_rfc3339(),
                "summary": summary,
            })),
        ),
        Ok(Err(e)) => {
            error!(error = %e, "Error in scrape trigger");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {}", e))
        }
        Err(e) => {
            error!(error = %e, "Scrape run aborted");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Job scraping failed - check logs".to_string())
        }
    }
}

fn error_response(status: StatusCode, message: String) -> (StatusCode, Json<Value>) {
    (
        status,
        Json(json!({
            "status": "error",
            "message": message,
            "timestamp": Utc::now().to_rfc3339(),
        })),
    )
}
