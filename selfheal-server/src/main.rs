//! Thin HTTP front end for the selfheal workflow.
//!
//! Exposes one operation, `POST /run_workflow`, which drives a full
//! generate-test-repair run and returns the terminal projection as JSON,
//! plus a `GET /health` probe. The workflow driver is synchronous; runs are
//! moved onto blocking threads so the listener stays responsive while
//! serving concurrent, independent runs.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use selfheal::io::config::load_config;
use selfheal::logging;
use selfheal::run::Driver;

#[derive(Parser)]
#[command(
    name = "selfheal-server",
    version,
    about = "HTTP front end for the selfheal workflow"
)]
struct Cli {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:8000")]
    addr: SocketAddr,
    /// Path to the workflow config file.
    #[arg(long, default_value = "selfheal.toml")]
    config: PathBuf,
}

#[derive(Debug, Deserialize)]
struct RunWorkflowRequest {
    prompt: String,
    max_attempts: Option<u32>,
}

fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let cfg = load_config(&cli.config)
        .with_context(|| format!("load config {}", cli.config.display()))?;
    // Build the blocking collaborator clients before entering the runtime.
    let driver = Arc::new(Driver::from_config(cfg).context("build collaborator clients")?);
    let runtime = tokio::runtime::Runtime::new().context("start runtime")?;
    runtime.block_on(serve(cli.addr, driver))
}

async fn serve(addr: SocketAddr, driver: Arc<Driver>) -> Result<()> {
    let app = router(driver);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(addr = %addr, "listening");
    axum::serve(listener, app).await.context("serve")?;
    Ok(())
}

fn router(driver: Arc<Driver>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/run_workflow", post(run_workflow))
        .with_state(driver)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn run_workflow(
    State(driver): State<Arc<Driver>>,
    Json(request): Json<RunWorkflowRequest>,
) -> Response {
    let prompt = request.prompt.trim().to_string();
    if prompt.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "prompt is required"})),
        )
            .into_response();
    }
    let max_attempts = request
        .max_attempts
        .unwrap_or(driver.config().max_attempts_default);

    let run = tokio::task::spawn_blocking(move || driver.run(&prompt, max_attempts)).await;
    match run {
        Ok(result) => Json(result).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": err.to_string()})),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_defaults() {
        let cli = Cli::parse_from(["selfheal-server"]);
        assert_eq!(cli.addr, "127.0.0.1:8000".parse::<SocketAddr>().unwrap());
        assert_eq!(cli.config, PathBuf::from("selfheal.toml"));
    }

    #[test]
    fn request_accepts_optional_budget() {
        let request: RunWorkflowRequest =
            serde_json::from_str(r#"{"prompt": "print hello"}"#).expect("parse");
        assert_eq!(request.prompt, "print hello");
        assert_eq!(request.max_attempts, None);

        let request: RunWorkflowRequest =
            serde_json::from_str(r#"{"prompt": "print hello", "max_attempts": 5}"#)
                .expect("parse");
        assert_eq!(request.max_attempts, Some(5));
    }
}
